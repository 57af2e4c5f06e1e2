//! Pass manager: runs passes against one graph and owns the analysis cache.
//!
//! For every pass, [`PassManager::run_pass`] performs the same steps:
//!
//! 1. ask the pass's enablement predicate; a declined pass is reported as
//!    [`PassOutcome::Skipped`] and the graph is not touched
//! 2. materialize the analyses the pass requires, reusing cached results
//!    while the graph's control flow epoch is unchanged
//! 3. run the rewrite and capture whether the graph changed
//! 4. drop the analyses the pass declares it invalidates
//! 5. reset the graph's pass-local arena
//! 6. in verification mode, run the graph checker and abort on failure

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, log_enabled, trace, Level};

use crate::{
    analysis::{reverse_postorder, DominatorTree, LoopInfo},
    checker,
    compiler::{
        events::{Event, EventKind, EventLog},
        pass::{Analyses, Pass, PassContext, PassOutcome},
        passes::standard_pipeline,
    },
    config::{CompilerConfig, VerifyMode},
    ir::{BlockId, Graph},
    Error, Result,
};

/// Cached structural analyses of one graph at one control flow epoch.
#[derive(Debug, Default)]
struct AnalysisCache {
    /// `(graph id, cfg epoch)` the cached results describe
    key: Option<(u64, u64)>,
    dominators: Option<DominatorTree>,
    loops: Option<LoopInfo>,
    rpo: Option<Vec<BlockId>>,
}

impl AnalysisCache {
    fn available(&self) -> Analyses {
        let mut set = Analyses::empty();
        set.set(Analyses::DOMINATORS, self.dominators.is_some());
        set.set(Analyses::LOOPS, self.loops.is_some());
        set.set(Analyses::RPO, self.rpo.is_some());
        set
    }

    fn clear(&mut self) {
        self.dominators = None;
        self.loops = None;
        self.rpo = None;
    }

    /// Drops cached results that no longer describe `graph`.
    fn sync(&mut self, graph: &Graph) {
        let key = (graph.id(), graph.cfg_epoch());
        if self.key != Some(key) {
            if self.key.is_some() && !self.available().is_empty() {
                trace!("{}: analysis cache stale at epoch {}", graph.name(), key.1);
            }
            self.clear();
            self.key = Some(key);
        }
    }

    /// Computes every analysis in `required` that is not cached yet.
    fn prepare(&mut self, graph: &mut Graph, required: Analyses) {
        self.sync(graph);

        if required.intersects(Analyses::DOMINATORS | Analyses::LOOPS) && self.dominators.is_none()
        {
            trace!("{}: computing dominators", graph.name());
            self.dominators = Some(DominatorTree::compute(graph));
        }
        if required.contains(Analyses::LOOPS) && self.loops.is_none() {
            if let Some(dom) = &self.dominators {
                trace!("{}: computing loops", graph.name());
                let loops = LoopInfo::compute(graph, dom);
                graph.set_loop_blocks(loops.loop_blocks());
                self.loops = Some(loops);
            }
        }
        if required.contains(Analyses::RPO) && self.rpo.is_none() {
            self.rpo = Some(reverse_postorder(graph));
        }
    }

    fn invalidate(&mut self, which: Analyses) {
        if which.contains(Analyses::DOMINATORS) {
            // Loops were derived from the dominator tree.
            self.dominators = None;
            self.loops = None;
        }
        if which.contains(Analyses::LOOPS) {
            self.loops = None;
        }
        if which.contains(Analyses::RPO) {
            self.rpo = None;
        }
    }

    fn context<'a>(&'a self, config: &'a CompilerConfig, required: Analyses) -> PassContext<'a> {
        let mut ctx = PassContext::new(config);
        if required.intersects(Analyses::DOMINATORS | Analyses::LOOPS) {
            if let Some(dom) = &self.dominators {
                ctx = ctx.with_dominators(dom);
            }
        }
        if required.contains(Analyses::LOOPS) {
            if let Some(loops) = &self.loops {
                ctx = ctx.with_loops(loops);
            }
        }
        if required.contains(Analyses::RPO) {
            if let Some(rpo) = &self.rpo {
                ctx = ctx.with_rpo(rpo);
            }
        }
        ctx
    }
}

/// Result of running one pass.
#[derive(Debug, Clone)]
pub struct PassRecord {
    /// Pass name.
    pub name: &'static str,
    /// What the pass did.
    pub outcome: PassOutcome,
    /// Wall time spent in the pass (zero when skipped).
    pub elapsed: Duration,
    /// Rewrites the pass recorded.
    pub events: Vec<Event>,
    /// Bytes of pass-local memory released after the pass.
    pub arena_bytes_released: usize,
}

impl PassRecord {
    fn skipped(name: &'static str) -> Self {
        PassRecord {
            name,
            outcome: PassOutcome::Skipped,
            elapsed: Duration::ZERO,
            events: Vec::new(),
            arena_bytes_released: 0,
        }
    }
}

impl fmt::Display for PassRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} events, {:?})",
            self.name,
            self.outcome,
            self.events.len(),
            self.elapsed
        )
    }
}

/// Summary of a pipeline run over one graph.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Name of the compiled graph.
    pub graph: String,
    /// One record per pass, in pipeline order.
    pub passes: Vec<PassRecord>,
}

impl PipelineReport {
    /// Number of passes that changed the graph.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.passes.iter().filter(|p| p.outcome.changed()).count()
    }

    /// Returns `true` if any pass changed the graph.
    #[must_use]
    pub fn any_changed(&self) -> bool {
        self.changed() > 0
    }

    /// Outcome of the pass called `name`.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<PassOutcome> {
        self.passes
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.outcome)
    }

    /// Total number of events of one kind across all passes.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.passes
            .iter()
            .flat_map(|p| &p.events)
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Total wall time of all passes.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.passes.iter().map(|p| p.elapsed).sum()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline for {}:", self.graph)?;
        for pass in &self.passes {
            writeln!(f, "  {pass}")?;
        }
        Ok(())
    }
}

/// Runs passes against a graph and owns the analysis cache.
///
/// A manager is cheap to create and holds no graph; it may be reused for
/// several graphs in sequence; the cache notices when the graph changes.
/// Concurrent compilation uses one manager per graph (see
/// [`compile_all`](crate::compiler::compile_all)).
#[derive(Debug)]
pub struct PassManager {
    config: Arc<CompilerConfig>,
    cache: AnalysisCache,
    events: EventLog,
}

impl PassManager {
    /// Creates a manager for one compilation's configuration.
    #[must_use]
    pub fn new(config: Arc<CompilerConfig>) -> Self {
        PassManager {
            config,
            cache: AnalysisCache::default(),
            events: EventLog::new(),
        }
    }

    /// The configuration passes are run under.
    #[must_use]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Every rewrite recorded by passes run through this manager.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Analyses currently cached and still valid for `graph`.
    #[must_use]
    pub fn cached_analyses(&self, graph: &Graph) -> Analyses {
        if self.cache.key == Some((graph.id(), graph.cfg_epoch())) {
            self.cache.available()
        } else {
            Analyses::empty()
        }
    }

    /// Drops every cached analysis.
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
        self.cache.key = None;
    }

    /// Runs the graph checker, labelling failures with `after`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CheckerFailed`] with every violation found.
    pub fn verify(&self, graph: &Graph, after: &'static str) -> Result<()> {
        let diagnostics = checker::GraphChecker::new(graph).run();
        if diagnostics.is_empty() {
            return Ok(());
        }
        error!(
            "{}: graph check failed after {} with {} violation(s)",
            graph.name(),
            after,
            diagnostics.len()
        );
        for diagnostic in &diagnostics {
            error!("  {diagnostic}");
        }
        if log_enabled!(Level::Trace) {
            trace!("{graph}");
        }
        Err(Error::CheckerFailed {
            pass: after,
            diagnostics,
        })
    }

    /// Runs a single pass.
    ///
    /// # Errors
    ///
    /// Propagates errors from the pass itself, and returns
    /// [`Error::CheckerFailed`] if verification is on and the graph is
    /// invalid after the pass.
    pub fn run_pass(&mut self, graph: &mut Graph, pass: &dyn Pass) -> Result<PassRecord> {
        if !pass.should_run(&self.config, graph) {
            debug!("{}: {} skipped", graph.name(), pass.name());
            return Ok(PassRecord::skipped(pass.name()));
        }

        let required = pass.required_analyses();
        self.cache.prepare(graph, required);
        graph.local_mut().set_limit(self.config.max_local_markers);

        let start = Instant::now();
        let ctx = self.cache.context(&self.config, required);
        let result = pass.run(graph, &ctx);
        let events = ctx.events.into_events();
        let elapsed = start.elapsed();

        let released = graph.local_mut().reset();
        let changed = result?;

        if changed {
            self.cache.invalidate(pass.invalidated_analyses());
        }

        let outcome = if changed {
            PassOutcome::Changed
        } else {
            PassOutcome::Unchanged
        };
        debug!(
            "{}: {} {} ({} events, {:?}, {} bytes released)",
            graph.name(),
            pass.name(),
            outcome,
            events.len(),
            elapsed,
            released
        );
        for event in &events {
            trace!("{}: {}: {}", graph.name(), pass.name(), event);
        }
        if changed && self.config.dump_after_pass && log_enabled!(Level::Trace) {
            trace!("after {}:\n{}", pass.name(), graph);
        }

        if self.config.verify == VerifyMode::AfterEachPass {
            self.verify(graph, pass.name())?;
        }

        for event in &events {
            self.events.push(event.clone());
        }

        Ok(PassRecord {
            name: pass.name(),
            outcome,
            elapsed,
            events,
            arena_bytes_released: released,
        })
    }

    /// Runs `passes` in order.
    ///
    /// In verification mode the input graph is checked first, so a
    /// malformed input is reported against `"input"` rather than blamed on
    /// the first pass.
    ///
    /// # Errors
    ///
    /// Stops at the first failing pass or checker run.
    pub fn run_passes(
        &mut self,
        graph: &mut Graph,
        passes: &[Box<dyn Pass>],
    ) -> Result<PipelineReport> {
        if self.config.verify == VerifyMode::AfterEachPass {
            self.verify(graph, "input")?;
        }

        let mut report = PipelineReport {
            graph: graph.name().to_string(),
            passes: Vec::with_capacity(passes.len()),
        };
        for pass in passes {
            report.passes.push(self.run_pass(graph, pass.as_ref())?);
        }
        debug!(
            "{}: pipeline done, {} of {} passes changed the graph",
            graph.name(),
            report.changed(),
            report.passes.len()
        );
        Ok(report)
    }

    /// Runs the standard pipeline: code sinking, memory coalescing, scheduling.
    ///
    /// # Errors
    ///
    /// See [`PassManager::run_passes`].
    pub fn run_pipeline(&mut self, graph: &mut Graph) -> Result<PipelineReport> {
        let passes = standard_pipeline();
        self.run_passes(graph, &passes)
    }
}
