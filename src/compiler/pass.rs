//! Pass traits and infrastructure for the optimization pipeline.
//!
//! This module defines the [`Pass`] trait that every graph rewrite implements,
//! the [`Analyses`] a pass can depend on or invalidate, and the
//! [`PassContext`] through which a running pass reads the configuration and
//! the cached analyses.

use bitflags::bitflags;

use crate::{
    analysis::{DominatorTree, LoopInfo},
    compiler::events::EventLog,
    config::CompilerConfig,
    ir::{BlockId, Graph},
    Error, Result,
};

bitflags! {
    /// Set of cached structural analyses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Analyses: u8 {
        /// [`DominatorTree`]
        const DOMINATORS = 0b0001;
        /// [`LoopInfo`]. Implies the dominator tree it was computed from.
        const LOOPS = 0b0010;
        /// Reverse postorder of the blocks.
        const RPO = 0b0100;
    }
}

impl Analyses {
    /// Analyses that describe the block graph and die with any edge change.
    pub const CONTROL_FLOW: Analyses = Analyses::DOMINATORS
        .union(Analyses::LOOPS)
        .union(Analyses::RPO);
}

/// What happened when the pass manager ran a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum PassOutcome {
    /// The enablement predicate declined; the graph was not touched.
    Skipped,
    /// The pass ran and found nothing to rewrite.
    Unchanged,
    /// The pass rewrote the graph.
    Changed,
}

impl PassOutcome {
    /// Returns `true` for [`PassOutcome::Changed`].
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, PassOutcome::Changed)
    }
}

/// A graph-rewriting pass.
///
/// All passes must be thread-safe (Send + Sync): one pass object may be
/// shared by the pass managers of several graphs compiled in parallel.
/// Per-graph state therefore lives on the stack of [`Pass::run`], never on
/// the pass itself.
///
/// # Protocol
///
/// The pass manager calls [`Pass::should_run`] first. If it returns `false`
/// the pass is reported as skipped and nothing else happens. Otherwise the
/// analyses listed in [`Pass::required_analyses`] are materialized (or reused
/// from the cache), [`Pass::run`] is invoked, and if it reported a change the
/// analyses in [`Pass::invalidated_analyses`] are dropped.
pub trait Pass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Enablement predicate: should this pass run on `graph` under `config`?
    ///
    /// Must not depend on anything but the configuration and read-only graph
    /// properties such as the target architecture.
    fn should_run(&self, config: &CompilerConfig, graph: &Graph) -> bool;

    /// Analyses the pass reads through its [`PassContext`].
    fn required_analyses(&self) -> Analyses {
        Analyses::empty()
    }

    /// Analyses that no longer hold once the pass has changed the graph.
    ///
    /// A pass that only reorders or replaces instructions inside blocks
    /// invalidates nothing; a pass that creates blocks or edges must list
    /// everything derived from control flow.
    fn invalidated_analyses(&self) -> Analyses {
        Analyses::empty()
    }

    /// Runs the pass on one graph.
    ///
    /// Returns `true` if any changes were made, `false` otherwise. Rewrites
    /// should be recorded to `ctx.events`.
    ///
    /// # Arguments
    ///
    /// * `graph` - The graph to transform.
    /// * `ctx` - Configuration, cached analyses and the event log.
    ///
    /// # Errors
    ///
    /// Returns an error only for conditions that indicate a corrupted graph.
    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool>;
}

/// Read-only state handed to a running pass.
///
/// Analyses are only reachable if the pass declared them; asking for an
/// undeclared one is a bug in the pass and yields
/// [`Error::AnalysisUnavailable`].
pub struct PassContext<'a> {
    config: &'a CompilerConfig,
    dominators: Option<&'a DominatorTree>,
    loops: Option<&'a LoopInfo>,
    rpo: Option<&'a [BlockId]>,
    /// Rewrites performed by the running pass.
    pub events: EventLog,
}

impl<'a> PassContext<'a> {
    /// Context without any analyses, for driving a pass by hand.
    #[must_use]
    pub fn new(config: &'a CompilerConfig) -> Self {
        PassContext {
            config,
            dominators: None,
            loops: None,
            rpo: None,
            events: EventLog::new(),
        }
    }

    /// Attaches a dominator tree.
    #[must_use]
    pub fn with_dominators(mut self, dominators: &'a DominatorTree) -> Self {
        self.dominators = Some(dominators);
        self
    }

    /// Attaches a loop forest.
    #[must_use]
    pub fn with_loops(mut self, loops: &'a LoopInfo) -> Self {
        self.loops = Some(loops);
        self
    }

    /// Attaches a reverse postorder.
    #[must_use]
    pub fn with_rpo(mut self, rpo: &'a [BlockId]) -> Self {
        self.rpo = Some(rpo);
        self
    }

    /// The compilation's configuration.
    #[must_use]
    pub fn config(&self) -> &CompilerConfig {
        self.config
    }

    /// The cached dominator tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisUnavailable`] if the pass did not require
    /// [`Analyses::DOMINATORS`].
    pub fn dominators(&self) -> Result<&'a DominatorTree> {
        self.dominators
            .ok_or(Error::AnalysisUnavailable("dominators"))
    }

    /// The cached loop forest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisUnavailable`] if the pass did not require
    /// [`Analyses::LOOPS`].
    pub fn loops(&self) -> Result<&'a LoopInfo> {
        self.loops.ok_or(Error::AnalysisUnavailable("loops"))
    }

    /// The cached reverse postorder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AnalysisUnavailable`] if the pass did not require
    /// [`Analyses::RPO`].
    pub fn rpo(&self) -> Result<&'a [BlockId]> {
        self.rpo.ok_or(Error::AnalysisUnavailable("rpo"))
    }
}
