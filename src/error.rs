use thiserror::Error;

use crate::checker::Diagnostic;
use crate::ir::BlockId;

/// Builds an [`Error::Structural`] carrying the source location it was raised from.
macro_rules! structural_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Structural {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only conditions that indicate a bug or a corrupted graph are errors. A pass that finds
/// nothing to rewrite, a disabled pass and a candidate rejected for aliasing or alignment
/// reasons are all reported through ordinary return values instead.
///
/// # Error Categories
///
/// ## Graph Mutation Errors
/// - [`Error::Structural`] - A mutation primitive refused to leave the graph inconsistent
/// - [`Error::InvalidId`] - A block or instruction id does not name a live entity
/// - [`Error::MarkerExhausted`] - The pass-local arena ran out of marker slots
///
/// ## Fatal Pipeline Errors
/// - [`Error::CheckerFailed`] - The graph checker rejected the graph after a pass
/// - [`Error::CyclicDependency`] - The scheduler found a dependency cycle inside a block
///
/// ## Usage Errors
/// - [`Error::AnalysisUnavailable`] - A pass queried an analysis it did not declare
/// - [`Error::GraphError`] - Graph construction or driver misuse
///
/// # Examples
///
/// ```rust,ignore
/// use midend::{Error, compiler::PassManager};
///
/// match manager.run_pipeline(&mut graph) {
///     Ok(report) => println!("{} passes changed the graph", report.changed()),
///     Err(Error::CheckerFailed { pass, diagnostics }) => {
///         for diag in &diagnostics {
///             eprintln!("after {pass}: {diag}");
///         }
///     }
///     Err(e) => eprintln!("compilation aborted: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A graph mutation could not be performed without breaking an invariant.
    ///
    /// The graph is left exactly as it was before the failed call. The error
    /// includes the source location where the violation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the refused mutation
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Structural - {file}:{line}: {message}")]
    Structural {
        /// The message to be printed for the Structural error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A block or instruction id is stale, foreign or out of range.
    #[error("Invalid id - {0}")]
    InvalidId(String),

    /// All marker slots of the pass-local arena are in use.
    ///
    /// Markers are released wholesale when the pass manager resets the arena
    /// after each pass, so this indicates a pass allocating markers in a loop.
    #[error("No free marker slot in the pass-local arena")]
    MarkerExhausted,

    /// The graph checker rejected the graph.
    ///
    /// Always fatal. `pass` names the pass after which the check ran, or
    /// `"input"` when the graph was rejected before the first pass.
    #[error("Graph check failed after {pass}: {} violation(s)", diagnostics.len())]
    CheckerFailed {
        /// Name of the pass that produced the invalid graph
        pass: &'static str,
        /// Every invariant violation found by the checker
        diagnostics: Vec<Diagnostic>,
    },

    /// The per-block dependency graph built by the scheduler contains a cycle.
    #[error("Dependency cycle in {block}: {remaining} instruction(s) could not be scheduled")]
    CyclicDependency {
        /// Block whose dependency graph is cyclic
        block: BlockId,
        /// Number of scheduling units left over when the ready list ran dry
        remaining: usize,
    },

    /// A pass requested an analysis it did not list in its required analyses.
    #[error("Analysis not available to this pass - {0}")]
    AnalysisUnavailable(&'static str),

    /// Graph construction or pipeline setup error.
    #[error("{0}")]
    GraphError(String),
}
