//! Optimization pipeline over the graph IR.
//!
//! This module sits between the structural analyses and the back end:
//!
//! - [`crate::analysis`]: dominators, loops, traversal orders, alias queries
//! - [`compiler`](self): passes, the pass manager and its analysis cache
//! - [`crate::checker`]: structural verification run between passes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  PassManager                 One per graph                       │
//! │    ├─ AnalysisCache           Dominators, loops, RPO keyed on    │
//! │    │                          (graph id, cfg epoch)              │
//! │    ├─ run_pass()              predicate → analyses → run →       │
//! │    │                          verify → invalidate → arena reset  │
//! │    └─ EventLog                Every rewrite of every pass        │
//! │                                                                  │
//! │  Pass trait                  Interface for all passes            │
//! │    ├─ should_run()            Enablement predicate               │
//! │    ├─ required_analyses()     Materialized before run()          │
//! │    └─ invalidated_analyses()  Dropped after a change             │
//! │                                                                  │
//! │  Passes (standard pipeline)                                      │
//! │    ├─ CodeSinkPass            Narrowest dominating block         │
//! │    ├─ MemoryCoalescingPass    Paired loads and stores            │
//! │    └─ SchedulerPass           List scheduling within regions     │
//! │                                                                  │
//! │  compile_all()               Independent graphs on rayon workers │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod driver;
mod events;
mod manager;
mod pass;
mod passes;

pub use driver::compile_all;
pub use events::{Event, EventKind, EventBuilder, EventLog};
pub use manager::{PassManager, PassRecord, PipelineReport};
pub use pass::{Analyses, Pass, PassContext, PassOutcome};
pub use passes::{
    is_pairable_type, standard_pipeline, CodeSinkPass, MemoryCoalescingPass, SchedulerPass,
};
