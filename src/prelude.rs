//! # midend Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the midend library. Import it to build graphs and run the pipeline without
//! spelling out module paths.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all midend operations
pub use crate::Error;

/// The result type used throughout midend
pub use crate::Result;

/// Per-compilation configuration
pub use crate::config::{Arch, CompilerConfig, VerifyMode};

/// Layout and alias facts of the managed runtime
pub use crate::runtime::{DefaultRuntime, RuntimeInterface};

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// Graph, blocks and instructions
pub use crate::ir::{BasicBlock, BlockId, Graph, InstId, Instruction};

/// Opcodes and types
pub use crate::ir::{ConditionCode, DataType, Opcode};

/// Closure-style graph construction
pub use crate::ir::{BlockBuilder, FunctionBuilder, GraphBuilder};

// ================================================================================================
// Analyses
// ================================================================================================

/// Structural analyses
pub use crate::analysis::{AliasResult, DominatorTree, Loop, LoopInfo};

// ================================================================================================
// Pipeline
// ================================================================================================

/// Passes and the pass manager
pub use crate::compiler::{
    compile_all, standard_pipeline, CodeSinkPass, EventKind, EventLog, MemoryCoalescingPass, Pass,
    PassContext, PassManager, PassOutcome, PipelineReport, SchedulerPass,
};

/// Structural verification
pub use crate::checker::{Diagnostic, GraphChecker, Invariant};
