// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # midend
//!
//! The middle end of a method compiler for a managed runtime: a graph IR in
//! SSA form, the structural analyses passes need (dominators, loops,
//! traversal orders, alias queries), a pass manager that caches those
//! analyses and verifies the graph between passes, and three optimizations:
//!
//! - **Code sinking** moves computations into the narrowest block that
//!   dominates their uses
//! - **Memory coalescing** fuses adjacent array accesses into the paired
//!   load/store instructions of ARM targets
//! - **Instruction scheduling** reorders each block to shorten its critical
//!   path without crossing barriers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use midend::prelude::*;
//!
//! let mut graph = GraphBuilder::new(Arch::AArch64)
//!     .with_name("sum2")
//!     .build_with(|f| {
//!         f.block(0, |b| {
//!             let arr = b.param(0, DataType::Reference);
//!             let x = b.load_array_i(DataType::I32, arr, 0);
//!             let y = b.load_array_i(DataType::I32, arr, 1);
//!             let s = b.add(x, y);
//!             b.ret(s);
//!         });
//!     })?;
//!
//! let mut manager = PassManager::new(Arc::new(CompilerConfig::debug()));
//! let report = manager.run_pipeline(&mut graph)?;
//! println!("{report}");
//! # Ok::<(), midend::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - Graph, blocks, instructions, opcodes, the builder and dumps
//! - [`analysis`] - Dominator tree, loop forest, traversals, alias queries
//! - [`compiler`] - Pass trait, pass manager, event log, the passes
//! - [`checker`] - Structural verification with structured diagnostics
//! - [`config`] and [`runtime`] - What the caller provides
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! The library logs through the [`log`] facade and never installs a logger.
//! Pass outcomes are logged at debug level, individual rewrites and graph
//! dumps at trace level, checker failures at error level.

#[macro_use]
pub(crate) mod error;

/// Graph intermediate representation.
///
/// A [`ir::Graph`] owns its blocks and instructions in arenas addressed by
/// [`ir::BlockId`] and [`ir::InstId`]. All mutation goes through methods that
/// either keep every structural invariant or fail without changing anything.
pub mod ir;

/// Structural analyses over a [`ir::Graph`].
pub mod analysis;

/// Graph verification.
pub mod checker;

/// Optimization passes and the pass manager.
pub mod compiler;

/// Per-compilation configuration.
pub mod config;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,ignore
/// use midend::prelude::*;
///
/// let config = CompilerConfig::default().with_arch(Arch::Arm32);
/// ```
pub mod prelude;

/// Runtime interface consulted by the passes.
pub mod runtime;

/// Shared data structures.
pub mod utils;

/// `midend` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `midend` Error type
///
/// Only conditions that indicate a bug or a corrupted graph are errors; see the
/// variants for when each is raised.
pub use error::Error;
