//! Structured checker output.

use std::fmt;

use strum::{EnumIter, IntoStaticStr};

use crate::ir::{BlockId, InstId};

/// Named structural invariant of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Invariant {
    /// Predecessor and successor lists mirror each other.
    EdgeSymmetry,
    /// No block lists the same successor twice.
    DuplicateSuccessor,
    /// Every block but the exit ends in exactly one terminator, placed last.
    Terminator,
    /// The terminator's successor count and kind match the block's successors.
    SuccessorCount,
    /// Terminators produce no value anyone reads.
    TerminatorUsers,
    /// The entry block has no predecessors and owns every parameter.
    StartBlock,
    /// The exit block is empty, has no successors and exists when something returns.
    ExitBlock,
    /// Each instruction sits in exactly one block, which its back pointer names.
    BlockMembership,
    /// Phis and parameters precede every other instruction of their block.
    PinnedPrefix,
    /// Input and user edges are exact inverses.
    UseSymmetry,
    /// A phi has one input per predecessor.
    PhiInputs,
    /// A phi input's block dominates the matching predecessor.
    PhiDominance,
    /// Every non-phi input dominates its user.
    Dominance,
    /// Snapshots record one virtual register per input.
    SnapshotLayout,
    /// Paired accesses have an accepted type and the right inputs.
    PairAccess,
    /// Pair parts read a paired load and follow it directly.
    PairPart,
}

/// One violated invariant, located as precisely as possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The invariant that does not hold.
    pub invariant: Invariant,
    /// Block the violation was found in.
    pub block: Option<BlockId>,
    /// Offending instruction.
    pub inst: Option<InstId>,
    /// Human-readable description.
    pub message: String,
}

impl Diagnostic {
    /// Creates a diagnostic without location.
    pub fn new(invariant: Invariant, message: impl Into<String>) -> Self {
        Self {
            invariant,
            block: None,
            inst: None,
            message: message.into(),
        }
    }

    /// Adds the block.
    #[must_use]
    pub fn with_block(mut self, block: BlockId) -> Self {
        self.block = Some(block);
        self
    }

    /// Adds the instruction.
    #[must_use]
    pub fn with_inst(mut self, inst: InstId) -> Self {
        self.inst = Some(inst);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.invariant, self.message)?;

        if let Some(block) = self.block {
            write!(f, " (block: {block})")?;
        }

        if let Some(inst) = self.inst {
            write!(f, " (inst: {inst})")?;
        }

        Ok(())
    }
}
