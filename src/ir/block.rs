//! Basic blocks.

use bitflags::bitflags;

use crate::ir::{BlockId, InstId};

bitflags! {
    /// Per-block properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// Member of at least one loop. Refreshed whenever loop analysis is materialized.
        const LOOP = 0x01;
        /// Inside a try region. Set by the front end.
        const TRY = 0x02;
        /// At least one incoming edge is critical. Maintained by edge mutations.
        const CRITICAL_IN = 0x04;
    }
}

/// An ordered sequence of instructions ending in a single terminator.
///
/// Predecessor and successor lists are ordered: phi inputs follow predecessor
/// order, and terminator semantics follow successor order.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) insts: Vec<InstId>,
    pub(crate) preds: Vec<BlockId>,
    pub(crate) succs: Vec<BlockId>,
    pub(crate) flags: BlockFlags,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            insts: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            flags: BlockFlags::empty(),
        }
    }

    /// Block id.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Instructions in program order.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// Predecessor blocks, in phi input order.
    #[must_use]
    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    /// Successor blocks, in terminator order.
    #[must_use]
    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    /// Block flags.
    #[must_use]
    pub const fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Returns `true` if the block is inside a try region.
    #[must_use]
    pub const fn is_try(&self) -> bool {
        self.flags.contains(BlockFlags::TRY)
    }

    /// Returns `true` if the block belongs to a loop.
    #[must_use]
    pub const fn is_in_loop(&self) -> bool {
        self.flags.contains(BlockFlags::LOOP)
    }

    /// Last instruction, normally the terminator.
    #[must_use]
    pub fn last(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    /// Returns `true` if the block holds no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Position of `inst` in the block.
    #[must_use]
    pub fn position(&self, inst: InstId) -> Option<usize> {
        self.insts.iter().position(|&i| i == inst)
    }

    /// Index of `pred` in the predecessor list.
    #[must_use]
    pub fn pred_index(&self, pred: BlockId) -> Option<usize> {
        self.preds.iter().position(|&p| p == pred)
    }
}
