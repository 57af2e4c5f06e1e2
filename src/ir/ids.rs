//! Stable identifiers for blocks and instructions.
//!
//! Blocks and instructions live in arenas owned by the [`Graph`](crate::ir::Graph)
//! and are referenced everywhere else by these newtype ids. Predecessor,
//! successor, input and user edges are plain ids, so loops in the control flow
//! graph are cycles of references and never cycles of ownership.
//!
//! Arena slots are never reused: once an entity is removed its id stays dead,
//! and looking it up yields [`Error::InvalidId`](crate::Error::InvalidId)
//! instead of silently resolving to an unrelated newer entity.

use std::fmt;

/// Identifier of a [`BasicBlock`](crate::ir::BasicBlock) within one graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Creates a block id from a raw arena index.
    ///
    /// Intended for tests and for indexing side tables; normal code obtains
    /// ids from [`Graph::create_block`](crate::ir::Graph::create_block).
    #[must_use]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(index: usize) -> Self {
        BlockId(index as u32)
    }

    /// Returns the raw arena index, usable to index per-block side tables.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Identifier of an [`Instruction`](crate::ir::Instruction) within one graph.
///
/// Ids are handed out in creation order, which the checker and the dumps use
/// as the instruction's printable number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstId(pub(crate) u32);

impl InstId {
    /// Creates an instruction id from a raw arena index.
    #[must_use]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(index: usize) -> Self {
        InstId(index as u32)
    }

    /// Returns the raw arena index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstId({})", self.0)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
