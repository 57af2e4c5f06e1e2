//! Instructions and use/def edges.

use crate::ir::{BlockId, DataType, InstId, Opcode};

/// A user edge: `inst` reads this instruction as its input number `index`.
///
/// User edges are the exact inverse of input edges. The graph keeps both
/// sides in sync; nothing outside [`Graph`](crate::ir::Graph) can edit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct User {
    /// The consuming instruction.
    pub inst: InstId,
    /// Input position within the consumer.
    pub index: u32,
}

impl User {
    /// Creates a user edge.
    #[must_use]
    pub const fn new(inst: InstId, index: u32) -> Self {
        User { inst, index }
    }

    /// Input position as `usize`.
    #[must_use]
    pub const fn input_index(self) -> usize {
        self.index as usize
    }
}

/// A node of the IR.
///
/// Owned by exactly one block (or detached while being moved). Inputs are
/// ordered; users are unordered.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) id: InstId,
    pub(crate) opcode: Opcode,
    pub(crate) ty: DataType,
    pub(crate) inputs: Vec<InstId>,
    pub(crate) users: Vec<User>,
    pub(crate) block: Option<BlockId>,
}

impl Instruction {
    pub(crate) fn new(id: InstId, opcode: Opcode, ty: DataType) -> Self {
        Instruction {
            id,
            opcode,
            ty,
            inputs: Vec::new(),
            users: Vec::new(),
            block: None,
        }
    }

    /// Instruction id.
    #[must_use]
    pub const fn id(&self) -> InstId {
        self.id
    }

    /// Opcode and immediate payload.
    #[must_use]
    pub const fn opcode(&self) -> &Opcode {
        &self.opcode
    }

    /// Result type.
    #[must_use]
    pub const fn ty(&self) -> DataType {
        self.ty
    }

    /// Ordered input edges.
    #[must_use]
    pub fn inputs(&self) -> &[InstId] {
        &self.inputs
    }

    /// Input number `index`, if present.
    #[must_use]
    pub fn input(&self, index: usize) -> Option<InstId> {
        self.inputs.get(index).copied()
    }

    /// Unordered user edges.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Returns `true` if any instruction reads this one.
    #[must_use]
    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    /// Block currently owning the instruction.
    #[must_use]
    pub const fn block(&self) -> Option<BlockId> {
        self.block
    }
}
