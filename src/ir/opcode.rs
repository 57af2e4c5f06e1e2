//! Instruction opcodes.
//!
//! [`Opcode`] is a closed enum: every per-opcode decision in the passes and the
//! checker is an exhaustive `match`, so adding an opcode forces every consumer
//! to decide how to treat it.
//!
//! # Operand Layout
//!
//! Inputs are stored on the instruction, not in the opcode. The positional
//! layout per opcode is:
//!
//! | Opcode | Inputs |
//! |--------|--------|
//! | `LoadArray` | `array, index` |
//! | `LoadArrayI` | `array` |
//! | `StoreArray` | `array, index, value` |
//! | `StoreArrayI` | `array, value` |
//! | `LoadObject` | `object` |
//! | `StoreObject` | `object, value` |
//! | `LoadArrayPair` | `array, index` |
//! | `LoadArrayPairI` | `array` |
//! | `LoadPairPart` | `pair` |
//! | `StoreArrayPair` | `array, index, value0, value1` |
//! | `StoreArrayPairI` | `array, value0, value1` |
//! | `NewArray` | `length` |
//! | `MonitorEnter`, `MonitorExit` | `object` |
//! | `SafePoint`, `SaveState` | live values, one per entry of `vregs` |
//! | `If` | `left, right` |
//! | `Return`, `Throw` | `value` |
//! | `Phi` | one value per predecessor, in predecessor order |

use strum::IntoStaticStr;

use crate::ir::types::ConditionCode;

/// Identifier of an object field, as understood by the runtime interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// Operation performed by an instruction, with its immediate payload.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum Opcode {
    // ========================================================================
    // Values
    // ========================================================================
    /// Incoming method argument. Only valid in the entry block.
    Parameter {
        /// Argument position
        index: u32,
    },
    /// Constant. Floats are stored as their IEEE bit pattern.
    Constant {
        /// Raw constant bits
        value: i64,
    },
    /// SSA merge, one input per predecessor.
    Phi,

    // ========================================================================
    // Arithmetic
    // ========================================================================
    /// `left + right`
    Add,
    /// `left - right`
    Sub,
    /// `left * right`
    Mul,
    /// `left / right`
    Div,
    /// `left & right`
    And,
    /// `left | right`
    Or,
    /// `left ^ right`
    Xor,
    /// `left << right`
    Shl,
    /// `left >> right`
    Shr,
    /// `-operand`
    Neg,
    /// Boolean comparison of two inputs.
    Compare {
        /// Comparison condition
        cc: ConditionCode,
    },
    /// Conversion of the input to the instruction's type.
    Cast,

    // ========================================================================
    // Memory
    // ========================================================================
    /// Array element load with a variable index.
    LoadArray {
        /// Volatile access
        volatile: bool,
    },
    /// Array element load with an immediate index.
    LoadArrayI {
        /// Element index
        index: u64,
        /// Volatile access
        volatile: bool,
    },
    /// Array element store with a variable index.
    StoreArray {
        /// Volatile access
        volatile: bool,
    },
    /// Array element store with an immediate index.
    StoreArrayI {
        /// Element index
        index: u64,
        /// Volatile access
        volatile: bool,
    },
    /// Object field load.
    LoadObject {
        /// Field being read
        field: FieldId,
        /// Byte offset of the field in the object
        offset: u32,
        /// Volatile access
        volatile: bool,
    },
    /// Object field store.
    StoreObject {
        /// Field being written
        field: FieldId,
        /// Byte offset of the field in the object
        offset: u32,
        /// Volatile access
        volatile: bool,
    },
    /// Load of elements `index` and `index + 1`.
    LoadArrayPair,
    /// Load of elements `index` and `index + 1`, immediate index.
    LoadArrayPairI {
        /// Index of the first element
        index: u64,
    },
    /// Extracts one element of a paired load.
    LoadPairPart {
        /// 0 for the lower element, 1 for the upper
        part: u8,
    },
    /// Store of elements `index` and `index + 1`.
    StoreArrayPair,
    /// Store of elements `index` and `index + 1`, immediate index.
    StoreArrayPairI {
        /// Index of the first element
        index: u64,
    },

    // ========================================================================
    // Runtime
    // ========================================================================
    /// Object allocation.
    NewObject {
        /// Class being instantiated
        class: u32,
    },
    /// Array allocation.
    NewArray,
    /// Call with unknown side effects.
    Call {
        /// Callee
        method: u32,
    },
    /// Acquires an object monitor.
    MonitorEnter,
    /// Releases an object monitor.
    MonitorExit,
    /// GC safepoint recording the live virtual registers.
    SafePoint {
        /// Virtual register number of each input
        vregs: Vec<u16>,
    },
    /// Deoptimization snapshot recording the live virtual registers.
    SaveState {
        /// Virtual register number of each input
        vregs: Vec<u16>,
    },

    // ========================================================================
    // Control flow
    // ========================================================================
    /// Unconditional jump to the single successor.
    Jump,
    /// Two-way branch: successor 0 when the condition holds, successor 1 otherwise.
    If {
        /// Condition applied to the two inputs
        cc: ConditionCode,
    },
    /// Return a value.
    Return,
    /// Return without a value.
    ReturnVoid,
    /// Throw the input exception object.
    Throw,
}

impl Opcode {
    /// Opcode mnemonic, used by dumps and diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Returns `true` if this opcode ends a basic block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::If { .. } | Opcode::Return | Opcode::ReturnVoid | Opcode::Throw
        )
    }

    /// Returns `true` for terminators that leave the method (edge to the exit block).
    #[must_use]
    pub const fn is_exit_terminator(&self) -> bool {
        matches!(self, Opcode::Return | Opcode::ReturnVoid | Opcode::Throw)
    }

    /// Number of successors a block ending in this terminator must have.
    #[must_use]
    pub const fn successor_count(&self) -> Option<usize> {
        match self {
            Opcode::Jump | Opcode::Return | Opcode::ReturnVoid | Opcode::Throw => Some(1),
            Opcode::If { .. } => Some(2),
            _ => None,
        }
    }

    /// Returns `true` for phis.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Opcode::Phi)
    }

    /// Returns `true` for opcodes that must stay at the head of their block (phis, parameters).
    #[must_use]
    pub const fn is_pinned_prefix(&self) -> bool {
        matches!(self, Opcode::Phi | Opcode::Parameter { .. })
    }

    /// Returns `true` for loads, including paired loads.
    #[must_use]
    pub const fn is_load(&self) -> bool {
        matches!(
            self,
            Opcode::LoadArray { .. }
                | Opcode::LoadArrayI { .. }
                | Opcode::LoadObject { .. }
                | Opcode::LoadArrayPair
                | Opcode::LoadArrayPairI { .. }
        )
    }

    /// Returns `true` for stores, including paired stores.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(
            self,
            Opcode::StoreArray { .. }
                | Opcode::StoreArrayI { .. }
                | Opcode::StoreObject { .. }
                | Opcode::StoreArrayPair
                | Opcode::StoreArrayPairI { .. }
        )
    }

    /// Returns `true` for loads and stores.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        self.is_load() || self.is_store()
    }

    /// Returns `true` for volatile memory accesses.
    #[must_use]
    pub const fn is_volatile(&self) -> bool {
        matches!(
            self,
            Opcode::LoadArray { volatile: true }
                | Opcode::LoadArrayI { volatile: true, .. }
                | Opcode::StoreArray { volatile: true }
                | Opcode::StoreArrayI { volatile: true, .. }
                | Opcode::LoadObject { volatile: true, .. }
                | Opcode::StoreObject { volatile: true, .. }
        )
    }

    /// Returns `true` for GC safepoints and deoptimization snapshots.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self, Opcode::SafePoint { .. } | Opcode::SaveState { .. })
    }

    /// Returns `true` for monitor operations.
    #[must_use]
    pub const fn is_monitor(&self) -> bool {
        matches!(self, Opcode::MonitorEnter | Opcode::MonitorExit)
    }

    /// Returns `true` for instructions that bound reordering on both sides.
    ///
    /// Barriers are volatile accesses, monitors, calls and snapshots.
    #[must_use]
    pub const fn is_barrier(&self) -> bool {
        self.is_volatile()
            || self.is_monitor()
            || self.is_snapshot()
            || matches!(self, Opcode::Call { .. })
    }

    /// Returns `true` for allocations.
    #[must_use]
    pub const fn is_allocation(&self) -> bool {
        matches!(self, Opcode::NewObject { .. } | Opcode::NewArray)
    }

    /// Returns `true` if the instruction does anything besides computing its value.
    #[must_use]
    pub const fn has_side_effects(&self) -> bool {
        self.is_store() || self.is_barrier() || self.is_allocation() || self.is_terminator()
    }

    /// Returns `true` for paired loads and stores.
    #[must_use]
    pub const fn is_pair_access(&self) -> bool {
        matches!(
            self,
            Opcode::LoadArrayPair
                | Opcode::LoadArrayPairI { .. }
                | Opcode::StoreArrayPair
                | Opcode::StoreArrayPairI { .. }
        )
    }

    /// Returns `true` for paired loads.
    #[must_use]
    pub const fn is_pair_load(&self) -> bool {
        matches!(self, Opcode::LoadArrayPair | Opcode::LoadArrayPairI { .. })
    }

    /// Returns `true` for pair part extraction.
    #[must_use]
    pub const fn is_pair_part(&self) -> bool {
        matches!(self, Opcode::LoadPairPart { .. })
    }

    /// Estimated result latency in cycles, used by the scheduler.
    #[must_use]
    pub const fn latency(&self) -> u32 {
        match self {
            Opcode::Parameter { .. }
            | Opcode::Constant { .. }
            | Opcode::Phi
            | Opcode::LoadPairPart { .. } => 0,
            Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Neg
            | Opcode::Compare { .. }
            | Opcode::Cast => 1,
            Opcode::Mul => 3,
            Opcode::Div => 10,
            Opcode::LoadArray { .. }
            | Opcode::LoadArrayI { .. }
            | Opcode::LoadObject { .. }
            | Opcode::LoadArrayPair
            | Opcode::LoadArrayPairI { .. } => 4,
            Opcode::StoreArray { .. }
            | Opcode::StoreArrayI { .. }
            | Opcode::StoreObject { .. }
            | Opcode::StoreArrayPair
            | Opcode::StoreArrayPairI { .. } => 1,
            Opcode::NewObject { .. } | Opcode::NewArray | Opcode::Call { .. } => 10,
            Opcode::MonitorEnter | Opcode::MonitorExit => 5,
            Opcode::SafePoint { .. }
            | Opcode::SaveState { .. }
            | Opcode::Jump
            | Opcode::If { .. }
            | Opcode::Return
            | Opcode::ReturnVoid
            | Opcode::Throw => 1,
        }
    }

    /// Virtual register map of a snapshot instruction.
    #[must_use]
    pub fn vregs(&self) -> Option<&[u16]> {
        match self {
            Opcode::SafePoint { vregs } | Opcode::SaveState { vregs } => Some(vregs),
            _ => None,
        }
    }
}
