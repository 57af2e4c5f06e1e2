//! Value types and condition codes.

use strum::{Display, EnumIter, IntoStaticStr};

use crate::config::Arch;

/// Result type of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    /// The instruction produces no value.
    Void,
    /// Boolean.
    Bool,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Managed object reference.
    #[strum(serialize = "ref")]
    Reference,
    /// Raw native pointer.
    #[strum(serialize = "ptr")]
    Pointer,
}

impl DataType {
    /// Size in bytes for types whose size does not depend on the runtime.
    ///
    /// `Reference` returns `None`: managed references may be compressed, so
    /// their size comes from the [`RuntimeInterface`](crate::runtime::RuntimeInterface).
    #[must_use]
    pub const fn fixed_size(self, arch: Arch) -> Option<u32> {
        match self {
            DataType::Void => Some(0),
            DataType::Bool | DataType::I8 | DataType::U8 => Some(1),
            DataType::I16 | DataType::U16 => Some(2),
            DataType::I32 | DataType::U32 | DataType::F32 => Some(4),
            DataType::I64 | DataType::U64 | DataType::F64 => Some(8),
            DataType::Pointer => Some(arch.pointer_size()),
            DataType::Reference => None,
        }
    }

    /// Returns `true` for integer types (booleans excluded).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::I8
                | DataType::I16
                | DataType::I32
                | DataType::I64
                | DataType::U8
                | DataType::U16
                | DataType::U32
                | DataType::U64
        )
    }

    /// Returns `true` for floating point types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Returns `true` for managed references.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(self, DataType::Reference)
    }

    /// Returns `true` if the instruction produces a value.
    #[must_use]
    pub const fn has_value(self) -> bool {
        !matches!(self, DataType::Void)
    }
}

/// Comparison condition used by `Compare` and `If`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConditionCode {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    Lt,
    /// Signed less or equal.
    Le,
    /// Signed greater than.
    Gt,
    /// Signed greater or equal.
    Ge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(DataType::I32.fixed_size(Arch::AArch64), Some(4));
        assert_eq!(DataType::F64.fixed_size(Arch::AArch64), Some(8));
        assert_eq!(DataType::Pointer.fixed_size(Arch::Arm32), Some(4));
        assert_eq!(DataType::Reference.fixed_size(Arch::AArch64), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(DataType::I64.to_string(), "i64");
        assert_eq!(DataType::Reference.to_string(), "ref");
        assert_eq!(ConditionCode::Le.to_string(), "le");
    }
}
