//! Runtime interface consulted by the passes.
//!
//! The optimizer does not know the object layout of the managed runtime it
//! compiles for. Element sizes, array header size, field aliasing facts and
//! target capability queries come from a [`RuntimeInterface`] that the front
//! end attaches to every graph.

use crate::{
    config::Arch,
    ir::{DataType, FieldId},
};

/// Layout and alias facts provided by the managed runtime.
///
/// Every method has a default matching [`DefaultRuntime`], so test doubles
/// only override what they need.
pub trait RuntimeInterface: Send + Sync {
    /// Byte offset of element 0 from the start of an array object.
    fn array_data_offset(&self, arch: Arch) -> u32 {
        if arch.pointer_size() == 8 {
            16
        } else {
            8
        }
    }

    /// Size of a managed reference stored in the heap.
    fn reference_size(&self, _arch: Arch) -> u32 {
        4
    }

    /// Size in bytes of a value of type `ty` stored in the heap.
    fn element_size(&self, ty: DataType, arch: Arch) -> u32 {
        ty.fixed_size(arch)
            .unwrap_or_else(|| self.reference_size(arch))
    }

    /// Whether accesses to fields `a` and `b` of possibly the same object may overlap.
    fn field_may_alias(&self, a: FieldId, b: FieldId) -> bool {
        a == b
    }

    /// Whether the target supports paired load/store instructions.
    fn supports_pair_access(&self, arch: Arch) -> bool {
        arch.supports_pair_access()
    }

    /// Largest copy worth expanding inline.
    fn max_profitable_memcpy(&self, arch: Arch) -> u32 {
        arch.max_profitable_memcpy()
    }
}

/// Default runtime layout: 16-byte array header on 64-bit targets, 8 bytes on
/// 32-bit targets, 4-byte compressed references, fields alias only themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRuntime;

impl RuntimeInterface for DefaultRuntime {}
