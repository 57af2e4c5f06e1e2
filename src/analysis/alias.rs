//! Conservative memory disambiguation.
//!
//! Every heap access is described as a [`MemoryLocation`]: an array element
//! range relative to a base reference, or an object field. Two locations
//! alias unless one of these rules proves they cannot:
//!
//! - arrays and object fields never overlap
//! - two distinct allocations in the same method are different objects
//! - array byte ranges that are disjoint relative to a known index base
//! - fields the runtime reports as non-aliasing
//!
//! Anything that cannot be proven is [`AliasResult::MayAlias`]. Calls,
//! monitors and snapshots are not locations at all; callers treat them as
//! barriers.

use crate::ir::{Graph, InstId, Opcode};

/// Outcome of an alias query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AliasResult {
    /// The accesses never touch the same bytes.
    NoAlias,
    /// The accesses may overlap.
    MayAlias,
    /// The accesses cover exactly the same bytes.
    MustAlias,
}

impl AliasResult {
    /// Returns `true` unless the accesses are proven disjoint.
    #[must_use]
    pub const fn may(self) -> bool {
        !matches!(self, AliasResult::NoAlias)
    }
}

/// Index of an array access, split into a base and a constant element offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexExpr {
    /// Index known at compile time.
    Const(i64),
    /// `base + offset` for some index value `base`.
    Var {
        /// Instruction producing the variable part
        base: InstId,
        /// Constant element offset
        offset: i64,
    },
}

impl IndexExpr {
    /// Element distance `other - self`, when both share a base.
    #[must_use]
    pub fn distance_to(self, other: IndexExpr) -> Option<i64> {
        match (self, other) {
            (IndexExpr::Const(a), IndexExpr::Const(b)) => b.checked_sub(a),
            (
                IndexExpr::Var { base: a, offset: x },
                IndexExpr::Var { base: b, offset: y },
            ) if a == b => y.checked_sub(x),
            _ => None,
        }
    }
}

/// Region of the heap touched by one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// `count` consecutive elements of `elem_size` bytes starting at `index`.
    Array {
        /// Array reference
        array: InstId,
        /// First element
        index: IndexExpr,
        /// Number of elements touched (2 for pairs)
        count: u32,
        /// Element size in bytes
        elem_size: u32,
    },
    /// A field of an object.
    Field {
        /// Object reference
        object: InstId,
        /// Field identity
        field: crate::ir::FieldId,
        /// Byte offset of the field
        offset: u32,
        /// Access size in bytes
        size: u32,
    },
}

/// Decomposes an index value into base plus constant.
///
/// Recognizes constants and `x + c`, `c + x`, `x - c` with constant `c`.
#[must_use]
pub fn index_expr(graph: &Graph, index: InstId) -> IndexExpr {
    let constant = |id: InstId| match graph.get_inst(id).map(|i| i.opcode()) {
        Some(Opcode::Constant { value }) => Some(*value),
        _ => None,
    };

    if let Some(value) = constant(index) {
        return IndexExpr::Const(value);
    }
    let Some(inst) = graph.get_inst(index) else {
        return IndexExpr::Var {
            base: index,
            offset: 0,
        };
    };
    let var = |base: InstId, offset: Option<i64>| match offset {
        Some(offset) => IndexExpr::Var { base, offset },
        None => IndexExpr::Var {
            base: index,
            offset: 0,
        },
    };
    match (inst.opcode(), inst.inputs()) {
        (Opcode::Add, &[x, y]) => match (constant(x), constant(y)) {
            (None, c @ Some(_)) => var(x, c),
            (c @ Some(_), None) => var(y, c),
            _ => var(index, Some(0)),
        },
        (Opcode::Sub, &[x, y]) => var(x, constant(y).and_then(i64::checked_neg)),
        _ => var(index, Some(0)),
    }
}

/// Describes the heap location accessed by `inst`, if it is a plain or
/// paired load or store.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn location(graph: &Graph, inst: InstId) -> Option<MemoryLocation> {
    let i = graph.get_inst(inst)?;
    let runtime = graph.runtime();
    let size = runtime.element_size(i.ty(), graph.arch());
    let inputs = i.inputs();
    let array = |index: IndexExpr, count: u32| {
        inputs.first().map(|&array| MemoryLocation::Array {
            array,
            index,
            count,
            elem_size: size,
        })
    };

    match i.opcode() {
        Opcode::LoadArray { .. } | Opcode::StoreArray { .. } => {
            array(index_expr(graph, *inputs.get(1)?), 1)
        }
        Opcode::LoadArrayPair | Opcode::StoreArrayPair => {
            array(index_expr(graph, *inputs.get(1)?), 2)
        }
        Opcode::LoadArrayI { index, .. } | Opcode::StoreArrayI { index, .. } => {
            array(IndexExpr::Const(*index as i64), 1)
        }
        Opcode::LoadArrayPairI { index } | Opcode::StoreArrayPairI { index } => {
            array(IndexExpr::Const(*index as i64), 2)
        }
        Opcode::LoadObject { field, offset, .. } | Opcode::StoreObject { field, offset, .. } => {
            Some(MemoryLocation::Field {
                object: *inputs.first()?,
                field: *field,
                offset: *offset,
                size,
            })
        }
        _ => None,
    }
}

fn is_allocation(graph: &Graph, inst: InstId) -> bool {
    graph
        .get_inst(inst)
        .is_some_and(|i| i.opcode().is_allocation())
}

/// Returns `true` if two references are provably different objects.
fn distinct_objects(graph: &Graph, a: InstId, b: InstId) -> bool {
    a != b && is_allocation(graph, a) && is_allocation(graph, b)
}

/// Byte range `[start, end)` of `count` elements starting at `index`.
fn byte_range(index: i64, count: u32, elem_size: u32) -> Option<(i64, i64)> {
    let size = i64::from(elem_size);
    let start = index.checked_mul(size)?;
    let end = start.checked_add(i64::from(count).checked_mul(size)?)?;
    Some((start, end))
}

/// Byte ranges of two array accesses in a common frame, when computable.
///
/// Constant indices are placed absolutely. Variable indices with the same base
/// are placed relative to that base, which only works for equal element sizes.
fn array_ranges(
    (index_a, count_a, size_a): (IndexExpr, u32, u32),
    (index_b, count_b, size_b): (IndexExpr, u32, u32),
) -> Option<((i64, i64), (i64, i64))> {
    match (index_a, index_b) {
        (IndexExpr::Const(a), IndexExpr::Const(b)) => Some((
            byte_range(a, count_a, size_a)?,
            byte_range(b, count_b, size_b)?,
        )),
        (
            IndexExpr::Var { base: x, offset: a },
            IndexExpr::Var { base: y, offset: b },
        ) if x == y && size_a == size_b => Some((
            byte_range(a, count_a, size_a)?,
            byte_range(b, count_b, size_b)?,
        )),
        _ => None,
    }
}

/// Alias relation between two memory locations.
#[must_use]
pub fn alias_locations(graph: &Graph, a: &MemoryLocation, b: &MemoryLocation) -> AliasResult {
    match (*a, *b) {
        (
            MemoryLocation::Array {
                array: base_a,
                index: index_a,
                count: count_a,
                elem_size: size_a,
            },
            MemoryLocation::Array {
                array: base_b,
                index: index_b,
                count: count_b,
                elem_size: size_b,
            },
        ) => {
            if distinct_objects(graph, base_a, base_b) {
                return AliasResult::NoAlias;
            }
            let Some(((start_a, end_a), (start_b, end_b))) = array_ranges(
                (index_a, count_a, size_a),
                (index_b, count_b, size_b),
            ) else {
                return AliasResult::MayAlias;
            };
            if end_a <= start_b || end_b <= start_a {
                AliasResult::NoAlias
            } else if base_a == base_b && start_a == start_b && end_a == end_b {
                AliasResult::MustAlias
            } else {
                AliasResult::MayAlias
            }
        }
        (
            MemoryLocation::Field {
                object: obj_a,
                field: field_a,
                offset: off_a,
                size: size_a,
            },
            MemoryLocation::Field {
                object: obj_b,
                field: field_b,
                offset: off_b,
                size: size_b,
            },
        ) => {
            if distinct_objects(graph, obj_a, obj_b) {
                return AliasResult::NoAlias;
            }
            let overlap =
                off_a < off_b.saturating_add(size_b) && off_b < off_a.saturating_add(size_a);
            if !overlap || !graph.runtime().field_may_alias(field_a, field_b) {
                AliasResult::NoAlias
            } else if obj_a == obj_b && off_a == off_b && size_a == size_b {
                AliasResult::MustAlias
            } else {
                AliasResult::MayAlias
            }
        }
        _ => AliasResult::NoAlias,
    }
}

/// Alias relation between the accesses performed by two instructions.
///
/// Instructions that do not access a describable location are treated as
/// possibly aliasing anything if they have side effects on memory (calls,
/// monitors, volatile accesses are handled by callers as barriers), and as
/// not aliasing if they do not touch memory at all.
#[must_use]
pub fn may_alias(graph: &Graph, a: InstId, b: InstId) -> AliasResult {
    match (location(graph, a), location(graph, b)) {
        (Some(la), Some(lb)) => alias_locations(graph, &la, &lb),
        (None, _) | (_, None) => {
            let touches_memory = |id: InstId| {
                graph.get_inst(id).is_some_and(|i| {
                    matches!(
                        i.opcode(),
                        Opcode::Call { .. } | Opcode::MonitorEnter | Opcode::MonitorExit
                    ) || i.opcode().is_memory()
                })
            };
            if touches_memory(a) && touches_memory(b) {
                AliasResult::MayAlias
            } else {
                AliasResult::NoAlias
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Arch,
        ir::{DataType, GraphBuilder},
    };

    struct Fixture {
        graph: Graph,
        ids: Vec<InstId>,
    }

    /// ids: 0 arr, 1 other param array, 2 idx, 3 new array A, 4 new array B,
    /// 5 load arr[1], 6 load arr[2], 7 store arr[1], 8 load other[1],
    /// 9 load A[0], 10 store B[0], 11 idx+1, 12 load arr[idx], 13 load arr[idx+1],
    /// 14 load obj.f1, 15 load obj.f2, 16 pair load arr[2..4]
    fn fixture() -> Fixture {
        let mut ids = Vec::new();
        let graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let other = b.param(1, DataType::Reference);
                    let idx = b.param(2, DataType::I32);
                    let len = b.const_i32(4);
                    let a = b.new_array(len);
                    let bb = b.new_array(len);
                    let l1 = b.load_array_i(DataType::I32, arr, 1);
                    let l2 = b.load_array_i(DataType::I32, arr, 2);
                    let s1 = b.store_array_i(DataType::I32, arr, 1, l2);
                    let lo = b.load_array_i(DataType::I32, other, 1);
                    let la = b.load_array_i(DataType::I32, a, 0);
                    let sb = b.store_array_i(DataType::I32, bb, 0, la);
                    let one = b.const_i32(1);
                    let next = b.add(idx, one);
                    let lv = b.load_array(DataType::I32, arr, idx);
                    let lv1 = b.load_array(DataType::I32, arr, next);
                    let f1 = b.load_object(DataType::I32, other, 1, 12);
                    let f2 = b.load_object(DataType::I32, other, 2, 16);
                    let pair = b.inst(Opcode::LoadArrayPairI { index: 2 }, DataType::I32, &[arr]);
                    ids.extend([
                        arr, other, idx, a, bb, l1, l2, s1, lo, la, sb, next, lv, lv1, f1, f2, pair,
                    ]);
                    b.ret_void();
                });
            })
            .unwrap();
        Fixture { graph, ids }
    }

    #[test]
    fn test_index_expr() {
        let fx = fixture();
        assert_eq!(
            index_expr(&fx.graph, fx.ids[11]),
            IndexExpr::Var {
                base: fx.ids[2],
                offset: 1
            }
        );
        assert_eq!(
            index_expr(&fx.graph, fx.ids[2]),
            IndexExpr::Var {
                base: fx.ids[2],
                offset: 0
            }
        );
    }

    #[test]
    fn test_array_disambiguation() {
        let fx = fixture();
        let g = &fx.graph;
        let id = |n: usize| fx.ids[n];
        assert_eq!(may_alias(g, id(5), id(6)), AliasResult::NoAlias);
        assert_eq!(may_alias(g, id(5), id(7)), AliasResult::MustAlias);
        assert_eq!(may_alias(g, id(5), id(8)), AliasResult::MayAlias);
        assert_eq!(may_alias(g, id(6), id(8)), AliasResult::NoAlias);
        assert_eq!(may_alias(g, id(9), id(10)), AliasResult::NoAlias);
        assert_eq!(may_alias(g, id(12), id(13)), AliasResult::NoAlias);
        assert_eq!(may_alias(g, id(12), id(5)), AliasResult::MayAlias);
    }

    #[test]
    fn test_pair_location_covers_two_elements() {
        let fx = fixture();
        let g = &fx.graph;
        assert!(may_alias(g, fx.ids[16], fx.ids[6]).may());
        assert_eq!(may_alias(g, fx.ids[16], fx.ids[5]), AliasResult::NoAlias);
        assert_eq!(
            location(g, fx.ids[16]),
            Some(MemoryLocation::Array {
                array: fx.ids[0],
                index: IndexExpr::Const(2),
                count: 2,
                elem_size: 4,
            })
        );
    }

    #[test]
    fn test_fields_and_arrays() {
        let fx = fixture();
        let g = &fx.graph;
        assert_eq!(may_alias(g, fx.ids[14], fx.ids[15]), AliasResult::NoAlias);
        assert_eq!(may_alias(g, fx.ids[14], fx.ids[14]), AliasResult::MustAlias);
        assert_eq!(may_alias(g, fx.ids[14], fx.ids[5]), AliasResult::NoAlias);
        assert_eq!(may_alias(g, fx.ids[2], fx.ids[5]), AliasResult::NoAlias);
    }
}
