//! Memory coalescing pass.
//!
//! Fuses two accesses to adjacent array elements into one paired access on
//! targets that have paired load/store instructions.
//!
//! # Example
//!
//! Before:
//! ```text
//! v1: i32 = LoadArrayI[0] v0
//! v2: i32 = LoadArrayI[1] v0
//! v3: i32 = Add v1, v2
//! ```
//!
//! After:
//! ```text
//! v4: i32 = LoadArrayPairI[0] v0
//! v5: i32 = LoadPairPart[0] v4
//! v6: i32 = LoadPairPart[1] v4
//! v3: i32 = Add v5, v6
//! ```
//!
//! # Legality
//!
//! Two accesses form a candidate when they are both loads or both stores of
//! the same accepted element type on the same array, and their indices are
//! two immediates differing by one, or the same variable base plus constants
//! differing by one. The pair is inserted at the earlier access, so:
//!
//! - nothing between the two may write memory either of them reads or
//!   writes (for stores, nothing may read it either)
//! - no barrier may sit between them; loads may pass a snapshot, whose
//!   recorded values are rewired to the extracted parts, stores may not
//! - every input of the later access must already be available at the
//!   earlier one
//!
//! In strict alignment mode only immediate-index pairs whose first element
//! is aligned to the pair size are formed. Candidates are taken leftmost
//! first; an access joins at most one pair, pair windows never overlap, and
//! an address window that was already paired in the block is not paired again.

use log::trace;
use rustc_hash::FxHashSet;

use crate::{
    analysis::{index_expr, may_alias, IndexExpr},
    compiler::{
        events::{EventKind, EventLog},
        pass::{Pass, PassContext},
    },
    config::{Arch, CompilerConfig},
    ir::{BlockId, DataType, Graph, InstId, Instruction, Opcode},
    runtime::RuntimeInterface,
    Result,
};

/// Returns `true` if accesses of type `ty` may be paired on `arch`.
///
/// 32 and 64-bit integers and floats no wider than a pointer qualify;
/// references only when `allow_references` is set.
#[must_use]
pub fn is_pairable_type(
    ty: DataType,
    arch: Arch,
    runtime: &dyn RuntimeInterface,
    allow_references: bool,
) -> bool {
    if ty.is_reference() {
        return allow_references;
    }
    if !(ty.is_integer() || ty.is_float()) {
        return false;
    }
    let size = runtime.element_size(ty, arch);
    matches!(size, 4 | 8) && size <= arch.pointer_size()
}

/// How an access addresses its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Addressing {
    Immediate(u64),
    Indexed(IndexExpr),
}

impl Addressing {
    /// The index as an expression, so both forms of one window compare equal.
    fn window_start(self) -> Option<IndexExpr> {
        match self {
            Addressing::Immediate(index) => i64::try_from(index).ok().map(IndexExpr::Const),
            Addressing::Indexed(expr) => Some(expr),
        }
    }
}

/// A single load or store that could join a pair.
#[derive(Debug, Clone, Copy)]
struct Access {
    inst: InstId,
    pos: usize,
    is_load: bool,
    ty: DataType,
    array: InstId,
    addressing: Addressing,
}

impl Access {
    fn describe(graph: &Graph, inst: InstId, pos: usize) -> Option<Self> {
        let i = graph.get_inst(inst)?;
        let (is_load, addressing) = match i.opcode() {
            Opcode::LoadArrayI {
                index,
                volatile: false,
            } => (true, Addressing::Immediate(*index)),
            Opcode::StoreArrayI {
                index,
                volatile: false,
            } => (false, Addressing::Immediate(*index)),
            Opcode::LoadArray { volatile: false } => {
                (true, Addressing::Indexed(index_expr(graph, i.input(1)?)))
            }
            Opcode::StoreArray { volatile: false } => {
                (false, Addressing::Indexed(index_expr(graph, i.input(1)?)))
            }
            _ => return None,
        };
        Some(Access {
            inst,
            pos,
            is_load,
            ty: i.ty(),
            array: i.input(0)?,
            addressing,
        })
    }

    /// `other.index - self.index`, when statically known.
    fn distance_to(&self, other: &Access) -> Option<i64> {
        match (self.addressing, other.addressing) {
            (Addressing::Immediate(a), Addressing::Immediate(b)) => {
                i64::try_from(b).ok()?.checked_sub(i64::try_from(a).ok()?)
            }
            (Addressing::Indexed(a), Addressing::Indexed(b)) => a.distance_to(b),
            _ => None,
        }
    }
}

/// An accepted pair, `lo` addressing the lower element.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    first: Access,
    second: Access,
    lo: Access,
    hi: Access,
}

/// Memory coalescing pass.
///
/// Replaces pairs of adjacent array loads or stores with one paired access.
pub struct MemoryCoalescingPass;

impl Default for MemoryCoalescingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoalescingPass {
    /// Creates a new memory coalescing pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_aligned(graph: &Graph, lo: &Access, strict: bool) -> bool {
        match lo.addressing {
            Addressing::Immediate(index) => {
                if !strict {
                    return true;
                }
                let runtime = graph.runtime();
                let size = u64::from(runtime.element_size(lo.ty, graph.arch()));
                let offset = u64::from(runtime.array_data_offset(graph.arch()));
                index
                    .checked_mul(size)
                    .and_then(|bytes| bytes.checked_add(offset))
                    .is_some_and(|addr| size > 0 && addr % (2 * size) == 0)
            }
            // The runtime index value decides the alignment.
            Addressing::Indexed(_) => !strict,
        }
    }

    /// Returns `true` if nothing between the two accesses forbids fusing them.
    fn window_is_clear(graph: &Graph, block: &[InstId], first: &Access, second: &Access) -> bool {
        let Some(between) = block.get(first.pos + 1..second.pos) else {
            return false;
        };
        for &inst in between {
            let Some(op) = graph.get_inst(inst).map(|i| i.opcode()) else {
                return false;
            };
            if op.is_barrier() && !(first.is_load && op.is_snapshot()) {
                return false;
            }
            let conflicts = if first.is_load {
                op.is_store()
            } else {
                op.is_memory()
            };
            if conflicts
                && (may_alias(graph, inst, first.inst).may()
                    || may_alias(graph, inst, second.inst).may())
            {
                return false;
            }
        }

        // Every input of the later access must exist at the earlier one.
        graph
            .get_inst(second.inst)
            .is_some_and(|i| i.inputs().iter().all(|input| !between.contains(input)))
    }

    /// Finds the pairs of one block, leftmost first, without rewriting.
    fn find_candidates(graph: &Graph, block: BlockId, config: &CompilerConfig) -> Vec<Candidate> {
        let Some(insts) = graph.get_block(block).map(|b| b.insts().to_vec()) else {
            return Vec::new();
        };
        let strict = config.strict_pair_alignment() || graph.arch().requires_aligned_pairs();
        let runtime = graph.runtime();
        let accesses: Vec<Access> = insts
            .iter()
            .enumerate()
            .filter_map(|(pos, &inst)| Access::describe(graph, inst, pos))
            .filter(|a| is_pairable_type(a.ty, graph.arch(), runtime, config.coalesce_objects))
            .collect();

        let mut candidates: Vec<Candidate> = Vec::new();
        // Highest position covered by an accepted pair window.
        let mut covered_until: Option<usize> = None;
        // `(array, first element)` of every address window already paired.
        let mut windows: FxHashSet<(InstId, IndexExpr)> = FxHashSet::default();

        for (k, first) in accesses.iter().enumerate() {
            if covered_until.is_some_and(|end| first.pos <= end) {
                continue;
            }
            for second in &accesses[k + 1..] {
                if second.is_load != first.is_load
                    || second.array != first.array
                    || second.ty != first.ty
                    || std::mem::discriminant(&second.addressing)
                        != std::mem::discriminant(&first.addressing)
                {
                    continue;
                }
                let (lo, hi) = match first.distance_to(second) {
                    Some(1) => (*first, *second),
                    Some(-1) => (*second, *first),
                    _ => continue,
                };
                let Some(start) = lo.addressing.window_start() else {
                    continue;
                };
                if windows.contains(&(lo.array, start))
                    || !Self::is_aligned(graph, &lo, strict)
                    || !Self::window_is_clear(graph, &insts, first, second)
                {
                    continue;
                }
                windows.insert((lo.array, start));
                candidates.push(Candidate {
                    first: *first,
                    second: *second,
                    lo,
                    hi,
                });
                covered_until = Some(second.pos);
                break;
            }
        }
        candidates
    }

    fn rewrite(
        graph: &mut Graph,
        block: BlockId,
        pair: &Candidate,
        events: &EventLog,
    ) -> Result<()> {
        let lo_inst = graph.inst(pair.lo.inst)?;
        let lo_index_input = lo_inst.input(1);
        let hi_inst = graph.inst(pair.hi.inst)?;
        let (opcode, mut inputs) = match (pair.lo.addressing, lo_index_input) {
            (Addressing::Immediate(index), _) => (
                if pair.lo.is_load {
                    Opcode::LoadArrayPairI { index }
                } else {
                    Opcode::StoreArrayPairI { index }
                },
                vec![pair.lo.array],
            ),
            (Addressing::Indexed(_), Some(index)) => (
                if pair.lo.is_load {
                    Opcode::LoadArrayPair
                } else {
                    Opcode::StoreArrayPair
                },
                vec![pair.lo.array, index],
            ),
            (Addressing::Indexed(_), None) => {
                return Err(structural_error!("{} has no index input", pair.lo.inst))
            }
        };

        if !pair.lo.is_load {
            let value = |inst: &Instruction| {
                inst.inputs()
                    .last()
                    .copied()
                    .ok_or_else(|| structural_error!("store {} has no value input", inst.id()))
            };
            inputs.push(value(lo_inst)?);
            inputs.push(value(hi_inst)?);
        }

        let kind = if pair.lo.is_load {
            EventKind::LoadPairCreated
        } else {
            EventKind::StorePairCreated
        };
        let fused = graph.insert_before(pair.first.inst, opcode, pair.lo.ty, &inputs)?;

        if pair.lo.is_load {
            let part0 = graph.insert_after(
                fused,
                Opcode::LoadPairPart { part: 0 },
                pair.lo.ty,
                &[fused],
            )?;
            let part1 = graph.insert_after(
                part0,
                Opcode::LoadPairPart { part: 1 },
                pair.lo.ty,
                &[fused],
            )?;
            graph.replace_all_uses(pair.lo.inst, part0)?;
            graph.replace_all_uses(pair.hi.inst, part1)?;
        }
        graph.remove_inst(pair.first.inst)?;
        graph.remove_inst(pair.second.inst)?;

        trace!(
            "{}: fused {} and {} into {} in {}",
            graph.name(),
            pair.lo.inst,
            pair.hi.inst,
            fused,
            block
        );
        events
            .record(kind)
            .at(block, fused)
            .message(format!("{} + {}", pair.lo.inst, pair.hi.inst));
        Ok(())
    }

    /// Coalesces every block. Returns the number of pairs formed.
    fn run_coalescing(
        graph: &mut Graph,
        config: &CompilerConfig,
        events: &EventLog,
    ) -> Result<usize> {
        let mut formed = 0;
        for block in graph.block_ids() {
            let candidates = Self::find_candidates(graph, block, config);
            for pair in &candidates {
                Self::rewrite(graph, block, pair, events)?;
            }
            formed += candidates.len();
        }
        Ok(formed)
    }
}

impl Pass for MemoryCoalescingPass {
    fn name(&self) -> &'static str {
        "memory-coalescing"
    }

    fn description(&self) -> &'static str {
        "Fuses adjacent array loads and stores into paired accesses"
    }

    fn should_run(&self, config: &CompilerConfig, graph: &Graph) -> bool {
        config.enable_memory_coalescing && graph.runtime().supports_pair_access(graph.arch())
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        Ok(Self::run_coalescing(graph, ctx.config(), &ctx.events)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        compiler::{PassManager, PassOutcome},
        config::Arch,
        ir::GraphBuilder,
        runtime::DefaultRuntime,
    };

    fn relaxed() -> CompilerConfig {
        CompilerConfig::default().with_aligned_pairs_only(false)
    }

    fn opcodes(graph: &Graph) -> Vec<&'static str> {
        graph
            .block(graph.entry())
            .unwrap()
            .insts()
            .iter()
            .map(|&i| graph.opcode(i).unwrap().name())
            .collect()
    }

    #[test]
    fn test_pairable_types() {
        let rt = DefaultRuntime;
        assert!(is_pairable_type(DataType::I32, Arch::AArch64, &rt, false));
        assert!(is_pairable_type(DataType::F64, Arch::AArch64, &rt, false));
        assert!(!is_pairable_type(DataType::I64, Arch::Arm32, &rt, false));
        assert!(!is_pairable_type(DataType::I16, Arch::AArch64, &rt, false));
        assert!(!is_pairable_type(DataType::Reference, Arch::AArch64, &rt, false));
        assert!(is_pairable_type(DataType::Reference, Arch::AArch64, &rt, true));
    }

    #[test]
    fn test_adjacent_loads_fuse() {
        let mut ret_value = InstId::new(0);
        let mut graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let x = b.load_array_i(DataType::I32, arr, 1);
                    let y = b.load_array_i(DataType::I32, arr, 0);
                    let s = b.add(x, y);
                    ret_value = s;
                    b.ret(s);
                });
            })
            .unwrap();

        let events = EventLog::new();
        let formed = MemoryCoalescingPass::run_coalescing(&mut graph, &relaxed(), &events).unwrap();
        assert_eq!(formed, 1);
        assert_eq!(
            opcodes(&graph),
            ["Parameter", "LoadArrayPairI", "LoadPairPart", "LoadPairPart", "Add", "Return"]
        );
        // The pair starts at the lower index even though it was loaded second.
        let insts = graph.block(graph.entry()).unwrap().insts().to_vec();
        assert_eq!(
            graph.opcode(insts[1]).unwrap(),
            &Opcode::LoadArrayPairI { index: 0 }
        );
        // x (index 1) now reads part 1, y (index 0) part 0.
        let add = graph.inst(ret_value).unwrap();
        assert_eq!(add.inputs(), &[insts[3], insts[2]]);
        assert_eq!(events.count(EventKind::LoadPairCreated), 1);
    }

    #[test]
    fn test_strict_alignment_rejects_odd_start() {
        let build = || {
            GraphBuilder::new(Arch::AArch64)
                .build_with(|f| {
                    f.block(0, |b| {
                        let arr = b.param(0, DataType::Reference);
                        let x = b.load_array_i(DataType::I32, arr, 1);
                        let y = b.load_array_i(DataType::I32, arr, 2);
                        let s = b.add(x, y);
                        b.ret(s);
                    });
                })
                .unwrap()
        };
        let strict = CompilerConfig::default();
        let mut graph = build();
        let events = EventLog::new();
        // 16 + 4 is not a multiple of 8.
        assert_eq!(MemoryCoalescingPass::run_coalescing(&mut graph, &strict, &events).unwrap(), 0);

        let mut graph = build();
        assert_eq!(
            MemoryCoalescingPass::run_coalescing(&mut graph, &relaxed(), &events).unwrap(),
            1
        );
    }

    #[test]
    fn test_variable_index_pairs_need_relaxed_mode() {
        let build = || {
            GraphBuilder::new(Arch::AArch64)
                .build_with(|f| {
                    f.block(0, |b| {
                        let arr = b.param(0, DataType::Reference);
                        let i = b.param(1, DataType::I32);
                        let one = b.const_i32(1);
                        let next = b.add(i, one);
                        let v = b.const_i32(5);
                        b.store_array(DataType::I32, arr, i, v);
                        b.store_array(DataType::I32, arr, next, v);
                        b.ret_void();
                    });
                })
                .unwrap()
        };
        let events = EventLog::new();
        let mut graph = build();
        assert_eq!(
            MemoryCoalescingPass::run_coalescing(&mut graph, &CompilerConfig::default(), &events)
                .unwrap(),
            0
        );
        let mut graph = build();
        assert_eq!(
            MemoryCoalescingPass::run_coalescing(&mut graph, &relaxed(), &events).unwrap(),
            1
        );
        assert!(opcodes(&graph).contains(&"StoreArrayPair"));
        assert_eq!(events.count(EventKind::StorePairCreated), 1);
    }

    #[test]
    fn test_aliasing_store_blocks_load_pair() {
        let mut graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let other = b.param(1, DataType::Reference);
                    let x = b.load_array_i(DataType::I32, arr, 0);
                    let v = b.const_i32(7);
                    b.store_array_i(DataType::I32, other, 1, v);
                    let y = b.load_array_i(DataType::I32, arr, 1);
                    let s = b.add(x, y);
                    b.ret(s);
                });
            })
            .unwrap();
        let events = EventLog::new();
        assert_eq!(
            MemoryCoalescingPass::run_coalescing(&mut graph, &relaxed(), &events).unwrap(),
            0
        );
    }

    #[test]
    fn test_each_access_joins_one_pair() {
        let mut graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let x = b.load_array_i(DataType::I32, arr, 0);
                    let y = b.load_array_i(DataType::I32, arr, 1);
                    let z = b.load_array_i(DataType::I32, arr, 2);
                    let s = b.add(x, y);
                    let t = b.add(s, z);
                    b.ret(t);
                });
            })
            .unwrap();
        let events = EventLog::new();
        assert_eq!(
            MemoryCoalescingPass::run_coalescing(&mut graph, &relaxed(), &events).unwrap(),
            1
        );
        assert_eq!(
            opcodes(&graph),
            [
                "Parameter",
                "LoadArrayPairI",
                "LoadPairPart",
                "LoadPairPart",
                "LoadArrayI",
                "Add",
                "Add",
                "Return"
            ]
        );
    }

    #[test]
    fn test_snapshot_follows_parts() {
        let mut graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let x = b.load_array_i(DataType::I32, arr, 0);
                    b.save_state(&[(3, x)]);
                    let y = b.load_array_i(DataType::I32, arr, 1);
                    let s = b.add(x, y);
                    b.ret(s);
                });
            })
            .unwrap();
        let events = EventLog::new();
        assert_eq!(
            MemoryCoalescingPass::run_coalescing(&mut graph, &relaxed(), &events).unwrap(),
            1
        );
        let insts = graph.block(graph.entry()).unwrap().insts().to_vec();
        let snapshot = insts
            .iter()
            .find(|&&i| graph.opcode(i).unwrap().is_snapshot())
            .copied()
            .unwrap();
        let recorded = graph.inst(snapshot).unwrap().input(0).unwrap();
        assert_eq!(
            graph.opcode(recorded).unwrap(),
            &Opcode::LoadPairPart { part: 0 }
        );
    }

    #[test]
    fn test_repeated_window_is_paired_once() {
        let mut graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let x0 = b.load_array_i(DataType::I32, arr, 0);
                    let x1 = b.load_array_i(DataType::I32, arr, 1);
                    let y0 = b.load_array_i(DataType::I32, arr, 0);
                    let y1 = b.load_array_i(DataType::I32, arr, 1);
                    let s = b.add(x0, x1);
                    let t = b.add(y0, y1);
                    let u = b.add(s, t);
                    b.ret(u);
                });
            })
            .unwrap();
        let mut pm = PassManager::new(Arc::new(CompilerConfig::debug()));
        let record = pm.run_pass(&mut graph, &MemoryCoalescingPass::new()).unwrap();

        assert_eq!(record.outcome, PassOutcome::Changed);
        let names = opcodes(&graph);
        assert_eq!(names.iter().filter(|&&n| n == "LoadArrayPairI").count(), 1);
        assert_eq!(names.iter().filter(|&&n| n == "LoadArrayI").count(), 2);
        assert_eq!(pm.events().count(EventKind::LoadPairCreated), 1);
    }

    fn reference_loads() -> Graph {
        GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let x = b.load_array_i(DataType::Reference, arr, 0);
                    let y = b.load_array_i(DataType::Reference, arr, 1);
                    let v = b.const_i32(0);
                    b.store_array_i(DataType::Reference, arr, 2, x);
                    b.store_array_i(DataType::Reference, arr, 3, y);
                    b.ret(v);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_reference_accesses_need_object_coalescing() {
        let mut pm = PassManager::new(Arc::new(CompilerConfig::debug()));
        let mut graph = reference_loads();
        let record = pm.run_pass(&mut graph, &MemoryCoalescingPass::new()).unwrap();
        assert_eq!(record.outcome, PassOutcome::Unchanged);
        let names = opcodes(&graph);
        assert_eq!(names.iter().filter(|&&n| n == "LoadArrayI").count(), 2);
        assert_eq!(names.iter().filter(|&&n| n == "StoreArrayI").count(), 2);

        let config = CompilerConfig::debug().with_memory_coalescing(true, true);
        let mut pm = PassManager::new(Arc::new(config));
        let mut graph = reference_loads();
        let record = pm.run_pass(&mut graph, &MemoryCoalescingPass::new()).unwrap();
        assert_eq!(record.outcome, PassOutcome::Changed);
        let names = opcodes(&graph);
        assert!(names.contains(&"LoadArrayPairI"));
        assert!(names.contains(&"StoreArrayPairI"));
        assert!(!names.contains(&"LoadArrayI"));
        assert!(!names.contains(&"StoreArrayI"));
        assert_eq!(pm.events().count(EventKind::LoadPairCreated), 1);
        assert_eq!(pm.events().count(EventKind::StorePairCreated), 1);
    }
}
