//! Instruction scheduling pass.
//!
//! Reorders the instructions of each block to shorten the estimated critical
//! path, without changing what the block computes.
//!
//! # Example
//!
//! Before:
//! ```text
//! v2 = Add v0, v1
//! v3 = Add v2, v1
//! v4 = Add v0, v0
//! v5 = Add v4, v0
//! ```
//!
//! After:
//! ```text
//! v2 = Add v0, v1
//! v4 = Add v0, v0    // Independent chains interleave
//! v3 = Add v2, v1
//! v5 = Add v4, v0
//! ```
//!
//! # Algorithm
//!
//! 1. Skip the block's pinned prefix (phis, parameters) and its terminator
//! 2. Split the rest into regions at barriers; barriers never move and
//!    nothing crosses them
//! 3. Group each paired load with the part extractions that follow it into
//!    one scheduling unit
//! 4. Add dependency edges for data uses, for memory accesses that may
//!    alias when one of them is a store, and between side-effecting
//!    non-memory instructions
//! 5. Compute the longest latency-weighted path to the end of the region
//!    as each unit's priority
//! 6. List-schedule cycle by cycle: among the units whose operands are
//!    ready, issue the highest priority one, ties going to the earlier one
//!    in the original order

use log::trace;
use rustc_hash::FxHashMap;

use crate::{
    analysis::may_alias,
    compiler::{
        events::{EventKind, EventLog},
        pass::{Pass, PassContext},
    },
    config::CompilerConfig,
    ir::{BlockId, Graph, InstId},
    Error, Result,
};

/// A group of instructions that is scheduled as a whole.
#[derive(Debug)]
struct Unit {
    insts: Vec<InstId>,
    latency: u32,
    memory: Vec<InstId>,
    has_store: bool,
    /// Side effects other than plain loads and stores
    other_effects: bool,
}

/// Dependency graph of one region.
struct DepGraph {
    units: Vec<Unit>,
    /// `(successor, weight)` per unit
    succs: Vec<Vec<(usize, u32)>>,
    pred_count: Vec<usize>,
}

impl DepGraph {
    fn build(graph: &Graph, region: &[InstId]) -> Self {
        let units = group_units(graph, region);
        let mut unit_of: FxHashMap<InstId, usize> = FxHashMap::default();
        for (u, unit) in units.iter().enumerate() {
            for &inst in &unit.insts {
                unit_of.insert(inst, u);
            }
        }

        let n = units.len();
        let mut edges: FxHashMap<(usize, usize), u32> = FxHashMap::default();
        let mut add = |from: usize, to: usize, weight: u32| {
            let w = edges.entry((from, to)).or_insert(0);
            *w = (*w).max(weight);
        };

        // Data dependencies
        for (v, unit) in units.iter().enumerate() {
            for &inst in &unit.insts {
                let Some(i) = graph.get_inst(inst) else {
                    continue;
                };
                for input in i.inputs() {
                    if let Some(&u) = unit_of.get(input) {
                        if u != v {
                            add(u, v, units[u].latency);
                        }
                    }
                }
            }
        }

        // Memory and side-effect ordering, original order preserved
        for v in 0..n {
            for u in 0..v {
                let (a, b) = (&units[u], &units[v]);
                let conflict = (a.has_store || b.has_store)
                    && a.memory.iter().any(|&x| {
                        b.memory
                            .iter()
                            .any(|&y| may_alias(graph, x, y).may())
                    });
                let effects = (a.other_effects && (b.other_effects || b.has_store))
                    || (b.other_effects && a.has_store);
                if conflict || effects {
                    add(u, v, 1);
                }
            }
        }

        let mut succs = vec![Vec::new(); n];
        let mut pred_count = vec![0; n];
        let mut sorted: Vec<_> = edges.into_iter().collect();
        sorted.sort_unstable();
        for ((from, to), weight) in sorted {
            succs[from].push((to, weight));
            pred_count[to] += 1;
        }

        DepGraph {
            units,
            succs,
            pred_count,
        }
    }

    /// Longest latency-weighted path from each unit to the end of the region.
    ///
    /// Iterates to a fixed point so that malformed backward edges cannot
    /// make it read an unfinished value; on an acyclic graph a single sweep
    /// in reverse original order already suffices.
    fn priorities(&self) -> Vec<u32> {
        let n = self.units.len();
        let mut prio: Vec<u32> = self.units.iter().map(|u| u.latency).collect();
        for _ in 0..n {
            let mut changed = false;
            for u in (0..n).rev() {
                let best = self.succs[u]
                    .iter()
                    .map(|&(v, w)| w.saturating_add(prio[v]))
                    .max()
                    .unwrap_or(self.units[u].latency)
                    .max(self.units[u].latency);
                if best != prio[u] {
                    prio[u] = best;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        prio
    }

    /// Cycle-driven list scheduling. Returns unit indices in issue order.
    fn schedule(&self, block: BlockId) -> Result<Vec<usize>> {
        let n = self.units.len();
        let prio = self.priorities();
        let mut remaining = self.pred_count.clone();
        let mut earliest = vec![0u32; n];
        let mut ready: Vec<usize> = (0..n).filter(|&u| remaining[u] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut cycle = 0u32;

        while order.len() < n {
            if ready.is_empty() {
                return Err(Error::CyclicDependency {
                    block,
                    remaining: n - order.len(),
                });
            }

            let pick = ready
                .iter()
                .enumerate()
                .filter(|(_, &u)| earliest[u] <= cycle)
                .max_by(|(_, &a), (_, &b)| prio[a].cmp(&prio[b]).then(b.cmp(&a)))
                .map(|(slot, _)| slot);

            let Some(slot) = pick else {
                // Nothing ready this cycle: advance to the first that will be.
                cycle = ready.iter().map(|&u| earliest[u]).min().unwrap_or(cycle);
                continue;
            };

            let unit = ready.swap_remove(slot);
            order.push(unit);
            for &(succ, weight) in &self.succs[unit] {
                earliest[succ] = earliest[succ].max(cycle.saturating_add(weight));
                remaining[succ] -= 1;
                if remaining[succ] == 0 {
                    ready.push(succ);
                }
            }
            cycle = cycle.saturating_add(1);
        }

        Ok(order)
    }
}

/// Splits a region into scheduling units, gluing pair loads to their parts.
fn group_units(graph: &Graph, region: &[InstId]) -> Vec<Unit> {
    let mut units = Vec::with_capacity(region.len());
    let mut k = 0;
    while k < region.len() {
        let head = region[k];
        let mut insts = vec![head];
        k += 1;
        if graph.get_inst(head).is_some_and(|i| i.opcode().is_pair_load()) {
            while let Some(&next) = region.get(k) {
                let glued = graph
                    .get_inst(next)
                    .is_some_and(|i| i.opcode().is_pair_part() && i.input(0) == Some(head));
                if !glued {
                    break;
                }
                insts.push(next);
                k += 1;
            }
        }
        units.push(make_unit(graph, insts));
    }
    units
}

fn make_unit(graph: &Graph, insts: Vec<InstId>) -> Unit {
    let mut unit = Unit {
        insts,
        latency: 0,
        memory: Vec::new(),
        has_store: false,
        other_effects: false,
    };
    for &inst in &unit.insts {
        let Some(op) = graph.get_inst(inst).map(|i| i.opcode()) else {
            continue;
        };
        unit.latency = unit.latency.max(op.latency());
        if op.is_memory() {
            unit.memory.push(inst);
            unit.has_store |= op.is_store();
        } else if op.has_side_effects() {
            unit.other_effects = true;
        }
    }
    unit
}

/// Instruction scheduling pass.
///
/// Reorders instructions within barrier-delimited regions of each block to
/// interleave independent dependency chains.
pub struct SchedulerPass;

impl Default for SchedulerPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerPass {
    /// Creates a new scheduler pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Computes the new order of one block without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicDependency`] if a region's dependency graph
    /// cannot be linearized.
    pub fn schedule_order(graph: &Graph, block: BlockId) -> Result<Vec<InstId>> {
        let insts = graph.block(block)?.insts().to_vec();
        let start = graph.prefix_len(block);
        let end = insts.len() - usize::from(graph.terminator(block).is_some());
        if start >= end {
            return Ok(insts);
        }

        let mut order = insts[..start].to_vec();
        let mut region = Vec::new();
        for &inst in &insts[start..end] {
            if graph.get_inst(inst).is_some_and(|i| i.opcode().is_barrier()) {
                Self::schedule_region(graph, block, &region, &mut order)?;
                region.clear();
                order.push(inst);
            } else {
                region.push(inst);
            }
        }
        Self::schedule_region(graph, block, &region, &mut order)?;
        order.extend_from_slice(&insts[end..]);
        Ok(order)
    }

    fn schedule_region(
        graph: &Graph,
        block: BlockId,
        region: &[InstId],
        out: &mut Vec<InstId>,
    ) -> Result<()> {
        if region.len() < 2 {
            out.extend_from_slice(region);
            return Ok(());
        }
        let deps = DepGraph::build(graph, region);
        for unit in deps.schedule(block)? {
            out.extend_from_slice(&deps.units[unit].insts);
        }
        Ok(())
    }

    /// Schedules every block. Returns the number of blocks whose order changed.
    fn run_scheduler(graph: &mut Graph, events: &EventLog) -> Result<usize> {
        let mut changed = 0;
        for block in graph.block_ids() {
            let order = Self::schedule_order(graph, block)?;
            if graph.reorder_block(block, &order)? {
                trace!("{}: rescheduled {}", graph.name(), block);
                events
                    .record(EventKind::BlockScheduled)
                    .block(block)
                    .message(format!("{} instructions", order.len()));
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl Pass for SchedulerPass {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn description(&self) -> &'static str {
        "Reorders instructions inside blocks to shorten the critical path"
    }

    fn should_run(&self, config: &CompilerConfig, _graph: &Graph) -> bool {
        config.enable_scheduler
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        Ok(Self::run_scheduler(graph, &ctx.events)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Arch,
        ir::{DataType, GraphBuilder, Opcode},
    };

    fn ids(graph: &Graph, block: BlockId) -> Vec<InstId> {
        graph.block(block).unwrap().insts().to_vec()
    }

    #[test]
    fn test_independent_chains_interleave() {
        let mut names = Vec::new();
        let mut graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let x = b.param(0, DataType::I32);
                    let y = b.param(1, DataType::I32);
                    let a1 = b.add(x, y);
                    let a2 = b.add(a1, y);
                    let b1 = b.add(y, x);
                    let b2 = b.add(b1, x);
                    let c = b.add(a2, b2);
                    names = vec![x, y, a1, b1, a2, b2, c];
                    b.ret(c);
                });
            })
            .unwrap();

        let events = EventLog::new();
        assert_eq!(SchedulerPass::run_scheduler(&mut graph, &events).unwrap(), 1);
        let order = ids(&graph, BlockId::new(0));
        assert_eq!(&order[..7], names.as_slice());
        assert_eq!(events.count(EventKind::BlockScheduled), 1);

        // Already optimal: a second run changes nothing.
        assert_eq!(SchedulerPass::run_scheduler(&mut graph, &events).unwrap(), 0);
    }

    #[test]
    fn test_barrier_splits_regions() {
        let mut expected = Vec::new();
        let graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let x = b.param(0, DataType::I32);
                    let a1 = b.add(x, x);
                    let a2 = b.add(a1, x);
                    let sp = b.safepoint(&[(0, a2)]);
                    let b1 = b.add(x, x);
                    let m = b.mul(x, x);
                    expected = vec![x, a1, a2, sp, m, b1];
                    let s = b.add(m, b1);
                    expected.push(s);
                    b.ret(s);
                });
            })
            .unwrap();

        let order = SchedulerPass::schedule_order(&graph, BlockId::new(0)).unwrap();
        // The multiply has the longer latency and moves up, but stays below
        // the safepoint.
        assert_eq!(&order[..7], expected.as_slice());
    }

    #[test]
    fn test_aliasing_store_keeps_order() {
        let mut load_store = (InstId::new(0), InstId::new(0));
        let graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let idx = b.param(1, DataType::I32);
                    let v = b.param(2, DataType::I32);
                    let st = b.store_array(DataType::I32, arr, idx, v);
                    let ld = b.load_array_i(DataType::I32, arr, 3);
                    load_store = (ld, st);
                    b.ret(ld);
                });
            })
            .unwrap();

        let order = SchedulerPass::schedule_order(&graph, BlockId::new(0)).unwrap();
        let pos = |i: InstId| order.iter().position(|&x| x == i).unwrap();
        assert!(pos(load_store.1) < pos(load_store.0));
    }

    #[test]
    fn test_pair_parts_stay_glued() {
        let graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let arr = b.param(0, DataType::Reference);
                    let x = b.param(1, DataType::I32);
                    let pair = b.inst(Opcode::LoadArrayPairI { index: 0 }, DataType::I32, &[arr]);
                    let lo = b.inst(Opcode::LoadPairPart { part: 0 }, DataType::I32, &[pair]);
                    let hi = b.inst(Opcode::LoadPairPart { part: 1 }, DataType::I32, &[pair]);
                    let m = b.mul(x, x);
                    let s = b.add(lo, hi);
                    let t = b.add(s, m);
                    b.ret(t);
                });
            })
            .unwrap();

        let order = SchedulerPass::schedule_order(&graph, BlockId::new(0)).unwrap();
        let opcodes: Vec<_> = order
            .iter()
            .map(|&i| graph.opcode(i).unwrap().name())
            .collect();
        let pair_pos = opcodes.iter().position(|&n| n == "LoadArrayPairI").unwrap();
        assert_eq!(opcodes[pair_pos + 1], "LoadPairPart");
        assert_eq!(opcodes[pair_pos + 2], "LoadPairPart");
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let x = b.param(0, DataType::I32);
                    let a = b.add(x, x);
                    let c = b.add(a, x);
                    b.ret(c);
                });
            })
            .unwrap();
        // Make the first add read the second one: a two-node cycle.
        let insts = ids(&graph, BlockId::new(0));
        let (a, c) = (insts[1], insts[2]);
        graph.set_input(a, 1, c).unwrap();

        assert!(matches!(
            SchedulerPass::schedule_order(&graph, BlockId::new(0)),
            Err(Error::CyclicDependency { remaining: 2, .. })
        ));
    }
}
