//! Code sinking pass.
//!
//! Moves an instruction down to the nearest block that dominates all of its
//! users, so paths that never need the value no longer compute it.
//!
//! # Example
//!
//! Before:
//! ```text
//! bb0:
//!   v2 = Mul v0, v1
//!   If v0, v1 -> bb1, bb2
//! bb1:
//!   Return v2
//! bb2:
//!   Return v0
//! ```
//!
//! After:
//! ```text
//! bb0:
//!   If v0, v1 -> bb1, bb2
//! bb1:
//!   v2 = Mul v0, v1    // Only computed where it is used
//!   Return v2
//! bb2:
//!   Return v0
//! ```
//!
//! # Algorithm
//!
//! Blocks are visited in postorder and their instructions back to front, so
//! the inputs of a sunk instruction are considered after it and can follow
//! it down. For each candidate:
//!
//! 1. The target is the nearest common dominator of its users' blocks; it
//!    must be strictly dominated by the current block
//! 2. If the target lies in a loop the instruction is not already in, the
//!    instruction goes on the loop's entry edge instead, splitting the edge
//!    when it is critical; irreducible loops are never entered
//! 3. Nothing between the old and the new position may be volatile or a
//!    monitor operation, and a load may not pass a barrier or a store that
//!    may alias it
//! 4. The instruction lands right after the target's phis and parameters
//!
//! Each instruction moves at most once per run; moved instructions carry a
//! pass-local marker.

use std::borrow::Cow;

use log::trace;

use crate::{
    analysis::{may_alias, postorder, reachable_from, reaching, DominatorTree, LoopInfo},
    compiler::{
        events::{EventKind, EventLog},
        pass::{Analyses, Pass, PassContext},
    },
    config::CompilerConfig,
    ir::{BlockId, Graph, InstId, Opcode},
    Result,
};

/// Where a sunk instruction goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// An existing block.
    Block(BlockId),
    /// A new block on the critical edge `from -> to`.
    Edge { from: BlockId, to: BlockId },
}

/// Code sinking pass.
pub struct CodeSinkPass;

impl Default for CodeSinkPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSinkPass {
    /// Creates a new code sinking pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns `true` for opcodes that may change blocks at all.
    fn is_movable(op: &Opcode) -> bool {
        !(op.has_side_effects()
            || op.is_pinned_prefix()
            || op.is_pair_access()
            || op.is_pair_part()
            || matches!(op, Opcode::Constant { .. }))
    }

    /// Returns `true` if `other` may not be crossed by `inst`.
    fn blocks_motion(graph: &Graph, inst: InstId, is_load: bool, other: InstId) -> Result<bool> {
        let op = graph.opcode(other)?;
        if op.is_volatile() || op.is_monitor() {
            return Ok(true);
        }
        if is_load && (op.is_barrier() || (op.is_store() && may_alias(graph, inst, other).may())) {
            return Ok(true);
        }
        Ok(false)
    }

    /// Checks everything `inst` would pass on its way from `source` to the
    /// start of `dest`. With `include_dest`, the whole of `dest` is crossed
    /// too (sinking onto an edge leaving it).
    fn path_is_clear(
        graph: &Graph,
        inst: InstId,
        source: BlockId,
        dest: BlockId,
        include_dest: bool,
    ) -> Result<bool> {
        let is_load = graph.opcode(inst)?.is_load();

        let tail = graph.block(source)?.insts();
        let start = tail.iter().position(|&i| i == inst).map_or(tail.len(), |p| p + 1);
        for &other in &tail[start..] {
            if Self::blocks_motion(graph, inst, is_load, other)? {
                return Ok(false);
            }
        }

        let forward = reachable_from(graph, source);
        let backward = reaching(graph, dest, Some(source));
        for index in forward.iter().filter(|&b| backward.contains(b)) {
            let block = BlockId::new(index);
            if block == source || (block == dest && !include_dest) {
                continue;
            }
            for &other in graph.block(block)?.insts() {
                if Self::blocks_motion(graph, inst, is_load, other)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Finds a legal placement for `inst`, or `None` to leave it alone.
    fn placement(
        graph: &Graph,
        dom: &DominatorTree,
        loops: &LoopInfo,
        inst: InstId,
    ) -> Result<Option<Placement>> {
        let instruction = graph.inst(inst)?;
        let Some(source) = instruction.block() else {
            return Ok(None);
        };
        if !Self::is_movable(instruction.opcode()) || !instruction.has_users() {
            return Ok(None);
        }

        let mut user_blocks = Vec::with_capacity(instruction.users().len());
        for user in instruction.users() {
            let user = graph.inst(user.inst)?;
            // Phi operands would need edge placement.
            if user.opcode().is_phi() {
                return Ok(None);
            }
            match user.block() {
                Some(block) => user_blocks.push(block),
                None => return Ok(None),
            }
        }
        let Some(target) = dom.common_dominator_of(user_blocks) else {
            return Ok(None);
        };
        if !dom.strictly_dominates(source, target) {
            return Ok(None);
        }

        let placement = match loops.outermost_entered(target, source) {
            None => Placement::Block(target),
            Some(lp) if lp.irreducible => return Ok(None),
            Some(lp) => {
                let outside = lp.outside_preds(graph);
                let &[entry] = outside.as_slice() else {
                    return Ok(None);
                };
                if !dom.dominates(source, entry) {
                    return Ok(None);
                }
                if graph.is_critical_edge(entry, lp.header) {
                    Placement::Edge {
                        from: entry,
                        to: lp.header,
                    }
                } else if entry != source {
                    Placement::Block(entry)
                } else {
                    return Ok(None);
                }
            }
        };

        let source_try = graph.block(source)?.is_try();
        let (target_try, clear) = match placement {
            Placement::Block(block) => (
                graph.block(block)?.is_try(),
                Self::path_is_clear(graph, inst, source, block, false)?,
            ),
            Placement::Edge { from, to } => (
                graph.block(from)?.is_try() && graph.block(to)?.is_try(),
                Self::path_is_clear(graph, inst, source, from, true)?,
            ),
        };
        if source_try != target_try || !clear {
            return Ok(None);
        }
        Ok(Some(placement))
    }

    /// Sinks every instruction it can. Returns the number of instructions moved.
    ///
    /// `dom` and `loops` must describe `graph` on entry; they are recomputed
    /// locally whenever an edge split changes the block graph.
    fn run_sink(
        graph: &mut Graph,
        dom: &DominatorTree,
        loops: &LoopInfo,
        events: &EventLog,
    ) -> Result<usize> {
        let mut dom = Cow::Borrowed(dom);
        let mut loops = Cow::Borrowed(loops);
        let moved = graph.new_marker()?;
        let mut sunk = 0;

        for block in postorder(graph) {
            let insts = graph.block(block)?.insts().to_vec();
            for &inst in insts.iter().rev() {
                if graph.is_marked(moved, inst) {
                    continue;
                }
                let Some(placement) = Self::placement(graph, &dom, &loops, inst)? else {
                    continue;
                };

                let target = match placement {
                    Placement::Block(target) => target,
                    Placement::Edge { from, to } => {
                        let middle = graph.split_critical_edge(from, to)?;
                        trace!("{}: split {from} -> {to} into {middle}", graph.name());
                        events
                            .record(EventKind::EdgeSplit)
                            .block(middle)
                            .message(format!("{from} -> {to}"));

                        let fresh = DominatorTree::compute(graph);
                        loops = Cow::Owned(LoopInfo::compute(graph, &fresh));
                        dom = Cow::Owned(fresh);
                        graph.set_loop_blocks(loops.loop_blocks());
                        middle
                    }
                };

                let pos = graph.prefix_len(target);
                graph.move_inst(inst, target, pos)?;
                graph.mark(moved, inst)?;
                trace!("{}: sank {inst} from {block} to {target}", graph.name());
                events
                    .record(EventKind::InstructionSunk)
                    .at(target, inst)
                    .message(format!("from {block}"));
                sunk += 1;
            }
        }
        Ok(sunk)
    }
}

impl Pass for CodeSinkPass {
    fn name(&self) -> &'static str {
        "code-sink"
    }

    fn description(&self) -> &'static str {
        "Moves instructions into the narrowest block dominating their uses"
    }

    fn should_run(&self, config: &CompilerConfig, _graph: &Graph) -> bool {
        config.enable_code_sink
    }

    fn required_analyses(&self) -> Analyses {
        Analyses::DOMINATORS | Analyses::LOOPS
    }

    fn invalidated_analyses(&self) -> Analyses {
        Analyses::CONTROL_FLOW
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        let sunk = Self::run_sink(graph, ctx.dominators()?, ctx.loops()?, &ctx.events)?;
        Ok(sunk > 0)
    }
}
