//! Block graph traversal orders and reachability sets.
//!
//! All traversals start at the graph's entry block and follow successor
//! edges; blocks unreachable from the entry never appear in the results.
//! Successors are visited in terminator order, so for a two-way branch the
//! taken target is explored before the fall-through target.

use crate::{
    ir::{BlockId, Graph},
    utils::BitSet,
};

/// Depth-first postorder of the blocks reachable from the entry.
///
/// Iterative, so deep straight-line graphs do not exhaust the call stack.
#[must_use]
pub fn postorder(graph: &Graph) -> Vec<BlockId> {
    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut visited = BitSet::new(graph.block_capacity());
    let mut result = Vec::with_capacity(graph.block_count());
    let mut stack = vec![(graph.entry(), State::Enter)];

    while let Some((block, state)) = stack.pop() {
        match state {
            State::Enter => {
                if !visited.insert(block.index()) {
                    continue;
                }
                stack.push((block, State::Exit));
                for &succ in graph.succs(block).iter().rev() {
                    if !visited.contains(succ.index()) {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(block),
        }
    }

    result
}

/// Reverse postorder of the blocks reachable from the entry.
///
/// Every block appears after all of its predecessors except along back edges,
/// which makes it the natural order for forward data flow problems.
#[must_use]
pub fn reverse_postorder(graph: &Graph) -> Vec<BlockId> {
    let mut order = postorder(graph);
    order.reverse();
    order
}

/// Blocks reachable from `start` along successor edges, `start` included.
#[must_use]
pub fn reachable_from(graph: &Graph, start: BlockId) -> BitSet {
    let mut seen = BitSet::new(graph.block_capacity());
    let mut work = vec![start];
    while let Some(block) = work.pop() {
        if graph.get_block(block).is_none() || !seen.insert(block.index()) {
            continue;
        }
        work.extend_from_slice(graph.succs(block));
    }
    seen
}

/// Blocks from which `target` is reachable, `target` included.
///
/// When `stop` is given, the backward walk does not continue through it,
/// although `stop` itself is included if it reaches `target`.
#[must_use]
pub fn reaching(graph: &Graph, target: BlockId, stop: Option<BlockId>) -> BitSet {
    let mut seen = BitSet::new(graph.block_capacity());
    let mut work = vec![target];
    while let Some(block) = work.pop() {
        if graph.get_block(block).is_none() || !seen.insert(block.index()) {
            continue;
        }
        if Some(block) != stop {
            work.extend_from_slice(graph.preds(block));
        }
    }
    seen
}
