//! Strongly connected components of the block graph (Tarjan).
//!
//! Loop analysis uses SCCs to find cyclic regions that natural-loop
//! detection cannot describe: a cyclic SCC entered through more than one
//! block is an irreducible loop.

use crate::{
    ir::{BlockId, Graph},
    utils::BitSet,
};

/// Computes the SCCs of the subgraph induced by the blocks in `members`.
///
/// SCCs are returned in reverse topological order: if an edge leads from SCC
/// `A` to SCC `B`, `A` appears after `B`. Within an SCC, blocks are listed in
/// the order they were popped off the Tarjan stack.
#[must_use]
pub fn strongly_connected_components(graph: &Graph, members: &BitSet) -> Vec<Vec<BlockId>> {
    let mut state = TarjanState::new(graph.block_capacity());
    for index in members.iter() {
        if state.index[index].is_none() {
            state.strongconnect(graph, members, BlockId::new(index));
        }
    }
    state.sccs
}

/// Returns `true` if the SCC contains a cycle: more than one block, or a
/// single block with an edge to itself.
#[must_use]
pub fn is_cyclic(graph: &Graph, scc: &[BlockId]) -> bool {
    match scc {
        [single] => graph.succs(*single).contains(single),
        _ => scc.len() > 1,
    }
}

/// Internal state for Tarjan's algorithm.
struct TarjanState {
    /// Discovery index for each block (None if not yet visited)
    index: Vec<Option<usize>>,
    /// Lowlink value for each block
    lowlink: Vec<usize>,
    /// Whether a block is currently on the stack
    on_stack: Vec<bool>,
    /// The component stack
    stack: Vec<BlockId>,
    /// Current index counter
    current_index: usize,
    /// Collected SCCs
    sccs: Vec<Vec<BlockId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn visit(&mut self, v: BlockId) {
        let v_idx = v.index();
        self.index[v_idx] = Some(self.current_index);
        self.lowlink[v_idx] = self.current_index;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[v_idx] = true;
    }

    /// Iterative strongconnect: each frame is a block and the position of
    /// the next successor to examine.
    fn strongconnect(&mut self, graph: &Graph, members: &BitSet, root: BlockId) {
        self.visit(root);
        let mut frames = vec![(root, 0usize)];

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if let Some(&w) = graph.succs(v).get(frame.1) {
                frame.1 += 1;
                if !members.contains(w.index()) {
                    continue;
                }
                match self.index[w.index()] {
                    None => {
                        self.visit(w);
                        frames.push((w, 0));
                    }
                    Some(w_index) if self.on_stack[w.index()] => {
                        self.lowlink[v.index()] = self.lowlink[v.index()].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                self.lowlink[parent.index()] =
                    self.lowlink[parent.index()].min(self.lowlink[v.index()]);
            }

            if Some(self.lowlink[v.index()]) == self.index[v.index()] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.index()] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(scc);
            }
        }
    }
}
