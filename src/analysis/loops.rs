//! Loop analysis.
//!
//! Natural loops are found from back edges (an edge `latch -> header` where
//! the header dominates the latch); all back edges to one header form one
//! loop. Cyclic regions that have no dominating header are reported as
//! **irreducible** loops: strongly connected components entered through more
//! than one block.
//!
//! # Loop Structure
//!
//! ```text
//!     [preheader]     <- single outside predecessor of the header, if any
//!          |
//!          v
//!     [header] <------+
//!          |          |
//!     [body ...]      |
//!          |          |
//!     [latch] --------+
//!          |
//!          v
//!     [exit ...]      <- outside blocks with a predecessor in the loop
//! ```
//!
//! Irreducible regions are found by recursive SCC decomposition: a cyclic SCC
//! with a single entry is a reducible region, so its entry is removed and the
//! rest is decomposed again; a cyclic SCC with several entries is recorded as
//! irreducible and not decomposed further.

use rustc_hash::FxHashMap;

use crate::{
    analysis::{
        dominators::DominatorTree,
        scc::{is_cyclic, strongly_connected_components},
        traversal::reverse_postorder,
    },
    ir::{BlockId, Graph},
    utils::BitSet,
};

/// An edge leaving a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopExit {
    /// Block inside the loop that branches out.
    pub exiting_block: BlockId,
    /// Block outside the loop that is branched to.
    pub exit_block: BlockId,
}

/// One natural loop or irreducible region.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The header block. For an irreducible region, its first entry in
    /// reverse postorder.
    pub header: BlockId,
    /// All blocks of the loop, header included.
    pub body: BitSet,
    /// Back edge sources. Empty for irreducible regions.
    pub latches: Vec<BlockId>,
    /// Blocks entered from outside the region. Only the header for natural loops.
    pub entries: Vec<BlockId>,
    /// Single predecessor of the header outside the loop, if there is exactly one.
    pub preheader: Option<BlockId>,
    /// Exit edges.
    pub exits: Vec<LoopExit>,
    /// Nesting depth, 0 for outermost loops.
    pub depth: usize,
    /// Index of the enclosing loop in [`LoopInfo::loops`].
    pub parent: Option<usize>,
    /// Indices of directly nested loops.
    pub children: Vec<usize>,
    /// Whether this is an irreducible region.
    pub irreducible: bool,
}

impl Loop {
    fn new(header: BlockId, capacity: usize) -> Self {
        let mut body = BitSet::new(capacity);
        body.insert(header.index());
        Loop {
            header,
            body,
            latches: Vec::new(),
            entries: vec![header],
            preheader: None,
            exits: Vec::new(),
            depth: 0,
            parent: None,
            children: Vec::new(),
            irreducible: false,
        }
    }

    /// Returns true if this loop contains the given block.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(block.index())
    }

    /// Number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.count()
    }

    /// Blocks of the loop in id order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.body.iter().map(BlockId::new)
    }

    /// Returns true if the loop has a single latch.
    #[must_use]
    pub fn has_single_latch(&self) -> bool {
        self.latches.len() == 1
    }

    /// Returns true if this is an innermost loop.
    #[must_use]
    pub fn is_innermost(&self) -> bool {
        self.children.is_empty()
    }

    /// Predecessors of the header that lie outside the loop.
    #[must_use]
    pub fn outside_preds(&self, graph: &Graph) -> Vec<BlockId> {
        graph
            .preds(self.header)
            .iter()
            .copied()
            .filter(|&p| !self.contains(p))
            .collect()
    }
}

/// The loop forest of a graph.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    /// All loops, natural loops first (by header id), then irreducible regions.
    loops: Vec<Loop>,
    /// Innermost loop per block index.
    block_to_loop: Vec<Option<usize>>,
    /// Blocks belonging to any irreducible region.
    irreducible: BitSet,
}

impl LoopInfo {
    /// Detects the loops of `graph`.
    #[must_use]
    pub fn compute(graph: &Graph, dom: &DominatorTree) -> Self {
        let capacity = graph.block_capacity();
        let mut by_header: FxHashMap<BlockId, Loop> = FxHashMap::default();

        for block in graph.blocks() {
            let node = block.id();
            if !dom.is_reachable(node) {
                continue;
            }
            for &succ in block.succs() {
                if dom.dominates(succ, node) {
                    let lp = by_header
                        .entry(succ)
                        .or_insert_with(|| Loop::new(succ, capacity));
                    lp.latches.push(node);
                    expand_loop_body(graph, lp, node);
                }
            }
        }

        let mut loops: Vec<Loop> = by_header.into_values().collect();
        loops.sort_by_key(|l| l.header);
        loops.extend(find_irreducible(graph, dom));

        for lp in &mut loops {
            compute_preheader(graph, lp);
            compute_exits(graph, lp);
        }
        compute_nesting(&mut loops);

        let mut irreducible = BitSet::new(capacity);
        for lp in loops.iter().filter(|l| l.irreducible) {
            irreducible.union_with(&lp.body);
        }

        let mut order: Vec<usize> = (0..loops.len()).collect();
        order.sort_by_key(|&i| (loops[i].depth, std::cmp::Reverse(loops[i].size())));
        let mut block_to_loop = vec![None; capacity];
        for i in order {
            for block in loops[i].body.iter() {
                block_to_loop[block] = Some(i);
            }
        }

        LoopInfo {
            loops,
            block_to_loop,
            irreducible,
        }
    }

    /// All loops.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns true if there are no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Innermost loop containing `block`.
    #[must_use]
    pub fn innermost_loop(&self, block: BlockId) -> Option<&Loop> {
        self.block_to_loop
            .get(block.index())
            .copied()
            .flatten()
            .map(|i| &self.loops[i])
    }

    /// Enclosing loop of `lp`.
    #[must_use]
    pub fn parent(&self, lp: &Loop) -> Option<&Loop> {
        lp.parent.map(|i| &self.loops[i])
    }

    /// Natural loop with the given header.
    #[must_use]
    pub fn loop_for_header(&self, header: BlockId) -> Option<&Loop> {
        self.loops
            .iter()
            .find(|l| !l.irreducible && l.header == header)
    }

    /// Number of loops containing `block` (0 outside any loop).
    #[must_use]
    pub fn loop_depth(&self, block: BlockId) -> usize {
        self.innermost_loop(block).map_or(0, |l| l.depth + 1)
    }

    /// Returns true if `block` is in any loop.
    #[must_use]
    pub fn is_in_loop(&self, block: BlockId) -> bool {
        self.innermost_loop(block).is_some()
    }

    /// Returns true if `block` belongs to an irreducible region.
    #[must_use]
    pub fn is_in_irreducible_loop(&self, block: BlockId) -> bool {
        self.irreducible.contains(block.index())
    }

    /// Returns true if the graph has at least one irreducible region.
    #[must_use]
    pub fn has_irreducible(&self) -> bool {
        !self.irreducible.is_empty()
    }

    /// Outermost loop that contains `inner` but not `outer`.
    ///
    /// This is the loop an instruction at `outer` would enter by moving to `inner`.
    #[must_use]
    pub fn outermost_entered(&self, inner: BlockId, outer: BlockId) -> Option<&Loop> {
        let mut current = self.innermost_loop(inner)?;
        if current.contains(outer) {
            return None;
        }
        while let Some(parent) = self.parent(current) {
            if parent.contains(outer) {
                break;
            }
            current = parent;
        }
        Some(current)
    }

    /// Every block that belongs to some loop.
    pub fn loop_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.block_to_loop
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_some())
            .map(|(i, _)| BlockId::new(i))
    }
}

/// Adds every block that reaches `latch` without passing the header.
fn expand_loop_body(graph: &Graph, lp: &mut Loop, latch: BlockId) {
    let mut worklist = vec![latch];
    while let Some(block) = worklist.pop() {
        if lp.body.insert(block.index()) {
            for &pred in graph.preds(block) {
                if !lp.body.contains(pred.index()) {
                    worklist.push(pred);
                }
            }
        }
    }
}

fn compute_preheader(graph: &Graph, lp: &mut Loop) {
    let outside = lp.outside_preds(graph);
    lp.preheader = match (lp.irreducible, outside.as_slice()) {
        (false, [single]) => Some(*single),
        _ => None,
    };
}

fn compute_exits(graph: &Graph, lp: &mut Loop) {
    lp.exits.clear();
    for block in lp.body.iter().map(BlockId::new) {
        for &succ in graph.succs(block) {
            if !lp.contains(succ) {
                lp.exits.push(LoopExit {
                    exiting_block: block,
                    exit_block: succ,
                });
            }
        }
    }
}

/// Parent is the smallest other loop containing the header; depth follows
/// the parent chain.
fn compute_nesting(loops: &mut [Loop]) {
    let n = loops.len();
    for i in 0..n {
        let header = loops[i].header;
        let size = loops[i].size();
        loops[i].parent = (0..n)
            .filter(|&j| j != i && loops[j].contains(header) && loops[j].size() > size)
            .min_by_key(|&j| loops[j].size());
    }
    for i in 0..n {
        if let Some(p) = loops[i].parent {
            loops[p].children.push(i);
        }
    }
    for i in 0..n {
        let mut depth = 0;
        let mut current = loops[i].parent;
        while let Some(p) = current {
            depth += 1;
            current = loops[p].parent;
        }
        loops[i].depth = depth;
    }
}

/// Recursive SCC decomposition of the reachable blocks.
fn find_irreducible(graph: &Graph, dom: &DominatorTree) -> Vec<Loop> {
    let capacity = graph.block_capacity();
    let rpo_index: FxHashMap<BlockId, usize> = reverse_postorder(graph)
        .into_iter()
        .enumerate()
        .map(|(i, b)| (b, i))
        .collect();

    let reachable: BitSet = graph
        .blocks()
        .map(|b| b.id())
        .filter(|&b| dom.is_reachable(b))
        .map(BlockId::index)
        .collect();

    let mut found = Vec::new();
    let mut regions = vec![reachable];
    while let Some(region) = regions.pop() {
        for scc in strongly_connected_components(graph, &region) {
            if !is_cyclic(graph, &scc) {
                continue;
            }
            let members: BitSet = scc.iter().map(|b| b.index()).collect();
            let mut entries: Vec<BlockId> = scc
                .iter()
                .copied()
                .filter(|&b| {
                    b == graph.entry()
                        || graph
                            .preds(b)
                            .iter()
                            .any(|&p| dom.is_reachable(p) && !members.contains(p.index()))
                })
                .collect();
            entries.sort_by_key(|b| rpo_index.get(b).copied().unwrap_or(usize::MAX));

            match entries.as_slice() {
                [] => {}
                [header] => {
                    let mut rest = members.clone();
                    rest.remove(header.index());
                    regions.push(rest);
                }
                [header, ..] => {
                    let mut lp = Loop::new(*header, capacity);
                    lp.body = members;
                    lp.entries = entries.clone();
                    lp.irreducible = true;
                    found.push(lp);
                }
            }
        }
    }

    found.sort_by_key(|l| l.header);
    found
}
