//! Dominator tree computation using the Lengauer-Tarjan algorithm.
//!
//! A block `d` **dominates** a block `n` if every path from the entry block to
//! `n` passes through `d`. The **immediate dominator** of `n` is the unique
//! strict dominator of `n` that does not strictly dominate any other strict
//! dominator of `n`. Linking every block to its immediate dominator forms a
//! tree rooted at the entry.
//!
//! # Algorithm
//!
//! Lengauer-Tarjan with path compression, O(E α(V)). Predecessor lists come
//! straight from the graph, so the semidominator phase does not rescan the
//! whole block set per node.
//!
//! Blocks unreachable from the entry are not part of the tree: they have no
//! immediate dominator, dominate nothing and are dominated by nothing except
//! themselves.

use crate::{
    ir::{BlockId, Graph, InstId},
    utils::BitSet,
};

const UNDEFINED: BlockId = BlockId(u32::MAX);

/// Dominator tree of a graph's reachable blocks.
///
/// # Examples
///
/// ```rust,ignore
/// use midend::analysis::DominatorTree;
///
/// let dom = DominatorTree::compute(&graph);
/// assert!(dom.dominates(graph.entry(), join));
/// assert_eq!(dom.immediate_dominator(join), Some(graph.entry()));
/// ```
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) block
    entry: BlockId,
    /// Immediate dominator per block index; the entry maps to itself and
    /// unreachable blocks to `UNDEFINED`
    idom: Vec<BlockId>,
    /// Depth in the tree per block index, entry at 0
    depth: Vec<u32>,
    /// Dominator tree children per block index, in block id order
    children: Vec<Vec<BlockId>>,
    /// Blocks reachable from the entry
    reachable: BitSet,
}

impl DominatorTree {
    /// Computes the dominator tree of `graph`.
    #[must_use]
    pub fn compute(graph: &Graph) -> Self {
        let n = graph.block_capacity();
        let entry = graph.entry();

        let mut lt = LengauerTarjan::new(n, entry);
        lt.compute(graph);

        let mut reachable = BitSet::new(n);
        for &block in &lt.vertex[..lt.dfs_counter] {
            reachable.insert(block.index());
        }

        let mut children = vec![Vec::new(); n];
        for (index, &idom) in lt.idom.iter().enumerate() {
            if idom != UNDEFINED && index != entry.index() {
                children[idom.index()].push(BlockId::new(index));
            }
        }

        // DFS preorder visits parents before children, so depths fill in one pass.
        let mut depth = vec![0u32; n];
        for &block in &lt.vertex[..lt.dfs_counter] {
            if block != entry {
                let parent = lt.idom[block.index()];
                depth[block.index()] = depth[parent.index()] + 1;
            }
        }

        DominatorTree {
            entry,
            idom: lt.idom,
            depth,
            children,
            reachable,
        }
    }

    /// Returns the entry (root) block.
    #[inline]
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    /// Returns `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.contains(block.index())
    }

    /// Returns the immediate dominator of a block, or `None` for the entry
    /// and for unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry || !self.is_reachable(block) {
            None
        } else {
            self.idom.get(block.index()).copied()
        }
    }

    /// Checks if block `a` dominates block `b`. A block dominates itself.
    ///
    /// O(depth(b) - depth(a)).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }

        let target = self.depth(a);
        let mut current = b;
        while self.depth(current) > target {
            current = self.idom[current.index()];
        }
        current == a
    }

    /// Checks if block `a` strictly dominates block `b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Nearest common dominator of two reachable blocks.
    #[must_use]
    pub fn common_dominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return None;
        }
        let (mut x, mut y) = (a, b);
        while self.depth(x) > self.depth(y) {
            x = self.idom[x.index()];
        }
        while self.depth(y) > self.depth(x) {
            y = self.idom[y.index()];
        }
        while x != y {
            x = self.idom[x.index()];
            y = self.idom[y.index()];
        }
        Some(x)
    }

    /// Nearest common dominator of a non-empty set of reachable blocks.
    #[must_use]
    pub fn common_dominator_of(
        &self,
        blocks: impl IntoIterator<Item = BlockId>,
    ) -> Option<BlockId> {
        let mut iter = blocks.into_iter();
        let first = iter.next().filter(|&b| self.is_reachable(b))?;
        iter.try_fold(first, |acc, b| self.common_dominator(acc, b))
    }

    /// Returns an iterator over the dominators of a block, from the block
    /// itself up to and including the entry.
    #[must_use]
    pub fn dominators(&self, block: BlockId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: self.is_reachable(block).then_some(block),
        }
    }

    /// Depth of a block in the tree. The entry and unreachable blocks have depth 0.
    #[must_use]
    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth.get(block.index()).copied().unwrap_or(0)
    }

    /// Blocks whose immediate dominator is `block`.
    #[must_use]
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children
            .get(block.index())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Checks if the definition `def` dominates the instruction `user`.
    ///
    /// Within one block, program order decides; an instruction does not
    /// dominate itself.
    #[must_use]
    pub fn inst_dominates(&self, graph: &Graph, def: InstId, user: InstId) -> bool {
        let (Some((def_block, def_pos)), Some((user_block, user_pos))) =
            (graph.position(def), graph.position(user))
        else {
            return false;
        };
        if def_block == user_block {
            def_pos < user_pos
        } else {
            self.strictly_dominates(def_block, user_block)
        }
    }
}

/// Iterator over the dominators of a block, from the block up to the entry.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<BlockId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

/// Internal state for the Lengauer-Tarjan algorithm.
struct LengauerTarjan {
    /// Entry block
    entry: BlockId,
    /// DFS number for each block (0 = not visited)
    dfnum: Vec<usize>,
    /// Block with each DFS number, minus one (inverse of dfnum)
    vertex: Vec<BlockId>,
    /// Parent in the DFS tree
    parent: Vec<BlockId>,
    /// Semidominator
    semi: Vec<BlockId>,
    /// Immediate dominator (final result)
    idom: Vec<BlockId>,
    /// Ancestor in the forest for link-eval
    ancestor: Vec<BlockId>,
    /// Best block on the path to the ancestor (for path compression)
    best: Vec<BlockId>,
    /// Blocks whose semidominator is this block
    bucket: Vec<Vec<BlockId>>,
    /// Number of blocks numbered so far
    dfs_counter: usize,
}

impl LengauerTarjan {
    fn new(n: usize, entry: BlockId) -> Self {
        Self {
            entry,
            dfnum: vec![0; n],
            vertex: vec![UNDEFINED; n],
            parent: vec![UNDEFINED; n],
            semi: (0..n).map(BlockId::new).collect(),
            idom: vec![UNDEFINED; n],
            ancestor: vec![UNDEFINED; n],
            best: (0..n).map(BlockId::new).collect(),
            bucket: vec![Vec::new(); n],
            dfs_counter: 0,
        }
    }

    fn compute(&mut self, graph: &Graph) {
        if self.dfnum.is_empty() || graph.get_block(self.entry).is_none() {
            return;
        }

        self.dfs(graph);

        for i in (1..self.dfs_counter).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w.index()];

            // semi(w) = min over predecessors v of semi(eval(v))
            for &v in graph.preds(w) {
                if self.dfnum.get(v.index()).copied().unwrap_or(0) == 0 {
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u.index()].index()]
                    < self.dfnum[self.semi[w.index()].index()]
                {
                    self.semi[w.index()] = self.semi[u.index()];
                }
            }

            let semi_w = self.semi[w.index()];
            self.bucket[semi_w.index()].push(w);
            self.ancestor[w.index()] = parent_w;

            let bucket = std::mem::take(&mut self.bucket[parent_w.index()]);
            for v in bucket {
                let u = self.eval(v);
                self.idom[v.index()] = if self.semi[u.index()] == self.semi[v.index()] {
                    parent_w
                } else {
                    u
                };
            }
        }

        for i in 1..self.dfs_counter {
            let w = self.vertex[i];
            if self.idom[w.index()] != self.semi[w.index()] {
                self.idom[w.index()] = self.idom[self.idom[w.index()].index()];
            }
        }

        self.idom[self.entry.index()] = self.entry;
    }

    /// Iterative DFS assigning preorder numbers and DFS tree parents.
    fn dfs(&mut self, graph: &Graph) {
        let mut stack = vec![(self.entry, UNDEFINED)];

        while let Some((block, parent)) = stack.pop() {
            let idx = block.index();
            if self.dfnum[idx] != 0 {
                continue;
            }

            self.vertex[self.dfs_counter] = block;
            self.dfs_counter += 1;
            self.dfnum[idx] = self.dfs_counter;
            self.parent[idx] = parent;

            for &succ in graph.succs(block).iter().rev() {
                if self.dfnum[succ.index()] == 0 {
                    stack.push((succ, block));
                }
            }
        }
    }

    /// Returns the block with minimum semidominator on the forest path to the root.
    fn eval(&mut self, v: BlockId) -> BlockId {
        if self.ancestor[v.index()] == UNDEFINED {
            return v;
        }
        self.compress(v);
        self.best[v.index()]
    }

    /// Path compression, iterative to stay safe on long chains.
    fn compress(&mut self, v: BlockId) {
        let mut path = Vec::new();
        let mut current = v;
        while self.ancestor[self.ancestor[current.index()].index()] != UNDEFINED {
            path.push(current);
            current = self.ancestor[current.index()];
        }

        for &node in path.iter().rev() {
            let ancestor = self.ancestor[node.index()];
            let best_ancestor = self.best[ancestor.index()];
            let best_node = self.best[node.index()];
            if self.dfnum[self.semi[best_ancestor.index()].index()]
                < self.dfnum[self.semi[best_node.index()].index()]
            {
                self.best[node.index()] = best_ancestor;
            }
            self.ancestor[node.index()] = self.ancestor[ancestor.index()];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Arch,
        ir::{ConditionCode, DataType, GraphBuilder},
    };

    fn bb(n: usize) -> BlockId {
        BlockId::new(n)
    }

    /// Diamond bb0 -> {bb1, bb2} -> bb3, then a loop bb3 -> bb4 -> bb3, bb4 -> bb5.
    fn sample() -> Graph {
        GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let p = b.param(0, DataType::I32);
                    let z = b.const_i32(0);
                    b.branch(ConditionCode::Eq, p, z, 1, 2);
                });
                f.block(1, |b| b.jump(3));
                f.block(2, |b| b.jump(3));
                f.block(3, |b| b.jump(4));
                f.block(4, |b| {
                    let one = b.const_i32(1);
                    let two = b.const_i32(2);
                    b.branch(ConditionCode::Lt, one, two, 3, 5);
                });
                f.block(5, |b| b.ret_void());
            })
            .unwrap()
    }

    #[test]
    fn test_immediate_dominators() {
        let g = sample();
        let dom = DominatorTree::compute(&g);
        assert_eq!(dom.immediate_dominator(bb(0)), None);
        assert_eq!(dom.immediate_dominator(bb(1)), Some(bb(0)));
        assert_eq!(dom.immediate_dominator(bb(2)), Some(bb(0)));
        assert_eq!(dom.immediate_dominator(bb(3)), Some(bb(0)));
        assert_eq!(dom.immediate_dominator(bb(4)), Some(bb(3)));
        assert_eq!(dom.immediate_dominator(bb(5)), Some(bb(4)));
    }

    #[test]
    fn test_dominance_queries() {
        let g = sample();
        let dom = DominatorTree::compute(&g);
        assert!(dom.dominates(bb(0), bb(5)));
        assert!(dom.dominates(bb(3), bb(3)));
        assert!(!dom.strictly_dominates(bb(3), bb(3)));
        assert!(!dom.dominates(bb(1), bb(3)));
        assert!(dom.strictly_dominates(bb(3), bb(5)));
        assert_eq!(dom.depth(bb(5)), 3);
        assert_eq!(dom.children(bb(0)), &[bb(1), bb(2), bb(3)]);
        assert_eq!(
            dom.dominators(bb(5)).collect::<Vec<_>>(),
            vec![bb(5), bb(4), bb(3), bb(0)]
        );
    }

    #[test]
    fn test_common_dominator() {
        let g = sample();
        let dom = DominatorTree::compute(&g);
        assert_eq!(dom.common_dominator(bb(1), bb(2)), Some(bb(0)));
        assert_eq!(dom.common_dominator(bb(4), bb(5)), Some(bb(4)));
        assert_eq!(dom.common_dominator_of([bb(5), bb(4), bb(3)]), Some(bb(3)));
        assert_eq!(dom.common_dominator_of(std::iter::empty()), None);
    }

    #[test]
    fn test_unreachable_block() {
        let mut g = sample();
        let lone = g.create_block();
        let dom = DominatorTree::compute(&g);
        assert!(!dom.is_reachable(lone));
        assert_eq!(dom.immediate_dominator(lone), None);
        assert!(!dom.dominates(bb(0), lone));
        assert!(dom.dominates(lone, lone));
        assert_eq!(dom.common_dominator(lone, bb(0)), None);
    }

    #[test]
    fn test_inst_dominance() {
        let mut defs = Vec::new();
        let g = GraphBuilder::new(Arch::AArch64)
            .build_with(|f| {
                f.block(0, |b| {
                    let x = b.const_i32(1);
                    let y = b.neg(x);
                    defs.push(x);
                    defs.push(y);
                    b.jump(1);
                });
                f.block(1, |b| {
                    let z = b.neg(defs[1]);
                    defs.push(z);
                    b.ret(z);
                });
            })
            .unwrap();
        let dom = DominatorTree::compute(&g);
        assert!(dom.inst_dominates(&g, defs[0], defs[1]));
        assert!(!dom.inst_dominates(&g, defs[1], defs[0]));
        assert!(dom.inst_dominates(&g, defs[0], defs[2]));
        assert!(!dom.inst_dominates(&g, defs[2], defs[2]));
    }
}
