//! Structural verification of graphs.
//!
//! The [`GraphChecker`] walks a whole [`Graph`] and reports every broken
//! invariant as a [`Diagnostic`] naming the [`Invariant`], the block and the
//! instruction involved. It never stops at the first problem and never
//! mutates the graph; deciding whether a failure is fatal is up to the
//! caller. The [`PassManager`](crate::compiler::PassManager) runs it after
//! every pass when [`VerifyMode::AfterEachPass`](crate::config::VerifyMode)
//! is configured and treats any diagnostic as fatal.
//!
//! # Checks
//!
//! - **Control flow**: mirrored edges, successor counts that match the
//!   terminator, a single terminator per block, entry and exit block shape
//! - **Data flow**: every instruction in exactly one block, exact input/user
//!   symmetry, phi arity, dominance of inputs over their users
//! - **Memory**: paired accesses and their part extractions are well formed
//!
//! # Example
//!
//! ```rust,ignore
//! use midend::checker::GraphChecker;
//!
//! let diagnostics = GraphChecker::new(&graph).run();
//! for diag in &diagnostics {
//!     eprintln!("{diag}");
//! }
//! assert!(diagnostics.is_empty());
//! ```

mod diagnostic;

pub use diagnostic::{Diagnostic, Invariant};

use log::error;

use crate::{
    analysis::DominatorTree,
    compiler::is_pairable_type,
    ir::{BasicBlock, BlockId, Graph, InstId, Instruction, Opcode},
    utils::BitSet,
};

/// Verifies the structural invariants of one graph.
pub struct GraphChecker<'a> {
    graph: &'a Graph,
}

impl<'a> GraphChecker<'a> {
    /// Creates a checker for `graph`.
    #[must_use]
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    /// Runs every check and returns all violations found.
    #[must_use]
    pub fn run(&self) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        self.check_start_block(&mut out);
        self.check_exit_block(&mut out);
        for block in self.graph.blocks() {
            self.check_control_flow(block, &mut out);
            self.check_prefix(block, &mut out);
        }
        self.check_membership(&mut out);
        self.check_use_edges(&mut out);

        let dom = DominatorTree::compute(self.graph);
        self.check_dominance(&dom, &mut out);
        for inst in self.graph.insts() {
            self.check_memory(inst, &mut out);
        }
        out
    }

    /// Runs every check, logs each violation at error level and returns
    /// `true` if the graph is valid.
    #[must_use]
    pub fn check(&self) -> bool {
        let diagnostics = self.run();
        for diagnostic in &diagnostics {
            error!("{}: {diagnostic}", self.graph.name());
        }
        diagnostics.is_empty()
    }

    fn check_start_block(&self, out: &mut Vec<Diagnostic>) {
        let entry = self.graph.entry();
        let Some(block) = self.graph.get_block(entry) else {
            out.push(
                Diagnostic::new(Invariant::StartBlock, "entry block does not exist")
                    .with_block(entry),
            );
            return;
        };
        if !block.preds().is_empty() {
            out.push(
                Diagnostic::new(
                    Invariant::StartBlock,
                    format!("entry block has {} predecessor(s)", block.preds().len()),
                )
                .with_block(entry),
            );
        }
        for block in self.graph.blocks().filter(|b| b.id() != entry) {
            for &id in block.insts() {
                if matches!(self.graph.opcode(id), Ok(Opcode::Parameter { .. })) {
                    out.push(
                        Diagnostic::new(Invariant::StartBlock, "parameter outside the entry block")
                            .with_block(block.id())
                            .with_inst(id),
                    );
                }
            }
        }
    }

    fn check_exit_block(&self, out: &mut Vec<Diagnostic>) {
        match self.graph.exit() {
            Some(exit) => {
                let Some(block) = self.graph.get_block(exit) else {
                    out.push(
                        Diagnostic::new(Invariant::ExitBlock, "exit block does not exist")
                            .with_block(exit),
                    );
                    return;
                };
                if !block.succs().is_empty() {
                    out.push(
                        Diagnostic::new(Invariant::ExitBlock, "exit block has successors")
                            .with_block(exit),
                    );
                }
                if !block.is_empty() {
                    out.push(
                        Diagnostic::new(Invariant::ExitBlock, "exit block holds instructions")
                            .with_block(exit),
                    );
                }
            }
            None => {
                for block in self.graph.blocks() {
                    if let Some(term) = self.graph.terminator(block.id()) {
                        if self.graph.opcode(term).is_ok_and(Opcode::is_exit_terminator) {
                            out.push(
                                Diagnostic::new(
                                    Invariant::ExitBlock,
                                    "block leaves the method but there is no exit block",
                                )
                                .with_block(block.id())
                                .with_inst(term),
                            );
                        }
                    }
                }
            }
        }
    }

    fn check_control_flow(&self, block: &BasicBlock, out: &mut Vec<Diagnostic>) {
        let id = block.id();
        for &succ in block.succs() {
            if !self.graph.preds(succ).contains(&id) {
                out.push(
                    Diagnostic::new(
                        Invariant::EdgeSymmetry,
                        format!("{id} is not a predecessor of its successor {succ}"),
                    )
                    .with_block(id),
                );
            }
        }
        for &pred in block.preds() {
            if !self.graph.succs(pred).contains(&id) {
                out.push(
                    Diagnostic::new(
                        Invariant::EdgeSymmetry,
                        format!("{id} is not a successor of its predecessor {pred}"),
                    )
                    .with_block(id),
                );
            }
        }
        for (k, succ) in block.succs().iter().enumerate() {
            if block.succs()[..k].contains(succ) {
                out.push(
                    Diagnostic::new(Invariant::DuplicateSuccessor, format!("{succ} listed twice"))
                        .with_block(id),
                );
            }
        }

        if Some(id) == self.graph.exit() {
            return;
        }
        let Some(term) = self.graph.terminator(id) else {
            out.push(
                Diagnostic::new(Invariant::Terminator, "block does not end in a terminator")
                    .with_block(id),
            );
            return;
        };
        for &inst in &block.insts()[..block.insts().len() - 1] {
            if self.graph.opcode(inst).is_ok_and(Opcode::is_terminator) {
                out.push(
                    Diagnostic::new(Invariant::Terminator, "terminator before the end of the block")
                        .with_block(id)
                        .with_inst(inst),
                );
            }
        }

        let Ok(term_inst) = self.graph.inst(term) else {
            return;
        };
        let op = term_inst.opcode();
        if term_inst.has_users() {
            out.push(
                Diagnostic::new(
                    Invariant::TerminatorUsers,
                    format!("{} has {} user(s)", op.name(), term_inst.users().len()),
                )
                .with_block(id)
                .with_inst(term),
            );
        }
        if op.successor_count() != Some(block.succs().len()) {
            out.push(
                Diagnostic::new(
                    Invariant::SuccessorCount,
                    format!("{} with {} successor(s)", op.name(), block.succs().len()),
                )
                .with_block(id)
                .with_inst(term),
            );
        }
        let to_exit = block.succs().iter().any(|&s| Some(s) == self.graph.exit());
        if op.is_exit_terminator() != to_exit {
            let message = if to_exit {
                format!("{} branches to the exit block", op.name())
            } else {
                format!("{} does not lead to the exit block", op.name())
            };
            out.push(
                Diagnostic::new(Invariant::SuccessorCount, message)
                    .with_block(id)
                    .with_inst(term),
            );
        }
    }

    fn check_prefix(&self, block: &BasicBlock, out: &mut Vec<Diagnostic>) {
        let mut in_prefix = true;
        for &inst in block.insts() {
            let pinned = self.graph.opcode(inst).is_ok_and(Opcode::is_pinned_prefix);
            if pinned && !in_prefix {
                out.push(
                    Diagnostic::new(
                        Invariant::PinnedPrefix,
                        "phi or parameter after a regular instruction",
                    )
                    .with_block(block.id())
                    .with_inst(inst),
                );
            }
            in_prefix &= pinned;
        }
    }

    fn check_membership(&self, out: &mut Vec<Diagnostic>) {
        let mut seen = BitSet::new(self.graph.inst_capacity());
        for block in self.graph.blocks() {
            for &id in block.insts() {
                let Some(inst) = self.graph.get_inst(id) else {
                    out.push(
                        Diagnostic::new(
                            Invariant::BlockMembership,
                            "block lists a removed instruction",
                        )
                        .with_block(block.id())
                        .with_inst(id),
                    );
                    continue;
                };
                if !seen.insert(id.index()) {
                    out.push(
                        Diagnostic::new(
                            Invariant::BlockMembership,
                            "instruction listed more than once",
                        )
                        .with_block(block.id())
                        .with_inst(id),
                    );
                }
                if inst.block() != Some(block.id()) {
                    out.push(
                        Diagnostic::new(
                            Invariant::BlockMembership,
                            format!("back pointer names {:?}", inst.block()),
                        )
                        .with_block(block.id())
                        .with_inst(id),
                    );
                }
            }
        }
        for inst in self.graph.insts() {
            if !seen.contains(inst.id().index()) {
                let mut diag =
                    Diagnostic::new(Invariant::BlockMembership, "instruction is not in any block")
                        .with_inst(inst.id());
                if let Some(block) = inst.block() {
                    diag = diag.with_block(block);
                }
                out.push(diag);
            }
        }
    }

    fn check_use_edges(&self, out: &mut Vec<Diagnostic>) {
        for inst in self.graph.insts() {
            let id = inst.id();
            for (k, &input) in inst.inputs().iter().enumerate() {
                let Some(producer) = self.graph.get_inst(input) else {
                    out.push(
                        Diagnostic::new(
                            Invariant::UseSymmetry,
                            format!("input {k} reads removed {input}"),
                        )
                        .with_inst(id),
                    );
                    continue;
                };
                let matches = producer
                    .users()
                    .iter()
                    .filter(|u| u.inst == id && u.index as usize == k)
                    .count();
                if matches != 1 {
                    out.push(
                        Diagnostic::new(
                            Invariant::UseSymmetry,
                            format!("{input} records input {k} of {id} {matches} time(s)"),
                        )
                        .with_inst(id),
                    );
                }
            }
            for user in inst.users() {
                let reads_back = self
                    .graph
                    .get_inst(user.inst)
                    .and_then(|u| u.input(user.index as usize))
                    == Some(id);
                if !reads_back {
                    out.push(
                        Diagnostic::new(
                            Invariant::UseSymmetry,
                            format!(
                                "user {} does not read {id} at input {}",
                                user.inst, user.index
                            ),
                        )
                        .with_inst(id),
                    );
                }
            }
        }
    }

    fn check_dominance(&self, dom: &DominatorTree, out: &mut Vec<Diagnostic>) {
        for block in self.graph.blocks().filter(|b| dom.is_reachable(b.id())) {
            for &id in block.insts() {
                let Some(inst) = self.graph.get_inst(id) else {
                    continue;
                };
                if inst.opcode().is_phi() {
                    self.check_phi(block, inst, dom, out);
                    continue;
                }
                for &input in inst.inputs() {
                    if !dom.inst_dominates(self.graph, input, id) {
                        out.push(
                            Diagnostic::new(
                                Invariant::Dominance,
                                format!("input {input} does not dominate its user"),
                            )
                            .with_block(block.id())
                            .with_inst(id),
                        );
                    }
                }
                if let Some(vregs) = inst.opcode().vregs() {
                    if vregs.len() != inst.inputs().len() {
                        out.push(
                            Diagnostic::new(
                                Invariant::SnapshotLayout,
                                format!(
                                    "{} vreg(s) for {} input(s)",
                                    vregs.len(),
                                    inst.inputs().len()
                                ),
                            )
                            .with_block(block.id())
                            .with_inst(id),
                        );
                    }
                }
            }
        }
    }

    fn check_phi(
        &self,
        block: &BasicBlock,
        phi: &Instruction,
        dom: &DominatorTree,
        out: &mut Vec<Diagnostic>,
    ) {
        if phi.inputs().len() != block.preds().len() {
            out.push(
                Diagnostic::new(
                    Invariant::PhiInputs,
                    format!(
                        "{} input(s) for {} predecessor(s)",
                        phi.inputs().len(),
                        block.preds().len()
                    ),
                )
                .with_block(block.id())
                .with_inst(phi.id()),
            );
            return;
        }
        for (&input, &pred) in phi.inputs().iter().zip(block.preds()) {
            if !dom.is_reachable(pred) {
                continue;
            }
            let input_block = self.graph.get_inst(input).and_then(Instruction::block);
            if !input_block.is_some_and(|b| dom.dominates(b, pred)) {
                out.push(
                    Diagnostic::new(
                        Invariant::PhiDominance,
                        format!("input {input} does not dominate predecessor {pred}"),
                    )
                    .with_block(block.id())
                    .with_inst(phi.id()),
                );
            }
        }
    }

    fn check_memory(&self, inst: &Instruction, out: &mut Vec<Diagnostic>) {
        let op = inst.opcode();
        let located = |diag: Diagnostic| match inst.block() {
            Some(block) => diag.with_block(block).with_inst(inst.id()),
            None => diag.with_inst(inst.id()),
        };

        if op.is_pair_access() {
            let graph = self.graph;
            if !is_pairable_type(inst.ty(), graph.arch(), graph.runtime(), true) {
                out.push(located(Diagnostic::new(
                    Invariant::PairAccess,
                    format!("{} of unpaired type {}", op.name(), inst.ty()),
                )));
            }
            let arity = match op {
                Opcode::LoadArrayPairI { .. } => 1,
                Opcode::LoadArrayPair => 2,
                Opcode::StoreArrayPairI { .. } => 3,
                _ => 4,
            };
            if inst.inputs().len() != arity {
                out.push(located(Diagnostic::new(
                    Invariant::PairAccess,
                    format!(
                        "{} with {} input(s), expected {arity}",
                        op.name(),
                        inst.inputs().len()
                    ),
                )));
            }
        }

        if let Opcode::LoadPairPart { part } = op {
            self.check_pair_part(inst, *part, &located, out);
        }
    }

    fn check_pair_part(
        &self,
        inst: &Instruction,
        part: u8,
        located: &dyn Fn(Diagnostic) -> Diagnostic,
        out: &mut Vec<Diagnostic>,
    ) {
        if part >= 2 {
            out.push(located(Diagnostic::new(
                Invariant::PairPart,
                format!("part {part} is out of bounds"),
            )));
        }
        let [pair] = inst.inputs() else {
            out.push(located(Diagnostic::new(
                Invariant::PairPart,
                format!("{} input(s), expected 1", inst.inputs().len()),
            )));
            return;
        };
        let Some(pair_inst) = self.graph.get_inst(*pair) else {
            return;
        };
        if !pair_inst.opcode().is_pair_load() {
            out.push(located(Diagnostic::new(
                Invariant::PairPart,
                format!("input {pair} is a {}, not a paired load", pair_inst.opcode().name()),
            )));
            return;
        }
        if pair_inst.ty() != inst.ty() {
            out.push(located(Diagnostic::new(
                Invariant::PairPart,
                format!("type {} differs from the pair's {}", inst.ty(), pair_inst.ty()),
            )));
        }
        if !self.follows_pair(inst.id(), *pair) {
            out.push(located(Diagnostic::new(
                Invariant::PairPart,
                format!("does not directly follow {pair}"),
            )));
        }
    }

    /// Returns `true` if only other part extractions sit between `pair` and `part`.
    fn follows_pair(&self, part: InstId, pair: InstId) -> bool {
        let (Some((part_block, part_pos)), Some((pair_block, pair_pos))) =
            (self.graph.position(part), self.graph.position(pair))
        else {
            return false;
        };
        if part_block != pair_block || pair_pos >= part_pos {
            return false;
        }
        let Some(block) = self.graph.get_block(part_block) else {
            return false;
        };
        block.insts()[pair_pos + 1..part_pos]
            .iter()
            .all(|&i| self.graph.opcode(i).is_ok_and(Opcode::is_pair_part))
    }
}

/// Checks `graph` and returns its diagnostics.
///
/// Shorthand for `GraphChecker::new(graph).run()`.
#[must_use]
pub fn check_graph(graph: &Graph) -> Vec<Diagnostic> {
    GraphChecker::new(graph).run()
}
