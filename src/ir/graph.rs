//! The compilation unit: blocks, instructions and their edges.
//!
//! A [`Graph`] owns two arenas, one of [`BasicBlock`]s and one of
//! [`Instruction`]s, indexed by [`BlockId`] and [`InstId`]. Every other
//! structure (predecessor/successor lists, input/user edges, analyses) refers
//! to entities by id only.
//!
//! # Mutation Contract
//!
//! Every public mutation either completes and leaves the structural
//! invariants intact, or fails with [`Error::Structural`] before touching
//! anything:
//!
//! - input and user edges stay exact inverses of each other
//! - a terminator is always the last instruction of its block
//! - phi inputs follow predecessor order; removing an edge drops the matching
//!   phi inputs, splitting an edge keeps the predecessor slot
//! - an instruction that still has users cannot be removed
//!
//! Control flow mutations bump [`Graph::cfg_epoch`], which the pass manager's
//! analysis cache uses to detect stale dominator trees and loop forests.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    config::Arch,
    ir::{
        arena::{LocalArena, Marker},
        BasicBlock, BlockFlags, BlockId, DataType, InstId, Instruction, Opcode, User,
    },
    runtime::{DefaultRuntime, RuntimeInterface},
    Error, Result,
};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Mid-level IR of one method.
pub struct Graph {
    id: u64,
    name: String,
    arch: Arch,
    runtime: Arc<dyn RuntimeInterface>,
    insts: Vec<Option<Instruction>>,
    blocks: Vec<Option<BasicBlock>>,
    entry: BlockId,
    exit: Option<BlockId>,
    cfg_epoch: u64,
    local: LocalArena,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arch", &self.arch)
            .field("blocks", &self.block_count())
            .field("insts", &self.inst_count())
            .field("cfg_epoch", &self.cfg_epoch)
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Creates a graph holding only an empty entry block.
    #[must_use]
    pub fn new(name: impl Into<String>, arch: Arch, runtime: Arc<dyn RuntimeInterface>) -> Self {
        let entry = BlockId::new(0);
        Graph {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            arch,
            runtime,
            insts: Vec::new(),
            blocks: vec![Some(BasicBlock::new(entry))],
            entry,
            exit: None,
            cfg_epoch: 0,
            local: LocalArena::default(),
        }
    }

    /// Creates a graph using [`DefaultRuntime`].
    #[must_use]
    pub fn with_default_runtime(name: impl Into<String>, arch: Arch) -> Self {
        Self::new(name, arch, Arc::new(DefaultRuntime))
    }

    /// Process-unique graph identity.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Method name, used in logs and dumps.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target architecture.
    #[must_use]
    pub const fn arch(&self) -> Arch {
        self.arch
    }

    /// Runtime interface attached by the front end.
    #[must_use]
    pub fn runtime(&self) -> &dyn RuntimeInterface {
        self.runtime.as_ref()
    }

    /// Entry block. Has no predecessors.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    /// Exit block, absent when the method never returns or throws.
    #[must_use]
    pub const fn exit(&self) -> Option<BlockId> {
        self.exit
    }

    /// Counter bumped by every control flow mutation.
    #[must_use]
    pub const fn cfg_epoch(&self) -> u64 {
        self.cfg_epoch
    }

    /// Number of block slots ever allocated; bound for per-block side tables.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instruction slots ever allocated; bound for per-instruction side tables.
    #[must_use]
    pub fn inst_capacity(&self) -> usize {
        self.insts.len()
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.iter().flatten().count()
    }

    /// Number of live instructions.
    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.iter().flatten().count()
    }

    /// Looks up a live block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the block was removed or never existed.
    pub fn block(&self, id: BlockId) -> Result<&BasicBlock> {
        self.get_block(id)
            .ok_or_else(|| Error::InvalidId(format!("block {id} in graph {}", self.name)))
    }

    /// Looks up a live block.
    #[must_use]
    pub fn get_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    /// Looks up a live instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the instruction was removed or never existed.
    pub fn inst(&self, id: InstId) -> Result<&Instruction> {
        self.get_inst(id)
            .ok_or_else(|| Error::InvalidId(format!("instruction {id} in graph {}", self.name)))
    }

    /// Looks up a live instruction.
    #[must_use]
    pub fn get_inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index()).and_then(Option::as_ref)
    }

    /// Opcode of a live instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] for dead ids.
    pub fn opcode(&self, id: InstId) -> Result<&Opcode> {
        Ok(self.inst(id)?.opcode())
    }

    /// Iterates over live blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().flatten()
    }

    /// Ids of live blocks in id order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks().map(BasicBlock::id).collect()
    }

    /// Iterates over every live instruction, attached or not, in id order.
    pub fn insts(&self) -> impl Iterator<Item = &Instruction> {
        self.insts.iter().flatten()
    }

    /// Successors of a block; empty for dead ids.
    #[must_use]
    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        self.get_block(block).map(BasicBlock::succs).unwrap_or_default()
    }

    /// Predecessors of a block; empty for dead ids.
    #[must_use]
    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        self.get_block(block).map(BasicBlock::preds).unwrap_or_default()
    }

    /// The block's terminator, if its last instruction is one.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = self.get_block(block)?.last()?;
        self.get_inst(last)
            .filter(|i| i.opcode().is_terminator())
            .map(Instruction::id)
    }

    /// Number of leading phis and parameters in the block.
    #[must_use]
    pub fn prefix_len(&self, block: BlockId) -> usize {
        self.get_block(block).map_or(0, |b| {
            b.insts()
                .iter()
                .take_while(|&&i| {
                    self.get_inst(i)
                        .is_some_and(|inst| inst.opcode().is_pinned_prefix())
                })
                .count()
        })
    }

    /// Phis of a block, in order.
    #[must_use]
    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.get_block(block).map_or_else(Vec::new, |b| {
            b.insts()
                .iter()
                .copied()
                .filter(|&i| self.get_inst(i).is_some_and(|inst| inst.opcode().is_phi()))
                .collect()
        })
    }

    /// Returns `true` if `from -> to` is an edge whose source has several
    /// successors and whose target has several predecessors.
    #[must_use]
    pub fn is_critical_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.succs(from).contains(&to) && self.succs(from).len() > 1 && self.preds(to).len() > 1
    }

    /// Block and position of an attached instruction.
    #[must_use]
    pub fn position(&self, inst: InstId) -> Option<(BlockId, usize)> {
        let block = self.get_inst(inst)?.block()?;
        let pos = self.get_block(block)?.position(inst)?;
        Some((block, pos))
    }

    // ------------------------------------------------------------------------
    // Pass-local arena
    // ------------------------------------------------------------------------

    /// Pass-local arena.
    #[must_use]
    pub const fn local(&self) -> &LocalArena {
        &self.local
    }

    /// Pass-local arena, mutable. Used by the pass manager to reset it.
    pub fn local_mut(&mut self) -> &mut LocalArena {
        &mut self.local
    }

    /// Allocates a marker in the pass-local arena.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarkerExhausted`] if no slot is free.
    pub fn new_marker(&mut self) -> Result<Marker> {
        self.local.new_marker()
    }

    /// Marks an instruction. Returns `true` if it was not marked before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] for a stale marker.
    pub fn mark(&mut self, marker: Marker, inst: InstId) -> Result<bool> {
        self.local.set_inst(marker, inst.index())
    }

    /// Clears an instruction's mark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] for a stale marker.
    pub fn unmark(&mut self, marker: Marker, inst: InstId) -> Result<bool> {
        self.local.clear_inst(marker, inst.index())
    }

    /// Returns `true` if `inst` carries `marker`.
    #[must_use]
    pub fn is_marked(&self, marker: Marker, inst: InstId) -> bool {
        self.local.has_inst(marker, inst.index())
    }

    /// Marks a block. Returns `true` if it was not marked before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] for a stale marker.
    pub fn mark_block(&mut self, marker: Marker, block: BlockId) -> Result<bool> {
        self.local.set_block(marker, block.index())
    }

    /// Returns `true` if `block` carries `marker`.
    #[must_use]
    pub fn is_block_marked(&self, marker: Marker, block: BlockId) -> bool {
        self.local.has_block(marker, block.index())
    }

    // ------------------------------------------------------------------------
    // Instruction mutation
    // ------------------------------------------------------------------------

    /// Appends an instruction at the end of `block`.
    ///
    /// # Errors
    ///
    /// Fails if the block already ends in a terminator, is the exit block, or
    /// an input is dead.
    pub fn append_inst(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        ty: DataType,
        inputs: &[InstId],
    ) -> Result<InstId> {
        let pos = self.block(block)?.insts.len();
        self.insert_at(block, pos, opcode, ty, inputs)
    }

    /// Inserts an instruction at position `pos` of `block`.
    ///
    /// # Errors
    ///
    /// Fails if the position would place the instruction after the block's
    /// terminator, a terminator anywhere but last, into the exit block, or if an
    /// input is dead or a terminator.
    pub fn insert_at(
        &mut self,
        block: BlockId,
        pos: usize,
        opcode: Opcode,
        ty: DataType,
        inputs: &[InstId],
    ) -> Result<InstId> {
        self.check_placement(block, pos, &opcode, None)?;
        self.check_inputs(inputs)?;

        let id = self.alloc_inst(opcode, ty, inputs);
        if let Some(inst) = self.insts[id.index()].as_mut() {
            inst.block = Some(block);
        }
        self.block_mut(block)?.insts.insert(pos, id);
        Ok(id)
    }

    /// Inserts an instruction immediately before `anchor`.
    ///
    /// # Errors
    ///
    /// Fails if `anchor` is detached or dead, or for the reasons of [`Graph::insert_at`].
    pub fn insert_before(
        &mut self,
        anchor: InstId,
        opcode: Opcode,
        ty: DataType,
        inputs: &[InstId],
    ) -> Result<InstId> {
        let (block, pos) = self
            .position(anchor)
            .ok_or_else(|| structural_error!("anchor {} is not attached to a block", anchor))?;
        self.insert_at(block, pos, opcode, ty, inputs)
    }

    /// Inserts an instruction immediately after `anchor`.
    ///
    /// # Errors
    ///
    /// Fails if `anchor` is a terminator, detached or dead, or for the reasons
    /// of [`Graph::insert_at`].
    pub fn insert_after(
        &mut self,
        anchor: InstId,
        opcode: Opcode,
        ty: DataType,
        inputs: &[InstId],
    ) -> Result<InstId> {
        let (block, pos) = self
            .position(anchor)
            .ok_or_else(|| structural_error!("anchor {} is not attached to a block", anchor))?;
        self.insert_at(block, pos + 1, opcode, ty, inputs)
    }

    /// Removes an instruction that has no users.
    ///
    /// A phi whose only users are itself may be removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if other instructions still read `id`.
    pub fn remove_inst(&mut self, id: InstId) -> Result<()> {
        let inst = self.inst(id)?;
        if let Some(user) = inst.users.iter().find(|u| u.inst != id) {
            return Err(structural_error!(
                "cannot remove {} ({}): still used by {} at input {}",
                id,
                inst.opcode.name(),
                user.inst,
                user.index
            ));
        }

        let block = inst.block;
        let inputs = inst.inputs.clone();
        for (k, producer) in inputs.into_iter().enumerate() {
            if producer != id {
                self.unlink_user(producer, User::new(id, index_u32(k)));
            }
        }
        if let Some(b) = block.and_then(|b| self.blocks[b.index()].as_mut()) {
            b.insts.retain(|&i| i != id);
        }
        self.insts[id.index()] = None;
        Ok(())
    }

    /// Moves an attached instruction to position `pos` of `block`.
    ///
    /// `pos` is interpreted after the instruction has been taken out of its
    /// current block.
    ///
    /// # Errors
    ///
    /// Fails for terminators, for positions after the target's terminator,
    /// and for dead or detached ids.
    pub fn move_inst(&mut self, id: InstId, block: BlockId, pos: usize) -> Result<()> {
        let inst = self.inst(id)?;
        if inst.opcode.is_terminator() {
            return Err(structural_error!("cannot move terminator {}", id));
        }
        let (from, _) = self
            .position(id)
            .ok_or_else(|| structural_error!("{} is not attached to a block", id))?;
        self.check_placement(block, pos, &inst.opcode, Some(id))?;

        self.block_mut(from)?.insts.retain(|&i| i != id);
        self.block_mut(block)?.insts.insert(pos, id);
        if let Some(inst) = self.insts[id.index()].as_mut() {
            inst.block = Some(block);
        }
        Ok(())
    }

    /// Replaces input number `index` of `inst` with `value`.
    ///
    /// # Errors
    ///
    /// Fails for dead ids or an out-of-range index.
    pub fn set_input(&mut self, inst: InstId, index: usize, value: InstId) -> Result<()> {
        self.check_inputs(&[value])?;
        let old = *self
            .inst(inst)?
            .inputs
            .get(index)
            .ok_or_else(|| structural_error!("{} has no input {}", inst, index))?;
        if old == value {
            return Ok(());
        }
        let user = User::new(inst, index_u32(index));
        self.unlink_user(old, user);
        self.inst_mut(inst)?.inputs[index] = value;
        self.inst_mut(value)?.users.push(user);
        Ok(())
    }

    /// Appends an input to `inst`, typically a phi under construction.
    ///
    /// # Errors
    ///
    /// Fails for dead ids.
    pub fn append_input(&mut self, inst: InstId, value: InstId) -> Result<()> {
        self.check_inputs(&[value])?;
        let index = self.inst(inst)?.inputs.len();
        self.inst_mut(inst)?.inputs.push(value);
        self.inst_mut(value)?
            .users
            .push(User::new(inst, index_u32(index)));
        Ok(())
    }

    /// Removes input number `index` of `inst`, renumbering the later inputs.
    ///
    /// # Errors
    ///
    /// Fails for dead ids or an out-of-range index.
    pub fn remove_input(&mut self, inst: InstId, index: usize) -> Result<()> {
        let inputs = self.inst(inst)?.inputs.clone();
        if index >= inputs.len() {
            return Err(structural_error!("{} has no input {}", inst, index));
        }
        self.unlink_user(inputs[index], User::new(inst, index_u32(index)));
        for (k, &producer) in inputs.iter().enumerate().skip(index + 1) {
            if let Some(p) = self.insts[producer.index()].as_mut() {
                if let Some(u) = p
                    .users
                    .iter_mut()
                    .find(|u| u.inst == inst && u.input_index() == k)
                {
                    u.index = index_u32(k - 1);
                }
            }
        }
        self.inst_mut(inst)?.inputs.remove(index);
        Ok(())
    }

    /// Rewires every user of `from` to read `to` instead.
    ///
    /// Snapshot instructions are ordinary users, so their recorded virtual
    /// registers follow the replacement. Returns the number of rewired edges.
    ///
    /// # Errors
    ///
    /// Fails for dead ids or when `from == to`.
    pub fn replace_all_uses(&mut self, from: InstId, to: InstId) -> Result<usize> {
        if from == to {
            return Err(structural_error!("cannot replace {} with itself", from));
        }
        self.inst(to)?;
        let users = std::mem::take(&mut self.inst_mut(from)?.users);
        for user in &users {
            if let Some(consumer) = self.insts[user.inst.index()].as_mut() {
                consumer.inputs[user.input_index()] = to;
            }
        }
        let count = users.len();
        self.inst_mut(to)?.users.extend(users);
        Ok(count)
    }

    /// Rewrites the instruction order of `block` to `order`.
    ///
    /// Returns `true` if the order changed.
    ///
    /// # Errors
    ///
    /// Fails unless `order` is a permutation of the block's instructions that
    /// keeps the terminator last.
    pub fn reorder_block(&mut self, block: BlockId, order: &[InstId]) -> Result<bool> {
        let current = self.block(block)?.insts.clone();
        let mut a = current.clone();
        let mut b = order.to_vec();
        a.sort_unstable();
        b.sort_unstable();
        if a != b {
            return Err(structural_error!(
                "new order of {} is not a permutation of its instructions",
                block
            ));
        }
        if let Some(term) = self.terminator(block) {
            if order.last() != Some(&term) {
                return Err(structural_error!(
                    "new order of {} moves terminator {} away from the end",
                    block,
                    term
                ));
            }
        }
        if current == order {
            return Ok(false);
        }
        self.block_mut(block)?.insts = order.to_vec();
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Control flow mutation
    // ------------------------------------------------------------------------

    /// Creates an empty, unconnected block.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Some(BasicBlock::new(id)));
        self.cfg_epoch += 1;
        id
    }

    /// Designates the exit block.
    ///
    /// # Errors
    ///
    /// Fails if the block is dead, holds instructions or has successors.
    pub fn set_exit(&mut self, exit: Option<BlockId>) -> Result<()> {
        if let Some(b) = exit {
            let block = self.block(b)?;
            if !block.insts.is_empty() || !block.succs.is_empty() {
                return Err(structural_error!(
                    "exit block {} must be empty and have no successors",
                    b
                ));
            }
        }
        self.exit = exit;
        self.cfg_epoch += 1;
        Ok(())
    }

    /// Removes a block that has no remaining edges.
    ///
    /// Its instructions are removed with it, which requires that nothing
    /// outside the block still uses them.
    ///
    /// # Errors
    ///
    /// Fails for the entry or exit block, blocks with edges, or instructions
    /// with users outside the block.
    pub fn remove_block(&mut self, id: BlockId) -> Result<()> {
        let block = self.block(id)?;
        if id == self.entry || Some(id) == self.exit {
            return Err(structural_error!("cannot remove entry or exit block {}", id));
        }
        if !block.preds.is_empty() || !block.succs.is_empty() {
            return Err(structural_error!("cannot remove {}: it still has edges", id));
        }
        let members = block.insts.clone();
        for &inst in &members {
            if let Some(user) = self
                .inst(inst)?
                .users
                .iter()
                .find(|u| !members.contains(&u.inst))
            {
                return Err(structural_error!(
                    "cannot remove {}: {} is used by {} outside the block",
                    id,
                    inst,
                    user.inst
                ));
            }
        }

        for &inst in &members {
            let inputs = self.inst(inst)?.inputs.clone();
            for (k, producer) in inputs.into_iter().enumerate() {
                if !members.contains(&producer) {
                    self.unlink_user(producer, User::new(inst, index_u32(k)));
                }
            }
        }
        for &inst in &members {
            self.insts[inst.index()] = None;
        }
        self.blocks[id.index()] = None;
        self.cfg_epoch += 1;
        Ok(())
    }

    /// Adds the edge `from -> to` as the last successor of `from` and last
    /// predecessor of `to`.
    ///
    /// # Errors
    ///
    /// Fails if the edge already exists, targets the entry block, leaves the
    /// exit block, or targets a block whose phis already carry inputs (they
    /// would be one input short).
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.block(from)?;
        self.block(to)?;
        if to == self.entry {
            return Err(structural_error!("edge {} -> {} targets the entry block", from, to));
        }
        if Some(from) == self.exit {
            return Err(structural_error!("edge {} -> {} leaves the exit block", from, to));
        }
        if self.succs(from).contains(&to) {
            return Err(structural_error!("edge {} -> {} already exists", from, to));
        }
        if self.has_wired_phis(to) {
            return Err(structural_error!(
                "edge {} -> {} targets a block whose phis already have inputs",
                from,
                to
            ));
        }

        self.block_mut(from)?.succs.push(to);
        self.block_mut(to)?.preds.push(from);
        self.cfg_epoch += 1;
        self.refresh_edge_flags(from, &[to]);
        Ok(())
    }

    /// Removes the edge `from -> to` and the matching phi inputs of `to`.
    ///
    /// # Errors
    ///
    /// Fails if the edge does not exist.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let succ_idx = self
            .block(from)?
            .succs
            .iter()
            .position(|&s| s == to)
            .ok_or_else(|| structural_error!("edge {} -> {} does not exist", from, to))?;
        let pred_idx = self
            .block(to)?
            .pred_index(from)
            .ok_or_else(|| structural_error!("edge {} -> {} has no predecessor entry", from, to))?;

        for phi in self.phis(to) {
            if self.inst(phi)?.inputs.len() > pred_idx {
                self.remove_input(phi, pred_idx)?;
            }
        }
        self.block_mut(from)?.succs.remove(succ_idx);
        self.block_mut(to)?.preds.remove(pred_idx);
        self.cfg_epoch += 1;
        self.refresh_edge_flags(from, &[to]);
        Ok(())
    }

    /// Redirects the edge `block -> old` to `block -> new`, keeping the
    /// successor position.
    ///
    /// # Errors
    ///
    /// Fails if the old edge is missing or the new one could not be added by
    /// [`Graph::add_edge`] rules.
    pub fn replace_successor(&mut self, block: BlockId, old: BlockId, new: BlockId) -> Result<()> {
        let succ_idx = self
            .block(block)?
            .succs
            .iter()
            .position(|&s| s == old)
            .ok_or_else(|| structural_error!("edge {} -> {} does not exist", block, old))?;
        self.block(new)?;
        if new == self.entry || self.succs(block).contains(&new) || self.has_wired_phis(new) {
            return Err(structural_error!(
                "cannot redirect {} -> {} to {}",
                block,
                old,
                new
            ));
        }

        self.remove_edge(block, old)?;
        self.block_mut(block)?.succs.insert(succ_idx, new);
        self.block_mut(new)?.preds.push(block);
        self.cfg_epoch += 1;
        self.refresh_edge_flags(block, &[old, new]);
        Ok(())
    }

    /// Splits the critical edge `from -> to` by inserting an empty block that
    /// jumps to `to`.
    ///
    /// The new block takes over `from`'s successor slot and `to`'s
    /// predecessor slot, so phi inputs of `to` stay valid unchanged. The new
    /// block belongs to a try region only if both ends do.
    ///
    /// # Errors
    ///
    /// Fails if the edge does not exist or is not critical.
    pub fn split_critical_edge(&mut self, from: BlockId, to: BlockId) -> Result<BlockId> {
        if !self.is_critical_edge(from, to) {
            return Err(structural_error!("edge {} -> {} is not critical", from, to));
        }
        let succ_idx = self
            .block(from)?
            .succs
            .iter()
            .position(|&s| s == to)
            .ok_or_else(|| structural_error!("edge {} -> {} does not exist", from, to))?;
        let pred_idx = self
            .block(to)?
            .pred_index(from)
            .ok_or_else(|| structural_error!("edge {} -> {} has no predecessor entry", from, to))?;
        let in_try = self.block(from)?.is_try() && self.block(to)?.is_try();

        let middle = self.create_block();
        {
            let block = self.block_mut(middle)?;
            block.preds.push(from);
            block.succs.push(to);
            block.flags.set(BlockFlags::TRY, in_try);
        }
        self.block_mut(from)?.succs[succ_idx] = middle;
        self.block_mut(to)?.preds[pred_idx] = middle;
        self.append_inst(middle, Opcode::Jump, DataType::Void, &[])?;
        self.refresh_edge_flags(from, &[middle, to]);
        Ok(middle)
    }

    /// Sets or clears a block flag.
    ///
    /// # Errors
    ///
    /// Fails for dead ids.
    pub fn set_block_flag(&mut self, block: BlockId, flag: BlockFlags, on: bool) -> Result<()> {
        self.block_mut(block)?.flags.set(flag, on);
        Ok(())
    }

    /// Marks exactly the given blocks as loop members.
    pub fn set_loop_blocks(&mut self, members: impl IntoIterator<Item = BlockId>) {
        for block in self.blocks.iter_mut().flatten() {
            block.flags.remove(BlockFlags::LOOP);
        }
        for id in members {
            if let Some(block) = self.blocks.get_mut(id.index()).and_then(Option::as_mut) {
                block.flags.insert(BlockFlags::LOOP);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock> {
        let name = &self.name;
        self.blocks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidId(format!("block {id} in graph {name}")))
    }

    fn inst_mut(&mut self, id: InstId) -> Result<&mut Instruction> {
        let name = &self.name;
        self.insts
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidId(format!("instruction {id} in graph {name}")))
    }

    fn alloc_inst(&mut self, opcode: Opcode, ty: DataType, inputs: &[InstId]) -> InstId {
        let id = InstId::new(self.insts.len());
        let mut inst = Instruction::new(id, opcode, ty);
        inst.inputs = inputs.to_vec();
        self.insts.push(Some(inst));
        for (k, &producer) in inputs.iter().enumerate() {
            if let Some(p) = self.insts[producer.index()].as_mut() {
                p.users.push(User::new(id, index_u32(k)));
            }
        }
        id
    }

    fn check_inputs(&self, inputs: &[InstId]) -> Result<()> {
        for &input in inputs {
            if self.inst(input)?.opcode.is_terminator() {
                return Err(structural_error!("terminator {} cannot be an input", input));
            }
        }
        Ok(())
    }

    /// Validates placing an instruction with `opcode` at `pos` of `block`.
    /// `moving` is excluded from the block's current contents.
    fn check_placement(
        &self,
        block: BlockId,
        pos: usize,
        opcode: &Opcode,
        moving: Option<InstId>,
    ) -> Result<()> {
        let target = self.block(block)?;
        if Some(block) == self.exit {
            return Err(structural_error!("exit block {} cannot hold instructions", block));
        }
        let len = target
            .insts
            .iter()
            .filter(|&&i| Some(i) != moving)
            .count();
        let has_term = self.terminator(block).is_some();
        if opcode.is_terminator() {
            if has_term || pos != len {
                return Err(structural_error!(
                    "terminator {} must be the only terminator and last in {}",
                    opcode.name(),
                    block
                ));
            }
        } else if pos > len - usize::from(has_term) {
            return Err(structural_error!(
                "position {} of {} is after its terminator or out of range",
                pos,
                block
            ));
        }
        Ok(())
    }

    fn has_wired_phis(&self, block: BlockId) -> bool {
        self.phis(block)
            .iter()
            .any(|&p| self.get_inst(p).is_some_and(|phi| !phi.inputs.is_empty()))
    }

    fn unlink_user(&mut self, producer: InstId, user: User) {
        if let Some(p) = self.insts.get_mut(producer.index()).and_then(Option::as_mut) {
            if let Some(pos) = p.users.iter().position(|&u| u == user) {
                p.users.swap_remove(pos);
            }
        }
    }

    fn refresh_edge_flags(&mut self, from: BlockId, extra: &[BlockId]) {
        let mut affected = self.succs(from).to_vec();
        affected.extend_from_slice(extra);
        for block in affected {
            let critical = self.get_block(block).is_some_and(|b| {
                b.preds.len() > 1 && b.preds.iter().any(|&p| self.succs(p).len() > 1)
            });
            if let Some(b) = self.blocks.get_mut(block.index()).and_then(Option::as_mut) {
                b.flags.set(BlockFlags::CRITICAL_IN, critical);
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn index_u32(index: usize) -> u32 {
    index as u32
}
