//! Closure-style graph construction.
//!
//! The front end (and every test in this crate) builds graphs through
//! [`GraphBuilder`]. Blocks are addressed by small integer labels; label `n`
//! becomes [`BlockId`] `n`, label 0 is the entry block, and the exit block is
//! created after all labelled blocks when some block returns or throws.
//! Successor edges are derived from terminators and phi inputs are wired by
//! predecessor label once every block exists, so back edges and loop-carried
//! phis need no special ordering.
//!
//! ```rust,ignore
//! use midend::{config::Arch, ir::{ConditionCode, DataType, GraphBuilder}};
//!
//! let graph = GraphBuilder::new(Arch::AArch64).build_with(|f| {
//!     let mut phi = None;
//!     f.block(0, |b| {
//!         let n = b.param(0, DataType::I32);
//!         let zero = b.const_i32(0);
//!         b.branch(ConditionCode::Eq, n, zero, 2, 1);
//!     });
//!     f.block(1, |b| {
//!         phi = Some(b.phi(DataType::I32));
//!         b.jump(2);
//!     });
//!     f.block(2, |b| b.ret_void());
//! })?;
//! ```
//!
//! Construction errors (bad labels, mutation failures) are collected and the
//! first one is returned from [`GraphBuilder::build_with`].

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::{
    config::Arch,
    ir::{BlockFlags, BlockId, ConditionCode, DataType, FieldId, Graph, InstId, Opcode},
    runtime::{DefaultRuntime, RuntimeInterface},
    Error, Result,
};

/// Placeholder id returned after a construction error.
const POISON: InstId = InstId(u32::MAX);

/// Entry point for building a [`Graph`].
pub struct GraphBuilder {
    name: String,
    arch: Arch,
    runtime: Arc<dyn RuntimeInterface>,
}

impl GraphBuilder {
    /// Creates a builder for the given target with [`DefaultRuntime`].
    #[must_use]
    pub fn new(arch: Arch) -> Self {
        GraphBuilder {
            name: String::from("method"),
            arch,
            runtime: Arc::new(DefaultRuntime),
        }
    }

    /// Sets the method name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the runtime interface.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeInterface>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Runs `f` against a fresh function builder and finalizes the graph.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded while building: a label referenced
    /// but never built, a phi without an input for some predecessor, or any
    /// rejected graph mutation.
    pub fn build_with<F>(self, f: F) -> Result<Graph>
    where
        F: FnOnce(&mut FunctionBuilder),
    {
        let mut fb = FunctionBuilder {
            graph: Graph::new(self.name, self.arch, self.runtime),
            built: FxHashSet::default(),
            referenced: FxHashSet::default(),
            edges: Vec::new(),
            phis: Vec::new(),
            error: None,
        };
        fb.built.insert(0);
        fb.referenced.insert(0);
        f(&mut fb);
        fb.finish()
    }
}

/// Successor target recorded by a terminator.
#[derive(Clone, Copy)]
enum Target {
    Label(usize),
    Exit,
}

/// Builder for the blocks of one function.
pub struct FunctionBuilder {
    graph: Graph,
    built: FxHashSet<usize>,
    referenced: FxHashSet<usize>,
    edges: Vec<(BlockId, Vec<Target>)>,
    phis: Vec<(InstId, Vec<(usize, InstId)>)>,
    error: Option<Error>,
}

impl FunctionBuilder {
    /// Builds (or extends) the block with the given label.
    pub fn block<F>(&mut self, label: usize, f: F) -> BlockId
    where
        F: FnOnce(&mut BlockBuilder<'_>),
    {
        let block = self.label_block(label);
        self.built.insert(label);
        let mut bb = BlockBuilder { fb: self, block };
        f(&mut bb);
        block
    }

    /// Marks the block with the given label as part of a try region.
    pub fn mark_try(&mut self, label: usize) {
        let block = self.label_block(label);
        let result = self.graph.set_block_flag(block, BlockFlags::TRY, true);
        self.record(result);
    }

    /// Provides phi inputs as `(predecessor label, value)` pairs.
    ///
    /// Inputs are wired in predecessor order when the graph is finished.
    pub fn phi_inputs(&mut self, phi: InstId, inputs: &[(usize, InstId)]) {
        self.phis.push((phi, inputs.to_vec()));
    }

    /// The graph under construction.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn label_block(&mut self, label: usize) -> BlockId {
        self.referenced.insert(label);
        while self.graph.block_capacity() <= label {
            self.graph.create_block();
        }
        BlockId::new(label)
    }

    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
                None
            }
        }
    }

    fn finish(mut self) -> Result<Graph> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let mut missing: Vec<usize> = self.referenced.difference(&self.built).copied().collect();
        missing.sort_unstable();
        if let Some(label) = missing.first() {
            return Err(Error::GraphError(format!(
                "block label {label} is referenced but never built"
            )));
        }

        for label in 0..self.graph.block_capacity() {
            if !self.referenced.contains(&label) {
                self.graph.remove_block(BlockId::new(label))?;
            }
        }

        let needs_exit = self
            .edges
            .iter()
            .any(|(_, targets)| targets.iter().any(|t| matches!(t, Target::Exit)));
        let exit = if needs_exit {
            let exit = self.graph.create_block();
            self.graph.set_exit(Some(exit))?;
            Some(exit)
        } else {
            None
        };

        for (from, targets) in std::mem::take(&mut self.edges) {
            for target in targets {
                let to = match target {
                    Target::Label(label) => BlockId::new(label),
                    Target::Exit => exit.ok_or_else(|| {
                        Error::GraphError("exit edge without exit block".to_string())
                    })?,
                };
                self.graph.add_edge(from, to)?;
            }
        }

        for (phi, inputs) in std::mem::take(&mut self.phis) {
            let block = self
                .graph
                .inst(phi)?
                .block()
                .ok_or_else(|| Error::GraphError(format!("phi {phi} is detached")))?;
            let preds = self.graph.preds(block).to_vec();
            for pred in preds {
                let value = inputs
                    .iter()
                    .find(|(label, _)| BlockId::new(*label) == pred)
                    .map(|&(_, v)| v)
                    .ok_or_else(|| {
                        Error::GraphError(format!("phi {phi} has no input for predecessor {pred}"))
                    })?;
                self.graph.append_input(phi, value)?;
            }
        }

        Ok(self.graph)
    }
}

/// Appends instructions to one block.
pub struct BlockBuilder<'a> {
    fb: &'a mut FunctionBuilder,
    block: BlockId,
}

impl BlockBuilder<'_> {
    /// The block being built.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.block
    }

    /// Appends an arbitrary instruction.
    pub fn inst(&mut self, opcode: Opcode, ty: DataType, inputs: &[InstId]) -> InstId {
        let result = self.fb.graph.append_inst(self.block, opcode, ty, inputs);
        self.fb.record(result).unwrap_or(POISON)
    }

    /// Method parameter.
    pub fn param(&mut self, index: u32, ty: DataType) -> InstId {
        self.inst(Opcode::Parameter { index }, ty, &[])
    }

    /// Constant of an arbitrary type.
    pub fn constant(&mut self, ty: DataType, value: i64) -> InstId {
        self.inst(Opcode::Constant { value }, ty, &[])
    }

    /// 32-bit integer constant.
    pub fn const_i32(&mut self, value: i32) -> InstId {
        self.constant(DataType::I32, i64::from(value))
    }

    /// 64-bit integer constant.
    pub fn const_i64(&mut self, value: i64) -> InstId {
        self.constant(DataType::I64, value)
    }

    /// 64-bit float constant.
    pub fn const_f64(&mut self, value: f64) -> InstId {
        #[allow(clippy::cast_possible_wrap)]
        let bits = value.to_bits() as i64;
        self.constant(DataType::F64, bits)
    }

    /// Phi whose inputs are supplied later with [`FunctionBuilder::phi_inputs`]
    /// or here with [`BlockBuilder::phi_with`].
    pub fn phi(&mut self, ty: DataType) -> InstId {
        self.inst(Opcode::Phi, ty, &[])
    }

    /// Phi with `(predecessor label, value)` inputs.
    pub fn phi_with(&mut self, ty: DataType, inputs: &[(usize, InstId)]) -> InstId {
        let phi = self.phi(ty);
        self.fb.phi_inputs(phi, inputs);
        phi
    }

    fn binary(&mut self, opcode: Opcode, left: InstId, right: InstId) -> InstId {
        let ty = self.fb.graph.get_inst(left).map_or(DataType::I32, |i| i.ty());
        self.inst(opcode, ty, &[left, right])
    }

    /// `left + right`, typed like `left`.
    pub fn add(&mut self, left: InstId, right: InstId) -> InstId {
        self.binary(Opcode::Add, left, right)
    }

    /// `left - right`, typed like `left`.
    pub fn sub(&mut self, left: InstId, right: InstId) -> InstId {
        self.binary(Opcode::Sub, left, right)
    }

    /// `left * right`, typed like `left`.
    pub fn mul(&mut self, left: InstId, right: InstId) -> InstId {
        self.binary(Opcode::Mul, left, right)
    }

    /// `left / right`, typed like `left`.
    pub fn div(&mut self, left: InstId, right: InstId) -> InstId {
        self.binary(Opcode::Div, left, right)
    }

    /// `-operand`.
    pub fn neg(&mut self, operand: InstId) -> InstId {
        let ty = self
            .fb
            .graph
            .get_inst(operand)
            .map_or(DataType::I32, |i| i.ty());
        self.inst(Opcode::Neg, ty, &[operand])
    }

    /// Boolean comparison.
    pub fn compare(&mut self, cc: ConditionCode, left: InstId, right: InstId) -> InstId {
        self.inst(Opcode::Compare { cc }, DataType::Bool, &[left, right])
    }

    /// Array load with a variable index.
    pub fn load_array(&mut self, ty: DataType, array: InstId, index: InstId) -> InstId {
        self.inst(Opcode::LoadArray { volatile: false }, ty, &[array, index])
    }

    /// Array load with an immediate index.
    pub fn load_array_i(&mut self, ty: DataType, array: InstId, index: u64) -> InstId {
        self.inst(
            Opcode::LoadArrayI {
                index,
                volatile: false,
            },
            ty,
            &[array],
        )
    }

    /// Volatile array load with an immediate index.
    pub fn volatile_load_array_i(&mut self, ty: DataType, array: InstId, index: u64) -> InstId {
        self.inst(
            Opcode::LoadArrayI {
                index,
                volatile: true,
            },
            ty,
            &[array],
        )
    }

    /// Array store with a variable index. `ty` is the element type.
    pub fn store_array(
        &mut self,
        ty: DataType,
        array: InstId,
        index: InstId,
        value: InstId,
    ) -> InstId {
        self.inst(
            Opcode::StoreArray { volatile: false },
            ty,
            &[array, index, value],
        )
    }

    /// Array store with an immediate index. `ty` is the element type.
    pub fn store_array_i(
        &mut self,
        ty: DataType,
        array: InstId,
        index: u64,
        value: InstId,
    ) -> InstId {
        self.inst(
            Opcode::StoreArrayI {
                index,
                volatile: false,
            },
            ty,
            &[array, value],
        )
    }

    /// Volatile array store with an immediate index.
    pub fn volatile_store_array_i(
        &mut self,
        ty: DataType,
        array: InstId,
        index: u64,
        value: InstId,
    ) -> InstId {
        self.inst(
            Opcode::StoreArrayI {
                index,
                volatile: true,
            },
            ty,
            &[array, value],
        )
    }

    /// Object field load.
    pub fn load_object(&mut self, ty: DataType, object: InstId, field: u32, offset: u32) -> InstId {
        self.inst(
            Opcode::LoadObject {
                field: FieldId(field),
                offset,
                volatile: false,
            },
            ty,
            &[object],
        )
    }

    /// Object field store.
    pub fn store_object(
        &mut self,
        ty: DataType,
        object: InstId,
        field: u32,
        offset: u32,
        value: InstId,
    ) -> InstId {
        self.inst(
            Opcode::StoreObject {
                field: FieldId(field),
                offset,
                volatile: false,
            },
            ty,
            &[object, value],
        )
    }

    /// Object allocation.
    pub fn new_object(&mut self, class: u32) -> InstId {
        self.inst(Opcode::NewObject { class }, DataType::Reference, &[])
    }

    /// Array allocation.
    pub fn new_array(&mut self, length: InstId) -> InstId {
        self.inst(Opcode::NewArray, DataType::Reference, &[length])
    }

    /// Call with unknown side effects.
    pub fn call(&mut self, method: u32, ty: DataType, args: &[InstId]) -> InstId {
        self.inst(Opcode::Call { method }, ty, args)
    }

    /// Monitor enter.
    pub fn monitor_enter(&mut self, object: InstId) -> InstId {
        self.inst(Opcode::MonitorEnter, DataType::Void, &[object])
    }

    /// Monitor exit.
    pub fn monitor_exit(&mut self, object: InstId) -> InstId {
        self.inst(Opcode::MonitorExit, DataType::Void, &[object])
    }

    /// GC safepoint recording `(vreg, value)` pairs.
    pub fn safepoint(&mut self, live: &[(u16, InstId)]) -> InstId {
        let (vregs, inputs): (Vec<u16>, Vec<InstId>) = live.iter().copied().unzip();
        self.inst(Opcode::SafePoint { vregs }, DataType::Void, &inputs)
    }

    /// Deoptimization snapshot recording `(vreg, value)` pairs.
    pub fn save_state(&mut self, live: &[(u16, InstId)]) -> InstId {
        let (vregs, inputs): (Vec<u16>, Vec<InstId>) = live.iter().copied().unzip();
        self.inst(Opcode::SaveState { vregs }, DataType::Void, &inputs)
    }

    fn terminate(&mut self, opcode: Opcode, inputs: &[InstId], targets: Vec<Target>) {
        for target in &targets {
            if let Target::Label(label) = *target {
                self.fb.label_block(label);
            }
        }
        self.inst(opcode, DataType::Void, inputs);
        self.fb.edges.push((self.block, targets));
    }

    /// Unconditional jump.
    pub fn jump(&mut self, target: usize) {
        self.terminate(Opcode::Jump, &[], vec![Target::Label(target)]);
    }

    /// Two-way branch on `left cc right`.
    pub fn branch(
        &mut self,
        cc: ConditionCode,
        left: InstId,
        right: InstId,
        if_true: usize,
        if_false: usize,
    ) {
        self.terminate(
            Opcode::If { cc },
            &[left, right],
            vec![Target::Label(if_true), Target::Label(if_false)],
        );
    }

    /// Return a value.
    pub fn ret(&mut self, value: InstId) {
        self.terminate(Opcode::Return, &[value], vec![Target::Exit]);
    }

    /// Return without a value.
    pub fn ret_void(&mut self) {
        self.terminate(Opcode::ReturnVoid, &[], vec![Target::Exit]);
    }

    /// Throw an exception object.
    pub fn throw(&mut self, exception: InstId) {
        self.terminate(Opcode::Throw, &[exception], vec![Target::Exit]);
    }
}
