//! Shared helpers for the integration tests.
//!
//! - [`init_logging`] routes the crate's `log` output through `env_logger`
//!   (set `RUST_LOG=midend=trace` to see pass events and graph dumps)
//! - [`interpret`] executes a graph over integer values and a small heap of
//!   arrays, so tests can compare a method's behaviour before and after the
//!   passes rewrite it

#![allow(dead_code)]

use rustc_hash::FxHashMap;

use midend::ir::{BlockId, ConditionCode, Graph, InstId, Opcode};

/// Instructions executed before [`interpret`] gives up on a run.
pub const FUEL: usize = 10_000;

/// Installs a test logger once. Later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_module("midend", log::LevelFilter::Warn)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

/// Observable result of one interpreted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Returned value, `None` for `ReturnVoid`.
    pub value: Option<i64>,
    /// Array contents after the run, indexed by reference value.
    pub heap: Vec<Vec<i64>>,
}

/// Why a run stopped without returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    /// Array access outside the array or through a non-array value.
    OutOfBounds(InstId),
    /// Division by zero.
    DivideByZero(InstId),
    /// An exception was thrown.
    Thrown(i64),
    /// The fuel ran out.
    OutOfFuel,
    /// Instruction the interpreter does not model, or a malformed graph.
    Unsupported(String),
}

fn holds(cc: ConditionCode, left: i64, right: i64) -> bool {
    match cc {
        ConditionCode::Eq => left == right,
        ConditionCode::Ne => left != right,
        ConditionCode::Lt => left < right,
        ConditionCode::Le => left <= right,
        ConditionCode::Gt => left > right,
        ConditionCode::Ge => left >= right,
    }
}

struct Machine<'g> {
    graph: &'g Graph,
    args: &'g [i64],
    heap: Vec<Vec<i64>>,
    values: FxHashMap<InstId, i64>,
    pairs: FxHashMap<InstId, (i64, i64)>,
}

impl Machine<'_> {
    fn value(&self, inst: InstId) -> Result<i64, Trap> {
        self.values
            .get(&inst)
            .copied()
            .ok_or_else(|| Trap::Unsupported(format!("{inst} read before definition")))
    }

    fn input(&self, inst: InstId, k: usize) -> Result<i64, Trap> {
        let input = self
            .graph
            .get_inst(inst)
            .and_then(|i| i.input(k))
            .ok_or_else(|| Trap::Unsupported(format!("{inst} has no input {k}")))?;
        self.value(input)
    }

    fn slot(&mut self, inst: InstId, array: i64, index: i64) -> Result<&mut i64, Trap> {
        let array = usize::try_from(array).map_err(|_| Trap::OutOfBounds(inst))?;
        let index = usize::try_from(index).map_err(|_| Trap::OutOfBounds(inst))?;
        self.heap
            .get_mut(array)
            .and_then(|a| a.get_mut(index))
            .ok_or(Trap::OutOfBounds(inst))
    }

    fn load(&mut self, inst: InstId, array: i64, index: i64) -> Result<i64, Trap> {
        self.slot(inst, array, index).map(|v| *v)
    }

    fn store(&mut self, inst: InstId, array: i64, index: i64, value: i64) -> Result<(), Trap> {
        *self.slot(inst, array, index)? = value;
        Ok(())
    }

    /// Assigns every phi of `block` at once, reading the inputs of the edge from `pred`.
    fn enter(&mut self, block: BlockId, pred: Option<BlockId>) -> Result<(), Trap> {
        let phis = self.graph.phis(block);
        if phis.is_empty() {
            return Ok(());
        }
        let pred = pred.ok_or_else(|| Trap::Unsupported(format!("phi in entry {block}")))?;
        let k = self
            .graph
            .preds(block)
            .iter()
            .position(|&p| p == pred)
            .ok_or_else(|| Trap::Unsupported(format!("{pred} is not a predecessor of {block}")))?;
        let incoming = phis
            .iter()
            .map(|&phi| self.input(phi, k))
            .collect::<Result<Vec<_>, _>>()?;
        for (phi, value) in phis.into_iter().zip(incoming) {
            self.values.insert(phi, value);
        }
        Ok(())
    }

    /// Executes one non-phi instruction. Returns the control transfer, if any.
    fn step(&mut self, block: BlockId, inst: InstId) -> Result<Option<Flow>, Trap> {
        let opcode = self
            .graph
            .opcode(inst)
            .map_err(|e| Trap::Unsupported(e.to_string()))?
            .clone();
        let binary = |m: &Self, f: fn(i64, i64) -> i64| -> Result<i64, Trap> {
            Ok(f(m.input(inst, 0)?, m.input(inst, 1)?))
        };

        let result = match opcode {
            Opcode::Phi => return Ok(None),
            Opcode::Parameter { index } => {
                let arg = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.args.get(i))
                    .ok_or_else(|| Trap::Unsupported(format!("missing argument {index}")))?;
                Some(*arg)
            }
            Opcode::Constant { value } => Some(value),
            Opcode::Add => Some(binary(self, i64::wrapping_add)?),
            Opcode::Sub => Some(binary(self, i64::wrapping_sub)?),
            Opcode::Mul => Some(binary(self, i64::wrapping_mul)?),
            Opcode::And => Some(binary(self, |a, b| a & b)?),
            Opcode::Or => Some(binary(self, |a, b| a | b)?),
            Opcode::Xor => Some(binary(self, |a, b| a ^ b)?),
            Opcode::Shl => Some(binary(self, |a, b| a.wrapping_shl(b as u32))?),
            Opcode::Shr => Some(binary(self, |a, b| a.wrapping_shr(b as u32))?),
            Opcode::Div => {
                let divisor = self.input(inst, 1)?;
                if divisor == 0 {
                    return Err(Trap::DivideByZero(inst));
                }
                Some(self.input(inst, 0)?.wrapping_div(divisor))
            }
            Opcode::Neg => Some(self.input(inst, 0)?.wrapping_neg()),
            Opcode::Cast => Some(self.input(inst, 0)?),
            Opcode::Compare { cc } => Some(i64::from(holds(
                cc,
                self.input(inst, 0)?,
                self.input(inst, 1)?,
            ))),
            Opcode::LoadArrayI { index, .. } => {
                let array = self.input(inst, 0)?;
                Some(self.load(inst, array, index as i64)?)
            }
            Opcode::LoadArray { .. } => {
                let (array, index) = (self.input(inst, 0)?, self.input(inst, 1)?);
                Some(self.load(inst, array, index)?)
            }
            Opcode::StoreArrayI { index, .. } => {
                let (array, value) = (self.input(inst, 0)?, self.input(inst, 1)?);
                self.store(inst, array, index as i64, value)?;
                None
            }
            Opcode::StoreArray { .. } => {
                let (array, index, value) = (
                    self.input(inst, 0)?,
                    self.input(inst, 1)?,
                    self.input(inst, 2)?,
                );
                self.store(inst, array, index, value)?;
                None
            }
            Opcode::LoadArrayPairI { index } => {
                let array = self.input(inst, 0)?;
                let lo = self.load(inst, array, index as i64)?;
                let hi = self.load(inst, array, index as i64 + 1)?;
                self.pairs.insert(inst, (lo, hi));
                None
            }
            Opcode::LoadArrayPair => {
                let (array, index) = (self.input(inst, 0)?, self.input(inst, 1)?);
                let lo = self.load(inst, array, index)?;
                let hi = self.load(inst, array, index + 1)?;
                self.pairs.insert(inst, (lo, hi));
                None
            }
            Opcode::LoadPairPart { part } => {
                let pair = self
                    .graph
                    .get_inst(inst)
                    .and_then(|i| i.input(0))
                    .and_then(|p| self.pairs.get(&p).copied())
                    .ok_or_else(|| Trap::Unsupported(format!("{inst} reads no pair")))?;
                Some(if part == 0 { pair.0 } else { pair.1 })
            }
            Opcode::StoreArrayPairI { index } => {
                let (array, lo, hi) = (
                    self.input(inst, 0)?,
                    self.input(inst, 1)?,
                    self.input(inst, 2)?,
                );
                self.store(inst, array, index as i64, lo)?;
                self.store(inst, array, index as i64 + 1, hi)?;
                None
            }
            Opcode::StoreArrayPair => {
                let (array, index, lo, hi) = (
                    self.input(inst, 0)?,
                    self.input(inst, 1)?,
                    self.input(inst, 2)?,
                    self.input(inst, 3)?,
                );
                self.store(inst, array, index, lo)?;
                self.store(inst, array, index + 1, hi)?;
                None
            }
            Opcode::NewArray => {
                let length = usize::try_from(self.input(inst, 0)?)
                    .map_err(|_| Trap::OutOfBounds(inst))?;
                self.heap.push(vec![0; length]);
                Some(self.heap.len() as i64 - 1)
            }
            Opcode::SafePoint { .. }
            | Opcode::SaveState { .. }
            | Opcode::MonitorEnter
            | Opcode::MonitorExit => None,
            Opcode::Jump => return Ok(Some(Flow::Goto(self.successor(block, 0)?))),
            Opcode::If { cc } => {
                let taken = holds(cc, self.input(inst, 0)?, self.input(inst, 1)?);
                let next = self.successor(block, usize::from(!taken))?;
                return Ok(Some(Flow::Goto(next)));
            }
            Opcode::Return => return Ok(Some(Flow::Return(Some(self.input(inst, 0)?)))),
            Opcode::ReturnVoid => return Ok(Some(Flow::Return(None))),
            Opcode::Throw => return Err(Trap::Thrown(self.input(inst, 0)?)),
            other => return Err(Trap::Unsupported(other.name().to_string())),
        };

        if let Some(value) = result {
            self.values.insert(inst, value);
        }
        Ok(None)
    }

    fn successor(&self, block: BlockId, k: usize) -> Result<BlockId, Trap> {
        self.graph
            .succs(block)
            .get(k)
            .copied()
            .ok_or_else(|| Trap::Unsupported(format!("{block} has no successor {k}")))
    }
}

enum Flow {
    Goto(BlockId),
    Return(Option<i64>),
}

/// Runs `graph` on `args` with the arrays in `heap`.
///
/// References are indices into `heap`; every other value is an `i64`.
/// Arithmetic wraps, so results only match the target for values that fit
/// the instruction types, which the tests keep small.
pub fn interpret(graph: &Graph, args: &[i64], heap: Vec<Vec<i64>>) -> Result<Outcome, Trap> {
    let mut machine = Machine {
        graph,
        args,
        heap,
        values: FxHashMap::default(),
        pairs: FxHashMap::default(),
    };
    let mut fuel = FUEL;
    let mut block = graph.entry();
    let mut pred = None;

    loop {
        machine.enter(block, pred)?;
        let insts = graph
            .block(block)
            .map_err(|e| Trap::Unsupported(e.to_string()))?
            .insts()
            .to_vec();

        let mut flow = None;
        for inst in insts {
            fuel = fuel.checked_sub(1).ok_or(Trap::OutOfFuel)?;
            if let Some(f) = machine.step(block, inst)? {
                flow = Some(f);
                break;
            }
        }

        match flow {
            Some(Flow::Goto(next)) => {
                pred = Some(block);
                block = next;
            }
            Some(Flow::Return(value)) => {
                return Ok(Outcome {
                    value,
                    heap: machine.heap,
                })
            }
            None => return Err(Trap::Unsupported(format!("{block} falls through"))),
        }
    }
}

/// Names of the opcodes of one block, in order.
pub fn opcode_names(graph: &Graph, block: BlockId) -> Vec<&'static str> {
    graph
        .get_block(block)
        .map(|b| {
            b.insts()
                .iter()
                .filter_map(|&i| graph.get_inst(i).map(|inst| inst.opcode().name()))
                .collect()
        })
        .unwrap_or_default()
}
