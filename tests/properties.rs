//! Property tests over generated methods.
//!
//! Methods are generated from small step programs: straight-line blocks of
//! array loads, stores, arithmetic and snapshots, diamonds whose arms use
//! values computed up front, and an irreducible two-block cycle. Every
//! property compares the rewritten graph against the one the generator
//! produced, either structurally or through the interpreter in `common`.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use rustc_hash::FxHashMap;

use midend::{
    analysis::{may_alias, DominatorTree, LoopInfo},
    checker::check_graph,
    compiler::{
        standard_pipeline, CodeSinkPass, MemoryCoalescingPass, Pass, PassManager, SchedulerPass,
    },
    config::{Arch, CompilerConfig},
    ir::{BlockId, ConditionCode, DataType, Graph, GraphBuilder, InstId, Opcode},
    runtime::{DefaultRuntime, RuntimeInterface},
};

use common::{init_logging, interpret};

const ARRAY_LEN: u64 = 8;

#[derive(Debug, Clone)]
enum Step {
    Load(u64),
    Store(u64, usize),
    VolatileStore(u64, usize),
    Add(usize, usize),
    Mul(usize, usize),
    SafePoint(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..ARRAY_LEN).prop_map(Step::Load),
        2 => (0..ARRAY_LEN, any::<usize>()).prop_map(|(i, v)| Step::Store(i, v)),
        1 => (0..ARRAY_LEN, any::<usize>()).prop_map(|(i, v)| Step::VolatileStore(i, v)),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Step::Add(a, b)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Step::Mul(a, b)),
        1 => any::<usize>().prop_map(Step::SafePoint),
    ]
}

fn pick(values: &[InstId], k: usize) -> InstId {
    values[k % values.len()]
}

/// One block: `steps` over array parameter 0 and seed parameter 1, returning
/// the sum of every value produced.
fn straight_line(arch: Arch, ty: DataType, steps: &[Step]) -> Graph {
    GraphBuilder::new(arch)
        .with_name("straight")
        .build_with(|f| {
            f.block(0, |b| {
                let arr = b.param(0, DataType::Reference);
                let mut values = vec![b.param(1, ty)];
                for step in steps {
                    match *step {
                        Step::Load(i) => values.push(b.load_array_i(ty, arr, i)),
                        Step::Store(i, v) => {
                            let value = pick(&values, v);
                            b.store_array_i(ty, arr, i, value);
                        }
                        Step::VolatileStore(i, v) => {
                            let value = pick(&values, v);
                            b.volatile_store_array_i(ty, arr, i, value);
                        }
                        Step::Add(x, y) => {
                            let (x, y) = (pick(&values, x), pick(&values, y));
                            values.push(b.add(x, y));
                        }
                        Step::Mul(x, y) => {
                            let (x, y) = (pick(&values, x), pick(&values, y));
                            values.push(b.mul(x, y));
                        }
                        Step::SafePoint(v) => {
                            let live = pick(&values, v);
                            b.safepoint(&[(0, live)]);
                        }
                    }
                }
                let mut acc = values[0];
                for &v in &values[1..] {
                    acc = b.add(acc, v);
                }
                b.ret(acc);
            });
        })
        .expect("generated method builds")
}

fn heap() -> Vec<Vec<i64>> {
    vec![(0..ARRAY_LEN as i64).map(|k| 3 * k + 1).collect()]
}

fn manager(config: CompilerConfig) -> PassManager {
    init_logging();
    PassManager::new(Arc::new(config))
}

/// Whether `a` and `b` may not trade places.
fn must_keep_order(graph: &Graph, a: InstId, b: InstId) -> bool {
    let (Ok(oa), Ok(ob)) = (graph.opcode(a), graph.opcode(b)) else {
        return false;
    };
    let ordered = |op: &Opcode| op.is_memory() || op.is_barrier();
    if (oa.is_barrier() && ordered(ob)) || (ob.is_barrier() && ordered(oa)) {
        return true;
    }
    oa.is_memory()
        && ob.is_memory()
        && (oa.is_store() || ob.is_store())
        && may_alias(graph, a, b).may()
}

fn blocks_by_inst(graph: &Graph) -> FxHashMap<InstId, BlockId> {
    graph
        .insts()
        .filter_map(|i| i.block().map(|b| (i.id(), b)))
        .collect()
}

#[derive(Debug, Clone)]
struct Diamond {
    defs: Vec<(usize, usize, bool)>,
    left: Vec<usize>,
    right: Vec<usize>,
    join: Vec<usize>,
}

fn diamond_program() -> impl Strategy<Value = Diamond> {
    let uses = || prop::collection::vec(any::<usize>(), 0..4);
    (
        prop::collection::vec((any::<usize>(), any::<usize>(), any::<bool>()), 1..8),
        uses(),
        uses(),
        uses(),
    )
        .prop_map(|(defs, left, right, join)| Diamond {
            defs,
            left,
            right,
            join,
        })
}

/// Values computed in the entry block, summed in each arm and in the join.
fn diamond(program: &Diamond) -> Graph {
    GraphBuilder::new(Arch::AArch64)
        .with_name("diamond")
        .build_with(|f| {
            let mut values = Vec::new();
            f.block(0, |b| {
                let p0 = b.param(0, DataType::I32);
                let p1 = b.param(1, DataType::I32);
                values = vec![p0, p1];
                for &(x, y, mul) in &program.defs {
                    let (x, y) = (pick(&values, x), pick(&values, y));
                    let v = if mul { b.mul(x, y) } else { b.add(x, y) };
                    values.push(v);
                }
                b.branch(ConditionCode::Lt, p0, p1, 1, 2);
            });
            let mut arms = [values[0], values[1]];
            for (label, uses) in [(1, &program.left), (2, &program.right)] {
                f.block(label, |b| {
                    let mut acc = values[label - 1];
                    for &k in uses {
                        acc = b.add(acc, pick(&values, k));
                    }
                    arms[label - 1] = acc;
                    b.jump(3);
                });
            }
            f.block(3, |b| {
                let mut acc = b.phi_with(DataType::I32, &[(1, arms[0]), (2, arms[1])]);
                for &k in &program.join {
                    acc = b.add(acc, pick(&values, k));
                }
                b.ret(acc);
            });
        })
        .expect("generated diamond builds")
}

/// bb0 enters the cycle bb1 <-> bb2 at both blocks; both leave to bb3.
fn irreducible(program: &Diamond) -> Graph {
    GraphBuilder::new(Arch::AArch64)
        .with_name("irreducible")
        .build_with(|f| {
            let mut values = Vec::new();
            f.block(0, |b| {
                let p0 = b.param(0, DataType::I32);
                let p1 = b.param(1, DataType::I32);
                values = vec![p0, p1];
                for &(x, y, mul) in &program.defs {
                    let (x, y) = (pick(&values, x), pick(&values, y));
                    let v = if mul { b.mul(x, y) } else { b.add(x, y) };
                    values.push(v);
                }
                b.branch(ConditionCode::Lt, p0, p1, 1, 2);
            });
            for (label, uses, other) in [(1, &program.left, 2), (2, &program.right, 1)] {
                f.block(label, |b| {
                    let mut acc = values[0];
                    for &k in uses {
                        acc = b.add(acc, pick(&values, k));
                    }
                    b.branch(ConditionCode::Lt, acc, values[1], other, 3);
                });
            }
            f.block(3, |b| {
                let mut acc = values[1];
                for &k in &program.join {
                    acc = b.add(acc, pick(&values, k));
                }
                b.ret(acc);
            });
        })
        .expect("generated irreducible method builds")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_scheduling_keeps_dependences(steps in prop::collection::vec(step(), 1..24)) {
        let mut graph = straight_line(Arch::AArch64, DataType::I32, &steps);
        let entry = graph.entry();
        let before = graph.block(entry).expect("entry").insts().to_vec();
        let reference = interpret(&graph, &[0, 2], heap());

        let mut manager = manager(CompilerConfig::debug());
        manager
            .run_pass(&mut graph, &SchedulerPass::new())
            .expect("scheduling succeeds");

        let after = graph.block(entry).expect("entry").insts().to_vec();
        let position: FxHashMap<InstId, usize> =
            after.iter().enumerate().map(|(k, &i)| (i, k)).collect();
        prop_assert_eq!(after.len(), before.len());
        prop_assert_eq!(after.last(), before.last());

        for (k, &a) in before.iter().enumerate() {
            for &b in &before[k + 1..] {
                if must_keep_order(&graph, a, b) {
                    prop_assert!(position[&a] < position[&b], "{} moved past {}", a, b);
                }
            }
            let inst = graph.inst(a).expect("live");
            for &input in inst.inputs() {
                if let Some(&p) = position.get(&input) {
                    prop_assert!(p < position[&a], "{} scheduled before its input {}", a, input);
                }
            }
        }

        prop_assert_eq!(interpret(&graph, &[0, 2], heap()), reference);
    }

    #[test]
    fn test_checker_is_clean_around_every_pass(
        steps in prop::collection::vec(step(), 1..24),
        aligned in any::<bool>(),
    ) {
        let mut graph = straight_line(Arch::AArch64, DataType::I32, &steps);
        let reference = interpret(&graph, &[0, 5], heap());
        let config = CompilerConfig::default().with_aligned_pairs_only(aligned);
        let mut manager = manager(config);

        prop_assert!(check_graph(&graph).is_empty());
        for pass in standard_pipeline() {
            manager.run_pass(&mut graph, pass.as_ref()).expect("pass succeeds");
            let first = check_graph(&graph);
            prop_assert!(first.is_empty(), "after {}: {:?}", pass.name(), first);
            prop_assert_eq!(check_graph(&graph), first);
        }

        prop_assert_eq!(interpret(&graph, &[0, 5], heap()), reference);
    }

    #[test]
    fn test_sunk_values_stay_dominated_by_their_origin(
        program in diamond_program(),
        p0 in -20i64..20,
        p1 in -20i64..20,
    ) {
        let mut graph = diamond(&program);
        let origin = blocks_by_inst(&graph);
        let taken = interpret(&graph, &[p0, p1], Vec::new());
        let swapped = interpret(&graph, &[p1, p0], Vec::new());

        let mut manager = manager(CompilerConfig::debug());
        manager
            .run_pass(&mut graph, &CodeSinkPass::new())
            .expect("sinking succeeds");

        let dom = DominatorTree::compute(&graph);
        for inst in graph.insts() {
            let (Some(now), Some(&was)) = (inst.block(), origin.get(&inst.id())) else {
                continue;
            };
            prop_assert!(dom.dominates(was, now), "{} left the region of {}", inst.id(), was);
            for user in inst.users() {
                let is_phi = graph.opcode(user.inst).is_ok_and(Opcode::is_phi);
                if !is_phi {
                    prop_assert!(dom.inst_dominates(&graph, inst.id(), user.inst));
                }
            }
        }

        prop_assert_eq!(interpret(&graph, &[p0, p1], Vec::new()), taken);
        prop_assert_eq!(interpret(&graph, &[p1, p0], Vec::new()), swapped);
    }

    #[test]
    fn test_nothing_sinks_into_an_irreducible_loop(program in diamond_program()) {
        let mut graph = irreducible(&program);
        let origin = blocks_by_inst(&graph);
        {
            let dom = DominatorTree::compute(&graph);
            prop_assert!(LoopInfo::compute(&graph, &dom).has_irreducible());
        }

        let mut manager = manager(CompilerConfig::debug());
        manager
            .run_pass(&mut graph, &CodeSinkPass::new())
            .expect("sinking succeeds");

        let dom = DominatorTree::compute(&graph);
        let loops = LoopInfo::compute(&graph, &dom);
        for inst in graph.insts() {
            let (Some(now), Some(&was)) = (inst.block(), origin.get(&inst.id())) else {
                continue;
            };
            if was == graph.entry() {
                prop_assert!(
                    !loops.is_in_irreducible_loop(now),
                    "{} sank into {}",
                    inst.id(),
                    now
                );
            }
        }
    }

    #[test]
    fn test_strict_mode_only_forms_aligned_pairs(
        steps in prop::collection::vec(step(), 1..24),
        (arch, ty) in prop_oneof![
            Just((Arch::AArch64, DataType::I32)),
            Just((Arch::AArch64, DataType::I64)),
            Just((Arch::Arm32, DataType::I32)),
        ],
    ) {
        let mut graph = straight_line(arch, ty, &steps);
        let reference = interpret(&graph, &[0, 1], heap());
        let config = CompilerConfig::debug()
            .with_arch(arch)
            .with_aligned_pairs_only(true);
        let mut manager = manager(config);
        manager
            .run_pass(&mut graph, &MemoryCoalescingPass::new())
            .expect("coalescing succeeds");

        let runtime = DefaultRuntime;
        let size = u64::from(runtime.element_size(ty, arch));
        let offset = u64::from(runtime.array_data_offset(arch));
        for inst in graph.insts() {
            if let Opcode::LoadArrayPairI { index } | Opcode::StoreArrayPairI { index } =
                inst.opcode()
            {
                prop_assert_eq!((offset + index * size) % (2 * size), 0);
            }
        }

        prop_assert_eq!(interpret(&graph, &[0, 1], heap()), reference);
    }
}
