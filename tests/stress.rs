//! Randomized cross-checks of the exploration machinery: the number of
//! explored executions is a property of the program and the model, not
//! of the scheduling policy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use weft::ir::{Module, ModuleBuilder, Operand};
use weft::{Config, MemOrdering, MemoryModel, SchedulePolicy};

const N_PROGRAMS: usize = 12;
const OPS_PER_THREAD: usize = 3;

#[derive(Clone, Copy, Debug)]
enum Op {
    Store(usize, u64, MemOrdering),
    Load(usize, MemOrdering),
    Fai(usize, MemOrdering),
}

fn random_ordering(rng: &mut StdRng) -> MemOrdering {
    match rng.gen_range(0..4) {
        0 => MemOrdering::Relaxed,
        1 => MemOrdering::Acquire,
        2 => MemOrdering::Release,
        _ => MemOrdering::SeqCst,
    }
}

fn random_op(rng: &mut StdRng) -> Op {
    let loc = rng.gen_range(0..2);
    match rng.gen_range(0..3) {
        0 => Op::Store(loc, rng.gen_range(1..4), random_ordering(rng)),
        1 => Op::Load(loc, random_ordering(rng)),
        _ => Op::Fai(loc, MemOrdering::AcqRel),
    }
}

fn build_program(rng: &mut StdRng) -> Module {
    let mut m = ModuleBuilder::new();
    let locs = vec![m.global("x", 4, 0), m.global("y", 4, 0)];
    let mut workers = Vec::new();
    for t in 0..2 {
        let mut f = m.function(&format!("worker{}", t));
        for _ in 0..OPS_PER_THREAD {
            match random_op(rng) {
                Op::Store(l, v, ord) => {
                    // Loads require at least acquire, stores at least
                    // release, to stay well-formed.
                    let ord = match ord {
                        MemOrdering::Acquire => MemOrdering::Relaxed,
                        o => o,
                    };
                    f.store_ord(locs[l], v, ord)
                }
                Op::Load(l, ord) => {
                    let ord = match ord {
                        MemOrdering::Release => MemOrdering::Relaxed,
                        o => o,
                    };
                    let _ = f.load_ord(locs[l], ord);
                }
                Op::Fai(l, ord) => {
                    let _ = f.rmw(weft::RmwOp::Add, locs[l], 1u64, ord);
                }
            }
        }
        f.ret(None);
        workers.push(f.id());
    }
    {
        let mut f = m.function("main");
        let handles: Vec<_> = workers
            .iter()
            .map(|&w| f.spawn(w, Operand::from(0u64)))
            .collect();
        for h in handles {
            f.join(h);
        }
        f.ret(None);
    }
    m.build()
}

fn run(module: Module, model: MemoryModel, policy: SchedulePolicy, seed: u64) -> weft::VerificationResult {
    let mut config = Config::default();
    config.model = model;
    config.schedule_policy = policy;
    config.seed = seed;
    let res = weft::verify(&config, module);
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    res
}

fn count(module: Module, model: MemoryModel, policy: SchedulePolicy, seed: u64) -> u64 {
    let res = run(module, model, policy, seed);
    res.explored + res.explored_blocked
}

#[test]
fn schedule_policy_does_not_change_execution_count() {
    let mut rng = StdRng::seed_from_u64(0xbead);
    for i in 0..N_PROGRAMS {
        let reference = count(build_program(&mut rng.clone()), MemoryModel::Rc11, SchedulePolicy::Wf, 0);
        for &(policy, seed) in &[
            (SchedulePolicy::Ltr, 0),
            (SchedulePolicy::Random, 1),
            (SchedulePolicy::Random, 42),
        ] {
            let n = count(build_program(&mut rng.clone()), MemoryModel::Rc11, policy, seed);
            assert_eq!(n, reference, "program {} diverged under {:?}", i, policy);
        }
        // Advance the generator past this program.
        let _ = build_program(&mut rng);
    }
}

#[test]
fn models_are_ordered_by_permissiveness() {
    let mut rng = StdRng::seed_from_u64(0xfeed);
    for _ in 0..N_PROGRAMS {
        let sc = run(
            build_program(&mut rng.clone()),
            MemoryModel::Sc,
            SchedulePolicy::Wf,
            0,
        );
        let tso = run(
            build_program(&mut rng.clone()),
            MemoryModel::Tso,
            SchedulePolicy::Wf,
            0,
        );
        assert!(
            sc.explored <= tso.explored,
            "SC explored more than TSO ({} vs {})",
            sc.explored,
            tso.explored
        );
        let _ = build_program(&mut rng);
    }
}
