//! End-to-end litmus tests: classic weak-memory shapes with their
//! expected execution counts, and the error-detection scenarios.

use weft::ir::{Module, ModuleBuilder};
use weft::{Config, MemOrdering, MemoryModel, VerificationError, VerificationResult};

fn check(model: MemoryModel, module: Module) -> VerificationResult {
    let mut config = Config::default();
    config.model = model;
    weft::verify(&config, module)
}

/// Two threads publish to distinct locations and read the other's.
fn store_buffering() -> Module {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    let y = m.global("y", 4, 0);
    let t1 = {
        let mut f = m.function("writer_x");
        f.store_ord(x, 1u64, MemOrdering::Relaxed);
        let r = f.load_ord(y, MemOrdering::Relaxed);
        f.ret(Some(r.into()));
        f.id()
    };
    let t2 = {
        let mut f = m.function("writer_y");
        f.store_ord(y, 1u64, MemOrdering::Relaxed);
        let r = f.load_ord(x, MemOrdering::Relaxed);
        f.ret(Some(r.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(t1, 0u64);
        let b = f.spawn(t2, 0u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    m.build()
}

#[test]
fn store_buffering_sc_forbids_both_zero() {
    let res = check(MemoryModel::Sc, store_buffering());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 3);
}

#[test]
fn store_buffering_tso_admits_both_zero() {
    let res = check(MemoryModel::Tso, store_buffering());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 4);
}

#[test]
fn store_buffering_rc11_admits_both_zero() {
    let res = check(MemoryModel::Rc11, store_buffering());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 4);
}

/// Release/acquire publication: the reader spins on the flag, then reads
/// the data location. The spin iterations are elided by the assume.
#[test]
fn message_passing_rc11() {
    let mut m = ModuleBuilder::new();
    let data = m.global("data", 4, 0);
    let flag = m.global("flag", 4, 0);
    let writer = {
        let mut f = m.function("writer");
        f.store(data, 42u64);
        f.store_ord(flag, 1u64, MemOrdering::Release);
        f.ret(None);
        f.id()
    };
    let reader = {
        let mut f = m.function("reader");
        let v = f.load_ord(flag, MemOrdering::Acquire);
        f.call_void("assume", vec![v.into()]);
        let r = f.load(data);
        f.ret(Some(r.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(writer, 0u64);
        let b = f.spawn(reader, 0u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 1);
    assert!(res.explored_blocked >= 1);
}

#[test]
fn non_atomic_race_is_reported() {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    let w = {
        let mut f = m.function("writer");
        f.store(x, 1u64);
        f.ret(None);
        f.id()
    };
    let r = {
        let mut f = m.function("reader");
        let v = f.load(x);
        f.ret(Some(v.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(w, 0u64);
        let b = f.spawn(r, 0u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    let report = res.error.expect("race not detected");
    assert_eq!(report.kind, VerificationError::RaceNotAtomic);
    // The trace must exhibit both racing accesses.
    assert!(report.trace.contains("R"), "trace: {}", report.trace);
    assert!(report.trace.contains("W"), "trace: {}", report.trace);
}

#[test]
fn double_free_is_reported() {
    let mut m = ModuleBuilder::new();
    {
        let mut f = m.function("main");
        let p = f.call("malloc", vec![4u64.into()]);
        f.call_void("free", vec![p.into()]);
        f.call_void("free", vec![p.into()]);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert_eq!(
        res.error.map(|e| e.kind),
        Some(VerificationError::DoubleFree)
    );
}

#[test]
fn use_after_free_is_reported() {
    let mut m = ModuleBuilder::new();
    {
        let mut f = m.function("main");
        let p = f.call("malloc", vec![4u64.into()]);
        f.call_void("free", vec![p.into()]);
        f.store(p, 1u64);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert_eq!(
        res.error.map(|e| e.kind),
        Some(VerificationError::AccessFreed)
    );
}

#[test]
fn uninitialized_heap_read_is_reported() {
    let mut m = ModuleBuilder::new();
    {
        let mut f = m.function("main");
        let p = f.call("malloc", vec![4u64.into()]);
        let v = f.load(p);
        f.ret(Some(v.into()));
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert_eq!(
        res.error.map(|e| e.kind),
        Some(VerificationError::UninitializedMem)
    );
}

#[test]
fn assertion_failure_is_reported() {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    {
        let mut f = m.function("main");
        f.store(x, 1u64);
        let v = f.load(x);
        let ok = f.cmp(weft::ir::CmpOp::Eq, v, 2u64);
        f.assert(ok);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert_eq!(res.error.map(|e| e.kind), Some(VerificationError::Safety));
}

/// Two threads serialize on a mutex; under SC there are exactly n!
/// acquisition orders.
#[test]
fn mutex_serializations_sc() {
    let mut m = ModuleBuilder::new();
    let lock = m.global("lock", 4, 0);
    let counter = m.global("counter", 4, 0);
    let worker = {
        let mut f = m.function("worker");
        f.call_void("mutex_lock", vec![lock]);
        let v = f.load(counter);
        let inc = f.bin(weft::ir::BinOp::Add, v, 1u64);
        f.store(counter, inc);
        f.call_void("mutex_unlock", vec![lock]);
        f.ret(None);
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(worker, 0u64);
        let b = f.spawn(worker, 1u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Sc, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 2);
}

/* ---------------- boundary behaviors ---------------- */

#[test]
fn empty_program_explores_once() {
    let mut m = ModuleBuilder::new();
    {
        let mut f = m.function("main");
        f.ret(Some(0u64.into()));
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert!(res.error.is_none());
    assert_eq!(res.explored, 1);
    assert_eq!(res.explored_blocked, 0);
}

#[test]
fn single_thread_store_then_load() {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    {
        let mut f = m.function("main");
        f.store(x, 7u64);
        let v = f.load(x);
        f.ret(Some(v.into()));
    }
    let res = check(MemoryModel::Sc, m.build());
    assert!(res.error.is_none());
    assert_eq!(res.explored, 1);
}

/// Two unsynchronized writers followed by a joining reader: one graph
/// per coherence order of the two stores.
#[test]
fn two_writers_joined_reader_sc() {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    let w1 = {
        let mut f = m.function("w1");
        f.store_ord(x, 1u64, MemOrdering::Relaxed);
        f.ret(None);
        f.id()
    };
    let w2 = {
        let mut f = m.function("w2");
        f.store_ord(x, 2u64, MemOrdering::Relaxed);
        f.ret(None);
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(w1, 0u64);
        let b = f.spawn(w2, 0u64);
        f.join(a);
        f.join(b);
        let v = f.load_ord(x, MemOrdering::Relaxed);
        f.ret(Some(v.into()));
    }
    let res = check(MemoryModel::Sc, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 2);
}

/// A program without atomics (and without concurrency) has exactly one
/// consistent graph, under every model.
#[test]
fn sequential_program_has_one_graph() {
    fn build() -> Module {
        let mut m = ModuleBuilder::new();
        let x = m.global("x", 4, 0);
        let y = m.global("y", 4, 0);
        {
            let mut f = m.function("main");
            f.store(x, 1u64);
            f.store(y, 2u64);
            let a = f.load(x);
            let b = f.load(y);
            let s = f.bin(weft::ir::BinOp::Add, a, b);
            f.store(x, s);
            f.ret(Some(s.into()));
        }
        m.build()
    }
    for &model in &[
        MemoryModel::Sc,
        MemoryModel::Tso,
        MemoryModel::Rc11,
        MemoryModel::Imm,
    ] {
        let res = check(model, build());
        assert!(res.error.is_none());
        assert_eq!(res.explored, 1, "model {:?}", model);
    }
}

/// Fetch-and-increment from two threads: both orders, and the final
/// value is always two.
#[test]
fn fai_two_threads_sc() {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    let worker = {
        let mut f = m.function("incr");
        f.rmw(weft::RmwOp::Add, x, 1u64, MemOrdering::AcqRel);
        f.ret(None);
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(worker, 0u64);
        let b = f.spawn(worker, 0u64);
        f.join(a);
        f.join(b);
        let v = f.load_ord(x, MemOrdering::Acquire);
        let ok = f.cmp(weft::ir::CmpOp::Eq, v, 2u64);
        f.assert(ok);
        f.ret(None);
    }
    let res = check(MemoryModel::Sc, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 2);
}

/// Read-read coherence: a later read of the same thread may not observe
/// an older store than an earlier one. With the coherence order of the
/// two stores fixed by program order, exactly the six monotone rf pairs
/// remain.
#[test]
fn coherence_read_read_rc11() {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    let writer = {
        let mut f = m.function("writer");
        f.store_ord(x, 1u64, MemOrdering::Relaxed);
        f.store_ord(x, 2u64, MemOrdering::Relaxed);
        f.ret(None);
        f.id()
    };
    let reader = {
        let mut f = m.function("reader");
        let a = f.load_ord(x, MemOrdering::Relaxed);
        let b = f.load_ord(x, MemOrdering::Relaxed);
        let s = f.bin(weft::ir::BinOp::Add, a, b);
        f.ret(Some(s.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(writer, 0u64);
        let b = f.spawn(reader, 0u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 6);
}

/// Two threads meet at a barrier and both get past it; arrival orders
/// are equivalent, so a single execution remains and nobody stays
/// blocked.
#[test]
fn barrier_two_threads() {
    let mut m = ModuleBuilder::new();
    let bar = m.global("bar", 4, 0);
    let worker = {
        let mut f = m.function("worker");
        let serial = f.call("barrier_wait", vec![bar]);
        f.ret(Some(serial.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        f.call_void("barrier_init", vec![bar, 2u64.into()]);
        let a = f.spawn(worker, 0u64);
        let b = f.spawn(worker, 1u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 1);
    assert_eq!(res.explored_blocked, 0);
}

/// `mutex_trylock` on a held lock fails without blocking.
#[test]
fn trylock_on_held_lock_fails() {
    let mut m = ModuleBuilder::new();
    let lock = m.global("lock", 4, 0);
    {
        let mut f = m.function("main");
        f.call_void("mutex_lock", vec![lock]);
        let r = f.call("mutex_trylock", vec![lock]);
        let busy = f.cmp(weft::ir::CmpOp::Ne, r, 0u64);
        f.assert(busy);
        f.call_void("mutex_unlock", vec![lock]);
        f.ret(None);
    }
    let res = check(MemoryModel::Sc, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 1);
}

/// A spinloop on a variable nobody writes can spin forever; with the
/// liveness check on, that is an error.
#[test]
fn liveness_violation_is_reported() {
    let mut m = ModuleBuilder::new();
    let x = m.global("x", 4, 0);
    {
        let mut f = m.function("main");
        f.call_void("spin_start", vec![]);
        let _ = f.load_ord(x, MemOrdering::Acquire);
        f.call_void("potential_spin_end", vec![]);
        f.ret(None);
    }
    let mut config = Config::default();
    config.model = MemoryModel::Rc11;
    config.check_liveness = true;
    let res = weft::verify(&config, m.build());
    assert_eq!(res.error.map(|e| e.kind), Some(VerificationError::Liveness));
}

/// Parallel exploration partitions the same search: the summed counters
/// match the sequential run.
#[test]
fn parallel_exploration_matches_sequential() {
    let sequential = check(MemoryModel::Rc11, store_buffering());
    let mut config = Config::default();
    config.model = MemoryModel::Rc11;
    config.threads = 2;
    let parallel = weft::verify(&config, store_buffering());
    assert!(parallel.error.is_none());
    assert_eq!(parallel.explored, sequential.explored);
    assert_eq!(parallel.explored_blocked, sequential.explored_blocked);
}

/// An annotated load lets the driver skip rf options that immediately
/// fail the following assume.
#[test]
fn annotated_load_prunes_blocking_values() {
    let mut m = ModuleBuilder::new();
    let data = m.global("data", 4, 0);
    let flag = m.global("flag", 4, 0);
    let writer = {
        let mut f = m.function("writer");
        f.store(data, 7u64);
        f.store_ord(flag, 1u64, MemOrdering::Release);
        f.ret(None);
        f.id()
    };
    let reader = {
        let mut f = m.function("reader");
        let v = f.load_ord(flag, MemOrdering::Acquire);
        f.annotate(weft::Annot::Ne(weft::SVal::UInt(0)));
        f.call_void("assume", vec![v.into()]);
        let r = f.load(data);
        f.ret(Some(r.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(writer, 0u64);
        let b = f.spawn(reader, 0u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 1);
}

/// `nondet_int` draws from the seeded generator, so runs are
/// reproducible.
#[test]
fn nondet_is_deterministic_per_seed() {
    fn build() -> Module {
        let mut m = ModuleBuilder::new();
        let x = m.global("x", 4, 0);
        {
            let mut f = m.function("main");
            let v = f.call("nondet_int", vec![]);
            f.store(x, v);
            let r = f.load(x);
            let same = f.cmp(weft::ir::CmpOp::Eq, r, v);
            f.assert(same);
            f.ret(None);
        }
        m.build()
    }
    let a = check(MemoryModel::Rc11, build());
    let b = check(MemoryModel::Rc11, build());
    assert!(a.error.is_none() && b.error.is_none());
    assert_eq!(a.explored, b.explored);
    assert_eq!(a.explored, 1);
}

/// Modeled file operations: data written to a file is read back, and the
/// sync events do not disturb the exploration.
#[test]
fn file_roundtrip() {
    let mut m = ModuleBuilder::new();
    {
        let mut f = m.function("main");
        let fd = f.call("open", vec![1u64.into()]);
        f.call_void("write", vec![fd.into(), 42u64.into()]);
        f.call_void("fsync", vec![fd.into()]);
        let r = f.call("read", vec![fd.into()]);
        let ok = f.cmp(weft::ir::CmpOp::Eq, r, 42u64);
        f.assert(ok);
        f.call_void("close", vec![fd.into()]);
        f.call_void("sync", vec![]);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 1);
}

/// A failed system call sets errno and, when escalation is on, raises a
/// verification error.
#[test]
fn system_error_escalates_when_configured() {
    let mut m = ModuleBuilder::new();
    {
        let mut f = m.function("main");
        let fd = f.call("open", vec![1u64.into()]);
        f.call_void("close", vec![fd.into()]);
        f.call_void("close", vec![fd.into()]);
        f.ret(None);
    }
    let mut config = Config::default();
    config.model = MemoryModel::Rc11;
    config.stop_on_system_error = true;
    let res = weft::verify(&config, m.build());
    assert_eq!(
        res.error.map(|e| e.kind),
        Some(VerificationError::SystemError(
            weft::SystemErrorKind::Badf
        ))
    );
}

/// Library observations explore their rf options like ordinary accesses.
#[test]
fn library_read_observes_both_options() {
    let mut m = ModuleBuilder::new();
    let q = m.global("q", 4, 0);
    let producer = {
        let mut f = m.function("producer");
        f.call_void("lib_write", vec![q, 1u64.into(), 1u64.into()]);
        f.ret(None);
        f.id()
    };
    let consumer = {
        let mut f = m.function("consumer");
        let v = f.call("lib_read", vec![q]);
        f.ret(Some(v.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(producer, 0u64);
        let b = f.spawn(consumer, 0u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Rc11, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 2);
}

/// Symmetry reduction never explores more than the full search.
#[test]
fn symmetry_reduction_prunes() {
    fn build() -> Module {
        let mut m = ModuleBuilder::new();
        let x = m.global("x", 4, 0);
        let writer = {
            let mut f = m.function("writer");
            f.store_ord(x, 1u64, MemOrdering::Relaxed);
            f.ret(None);
            f.id()
        };
        let reader = {
            let mut f = m.function("reader");
            let v = f.load_ord(x, MemOrdering::Relaxed);
            f.ret(Some(v.into()));
            f.id()
        };
        {
            let mut f = m.function("main");
            let w = f.spawn(writer, 0u64);
            let a = f.spawn(reader, 0u64);
            let b = f.spawn(reader, 0u64);
            f.join(w);
            f.join(a);
            f.join(b);
            f.ret(None);
        }
        m.build()
    }
    let full = check(MemoryModel::Rc11, build());
    let mut config = Config::default();
    config.model = MemoryModel::Rc11;
    config.symmetry_reduction = true;
    let reduced = weft::verify(&config, build());
    assert!(full.error.is_none() && reduced.error.is_none());
    assert!(reduced.explored >= 1);
    assert!(reduced.explored <= full.explored);
}

/// Lock-aware partial order reduction drives critical sections through
/// the lock-event ordering.
#[test]
fn lapor_smoke() {
    let mut m = ModuleBuilder::new();
    let lock = m.global("lock", 4, 0);
    let c = m.global("c", 4, 0);
    let worker = {
        let mut f = m.function("worker");
        f.call_void("mutex_lock", vec![lock]);
        let v = f.load_ord(c, MemOrdering::Relaxed);
        let inc = f.bin(weft::ir::BinOp::Add, v, 1u64);
        f.store_ord(c, inc, MemOrdering::Relaxed);
        f.call_void("mutex_unlock", vec![lock]);
        f.ret(None);
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(worker, 0u64);
        let b = f.spawn(worker, 1u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let mut config = Config::default();
    config.model = MemoryModel::Rc11;
    config.lapor = true;
    let res = weft::verify(&config, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert!(res.explored + res.explored_blocked >= 1);
}

/// The IMM model explores the same executions as RC11 on this
/// data-race-free shape.
#[test]
fn message_passing_imm() {
    let mut m = ModuleBuilder::new();
    let data = m.global("data", 4, 0);
    let flag = m.global("flag", 4, 0);
    let writer = {
        let mut f = m.function("writer");
        f.store_ord(data, 42u64, MemOrdering::Relaxed);
        f.store_ord(flag, 1u64, MemOrdering::Release);
        f.ret(None);
        f.id()
    };
    let reader = {
        let mut f = m.function("reader");
        let v = f.load_ord(flag, MemOrdering::Acquire);
        f.call_void("assume", vec![v.into()]);
        let r = f.load_ord(data, MemOrdering::Relaxed);
        f.ret(Some(r.into()));
        f.id()
    };
    {
        let mut f = m.function("main");
        let a = f.spawn(writer, 0u64);
        let b = f.spawn(reader, 0u64);
        f.join(a);
        f.join(b);
        f.ret(None);
    }
    let res = check(MemoryModel::Imm, m.build());
    assert!(res.error.is_none(), "unexpected error: {:?}", res.error);
    assert_eq!(res.explored, 1);
}
