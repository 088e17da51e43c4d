//! The cooperative interpreter.
//!
//! Program threads are interpreter-level contexts, not host threads: the
//! driver picks one thread between steps and the interpreter advances it
//! by exactly one instruction. Memory and synchronization instructions
//! call back into the driver, which owns the execution graph; pure
//! instructions only touch the thread's frame. When the driver has cut
//! the graph and resumes, execution runs in replay mode: events already
//! recorded in the graph are elided and their recorded effects reused.

use crate::config::MemoryModel;
use crate::deps::DepTracker;
use crate::driver::Driver;
use crate::errors::{BlockageType, SystemErrorKind, VerificationError};
use crate::event::Event;
use crate::graph::ExecutionGraph;
use crate::ir::{BinOp, BlockId, Callee, CastKind, CmpOp, FuncId, Inst, InstPos, Module, Operand, ValueId};
use crate::label::{LabelKind, MemOrdering, ReadKind, RmwOp, WriteKind};
use crate::mem::{SAddr, SAddrAllocator};
use crate::value::{ASize, AType, SVal};
use rustc_hash::FxHashMap;

/// One activation record of a thread.
#[derive(Clone, Debug)]
pub(crate) struct Frame {
    pub func: FuncId,
    pub block: BlockId,
    pub prev_block: Option<BlockId>,
    pub inst: usize,
    pub locals: FxHashMap<ValueId, SVal>,
    pub ret_dst: Option<ValueId>,
}

impl Frame {
    fn new(func: FuncId, ret_dst: Option<ValueId>) -> Frame {
        Frame {
            func,
            block: BlockId(0),
            prev_block: None,
            inst: 0,
            locals: FxHashMap::default(),
            ret_dst,
        }
    }
}

/// The interpreter-side state of one program thread.
#[derive(Clone, Debug)]
pub(crate) struct ThreadState {
    pub id: u32,
    pub parent: u32,
    pub func: FuncId,
    pub arg: SVal,
    pub frames: Vec<Frame>,
    /// The event index of the last emitted (or replayed) event.
    pub index: u32,
    pub blocked: Option<BlockageType>,
    pub finished: bool,
    pub ret_val: SVal,
    rng: oorandom::Rand64,
}

impl ThreadState {
    fn new(id: u32, parent: u32, func: FuncId, arg: SVal, seed: u64) -> ThreadState {
        let mut t = ThreadState {
            id,
            parent,
            func,
            arg,
            frames: Vec::new(),
            index: 0,
            blocked: None,
            finished: false,
            ret_val: SVal::zero(),
            rng: oorandom::Rand64::new(seed as u128),
        };
        t.reset(seed);
        t
    }

    fn reset(&mut self, seed: u64) {
        let mut frame = Frame::new(self.func, None);
        frame.locals.insert(ValueId(0), self.arg);
        self.frames = vec![frame];
        self.index = 0;
        self.blocked = None;
        self.finished = false;
        // ret_val persists across resets: a thread whose recorded
        // execution stayed complete is never rescheduled, and joins read
        // the value from its last full run.
        self.rng = oorandom::Rand64::new((seed as u128) << 32 | self.id as u128);
    }
}

/// All interpreter state: threads, static memory layout, modeled files.
/// Cloned wholesale when an exploration branches.
#[derive(Clone, Debug)]
pub(crate) struct InterpState {
    pub threads: Vec<ThreadState>,
    pub global_addrs: Vec<SAddr>,
    mem_init: FxHashMap<SAddr, SVal>,
    pub errno_addr: SAddr,
    /// Modeled filesystem: file identifier to inode address.
    fs: FxHashMap<u64, SAddr>,
    fds: Vec<Option<SAddr>>,
    seed: u64,
    sched_rng: oorandom::Rand64,
    pub deps: DepTracker,
}

const MAX_FDS: usize = 64;

impl InterpState {
    /// Lays out static storage for `module` and sets up the main thread.
    pub(crate) fn new(module: &Module, alloc: &mut SAddrAllocator, seed: u64) -> InterpState {
        let mut global_addrs = Vec::with_capacity(module.globals.len());
        let mut mem_init = FxHashMap::default();
        for g in &module.globals {
            let addr = alloc.alloc_static(g.size, 8, false);
            mem_init.insert(addr, g.init);
            global_addrs.push(addr);
        }
        let errno_addr = alloc.alloc_static(8, 8, true);

        let main = module
            .function_named("main")
            .expect("module has no main function");
        InterpState {
            threads: vec![ThreadState::new(0, 0, main, SVal::zero(), seed)],
            global_addrs,
            mem_init,
            errno_addr,
            fs: FxHashMap::default(),
            fds: Vec::new(),
            seed,
            sched_rng: oorandom::Rand64::new(seed as u128 ^ 0x5eed),
            deps: DepTracker::new(false),
        }
    }

    /// A placeholder state, used only while local state is released
    /// around a branch.
    pub(crate) fn empty() -> InterpState {
        InterpState {
            threads: Vec::new(),
            global_addrs: Vec::new(),
            mem_init: FxHashMap::default(),
            errno_addr: SAddr::null(),
            fs: FxHashMap::default(),
            fds: Vec::new(),
            seed: 0,
            sched_rng: oorandom::Rand64::new(0),
            deps: DepTracker::new(false),
        }
    }

    pub(crate) fn set_dep_tracking(&mut self, model: MemoryModel) {
        self.deps = DepTracker::new(model == MemoryModel::Imm);
    }

    /// Re-initializes every thread for a fresh run over `graph`. Threads
    /// whose graph events were entirely cut stay dormant until their
    /// creating event re-executes.
    pub(crate) fn reset(&mut self, graph: &ExecutionGraph) {
        self.threads.truncate(graph.num_threads().max(1));
        let seed = self.seed;
        for (i, t) in self.threads.iter_mut().enumerate() {
            t.reset(seed);
            if i != 0 && graph.thread_len(i as u32) == 0 {
                t.frames.clear();
            }
        }
        self.deps = DepTracker::new(self.deps.is_active());
        self.fds.clear();
    }

    pub(crate) fn thread(&self, tid: u32) -> &ThreadState {
        &self.threads[tid as usize]
    }

    fn thread_mut(&mut self, tid: u32) -> &mut ThreadState {
        &mut self.threads[tid as usize]
    }

    /// Registers (or re-registers) a thread created by `parent`.
    pub(crate) fn ensure_thread(&mut self, tid: u32, parent: u32, func: FuncId, arg: SVal) {
        let seed = self.seed;
        if (tid as usize) >= self.threads.len() {
            while (self.threads.len() as u32) < tid {
                let filler = self.threads.len() as u32;
                self.threads
                    .push(ThreadState::new(filler, 0, func, SVal::zero(), seed));
                self.threads.last_mut().unwrap().finished = true;
            }
            self.threads
                .push(ThreadState::new(tid, parent, func, arg, seed));
            return;
        }
        let t = &mut self.threads[tid as usize];
        if t.frames.is_empty() && !t.finished {
            // The thread was dormant after a cut; revive it.
            t.parent = parent;
            t.func = func;
            t.arg = arg;
            t.reset(seed);
            self.deps.clear_thread(tid);
        }
    }

    pub(crate) fn is_runnable(&self, tid: u32) -> bool {
        self.threads
            .get(tid as usize)
            .map_or(false, |t| !t.finished && t.blocked.is_none() && !t.frames.is_empty())
    }

    pub(crate) fn blockage(&self, tid: u32) -> Option<BlockageType> {
        self.threads.get(tid as usize).and_then(|t| t.blocked)
    }

    pub(crate) fn any_blocked(&self) -> bool {
        self.threads.iter().any(|t| t.blocked.is_some())
    }

    pub(crate) fn all_blockages_are(&self, kind: BlockageType) -> bool {
        self.threads
            .iter()
            .filter_map(|t| t.blocked)
            .all(|b| b == kind)
    }

    pub(crate) fn block_thread(&mut self, tid: u32, kind: BlockageType) {
        if let Some(t) = self.threads.get_mut(tid as usize) {
            if t.blocked.is_none() {
                t.blocked = Some(kind);
            }
        }
    }

    pub(crate) fn unblock_thread(&mut self, tid: u32) {
        if let Some(t) = self.threads.get_mut(tid as usize) {
            t.blocked = None;
        }
    }

    /// Join-blocked threads re-evaluate whenever some thread finishes.
    pub(crate) fn unblock_joiners(&mut self) {
        for t in &mut self.threads {
            if t.blocked == Some(BlockageType::Join) {
                t.blocked = None;
            }
        }
    }

    pub(crate) fn finish_thread(&mut self, tid: u32, ret: SVal) {
        let t = self.thread_mut(tid);
        t.finished = true;
        t.frames.clear();
        t.ret_val = ret;
    }

    pub(crate) fn thread_ret_val(&self, tid: u32) -> SVal {
        self.threads[tid as usize].ret_val
    }

    pub(crate) fn thread_matches(&self, tid: u32, parent: u32, func: FuncId, arg: SVal) -> bool {
        self.threads
            .get(tid as usize)
            .map_or(false, |t| t.parent == parent && t.func == func && t.arg == arg)
    }

    /// The position of the event the current instruction is producing.
    pub(crate) fn current_pos(&self, tid: u32) -> Event {
        Event::new(tid, self.threads[tid as usize].index)
    }

    /// Advances the thread's event counter and reports whether the event
    /// at the new position is already recorded in the graph.
    pub(crate) fn is_execution_driven_by_graph(
        &mut self,
        graph: &ExecutionGraph,
        tid: u32,
    ) -> bool {
        let t = self.thread_mut(tid);
        t.index += 1;
        let curr = Event::new(tid, t.index);
        graph.contains(curr) && !graph.label(curr).is_empty_label()
    }

    /// The initial value of a memory location.
    pub(crate) fn loc_init_val(&self, addr: SAddr) -> SVal {
        self.mem_init.get(&addr).copied().unwrap_or_default()
    }

    pub(crate) fn rand_below(&mut self, n: u32) -> u32 {
        self.sched_rng.rand_range(0..n as u64) as u32
    }

    /// Whether `tid`'s next instruction may act as a load (calls are
    /// overapproximated, since many internal operations read).
    pub(crate) fn next_inst_is_load(&self, module: &Module, tid: u32) -> bool {
        let t = match self.threads.get(tid as usize) {
            Some(t) => t,
            None => return false,
        };
        let f = match t.frames.last() {
            Some(f) => f,
            None => return false,
        };
        match module.func(f.func).blocks[f.block.0 as usize].insts.get(f.inst) {
            Some(Inst::Load { .. })
            | Some(Inst::AtomicRmw { .. })
            | Some(Inst::CmpXchg { .. })
            | Some(Inst::Call { .. }) => true,
            _ => false,
        }
    }
}

/// Applies an RMW operator to the old value.
pub(crate) fn apply_rmw_op(op: RmwOp, old: SVal, operand: SVal) -> SVal {
    let (a, b) = (old.bits(), operand.bits());
    let r = match op {
        RmwOp::Add => a.wrapping_add(b),
        RmwOp::Sub => a.wrapping_sub(b),
        RmwOp::And => a & b,
        RmwOp::Or => a | b,
        RmwOp::Xor => a ^ b,
        RmwOp::Xchg => b,
        RmwOp::Max => {
            if (a as i64) >= (b as i64) {
                a
            } else {
                b
            }
        }
        RmwOp::Min => {
            if (a as i64) <= (b as i64) {
                a
            } else {
                b
            }
        }
        RmwOp::UMax => a.max(b),
        RmwOp::UMin => a.min(b),
    };
    SVal::UInt(r)
}

fn apply_bin_op(op: BinOp, l: SVal, r: SVal) -> SVal {
    let (a, b) = (l.bits(), r.bits());
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::UDiv => {
            if b == 0 {
                0
            } else {
                a / b
            }
        }
        BinOp::SDiv => {
            if b == 0 {
                0
            } else {
                ((a as i64).wrapping_div(b as i64)) as u64
            }
        }
        BinOp::URem => {
            if b == 0 {
                0
            } else {
                a % b
            }
        }
        BinOp::SRem => {
            if b == 0 {
                0
            } else {
                ((a as i64).wrapping_rem(b as i64)) as u64
            }
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::LShr => a.wrapping_shr(b as u32),
        BinOp::AShr => ((a as i64).wrapping_shr(b as u32)) as u64,
    };
    SVal::UInt(v)
}

fn apply_cmp_op(op: CmpOp, l: SVal, r: SVal) -> SVal {
    let (a, b) = (l.bits(), r.bits());
    let (sa, sb) = (a as i64, b as i64);
    let v = match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Ult => a < b,
        CmpOp::Ule => a <= b,
        CmpOp::Ugt => a > b,
        CmpOp::Uge => a >= b,
        CmpOp::Slt => sa < sb,
        CmpOp::Sle => sa <= sb,
        CmpOp::Sgt => sa > sb,
        CmpOp::Sge => sa >= sb,
    };
    SVal::UInt(v as u64)
}

impl Driver {
    fn eval(&self, tid: u32, op: Operand) -> SVal {
        match op {
            Operand::Value(v) => self
                .interp
                .thread(tid)
                .frames
                .last()
                .and_then(|f| f.locals.get(&v))
                .copied()
                .unwrap_or_default(),
            Operand::Const(c) => c,
            Operand::Global(i) => SVal::Ptr(self.interp.global_addrs[i as usize]),
            Operand::Fn(f) => SVal::UInt(f.0 as u64),
        }
    }

    fn set_local(&mut self, tid: u32, dst: ValueId, val: SVal) {
        if let Some(f) = self.interp.threads[tid as usize].frames.last_mut() {
            f.locals.insert(dst, val);
        }
    }

    fn operand_value_id(op: Operand) -> Option<ValueId> {
        match op {
            Operand::Value(v) => Some(v),
            _ => None,
        }
    }

    fn copy_operand_deps(&mut self, tid: u32, dst: ValueId, ops: &[Operand]) {
        for op in ops {
            if let Some(v) = Self::operand_value_id(*op) {
                self.interp.deps.copy_value_deps(tid, dst, v);
            }
        }
    }

    /// Advances thread `tid` by one instruction. When the step blocks the
    /// thread, its program counter and event counter are rolled back so
    /// the instruction re-executes (graph-driven) once unblocked.
    pub(crate) fn execute_step(&mut self, tid: u32) {
        let module = self.module.clone();
        let (func, block, inst_idx, frame_idx, index_snapshot) = {
            let t = self.interp.thread(tid);
            let f = t.frames.last().expect("scheduled thread has no frame");
            (f.func, f.block, f.inst, t.frames.len() - 1, t.index)
        };
        let inst = module.func(func).blocks[block.0 as usize].insts[inst_idx].clone();
        self.interp.threads[tid as usize]
            .frames
            .last_mut()
            .unwrap()
            .inst += 1;

        let pos = InstPos {
            func,
            block,
            inst: inst_idx as u32,
        };
        self.exec_inst(tid, pos, &inst);

        let t = &mut self.interp.threads[tid as usize];
        if t.blocked.is_some() && !t.finished {
            if let Some(f) = t.frames.get_mut(frame_idx) {
                f.inst = inst_idx;
            }
            t.index = index_snapshot;
        }
    }

    fn exec_inst(&mut self, tid: u32, pos: InstPos, inst: &Inst) {
        match inst {
            Inst::Bin { dst, op, lhs, rhs } => {
                let v = apply_bin_op(*op, self.eval(tid, *lhs), self.eval(tid, *rhs));
                self.set_local(tid, *dst, v);
                self.copy_operand_deps(tid, *dst, &[*lhs, *rhs]);
            }
            Inst::Cmp { dst, op, lhs, rhs } => {
                let v = apply_cmp_op(*op, self.eval(tid, *lhs), self.eval(tid, *rhs));
                self.set_local(tid, *dst, v);
                self.copy_operand_deps(tid, *dst, &[*lhs, *rhs]);
            }
            Inst::Cast {
                dst,
                kind,
                src,
                size,
            } => {
                let v = self.eval(tid, *src);
                let out = match kind {
                    CastKind::ZExt | CastKind::PtrToInt | CastKind::IntToPtr => v,
                    CastKind::Trunc => SVal::UInt(v.bits() & size.mask()),
                    CastKind::SExt => {
                        let bits = size.bits();
                        let shifted = (v.bits() << (64 - bits)) as i64 >> (64 - bits);
                        SVal::Int(shifted)
                    }
                };
                self.set_local(tid, *dst, out);
                self.copy_operand_deps(tid, *dst, &[*src]);
            }
            Inst::Select {
                dst,
                cond,
                tval,
                fval,
            } => {
                let c = self.eval(tid, *cond);
                let v = if c.bits() != 0 {
                    self.eval(tid, *tval)
                } else {
                    self.eval(tid, *fval)
                };
                self.set_local(tid, *dst, v);
                self.copy_operand_deps(tid, *dst, &[*cond, *tval, *fval]);
            }
            Inst::Phi { dst, incoming } => {
                // Phis at a block head are folded by `jump`; a stray phi
                // evaluates against the recorded predecessor.
                let prev = self.interp.thread(tid).frames.last().and_then(|f| f.prev_block);
                let v = incoming
                    .iter()
                    .find(|(b, _)| Some(*b) == prev)
                    .map(|(_, op)| self.eval(tid, *op))
                    .unwrap_or_default();
                self.set_local(tid, *dst, v);
            }
            Inst::Gep {
                dst,
                base,
                offset,
                scale,
            } => {
                let b = self.eval(tid, *base);
                let off = self.eval(tid, *offset).bits().wrapping_mul(*scale);
                self.set_local(tid, *dst, SVal::Ptr(b.to_addr().offset(off)));
                self.copy_operand_deps(tid, *dst, &[*base, *offset]);
            }
            Inst::Alloca { dst, size, align } => {
                let v = self.visit_malloc(tid, *size, *align, true, None);
                self.set_local(tid, *dst, v);
                if self.interp.deps.is_active() {
                    let e = self.interp.current_pos(tid);
                    self.interp.deps.set_value_event(tid, *dst, e);
                }
            }
            Inst::Load {
                dst,
                addr,
                ord,
                size,
            } => {
                let a = self.eval(tid, *addr).to_addr();
                let annot = self.module.info.annots.get(&pos).copied();
                if let Some(v) = Self::operand_value_id(*addr) {
                    self.interp.deps.add_addr_po_from_value(tid, v);
                }
                let deps = self
                    .interp
                    .deps
                    .snapshot(tid, Self::operand_value_id(*addr), None);
                if let Some(v) = self.visit_load(
                    tid,
                    *ord,
                    a,
                    *size,
                    AType::Unsigned,
                    ReadKind::Plain,
                    annot,
                    deps,
                ) {
                    self.set_local(tid, *dst, v);
                    if self.interp.deps.is_active() {
                        let e = self.interp.current_pos(tid);
                        self.interp.deps.set_value_event(tid, *dst, e);
                    }
                }
            }
            Inst::Store {
                addr,
                val,
                ord,
                size,
            } => {
                let a = self.eval(tid, *addr).to_addr();
                let v = self.eval(tid, *val);
                if let Some(av) = Self::operand_value_id(*addr) {
                    self.interp.deps.add_addr_po_from_value(tid, av);
                }
                let deps = self.interp.deps.snapshot(
                    tid,
                    Self::operand_value_id(*addr),
                    Self::operand_value_id(*val),
                );
                self.visit_store(
                    tid,
                    *ord,
                    a,
                    *size,
                    AType::Unsigned,
                    v,
                    WriteKind::Plain,
                    deps,
                );
            }
            Inst::AtomicRmw {
                dst,
                op,
                addr,
                val,
                ord,
                size,
            } => {
                let a = self.eval(tid, *addr).to_addr();
                let v = self.eval(tid, *val);
                let deps = self.interp.deps.snapshot(
                    tid,
                    Self::operand_value_id(*addr),
                    Self::operand_value_id(*val),
                );
                let old = self.visit_load(
                    tid,
                    *ord,
                    a,
                    *size,
                    AType::Unsigned,
                    ReadKind::Fai { op: *op, val: v },
                    None,
                    deps.clone(),
                );
                if let Some(old) = old {
                    if self.interp.blockage(tid).is_none() && !self.halt {
                        let new = apply_rmw_op(*op, old, v);
                        self.visit_store(
                            tid,
                            *ord,
                            a,
                            *size,
                            AType::Unsigned,
                            new,
                            WriteKind::Fai,
                            deps,
                        );
                    }
                    self.set_local(tid, *dst, old);
                }
            }
            Inst::CmpXchg {
                dst,
                addr,
                expected,
                swap,
                ord,
                size,
            } => {
                let a = self.eval(tid, *addr).to_addr();
                let exp = self.eval(tid, *expected);
                let sw = self.eval(tid, *swap);
                if let Some(v) = Self::operand_value_id(*expected) {
                    self.interp.deps.add_cas_from_value(tid, v);
                }
                let deps = self.interp.deps.snapshot(
                    tid,
                    Self::operand_value_id(*addr),
                    Self::operand_value_id(*swap),
                );
                let old = self.visit_load(
                    tid,
                    *ord,
                    a,
                    *size,
                    AType::Unsigned,
                    ReadKind::Cas {
                        expected: exp,
                        swap: sw,
                    },
                    None,
                    deps.clone(),
                );
                if let Some(old) = old {
                    if old.bits_eq(exp, *size) && self.interp.blockage(tid).is_none() && !self.halt
                    {
                        self.visit_store(
                            tid,
                            *ord,
                            a,
                            *size,
                            AType::Unsigned,
                            sw,
                            WriteKind::Cas,
                            deps,
                        );
                    }
                    self.set_local(tid, *dst, old);
                }
            }
            Inst::Fence { ord } => self.visit_fence(tid, *ord),
            Inst::Br { target } => self.jump(tid, *target),
            Inst::CondBr {
                cond,
                then_b,
                else_b,
            } => {
                let c = self.eval(tid, *cond);
                if let Some(v) = Self::operand_value_id(*cond) {
                    self.interp.deps.add_ctrl_from_value(tid, v);
                }
                let target = if c.bits() != 0 { *then_b } else { *else_b };
                self.jump(tid, target);
            }
            Inst::Switch {
                cond,
                cases,
                default,
            } => {
                let c = self.eval(tid, *cond).bits();
                if let Some(v) = Self::operand_value_id(*cond) {
                    self.interp.deps.add_ctrl_from_value(tid, v);
                }
                let target = cases
                    .iter()
                    .find(|(k, _)| *k == c)
                    .map(|(_, b)| *b)
                    .unwrap_or(*default);
                self.jump(tid, target);
            }
            Inst::Ret { val } => {
                let v = match val {
                    Some(op) => self.eval(tid, *op),
                    None => SVal::zero(),
                };
                let frame = self.interp.threads[tid as usize]
                    .frames
                    .pop()
                    .expect("ret without frame");
                if self.interp.threads[tid as usize].frames.is_empty() {
                    self.visit_thread_finish(tid, v);
                } else if let Some(dst) = frame.ret_dst {
                    self.set_local(tid, dst, v);
                }
            }
            Inst::Unreachable => {
                let e = self.graph.last_thread_event(tid);
                self.visit_error(VerificationError::Safety, e);
            }
            Inst::Call { dst, callee, args } => self.exec_call(tid, *dst, callee, args),
        }
    }

    fn jump(&mut self, tid: u32, target: BlockId) {
        let module = self.module.clone();
        let (func, from) = {
            let f = self.interp.threads[tid as usize].frames.last_mut().unwrap();
            let from = f.block;
            f.prev_block = Some(from);
            f.block = target;
            f.inst = 0;
            (f.func, from)
        };
        // Fold the block's leading phis atomically.
        let insts = &module.func(func).blocks[target.0 as usize].insts;
        let mut assigned: Vec<(ValueId, SVal)> = Vec::new();
        let mut n = 0;
        for inst in insts {
            if let Inst::Phi { dst, incoming } = inst {
                let v = incoming
                    .iter()
                    .find(|(b, _)| *b == from)
                    .map(|(_, op)| self.eval(tid, *op))
                    .unwrap_or_default();
                assigned.push((*dst, v));
                n += 1;
            } else {
                break;
            }
        }
        for (dst, v) in assigned {
            self.set_local(tid, dst, v);
        }
        self.interp.threads[tid as usize]
            .frames
            .last_mut()
            .unwrap()
            .inst = n;
    }

    fn push_call_frame(&mut self, tid: u32, func: FuncId, args: &[SVal], ret_dst: Option<ValueId>) {
        let mut frame = Frame::new(func, ret_dst);
        let params = self.module.func(func).params.clone();
        for (p, v) in params.iter().zip(args) {
            frame.locals.insert(*p, *v);
        }
        self.interp.threads[tid as usize].frames.push(frame);
    }

    fn exec_call(&mut self, tid: u32, dst: Option<ValueId>, callee: &Callee, args: &[Operand]) {
        let vals: Vec<SVal> = args.iter().map(|&a| self.eval(tid, a)).collect();
        match callee {
            Callee::Func(f) => self.push_call_frame(tid, *f, &vals, dst),
            Callee::Named(name) => {
                if let Some(f) = self.module.function_named(name) {
                    self.push_call_frame(tid, f, &vals, dst);
                    return;
                }
                let ret = self.exec_builtin(tid, name, args, &vals);
                if let (Some(dst), Some(v)) = (dst, ret) {
                    self.set_local(tid, dst, v);
                }
            }
        }
    }

    /// The internal-operation table; anything unknown is an external pure
    /// function returning zero.
    fn exec_builtin(
        &mut self,
        tid: u32,
        name: &str,
        args: &[Operand],
        vals: &[SVal],
    ) -> Option<SVal> {
        let size = ASize::new(4);
        match name {
            "malloc" => {
                let v = self.visit_malloc(tid, vals[0].bits().max(1), 8, false, None);
                Some(v)
            }
            "free" => {
                self.visit_free(tid, vals[0].to_addr());
                Some(SVal::zero())
            }
            "assert_fail" => {
                let e = self.graph.last_thread_event(tid);
                self.visit_error(VerificationError::Safety, e);
                Some(SVal::zero())
            }
            "assume" => {
                if vals[0].bits() == 0 {
                    self.interp.block_thread(tid, BlockageType::Assume);
                }
                if let Some(v) = args.first().and_then(|&a| Self::operand_value_id(a)) {
                    self.interp.deps.add_ctrl_from_value(tid, v);
                }
                Some(SVal::zero())
            }
            "nondet_int" => {
                let t = &mut self.interp.threads[tid as usize];
                Some(SVal::UInt(t.rng.rand_range(0..1 << 31)))
            }
            "thread_create" => {
                let func = match args.first() {
                    Some(Operand::Fn(f)) => *f,
                    _ => FuncId(vals[0].bits() as u32),
                };
                let arg = vals.get(1).copied().unwrap_or_default();
                Some(self.visit_thread_create(tid, func, arg))
            }
            "thread_join" => self.visit_thread_join(tid, vals[0].bits() as u32),
            "thread_exit" => {
                self.visit_thread_finish(tid, vals.first().copied().unwrap_or_default());
                None
            }
            "thread_self" => Some(SVal::UInt(tid as u64)),
            "mutex_init" => {
                let deps = self.interp.deps.snapshot(tid, None, None);
                self.visit_store(
                    tid,
                    MemOrdering::NotAtomic,
                    vals[0].to_addr(),
                    size,
                    AType::Unsigned,
                    vals.get(1).copied().unwrap_or_default(),
                    WriteKind::Plain,
                    deps,
                );
                Some(SVal::zero())
            }
            "mutex_lock" => {
                if self.config.lapor {
                    self.visit_lock_lapor(tid, vals[0].to_addr());
                    return Some(SVal::zero());
                }
                self.do_lock(tid, vals[0].to_addr(), size);
                Some(SVal::zero())
            }
            "mutex_trylock" => {
                if self.config.lapor {
                    self.visit_lock_lapor(tid, vals[0].to_addr());
                    return Some(SVal::zero());
                }
                Some(self.do_trylock(tid, vals[0].to_addr(), size))
            }
            "mutex_unlock" => {
                if self.config.lapor {
                    self.visit_unlock_lapor(tid, vals[0].to_addr());
                    return Some(SVal::zero());
                }
                let deps = self.interp.deps.snapshot(tid, None, None);
                self.visit_store(
                    tid,
                    MemOrdering::Release,
                    vals[0].to_addr(),
                    size,
                    AType::Unsigned,
                    SVal::zero(),
                    WriteKind::Unlock,
                    deps,
                );
                Some(SVal::zero())
            }
            "mutex_destroy" => Some(SVal::zero()),
            "barrier_init" => {
                let deps = self.interp.deps.snapshot(tid, None, None);
                self.visit_store(
                    tid,
                    MemOrdering::Release,
                    vals[0].to_addr(),
                    size,
                    AType::Unsigned,
                    vals.get(1).copied().unwrap_or_default(),
                    WriteKind::BInit,
                    deps,
                );
                Some(SVal::zero())
            }
            "barrier_wait" => self.do_barrier_wait(tid, vals[0].to_addr(), size),
            "barrier_destroy" => {
                let deps = self.interp.deps.snapshot(tid, None, None);
                self.visit_store(
                    tid,
                    MemOrdering::Release,
                    vals[0].to_addr(),
                    size,
                    AType::Unsigned,
                    SVal::zero(),
                    WriteKind::BDestroy,
                    deps,
                );
                Some(SVal::zero())
            }
            "spin_start" => {
                self.visit_spin_start(tid);
                Some(SVal::zero())
            }
            "potential_spin_end" => {
                self.visit_potential_spin_end(tid);
                Some(SVal::zero())
            }
            "hp_retire" => {
                if !self.interp.is_execution_driven_by_graph(&self.graph, tid) {
                    let pos = self.interp.current_pos(tid);
                    self.attach_label(crate::label::Label::new(
                        pos,
                        MemOrdering::NotAtomic,
                        LabelKind::HpRetire {
                            freed_addr: vals[0].to_addr(),
                        },
                    ));
                }
                Some(SVal::zero())
            }
            "hp_protect" => {
                if !self.interp.is_execution_driven_by_graph(&self.graph, tid) {
                    let pos = self.interp.current_pos(tid);
                    self.attach_label(crate::label::Label::new(
                        pos,
                        MemOrdering::NotAtomic,
                        LabelKind::HpProtect {
                            protected_addr: vals[0].to_addr(),
                        },
                    ));
                }
                Some(SVal::zero())
            }
            "lib_read" => {
                let deps = self.interp.deps.snapshot(tid, None, None);
                self.visit_load(
                    tid,
                    MemOrdering::Relaxed,
                    vals[0].to_addr(),
                    size,
                    AType::Unsigned,
                    ReadKind::Lib {
                        func: "member".to_string(),
                    },
                    None,
                    deps,
                )
            }
            "lib_write" => {
                let deps = self.interp.deps.snapshot(tid, None, None);
                self.visit_store(
                    tid,
                    MemOrdering::Relaxed,
                    vals[0].to_addr(),
                    size,
                    AType::Unsigned,
                    vals.get(1).copied().unwrap_or_default(),
                    WriteKind::Lib {
                        func: "member".to_string(),
                        is_init: vals.get(2).map_or(false, |v| v.bits() != 0),
                    },
                    deps,
                );
                Some(SVal::zero())
            }
            "open" => Some(self.do_open(tid, vals[0])),
            "close" => Some(self.do_close(tid, vals[0])),
            "read" => self.do_file_read(tid, vals[0], size),
            "write" => Some(self.do_file_write(tid, vals[0], vals.get(1).copied().unwrap_or_default(), size)),
            "fsync" => {
                match self.file_inode(vals[0]) {
                    Some(inode) => {
                        self.visit_dsk_fsync(tid, inode, size);
                        Some(SVal::zero())
                    }
                    None => Some(self.system_error(tid, SystemErrorKind::Badf)),
                }
            }
            "sync" => {
                self.visit_dsk_sync(tid);
                Some(SVal::zero())
            }
            "pbarrier" => {
                self.visit_dsk_pbarrier(tid);
                Some(SVal::zero())
            }
            _ => Some(SVal::zero()),
        }
    }

    fn do_lock(&mut self, tid: u32, addr: SAddr, size: ASize) {
        let deps = self.interp.deps.snapshot(tid, None, None);
        let old = self.visit_load(
            tid,
            MemOrdering::Acquire,
            addr,
            size,
            AType::Unsigned,
            ReadKind::LockCas {
                expected: SVal::zero(),
                swap: SVal::UInt(1),
            },
            None,
            deps.clone(),
        );
        match old {
            Some(v) if v.is_zero(size) => {
                if self.interp.blockage(tid).is_none() && !self.halt {
                    self.visit_store(
                        tid,
                        MemOrdering::Acquire,
                        addr,
                        size,
                        AType::Unsigned,
                        SVal::UInt(1),
                        WriteKind::LockCas,
                        deps,
                    );
                }
            }
            Some(_) => self.interp.block_thread(tid, BlockageType::LockAcq),
            None => {}
        }
    }

    fn do_trylock(&mut self, tid: u32, addr: SAddr, size: ASize) -> SVal {
        let deps = self.interp.deps.snapshot(tid, None, None);
        let old = self.visit_load(
            tid,
            MemOrdering::Acquire,
            addr,
            size,
            AType::Unsigned,
            ReadKind::LockCas {
                expected: SVal::zero(),
                swap: SVal::UInt(1),
            },
            None,
            deps.clone(),
        );
        match old {
            Some(v) if v.is_zero(size) => {
                if self.interp.blockage(tid).is_none() && !self.halt {
                    self.visit_store(
                        tid,
                        MemOrdering::Acquire,
                        addr,
                        size,
                        AType::Unsigned,
                        SVal::UInt(1),
                        WriteKind::LockCas,
                        deps,
                    );
                }
                SVal::zero()
            }
            _ => SVal::UInt(16), // EBUSY
        }
    }

    fn do_barrier_wait(&mut self, tid: u32, addr: SAddr, size: ASize) -> Option<SVal> {
        let deps = self.interp.deps.snapshot(tid, None, None);
        let old = self.visit_load(
            tid,
            MemOrdering::AcqRel,
            addr,
            size,
            AType::Unsigned,
            ReadKind::BIncFai {
                op: RmwOp::Sub,
                val: SVal::UInt(1),
            },
            None,
            deps.clone(),
        )?;
        if self.interp.blockage(tid).is_some() || self.halt {
            return None;
        }
        let new = apply_rmw_op(RmwOp::Sub, old, SVal::UInt(1));
        self.visit_store(
            tid,
            MemOrdering::AcqRel,
            addr,
            size,
            AType::Unsigned,
            new,
            WriteKind::BIncFai,
            deps.clone(),
        );
        let last_round = new.is_zero(size);
        self.visit_load(
            tid,
            MemOrdering::Acquire,
            addr,
            size,
            AType::Unsigned,
            ReadKind::BWait,
            None,
            deps,
        )?;
        Some(SVal::UInt(last_round as u64))
    }

    /* ---------------- modeled file operations ---------------- */

    fn set_errno(&mut self, tid: u32, kind: SystemErrorKind) {
        let addr = self.interp.errno_addr;
        let deps = self.interp.deps.snapshot(tid, None, None);
        self.visit_store(
            tid,
            MemOrdering::NotAtomic,
            addr,
            ASize::new(8),
            AType::Signed,
            SVal::Int(kind.errno()),
            WriteKind::Plain,
            deps,
        );
    }

    /// Sets `errno`, optionally escalates, and returns the canonical
    /// negative code.
    fn system_error(&mut self, tid: u32, kind: SystemErrorKind) -> SVal {
        self.set_errno(tid, kind);
        if self.config.stop_on_system_error {
            let e = self.graph.last_thread_event(tid);
            self.visit_error(VerificationError::SystemError(kind), e);
        }
        SVal::Int(-1)
    }

    fn file_inode(&self, fd: SVal) -> Option<SAddr> {
        self.interp
            .fds
            .get(fd.bits() as usize)
            .copied()
            .flatten()
    }

    fn do_open(&mut self, tid: u32, name: SVal) -> SVal {
        if self.interp.fds.iter().filter(|f| f.is_some()).count() >= MAX_FDS {
            return self.system_error(tid, SystemErrorKind::Mfile);
        }
        let inode = match self.interp.fs.get(&name.bits()) {
            Some(&i) => i,
            None => {
                let i = self.alloc.alloc_heap(64, 8, true);
                self.interp.fs.insert(name.bits(), i);
                i
            }
        };
        let fd = match self.interp.fds.iter().position(|f| f.is_none()) {
            Some(i) => i,
            None => {
                self.interp.fds.push(None);
                self.interp.fds.len() - 1
            }
        };
        self.interp.fds[fd] = Some(inode);
        SVal::UInt(fd as u64)
    }

    fn do_close(&mut self, tid: u32, fd: SVal) -> SVal {
        let idx = fd.bits() as usize;
        if self.interp.fds.get(idx).map_or(false, |s| s.is_some()) {
            self.interp.fds[idx] = None;
            SVal::zero()
        } else {
            self.system_error(tid, SystemErrorKind::Badf)
        }
    }

    fn do_file_read(&mut self, tid: u32, fd: SVal, size: ASize) -> Option<SVal> {
        let inode = match self.file_inode(fd) {
            Some(i) => i,
            None => return Some(self.system_error(tid, SystemErrorKind::Badf)),
        };
        let deps = self.interp.deps.snapshot(tid, None, None);
        self.visit_load(
            tid,
            MemOrdering::Relaxed,
            inode,
            size,
            AType::Unsigned,
            ReadKind::Dsk,
            None,
            deps,
        )
    }

    fn do_file_write(&mut self, tid: u32, fd: SVal, val: SVal, size: ASize) -> SVal {
        let inode = match self.file_inode(fd) {
            Some(i) => i,
            None => return self.system_error(tid, SystemErrorKind::Badf),
        };
        let deps = self.interp.deps.snapshot(tid, None, None);
        self.visit_store(
            tid,
            MemOrdering::Relaxed,
            inode,
            size,
            AType::Unsigned,
            val,
            WriteKind::Dsk { mapping: inode },
            deps,
        );
        SVal::zero()
    }
}
