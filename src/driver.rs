//! The exploration driver.
//!
//! Owns the execution graph, the interpreter state, the worklist and
//! revisit set, and the per-model checker, and drives the stateless
//! search: run the program to completion, pop an alternative, cut the
//! graph back, resume. Backward revisits branch eagerly: the driver
//! clones its shared state, applies the revisit, and either explores the
//! branch reentrantly or hands it to the worker pool.

use crate::config::{Config, ProgramPoint, SchedulePolicy};
use crate::consistency::{make_checker, ConsistencyChecker};
use crate::errors::{BlockageType, ErrorReport, VerificationError};
use crate::event::Event;
use crate::graph::{mk_read, mk_write, ExecutionGraph};
use crate::interp::InterpState;
use crate::ir::Module;
use crate::label::{Annot, Label, LabelKind, MemOrdering, ReadKind, WriteKind};
use crate::mem::{SAddr, SAddrAllocator};
use crate::value::{ASize, AType, SVal};
use crate::view::VectorClock;
use crate::worklist::{RevisitKey, RevisitSet, WorkItem, Worklist};
use crate::VerificationResult;
use log::debug;
use std::sync::Arc;

/// The state a branched exploration needs: everything a worker clones.
pub(crate) struct SharedState {
    pub graph: ExecutionGraph,
    pub interp: InterpState,
    pub alloc: SAddrAllocator,
}

/// The state local to one exploration path, released around a reentrant
/// branch and restored afterwards.
struct LocalState {
    graph: ExecutionGraph,
    interp: InterpState,
    alloc: SAddrAllocator,
    worklist: Worklist,
    revisit_set: RevisitSet,
    thread_prios: Vec<Event>,
    is_moot: bool,
}

pub(crate) struct Driver {
    pub(crate) config: Config,
    pub(crate) module: Arc<Module>,
    pub(crate) checker: Box<dyn ConsistencyChecker + Send>,
    pub(crate) graph: ExecutionGraph,
    pub(crate) interp: InterpState,
    pub(crate) alloc: SAddrAllocator,
    pub(crate) worklist: Worklist,
    pub(crate) revisit_set: RevisitSet,
    pub(crate) thread_prios: Vec<Event>,
    pub(crate) is_moot: bool,
    pub(crate) halt: bool,
    pub(crate) result: VerificationResult,
    pub(crate) pool: Option<Arc<crate::pool::TaskQueue>>,
}

impl Driver {
    /// Creates a driver for a fresh exploration of `module`.
    pub(crate) fn new(config: Config, module: Arc<Module>) -> Driver {
        let mut alloc = SAddrAllocator::new();
        let mut graph = ExecutionGraph::new();
        let mut interp = InterpState::new(&module, &mut alloc, config.seed);
        interp.set_dep_tracking(config.model);
        let checker = make_checker(config.model);

        let t0 = graph.add_new_thread();
        debug_assert_eq!(t0, 0);
        let mut driver = Driver {
            config,
            module,
            checker,
            graph,
            interp,
            alloc,
            worklist: Worklist::new(),
            revisit_set: RevisitSet::new(),
            thread_prios: Vec::new(),
            is_moot: false,
            halt: false,
            result: VerificationResult::default(),
            pool: None,
        };
        driver.attach_label(Label::new(
            Event::new(0, 0),
            MemOrdering::NotAtomic,
            LabelKind::ThreadStart {
                parent_create: Event::INIT,
                symmetric_tid: None,
            },
        ));
        driver
    }

    /// Builds a driver continuing a branched exploration.
    pub(crate) fn from_shared(config: Config, module: Arc<Module>, state: SharedState) -> Driver {
        let checker = make_checker(config.model);
        Driver {
            config,
            module,
            checker,
            graph: state.graph,
            interp: state.interp,
            alloc: state.alloc,
            worklist: Worklist::new(),
            revisit_set: RevisitSet::new(),
            thread_prios: Vec::new(),
            is_moot: false,
            halt: false,
            result: VerificationResult::default(),
            pool: None,
        }
    }

    pub(crate) fn shared_state(&self) -> SharedState {
        SharedState {
            graph: self.graph.clone(),
            interp: self.interp.clone(),
            alloc: self.alloc.clone(),
        }
    }

    fn release_local_state(&mut self) -> LocalState {
        LocalState {
            graph: std::mem::take(&mut self.graph),
            interp: std::mem::replace(&mut self.interp, InterpState::empty()),
            alloc: self.alloc.clone(),
            worklist: std::mem::take(&mut self.worklist),
            revisit_set: std::mem::take(&mut self.revisit_set),
            thread_prios: std::mem::take(&mut self.thread_prios),
            is_moot: std::mem::replace(&mut self.is_moot, false),
        }
    }

    fn restore_local_state(&mut self, state: LocalState) {
        self.graph = state.graph;
        self.interp = state.interp;
        self.alloc = state.alloc;
        self.worklist = state.worklist;
        self.revisit_set = state.revisit_set;
        self.thread_prios = state.thread_prios;
        self.is_moot = state.is_moot;
    }

    /* ---------------- label plumbing ---------------- */

    /// Adds a label, computing its saved sets and views.
    pub(crate) fn attach_label(&mut self, label: Label) -> Event {
        let e = self.graph.add_label(label);
        self.update_label_views(e);
        e
    }

    pub(crate) fn update_label_views(&mut self, e: Event) {
        let saved = self.checker.calculate_saved(&self.graph, e);
        let views = self.checker.calculate_views(&self.graph, e);
        let lab = self.graph.label_mut(e);
        lab.set_calculated(saved);
        lab.set_views(views);
    }

    /// Adds a read label, registering it with its rf source.
    fn attach_read(&mut self, label: Label, rf: Event) -> Event {
        let e = self.graph.add_label(label);
        self.graph.change_rf(e, rf);
        self.update_label_views(e);
        let max = {
            let addr = self.graph.label(e).addr().unwrap();
            self.graph.is_co_maximal(addr, rf)
        };
        self.graph.label_mut(e).set_added_max(max);
        e
    }

    /// Adds a write label at coherence position `mo_pos`.
    fn attach_write(&mut self, label: Label, mo_pos: usize) -> Event {
        let addr = label.addr().unwrap();
        let e = self.graph.add_label(label);
        self.graph.add_store_at(addr, e, mo_pos);
        self.update_label_views(e);
        let max = self.graph.is_co_maximal(addr, e);
        self.graph.label_mut(e).set_added_max(max);
        e
    }

    /* ---------------- values ---------------- */

    /// The value observed when reading from `write`.
    pub(crate) fn get_write_value(&self, write: Event, addr: SAddr, _size: ASize) -> SVal {
        if write.is_bottom() {
            return SVal::zero();
        }
        if write.is_init() {
            return self.interp.loc_init_val(addr);
        }
        self.graph.write_value(write)
    }

    /// The initializing value a barrier at `addr` was set up with.
    pub(crate) fn barrier_init_value(&self, addr: SAddr, size: ASize) -> SVal {
        for &w in self.graph.stores(addr) {
            if matches!(
                self.graph.label(w).write().map(|wl| &wl.kind),
                Some(WriteKind::BInit)
            ) {
                return self.get_write_value(w, addr, size);
            }
        }
        SVal::zero()
    }

    /* ---------------- consistency plumbing ---------------- */

    fn last_added(&self) -> Option<Event> {
        self.graph.labels_by_stamp().last().map(|l| l.pos())
    }

    pub(crate) fn is_consistent(&mut self, point: ProgramPoint) -> bool {
        if point == ProgramPoint::Step && self.config.check_cons_point > ProgramPoint::Step {
            return true;
        }
        match self.last_added() {
            Some(e) => self.checker.is_consistent(&self.graph, e),
            None => true,
        }
    }

    fn is_consistent_at(&mut self, e: Event) -> bool {
        self.checker.is_consistent(&self.graph, e)
    }

    /// Drops rf candidates from the back until the read's choice is
    /// consistent; blocks the thread when none is.
    fn ensure_consistent_rf(&mut self, read: Event, stores: &mut Vec<Event>) -> bool {
        while !self.is_consistent_at(read) {
            stores.pop();
            match stores.last() {
                Some(&rf) => {
                    self.graph.change_rf(read, rf);
                    self.update_label_views(read);
                }
                None => {
                    self.graph.change_rf(read, Event::BOTTOM);
                    self.interp.block_thread(read.thread, BlockageType::Error);
                    return false;
                }
            }
        }
        true
    }

    fn ensure_consistent_store(&mut self, store: Event) -> bool {
        if !self.is_consistent_at(store) {
            self.interp.block_thread(store.thread, BlockageType::Error);
            return false;
        }
        true
    }

    /* ---------------- error reporting ---------------- */

    /// Reports a verification error at `e`. On a consistent graph this is
    /// a real witness and halts the search; on an inconsistent one the
    /// witness is spurious and only the thread is blocked.
    pub(crate) fn visit_error(&mut self, kind: VerificationError, e: Event) {
        if self.is_consistent_at(e) {
            debug!("verification error {:?} at {}", kind, e);
            if self.result.error.is_none() {
                self.result.error = Some(ErrorReport {
                    kind,
                    event: e,
                    trace: self.graph.trace_before(e),
                    dot: Some(self.graph.to_dot(Some(e))),
                });
            }
            self.halt = true;
        }
        self.interp.block_thread(e.thread, BlockageType::Error);
    }

    /// Checks the model-level and allocation-level error conditions after
    /// adding the access at `e`.
    fn check_access_errors(&mut self, e: Event) {
        if self.halt {
            return;
        }
        if self.config.check_race_detection {
            if let Some(kind) = self.checker.check_errors(&self.graph, e) {
                self.visit_error(kind, e);
                return;
            }
        }
        self.check_memory_races(e);
    }

    /// Use-after-free, access-before-allocation, and free races.
    fn check_memory_races(&mut self, e: Event) {
        let addr = match self.graph.label(e).addr() {
            Some(a) if a.is_dynamic() && a.is_user() => a,
            _ => return,
        };
        let malloc = match self.graph.alloc_covering(addr) {
            Some(m) => m,
            None => {
                self.visit_error(VerificationError::AccessNonMalloc, e);
                return;
            }
        };
        if !self.graph.view0(e).contains(malloc) {
            self.visit_error(VerificationError::RaceFreeMalloc, e);
            return;
        }
        let base = match self.graph.label(malloc).kind() {
            LabelKind::Malloc { addr, .. } => *addr,
            _ => return,
        };
        for f in self.graph.frees_of(base) {
            if f == e {
                continue;
            }
            if self.graph.view0(e).contains(f) {
                self.visit_error(VerificationError::AccessFreed, e);
                return;
            }
            if !self.graph.view0(f).contains(e) {
                self.visit_error(VerificationError::RaceFreeMalloc, e);
                return;
            }
        }
    }

    /* ---------------- scheduling ---------------- */

    fn is_schedulable(&self, tid: u32) -> bool {
        self.interp.is_runnable(tid) && !self.graph.is_thread_finished(tid)
    }

    fn schedule_prioritized(&mut self) -> Option<u32> {
        if self.thread_prios.is_empty() {
            return None;
        }
        self.thread_prios
            .iter()
            .map(|e| e.thread)
            .find(|&t| self.is_schedulable(t))
    }

    fn schedule_next_ltr(&self) -> Option<u32> {
        (0..self.graph.num_threads() as u32).find(|&t| self.is_schedulable(t))
    }

    fn schedule_next_wf(&self) -> Option<u32> {
        let mut fallback = None;
        for t in 0..self.graph.num_threads() as u32 {
            if !self.is_schedulable(t) {
                continue;
            }
            if fallback.is_none() {
                fallback = Some(t);
            }
            if !self.interp.next_inst_is_load(&self.module, t) {
                return Some(t);
            }
        }
        fallback
    }

    fn schedule_next_random(&mut self) -> Option<u32> {
        let n = self.graph.num_threads() as u32;
        if n == 0 {
            return None;
        }
        let start = self.interp.rand_below(n);
        for j in 0..n {
            let t = (j + start) % n;
            if !self.is_schedulable(t) {
                continue;
            }
            // Symmetric threads always run in tid order.
            if self.config.symmetry_reduction {
                if let LabelKind::ThreadStart {
                    symmetric_tid: Some(s),
                    ..
                } = self.graph.label(Event::new(t, 0)).kind()
                {
                    let s = *s;
                    if self.is_schedulable(s) && self.graph.thread_len(s) <= self.graph.thread_len(t)
                    {
                        return Some(s);
                    }
                }
            }
            return Some(t);
        }
        None
    }

    fn schedule_next(&mut self) -> Option<u32> {
        if self.is_moot || self.halt {
            return None;
        }
        if let Some(t) = self.schedule_prioritized() {
            return Some(t);
        }
        match self.config.schedule_policy {
            SchedulePolicy::Ltr => self.schedule_next_ltr(),
            SchedulePolicy::Wf => self.schedule_next_wf(),
            SchedulePolicy::Random => self.schedule_next_random(),
        }
    }

    /* ---------------- exploration ---------------- */

    fn reset_exploration_options(&mut self) {
        self.is_moot = false;
        self.reset_thread_prioritization();
    }

    fn reset_thread_prioritization(&mut self) {
        if !self.config.lapor {
            self.thread_prios.clear();
            return;
        }
        for t in 0..self.graph.num_threads() as u32 {
            if self.graph.thread_len(t) == 0 || self.graph.is_thread_finished(t) {
                continue;
            }
            if self.graph.last_unmatched_lock_lapor(t).is_some() {
                self.interp.block_thread(t, BlockageType::LockRel);
            }
        }
        self.thread_prios.clear();
    }

    fn prioritize_threads(&mut self) {
        if !self.config.lapor {
            return;
        }
        self.thread_prios = self
            .graph
            .lb_ordering_lapor()
            .into_iter()
            .filter(|e| !self.graph.is_thread_finished(e.thread))
            .collect();
    }

    fn handle_execution_beginning(&mut self) {
        self.interp.reset(&self.graph);
        for t in 1..self.graph.num_threads() as u32 {
            if self.graph.thread_len(t) == 0 {
                continue;
            }
            if let Some(last) = self.graph.last_thread_label(t) {
                if matches!(
                    last.read().map(|r| &r.kind),
                    Some(ReadKind::LockCas { .. })
                ) && !self.graph.is_rmw_load(last.pos())
                {
                    self.interp.block_thread(t, BlockageType::LockAcq);
                }
            }
        }
        self.prioritize_threads();
    }

    fn handle_finished_execution(&mut self) {
        self.reset_exploration_options();
        if self.halt {
            return;
        }
        if self.interp.any_blocked() {
            self.result.explored_blocked += 1;
            if self.config.check_liveness {
                self.check_liveness();
            }
            return;
        }
        if self.config.check_cons_point == ProgramPoint::Exec && !self.is_consistent(ProgramPoint::Exec)
        {
            return;
        }
        if self.config.print_exec_graphs {
            debug!("complete execution:\n{:?}", self.graph);
        }
        self.result.explored += 1;
    }

    fn check_liveness(&mut self) {
        let spinning: Vec<u32> = (0..self.graph.num_threads() as u32)
            .filter(|&t| self.interp.blockage(t) == Some(BlockageType::Spinloop))
            .collect();
        if spinning.is_empty() || !self.interp.all_blockages_are(BlockageType::Spinloop) {
            return;
        }
        if spinning.iter().all(|&t| self.thread_reads_maximal(t)) {
            let e = self.graph.last_thread_event(spinning[0]);
            self.visit_error(VerificationError::Liveness, e);
        }
    }

    /// Whether every read of `t` after its last spinloop head observes a
    /// coherence-maximal value.
    fn thread_reads_maximal(&self, t: u32) -> bool {
        let len = self.graph.thread_len(t) as u32;
        let mut start = 0;
        for i in (0..len).rev() {
            if matches!(
                self.graph.label(Event::new(t, i)).kind(),
                LabelKind::SpinStart
            ) {
                start = i;
                break;
            }
        }
        (start..len).all(|i| {
            let lab = self.graph.label(Event::new(t, i));
            match lab.read() {
                Some(r) => self.graph.is_co_maximal(r.addr, r.rf),
                None => true,
            }
        })
    }

    /// Runs the program under the current graph until no thread can be
    /// scheduled.
    fn run_program(&mut self) {
        self.handle_execution_beginning();
        while let Some(t) = self.schedule_next() {
            self.execute_step(t);
        }
        self.handle_finished_execution();
    }

    /// The main exploration loop.
    pub(crate) fn explore(&mut self) {
        loop {
            self.run_program();
            if self.halt {
                return;
            }
            loop {
                self.reset_exploration_options();
                let item = match self.worklist.next() {
                    Some(item) => item,
                    None => return,
                };
                let ok = self.revisit_item(item) && self.is_consistent(ProgramPoint::Step);
                if self.halt {
                    return;
                }
                if ok {
                    break;
                }
            }
        }
    }

    /// Runs the whole verification and returns the summed result.
    pub(crate) fn run(mut self) -> VerificationResult {
        self.explore();
        self.result
    }

    /* ---------------- revisits ---------------- */

    /// Applies a popped work item: restrict, cut, and re-route.
    fn revisit_item(&mut self, item: WorkItem) -> bool {
        let pos = item.pos();
        let stamp = self.graph.label(pos).stamp();
        self.worklist.restrict(stamp);
        self.revisit_set.restrict(stamp);
        self.graph.cut_to_stamp(stamp);

        match item {
            WorkItem::MoPlacement { store, mo_pos } => {
                let addr = self.graph.label(store).addr().unwrap();
                self.graph.change_store_offset(addr, store, mo_pos);
                self.graph.label_mut(store).set_added_max(false);
                self.repair_dangling_locks();
                self.repair_dangling_barriers();
                self.calc_revisits(store)
            }
            WorkItem::LibMoPlacement { store, mo_pos } => {
                let addr = self.graph.label(store).addr().unwrap();
                self.graph.change_store_offset(addr, store, mo_pos);
                self.graph.label_mut(store).set_added_max(false);
                self.calc_lib_revisits(store)
            }
            WorkItem::Forward { read, rf } => self.revisit_read(read, rf, false, false),
            WorkItem::LibForward { read, rf } => self.revisit_read(read, rf, false, true),
            WorkItem::Backward {
                read,
                rf,
                prefix,
                mo_placings,
            }
            | WorkItem::LibBackward {
                read,
                rf,
                prefix,
                mo_placings,
            } => {
                self.graph.restore_store_prefix(read, prefix, &mo_placings);
                // The restored prefix is fixed: nothing in it may be
                // revisited again on this branch.
                let prefix_view = self.checker.prefix_view(&self.graph, rf);
                let fixed: Vec<Event> = self
                    .graph
                    .labels()
                    .filter(|l| l.is_read() && prefix_view.contains(l.pos()))
                    .map(|l| l.pos())
                    .collect();
                for e in fixed {
                    if let Some(r) = self.graph.label_mut(e).read_mut() {
                        r.revisitable = false;
                    }
                }
                self.revisit_read(read, rf, true, false)
            }
        }
    }

    /// Changes the rf of `read` and completes any RMW that becomes
    /// enabled by the new value.
    fn revisit_read(&mut self, read: Event, rf: Event, backward: bool, lib: bool) -> bool {
        debug!(
            "{} revisiting {} -> {}",
            if backward { "backward" } else { "forward" },
            rf,
            read
        );
        self.graph.change_rf(read, rf);
        self.update_label_views(read);
        let addr = self.graph.label(read).addr().unwrap();
        let max = backward && self.graph.is_co_maximal(addr, rf);
        {
            let lab = self.graph.label_mut(read);
            lab.set_added_max(max);
            lab.set_revisited_in_place(false);
        }

        self.repair_dangling_barriers();

        if let Some(store) = self.complete_revisited_rmw(read) {
            return self.calc_revisits(store);
        }

        self.repair_dangling_locks();
        if matches!(
            self.graph.label(read).read().map(|r| &r.kind),
            Some(ReadKind::LockCas { .. })
        ) {
            let cur_rf = self.graph.rf(read);
            if !cur_rf.is_init() && !cur_rf.is_bottom() {
                self.thread_prios = vec![cur_rf];
            }
        }
        if lib {
            return self.calc_lib_revisits(read);
        }
        true
    }

    /// When the revisited read is the read part of an RMW whose predicate
    /// now holds, adds the matching write and returns it.
    fn complete_revisited_rmw(&mut self, read: Event) -> Option<Event> {
        let (addr, size, atype, rf, kind, ord) = {
            let lab = self.graph.label(read);
            let r = lab.read()?;
            (
                r.addr,
                r.size,
                r.atype,
                r.rf,
                r.kind.clone(),
                lab.ordering(),
            )
        };
        let old = self.get_write_value(rf, addr, size);
        let (val, wkind) = match kind {
            ReadKind::Fai { op, val } => (crate::interp::apply_rmw_op(op, old, val), WriteKind::Fai),
            ReadKind::BIncFai { op, val } => {
                let mut v = crate::interp::apply_rmw_op(op, old, val);
                if v.is_zero(size) {
                    v = self.barrier_init_value(addr, size);
                }
                (v, WriteKind::BIncFai)
            }
            ReadKind::Cas { expected, swap } => {
                if !old.bits_eq(expected, size) {
                    return None;
                }
                (swap, WriteKind::Cas)
            }
            ReadKind::LockCas { expected, swap } => {
                if !old.bits_eq(expected, size) {
                    return None;
                }
                (swap, WriteKind::LockCas)
            }
            _ => return None,
        };
        let pos = read.next();
        let lab = mk_write(pos, ord, addr, size, atype, val, wkind);
        let (lo, hi) = self
            .checker
            .coherent_placings(&self.graph, addr, pos, true);
        debug_assert_eq!(lo, hi);
        Some(self.attach_write(lab, hi))
    }

    /// Whether backward-revisiting `read` from `store` would delete
    /// nothing from the current graph.
    fn revisit_modifies_graph(&mut self, read: Event, store: Event) -> bool {
        let prefix = self.checker.prefix_view(&self.graph, store);
        let v = self.graph.revisit_view(read, &prefix);
        let stamp = self.graph.label(read).stamp();
        self.graph
            .labels()
            .any(|l| l.stamp() > stamp && !v.contains(l.pos()) && !l.is_empty_label())
    }

    /// The maximal-extension test: a backward revisit is explored only
    /// when everything it deletes was added coherence-maximally, so each
    /// graph is (re)constructed exactly once.
    fn in_maximal_path(&mut self, read: Event, store: Event, v: &VectorClock) -> bool {
        let g = &self.graph;
        let rstamp = g.label(read).stamp();

        let read_ok = |e: Event| -> bool {
            let lab = g.label(e);
            if !lab.was_added_max() && !lab.is_revisited_in_place() {
                return false;
            }
            if let Some(r) = lab.read() {
                if !r.rf.is_init() && !r.rf.is_bottom() {
                    let rf_deleted = g.label(r.rf).stamp() > lab.stamp() && !v.contains(r.rf);
                    if rf_deleted && !lab.is_revisited_in_place() {
                        return false;
                    }
                }
            }
            true
        };

        if !read_ok(read) {
            return false;
        }
        for lab in g.labels() {
            if lab.stamp() <= rstamp || lab.pos() == store || v.contains(lab.pos()) {
                continue;
            }
            if lab.is_mem_access() && !read_ok(lab.pos()) {
                return false;
            }
        }

        // An RMW read may only be revisited by the write that resolves
        // the pending-RMW conflict.
        if g.is_rmw_load(read) {
            let wpart = read.next();
            if g.contains(wpart) && g.is_rmw_store(wpart) {
                let pending = g.pending_rmws(wpart);
                if let Some(&last) = pending.last() {
                    if last.next() != store {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Computes and explores the revisits induced by a new store.
    /// Returns whether the current branch remains worth exploring.
    pub(crate) fn calc_revisits(&mut self, store: Event) -> bool {
        if self.config.symmetry_reduction {
            if let LabelKind::ThreadStart {
                symmetric_tid: Some(s),
                ..
            } = self.graph.label(Event::new(store.thread, 0)).kind()
            {
                if self.share_prefix_sr(*s, store) {
                    return true;
                }
            }
        }

        let (addr, size, is_binc) = {
            let lab = self.graph.label(store);
            let w = lab.write().expect("revisits of a non-store");
            (
                w.addr,
                w.size,
                matches!(w.kind, WriteKind::BIncFai),
            )
        };
        if is_binc
            && self.config.barrier_opt
            && !self
                .get_write_value(store, addr, size)
                .bits_eq(self.barrier_init_value(addr, size), size)
        {
            return true;
        }

        let prefix = self.checker.prefix_view(&self.graph, store);
        let mut loads = self.checker.coherent_revisits(&self.graph, store, &prefix);

        let pending = if self.graph.is_rmw_store(store) {
            self.graph.pending_rmws(store)
        } else {
            Vec::new()
        };
        if let Some(&conf) = pending.last() {
            let conf_stamp = self.graph.label(conf).stamp();
            loads.retain(|&l| self.graph.label(l).stamp() <= conf_stamp);
        }
        loads.sort_by_key(|&l| self.graph.label(l).stamp());

        for l in loads {
            if self.halt {
                break;
            }
            let lab = self.graph.label(l);
            debug_assert!(lab.is_read());

            // Terminal barrier waits are repointed in place.
            if is_binc
                && self.config.barrier_opt
                && matches!(lab.read().map(|r| &r.kind), Some(ReadKind::BWait))
                && l == self.graph.last_thread_event(l.thread)
            {
                self.graph.change_rf(l, store);
                self.update_label_views(l);
                let max = self.graph.is_co_maximal(addr, store);
                let lab = self.graph.label_mut(l);
                lab.set_added_max(max);
                lab.set_revisited_in_place(true);
                self.interp.unblock_thread(l.thread);
                continue;
            }

            let v = self.graph.revisit_view(l, &prefix);
            if !self.in_maximal_path(l, store, &v) {
                continue;
            }

            let save_prefix = self
                .graph
                .prefix_labels_not_before(&prefix, self.graph.label(l).stamp());
            let save_mo = self.graph.save_coherence_status(&save_prefix, l);

            let mut write_prefix = vec![store];
            write_prefix.extend(self.graph.extract_rfs(&save_prefix));
            let key = RevisitKey {
                write_prefix,
                mo_placings: save_mo.clone(),
            };
            let lstamp = self.graph.label(l).stamp();
            if self.revisit_set.contains(lstamp, &key) {
                self.result.duplicates += 1;
                continue;
            }

            // A blocked terminal lock read is repointed in place when the
            // revisit would not restructure the graph.
            if matches!(
                self.graph.label(l).read().map(|r| &r.kind),
                Some(ReadKind::LockCas { .. })
            ) && self.interp.blockage(l.thread) == Some(BlockageType::LockAcq)
                && l == self.graph.last_thread_event(l.thread)
            {
                if self.try_to_revisit_lock(l, store) {
                    continue;
                }
                self.is_moot = true;
            }

            let item = WorkItem::Backward {
                read: l,
                rf: store,
                prefix: save_prefix,
                mo_placings: save_mo,
            };
            self.branch_explore(item);
        }

        let consg = !self.graph.is_rmw_store(store) || pending.is_empty();
        !self.is_moot && consg
    }

    /// Branches the exploration: clones the shared state, applies the
    /// backward revisit on the clone, and either submits it to the pool
    /// or explores it reentrantly.
    fn branch_explore(&mut self, item: WorkItem) {
        let local = self.release_local_state();
        self.graph = local.graph.clone();
        self.interp = local.interp.clone();
        self.alloc = local.alloc.clone();

        let ok = self.revisit_item(item) && self.is_consistent(ProgramPoint::Step);
        if ok && !self.halt {
            match &self.pool {
                Some(pool) if pool.has_capacity() => {
                    pool.submit(self.shared_state());
                }
                _ => self.explore(),
            }
        }
        self.restore_local_state(local);
    }

    /// Repoints a blocked terminal lock read at `store` without cutting
    /// the graph. Fails when the revisit would restructure it.
    fn try_to_revisit_lock(&mut self, read: Event, store: Event) -> bool {
        if self.revisit_modifies_graph(read, store) {
            return false;
        }
        self.graph.change_rf(read, store);
        self.update_label_views(read);
        let addr = self.graph.label(read).addr().unwrap();
        let max = self.graph.is_co_maximal(addr, store);
        {
            let lab = self.graph.label_mut(read);
            lab.set_added_max(max);
            lab.set_revisited_in_place(true);
        }
        self.interp.unblock_thread(read.thread);
        self.thread_prios = vec![read];
        true
    }

    /// After a cut, a terminal lock read may have lost its rf; repoint it
    /// at a still-held lock write.
    fn repair_dangling_locks(&mut self) {
        for t in 0..self.graph.num_threads() as u32 {
            if self.graph.thread_len(t) == 0 {
                continue;
            }
            let last = self.graph.last_thread_event(t);
            let needs_repair = {
                let lab = self.graph.label(last);
                matches!(lab.read().map(|r| &r.kind), Some(ReadKind::LockCas { .. }))
                    && lab.read().map_or(false, |r| r.rf.is_bottom())
            };
            if needs_repair {
                self.repair_lock(last);
                break;
            }
        }
    }

    fn repair_lock(&mut self, read: Event) {
        let addr = self.graph.label(read).addr().unwrap();
        let stores: Vec<Event> = self.graph.stores(addr).to_vec();
        let target = stores
            .iter()
            .rev()
            .copied()
            .find(|&w| {
                matches!(
                    self.graph.label(w).write().map(|wl| &wl.kind),
                    Some(WriteKind::LockCas)
                ) && self.graph.matching_unlock_lapor(w).is_none()
                    && self.lock_write_unreleased(w)
            })
            .or_else(|| stores.last().copied());
        if let Some(w) = target {
            self.graph.change_rf(read, w);
            self.update_label_views(read);
            let lab = self.graph.label_mut(read);
            lab.set_added_max(true);
            lab.set_revisited_in_place(true);
            self.thread_prios = vec![w];
        }
    }

    /// Whether the critical section opened by the lock write at `w` has
    /// no matching unlock yet.
    fn lock_write_unreleased(&self, w: Event) -> bool {
        let addr = self.graph.label(w).addr().unwrap();
        for i in w.index + 1..self.graph.thread_len(w.thread) as u32 {
            let e = Event::new(w.thread, i);
            let lab = self.graph.label(e);
            if lab.addr() == Some(addr)
                && matches!(lab.write().map(|wl| &wl.kind), Some(WriteKind::Unlock))
            {
                return false;
            }
        }
        true
    }

    /// After a cut, a terminal barrier wait may have lost its rf; it then
    /// reads from its own thread's increment.
    fn repair_dangling_barriers(&mut self) {
        for t in 0..self.graph.num_threads() as u32 {
            if self.graph.thread_len(t) == 0 {
                continue;
            }
            let last = self.graph.last_thread_event(t);
            let needs_repair = {
                let lab = self.graph.label(last);
                matches!(lab.read().map(|r| &r.kind), Some(ReadKind::BWait))
                    && lab.read().map_or(false, |r| r.rf.is_bottom())
            };
            if needs_repair {
                let prev = last.prev();
                debug_assert!(self.graph.is_rmw_store(prev));
                self.graph.change_rf(last, prev);
                self.update_label_views(last);
                let lab = self.graph.label_mut(last);
                lab.set_added_max(true);
                lab.set_revisited_in_place(true);
            }
        }
    }

    /* ---------------- symmetry reduction ---------------- */

    /// Whether threads `t` and `pos.thread` have executed equivalent
    /// prefixes up to `pos.index`: their reads observe the same sources
    /// modulo swapping the two thread ids.
    fn share_prefix_sr(&self, t: u32, pos: Event) -> bool {
        if self.graph.thread_len(t) < pos.index as usize {
            return false;
        }
        let swap = |e: Event| -> Event {
            if e.thread == t {
                Event::new(pos.thread, e.index)
            } else if e.thread == pos.thread {
                Event::new(t, e.index)
            } else {
                e
            }
        };
        for j in 0..pos.index {
            let la = self.graph.label(Event::new(t, j));
            let lb = self.graph.label(Event::new(pos.thread, j));
            match (la.read(), lb.read()) {
                (Some(ra), Some(rb)) => {
                    if swap(ra.rf) != rb.rf {
                        return false;
                    }
                }
                (None, None) => {}
                _ => return false,
            }
        }
        true
    }

    /// Forces a read to repeat its symmetric twin's choice when both
    /// threads have executed the same prefix.
    pub(crate) fn filter_symmetric_stores(
        &self,
        tid: u32,
        pos: Event,
        addr: SAddr,
        stores: &mut Vec<Event>,
    ) {
        let symm = match self.graph.label(Event::new(tid, 0)).kind() {
            LabelKind::ThreadStart {
                symmetric_tid: Some(s),
                ..
            } => *s,
            _ => return,
        };
        if !self.share_prefix_sr(symm, pos) {
            return;
        }
        let twin = Event::new(symm, pos.index);
        if !self.graph.contains(twin) {
            return;
        }
        if let Some(r) = self.graph.label(twin).read() {
            if r.addr == addr && stores.contains(&r.rf) {
                stores.retain(|&s| s == r.rf);
            }
        }
    }

    /* ---------------- spinloop reconsideration ---------------- */

    /// A new access to the variable a blocked FAI spinloop revolves
    /// around may break its blocking assumption; unblock the spinner so
    /// it re-evaluates.
    pub(crate) fn check_reconsider_fai_spinloop(&mut self, access: Event) {
        let addr = match self.graph.label(access).addr() {
            Some(a) => a,
            None => return,
        };
        for t in 0..self.graph.num_threads() as u32 {
            if self.interp.blockage(t) != Some(BlockageType::Spinloop) {
                continue;
            }
            if self.graph.thread_len(t) == 0 {
                continue;
            }
            let last = self.graph.last_thread_event(t);
            if !matches!(self.graph.label(last).kind(), LabelKind::PotentialSpinEnd) {
                continue;
            }
            let spins_on = (0..last.index).rev().find_map(|i| {
                let e = Event::new(t, i);
                if self.graph.is_rmw_store(e) {
                    self.graph.label(e).addr()
                } else {
                    None
                }
            });
            if spins_on == Some(addr) && access.thread != t {
                self.interp.unblock_thread(t);
            }
        }
    }

    /* ---------------- library accesses ---------------- */

    /// Revisits induced by library observations: a library store offers
    /// itself to every revisitable library read of the location outside
    /// its own causal prefix. These go through the worklist with a saved
    /// prefix, like ordinary backward revisits.
    pub(crate) fn calc_lib_revisits(&mut self, e: Event) -> bool {
        let (addr, is_store) = {
            let lab = self.graph.label(e);
            match lab.addr() {
                Some(a) => (a, lab.is_write()),
                None => return true,
            }
        };
        if !is_store {
            return true;
        }
        let prefix = self.checker.prefix_view(&self.graph, e);
        let readers: Vec<Event> = self
            .graph
            .labels()
            .filter(|l| {
                matches!(l.read().map(|r| &r.kind), Some(ReadKind::Lib { .. }))
                    && l.read().map(|r| r.addr) == Some(addr)
                    && l.stamp() < self.graph.label(e).stamp()
                    && l.read().map_or(false, |r| r.revisitable)
                    && !prefix.contains(l.pos())
            })
            .map(|l| l.pos())
            .collect();
        for r in readers {
            let stamp = self.graph.label(r).stamp();
            let save_prefix = self.graph.prefix_labels_not_before(&prefix, stamp);
            let save_mo = self.graph.save_coherence_status(&save_prefix, r);
            self.worklist.add(
                stamp,
                WorkItem::LibBackward {
                    read: r,
                    rf: e,
                    prefix: save_prefix,
                    mo_placings: save_mo,
                },
            );
        }
        true
    }

    /* ---------------- memory events (called from the interpreter) -- */

    /// Handles a load; returns the observed value, or `None` when the
    /// thread blocked instead.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn visit_load(
        &mut self,
        tid: u32,
        ord: MemOrdering,
        addr: SAddr,
        size: ASize,
        atype: AType,
        kind: ReadKind,
        annot: Option<Annot>,
        deps: crate::deps::EventDeps,
    ) -> Option<SVal> {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return self.read_ret_value_and_maybe_block(tid);
        }
        let pos = self.interp.current_pos(tid);
        self.graph.track_coherence(addr);
        if !self.is_access_valid(addr) {
            let mut lab = mk_read(pos, ord, addr, size, atype, kind, None, Event::INIT);
            lab.set_deps(deps);
            let e = self.attach_read(lab, Event::INIT);
            self.visit_error(VerificationError::AccessNonMalloc, e);
            return Some(SVal::zero());
        }

        let mut stores = self.checker.coherent_stores(&self.graph, addr, pos);
        debug_assert!(!stores.is_empty());
        if self.config.symmetry_reduction {
            self.filter_symmetric_stores(tid, pos, addr, &mut stores);
        }
        if let Some(a) = annot {
            let good: Vec<Event> = stores
                .iter()
                .copied()
                .filter(|&w| a.holds(self.get_write_value(w, addr, size), size))
                .collect();
            if !good.is_empty() {
                stores = good;
            }
        }
        if matches!(kind, ReadKind::LockCas { .. }) {
            self.filter_acquired_locks(addr, size, &mut stores);
        }
        // Barrier arrival orders are equivalent: increments read the
        // latest value only.
        if matches!(kind, ReadKind::BIncFai { .. }) && self.config.barrier_opt {
            if let Some(&last) = stores.last() {
                stores = vec![last];
            }
        }

        let chosen = *stores.last().unwrap();
        let mut lab = mk_read(pos, ord, addr, size, atype, kind.clone(), annot, chosen);
        lab.set_deps(deps);
        let e = self.attach_read(lab, chosen);

        if !self.ensure_consistent_rf(e, &mut stores) {
            return None;
        }

        self.check_reconsider_fai_spinloop(e);
        self.check_access_errors(e);
        if self.halt {
            return Some(SVal::zero());
        }

        let rf = self.graph.rf(e);
        let val = self.get_write_value(rf, addr, size);

        if matches!(kind, ReadKind::BWait)
            && !val.bits_eq(self.barrier_init_value(addr, size), size)
        {
            self.interp.block_thread(tid, BlockageType::Barrier);
        }

        for &s in stores.iter().take(stores.len().saturating_sub(1)) {
            let stamp = self.graph.label(e).stamp();
            let item = if matches!(kind, ReadKind::Lib { .. }) {
                WorkItem::LibForward { read: e, rf: s }
            } else {
                WorkItem::Forward { read: e, rf: s }
            };
            self.worklist.add(stamp, item);
        }
        Some(val)
    }

    /// The recorded value of an already-present read, blocking the thread
    /// when its rf has been invalidated.
    fn read_ret_value_and_maybe_block(&mut self, tid: u32) -> Option<SVal> {
        let pos = self.interp.current_pos(tid);
        let (rf, addr, size, is_bwait) = {
            let r = self
                .graph
                .label(pos)
                .read()
                .expect("replay position is not a read");
            (r.rf, r.addr, r.size, matches!(r.kind, ReadKind::BWait))
        };
        if rf.is_bottom() {
            self.interp.block_thread(tid, BlockageType::Error);
            return None;
        }
        let val = self.get_write_value(rf, addr, size);
        if is_bwait && !val.bits_eq(self.barrier_init_value(addr, size), size) {
            self.interp.block_thread(tid, BlockageType::Barrier);
        }
        Some(val)
    }

    /// Keeps only lock stores a fresh acquirer could usefully observe:
    /// released values not already claimed by another acquiring CAS.
    /// When every store is claimed or held, only the latest remains (the
    /// read will block on it).
    fn filter_acquired_locks(&mut self, addr: SAddr, size: ASize, stores: &mut Vec<Event>) {
        let free: Vec<Event> = stores
            .iter()
            .copied()
            .filter(|&w| {
                if !self.get_write_value(w, addr, size).is_zero(size) {
                    return false;
                }
                w.is_init()
                    || !self
                        .graph
                        .rf_succs(w)
                        .iter()
                        .any(|&r| self.graph.is_rmw_load(r))
            })
            .collect();
        if !free.is_empty() {
            *stores = free;
        } else if let Some(&last) = stores.last() {
            *stores = vec![last];
        }
    }

    /// Handles a store.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn visit_store(
        &mut self,
        tid: u32,
        ord: MemOrdering,
        addr: SAddr,
        size: ASize,
        atype: AType,
        val: SVal,
        kind: WriteKind,
        deps: crate::deps::EventDeps,
    ) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.graph.track_coherence(addr);
        if !self.is_access_valid(addr) {
            let mut lab = mk_write(pos, ord, addr, size, atype, val, kind);
            lab.set_deps(deps);
            let e = self.attach_write(lab, 0);
            self.visit_error(VerificationError::AccessNonMalloc, e);
            return;
        }

        let is_rmw = matches!(
            kind,
            WriteKind::Fai | WriteKind::BIncFai | WriteKind::Cas | WriteKind::LockCas
        );
        let (lo, hi) = self
            .checker
            .coherent_placings(&self.graph, addr, pos, is_rmw);
        let val = if matches!(kind, WriteKind::BIncFai) && val.is_zero(size) {
            self.barrier_init_value(addr, size)
        } else {
            val
        };
        let mut lab = mk_write(pos, ord, addr, size, atype, val, kind);
        lab.set_deps(deps);
        let e = self.attach_write(lab, hi);

        let stamp = self.graph.label(e).stamp();
        let is_lib = matches!(
            self.graph.label(e).write().map(|w| &w.kind),
            Some(WriteKind::Lib { .. })
        );
        let mo: Vec<Event> = self.graph.stores(addr).to_vec();
        for p in lo..hi {
            if self.graph.is_rmw_store(mo[p]) {
                continue;
            }
            let item = if is_lib {
                WorkItem::LibMoPlacement { store: e, mo_pos: p }
            } else {
                WorkItem::MoPlacement { store: e, mo_pos: p }
            };
            self.worklist.add(stamp, item);
        }

        let cons = self.ensure_consistent_store(e);
        self.calc_revisits(e);
        if !cons {
            return;
        }

        self.check_reconsider_fai_spinloop(e);
        self.check_access_errors(e);
        if matches!(
            self.graph.label(e).write().map(|w| &w.kind),
            Some(WriteKind::Unlock)
        ) {
            self.check_unlock_validity(e);
        }
        if matches!(
            self.graph.label(e).write().map(|w| &w.kind),
            Some(WriteKind::BInit)
        ) {
            self.check_binit_validity(e);
        }
        if matches!(self.graph.label(e).write().map(|w| &w.kind), Some(WriteKind::Lib { .. })) {
            self.calc_lib_revisits(e);
        }
    }

    fn check_unlock_validity(&mut self, e: Event) {
        let addr = self.graph.label(e).addr().unwrap();
        // The unlocking thread must hold the lock: a po-earlier lock
        // write with no intervening unlock.
        let mut held = false;
        for i in (0..e.index).rev() {
            let p = Event::new(e.thread, i);
            let lab = self.graph.label(p);
            if lab.addr() != Some(addr) {
                continue;
            }
            match lab.write().map(|w| &w.kind) {
                Some(WriteKind::LockCas) => {
                    held = true;
                    break;
                }
                Some(WriteKind::Unlock) => break,
                _ => {}
            }
        }
        if !held {
            self.visit_error(VerificationError::InvalidUnlock, e);
        }
    }

    fn check_binit_validity(&mut self, e: Event) {
        let addr = self.graph.label(e).addr().unwrap();
        let reinit = self
            .graph
            .stores(addr)
            .iter()
            .any(|&w| {
                w != e
                    && matches!(
                        self.graph.label(w).write().map(|wl| &wl.kind),
                        Some(WriteKind::BInit)
                    )
            });
        if reinit {
            self.visit_error(VerificationError::InvalidBInit, e);
        }
    }

    /// Whether an access to `addr` is backed by storage.
    fn is_access_valid(&self, addr: SAddr) -> bool {
        if addr.is_null() {
            return false;
        }
        if addr.is_static() {
            return true;
        }
        self.graph.alloc_covering(addr).is_some()
    }

    /* ---------------- allocation events ---------------- */

    pub(crate) fn visit_malloc(
        &mut self,
        tid: u32,
        size: u64,
        align: u64,
        automatic: bool,
        name: Option<String>,
    ) -> SVal {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            let pos = self.interp.current_pos(tid);
            if let LabelKind::Malloc { addr, .. } = self.graph.label(pos).kind() {
                return SVal::Ptr(*addr);
            }
            panic!("replay position is not an allocation");
        }
        let pos = self.interp.current_pos(tid);
        let addr = if automatic {
            self.alloc.alloc_automatic(size, align, false)
        } else {
            self.alloc.alloc_heap(size, align, false)
        };
        self.attach_label(Label::new(
            pos,
            MemOrdering::NotAtomic,
            LabelKind::Malloc { addr, size, name },
        ));
        SVal::Ptr(addr)
    }

    pub(crate) fn visit_free(&mut self, tid: u32, addr: SAddr) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        let e = self.attach_label(Label::new(
            pos,
            MemOrdering::NotAtomic,
            LabelKind::Free { freed_addr: addr },
        ));
        if self.graph.alloc_covering(addr).is_none() {
            self.visit_error(VerificationError::FreeNonMalloc, e);
            return;
        }
        let doubled = self
            .graph
            .frees_of(addr)
            .into_iter()
            .any(|f| f != e);
        if doubled {
            self.visit_error(VerificationError::DoubleFree, e);
        }
    }

    /* ---------------- fences and persistency events ---------------- */

    pub(crate) fn visit_fence(&mut self, tid: u32, ord: MemOrdering) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(pos, ord, LabelKind::Fence));
    }

    pub(crate) fn visit_dsk_fsync(&mut self, tid: u32, inode: SAddr, size: ASize) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(
            pos,
            MemOrdering::Release,
            LabelKind::DskFsync { inode, size },
        ));
    }

    pub(crate) fn visit_dsk_sync(&mut self, tid: u32) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(pos, MemOrdering::Release, LabelKind::DskSync));
    }

    pub(crate) fn visit_dsk_pbarrier(&mut self, tid: u32) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(pos, MemOrdering::Release, LabelKind::DskPbarrier));
    }

    /* ---------------- thread events ---------------- */

    pub(crate) fn visit_thread_create(
        &mut self,
        tid: u32,
        func: crate::ir::FuncId,
        arg: SVal,
    ) -> SVal {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            let pos = self.interp.current_pos(tid);
            if let LabelKind::ThreadCreate { child_tid } = *self.graph.label(pos).kind() {
                self.interp.ensure_thread(child_tid, tid, func, arg);
                while self.graph.num_threads() <= child_tid as usize {
                    self.graph.add_new_thread();
                }
                if self.graph.thread_len(child_tid) == 0 {
                    self.attach_thread_start(child_tid, pos, None);
                }
                return SVal::UInt(child_tid as u64);
            }
            panic!("replay position is not a thread create");
        }
        let pos = self.interp.current_pos(tid);
        let child = self.graph.add_new_thread();
        self.attach_label(Label::new(
            pos,
            MemOrdering::Release,
            LabelKind::ThreadCreate { child_tid: child },
        ));
        let symm = if self.config.symmetry_reduction {
            self.symmetric_tid(tid, child, func, arg)
        } else {
            None
        };
        self.attach_thread_start(child, pos, symm);
        self.interp.ensure_thread(child, tid, func, arg);
        SVal::UInt(child as u64)
    }

    fn attach_thread_start(&mut self, child: u32, parent_create: Event, symm: Option<u32>) {
        self.attach_label(Label::new(
            Event::new(child, 0),
            MemOrdering::Acquire,
            LabelKind::ThreadStart {
                parent_create,
                symmetric_tid: symm,
            },
        ));
    }

    /// The largest earlier thread running the same code on the same
    /// argument under the same parent, if any.
    fn symmetric_tid(
        &self,
        parent: u32,
        child: u32,
        func: crate::ir::FuncId,
        arg: SVal,
    ) -> Option<u32> {
        (0..child)
            .rev()
            .find(|&t| self.interp.thread_matches(t, parent, func, arg))
    }

    /// Handles a join; returns the child's result, or `None` while the
    /// child has not finished.
    pub(crate) fn visit_thread_join(&mut self, tid: u32, child: u32) -> Option<SVal> {
        if child as usize >= self.graph.num_threads()
            || child == tid
            || self.graph.thread_len(child) == 0
        {
            let e = if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
                self.interp.current_pos(tid)
            } else {
                let pos = self.interp.current_pos(tid);
                self.attach_label(Label::new(
                    pos,
                    MemOrdering::Acquire,
                    LabelKind::ThreadJoin { child_tid: child },
                ))
            };
            self.visit_error(VerificationError::InvalidJoin, e);
            return Some(SVal::zero());
        }
        if !self.graph.is_thread_finished(child) {
            self.interp.block_thread(tid, BlockageType::Join);
            return None;
        }
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return Some(self.interp.thread_ret_val(child));
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(
            pos,
            MemOrdering::Acquire,
            LabelKind::ThreadJoin { child_tid: child },
        ));
        Some(self.interp.thread_ret_val(child))
    }

    pub(crate) fn visit_thread_finish(&mut self, tid: u32, ret: SVal) {
        self.interp.finish_thread(tid, ret);
        if !self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            let pos = self.interp.current_pos(tid);
            self.attach_label(Label::new(
                pos,
                MemOrdering::Release,
                LabelKind::ThreadFinish,
            ));
        }
        // Joiners re-evaluate now that the child is done.
        self.interp.unblock_joiners();
    }

    /* ---------------- spinloops ---------------- */

    pub(crate) fn visit_spin_start(&mut self, tid: u32) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(pos, MemOrdering::NotAtomic, LabelKind::SpinStart));
    }

    pub(crate) fn visit_potential_spin_end(&mut self, tid: u32) {
        if !self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            let pos = self.interp.current_pos(tid);
            self.attach_label(Label::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::PotentialSpinEnd,
            ));
        }
        if self.config.spin_assume {
            self.interp.block_thread(tid, BlockageType::Spinloop);
        }
    }

    /* ---------------- LAPOR ---------------- */

    pub(crate) fn visit_lock_lapor(&mut self, tid: u32, addr: SAddr) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(
            pos,
            MemOrdering::Acquire,
            LabelKind::LockLapor { lock_addr: addr },
        ));
        self.thread_prios = vec![pos];
    }

    pub(crate) fn visit_unlock_lapor(&mut self, tid: u32, addr: SAddr) {
        if self.interp.is_execution_driven_by_graph(&self.graph, tid) {
            return;
        }
        let pos = self.interp.current_pos(tid);
        self.attach_label(Label::new(
            pos,
            MemOrdering::Release,
            LabelKind::UnlockLapor { lock_addr: addr },
        ));
        // Leaving the critical section drops the thread's priority.
        let lock = self.graph.last_unmatched_lock_lapor(tid);
        self.thread_prios.retain(|e| Some(*e) != lock && e.thread != tid);
    }
}
