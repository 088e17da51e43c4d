//! The execution graph: the event store every other component works on.
//!
//! The graph exclusively owns its labels; all other components hold
//! [`Event`]s and dereference through it. Besides the per-thread label
//! sequences it maintains the per-location coherence (modification) order,
//! the reads-from edges (with their reader back-references), and the stamp
//! dispenser that totally orders label creation.

use crate::event::{Event, EventSet, Stamp};
use crate::label::{Label, LabelKind, MemOrdering, ReadKind, WriteKind};
use crate::mem::SAddr;
use crate::value::SVal;
use crate::view::{VectorClock, View};
use log::debug;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;

/// An in-memory execution graph.
#[derive(Clone)]
pub struct ExecutionGraph {
    threads: Vec<Vec<Label>>,
    coherence: FxHashMap<SAddr, Vec<Event>>,
    next_stamp: Stamp,
    empty_view: View,
}

impl Default for ExecutionGraph {
    fn default() -> Self {
        ExecutionGraph::new()
    }
}

impl ExecutionGraph {
    /// Creates an empty graph.
    pub fn new() -> ExecutionGraph {
        ExecutionGraph {
            threads: Vec::new(),
            coherence: FxHashMap::default(),
            next_stamp: Stamp::start(),
            empty_view: View::new(),
        }
    }

    /* ---------------- basic queries ---------------- */

    /// Number of threads the graph knows about.
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Number of events in thread `t`.
    pub fn thread_len(&self, t: u32) -> usize {
        self.threads.get(t as usize).map_or(0, |v| v.len())
    }

    /// Whether the graph holds an event at `e`'s position.
    pub fn contains(&self, e: Event) -> bool {
        (e.thread as usize) < self.threads.len() && (e.index as usize) < self.thread_len(e.thread)
    }

    /// The label at `e`. Panics when out of bounds.
    pub fn label(&self, e: Event) -> &Label {
        &self.threads[e.thread as usize][e.index as usize]
    }

    /// The label at `e`, if present.
    pub fn try_label(&self, e: Event) -> Option<&Label> {
        self.threads
            .get(e.thread as usize)
            .and_then(|t| t.get(e.index as usize))
    }

    pub(crate) fn label_mut(&mut self, e: Event) -> &mut Label {
        &mut self.threads[e.thread as usize][e.index as usize]
    }

    /// The last event of thread `t`.
    pub fn last_thread_event(&self, t: u32) -> Event {
        Event::new(t, self.thread_len(t) as u32 - 1)
    }

    /// The last label of thread `t`, if the thread has any events.
    pub fn last_thread_label(&self, t: u32) -> Option<&Label> {
        self.threads
            .get(t as usize)
            .and_then(|v| v.last())
    }

    /// Whether thread `t` has finished.
    pub fn is_thread_finished(&self, t: u32) -> bool {
        self.last_thread_label(t).map_or(false, |l| l.is_finish())
    }

    /// The stamp the next added label will receive.
    pub fn next_stamp(&self) -> Stamp {
        self.next_stamp
    }

    /// One past the largest stamp ever handed out; visitor arrays are
    /// sized by this.
    pub fn stamp_bound(&self) -> usize {
        self.next_stamp.get() as usize
    }

    /// The happens-before view of `e` (view 0), or the empty view for the
    /// sentinels.
    pub fn view0(&self, e: Event) -> &View {
        if e.is_init() || e.is_bottom() {
            return &self.empty_view;
        }
        match self.try_label(e) {
            Some(l) if l.has_views() => l.view(0),
            _ => &self.empty_view,
        }
    }

    /// Iterates every label of the graph in `(thread, index)` order.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.threads.iter().flat_map(|t| t.iter())
    }

    /// Every label sorted by stamp.
    pub fn labels_by_stamp(&self) -> Vec<&Label> {
        let mut all: Vec<&Label> = self.labels().collect();
        all.sort_by_key(|l| l.stamp());
        all
    }

    /* ---------------- construction ---------------- */

    /// Registers a new thread and returns its id.
    pub fn add_new_thread(&mut self) -> u32 {
        self.threads.push(Vec::new());
        self.threads.len() as u32 - 1
    }

    /// Adds `label` to the graph, assigning it the next stamp. The slot at
    /// its position must be one past the thread's end, or hold a
    /// placeholder.
    pub fn add_label(&mut self, mut label: Label) -> Event {
        let pos = label.pos();
        label.set_stamp(self.next_stamp);
        self.next_stamp = self.next_stamp.next();
        self.insert_at(pos, label);
        pos
    }

    /// Re-inserts a label that already carries a stamp (prefix
    /// restoration); advances the dispenser past it.
    fn add_label_with_stamp(&mut self, label: Label) {
        if label.stamp() >= self.next_stamp {
            self.next_stamp = label.stamp().next();
        }
        self.insert_at(label.pos(), label);
    }

    fn insert_at(&mut self, pos: Event, label: Label) {
        let t = pos.thread as usize;
        assert!(t < self.threads.len(), "unknown thread {}", pos.thread);
        let thread = &mut self.threads[t];
        let i = pos.index as usize;
        if i == thread.len() {
            thread.push(label);
        } else {
            assert!(
                i < thread.len() && thread[i].is_empty_label(),
                "slot {} already occupied",
                pos
            );
            thread[i] = label;
        }
    }

    /* ---------------- coherence ---------------- */

    /// Makes sure coherence is tracked for `addr`.
    pub fn track_coherence(&mut self, addr: SAddr) {
        self.coherence.entry(addr).or_default();
    }

    /// The coherence (modification) order of `addr`.
    pub fn stores(&self, addr: SAddr) -> &[Event] {
        self.coherence.get(&addr).map_or(&[], |v| v.as_slice())
    }

    /// Inserts `store` into `addr`'s coherence order at `mo_pos`.
    pub fn add_store_at(&mut self, addr: SAddr, store: Event, mo_pos: usize) {
        let mo = self.coherence.entry(addr).or_default();
        assert!(mo_pos <= mo.len());
        mo.insert(mo_pos, store);
    }

    /// Moves an existing store of `addr` to coherence position `new_pos`.
    pub fn change_store_offset(&mut self, addr: SAddr, store: Event, new_pos: usize) {
        let mo = self.coherence.get_mut(&addr).expect("untracked location");
        let old = mo.iter().position(|&e| e == store).expect("store not in mo");
        mo.remove(old);
        mo.insert(new_pos, store);
    }

    /// The coherence index of `store` at `addr`.
    pub fn co_index(&self, addr: SAddr, store: Event) -> Option<usize> {
        self.stores(addr).iter().position(|&e| e == store)
    }

    /// Whether `e` is coherence-maximal at `addr` (the initializer is
    /// maximal exactly when no store exists).
    pub fn is_co_maximal(&self, addr: SAddr, e: Event) -> bool {
        let mo = self.stores(addr);
        if e.is_init() {
            mo.is_empty()
        } else {
            mo.last() == Some(&e)
        }
    }

    /* ---------------- reads-from ---------------- */

    /// The current rf of the read at `e`.
    pub fn rf(&self, e: Event) -> Event {
        self.label(e).read().expect("not a read").rf
    }

    /// Changes the rf of `read` to `new_rf`, maintaining both reader
    /// lists. The sentinels have implicit reader lists.
    pub fn change_rf(&mut self, read: Event, new_rf: Event) {
        let old_rf = self.label(read).read().expect("not a read").rf;
        if !old_rf.is_init() && !old_rf.is_bottom() && self.contains(old_rf) {
            if let Some(w) = self.label_mut(old_rf).write_mut() {
                w.readers.retain(|&mut r| r != read);
            }
        }
        self.label_mut(read).read_mut().expect("not a read").rf = new_rf;
        if !new_rf.is_init() && !new_rf.is_bottom() {
            let w = self
                .label_mut(new_rf)
                .write_mut()
                .expect("rf target is not a write");
            if !w.readers.contains(&read) {
                w.readers.push(read);
            }
        }
    }

    /// The reads of `addr` currently observing the initializer.
    pub fn init_rfs_at(&self, addr: SAddr) -> Vec<Event> {
        self.labels()
            .filter_map(|l| {
                let r = l.read()?;
                if r.rf.is_init() && r.addr == addr {
                    Some(l.pos())
                } else {
                    None
                }
            })
            .collect()
    }

    /// The value the write at `w` stored. The initializer's value is the
    /// interpreter's business and not answered here.
    pub fn write_value(&self, w: Event) -> SVal {
        self.label(w).write().expect("not a write").val
    }

    /* ---------------- edge relations ---------------- */

    /// The immediate program-order predecessor position, if any.
    pub fn po_imm_pred(&self, e: Event) -> Option<Event> {
        if e.index == 0 {
            None
        } else {
            Some(e.prev())
        }
    }

    /// The immediate program-order successor, if present in the graph.
    pub fn po_imm_succ(&self, e: Event) -> Option<Event> {
        let n = e.next();
        if self.contains(n) {
            Some(n)
        } else {
            None
        }
    }

    /// The rf predecessor of a read (its source write), when it is a real
    /// event of the graph.
    pub fn rf_pred(&self, e: Event) -> Option<Event> {
        let r = self.label(e).read()?;
        if r.rf.is_init() || r.rf.is_bottom() {
            None
        } else {
            Some(r.rf)
        }
    }

    /// The external (inter-thread) rf predecessor.
    pub fn rfe_pred(&self, e: Event) -> Option<Event> {
        self.rf_pred(e).filter(|w| w.thread != e.thread)
    }

    /// The internal (same-thread) rf predecessor.
    pub fn rfi_pred(&self, e: Event) -> Option<Event> {
        self.rf_pred(e).filter(|w| w.thread == e.thread)
    }

    /// The readers of the write at `e`, in insertion order.
    pub fn rf_succs(&self, e: Event) -> &[Event] {
        self.label(e).write().map_or(&[], |w| w.readers.as_slice())
    }

    /// The coherence predecessors of the write at `e` (earlier in mo).
    pub fn co_preds<'a>(&'a self, e: Event) -> impl Iterator<Item = Event> + 'a {
        let addr = self.label(e).addr();
        let (mo, idx) = match addr {
            Some(a) => {
                let mo = self.stores(a);
                let idx = mo.iter().position(|&w| w == e).unwrap_or(0);
                (mo, idx)
            }
            None => (&[] as &[Event], 0),
        };
        mo[..idx].iter().rev().copied()
    }

    /// The coherence successors of the write at `e` (later in mo).
    pub fn co_succs<'a>(&'a self, e: Event) -> impl Iterator<Item = Event> + 'a {
        let addr = self.label(e).addr();
        let (mo, idx) = match addr {
            Some(a) => {
                let mo = self.stores(a);
                let idx = mo.iter().position(|&w| w == e).map_or(mo.len(), |i| i + 1);
                (mo, idx)
            }
            None => (&[] as &[Event], 0),
        };
        mo[idx..].iter().copied()
    }

    /// The immediate coherence predecessor of `e`, if any.
    pub fn co_imm_pred(&self, e: Event) -> Option<Event> {
        self.co_preds(e).next()
    }

    /// The immediate coherence successor of `e`, if any.
    pub fn co_imm_succ(&self, e: Event) -> Option<Event> {
        self.co_succs(e).next()
    }

    /// The from-read predecessors of the write at `e`: reads observing a
    /// coherence-earlier write, the initializer included. Empty for
    /// non-writes.
    pub fn fr_init_preds(&self, e: Event) -> Vec<Event> {
        if !self.label(e).is_write() {
            return Vec::new();
        }
        let addr = match self.label(e).addr() {
            Some(a) => a,
            None => return Vec::new(),
        };
        let mut preds: Vec<Event> = self
            .co_preds(e)
            .flat_map(|w| self.rf_succs(w).to_vec())
            .collect();
        preds.extend(self.init_rfs_at(addr));
        preds.retain(|&r| r != e);
        preds
    }

    /// The from-read successors of the read at `e`: coherence successors
    /// of its rf source.
    pub fn fr_succs(&self, e: Event) -> Vec<Event> {
        let r = match self.label(e).read() {
            Some(r) => r,
            None => return Vec::new(),
        };
        if r.rf.is_bottom() {
            return Vec::new();
        }
        if r.rf.is_init() {
            return self.stores(r.addr).to_vec();
        }
        self.co_succs(r.rf).collect()
    }

    /// The thread-create predecessor of a thread-start event.
    pub fn tc_pred(&self, e: Event) -> Option<Event> {
        match self.label(e).kind() {
            LabelKind::ThreadStart { parent_create, .. } if !parent_create.is_init() => {
                Some(*parent_create)
            }
            _ => None,
        }
    }

    /// The start event of the thread created at `e`.
    pub fn tc_succ(&self, e: Event) -> Option<Event> {
        match self.label(e).kind() {
            LabelKind::ThreadCreate { child_tid } => {
                let s = Event::new(*child_tid, 0);
                if self.contains(s) {
                    Some(s)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// The finish event a join synchronizes with, when the child has
    /// finished.
    pub fn tj_pred(&self, e: Event) -> Option<Event> {
        match self.label(e).kind() {
            LabelKind::ThreadJoin { child_tid } => {
                if self.thread_len(*child_tid) == 0 {
                    return None;
                }
                let last = self.last_thread_event(*child_tid);
                if self.label(last).is_finish() {
                    Some(last)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// The join event that synchronizes with the thread-finish at `e`.
    pub fn tj_succ(&self, e: Event) -> Option<Event> {
        if !self.label(e).is_finish() {
            return None;
        }
        self.labels()
            .find(|l| matches!(l.kind(), LabelKind::ThreadJoin { child_tid } if *child_tid == e.thread))
            .map(|l| l.pos())
    }

    /// The immediate same-location program-order predecessor.
    pub fn poloc_imm_pred(&self, e: Event) -> Option<Event> {
        let addr = self.label(e).addr()?;
        let mut i = e.index;
        while i > 0 {
            i -= 1;
            let p = Event::new(e.thread, i);
            if self.label(p).addr() == Some(addr) {
                return Some(p);
            }
        }
        None
    }

    /// Address-dependency predecessors of `e`.
    pub fn addr_preds(&self, e: Event) -> EventSet {
        self.label(e).deps().addr.clone()
    }

    /// Data-dependency predecessors of `e`.
    pub fn data_preds(&self, e: Event) -> EventSet {
        self.label(e).deps().data.clone()
    }

    /// Control-dependency predecessors of `e`.
    pub fn ctrl_preds(&self, e: Event) -> EventSet {
        self.label(e).deps().ctrl.clone()
    }

    /// Detour predecessors of the read at `e`: same-thread earlier writes
    /// to the same location that are coherence-before the read's external
    /// rf source.
    pub fn detour_preds(&self, e: Event) -> Vec<Event> {
        let rf = match self.rfe_pred(e) {
            Some(w) => w,
            None => return Vec::new(),
        };
        let addr = self.label(e).addr().unwrap();
        let before_rf: Vec<Event> = self.co_preds(rf).collect();
        (0..e.index)
            .map(|i| Event::new(e.thread, i))
            .filter(|&p| {
                self.label(p).addr() == Some(addr)
                    && self.label(p).is_write()
                    && before_rf.contains(&p)
            })
            .collect()
    }

    /* ---------------- RMW structure ---------------- */

    /// Whether `e` is the read part of a completed RMW: an RMW-flavored
    /// read immediately followed in po by its matching write.
    pub fn is_rmw_load(&self, e: Event) -> bool {
        let lab = match self.try_label(e) {
            Some(l) => l,
            None => return false,
        };
        if !lab.is_rmw_read_kind() {
            return false;
        }
        match self.try_label(e.next()) {
            Some(n) => n.is_rmw_write_kind() && n.addr() == lab.addr(),
            None => false,
        }
    }

    /// Whether `e` is the write part of an RMW.
    pub fn is_rmw_store(&self, e: Event) -> bool {
        self.try_label(e).map_or(false, |l| l.is_rmw_write_kind())
    }

    /// Conflicting pending RMWs: other RMW reads observing the same write
    /// as the RMW whose write part is `store`. An execution in which two
    /// RMWs read from the same write violates atomicity and must be
    /// revisited away.
    pub fn pending_rmws(&self, store: Event) -> Vec<Event> {
        debug_assert!(self.is_rmw_store(store));
        let read = store.prev();
        let rf = self.label(read).read().expect("rmw store without read").rf;
        let mut pending: Vec<Event> = self
            .labels()
            .filter(|l| {
                l.is_rmw_read_kind()
                    && l.pos() != read
                    && l.read().map(|r| r.rf) == Some(rf)
                    && l.addr() == self.label(read).addr()
                    && self.is_rmw_load(l.pos())
            })
            .map(|l| l.pos())
            .collect();
        pending.sort_by_key(|&e| self.label(e).stamp());
        pending
    }

    /* ---------------- revisit support ---------------- */

    /// The reads of `addr` that a new store may backward-revisit: still
    /// flagged revisitable, stamped before the store, and not in the
    /// store's pporf prefix.
    pub fn revisitable_reads(&self, addr: SAddr, store: Event, pporf: &VectorClock) -> Vec<Event> {
        let stamp = self.label(store).stamp();
        let mut loads: Vec<Event> = self
            .labels()
            .filter(|l| {
                l.read().map_or(false, |r| {
                    r.addr == addr && r.revisitable && l.stamp() < stamp && !pporf.contains(l.pos())
                })
            })
            .map(|l| l.pos())
            .collect();
        loads.sort_by_key(|&e| self.label(e).stamp());
        loads
    }

    /// The view of everything stamped at most `s`: for each thread, the
    /// largest index whose label qualifies.
    pub fn view_from_stamp(&self, s: Stamp) -> View {
        let mut v = View::new();
        for (t, thread) in self.threads.iter().enumerate() {
            // Stamps increase along po, so scan from the back.
            for (i, lab) in thread.iter().enumerate().rev() {
                if lab.stamp() <= s {
                    v.update_idx(Event::new(t as u32, i as u32));
                    break;
                }
            }
        }
        v
    }

    /// The events that remain in the graph after `read` is backward
    /// revisited by `store`: everything stamped up to the read, plus the
    /// store's pporf prefix.
    pub fn revisit_view(&self, read: Event, store_prefix: &VectorClock) -> VectorClock {
        let base = self.view_from_stamp(self.label(read).stamp());
        let mut v = store_prefix.clone();
        v.update_view(&base);
        v
    }

    /// Clones of the labels inside `prefix` stamped after `after`, in
    /// ascending stamp order. This is the part of a revisiting store's
    /// causal prefix that a graph cut would destroy.
    pub fn prefix_labels_not_before(&self, prefix: &VectorClock, after: Stamp) -> Vec<Label> {
        let mut labs: Vec<Label> = self
            .labels()
            .filter(|l| l.stamp() > after && prefix.contains(l.pos()))
            .cloned()
            .collect();
        labs.sort_by_key(|l| l.stamp());
        labs
    }

    /// The positions of `prefix`'s reads paired with their rf sources;
    /// together with the store these identify the prefix for duplicate
    /// suppression.
    pub fn extract_rfs(&self, prefix: &[Label]) -> Vec<Event> {
        prefix
            .iter()
            .filter_map(|l| l.read().map(|r| r.rf))
            .collect()
    }

    /// Records, for every store in `prefix`, the coherence successor it
    /// must be re-inserted before, so a later [`Self::restore_store_prefix`]
    /// can rebuild the modification order. A successor of
    /// [`Event::BOTTOM`] means "append".
    pub fn save_coherence_status(&self, prefix: &[Label], read: Event) -> Vec<(Event, Event)> {
        let cut_stamp = self.label(read).stamp();
        let in_prefix =
            |e: Event| -> bool { prefix.iter().any(|l| l.pos() == e) };
        let mut addrs: Vec<SAddr> = prefix
            .iter()
            .filter(|l| l.is_write())
            .filter_map(|l| l.addr())
            .collect();
        addrs.sort();
        addrs.dedup();

        let mut placings = Vec::new();
        for addr in addrs {
            let mo = self.stores(addr);
            for (i, &w) in mo.iter().enumerate() {
                if !in_prefix(w) {
                    continue;
                }
                // The nearest mo-successor that survives the cut.
                let succ = mo[i + 1..]
                    .iter()
                    .copied()
                    .find(|&s| !in_prefix(s) && self.label(s).stamp() <= cut_stamp)
                    .unwrap_or(Event::BOTTOM);
                placings.push((w, succ));
            }
        }
        placings
    }

    /* ---------------- graph surgery ---------------- */

    /// Removes every label stamped after `s` and repairs all secondary
    /// structure: per-thread sequences shrink, cut events leave coherence
    /// and reader lists, and reads whose rf was cut point to
    /// [`Event::BOTTOM`]. Idempotent.
    pub fn cut_to_stamp(&mut self, s: Stamp) {
        debug!("cutting graph to {:?}", s);
        for thread in &mut self.threads {
            let keep = thread
                .iter()
                .position(|l| l.stamp() > s)
                .unwrap_or(thread.len());
            thread.truncate(keep);
        }

        // Drop empty trailing threads so thread ids can be reused.
        while self
            .threads
            .last()
            .map_or(false, |t| t.is_empty())
        {
            self.threads.pop();
        }

        let lens: Vec<usize> = self.threads.iter().map(|t| t.len()).collect();
        let contains = move |e: Event| -> bool {
            (e.thread as usize) < lens.len() && (e.index as usize) < lens[e.thread as usize]
        };

        for mo in self.coherence.values_mut() {
            mo.retain(|&e| contains(e));
        }

        let mut max = Stamp::start();
        for thread in &mut self.threads {
            for lab in thread.iter_mut() {
                if lab.stamp() > max {
                    max = lab.stamp();
                }
                if let Some(w) = lab.write_mut() {
                    w.readers.retain(|&mut r| contains(r));
                }
                if let Some(r) = lab.read_mut() {
                    let rf = r.rf;
                    if !rf.is_init() && !rf.is_bottom() && !contains(rf) {
                        r.rf = Event::BOTTOM;
                    }
                }
            }
        }
        self.next_stamp = if self.labels().next().is_none() {
            Stamp::start()
        } else {
            max.next()
        };
    }

    /// Re-installs a saved prefix after a cut: labels keep their original
    /// stamps and positions, saved mo placings are replayed, and rf edges
    /// into and out of the prefix are rebound.
    pub fn restore_store_prefix(
        &mut self,
        read: Event,
        mut prefix: Vec<Label>,
        placings: &[(Event, Event)],
    ) {
        debug!(
            "restoring {} prefix labels above {}",
            prefix.len(),
            read
        );
        prefix.sort_by_key(|l| l.stamp());

        for lab in &mut prefix {
            // Reader lists are rebuilt below from the surviving rf edges.
            if let Some(w) = lab.write_mut() {
                w.readers.retain(|&mut r| r != read);
            }
        }

        for lab in prefix {
            while self.threads.len() <= lab.pos().thread as usize {
                self.add_new_thread();
            }
            let thread = &mut self.threads[lab.pos().thread as usize];
            while (thread.len() as u32) < lab.pos().index {
                let filler = Event::new(lab.pos().thread, thread.len() as u32);
                thread.push(Label::empty(filler));
            }
            self.add_label_with_stamp(lab);
        }

        // Replay the coherence placings, in order.
        for &(store, succ) in placings {
            let addr = self.label(store).addr().expect("placing of a non-write");
            let mo = self.coherence.entry(addr).or_default();
            debug_assert!(!mo.contains(&store));
            let at = if succ.is_bottom() {
                mo.len()
            } else {
                mo.iter().position(|&e| e == succ).unwrap_or(mo.len())
            };
            mo.insert(at, store);
        }

        // Rebind rf edges: restored reads re-register with their sources,
        // and surviving reads whose rf had been cut to bottom recover it
        // from the restored writes' reader lists.
        let all: Vec<Event> = self.labels().map(|l| l.pos()).collect();
        for &e in &all {
            let (rf, is_read) = match self.label(e).read() {
                Some(r) => (r.rf, true),
                None => (Event::BOTTOM, false),
            };
            if is_read && !rf.is_init() && !rf.is_bottom() {
                if self.contains(rf) {
                    let w = self.label_mut(rf).write_mut().expect("rf into non-write");
                    if !w.readers.contains(&e) {
                        w.readers.push(e);
                    }
                } else {
                    self.label_mut(e).read_mut().unwrap().rf = Event::BOTTOM;
                }
            }
            if let Some(w) = self.label(e).write() {
                let stale: Vec<Event> = w
                    .readers
                    .iter()
                    .copied()
                    .filter(|&r| !self.contains(r))
                    .collect();
                if !stale.is_empty() {
                    let w = self.label_mut(e).write_mut().unwrap();
                    w.readers.retain(|&mut r| !stale.contains(&r));
                }
            }
        }
        for &e in &all {
            let readers: SmallVec<[Event; 2]> = match self.label(e).write() {
                Some(w) => w.readers.clone(),
                None => continue,
            };
            for r in readers {
                let rl = self.label_mut(r).read_mut().expect("reader is not a read");
                if rl.rf.is_bottom() {
                    rl.rf = e;
                }
            }
        }
    }

    /* ---------------- LAPOR helpers ---------------- */

    /// The last LAPOR lock of thread `t` with no matching unlock, if any.
    pub fn last_unmatched_lock_lapor(&self, t: u32) -> Option<Event> {
        let thread = self.threads.get(t as usize)?;
        let mut depth = 0i32;
        for (i, lab) in thread.iter().enumerate().rev() {
            match lab.kind() {
                LabelKind::UnlockLapor { .. } => depth += 1,
                LabelKind::LockLapor { .. } => {
                    if depth == 0 {
                        return Some(Event::new(t, i as u32));
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        None
    }

    /// The unlock matching the LAPOR lock at `lock`, if present.
    pub fn matching_unlock_lapor(&self, lock: Event) -> Option<Event> {
        let addr = match self.label(lock).kind() {
            LabelKind::LockLapor { lock_addr } => *lock_addr,
            _ => return None,
        };
        let mut depth = 0i32;
        for i in lock.index + 1..self.thread_len(lock.thread) as u32 {
            let e = Event::new(lock.thread, i);
            match self.label(e).kind() {
                LabelKind::LockLapor { lock_addr } if *lock_addr == addr => depth += 1,
                LabelKind::UnlockLapor { lock_addr } if *lock_addr == addr => {
                    if depth == 0 {
                        return Some(e);
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        None
    }

    /// The lock-acquisition ordering under LAPOR: every currently
    /// unmatched lock event, by stamp.
    pub fn lb_ordering_lapor(&self) -> Vec<Event> {
        let mut locks: Vec<Event> = (0..self.num_threads() as u32)
            .filter_map(|t| self.last_unmatched_lock_lapor(t))
            .collect();
        locks.sort_by_key(|&e| self.label(e).stamp());
        locks
    }

    /* ---------------- allocation tracking ---------------- */

    /// The `Malloc` label covering `addr`, if one exists.
    pub fn alloc_covering(&self, addr: SAddr) -> Option<Event> {
        self.labels()
            .find(|l| match l.kind() {
                LabelKind::Malloc { addr: a, size, .. } => {
                    *a <= addr && addr.get() < a.get() + *size
                }
                _ => false,
            })
            .map(|l| l.pos())
    }

    /// All `Free` labels of exactly `addr`.
    pub fn frees_of(&self, addr: SAddr) -> Vec<Event> {
        self.labels()
            .filter(|l| matches!(l.kind(), LabelKind::Free { freed_addr } if *freed_addr == addr))
            .map(|l| l.pos())
            .collect()
    }

    /* ---------------- printing ---------------- */

    /// Renders `po ∪ rf` (up to `upto`, when given) in DOT format.
    pub fn to_dot(&self, upto: Option<Event>) -> String {
        use std::fmt::Write;
        let limit = upto.map(|e| self.label(e).stamp());
        let visible = |l: &Label| limit.map_or(true, |s| l.stamp() <= s);
        let mut out = String::from("digraph G {\n");
        for (t, thread) in self.threads.iter().enumerate() {
            let _ = writeln!(out, "  subgraph cluster_{} {{ label=\"T{}\";", t, t);
            for lab in thread.iter().filter(|l| visible(l)) {
                let _ = writeln!(
                    out,
                    "    \"{}\" [label=\"{}\"];",
                    lab.pos(),
                    lab
                );
            }
            let _ = writeln!(out, "  }}");
            for w in thread.windows(2) {
                if visible(&w[0]) && visible(&w[1]) {
                    let _ = writeln!(out, "  \"{}\" -> \"{}\";", w[0].pos(), w[1].pos());
                }
            }
        }
        for lab in self.labels().filter(|l| visible(l)) {
            if let Some(r) = lab.read() {
                if !r.rf.is_init() && !r.rf.is_bottom() && self.contains(r.rf) {
                    let _ = writeln!(
                        out,
                        "  \"{}\" -> \"{}\" [color=green,constraint=false];",
                        r.rf,
                        lab.pos()
                    );
                }
            }
        }
        out.push_str("}\n");
        out
    }

    /// A human-readable rendering of the trace leading to `upto`.
    pub fn trace_before(&self, upto: Event) -> String {
        use std::fmt::Write;
        let limit = self.label(upto).stamp();
        let mut out = String::new();
        for lab in self.labels_by_stamp() {
            if lab.stamp() > limit {
                break;
            }
            if lab.is_empty_label() {
                continue;
            }
            let _ = writeln!(out, "{}", lab);
        }
        out
    }

    /// Checks the structural invariants; used by the test suite and debug
    /// builds.
    pub fn validate(&self) {
        for (t, thread) in self.threads.iter().enumerate() {
            let mut prev = None;
            for (i, lab) in thread.iter().enumerate() {
                assert_eq!(lab.pos(), Event::new(t as u32, i as u32), "label misplaced");
                if !lab.is_empty_label() {
                    if let Some(p) = prev {
                        assert!(p < lab.stamp(), "stamps must extend po");
                    }
                    prev = Some(lab.stamp());
                }
            }
        }
        for (addr, mo) in &self.coherence {
            for &w in mo {
                let lab = self.label(w);
                assert!(lab.is_write(), "non-write in coherence");
                assert_eq!(lab.addr(), Some(*addr), "coherence entry at wrong address");
            }
        }
        for lab in self.labels() {
            if let Some(r) = lab.read() {
                if !r.rf.is_init() && !r.rf.is_bottom() {
                    let w = self.label(r.rf);
                    assert!(
                        w.write().map_or(false, |w| w.readers.contains(&lab.pos())),
                        "rf without matching reader entry"
                    );
                }
            }
            if let Some(w) = lab.write() {
                for &r in &w.readers {
                    assert_eq!(self.label(r).read().map(|r| r.rf), Some(lab.pos()));
                }
            }
        }
    }
}

impl fmt::Debug for ExecutionGraph {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for thread in &self.threads {
            for lab in thread {
                writeln!(fmt, "{}", lab)?;
            }
        }
        Ok(())
    }
}

/// Convenience constructors used by the driver; kept here so the label
/// layout stays private to the graph side of the crate.
pub(crate) fn mk_read(
    pos: Event,
    ord: MemOrdering,
    addr: SAddr,
    size: crate::value::ASize,
    atype: crate::value::AType,
    kind: ReadKind,
    annot: Option<crate::label::Annot>,
    rf: Event,
) -> Label {
    Label::new(
        pos,
        ord,
        LabelKind::Read(crate::label::ReadLabel {
            addr,
            size,
            atype,
            rf,
            annot,
            kind,
            revisitable: true,
        }),
    )
}

pub(crate) fn mk_write(
    pos: Event,
    ord: MemOrdering,
    addr: SAddr,
    size: crate::value::ASize,
    atype: crate::value::AType,
    val: SVal,
    kind: WriteKind,
) -> Label {
    Label::new(
        pos,
        ord,
        LabelKind::Write(crate::label::WriteLabel {
            addr,
            size,
            atype,
            val,
            readers: SmallVec::new(),
            kind,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ASize, AType};

    fn read_at(g: &mut ExecutionGraph, pos: Event, addr: SAddr, rf: Event) -> Event {
        let lab = mk_read(
            pos,
            MemOrdering::Relaxed,
            addr,
            ASize::new(4),
            AType::Unsigned,
            ReadKind::Plain,
            None,
            rf,
        );
        let e = g.add_label(lab);
        g.change_rf(e, rf);
        e
    }

    fn write_at(g: &mut ExecutionGraph, pos: Event, addr: SAddr, val: u64) -> Event {
        let lab = mk_write(
            pos,
            MemOrdering::Relaxed,
            addr,
            ASize::new(4),
            AType::Unsigned,
            SVal::UInt(val),
            WriteKind::Plain,
        );
        let e = g.add_label(lab);
        let pos = g.stores(addr).len();
        g.add_store_at(addr, e, pos);
        e
    }

    fn start_thread(g: &mut ExecutionGraph) -> u32 {
        let t = g.add_new_thread();
        g.add_label(Label::new(
            Event::new(t, 0),
            MemOrdering::NotAtomic,
            LabelKind::ThreadStart {
                parent_create: Event::INIT,
                symmetric_tid: None,
            },
        ));
        t
    }

    fn addr() -> SAddr {
        let mut alloc = crate::mem::SAddrAllocator::new();
        alloc.alloc_static(4, 4, false)
    }

    #[test]
    fn stamps_extend_po() {
        let mut g = ExecutionGraph::new();
        let t = start_thread(&mut g);
        let x = addr();
        g.track_coherence(x);
        let w = write_at(&mut g, Event::new(t, 1), x, 1);
        let r = read_at(&mut g, Event::new(t, 2), x, w);
        assert!(g.label(w).stamp() < g.label(r).stamp());
        g.validate();
    }

    #[test]
    fn change_rf_maintains_readers() {
        let mut g = ExecutionGraph::new();
        let t = start_thread(&mut g);
        let x = addr();
        g.track_coherence(x);
        let w1 = write_at(&mut g, Event::new(t, 1), x, 1);
        let w2 = write_at(&mut g, Event::new(t, 2), x, 2);
        let r = read_at(&mut g, Event::new(t, 3), x, w1);
        assert_eq!(g.rf_succs(w1), &[r]);
        g.change_rf(r, w2);
        assert!(g.rf_succs(w1).is_empty());
        assert_eq!(g.rf_succs(w2), &[r]);
        g.validate();
    }

    #[test]
    fn cut_to_stamp_is_idempotent() {
        let mut g = ExecutionGraph::new();
        let t = start_thread(&mut g);
        let x = addr();
        g.track_coherence(x);
        let w1 = write_at(&mut g, Event::new(t, 1), x, 1);
        let _w2 = write_at(&mut g, Event::new(t, 2), x, 2);
        let _r = read_at(&mut g, Event::new(t, 3), x, w1);

        let s = g.label(w1).stamp();
        g.cut_to_stamp(s);
        let after_once = format!("{:?}", g);
        assert_eq!(g.thread_len(t), 2);
        assert_eq!(g.stores(x), &[w1]);
        g.cut_to_stamp(s);
        assert_eq!(format!("{:?}", g), after_once);
        g.validate();
    }

    #[test]
    fn cut_rebinds_dangling_rf_to_bottom() {
        let mut g = ExecutionGraph::new();
        let t0 = start_thread(&mut g);
        let t1 = start_thread(&mut g);
        let x = addr();
        g.track_coherence(x);
        let r_placeholder = read_at(&mut g, Event::new(t0, 1), x, Event::INIT);
        let w = write_at(&mut g, Event::new(t1, 1), x, 1);
        g.change_rf(r_placeholder, w);

        g.cut_to_stamp(g.label(r_placeholder).stamp().next());
        // The write survives; now cut below it.
        g.cut_to_stamp(g.label(r_placeholder).stamp());
        assert!(g.label(r_placeholder).read().unwrap().rf.is_bottom());
        g.validate();
    }

    #[test]
    fn restore_after_cut_recreates_graph() {
        let mut g = ExecutionGraph::new();
        let t0 = start_thread(&mut g);
        let t1 = start_thread(&mut g);
        let x = addr();
        g.track_coherence(x);
        let r = read_at(&mut g, Event::new(t0, 1), x, Event::INIT);
        let w1 = write_at(&mut g, Event::new(t1, 1), x, 1);
        let w2 = write_at(&mut g, Event::new(t1, 2), x, 2);

        // Pretend w1, w2 form the prefix of a backward revisit of r.
        let mut prefix_view = crate::view::View::new();
        prefix_view.update_idx(w2);
        let prefix_clock = VectorClock::Plain(prefix_view);
        let prefix = g.prefix_labels_not_before(&prefix_clock, g.label(r).stamp());
        assert_eq!(prefix.len(), 2);
        let placings = g.save_coherence_status(&prefix, r);

        let snapshot = format!("{:?}", g);
        let mo_before = g.stores(x).to_vec();
        g.cut_to_stamp(g.label(r).stamp());
        assert!(g.stores(x).is_empty());
        g.restore_store_prefix(r, prefix, &placings);
        assert_eq!(format!("{:?}", g), snapshot);
        assert_eq!(g.stores(x), mo_before.as_slice());
        assert_eq!(g.label(w1).write().unwrap().val, SVal::UInt(1));
        assert_eq!(g.label(w2).write().unwrap().val, SVal::UInt(2));
        g.validate();
    }

    #[test]
    fn coherence_iterators() {
        let mut g = ExecutionGraph::new();
        let t = start_thread(&mut g);
        let x = addr();
        g.track_coherence(x);
        let w1 = write_at(&mut g, Event::new(t, 1), x, 1);
        let w2 = write_at(&mut g, Event::new(t, 2), x, 2);
        let w3 = write_at(&mut g, Event::new(t, 3), x, 3);
        assert_eq!(g.co_imm_pred(w2), Some(w1));
        assert_eq!(g.co_imm_succ(w2), Some(w3));
        assert!(g.is_co_maximal(x, w3));
        assert!(!g.is_co_maximal(x, w1));
        g.change_store_offset(x, w3, 0);
        assert_eq!(g.stores(x), &[w3, w1, w2]);
    }

    #[test]
    fn fr_edges() {
        let mut g = ExecutionGraph::new();
        let t0 = start_thread(&mut g);
        let t1 = start_thread(&mut g);
        let x = addr();
        g.track_coherence(x);
        let r = read_at(&mut g, Event::new(t0, 1), x, Event::INIT);
        let w = write_at(&mut g, Event::new(t1, 1), x, 1);
        // r reads the initializer, so it is fr-before w.
        assert_eq!(g.fr_init_preds(w), vec![r]);
        assert_eq!(g.fr_succs(r), vec![w]);
    }
}
