//! Data, address, and control dependency tracking.
//!
//! Dependency-tracking memory models (IMM) need to know, for every memory
//! event, which po-earlier events its address, data, and control flow
//! depend on. The tracker maintains this per thread while the interpreter
//! runs; every emitted label captures a snapshot as an [`EventDeps`].

use crate::event::{Event, EventSet};
use crate::ir::ValueId;
use rustc_hash::FxHashMap;

/// A set of events some value or decision depends on.
pub type DepInfo = EventSet;

/// The dependency snapshot carried by a label.
#[derive(Clone, Default, Debug)]
pub struct EventDeps {
    /// Events the accessed address depends on.
    pub addr: DepInfo,
    /// Events the stored/compared value depends on.
    pub data: DepInfo,
    /// Events the enclosing control-flow decisions depend on.
    pub ctrl: DepInfo,
    /// Address dependencies of po-earlier accesses (`addr;po`).
    pub addr_po: DepInfo,
    /// Events a same-location CAS chain depends on.
    pub cas: DepInfo,
}

impl EventDeps {
    /// Whether no dependencies are recorded at all.
    pub fn is_empty(&self) -> bool {
        self.addr.is_empty()
            && self.data.is_empty()
            && self.ctrl.is_empty()
            && self.addr_po.is_empty()
            && self.cas.is_empty()
    }
}

#[derive(Clone, Default, Debug)]
struct ThreadDeps {
    /// Dependencies of each live SSA value.
    data: FxHashMap<ValueId, DepInfo>,
    /// Control dependencies accumulated so far; monotonic within the
    /// thread's execution.
    ctrl: DepInfo,
    /// Address dependencies of all po-earlier accesses.
    addr_po: DepInfo,
    /// CAS dependencies accumulated so far.
    cas: DepInfo,
}

/// Tracks dependencies for every thread of the program under test.
///
/// Inactive (and empty) unless the memory model requested dependency
/// tracking, in which case the interpreter feeds it on every instruction.
#[derive(Clone, Default, Debug)]
pub struct DepTracker {
    threads: Vec<ThreadDeps>,
    active: bool,
}

impl DepTracker {
    /// Creates a tracker; `active` decides whether it records anything.
    pub fn new(active: bool) -> DepTracker {
        DepTracker {
            threads: Vec::new(),
            active,
        }
    }

    /// Whether the tracker is recording.
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn thread_mut(&mut self, tid: u32) -> &mut ThreadDeps {
        let t = tid as usize;
        if self.threads.len() <= t {
            self.threads.resize_with(t + 1, ThreadDeps::default);
        }
        &mut self.threads[t]
    }

    /// Forgets everything recorded for `tid` (on thread restart).
    pub fn clear_thread(&mut self, tid: u32) {
        if let Some(t) = self.threads.get_mut(tid as usize) {
            *t = ThreadDeps::default();
        }
    }

    /// The dependencies of SSA value `v` in thread `tid`.
    pub fn value_deps(&self, tid: u32, v: ValueId) -> DepInfo {
        if !self.active {
            return DepInfo::default();
        }
        self.threads
            .get(tid as usize)
            .and_then(|t| t.data.get(&v))
            .cloned()
            .unwrap_or_default()
    }

    /// Records that SSA value `dst` carries the dependencies of `src`.
    pub fn copy_value_deps(&mut self, tid: u32, dst: ValueId, src: ValueId) {
        if !self.active {
            return;
        }
        let deps = self.value_deps(tid, src);
        self.add_value_deps(tid, dst, &deps);
    }

    /// Unions `deps` into the dependencies of SSA value `dst`.
    pub fn add_value_deps(&mut self, tid: u32, dst: ValueId, deps: &DepInfo) {
        if !self.active || deps.is_empty() {
            return;
        }
        self.thread_mut(tid).data.entry(dst).or_default().union(deps);
    }

    /// Records that `dst` was produced by the memory event `e` (e.g., the
    /// destination of a load carries a dependency on the load itself).
    pub fn set_value_event(&mut self, tid: u32, dst: ValueId, e: Event) {
        if !self.active {
            return;
        }
        let entry = self.thread_mut(tid).data.entry(dst).or_default();
        entry.insert(e);
    }

    /// Adds the dependencies of `v` to the thread's control dependencies
    /// (a branch was taken on `v`).
    pub fn add_ctrl_from_value(&mut self, tid: u32, v: ValueId) {
        if !self.active {
            return;
        }
        let deps = self.value_deps(tid, v);
        self.thread_mut(tid).ctrl.union(&deps);
    }

    /// Adds the dependencies of `v` to the thread's accumulated address
    /// dependencies (an access address was computed from `v`).
    pub fn add_addr_po_from_value(&mut self, tid: u32, v: ValueId) {
        if !self.active {
            return;
        }
        let deps = self.value_deps(tid, v);
        self.thread_mut(tid).addr_po.union(&deps);
    }

    /// Adds the dependencies of `v` to the thread's CAS dependencies.
    pub fn add_cas_from_value(&mut self, tid: u32, v: ValueId) {
        if !self.active {
            return;
        }
        let deps = self.value_deps(tid, v);
        self.thread_mut(tid).cas.union(&deps);
    }

    /// Takes the snapshot a new memory event at thread `tid` carries.
    /// `addr_src` and `data_src` name the SSA values (if any) the event's
    /// address and data were computed from.
    pub fn snapshot(
        &self,
        tid: u32,
        addr_src: Option<ValueId>,
        data_src: Option<ValueId>,
    ) -> EventDeps {
        if !self.active {
            return EventDeps::default();
        }
        let t = match self.threads.get(tid as usize) {
            Some(t) => t,
            None => return EventDeps::default(),
        };
        EventDeps {
            addr: addr_src
                .and_then(|v| t.data.get(&v))
                .cloned()
                .unwrap_or_default(),
            data: data_src
                .and_then(|v| t.data.get(&v))
                .cloned()
                .unwrap_or_default(),
            ctrl: t.ctrl.clone(),
            addr_po: t.addr_po.clone(),
            cas: t.cas.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueId;

    #[test]
    fn inactive_tracker_records_nothing() {
        let mut t = DepTracker::new(false);
        t.set_value_event(0, ValueId(0), Event::new(0, 1));
        assert!(t.snapshot(0, Some(ValueId(0)), None).is_empty());
    }

    #[test]
    fn data_deps_flow_through_values() {
        let mut t = DepTracker::new(true);
        let load = Event::new(1, 2);
        t.set_value_event(1, ValueId(3), load);
        t.copy_value_deps(1, ValueId(4), ValueId(3));
        let snap = t.snapshot(1, None, Some(ValueId(4)));
        assert!(snap.data.contains(load));
        assert!(snap.ctrl.is_empty());
    }

    #[test]
    fn ctrl_deps_are_monotonic() {
        let mut t = DepTracker::new(true);
        let load = Event::new(1, 1);
        t.set_value_event(1, ValueId(0), load);
        t.add_ctrl_from_value(1, ValueId(0));
        let snap = t.snapshot(1, None, None);
        assert!(snap.ctrl.contains(load));
    }
}
