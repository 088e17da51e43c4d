//! The RC11 checker (also covering the release/acquire fragment).
//!
//! Views: `view(0)` is the C11 happens-before prefix, built from program
//! order and the synchronizes-with edges of release/acquire accesses,
//! fences, and release sequences through RMW chains; `view(1)` on writes
//! is the message view a synchronizing reader acquires.
//!
//! Consistency: per-location coherence against the hb views, acyclicity
//! of `po ∪ rf` (no-thin-air), and -- for full RC11 -- acyclicity of `psc`
//! over the SC-ordered events.

use super::{
    base_hb_view, check_access_errors, hb_coherence_holds, psc_acyclic, ConsistencyChecker,
    NodeCountStatus, NodeStatus,
};
use crate::errors::VerificationError;
use crate::event::Event;
use crate::graph::ExecutionGraph;
use crate::view::{VectorClock, View};

pub(super) struct Rc11Checker {
    check_sc_axiom: bool,
    visited_acyclic0: Vec<NodeCountStatus>,
    visited_accepting: u16,
    visited_pporf0: Vec<NodeStatus>,
}

impl Rc11Checker {
    pub(super) fn new() -> Rc11Checker {
        Rc11Checker {
            check_sc_axiom: true,
            visited_acyclic0: Vec::new(),
            visited_accepting: 0,
            visited_pporf0: Vec::new(),
        }
    }

    /// The release/acquire fragment: identical except that no psc
    /// acyclicity is enforced.
    pub(super) fn without_sc_axiom() -> Rc11Checker {
        Rc11Checker {
            check_sc_axiom: false,
            ..Rc11Checker::new()
        }
    }

    /// The message view of the write at `w`: what an acquire reader of
    /// `w` synchronizes with.
    fn msg_view(&self, g: &ExecutionGraph, w: Event) -> View {
        if w.is_init() || w.is_bottom() {
            return View::new();
        }
        g.label(w).view(1).clone()
    }

    /// The view released by the last release-or-stronger fence po-before
    /// `e`, if one exists.
    fn fence_rel_view_before(&self, g: &ExecutionGraph, e: Event) -> Option<View> {
        let mut i = e.index;
        while i > 0 {
            i -= 1;
            let p = Event::new(e.thread, i);
            let lab = g.label(p);
            if lab.is_fence() && lab.ordering().is_at_least_release() {
                return Some(g.view0(p).clone());
            }
        }
        None
    }

    /// Folds into `v` the message views of the relaxed-or-stronger reads
    /// po-before an acquire fence.
    fn fence_acq_rf_po_before(&self, g: &ExecutionGraph, e: Event, v: &mut View) {
        let mut i = e.index;
        while i > 0 {
            i -= 1;
            let p = Event::new(e.thread, i);
            let lab = g.label(p);
            if let Some(r) = lab.read() {
                if !lab.is_not_atomic() && !r.rf.is_bottom() {
                    v.update(&self.msg_view(g, r.rf));
                }
            }
        }
    }

    /* no-thin-air: acyclic(po ∪ rf) */

    fn visit_acyclic0(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        let stamp = g.label(e).stamp().get() as usize;
        self.visited_accepting += 1;
        self.visited_acyclic0[stamp] =
            NodeCountStatus::new(self.visited_accepting, NodeStatus::Entered);

        let mut preds: Vec<Event> = Vec::new();
        preds.extend(g.po_imm_pred(e));
        preds.extend(g.rf_pred(e));
        preds.extend(g.tc_pred(e));
        preds.extend(g.tj_pred(e));
        for p in preds {
            let node = self.visited_acyclic0[g.label(p).stamp().get() as usize];
            match node.status {
                NodeStatus::Unseen => {
                    if !self.visit_acyclic0(g, p) {
                        return false;
                    }
                }
                NodeStatus::Entered => {
                    if self.visited_accepting > node.count {
                        return false;
                    }
                }
                NodeStatus::Left => {}
            }
        }
        self.visited_accepting -= 1;
        self.visited_acyclic0[stamp] =
            NodeCountStatus::new(self.visited_accepting, NodeStatus::Left);
        true
    }

    fn is_acyclic(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        self.visited_accepting = 0;
        self.visited_acyclic0
            .clear();
        self.visited_acyclic0
            .resize(g.stamp_bound(), NodeCountStatus::default());
        self.visit_acyclic0(g, e)
    }

    fn visit_pporf0(&mut self, g: &ExecutionGraph, e: Event, pporf: &mut View) {
        let stamp = g.label(e).stamp().get() as usize;
        self.visited_pporf0[stamp] = NodeStatus::Entered;
        pporf.update_idx(e);

        let mut preds: Vec<Event> = Vec::new();
        preds.extend(g.tc_pred(e));
        preds.extend(g.tj_pred(e));
        preds.extend(g.rfe_pred(e));
        preds.extend(g.po_imm_pred(e));
        for p in preds {
            if self.visited_pporf0[g.label(p).stamp().get() as usize] == NodeStatus::Unseen {
                self.visit_pporf0(g, p, pporf);
            }
        }
        self.visited_pporf0[stamp] = NodeStatus::Left;
    }
}

impl ConsistencyChecker for Rc11Checker {
    fn calculate_views(&mut self, g: &ExecutionGraph, e: Event) -> Vec<View> {
        let lab = g.label(e);
        let mut hb = base_hb_view(g, e);

        if let Some(r) = lab.read() {
            if lab.ordering().is_at_least_acquire() && !r.rf.is_bottom() {
                hb.update(&self.msg_view(g, r.rf));
            }
        }
        if lab.is_fence() && lab.ordering().is_at_least_acquire() {
            self.fence_acq_rf_po_before(g, e, &mut hb);
        }

        if lab.is_write() {
            let mut msg = if lab.ordering().is_at_least_release() {
                hb.clone()
            } else {
                self.fence_rel_view_before(g, e).unwrap_or_default()
            };
            if lab.is_rmw_write_kind() {
                let read = g.label(e.prev());
                if let Some(r) = read.read() {
                    if !r.rf.is_bottom() {
                        msg.update(&self.msg_view(g, r.rf));
                    }
                }
            }
            return vec![hb, msg];
        }
        vec![hb]
    }

    fn is_consistent(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        if !self.is_acyclic(g, e) {
            return false;
        }
        if !hb_coherence_holds(g) {
            return false;
        }
        if self.check_sc_axiom && !psc_acyclic(g) {
            return false;
        }
        true
    }

    fn check_errors(&mut self, g: &ExecutionGraph, e: Event) -> Option<VerificationError> {
        check_access_errors(g, e)
    }

    fn prefix_view(&mut self, g: &ExecutionGraph, e: Event) -> VectorClock {
        let mut pporf = View::new();
        pporf.update_idx(e);
        self.visited_pporf0.clear();
        self.visited_pporf0.resize(g.stamp_bound(), NodeStatus::Unseen);
        self.visit_pporf0(g, e, &mut pporf);
        VectorClock::Plain(pporf)
    }
}
