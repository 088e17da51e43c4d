//! The IMM checker: dependency-tracking, with holey pporf prefixes.
//!
//! The preserved program order is syntactic: an access is ordered after
//! its address/data/control dependencies, after fences and acquire
//! reads, and (for writes) after same-location writes and detours;
//! release writes and synchronization events preserve all of program
//! order. The pporf prefix is therefore not po-closed and is computed as
//! a [`DepView`].

use super::{
    check_access_errors, hb_coherence_holds, psc_acyclic, rc11::Rc11Checker, ConsistencyChecker,
    NodeCountStatus, NodeStatus,
};
use crate::errors::VerificationError;
use crate::event::Event;
use crate::graph::ExecutionGraph;
use crate::label::LabelKind;
use crate::view::{DepView, VectorClock, View};

pub(super) struct ImmChecker {
    hb: Rc11Checker,
    visited_acyclic0: Vec<NodeCountStatus>,
    visited_accepting: u16,
    visited_pporf0: Vec<NodeStatus>,
}

fn is_sync_label(g: &ExecutionGraph, e: Event) -> bool {
    matches!(
        g.label(e).kind(),
        LabelKind::ThreadStart { .. }
            | LabelKind::ThreadCreate { .. }
            | LabelKind::ThreadJoin { .. }
            | LabelKind::ThreadFinish
            | LabelKind::Malloc { .. }
            | LabelKind::Free { .. }
            | LabelKind::LockLapor { .. }
            | LabelKind::UnlockLapor { .. }
    )
}

impl ImmChecker {
    pub(super) fn new() -> ImmChecker {
        ImmChecker {
            hb: Rc11Checker::new(),
            visited_acyclic0: Vec::new(),
            visited_accepting: 0,
            visited_pporf0: Vec::new(),
        }
    }

    /// The preserved-program-order predecessors of `e`.
    fn ppo_preds(&self, g: &ExecutionGraph, e: Event) -> Vec<Event> {
        let lab = g.label(e);
        let mut preds = Vec::new();

        let orders_all_po = lab.is_fence()
            || is_sync_label(g, e)
            || (lab.is_write() && lab.ordering().is_at_least_release());

        for j in 0..e.index {
            let p = Event::new(e.thread, j);
            let plab = g.label(p);
            if orders_all_po
                || plab.is_fence()
                || is_sync_label(g, p)
                || (plab.is_read() && plab.ordering().is_at_least_acquire())
            {
                preds.push(p);
            }
        }

        let deps = lab.deps();
        for set in [
            g.addr_preds(e),
            g.data_preds(e),
            g.ctrl_preds(e),
            deps.addr_po.clone(),
            deps.cas.clone(),
        ]
        .iter()
        {
            for d in set.iter() {
                if d.thread == e.thread && d.index < e.index && !preds.contains(&d) {
                    preds.push(d);
                }
            }
        }

        if lab.is_write() {
            if let Some(p) = g.poloc_imm_pred(e) {
                if !preds.contains(&p) {
                    preds.push(p);
                }
            }
        }
        if lab.is_read() {
            for p in g.detour_preds(e) {
                if !preds.contains(&p) {
                    preds.push(p);
                }
            }
        }
        if g.is_rmw_store(e) {
            let p = e.prev();
            if !preds.contains(&p) {
                preds.push(p);
            }
        }
        preds
    }

    fn visit_acyclic0(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        let stamp = g.label(e).stamp().get() as usize;
        self.visited_accepting += 1;
        self.visited_acyclic0[stamp] =
            NodeCountStatus::new(self.visited_accepting, NodeStatus::Entered);

        let mut preds = self.ppo_preds(g, e);
        preds.extend(g.rfe_pred(e));
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
        self.visited_acyclic0.clear();
        self.visited_acyclic0
            .resize(g.stamp_bound(), NodeCountStatus::default());
        self.visit_acyclic0(g, e)
    }

    fn visit_pporf0(&mut self, g: &ExecutionGraph, e: Event, pporf: &mut DepView) {
        let stamp = g.label(e).stamp().get() as usize;
        self.visited_pporf0[stamp] = NodeStatus::Entered;
        pporf.add_hole(e);

        let mut preds = self.ppo_preds(g, e);
        preds.extend(g.rfe_pred(e));
        preds.extend(g.tc_pred(e));
        preds.extend(g.tj_pred(e));
        for p in preds {
            if self.visited_pporf0[g.label(p).stamp().get() as usize] == NodeStatus::Unseen {
                self.visit_pporf0(g, p, pporf);
            }
        }
        self.visited_pporf0[stamp] = NodeStatus::Left;
    }
}

impl ConsistencyChecker for ImmChecker {
    fn is_dep_tracking(&self) -> bool {
        true
    }

    fn calculate_views(&mut self, g: &ExecutionGraph, e: Event) -> Vec<View> {
        // IMM's happens-before coincides with the RC11 construction.
        self.hb.calculate_views(g, e)
    }

    fn is_consistent(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        if !self.is_acyclic(g, e) {
            return false;
        }
        if !hb_coherence_holds(g) {
            return false;
        }
        psc_acyclic(g)
    }

    fn check_errors(&mut self, g: &ExecutionGraph, e: Event) -> Option<VerificationError> {
        check_access_errors(g, e)
    }

    fn prefix_view(&mut self, g: &ExecutionGraph, e: Event) -> VectorClock {
        let mut pporf = DepView::new();
        pporf.add_hole(e);
        self.visited_pporf0.clear();
        self.visited_pporf0.resize(g.stamp_bound(), NodeStatus::Unseen);
        self.visit_pporf0(g, e, &mut pporf);
        VectorClock::Dep(pporf)
    }
}
