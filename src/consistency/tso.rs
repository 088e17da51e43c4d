//! The total-store-order checker.
//!
//! The model-specific part of program order (a plain write does not order
//! before a po-later read) is computed once per label and saved on it as
//! auxiliary set 0; the acyclicity visitor then runs over the saved
//! edges together with `rfe ∪ co ∪ fr`.

use super::{base_hb_view, ConsistencyChecker, NodeCountStatus, NodeStatus};
use crate::event::{Event, EventSet};
use crate::graph::ExecutionGraph;
use crate::view::{VectorClock, View};

pub(super) struct TsoChecker {
    visited_acyclic0: Vec<NodeCountStatus>,
    visited_accepting: u16,
    visited_pporf0: Vec<NodeStatus>,
}

impl TsoChecker {
    pub(super) fn new() -> TsoChecker {
        TsoChecker {
            visited_acyclic0: Vec::new(),
            visited_accepting: 0,
            visited_pporf0: Vec::new(),
        }
    }

    /// The immediate preserved-program-order predecessors of `e`: the
    /// po-predecessor, except that a plain load skips over the plain
    /// stores buffered before it.
    fn calculate0(&mut self, g: &ExecutionGraph, e: Event) -> EventSet {
        let mut calc = EventSet::new();
        let lab = g.label(e);
        let skips_writes = lab.is_read() && !g.is_rmw_load(e) && !lab.ordering().is_sc();
        let mut cur = g.po_imm_pred(e);
        while let Some(p) = cur {
            let plab = g.label(p);
            let buffered = skips_writes
                && plab.is_write()
                && !g.is_rmw_store(p)
                && !plab.ordering().is_sc()
                // Same-location order is preserved even into the buffer.
                && plab.addr() != lab.addr();
            if !buffered {
                calc.insert(p);
                break;
            }
            cur = g.po_imm_pred(p);
        }
        calc
    }

    fn visit_acyclic0(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        let stamp = g.label(e).stamp().get() as usize;
        self.visited_accepting += 1;
        self.visited_acyclic0[stamp] =
            NodeCountStatus::new(self.visited_accepting, NodeStatus::Entered);

        let mut preds: Vec<Event> = g.label(e).calculated(0).iter().collect();
        preds.extend(g.rfe_pred(e));
        preds.extend(g.co_preds(e));
        preds.extend(g.fr_init_preds(e));

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

impl ConsistencyChecker for TsoChecker {
    fn calculate_saved(&mut self, g: &ExecutionGraph, e: Event) -> Vec<EventSet> {
        vec![self.calculate0(g, e)]
    }

    fn calculate_views(&mut self, g: &ExecutionGraph, e: Event) -> Vec<View> {
        let mut hb = base_hb_view(g, e);
        // Store buffers are local: only an external rf synchronizes.
        if let Some(rf) = g.rfe_pred(e) {
            hb.update(g.view0(rf));
            hb.update_idx(rf);
        }
        vec![hb]
    }

    fn is_consistent(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        self.is_acyclic(g, e)
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
