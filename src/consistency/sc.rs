//! The sequential-consistency checker: one acyclicity property over
//! `po ∪ rf ∪ co ∪ fr`.

use super::{base_hb_view, ConsistencyChecker, NodeCountStatus, NodeStatus};
use crate::event::Event;
use crate::graph::ExecutionGraph;
use crate::view::{VectorClock, View};

pub(super) struct ScChecker {
    visited_acyclic0: Vec<NodeCountStatus>,
    visited_accepting: u16,
    visited_pporf0: Vec<NodeStatus>,
}

impl ScChecker {
    pub(super) fn new() -> ScChecker {
        ScChecker {
            visited_acyclic0: Vec::new(),
            visited_accepting: 0,
            visited_pporf0: Vec::new(),
        }
    }

    fn visit_acyclic0(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        let stamp = g.label(e).stamp().get() as usize;
        self.visited_accepting += 1;
        self.visited_acyclic0[stamp] =
            NodeCountStatus::new(self.visited_accepting, NodeStatus::Entered);

        let mut preds: Vec<Event> = Vec::new();
        preds.extend(g.po_imm_pred(e));
        preds.extend(g.rf_pred(e));
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

    fn calc_pporf_before(&mut self, g: &ExecutionGraph, e: Event) -> View {
        let mut pporf = View::new();
        pporf.update_idx(e);
        self.visited_pporf0.clear();
        self.visited_pporf0.resize(g.stamp_bound(), NodeStatus::Unseen);
        self.visit_pporf0(g, e, &mut pporf);
        pporf
    }
}

impl ConsistencyChecker for ScChecker {
    fn calculate_views(&mut self, g: &ExecutionGraph, e: Event) -> Vec<View> {
        let mut hb = base_hb_view(g, e);
        // Under SC every read synchronizes with its source.
        if let Some(rf) = g.rf_pred(e) {
            hb.update(g.view0(rf));
            hb.update_idx(rf);
        }
        vec![hb]
    }

    fn is_consistent(&mut self, g: &ExecutionGraph, e: Event) -> bool {
        self.is_acyclic(g, e)
    }

    fn prefix_view(&mut self, g: &ExecutionGraph, e: Event) -> VectorClock {
        VectorClock::Plain(self.calc_pporf_before(g, e))
    }
}
