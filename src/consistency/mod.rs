//! Per-model consistency checkers.
//!
//! A checker decides, for a partially built graph, whether it is
//! consistent with the memory model, computes the per-event views used to
//! prune the search, and (through the coherence oracle in [`coherence`])
//! enumerates the read-from and coherence placements available to a new
//! access.
//!
//! The acyclicity and prefix computations follow the structure of
//! checkers derived from an NFA description of the model: families of
//! mutually recursive DFS visitors sharing per-visit state arrays sized
//! by the graph's stamp bound and reset at every top-level call.

use crate::config::MemoryModel;
use crate::errors::VerificationError;
use crate::event::{Event, EventSet};
use crate::graph::ExecutionGraph;
use crate::mem::SAddr;
use crate::view::{VectorClock, View};

pub(crate) mod coherence;
mod imm;
mod rc11;
mod sc;
mod tso;

/// DFS bookkeeping for one visitor state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum NodeStatus {
    Unseen,
    Entered,
    Left,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Unseen
    }
}

/// DFS bookkeeping for acyclicity visitors: the accepting-state counter
/// at entry plus the node status. A back-edge into an `Entered` node
/// whose recorded counter is below the current one closes a cycle
/// through an accepting state.
#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct NodeCountStatus {
    pub count: u16,
    pub status: NodeStatus,
}

impl NodeCountStatus {
    pub fn new(count: u16, status: NodeStatus) -> NodeCountStatus {
        NodeCountStatus { count, status }
    }
}

/// The per-model checker interface the driver and the oracle build on.
pub trait ConsistencyChecker {
    /// Whether the model tracks syntactic dependencies (and therefore
    /// computes holey prefixes).
    fn is_dep_tracking(&self) -> bool {
        false
    }

    /// Computes the auxiliary event sets attached to a new label.
    fn calculate_saved(&mut self, _g: &ExecutionGraph, _e: Event) -> Vec<EventSet> {
        Vec::new()
    }

    /// Computes the views attached to a new label. Index 0 is the
    /// happens-before view; index 1, where present, a write's message
    /// view.
    fn calculate_views(&mut self, g: &ExecutionGraph, e: Event) -> Vec<View>;

    /// Decides whether the graph extended with `e` is consistent.
    fn is_consistent(&mut self, g: &ExecutionGraph, e: Event) -> bool;

    /// Checks the model-level error conditions at `e`.
    fn check_errors(&mut self, _g: &ExecutionGraph, _e: Event) -> Option<VerificationError> {
        None
    }

    /// Whether the recovery routine (persistency) observes a valid state.
    fn is_recovery_valid(&mut self, _g: &ExecutionGraph, _e: Event) -> bool {
        true
    }

    /// The (preserved-)program-order-union-rf prefix of `e`, used to
    /// compute backward revisits.
    fn prefix_view(&mut self, g: &ExecutionGraph, e: Event) -> VectorClock;

    /// The stores a read of `addr` at `read` may observe, coherence-last
    /// option last.
    fn coherent_stores(&mut self, g: &ExecutionGraph, addr: SAddr, read: Event) -> Vec<Event> {
        coherence::coherent_stores(g, addr, read, self.is_dep_tracking())
    }

    /// The reads a new store may backward-revisit.
    fn coherent_revisits(
        &mut self,
        g: &ExecutionGraph,
        store: Event,
        pporf: &VectorClock,
    ) -> Vec<Event> {
        coherence::coherent_revisits(g, store, pporf, self.is_dep_tracking())
    }

    /// The inclusive range of coherence positions a new store may take.
    fn coherent_placings(
        &mut self,
        g: &ExecutionGraph,
        addr: SAddr,
        store: Event,
        is_rmw: bool,
    ) -> (usize, usize) {
        coherence::coherent_placings(g, addr, store, is_rmw)
    }
}

/// Instantiates the checker for `model`.
pub fn make_checker(model: MemoryModel) -> Box<dyn ConsistencyChecker + Send> {
    match model {
        MemoryModel::Sc => Box::new(sc::ScChecker::new()),
        MemoryModel::Tso => Box::new(tso::TsoChecker::new()),
        MemoryModel::Ra => Box::new(rc11::Rc11Checker::without_sc_axiom()),
        MemoryModel::Rc11 => Box::new(rc11::Rc11Checker::new()),
        MemoryModel::Imm => Box::new(imm::ImmChecker::new()),
    }
}

/* ---------------- shared view calculation ---------------- */

/// The happens-before view every label starts from: the po-predecessor's
/// view plus the label's own position, with thread-create/join edges
/// folded in.
pub(crate) fn base_hb_view(g: &ExecutionGraph, e: Event) -> View {
    let mut hb = match g.po_imm_pred(e) {
        Some(p) => g.view0(p).clone(),
        None => View::new(),
    };
    hb.update_idx(e);
    if let Some(c) = g.tc_pred(e) {
        hb.update(g.view0(c));
        hb.update_idx(c);
    }
    if let Some(f) = g.tj_pred(e) {
        hb.update(g.view0(f));
        hb.update_idx(f);
    }
    hb
}

/* ---------------- shared error checks ---------------- */

/// The error conditions every model reports: reads of never-written
/// dynamic memory, and conflicting non-atomic accesses unordered by
/// happens-before.
pub(crate) fn check_access_errors(
    g: &ExecutionGraph,
    e: Event,
) -> Option<VerificationError> {
    let lab = g.label(e);
    let addr = lab.addr()?;
    if !addr.is_user() {
        return None;
    }

    if let Some(r) = lab.read() {
        if r.rf.is_init() && addr.is_dynamic() {
            return Some(VerificationError::UninitializedMem);
        }
    }

    let is_write = lab.is_write();
    for other in g.labels() {
        if other.pos().thread == e.thread || other.addr() != Some(addr) {
            continue;
        }
        if !(is_write || other.is_write()) {
            continue;
        }
        if !lab.is_not_atomic() && !other.is_not_atomic() {
            continue;
        }
        let f = other.pos();
        if !g.view0(e).contains(f) && !g.view0(f).contains(e) {
            return Some(VerificationError::RaceNotAtomic);
        }
    }
    None
}

/* ---------------- shared consistency helpers ---------------- */

/// Checks per-location coherence against the computed hb views:
/// `hb ; eco?` must be irreflexive.
///
/// Extended coherence totally orders the accesses of one location: a
/// write sits at its coherence index, a read just after its source. Two
/// accesses ordered by happens-before must not be ordered the other way
/// by that total order. This covers all the classic shapes at once
/// (co/rf/fr against hb, including read-read coherence).
pub(crate) fn hb_coherence_holds(g: &ExecutionGraph) -> bool {
    let mut addrs: Vec<SAddr> = Vec::new();
    for lab in g.labels() {
        if let Some(a) = lab.addr() {
            if !addrs.contains(&a) {
                addrs.push(a);
            }
        }
    }
    for addr in addrs {
        // The extended-coherence ordinal of each access of `addr`.
        let mut keyed: Vec<(Event, (usize, usize))> = Vec::new();
        for lab in g.labels() {
            if lab.addr() != Some(addr) {
                continue;
            }
            if let Some(r) = lab.read() {
                if r.rf.is_bottom() {
                    continue;
                }
                let idx = if r.rf.is_init() {
                    0
                } else {
                    match g.co_index(addr, r.rf) {
                        Some(i) => i + 1,
                        None => continue,
                    }
                };
                keyed.push((lab.pos(), (idx, 1)));
            } else if lab.is_write() {
                match g.co_index(addr, lab.pos()) {
                    Some(i) => keyed.push((lab.pos(), (i + 1, 0))),
                    None => continue,
                }
            }
        }
        for &(a, ka) in &keyed {
            for &(b, kb) in &keyed {
                if a == b {
                    continue;
                }
                // a happens-before b, so b must not be eco-before a.
                if g.view0(b).contains(a) && kb < ka {
                    return false;
                }
            }
        }
    }
    true
}

/// Acyclicity of `psc`, checked over the SC-ordered events. An edge runs
/// from `a` to `b` when `a` happens-before `b`, or when an
/// extended-coherence step `x eco y` exists with `a hb? x` and `y hb? b`.
pub(crate) fn psc_acyclic(g: &ExecutionGraph) -> bool {
    let sc_events: Vec<Event> = g
        .labels()
        .filter(|l| l.ordering().is_sc() && (l.is_mem_access() || l.is_fence()))
        .map(|l| l.pos())
        .collect();
    if sc_events.len() < 2 {
        return true;
    }

    // Per-location extended-coherence ordinals: a write sits at its co
    // index, a read just after its source.
    let eco_key = |e: Event| -> Option<(SAddr, usize, usize)> {
        let lab = g.label(e);
        let addr = lab.addr()?;
        if lab.is_write() {
            let idx = g.co_index(addr, e)?;
            Some((addr, idx + 1, 0))
        } else {
            let rf = lab.read()?.rf;
            if rf.is_bottom() {
                return None;
            }
            let idx = if rf.is_init() {
                0
            } else {
                g.co_index(addr, rf)? + 1
            };
            Some((addr, idx, 1))
        }
    };
    let eco_step = |x: Event, y: Event| -> bool {
        match (eco_key(x), eco_key(y)) {
            (Some((ax, ix, kx)), Some((ay, iy, ky))) => ax == ay && (ix, kx) < (iy, ky),
            _ => false,
        }
    };

    let accesses: Vec<Event> = g
        .labels()
        .filter(|l| l.is_mem_access())
        .map(|l| l.pos())
        .collect();
    let hb_opt = |a: Event, b: Event| -> bool { a == b || g.view0(b).contains(a) };

    let n = sc_events.len();
    let mut edges = vec![Vec::new(); n];
    for (i, &a) in sc_events.iter().enumerate() {
        for (j, &b) in sc_events.iter().enumerate() {
            if i == j {
                continue;
            }
            let direct = g.view0(b).contains(a);
            let via_eco = || {
                accesses.iter().any(|&x| {
                    hb_opt(a, x)
                        && accesses
                            .iter()
                            .any(|&y| eco_step(x, y) && hb_opt(y, b))
                })
            };
            if direct || via_eco() {
                edges[i].push(j);
            }
        }
    }

    // Plain three-color cycle detection over the psc edges.
    let mut color = vec![0u8; n];
    fn dfs(v: usize, edges: &[Vec<usize>], color: &mut [u8]) -> bool {
        color[v] = 1;
        for &w in &edges[v] {
            if color[w] == 1 {
                return false;
            }
            if color[w] == 0 && !dfs(w, edges, color) {
                return false;
            }
        }
        color[v] = 2;
        true
    }
    (0..n).all(|v| color[v] != 0 || dfs(v, &edges, &mut color))
}
