//! The coherence oracle: which stores a read may observe, which reads a
//! store may revisit, and where a store may sit in modification order.
//!
//! All helpers work off the happens-before views (view 0) the checker
//! attached to the labels, so they are shared across the MO-tracking
//! models; dependency-tracking models activate the extra exclusions.

use crate::event::Event;
use crate::graph::ExecutionGraph;
use crate::mem::SAddr;
use crate::view::{VectorClock, View};

/// The happens-before view at `e`. The oracle is consulted for the
/// position of an access that is only about to be added; its hb so far
/// is its po-predecessor's.
fn hb_view_upto(g: &ExecutionGraph, e: Event) -> &View {
    if g.try_label(e).map_or(false, |l| l.has_views()) {
        return g.view0(e);
    }
    if e.index > 0 && g.contains(e.prev()) {
        return g.view0(e.prev());
    }
    g.view0(Event::BOTTOM)
}

/// Whether the write `a` (or one of its readers) is hb-before `b`.
pub(crate) fn is_write_rf_before(g: &ExecutionGraph, a: Event, b: Event) -> bool {
    let before = hb_view_upto(g, b);
    if before.contains(a) {
        return true;
    }
    g.rf_succs(a).iter().any(|&r| before.contains(r))
}

/// Whether `e` is hb-before the write at `write` or one of its readers.
pub(crate) fn is_hb_opt_rf_before(g: &ExecutionGraph, e: Event, write: Event) -> bool {
    if g.view0(write).contains(e) {
        return true;
    }
    g.rf_succs(write).iter().any(|&r| g.view0(r).contains(e))
}

/// The number of stores at `addr` that are `(rf?;hb)`-before `e`: the
/// split point below which coherence forbids `e` to read.
pub(crate) fn split_loc_mo_before(g: &ExecutionGraph, addr: SAddr, e: Event) -> usize {
    let mo = g.stores(addr);
    mo.iter()
        .rposition(|&s| is_write_rf_before(g, s, e))
        .map_or(0, |i| i + 1)
}

/// The split point above which every store is hb-after `read` (only
/// relevant to models that add events out of order).
pub(crate) fn split_loc_mo_after_hb(g: &ExecutionGraph, addr: SAddr, read: Event) -> usize {
    if g.init_rfs_at(addr)
        .iter()
        .any(|&rf| g.view0(rf).contains(read))
    {
        return 0;
    }
    let mo = g.stores(addr);
    match mo.iter().position(|&s| is_hb_opt_rf_before(g, read, s)) {
        None => mo.len(),
        Some(i) => {
            if g.view0(mo[i]).contains(read) {
                i
            } else {
                i + 1
            }
        }
    }
}

/// The first store at `addr` that is hb-after `e`, as a coherence index.
pub(crate) fn split_loc_mo_after(g: &ExecutionGraph, addr: SAddr, e: Event) -> usize {
    let mo = g.stores(addr);
    mo.iter()
        .position(|&s| is_hb_opt_rf_before(g, e, s))
        .unwrap_or(mo.len())
}

/// The stores the read at `read` may observe.
///
/// When no store is `(rf?;hb)`-before the read, it may observe the
/// initializer and every concurrent store; otherwise, the mo-latest of
/// the hb-before stores and everything coherence-after it that is not
/// itself hb-after the read.
pub(crate) fn coherent_stores(
    g: &ExecutionGraph,
    addr: SAddr,
    read: Event,
    dep_tracking: bool,
) -> Vec<Event> {
    let mo = g.stores(addr);
    let beg = split_loc_mo_before(g, addr, read);
    let mut stores = Vec::with_capacity(mo.len() - beg + 1);
    if beg == 0 {
        stores.push(Event::INIT);
    } else {
        stores.push(mo[beg - 1]);
    }
    let end = if dep_tracking {
        split_loc_mo_after_hb(g, addr, read)
    } else {
        mo.len()
    };
    stores.extend_from_slice(&mo[beg..end.max(beg)]);
    stores
}

/// `(mo;rf?)`-after the store: its coherence successors and their
/// readers.
pub(crate) fn mo_opt_rf_after(g: &ExecutionGraph, store: Event) -> Vec<Event> {
    let mut after = Vec::new();
    for w in g.co_succs(store) {
        after.push(w);
        after.extend_from_slice(g.rf_succs(w));
    }
    after
}

/// `(mo⁻¹;rf?)`-after the store: its coherence predecessors with their
/// readers, and the initializer's readers.
pub(crate) fn mo_inv_opt_rf_after(g: &ExecutionGraph, store: Event) -> Vec<Event> {
    let mut after = Vec::new();
    for w in g.co_preds(store) {
        after.push(w);
        after.extend_from_slice(g.rf_succs(w));
    }
    if let Some(addr) = g.label(store).addr() {
        after.extend(g.init_rfs_at(addr));
    }
    after
}

/// The loads a new store may backward-revisit: the still-revisitable
/// loads outside the store's pporf prefix, minus those that coherence
/// already orders after the store.
pub(crate) fn coherent_revisits(
    g: &ExecutionGraph,
    store: Event,
    pporf: &VectorClock,
    dep_tracking: bool,
) -> Vec<Event> {
    let addr = g.label(store).addr().expect("revisits of a non-access");
    let mut ls = g.revisitable_reads(addr, store, pporf);

    // A po- and mo-maximal store cannot invalidate anything.
    if !dep_tracking && g.is_co_maximal(addr, store) {
        return ls;
    }

    // Exclude (mo;rf?;hb?;sb)-after reads.
    let opt_rfs = mo_opt_rf_after(g, store);
    ls.retain(|&e| {
        let before = g.view0(e);
        !opt_rfs.iter().any(|&ev| before.contains(ev))
    });

    if !dep_tracking {
        return ls;
    }

    // Out-of-order addition: also exclude hb-before loads ...
    ls.retain(|&e| !g.view0(store).contains(e));

    // ... and (mo⁻¹;rf?;(hb⁻¹)?;sb⁻¹)-after reads in the cut graph.
    let mo_inv = mo_inv_opt_rf_after(g, store);
    ls.retain(|&e| {
        let mut v = pporf.clone();
        v.update_view(&g.view_from_stamp(g.label(e).stamp()));
        !mo_inv
            .iter()
            .any(|&ev| v.contains(ev) && g.view0(ev).contains(e))
    });
    ls
}

/// The coherence positions a new store may take. A non-RMW store may sit
/// anywhere between the last `(rf?;hb)`-before store and the first store
/// hb-after it; an RMW write sits exactly after its read's source.
pub(crate) fn coherent_placings(
    g: &ExecutionGraph,
    addr: SAddr,
    store: Event,
    is_rmw: bool,
) -> (usize, usize) {
    if is_rmw {
        let read = g.label(store.prev());
        let rf = read.read().expect("RMW write without read part").rf;
        let pos = if rf.is_init() {
            0
        } else {
            g.co_index(addr, rf).expect("rf source not in mo") + 1
        };
        return (pos, pos);
    }
    (
        split_loc_mo_before(g, addr, store),
        split_loc_mo_after(g, addr, store),
    )
}
