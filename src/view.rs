//! Vector clocks ("views") over execution graphs.

use crate::event::{Event, EventSet};
use smallvec::SmallVec;
use std::fmt;

/// A dense per-thread vector clock: `v[t]` is the maximum event index of
/// thread `t` included in the view, meaning every event `(t, 0..=v[t])`
/// is included. Threads beyond the stored length are included up to
/// index 0 only (their start event, which every graph prefix contains).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct View {
    view: SmallVec<[u32; 4]>,
}

impl View {
    /// Creates an empty view.
    pub fn new() -> View {
        View::default()
    }

    /// The number of threads the view explicitly tracks.
    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// Whether the view tracks no thread explicitly.
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// The maximum included index for `thread`.
    pub fn index(&self, thread: u32) -> u32 {
        self.view.get(thread as usize).copied().unwrap_or(0)
    }

    /// Whether the view includes `e`.
    pub fn contains(&self, e: Event) -> bool {
        e.index <= self.index(e.thread)
    }

    /// Raises the view to include `e` (and everything po-before it).
    pub fn update_idx(&mut self, e: Event) {
        let t = e.thread as usize;
        if self.view.len() <= t {
            self.view.resize(t + 1, 0);
        }
        if self.view[t] < e.index {
            self.view[t] = e.index;
        }
    }

    /// Pointwise maximum with `other`.
    pub fn update(&mut self, other: &View) {
        if self.view.len() < other.view.len() {
            self.view.resize(other.view.len(), 0);
        }
        for (i, &idx) in other.view.iter().enumerate() {
            if self.view[i] < idx {
                self.view[i] = idx;
            }
        }
    }

    /// Whether this view is pointwise no greater than `other`.
    pub fn le(&self, other: &View) -> bool {
        self.view
            .iter()
            .enumerate()
            .all(|(i, &idx)| idx <= other.index(i as u32))
    }
}

impl fmt::Debug for View {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_list().entries(self.view.iter()).finish()
    }
}

/// A view extended with a set of included events that do not form an
/// initial prefix of their thread. Dependency-tracking models construct
/// such "holey" prefixes, since an event may depend on a po-later event's
/// rf source without depending on everything po-between.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DepView {
    view: View,
    extra: EventSet,
}

impl DepView {
    /// Creates an empty dependency view.
    pub fn new() -> DepView {
        DepView::default()
    }

    /// The dense prefix part of the view.
    pub fn prefix(&self) -> &View {
        &self.view
    }

    /// Whether the view includes `e`, either in the dense prefix or in
    /// the auxiliary set.
    pub fn contains(&self, e: Event) -> bool {
        self.view.contains(e) || self.extra.contains(e)
    }

    /// Adds `e` (and its po-prefix) to the dense part.
    pub fn update_idx(&mut self, e: Event) {
        self.view.update_idx(e);
        self.normalize_thread(e.thread);
    }

    /// Adds `e` alone, without its po-prefix.
    pub fn add_hole(&mut self, e: Event) {
        if !self.view.contains(e) {
            self.extra.insert(e);
        }
    }

    /// Unions `other` into `self`: pointwise max on the dense parts plus
    /// a union of the auxiliary sets.
    pub fn update(&mut self, other: &DepView) {
        self.view.update(&other.view);
        self.extra.union(&other.extra);
        let view = &self.view;
        self.extra.retain(|&e| !view.contains(e));
    }

    fn normalize_thread(&mut self, thread: u32) {
        let view = &self.view;
        self.extra
            .retain(|&e| e.thread != thread || !view.contains(e));
    }
}

impl fmt::Debug for DepView {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{:?}+{:?}", self.view, self.extra)
    }
}

/// Either flavor of vector clock, as chosen by the memory model: plain
/// models compute dense [`View`]s, dependency-tracking models compute
/// [`DepView`]s.
#[derive(Clone, PartialEq, Eq)]
pub enum VectorClock {
    /// A dense view.
    Plain(View),
    /// A dependency view with holes.
    Dep(DepView),
}

impl VectorClock {
    /// Whether the clock includes `e`.
    pub fn contains(&self, e: Event) -> bool {
        match self {
            VectorClock::Plain(v) => v.contains(e),
            VectorClock::Dep(v) => v.contains(e),
        }
    }

    /// Unions a dense view into the clock.
    pub fn update_view(&mut self, other: &View) {
        match self {
            VectorClock::Plain(v) => v.update(other),
            VectorClock::Dep(v) => {
                let mut d = DepView::new();
                d.view.update(other);
                v.update(&d);
            }
        }
    }

    /// Raises the clock to include `e` and its po-prefix.
    pub fn update_idx(&mut self, e: Event) {
        match self {
            VectorClock::Plain(v) => v.update_idx(e),
            VectorClock::Dep(v) => v.update_idx(e),
        }
    }
}

impl fmt::Debug for VectorClock {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorClock::Plain(v) => v.fmt(fmt),
            VectorClock::Dep(v) => v.fmt(fmt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(t: u32, i: u32) -> Event {
        Event::new(t, i)
    }

    #[test]
    fn update_is_pointwise_max() {
        let mut a = View::new();
        a.update_idx(ev(0, 3));
        a.update_idx(ev(2, 1));
        let mut b = View::new();
        b.update_idx(ev(0, 1));
        b.update_idx(ev(1, 5));
        a.update(&b);
        assert_eq!(a.index(0), 3);
        assert_eq!(a.index(1), 5);
        assert_eq!(a.index(2), 1);
    }

    #[test]
    fn update_commutes_and_is_idempotent() {
        let mut v = View::new();
        v.update_idx(ev(1, 4));
        let mut w = View::new();
        w.update_idx(ev(0, 2));
        w.update_idx(ev(1, 1));

        let mut vw = v.clone();
        vw.update(&w);
        let mut wv = w.clone();
        wv.update(&v);
        assert_eq!(vw, wv);

        let mut again = vw.clone();
        again.update(&v);
        assert_eq!(again, vw);
    }

    #[test]
    fn containment_includes_prefix() {
        let mut v = View::new();
        v.update_idx(ev(1, 3));
        assert!(v.contains(ev(1, 0)));
        assert!(v.contains(ev(1, 3)));
        assert!(!v.contains(ev(1, 4)));
        // Untracked threads include only their start event.
        assert!(v.contains(ev(7, 0)));
        assert!(!v.contains(ev(7, 1)));
    }

    #[test]
    fn dep_view_holes() {
        let mut v = DepView::new();
        v.add_hole(ev(1, 5));
        assert!(v.contains(ev(1, 5)));
        assert!(!v.contains(ev(1, 4)));
        // Absorbing the prefix swallows the hole.
        v.update_idx(ev(1, 6));
        assert!(v.contains(ev(1, 4)));
        assert!(v.contains(ev(1, 5)));
    }
}
