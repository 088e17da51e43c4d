//! The exploration worklist and the revisit set.

use crate::event::{Event, Stamp};
use crate::label::Label;
use indexmap::IndexSet;
use rustc_hash::FxHasher;
use std::collections::{BTreeMap, VecDeque};
use std::hash::BuildHasherDefault;

type FxIndexSet<K> = IndexSet<K, BuildHasherDefault<FxHasher>>;

/// An alternative the exploration still has to examine.
#[derive(Clone, Debug)]
pub enum WorkItem {
    /// Try the load at `read` observing `rf` within the current graph.
    Forward {
        /// The read to re-examine.
        read: Event,
        /// Its alternative rf source.
        rf: Event,
    },
    /// Cut the graph to the read, reinstall the store's causal prefix,
    /// and make the read observe it.
    Backward {
        /// The read to re-examine.
        read: Event,
        /// The revisiting store.
        rf: Event,
        /// Clones of the prefix labels a cut would destroy.
        prefix: Vec<Label>,
        /// Saved coherence placements of the prefix stores.
        mo_placings: Vec<(Event, Event)>,
    },
    /// Re-place an existing store at another coherence position.
    MoPlacement {
        /// The store to move.
        store: Event,
        /// Its new coherence index.
        mo_pos: usize,
    },
    /// Library-observation variant of [`WorkItem::Forward`].
    LibForward {
        /// The library read to re-examine.
        read: Event,
        /// Its alternative rf source.
        rf: Event,
    },
    /// Library-observation variant of [`WorkItem::Backward`].
    LibBackward {
        /// The library read to re-examine.
        read: Event,
        /// The revisiting store.
        rf: Event,
        /// Clones of the prefix labels a cut would destroy.
        prefix: Vec<Label>,
        /// Saved coherence placements of the prefix stores.
        mo_placings: Vec<(Event, Event)>,
    },
    /// Library-observation variant of [`WorkItem::MoPlacement`].
    LibMoPlacement {
        /// The store to move.
        store: Event,
        /// Its new coherence index.
        mo_pos: usize,
    },
}

impl WorkItem {
    /// The event whose stamp keys this item in the worklist.
    pub fn pos(&self) -> Event {
        match self {
            WorkItem::Forward { read, .. }
            | WorkItem::Backward { read, .. }
            | WorkItem::LibForward { read, .. }
            | WorkItem::LibBackward { read, .. } => *read,
            WorkItem::MoPlacement { store, .. } | WorkItem::LibMoPlacement { store, .. } => *store,
        }
    }
}

/// The worklist: per-stamp FIFO buckets, popped from the highest stamp
/// first (LIFO over stamps, FIFO within one).
#[derive(Clone, Debug, Default)]
pub struct Worklist {
    buckets: BTreeMap<Stamp, VecDeque<WorkItem>>,
}

impl Worklist {
    /// Creates an empty worklist.
    pub fn new() -> Worklist {
        Worklist::default()
    }

    /// Whether no item is queued.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|q| q.is_empty())
    }

    /// Queues `item` under `stamp`.
    pub fn add(&mut self, stamp: Stamp, item: WorkItem) {
        self.buckets.entry(stamp).or_default().push_back(item);
    }

    /// Pops the next item: front of the highest non-empty stamp bucket.
    pub fn next(&mut self) -> Option<WorkItem> {
        let stamp = *self
            .buckets
            .iter()
            .rev()
            .find(|(_, q)| !q.is_empty())?
            .0;
        let item = self.buckets.get_mut(&stamp).and_then(|q| q.pop_front());
        if self.buckets.get(&stamp).map_or(false, |q| q.is_empty()) {
            self.buckets.remove(&stamp);
        }
        item
    }

    /// Drops every empty bucket keyed after `stamp`. (Non-empty buckets
    /// with later stamps cannot exist when this is called: the graph has
    /// just been cut to `stamp`.)
    pub fn restrict(&mut self, stamp: Stamp) {
        let later: Vec<Stamp> = self
            .buckets
            .range(stamp.next()..)
            .filter(|(_, q)| q.is_empty())
            .map(|(&s, _)| s)
            .collect();
        for s in later {
            self.buckets.remove(&s);
        }
    }
}

/// A key identifying one already-explored extension of a read: the
/// revisiting store with the prefix's rf edges, plus the coherence
/// placements that came with it.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RevisitKey {
    /// The revisiting store followed by the prefix reads' rf sources.
    pub write_prefix: Vec<Event>,
    /// The saved coherence placements.
    pub mo_placings: Vec<(Event, Event)>,
}

/// Per-read-stamp sets of already-explored `(prefix, placings)` pairs,
/// consulted to suppress duplicate backward revisits.
#[derive(Clone, Debug, Default)]
pub struct RevisitSet {
    sets: BTreeMap<Stamp, FxIndexSet<RevisitKey>>,
}

impl RevisitSet {
    /// Creates an empty revisit set.
    pub fn new() -> RevisitSet {
        RevisitSet::default()
    }

    /// Whether the pair is already recorded for `stamp`.
    pub fn contains(&self, stamp: Stamp, key: &RevisitKey) -> bool {
        self.sets.get(&stamp).map_or(false, |s| s.contains(key))
    }

    /// Records a pair for `stamp`.
    pub fn add(&mut self, stamp: Stamp, key: RevisitKey) {
        self.sets.entry(stamp).or_default().insert(key);
    }

    /// Forgets everything keyed after `stamp`.
    pub fn restrict(&mut self, stamp: Stamp) {
        self.sets.split_off(&stamp.next());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fwd(read: Event, rf: Event) -> WorkItem {
        WorkItem::Forward { read, rf }
    }

    #[test]
    fn pops_highest_stamp_fifo_within() {
        let mut wl = Worklist::new();
        let (a, b, c) = (Event::new(1, 1), Event::new(1, 2), Event::new(2, 1));
        wl.add(Stamp::from(3), fwd(a, Event::INIT));
        wl.add(Stamp::from(5), fwd(b, Event::INIT));
        wl.add(Stamp::from(5), fwd(c, Event::INIT));

        match wl.next().unwrap() {
            WorkItem::Forward { read, .. } => assert_eq!(read, b),
            other => panic!("unexpected item {:?}", other),
        }
        match wl.next().unwrap() {
            WorkItem::Forward { read, .. } => assert_eq!(read, c),
            other => panic!("unexpected item {:?}", other),
        }
        match wl.next().unwrap() {
            WorkItem::Forward { read, .. } => assert_eq!(read, a),
            other => panic!("unexpected item {:?}", other),
        }
        assert!(wl.next().is_none());
    }

    #[test]
    fn revisit_set_roundtrip() {
        let mut rs = RevisitSet::new();
        let key = RevisitKey {
            write_prefix: vec![Event::new(1, 1)],
            mo_placings: vec![],
        };
        assert!(!rs.contains(Stamp::from(2), &key));
        rs.add(Stamp::from(2), key.clone());
        assert!(rs.contains(Stamp::from(2), &key));
        rs.restrict(Stamp::from(1));
        assert!(!rs.contains(Stamp::from(2), &key));
    }
}
