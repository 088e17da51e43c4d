//! Typed per-event records ("labels") and their payloads.
//!
//! Every event of an execution graph is represented by one [`Label`]. The
//! label owns the event's payload (a sealed sum type, exhaustively matched
//! by every visitor), the views and auxiliary sets computed by the
//! consistency checker, and the bookkeeping bits the exploration driver
//! maintains.

use crate::deps::EventDeps;
use crate::event::{Event, EventSet, Stamp};
use crate::mem::SAddr;
use crate::value::{ASize, AType, SVal};
use smallvec::SmallVec;
use std::fmt;

/// Memory orderings, mirroring the C11 hierarchy.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum MemOrdering {
    /// A non-atomic (plain) access.
    NotAtomic,
    /// `memory_order_relaxed`.
    Relaxed,
    /// `memory_order_acquire`.
    Acquire,
    /// `memory_order_release`.
    Release,
    /// `memory_order_acq_rel`.
    AcqRel,
    /// `memory_order_seq_cst`.
    SeqCst,
}

impl MemOrdering {
    /// Whether the ordering provides at least acquire semantics.
    pub fn is_at_least_acquire(self) -> bool {
        matches!(
            self,
            MemOrdering::Acquire | MemOrdering::AcqRel | MemOrdering::SeqCst
        )
    }

    /// Whether the ordering provides at least release semantics.
    pub fn is_at_least_release(self) -> bool {
        matches!(
            self,
            MemOrdering::Release | MemOrdering::AcqRel | MemOrdering::SeqCst
        )
    }

    /// Whether this is a sequentially consistent access.
    pub fn is_sc(self) -> bool {
        self == MemOrdering::SeqCst
    }
}

/// Binary operators usable in atomic read-modify-write operations.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RmwOp {
    /// Fetch-and-add.
    Add,
    /// Fetch-and-subtract.
    Sub,
    /// Fetch-and-and.
    And,
    /// Fetch-and-or.
    Or,
    /// Fetch-and-xor.
    Xor,
    /// Exchange.
    Xchg,
    /// Signed maximum.
    Max,
    /// Signed minimum.
    Min,
    /// Unsigned maximum.
    UMax,
    /// Unsigned minimum.
    UMin,
}

/// A predicate over the value a load may observe. Annotated loads (e.g.,
/// the load of an `assume`d spinloop condition) let the driver skip rf
/// options that would immediately block the thread.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Annot {
    /// Value equals the operand.
    Eq(SVal),
    /// Value differs from the operand.
    Ne(SVal),
    /// Value is signed-less-than the operand.
    Lt(SVal),
    /// Value is signed-greater-than the operand.
    Gt(SVal),
}

impl Annot {
    /// Evaluates the predicate on a concrete value.
    pub fn holds(self, v: SVal, size: ASize) -> bool {
        match self {
            Annot::Eq(w) => v.bits_eq(w, size),
            Annot::Ne(w) => !v.bits_eq(w, size),
            Annot::Lt(w) => v.signed() < w.signed(),
            Annot::Gt(w) => v.signed() > w.signed(),
        }
    }
}

/// The flavor of a read access.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ReadKind {
    /// A plain load.
    Plain,
    /// The read part of a fetch-and-op.
    Fai {
        /// The operation applied to the read value.
        op: RmwOp,
        /// The operand of the operation.
        val: SVal,
    },
    /// The read part of a barrier increment (a fetch-and-op that resets
    /// the barrier when the round completes).
    BIncFai {
        /// The operation applied to the read value.
        op: RmwOp,
        /// The operand of the operation.
        val: SVal,
    },
    /// The load checking whether a barrier round has completed.
    BWait,
    /// The read part of a compare-and-swap.
    Cas {
        /// The expected value.
        expected: SVal,
        /// The replacement value.
        swap: SVal,
    },
    /// The read part of a mutex-acquiring compare-and-swap.
    LockCas {
        /// The expected value.
        expected: SVal,
        /// The replacement value.
        swap: SVal,
    },
    /// An observation made through a user library operation.
    Lib {
        /// The library member that produced the access.
        func: String,
    },
    /// A read from modeled disk storage.
    Dsk,
}

/// The flavor of a write access.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum WriteKind {
    /// A plain store.
    Plain,
    /// A mutex-releasing store.
    Unlock,
    /// A barrier initialization.
    BInit,
    /// A barrier destruction.
    BDestroy,
    /// The write part of a fetch-and-op.
    Fai,
    /// The write part of a barrier increment.
    BIncFai,
    /// The write part of a successful compare-and-swap.
    Cas,
    /// The write part of a mutex-acquiring compare-and-swap.
    LockCas,
    /// A store made through a user library operation.
    Lib {
        /// The library member that produced the access.
        func: String,
        /// Whether this is the library's initializing store.
        is_init: bool,
    },
    /// A write to modeled disk storage.
    Dsk {
        /// The in-memory address the disk block is mapped from.
        mapping: SAddr,
    },
    /// A write to disk metadata.
    DskMd,
    /// A write to a disk directory block.
    DskDir,
    /// A write to the disk journal.
    DskJnl,
}

/// Payload of a read label.
#[derive(Clone, Debug)]
pub struct ReadLabel {
    /// The accessed address.
    pub addr: SAddr,
    /// The access width.
    pub size: ASize,
    /// The interpretation of the accessed value.
    pub atype: AType,
    /// The write this read observes.
    pub rf: Event,
    /// An optional annotation constraining useful values.
    pub annot: Option<Annot>,
    /// The read flavor.
    pub kind: ReadKind,
    /// Whether a backward revisit may still target this read.
    pub revisitable: bool,
}

/// Payload of a write label.
#[derive(Clone, Debug)]
pub struct WriteLabel {
    /// The accessed address.
    pub addr: SAddr,
    /// The access width.
    pub size: ASize,
    /// The interpretation of the written value.
    pub atype: AType,
    /// The written value.
    pub val: SVal,
    /// The reads observing this write, in insertion order.
    pub readers: SmallVec<[Event; 2]>,
    /// The write flavor.
    pub kind: WriteKind,
}

/// The payload of a label: one variant per event kind the graph can hold.
#[derive(Clone, Debug)]
pub enum LabelKind {
    /// The first event of a thread.
    ThreadStart {
        /// The `ThreadCreate` event that spawned this thread
        /// ([`Event::INIT`] for the main thread).
        parent_create: Event,
        /// The thread this one is symmetric to, when symmetry reduction
        /// identified one.
        symmetric_tid: Option<u32>,
    },
    /// A thread spawn point.
    ThreadCreate {
        /// The identifier of the spawned thread.
        child_tid: u32,
    },
    /// A join with another thread.
    ThreadJoin {
        /// The identifier of the joined thread.
        child_tid: u32,
    },
    /// The last event of a finished thread.
    ThreadFinish,
    /// A read access.
    Read(ReadLabel),
    /// A write access.
    Write(WriteLabel),
    /// A memory fence (ordering carried by the label).
    Fence,
    /// An `fsync` of a modeled file.
    DskFsync {
        /// The inode the fsync applies to.
        inode: SAddr,
        /// The synced size.
        size: ASize,
    },
    /// A whole-disk sync.
    DskSync,
    /// A persistency barrier.
    DskPbarrier,
    /// A heap (or other dynamic) allocation.
    Malloc {
        /// The first address of the allocated region.
        addr: SAddr,
        /// The size of the region in bytes.
        size: u64,
        /// An optional source-level name for diagnostics.
        name: Option<String>,
    },
    /// A deallocation.
    Free {
        /// The address being freed.
        freed_addr: SAddr,
    },
    /// A hazard-pointer retirement of a node.
    HpRetire {
        /// The retired address.
        freed_addr: SAddr,
    },
    /// A hazard-pointer protection of a node.
    HpProtect {
        /// The protected address.
        protected_addr: SAddr,
    },
    /// A lock acquisition under lock-aware partial order reduction.
    LockLapor {
        /// The lock's address.
        lock_addr: SAddr,
    },
    /// A lock release under lock-aware partial order reduction.
    UnlockLapor {
        /// The lock's address.
        lock_addr: SAddr,
    },
    /// The head of a (potential) spinloop.
    SpinStart,
    /// A spinloop iteration that wrote nothing and may spin forever.
    PotentialSpinEnd,
    /// A placeholder for a removed or not-yet-produced event.
    Empty,
}

/// One event record of the execution graph.
///
/// A label is immutable once added, except for the fields the exploration
/// mutates in place: the read's `rf`, a write's `readers`, the computed
/// `views`/`calculated` attachments, and the `added_max`/
/// `revisited_in_place` bits.
#[derive(Clone, Debug)]
pub struct Label {
    pos: Event,
    stamp: Stamp,
    ordering: MemOrdering,
    kind: LabelKind,
    views: SmallVec<[crate::view::View; 2]>,
    calculated: SmallVec<[EventSet; 1]>,
    deps: EventDeps,
    added_max: bool,
    revisited_in_place: bool,
}

impl Label {
    /// Creates a label at `pos` with the given ordering and payload. The
    /// stamp is assigned when the label is added to a graph.
    pub fn new(pos: Event, ordering: MemOrdering, kind: LabelKind) -> Label {
        Label {
            pos,
            stamp: Stamp::start(),
            ordering,
            kind,
            views: SmallVec::new(),
            calculated: SmallVec::new(),
            deps: EventDeps::default(),
            added_max: false,
            revisited_in_place: false,
        }
    }

    /// A placeholder label at `pos`.
    pub fn empty(pos: Event) -> Label {
        Label::new(pos, MemOrdering::NotAtomic, LabelKind::Empty)
    }

    /// The label's position in the graph.
    pub fn pos(&self) -> Event {
        self.pos
    }

    /// The label's creation stamp.
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub(crate) fn set_stamp(&mut self, stamp: Stamp) {
        self.stamp = stamp;
    }

    /// The label's memory ordering.
    pub fn ordering(&self) -> MemOrdering {
        self.ordering
    }

    /// The label's payload.
    pub fn kind(&self) -> &LabelKind {
        &self.kind
    }

    /// The dependency snapshot captured when the label was created.
    pub fn deps(&self) -> &EventDeps {
        &self.deps
    }

    pub(crate) fn set_deps(&mut self, deps: EventDeps) {
        self.deps = deps;
    }

    /// The `i`-th view computed by the consistency checker. Index 0 is,
    /// by convention, the happens-before view.
    pub fn view(&self, i: usize) -> &crate::view::View {
        &self.views[i]
    }

    /// Whether any views have been attached yet.
    pub fn has_views(&self) -> bool {
        !self.views.is_empty()
    }

    pub(crate) fn set_views(&mut self, views: Vec<crate::view::View>) {
        self.views = views.into();
    }

    /// The `i`-th auxiliary event set computed by the checker.
    pub fn calculated(&self, i: usize) -> &EventSet {
        &self.calculated[i]
    }

    pub(crate) fn set_calculated(&mut self, sets: Vec<EventSet>) {
        self.calculated = sets.into();
    }

    /// Whether the access was coherence-maximal when it was added.
    pub fn was_added_max(&self) -> bool {
        self.added_max
    }

    pub(crate) fn set_added_max(&mut self, max: bool) {
        self.added_max = max;
    }

    /// Whether the read was revisited without restructuring the graph.
    pub fn is_revisited_in_place(&self) -> bool {
        self.revisited_in_place
    }

    pub(crate) fn set_revisited_in_place(&mut self, b: bool) {
        self.revisited_in_place = b;
    }

    /// The read payload, if this is a read.
    pub fn read(&self) -> Option<&ReadLabel> {
        match &self.kind {
            LabelKind::Read(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn read_mut(&mut self) -> Option<&mut ReadLabel> {
        match &mut self.kind {
            LabelKind::Read(r) => Some(r),
            _ => None,
        }
    }

    /// The write payload, if this is a write.
    pub fn write(&self) -> Option<&WriteLabel> {
        match &self.kind {
            LabelKind::Write(w) => Some(w),
            _ => None,
        }
    }

    pub(crate) fn write_mut(&mut self) -> Option<&mut WriteLabel> {
        match &mut self.kind {
            LabelKind::Write(w) => Some(w),
            _ => None,
        }
    }

    /// Whether this is a read access.
    pub fn is_read(&self) -> bool {
        matches!(self.kind, LabelKind::Read(_))
    }

    /// Whether this is a write access.
    pub fn is_write(&self) -> bool {
        matches!(self.kind, LabelKind::Write(_))
    }

    /// Whether this is a fence.
    pub fn is_fence(&self) -> bool {
        matches!(
            self.kind,
            LabelKind::Fence | LabelKind::DskFsync { .. } | LabelKind::DskSync | LabelKind::DskPbarrier
        )
    }

    /// Whether this is a plain memory access (read or write).
    pub fn is_mem_access(&self) -> bool {
        self.is_read() || self.is_write()
    }

    /// Whether this is a placeholder.
    pub fn is_empty_label(&self) -> bool {
        matches!(self.kind, LabelKind::Empty)
    }

    /// Whether the label ends its thread.
    pub fn is_finish(&self) -> bool {
        matches!(self.kind, LabelKind::ThreadFinish)
    }

    /// The accessed address, for memory accesses.
    pub fn addr(&self) -> Option<SAddr> {
        match &self.kind {
            LabelKind::Read(r) => Some(r.addr),
            LabelKind::Write(w) => Some(w.addr),
            _ => None,
        }
    }

    /// The access width, for memory accesses.
    pub fn access_size(&self) -> Option<ASize> {
        match &self.kind {
            LabelKind::Read(r) => Some(r.size),
            LabelKind::Write(w) => Some(w.size),
            _ => None,
        }
    }

    /// Whether the access is non-atomic.
    pub fn is_not_atomic(&self) -> bool {
        self.ordering == MemOrdering::NotAtomic
    }

    /// Whether the read payload could be the read part of an RMW.
    pub fn is_rmw_read_kind(&self) -> bool {
        matches!(
            self.read().map(|r| &r.kind),
            Some(ReadKind::Fai { .. })
                | Some(ReadKind::BIncFai { .. })
                | Some(ReadKind::Cas { .. })
                | Some(ReadKind::LockCas { .. })
        )
    }

    /// Whether the write payload is the write part of an RMW.
    pub fn is_rmw_write_kind(&self) -> bool {
        matches!(
            self.write().map(|w| &w.kind),
            Some(WriteKind::Fai)
                | Some(WriteKind::BIncFai)
                | Some(WriteKind::Cas)
                | Some(WriteKind::LockCas)
        )
    }
}

impl fmt::Display for Label {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LabelKind::Read(r) => write!(
                fmt,
                "{}: R{:?} {:?} [rf {}]",
                self.pos, self.ordering, r.addr, r.rf
            ),
            LabelKind::Write(w) => write!(
                fmt,
                "{}: W{:?} {:?} = {:?}",
                self.pos, self.ordering, w.addr, w.val
            ),
            LabelKind::Fence => write!(fmt, "{}: F{:?}", self.pos, self.ordering),
            LabelKind::ThreadStart { .. } => write!(fmt, "{}: start", self.pos),
            LabelKind::ThreadCreate { child_tid } => {
                write!(fmt, "{}: create T{}", self.pos, child_tid)
            }
            LabelKind::ThreadJoin { child_tid } => write!(fmt, "{}: join T{}", self.pos, child_tid),
            LabelKind::ThreadFinish => write!(fmt, "{}: end", self.pos),
            LabelKind::Malloc { addr, size, .. } => {
                write!(fmt, "{}: malloc {:?} ({})", self.pos, addr, size)
            }
            LabelKind::Free { freed_addr } => write!(fmt, "{}: free {:?}", self.pos, freed_addr),
            other => write!(fmt, "{}: {:?}", self.pos, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ASize;

    #[test]
    fn ordering_lattice() {
        assert!(MemOrdering::AcqRel.is_at_least_acquire());
        assert!(MemOrdering::AcqRel.is_at_least_release());
        assert!(MemOrdering::SeqCst.is_sc());
        assert!(!MemOrdering::Relaxed.is_at_least_acquire());
        assert!(!MemOrdering::Acquire.is_at_least_release());
    }

    #[test]
    fn annot_predicates() {
        let size = ASize::new(4);
        assert!(Annot::Eq(SVal::UInt(1)).holds(SVal::UInt(1), size));
        assert!(Annot::Ne(SVal::UInt(0)).holds(SVal::UInt(2), size));
        assert!(Annot::Lt(SVal::Int(0)).holds(SVal::Int(-1), size));
        assert!(!Annot::Gt(SVal::Int(0)).holds(SVal::Int(0), size));
    }

    #[test]
    fn rmw_kinds() {
        let r = Label::new(
            Event::new(1, 1),
            MemOrdering::AcqRel,
            LabelKind::Read(ReadLabel {
                addr: SAddr::null(),
                size: ASize::new(4),
                atype: AType::Unsigned,
                rf: Event::INIT,
                annot: None,
                kind: ReadKind::Cas {
                    expected: SVal::UInt(0),
                    swap: SVal::UInt(1),
                },
                revisitable: true,
            }),
        );
        assert!(r.is_rmw_read_kind());
        assert!(r.is_read() && !r.is_write());
    }
}
