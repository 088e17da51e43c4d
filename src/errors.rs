//! The verification-error taxonomy.

use crate::event::Event;
use thiserror::Error;

/// A verification error: a property of the program under test that some
/// consistent execution graph witnesses. These are the checker's results,
/// not implementation failures.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum VerificationError {
    /// An assertion-failure path was reached.
    #[error("safety violation: assertion failure")]
    Safety,
    /// A read observed the initializer of dynamic, never-written memory.
    #[error("attempt to read from uninitialized memory")]
    UninitializedMem,
    /// An access to a dynamic address with no allocation before it.
    #[error("attempt to access non-allocated memory")]
    AccessNonMalloc,
    /// An access ordered after the free of its region.
    #[error("attempt to access already-freed memory")]
    AccessFreed,
    /// Two frees of the same address in one graph.
    #[error("attempt to free already-freed memory")]
    DoubleFree,
    /// A free of memory that was never allocated.
    #[error("attempt to free non-allocated memory")]
    FreeNonMalloc,
    /// An access racing with the free of its region.
    #[error("memory access races with deallocation")]
    RaceFreeMalloc,
    /// A join of a thread that cannot be joined.
    #[error("invalid join")]
    InvalidJoin,
    /// An unlock of a mutex the thread does not hold.
    #[error("invalid unlock")]
    InvalidUnlock,
    /// Reinitialization of a barrier in use.
    #[error("invalid barrier initialization")]
    InvalidBInit,
    /// Two conflicting non-atomic accesses unordered by happens-before.
    #[error("non-atomic race")]
    RaceNotAtomic,
    /// A spinloop that can spin forever while no other thread makes
    /// progress.
    #[error("liveness violation: non-terminating spinloop")]
    Liveness,
    /// A modeled system call failed and the configuration escalates
    /// system errors.
    #[error("system error: {0:?}")]
    SystemError(SystemErrorKind),
}

/// Failure modes of the modeled file operations. Each maps to a canonical
/// negative return code and an `errno` value.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SystemErrorKind {
    /// Bad file descriptor.
    Badf,
    /// No such file.
    Noent,
    /// Too many open files.
    Mfile,
    /// Invalid argument.
    Inval,
}

impl SystemErrorKind {
    /// The modeled `errno` value.
    pub fn errno(self) -> i64 {
        match self {
            SystemErrorKind::Badf => 9,
            SystemErrorKind::Noent => 2,
            SystemErrorKind::Mfile => 24,
            SystemErrorKind::Inval => 22,
        }
    }
}

/// Why a thread is currently not schedulable.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BlockageType {
    /// A failed `assume`.
    Assume,
    /// Waiting on an unfinished thread.
    Join,
    /// Waiting on a held lock.
    LockAcq,
    /// An unmatched LAPOR critical section.
    LockRel,
    /// Blocked by spinloop elision.
    Spinloop,
    /// Waiting at a barrier.
    Barrier,
    /// Stopped by an error on this thread.
    Error,
    /// Blocked at the program's request.
    User,
}

/// An error report: the witnessed error plus the trace that exhibits it.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    /// The witnessed error.
    pub kind: VerificationError,
    /// The event at which the error was detected.
    pub event: Event,
    /// A human-readable label stream of the offending execution.
    pub trace: String,
    /// A DOT rendering of `po ∪ rf` up to the error event.
    pub dot: Option<String>,
}
