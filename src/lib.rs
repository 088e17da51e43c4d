#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

//! `weft` is a stateless model checker for concurrent shared-memory
//! programs under weak memory models. Given a program lowered to the
//! crate's small intermediate representation, it enumerates -- up to a
//! model-specific equivalence -- the consistent execution graphs the
//! program can produce, and reports any graph witnessing an error: an
//! assertion failure, a data race, a use-after-free, an uninitialized
//! read, a double free, or a liveness violation.
//!
//! Exploration is a DPOR-style stateless search. A cooperative
//! interpreter executes the program one instruction at a time; every
//! memory or synchronization event extends an in-memory execution
//! graph. At each load the driver picks a reads-from option and pushes
//! the alternatives onto a worklist; at each store it computes the set
//! of loads that must be *revisited* now that the store is visible.
//! Popping a work item cuts the graph back to a stamp, restores any
//! saved prefix, and resumes execution in replay mode. Whether a
//! partially built graph is consistent is decided by a per-model
//! checker derived from an NFA description of the memory model.
//!
//! ```
//! use weft::ir::ModuleBuilder;
//! use weft::{Config, MemOrdering, MemoryModel};
//!
//! let mut m = ModuleBuilder::new();
//! let x = m.global("x", 4, 0);
//! {
//!     let mut f = m.function("main");
//!     f.store_ord(x, 1u64, MemOrdering::Relaxed);
//!     let v = f.load_ord(x, MemOrdering::Relaxed);
//!     f.ret(Some(v.into()));
//! }
//!
//! let mut config = Config::default();
//! config.model = MemoryModel::Rc11;
//! let result = weft::verify(&config, m.build());
//! assert_eq!(result.explored, 1);
//! assert!(result.error.is_none());
//! ```

pub mod config;
mod consistency;
mod deps;
mod driver;
pub mod errors;
pub mod event;
pub mod graph;
mod interp;
pub mod ir;
pub mod label;
pub mod mem;
mod pool;
pub mod value;
pub mod view;
mod worklist;

pub use crate::config::{Config, MemoryModel, ProgramPoint, SchedulePolicy};
pub use crate::errors::{BlockageType, ErrorReport, SystemErrorKind, VerificationError};
pub use crate::event::Event;
pub use crate::label::{Annot, MemOrdering, RmwOp};
pub use crate::mem::SAddr;
pub use crate::value::{ASize, AType, SVal};

use std::sync::Arc;

/// The summary of one verification run.
#[derive(Clone, Debug, Default)]
pub struct VerificationResult {
    /// Complete consistent executions explored.
    pub explored: u64,
    /// Executions that ended with some thread blocked (failed assume,
    /// elided spinloop, unacquired lock).
    pub explored_blocked: u64,
    /// Duplicate revisits suppressed by the revisit set.
    pub duplicates: u64,
    /// The first witnessed error, if any.
    pub error: Option<ErrorReport>,
}

impl std::ops::AddAssign for VerificationResult {
    fn add_assign(&mut self, other: VerificationResult) {
        self.explored += other.explored;
        self.explored_blocked += other.explored_blocked;
        self.duplicates += other.duplicates;
        if self.error.is_none() {
            self.error = other.error;
        }
    }
}

/// Verifies `module` under `config`, exploring every consistent
/// execution graph and returning the summed result.
///
/// The search is exhaustive for the chosen memory model: when
/// [`VerificationResult::error`] is `None`, no reachable execution of
/// the program witnesses an error under that model.
pub fn verify(config: &Config, module: ir::Module) -> VerificationResult {
    let module = Arc::new(module);
    if config.threads > 1 {
        return pool::verify_parallel(config, module);
    }
    driver::Driver::new(config.clone(), module).run()
}
