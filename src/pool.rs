//! Parallel exploration: a pool of workers, each owning a fully
//! independent clone of the exploration state taken at a backward
//! revisit. Workers never share mutable state; they communicate only by
//! queueing branch states and summing result counters at completion.

use crate::config::Config;
use crate::driver::{Driver, SharedState};
use crate::ir::Module;
use crate::VerificationResult;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct QueueState {
    tasks: VecDeque<SharedState>,
    busy: usize,
}

/// The branch queue shared by all workers.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    workers: usize,
    halted: AtomicBool,
}

impl TaskQueue {
    fn new(workers: usize) -> TaskQueue {
        TaskQueue {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                busy: 0,
            }),
            cond: Condvar::new(),
            workers,
            halted: AtomicBool::new(false),
        }
    }

    /// Backpressure: a submitting driver explores its branch inline
    /// instead when the queue is saturated.
    pub(crate) fn has_capacity(&self) -> bool {
        !self.is_halted() && self.state.lock().tasks.len() < 8 * self.workers
    }

    pub(crate) fn submit(&self, task: SharedState) {
        let mut st = self.state.lock();
        st.tasks.push_back(task);
        drop(st);
        self.cond.notify_one();
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    /// Blocks for the next branch; `None` once the queue has drained and
    /// no worker can produce more work.
    fn next(&self) -> Option<SharedState> {
        let mut st = self.state.lock();
        loop {
            if let Some(task) = st.tasks.pop_front() {
                st.busy += 1;
                return Some(task);
            }
            if st.busy == 0 || self.is_halted() {
                drop(st);
                self.cond.notify_all();
                return None;
            }
            self.cond.wait(&mut st);
        }
    }

    fn task_done(&self) {
        let mut st = self.state.lock();
        st.busy -= 1;
        drop(st);
        self.cond.notify_all();
    }
}

/// Runs the verification with `config.threads` workers.
pub(crate) fn verify_parallel(config: &Config, module: Arc<Module>) -> VerificationResult {
    let workers = config.threads;
    let queue = Arc::new(TaskQueue::new(workers));
    let total: Mutex<VerificationResult> = Mutex::new(VerificationResult::default());

    // The whole exploration is the initial task.
    let seed = Driver::new(config.clone(), module.clone());
    queue.submit(seed.shared_state());

    crossbeam_utils::thread::scope(|s| {
        for i in 0..workers {
            let queue = queue.clone();
            let module = module.clone();
            let total = &total;
            let config = config.clone();
            s.spawn(move |_| {
                let mut local = VerificationResult::default();
                while let Some(task) = queue.next() {
                    if queue.is_halted() {
                        queue.task_done();
                        continue;
                    }
                    let mut driver = Driver::from_shared(config.clone(), module.clone(), task);
                    driver.pool = Some(queue.clone());
                    let res = driver.run();
                    if res.error.is_some() {
                        queue.halt();
                    }
                    local += res;
                    queue.task_done();
                }
                debug!("worker {} done: {:?}", i, local);
                *total.lock() += local;
            });
        }
    })
    .expect("exploration worker panicked");

    total.into_inner()
}
