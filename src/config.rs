//! Verification configuration.

/// The memory model verification runs under.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemoryModel {
    /// Sequential consistency.
    Sc,
    /// Total store order.
    Tso,
    /// Release/acquire (the RC11 fragment without SC accesses).
    Ra,
    /// The repaired C11 model.
    Rc11,
    /// The intermediate memory model (dependency tracking).
    Imm,
}

/// How the scheduler picks the next thread to run.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SchedulePolicy {
    /// First schedulable thread in thread-id order.
    Ltr,
    /// Writes-first: prefer a thread whose next instruction is not a
    /// load, falling back to `Ltr`.
    Wf,
    /// Uniformly random among schedulable threads (seeded).
    Random,
}

/// The program points at which full consistency is (re)established.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ProgramPoint {
    /// After every exploration step.
    Step,
    /// Only when an execution completes.
    Exec,
}

/// Configuration of one verification run. The enclosing binary parses its
/// command line into this; the core only reads it.
#[derive(Clone, Debug)]
pub struct Config {
    /// The memory model to check under.
    pub model: MemoryModel,
    /// The scheduling policy.
    pub schedule_policy: SchedulePolicy,
    /// Seed for the `Random` policy and `nondet_int`.
    pub seed: u64,
    /// Loop unrolling bound applied by the (external) transformation
    /// passes; carried for diagnostics only.
    pub unroll: Option<u32>,
    /// Whether spinloops are transformed into assume-blocks.
    pub spin_assume: bool,
    /// Whether non-atomic races are reported.
    pub check_race_detection: bool,
    /// Whether liveness of blocked spinloops is checked.
    pub check_liveness: bool,
    /// Whether symmetry reduction is applied.
    pub symmetry_reduction: bool,
    /// Lock-aware partial order reduction for mutexes.
    pub lapor: bool,
    /// Whether persistency (disk) events participate.
    pub persevere: bool,
    /// Whether a modeled system-call failure is a verification error.
    pub stop_on_system_error: bool,
    /// Whether terminal barrier waits are revisited in place.
    pub barrier_opt: bool,
    /// When consistency is established.
    pub check_cons_point: ProgramPoint,
    /// Worker threads for parallel exploration (1 = sequential).
    pub threads: usize,
    /// Print each complete execution graph (debugging aid).
    pub print_exec_graphs: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            model: MemoryModel::Rc11,
            schedule_policy: SchedulePolicy::Wf,
            seed: 0,
            unroll: None,
            spin_assume: true,
            check_race_detection: true,
            check_liveness: false,
            symmetry_reduction: false,
            lapor: false,
            persevere: false,
            stop_on_system_error: false,
            barrier_opt: true,
            check_cons_point: ProgramPoint::Step,
            threads: 1,
            print_exec_graphs: false,
        }
    }
}

impl Config {
    /// Whether the chosen model tracks syntactic dependencies.
    pub fn is_dep_tracking_model(&self) -> bool {
        self.model == MemoryModel::Imm
    }
}
