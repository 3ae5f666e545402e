//! Solver statistics.

/// Counters updated by the main loop.
#[derive(Copy, Clone, Default, Debug)]
pub struct Stats {
    pub conflicts: u64,
    pub decisions: u64,
    pub propagations: u64,
    pub restarts: u64,
    pub blocked_restarts: u64,
    pub clause_cleanups: u64,
    pub removed_clauses: u64,
    pub gc_runs: u64,
    pub learned_units: u64,
    pub learned_clauses: u64,
    pub learned_literals: u64,
}
