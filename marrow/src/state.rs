//! Miscellaneous solver state.
use thiserror::Error;

/// Satisfiability state.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SatState {
    Unknown,
    Sat,
    Unsat,
    UnsatUnderAssumptions,
}

impl Default for SatState {
    fn default() -> SatState {
        SatState::Unknown
    }
}

/// A root conflict detected while adding constraints.
///
/// Unit propagation at level 0 derived a contradiction, which proves the formula unsatisfiable.
#[derive(Copy, Clone, Debug, Error)]
#[error("the formula is unsatisfiable at the root")]
pub struct RootConflict;

/// A saved point of the root-level constraint store.
///
/// Everything added after the point (permanent clauses, root assignments, learned clauses) can be
/// undone by a state reset. Used by the varying-resolution upper-bound search.
#[derive(Copy, Clone, Debug)]
pub struct StatePoint {
    pub num_permanent: usize,
    pub num_temporary: usize,
    pub trail_len: usize,
}

/// Miscellaneous solver state.
///
/// Anything larger or any larger group of related state variables should be moved into a
/// separate part of [`Context`](crate::context::Context).
#[derive(Default)]
pub struct SolverState {
    pub sat_state: SatState,
    /// Stack of saved root states; resets target the innermost one.
    pub state_points: Vec<StatePoint>,
}
