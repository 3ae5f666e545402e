//! Propagation to fixpoint.
//!
//! The clausal propagator is always drained first. Whenever the clausal queue is empty, freshly
//! assigned bound literals are turned into domain updates, which notify subscribed CP
//! propagators. CP propagators are then run one at a time in priority order; as soon as one of
//! them enqueues a literal, control goes back to the clausal propagator. A fixpoint is reached
//! when the trail is fully propagated and the propagator queue is empty.
pub mod assignment;
pub mod graph;
pub mod long;
pub mod watch;

use partial_ref::{partial, PartialRef};

use crate::context::{
    AssignmentP, ClauseAllocP, Context, CpP, CpPropagatorsP, DomainsP, ImplGraphP, IntMapP,
    TrailP, WatchlistsP,
};
use crate::cp;

pub use assignment::{backtrack, enqueue_assignment, Assignment, Trail};
pub use graph::{Conflict, ImplGraph, ImplNode, Reason};
pub use long::propagate_long;
pub use watch::{Watch, Watchlists};

/// Propagate all enqueued assignments to fixpoint.
///
/// On conflict the clause or propagator that derived the contradiction is returned.
pub fn propagate(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut CpP,
        mut CpPropagatorsP,
        mut DomainsP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
        IntMapP,
    ),
) -> Result<(), Conflict> {
    loop {
        while let Some(lit) = ctx.part_mut(TrailP).pop_queue() {
            propagate_long(ctx.borrow(), lit)?;
        }

        cp::drain_domain_events(ctx.borrow());

        let next = ctx.part_mut(CpP).queue.pop();
        match next {
            None => return Ok(()),
            Some(id) => cp::run_propagator(ctx.borrow(), id)?,
        }
    }
}
