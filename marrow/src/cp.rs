//! CP propagator framework.
//!
//! Propagators are values implementing [`Propagator`], registered at the root and addressed by
//! ids handed out downwards from `u32::MAX`. Registering a propagator lowers the clause arena's
//! allocation limit, so a reason code can always be attributed by a single range check: at most
//! the limit it is a clause reference, above it a propagator id.
//!
//! Propagators subscribe to bound and removal events of specific integer variables. Freshly
//! assigned bound literals are drained from the trail into domain updates, and each update
//! notifies the subscribed propagators, which may ask to be enqueued. The queue is ordered by
//! priority (lower runs first, FIFO within a priority) and holds each propagator at most once.
//!
//! Reasons for CP propagations are materialized lazily: conflict analysis asks the propagator to
//! explain a literal only when it needs to resolve through it, and the explanation clause is
//! rebuilt on demand after any backtrack or garbage collection.
pub mod cumulative;
pub mod linear;

use std::collections::VecDeque;

use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::context::{
    AssignmentP, ClauseAllocP, ClauseDbP, Context, CpP, CpPropagatorsP, DomainsP, ImplGraphP,
    IntMapP, SolverStateP, TrailP, WatchlistsP,
};
use crate::integer::encoding::IntMap;
use crate::integer::IntVar;
use crate::prop;
use crate::prop::{Conflict, Reason};
use crate::state::{RootConflict, SatState};

pub use cumulative::{CumulativePropagator, CumulativeTask};
pub use linear::LinearInequalityPropagator;

/// Identifier of a registered CP propagator.
///
/// Ids are assigned top-down from `u32::MAX`, keeping them disjoint from clause references.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PropagatorId(u32);

impl PropagatorId {
    /// The raw reason code of this id.
    pub fn code(self) -> u32 {
        self.0
    }

    /// The registry slot of this id.
    pub fn slot(self) -> usize {
        (u32::max_value() - self.0) as usize
    }
}

/// A propagator detected that the current domains are contradictory.
#[derive(Copy, Clone, Debug)]
pub struct Inconsistent;

/// Domain events of one integer variable a propagator wants to be notified about.
#[derive(Copy, Clone, Debug)]
pub struct Subscription {
    pub var: IntVar,
    pub lower_bound: bool,
    pub upper_bound: bool,
    pub removal: bool,
}

/// Mutable context handed to propagators while they propagate.
pub type PropContext<'a> = partial!(
    'a Context,
    mut AssignmentP,
    mut ImplGraphP,
    mut TrailP,
    DomainsP,
    IntMapP,
);

/// Read-only context for notifications, explanations and synchronization.
pub type ReadContext<'a> = partial!('a Context, AssignmentP, DomainsP, ImplGraphP, IntMapP, TrailP);

/// A CP-style propagator sharing the trail with the clausal engine.
pub trait Propagator {
    /// Queue priority; lower values are dequeued first.
    fn priority(&self) -> usize;

    /// Domain events this propagator wants to watch.
    fn subscriptions(&self) -> Vec<Subscription>;

    /// Called once when the propagator is registered; performs root propagation.
    fn initialize_at_root(&mut self, id: PropagatorId, ctx: PropContext)
        -> Result<(), Inconsistent>;

    /// Propagate with respect to the current domain snapshot.
    fn propagate(&mut self, ctx: PropContext) -> Result<(), Inconsistent>;

    /// Propagation without incremental state, used for debugging and as a simple fallback.
    fn propagate_from_scratch(&mut self, ctx: PropContext) -> Result<(), Inconsistent>;

    /// A watched event occurred; returns whether the propagator should be enqueued.
    fn notify_domain_change(&mut self, var: IntVar, ctx: ReadContext) -> bool;

    /// The clause explaining a propagation of this propagator.
    ///
    /// The propagated literal is at index 0; the remaining literals are the falsified bound
    /// literals that entail it.
    fn explain(&mut self, lit: Lit, ctx: ReadContext) -> &[Lit];

    /// The clause explaining the most recent inconsistency.
    fn explain_failure(&mut self) -> &[Lit];

    /// The solver backtracked; rebuild any state derived from the trail.
    fn synchronize(&mut self, ctx: ReadContext);
}

/// Priority queue over pending propagators.
///
/// Each propagator is present at most once; within a priority the order is FIFO.
#[derive(Default)]
pub struct PropagatorQueue {
    queues: Vec<VecDeque<PropagatorId>>,
    enqueued: Vec<bool>,
    len: usize,
}

impl PropagatorQueue {
    /// Enqueue a propagator unless it is already pending.
    pub fn push(&mut self, id: PropagatorId, priority: usize) {
        let slot = id.slot();
        if self.enqueued.len() <= slot {
            self.enqueued.resize(slot + 1, false);
        }
        if self.enqueued[slot] {
            return;
        }
        self.enqueued[slot] = true;
        if self.queues.len() <= priority {
            self.queues.resize_with(priority + 1, VecDeque::new);
        }
        self.queues[priority].push_back(id);
        self.len += 1;
    }

    /// Remove and return the pending propagator with the best priority.
    pub fn pop(&mut self) -> Option<PropagatorId> {
        if self.len == 0 {
            return None;
        }
        for queue in self.queues.iter_mut() {
            if let Some(id) = queue.pop_front() {
                self.enqueued[id.slot()] = false;
                self.len -= 1;
                return Some(id);
            }
        }
        unreachable!("queue length out of sync");
    }

    /// Drop all pending propagators.
    pub fn clear(&mut self) {
        for queue in self.queues.iter_mut() {
            while let Some(id) = queue.pop_front() {
                self.enqueued[id.slot()] = false;
            }
        }
        self.len = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Per-integer-variable subscription lists.
#[derive(Default)]
struct VarWatchers {
    lower_bound: Vec<PropagatorId>,
    upper_bound: Vec<PropagatorId>,
    removal: Vec<PropagatorId>,
}

#[derive(Copy, Clone)]
enum EventKind {
    LowerBound,
    UpperBound,
    Removal,
}

/// Bookkeeping of the CP framework that lives in the solver context.
pub struct CpState {
    pub queue: PropagatorQueue,
    watchers: Vec<VarWatchers>,
    /// Per Boolean variable: some propagator watches the integer variable this Boolean encodes.
    flags: Vec<bool>,
    priorities: Vec<usize>,
    next_id: u32,
}

impl Default for CpState {
    fn default() -> CpState {
        CpState {
            queue: PropagatorQueue::default(),
            // id 0 is reserved
            watchers: vec![VarWatchers::default()],
            flags: vec![],
            priorities: vec![],
            next_id: u32::max_value(),
        }
    }
}

impl CpState {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.flags.resize(count, false);
    }

    /// Room for one more integer variable.
    pub fn grow_int_vars(&mut self) {
        self.watchers.push(VarWatchers::default());
    }

    /// Whether the literal's variable belongs to a watched integer variable.
    pub fn is_flagged(&self, lit: Lit) -> bool {
        self.flags[lit.index()]
    }

    /// Whether any propagator watches the integer variable.
    pub fn is_var_watched(&self, var: IntVar) -> bool {
        let watchers = &self.watchers[var.id()];
        !watchers.lower_bound.is_empty()
            || !watchers.upper_bound.is_empty()
            || !watchers.removal.is_empty()
    }

    /// Queue priority of a registered propagator.
    pub fn priority(&self, id: PropagatorId) -> usize {
        self.priorities[id.slot()]
    }

    fn subscribe(&mut self, subscription: Subscription, id: PropagatorId) {
        let watchers = &mut self.watchers[subscription.var.id()];
        if subscription.lower_bound {
            watchers.lower_bound.push(id);
        }
        if subscription.upper_bound {
            watchers.upper_bound.push(id);
        }
        if subscription.removal {
            watchers.removal.push(id);
        }
    }

    /// Recompute the per-Boolean-variable flags from the current subscriptions.
    pub fn recompute_flags(&mut self, int_map: &IntMap) {
        for index in 0..self.flags.len() {
            let lit = marrow_formula::Var::from_index(index).positive();
            self.flags[index] = match int_map.lit_info(lit) {
                Some(info) => self.is_var_watched(info.var),
                None => false,
            };
        }
    }
}

/// The registered propagators, stored by slot.
#[derive(Default)]
pub struct CpPropagators {
    props: Vec<Box<dyn Propagator>>,
}

impl CpPropagators {
    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn get_mut(&mut self, id: PropagatorId) -> &mut dyn Propagator {
        &mut *self.props[id.slot()]
    }

    fn get_slot_mut(&mut self, slot: usize) -> &mut dyn Propagator {
        &mut *self.props[slot]
    }

    fn push(&mut self, propagator: Box<dyn Propagator>) {
        self.props.push(propagator);
    }
}

/// Registers a propagator, runs its root propagation and propagates to fixpoint.
///
/// A detected conflict proves the formula unsatisfiable at the root.
pub fn register_propagator(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut CpP,
        mut CpPropagatorsP,
        mut DomainsP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        mut WatchlistsP,
        IntMapP,
    ),
    propagator: Box<dyn Propagator>,
) -> Result<PropagatorId, RootConflict> {
    assert_eq!(
        ctx.part(TrailP).current_level(),
        0,
        "propagators can only be registered at the root"
    );

    let id = {
        let (cp, ctx) = ctx.split_part_mut(CpP);
        assert!(cp.next_id > 0, "propagator id space exhausted");
        let id = PropagatorId(cp.next_id);
        cp.next_id -= 1;
        cp.priorities.push(propagator.priority());
        for subscription in propagator.subscriptions() {
            // views cannot rewind their domains on backtracking and must not be watched
            assert!(
                ctx.part(IntMapP).is_rewindable(subscription.var),
                "propagators can only watch fully encoded integer variables"
            );
            cp.subscribe(subscription, id);
        }
        id
    };

    ctx.part_mut(CpPropagatorsP).push(propagator);

    // keep clause references strictly below the propagator ids
    let limit = (id.0 - 1) as u64;
    ctx.part_mut(ClauseAllocP).set_limit(limit);
    ctx.part_mut(ClauseDbP).helper_alloc.set_limit(limit);

    {
        let (cp, ctx) = ctx.split_part_mut(CpP);
        cp.recompute_flags(ctx.part(IntMapP));
    }
    {
        // events drained before the flags existed never reached the domains
        let (domains, ctx) = ctx.split_part_mut(DomainsP);
        domains.update_from_scratch(ctx.part(IntMapP), ctx.part(AssignmentP));
    }

    let init_result = {
        let (props, mut sub_ctx) = ctx.split_part_mut(CpPropagatorsP);
        props.get_mut(id).initialize_at_root(id, sub_ctx.borrow())
    };
    if init_result.is_err() {
        ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
        return Err(RootConflict);
    }

    if prop::propagate(ctx.borrow()).is_err() {
        ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
        return Err(RootConflict);
    }

    Ok(id)
}

/// Runs a single dequeued propagator.
pub fn run_propagator(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut CpPropagatorsP,
        mut ImplGraphP,
        mut TrailP,
        DomainsP,
        IntMapP,
    ),
    id: PropagatorId,
) -> Result<(), Conflict> {
    let (props, mut ctx) = ctx.split_part_mut(CpPropagatorsP);
    match props.get_mut(id).propagate(ctx.borrow()) {
        Ok(()) => Ok(()),
        Err(Inconsistent) => Err(Conflict::Propagator(id)),
    }
}

/// Turns freshly assigned bound literals into domain updates and notifies subscribers.
pub fn drain_domain_events(
    mut ctx: partial!(
        Context,
        mut CpP,
        mut CpPropagatorsP,
        mut DomainsP,
        mut TrailP,
        AssignmentP,
        ImplGraphP,
        IntMapP,
    ),
) {
    loop {
        let pos = ctx.part(TrailP).next_domain_event_pos;
        if pos >= ctx.part(TrailP).len() {
            return;
        }
        let lit = ctx.part(TrailP).trail()[pos];
        ctx.part_mut(TrailP).next_domain_event_pos += 1;

        if !ctx.part(CpP).is_flagged(lit) {
            continue;
        }
        let info = match ctx.part(IntMapP).lit_info(lit) {
            Some(info) => info,
            None => continue,
        };

        let change = ctx.part_mut(DomainsP).update(info.var, info.op, info.rhs);

        if change.removal {
            notify_watchers(ctx.borrow(), info.var, EventKind::Removal);
        }
        if change.lower {
            notify_watchers(ctx.borrow(), info.var, EventKind::LowerBound);
        }
        if change.upper {
            notify_watchers(ctx.borrow(), info.var, EventKind::UpperBound);
        }
    }
}

fn notify_watchers(
    mut ctx: partial!(
        Context,
        mut CpP,
        mut CpPropagatorsP,
        AssignmentP,
        DomainsP,
        ImplGraphP,
        IntMapP,
        TrailP,
    ),
    var: IntVar,
    kind: EventKind,
) {
    let count = {
        let watchers = &ctx.part(CpP).watchers[var.id()];
        match kind {
            EventKind::LowerBound => watchers.lower_bound.len(),
            EventKind::UpperBound => watchers.upper_bound.len(),
            EventKind::Removal => watchers.removal.len(),
        }
    };

    for index in 0..count {
        let id = {
            let watchers = &ctx.part(CpP).watchers[var.id()];
            match kind {
                EventKind::LowerBound => watchers.lower_bound[index],
                EventKind::UpperBound => watchers.upper_bound[index],
                EventKind::Removal => watchers.removal[index],
            }
        };

        let should_enqueue = {
            let (props, mut sub_ctx) = ctx.split_part_mut(CpPropagatorsP);
            props.get_mut(id).notify_domain_change(var, sub_ctx.borrow())
        };

        if should_enqueue {
            let priority = ctx.part(CpP).priority(id);
            ctx.part_mut(CpP).queue.push(id, priority);
        }
    }
}

/// Lets every propagator rebuild its trail-derived state after a backtrack.
pub fn synchronize_all(
    mut ctx: partial!(
        Context,
        mut CpPropagatorsP,
        AssignmentP,
        DomainsP,
        ImplGraphP,
        IntMapP,
        TrailP,
    ),
) {
    let (props, mut ctx) = ctx.split_part_mut(CpPropagatorsP);
    for slot in 0..props.len() {
        props.get_slot_mut(slot).synchronize(ctx.borrow());
    }
}

/// Copies the lazily materialized explanation of a CP propagation into `out`.
///
/// The propagated literal is at index 0 of the copied clause.
pub fn explain_propagation_into(
    mut ctx: partial!(
        Context,
        mut CpPropagatorsP,
        AssignmentP,
        DomainsP,
        ImplGraphP,
        IntMapP,
        TrailP,
    ),
    id: PropagatorId,
    lit: Lit,
    out: &mut Vec<Lit>,
) {
    let (props, mut ctx) = ctx.split_part_mut(CpPropagatorsP);
    let lits = props.get_mut(id).explain(lit, ctx.borrow());
    debug_assert_eq!(lits.first(), Some(&lit));
    out.clear();
    out.extend_from_slice(lits);
}

/// Copies the failure clause of a conflicting CP propagator into `out`.
pub fn explain_failure_into(
    mut ctx: partial!(Context, mut CpPropagatorsP),
    id: PropagatorId,
    out: &mut Vec<Lit>,
) {
    let props = ctx.part_mut(CpPropagatorsP);
    out.clear();
    out.extend_from_slice(props.get_mut(id).explain_failure());
}

/// Copies the antecedent literals of a reason into `out`.
///
/// For clause reasons these are the literals past the propagated one; for CP reasons the
/// explanation clause is materialized on demand. Decisions have no antecedents.
pub fn reason_lits_into(
    mut ctx: partial!(
        Context,
        mut CpPropagatorsP,
        AssignmentP,
        ClauseAllocP,
        DomainsP,
        ImplGraphP,
        IntMapP,
        TrailP,
    ),
    reason: Reason,
    lit: Lit,
    out: &mut Vec<Lit>,
) {
    out.clear();
    match reason {
        Reason::Decision => {}
        Reason::Clause(cref) => {
            let lits = ctx.part(ClauseAllocP).clause(cref).lits();
            debug_assert_eq!(lits[0], lit);
            out.extend_from_slice(&lits[1..]);
        }
        Reason::Propagator(id) => {
            let (props, mut ctx) = ctx.split_part_mut(CpPropagatorsP);
            let lits = props.get_mut(id).explain(lit, ctx.borrow());
            debug_assert_eq!(lits.first(), Some(&lit));
            out.extend_from_slice(&lits[1..]);
        }
    }
}
