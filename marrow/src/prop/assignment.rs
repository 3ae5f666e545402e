//! Partial assignment, trail and backtracking.
use partial_ref::{partial, PartialRef};

use crate::context::{
    AssignmentP, Context, CpP, CpPropagatorsP, DomainsP, ImplGraphP, IntMapP, PhasesP, TrailP,
    VsidsP,
};
use crate::cp;
use crate::integer::DomainOp;
use marrow_formula::{lit::LitIdx, Lit, Var};

use super::Reason;

/// Current partial assignment.
#[derive(Default)]
pub struct Assignment {
    assignment: Vec<Option<bool>>,
}

/// This compares two `Option<bool>` values as bytes. Workaround for bad code generation.
pub fn fast_option_eq(a: Option<bool>, b: Option<bool>) -> bool {
    unsafe { std::mem::transmute::<_, u8>(a) == std::mem::transmute::<_, u8>(b) }
}

impl Assignment {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.assignment.resize(count, None);
    }

    /// Number of variables.
    pub fn var_count(&self) -> usize {
        self.assignment.len()
    }

    /// Current partial assignment as slice.
    pub fn assignment(&self) -> &[Option<bool>] {
        &self.assignment
    }

    /// Value assigned to a variable.
    pub fn var_value(&self, var: Var) -> Option<bool> {
        self.assignment[var.index()]
    }

    /// Value assigned to a literal.
    pub fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.assignment[lit.index()].map(|b| b ^ lit.is_negative())
    }

    pub fn lit_is_true(&self, lit: Lit) -> bool {
        fast_option_eq(self.assignment[lit.index()], Some(lit.is_positive()))
    }

    pub fn lit_is_false(&self, lit: Lit) -> bool {
        fast_option_eq(self.assignment[lit.index()], Some(lit.is_negative()))
    }

    pub fn lit_is_unk(&self, lit: Lit) -> bool {
        fast_option_eq(self.assignment[lit.index()], None)
    }

    pub fn assign_lit(&mut self, lit: Lit) {
        self.assignment[lit.index()] = lit.is_positive().into()
    }

    /// Remove any assignment of the variable.
    ///
    /// Only valid while popping the trail in LIFO order.
    pub fn unassign(&mut self, var: Var) {
        self.assignment[var.index()] = None;
    }

    /// The literal of an assigned variable that is currently true.
    pub fn true_lit_of(&self, var: Var) -> Lit {
        debug_assert!(self.assignment[var.index()].is_some());
        Lit::from_var(var, self.assignment[var.index()] == Some(true))
    }
}

/// Decision and propagation history.
#[derive(Default)]
pub struct Trail {
    /// Stack of all propagated and all enqueued assignments
    trail: Vec<Lit>,
    /// Next assignment in trail to propagate
    queue_head_pos: usize,
    /// Decision levels as trail indices.
    decisions: Vec<LitIdx>,
    /// Next assignment to turn into an integer domain update.
    pub next_domain_event_pos: usize,
}

impl Trail {
    ///  Return the next assigned literal to propagate and remove it from the queue.
    pub fn pop_queue(&mut self) -> Option<Lit> {
        let head = self.trail.get(self.queue_head_pos).cloned();
        if head.is_some() {
            self.queue_head_pos += 1;
        }
        head
    }

    /// Assigned literals in assignment order.
    pub fn trail(&self) -> &[Lit] {
        &self.trail
    }

    /// Number of assigned literals.
    pub fn len(&self) -> usize {
        self.trail.len()
    }

    /// Start a new decision level.
    ///
    /// Does not enqueue the decision itself.
    pub fn new_decision_level(&mut self) {
        self.decisions.push(self.trail.len() as LitIdx)
    }

    /// Current decision level.
    pub fn current_level(&self) -> usize {
        self.decisions.len()
    }

    /// Trail position where the given decision level starts.
    pub fn level_start(&self, level: usize) -> usize {
        if level == 0 {
            0
        } else {
            self.decisions[level - 1] as usize
        }
    }

    /// The number of assignments at level 0.
    pub fn root_assignment_count(&self) -> usize {
        self.decisions
            .get(0)
            .map(|&len| len as usize)
            .unwrap_or_else(|| self.trail.len())
    }

    /// Whether all assignments are processed.
    pub fn fully_propagated(&self) -> bool {
        self.queue_head_pos == self.trail.len()
    }

    /// Pull the propagation cursor back after root assignments were removed.
    pub fn rewind_queue(&mut self, new_len: usize) {
        self.queue_head_pos = self.queue_head_pos.min(new_len);
    }
}

/// Enqueues the assignment of true to a literal.
///
/// This updates the assignment and trail, but does not perform any propagation. The literal has
/// to be unassigned when calling this.
pub fn enqueue_assignment(
    mut ctx: partial!(Context, mut AssignmentP, mut ImplGraphP, mut TrailP),
    lit: Lit,
    reason: Reason,
) {
    let assignment = ctx.part_mut(AssignmentP);
    debug_assert!(assignment.lit_value(lit) == None);

    assignment.assign_lit(lit);

    let (trail, mut ctx) = ctx.split_part_mut(TrailP);

    trail.trail.push(lit);

    let node = &mut ctx.part_mut(ImplGraphP).nodes[lit.index()];
    node.reason = reason;
    node.level = trail.decisions.len() as LitIdx;
}

/// Undo all assignments past the given trail length.
///
/// Restores heap membership and saved phases for the unassigned variables and rewinds the
/// integer domain updates that were already drained for them. Does not touch the decision level
/// bookkeeping, which the callers adjust themselves.
pub fn pop_assignments(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut DomainsP,
        mut PhasesP,
        mut TrailP,
        mut VsidsP,
        CpP,
        IntMapP,
    ),
    new_len: usize,
) {
    let (trail, mut ctx) = ctx.split_part_mut(TrailP);
    let (assignment, mut ctx) = ctx.split_part_mut(AssignmentP);
    let (vsids, mut ctx) = ctx.split_part_mut(VsidsP);
    let (phases, mut ctx) = ctx.split_part_mut(PhasesP);
    let (domains, mut ctx) = ctx.split_part_mut(DomainsP);
    let (cp, ctx) = ctx.split_part(CpP);
    let int_map = ctx.part(IntMapP);

    while trail.trail.len() > new_len {
        let lit = *trail.trail.last().unwrap();

        vsids.make_available(lit.var());
        phases.save(lit.var(), lit.is_positive());
        assignment.unassign(lit.var());

        if trail.next_domain_event_pos == trail.trail.len() {
            trail.next_domain_event_pos -= 1;

            // Bound updates are rewound through the not-equal literals that propagation derived
            // alongside them. Binary domains share [x != 0] with [x == 1] and need the special
            // case below.
            if cp.is_flagged(lit) {
                if let Some(info) = int_map.lit_info(lit) {
                    if info.op == DomainOp::NotEqual {
                        domains.readd(info.var, info.rhs);
                    } else if int_map.eq_lit_opt(info.var, 0) == Some(!lit) {
                        debug_assert!(info.op == DomainOp::Equal && info.rhs == 1);
                        domains.readd(info.var, 0);
                    }
                }
            }
        }

        trail.trail.pop();
    }
}

/// Undo all assignments in decision levels deeper than the given level.
pub fn backtrack(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut CpP,
        mut CpPropagatorsP,
        mut DomainsP,
        mut PhasesP,
        mut TrailP,
        mut VsidsP,
        ImplGraphP,
        IntMapP,
    ),
    level: usize,
) {
    if level >= ctx.part(TrailP).current_level() {
        return;
    }

    let new_len = {
        let trail = ctx.part(TrailP);
        trail.decisions[level] as usize
    };

    pop_assignments(ctx.borrow(), new_len);

    let trail = ctx.part_mut(TrailP);
    trail.decisions.truncate(level);
    trail.queue_head_pos = new_len;

    ctx.part_mut(CpP).queue.clear();
    cp::synchronize_all(ctx.borrow());
}
