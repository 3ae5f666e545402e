//! Decision heuristics.
pub mod phase;
pub mod vsids;

use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::context::{AssignmentP, Context, PhasesP, VsidsP};

/// Pick the unassigned variable with the highest activity and attach its saved phase.
///
/// Returns `None` when all variables are assigned, i.e. a full assignment was found.
pub fn choose_decision_lit(
    mut ctx: partial!(Context, mut VsidsP, AssignmentP, PhasesP),
) -> Option<Lit> {
    let (vsids, ctx) = ctx.split_part_mut(VsidsP);
    let assignment = ctx.part(AssignmentP);
    let phases = ctx.part(PhasesP);

    // the heap is lazy: it may still hold assigned variables
    for var in vsids {
        if assignment.var_value(var).is_none() {
            return Some(Lit::from_var(var, phases.value(var)));
        }
    }
    None
}
