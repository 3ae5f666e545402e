//! Assumption handling and core extraction.
use partial_ref::{partial, PartialRef};

use marrow_formula::{Lit, Var};

use crate::context::{
    AssignmentP, ClauseAllocP, Context, CpPropagatorsP, DomainsP, ImplGraphP, IncrementalP,
    IntMapP, TmpDataP, TrailP,
};
use crate::cp;

/// Assumption state of the current solve call.
#[derive(Default)]
pub struct Incremental {
    /// Subset of assumptions that made the formula unsatisfiable.
    ///
    /// Contains the negations of the conflicting assumption literals.
    failed_core: Vec<Lit>,
}

impl Incremental {
    /// Subset of assumptions that made the formula unsatisfiable.
    pub fn failed_core(&self) -> &[Lit] {
        &self.failed_core
    }
}

/// Compute a core of jointly infeasible assumptions.
///
/// `falsified_assumption` is an assumption found assigned false when it was due to be enqueued.
/// Starting from the reason of its negation, propagated assumptions are expanded through their
/// reason clauses until only decision assumptions are left; those form the core, stored as the
/// clause of their negations.
pub fn extract_core(
    mut ctx: partial!(
        Context,
        mut CpPropagatorsP,
        mut IncrementalP,
        mut TmpDataP,
        AssignmentP,
        ClauseAllocP,
        DomainsP,
        ImplGraphP,
        IntMapP,
        TrailP,
    ),
    falsified_assumption: Lit,
) {
    let mut core = std::mem::take(&mut ctx.part_mut(IncrementalP).failed_core);
    core.clear();

    let var = falsified_assumption.var();

    if ctx.part(ImplGraphP).level(var) == 0 {
        core.push(!falsified_assumption);
        ctx.part_mut(IncrementalP).failed_core = core;
        return;
    }

    let reason = *ctx.part(ImplGraphP).reason(var);

    // a decision here means the assumptions directly contradict each other
    if reason.is_decision() {
        core.push(!falsified_assumption);
        core.push(falsified_assumption);
        ctx.part_mut(IncrementalP).failed_core = core;
        return;
    }

    let mut reason_buf = std::mem::take(&mut ctx.part_mut(TmpDataP).lits);
    let mut worklist = std::mem::take(&mut ctx.part_mut(TmpDataP).lits_2);
    worklist.clear();
    let mut touched: Vec<Var> = vec![];

    cp::reason_lits_into(ctx.borrow(), reason, !falsified_assumption, &mut reason_buf);
    for &lit in reason_buf.iter() {
        mark_processed(ctx.borrow(), lit.var(), &mut touched);
        worklist.push(lit);
    }

    // the worklist holds falsified literals whose negations are assigned assumptions or
    // propagations thereof
    while let Some(current) = worklist.pop() {
        let var = current.var();

        if ctx.part(ImplGraphP).level(var) == 0 {
            // unit clauses enter the trail as level-0 decisions and never belong to a core
            continue;
        }

        if ctx.part(ImplGraphP).is_decision(var) {
            core.push(current);
            continue;
        }

        let reason = *ctx.part(ImplGraphP).reason(var);
        cp::reason_lits_into(ctx.borrow(), reason, !current, &mut reason_buf);
        for index in 0..reason_buf.len() {
            let reason_lit = reason_buf[index];
            let reason_var = reason_lit.var();
            // an assumption may be responsible for several implied assumptions
            if ctx.part(TmpDataP).flags[reason_var.index()]
                || ctx.part(ImplGraphP).level(reason_var) == 0
            {
                continue;
            }
            mark_processed(ctx.borrow(), reason_var, &mut touched);
            worklist.push(reason_lit);
        }
    }

    core.push(!falsified_assumption);

    for var in touched {
        ctx.part_mut(TmpDataP).flags[var.index()] = false;
    }

    ctx.part_mut(TmpDataP).lits = reason_buf;
    ctx.part_mut(TmpDataP).lits_2 = worklist;
    ctx.part_mut(IncrementalP).failed_core = core;
}

fn mark_processed(
    mut ctx: partial!(Context, mut TmpDataP),
    var: Var,
    touched: &mut Vec<Var>,
) {
    let flags = &mut ctx.part_mut(TmpDataP).flags;
    if !flags[var.index()] {
        flags[var.index()] = true;
        touched.push(var);
    }
}
