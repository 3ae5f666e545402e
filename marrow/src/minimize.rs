//! Learned clause minimization.
//!
//! Removes literals of the learned clause that are dominated in the implication graph: a literal
//! whose reasons eventually lead back only to other literals of the clause (or root
//! assignments) is redundant. The labeling follows Van Gelder's formulation: clause literals
//! start out `PRESENT`; a depth-first search over the antecedents labels variables `REMOVABLE`
//! when all their antecedents check out and `POISON` when a decision outside the clause, a
//! decision level not present in the clause, or the depth bound is hit. Poisoned intermediate
//! results are kept across searches, so no work is repeated.
use partial_ref::{partial, PartialRef};

use marrow_formula::{Lit, Var};

use crate::context::{
    AnalyzeConflictP, AssignmentP, ClauseAllocP, Context, CpPropagatorsP, DomainsP, ImplGraphP,
    IntMapP, MinimizeP, TrailP,
};
use crate::cp;

const PRESENT: u8 = 1;
const KEEP: u8 = 2;
const REMOVABLE: u8 = 3;
const POISON: u8 = 4;

/// Bound on the depth of the antecedent search.
///
/// Literals whose search would go deeper are conservatively kept.
const MAX_DEPTH: usize = 500;

/// One suspended antecedent search.
struct Frame {
    var: Var,
    range_start: usize,
    range_end: usize,
    next: usize,
}

/// State of the learned clause minimizer.
#[derive(Default)]
pub struct Minimize {
    /// Label per variable; 0 means unlabeled.
    labels: Vec<u8>,
    /// Labeled variables, for cleanup.
    labeled: Vec<Var>,
    /// Which decision levels appear in the clause.
    level_in_clause: Vec<bool>,
    marked_levels: Vec<usize>,
    /// Explicit DFS stack.
    stack: Vec<Frame>,
    /// Antecedent literals of all suspended frames.
    antecedents: Vec<Lit>,
    reason_buf: Vec<Lit>,
}

impl Minimize {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.labels.resize(count, 0);
        self.level_in_clause.resize(count + 1, false);
    }
}

/// Parts needed to fetch reason clauses, including lazily materialized CP explanations.
macro_rules! reason_parts {
    () => {
        partial!(
            Context,
            mut CpPropagatorsP,
            mut MinimizeP,
            AssignmentP,
            ClauseAllocP,
            DomainsP,
            ImplGraphP,
            IntMapP,
            TrailP,
        )
    };
}

/// Minimize the learned clause stored in the conflict analysis state.
///
/// The asserting literal at index 0 is never removed and the second-highest-level literal is
/// kept at index 1.
pub fn minimize_learned_clause(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut CpPropagatorsP,
        mut MinimizeP,
        AssignmentP,
        ClauseAllocP,
        DomainsP,
        ImplGraphP,
        IntMapP,
        TrailP,
    ),
) {
    let mut clause = std::mem::take(&mut ctx.part_mut(AnalyzeConflictP).clause);

    if clause.len() > 2 {
        minimize_lits(ctx.borrow(), &mut clause);
    }

    ctx.part_mut(AnalyzeConflictP).clause = clause;
}

fn minimize_lits(mut ctx: reason_parts!(), clause: &mut Vec<Lit>) {
    {
        let (minimize, ctx) = ctx.split_part_mut(MinimizeP);
        let impl_graph = ctx.part(ImplGraphP);

        for &lit in clause.iter() {
            minimize.labels[lit.index()] = PRESENT;
            minimize.labeled.push(lit.var());

            let level = impl_graph.level(lit.var());
            if !minimize.level_in_clause[level] {
                minimize.level_in_clause[level] = true;
                minimize.marked_levels.push(level);
            }
        }
    }

    // the asserting literal stays; everything else is a removal candidate
    let mut end = 1;
    for index in 1..clause.len() {
        let lit = clause[index];

        let label = {
            let current = ctx.part(MinimizeP).labels[lit.index()];
            if current == PRESENT {
                compute_label(ctx.borrow(), lit)
            } else {
                current
            }
        };

        if label != REMOVABLE {
            // the literal stays in the clause, so later searches may lean on it
            ctx.part_mut(MinimizeP).labels[lit.index()] = KEEP;
            clause[end] = lit;
            // restore the second-highest-level invariant on the fly
            let end_level = ctx.part(ImplGraphP).level(clause[end].var());
            let slot_level = ctx.part(ImplGraphP).level(clause[1].var());
            if end_level > slot_level {
                clause.swap(end, 1);
            }
            end += 1;
        }
    }
    clause.truncate(end);

    let minimize = ctx.part_mut(MinimizeP);
    for var in minimize.labeled.drain(..) {
        minimize.labels[var.index()] = 0;
    }
    for level in minimize.marked_levels.drain(..) {
        minimize.level_in_clause[level] = false;
    }
}

/// Decide whether a clause literal is dominated by the rest of the clause.
///
/// Runs the depth-first search over the antecedents with an explicit stack. Every fully
/// expanded variable becomes `REMOVABLE`; any dead end poisons the whole stack, so later
/// searches stop early.
fn compute_label(mut ctx: reason_parts!(), lit: Lit) -> u8 {
    let var = lit.var();

    if ctx.part(ImplGraphP).is_decision(var) {
        let minimize = ctx.part_mut(MinimizeP);
        minimize.labels[var.index()] = KEEP;
        return KEEP;
    }

    debug_assert!(ctx.part(MinimizeP).stack.is_empty());
    debug_assert!(ctx.part(MinimizeP).antecedents.is_empty());

    push_frame(ctx.borrow(), var);

    loop {
        let (frame_var, antecedent) = {
            let minimize = ctx.part_mut(MinimizeP);
            let frame = minimize.stack.last_mut().expect("empty minimization stack");
            if frame.next == frame.range_end {
                (frame.var, None)
            } else {
                frame.next += 1;
                (frame.var, Some(minimize.antecedents[frame.next - 1]))
            }
        };

        let antecedent = match antecedent {
            None => {
                // all antecedents lead back into the clause
                let minimize = ctx.part_mut(MinimizeP);
                minimize.labels[frame_var.index()] = REMOVABLE;
                minimize.labeled.push(frame_var);
                let frame = minimize.stack.pop().unwrap();
                minimize.antecedents.truncate(frame.range_start);
                if minimize.stack.is_empty() {
                    return REMOVABLE;
                }
                continue;
            }
            Some(antecedent) => antecedent,
        };

        let antecedent_var = antecedent.var();
        let level = ctx.part(ImplGraphP).level(antecedent_var);
        if level == 0 {
            continue;
        }

        match ctx.part(MinimizeP).labels[antecedent_var.index()] {
            PRESENT | KEEP | REMOVABLE => continue,
            POISON => return poison_stack(ctx.borrow()),
            _ => {
                let blocked = ctx.part(ImplGraphP).is_decision(antecedent_var)
                    || !ctx.part(MinimizeP).level_in_clause[level];
                if blocked {
                    let minimize = ctx.part_mut(MinimizeP);
                    minimize.labels[antecedent_var.index()] = POISON;
                    minimize.labeled.push(antecedent_var);
                    return poison_stack(ctx.borrow());
                }
                if ctx.part(MinimizeP).stack.len() >= MAX_DEPTH {
                    return poison_stack(ctx.borrow());
                }
                push_frame(ctx.borrow(), antecedent_var);
            }
        }
    }
}

/// Fetch the antecedents of a variable and suspend a search frame for it.
fn push_frame(mut ctx: reason_parts!(), var: Var) {
    let reason = *ctx.part(ImplGraphP).reason(var);
    let true_lit = ctx.part(AssignmentP).true_lit_of(var);

    let mut reason_buf = std::mem::take(&mut ctx.part_mut(MinimizeP).reason_buf);
    cp::reason_lits_into(ctx.borrow(), reason, true_lit, &mut reason_buf);

    let minimize = ctx.part_mut(MinimizeP);
    let range_start = minimize.antecedents.len();
    minimize.antecedents.extend_from_slice(&reason_buf);
    let range_end = minimize.antecedents.len();

    minimize.reason_buf = reason_buf;
    minimize.stack.push(Frame {
        var,
        range_start,
        range_end,
        next: range_start,
    });
}

/// Abort the search, poisoning everything still suspended.
fn poison_stack(mut ctx: reason_parts!()) -> u8 {
    let minimize = ctx.part_mut(MinimizeP);
    while let Some(frame) = minimize.stack.pop() {
        minimize.labels[frame.var.index()] = POISON;
        minimize.labeled.push(frame.var);
    }
    minimize.antecedents.clear();
    POISON
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use marrow_formula::{cnf_formula, lits, Lit};

    use crate::analyze_conflict::analyze_conflict;
    use crate::context::set_var_count;
    use crate::load::add_clause;
    use crate::prop::{enqueue_assignment, propagate, Reason};

    #[test]
    fn removes_dominated_literal() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        // 1 implies 2 which implies 3; the conflict pulls both 2 and 3 into the learned
        // clause, where 3 is dominated by 2 and can be dropped.
        let formula = cnf_formula![
            -1, 2;
            -2, 3;
            -3, -4, 5;
            -2, -3, -5;
        ];

        set_var_count(ctx.borrow(), formula.var_count());
        for clause in formula.iter() {
            add_clause(ctx.borrow(), clause).unwrap();
        }

        ctx.part_mut(TrailP).new_decision_level();
        enqueue_assignment(ctx.borrow(), lits![1][0], Reason::Decision);
        propagate(ctx.borrow()).unwrap();

        ctx.part_mut(TrailP).new_decision_level();
        enqueue_assignment(ctx.borrow(), lits![4][0], Reason::Decision);
        let conflict = propagate(ctx.borrow()).unwrap_err();

        analyze_conflict(ctx.borrow(), conflict);

        let unminimized: Vec<Lit> = ctx.part(AnalyzeConflictP).clause().to_vec();
        minimize_learned_clause(ctx.borrow());
        let minimized: Vec<Lit> = ctx.part(AnalyzeConflictP).clause().to_vec();

        assert_eq!(unminimized.len(), 3);
        assert_eq!(minimized[0], unminimized[0]);
        // the level-1 chain collapses into a single literal
        assert_eq!(minimized.len(), 2);
    }
}
