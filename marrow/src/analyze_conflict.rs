//! Learns a new clause by analyzing a conflict.
use partial_ref::{partial, PartialRef};

use marrow_formula::{Lit, Var};

use crate::clause::{bump_clause_activity, ClauseRef};
use crate::context::{
    AnalyzeConflictP, AssignmentP, ClauseActivityP, ClauseAllocP, ClauseDbP, Context,
    CpPropagatorsP, DomainsP, ImplGraphP, IntMapP, SolverConfigP, TrailP, VsidsP,
};
use crate::cp;
use crate::prop::{Conflict, Reason};

/// Temporaries for conflict analysis
#[derive(Default)]
pub struct AnalyzeConflict {
    /// This is the learned clause after analysis finishes.
    ///
    /// The asserting literal is at index 0, the literal of the second-highest decision level at
    /// index 1.
    pub clause: Vec<Lit>,
    /// Decision level to backtrack to, i.e. the second-highest level in the clause.
    pub backtrack_level: usize,
    /// Number of literals of the current level not yet resolved.
    current_level_count: usize,
    /// Variables already part of the resolvent.
    var_seen: Vec<bool>,
    /// Entries to clean in `var_seen`.
    to_clean: Vec<Var>,
    /// Stamps per decision level for LBD computation.
    lbd_stamp: Vec<u64>,
    lbd_counter: u64,
    /// Reused buffer for materialized reason clauses.
    reason_buf: Vec<Lit>,
}

impl AnalyzeConflict {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.var_seen.resize(count, false);
        self.lbd_stamp.resize(count + 1, 0);
    }

    /// The learned clause.
    pub fn clause(&self) -> &[Lit] {
        &self.clause
    }
}

/// Number of distinct non-root decision levels among the given literals.
pub fn compute_lbd(
    mut ctx: partial!(Context, mut AnalyzeConflictP, ImplGraphP),
    lits: &[Lit],
) -> u32 {
    let (analyze, ctx) = ctx.split_part_mut(AnalyzeConflictP);
    let impl_graph = ctx.part(ImplGraphP);

    analyze.lbd_counter += 1;
    let stamp = analyze.lbd_counter;

    // level 0 never counts towards the LBD
    analyze.lbd_stamp[0] = stamp;

    let mut lbd = 0;
    for &lit in lits {
        let level = impl_graph.level(lit.var());
        if analyze.lbd_stamp[level] != stamp {
            analyze.lbd_stamp[level] = stamp;
            lbd += 1;
        }
    }
    lbd
}

/// Bump a traversed learned reason clause and tighten its stored LBD.
///
/// Clauses that improve their LBD are protected from the next reduction.
fn update_lbd(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        ClauseDbP,
        ImplGraphP,
    ),
    cref: ClauseRef,
) {
    {
        let header = ctx.part(ClauseAllocP).header(cref);
        if !header.learned() || header.lbd() <= 2 {
            return;
        }
    }

    bump_clause_activity(ctx.borrow(), cref);

    let (analyze, mut ctx) = ctx.split_part_mut(AnalyzeConflictP);
    let (alloc, ctx) = ctx.split_part_mut(ClauseAllocP);
    let impl_graph = ctx.part(ImplGraphP);

    let new_lbd = {
        let lits = alloc.clause(cref).lits();

        analyze.lbd_counter += 1;
        let stamp = analyze.lbd_counter;
        analyze.lbd_stamp[0] = stamp;

        let mut lbd = 0;
        for &lit in lits {
            let level = impl_graph.level(lit.var());
            if analyze.lbd_stamp[level] != stamp {
                analyze.lbd_stamp[level] = stamp;
                lbd += 1;
            }
        }
        lbd
    };

    let header = alloc.header_mut(cref);
    if new_lbd < header.lbd() {
        header.set_lbd(new_lbd);
        if new_lbd <= 30 {
            header.set_protected(true);
        }
    }
}

/// Learns a new clause by 1-UIP resolution over the trail.
///
/// The result is stored in the [`AnalyzeConflict`] part: the asserting literal ends up at
/// index 0 and the second-highest-level literal at index 1, with `backtrack_level` set
/// accordingly.
pub fn analyze_conflict(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        mut CpPropagatorsP,
        mut VsidsP,
        AssignmentP,
        ClauseDbP,
        DomainsP,
        ImplGraphP,
        IntMapP,
        SolverConfigP,
        TrailP,
    ),
    conflict: Conflict,
) {
    let current_level = ctx.part(TrailP).current_level();
    debug_assert!(current_level > 0, "a root conflict is not analyzed");

    {
        let analyze = ctx.part_mut(AnalyzeConflictP);
        analyze.clause.clear();
        // reserve index 0 for the asserting literal
        analyze.clause.push(Lit::from_code(0));
        analyze.current_level_count = 0;
        analyze.backtrack_level = 0;
    }

    let mut reason_buf = std::mem::take(&mut ctx.part_mut(AnalyzeConflictP).reason_buf);

    // We start with all the literals of the conflicting clause
    match conflict {
        Conflict::Clause(cref) => {
            update_lbd(ctx.borrow(), cref);
            reason_buf.clear();
            reason_buf.extend_from_slice(ctx.part(ClauseAllocP).clause(cref).lits());
        }
        Conflict::Propagator(id) => {
            cp::explain_failure_into(ctx.borrow(), id, &mut reason_buf);
        }
    }
    for index in 0..reason_buf.len() {
        let lit = reason_buf[index];
        add_literal(ctx.borrow(), lit);
    }

    // To get rid of all but one literal of the current level, we resolve the clause with the
    // reasons of those literals, in reverse chronological order.
    let mut trail_index = ctx.part(TrailP).len();
    loop {
        let lit = loop {
            trail_index -= 1;
            let lit = ctx.part(TrailP).trail()[trail_index];
            if ctx.part(AnalyzeConflictP).var_seen[lit.index()] {
                break lit;
            }
        };

        let found_uip = {
            let analyze = ctx.part_mut(AnalyzeConflictP);
            // the same variable cannot appear on the trail twice
            analyze.var_seen[lit.index()] = false;
            analyze.current_level_count -= 1;
            analyze.current_level_count == 0
        };

        if found_uip {
            // lit is the last current-level literal of the resolvent, so the result asserts its
            // negation
            ctx.part_mut(AnalyzeConflictP).clause[0] = !lit;
            break;
        }

        let reason = *ctx.part(ImplGraphP).reason(lit.var());
        if let Reason::Clause(cref) = reason {
            update_lbd(ctx.borrow(), cref);
        }
        cp::reason_lits_into(ctx.borrow(), reason, lit, &mut reason_buf);
        for index in 0..reason_buf.len() {
            let reason_lit = reason_buf[index];
            add_literal(ctx.borrow(), reason_lit);
        }
    }

    ctx.part_mut(AnalyzeConflictP).reason_buf = reason_buf;

    if ctx.part(SolverConfigP).bump_decision_variables {
        let clause_len = ctx.part(AnalyzeConflictP).clause.len();
        for index in 1..clause_len {
            let lit = ctx.part(AnalyzeConflictP).clause[index];
            if ctx.part(ImplGraphP).is_decision(lit.var()) {
                ctx.part_mut(VsidsP).bump(lit.var());
            }
        }
    }

    let (analyze, mut ctx) = ctx.split_part_mut(AnalyzeConflictP);
    for var in analyze.to_clean.drain(..) {
        analyze.var_seen[var.index()] = false;
    }

    ctx.part_mut(VsidsP).decay();
}

/// Add a literal to the resolvent.
fn add_literal(
    mut ctx: partial!(Context, mut AnalyzeConflictP, mut VsidsP, ImplGraphP, TrailP),
    lit: Lit,
) {
    let (analyze, mut ctx) = ctx.split_part_mut(AnalyzeConflictP);
    let lit_level = ctx.part(ImplGraphP).level(lit.var());
    // No need to add literals that are set by unit clauses or already present
    if lit_level > 0 && !analyze.var_seen[lit.index()] {
        ctx.part_mut(VsidsP).bump(lit.var());

        analyze.var_seen[lit.index()] = true;
        analyze.to_clean.push(lit.var());

        if lit_level == ctx.part(TrailP).current_level() {
            analyze.current_level_count += 1;
        } else {
            analyze.clause.push(lit);
            // keep the highest non-asserting level at index 1 so the clause is ready for
            // watching after backtracking
            if lit_level > analyze.backtrack_level {
                analyze.backtrack_level = lit_level;
                let last = analyze.clause.len() - 1;
                analyze.clause[last] = analyze.clause[1];
                analyze.clause[1] = lit;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use marrow_formula::{cnf_formula, lits};

    use crate::context::set_var_count;
    use crate::load::add_clause;
    use crate::prop::{backtrack, enqueue_assignment, propagate};

    #[test]
    fn learns_an_asserting_clause() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        let formula = cnf_formula![
            -1, -2, 3;
            -3, -4, 5;
            -5, 6;
            -3, -6, -5;
        ];

        set_var_count(ctx.borrow(), formula.var_count());
        for clause in formula.iter() {
            add_clause(ctx.borrow(), clause).unwrap();
        }

        for &decision in lits![1, 2, 4].iter() {
            ctx.part_mut(TrailP).new_decision_level();
            enqueue_assignment(ctx.borrow(), decision, Reason::Decision);
            if let Err(conflict) = propagate(ctx.borrow()) {
                analyze_conflict(ctx.borrow(), conflict);

                let clause: Vec<Lit> = ctx.part(AnalyzeConflictP).clause().to_vec();
                let backtrack_level = ctx.part(AnalyzeConflictP).backtrack_level;

                // exactly one literal of the current level, at index 0
                let current = ctx.part(TrailP).current_level();
                let current_level_lits = clause
                    .iter()
                    .filter(|lit| ctx.part(ImplGraphP).level(lit.var()) == current)
                    .count();
                assert_eq!(current_level_lits, 1);
                assert_eq!(ctx.part(ImplGraphP).level(clause[0].var()), current);

                // index 1 carries the backtrack level
                assert!(clause.len() > 1);
                assert_eq!(
                    ctx.part(ImplGraphP).level(clause[1].var()),
                    backtrack_level
                );

                // the lbd never exceeds the clause size
                let lbd = compute_lbd(ctx.borrow(), &clause);
                assert!(lbd as usize <= clause.len());

                // after backtracking the asserting literal is free, the rest falsified
                backtrack(ctx.borrow(), backtrack_level);
                assert!(ctx.part(AssignmentP).lit_is_unk(clause[0]));
                for &lit in &clause[1..] {
                    assert!(ctx.part(AssignmentP).lit_is_false(lit));
                }
                return;
            }
        }

        panic!("expected a conflict");
    }
}
