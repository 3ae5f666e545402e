//! The conflict driven clause learning search loop.
use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::analyze_conflict::{analyze_conflict, compute_lbd};
use crate::clause::{db, decay_clause_activities};
use crate::context::{
    AnalyzeConflictP, AssignmentP, ClauseActivityP, ClauseAllocP, ClauseDbP, Context, CpP,
    CpPropagatorsP, DomainsP, ImplGraphP, IntMapP, MinimizeP, PhasesP, ScheduleP, SolverConfigP,
    StatsP, TrailP, VsidsP, WatchlistsP,
};
use crate::decision::choose_decision_lit;
use crate::minimize::minimize_learned_clause;
use crate::prop::{backtrack, enqueue_assignment, propagate, Conflict, Reason};
use crate::schedule::{perform_restart, should_restart};
use crate::solver::Stopwatch;

/// Parts the search loop operates on.
macro_rules! search_parts {
    () => {
        partial!(
            Context,
            mut AnalyzeConflictP,
            mut AssignmentP,
            mut ClauseActivityP,
            mut ClauseAllocP,
            mut ClauseDbP,
            mut CpP,
            mut CpPropagatorsP,
            mut DomainsP,
            mut ImplGraphP,
            mut MinimizeP,
            mut PhasesP,
            mut ScheduleP,
            mut StatsP,
            mut TrailP,
            mut VsidsP,
            mut WatchlistsP,
            IntMapP,
            SolverConfigP,
        )
    };
}

/// How a search run ended.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SearchResult {
    Sat,
    Unsat,
    /// An assumption was found falsified; a core can be extracted from it.
    UnsatUnderAssumptions(Lit),
    Timeout,
}

enum NextDecision {
    Lit { lit: Lit, is_assumption: bool },
    AllAssigned,
    FalsifiedAssumption(Lit),
}

/// Run the CDCL loop until an answer is found or the deadline passes.
///
/// Assumptions are enqueued one per decision level before any activity-driven decision is made.
/// The search leaves the trail at the final state; the caller is responsible for backtracking.
pub fn search(
    mut ctx: search_parts!(),
    assumptions: &[Lit],
    stopwatch: &Stopwatch,
) -> SearchResult {
    loop {
        if !stopwatch.within_limit() {
            return SearchResult::Timeout;
        }

        let trail_len_before = ctx.part(TrailP).len();
        let propagation_result = propagate(ctx.borrow());
        {
            let propagated = ctx.part(TrailP).len() - trail_len_before;
            ctx.part_mut(StatsP).propagations += propagated as u64;
        }

        match propagation_result {
            Err(conflict) => {
                ctx.part_mut(StatsP).conflicts += 1;
                ctx.part_mut(ScheduleP).conflicts_until_restart -= 1;

                if ctx.part(TrailP).current_level() == 0 {
                    return SearchResult::Unsat;
                }

                handle_conflict(ctx.borrow(), conflict);
                decay_clause_activities(ctx.borrow());
            }
            Ok(()) => {
                if should_restart(ctx.borrow()) {
                    perform_restart(ctx.borrow(), assumptions.len());
                }

                ctx.part_mut(TrailP).new_decision_level();

                match next_decision(ctx.borrow(), assumptions) {
                    NextDecision::Lit { lit, is_assumption } => {
                        if !is_assumption {
                            ctx.part_mut(StatsP).decisions += 1;
                        }
                        enqueue_assignment(ctx.borrow(), lit, Reason::Decision);
                    }
                    NextDecision::AllAssigned => return SearchResult::Sat,
                    NextDecision::FalsifiedAssumption(lit) => {
                        return SearchResult::UnsatUnderAssumptions(lit)
                    }
                }
            }
        }
    }
}

/// Analyze the conflict, learn the resulting clause and backtrack.
fn handle_conflict(mut ctx: search_parts!(), conflict: Conflict) {
    analyze_conflict(ctx.borrow(), conflict);

    if ctx.part(SolverConfigP).clause_minimization {
        minimize_learned_clause(ctx.borrow());
    }

    let trail_len = ctx.part(TrailP).len();
    let clause = std::mem::take(&mut ctx.part_mut(AnalyzeConflictP).clause);

    if clause.len() == 1 {
        // learned units go to level 0 as fresh root assignments
        ctx.part_mut(StatsP).learned_units += 1;
        ctx.part_mut(ScheduleP).note_conflict(1, trail_len);

        backtrack(ctx.borrow(), 0);
        enqueue_assignment(ctx.borrow(), clause[0], Reason::Decision);
    } else {
        // the asserting literal at index 0 does not count towards the LBD
        let lbd = compute_lbd(ctx.borrow(), &clause[1..]);
        ctx.part_mut(ScheduleP).note_conflict(lbd, trail_len);

        let backtrack_level = ctx.part(ImplGraphP).level(clause[1].var());
        backtrack(ctx.borrow(), backtrack_level);

        let cref = db::add_learned_clause(ctx.borrow(), &clause, lbd);
        enqueue_assignment(ctx.borrow(), clause[0], Reason::Clause(cref));

        let stats = ctx.part_mut(StatsP);
        stats.learned_clauses += 1;
        stats.learned_literals += clause.len() as u64;
    }

    ctx.part_mut(AnalyzeConflictP).clause = clause;
}

/// The next literal to set: the first unset assumption if any, otherwise the activity heap's
/// pick with its saved phase.
fn next_decision(
    mut ctx: partial!(Context, mut TrailP, mut VsidsP, AssignmentP, PhasesP),
    assumptions: &[Lit],
) -> NextDecision {
    loop {
        let level = ctx.part(TrailP).current_level();
        debug_assert!(level > 0);
        if level > assumptions.len() {
            break;
        }
        let assumption = assumptions[level - 1];
        match ctx.part(AssignmentP).lit_value(assumption) {
            // an implied assumption is skipped by burning its decision level
            Some(true) => ctx.part_mut(TrailP).new_decision_level(),
            Some(false) => return NextDecision::FalsifiedAssumption(assumption),
            None => {
                return NextDecision::Lit {
                    lit: assumption,
                    is_assumption: true,
                }
            }
        }
    }

    match choose_decision_lit(ctx.borrow()) {
        Some(lit) => NextDecision::Lit {
            lit,
            is_assumption: false,
        },
        None => NextDecision::AllAssigned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use proptest::prelude::*;

    use marrow_formula::test::{conditional_pigeon_hole, sat_formula, sgen_unsat_formula};

    use crate::context::set_var_count;
    use crate::load::add_clause;

    fn solve_ctx(ctx: &mut Context, assumptions: &[Lit]) -> SearchResult {
        let mut ctx = ctx.into_partial_ref_mut();
        backtrack(ctx.borrow(), 0);
        search(ctx.borrow(), assumptions, &Stopwatch::unlimited())
    }

    #[test]
    fn level_0_unsat() {
        let mut ctx = Context::default();

        let formula = marrow_formula::cnf_formula![
            1, 2, 3;
            -1;
            1, -2;
            2, -3;
        ];

        {
            let mut ctx = ctx.into_partial_ref_mut();
            set_var_count(ctx.borrow(), formula.var_count());
            for clause in formula.iter() {
                if add_clause(ctx.borrow(), clause).is_err() {
                    return; // proven unsat while loading
                }
            }
        }

        assert_eq!(solve_ctx(&mut ctx, &[]), SearchResult::Unsat);
    }

    proptest! {
        #[test]
        fn sgen_unsat(formula in sgen_unsat_formula(1..7usize)) {
            let mut ctx = Context::default();

            {
                let mut ctx = ctx.into_partial_ref_mut();
                set_var_count(ctx.borrow(), formula.var_count());
                for clause in formula.iter() {
                    if add_clause(ctx.borrow(), clause).is_err() {
                        return Ok(());
                    }
                }
            }

            prop_assert_eq!(solve_ctx(&mut ctx, &[]), SearchResult::Unsat);
        }

        #[test]
        fn sat(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut ctx = Context::default();

            {
                let mut ctx = ctx.into_partial_ref_mut();
                set_var_count(ctx.borrow(), formula.var_count());
                for clause in formula.iter() {
                    add_clause(ctx.borrow(), clause).unwrap();
                }
            }

            prop_assert_eq!(solve_ctx(&mut ctx, &[]), SearchResult::Sat);

            let ctx = ctx.into_partial_ref_mut();
            for clause in formula.iter() {
                prop_assert!(clause.iter().any(|&lit| ctx.part(AssignmentP).lit_is_true(lit)));
            }
        }

        #[test]
        fn pigeon_hole_under_assumptions(
            (enable_row, _columns, formula) in conditional_pigeon_hole(1..5usize, 1..5usize),
        ) {
            let mut ctx = Context::default();

            {
                let mut ctx = ctx.into_partial_ref_mut();
                set_var_count(ctx.borrow(), formula.var_count());
                for clause in formula.iter() {
                    add_clause(ctx.borrow(), clause).unwrap();
                }
            }

            // satisfiable without assumptions
            prop_assert_eq!(solve_ctx(&mut ctx, &[]), SearchResult::Sat);

            // unsat when all rows are enabled
            match solve_ctx(&mut ctx, &enable_row) {
                SearchResult::UnsatUnderAssumptions(falsified) => {
                    let mut ctx = ctx.into_partial_ref_mut();
                    crate::incremental::extract_core(ctx.borrow(), falsified);
                    let core = ctx.part(crate::context::IncrementalP).failed_core();
                    prop_assert!(!core.is_empty());
                    for &lit in core {
                        prop_assert!(enable_row.contains(&!lit));
                    }
                }
                other => prop_assert!(false, "expected an assumption conflict, got {:?}", other),
            }
        }
    }
}
