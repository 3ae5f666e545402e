//! Core-guided lower-bound search.
//!
//! The objective is kept in reformulated shape: per variable a `(residual, full, threshold)`
//! triple meaning values up to the threshold are free, the next unit costs the residual weight
//! and every further unit the full weight. The search assumes every objective variable at its
//! threshold, extracts unsat cores of those optimistic assumptions, and slices the minimum
//! residual weight of each core into the objective constant. Exhausted cores are reformulated
//! through a cardinality encoding whose sum variable re-enters the objective with the core
//! weight. Stratification processes large weights first; hardening turns the shrinking gap
//! between the bounds into tightened domains.
use std::collections::BTreeMap;

use log::info;

use marrow_formula::Lit;

use crate::config::Stratification;
use crate::integer::IntVar;
use crate::solver::{Solver, Stopwatch};
use crate::state::RootConflict;

use super::{
    extend_solution, prune_domains, remove_fixed_terms, simple_lower_bound, IntAssignment,
    LinearFunction, SolutionTracker,
};

/// One reformulated objective term.
///
/// No cost up to `threshold`, `residual` for the next unit, `full` per unit thereafter.
#[derive(Copy, Clone, Debug)]
struct ReformTerm {
    threshold: i64,
    residual: i64,
    full: i64,
}

/// The reformulated objective.
struct Reformulation {
    /// Keyed by integer variable id; ordered for deterministic assumption order.
    terms: BTreeMap<usize, ReformTerm>,
    constant: i64,
    /// Value of the reformulated objective under the incumbent.
    internal_upper_bound: i64,
}

/// Run the lower-bound phase; afterwards `objective` is the reformulated linear objective for
/// the upper-bound phase.
pub fn lower_bound_search(
    solver: &mut Solver,
    objective: &mut LinearFunction,
    tracker: &mut SolutionTracker,
    stopwatch: &Stopwatch,
) -> Result<(), RootConflict> {
    debug_assert!(tracker.has_solution());

    if !stopwatch.within_limit() {
        return Ok(());
    }

    remove_fixed_terms(solver, objective);
    prune_domains(solver, objective, tracker.upper_bound())?;

    let mut reform = Reformulation {
        terms: BTreeMap::new(),
        constant: objective.constant(),
        internal_upper_bound: objective.evaluate(tracker.best_solution()),
    };
    for (var, weight) in objective.terms() {
        debug_assert!(weight > 0);
        let (lower, _) = solver.int_bounds(var);
        reform.terms.insert(
            var.id(),
            ReformTerm {
                threshold: lower,
                residual: weight,
                full: weight,
            },
        );
    }

    if reform.internal_upper_bound == simple_lower_bound(solver, objective) {
        tracker.update_lower_bound(reform.internal_upper_bound);
        return Ok(());
    }

    let mut threshold = initial_weight_threshold(solver, &reform);
    info!("initial stratification threshold: {}", threshold);

    while threshold > 0 {
        core_guided_with_threshold(solver, &mut reform, tracker, stopwatch, threshold)?;
        threshold = next_weight_threshold(solver, &reform, threshold);
        info!("new stratification threshold: {}", threshold);
    }

    *objective = convert_to_linear(solver, &mut reform)?;
    tracker.update_lower_bound(reform.constant);

    Ok(())
}

/// The inner search under one stratification threshold.
fn core_guided_with_threshold(
    solver: &mut Solver,
    reform: &mut Reformulation,
    tracker: &mut SolutionTracker,
    stopwatch: &Stopwatch,
    weight_threshold: i64,
) -> Result<(), RootConflict> {
    debug_assert!(weight_threshold > 0);

    loop {
        if !stopwatch.within_limit()
            || reform.constant == reform.internal_upper_bound
            || tracker.has_optimal()
        {
            return Ok(());
        }

        let mut cores: Vec<Vec<Lit>> = vec![];
        let mut core_weights: Vec<i64> = vec![];
        let mut last_solution: Option<IntAssignment> = None;

        harden(solver, reform)?;
        let mut assumptions = initialise_assumptions(solver, reform, weight_threshold);

        loop {
            let output = solver.solve_raw(&assumptions, stopwatch);

            if !stopwatch.within_limit() {
                // the cores gathered so far still need to be reformulated
                info!("core-guided timeout");
                break;
            }

            if let Some(solution) = output.solution {
                info!("core-guided found a solution");
                tracker.update_best(&solution);
                last_solution = Some(solution);

                harden(solver, reform)?;
                assumptions.clear();
            } else if !output.core.is_empty() {
                let core = output.core;
                info!("core size: {}", core.len());

                let core_weight = min_core_weight(solver, reform, &core);
                slicing_step(solver, reform, &core, core_weight);

                harden(solver, reform)?;
                filter_assumptions(solver, reform, &mut assumptions, &core, weight_threshold);

                cores.push(core);
                core_weights.push(core_weight);
            } else {
                // outright unsatisfiability cannot appear here, the incumbent satisfies the
                // hard constraints
                break;
            }

            let continue_extraction = solver.config().weight_aware_core_extraction
                && !assumptions.is_empty()
                && reform.constant != reform.internal_upper_bound
                && !tracker.has_optimal();
            if !continue_extraction {
                break;
            }
        }

        if cores.is_empty() {
            return Ok(());
        }

        process_cores(solver, reform, &cores, &core_weights)?;

        if let Some(solution) = last_solution {
            // reformulating introduced fresh variables the solution does not cover yet
            if let Some(extended) = extend_solution(solver, &solution, stopwatch) {
                reform.internal_upper_bound = evaluate_reformulated(reform, &extended);
            }
        }
    }
}

/// The optimistic assumption `[x <= threshold]` for every heavy enough term.
fn initialise_assumptions(
    solver: &Solver,
    reform: &Reformulation,
    weight_threshold: i64,
) -> Vec<Lit> {
    reform
        .terms
        .iter()
        .filter(|(_, term)| term.residual >= weight_threshold)
        .map(|(&id, term)| solver.upper_bound_lit(IntVar::from_id(id), term.threshold))
        .collect()
}

/// The smallest residual weight among the core's variables.
fn min_core_weight(solver: &Solver, reform: &Reformulation, core: &[Lit]) -> i64 {
    let mut weight = i64::max_value();
    for &lit in core {
        let info = solver
            .lit_info(lit)
            .expect("core literal without integer meaning");
        let term = &reform.terms[&info.var.id()];
        weight = weight.min(term.residual);
    }
    debug_assert!(weight < i64::max_value());
    weight
}

/// Slice the core weight off every involved term.
///
/// A term whose residual hits zero advances its threshold to the next value whose upper-bound
/// literal is still open and restores the full weight; at the upper bound the term leaves the
/// objective.
fn slicing_step(solver: &Solver, reform: &mut Reformulation, core: &[Lit], core_weight: i64) {
    reform.constant += core_weight;

    for &lit in core {
        let info = solver.lit_info(lit).unwrap();
        let var = info.var;
        let term = reform.terms.get_mut(&var.id()).unwrap();

        debug_assert!(term.residual >= core_weight);
        term.residual -= core_weight;

        if term.residual == 0 {
            let (_, upper) = solver.int_bounds(var);
            loop {
                term.threshold += 1;
                if term.threshold == upper
                    || !solver.lit_is_assigned(solver.upper_bound_lit(var, term.threshold))
                {
                    break;
                }
            }
            if term.threshold == upper {
                reform.terms.remove(&var.id());
            } else {
                term.residual = term.full;
            }
        }
    }
}

/// Drop assumptions that were part of the core, became assigned, or fell out of the stratum.
fn filter_assumptions(
    solver: &Solver,
    reform: &Reformulation,
    assumptions: &mut Vec<Lit>,
    core: &[Lit],
    weight_threshold: i64,
) {
    assumptions.retain(|&assumption| {
        if core.contains(&!assumption) || solver.lit_is_assigned(assumption) {
            return false;
        }
        let info = match solver.lit_info(assumption) {
            Some(info) => info,
            None => return false,
        };
        match reform.terms.get(&info.var.id()) {
            Some(term) => term.residual >= weight_threshold,
            None => false,
        }
    });
}

/// Reformulate each core: encode `violations <= 0` softly, view the violation count as an
/// integer variable and add it to the objective with the core weight.
fn process_cores(
    solver: &mut Solver,
    reform: &mut Reformulation,
    cores: &[Vec<Lit>],
    core_weights: &[i64],
) -> Result<(), RootConflict> {
    for (core, &weight) in cores.iter().zip(core_weights.iter()) {
        let soft_lits = solver.soft_cardinality_less_or_equal(core, 0)?;
        if soft_lits.is_empty() {
            continue;
        }

        let sum_var = solver.new_bounded_sum_var(&soft_lits, 1)?;
        let (lower, upper) = solver.int_bounds(sum_var);

        // slicing already accounted for one violated unit
        reform.constant += (lower - 1) * weight;

        if lower < upper {
            reform.terms.insert(
                sum_var.id(),
                ReformTerm {
                    threshold: lower,
                    residual: weight,
                    full: weight,
                },
            );
        }
    }
    Ok(())
}

/// Value of the reformulated objective under a complete assignment.
fn evaluate_reformulated(reform: &Reformulation, assignment: &IntAssignment) -> i64 {
    let mut cost = reform.constant;
    for (&id, term) in &reform.terms {
        let value = assignment.value(IntVar::from_id(id));
        if value > term.threshold {
            cost += term.residual;
            cost += term.full * (value - term.threshold - 1);
        }
    }
    cost
}

/// Derive tightened upper bounds from the gap between the incumbent and the constant.
///
/// Afterwards terms that became fixed or reached their threshold are folded away.
fn harden(solver: &mut Solver, reform: &mut Reformulation) -> Result<(), RootConflict> {
    let diff = reform.internal_upper_bound - reform.constant;

    let ids: Vec<usize> = reform.terms.keys().cloned().collect();
    for id in ids {
        let var = IntVar::from_id(id);
        let term = reform.terms[&id];
        let (_, upper) = solver.int_bounds(var);

        // values above the threshold pay the residual once and the full weight per further unit
        let mut new_upper = term.threshold;
        if term.residual <= diff {
            new_upper += 1 + (diff - term.residual) / term.full;
            new_upper = new_upper.min(upper);
        }

        if new_upper < upper {
            solver.set_int_upper_bound(var, new_upper)?;
        }
    }

    remove_redundant_terms(solver, reform);
    Ok(())
}

/// Fold fixed terms into the constant and drop terms stuck at their threshold.
fn remove_redundant_terms(solver: &Solver, reform: &mut Reformulation) {
    let ids: Vec<usize> = reform.terms.keys().cloned().collect();
    let mut constant_increase = 0;

    for id in ids {
        let var = IntVar::from_id(id);
        let term = reform.terms[&id];
        let (lower, upper) = solver.int_bounds(var);

        if lower == upper {
            let over = lower - term.threshold;
            if over > 0 {
                constant_increase += term.residual + term.full * (over - 1);
            }
            reform.terms.remove(&id);
        } else if term.threshold == upper {
            reform.terms.remove(&id);
        }
    }

    if constant_increase > 0 {
        info!("hardening fixed terms raised the bound by {}", constant_increase);
    }
    reform.constant += constant_increase;
}

/// Turn the reformulated objective back into a plain linear function over (view) variables.
fn convert_to_linear(
    solver: &mut Solver,
    reform: &mut Reformulation,
) -> Result<LinearFunction, RootConflict> {
    harden(solver, reform)?;

    let mut converted = LinearFunction::new();
    converted.add_constant(reform.constant);

    let entries: Vec<(usize, ReformTerm)> =
        reform.terms.iter().map(|(&id, &term)| (id, term)).collect();

    for (id, term) in entries {
        let var = IntVar::from_id(id);
        let (lower, upper) = solver.int_bounds(var);
        let mut penalty_threshold = term.threshold;
        debug_assert!(lower <= penalty_threshold);

        // a partially sliced weight needs its own 0/1 view
        if term.residual != term.full {
            let ref_lit = solver.lower_bound_lit(var, penalty_threshold + 1);
            let view = solver.new_equivalent_var(ref_lit);
            converted.add_term(view, term.residual);
            penalty_threshold += 1;
        }

        if lower == penalty_threshold {
            converted.add_term(var, term.full);
        } else if upper != penalty_threshold {
            let view = solver.new_threshold_exceeding_var(var, penalty_threshold);
            converted.add_term(view, term.full);
        }
    }

    Ok(converted)
}

fn max_residual(reform: &Reformulation) -> i64 {
    reform
        .terms
        .values()
        .map(|term| term.residual)
        .max()
        .unwrap_or(0)
}

fn initial_weight_threshold(solver: &Solver, reform: &Reformulation) -> i64 {
    match solver.config().stratification {
        Stratification::Off => 1,
        Stratification::Basic => max_residual(reform).max(1),
        Stratification::Ratio => {
            let mut start = 10i64;
            while start <= max_residual(reform) {
                start *= 10;
            }
            next_ratio_threshold(solver, reform, start).max(1)
        }
    }
}

fn next_weight_threshold(solver: &Solver, reform: &Reformulation, current: i64) -> i64 {
    match solver.config().stratification {
        Stratification::Off => 0,
        Stratification::Basic => reform
            .terms
            .values()
            .map(|term| term.residual)
            .filter(|&residual| residual < current)
            .max()
            .unwrap_or(0),
        Stratification::Ratio => next_ratio_threshold(solver, reform, current),
    }
}

/// Divide the threshold by ten until the number of candidate literals grows enough relative to
/// the distinct weights in play.
fn next_ratio_threshold(solver: &Solver, reform: &Reformulation, current: i64) -> i64 {
    if reform.terms.is_empty() || current == 1 {
        return 0;
    }

    let count_lits = |threshold: i64| -> usize {
        reform
            .terms
            .iter()
            .filter(|(_, term)| term.residual >= threshold)
            .map(|(&id, _)| {
                let (lower, upper) = solver.int_bounds(IntVar::from_id(id));
                (upper - lower) as usize
            })
            .sum()
    };

    let total = count_lits(0);
    let old_count = count_lits(current);
    let mut candidate = current;
    loop {
        candidate /= 10;
        let new_count = count_lits(candidate);

        if new_count != old_count {
            let mut weights: Vec<i64> = reform
                .terms
                .values()
                .map(|term| term.residual)
                .filter(|&residual| residual >= candidate)
                .collect();
            weights.sort_unstable();
            weights.dedup();

            if new_count as f64 / weights.len() as f64 >= 1.25 {
                return candidate;
            }
        }

        if candidate <= 1 || new_count == total {
            return candidate.max(0);
        }
    }
}
