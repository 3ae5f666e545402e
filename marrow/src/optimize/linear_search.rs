//! Upper-bound linear search.
//!
//! Encodes `f(x) <= UB - 1` with the generalized totalizer (or a linear propagator), solves,
//! and on every improving solution strengthens the bound by forcing the totalizer outputs above
//! the new gap to false. Varying resolution wraps this loop: the objective weights are divided
//! by a shrinking coefficient, and the solver state is rewound to a saved checkpoint between
//! rounds so each round starts from the original constraint store.
use log::info;

use marrow_formula::Lit;

use crate::config::{ValueSelection, VaryingResolution};
use crate::cp::LinearInequalityPropagator;
use crate::integer::{DomainOp, IntVar};
use crate::pb::WeightedLit;
use crate::solver::{Solver, Stopwatch};
use crate::state::RootConflict;

use super::{
    extend_solution, prune_domains, remove_fixed_terms, simple_lower_bound, IntAssignment,
    LinearFunction, SolutionTracker,
};

/// Run the upper-bound phase on the given objective.
pub fn upper_bound_search(
    solver: &mut Solver,
    objective: &mut LinearFunction,
    tracker: &mut SolutionTracker,
    stopwatch: &Stopwatch,
) -> Result<(), RootConflict> {
    debug_assert!(tracker.has_solution());

    // give fresh auxiliary variables from the lower-bound phase consistent values
    if solver.int_var_count() > tracker.best_solution().int_var_count() {
        match extend_solution(solver, &tracker.best_solution().clone(), stopwatch) {
            Some(extended) => tracker.adopt_extended(extended),
            None => return Ok(()),
        }
    }

    remove_fixed_terms(solver, objective);

    if objective.evaluate(tracker.best_solution()) == simple_lower_bound(solver, objective) {
        tracker.update_lower_bound(tracker.upper_bound());
        return Ok(());
    }

    if !stopwatch.within_limit() {
        return Ok(());
    }

    solver.save_state_point();
    let result = resolution_rounds(solver, objective, tracker, stopwatch);
    solver.drop_state_point();
    solver.unfreeze_phases();
    result
}

/// The varying-resolution loop around the inner linear search.
fn resolution_rounds(
    solver: &mut Solver,
    objective: &mut LinearFunction,
    tracker: &mut SolutionTracker,
    stopwatch: &Stopwatch,
) -> Result<(), RootConflict> {
    // a propagator-enforced bound cannot be rewound between rounds, so it implies a single
    // exact round
    let mut division_coefficient = if solver.config().ub_propagator {
        1
    } else {
        initial_division_coefficient(solver, objective)
    };
    while division_coefficient > 0 && stopwatch.within_limit() {
        info!("division coefficient: {}", division_coefficient);

        solver.reset_to_state_point();

        let mut round_objective =
            varying_resolution_objective(solver, objective, division_coefficient);
        if round_objective.num_terms() > 0 {
            linear_search(
                solver,
                &mut round_objective,
                tracker,
                stopwatch,
                division_coefficient == 1,
            )?;
        }

        if tracker.has_optimal() {
            break;
        }

        division_coefficient = if solver.config().ub_propagator {
            0
        } else {
            next_division_coefficient(solver, objective, division_coefficient)
        };
    }

    Ok(())
}

/// The inner search for one resolution round.
///
/// `exact` marks the round that solves the true objective; only its infeasibility result proves
/// the incumbent optimal.
fn linear_search(
    solver: &mut Solver,
    objective: &mut LinearFunction,
    tracker: &mut SolutionTracker,
    stopwatch: &Stopwatch,
    exact: bool,
) -> Result<(), RootConflict> {
    if !stopwatch.within_limit() {
        return Ok(());
    }

    // the incumbent may miss auxiliary variables of encodings from earlier rounds
    let incumbent = match extend_solution(solver, &tracker.best_solution().clone(), stopwatch) {
        Some(extended) => extended,
        None => return Ok(()),
    };
    tracker.adopt_extended(incumbent.clone());

    let mut internal_upper_bound = objective.evaluate(&incumbent);

    remove_fixed_terms(solver, objective);
    prune_domains(solver, objective, internal_upper_bound)?;

    let internal_lower_bound = simple_lower_bound(solver, objective);
    if internal_upper_bound == internal_lower_bound {
        if exact {
            tracker.update_lower_bound(tracker.upper_bound());
        }
        return Ok(());
    }

    let fixed_cost = fixed_cost(solver, objective);
    let sum_lits = encode_initial_upper_bound(solver, objective, internal_upper_bound - 1)?;

    set_phases_for_solution(solver, objective, &incumbent);

    while stopwatch.within_limit()
        && internal_upper_bound > internal_lower_bound
        && !tracker.has_optimal()
    {
        let output = solver.solve_raw(&[], stopwatch);

        if let Some(solution) = output.solution {
            let new_upper_bound = objective.evaluate(&solution);
            debug_assert!(new_upper_bound < internal_upper_bound);
            internal_upper_bound = new_upper_bound;

            tracker.update_best(&solution);
            set_phases_for_solution(solver, objective, &solution);

            let bound_on_free_terms = new_upper_bound - fixed_cost - 1;
            if bound_on_free_terms < 0 {
                if exact {
                    tracker.update_lower_bound(tracker.upper_bound());
                }
                break;
            }
            let strengthened = if solver.config().ub_propagator {
                // a fresh, tighter propagator; the weaker ones it shadows stay registered
                register_bound_propagator(solver, objective, new_upper_bound - 1)
            } else {
                strengthen_upper_bound(solver, &sum_lits, bound_on_free_terms as u64)
            };
            if strengthened.is_err() {
                // no assignment fits below the bound anymore
                if exact {
                    tracker.update_lower_bound(tracker.upper_bound());
                }
                break;
            }
        } else if output.proven_infeasible() {
            if exact {
                tracker.update_lower_bound(tracker.upper_bound());
            }
            break;
        } else {
            break;
        }
    }

    Ok(())
}

/// `constant + sum w_i * lb(x_i)`, the part of the objective no assignment can avoid.
fn fixed_cost(solver: &Solver, objective: &LinearFunction) -> i64 {
    let mut cost = objective.constant();
    for (var, weight) in objective.terms() {
        let (lower, _) = solver.int_bounds(var);
        cost += weight * lower;
    }
    cost
}

/// Encode `objective <= upper_bound` and return the weighted output literals used for
/// strengthening.
fn encode_initial_upper_bound(
    solver: &mut Solver,
    objective: &LinearFunction,
    upper_bound: i64,
) -> Result<Vec<WeightedLit>, RootConflict> {
    let fixed = fixed_cost(solver, objective);
    debug_assert!(upper_bound >= fixed);

    if solver.config().ub_propagator {
        info!("using a propagator for the upper bound constraint");
        register_bound_propagator(solver, objective, upper_bound)?;
        return Ok(vec![]);
    }

    let free_terms: Vec<(IntVar, i64)> = objective
        .terms()
        .filter(|&(var, _)| !solver.is_int_assigned(var))
        .collect();

    // a single free integer needs no totalizer, its own order literals express the bound
    if let [(var, weight)] = free_terms[..] {
        let (lower, upper) = solver.int_bounds(var);
        let var_bound = lower + (upper_bound - fixed) / weight;
        if var_bound < upper {
            solver.set_int_upper_bound(var, var_bound)?;
        }
        let mut outputs = vec![];
        for value in lower + 1..=var_bound.min(upper) {
            outputs.push(WeightedLit::new(
                solver.lower_bound_lit(var, value),
                (weight * (value - lower)) as u64,
            ));
        }
        return Ok(outputs);
    }

    let mut weighted_lits = vec![];
    for (var, weight) in objective.terms() {
        let (lower, upper) = solver.int_bounds(var);
        for value in lower + 1..=upper {
            weighted_lits.push(WeightedLit::new(
                solver.lower_bound_lit(var, value),
                weight as u64,
            ));
        }
    }

    solver.hard_pb_less_or_equal(&weighted_lits, (upper_bound - fixed) as u64)
}

/// Enforce `objective <= upper_bound` with a linear inequality propagator.
///
/// `sum w_i x_i <= ub` is posted as `sum -w_i x_i >= -ub`.
fn register_bound_propagator(
    solver: &mut Solver,
    objective: &LinearFunction,
    upper_bound: i64,
) -> Result<(), RootConflict> {
    let variables: Vec<IntVar> = objective.terms().map(|(var, _)| var).collect();
    let coefficients: Vec<i64> = objective.terms().map(|(_, weight)| -weight).collect();
    let rhs = -(upper_bound - objective.constant());
    let propagator = LinearInequalityPropagator::new(&variables, &coefficients, rhs);
    solver.register_propagator(Box::new(propagator))?;
    Ok(())
}

/// Force every output literal whose weight exceeds the new bound to false.
fn strengthen_upper_bound(
    solver: &mut Solver,
    sum_lits: &[WeightedLit],
    upper_bound: u64,
) -> Result<(), RootConflict> {
    for pair in sum_lits.iter().rev() {
        if pair.weight > upper_bound {
            solver.add_clause(&[!pair.lit])?;
        }
    }
    Ok(())
}

/// Apply the configured value-selection policy for the given incumbent.
fn set_phases_for_solution(
    solver: &mut Solver,
    objective: &LinearFunction,
    solution: &IntAssignment,
) {
    let strategy = solver.config().value_selection;

    match strategy {
        ValueSelection::PhaseSaving => {}
        ValueSelection::SolutionGuidedSearch => {
            let phases = boolean_phases(solver, solution, false);
            solver.apply_phase_values(&phases);
        }
        ValueSelection::Optimistic | ValueSelection::OptimisticAux => {
            // freeze towards the incumbent but keep the objective at its lower bounds
            let mut modified = solution.clone();
            for (var, _) in objective.terms() {
                let (lower, _) = solver.int_bounds(var);
                modified.set_value(var, lower);
            }
            let force_aux_false = strategy == ValueSelection::OptimisticAux;
            let phases = boolean_phases(solver, &modified, force_aux_false);
            solver.apply_phase_values(&phases);
        }
    }
}

/// Convert an integer solution into per-Boolean phases.
///
/// Booleans encoding integer variables the solution does not cover are auxiliary; they are
/// forced false when requested and skipped otherwise, like Booleans without integer meaning.
fn boolean_phases(
    solver: &Solver,
    solution: &IntAssignment,
    force_aux_false: bool,
) -> Vec<Option<bool>> {
    let mut phases = vec![None; solver.var_count()];
    for index in 0..solver.var_count() {
        let lit = Lit::from_index(index, true);
        if let Some(info) = solver.lit_info(lit) {
            if info.var.id() <= solution.int_var_count() {
                let value = solution.value(info.var);
                let satisfied = match info.op {
                    DomainOp::Equal => value == info.rhs,
                    DomainOp::NotEqual => value != info.rhs,
                    DomainOp::GreaterEqual => value >= info.rhs,
                    DomainOp::LessEqual => value <= info.rhs,
                };
                phases[index] = Some(satisfied);
            } else if force_aux_false {
                phases[index] = Some(false);
            }
        }
    }
    phases
}

fn initial_division_coefficient(solver: &Solver, objective: &LinearFunction) -> i64 {
    match solver.config().varying_resolution {
        VaryingResolution::Off => 1,
        VaryingResolution::Basic => objective.max_weight().max(1),
        VaryingResolution::Ratio => {
            let mut coefficient = 10i64;
            while coefficient <= objective.max_weight() {
                coefficient *= 10;
            }
            coefficient *= 10;
            next_ratio_coefficient(solver, objective, coefficient).max(1)
        }
    }
}

fn next_division_coefficient(
    solver: &Solver,
    objective: &LinearFunction,
    current: i64,
) -> i64 {
    let next = match solver.config().varying_resolution {
        VaryingResolution::Off => 0,
        VaryingResolution::Basic => objective
            .terms()
            .map(|(_, weight)| weight)
            .filter(|&weight| weight < current)
            .max()
            .unwrap_or(0),
        VaryingResolution::Ratio => next_ratio_coefficient(solver, objective, current),
    };
    // the last round must solve the exact objective
    if next == 0 && current != 1 && solver.config().varying_resolution != VaryingResolution::Off {
        1
    } else {
        next
    }
}

/// Divide the coefficient by ten until enough new literals enter the scaled objective relative
/// to the number of distinct weights in play.
fn next_ratio_coefficient(solver: &Solver, objective: &LinearFunction, current: i64) -> i64 {
    if objective.num_terms() == 0 || current == 1 {
        return 0;
    }

    let count_lits = |threshold: i64| -> usize {
        objective
            .terms()
            .filter(|&(_, weight)| weight >= threshold)
            .map(|(var, _)| {
                let (lower, upper) = solver.int_bounds(var);
                (upper - lower) as usize
            })
            .sum()
    };

    let total = count_lits(0);
    let mut candidate = current;
    let old_count = count_lits(current);
    loop {
        candidate /= 10;
        let new_count = count_lits(candidate);

        if new_count != old_count {
            let mut weights: Vec<i64> = objective
                .terms()
                .map(|(_, weight)| weight)
                .filter(|&weight| weight >= candidate)
                .collect();
            weights.sort_unstable();
            weights.dedup();

            if new_count as f64 / weights.len() as f64 >= 1.25 {
                return candidate;
            }
        }

        if candidate < 10 || new_count == total {
            return candidate.max(0);
        }
    }
}

/// The objective with every weight divided by the coefficient, dropping vanished and fixed
/// terms.
fn varying_resolution_objective(
    solver: &Solver,
    objective: &LinearFunction,
    division_coefficient: i64,
) -> LinearFunction {
    let mut scaled = LinearFunction::new();
    for (var, weight) in objective.terms() {
        debug_assert!(weight > 0);
        let new_weight = weight / division_coefficient;
        if new_weight > 0 && !solver.is_int_assigned(var) {
            scaled.add_term(var, new_weight);
        }
    }
    scaled
}
