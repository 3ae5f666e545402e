//! Optimization of linear objectives over integer variables.
//!
//! The solver minimizes `f(x) = c + sum w_i * x_i` with positive weights. A core-guided
//! lower-bound phase reformulates the objective along unsat cores of optimistic assumptions,
//! then an upper-bound linear search walks the incumbent down over a pseudo-Boolean encoding of
//! the remaining objective. Both phases share the incumbent through a [`SolutionTracker`].
pub mod core_guided;
pub mod linear_search;

use crate::integer::IntVar;
use crate::solver::{OptimizationOutput, Solver, Stopwatch};
use crate::state::RootConflict;

/// A complete assignment of values to the integer variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntAssignment {
    values: Vec<i64>,
}

impl IntAssignment {
    /// Create an assignment covering `count` variables, all zero.
    pub fn new(count: usize) -> IntAssignment {
        IntAssignment {
            values: vec![0; count + 1],
        }
    }

    /// Number of variables covered.
    pub fn int_var_count(&self) -> usize {
        self.values.len().saturating_sub(1)
    }

    /// Whether the assignment covers the variable.
    pub fn covers(&self, var: IntVar) -> bool {
        var.id() < self.values.len()
    }

    pub fn value(&self, var: IntVar) -> i64 {
        self.values[var.id()]
    }

    pub fn set_value(&mut self, var: IntVar, value: i64) {
        self.values[var.id()] = value;
    }
}

/// A linear function `constant + sum weight_i * var_i` in canonical form.
///
/// Terms are kept sorted by variable with merged weights; zero-weight terms are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinearFunction {
    terms: Vec<(IntVar, i64)>,
    constant: i64,
}

impl LinearFunction {
    pub fn new() -> LinearFunction {
        LinearFunction::default()
    }

    /// Add `weight * var` to the function, merging with an existing term.
    pub fn add_term(&mut self, var: IntVar, weight: i64) {
        match self.terms.binary_search_by_key(&var, |&(v, _)| v) {
            Ok(index) => {
                self.terms[index].1 += weight;
                if self.terms[index].1 == 0 {
                    self.terms.remove(index);
                }
            }
            Err(index) => {
                if weight != 0 {
                    self.terms.insert(index, (var, weight));
                }
            }
        }
    }

    /// Drop the term of the given variable, returning its weight.
    pub fn remove_term(&mut self, var: IntVar) -> i64 {
        match self.terms.binary_search_by_key(&var, |&(v, _)| v) {
            Ok(index) => self.terms.remove(index).1,
            Err(_) => 0,
        }
    }

    pub fn add_constant(&mut self, value: i64) {
        self.constant += value;
    }

    pub fn constant(&self) -> i64 {
        self.constant
    }

    pub fn weight(&self, var: IntVar) -> i64 {
        match self.terms.binary_search_by_key(&var, |&(v, _)| v) {
            Ok(index) => self.terms[index].1,
            Err(_) => 0,
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = (IntVar, i64)> + '_ {
        self.terms.iter().cloned()
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn max_weight(&self) -> i64 {
        self.terms.iter().map(|&(_, w)| w).max().unwrap_or(0)
    }

    /// Value of the function under a complete assignment.
    pub fn evaluate(&self, assignment: &IntAssignment) -> i64 {
        let mut value = self.constant;
        for &(var, weight) in &self.terms {
            value += weight * assignment.value(var);
        }
        value
    }
}

/// The best solution found so far and the proven lower bound.
pub struct SolutionTracker {
    objective: LinearFunction,
    best: Option<IntAssignment>,
    best_cost: i64,
    lower_bound: i64,
}

impl SolutionTracker {
    /// Create a tracker for the given objective with no solution yet.
    pub fn new(objective: LinearFunction) -> SolutionTracker {
        SolutionTracker {
            objective,
            best: None,
            best_cost: i64::max_value(),
            lower_bound: i64::min_value(),
        }
    }

    pub fn has_solution(&self) -> bool {
        self.best.is_some()
    }

    pub fn best_solution(&self) -> &IntAssignment {
        self.best.as_ref().expect("no solution tracked")
    }

    /// Cost of the incumbent under the tracked objective.
    pub fn upper_bound(&self) -> i64 {
        self.best_cost
    }

    pub fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    /// Whether the incumbent is provably optimal.
    pub fn has_optimal(&self) -> bool {
        self.best.is_some() && self.best_cost <= self.lower_bound
    }

    /// Raise the proven lower bound.
    pub fn update_lower_bound(&mut self, bound: i64) {
        self.lower_bound = self.lower_bound.max(bound);
    }

    /// Adopt a solution if it improves on the incumbent.
    pub fn update_best(&mut self, solution: &IntAssignment) -> bool {
        let cost = self.objective.evaluate(solution);
        if self.best.is_none() || cost < self.best_cost {
            self.best = Some(solution.clone());
            self.best_cost = cost;
            true
        } else {
            false
        }
    }

    /// Replace the incumbent by an equivalent solution extended to fresh auxiliary variables.
    pub fn adopt_extended(&mut self, solution: IntAssignment) {
        debug_assert_eq!(self.objective.evaluate(&solution), self.best_cost);
        self.best = Some(solution);
    }
}

/// `constant + sum w_i * lb(x_i)`, the trivial lower bound of the objective.
pub fn simple_lower_bound(solver: &Solver, objective: &LinearFunction) -> i64 {
    let mut bound = objective.constant();
    for (var, weight) in objective.terms() {
        let (lower, upper) = solver.int_bounds(var);
        if weight > 0 {
            bound += weight * lower;
        } else {
            bound += weight * upper;
        }
    }
    bound
}

/// Move root-fixed terms of the objective into its constant.
pub fn remove_fixed_terms(solver: &Solver, objective: &mut LinearFunction) {
    let fixed: Vec<(IntVar, i64)> = objective
        .terms()
        .filter(|&(var, _)| solver.is_int_assigned(var))
        .collect();
    for (var, weight) in fixed {
        let (value, _) = solver.int_bounds(var);
        objective.remove_term(var);
        objective.add_constant(weight * value);
    }
}

/// Tighten the domains of the objective variables against a known upper bound.
///
/// With every other variable at its lower bound, `x_i` can use at most the remaining slack, so
/// values above that are removed with root unit clauses.
pub fn prune_domains(
    solver: &mut Solver,
    objective: &LinearFunction,
    upper_bound: i64,
) -> Result<(), RootConflict> {
    let slack = upper_bound - simple_lower_bound(solver, objective);
    if slack < 0 {
        return Ok(());
    }
    for (var, weight) in objective.terms() {
        debug_assert!(weight > 0);
        let (lower, upper) = solver.int_bounds(var);
        let max_value = lower + slack / weight;
        if max_value < upper {
            solver.set_int_upper_bound(var, max_value)?;
        }
    }
    Ok(())
}

/// Re-solve with the incumbent pinned to give fresh auxiliary variables consistent values.
///
/// Returns `None` when the deadline does not even allow that solve.
pub fn extend_solution(
    solver: &mut Solver,
    reference: &IntAssignment,
    stopwatch: &Stopwatch,
) -> Option<IntAssignment> {
    let mut assumptions = vec![];
    for id in 1..=reference.int_var_count() {
        let var = IntVar::from_id(id);
        let value = reference.value(var);
        assumptions.push(solver.lower_bound_lit(var, value));
        assumptions.push(solver.upper_bound_lit(var, value));
    }
    let output = solver.solve_raw(&assumptions, stopwatch);
    output.solution
}

/// Minimize the objective: an initial solve, the core-guided lower-bound phase and the linear
/// upper-bound phase, all sharing one deadline.
///
/// All objective-derived constraints (hardening units, bound encodings, core reformulations)
/// are rewound afterwards, so the solver remains usable for further solve or minimize calls.
/// Bound propagators registered in the `ub-propagator` mode are the exception; registration is
/// permanent.
pub fn minimize(
    solver: &mut Solver,
    objective: &LinearFunction,
    stopwatch: &Stopwatch,
) -> OptimizationOutput {
    for (_, weight) in objective.terms() {
        assert!(weight > 0, "objective weights must be positive");
    }

    // an unsatisfiable store stays unsatisfiable; resetting must not forget that
    if solver.is_unsat() {
        return OptimizationOutput {
            runtime: stopwatch.elapsed(),
            timeout: false,
            solution: None,
            objective_value: -1,
            proven_optimal: false,
        };
    }

    solver.save_state_point();
    let output = minimize_inner(solver, objective, stopwatch);
    solver.reset_to_state_point();
    solver.drop_state_point();
    output
}

fn minimize_inner(
    solver: &mut Solver,
    objective: &LinearFunction,
    stopwatch: &Stopwatch,
) -> OptimizationOutput {
    let initial = solver.solve_raw(&[], stopwatch);

    let solution = match initial.solution {
        Some(solution) => solution,
        None => {
            // infeasible or out of time before any solution
            return OptimizationOutput {
                runtime: stopwatch.elapsed(),
                timeout: initial.timeout,
                solution: None,
                objective_value: -1,
                proven_optimal: false,
            };
        }
    };

    let mut tracker = SolutionTracker::new(objective.clone());
    tracker.update_best(&solution);

    let mut working = objective.clone();

    // the propagator-enforced bound must watch the original objective variables, which rules
    // out the view variables a core-guided reformulation would introduce
    if !solver.config().ub_propagator {
        let lower_result =
            core_guided::lower_bound_search(solver, &mut working, &mut tracker, stopwatch);
        if lower_result.is_err() {
            // strengthening the bounds closed the gap; nothing better than the incumbent exists
            let upper = tracker.upper_bound();
            tracker.update_lower_bound(upper);
        }
    }

    if !tracker.has_optimal() {
        let upper_result =
            linear_search::upper_bound_search(solver, &mut working, &mut tracker, stopwatch);
        if upper_result.is_err() {
            let upper = tracker.upper_bound();
            tracker.update_lower_bound(upper);
        }
    }

    OptimizationOutput {
        runtime: stopwatch.elapsed(),
        timeout: !stopwatch.within_limit(),
        objective_value: tracker.upper_bound(),
        proven_optimal: tracker.has_optimal(),
        solution: Some(tracker.best_solution().clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{CardinalityEncoding, Stratification, ValueSelection, VaryingResolution};
    use crate::config::SolverConfig;
    use crate::cp::{CumulativePropagator, CumulativeTask};

    fn all_configs() -> Vec<SolverConfig> {
        let mut configs = vec![SolverConfig::default()];

        let mut stratified = SolverConfig::default();
        stratified.stratification = Stratification::Ratio;
        configs.push(stratified);

        let mut plain = SolverConfig::default();
        plain.stratification = Stratification::Off;
        plain.weight_aware_core_extraction = false;
        plain.value_selection = ValueSelection::PhaseSaving;
        configs.push(plain);

        let mut varying = SolverConfig::default();
        varying.varying_resolution = VaryingResolution::Ratio;
        varying.value_selection = ValueSelection::Optimistic;
        configs.push(varying);

        let mut networks = SolverConfig::default();
        networks.cardinality_encoding = CardinalityEncoding::CardinalityNetwork;
        configs.push(networks);

        configs
    }

    #[test]
    fn minimize_single_variable_with_bound() {
        for config in all_configs() {
            let mut solver = Solver::with_config(config);

            let v = solver.new_int_var(0, 3).unwrap();
            let at_least_two = solver.lower_bound_lit(v, 2);
            solver.add_clause(&[at_least_two]).unwrap();

            let mut objective = LinearFunction::new();
            objective.add_term(v, 1);

            let output = solver.minimize(&objective, None);
            assert!(output.proven_optimal);
            assert_eq!(output.objective_value, 2);
            assert_eq!(output.solution.unwrap().value(v), 2);
        }
    }

    #[test]
    fn minimize_weighted_cover_of_single_clause() {
        for config in all_configs() {
            let mut solver = Solver::with_config(config);

            let a = solver.new_int_var(0, 1).unwrap();
            let b = solver.new_int_var(0, 1).unwrap();
            let c = solver.new_int_var(0, 1).unwrap();

            let clause = [
                solver.eq_lit(a, 1),
                solver.eq_lit(b, 1),
                solver.eq_lit(c, 1),
            ];
            solver.add_clause(&clause).unwrap();

            let mut objective = LinearFunction::new();
            objective.add_term(a, 3);
            objective.add_term(b, 2);
            objective.add_term(c, 2);

            let output = solver.minimize(&objective, None);
            assert!(output.proven_optimal);
            assert_eq!(output.objective_value, 2);

            let solution = output.solution.unwrap();
            assert_eq!(solution.value(a), 0);
            assert_eq!(solution.value(b) + solution.value(c), 1);
        }
    }

    #[test]
    fn minimize_weighted_triangle_cover() {
        // vertex cover of a triangle: two of the three variables must be set, the cheapest
        // pair costs 3 + 3
        for config in all_configs() {
            let mut solver = Solver::with_config(config);

            let x1 = solver.new_int_var(0, 1).unwrap();
            let x2 = solver.new_int_var(0, 1).unwrap();
            let x3 = solver.new_int_var(0, 1).unwrap();

            let lit = |solver: &Solver, var| solver.eq_lit(var, 1);
            solver.add_clause(&[lit(&solver, x1), lit(&solver, x2)]).unwrap();
            solver.add_clause(&[lit(&solver, x1), lit(&solver, x3)]).unwrap();
            solver.add_clause(&[lit(&solver, x2), lit(&solver, x3)]).unwrap();

            let mut objective = LinearFunction::new();
            objective.add_term(x1, 5);
            objective.add_term(x2, 3);
            objective.add_term(x3, 3);

            let output = solver.minimize(&objective, None);
            assert!(output.proven_optimal);
            assert_eq!(output.objective_value, 6);

            let solution = output.solution.unwrap();
            assert_eq!(solution.value(x1), 0);
            assert_eq!(solution.value(x2), 1);
            assert_eq!(solution.value(x3), 1);
        }
    }

    #[test]
    fn minimize_is_repeatable() {
        let mut solver = Solver::new();

        let v = solver.new_int_var(0, 3).unwrap();
        let bound = solver.lower_bound_lit(v, 2);
        solver.add_clause(&[bound]).unwrap();

        let mut objective = LinearFunction::new();
        objective.add_term(v, 1);

        let first = solver.minimize(&objective, None);
        let second = solver.minimize(&objective, None);
        assert_eq!(first.objective_value, second.objective_value);
        assert!(second.proven_optimal);
    }

    #[test]
    fn unsat_instances_report_no_solution() {
        let mut solver = Solver::new();

        let v = solver.new_int_var(0, 2).unwrap();
        let ge2 = solver.lower_bound_lit(v, 2);
        let le1 = solver.upper_bound_lit(v, 1);
        solver.add_clause(&[ge2]).unwrap();
        assert!(solver.add_clause(&[le1]).is_err());

        let mut objective = LinearFunction::new();
        objective.add_term(v, 1);

        let output = solver.minimize(&objective, None);
        assert!(output.solution.is_none());
        assert!(!output.timeout);
    }

    #[test]
    fn cumulative_schedule_is_feasible() {
        // three unit-demand tasks of length two on a unary resource need a makespan of six
        let mut solver = Solver::new();

        let horizon = 6i64;
        let duration = 2i64;
        let starts: Vec<_> = (0..3)
            .map(|_| solver.new_int_var(0, horizon - duration).unwrap())
            .collect();

        let tasks = starts
            .iter()
            .map(|&start_time| CumulativeTask {
                start_time,
                duration,
                resource_usage: 1,
            })
            .collect();
        solver
            .register_propagator(Box::new(CumulativePropagator::new(tasks, 1, horizon)))
            .unwrap();

        let output = solver.solve();
        let solution = output.solution.expect("schedule must exist");

        let mut values: Vec<i64> = starts.iter().map(|&var| solution.value(var)).collect();
        values.sort_unstable();
        // no two tasks overlap, so the resource profile never exceeds the capacity
        for pair in values.windows(2) {
            assert!(pair[1] - pair[0] >= duration, "overlap in {:?}", values);
        }
    }

    #[test]
    fn cumulative_minimize_makespan() {
        let mut solver = Solver::new();

        let horizon = 8i64;
        let duration = 2i64;
        let starts: Vec<_> = (0..3)
            .map(|_| solver.new_int_var(0, horizon - duration).unwrap())
            .collect();

        let tasks = starts
            .iter()
            .map(|&start_time| CumulativeTask {
                start_time,
                duration,
                resource_usage: 1,
            })
            .collect();
        solver
            .register_propagator(Box::new(CumulativePropagator::new(tasks, 1, horizon)))
            .unwrap();

        // minimizing the sum of start times packs the schedule to the left
        let mut objective = LinearFunction::new();
        for &start in starts.iter() {
            objective.add_term(start, 1);
        }

        let output = solver.minimize(&objective, None);
        assert!(output.proven_optimal);
        assert_eq!(output.objective_value, 0 + 2 + 4);
    }

    #[test]
    fn linear_inequality_propagator_bounds() {
        use crate::cp::LinearInequalityPropagator;

        let mut solver = Solver::new();

        let x = solver.new_int_var(0, 4).unwrap();
        let y = solver.new_int_var(0, 4).unwrap();

        // x + y >= 6 forces both variables to at least 2
        let propagator = LinearInequalityPropagator::new(&[x, y], &[1, 1], 6);
        solver.register_propagator(Box::new(propagator)).unwrap();

        assert_eq!(solver.int_bounds(x).0, 2);
        assert_eq!(solver.int_bounds(y).0, 2);

        let output = solver.solve();
        let solution = output.solution.unwrap();
        assert!(solution.value(x) + solution.value(y) >= 6);
    }
}
