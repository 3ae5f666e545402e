//! The solver facade.
use std::io;
use std::time::{Duration, Instant};

use anyhow::Error;
use partial_ref::{IntoPartialRefMut, PartialRef};

use marrow_dimacs::DimacsParser;
use marrow_formula::{CnfFormula, Lit};

use crate::cdcl::{search, SearchResult};
use crate::clause::reduce;
use crate::config::SolverConfig;
use crate::context::{
    config_changed, set_var_count, AssignmentP, ClauseAllocP, ClauseDbP, Context, CpP,
    IncrementalP, SolverStateP, StatsP, TrailP, VsidsP,
};
use crate::cp::{self, Propagator, PropagatorId};
use crate::incremental::extract_core;
use crate::integer::encoding;
use crate::integer::{IntVar, LitInfo};
use crate::load;
use crate::optimize::{self, IntAssignment, LinearFunction};
use crate::prop::backtrack;
use crate::state::{SatState, StatePoint};
use crate::stats::Stats;

pub use crate::state::RootConflict;

/// Wall-clock deadline checked between conflicts and optimization iterations.
pub struct Stopwatch {
    start: Instant,
    limit: Option<Duration>,
}

impl Stopwatch {
    /// Start a stopwatch with an optional time limit.
    pub fn new(limit: Option<Duration>) -> Stopwatch {
        Stopwatch {
            start: Instant::now(),
            limit,
        }
    }

    /// A stopwatch that never runs out.
    pub fn unlimited() -> Stopwatch {
        Stopwatch::new(None)
    }

    /// Time since the stopwatch was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the deadline has not passed yet.
    pub fn within_limit(&self) -> bool {
        match self.limit {
            None => true,
            Some(limit) => self.start.elapsed() < limit,
        }
    }
}

/// Result of a [`Solver::solve`] call.
///
/// `cost` is 0 when a solution was found and -1 otherwise. The solution is present exactly when
/// the formula was satisfied; the core is nonempty exactly when the assumptions were proven
/// jointly infeasible.
#[derive(Clone, Debug)]
pub struct SolverOutput {
    pub runtime: Duration,
    pub timeout: bool,
    pub solution: Option<IntAssignment>,
    pub cost: i64,
    pub core: Vec<Lit>,
}

impl SolverOutput {
    pub fn has_solution(&self) -> bool {
        self.solution.is_some()
    }

    /// Unsatisfiability was proven, either outright or under the given assumptions.
    pub fn proven_infeasible(&self) -> bool {
        !self.timeout && self.solution.is_none()
    }
}

/// Result of a [`Solver::minimize`] call.
#[derive(Clone, Debug)]
pub struct OptimizationOutput {
    pub runtime: Duration,
    pub timeout: bool,
    pub solution: Option<IntAssignment>,
    pub objective_value: i64,
    pub proven_optimal: bool,
}

/// A CDCL solver over Boolean and unary-encoded integer variables.
///
/// Boolean variable 0 is reserved to back the constant true and false literals; variables read
/// from DIMACS input are shifted up by one to make room for it.
pub struct Solver {
    ctx: Box<Context>,
    last_model: Option<Vec<bool>>,
}

impl Default for Solver {
    fn default() -> Solver {
        Solver::new()
    }
}

impl Solver {
    /// Create a solver with the default configuration.
    pub fn new() -> Solver {
        Solver::with_config(SolverConfig::default())
    }

    /// Create a solver with the given configuration.
    pub fn with_config(config: SolverConfig) -> Solver {
        let mut ctx = Box::<Context>::default();
        ctx.solver_config = config;
        {
            let mut ctx = ctx.into_partial_ref_mut();
            config_changed(ctx.borrow());
            encoding::init_constants(ctx.borrow());
        }
        Solver {
            ctx,
            last_model: None,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.ctx.solver_config
    }

    /// The literal that is true in every assignment.
    pub fn true_lit(&self) -> Lit {
        self.ctx.int_map.true_lit()
    }

    /// The literal that is false in every assignment.
    pub fn false_lit(&self) -> Lit {
        self.ctx.int_map.false_lit()
    }

    /// Counters accumulated by the search.
    pub fn stats(&self) -> Stats {
        self.ctx.stats
    }

    /// Translate a literal of the 1-based external numbering into the internal one.
    ///
    /// Internal variable 0 is the reserved constant, so external variables are shifted up.
    pub fn external_lit(&self, lit: Lit) -> Lit {
        Lit::from_index(lit.index() + 1, lit.is_positive())
    }

    /// Make sure the given number of external variables exists.
    pub fn ensure_external_var_count(&mut self, count: usize) {
        let needed = count + 1;
        if needed > self.ctx.assignment.var_count() {
            let mut ctx = self.ctx.into_partial_ref_mut();
            set_var_count(ctx.borrow(), needed);
        }
    }

    /// Add a clause over internal literals.
    ///
    /// An `Err` means unit propagation at the root proved the formula unsatisfiable.
    pub fn add_clause(&mut self, lits: &[Lit]) -> Result<(), RootConflict> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        load::add_clause(ctx.borrow(), lits)
    }

    /// Add a formula over external literals.
    pub fn add_formula(&mut self, formula: &CnfFormula) {
        self.ensure_external_var_count(formula.var_count());
        let mut buffer = vec![];
        for clause in formula.iter() {
            buffer.clear();
            buffer.extend(clause.iter().map(|&lit| self.external_lit(lit)));
            let mut ctx = self.ctx.into_partial_ref_mut();
            // a root conflict is remembered in the state; keep loading the rest
            let _ = load::add_clause(ctx.borrow(), &buffer);
        }
    }

    /// Reads and adds a formula in DIMACS CNF format.
    pub fn add_dimacs_cnf(&mut self, input: impl io::Read) -> Result<(), Error> {
        let parser = DimacsParser::parse_incremental(input, |parser| {
            self.add_formula(&parser.take_formula());
            Ok(())
        })?;

        log::info!(
            "parsed formula with {} variables and {} clauses",
            parser.var_count(),
            parser.clause_count()
        );

        Ok(())
    }

    /// Create an integer variable with domain `[lower_bound, upper_bound]`.
    pub fn new_int_var(
        &mut self,
        lower_bound: i64,
        upper_bound: i64,
    ) -> Result<IntVar, RootConflict> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        encoding::create_integer_variable(ctx.borrow(), lower_bound, upper_bound)
    }

    /// View a chain of indicator literals as an integer variable; see
    /// [`encoding::create_bounded_sum_variable`].
    pub fn new_bounded_sum_var(
        &mut self,
        lits: &[Lit],
        sum_lower_bound: i64,
    ) -> Result<IntVar, RootConflict> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        encoding::create_bounded_sum_variable(ctx.borrow(), lits, sum_lower_bound)
    }

    /// Create a 0/1 view variable equal to the given literal.
    pub fn new_equivalent_var(&mut self, lit: Lit) -> IntVar {
        let mut ctx = self.ctx.into_partial_ref_mut();
        encoding::create_equivalent_variable(ctx.borrow(), lit)
    }

    /// Create a view variable equal to `max(0, var - threshold)`.
    pub fn new_threshold_exceeding_var(&mut self, var: IntVar, threshold: i64) -> IntVar {
        let mut ctx = self.ctx.into_partial_ref_mut();
        encoding::create_threshold_exceeding_variable(ctx.borrow(), var, threshold)
    }

    /// Add the constraint `x + y == rhs`.
    pub fn add_simple_sum_constraint(
        &mut self,
        x: IntVar,
        y: IntVar,
        rhs: i64,
    ) -> Result<(), RootConflict> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        encoding::add_simple_sum_constraint(ctx.borrow(), x, y, rhs)
    }

    /// Number of integer variables, including views.
    pub fn int_var_count(&self) -> usize {
        self.ctx.int_map.int_var_count()
    }

    /// The literal `[var >= rhs]`.
    pub fn lower_bound_lit(&self, var: IntVar, rhs: i64) -> Lit {
        self.ctx.int_map.lower_bound_lit(var, rhs)
    }

    /// The literal `[var <= rhs]`.
    pub fn upper_bound_lit(&self, var: IntVar, rhs: i64) -> Lit {
        self.ctx.int_map.upper_bound_lit(var, rhs)
    }

    /// The literal `[var == rhs]`.
    pub fn eq_lit(&self, var: IntVar, rhs: i64) -> Lit {
        self.ctx.int_map.eq_lit(var, rhs)
    }

    /// The literal `[var != rhs]`.
    pub fn neq_lit(&self, var: IntVar, rhs: i64) -> Lit {
        self.ctx.int_map.neq_lit(var, rhs)
    }

    /// Tighten the upper bound of an integer variable with a root unit clause.
    pub fn set_int_upper_bound(&mut self, var: IntVar, bound: i64) -> Result<(), RootConflict> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        encoding::set_upper_bound(ctx.borrow(), var, bound)
    }

    /// Current root bounds of an integer variable, read off its order literals.
    pub fn int_bounds(&self, var: IntVar) -> (i64, i64) {
        let int_map = &self.ctx.int_map;
        let assignment = &self.ctx.assignment;
        let encoded_upper = int_map.encoded_upper_bound(var);

        let mut lower = 0;
        while lower < encoded_upper
            && assignment.lit_is_true(int_map.lower_bound_lit(var, lower + 1))
        {
            lower += 1;
        }
        let mut upper = encoded_upper;
        while upper > lower && assignment.lit_is_false(int_map.lower_bound_lit(var, upper)) {
            upper -= 1;
        }
        (lower, upper)
    }

    /// Whether the variable is pinned to a single value at the root.
    pub fn is_int_assigned(&self, var: IntVar) -> bool {
        let (lower, upper) = self.int_bounds(var);
        lower == upper
    }

    pub(crate) fn lit_info(&self, lit: Lit) -> Option<LitInfo> {
        self.ctx.int_map.lit_info(lit)
    }

    pub(crate) fn var_count(&self) -> usize {
        self.ctx.assignment.var_count()
    }

    pub(crate) fn lit_is_assigned(&self, lit: Lit) -> bool {
        !self.ctx.assignment.lit_is_unk(lit)
    }

    pub(crate) fn is_unsat(&self) -> bool {
        self.ctx.solver_state.sat_state == SatState::Unsat
    }

    /// Encode the hard constraint `sum w_i * x_i <= rhs` with the generalized totalizer.
    ///
    /// Returns the weighted root literals; forcing those above a tightened bound to false
    /// strengthens the constraint.
    pub fn hard_pb_less_or_equal(
        &mut self,
        lits: &[crate::pb::WeightedLit],
        rhs: u64,
    ) -> Result<Vec<crate::pb::WeightedLit>, RootConflict> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        crate::pb::generalized_totalizer::hard_less_or_equal(ctx.borrow(), lits, rhs)
    }

    /// Encode the soft cardinality constraint `sum x_i <= rhs` with the configured encoding.
    ///
    /// The returned literals count the violation, one unit each.
    pub fn soft_cardinality_less_or_equal(
        &mut self,
        lits: &[Lit],
        rhs: usize,
    ) -> Result<Vec<Lit>, RootConflict> {
        let encoding = self.config().cardinality_encoding;
        let mut ctx = self.ctx.into_partial_ref_mut();
        match encoding {
            crate::config::CardinalityEncoding::Totalizer => {
                crate::pb::totalizer::soft_less_or_equal(ctx.borrow(), lits, rhs)
            }
            crate::config::CardinalityEncoding::CardinalityNetwork => {
                crate::pb::cardinality_network::soft_less_or_equal(ctx.borrow(), lits, rhs)
            }
        }
    }

    /// Register a CP propagator and run its root propagation.
    pub fn register_propagator(
        &mut self,
        propagator: Box<dyn Propagator>,
    ) -> Result<PropagatorId, RootConflict> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        cp::register_propagator(ctx.borrow(), propagator)
    }

    /// Overwrite and freeze branching phases; `None` entries are left untouched.
    pub(crate) fn apply_phase_values(&mut self, values: &[Option<bool>]) {
        let phases = &mut self.ctx.phases;
        for (index, value) in values.iter().enumerate() {
            if let Some(value) = *value {
                phases.set_and_freeze(Lit::from_index(index, value));
            }
        }
    }

    pub(crate) fn unfreeze_phases(&mut self) {
        self.ctx.phases.unfreeze_all();
    }

    /// Check the satisfiability of the current formula.
    pub fn solve(&mut self) -> SolverOutput {
        self.solve_with_assumptions(&[], None)
    }

    /// Solve under assumptions with an optional time limit.
    ///
    /// Assumptions are set before any activity-driven decision; when they are jointly
    /// infeasible the output carries a core of their negations.
    pub fn solve_with_assumptions(
        &mut self,
        assumptions: &[Lit],
        time_limit: Option<Duration>,
    ) -> SolverOutput {
        let stopwatch = Stopwatch::new(time_limit);
        self.solve_raw(assumptions, &stopwatch)
    }

    /// Minimize a linear objective over integer variables within the time limit.
    pub fn minimize(
        &mut self,
        objective: &LinearFunction,
        time_limit: Option<Duration>,
    ) -> OptimizationOutput {
        let stopwatch = Stopwatch::new(time_limit);
        optimize::minimize(self, objective, &stopwatch)
    }

    /// The value the last model assigns to an external literal.
    pub fn model_value(&self, lit: Lit) -> Option<bool> {
        let internal = self.external_lit(lit);
        self.last_model
            .as_ref()
            .and_then(|model| model.get(internal.index()).copied())
            .map(|value| value ^ lit.is_negative())
    }

    /// Run the search loop against an already running stopwatch.
    pub(crate) fn solve_raw(&mut self, assumptions: &[Lit], stopwatch: &Stopwatch) -> SolverOutput {
        let call_start = Instant::now();

        let mut output = SolverOutput {
            runtime: Duration::default(),
            timeout: false,
            solution: None,
            cost: -1,
            core: vec![],
        };

        if self.ctx.solver_state.sat_state == SatState::Unsat {
            output.runtime = call_start.elapsed();
            return output;
        }
        self.ctx.solver_state.sat_state = SatState::Unknown;
        self.last_model = None;

        let mut ctx = self.ctx.into_partial_ref_mut();
        backtrack(ctx.borrow(), 0);

        match search(ctx.borrow(), assumptions, stopwatch) {
            SearchResult::Sat => {
                let (solution, model) = {
                    let assignment = ctx.part(AssignmentP);
                    let int_map = ctx.part(crate::context::IntMapP);

                    let mut solution = IntAssignment::new(int_map.int_var_count());
                    for id in 1..=int_map.int_var_count() {
                        let var = IntVar::from_id(id);
                        solution.set_value(var, int_map.assigned_value(assignment, var));
                    }

                    let model = assignment
                        .assignment()
                        .iter()
                        .map(|value| value.unwrap_or(false))
                        .collect();

                    (solution, model)
                };

                ctx.part_mut(SolverStateP).sat_state = SatState::Sat;
                output.solution = Some(solution);
                output.cost = 0;
                self.last_model = Some(model);
            }
            SearchResult::Unsat => {
                ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            }
            SearchResult::UnsatUnderAssumptions(falsified) => {
                extract_core(ctx.borrow(), falsified);
                output.core = ctx.part(IncrementalP).failed_core().to_vec();
                ctx.part_mut(SolverStateP).sat_state = SatState::UnsatUnderAssumptions;
            }
            SearchResult::Timeout => {
                output.timeout = true;
            }
        }

        // return at the root so constraints can be added between calls
        let mut ctx = self.ctx.into_partial_ref_mut();
        backtrack(ctx.borrow(), 0);
        if ctx.part(ClauseDbP).temporary.len()
            >= ctx.part(crate::context::SolverConfigP).limit_num_temporary_clauses
        {
            ctx.part_mut(StatsP).clause_cleanups += 1;
            reduce::promote_and_reduce(ctx.borrow());
        }

        output.runtime = call_start.elapsed();
        output
    }

    /// Remember the current root state so it can be restored later.
    ///
    /// Points nest; a reset always targets the innermost saved point.
    pub(crate) fn save_state_point(&mut self) {
        assert_eq!(self.ctx.trail.current_level(), 0);
        let point = StatePoint {
            num_permanent: self.ctx.clause_db.permanent.len(),
            num_temporary: self.ctx.clause_db.temporary.len(),
            trail_len: self.ctx.trail.len(),
        };
        self.ctx.solver_state.state_points.push(point);
    }

    /// Forget the innermost saved point without restoring it.
    pub(crate) fn drop_state_point(&mut self) {
        self.ctx
            .solver_state
            .state_points
            .pop()
            .expect("no state point saved");
    }

    /// Rewind permanent clauses, root assignments and learned clauses to the innermost saved
    /// point.
    ///
    /// Variables (Boolean and integer) are kept; only the constraint store shrinks. Used
    /// between varying-resolution rounds of the upper-bound search and to undo all
    /// objective-derived constraints after an optimization run.
    pub(crate) fn reset_to_state_point(&mut self) {
        let point = *self
            .ctx
            .solver_state
            .state_points
            .last()
            .expect("no state point saved");

        let mut ctx = self.ctx.into_partial_ref_mut();
        assert_eq!(ctx.part(TrailP).current_level(), 0);

        let mut removed_clauses = 0;
        while ctx.part(ClauseDbP).permanent.len() > point.num_permanent {
            let cref = ctx.part_mut(ClauseDbP).permanent.pop().unwrap();
            if !ctx.part(ClauseAllocP).header(cref).deleted() {
                crate::clause::db::delete_clause(ctx.borrow(), cref);
                removed_clauses += 1;
            }
        }

        let removed_units = ctx.part(TrailP).len() - point.trail_len;
        crate::prop::assignment::pop_assignments(ctx.borrow(), point.trail_len);
        ctx.part_mut(TrailP).rewind_queue(point.trail_len);

        if removed_clauses > 0
            || removed_units > 0
            || ctx.part(ClauseDbP).temporary.len() != point.num_temporary
        {
            reduce::remove_all_learned(ctx.borrow());
        }

        ctx.part_mut(CpP).queue.clear();
        cp::synchronize_all(ctx.borrow());
        ctx.part_mut(VsidsP).reset();
        ctx.part_mut(SolverStateP).sat_state = SatState::Unknown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use marrow_formula::test::{sat_formula, sgen_unsat_formula};
    use marrow_formula::{cnf_formula, lits};

    #[test]
    fn unsat_triangle() {
        // x | y, ~x | z, ~y | z, ~z has no satisfying assignment
        let mut solver = Solver::new();
        solver.add_formula(&cnf_formula![
            1, 2;
            -1, 3;
            -2, 3;
            -3;
        ]);

        let output = solver.solve();
        assert!(output.proven_infeasible());
        assert!(output.core.is_empty());
        assert_eq!(output.cost, -1);
    }

    #[test]
    fn simple_sat_model() {
        let mut solver = Solver::new();
        solver.add_formula(&cnf_formula![
            1, 2;
            -1, 2;
            1, -2;
        ]);

        let output = solver.solve();
        assert!(output.has_solution());
        assert_eq!(output.cost, 0);

        assert_eq!(solver.model_value(lits![1][0]), Some(true));
        assert_eq!(solver.model_value(lits![2][0]), Some(true));
    }

    #[test]
    fn solve_is_repeatable() {
        let mut solver = Solver::new();
        solver.add_formula(&cnf_formula![
            1, 2;
            -1, 2;
        ]);

        let first = solver.solve();
        let second = solver.solve();
        assert_eq!(first.has_solution(), second.has_solution());

        let assumptions = [solver.external_lit(lits![-2][0])];
        let first = solver.solve_with_assumptions(&assumptions, None);
        let second = solver.solve_with_assumptions(&assumptions, None);
        assert!(first.proven_infeasible());
        assert_eq!(first.core, second.core);
    }

    proptest! {
        #[test]
        fn sgen_unsat(formula in sgen_unsat_formula(1..7usize)) {
            let mut solver = Solver::new();
            solver.add_formula(&formula);
            prop_assert!(solver.solve().proven_infeasible());
        }

        #[test]
        fn sat(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut solver = Solver::new();
            solver.add_formula(&formula);

            let output = solver.solve();
            prop_assert!(output.has_solution());

            for clause in formula.iter() {
                prop_assert!(clause.iter().any(|&lit| solver.model_value(lit) == Some(true)));
            }
        }

        #[test]
        fn sat_via_dimacs(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut solver = Solver::new();

            let mut dimacs = vec![];
            marrow_dimacs::write_dimacs(&mut dimacs, &formula).unwrap();
            solver.add_dimacs_cnf(&mut &dimacs[..]).unwrap();

            let output = solver.solve();
            prop_assert!(output.has_solution());

            for clause in formula.iter() {
                prop_assert!(clause.iter().any(|&lit| solver.model_value(lit) == Some(true)));
            }
        }
    }
}
