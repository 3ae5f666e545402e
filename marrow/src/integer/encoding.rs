//! Unary encoding of integer variables.
//!
//! Every integer variable is encoded eagerly into Boolean literals when it is created: one order
//! literal `[x >= k]` per interior bound and one equality literal `[x == k]` per value, with
//! clauses tying their meanings together. The mapping from Boolean literals back to bound
//! operations is recorded per literal code and drives the integer domain updates.
//!
//! Creating a variable with `lower_bound > 0` still allocates the full `[0, upper_bound]`
//! encoding and pins the low order literals with unit clauses. This wastes a few variables but
//! keeps every order literal addressable by value.
use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::context::{
    add_boolean_var, AnalyzeConflictP, AssignmentP, ClauseAllocP, ClauseDbP, Context, CpP,
    CpPropagatorsP, DomainsP, ImplGraphP, IntMapP, MinimizeP, PhasesP, SolverStateP, TmpDataP,
    TrailP, VsidsP, WatchlistsP,
};
use crate::load;
use crate::prop::Assignment;
use crate::state::RootConflict;

use super::{DomainOp, IntVar, LitInfo};

/// Parts needed to create integer variables and their encodings.
macro_rules! encode_parts {
    () => {
        partial!(
            Context,
            mut AnalyzeConflictP,
            mut AssignmentP,
            mut ClauseAllocP,
            mut ClauseDbP,
            mut CpP,
            mut CpPropagatorsP,
            mut DomainsP,
            mut ImplGraphP,
            mut IntMapP,
            mut MinimizeP,
            mut PhasesP,
            mut SolverStateP,
            mut TmpDataP,
            mut TrailP,
            mut VsidsP,
            mut WatchlistsP,
        )
    };
}

/// Per-variable literal tables of the unary encoding.
#[derive(Default)]
struct IntVarData {
    /// `eq[k]` means `[x == k]`; views leave entries undefined.
    eq: Vec<Option<Lit>>,
    /// `ge[k]` means `[x >= k]`; `ge[0]` is the constant true literal.
    ge: Vec<Lit>,
}

/// Mapping between integer variables and Boolean literals.
pub struct IntMap {
    vars: Vec<IntVarData>,
    lit_info: Vec<Option<LitInfo>>,
    true_lit: Lit,
    initialized: bool,
}

impl Default for IntMap {
    fn default() -> IntMap {
        IntMap {
            // id 0 is reserved
            vars: vec![IntVarData::default()],
            lit_info: vec![],
            true_lit: Lit::from_code(0),
            initialized: false,
        }
    }
}

impl IntMap {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.lit_info.resize(count * 2, None);
    }

    /// Number of integer variables.
    pub fn int_var_count(&self) -> usize {
        self.vars.len() - 1
    }

    /// The literal that is true in every assignment.
    pub fn true_lit(&self) -> Lit {
        debug_assert!(self.initialized);
        self.true_lit
    }

    /// The literal that is false in every assignment.
    pub fn false_lit(&self) -> Lit {
        !self.true_lit()
    }

    /// The literal `[x >= rhs]`.
    pub fn lower_bound_lit(&self, var: IntVar, rhs: i64) -> Lit {
        if rhs <= 0 {
            // all variables are nonnegative
            return self.true_lit();
        }
        let ge = &self.vars[var.id()].ge;
        if rhs as usize >= ge.len() {
            return self.false_lit();
        }
        ge[rhs as usize]
    }

    /// The literal `[x <= rhs]`.
    pub fn upper_bound_lit(&self, var: IntVar, rhs: i64) -> Lit {
        let ge = &self.vars[var.id()].ge;
        if rhs + 1 >= ge.len() as i64 {
            return self.true_lit();
        }
        !self.lower_bound_lit(var, rhs + 1)
    }

    /// The literal `[x == rhs]`.
    ///
    /// Panics for view variables, which have no equality literals.
    pub fn eq_lit(&self, var: IntVar, rhs: i64) -> Lit {
        self.eq_lit_opt(var, rhs)
            .expect("variable has no equality literal for this value")
    }

    /// The literal `[x == rhs]`, if the variable has one.
    pub fn eq_lit_opt(&self, var: IntVar, rhs: i64) -> Option<Lit> {
        let eq = &self.vars[var.id()].eq;
        if rhs < 0 || rhs as usize >= eq.len() {
            return None;
        }
        eq[rhs as usize]
    }

    /// The literal `[x != rhs]`.
    pub fn neq_lit(&self, var: IntVar, rhs: i64) -> Lit {
        !self.eq_lit(var, rhs)
    }

    /// Largest value covered by the variable's encoding.
    pub fn encoded_upper_bound(&self, var: IntVar) -> i64 {
        self.vars[var.id()].ge.len() as i64 - 1
    }

    /// What the literal says about an integer variable, if anything.
    pub fn lit_info(&self, lit: Lit) -> Option<LitInfo> {
        self.lit_info[lit.code()]
    }

    /// Whether backtracking can rewind this variable's domain.
    ///
    /// Rewinds work through the not-equal literals, so only variables with their own equality
    /// encoding qualify; view variables do not. Propagators may only watch rewindable
    /// variables.
    pub fn is_rewindable(&self, var: IntVar) -> bool {
        let eq = &self.vars[var.id()].eq;
        eq.len() > 1 && eq[1].is_some()
    }

    fn set_lit_info(&mut self, lit: Lit, info: LitInfo) {
        self.lit_info[lit.code()] = Some(info);
    }

    /// The value of an integer variable under a complete Boolean assignment.
    ///
    /// Scans the order literals; by the order chain the value is the largest `k` with
    /// `[x >= k]` true.
    pub fn assigned_value(&self, assignment: &Assignment, var: IntVar) -> i64 {
        let mut value = 0;
        for rhs in 1..=self.encoded_upper_bound(var) {
            if assignment.lit_is_true(self.lower_bound_lit(var, rhs)) {
                value = rhs;
            } else {
                break;
            }
        }
        value
    }
}

/// Creates the reserved 0/1 variable backing the constant true and false literals.
///
/// Called once before any other variable or clause is added.
pub fn init_constants(mut ctx: encode_parts!()) {
    if ctx.part(IntMapP).initialized {
        return;
    }

    let root_var = create_integer_variable(ctx.borrow(), 0, 1)
        .expect("creating the constant variable cannot conflict");

    {
        let int_map = ctx.part_mut(IntMapP);
        int_map.true_lit = int_map.vars[root_var.id()].eq[1].unwrap();
        int_map.initialized = true;
    }

    let true_lit = ctx.part(IntMapP).true_lit;
    load::add_unit(ctx.borrow(), true_lit).expect("pinning the true literal cannot conflict");
}

/// Creates a fresh integer variable with domain `[lower_bound, upper_bound]` and encodes it.
pub fn create_integer_variable(
    mut ctx: encode_parts!(),
    lower_bound: i64,
    upper_bound: i64,
) -> Result<IntVar, RootConflict> {
    assert!(
        0 <= lower_bound && lower_bound <= upper_bound && upper_bound >= 1,
        "unsupported integer variable domain"
    );

    let id = ctx.part(IntMapP).vars.len();
    let var = IntVar::from_id(id);

    ctx.part_mut(DomainsP).grow(lower_bound, upper_bound);
    ctx.part_mut(CpP).grow_int_vars();

    let ub = upper_bound as usize;
    let true_lit = ctx.part(IntMapP).true_lit;

    let mut eq: Vec<Option<Lit>> = vec![None; ub + 1];
    let mut ge: Vec<Lit> = vec![true_lit; ub + 1];

    for value in 1..=ub {
        let lit = add_boolean_var(ctx.borrow()).positive();
        eq[value] = Some(lit);

        let int_map = ctx.part_mut(IntMapP);
        int_map.set_lit_info(
            lit,
            LitInfo {
                var,
                op: DomainOp::Equal,
                rhs: value as i64,
            },
        );
        int_map.set_lit_info(
            !lit,
            LitInfo {
                var,
                op: DomainOp::NotEqual,
                rhs: value as i64,
            },
        );
    }

    for value in 1..ub {
        let lit = add_boolean_var(ctx.borrow()).positive();
        ge[value] = lit;

        let int_map = ctx.part_mut(IntMapP);
        int_map.set_lit_info(
            lit,
            LitInfo {
                var,
                op: DomainOp::GreaterEqual,
                rhs: value as i64,
            },
        );
        int_map.set_lit_info(
            !lit,
            LitInfo {
                var,
                op: DomainOp::LessEqual,
                rhs: value as i64 - 1,
            },
        );
    }

    // [x == 0] and [x == upper] share their Boolean with an order literal:
    // [x == 0] <-> ~[x >= 1] and [x == upper] <-> [x >= upper].
    if ub == 1 {
        eq[0] = Some(!eq[1].unwrap());
    } else {
        let eq0 = !ge[1];
        eq[0] = Some(eq0);

        // domain rewinds on backtracking key off the not-equal meaning
        let int_map = ctx.part_mut(IntMapP);
        int_map.set_lit_info(
            eq0,
            LitInfo {
                var,
                op: DomainOp::Equal,
                rhs: 0,
            },
        );
        int_map.set_lit_info(
            !eq0,
            LitInfo {
                var,
                op: DomainOp::NotEqual,
                rhs: 0,
            },
        );
    }

    ge[0] = true_lit;
    ge[1] = !eq[0].unwrap();
    ge[ub] = eq[ub].unwrap();

    ctx.part_mut(IntMapP).vars.push(IntVarData { eq, ge });

    // pin the order literals below the lower bound
    for value in 1..=lower_bound {
        let lit = ctx.part(IntMapP).lower_bound_lit(var, value);
        load::add_unit(ctx.borrow(), lit)?;
    }

    // [x == k] <-> [x >= k] /\ ~[x >= k+1] for the interior values
    for value in 1..ub as i64 {
        let ge_k = ctx.part(IntMapP).lower_bound_lit(var, value);
        let ge_k1 = ctx.part(IntMapP).lower_bound_lit(var, value + 1);
        let eq_k = ctx.part(IntMapP).eq_lit(var, value);

        load::add_ternary(ctx.borrow(), !ge_k, ge_k1, eq_k)?;
        load::add_implication(ctx.borrow(), eq_k, ge_k)?;
        load::add_implication(ctx.borrow(), eq_k, !ge_k1)?;
    }

    // the order chain [x >= k+1] -> [x >= k]
    for value in 1..ub as i64 {
        let ge_k = ctx.part(IntMapP).lower_bound_lit(var, value);
        let ge_k1 = ctx.part(IntMapP).lower_bound_lit(var, value + 1);
        load::add_implication(ctx.borrow(), ge_k1, ge_k)?;
    }

    Ok(var)
}

/// Views a sum of indicator literals as an integer variable.
///
/// `lits[i]` is read as `[sum >= i+1]`, so the literals must already be ordered by implication,
/// as totalizer outputs are. The first `sum_lower_bound` literals are pinned true. No equality
/// literals are introduced.
pub fn create_bounded_sum_variable(
    mut ctx: encode_parts!(),
    lits: &[Lit],
    sum_lower_bound: i64,
) -> Result<IntVar, RootConflict> {
    assert!(sum_lower_bound >= 1);

    let id = ctx.part(IntMapP).vars.len();
    let var = IntVar::from_id(id);
    let ub = lits.len();

    ctx.part_mut(DomainsP).grow(sum_lower_bound, ub as i64);
    ctx.part_mut(CpP).grow_int_vars();

    let true_lit = ctx.part(IntMapP).true_lit;

    let mut ge: Vec<Lit> = vec![true_lit; ub + 1];
    for value in sum_lower_bound as usize + 1..=ub {
        ge[value] = lits[value - 1];

        let int_map = ctx.part_mut(IntMapP);
        int_map.set_lit_info(
            lits[value - 1],
            LitInfo {
                var,
                op: DomainOp::GreaterEqual,
                rhs: value as i64,
            },
        );
        int_map.set_lit_info(
            !lits[value - 1],
            LitInfo {
                var,
                op: DomainOp::LessEqual,
                rhs: value as i64 - 1,
            },
        );
    }

    ctx.part_mut(IntMapP).vars.push(IntVarData {
        eq: vec![None; ub + 1],
        ge,
    });

    for value in 1..=sum_lower_bound {
        load::add_unit(ctx.borrow(), lits[value as usize - 1])?;
    }

    Ok(var)
}

/// Creates a 0/1 view variable that equals the given literal.
pub fn create_equivalent_variable(mut ctx: encode_parts!(), lit: Lit) -> IntVar {
    let id = ctx.part(IntMapP).vars.len();
    let var = IntVar::from_id(id);

    ctx.part_mut(DomainsP).grow(0, 1);
    ctx.part_mut(CpP).grow_int_vars();

    let true_lit = ctx.part(IntMapP).true_lit;
    ctx.part_mut(IntMapP).vars.push(IntVarData {
        eq: vec![Some(!lit), Some(lit)],
        ge: vec![true_lit, lit],
    });

    var
}

/// Creates a view variable equal to `max(0, x - threshold)`.
pub fn create_threshold_exceeding_variable(
    mut ctx: encode_parts!(),
    var: IntVar,
    threshold: i64,
) -> IntVar {
    assert!(threshold > 0 && ctx.part(DomainsP).upper_bound(var) > threshold);

    let id = ctx.part(IntMapP).vars.len();
    let new_var = IntVar::from_id(id);
    let ub = ctx.part(DomainsP).upper_bound(var) - threshold;

    ctx.part_mut(DomainsP).grow(0, ub);
    ctx.part_mut(CpP).grow_int_vars();

    let true_lit = ctx.part(IntMapP).true_lit;
    let mut ge: Vec<Lit> = vec![true_lit; ub as usize + 1];
    for value in 1..=ub {
        ge[value as usize] = ctx.part(IntMapP).lower_bound_lit(var, value + threshold);
    }

    ctx.part_mut(IntMapP).vars.push(IntVarData {
        eq: vec![None; ub as usize + 1],
        ge,
    });

    new_var
}

/// Adds the constraint `x + y == rhs` through implications between bound literals.
///
/// Only the special case used by the objective reformulation is supported: `y` ranges over
/// `[0, ub(x) - lb(x)]` and `rhs == ub(x)`.
pub fn add_simple_sum_constraint(
    mut ctx: encode_parts!(),
    x: IntVar,
    y: IntVar,
    rhs: i64,
) -> Result<(), RootConflict> {
    assert_eq!(ctx.part(TrailP).current_level(), 0);

    let x_lb = ctx.part(DomainsP).lower_bound(x);
    let x_ub = ctx.part(DomainsP).upper_bound(x);
    let y_lb = ctx.part(DomainsP).lower_bound(y);
    let y_ub = ctx.part(DomainsP).upper_bound(y);

    assert!(y_lb == 0 && y_ub == x_ub - x_lb && x_ub == rhs);

    for value in x_lb..=x_ub {
        // [x >= value] -> [y <= rhs - value]
        if value > x_lb {
            let x_lit = ctx.part(IntMapP).lower_bound_lit(x, value);
            let y_lit = ctx.part(IntMapP).upper_bound_lit(y, rhs - value);
            load::add_implication(ctx.borrow(), x_lit, y_lit)?;
        }
        // [x <= value] -> [y >= rhs - value]
        if value < x_ub {
            let x_lit = ctx.part(IntMapP).upper_bound_lit(x, value);
            let y_lit = ctx.part(IntMapP).lower_bound_lit(y, rhs - value);
            load::add_implication(ctx.borrow(), x_lit, y_lit)?;
        }
    }
    Ok(())
}

/// Tightens the upper bound of a variable with a root unit clause.
pub fn set_upper_bound(
    mut ctx: encode_parts!(),
    var: IntVar,
    upper_bound: i64,
) -> Result<(), RootConflict> {
    let lit = ctx.part(IntMapP).upper_bound_lit(var, upper_bound);
    load::add_unit(ctx.borrow(), lit)
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use crate::context::AssignmentP;
    use crate::prop::propagate;

    fn init_ctx(ctx: &mut Context) {
        let mut ctx = ctx.into_partial_ref_mut();
        init_constants(ctx.borrow());
    }

    #[test]
    fn order_chain_propagates() {
        let mut ctx = Context::default();
        init_ctx(&mut ctx);
        let mut ctx = ctx.into_partial_ref_mut();

        let var = create_integer_variable(ctx.borrow(), 0, 4).unwrap();

        // forcing [x >= 3] pulls the chain down and rules out small values
        let ge3 = ctx.part(IntMapP).lower_bound_lit(var, 3);
        load::add_unit(ctx.borrow(), ge3).unwrap();
        propagate(ctx.borrow()).unwrap();

        for value in 1..=2 {
            let ge = ctx.part(IntMapP).lower_bound_lit(var, value);
            assert!(ctx.part(AssignmentP).lit_is_true(ge), "[x >= {}]", value);
            let eq = ctx.part(IntMapP).eq_lit(var, value - 1);
            assert!(ctx.part(AssignmentP).lit_is_true(!eq));
        }

        // [x >= 4] stays open
        let ge4 = ctx.part(IntMapP).lower_bound_lit(var, 4);
        assert!(ctx.part(AssignmentP).lit_is_unk(ge4));
    }

    #[test]
    fn equality_literal_fixes_value() {
        let mut ctx = Context::default();
        init_ctx(&mut ctx);
        let mut ctx = ctx.into_partial_ref_mut();

        let var = create_integer_variable(ctx.borrow(), 0, 3).unwrap();

        let eq2 = ctx.part(IntMapP).eq_lit(var, 2);
        load::add_unit(ctx.borrow(), eq2).unwrap();
        propagate(ctx.borrow()).unwrap();

        let assignment = ctx.part(AssignmentP);
        let int_map = ctx.part(IntMapP);
        assert_eq!(int_map.assigned_value(assignment, var), 2);
        for value in 0..=3 {
            let expected = value == 2;
            assert_eq!(
                assignment.lit_is_true(int_map.eq_lit(var, value)),
                expected,
                "[x == {}]",
                value
            );
        }
    }

    #[test]
    fn lower_bound_is_pinned() {
        let mut ctx = Context::default();
        init_ctx(&mut ctx);
        let mut ctx = ctx.into_partial_ref_mut();

        let var = create_integer_variable(ctx.borrow(), 2, 5).unwrap();

        let assignment = ctx.part(AssignmentP);
        let int_map = ctx.part(IntMapP);
        assert!(assignment.lit_is_true(int_map.lower_bound_lit(var, 1)));
        assert!(assignment.lit_is_true(int_map.lower_bound_lit(var, 2)));
        assert!(assignment.lit_is_unk(int_map.lower_bound_lit(var, 3)));

        // out-of-range bounds degenerate to the constants
        assert_eq!(int_map.lower_bound_lit(var, 0), int_map.true_lit());
        assert_eq!(int_map.upper_bound_lit(var, 5), int_map.true_lit());
    }
}
