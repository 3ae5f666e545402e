//! Adding constraints to the solver.
use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::clause::db;
use crate::context::{
    AssignmentP, ClauseAllocP, ClauseDbP, Context, CpP, CpPropagatorsP, DomainsP, ImplGraphP,
    IntMapP, SolverStateP, TmpDataP, TrailP, WatchlistsP,
};
use crate::prop::{enqueue_assignment, propagate, Reason};
use crate::state::{RootConflict, SatState};

/// Parts needed to add clauses at the root.
macro_rules! load_parts {
    () => {
        partial!(
            Context,
            mut AssignmentP,
            mut ClauseAllocP,
            mut ClauseDbP,
            mut CpP,
            mut CpPropagatorsP,
            mut DomainsP,
            mut ImplGraphP,
            mut SolverStateP,
            mut TmpDataP,
            mut TrailP,
            mut WatchlistsP,
            IntMapP,
        )
    };
}

/// Adds a permanent clause to the current formula.
///
/// Only valid at the root with no pending propagation. The clause is preprocessed: duplicate
/// literals are merged, tautological and root-satisfied clauses are dropped, and root-falsified
/// literals are removed. A unit result is enqueued as a root assignment and propagated to
/// fixpoint; anything larger is installed with its first two literals watched.
///
/// A returned [`RootConflict`] proves the formula unsatisfiable; the solver remembers this.
pub fn add_clause(mut ctx: load_parts!(), lits: &[Lit]) -> Result<(), RootConflict> {
    match ctx.part(SolverStateP).sat_state {
        SatState::Unsat => return Err(RootConflict),
        SatState::Sat | SatState::UnsatUnderAssumptions => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unknown;
        }
        SatState::Unknown => {}
    }

    debug_assert_eq!(ctx.part(TrailP).current_level(), 0);
    debug_assert!(ctx.part(TrailP).fully_propagated());

    let (tmp_data, mut ctx) = ctx.split_part_mut(TmpDataP);

    tmp_data.lits.clear();
    tmp_data.lits.extend_from_slice(lits);
    let lits = &mut tmp_data.lits;
    let simplified_lits = &mut tmp_data.lits_2;

    lits.sort_unstable();
    lits.dedup();

    // Detect tautological clauses
    let mut last = None;

    for &lit in lits.iter() {
        if last == Some(!lit) {
            return Ok(());
        }
        last = Some(lit);
    }

    // Remove false literals and satisfied clauses
    simplified_lits.clear();

    for &lit in lits.iter() {
        match ctx.part(AssignmentP).lit_value(lit) {
            Some(true) => return Ok(()),
            Some(false) => (),
            None => simplified_lits.push(lit),
        }
    }

    match simplified_lits[..] {
        [] => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            Err(RootConflict)
        }
        [lit] => {
            enqueue_assignment(ctx.borrow(), lit, Reason::Decision);
            if propagate(ctx.borrow()).is_err() {
                ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                Err(RootConflict)
            } else {
                Ok(())
            }
        }
        ref simplified => {
            db::add_permanent_clause(ctx.borrow(), simplified);
            Ok(())
        }
    }
}

/// Adds a unit clause and propagates it.
pub fn add_unit(mut ctx: load_parts!(), lit: Lit) -> Result<(), RootConflict> {
    add_clause(ctx.borrow(), &[lit])
}

/// Adds a binary clause.
pub fn add_binary(mut ctx: load_parts!(), a: Lit, b: Lit) -> Result<(), RootConflict> {
    add_clause(ctx.borrow(), &[a, b])
}

/// Adds the implication `from → to`.
pub fn add_implication(mut ctx: load_parts!(), from: Lit, to: Lit) -> Result<(), RootConflict> {
    add_clause(ctx.borrow(), &[!from, to])
}

/// Adds a ternary clause.
pub fn add_ternary(mut ctx: load_parts!(), a: Lit, b: Lit, c: Lit) -> Result<(), RootConflict> {
    add_clause(ctx.borrow(), &[a, b, c])
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use marrow_formula::lits;

    use crate::context::set_var_count;

    #[test]
    fn unsat_on_empty_clause() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        assert!(add_clause(ctx.borrow(), &[]).is_err());

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }

    #[test]
    fn unit_clauses() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        add_clause(ctx.borrow(), &lits![1]).unwrap();

        assert_eq!(ctx.part(TrailP).trail().len(), 1);

        add_clause(ctx.borrow(), &lits![3, -3]).unwrap();

        assert_eq!(ctx.part(TrailP).trail().len(), 1);

        add_clause(ctx.borrow(), &lits![-2]).unwrap();

        assert_eq!(ctx.part(TrailP).trail().len(), 2);

        add_clause(ctx.borrow(), &lits![1, 1]).unwrap();

        assert_eq!(ctx.part(TrailP).trail().len(), 2);

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unknown);

        assert!(add_clause(ctx.borrow(), &lits![2]).is_err());

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }

    #[test]
    fn binary_propagation() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        add_clause(ctx.borrow(), &lits![1, 2]).unwrap();
        add_clause(ctx.borrow(), &lits![-1, 3, 3]).unwrap();
        add_clause(ctx.borrow(), &lits![4, -4]).unwrap();

        assert_eq!(ctx.part(ClauseDbP).permanent.len(), 2);

        // forcing 1 propagates 3 through the simplified second clause
        add_unit(ctx.borrow(), lits![1][0]).unwrap();

        assert!(ctx.part(AssignmentP).lit_is_true(lits![3][0]));
        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unknown);
    }

    #[test]
    fn conflicting_units() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 4);

        add_clause(ctx.borrow(), &lits![1, 2]).unwrap();
        add_unit(ctx.borrow(), lits![-1][0]).unwrap();
        add_unit(ctx.borrow(), lits![-2][0]).unwrap_err();

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }
}
