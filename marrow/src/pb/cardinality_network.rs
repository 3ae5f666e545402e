//! Cardinality networks built from odd-even merges.
//!
//! `hsort` recursively sorts the inputs by splitting them in half; `hmerge` combines two sorted
//! sequences by merging their odd and even subsequences and stitching the results together with
//! fresh literals. Only the implications needed to push ones towards the front are emitted,
//! which is the direction the soft `<=` constraint uses.
use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::context::{
    AnalyzeConflictP, AssignmentP, ClauseAllocP, ClauseDbP, Context, CpP, CpPropagatorsP,
    DomainsP, ImplGraphP, IntMapP, MinimizeP, PhasesP, SolverStateP, TmpDataP, TrailP, VsidsP,
    WatchlistsP,
};
use crate::integer::encoding;
use crate::load;
use crate::state::RootConflict;

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

/// Encodes the soft constraint `sum x_i <= rhs` through a sorting network.
///
/// The sorted outputs past position `rhs` indicate the degree of violation, like the totalizer
/// outputs do.
pub fn soft_less_or_equal(
    mut ctx: encode_parts!(),
    input_lits: &[Lit],
    rhs: usize,
) -> Result<Vec<Lit>, RootConflict> {
    if input_lits.len() <= rhs {
        return Ok(vec![]);
    }

    let sorted = hsort(ctx.borrow(), input_lits)?;
    Ok(sorted[rhs..].to_vec())
}

fn fresh_indicator(mut ctx: encode_parts!()) -> Result<Lit, RootConflict> {
    let var = encoding::create_integer_variable(ctx.borrow(), 0, 1)?;
    Ok(ctx.part(IntMapP).eq_lit(var, 1))
}

fn hsort(mut ctx: encode_parts!(), lits: &[Lit]) -> Result<Vec<Lit>, RootConflict> {
    debug_assert!(!lits.is_empty());

    match lits.len() {
        1 => Ok(lits.to_vec()),
        2 => hmerge_single(ctx.borrow(), lits[0], lits[1]),
        _ => {
            let half = lits.len() / 2;
            let first = hsort(ctx.borrow(), &lits[..half])?;
            let second = hsort(ctx.borrow(), &lits[half..])?;
            hmerge(ctx.borrow(), &first, &second)
        }
    }
}

fn hmerge(mut ctx: encode_parts!(), a: &[Lit], b: &[Lit]) -> Result<Vec<Lit>, RootConflict> {
    if a.is_empty() {
        return Ok(b.to_vec());
    }
    if b.is_empty() {
        return Ok(a.to_vec());
    }
    if a.len() == 1 && b.len() == 1 {
        return hmerge_single(ctx.borrow(), a[0], b[0]);
    }

    let odd_a: Vec<Lit> = a.iter().step_by(2).cloned().collect();
    let even_a: Vec<Lit> = a.iter().skip(1).step_by(2).cloned().collect();
    let odd_b: Vec<Lit> = b.iter().step_by(2).cloned().collect();
    let even_b: Vec<Lit> = b.iter().skip(1).step_by(2).cloned().collect();

    let merged_odd = hmerge(ctx.borrow(), &odd_a, &odd_b)?;
    let merged_even = hmerge(ctx.borrow(), &even_a, &even_b)?;
    debug_assert_eq!(merged_odd.len() + merged_even.len(), a.len() + b.len());

    let total = a.len() + b.len();
    let mut merged = Vec::with_capacity(total);
    merged.push(merged_odd[0]);
    for _ in 1..total - 1 {
        merged.push(fresh_indicator(ctx.borrow())?);
    }
    if 2 * merged_even.len() == total {
        merged.push(*merged_even.last().unwrap());
    } else {
        merged.push(fresh_indicator(ctx.borrow())?);
    }

    for i in 1..merged_odd.len() {
        load::add_implication(ctx.borrow(), merged_odd[i], merged[2 * i - 1])?;
    }
    for i in 1..merged_even.len() {
        load::add_implication(ctx.borrow(), merged_even[i - 1], merged[2 * i - 1])?;
    }
    for i in 1..merged_odd.len().min(merged_even.len()) {
        load::add_ternary(
            ctx.borrow(),
            !merged_odd[i],
            !merged_even[i - 1],
            merged[2 * i],
        )?;
    }
    if 2 * merged_even.len() != total {
        let m = merged_even.len();
        load::add_implication(ctx.borrow(), merged_even[m - 1], merged[2 * m - 1])?;
        load::add_ternary(
            ctx.borrow(),
            !merged_odd[m],
            !merged_even[m - 1],
            merged[2 * m],
        )?;
    }

    Ok(merged)
}

/// Merge two single literals into a sorted pair of fresh indicators.
fn hmerge_single(mut ctx: encode_parts!(), a: Lit, b: Lit) -> Result<Vec<Lit>, RootConflict> {
    let at_least_one = fresh_indicator(ctx.borrow())?;
    let at_least_two = fresh_indicator(ctx.borrow())?;

    load::add_implication(ctx.borrow(), a, at_least_one)?;
    load::add_implication(ctx.borrow(), b, at_least_one)?;
    load::add_ternary(ctx.borrow(), !a, !b, at_least_two)?;

    Ok(vec![at_least_one, at_least_two])
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use crate::integer::encoding::init_constants;
    use crate::prop::propagate;

    #[test]
    fn sorts_true_inputs_to_the_front() {
        let mut ctx = Context::default();
        {
            let mut ctx = ctx.into_partial_ref_mut();
            init_constants(ctx.borrow());
        }
        let mut ctx = ctx.into_partial_ref_mut();

        let mut inputs = vec![];
        for _ in 0..4 {
            let var = encoding::create_integer_variable(ctx.borrow(), 0, 1).unwrap();
            inputs.push(ctx.part(IntMapP).eq_lit(var, 1));
        }

        let outputs = soft_less_or_equal(ctx.borrow(), &inputs, 1).unwrap();
        assert_eq!(outputs.len(), 3);

        // two true inputs violate "at most one" by one unit
        load::add_unit(ctx.borrow(), inputs[1]).unwrap();
        load::add_unit(ctx.borrow(), inputs[3]).unwrap();
        propagate(ctx.borrow()).unwrap();

        assert!(ctx.part(AssignmentP).lit_is_true(outputs[0]));
        assert!(!ctx.part(AssignmentP).lit_is_true(outputs[1]));
    }
}
