//! The totalizer encoding for cardinality constraints.
//!
//! The encoding is a binary tree whose leaves are the input literals. Each inner node
//! represents the sum of its two children as a unary number over fresh literals; the root sums
//! all inputs. Each layer holds as many literals as there are inputs, distributed over its
//! nodes, so a single vector per layer suffices.
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

/// Encodes the soft constraint `sum x_i <= rhs`.
///
/// The returned literals indicate the degree of violation: `output[i]` is implied true whenever
/// the sum exceeds `rhs` by at least `i + 1`. The outputs form a descending implication chain.
pub fn soft_less_or_equal(
    mut ctx: encode_parts!(),
    input_lits: &[Lit],
    rhs: usize,
) -> Result<Vec<Lit>, RootConflict> {
    if input_lits.len() <= rhs {
        return Ok(vec![]);
    }

    let count = input_lits.len();
    let mut current: Vec<Lit> = input_lits.to_vec();
    let mut next: Vec<Lit> = Vec::with_capacity(count);

    // Nodes double in size each round until a single node holds the full sum. An odd trailing
    // node is carried over unmerged.
    let mut node_size = 1;
    while node_size < count {
        let num_nodes = (count + node_size - 1) / node_size;
        let unmerged = if num_nodes % 2 == 1 {
            count - (num_nodes - 1) * node_size
        } else {
            0
        };
        let num_fresh = count - unmerged;

        next.clear();
        for _ in 0..num_fresh {
            let var = encoding::create_integer_variable(ctx.borrow(), 0, 1)?;
            next.push(ctx.part(IntMapP).eq_lit(var, 1));
        }
        for index in num_fresh..count {
            next.push(current[index]);
        }

        for merge_index in 0..num_nodes / 2 {
            let node1_start = 2 * merge_index * node_size;
            let node2_start = node1_start + node_size;
            let sum_start = node1_start;

            // left_i -> sum_i
            for i in 1..=node_size {
                load::add_implication(
                    ctx.borrow(),
                    current[node1_start + i - 1],
                    next[sum_start + i - 1],
                )?;
            }
            // right_j -> sum_j
            for j in 1..=node_size {
                let index = node2_start + j - 1;
                if index >= count {
                    break;
                }
                load::add_implication(ctx.borrow(), current[index], next[sum_start + j - 1])?;
            }
            // left_i /\ right_j -> sum_{i+j}
            for i in 1..=node_size {
                for j in 1..=node_size {
                    let index = node2_start + j - 1;
                    if index >= count {
                        break;
                    }
                    load::add_ternary(
                        ctx.borrow(),
                        !current[node1_start + i - 1],
                        !current[index],
                        next[sum_start + i + j - 1],
                    )?;
                }
            }
        }

        std::mem::swap(&mut current, &mut next);
        node_size *= 2;
    }

    // the first rhs counting literals are unconstrained; the rest signal violations
    let outputs: Vec<Lit> = current[rhs..].to_vec();

    for index in 0..outputs.len().saturating_sub(1) {
        load::add_binary(ctx.borrow(), outputs[index], !outputs[index + 1])?;
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use crate::integer::encoding::init_constants;
    use crate::prop::propagate;

    #[test]
    fn counts_true_inputs() {
        let mut ctx = Context::default();
        {
            let mut ctx = ctx.into_partial_ref_mut();
            init_constants(ctx.borrow());
        }
        let mut ctx = ctx.into_partial_ref_mut();

        let mut inputs = vec![];
        for _ in 0..5 {
            let var = encoding::create_integer_variable(ctx.borrow(), 0, 1).unwrap();
            inputs.push(ctx.part(IntMapP).eq_lit(var, 1));
        }

        let outputs = soft_less_or_equal(ctx.borrow(), &inputs, 2).unwrap();
        assert_eq!(outputs.len(), 3);

        // forcing three inputs true forces the first violation indicator
        for &lit in inputs.iter().take(3) {
            load::add_unit(ctx.borrow(), lit).unwrap();
        }
        propagate(ctx.borrow()).unwrap();

        assert!(ctx.part(AssignmentP).lit_is_true(outputs[0]));
        assert!(!ctx.part(AssignmentP).lit_is_true(outputs[1]));
    }

    #[test]
    fn no_outputs_when_trivially_satisfied() {
        let mut ctx = Context::default();
        {
            let mut ctx = ctx.into_partial_ref_mut();
            init_constants(ctx.borrow());
        }
        let mut ctx = ctx.into_partial_ref_mut();

        let mut inputs = vec![];
        for _ in 0..3 {
            let var = encoding::create_integer_variable(ctx.borrow(), 0, 1).unwrap();
            inputs.push(ctx.part(IntMapP).eq_lit(var, 1));
        }

        assert!(soft_less_or_equal(ctx.borrow(), &inputs, 3)
            .unwrap()
            .is_empty());
    }
}
