//! The generalized totalizer encoding for weighted sums.
//!
//! Like the totalizer this is a binary combination tree over the inputs, but each inner node
//! holds one fresh literal per reachable partial sum: `lit(node, w)` means the inputs below the
//! node sum to at least `w`. In the hard variant partial sums above the right-hand side are
//! pruned and input pairs exceeding it are excluded with a binary clause.
use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashMap;

use crate::context::{
    AnalyzeConflictP, AssignmentP, ClauseAllocP, ClauseDbP, Context, CpP, CpPropagatorsP,
    DomainsP, ImplGraphP, IntMapP, MinimizeP, PhasesP, SolverStateP, TmpDataP, TrailP, VsidsP,
    WatchlistsP,
};
use crate::integer::encoding;
use crate::load;
use crate::state::RootConflict;

use super::WeightedLit;

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

/// One layer of the combination tree.
///
/// All node literal/weight pairs live in a single vector; `node_start[i]` is the index of the
/// i-th node's first pair, with a trailing sentinel entry.
#[derive(Default)]
struct Layer {
    pairs: Vec<WeightedLit>,
    node_start: Vec<usize>,
}

impl Layer {
    fn single_lit_nodes(pairs: Vec<WeightedLit>) -> Layer {
        let node_start = (0..=pairs.len()).collect();
        Layer { pairs, node_start }
    }

    fn clear(&mut self) {
        self.pairs.clear();
        self.node_start.clear();
        self.node_start.push(0);
    }

    fn num_nodes(&self) -> usize {
        self.node_start.len() - 1
    }

    fn node_range(&self, node: usize) -> std::ops::Range<usize> {
        self.node_start[node]..self.node_start[node + 1]
    }

    fn add_node(&mut self) {
        self.node_start.push(*self.node_start.last().unwrap());
    }

    fn push_pair(&mut self, pair: WeightedLit) {
        self.pairs.push(pair);
        *self.node_start.last_mut().unwrap() += 1;
    }
}

/// Encodes the soft constraint `sum w_i * x_i <= rhs`.
///
/// The output pairs indicate the degree of violation: when the sum reaches some total above
/// `rhs`, the outputs up to that total are implied true, and their weights are the marginal
/// violation units each one accounts for.
pub fn soft_less_or_equal(
    mut ctx: encode_parts!(),
    input_lits: &[WeightedLit],
    rhs: u64,
) -> Result<Vec<WeightedLit>, RootConflict> {
    let sum: u64 = input_lits.iter().map(|pair| pair.weight).sum();
    if sum <= rhs {
        return Ok(vec![]);
    }

    let mut sorted = input_lits.to_vec();
    sorted.sort_by_key(|pair| pair.weight);

    let root = build_tree(ctx.borrow(), sorted, None)?;

    let mut outputs: Vec<WeightedLit> = vec![];
    let mut covered = rhs;
    for pair in root.pairs {
        if pair.weight > rhs {
            outputs.push(WeightedLit::new(pair.lit, pair.weight - covered));
            covered = pair.weight;
        }
    }

    for index in 0..outputs.len().saturating_sub(1) {
        load::add_binary(ctx.borrow(), outputs[index].lit, !outputs[index + 1].lit)?;
    }

    Ok(outputs)
}

/// Encodes the hard constraint `sum w_i * x_i <= rhs`.
///
/// Inputs heavier than the right-hand side are fixed false up front. The returned pairs are the
/// root sums up to `rhs` in ascending order: when the inputs sum to at least `w`, the output
/// with weight `w` is implied true. The upper-bound search forces outputs false to strengthen
/// the bound.
pub fn hard_less_or_equal(
    mut ctx: encode_parts!(),
    input_lits: &[WeightedLit],
    rhs: u64,
) -> Result<Vec<WeightedLit>, RootConflict> {
    let sum: u64 = input_lits.iter().map(|pair| pair.weight).sum();
    if sum <= rhs {
        return Ok(vec![]);
    }

    let mut kept = Vec::with_capacity(input_lits.len());
    for pair in input_lits {
        if pair.weight <= rhs {
            kept.push(*pair);
        } else {
            load::add_unit(ctx.borrow(), !pair.lit)?;
        }
    }
    kept.sort_by_key(|pair| pair.weight);

    let root = build_tree(ctx.borrow(), kept, Some(rhs))?;
    Ok(root.pairs)
}

/// Merge rounds over the layers until a single node remains.
fn build_tree(
    mut ctx: encode_parts!(),
    inputs: Vec<WeightedLit>,
    prune_above: Option<u64>,
) -> Result<Layer, RootConflict> {
    let mut current = Layer::single_lit_nodes(inputs);
    let mut next = Layer::default();
    let mut partial_sums: Vec<u64> = vec![];
    let mut sum_index: FxHashMap<u64, usize> = FxHashMap::default();

    while current.num_nodes() > 1 {
        next.clear();
        let num_nodes = current.num_nodes();

        for merge_index in 0..num_nodes / 2 {
            let left = current.node_range(2 * merge_index);
            let right = current.node_range(2 * merge_index + 1);
            next.add_node();

            // collect the reachable partial sums of the merged node
            partial_sums.clear();
            for i in left.clone() {
                partial_sums.push(current.pairs[i].weight);
            }
            for j in right.clone() {
                partial_sums.push(current.pairs[j].weight);
            }
            for i in left.clone() {
                for j in right.clone() {
                    let sum = current.pairs[i].weight + current.pairs[j].weight;
                    if prune_above.map_or(true, |bound| sum <= bound) {
                        partial_sums.push(sum);
                    }
                }
            }
            partial_sums.sort_unstable();
            partial_sums.dedup();

            // one fresh literal per partial sum
            sum_index.clear();
            for &sum in partial_sums.iter() {
                let var = encoding::create_integer_variable(ctx.borrow(), 0, 1)?;
                let lit = ctx.part(IntMapP).eq_lit(var, 1);
                sum_index.insert(sum, next.pairs.len());
                next.push_pair(WeightedLit::new(lit, sum));
            }

            // lit(child, w) -> lit(parent, w)
            for i in left.clone() {
                let pair = current.pairs[i];
                let parent = next.pairs[sum_index[&pair.weight]].lit;
                load::add_implication(ctx.borrow(), pair.lit, parent)?;
            }
            for j in right.clone() {
                let pair = current.pairs[j];
                let parent = next.pairs[sum_index[&pair.weight]].lit;
                load::add_implication(ctx.borrow(), pair.lit, parent)?;
            }

            // lit(left, w1) /\ lit(right, w2) -> lit(parent, w1 + w2), or an exclusion when the
            // pair overflows the bound
            for i in left.clone() {
                for j in right.clone() {
                    let left_pair = current.pairs[i];
                    let right_pair = current.pairs[j];
                    let sum = left_pair.weight + right_pair.weight;
                    match prune_above {
                        Some(bound) if sum > bound => {
                            load::add_binary(ctx.borrow(), !left_pair.lit, !right_pair.lit)?;
                        }
                        _ => {
                            let parent = next.pairs[sum_index[&sum]].lit;
                            load::add_ternary(
                                ctx.borrow(),
                                !left_pair.lit,
                                !right_pair.lit,
                                parent,
                            )?;
                        }
                    }
                }
            }
        }

        // an odd trailing node is carried over unmerged
        if num_nodes % 2 == 1 {
            next.add_node();
            for index in current.node_range(num_nodes - 1) {
                let pair = current.pairs[index];
                next.push_pair(pair);
            }
        }

        std::mem::swap(&mut current, &mut next);
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use crate::integer::encoding::init_constants;
    use crate::prop::propagate;

    fn indicators(mut ctx: encode_parts!(), weights: &[u64]) -> Vec<WeightedLit> {
        weights
            .iter()
            .map(|&weight| {
                let var = encoding::create_integer_variable(ctx.borrow(), 0, 1).unwrap();
                WeightedLit::new(ctx.part(IntMapP).eq_lit(var, 1), weight)
            })
            .collect()
    }

    #[test]
    fn hard_constraint_excludes_heavy_pairs() {
        let mut ctx = Context::default();
        {
            let mut ctx = ctx.into_partial_ref_mut();
            init_constants(ctx.borrow());
        }
        let mut ctx = ctx.into_partial_ref_mut();

        let inputs = indicators(ctx.borrow(), &[3, 4, 5]);
        let outputs = hard_less_or_equal(ctx.borrow(), &inputs, 7).unwrap();

        // all root sums stay at or below the bound
        assert!(outputs.iter().all(|pair| pair.weight <= 7));

        // 4 + 5 > 7, so setting one forbids the other
        load::add_unit(ctx.borrow(), inputs[2].lit).unwrap();
        propagate(ctx.borrow()).unwrap();
        assert!(ctx.part(AssignmentP).lit_is_true(!inputs[1].lit));
        // 3 + 5 > 7 as well
        assert!(ctx.part(AssignmentP).lit_is_true(!inputs[0].lit));
    }

    #[test]
    fn hard_constraint_forces_heavy_inputs_false() {
        let mut ctx = Context::default();
        {
            let mut ctx = ctx.into_partial_ref_mut();
            init_constants(ctx.borrow());
        }
        let mut ctx = ctx.into_partial_ref_mut();

        let inputs = indicators(ctx.borrow(), &[2, 9]);
        hard_less_or_equal(ctx.borrow(), &inputs, 5).unwrap();

        assert!(ctx.part(AssignmentP).lit_is_true(!inputs[1].lit));
        assert!(ctx.part(AssignmentP).lit_is_unk(inputs[0].lit));
    }

    #[test]
    fn soft_outputs_cover_the_violation() {
        let mut ctx = Context::default();
        {
            let mut ctx = ctx.into_partial_ref_mut();
            init_constants(ctx.borrow());
        }
        let mut ctx = ctx.into_partial_ref_mut();

        let inputs = indicators(ctx.borrow(), &[2, 3]);
        let outputs = soft_less_or_equal(ctx.borrow(), &inputs, 2).unwrap();

        // reachable sums above 2 are 3 and 5, giving marginal violations 1 and 2
        let weights: Vec<u64> = outputs.iter().map(|pair| pair.weight).collect();
        assert_eq!(weights, vec![1, 2]);
        let total: u64 = weights.iter().sum();
        assert_eq!(total, 3);

        // both inputs true force both violation indicators
        load::add_unit(ctx.borrow(), inputs[0].lit).unwrap();
        load::add_unit(ctx.borrow(), inputs[1].lit).unwrap();
        propagate(ctx.borrow()).unwrap();
        let all_true = outputs
            .iter()
            .all(|pair| ctx.part(AssignmentP).lit_is_true(pair.lit));
        assert!(all_true);
    }

    #[test]
    fn trivially_satisfied_bounds_add_nothing() {
        let mut ctx = Context::default();
        {
            let mut ctx = ctx.into_partial_ref_mut();
            init_constants(ctx.borrow());
        }
        let mut ctx = ctx.into_partial_ref_mut();

        let inputs: Vec<WeightedLit> = indicators(ctx.borrow(), &[1, 2]);
        assert!(hard_less_or_equal(ctx.borrow(), &inputs, 3).unwrap().is_empty());
        assert!(soft_less_or_equal(ctx.borrow(), &inputs, 3).unwrap().is_empty());
    }
}
