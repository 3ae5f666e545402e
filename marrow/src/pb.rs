//! Pseudo-Boolean encoders for cardinality and linear constraints.
pub mod cardinality_network;
pub mod generalized_totalizer;
pub mod totalizer;

use marrow_formula::Lit;

/// A literal with a positive weight, as consumed by the weighted encoders.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct WeightedLit {
    pub lit: Lit,
    pub weight: u64,
}

impl WeightedLit {
    pub fn new(lit: Lit, weight: u64) -> WeightedLit {
        WeightedLit { lit, weight }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::config::{CardinalityEncoding, SolverConfig};
    use crate::solver::Solver;

    /// Pin the pattern of inputs and report whether the solver still finds a model.
    fn satisfiable_with_pattern(solver: &mut Solver, inputs: &[Lit], pattern: &[bool]) -> bool {
        for (&lit, &value) in inputs.iter().zip(pattern.iter()) {
            let unit = if value { lit } else { !lit };
            if solver.add_clause(&[unit]).is_err() {
                return false;
            }
        }
        solver.solve().has_solution()
    }

    fn indicator_vars(solver: &mut Solver, count: usize) -> Vec<Lit> {
        (0..count)
            .map(|_| {
                let var = solver.new_int_var(0, 1).unwrap();
                solver.eq_lit(var, 1)
            })
            .collect()
    }

    proptest! {
        /// All three cardinality encodings accept exactly the patterns within the bound when
        /// their violation outputs are pinned to zero.
        #[test]
        fn cardinality_encoders_agree(
            pattern in proptest::collection::vec(proptest::bool::ANY, 1..7),
            rhs in 0..7usize,
        ) {
            let expected = pattern.iter().filter(|&&value| value).count() <= rhs;

            for encoding in &[
                CardinalityEncoding::Totalizer,
                CardinalityEncoding::CardinalityNetwork,
            ] {
                let mut config = SolverConfig::default();
                config.cardinality_encoding = *encoding;
                let mut solver = Solver::with_config(config);

                let inputs = indicator_vars(&mut solver, pattern.len());
                let outputs = solver.soft_cardinality_less_or_equal(&inputs, rhs).unwrap();

                let mut feasible = true;
                for &lit in &outputs {
                    if solver.add_clause(&[!lit]).is_err() {
                        feasible = false;
                        break;
                    }
                }

                let satisfiable =
                    feasible && satisfiable_with_pattern(&mut solver, &inputs, &pattern);
                prop_assert_eq!(
                    satisfiable,
                    expected,
                    "{:?} disagrees on pattern {:?} with bound {}",
                    encoding,
                    &pattern,
                    rhs
                );
            }

            // the generalized totalizer with unit weights is a third encoding of the same
            // constraint
            let mut solver = Solver::new();
            let inputs = indicator_vars(&mut solver, pattern.len());
            let weighted: Vec<WeightedLit> = inputs
                .iter()
                .map(|&lit| WeightedLit::new(lit, 1))
                .collect();
            let feasible = solver.hard_pb_less_or_equal(&weighted, rhs as u64).is_ok();
            let satisfiable = feasible && satisfiable_with_pattern(&mut solver, &inputs, &pattern);
            prop_assert_eq!(satisfiable, expected);
        }

        /// The hard weighted encoding is equisatisfiable with evaluating the sum directly.
        #[test]
        fn weighted_encoding_matches_direct_evaluation(
            weights in proptest::collection::vec(1u64..8, 1..6),
            pattern in proptest::collection::vec(proptest::bool::ANY, 6),
            rhs_fraction in 0u64..30,
        ) {
            let total: u64 = weights.iter().sum();
            let rhs = rhs_fraction.min(total);

            let forced: u64 = weights
                .iter()
                .zip(pattern.iter())
                .filter(|&(_, &value)| value)
                .map(|(&weight, _)| weight)
                .sum();
            let expected = forced <= rhs;

            let mut solver = Solver::new();
            let inputs = indicator_vars(&mut solver, weights.len());
            let weighted: Vec<WeightedLit> = inputs
                .iter()
                .zip(weights.iter())
                .map(|(&lit, &weight)| WeightedLit::new(lit, weight))
                .collect();

            let feasible = solver.hard_pb_less_or_equal(&weighted, rhs).is_ok();
            let satisfiable = feasible && satisfiable_with_pattern(&mut solver, &inputs, &pattern);
            prop_assert_eq!(satisfiable, expected);
        }
    }
}
