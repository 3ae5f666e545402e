//! Propagator for linear integer inequalities `sum a_i * x_i >= c`.
use partial_ref::PartialRef;

use rustc_hash::FxHashMap;

use marrow_formula::Lit;

use crate::context::{AssignmentP, DomainsP, IntMapP, TrailP};
use crate::integer::IntVar;
use crate::prop::{enqueue_assignment, Reason};

use super::{Inconsistent, PropContext, Propagator, PropagatorId, ReadContext, Subscription};

struct TermState {
    var: IntVar,
    weight: i64,
    /// Upper bound for positive terms, lower bound for negative terms, taken at the root.
    root_bound: i64,
}

/// Bounds-consistency propagator for `sum a_i * x_i >= c`.
///
/// The slack is the amount the maximal value of the left-hand side exceeds the right-hand side.
/// Negative slack is a conflict; otherwise each variable's bound is tightened so that the
/// remaining terms can still close the gap. Explanations are recorded eagerly per propagated
/// literal, from the current bounds of all other terms.
pub struct LinearInequalityPropagator {
    positive_terms: Vec<TermState>,
    negative_terms: Vec<TermState>,
    rhs: i64,
    root_slack: i64,
    id: Option<PropagatorId>,
    explanations: FxHashMap<usize, Vec<Lit>>,
    failure: Vec<Lit>,
}

impl LinearInequalityPropagator {
    /// Creates a propagator for `sum coefficients[i] * variables[i] >= rhs`.
    ///
    /// Duplicate variables are merged and zero coefficients dropped.
    pub fn new(variables: &[IntVar], coefficients: &[i64], rhs: i64) -> LinearInequalityPropagator {
        assert_eq!(variables.len(), coefficients.len());

        let mut terms: Vec<(IntVar, i64)> = variables
            .iter()
            .zip(coefficients.iter())
            .filter(|&(_, &weight)| weight != 0)
            .map(|(&var, &weight)| (var, weight))
            .collect();

        terms.sort_unstable_by_key(|&(var, _)| var);

        let mut merged: Vec<(IntVar, i64)> = vec![];
        for (var, weight) in terms {
            match merged.last_mut() {
                Some(last) if last.0 == var => last.1 += weight,
                _ => merged.push((var, weight)),
            }
        }

        let mut positive_terms = vec![];
        let mut negative_terms = vec![];
        for (var, weight) in merged {
            if weight > 0 {
                positive_terms.push(TermState {
                    var,
                    weight,
                    root_bound: 0,
                });
            } else if weight < 0 {
                negative_terms.push(TermState {
                    var,
                    weight,
                    root_bound: 0,
                });
            }
        }

        LinearInequalityPropagator {
            positive_terms,
            negative_terms,
            rhs,
            root_slack: 0,
            id: None,
            explanations: FxHashMap::default(),
            failure: vec![],
        }
    }

    fn current_slack(&self, mut ctx: PropContext) -> i64 {
        let domains = ctx.part(DomainsP);
        let mut slack = self.root_slack;
        for term in &self.positive_terms {
            let upper_bound = domains.upper_bound(term.var);
            debug_assert!(upper_bound <= term.root_bound);
            slack -= term.weight * (term.root_bound - upper_bound);
        }
        for term in &self.negative_terms {
            let lower_bound = domains.lower_bound(term.var);
            debug_assert!(lower_bound >= term.root_bound);
            // the weight is negative, so this also shrinks the slack
            slack += term.weight * (lower_bound - term.root_bound);
        }
        slack
    }

    /// The falsified bound literals of all terms except `skip`.
    fn push_other_bounds(&self, mut ctx: PropContext, skip: Option<IntVar>, out: &mut Vec<Lit>) {
        for term in &self.positive_terms {
            if Some(term.var) == skip {
                continue;
            }
            let upper_bound = ctx.part(DomainsP).upper_bound(term.var);
            out.push(!ctx.part(IntMapP).upper_bound_lit(term.var, upper_bound));
        }
        for term in &self.negative_terms {
            if Some(term.var) == skip {
                continue;
            }
            let lower_bound = ctx.part(DomainsP).lower_bound(term.var);
            out.push(!ctx.part(IntMapP).lower_bound_lit(term.var, lower_bound));
        }
    }

    fn propagate_bounds(&mut self, mut ctx: PropContext) -> Result<(), Inconsistent> {
        let slack = self.current_slack(ctx.borrow());

        if slack < 0 {
            let mut failure = std::mem::take(&mut self.failure);
            failure.clear();
            self.push_other_bounds(ctx.borrow(), None, &mut failure);
            self.failure = failure;
            return Err(Inconsistent);
        }

        let id = self.id.expect("propagator not registered");

        for index in 0..self.positive_terms.len() {
            let (var, weight) = {
                let term = &self.positive_terms[index];
                (term.var, term.weight)
            };
            let lower_bound = ctx.part(DomainsP).lower_bound(var);
            let upper_bound = ctx.part(DomainsP).upper_bound(var);
            let new_lower_bound = upper_bound - slack / weight;

            if new_lower_bound > lower_bound {
                let lit = ctx.part(IntMapP).lower_bound_lit(var, new_lower_bound);
                if !ctx.part(AssignmentP).lit_is_unk(lit) {
                    continue;
                }
                enqueue_assignment(ctx.borrow(), lit, Reason::Propagator(id));

                let mut explanation = vec![lit];
                self.push_other_bounds(ctx.borrow(), Some(var), &mut explanation);
                self.explanations.insert(lit.code(), explanation);
            }
        }

        for index in 0..self.negative_terms.len() {
            let (var, weight) = {
                let term = &self.negative_terms[index];
                (term.var, term.weight)
            };
            let lower_bound = ctx.part(DomainsP).lower_bound(var);
            let upper_bound = ctx.part(DomainsP).upper_bound(var);
            let new_upper_bound = lower_bound + slack / -weight;

            if new_upper_bound < upper_bound {
                let lit = ctx.part(IntMapP).upper_bound_lit(var, new_upper_bound);
                if !ctx.part(AssignmentP).lit_is_unk(lit) {
                    continue;
                }
                enqueue_assignment(ctx.borrow(), lit, Reason::Propagator(id));

                let mut explanation = vec![lit];
                self.push_other_bounds(ctx.borrow(), Some(var), &mut explanation);
                self.explanations.insert(lit.code(), explanation);
            }
        }

        Ok(())
    }
}

impl Propagator for LinearInequalityPropagator {
    fn priority(&self) -> usize {
        0
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        let mut subscriptions = vec![];
        for term in &self.positive_terms {
            subscriptions.push(Subscription {
                var: term.var,
                lower_bound: false,
                upper_bound: true,
                removal: false,
            });
        }
        for term in &self.negative_terms {
            subscriptions.push(Subscription {
                var: term.var,
                lower_bound: true,
                upper_bound: false,
                removal: false,
            });
        }
        subscriptions
    }

    fn initialize_at_root(
        &mut self,
        id: PropagatorId,
        mut ctx: PropContext,
    ) -> Result<(), Inconsistent> {
        self.id = Some(id);

        let mut root_slack = -self.rhs;
        for term in &mut self.positive_terms {
            term.root_bound = ctx.part(DomainsP).upper_bound(term.var);
            root_slack += term.weight * term.root_bound;
        }
        for term in &mut self.negative_terms {
            term.root_bound = ctx.part(DomainsP).lower_bound(term.var);
            root_slack += term.weight * term.root_bound;
        }
        self.root_slack = root_slack;

        self.propagate_bounds(ctx.borrow())
    }

    fn propagate(&mut self, mut ctx: PropContext) -> Result<(), Inconsistent> {
        self.propagate_bounds(ctx.borrow())
    }

    fn propagate_from_scratch(&mut self, mut ctx: PropContext) -> Result<(), Inconsistent> {
        self.propagate_bounds(ctx.borrow())
    }

    fn notify_domain_change(&mut self, _var: IntVar, _ctx: ReadContext) -> bool {
        true
    }

    fn explain(&mut self, lit: Lit, _ctx: ReadContext) -> &[Lit] {
        self.explanations
            .get(&lit.code())
            .expect("no explanation recorded for propagated literal")
    }

    fn explain_failure(&mut self) -> &[Lit] {
        &self.failure
    }

    fn synchronize(&mut self, mut ctx: ReadContext) {
        self.failure.clear();
        // at the root no propagation of this propagator can be resolved through anymore
        if ctx.part(TrailP).current_level() == 0 {
            self.explanations.clear();
        }
    }
}
