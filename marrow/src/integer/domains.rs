//! Integer variable domains.
//!
//! Each integer variable carries a value bitset together with tracked lower and upper bounds.
//! The bounds and the bitset follow the truth values of the variable's bound literals: freshly
//! assigned bound literals are drained from the trail into [`update`](Domains::update) calls,
//! and backtracking re-adds the removed values. Between drains the domain may lag behind the
//! trail.
use super::{DomainOp, IntVar};

/// Domain of one integer variable.
#[derive(Clone, Debug)]
struct DomainInfo {
    lower_bound: i64,
    upper_bound: i64,
    root_lower: i64,
    root_upper: i64,
    in_domain: Vec<bool>,
}

/// Summary of a single domain update, used to notify subscribed propagators.
#[derive(Copy, Clone, Default, Debug)]
pub struct DomainChange {
    pub removal: bool,
    pub lower: bool,
    pub upper: bool,
}

/// Domains of all integer variables.
pub struct Domains {
    domains: Vec<DomainInfo>,
}

impl Default for Domains {
    fn default() -> Domains {
        Domains {
            // id 0 is reserved
            domains: vec![DomainInfo {
                lower_bound: 0,
                upper_bound: 0,
                root_lower: 0,
                root_upper: 0,
                in_domain: vec![],
            }],
        }
    }
}

impl Domains {
    /// Add the domain `[lower_bound, upper_bound]` of a freshly created integer variable.
    pub fn grow(&mut self, lower_bound: i64, upper_bound: i64) {
        debug_assert!(0 <= lower_bound && lower_bound <= upper_bound);
        let mut in_domain = vec![false; upper_bound as usize + 1];
        for value in lower_bound..=upper_bound {
            in_domain[value as usize] = true;
        }
        self.domains.push(DomainInfo {
            lower_bound,
            upper_bound,
            root_lower: lower_bound,
            root_upper: upper_bound,
            in_domain,
        });
    }

    /// Number of integer variables.
    pub fn int_var_count(&self) -> usize {
        self.domains.len() - 1
    }

    pub fn lower_bound(&self, var: IntVar) -> i64 {
        self.domains[var.id()].lower_bound
    }

    pub fn upper_bound(&self, var: IntVar) -> i64 {
        self.domains[var.id()].upper_bound
    }

    pub fn root_lower_bound(&self, var: IntVar) -> i64 {
        self.domains[var.id()].root_lower
    }

    pub fn root_upper_bound(&self, var: IntVar) -> i64 {
        self.domains[var.id()].root_upper
    }

    /// Whether the value is still in the variable's domain.
    pub fn is_in_domain(&self, var: IntVar, value: i64) -> bool {
        let domain = &self.domains[var.id()];
        value >= 0
            && (value as usize) < domain.in_domain.len()
            && domain.in_domain[value as usize]
    }

    /// Whether the domain is down to a single value.
    pub fn is_assigned(&self, var: IntVar) -> bool {
        let domain = &self.domains[var.id()];
        domain.lower_bound == domain.upper_bound
    }

    /// Apply a domain operation and report which change classes occurred.
    pub fn update(&mut self, var: IntVar, op: DomainOp, rhs: i64) -> DomainChange {
        let domain = &mut self.domains[var.id()];
        let mut change = DomainChange::default();

        match op {
            DomainOp::Equal => {
                debug_assert!(domain.in_domain[rhs as usize]);
                let old_lower = domain.lower_bound;
                let old_upper = domain.upper_bound;
                for value in old_lower..=old_upper {
                    domain.in_domain[value as usize] = value == rhs;
                }
                domain.lower_bound = rhs;
                domain.upper_bound = rhs;

                change.removal = old_lower != old_upper;
                change.lower = old_lower != rhs;
                change.upper = old_upper != rhs;
            }
            DomainOp::NotEqual => {
                // the value may already be gone when a bound update got there first
                if rhs >= 0
                    && (rhs as usize) < domain.in_domain.len()
                    && domain.in_domain[rhs as usize]
                {
                    domain.in_domain[rhs as usize] = false;
                    change.removal = true;

                    if domain.lower_bound == rhs {
                        while !domain.in_domain[domain.lower_bound as usize] {
                            domain.lower_bound += 1;
                        }
                        change.lower = true;
                    }
                    if domain.upper_bound == rhs {
                        while !domain.in_domain[domain.upper_bound as usize] {
                            domain.upper_bound -= 1;
                        }
                        change.upper = true;
                    }
                }
            }
            DomainOp::LessEqual => {
                if rhs < domain.upper_bound {
                    for value in rhs + 1..=domain.upper_bound {
                        domain.in_domain[value as usize] = false;
                    }
                    domain.upper_bound = rhs;
                    debug_assert!(domain.lower_bound <= domain.upper_bound);
                    change.removal = true;
                    change.upper = true;
                }
            }
            DomainOp::GreaterEqual => {
                if rhs > domain.lower_bound {
                    for value in domain.lower_bound..rhs {
                        domain.in_domain[value as usize] = false;
                    }
                    domain.lower_bound = rhs;
                    debug_assert!(domain.lower_bound <= domain.upper_bound);
                    change.removal = true;
                    change.lower = true;
                }
            }
        }

        change
    }

    /// Put a value back into the domain while backtracking.
    pub fn readd(&mut self, var: IntVar, value: i64) {
        let domain = &mut self.domains[var.id()];
        debug_assert!(!domain.in_domain[value as usize]);
        domain.in_domain[value as usize] = true;
        domain.lower_bound = domain.lower_bound.min(value);
        domain.upper_bound = domain.upper_bound.max(value);
    }

    /// Recompute all domains from the root assignment.
    ///
    /// Needed when a propagator registration starts flagging bound literals whose assignments
    /// were drained before the flags existed.
    pub fn update_from_scratch(
        &mut self,
        int_map: &super::encoding::IntMap,
        assignment: &crate::prop::Assignment,
    ) {
        for id in 1..self.domains.len() {
            let var = IntVar::from_id(id);
            let root_lower = self.domains[id].root_lower;
            let root_upper = self.domains[id].root_upper;

            let mut lower = root_lower;
            while lower < root_upper && assignment.lit_is_true(int_map.lower_bound_lit(var, lower + 1))
            {
                lower += 1;
            }
            let mut upper = root_upper;
            while upper > lower && assignment.lit_is_true(int_map.upper_bound_lit(var, upper - 1)) {
                upper -= 1;
            }

            let domain = &mut self.domains[id];
            domain.lower_bound = lower;
            domain.upper_bound = upper;

            for value in 0..domain.in_domain.len() as i64 {
                let in_bounds = value >= lower && value <= upper;
                let removed = match int_map.eq_lit_opt(var, value) {
                    Some(eq_lit) => assignment.lit_is_true(!eq_lit),
                    None => false,
                };
                domain.in_domain[value as usize] = in_bounds && !removed;
            }
        }
    }
}
