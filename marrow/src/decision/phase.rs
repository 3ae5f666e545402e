//! Phase saving and solution-guided value selection.
use marrow_formula::{Lit, Var};

/// Saved polarities used when branching on a variable.
///
/// By default each variable remembers the polarity it was last assigned. The optimization loops
/// can overwrite and freeze the polarities to steer the search towards (or optimistically past)
/// the incumbent solution; frozen entries ignore later assignments until unfrozen.
#[derive(Default)]
pub struct Phases {
    values: Vec<bool>,
    frozen: Vec<bool>,
}

impl Phases {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.values.resize(count, false);
        self.frozen.resize(count, false);
    }

    /// The polarity to use when branching on the variable.
    pub fn value(&self, var: Var) -> bool {
        self.values[var.index()]
    }

    /// Record the polarity of an unassigned variable, unless it is frozen.
    pub fn save(&mut self, var: Var, value: bool) {
        if !self.frozen[var.index()] {
            self.values[var.index()] = value;
        }
    }

    /// Overwrite the polarity of one variable and freeze it.
    pub fn set_and_freeze(&mut self, lit: Lit) {
        self.values[lit.index()] = lit.is_positive();
        self.frozen[lit.index()] = true;
    }

    /// Overwrite all polarities from a full assignment and freeze them.
    pub fn set_all_and_freeze(&mut self, values: &[bool]) {
        for index in 0..self.values.len() {
            self.values[index] = values.get(index).copied().unwrap_or(false);
            self.frozen[index] = true;
        }
    }

    /// Allow phase saving to overwrite the polarities again.
    pub fn unfreeze_all(&mut self) {
        for frozen in self.frozen.iter_mut() {
            *frozen = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freezing_blocks_saves() {
        let mut phases = Phases::default();
        phases.set_var_count(4);

        let var = Var::from_index(2);
        phases.save(var, true);
        assert!(phases.value(var));

        phases.set_and_freeze(Lit::negative(var));
        assert!(!phases.value(var));

        phases.save(var, true);
        assert!(!phases.value(var));

        phases.unfreeze_all();
        phases.save(var, true);
        assert!(phases.value(var));
    }
}
