//! Watchlists to detect clauses that became unit.
//!
//! Each clause has always two watches pointing to it. The watches are kept in the watchlists of
//! the negations of two different literals of the clause. Whenever the watches are moved to
//! different literals the literals of the clause are permuted so the watched literals are in
//! position 0 and 1.
//!
//! When a clause is not unit under the current assignment, the watched literals point at two
//! non-false literals. When a clause is unit and thus propagating, the true literal is watched
//! and in position 0. When a clause becomes satisfied before becoming unit the watches can be
//! kept as they were. There is no need to update watchlists on backtracking, as unassigning
//! variables cannot invalidate the invariant.
//!
//! As a further optimization each watch stores a blocking literal of the clause that is
//! different from the watched literal. When that literal is true, the clause is already
//! satisfied and does not have to be loaded at all.

use crate::clause::ClauseRef;
use marrow_formula::Lit;

/// A watch on a clause.
#[derive(Copy, Clone)]
pub struct Watch {
    /// Clause which has the referring lit in position 0 or 1.
    pub cref: ClauseRef,
    /// A lit of the clause, different from the referring lit.
    pub blocking: Lit,
}

/// Watchlists to detect clauses that became unit.
#[derive(Default)]
pub struct Watchlists {
    /// Watches of clauses that need attention when the indexing literal becomes true.
    watches: Vec<Vec<Watch>>,
}

impl Watchlists {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.watches.resize(count * 2, vec![]);
    }

    /// Number of literal codes with a watch list.
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Start watching a clause.
    ///
    /// `lits` have to be the first two literals of the given clause.
    pub fn watch_clause(&mut self, cref: ClauseRef, lits: [Lit; 2]) {
        for i in 0..2 {
            let watch = Watch {
                cref,
                blocking: lits[i ^ 1],
            };
            self.watches[(!lits[i]).code()].push(watch);
        }
    }

    /// Stop watching a clause.
    ///
    /// `lits` have to be the first two literals of the given clause.
    pub fn unwatch_clause(&mut self, cref: ClauseRef, lits: [Lit; 2]) {
        for &lit in lits.iter() {
            self.watches[(!lit).code()].retain(|watch| watch.cref != cref);
        }
    }

    /// Return watches for a given literal.
    pub fn watched_by(&self, lit: Lit) -> &[Watch] {
        &self.watches[lit.code()]
    }

    /// Return watches for a given literal for updating.
    pub fn watched_by_mut(&mut self, lit: Lit) -> &mut Vec<Watch> {
        &mut self.watches[lit.code()]
    }

    /// Make a literal watch a clause.
    pub fn add_watch(&mut self, lit: Lit, watch: Watch) {
        self.watches[lit.code()].push(watch)
    }
}
