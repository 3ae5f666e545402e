//! Database for clauses.
use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::context::{ClauseAllocP, ClauseDbP, Context, WatchlistsP};

use super::{ClauseAlloc, ClauseHeader, ClauseRef};

/// Database for clauses stored in the arena.
///
/// Permanent clauses come from the problem encoding; learned clauses are split into a low-LBD
/// tier that is kept indefinitely and a temporary tier that is periodically reduced. Removal of
/// clauses from the reference lists can be delayed, so the deleted flag needs to be checked when
/// iterating over them.
///
/// The database also owns the helper arena that garbage collection copies live clauses into
/// before swapping it with the active arena.
#[derive(Default)]
pub struct ClauseDb {
    pub permanent: Vec<ClauseRef>,
    pub low_lbd: Vec<ClauseRef>,
    pub temporary: Vec<ClauseRef>,
    pub helper_alloc: ClauseAlloc,
}

impl ClauseDb {
    /// Number of learned clauses currently referenced.
    pub fn learned_count(&self) -> usize {
        self.low_lbd.len() + self.temporary.len()
    }
}

/// Add a permanent clause to the database and attach it to the watch lists.
///
/// The first two literals become the watched pair.
pub fn add_permanent_clause(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
    lits: &[Lit],
) -> ClauseRef {
    let header = ClauseHeader::new();
    let cref = ctx.part_mut(ClauseAllocP).add_clause(header, lits);
    ctx.part_mut(ClauseDbP).permanent.push(cref);
    ctx.part_mut(WatchlistsP)
        .watch_clause(cref, [lits[0], lits[1]]);
    cref
}

/// Add a learned clause to the database and attach it to the watch lists.
///
/// Learned clauses always enter the temporary tier; promotion into the low-LBD tier happens
/// during the next reduction.
pub fn add_learned_clause(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
    lits: &[Lit],
    lbd: u32,
) -> ClauseRef {
    let mut header = ClauseHeader::new();
    header.set_learned(true);
    header.set_lbd(lbd);
    let cref = ctx.part_mut(ClauseAllocP).add_clause(header, lits);
    ctx.part_mut(ClauseDbP).temporary.push(cref);
    ctx.part_mut(WatchlistsP)
        .watch_clause(cref, [lits[0], lits[1]]);
    cref
}

/// Detach a clause from the watch lists and mark it deleted.
///
/// The reference lists are cleaned up lazily by the next reduction or garbage collection.
pub fn delete_clause(
    mut ctx: partial!(Context, mut ClauseAllocP, mut WatchlistsP),
    cref: ClauseRef,
) {
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let lits = alloc.clause(cref).lits();
    let watched = [lits[0], lits[1]];
    ctx.part_mut(WatchlistsP).unwatch_clause(cref, watched);
    alloc.delete_clause(cref);
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use marrow_formula::cnf_formula;

    use crate::context::set_var_count;

    #[test]
    fn tiers_and_deletion() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        let clauses = cnf_formula![
            1, 2, 3;
            4, -5, 6;
            -2, 3, -4;
        ];

        set_var_count(ctx.borrow(), clauses.var_count());

        let mut crefs = vec![];
        for (index, clause) in clauses.iter().enumerate() {
            let cref = if index == 0 {
                add_permanent_clause(ctx.borrow(), clause)
            } else {
                add_learned_clause(ctx.borrow(), clause, index as u32)
            };
            crefs.push(cref);
        }

        assert_eq!(ctx.part(ClauseDbP).permanent.len(), 1);
        assert_eq!(ctx.part(ClauseDbP).temporary.len(), 2);
        assert_eq!(ctx.part(ClauseDbP).learned_count(), 2);

        assert!(!ctx.part(ClauseAllocP).header(crefs[1]).deleted());
        delete_clause(ctx.borrow(), crefs[1]);
        assert!(ctx.part(ClauseAllocP).header(crefs[1]).deleted());
        assert!(ctx.part(ClauseAllocP).garbage_words() > 0);
    }
}
