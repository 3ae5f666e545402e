//! Garbage collection of the clause arena.
use std::mem::swap;

use partial_ref::{partial, PartialRef};

use marrow_formula::Lit;

use crate::context::{
    AssignmentP, ClauseAllocP, ClauseDbP, Context, ImplGraphP, SolverConfigP, StatsP, TrailP,
    WatchlistsP,
};
use crate::prop::Reason;

/// Whether the deleted space in the arena justifies a collection.
pub fn should_collect(mut ctx: partial!(Context, ClauseAllocP, SolverConfigP)) -> bool {
    let alloc = ctx.part(ClauseAllocP);
    let tolerance = ctx.part(SolverConfigP).garbage_tolerance_factor;
    (alloc.garbage_words() as f64) > (alloc.buffer_size() as f64) * tolerance
}

/// Compact the clause arena by relocating all live clauses into the helper arena.
///
/// The reference lists of the database are cleared up front; the live clauses are still
/// reachable through the watch lists, which store every clause twice. On the first visit of a
/// clause it is simplified by dropping root-false literals (deleting it outright when a literal
/// is root-true), copied into the helper arena, and its new reference is left behind in the old
/// record as a relocation sentinel. The second visit recovers the new reference from the
/// sentinel. Reference lists are repopulated along the way and the arenas are swapped at the
/// end, giving a cost linear in the number of live literals.
///
/// Must run at the root with no pending propagation.
pub fn collect(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut StatsP,
        mut WatchlistsP,
        AssignmentP,
        SolverConfigP,
        TrailP,
    ),
) {
    assert_eq!(
        ctx.part(TrailP).current_level(),
        0,
        "garbage collection is only possible at the root"
    );

    let lbd_threshold = ctx.part(SolverConfigP).lbd_threshold;

    let (db, mut ctx) = ctx.split_part_mut(ClauseDbP);
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let (watchlists, mut ctx) = ctx.split_part_mut(WatchlistsP);
    let (impl_graph, mut ctx) = ctx.split_part_mut(ImplGraphP);
    let (assignment, mut ctx) = ctx.split_part(AssignmentP);

    db.permanent.clear();
    db.low_lbd.clear();
    db.temporary.clear();

    db.helper_alloc.clear();
    db.helper_alloc.set_limit(alloc.limit());

    for code in 0..watchlists.watch_count() {
        let lit = Lit::from_code(code);

        let mut write = 0;
        let mut read = 0;
        while read < watchlists.watched_by(lit).len() {
            let mut watch = watchlists.watched_by(lit)[read];
            read += 1;

            let header = alloc.header(watch.cref);
            if header.deleted() {
                continue;
            }

            if header.relocated() {
                // second visit: the sentinel holds the new location
                watch.cref = alloc.relocation(watch.cref);
                watchlists.watched_by_mut(lit)[write] = watch;
                write += 1;
                continue;
            }

            // first visit: simplify, copy and leave the sentinel behind
            let lits = alloc.clause_mut(watch.cref).lits_mut();
            let mut satisfied = false;
            let mut new_len = 0;
            for index in 0..lits.len() {
                let clause_lit = lits[index];
                match assignment.lit_value(clause_lit) {
                    Some(true) => {
                        satisfied = true;
                        break;
                    }
                    None => {
                        lits[new_len] = clause_lit;
                        new_len += 1;
                    }
                    Some(false) => {}
                }
            }

            if satisfied {
                alloc.delete_clause(watch.cref);
                continue;
            }

            // the watched pair is never root-false here, so it stays in front
            debug_assert!(new_len >= 2);
            alloc.shrink_clause(watch.cref, new_len);

            let new_cref = db.helper_alloc.add_clause_from(alloc, watch.cref);
            alloc.set_relocation(watch.cref, new_cref);

            let new_header = db.helper_alloc.header(new_cref);
            if !new_header.learned() {
                db.permanent.push(new_cref);
            } else if new_header.lbd() <= lbd_threshold {
                db.low_lbd.push(new_cref);
            } else {
                db.temporary.push(new_cref);
            }

            watch.cref = new_cref;
            watchlists.watched_by_mut(lit)[write] = watch;
            write += 1;
        }
        watchlists.watched_by_mut(lit).truncate(write);
    }

    // Reason codes must stay resolvable. A reason clause that was collected here was satisfied
    // at the root, which makes its assignment a plain root unit from now on.
    let (trail, mut ctx) = ctx.split_part(TrailP);
    for &lit in trail.trail() {
        if let Reason::Clause(cref) = *impl_graph.reason(lit.var()) {
            let new_reason = if alloc.header(cref).relocated() {
                Reason::Clause(alloc.relocation(cref))
            } else {
                Reason::Decision
            };
            impl_graph.update_reason(lit.var(), new_reason);
        }
    }

    swap(alloc, &mut db.helper_alloc);
    db.helper_alloc.clear();

    ctx.part_mut(StatsP).gc_runs += 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;
    use proptest::*;

    use marrow_formula::cnf::strategy::*;

    use crate::clause::db;
    use crate::context::set_var_count;

    proptest! {
        #[test]
        fn watches_resolve_after_collection(
            kept in cnf_formula(2..50usize, 5..100, 2..12),
            dropped in cnf_formula(2..50usize, 5..100, 2..12),
        ) {
            let mut ctx = Context::default();
            let mut ctx = ctx.into_partial_ref_mut();

            set_var_count(
                ctx.borrow(),
                kept.var_count().max(dropped.var_count()),
            );

            let mut dropped_refs = vec![];
            for lits in dropped.iter() {
                dropped_refs.push(db::add_permanent_clause(ctx.borrow(), lits));
            }
            let mut kept_count = 0;
            for lits in kept.iter() {
                db::add_permanent_clause(ctx.borrow(), lits);
                kept_count += 1;
            }
            for cref in dropped_refs {
                db::delete_clause(ctx.borrow(), cref);
            }

            let old_size = ctx.part(ClauseAllocP).buffer_size();
            collect(ctx.borrow());

            prop_assert!(ctx.part(ClauseAllocP).buffer_size() <= old_size);
            prop_assert_eq!(ctx.part(ClauseAllocP).garbage_words(), 0);
            prop_assert_eq!(ctx.part(ClauseDbP).permanent.len(), kept_count);

            // every watch resolves to a live clause watching the right literal
            for code in 0..ctx.part(WatchlistsP).watch_count() {
                let lit = Lit::from_code(code);
                for index in 0..ctx.part(WatchlistsP).watched_by(lit).len() {
                    let watch = ctx.part(WatchlistsP).watched_by(lit)[index];
                    let alloc = ctx.part(ClauseAllocP);
                    prop_assert!(!alloc.header(watch.cref).deleted());
                    let lits = alloc.clause(watch.cref).lits();
                    prop_assert!(lits[..2].contains(&!lit));
                    prop_assert!(lits.contains(&watch.blocking));
                }
            }
        }
    }
}
