//! Propagation of clauses through the watch lists.
use partial_ref::{partial, PartialRef};

use crate::context::{AssignmentP, ClauseAllocP, Context, ImplGraphP, TrailP, WatchlistsP};
use marrow_formula::Lit;

use super::enqueue_assignment;
use super::{Conflict, Reason, Watch};

/// Propagate all literals implied by clauses watched by the given literal.
///
/// On conflict returns the clause propagating the conflicting assignment.
///
/// See [`prop::watch`](crate::prop::watch) for the invariants that this has to uphold. The watch
/// list is rewritten in place with a read and a write cursor: kept watches are compacted towards
/// the front and the list is truncated at the end of the scan.
pub fn propagate_long(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lit: Lit,
) -> Result<(), Conflict> {
    let (watchlists, mut ctx) = ctx.split_part_mut(WatchlistsP);
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);

    let false_lit = !lit;

    let mut read = 0;
    let mut write = 0;

    'watchers: while read < watchlists.watched_by(lit).len() {
        let watch = watchlists.watched_by(lit)[read];
        read += 1;

        // If the blocking literal (which is part of the watched clause) is already true, the
        // watched clause is satisfied and we don't even have to look at it.
        if ctx.part(AssignmentP).lit_is_true(watch.blocking) {
            watchlists.watched_by_mut(lit)[write] = watch;
            write += 1;
            continue;
        }

        let cref = watch.cref;
        let clause_lits = alloc.clause_mut(cref).lits_mut();

        // Ensure that the literal we're currently propagating is at index 1. This prepares the
        // literal order for further propagations, as the propagating literal has to be at
        // index 0.
        if clause_lits[0] == false_lit {
            clause_lits.swap(0, 1);
        }

        let first = clause_lits[0];

        // Create a new watch with the other watched literal as blocking literal. This will
        // either replace the currently processed watch or be added to another literal's watch
        // list.
        let new_watch = Watch {
            cref,
            blocking: first,
        };

        // If the other watched literal (now the first) isn't the blocking literal, check
        // whether that one is true. If so nothing else needs to be done.
        if first != watch.blocking && ctx.part(AssignmentP).lit_is_true(first) {
            watchlists.watched_by_mut(lit)[write] = new_watch;
            write += 1;
            continue;
        }

        // Try to find a non-false unwatched literal to replace our current literal as the
        // watched literal.
        let mut replacement = None;
        for pos in 2..clause_lits.len() {
            if !ctx.part(AssignmentP).lit_is_false(clause_lits[pos]) {
                replacement = Some(pos);
                break;
            }
        }

        if let Some(pos) = replacement {
            // We found a non-false literal and make it a watched literal by reordering the
            // literals and adding the watch to the corresponding watchlist.
            let replacement_lit = clause_lits[pos];
            clause_lits[1] = replacement_lit;
            clause_lits[pos] = false_lit;

            debug_assert_ne!(!replacement_lit, lit);
            watchlists.add_watch(!replacement_lit, new_watch);
            continue 'watchers;
        }

        // We didn't find a non-false unwatched literal, so either we're propagating or we have
        // a conflict.
        watchlists.watched_by_mut(lit)[write] = new_watch;
        write += 1;

        if ctx.part(AssignmentP).lit_is_false(first) {
            // Move all unprocessed watches and truncate the current watchlist.
            while read < watchlists.watched_by(lit).len() {
                let pending = watchlists.watched_by(lit)[read];
                watchlists.watched_by_mut(lit)[write] = pending;
                read += 1;
                write += 1;
            }
            watchlists.watched_by_mut(lit).truncate(write);

            return Err(Conflict::Clause(cref));
        }

        // Otherwise we enqueue a new propagation.
        enqueue_assignment(ctx.borrow(), first, Reason::Clause(cref));
    }

    watchlists.watched_by_mut(lit).truncate(write);

    Ok(())
}
