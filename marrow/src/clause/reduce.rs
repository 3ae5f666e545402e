//! Clause database reduction.
use std::cmp::Ordering;
use std::mem::take;

use partial_ref::{partial, PartialRef};

use vec_mut_scan::VecMutScan;

use crate::context::{ClauseAllocP, ClauseDbP, Context, SolverConfigP, StatsP, WatchlistsP};

use super::db::ClauseDb;

/// Promote good temporary clauses and delete the worst half of the rest.
///
/// Temporary clauses whose LBD dropped to the configured threshold move into the low-LBD tier
/// and are kept indefinitely. The remaining temporary clauses are sorted so that the most useful
/// ones come first and the worst half is deleted, except for clauses whose LBD improved since
/// the previous reduction; those are spared once and lose their protection.
///
/// Must be called at the root, as deleting a clause that is a reason of a non-root assignment
/// would leave a dangling reason code.
pub fn promote_and_reduce(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut StatsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) {
    let (db, mut ctx) = ctx.split_part_mut(ClauseDbP);
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let (watchlists, mut ctx) = ctx.split_part_mut(WatchlistsP);
    let config = ctx.part(SolverConfigP);

    let lbd_threshold = config.lbd_threshold;

    // promote and drop stale references in one pass
    let ClauseDb {
        low_lbd, temporary, ..
    } = db;

    let mut scan = VecMutScan::new(temporary);
    while let Some(cref) = scan.next() {
        let header = alloc.header(*cref);
        if header.deleted() {
            cref.remove();
        } else if header.lbd() <= lbd_threshold {
            low_lbd.push(*cref);
            cref.remove();
        }
    }
    drop(scan);

    if config.lbd_sorting_temporary_clauses {
        let alloc_ref = &*alloc;
        db.temporary.sort_unstable_by(|&a, &b| {
            let header_a = alloc_ref.header(a);
            let header_b = alloc_ref.header(b);

            // binary clauses first, then by LBD, ties broken by activity
            (header_a.len() > 2)
                .cmp(&(header_b.len() > 2))
                .then(header_a.lbd().cmp(&header_b.lbd()))
                .then_with(|| {
                    alloc_ref
                        .activity(b)
                        .partial_cmp(&alloc_ref.activity(a))
                        .unwrap_or(Ordering::Equal)
                })
        });
    } else {
        let alloc_ref = &*alloc;
        db.temporary.sort_unstable_by(|&a, &b| {
            alloc_ref
                .activity(b)
                .partial_cmp(&alloc_ref.activity(a))
                .unwrap_or(Ordering::Equal)
        });
    }

    let keep_target = config.limit_num_temporary_clauses / 2;
    let stats = ctx.part_mut(StatsP);

    let mut index = db.temporary.len();
    while index > 0 && db.temporary.len() > keep_target {
        index -= 1;
        let cref = db.temporary[index];
        let header = alloc.header_mut(cref);
        if header.protected() {
            header.set_protected(false);
        } else {
            let lits = alloc.clause(cref).lits();
            let watched = [lits[0], lits[1]];
            watchlists.unwatch_clause(cref, watched);
            alloc.delete_clause(cref);
            db.temporary.swap_remove(index);
            stats.removed_clauses += 1;
        }
    }
}

/// Delete all learned clauses.
///
/// Used when rewinding the solver to a saved state point.
pub fn remove_all_learned(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut StatsP, mut WatchlistsP),
) {
    let (db, mut ctx) = ctx.split_part_mut(ClauseDbP);
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let (watchlists, mut ctx) = ctx.split_part_mut(WatchlistsP);
    let stats = ctx.part_mut(StatsP);

    for cref in take(&mut db.low_lbd)
        .into_iter()
        .chain(take(&mut db.temporary))
    {
        if alloc.header(cref).deleted() {
            continue;
        }
        let lits = alloc.clause(cref).lits();
        let watched = [lits[0], lits[1]];
        watchlists.unwatch_clause(cref, watched);
        alloc.delete_clause(cref);
        stats.removed_clauses += 1;
    }
}
