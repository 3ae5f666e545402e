//! Restart policy and clause database maintenance.
//!
//! Three restart strategies are supported. Luby and constant restarts fire whenever their
//! conflict budget is used up. Glucose restarts compare a windowed moving average of recent
//! learned-clause LBDs against the cumulative average and fire when recent clauses are markedly
//! worse; they are blocked while the trail is much longer than usual, since the solver is then
//! probably close to a satisfying assignment.
//!
//! A restart normally backs off only to the assumption depth. When the temporary clause pool
//! overflows the solver escapes to the root instead, since clause cleanup (and a possible
//! garbage collection) can only run there.
mod averages;
mod luby;

use log::info;

use partial_ref::{partial, PartialRef};

use crate::clause::{gc, reduce};
use crate::config::{RestartStrategy, SolverConfig};
use crate::context::{
    AssignmentP, ClauseAllocP, ClauseDbP, Context, CpP, CpPropagatorsP, DomainsP, ImplGraphP,
    IntMapP, PhasesP, ScheduleP, SolverConfigP, StatsP, TrailP, VsidsP, WatchlistsP,
};
use crate::prop::backtrack;

use averages::{CumulativeMovingAverage, SimpleMovingAverage};
use luby::LubySequence;

/// Restart policy state.
pub struct Schedule {
    /// Conflicts left until the next restart may fire.
    pub conflicts_until_restart: i64,
    luby: LubySequence,
    lbd_fast: SimpleMovingAverage,
    trail_slow: SimpleMovingAverage,
    lbd_cumulative: CumulativeMovingAverage,
}

impl Default for Schedule {
    fn default() -> Schedule {
        let config = SolverConfig::default();
        Schedule {
            conflicts_until_restart: config.num_min_conflicts_per_restart as i64,
            luby: LubySequence::default(),
            lbd_fast: SimpleMovingAverage::new(config.glucose_queue_lbd_limit),
            trail_slow: SimpleMovingAverage::new(config.glucose_queue_reset_limit),
            lbd_cumulative: CumulativeMovingAverage::default(),
        }
    }
}

impl Schedule {
    /// Apply changed window sizes from the configuration.
    pub fn configure(&mut self, config: &SolverConfig) {
        self.lbd_fast = SimpleMovingAverage::new(config.glucose_queue_lbd_limit);
        self.trail_slow = SimpleMovingAverage::new(config.glucose_queue_reset_limit);
    }

    /// Feed the moving averages after a conflict was analyzed.
    pub fn note_conflict(&mut self, lbd: u32, trail_len: usize) {
        self.lbd_fast.add_term(lbd as u64);
        self.lbd_cumulative.add_term(lbd as u64);
        self.trail_slow.add_term(trail_len as u64);
    }
}

/// Whether a restart should happen now.
pub fn should_restart(
    mut ctx: partial!(Context, mut ScheduleP, mut StatsP, SolverConfigP, TrailP),
) -> bool {
    // restarting at the root would only repeat the same work
    if ctx.part(TrailP).current_level() == 0 {
        return false;
    }
    if ctx.part(ScheduleP).conflicts_until_restart > 0 {
        return false;
    }

    let config = ctx.part(SolverConfigP);
    match config.restart_strategy {
        RestartStrategy::Luby | RestartStrategy::Constant => true,
        RestartStrategy::Glucose => {
            let min_conflicts = config.num_min_conflicts_per_restart as i64;
            let trail_len = ctx.part(TrailP).len() as f64;
            let total_conflicts = ctx.part(StatsP).conflicts;
            let (schedule, mut ctx) = ctx.split_part_mut(ScheduleP);

            // block the restart when the assignment is unusually long
            if total_conflicts >= 10000
                && schedule.trail_slow.is_covered()
                && trail_len > 1.4 * schedule.trail_slow.value()
            {
                ctx.part_mut(StatsP).blocked_restarts += 1;
                schedule.conflicts_until_restart = min_conflicts;
                schedule.lbd_fast.reset();
                return false;
            }

            // is the solver currently learning bad clauses?
            if schedule.lbd_fast.is_covered()
                && schedule.lbd_fast.value() * 0.8 > schedule.lbd_cumulative.value()
            {
                schedule.lbd_fast.reset();
                schedule.conflicts_until_restart = min_conflicts;
                true
            } else {
                false
            }
        }
    }
}

/// Restart the search and recharge the conflict budget.
///
/// Backs off to the assumption depth, except when the temporary clause pool overflowed: cleanup
/// needs the root, so the restart escapes there, reduces the pool and possibly collects
/// garbage.
pub fn perform_restart(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut CpP,
        mut CpPropagatorsP,
        mut DomainsP,
        mut ImplGraphP,
        mut PhasesP,
        mut ScheduleP,
        mut StatsP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        IntMapP,
        SolverConfigP,
    ),
    num_assumptions: usize,
) {
    let pool_overflow = ctx.part(ClauseDbP).temporary.len()
        >= ctx.part(SolverConfigP).limit_num_temporary_clauses;

    if pool_overflow {
        ctx.part_mut(StatsP).clause_cleanups += 1;
        backtrack(ctx.borrow(), 0);

        reduce::promote_and_reduce(ctx.borrow());

        if gc::should_collect(ctx.borrow()) {
            gc::collect(ctx.borrow());
        }
    } else {
        let restart_level = num_assumptions;
        if restart_level < ctx.part(TrailP).current_level() {
            backtrack(ctx.borrow(), restart_level);
        }
    }

    ctx.part_mut(StatsP).restarts += 1;

    let stats = *ctx.part(StatsP);
    if stats.restarts % 500 == 0 {
        let db = ctx.part(ClauseDbP);
        info!(
            "confl: {}k rest: {} vars: {} perm: {} low-lbd: {} temp: {}",
            stats.conflicts / 1000,
            stats.restarts,
            ctx.part(AssignmentP).var_count(),
            db.permanent.len(),
            db.low_lbd.len(),
            db.temporary.len(),
        );
    }

    let config = ctx.part(SolverConfigP);
    let restart_coefficient = config.restart_coefficient as i64;
    let min_conflicts = config.num_min_conflicts_per_restart as i64;
    let strategy = config.restart_strategy;

    let schedule = ctx.part_mut(ScheduleP);
    schedule.conflicts_until_restart = match strategy {
        RestartStrategy::Luby => schedule.luby.advance() as i64 * restart_coefficient,
        RestartStrategy::Constant => restart_coefficient,
        RestartStrategy::Glucose => min_conflicts,
    };
}
