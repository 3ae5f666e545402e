//! Time-table propagator for the cumulative scheduling constraint.
use partial_ref::PartialRef;

use rustc_hash::FxHashMap;

use marrow_formula::Lit;

use crate::context::{AssignmentP, DomainsP, IntMapP, TrailP};
use crate::integer::IntVar;
use crate::prop::{enqueue_assignment, Reason};

use super::{Inconsistent, PropContext, Propagator, PropagatorId, ReadContext, Subscription};

/// One task of a cumulative constraint.
#[derive(Copy, Clone, Debug)]
pub struct CumulativeTask {
    pub start_time: IntVar,
    pub duration: i64,
    pub resource_usage: i64,
}

/// Time-table propagator for `cumulative`.
///
/// Maintains the compulsory-part profile: a task whose start window `[lb, ub]` is narrower than
/// its duration necessarily runs during `[ub, lb + duration)`, and those mandatory segments are
/// summed per time point. A profile value above the capacity is a conflict. Otherwise start
/// times are pruned: a task that would overlap a time point where the profile leaves no room for
/// it must start after that point. Explanations are pointwise over the mandatory parts at the
/// blocking time.
pub struct CumulativePropagator {
    tasks: Vec<CumulativeTask>,
    capacity: i64,
    horizon: i64,
    id: Option<PropagatorId>,
    profile: Vec<i64>,
    /// Mandatory interval `[start, end)` per task; empty when `start >= end`.
    mandatory: Vec<(i64, i64)>,
    explanations: FxHashMap<usize, Vec<Lit>>,
    failure: Vec<Lit>,
}

impl CumulativePropagator {
    /// Creates a propagator for tasks sharing a resource of the given capacity on the time
    /// horizon `[0, horizon)`.
    pub fn new(tasks: Vec<CumulativeTask>, capacity: i64, horizon: i64) -> CumulativePropagator {
        let tasks: Vec<_> = tasks
            .into_iter()
            .filter(|task| task.resource_usage > 0)
            .collect();
        for task in &tasks {
            assert!(task.duration > 0 && task.resource_usage <= capacity);
        }
        let task_count = tasks.len();
        CumulativePropagator {
            tasks,
            capacity,
            horizon,
            id: None,
            profile: vec![0; horizon as usize],
            mandatory: vec![(0, 0); task_count],
            explanations: FxHashMap::default(),
            failure: vec![],
        }
    }

    fn rebuild_profile(&mut self, mut ctx: PropContext) {
        for slot in self.profile.iter_mut() {
            *slot = 0;
        }
        for (index, task) in self.tasks.iter().enumerate() {
            let lower = ctx.part(DomainsP).lower_bound(task.start_time);
            let upper = ctx.part(DomainsP).upper_bound(task.start_time);
            let start = upper;
            let end = (lower + task.duration).min(self.horizon);
            self.mandatory[index] = (start, end);
            for time in start..end {
                self.profile[time as usize] += task.resource_usage;
            }
        }
    }

    fn mandatory_covers(&self, index: usize, time: i64) -> bool {
        let (start, end) = self.mandatory[index];
        start <= time && time < end
    }

    /// Bound literals of tasks whose mandatory part covers `time`, in task order, until their
    /// usage exceeds the given budget.
    fn push_profile_explanation(
        &self,
        mut ctx: PropContext,
        time: i64,
        budget: i64,
        skip: Option<usize>,
        out: &mut Vec<Lit>,
    ) {
        let mut collected = 0;
        for (index, task) in self.tasks.iter().enumerate() {
            if collected > budget {
                break;
            }
            if Some(index) == skip || !self.mandatory_covers(index, time) {
                continue;
            }
            collected += task.resource_usage;

            let lower = ctx.part(DomainsP).lower_bound(task.start_time);
            let upper = ctx.part(DomainsP).upper_bound(task.start_time);
            out.push(!ctx.part(IntMapP).lower_bound_lit(task.start_time, lower));
            out.push(!ctx.part(IntMapP).upper_bound_lit(task.start_time, upper));
        }
    }

    fn propagate_time_table(&mut self, mut ctx: PropContext) -> Result<(), Inconsistent> {
        self.rebuild_profile(ctx.borrow());

        // overload of the compulsory parts alone is a conflict
        for time in 0..self.horizon {
            if self.profile[time as usize] > self.capacity {
                let mut failure = std::mem::take(&mut self.failure);
                failure.clear();
                self.push_profile_explanation(
                    ctx.borrow(),
                    time,
                    self.capacity,
                    None,
                    &mut failure,
                );
                self.failure = failure;
                return Err(Inconsistent);
            }
        }

        let id = self.id.expect("propagator not registered");

        for index in 0..self.tasks.len() {
            let task = self.tasks[index];
            let lower = ctx.part(DomainsP).lower_bound(task.start_time);
            let upper = ctx.part(DomainsP).upper_bound(task.start_time);
            if lower == upper {
                continue;
            }

            // sweep the execution window of the earliest start over the profile; every blocked
            // time point pushes the start past it, one propagation per step
            let mut current_bound = lower;
            let mut time = current_bound;
            while time < (current_bound + task.duration).min(self.horizon) {
                let blocked = !self.mandatory_covers(index, time)
                    && self.profile[time as usize] + task.resource_usage > self.capacity;
                if !blocked {
                    time += 1;
                    continue;
                }

                let new_bound = time + 1;
                if new_bound > upper {
                    // the task no longer fits anywhere
                    let mut failure = std::mem::take(&mut self.failure);
                    failure.clear();
                    let previous = ctx.part(IntMapP).lower_bound_lit(task.start_time, current_bound);
                    failure.push(!previous);
                    failure.push(!ctx.part(IntMapP).upper_bound_lit(task.start_time, upper));
                    self.push_profile_explanation(
                        ctx.borrow(),
                        time,
                        self.capacity - task.resource_usage,
                        Some(index),
                        &mut failure,
                    );
                    self.failure = failure;
                    return Err(Inconsistent);
                }

                let lit = ctx.part(IntMapP).lower_bound_lit(task.start_time, new_bound);
                if ctx.part(AssignmentP).lit_is_unk(lit) {
                    enqueue_assignment(ctx.borrow(), lit, Reason::Propagator(id));

                    let mut explanation = vec![lit];
                    let previous =
                        ctx.part(IntMapP).lower_bound_lit(task.start_time, current_bound);
                    explanation.push(!previous);
                    self.push_profile_explanation(
                        ctx.borrow(),
                        time,
                        self.capacity - task.resource_usage,
                        Some(index),
                        &mut explanation,
                    );
                    self.explanations.insert(lit.code(), explanation);
                }

                current_bound = new_bound;
                time = current_bound;
            }
        }

        Ok(())
    }
}

impl Propagator for CumulativePropagator {
    fn priority(&self) -> usize {
        1
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        self.tasks
            .iter()
            .map(|task| Subscription {
                var: task.start_time,
                lower_bound: true,
                upper_bound: true,
                removal: false,
            })
            .collect()
    }

    fn initialize_at_root(
        &mut self,
        id: PropagatorId,
        mut ctx: PropContext,
    ) -> Result<(), Inconsistent> {
        self.id = Some(id);
        self.propagate_time_table(ctx.borrow())
    }

    fn propagate(&mut self, mut ctx: PropContext) -> Result<(), Inconsistent> {
        self.propagate_time_table(ctx.borrow())
    }

    fn propagate_from_scratch(&mut self, mut ctx: PropContext) -> Result<(), Inconsistent> {
        self.propagate_time_table(ctx.borrow())
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
        if ctx.part(TrailP).current_level() == 0 {
            self.explanations.clear();
        }
    }
}
