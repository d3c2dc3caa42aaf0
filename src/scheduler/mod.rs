//! The module-side execution engine (§4.4): the `prepare → compute* → reduce` lifecycle, its
//! reduce/scheduling policies, animation-playback reordering, and bounded task-parallel compute.
//!
//! `ModuleScheduler` plays the role qsim's `Simulation::run` loop
//! (`src/simulation/simulation.rs`) plays for a timestep-driven engine, except the phases here
//! are driven by `Execute` control messages rather than a wall-clock tick, and a module's own
//! `prepared`/`reduced` flags are the state instead of an implicit loop counter.

pub mod block_task;
pub mod reorder;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VistleError};

/// Chosen per module (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReducePolicy {
    Never,
    Locally,
    OverAll,
    PerTimestep,
    PerTimestepOrdered,
    PerTimestepZeroFirst,
}

impl ReducePolicy {
    pub fn is_zero_first(self) -> bool {
        matches!(self, ReducePolicy::PerTimestepZeroFirst)
    }

    pub fn is_per_timestep(self) -> bool {
        reorder::permits_reordering(self)
    }
}

/// Chosen per module (§4.4); governs how `checkExecuteObject` dispatches a `ComputeObject`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingPolicy {
    Single,
    Gang,
    LazyGang,
}

/// Fraction of ranks with at least one pending object that triggers a `LazyGang` broadcast
/// (§4.3, S3: "2/5 = 40% > 20% threshold").
pub const LAZY_GANG_THRESHOLD: f64 = 0.20;

/// Tracks per-rank pending-object counts for a `LazyGang`-scheduled module (§4.3, §4.4).
#[derive(Debug, Clone)]
pub struct LazyGangCounters {
    per_rank: Vec<u32>,
}

impl LazyGangCounters {
    pub fn new(size: usize) -> Self {
        LazyGangCounters { per_rank: vec![0; size.max(1)] }
    }

    pub fn increment(&mut self, rank: usize) {
        self.per_rank[rank] += 1;
    }

    /// Whether enough ranks have work to justify a broadcast.
    pub fn threshold_reached(&self) -> bool {
        let ready = self.per_rank.iter().filter(|&&c| c > 0).count();
        (ready as f64) / (self.per_rank.len() as f64) >= LAZY_GANG_THRESHOLD
    }

    /// Decrements every non-zero counter by one, as happens once a broadcast fires (§4.3).
    pub fn drain_one(&mut self) {
        for count in &mut self.per_rank {
            if *count > 0 {
                *count -= 1;
            }
        }
    }

    /// Flushes every counter to zero, synthesizing the implied `ComputeObject` broadcasts so no
    /// object is left unprocessed at reduce time (§4.4).
    pub fn flush_to_zero(&mut self) -> u32 {
        let rounds = self.per_rank.iter().copied().max().unwrap_or(0);
        self.per_rank.iter_mut().for_each(|c| *c = 0);
        rounds
    }
}

/// A module's `prepare → compute* → reduce` state machine (§4.4).
///
/// `reduced` starts `true` and `prepared` starts `false`, matching the spec's initial condition
/// so the very first `Prepare` transition's assertion (`!prepared && reduced`) holds.
#[derive(Debug)]
pub struct ModuleScheduler {
    reduce_policy: ReducePolicy,
    scheduling_policy: SchedulingPolicy,
    num_timesteps: i32,
    prepared: bool,
    reduced: bool,
    cancelled: bool,
    cancel_hook_ran: bool,
}

impl ModuleScheduler {
    pub fn new(reduce_policy: ReducePolicy, scheduling_policy: SchedulingPolicy, num_timesteps: i32) -> Self {
        ModuleScheduler {
            reduce_policy,
            scheduling_policy,
            num_timesteps,
            prepared: false,
            reduced: true,
            cancelled: false,
            cancel_hook_ran: false,
        }
    }

    pub fn reduce_policy(&self) -> ReducePolicy {
        self.reduce_policy
    }

    pub fn scheduling_policy(&self) -> SchedulingPolicy {
        self.scheduling_policy
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_reduced(&self) -> bool {
        self.reduced
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn num_timesteps(&self) -> i32 {
        self.num_timesteps
    }

    /// `Prepare` transition: assert `!prepared && reduced`. A `Never`-policy module never takes
    /// part in the collective prepare/reduce rounds at all -- `checkExecuteObject` still dispatches
    /// its computes directly, so this is a no-op rather than an FSM violation.
    pub fn prepare(&mut self) -> Result<()> {
        if self.reduce_policy == ReducePolicy::Never {
            return Ok(());
        }
        if self.prepared || !self.reduced {
            return Err(VistleError::Fatal(
                "Prepare requires !prepared && reduced".to_string(),
            ));
        }
        self.prepared = true;
        self.reduced = false;
        self.cancelled = false;
        self.cancel_hook_ran = false;
        Ok(())
    }

    /// `ComputeObject` transition: assert `prepared`. Returns `false` without invoking the
    /// caller's compute hook if cancellation already took effect (§4.4).
    pub fn compute_object(&self) -> Result<bool> {
        if !self.prepared {
            return Err(VistleError::Fatal("ComputeObject requires prepared".to_string()));
        }
        Ok(!self.cancelled)
    }

    /// Sets the cancellation flag. The first call into this after it becomes effective should
    /// run the module's `cancelExecute()` hook exactly once; callers check
    /// [`ModuleScheduler::take_cancel_hook`] to know whether it's their turn.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Returns `true` exactly once per cancellation episode, telling the caller to run
    /// `cancelExecute()` now.
    pub fn take_cancel_hook(&mut self) -> bool {
        if self.cancelled && !self.cancel_hook_ran {
            self.cancel_hook_ran = true;
            true
        } else {
            false
        }
    }

    /// `Reduce` transition: assert `prepared && !reduced`. Returns the timesteps `reduce()`
    /// should be invoked for, in call order.
    pub fn reduce(&mut self) -> Result<Vec<i32>> {
        if !self.prepared || self.reduced {
            return Err(VistleError::Fatal(
                "Reduce requires prepared && !reduced".to_string(),
            ));
        }
        self.prepared = false;
        self.reduced = true;

        let timesteps = match self.reduce_policy {
            ReducePolicy::Never => Vec::new(),
            ReducePolicy::Locally | ReducePolicy::OverAll => vec![-1],
            ReducePolicy::PerTimestep | ReducePolicy::PerTimestepOrdered | ReducePolicy::PerTimestepZeroFirst => {
                let n = self.num_timesteps.max(0);
                let mut steps: Vec<i32> = (0..n).collect();
                if self.reduce_policy.is_zero_first() {
                    if let Some(pos) = steps.iter().position(|&t| t == 0) {
                        steps.remove(pos);
                        steps.insert(0, 0);
                    }
                }
                steps
            }
        };
        Ok(timesteps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_then_compute_then_reduce_follows_the_fsm() {
        let mut sched = ModuleScheduler::new(ReducePolicy::OverAll, SchedulingPolicy::Single, -1);
        assert!(sched.is_reduced());
        assert!(!sched.is_prepared());
        sched.prepare().unwrap();
        assert!(sched.compute_object().unwrap());
        let timesteps = sched.reduce().unwrap();
        assert_eq!(timesteps, vec![-1]);
        assert!(sched.is_reduced());
    }

    #[test]
    fn prepare_twice_without_reduce_is_rejected() {
        let mut sched = ModuleScheduler::new(ReducePolicy::OverAll, SchedulingPolicy::Single, -1);
        sched.prepare().unwrap();
        assert!(sched.prepare().is_err());
    }

    #[test]
    fn never_policy_prepare_is_a_no_op() {
        let mut sched = ModuleScheduler::new(ReducePolicy::Never, SchedulingPolicy::Single, -1);
        sched.prepare().unwrap();
        assert!(!sched.is_prepared());
        // Repeated calls stay harmless too, unlike every other policy.
        sched.prepare().unwrap();
        assert!(sched.reduce().is_err(), "a Never module is never prepared, so Reduce must still be rejected");
    }

    #[test]
    fn per_timestep_zero_first_orders_zero_before_the_rest() {
        let mut sched = ModuleScheduler::new(ReducePolicy::PerTimestepZeroFirst, SchedulingPolicy::Gang, 4);
        sched.prepare().unwrap();
        let timesteps = sched.reduce().unwrap();
        assert_eq!(timesteps[0], 0);
        assert_eq!(timesteps.len(), 4);
    }

    #[test]
    fn cancellation_suppresses_compute_and_fires_hook_once() {
        let mut sched = ModuleScheduler::new(ReducePolicy::OverAll, SchedulingPolicy::Single, -1);
        sched.prepare().unwrap();
        assert!(sched.compute_object().unwrap());
        sched.cancel();
        assert!(!sched.compute_object().unwrap());
        assert!(sched.take_cancel_hook());
        assert!(!sched.take_cancel_hook());
    }

    #[test]
    fn lazy_gang_threshold_matches_spec_scenario_s3() {
        // S3: 5 ranks, 2 have work -> 40% >= 20% threshold.
        let mut counters = LazyGangCounters::new(5);
        counters.increment(0);
        counters.increment(1);
        assert!(counters.threshold_reached());
        counters.drain_one();
        assert_eq!(counters.flush_to_zero(), 0);
    }

    #[test]
    fn lazy_gang_threshold_not_reached_below_20_percent() {
        let mut counters = LazyGangCounters::new(10);
        counters.increment(0);
        assert!(!counters.threshold_reached());
    }
}
