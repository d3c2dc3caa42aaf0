//! Animation-playback reordering (§4.4): when a full `ComputeExecute` runs outside the normal
//! data-flow, cached input tuples are resorted by timestep so the module sees them in playback
//! order instead of arrival order.

use crate::scheduler::ReducePolicy;

/// Computes the visiting order for a set of timesteps under the animation-reordering rule.
///
/// `timesteps` are the distinct timesteps present across the cached input tuples (objects
/// without a timestep, i.e. `timestep < 0`, are reported separately and always visited first).
/// `start` is the requested starting timestep, `forward` is the sign of `animationStepDuration`,
/// and `zero_first` comes from [`ReducePolicy::PerTimestepZeroFirst`].
///
/// Returns the timesteps in visit order (excluding the "no timestep" bucket, which the caller
/// always drains before consulting this).
pub fn visiting_order(mut timesteps: Vec<i32>, start: i32, forward: bool, zero_first: bool) -> Vec<i32> {
    timesteps.sort_unstable();
    timesteps.dedup();
    if timesteps.is_empty() {
        return timesteps;
    }

    let start_idx = timesteps
        .iter()
        .position(|&t| t == start)
        .unwrap_or(0);

    let n = timesteps.len();
    let mut order = Vec::with_capacity(n);

    if zero_first {
        if let Some(zero_idx) = timesteps.iter().position(|&t| t == 0) {
            order.push(timesteps[zero_idx]);
        }
    }

    for step in 0..n {
        let idx = if forward {
            (start_idx + step) % n
        } else {
            (start_idx + n - (step % n)) % n
        };
        let t = timesteps[idx];
        if zero_first && t == 0 {
            continue;
        }
        order.push(t);
    }

    order
}

/// Head-start timestep count used to pick a later-than-requested starting point so a module with
/// nonzero per-timestep compute latency stays caught up with a moving playhead (§4.4).
pub fn head_start(avg_compute_time_secs: f64, step_duration_secs: f64, zero_first: bool) -> i32 {
    if step_duration_secs <= 0.0 {
        return 0;
    }
    let raw = (avg_compute_time_secs / step_duration_secs).ceil();
    let raw = if zero_first { raw * 2.0 } else { raw };
    raw as i32
}

/// Whether `policy` permits per-timestep reduction, and therefore whether reordering applies.
pub fn permits_reordering(policy: ReducePolicy) -> bool {
    matches!(
        policy,
        ReducePolicy::PerTimestep | ReducePolicy::PerTimestepOrdered | ReducePolicy::PerTimestepZeroFirst
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_in_forward_order_with_wraparound() {
        // S5: timesteps {2,0,3,1}, start=2, forward, not zero_first -> 2,3,0,1
        let order = visiting_order(vec![2, 0, 3, 1], 2, true, false);
        assert_eq!(order, vec![2, 3, 0, 1]);
    }

    #[test]
    fn zero_first_is_visited_before_the_rest() {
        let order = visiting_order(vec![2, 0, 3, 1], 2, true, true);
        assert_eq!(order[0], 0);
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn reverse_direction_wraps_backward() {
        let order = visiting_order(vec![0, 1, 2, 3], 1, false, false);
        assert_eq!(order, vec![1, 0, 3, 2]);
    }

    #[test]
    fn only_per_timestep_policies_permit_reordering() {
        assert!(permits_reordering(ReducePolicy::PerTimestep));
        assert!(permits_reordering(ReducePolicy::PerTimestepOrdered));
        assert!(permits_reordering(ReducePolicy::PerTimestepZeroFirst));
        assert!(!permits_reordering(ReducePolicy::Never));
        assert!(!permits_reordering(ReducePolicy::OverAll));
    }
}
