//! Object flow (§4.3): routing `ADD_OBJECT` from producer to consumer, and `checkExecuteObject`,
//! which decides when a module has enough pending input to fire a compute.

use crate::id::Id;
use crate::port::PortManager;
use crate::scheduler::{LazyGangCounters, SchedulingPolicy};

/// How a `ComputeObject` dispatch decided by [`check_execute_object`] should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// `Single`: unicast to the rank that owns the popped objects.
    Unicast,
    /// `Gang`: broadcast so every rank computes the same tuple in lockstep.
    Broadcast,
    /// `LazyGang` hasn't reached its threshold yet; nothing is dispatched this round.
    Deferred,
}

/// `checkExecuteObject(m)` (§4.3). `already_reducing` is the caller's half of the firing
/// condition ("not already running an execution-pending reduction"); this function owns the
/// other half (every connected non-`NOCOMPUTE` input has pending work) plus popping and
/// scheduling-policy dispatch.
///
/// For `LazyGang`, `rank` and `lazy_gang` drive the per-rank counter described in §4.3/§4.4;
/// pass `None` for `lazy_gang` when called from a rank other than 0, since only rank 0 owns the
/// counters.
pub fn check_execute_object(
    ports: &mut PortManager,
    module: Id,
    already_reducing: bool,
    policy: SchedulingPolicy,
    rank: usize,
    lazy_gang: Option<&mut LazyGangCounters>,
) -> Option<Dispatch> {
    if already_reducing || !ports.all_inputs_ready(module) {
        return None;
    }

    for port in ports.input_ports_of(module) {
        if ports.port(&port).map(|p| !p.is_nocompute() && !p.connections().is_empty()).unwrap_or(false) {
            ports.pop_front(&port);
        }
    }

    match policy {
        SchedulingPolicy::Single => Some(Dispatch::Unicast),
        SchedulingPolicy::Gang => Some(Dispatch::Broadcast),
        SchedulingPolicy::LazyGang => {
            let counters = lazy_gang.expect("LazyGang dispatch requires rank-0 counters");
            counters.increment(rank);
            if counters.threshold_reached() {
                counters.drain_one();
                Some(Dispatch::Broadcast)
            } else {
                Some(Dispatch::Deferred)
            }
        }
    }
}

/// Load-balances an incoming object's destination rank by block number (§4.3 consumer side
/// step 1): `block % size`, falling back to rank 0 for an unknown block on a local add, or
/// `None` (meaning broadcast) for an unknown block on a remote add.
pub fn dest_rank_for_block(block: Option<u32>, size: usize, is_local_add: bool) -> Option<i32> {
    match block {
        Some(b) => Some((b as usize % size.max(1)) as i32),
        None if is_local_add => Some(0),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectMeta;
    use crate::port::{Direction, PortFlags, PortKey};

    fn wire_ready_module(ports: &mut PortManager, module: Id) -> PortKey {
        let producer = PortKey::new(Id::new(2000), "out");
        let input = PortKey::new(module, "in");
        ports.add_port(producer.clone(), Direction::Output, PortFlags::NONE);
        ports.add_port(input.clone(), Direction::Input, PortFlags::NONE);
        ports.connect(producer.clone(), input.clone());
        ports.enqueue(&input, ObjectMeta::new("o1", producer.module, crate::message::Generation { execution_count: 0, iteration: 0 }));
        input
    }

    #[test]
    fn single_policy_dispatches_unicast_and_pops_the_queue() {
        let mut ports = PortManager::new();
        let module = Id::new(1000);
        let input = wire_ready_module(&mut ports, module);
        let dispatch = check_execute_object(&mut ports, module, false, SchedulingPolicy::Single, 0, None);
        assert_eq!(dispatch, Some(Dispatch::Unicast));
        assert_eq!(ports.pending_count(&input), 0);
    }

    #[test]
    fn lazy_gang_defers_until_threshold_then_broadcasts() {
        let mut ports = PortManager::new();
        let module = Id::new(1000);
        wire_ready_module(&mut ports, module);
        let mut counters = LazyGangCounters::new(10);
        let dispatch = check_execute_object(&mut ports, module, false, SchedulingPolicy::LazyGang, 0, Some(&mut counters));
        assert_eq!(dispatch, Some(Dispatch::Deferred));
    }

    #[test]
    fn dest_rank_for_block_load_balances_by_block_number() {
        assert_eq!(dest_rank_for_block(Some(5), 4, false), Some(1));
        assert_eq!(dest_rank_for_block(None, 4, true), Some(0));
        assert_eq!(dest_rank_for_block(None, 4, false), None);
    }
}
