//! End-to-end routing scenarios driven through the real `ClusterManager::handle` entry point and
//! a channel-backed cluster, rather than through the per-module unit tests in `src/`. Named after
//! the scenarios they cover; `S3` (lazy-gang threshold) and `S5` (per-timestep reorder) are
//! already exercised at the unit level in `scheduler::{mod, reorder}` and are not repeated here.

use std::sync::Arc;

use vistle_core::cluster_manager::ClusterManager;
use vistle_core::communicator::local_transport::ChannelCommunicator;
use vistle_core::data_manager::DataManager;
use vistle_core::id::Id;
use vistle_core::message::{
    AddObject, AddObjectFlag, Barrier, BarrierReached, Body, Connect, Generation, Message, MessageType, SendText, SendTextKind, Spawn,
};
use vistle_core::scheduler::SchedulingPolicy;

const HUB: i32 = 10;

fn spawn_and_connect(cm: &mut ClusterManager<ChannelCommunicator>, hub: Id, a: Id, b: Id) {
    cm.handle(Message::new(Id::UI, 0, b, -1, Body::Spawn(Spawn { module_name: "B".into(), spawn_id: b, hub_id: hub })))
        .unwrap();
    cm.handle(Message::new(
        Id::UI,
        0,
        a,
        -1,
        Body::Connect(Connect { a_module: a, a_port: "out".into(), b_module: b, b_port: "in".into() }),
    ))
    .unwrap();
}

fn add_object(a: Id, b: Id, rank: i32, flag: AddObjectFlag, object_name: &str) -> Message {
    let body = AddObject {
        sender_port: "out".into(),
        dest_port: "in".into(),
        object_name: object_name.into(),
        generation: Generation { execution_count: 1, iteration: 0 },
        producer_rank: rank,
        block: None,
        timestep: -1,
        flag,
    };
    Message::new(a, rank, b, -1, Body::AddObject(body))
}

/// S1: simple unicast compute. A produces "O1" on rank 0; B (Single policy) must see its
/// compute dispatched exactly once, and nothing else shows up in its outbox.
#[test]
fn s1_simple_unicast_compute() {
    let (mut comms, _senders) = ChannelCommunicator::cluster(1);
    let comm = comms.remove(0);
    let data_manager = Arc::new(DataManager::new(Id::new(HUB), 0));
    let mut cm = ClusterManager::new(comm, Id::new(HUB), data_manager);

    let a = Id::new(1000);
    let b = Id::new(1001);
    spawn_and_connect(&mut cm, Id::new(HUB), a, b);
    cm.register_scheduling_policy(b, SchedulingPolicy::Single);

    cm.handle(add_object(a, b, 0, AddObjectFlag::Normal, "O1")).unwrap();

    // B first sees the ADD_OBJECT notification itself, then the EXECUTE it triggers.
    let (notified, _) = cm.running_mut().get_mut(b).unwrap().pop_outgoing().expect("B should see the object arrive");
    assert_eq!(notified.kind(), MessageType::AddObject);
    let (dispatched, _) = cm.running_mut().get_mut(b).unwrap().pop_outgoing().expect("B should have been dispatched");
    assert_eq!(dispatched.kind(), MessageType::Execute);
    assert_eq!(dispatched.dest_id, b);
    assert!(cm.running_mut().get_mut(b).unwrap().pop_outgoing().is_none(), "B must not compute a second time");
}

/// S2: Gang execution. A produces "O1" on rank 0 of a 4-rank job; B (Gang policy) must fire on
/// every rank exactly once, via the broadcast round-trip through `ALREADY_BROADCAST`.
#[test]
fn s2_gang_execution_fires_on_every_rank() {
    let (comms, _senders) = ChannelCommunicator::cluster(4);
    let a = Id::new(1000);
    let b = Id::new(1001);
    let hub = Id::new(HUB);

    let mut managers: Vec<ClusterManager<ChannelCommunicator>> = comms
        .into_iter()
        .map(|comm| {
            let data_manager = Arc::new(DataManager::new(hub, comm.rank()));
            let mut cm = ClusterManager::new(comm, hub, data_manager);
            spawn_and_connect(&mut cm, hub, a, b);
            cm.register_scheduling_policy(b, SchedulingPolicy::Gang);
            cm
        })
        .collect();

    managers[0].handle(add_object(a, b, 0, AddObjectFlag::Normal, "O1")).unwrap();

    for cm in managers.iter_mut() {
        let msg = cm.recv().unwrap();
        cm.handle(msg).unwrap();
    }

    for (rank, cm) in managers.iter_mut().enumerate() {
        // Rank 0 additionally saw the local ADD_OBJECT notification before the broadcast Execute.
        if rank == 0 {
            let (notified, _) = cm.running_mut().get_mut(b).unwrap().pop_outgoing().expect("rank 0 should see the object arrive");
            assert_eq!(notified.kind(), MessageType::AddObject);
        }
        let (dispatched, _) = cm.running_mut().get_mut(b).unwrap().pop_outgoing().expect("B should compute on every rank");
        assert_eq!(dispatched.kind(), MessageType::Execute);
        assert!(cm.running_mut().get_mut(b).unwrap().pop_outgoing().is_none(), "only one compute per rank");
    }
}

/// S4: Blocker/Unblocking pair. A remote object arrives flagged `Blocker`, holding B's delivery
/// back; a subsequent `Normal` add queues behind it; the matching `Unblocking` releases both, in
/// order.
#[test]
fn s4_blocker_then_unblocking_releases_in_order() {
    let (mut comms, _senders) = ChannelCommunicator::cluster(1);
    let comm = comms.remove(0);
    let data_manager = Arc::new(DataManager::new(Id::new(HUB), 0));
    let mut cm = ClusterManager::new(comm, Id::new(HUB), data_manager);

    let a = Id::new(2000);
    let b = Id::new(2001);
    cm.handle(Message::new(Id::UI, 0, b, -1, Body::Spawn(Spawn { module_name: "B".into(), spawn_id: b, hub_id: Id::new(HUB) })))
        .unwrap();

    let blocker = add_object(a, b, 0, AddObjectFlag::Blocker, "O_R");
    let blocker_uuid = blocker.uuid;
    cm.handle(blocker).unwrap();

    assert!(cm.running_mut().get_mut(b).unwrap().pop_outgoing().is_none(), "blocked object must not be delivered yet");

    let queued = add_object(a, b, 0, AddObjectFlag::Normal, "O_other");
    cm.handle(queued).unwrap();
    assert!(cm.running_mut().get_mut(b).unwrap().pop_outgoing().is_none(), "queued add must wait behind the blocker too");

    let mut unblocking = add_object(a, b, 0, AddObjectFlag::Unblocking, "O_R");
    unblocking.uuid = blocker_uuid;
    cm.handle(unblocking).unwrap();

    let (first, _) = cm.running_mut().get_mut(b).unwrap().pop_outgoing().expect("the blocker release should be delivered first");
    assert_eq!(first.kind(), MessageType::AddObject);
    let (second, _) = cm.running_mut().get_mut(b).unwrap().pop_outgoing().expect("the queued add should follow");
    assert_eq!(second.kind(), MessageType::AddObject);
    assert!(cm.running_mut().get_mut(b).unwrap().pop_outgoing().is_none());
}

/// S6: while a module awaits the master hub's barrier release, a `SEND_TEXT` it emits must be
/// buffered rather than delivered, and only drains once the master sends `BARRIER_REACHED`.
#[test]
fn s6_barrier_buffers_messages_from_a_reached_module_until_release() {
    let (mut comms, _senders) = ChannelCommunicator::cluster(1);
    let comm = comms.remove(0);
    let data_manager = Arc::new(DataManager::new(Id::new(HUB), 0));
    let mut cm = ClusterManager::new(comm, Id::new(HUB), data_manager);

    let reporter = Id::new(3000);
    let relay = Id::new(3001);
    let uuid = [5u8; 16];

    cm.handle(Message::new(Id::UI, 0, relay, -1, Body::Spawn(Spawn { module_name: "Relay".into(), spawn_id: relay, hub_id: Id::new(HUB) })))
        .unwrap();
    cm.handle(Message::new(Id::UI, 0, reporter, -1, Body::Spawn(Spawn { module_name: "Reporter".into(), spawn_id: reporter, hub_id: Id::new(HUB) })))
        .unwrap();

    cm.handle(Message::new(Id::MASTER_HUB, 0, Id::BROADCAST, -1, Body::Barrier(Barrier { uuid }))).unwrap();
    assert!(cm.barrier_is_active());
    // Drain the BARRIER fan-out both locally-spawned modules received so it doesn't shadow the
    // SEND_TEXT delivery below.
    cm.running_mut().get_mut(relay).unwrap().pop_outgoing();
    cm.running_mut().get_mut(reporter).unwrap().pop_outgoing();

    cm.handle(Message::new(reporter, 0, Id::BROADCAST, -1, Body::BarrierReached(BarrierReached { uuid }))).unwrap();

    cm.handle(Message::new(
        reporter,
        0,
        relay,
        -1,
        Body::SendText(SendText { kind: SendTextKind::Info, module: reporter, text: "still waiting".into() }),
    ))
    .unwrap();
    assert!(
        cm.running_mut().get_mut(relay).unwrap().pop_outgoing().is_none(),
        "a message from a module that already reached the barrier must be held back"
    );

    cm.handle(Message::new(Id::MASTER_HUB, 0, Id::BROADCAST, -1, Body::BarrierReached(BarrierReached { uuid })))
        .unwrap();
    assert!(!cm.barrier_is_active());

    let (replayed, _) = cm.running_mut().get_mut(relay).unwrap().pop_outgoing().expect("the buffered SEND_TEXT must be replayed after release");
    assert_eq!(replayed.kind(), MessageType::SendText);
}
