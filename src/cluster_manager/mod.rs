//! `ClusterManager` (§4.2): routes every message, manages local modules, mediates object flow,
//! and is the authoritative local actor for graph-state transitions.
//!
//! Grounded on `examples/original_source/lib/vistle/manager/clustermanager.h`'s
//! `ClusterManager::handleMessage`/`handlePriv` dispatch, restructured as one ordered routing
//! pass (§4.2 "Routing rules") followed by an exhaustive per-type match, the same two-phase
//! shape the qsim crate's `NetMessageBroker::send_recv` uses to separate transport-level
//! bookkeeping from message-specific handling.

pub mod barrier;
pub mod object_flow;
pub mod running_map;

use std::collections::HashMap;
use std::sync::Arc;

use keyed_priority_queue::KeyedPriorityQueue;
use tracing::{instrument, warn};

use crate::communicator::Communicator;
use crate::data_manager::DataManager;
use crate::error::Result;
use crate::id::Id;
use crate::message::{AddObjectFlag, Body, Generation, Message, MessageType, TypeFlags, Uuid};
use crate::port::{Direction, PortFlags, PortKey};
use crate::scheduler::{reorder, ModuleScheduler, ReducePolicy, SchedulingPolicy};
use crate::state_tracker::StateTracker;

/// Orders buffered `queue_if_unhandled` replay by `Message::priority` (higher first), breaking
/// ties by arrival order via a monotonic sequence number -- the same
/// priority-plus-tiebreak-key shape the qsim crate's Dijkstra uses for its distance queue
/// (`src/simulation/replanning/routing/dijsktra.rs`), just without that module's min-heap
/// inversion since here higher priority should pop first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReplayPriority(u8, std::cmp::Reverse<u64>);

impl PartialOrd for ReplayPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReplayPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0).then_with(|| self.1.cmp(&other.1))
    }
}

use barrier::BarrierState;
use object_flow::Dispatch;
use running_map::RunningMap;

/// Per-module scheduling metadata the manager needs to run `checkExecuteObject` and dispatch
/// `EXECUTE`; the module's own `prepare`/`compute`/`reduce` state machine
/// ([`crate::scheduler::ModuleScheduler`]) lives with the module process, not here.
#[derive(Debug, Clone, Copy)]
struct ModuleSchedulingInfo {
    policy: SchedulingPolicy,
    already_reducing: bool,
    reduce_policy: ReducePolicy,
}

pub struct ClusterManager<C: Communicator> {
    comm: C,
    hub_id: Id,
    running: RunningMap,
    ports: PortManagerHandle,
    barrier: BarrierState,
    state: StateTracker,
    data_manager: Arc<DataManager>,
    queue_if_unhandled: KeyedPriorityQueue<Uuid, ReplayPriority>,
    queued_messages: HashMap<Uuid, Message>,
    next_queue_seq: u64,
    scheduling_info: std::collections::HashMap<Id, ModuleSchedulingInfo>,
    lazy_gang: std::collections::HashMap<Id, crate::scheduler::LazyGangCounters>,
    /// One `prepare -> compute* -> reduce` state machine per locally-running module (§4.4),
    /// driven from `handle_execute`/`run_compute_execute` rather than living on the (out of
    /// process) module itself.
    module_schedulers: std::collections::HashMap<Id, ModuleScheduler>,
}

/// Thin alias so `PortManager` reads as manager-owned state without importing it twice at every
/// call site.
type PortManagerHandle = crate::port::PortManager;

impl<C: Communicator> ClusterManager<C> {
    pub fn new(comm: C, hub_id: Id, data_manager: Arc<DataManager>) -> Self {
        ClusterManager {
            comm,
            hub_id,
            running: RunningMap::new(),
            ports: PortManagerHandle::new(),
            barrier: BarrierState::new(),
            state: StateTracker::new(),
            data_manager,
            queue_if_unhandled: KeyedPriorityQueue::new(),
            queued_messages: HashMap::new(),
            next_queue_seq: 0,
            scheduling_info: std::collections::HashMap::new(),
            lazy_gang: std::collections::HashMap::new(),
            module_schedulers: std::collections::HashMap::new(),
        }
    }

    pub fn rank(&self) -> i32 {
        self.comm.rank()
    }

    pub fn running(&self) -> &RunningMap {
        &self.running
    }

    /// Mutable access to the locally-spawned modules, so a local-delivery transport (or a test)
    /// can drain [`running_map::Module::pop_outgoing`] without reaching into manager internals.
    pub fn running_mut(&mut self) -> &mut RunningMap {
        &mut self.running
    }

    pub fn ports(&self) -> &PortManagerHandle {
        &self.ports
    }

    pub fn barrier_is_active(&self) -> bool {
        self.barrier.is_active()
    }

    /// Blocks for the next inbound message on this rank's communicator (§4.1 `recv`); the
    /// per-rank run loop ([`crate::run::serve`]) hands the result straight to [`Self::handle`].
    pub fn recv(&self) -> Result<Message> {
        self.comm.recv()
    }

    /// The full routing pass for one incoming message (§4.2 "Routing rules" + per-type
    /// handlers).
    #[instrument(level = "trace", skip(self, msg), fields(rank = self.rank(), kind = ?msg.kind()))]
    pub fn handle(&mut self, msg: Message) -> Result<()> {
        if self.barrier.should_buffer(msg.sender_id) {
            self.buffer_for_replay(msg);
            return Ok(());
        }

        // 1. ForBroadcast destined messages go straight to the hub.
        if msg.dest_id == Id::FOR_BROADCAST {
            return self.forward_to_hub(msg);
        }

        // 2. Update the replica unless this type is handled specially below.
        if !matches!(msg.kind(), MessageType::Connect | MessageType::Disconnect | MessageType::Spawn | MessageType::Trace) {
            self.state.record(msg.clone());
        }

        // 3. Broadcast flag.
        let mut already_broadcast = false;
        if msg.flags.contains(TypeFlags::BROADCAST) {
            self.comm.broadcast(msg.clone())?;
            already_broadcast = true;
            if msg.flags.contains(TypeFlags::BROADCAST_MODULE) {
                for id in self.running.ids().collect::<Vec<_>>() {
                    if let Some(module) = self.running.get_mut(id) {
                        module.send(msg.clone(), None);
                    }
                }
            }
        }

        // 4. Local, generically-delivered messages only. Execute/CancelExecute/SetParameter route
        // solely through their per-type handlers below, and AddObject does its own
        // block-then-send/unblock-and-skip delivery in `handle_add_object` (step 6) -- a generic
        // send here would race ahead of the Blocker bookkeeping and bypass the hold entirely.
        let has_specialized_delivery = matches!(
            msg.kind(),
            MessageType::Execute | MessageType::CancelExecute | MessageType::SetParameter | MessageType::AddObject
        );
        if !has_specialized_delivery && self.running.contains(msg.dest_id) {
            if let Some(module) = self.running.get_mut(msg.dest_id) {
                module.send(msg.clone(), None);
            }
        }

        // 5. Different hub, not already broadcast.
        if msg.dest_id.is_hub() && msg.dest_id != self.hub_id && !already_broadcast {
            self.forward_to_hub(msg.clone())?;
        }

        // 6. Per-type handler.
        self.dispatch_by_type(msg.clone())?;

        if msg.flags.contains(TypeFlags::TRIGGER_QUEUE) {
            self.replay_queued()?;
        }
        Ok(())
    }

    fn forward_to_hub(&mut self, msg: Message) -> Result<()> {
        self.comm.forward_to_master(msg)
    }

    /// Buffers a message that arrived while the barrier should hold it back, keyed so replay
    /// later honors [`Message::priority`] first and arrival order second.
    fn buffer_for_replay(&mut self, msg: Message) {
        let seq = self.next_queue_seq;
        self.next_queue_seq += 1;
        self.queue_if_unhandled.push(msg.uuid, ReplayPriority(msg.priority, std::cmp::Reverse(seq)));
        self.queued_messages.insert(msg.uuid, msg);
    }

    fn replay_queued(&mut self) -> Result<()> {
        let mut pending = Vec::with_capacity(self.queue_if_unhandled.len());
        while let Some((uuid, _priority)) = self.queue_if_unhandled.pop() {
            if let Some(msg) = self.queued_messages.remove(&uuid) {
                pending.push(msg);
            }
        }
        for msg in pending {
            self.handle(msg)?;
        }
        Ok(())
    }

    fn dispatch_by_type(&mut self, msg: Message) -> Result<()> {
        match &msg.body {
            Body::Spawn(spawn) => self.handle_spawn(spawn.module_name.clone(), spawn.spawn_id, spawn.hub_id),
            Body::Connect(connect) => {
                self.handle_connect(connect.a_module, &connect.a_port, connect.b_module, &connect.b_port)
            }
            Body::Disconnect(disconnect) => {
                self.ports.disconnect(
                    &PortKey::new(disconnect.a_module, disconnect.a_port.clone()),
                    &PortKey::new(disconnect.b_module, disconnect.b_port.clone()),
                );
                Ok(())
            }
            Body::AddObject(add) => {
                let add = add.clone();
                self.handle_add_object(&msg, add)
            }
            Body::Execute(execute) => self.handle_execute(&msg, execute.module),
            Body::ExecutionProgress(progress) => self.handle_execution_progress(progress.module, progress.stage),
            Body::Barrier(barrier) => self.handle_barrier(barrier.uuid),
            Body::BarrierReached(reached) => self.handle_barrier_reached(msg.sender_id, reached.uuid),
            Body::ModuleExit(exit) => self.handle_module_exit(exit.module, exit.crashed),
            Body::SetParameter(p) => {
                self.state.apply_vistle_parameter(p.module, &p.name, &p.value);
                Ok(())
            }
            Body::SetName { module, name } => {
                if let Some(m) = self.running.get_mut(*module) {
                    m.set_name(name.clone());
                }
                Ok(())
            }
            Body::Trace { module, enable } => {
                if let Some(m) = self.running.get_mut(*module) {
                    m.set_trace(*enable);
                }
                Ok(())
            }
            Body::ItemInfo { module, text } => {
                if let Some(m) = self.running.get_mut(*module) {
                    m.set_item_info(text.clone());
                }
                Ok(())
            }
            Body::SchedulingPolicy { module, policy } => {
                self.register_scheduling_policy(*module, *policy);
                Ok(())
            }
            Body::ReducePolicy { module, policy } => {
                self.register_reduce_policy(*module, *policy);
                Ok(())
            }
            // Advisory/UI-facing messages with no manager-side state of their own: the replica
            // record at step 2 of `handle` is all they need, `SET_PARAMETER_CHOICES` being purely
            // a UI hint, `REQUEST_TUNNEL`/`QUIT` being transport/lifecycle signals the run loop
            // (not the cluster manager) acts on, and `DATA_TRANSFER_STATE` being a status report
            // the UI reads straight off the replica.
            Body::SetParameterChoices { .. } | Body::RequestTunnel { .. } | Body::DataTransferState(_) | Body::Quit => Ok(()),
            _ => Ok(()),
        }
    }

    /// SPAWN (§4.2): only meaningful on the destination hub. Allocates a `RunningMap` entry and
    /// replays state-carrying history so the new module sees the current graph.
    fn handle_spawn(&mut self, module_name: String, spawn_id: Id, hub_id: Id) -> Result<()> {
        if hub_id != self.hub_id {
            return Ok(());
        }
        let module = self.running.spawn(spawn_id, hub_id);
        module.set_name(module_name);
        let spawn_prepared = Message::new(self.hub_id, self.rank(), spawn_id, -1, Body::SpawnPrepared { module: spawn_id });
        if let Some(module) = self.running.get_mut(spawn_id) {
            module.send(spawn_prepared, None);
            for replay in self.state.replay().to_vec() {
                module.send(replay, None);
            }
        }
        Ok(())
    }

    /// CONNECT (§4.2): update state, forward to both endpoints, and replay cached output for a
    /// locally-sourced port.
    fn handle_connect(&mut self, a_module: Id, a_port: &str, b_module: Id, b_port: &str) -> Result<()> {
        let a = PortKey::new(a_module, a_port);
        let b = PortKey::new(b_module, b_port);
        self.ports.add_port(a.clone(), Direction::Output, PortFlags::NONE);
        self.ports.add_port(b.clone(), Direction::Input, PortFlags::NONE);
        self.ports.connect(a.clone(), b.clone());

        if self.running.contains(a_module) {
            if let Some(cache) = self.ports.output_cache(&a) {
                let names: Vec<String> = cache.replay().to_vec();
                let generation = cache.generation().unwrap_or(Generation { execution_count: 0, iteration: 0 });
                for name in names {
                    self.ports.enqueue(&b, crate::object::ObjectMeta::new(name, a_module, generation));
                }
            }
        }
        Ok(())
    }

    /// ADD_OBJECT producer+consumer sides (§4.3). `producer_rank` load-balances a block-parallel
    /// object across the destination's ranks (§4.3 consumer side step 1); when that lands on a
    /// rank other than this one, the object is handed to [`DataManager`] for cross-hub/cross-rank
    /// transfer bookkeeping (§4.6) instead of being enqueued locally, and forwarded over the wire
    /// rather than delivered here.
    ///
    /// `Blocker`/`Unblocking` mirror the original's `sendMessage` treatment of a locally-running
    /// destination: a `Blocker` object is queued on the module's blocked-FIFO before delivery,
    /// and `Unblocking` releases the frontmost blocker without itself entering the port queue or
    /// re-triggering execute readiness (the blocker it releases already did).
    fn handle_add_object(&mut self, msg: &Message, add: crate::message::AddObject) -> Result<()> {
        let sender = msg.sender_id;
        let dest = msg.dest_id;

        let source = PortKey::new(sender, add.sender_port.clone());
        self.ports.record_output(&source, add.generation, add.object_name.clone());

        let is_local_add = add.producer_rank == self.rank();
        let target_rank = object_flow::dest_rank_for_block(add.block, self.comm.size(), is_local_add);

        if let Some(rank) = target_rank {
            if rank != self.rank() {
                self.data_manager.mark_in_transit(add.object_name.clone());
                self.data_manager.register_outstanding(add.clone());
                return self.comm.send_to_rank(rank, msg.clone());
            }
        }

        if let Some(module) = self.running.get_mut(dest) {
            match add.flag {
                AddObjectFlag::Unblocking => {
                    module.unblock(msg);
                    return Ok(());
                }
                AddObjectFlag::Blocker => module.block(msg),
                AddObjectFlag::Normal => {}
            }
            module.send(msg.clone(), None);
        }

        let dest_port = PortKey::new(dest, add.dest_port.clone());
        self.ports.enqueue(
            &dest_port,
            crate::object::ObjectMeta::new(add.object_name, sender, add.generation).with_timestep(add.timestep),
        );

        self.check_execute_object(dest)
    }

    /// EXECUTE (§4.4 dispatch entry point from the cluster manager's side). A message that
    /// already carries the broadcast flag is the dispatch decision itself arriving back over the
    /// wire (§4.3 Gang/LazyGang, §4.4 collective `Prepare`/`Reduce`): deliver it straight to the
    /// local module rather than re-deriving readiness, which would find the originating rank's
    /// state already advanced and silently drop the dispatch.
    ///
    /// A non-broadcast `ComputeExecute` arriving while the module's current execution is still
    /// running (`ranks_started > 0`) is deferred (§4.4 `delayedMessages`) rather than acted on
    /// immediately -- it's released once [`Self::handle_execution_progress`] sees the run finish.
    fn handle_execute(&mut self, msg: &Message, module: Id) -> Result<()> {
        if msg.flags.contains(TypeFlags::ALREADY_BROADCAST) {
            if let Some(m) = self.running.get_mut(module) {
                m.send(msg.clone(), None);
            }
            return Ok(());
        }

        if let Body::Execute(execute) = &msg.body {
            if execute.what == crate::message::ExecuteWhat::ComputeExecute {
                if let Some(m) = self.running.get(module) {
                    if m.ranks_started > 0 {
                        if let Some(m) = self.running.get_mut(module) {
                            m.delay(msg.clone());
                        }
                        return Ok(());
                    }
                }
                return self.run_compute_execute(module);
            }
        }
        self.check_execute_object(module)
    }

    /// Drives the full `Prepare -> reordered compute* -> Reduce` sequence for a `ComputeExecute`
    /// (§4.4): builds/refreshes the module's [`ModuleScheduler`], runs its `prepare()` transition
    /// (a no-op for `ReducePolicy::Never`), computes a visiting order over the module's currently
    /// queued timesteps via [`reorder::visiting_order`], drains each in that order through
    /// `checkExecuteObject`, then runs `reduce()` once every queued timestep has been offered.
    fn run_compute_execute(&mut self, module: Id) -> Result<()> {
        let info = match self.scheduling_info.get(&module).copied() {
            Some(info) => info,
            None => return self.check_execute_object(module),
        };

        let scheduler = self
            .module_schedulers
            .entry(module)
            .or_insert_with(|| ModuleScheduler::new(info.reduce_policy, info.policy, -1));
        scheduler.prepare()?;

        let timesteps = self.ports.pending_timesteps(module);
        if info.reduce_policy.is_per_timestep() && !timesteps.is_empty() {
            let forward = true;
            let order = reorder::visiting_order(timesteps.clone(), timesteps[0], forward, info.reduce_policy.is_zero_first());
            for _ in &order {
                self.check_execute_object(module)?;
            }
        } else {
            self.check_execute_object(module)?;
        }

        let scheduler = match self.module_schedulers.get_mut(&module) {
            Some(s) => s,
            None => return Ok(()),
        };
        if scheduler.is_prepared() {
            scheduler.reduce()?;
        }
        Ok(())
    }

    /// SCHEDULING_POLICY / REDUCE_POLICY (§4.4): refreshes the stored policy and, if a scheduler
    /// already exists for the module, rebuilds it so the new policy takes effect on the next
    /// `ComputeExecute` rather than retroactively.
    pub fn register_reduce_policy(&mut self, module: Id, policy: ReducePolicy) {
        let entry = self.scheduling_info.entry(module).or_insert(ModuleSchedulingInfo {
            policy: SchedulingPolicy::Single,
            already_reducing: false,
            reduce_policy: ReducePolicy::Locally,
        });
        entry.reduce_policy = policy;
        if let Some(existing) = self.module_schedulers.get(&module) {
            let num_timesteps = existing.num_timesteps();
            self.module_schedulers.insert(module, ModuleScheduler::new(policy, entry.policy, num_timesteps));
        }
    }

    fn check_execute_object(&mut self, module: Id) -> Result<()> {
        let info = match self.scheduling_info.get(&module).copied() {
            Some(info) => info,
            None => return Ok(()),
        };
        let rank = self.rank().max(0) as usize;
        let lazy_gang = self.lazy_gang.get_mut(&module);
        let dispatch = object_flow::check_execute_object(
            &mut self.ports,
            module,
            info.already_reducing,
            info.policy,
            rank,
            lazy_gang,
        );
        match dispatch {
            Some(Dispatch::Unicast) => {
                let msg = Message::new(
                    self.hub_id,
                    self.rank(),
                    module,
                    -1,
                    Body::Execute(crate::message::Execute {
                        module,
                        what: crate::message::ExecuteWhat::ComputeObject,
                        animation_start: None,
                    }),
                );
                if let Some(m) = self.running.get_mut(module) {
                    m.send(msg, None);
                }
            }
            Some(Dispatch::Broadcast) => {
                let msg = Message::new(
                    self.hub_id,
                    self.rank(),
                    module,
                    -1,
                    Body::Execute(crate::message::Execute {
                        module,
                        what: crate::message::ExecuteWhat::ComputeObject,
                        animation_start: None,
                    }),
                )
                .with_flags(TypeFlags::ALREADY_BROADCAST);
                self.comm.broadcast(msg)?;
            }
            Some(Dispatch::Deferred) | None => {}
        }
        Ok(())
    }

    /// EXECUTION_PROGRESS (§4.2): tracks per-module started/finished rank counts, unqueues
    /// delayed executes once a module's run has fully finished, and propagates
    /// `readyForPrepare`/`readyForReduce` downstream (§4.4) once every rank has reported in.
    fn handle_execution_progress(&mut self, module: Id, stage: crate::message::ProgressStage) -> Result<()> {
        let size = self.comm.size().max(1) as i32;
        let mut ready_for_prepare = false;
        let mut ready_for_reduce = false;

        if let Some(m) = self.running.get_mut(module) {
            match stage {
                crate::message::ProgressStage::Start => {
                    m.ranks_started += 1;
                    if m.ranks_started == size {
                        ready_for_prepare = true;
                    }
                }
                crate::message::ProgressStage::Finish => {
                    m.ranks_finished += 1;
                    if m.ranks_finished >= m.ranks_started {
                        ready_for_reduce = true;
                        m.ranks_started = 0;
                        m.ranks_finished = 0;
                        while let Some(delayed) = m.pop_delayed() {
                            self.comm.broadcast(delayed)?;
                            break;
                        }
                        if self.rank() == 0 {
                            let done = Message::new(self.hub_id, 0, Id::BROADCAST, -1, Body::ExecutionDone { module });
                            self.comm.broadcast(done)?;
                        }
                    }
                }
            }
        }

        if ready_for_prepare || ready_for_reduce {
            self.propagate_readiness(module, ready_for_prepare, ready_for_reduce)?;
        }
        Ok(())
    }

    /// Downstream `readyForPrepare`/`readyForReduce` propagation (§4.4), grounded on the
    /// original's per-downstream-module `resetInput`/`finishInput` bookkeeping: marks every
    /// downstream input port reset/finished, then for each downstream module whose
    /// `ReducePolicy`/`SchedulingPolicy` actually participates in collective phases (anything but
    /// `Never`+`Single`), pops the marks and issues a `Prepare`/`Reduce` once all of that module's
    /// inputs have reached the milestone.
    fn propagate_readiness(&mut self, module: Id, ready_for_prepare: bool, ready_for_reduce: bool) -> Result<()> {
        if ready_for_prepare {
            for port in self.ports.downstream_input_ports(module) {
                self.ports.reset_input(&port);
            }
        }
        if ready_for_reduce {
            for port in self.ports.downstream_input_ports(module) {
                self.ports.finish_input(&port);
            }
        }

        for downstream in self.ports.downstream_modules(module) {
            let info = match self.scheduling_info.get(&downstream).copied() {
                Some(info) => info,
                None => continue,
            };
            let participates =
                info.reduce_policy != ReducePolicy::Never || matches!(info.policy, SchedulingPolicy::Gang | SchedulingPolicy::LazyGang);
            if !participates {
                continue;
            }

            if ready_for_prepare && self.ports.all_inputs_reset(downstream) {
                self.ports.pop_reset(downstream);
                self.dispatch_control(downstream, crate::message::ExecuteWhat::Prepare, info.policy)?;
            }
            if ready_for_reduce && self.ports.all_inputs_finished(downstream) {
                self.ports.pop_finished(downstream);
                self.dispatch_control(downstream, crate::message::ExecuteWhat::Reduce, info.policy)?;
            }
        }
        Ok(())
    }

    /// Sends a collective `Execute` (`Prepare`/`Reduce`) to `module`: broadcast for `Gang`/
    /// `LazyGang` so every rank advances together, unicast to the locally-running copy otherwise.
    fn dispatch_control(&mut self, module: Id, what: crate::message::ExecuteWhat, policy: SchedulingPolicy) -> Result<()> {
        let msg = Message::new(
            self.hub_id,
            self.rank(),
            module,
            -1,
            Body::Execute(crate::message::Execute { module, what, animation_start: None }),
        );
        if matches!(policy, SchedulingPolicy::Gang | SchedulingPolicy::LazyGang) {
            self.comm.broadcast(msg.with_flags(TypeFlags::ALREADY_BROADCAST))
        } else {
            if let Some(m) = self.running.get_mut(module) {
                m.send(msg, None);
            }
            Ok(())
        }
    }

    /// BARRIER / BARRIER_REACHED (§4.5).
    fn handle_barrier(&mut self, uuid: crate::message::Uuid) -> Result<()> {
        self.barrier.activate(uuid);
        for id in self.running.ids().collect::<Vec<_>>() {
            let msg = Message::new(self.hub_id, self.rank(), id, -1, Body::Barrier(crate::message::Barrier { uuid }));
            if let Some(m) = self.running.get_mut(id) {
                m.send(msg, None);
            }
        }
        Ok(())
    }

    fn handle_barrier_reached(&mut self, sender: Id, uuid: crate::message::Uuid) -> Result<()> {
        if sender == Id::MASTER_HUB {
            self.barrier.release();
            return self.replay_queued();
        }
        if self.running.contains(sender) {
            self.barrier.record_reached(sender);
            if self.rank() == 0 {
                let forward = Message::new(sender, self.rank(), Id::MASTER_HUB, -1, Body::BarrierReached(crate::message::BarrierReached { uuid }));
                self.forward_to_hub(forward)?;
            }
        }
        Ok(())
    }

    /// MODULE_EXIT (§4.2): removes the module, releases its ports/caches, clears it from the
    /// reached-set, forwards the notice onward.
    fn handle_module_exit(&mut self, module: Id, crashed: bool) -> Result<()> {
        if crashed {
            warn!(module = %module, "module exited abnormally");
        }
        self.running.remove(module);
        self.ports.remove_module_ports(module);
        self.scheduling_info.remove(&module);
        self.lazy_gang.remove(&module);
        self.module_schedulers.remove(&module);
        Ok(())
    }

    pub fn register_scheduling_policy(&mut self, module: Id, policy: SchedulingPolicy) {
        let reduce_policy = self.scheduling_info.get(&module).map(|info| info.reduce_policy).unwrap_or(ReducePolicy::Locally);
        self.scheduling_info.insert(module, ModuleSchedulingInfo { policy, already_reducing: false, reduce_policy });
        if matches!(policy, SchedulingPolicy::LazyGang) {
            self.lazy_gang.insert(module, crate::scheduler::LazyGangCounters::new(self.comm.size()));
        }
        if let Some(existing) = self.module_schedulers.get(&module) {
            let num_timesteps = existing.num_timesteps();
            self.module_schedulers.insert(module, ModuleScheduler::new(reduce_policy, policy, num_timesteps));
        }
    }

    pub fn set_already_reducing(&mut self, module: Id, value: bool) {
        if let Some(info) = self.scheduling_info.get_mut(&module) {
            info.already_reducing = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::local_transport::ChannelCommunicator;

    fn manager() -> ClusterManager<ChannelCommunicator> {
        let (mut comms, _senders) = ChannelCommunicator::cluster(1);
        let comm = comms.remove(0);
        let data_manager = Arc::new(DataManager::new(Id::new(10), 0));
        ClusterManager::new(comm, Id::new(10), data_manager)
    }

    #[test]
    fn spawn_creates_a_running_map_entry_and_queues_spawn_prepared() {
        let mut cm = manager();
        let module = Id::new(1000);
        cm.handle(Message::new(
            Id::UI,
            0,
            module,
            -1,
            Body::Spawn(crate::message::Spawn { module_name: "Reader".into(), spawn_id: module, hub_id: Id::new(10) }),
        ))
        .unwrap();
        assert!(cm.running().contains(module));
    }

    #[test]
    fn module_exit_removes_the_module_from_the_running_map() {
        let mut cm = manager();
        let module = Id::new(1000);
        cm.running.spawn(module, Id::new(10));
        cm.handle(Message::new(
            Id::UI,
            0,
            module,
            -1,
            Body::ModuleExit(crate::message::ModuleExit { module, crashed: false }),
        ))
        .unwrap();
        assert!(!cm.running().contains(module));
    }

    #[test]
    fn barrier_reached_from_master_hub_releases_the_barrier() {
        let mut cm = manager();
        let uuid = [9u8; 16];
        cm.handle(Message::new(Id::MASTER_HUB, 0, Id::BROADCAST, -1, Body::Barrier(crate::message::Barrier { uuid })))
            .unwrap();
        assert!(cm.barrier.is_active());
        cm.handle(Message::new(
            Id::MASTER_HUB,
            0,
            Id::BROADCAST,
            -1,
            Body::BarrierReached(crate::message::BarrierReached { uuid }),
        ))
        .unwrap();
        assert!(!cm.barrier.is_active());
    }

    #[test]
    fn set_parameter_targeting_vistle_updates_the_replica() {
        let mut cm = manager();
        cm.handle(Message::new(
            Id::UI,
            0,
            Id::VISTLE,
            -1,
            Body::SetParameter(crate::message::SetParameter {
                module: Id::VISTLE,
                name: "archive_compression_speed".into(),
                value: "3".into(),
            }),
        ))
        .unwrap();
        assert_eq!(cm.state.session_parameters().archive_compression_speed, Some(3));
    }

    #[test]
    fn set_name_updates_the_running_module() {
        let mut cm = manager();
        let module = Id::new(1000);
        cm.running.spawn(module, Id::new(10));
        cm.handle(Message::new(Id::UI, 0, module, -1, Body::SetName { module, name: "Renamed".into() })).unwrap();
        assert_eq!(cm.running().get(module).unwrap().name(), Some("Renamed"));
    }

    #[test]
    fn compute_execute_dispatches_through_check_execute_object_for_a_never_policy_module() {
        let mut cm = manager();
        let module = Id::new(1000);
        cm.running.spawn(module, Id::new(10));
        cm.register_scheduling_policy(module, SchedulingPolicy::Single);
        cm.register_reduce_policy(module, ReducePolicy::Never);

        cm.handle(Message::new(
            Id::UI,
            0,
            module,
            -1,
            Body::Execute(crate::message::Execute { module, what: crate::message::ExecuteWhat::ComputeExecute, animation_start: None }),
        ))
        .unwrap();

        // A module with no connected inputs is vacuously ready, so `checkExecuteObject` fires
        // once; the Never-policy scheduler never becomes `prepared`, so no Reduce transition runs.
        let (dispatched, _) = cm.running_mut().get_mut(module).unwrap().pop_outgoing().expect("should dispatch the lone compute");
        assert_eq!(dispatched.kind(), MessageType::Execute);
    }

    #[test]
    fn non_broadcast_compute_execute_is_delayed_while_the_module_is_still_running() {
        let mut cm = manager();
        let module = Id::new(1000);
        cm.running.spawn(module, Id::new(10));
        cm.register_scheduling_policy(module, SchedulingPolicy::Single);
        cm.running_mut().get_mut(module).unwrap().ranks_started = 1;

        cm.handle(Message::new(
            Id::UI,
            0,
            module,
            -1,
            Body::Execute(crate::message::Execute { module, what: crate::message::ExecuteWhat::ComputeExecute, animation_start: None }),
        ))
        .unwrap();

        assert!(cm.running_mut().get_mut(module).unwrap().has_delayed());
    }
}
