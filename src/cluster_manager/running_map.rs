//! `RunningMap` (§3, §4.2): per-local-module bookkeeping the `ClusterManager` consults on every
//! message. Grounded on `examples/original_source/lib/vistle/manager/clustermanager.h`'s
//! `Module` struct (`sendQueue`, `recvQueue`, `ranksStarted`, `ranksFinished`, `blocked`,
//! `blockers`, `blockedMessages`, `delayedMessages`) and `RunningMap` (`unordered_map<int,
//! Module>`), rebuilt here as an ordinary `HashMap<Id, Module>` since nothing about the id space
//! calls for `nohash_hasher` at this scale.

use std::collections::{HashMap, VecDeque};

use crate::id::Id;
use crate::message::{Message, MessagePayload, Uuid};
use crate::scheduler::LazyGangCounters;

/// One locally-spawned module's manager-side state. Created on `SPAWN`, destroyed on
/// `MODULE_EXIT` (§3).
pub struct Module {
    pub id: Id,
    pub hub: Id,
    /// Outbound messages waiting to be delivered to the module process, in FIFO order.
    send_queue: VecDeque<(Message, Option<MessagePayload>)>,
    blocked: bool,
    blockers: VecDeque<Uuid>,
    blocked_messages: VecDeque<(Uuid, Message, Option<MessagePayload>)>,
    delayed_messages: VecDeque<Message>,
    pub lazy_gang: Option<LazyGangCounters>,
    pub ranks_started: i32,
    pub ranks_finished: i32,
    pub busy_count: i32,
    pub prepared: bool,
    pub reduced: bool,
    pub crashed: bool,
    name: Option<String>,
    trace: bool,
    item_info: Option<String>,
}

impl Module {
    pub fn new(id: Id, hub: Id) -> Self {
        Module {
            id,
            hub,
            send_queue: VecDeque::new(),
            blocked: false,
            blockers: VecDeque::new(),
            blocked_messages: VecDeque::new(),
            delayed_messages: VecDeque::new(),
            lazy_gang: None,
            ranks_started: 0,
            ranks_finished: 0,
            busy_count: 0,
            prepared: false,
            reduced: true,
            crashed: false,
            name: None,
            trace: false,
            item_info: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `SET_NAME` (§4.2): the UI-assigned display name, also set from `module_name` at `SPAWN`.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn is_traced(&self) -> bool {
        self.trace
    }

    /// `TRACE` (§4.2): toggles per-module message tracing.
    pub fn set_trace(&mut self, enable: bool) {
        self.trace = enable;
    }

    pub fn item_info(&self) -> Option<&str> {
        self.item_info.as_deref()
    }

    /// `ITEM_INFO` (§4.2): the most recent informational text the module reported for itself.
    pub fn set_item_info(&mut self, text: impl Into<String>) {
        self.item_info = Some(text.into());
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// `Module::send` (§4.2): queues for delivery now unless the module is currently blocked, in
    /// which case the message waits behind the active blocker.
    pub fn send(&mut self, msg: Message, payload: Option<MessagePayload>) {
        if self.blocked {
            self.blocked_messages.push_back((msg.uuid, msg, payload));
        } else {
            self.send_queue.push_back((msg, payload));
        }
    }

    pub fn pop_outgoing(&mut self) -> Option<(Message, Option<MessagePayload>)> {
        self.send_queue.pop_front()
    }

    /// `Module::block` (§4.2).
    pub fn block(&mut self, msg: &Message) {
        self.blocked = true;
        self.blockers.push_back(msg.uuid);
    }

    /// `Module::unblock` (§4.2). Returns messages now released for delivery, in the order they
    /// must be forwarded; pushes them onto the send queue itself so callers just drain
    /// [`Module::pop_outgoing`] afterward.
    ///
    /// Preserves the invariant that messages for a module are delivered in the order they
    /// become unblocked, respecting blocker FIFO order: a non-frontmost unblock only removes its
    /// blocker and updates the queued message in place, it never jumps the queue.
    pub fn unblock(&mut self, msg: &Message) {
        if self.blockers.front() == Some(&msg.uuid) {
            self.blockers.pop_front();
            self.release_matching(msg.uuid);
            loop {
                match self.blockers.front().copied() {
                    Some(next) => {
                        if self.has_queued(next) {
                            self.blockers.pop_front();
                            self.release_matching(next);
                            continue;
                        }
                        break;
                    }
                    None => {
                        self.blocked = false;
                        while let Some((_, m, p)) = self.blocked_messages.pop_front() {
                            self.send_queue.push_back((m, p));
                        }
                        break;
                    }
                }
            }
        } else if let Some(pos) = self.blockers.iter().position(|u| *u == msg.uuid) {
            // Unblocks a non-frontmost blocker: drop it from the queue but do not forward --
            // forwarding must stay in blocker-FIFO order.
            self.blockers.remove(pos);
            if let Some(entry) = self.blocked_messages.iter_mut().find(|(u, _, _)| *u == msg.uuid) {
                entry.1.payload_name = msg.payload_name.clone();
                entry.1.payload_size = msg.payload_size;
            }
        }
    }

    fn has_queued(&self, uuid: Uuid) -> bool {
        self.blocked_messages.iter().any(|(u, _, _)| *u == uuid)
    }

    fn release_matching(&mut self, uuid: Uuid) {
        if let Some(pos) = self.blocked_messages.iter().position(|(u, _, _)| *u == uuid) {
            let (_, m, p) = self.blocked_messages.remove(pos).unwrap();
            self.send_queue.push_back((m, p));
        }
    }

    /// `delayedMessages` (§4.2): a non-broadcast `ComputeExecute` arriving while the module is
    /// still running is deferred until the current execution finishes.
    pub fn delay(&mut self, msg: Message) {
        self.delayed_messages.push_back(msg);
    }

    pub fn pop_delayed(&mut self) -> Option<Message> {
        self.delayed_messages.pop_front()
    }

    pub fn has_delayed(&self) -> bool {
        !self.delayed_messages.is_empty()
    }
}

/// Locally-spawned modules, keyed by id (§3 `RunningMap`).
#[derive(Default)]
pub struct RunningMap {
    modules: HashMap<Id, Module>,
}

impl RunningMap {
    pub fn new() -> Self {
        RunningMap::default()
    }

    pub fn spawn(&mut self, id: Id, hub: Id) -> &mut Module {
        self.modules.entry(id).or_insert_with(|| Module::new(id, hub))
    }

    pub fn get(&self, id: Id) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut Module> {
        self.modules.get_mut(&id)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.modules.contains_key(&id)
    }

    /// `MODULE_EXIT` (§4.2): removes the module, optionally recording a crash for callers that
    /// still need the fact after removal.
    pub fn remove(&mut self, id: Id) -> Option<Module> {
        self.modules.remove(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.modules.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use crate::message::{AddObject, AddObjectFlag, Body, Generation};

    fn add_object_msg(uuid: Uuid) -> Message {
        let mut msg = Message::new(
            Id::new(1000),
            0,
            Id::new(1001),
            -1,
            Body::AddObject(AddObject {
                sender_port: "out".into(),
                dest_port: "in".into(),
                object_name: "obj".into(),
                generation: Generation { execution_count: 0, iteration: 0 },
                producer_rank: 0,
                block: None,
                timestep: -1,
                flag: AddObjectFlag::Blocker,
            }),
        );
        msg.uuid = uuid;
        msg
    }

    #[test]
    fn unblocking_the_front_blocker_releases_its_queued_message_in_order() {
        let mut module = Module::new(Id::new(1001), Id::new(10));
        let blocker_a = add_object_msg([1; 16]);
        let blocker_b = add_object_msg([2; 16]);

        module.block(&blocker_a);
        module.send(blocker_a.clone(), None);
        module.block(&blocker_b);
        module.send(blocker_b.clone(), None);
        assert!(module.is_blocked());
        assert!(module.pop_outgoing().is_none());

        module.unblock(&blocker_a);
        let (released, _) = module.pop_outgoing().unwrap();
        assert_eq!(released.uuid, blocker_a.uuid);

        module.unblock(&blocker_b);
        let (released, _) = module.pop_outgoing().unwrap();
        assert_eq!(released.uuid, blocker_b.uuid);
        assert!(!module.is_blocked());
    }

    #[test]
    fn unblocking_a_non_frontmost_blocker_does_not_forward_out_of_order() {
        let mut module = Module::new(Id::new(1001), Id::new(10));
        let blocker_a = add_object_msg([1; 16]);
        let blocker_b = add_object_msg([2; 16]);
        module.block(&blocker_a);
        module.send(blocker_a.clone(), None);
        module.block(&blocker_b);
        module.send(blocker_b.clone(), None);

        module.unblock(&blocker_b);
        assert!(module.pop_outgoing().is_none());
        assert!(module.is_blocked());
    }
}
