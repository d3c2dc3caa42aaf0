//! Ports, their connections, and the per-port object bookkeeping (§3, §4.3): `PortManager`
//! counts pending objects at input ports and caches recent output for replay to late-connecting
//! consumers, mirroring how qsim's network layer tracks per-link queues
//! (`src/simulation/messaging/sim_communication/message_broker.rs`) separately from message
//! dispatch itself.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::message::Generation;
use crate::object::ObjectMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortFlags(u8);

impl PortFlags {
    pub const NONE: PortFlags = PortFlags(0);
    /// Connected but must never trigger `checkExecuteObject` (§4.3).
    pub const NOCOMPUTE: PortFlags = PortFlags(1 << 0);

    pub const fn contains(self, other: PortFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Identifies a port by its owning module and local name. Ports don't carry their own identity
/// beyond this pair, so the manager addresses them by key rather than by reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortKey {
    pub module: Id,
    pub name: String,
}

impl PortKey {
    pub fn new(module: Id, name: impl Into<String>) -> Self {
        PortKey { module, name: name.into() }
    }
}

#[derive(Debug, Clone)]
pub struct Port {
    pub key: PortKey,
    pub direction: Direction,
    pub flags: PortFlags,
    connections: Vec<PortKey>,
}

impl Port {
    pub fn new(key: PortKey, direction: Direction, flags: PortFlags) -> Self {
        Port { key, direction, flags, connections: Vec::new() }
    }

    pub fn connections(&self) -> &[PortKey] {
        &self.connections
    }

    pub fn is_nocompute(&self) -> bool {
        self.flags.contains(PortFlags::NOCOMPUTE)
    }
}

/// Per-generation replay buffer for an output port (§3 "PortKey → OutputObjectCache").
#[derive(Debug, Clone, Default)]
pub struct OutputObjectCache {
    generation: Option<Generation>,
    names: Vec<String>,
}

impl OutputObjectCache {
    /// Records `name` as emitted in `generation`, clearing stale entries from an earlier
    /// generation first.
    pub fn record(&mut self, generation: Generation, name: impl Into<String>) {
        if self.generation != Some(generation) {
            self.generation = Some(generation);
            self.names.clear();
        }
        self.names.push(name.into());
    }

    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// Objects available to replay to a newly-connected consumer.
    pub fn replay(&self) -> &[String] {
        &self.names
    }
}

/// Owns every port in the local process, the connection graph between them, each input port's
/// pending-object queue, and each output port's replay cache.
#[derive(Debug, Default)]
pub struct PortManager {
    ports: HashMap<PortKey, Port>,
    input_queues: HashMap<PortKey, VecDeque<ObjectMeta>>,
    output_caches: HashMap<PortKey, OutputObjectCache>,
    /// Input ports `resetInput` has marked ready for the next `Prepare`, not yet popped (§4.4
    /// `readyForPrepare` propagation).
    input_reset: HashSet<PortKey>,
    /// Input ports `finishInput` has marked ready for the next `Reduce`, not yet popped.
    input_finished: HashSet<PortKey>,
}

impl PortManager {
    pub fn new() -> Self {
        PortManager::default()
    }

    pub fn add_port(&mut self, key: PortKey, direction: Direction, flags: PortFlags) {
        if direction == Direction::Input {
            self.input_queues.entry(key.clone()).or_default();
        } else {
            self.output_caches.entry(key.clone()).or_default();
        }
        self.ports.entry(key.clone()).or_insert_with(|| Port::new(key, direction, flags));
    }

    pub fn port(&self, key: &PortKey) -> Option<&Port> {
        self.ports.get(key)
    }

    pub fn remove_module_ports(&mut self, module: Id) {
        let keys: Vec<PortKey> = self.ports.keys().filter(|k| k.module == module).cloned().collect();
        for key in keys {
            if let Some(port) = self.ports.remove(&key) {
                for peer in port.connections {
                    if let Some(peer_port) = self.ports.get_mut(&peer) {
                        peer_port.connections.retain(|k| k != &key);
                    }
                }
            }
            self.input_queues.remove(&key);
            self.output_caches.remove(&key);
        }
    }

    /// Connections are symmetric (§3): connecting `a` to `b` connects `b` to `a`.
    pub fn connect(&mut self, a: PortKey, b: PortKey) {
        if let Some(port) = self.ports.get_mut(&a) {
            if !port.connections.contains(&b) {
                port.connections.push(b.clone());
            }
        }
        if let Some(port) = self.ports.get_mut(&b) {
            if !port.connections.contains(&a) {
                port.connections.push(a);
            }
        }
    }

    /// Removing one side of a connection removes the other (§3).
    pub fn disconnect(&mut self, a: &PortKey, b: &PortKey) {
        if let Some(port) = self.ports.get_mut(a) {
            port.connections.retain(|k| k != b);
        }
        if let Some(port) = self.ports.get_mut(b) {
            port.connections.retain(|k| k != a);
        }
    }

    pub fn record_output(&mut self, port: &PortKey, generation: Generation, name: impl Into<String>) {
        self.output_caches.entry(port.clone()).or_default().record(generation, name);
    }

    pub fn output_cache(&self, port: &PortKey) -> Option<&OutputObjectCache> {
        self.output_caches.get(port)
    }

    /// Appends an object to an input port's pending queue (object-count invariant, §9.4).
    pub fn enqueue(&mut self, port: &PortKey, object: ObjectMeta) {
        self.input_queues.entry(port.clone()).or_default().push_back(object);
    }

    pub fn pending_count(&self, port: &PortKey) -> usize {
        self.input_queues.get(port).map_or(0, VecDeque::len)
    }

    pub fn pop_front(&mut self, port: &PortKey) -> Option<ObjectMeta> {
        self.input_queues.get_mut(port).and_then(VecDeque::pop_front)
    }

    /// Every connected, non-`NOCOMPUTE` input port of `module` has at least one pending object
    /// (§4.3 `checkExecuteObject`'s firing condition, minus the "not already reducing" half,
    /// which the scheduler tracks).
    pub fn all_inputs_ready(&self, module: Id) -> bool {
        self.ports
            .values()
            .filter(|p| p.key.module == module && p.direction == Direction::Input)
            .filter(|p| !p.connections.is_empty() && !p.is_nocompute())
            .all(|p| self.pending_count(&p.key) > 0)
    }

    pub fn input_ports_of(&self, module: Id) -> Vec<PortKey> {
        self.ports
            .values()
            .filter(|p| p.key.module == module && p.direction == Direction::Input)
            .map(|p| p.key.clone())
            .collect()
    }

    /// Distinct, non-negative timesteps currently queued across `module`'s input ports, sorted
    /// ascending (§4.4 `reorder::visiting_order`'s input).
    pub fn pending_timesteps(&self, module: Id) -> Vec<i32> {
        let mut steps: Vec<i32> = self
            .input_ports_of(module)
            .iter()
            .flat_map(|port| self.input_queues.get(port).into_iter().flatten())
            .map(|object| object.timestep)
            .filter(|&t| t >= 0)
            .collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }

    /// `resetInput` (§4.4): marks `port` ready for the next `Prepare` round.
    pub fn reset_input(&mut self, port: &PortKey) {
        self.input_reset.insert(port.clone());
    }

    /// `finishInput` (§4.4): marks `port` ready for the next `Reduce` round.
    pub fn finish_input(&mut self, port: &PortKey) {
        self.input_finished.insert(port.clone());
    }

    /// Every connected, non-`NOCOMPUTE` input port of `module` has been reset.
    pub fn all_inputs_reset(&self, module: Id) -> bool {
        self.ports
            .values()
            .filter(|p| p.key.module == module && p.direction == Direction::Input)
            .filter(|p| !p.connections.is_empty() && !p.is_nocompute())
            .all(|p| self.input_reset.contains(&p.key))
    }

    /// Every connected, non-`NOCOMPUTE` input port of `module` has finished.
    pub fn all_inputs_finished(&self, module: Id) -> bool {
        self.ports
            .values()
            .filter(|p| p.key.module == module && p.direction == Direction::Input)
            .filter(|p| !p.connections.is_empty() && !p.is_nocompute())
            .all(|p| self.input_finished.contains(&p.key))
    }

    /// Clears `module`'s reset marks once its `Prepare` has been dispatched.
    pub fn pop_reset(&mut self, module: Id) {
        for port in self.input_ports_of(module) {
            self.input_reset.remove(&port);
        }
    }

    /// Clears `module`'s finished marks once its `Reduce` has been dispatched.
    pub fn pop_finished(&mut self, module: Id) {
        for port in self.input_ports_of(module) {
            self.input_finished.remove(&port);
        }
    }

    /// Modules owning a non-`NOCOMPUTE` input port connected to one of `module`'s output ports
    /// (§4.4 downstream `readyForPrepare`/`readyForReduce` propagation).
    pub fn downstream_modules(&self, module: Id) -> Vec<Id> {
        let mut seen = Vec::new();
        for port in self.ports.values().filter(|p| p.key.module == module && p.direction == Direction::Output) {
            for peer in port.connections() {
                if let Some(peer_port) = self.ports.get(peer) {
                    if !peer_port.is_nocompute() && !seen.contains(&peer_port.key.module) {
                        seen.push(peer_port.key.module);
                    }
                }
            }
        }
        seen
    }

    /// Downstream input ports of `module`'s output ports, paired with their owning module --
    /// [`Self::reset_input`]/[`Self::finish_input`] operate per-port, so propagation needs the
    /// exact keys, not just the owning modules.
    pub fn downstream_input_ports(&self, module: Id) -> Vec<PortKey> {
        let mut keys = Vec::new();
        for port in self.ports.values().filter(|p| p.key.module == module && p.direction == Direction::Output) {
            for peer in port.connections() {
                if let Some(peer_port) = self.ports.get(peer) {
                    if !peer_port.is_nocompute() && !keys.contains(peer) {
                        keys.push(peer.clone());
                    }
                }
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(n: u32) -> Generation {
        Generation { execution_count: n, iteration: 0 }
    }

    #[test]
    fn connect_is_symmetric_and_disconnect_clears_both_sides() {
        let mut pm = PortManager::new();
        let a = PortKey::new(Id::new(1000), "out");
        let b = PortKey::new(Id::new(1001), "in");
        pm.add_port(a.clone(), Direction::Output, PortFlags::NONE);
        pm.add_port(b.clone(), Direction::Input, PortFlags::NONE);
        pm.connect(a.clone(), b.clone());
        assert_eq!(pm.port(&a).unwrap().connections(), &[b.clone()]);
        assert_eq!(pm.port(&b).unwrap().connections(), &[a.clone()]);

        pm.disconnect(&a, &b);
        assert!(pm.port(&a).unwrap().connections().is_empty());
        assert!(pm.port(&b).unwrap().connections().is_empty());
    }

    #[test]
    fn output_cache_clears_on_generation_change() {
        let mut cache = OutputObjectCache::default();
        cache.record(generation(0), "obj/1");
        cache.record(generation(0), "obj/2");
        assert_eq!(cache.replay(), &["obj/1", "obj/2"]);
        cache.record(generation(1), "obj/3");
        assert_eq!(cache.replay(), &["obj/3"]);
    }

    #[test]
    fn all_inputs_ready_ignores_nocompute_and_unconnected_ports() {
        let mut pm = PortManager::new();
        let module = Id::new(1000);
        let required = PortKey::new(module, "data_in");
        let nocompute = PortKey::new(module, "aux_in");
        let unconnected = PortKey::new(module, "spare_in");
        pm.add_port(required.clone(), Direction::Input, PortFlags::NONE);
        pm.add_port(nocompute.clone(), Direction::Input, PortFlags::NOCOMPUTE);
        pm.add_port(unconnected.clone(), Direction::Input, PortFlags::NONE);

        let producer = PortKey::new(Id::new(1001), "out");
        pm.add_port(producer.clone(), Direction::Output, PortFlags::NONE);
        pm.connect(producer.clone(), required.clone());
        let nocompute_producer = PortKey::new(Id::new(1002), "out");
        pm.add_port(nocompute_producer.clone(), Direction::Output, PortFlags::NONE);
        pm.connect(nocompute_producer, nocompute.clone());

        assert!(!pm.all_inputs_ready(module));
        pm.enqueue(&required, ObjectMeta::new("o1", Id::new(1001), generation(0)));
        assert!(pm.all_inputs_ready(module));
    }
}
