//! `MessagePayload` (§3): a reference-counted handle naming a shared-memory buffer.
//!
//! Design notes (§10) call for "an arena-owned payload registry keyed by shared-memory name,
//! with explicit ref/unref at each handoff" rather than reproducing the original's cyclic
//! `shared_ptr` bookkeeping. [`PayloadArena`] is that registry; [`MessagePayload`] is the
//! handle clients pass around. Payloads are leaves in the ownership graph -- they never point
//! back at the messages or modules that reference them -- so a plain `Arc<[u8]>` underneath a
//! name-keyed map is sufficient, no cycle-breaking required.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// A named, ref-counted shared-memory-style buffer. Cloning increments the refcount (it wraps
/// an `Arc`); dropping the last handle releases the arena entry.
#[derive(Debug, Clone)]
pub struct MessagePayload {
    name: String,
    bytes: Arc<Vec<u8>>,
}

impl MessagePayload {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of outstanding handles, including the arena's own copy.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }
}

/// Process-wide registry of shared-memory-style payload buffers, standing in for the real
/// shared-memory segment referenced only by name in control messages (§9, "Global mutable
/// state"). A [`ClusterManager`](crate::cluster_manager::ClusterManager) or
/// [`DataManager`](crate::data_manager::DataManager) holds (or is given) a reference to one;
/// nothing reaches it through ambient/global access.
#[derive(Debug, Default)]
pub struct PayloadArena {
    buffers: DashMap<String, Arc<Vec<u8>>>,
}

impl PayloadArena {
    pub fn new() -> Self {
        PayloadArena::default()
    }

    /// Publishes a new named buffer, returning a handle. If `name` already exists, the existing
    /// buffer's handle is returned and `bytes` is discarded -- publishing is idempotent by name.
    pub fn publish(&self, name: impl Into<String>, bytes: Vec<u8>) -> MessagePayload {
        let name = name.into();
        let bytes = self
            .buffers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(bytes))
            .clone();
        MessagePayload { name, bytes }
    }

    /// Looks up a handle to an already-published buffer, incrementing its refcount (§3: "when
    /// a payload is attached to a queued/forwarded message, its refcount must be incremented").
    pub fn get(&self, name: &str) -> Option<MessagePayload> {
        self.buffers.get(name).map(|entry| MessagePayload {
            name: name.to_string(),
            bytes: entry.clone(),
        })
    }

    /// Drops the arena's own reference to `name`. The buffer is freed once every handle (the
    /// arena's and every message/queue that held one) has been dropped.
    pub fn release(&self, name: &str) {
        self.buffers.remove(name);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}

/// A process-default arena for call sites (tests, small tools) that don't plumb one through
/// explicitly. Production code should prefer an owned [`PayloadArena`] passed by reference.
pub static DEFAULT_ARENA: Lazy<PayloadArena> = Lazy::new(PayloadArena::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_get_shares_the_same_buffer() {
        let arena = PayloadArena::new();
        let a = arena.publish("obj/1", vec![1, 2, 3]);
        let b = arena.get("obj/1").unwrap();
        assert_eq!(a.bytes(), b.bytes());
        // arena + a + b
        assert_eq!(a.ref_count(), 3);
    }

    #[test]
    fn release_drops_the_arenas_own_handle() {
        let arena = PayloadArena::new();
        let handle = arena.publish("obj/2", vec![9]);
        arena.release("obj/2");
        assert!(arena.get("obj/2").is_none());
        // the caller's handle is still valid even though the arena forgot the name
        assert_eq!(handle.bytes(), &[9]);
    }
}
