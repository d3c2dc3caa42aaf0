//! Barrier protocol (§4.5): a single optional active barrier identified by UUID, plus the set of
//! module ids that have reached it. While active, messages from modules already in the
//! reached-set are buffered rather than handled, so nothing downstream of the barrier is
//! observed until the master hub releases it.

use std::collections::HashSet;

use crate::id::Id;
use crate::message::Uuid;

#[derive(Default)]
pub struct BarrierState {
    active_uuid: Option<Uuid>,
    reached: HashSet<Id>,
}

impl BarrierState {
    pub fn new() -> Self {
        BarrierState::default()
    }

    pub fn is_active(&self) -> bool {
        self.active_uuid.is_some()
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.active_uuid
    }

    /// A `BARRIER` message activates barrier state (§4.5).
    pub fn activate(&mut self, uuid: Uuid) {
        self.active_uuid = Some(uuid);
        self.reached.clear();
    }

    /// A module on this rank reached the barrier; `true` once every local module named in
    /// `expected` has reached it.
    pub fn record_reached(&mut self, module: Id) {
        self.reached.insert(module);
    }

    pub fn has_reached(&self, module: Id) -> bool {
        self.reached.contains(&module)
    }

    pub fn all_reached<'a>(&self, expected: impl IntoIterator<Item = &'a Id>) -> bool {
        expected.into_iter().all(|id| self.reached.contains(id))
    }

    /// The master hub's `BARRIER_REACHED` releases the barrier: clear the reached-set and
    /// deactivate (§4.5).
    pub fn release(&mut self) {
        self.active_uuid = None;
        self.reached.clear();
    }

    /// Whether a message from `sender` must be buffered rather than handled immediately: the
    /// barrier is active and `sender` has already reached it.
    pub fn should_buffer(&self, sender: Id) -> bool {
        self.is_active() && self.reached.contains(&sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_from_reached_modules_are_buffered_until_release() {
        let mut barrier = BarrierState::new();
        let uuid = [7u8; 16];
        let module = Id::new(1000);
        barrier.activate(uuid);
        assert!(!barrier.should_buffer(module));
        barrier.record_reached(module);
        assert!(barrier.should_buffer(module));
        barrier.release();
        assert!(!barrier.should_buffer(module));
        assert!(!barrier.is_active());
    }

    #[test]
    fn all_reached_checks_every_expected_module() {
        let mut barrier = BarrierState::new();
        barrier.activate([1; 16]);
        let a = Id::new(1000);
        let b = Id::new(1001);
        barrier.record_reached(a);
        assert!(!barrier.all_reached(&[a, b]));
        barrier.record_reached(b);
        assert!(barrier.all_reached(&[a, b]));
    }
}
