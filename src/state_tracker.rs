//! Authoritative replica of workflow graph state (§1, §4.2): an external, API-only component
//! per the design's scope -- this module defines the interface the `ClusterManager` and
//! `DataManager` hold it to (recording state-carrying messages and replaying them to late
//! arrivals, and the session-parameter area `SET_PARAMETER` targets), without reimplementing
//! the query/UI-facing graph API itself.

use std::collections::HashMap;

use crate::data_manager::compression::CompressionMode;
use crate::id::Id;
use crate::message::Message;

/// Session-wide parameters targeted by `SET_PARAMETER` against [`Id::VISTLE`] (§9
/// "Environment and configuration"). Only the fields this core actually consults are modeled;
/// the remaining recognized options pass through as opaque key/value pairs.
#[derive(Debug, Clone, Default)]
pub struct SessionParameters {
    pub archive_compression: CompressionMode,
    pub archive_compression_speed: Option<i32>,
    pub extra: HashMap<String, String>,
}

/// The subset of graph-replica bookkeeping the manager core depends on: recording messages that
/// carry durable state and replaying them to a module that joins after the fact (§4.2 SPAWN
/// handler: "replay all already-seen state-carrying messages").
#[derive(Default)]
pub struct StateTracker {
    history: Vec<Message>,
    session: SessionParameters,
}

impl StateTracker {
    pub fn new() -> Self {
        StateTracker::default()
    }

    /// Records a state-carrying message, unless its type is excluded by the routing rules
    /// (`CONNECT`/`DISCONNECT`/`SPAWN`/`TRACE`, handled specially by the caller instead).
    pub fn record(&mut self, msg: Message) {
        self.history.push(msg);
    }

    /// Messages a newly-spawned module must see to reconstruct the current graph.
    pub fn replay(&self) -> &[Message] {
        &self.history
    }

    pub fn session_parameters(&self) -> &SessionParameters {
        &self.session
    }

    pub fn set_archive_compression(&mut self, mode: CompressionMode) {
        self.session.archive_compression = mode;
    }

    pub fn set_extra_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.session.extra.insert(key.into(), value.into());
    }

    /// Applies a `SET_PARAMETER` targeting [`Id::VISTLE`] to the session-parameter area.
    pub fn apply_vistle_parameter(&mut self, target: Id, name: &str, value: &str) {
        if target != Id::VISTLE {
            return;
        }
        match name {
            "archive_compression_speed" => {
                self.session.archive_compression_speed = value.parse().ok();
            }
            _ => self.set_extra_parameter(name, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;

    #[test]
    fn replay_returns_recorded_messages_in_order() {
        let mut tracker = StateTracker::new();
        tracker.record(Message::new(Id::UI, 0, Id::BROADCAST, -1, Body::Quit));
        tracker.record(Message::new(Id::UI, 0, Id::BROADCAST, -1, Body::Quit));
        assert_eq!(tracker.replay().len(), 2);
    }

    #[test]
    fn vistle_targeted_parameter_updates_speed() {
        let mut tracker = StateTracker::new();
        tracker.apply_vistle_parameter(Id::VISTLE, "archive_compression_speed", "3");
        assert_eq!(tracker.session_parameters().archive_compression_speed, Some(3));
    }

    #[test]
    fn non_vistle_targeted_parameter_is_ignored() {
        let mut tracker = StateTracker::new();
        tracker.apply_vistle_parameter(Id::new(1000), "archive_compression_speed", "3");
        assert_eq!(tracker.session_parameters().archive_compression_speed, None);
    }
}
