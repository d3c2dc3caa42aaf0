//! The control message record (§3, §6): a small fixed-shape header plus a typed body.
//!
//! Real Vistle packs this into a bit-exact `char[512]` buffer shared across rank-to-rank MPI
//! sends, the broadcast channel and the hub TCP link. We can't get a `#[repr(C)]` 512-byte
//! struct out of a tagged Rust enum, so instead we enforce the 512-byte ceiling as a checked
//! invariant at construction time (see [`Message::into_wire`]) rather than as a type-level
//! guarantee -- the same tradeoff the qsim crate makes when it bounds its `SyncMessage` wire
//! size implicitly through its MPI buffers rather than at the type level.

pub mod payload;
pub mod wire;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VistleError};
use crate::id::Id;

pub use payload::MessagePayload;

/// Upper bound on an encoded [`Message`], matching the C++ `message::Message` buffer size.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// `message.payload_size == 0 iff payload handle is null` (§3).
pub type Uuid = [u8; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFlags(u16);

impl TypeFlags {
    pub const NONE: TypeFlags = TypeFlags(0);
    pub const BROADCAST: TypeFlags = TypeFlags(1 << 0);
    pub const BROADCAST_MODULE: TypeFlags = TypeFlags(1 << 1);
    pub const TRIGGER_QUEUE: TypeFlags = TypeFlags(1 << 2);
    pub const QUEUE_IF_UNHANDLED: TypeFlags = TypeFlags(1 << 3);
    /// Marks a message that was already fanned out via [`crate::communicator::Communicator::broadcast`]
    /// (as opposed to [`TypeFlags::BROADCAST`], which tells [`handle`](crate::cluster_manager::ClusterManager::handle)
    /// to perform that fan-out). Distinguishing the two keeps a looped-back broadcast copy from
    /// triggering a second broadcast when it reaches the routing pass again.
    pub const ALREADY_BROADCAST: TypeFlags = TypeFlags(1 << 4);

    pub const fn contains(self, other: TypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for TypeFlags {
    type Output = TypeFlags;
    fn bitor(self, rhs: TypeFlags) -> TypeFlags {
        self.union(rhs)
    }
}

impl Default for TypeFlags {
    fn default() -> Self {
        TypeFlags::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    Identify,
    AddHub,
    RemoveHub,
    Spawn,
    SpawnPrepared,
    Started,
    ModuleExit,
    Quit,
    Kill,
    Connect,
    Disconnect,
    AddPort,
    AddParameter,
    RemoveParameter,
    SetParameter,
    SetParameterChoices,
    AddObject,
    AddObjectCompleted,
    ObjectReceivePolicy,
    SchedulingPolicy,
    ReducePolicy,
    Execute,
    CancelExecute,
    ExecutionProgress,
    ExecutionDone,
    Busy,
    Idle,
    Barrier,
    BarrierReached,
    SendText,
    ItemInfo,
    RequestTunnel,
    RequestObject,
    SendObject,
    DataTransferState,
    Trace,
    UpdateStatus,
    SetName,
    ModuleAvailable,
}

/// `Execute`'s `what` field (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecuteWhat {
    Upstream,
    Prepare,
    ComputeExecute,
    ComputeObject,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddObjectFlag {
    Normal,
    Blocker,
    Unblocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendTextKind {
    Info,
    Warning,
    Error,
}

/// An object's generation: (execution counter, iteration) (glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation {
    pub execution_count: u32,
    pub iteration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddObject {
    pub sender_port: String,
    pub dest_port: String,
    pub object_name: String,
    pub generation: Generation,
    pub producer_rank: i32,
    pub block: Option<u32>,
    pub timestep: i32,
    pub flag: AddObjectFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spawn {
    pub module_name: String,
    pub spawn_id: Id,
    pub hub_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connect {
    pub a_module: Id,
    pub a_port: String,
    pub b_module: Id,
    pub b_port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execute {
    pub module: Id,
    pub what: ExecuteWhat,
    pub animation_start: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStage {
    Start,
    Finish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub module: Id,
    pub stage: ProgressStage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Barrier {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierReached {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleExit {
    pub module: Id,
    pub crashed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetParameter {
    pub module: Id,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendText {
    pub kind: SendTextKind,
    pub module: Id,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestObject {
    pub object_id: String,
    pub referrer: String,
    pub hub: Id,
    pub rank: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendObject {
    pub object_id: String,
    pub is_array: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddObjectCompleted {
    pub object_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTransferState {
    pub num_in_transit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disconnect {
    pub a_module: Id,
    pub a_port: String,
    pub b_module: Id,
    pub b_port: String,
}

/// Type-specific payload. Every [`MessageType`] has exactly one variant here, so routing is a
/// single exhaustive match rather than virtual dispatch (design notes, §10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body {
    Identify { hub_name: String },
    AddHub { hub: Id },
    RemoveHub { hub: Id },
    Spawn(Spawn),
    SpawnPrepared { module: Id },
    Started { module: Id },
    ModuleExit(ModuleExit),
    Quit,
    Kill { module: Id },
    Connect(Connect),
    Disconnect(Disconnect),
    AddPort { module: Id, port: String },
    AddParameter { module: Id, name: String },
    RemoveParameter { module: Id, name: String },
    SetParameter(SetParameter),
    SetParameterChoices { module: Id, name: String },
    AddObject(AddObject),
    AddObjectCompleted(AddObjectCompleted),
    ObjectReceivePolicy { module: Id, local_only: bool },
    SchedulingPolicy { module: Id, policy: crate::scheduler::SchedulingPolicy },
    ReducePolicy { module: Id, policy: crate::scheduler::ReducePolicy },
    Execute(Execute),
    CancelExecute { module: Id },
    ExecutionProgress(ExecutionProgress),
    ExecutionDone { module: Id },
    Busy { module: Id },
    Idle { module: Id },
    Barrier(Barrier),
    BarrierReached(BarrierReached),
    SendText(SendText),
    ItemInfo { module: Id, text: String },
    RequestTunnel { module: Id, port: u16 },
    RequestObject(RequestObject),
    SendObject(SendObject),
    DataTransferState(DataTransferState),
    Trace { module: Id, enable: bool },
    UpdateStatus { module: Id, text: String },
    SetName { module: Id, name: String },
    ModuleAvailable { module_name: String },
}

impl Body {
    pub fn kind(&self) -> MessageType {
        match self {
            Body::Identify { .. } => MessageType::Identify,
            Body::AddHub { .. } => MessageType::AddHub,
            Body::RemoveHub { .. } => MessageType::RemoveHub,
            Body::Spawn(_) => MessageType::Spawn,
            Body::SpawnPrepared { .. } => MessageType::SpawnPrepared,
            Body::Started { .. } => MessageType::Started,
            Body::ModuleExit(_) => MessageType::ModuleExit,
            Body::Quit => MessageType::Quit,
            Body::Kill { .. } => MessageType::Kill,
            Body::Connect(_) => MessageType::Connect,
            Body::Disconnect(_) => MessageType::Disconnect,
            Body::AddPort { .. } => MessageType::AddPort,
            Body::AddParameter { .. } => MessageType::AddParameter,
            Body::RemoveParameter { .. } => MessageType::RemoveParameter,
            Body::SetParameter(_) => MessageType::SetParameter,
            Body::SetParameterChoices { .. } => MessageType::SetParameterChoices,
            Body::AddObject(_) => MessageType::AddObject,
            Body::AddObjectCompleted(_) => MessageType::AddObjectCompleted,
            Body::ObjectReceivePolicy { .. } => MessageType::ObjectReceivePolicy,
            Body::SchedulingPolicy { .. } => MessageType::SchedulingPolicy,
            Body::ReducePolicy { .. } => MessageType::ReducePolicy,
            Body::Execute(_) => MessageType::Execute,
            Body::CancelExecute { .. } => MessageType::CancelExecute,
            Body::ExecutionProgress(_) => MessageType::ExecutionProgress,
            Body::ExecutionDone { .. } => MessageType::ExecutionDone,
            Body::Busy { .. } => MessageType::Busy,
            Body::Idle { .. } => MessageType::Idle,
            Body::Barrier(_) => MessageType::Barrier,
            Body::BarrierReached(_) => MessageType::BarrierReached,
            Body::SendText(_) => MessageType::SendText,
            Body::ItemInfo { .. } => MessageType::ItemInfo,
            Body::RequestTunnel { .. } => MessageType::RequestTunnel,
            Body::RequestObject(_) => MessageType::RequestObject,
            Body::SendObject(_) => MessageType::SendObject,
            Body::DataTransferState(_) => MessageType::DataTransferState,
            Body::Trace { .. } => MessageType::Trace,
            Body::UpdateStatus { .. } => MessageType::UpdateStatus,
            Body::SetName { .. } => MessageType::SetName,
            Body::ModuleAvailable { .. } => MessageType::ModuleAvailable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: Id,
    pub sender_rank: i32,
    pub dest_id: Id,
    pub dest_rank: i32,
    pub uuid: Uuid,
    pub flags: TypeFlags,
    pub priority: u8,
    pub payload_name: Option<String>,
    pub payload_size: u64,
    pub body: Body,
}

impl Message {
    pub fn new(sender_id: Id, sender_rank: i32, dest_id: Id, dest_rank: i32, body: Body) -> Self {
        Message {
            sender_id,
            sender_rank,
            dest_id,
            dest_rank,
            uuid: uuid::Uuid::new_v4().into_bytes(),
            flags: TypeFlags::NONE,
            priority: 0,
            payload_name: None,
            payload_size: 0,
            body,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }

    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload(mut self, payload: &MessagePayload) -> Self {
        self.payload_name = Some(payload.name().to_string());
        self.payload_size = payload.len() as u64;
        self
    }

    /// `message.payload_size == 0 ⇔ payload handle is null` (§3).
    pub fn has_payload(&self) -> bool {
        let has = self.payload_name.is_some();
        debug_assert_eq!(has, self.payload_size != 0);
        has
    }

    /// Encodes the message, enforcing the ≤512-byte ceiling on the control record (the
    /// payload travels out of band and is excluded from this limit).
    pub fn into_wire(&self) -> Result<Vec<u8>> {
        let config = bincode::config::standard();
        let encoded = bincode::serde::encode_to_vec(self, config)?;
        if encoded.len() > MAX_MESSAGE_SIZE {
            return Err(VistleError::MessageTooLarge {
                actual: encoded.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }
        Ok(encoded)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let config = bincode::config::standard();
        let (msg, _) = bincode::serde::decode_from_slice(bytes, config)?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_invariant_holds_on_construction() {
        let msg = Message::new(Id::UI, 0, Id::BROADCAST, -1, Body::Quit);
        assert!(!msg.has_payload());
        assert_eq!(msg.payload_size, 0);
    }

    #[test]
    fn round_trips_through_wire_encoding() {
        let msg = Message::new(
            Id::new(1000),
            0,
            Id::new(1001),
            -1,
            Body::Execute(Execute {
                module: Id::new(1001),
                what: ExecuteWhat::ComputeObject,
                animation_start: None,
            }),
        );
        let bytes = msg.into_wire().unwrap();
        let back = Message::from_wire(&bytes).unwrap();
        assert_eq!(back.sender_id, msg.sender_id);
        assert_eq!(back.kind(), MessageType::Execute);
    }
}
