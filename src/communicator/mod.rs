//! MessageBus / Communicator (§4.1): carries control messages between ranks, between ranks and
//! the hub, and hands them to the local `ClusterManager`.
//!
//! [`Communicator`] is the trait-based abstraction the rest of the manager programs against,
//! the same shape as the qsim crate's `SimCommunicator` trait
//! (`src/simulation/messaging/sim_communication/mod.rs`), which lets
//! `MpiSimCommunicator` and a channel-backed test double share one call surface. Here,
//! [`mpi_transport::MpiCommunicator`] (feature `mpi`) and [`local_transport::ChannelCommunicator`]
//! play those two roles; [`hub_link::HubLink`] is the rank-0-only TCP leg to the hub that neither
//! of them owns directly.

pub mod hub_link;
pub mod local_transport;
#[cfg(feature = "mpi")]
pub mod mpi_transport;

use crate::error::Result;
use crate::message::Message;

/// Carries control messages between ranks and hands broadcasts and point-to-point sends to the
/// transport. Implementations own the *ToRank* and *StartBroadcast* channels (§4.1); the
/// *HubSocket* leg is always [`hub_link::HubLink`], owned separately by rank 0.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> i32;
    fn size(&self) -> usize;

    /// `Isend` to a specific rank (§4.1 `sendMessage`). `dest_rank == this rank` is a caller
    /// error -- local delivery never goes through the transport.
    fn send_to_rank(&self, dest_rank: i32, msg: Message) -> Result<()>;

    /// `broadcastAndHandleMessage` (§4.1): only meaningful when called on rank 0; callers on
    /// other ranks must forward to rank 0 first via [`Communicator::forward_to_master`].
    fn broadcast(&self, msg: Message) -> Result<()>;

    /// Blocks until the next message arrives on either the `ToRank` or broadcast channel,
    /// whichever completes first, then re-posts the matching receive (§4.1 "Posted receives").
    fn recv(&self) -> Result<Message>;

    /// `forwardToMaster` (§4.1): rank 0 has nothing to forward; any other rank routes through
    /// rank 0.
    fn forward_to_master(&self, msg: Message) -> Result<()> {
        if self.rank() == 0 {
            Ok(())
        } else {
            self.send_to_rank(0, msg)
        }
    }

    /// `sendMessage(moduleId, msg, destRank)` (§4.1): local delivery bypasses the transport
    /// entirely; everything else is a point-to-point send.
    fn send_or_deliver_locally(&self, dest_rank: i32, msg: Message) -> Result<Option<Message>> {
        if dest_rank == self.rank() || dest_rank == -1 {
            Ok(Some(msg))
        } else {
            self.send_to_rank(dest_rank, msg)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use crate::message::Body;
    use local_transport::ChannelCommunicator;

    #[test]
    fn local_dest_rank_delivers_without_a_transport_round_trip() {
        let (comms, _handles) = ChannelCommunicator::cluster(1);
        let comm = &comms[0];
        let msg = Message::new(Id::UI, 0, Id::BROADCAST, -1, Body::Quit);
        let delivered = comm.send_or_deliver_locally(0, msg).unwrap();
        assert!(delivered.is_some());
    }
}
