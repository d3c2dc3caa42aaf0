//! An in-process, channel-backed [`Communicator`] for tests and the single-host
//! `vistle_manager_local` binary -- the direct analogue of the qsim crate's
//! `ChannelSimCommunicator` (`src/simulation/messaging/communication/local_communicator.rs`),
//! which lets integration tests exercise the real message-routing logic without an MPI runtime.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::error::{Result, VistleError};
use crate::message::Message;

use super::Communicator;

pub struct ChannelCommunicator {
    rank: i32,
    size: usize,
    senders: Vec<Sender<Message>>,
    receiver: Mutex<Receiver<Message>>,
}

impl ChannelCommunicator {
    /// Builds a fully-connected cluster of `size` ranks, each wired to every other rank's
    /// inbox, and returns one [`ChannelCommunicator`] per rank.
    pub fn cluster(size: usize) -> (Vec<ChannelCommunicator>, Vec<Sender<Message>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        let comms = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ChannelCommunicator {
                rank: rank as i32,
                size,
                senders: senders.clone(),
                receiver: Mutex::new(receiver),
            })
            .collect();
        (comms, senders)
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_to_rank(&self, dest_rank: i32, msg: Message) -> Result<()> {
        let idx = usize::try_from(dest_rank).map_err(|_| {
            VistleError::Fatal(format!("invalid destination rank {dest_rank}"))
        })?;
        self.senders
            .get(idx)
            .ok_or_else(|| VistleError::Fatal(format!("rank {dest_rank} out of range")))?
            .send(msg)
            .map_err(|_| VistleError::Fatal(format!("rank {dest_rank} inbox closed")))
    }

    fn broadcast(&self, msg: Message) -> Result<()> {
        for sender in &self.senders {
            sender
                .send(msg.clone())
                .map_err(|_| VistleError::Fatal("broadcast target inbox closed".to_string()))?;
        }
        Ok(())
    }

    fn recv(&self) -> Result<Message> {
        self.receiver
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| VistleError::Fatal("local inbox disconnected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use crate::message::Body;

    #[test]
    fn point_to_point_send_is_received_by_the_target_rank() {
        let (comms, _senders) = ChannelCommunicator::cluster(2);
        let msg = Message::new(Id::UI, 0, Id::new(1000), 1, Body::Quit);
        comms[0].send_to_rank(1, msg).unwrap();
        let received = comms[1].recv().unwrap();
        assert_eq!(received.kind(), crate::message::MessageType::Quit);
    }

    #[test]
    fn broadcast_reaches_every_rank_including_the_sender() {
        let (comms, _senders) = ChannelCommunicator::cluster(3);
        let msg = Message::new(Id::UI, 0, Id::BROADCAST, -1, Body::Quit);
        comms[0].broadcast(msg).unwrap();
        for comm in &comms {
            comm.recv().unwrap();
        }
    }
}
