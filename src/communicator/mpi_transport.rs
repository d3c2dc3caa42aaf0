//! MPI-backed [`Communicator`] (§4.1), gated behind the `mpi` feature. Grounded on
//! `src/simulation/messaging/sim_communication/mpi_communicator.rs`'s
//! `MpiSimCommunicator`: point-to-point sends go through `immediate_send` so the caller never
//! blocks on a slow peer, broadcasts use the communicator's collective `Bcast`, and any MPI
//! failure is treated as fatal to the rank (§4.1 "Failure").

use mpi::collective::CommunicatorCollectives;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::Communicator as MpiTopologyCommunicator;
use mpi::request::{scope, RequestCollection};

use crate::error::{Result, VistleError};
use crate::message::{Message, MAX_MESSAGE_SIZE};

use super::Communicator;

pub struct MpiCommunicator {
    world: mpi::topology::SimpleCommunicator,
}

impl MpiCommunicator {
    pub fn new(world: mpi::topology::SimpleCommunicator) -> Self {
        MpiCommunicator { world }
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> i32 {
        self.world.rank()
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    /// `Isend` to a specific rank; the send is posted and polled to completion within a
    /// request scope so a misbehaving peer can't hang the whole cluster indefinitely (§4.1
    /// "In-flight sends are tracked ... polled for completion on every dispatch").
    fn send_to_rank(&self, dest_rank: i32, msg: Message) -> Result<()> {
        let bytes = msg.into_wire()?;
        let process = self.world.process_at_rank(dest_rank);
        scope(|s| {
            let mut requests = RequestCollection::new();
            requests.add(process.immediate_send(s, &bytes));
            requests.wait_all(&mut Vec::new());
        });
        Ok(())
    }

    /// `Bcast(body)` (§4.1 `broadcastAndHandleMessage`). Only valid on rank 0; the manager is
    /// responsible for forwarding non-rank-0 broadcast requests before calling this.
    fn broadcast(&self, msg: Message) -> Result<()> {
        let mut bytes = msg.into_wire()?;
        bytes.resize(MAX_MESSAGE_SIZE, 0);
        let root = self.world.process_at_rank(0);
        root.broadcast_into(&mut bytes);
        Ok(())
    }

    /// Blocking receive from any process (§4.1 "Posted receives"). Any MPI-level error here is
    /// fatal to the rank.
    fn recv(&self) -> Result<Message> {
        let (bytes, _status) = self.world.any_process().receive_vec::<u8>();
        Message::from_wire(&bytes).map_err(|e| VistleError::Fatal(format!("malformed MPI message: {e}")))
    }
}
