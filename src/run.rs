//! The per-rank message loop (§4.1): receive, hand to the `ClusterManager`, repeat until `QUIT`.
//! Grounded on the qsim crate's `controller::execute_partition` -- the thing each rank's thread
//! or process actually runs once its communicator and config are wired up.

use std::sync::Arc;

use derive_builder::Builder;
use tracing::{error, info};

use crate::cluster_manager::ClusterManager;
use crate::communicator::Communicator;
use crate::data_manager::compression::CompressionMode;
use crate::data_manager::DataManager;
use crate::error::Result;
use crate::id::Id;
use crate::message::MessageType;

/// Everything a binary entry point needs to stand up one rank's `ClusterManager`, collected so
/// `vistle_manager`/`vistle_manager_local` build it the same way the qsim crate's
/// `PartitionArgumentsBuilder` (`src/simulation/controller/mod.rs`) assembles a partition's
/// arguments before handing them to `execute_partition`.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct RankContext<C: Communicator> {
    pub comm: C,
    pub hub_id: Id,
    #[builder(default)]
    pub compression: CompressionMode,
}

impl<C: Communicator> RankContext<C> {
    pub fn into_cluster_manager(self) -> ClusterManager<C> {
        let rank = self.comm.rank();
        let data_manager = Arc::new(DataManager::new(self.hub_id, rank));
        data_manager.set_compression(self.compression);
        ClusterManager::new(self.comm, self.hub_id, data_manager)
    }
}

/// Runs the routing loop for one rank until a `QUIT` broadcast arrives or a fatal error occurs
/// (§7: [`crate::error::VistleError::is_fatal`] aborts the rank; everything else is logged and
/// the loop continues).
pub fn serve<C: Communicator>(cluster_manager: &mut ClusterManager<C>) -> Result<()> {
    loop {
        let msg = cluster_manager.recv()?;
        let quit = msg.kind() == MessageType::Quit;
        if let Err(err) = cluster_manager.handle(msg) {
            if err.is_fatal() {
                error!(rank = cluster_manager.rank(), error = %err, "fatal error, aborting rank");
                return Err(err);
            }
            error!(rank = cluster_manager.rank(), error = %err, "recovered from non-fatal error");
        }
        if quit {
            info!(rank = cluster_manager.rank(), "received QUIT, shutting down");
            return Ok(());
        }
    }
}
