//! Single-host manager entry point (§4.1, §9): runs every rank of a small cluster as a thread in
//! one process, communicating over in-memory channels instead of MPI. Grounded on the qsim
//! crate's `local_controller::run_channel` -- one thread per partition, joined at the end.

use std::thread;

use clap::Parser;
use tracing::info;

use vistle_core::communicator::local_transport::ChannelCommunicator;
use vistle_core::config::{CommandLineArgs, Config};
use vistle_core::id::Id;
use vistle_core::logging;
use vistle_core::run::{self, RankContextBuilder};

fn main() {
    let args = CommandLineArgs::parse();
    let config = Config::from_file(&args).unwrap_or_else(|e| panic!("failed to load config: {e}"));
    let _guards = logging::init_logging(&config, 0);

    let size = config.computational_setup().concurrency.unwrap_or(1).max(1);
    info!(size, "starting local vistle_manager with {size} ranks");

    let hub_id = Id::MASTER_HUB;
    let (comms, _senders) = ChannelCommunicator::cluster(size);

    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let rank = comm.rank();
            let compression = config.session_parameters().archive_compression;
            thread::Builder::new()
                .name(format!("rank-{rank}"))
                .spawn(move || {
                    let mut cluster_manager = RankContextBuilder::default()
                        .comm(comm)
                        .hub_id(hub_id)
                        .compression(compression)
                        .build()
                        .expect("rank context is fully specified")
                        .into_cluster_manager();
                    if let Err(err) = run::serve(&mut cluster_manager) {
                        tracing::error!(rank, error = %err, "rank aborted");
                    }
                })
                .expect("failed to spawn rank thread")
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
    info!("local vistle_manager exiting");
}
