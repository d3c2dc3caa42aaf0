//! MPI-backed manager entry point (§4.1, §9). One process per rank; rank 0 additionally owns the
//! hub socket. Grounded on the qsim crate's `mpi_controller::run_mpi`.

use clap::Parser;
use mpi::topology::Communicator as MpiTopologyCommunicator;
use tracing::info;

use vistle_core::communicator::mpi_transport::MpiCommunicator;
use vistle_core::config::{CommandLineArgs, Config};
use vistle_core::id::Id;
use vistle_core::logging;
use vistle_core::run::{self, RankContextBuilder};

fn main() {
    let universe = mpi::initialize().expect("failed to initialize MPI");
    let world = universe.world();
    let rank = world.rank();
    let comm = MpiCommunicator::new(world);

    let args = CommandLineArgs::parse();
    let config = Config::from_file(&args).unwrap_or_else(|e| panic!("failed to load config: {e}"));
    let _guards = logging::init_logging(&config, rank);

    info!(rank, "starting MPI-backed vistle_manager");

    let hub_id = Id::MASTER_HUB;
    let mut cluster_manager = RankContextBuilder::default()
        .comm(comm)
        .hub_id(hub_id)
        .compression(config.session_parameters().archive_compression)
        .build()
        .expect("rank context is fully specified")
        .into_cluster_manager();

    if let Err(err) = run::serve(&mut cluster_manager) {
        tracing::error!(rank, error = %err, "vistle_manager aborted");
        std::process::exit(1);
    }

    info!(rank, "vistle_manager exiting cleanly");
}
