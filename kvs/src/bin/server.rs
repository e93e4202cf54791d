//! kvs-server: creates the shared region, runs the worker pool and the
//! rendezvous socket until asked to terminate.

use clap::Parser;
use kvs::lifecycle::Lifecycle;
use kvs::rendezvous::Rendezvous;
use kvs::server::KvServer;
use shmq::SharedRegion;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kvs-server")]
#[command(about = "Shared-memory key-value server")]
struct Cli {
    /// Shared memory region name
    #[arg(long, default_value = "/task_queue_shm")]
    shm_name: String,

    /// Rendezvous socket path
    #[arg(long, default_value = "/tmp/kvs.sock")]
    socket: String,

    /// Worker threads (0 = hardware parallelism)
    #[arg(short, long, default_value = "0")]
    workers: usize,

    /// Map stripes (0 = hardware parallelism)
    #[arg(long, default_value = "0")]
    stripes: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let region = match unsafe { SharedRegion::<u32, u32>::create(&cli.shm_name) } {
        Ok(region) => Arc::new(region),
        Err(e) => {
            error!(name = %cli.shm_name, error = %e, "failed to create shared region");
            return ExitCode::FAILURE;
        }
    };
    info!(name = %cli.shm_name, bytes = region.size(), "shared region created");

    let lifecycle = match Lifecycle::install() {
        Ok(lc) => lc,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let mut server = if cli.stripes > 0 {
        KvServer::with_stripes(Arc::clone(&region), cli.stripes)
    } else {
        KvServer::new(Arc::clone(&region))
    };
    let workers = if cli.workers > 0 {
        cli.workers
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    };
    server.start(workers);

    let mut rendezvous = match Rendezvous::bind(&cli.socket, region.raw_fd()) {
        Ok(rdv) => rdv,
        Err(e) => {
            error!(path = %cli.socket, error = %e, "failed to bind rendezvous socket");
            return ExitCode::FAILURE;
        }
    };

    info!("serving; send SIGINT or SIGTERM to stop");
    rendezvous.run(&lifecycle.terminated_flag());

    info!(
        clients = rendezvous.clients().len(),
        stored = server.storage_len(),
        "shutting down"
    );
    rendezvous.signal_shutdown();
    server.stop();

    ExitCode::SUCCESS
}
