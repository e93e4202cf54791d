//! kvs-client: command-line client for the shared-memory key-value service.

use clap::{Parser, Subcommand};
use kvs::client::KvClient;
use kvs::lifecycle::Lifecycle;
use kvs::rendezvous;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kvs-client")]
#[command(about = "Client for the shared-memory key-value server")]
struct Cli {
    /// Shared memory region name
    #[arg(long, default_value = "/task_queue_shm")]
    shm_name: String,

    /// Rendezvous socket path
    #[arg(long, default_value = "/tmp/kvs.sock")]
    socket: String,

    /// Per-operation timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read a key
    Get { key: u32 },
    /// Insert or overwrite a key
    Set { key: u32, value: u32 },
    /// Insert a key only if absent
    Post { key: u32, value: u32 },
    /// Delete a key
    Del { key: u32 },
    /// set/get round-trip soak loop
    Bench {
        #[arg(long, default_value = "10000")]
        ops: u64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let timeout = Duration::from_millis(cli.timeout_ms);

    let lifecycle = match Lifecycle::install() {
        Ok(lc) => lc,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    // Announce over the rendezvous so the server can track this process.
    // The region itself is attached by name.
    match rendezvous::announce(&cli.socket) {
        Ok(handle) => debug!(handle, "announced to server"),
        Err(e) => warn!(path = %cli.socket, error = %e, "rendezvous unavailable; attaching anyway"),
    }

    let client = match KvClient::<u32, u32>::attach(&cli.shm_name) {
        Ok(client) => client,
        Err(e) => {
            error!(name = %cli.shm_name, error = %e, "failed to attach region");
            return ExitCode::FAILURE;
        }
    };

    match cli.cmd {
        Cmd::Get { key } => match client.get(key, timeout) {
            Some(value) => {
                println!("{value}");
                ExitCode::SUCCESS
            }
            None => {
                println!("(not found)");
                ExitCode::FAILURE
            }
        },
        Cmd::Set { key, value } => report(client.set(key, value, timeout)),
        Cmd::Post { key, value } => report(client.post(key, value, timeout)),
        Cmd::Del { key } => report(client.del(key, timeout)),
        Cmd::Bench { ops } => bench(&client, ops, timeout, &lifecycle),
    }
}

fn report(ok: bool) -> ExitCode {
    if ok {
        println!("ok");
        ExitCode::SUCCESS
    } else {
        println!("failed");
        ExitCode::FAILURE
    }
}

fn bench(client: &KvClient<u32, u32>, ops: u64, timeout: Duration, lifecycle: &Lifecycle) -> ExitCode {
    let start = Instant::now();
    let mut completed = 0u64;

    for i in 0..ops {
        if lifecycle.is_terminated() {
            info!(completed, "terminated early");
            break;
        }
        while lifecycle.is_paused() {
            std::thread::sleep(Duration::from_millis(10));
            if lifecycle.is_terminated() {
                break;
            }
        }

        let key = (i % 65536) as u32;
        if !client.set(key, key.wrapping_mul(31), timeout) {
            error!(key, "set failed");
            return ExitCode::FAILURE;
        }
        if client.get(key, timeout) != Some(key.wrapping_mul(31)) {
            error!(key, "get mismatch");
            return ExitCode::FAILURE;
        }
        completed += 1;
    }

    let elapsed = start.elapsed();
    info!(
        completed,
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = (completed as f64 / elapsed.as_secs_f64()) as u64,
        "bench finished"
    );
    ExitCode::SUCCESS
}
