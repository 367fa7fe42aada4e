//! `epaxosd`: loads a replica's configuration, wires up its peer
//! messengers and instance log, and serves the `epaxos.Epaxos` RPCs
//! until signalled.

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Parser;
use epaxos_core::{spawn_messenger, Event, PeerHandle, Replica, DEFAULT_QUEUE_CAPACITY};
use epaxos_server::cli::{Cli, Commands};
use epaxos_server::config::ConfigLoader;
use epaxos_server::rpc::EpaxosService;
use epaxos_server::transport::GrpcPeerTransport;
use epaxos_wire::proto::epaxos_server::EpaxosServer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tracing::{error, info};

/// Capacity of the replica's own event channel. Bounded so that a
/// saturated actor backpressures its RPC frontends, per the
/// concurrency model.
const EVENTS_QUEUE_CAPACITY: usize = 1024;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Commands::Serve {
        name,
        seed,
        uptime,
        outpath,
    } = cli.command;

    let runtime = tokio::runtime::Runtime::new().context("failed to start the tokio runtime")?;
    let result = runtime.block_on(serve(name, seed, uptime, outpath));

    if let Err(e) = &result {
        error!(error = %e, "epaxosd exiting with an error");
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(
    name: Option<String>,
    seed: Option<u64>,
    uptime: Option<std::time::Duration>,
    outpath: Option<std::path::PathBuf>,
) -> Result<()> {
    let mut config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;

    if let Some(name) = name {
        config.name = name;
    }
    if let Some(seed) = seed {
        config.seed = Some(seed);
    }
    if let Some(uptime) = uptime {
        config.uptime = Some(uptime);
    }
    if let Some(outpath) = outpath {
        config.metrics = Some(outpath);
    }
    config.validate().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let pid = config.pid();
    let own_address = config
        .addresses()
        .get(&pid)
        .copied()
        .context("local peer entry is missing an address")?;

    info!(pid, %own_address, "starting replica");

    let (events_tx, events_rx) = mpsc::channel::<Event>(EVENTS_QUEUE_CAPACITY);

    let addresses = config.addresses();
    let mut peers: HashMap<epaxos_types::ReplicaId, PeerHandle> = HashMap::new();
    let mut messenger_tasks: Vec<JoinHandle<()>> = Vec::new();
    for remote in config.remotes() {
        let address = *addresses
            .get(&remote)
            .with_context(|| format!("peer {remote} is missing an address"))?;
        let transport = GrpcPeerTransport::new(remote, address, config.timeout);
        let (handle, join) =
            spawn_messenger(remote, transport, events_tx.clone(), DEFAULT_QUEUE_CAPACITY);
        peers.insert(remote, handle);
        messenger_tasks.push(join);
    }

    let mut replica = Replica::new(pid, peers, config.thrifty).context("failed to build replica")?;
    let replica_task: JoinHandle<Result<(), epaxos_core::ReplicaError>> =
        tokio::spawn(async move { replica.run(events_rx).await });

    let service = EpaxosServer::new(EpaxosService::new(events_tx.clone()));
    let server = Server::builder().add_service(service);

    tokio::select! {
        result = server.serve_with_shutdown(own_address, shutdown_signal(uptime)) => {
            result.context("RPC server failed")?;
        }
        result = replica_task => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("replica event loop failed"),
                Err(e) => Err(e).context("replica task panicked"),
            };
        }
    }

    drop(events_tx);
    for join in messenger_tasks {
        join.abort();
    }

    info!("replica shut down cleanly");
    Ok(())
}

/// Resolves when either a ctrl-c or SIGTERM is received, or (if set) the
/// configured uptime elapses.
async fn shutdown_signal(uptime: Option<std::time::Duration>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let timer = async {
        match uptime {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
        () = timer => {}
    }
}

