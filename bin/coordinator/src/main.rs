//! The WabiSabi coinjoin coordinator.
//!
//! Runs rounds against a bitcoind node and serves participants over JSON-RPC until interrupted.

use std::{fs, path::Path, sync::Arc};

use anyhow::Context;
use bitcoind::BitcoindClient;
use clap::Parser;
use config::Config;
use constants::{DEFAULT_THREAD_COUNT, DEFAULT_THREAD_STACK_SIZE};
use rpc_server::{start_rpc, CoordinatorRpc};
use serde::de::DeserializeOwned;
use tokio::{runtime, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use wabisabi_common::{
    logging::{self, LoggerConfig},
    periodic::PeriodicRunner,
};
use wabisabi_coordinator::Arena;

mod args;
mod bitcoind;
mod config;
mod rpc_server;

mod constants;

fn main() {
    logging::init(LoggerConfig::with_base_name("wabisabi-coordinator"));

    let cli = args::Cli::parse();
    info!(config = %cli.config.display(), "starting coordinator");

    let config = parse_toml::<Config>(cli.config);

    let runtime = runtime::Builder::new_multi_thread()
        .worker_threads(config.num_threads.unwrap_or(DEFAULT_THREAD_COUNT).into())
        .thread_stack_size(
            config
                .thread_stack_size
                .unwrap_or(DEFAULT_THREAD_STACK_SIZE),
        )
        .enable_all()
        .build()
        .expect("must be able to create runtime");

    if let Err(e) = runtime.block_on(run(config)) {
        panic!("coordinator crashed: {e:?}");
    }

    info!("coordinator shutdown complete");
}

async fn run(config: Config) -> anyhow::Result<()> {
    let node = Arc::new(BitcoindClient::new(&config.btc_client)?);
    info!(url = %config.btc_client.url, network = %config.wabisabi.network, "using bitcoind");

    let arena = Arc::new(Arena::new(config.wabisabi, node));
    let shutdown = CancellationToken::new();

    let stepper = PeriodicRunner::spawn(arena.clone(), config.tick_interval, shutdown.clone());
    let server = start_rpc(
        CoordinatorRpc::new(arena, shutdown.clone()),
        &config.rpc_addr,
    )
    .await?;
    info!(rpc_addr = %config.rpc_addr, "coordinator ready");

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    info!("received ctrl-c, shutting down");
    shutdown.cancel();

    let stopping = async {
        if server.stop().is_err() {
            debug!("rpc server already stopped");
        }
        server.stopped().await;
        stepper.stop().await;
    };
    if timeout(config.shutdown_timeout, stopping).await.is_err() {
        warn!(timeout = ?config.shutdown_timeout, "shutdown did not finish in time");
    }

    Ok(())
}

/// Reads and parses a TOML file from the given path into the given type `T`.
///
/// # Panics
///
/// 1. If the file is not readable.
/// 2. If the contents of the file cannot be deserialized into the given type `T`.
fn parse_toml<T>(path: impl AsRef<Path>) -> T
where
    T: std::fmt::Debug + DeserializeOwned,
{
    let path = path.as_ref();
    fs::read_to_string(path)
        .map(|p| {
            trace!(?p, "read file");

            let parsed = toml::from_str::<T>(&p).unwrap_or_else(|e| {
                panic!("failed to parse TOML file: {e:?}");
            });
            debug!(?parsed, "parsed TOML file");

            parsed
        })
        .unwrap_or_else(|e| {
            panic!("failed to read TOML file {}: {e}", path.display());
        })
}
