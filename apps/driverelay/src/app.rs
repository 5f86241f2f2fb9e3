//! Wires configuration, the Drive backend and the orchestrator together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use driverelay_drive::{Client, StaticToken};
use driverelay_relay::{DriveBackend, InboundFile, RelayOrchestrator};
use driverelay_transfer::TransferId;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::liveness;
use crate::sink::LogSink;

/// Relays every file in `paths` and returns whether all of them succeeded.
///
/// With no paths the process only serves the liveness endpoint until Ctrl-C.
/// Ctrl-C while relaying closes admission and cancels every transfer in
/// flight.
pub async fn run(config: RelayConfig, paths: Vec<PathBuf>) -> anyhow::Result<bool> {
    let shutdown = CancellationToken::new();

    let liveness = match config.port {
        Some(port) => {
            let listener = TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("failed to bind liveness port {port}"))?;
            tracing::info!(port, "liveness endpoint listening");
            Some(tokio::spawn(liveness::serve(listener, shutdown.clone())))
        }
        None => None,
    };

    let client = Client::new()?.with_upload_url(config.upload_url.clone());
    let tokens = Arc::new(StaticToken::new(config.access_token.clone()));
    let backend = Arc::new(DriveBackend::new(client, tokens));
    let orchestrator = RelayOrchestrator::new(backend, Arc::new(LogSink), config.relay_settings());

    let mut failures = 0usize;
    let mut relays = JoinSet::new();
    for path in paths.iter() {
        match InboundFile::from_path(TransferId::generate(), path, config.chunk_size).await {
            Ok(inbound) => {
                let orchestrator = orchestrator.clone();
                relays.spawn(async move { orchestrator.relay(inbound).await });
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot open file");
                failures += 1;
            }
        }
    }

    if paths.is_empty() {
        tracing::info!("no files given, serving until interrupted");
        tokio::signal::ctrl_c().await?;
        tracing::info!("SIGINT received, shutting down");
    }

    let mut interrupted = false;
    loop {
        tokio::select! {
            joined = relays.join_next() => match joined {
                None => break,
                Some(Ok(outcome)) if outcome.is_success() => {}
                Some(Ok(_)) => failures += 1,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "relay task panicked");
                    failures += 1;
                }
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let cancelled = orchestrator.shutdown();
                tracing::info!(cancelled, "SIGINT received, cancelling transfers");
            }
        }
    }

    shutdown.cancel();
    if let Some(handle) = liveness {
        match handle.await {
            Ok(Err(e)) => tracing::error!("liveness server error: {e}"),
            Err(e) => tracing::error!("liveness task failed: {e}"),
            Ok(Ok(())) => {}
        }
    }

    Ok(failures == 0)
}
