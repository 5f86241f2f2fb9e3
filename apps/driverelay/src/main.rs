//! DriveRelay entry point.
//!
//! Usage: `driverelay [FILE]...`

mod app;
mod config;
mod liveness;
mod sink;

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting DriveRelay");

    let config = config::RelayConfig::load()?;
    tracing::info!(
        folder = %config.folder_id,
        max_concurrent = config.max_concurrent,
        chunk_size = config.chunk_size,
        "configuration loaded"
    );

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();

    let rt = tokio::runtime::Runtime::new()?;
    let all_ok = rt.block_on(app::run(config, paths))?;

    if all_ok {
        tracing::info!("all transfers finished");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!("some transfers did not complete");
        Ok(ExitCode::FAILURE)
    }
}
