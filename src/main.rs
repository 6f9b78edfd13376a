//! Ferryman - Telegram to Signal relay
//!
//! Mirrors Telegram conversations into Signal groups it creates on demand,
//! and optionally relays Signal replies back.

mod common;
mod config;
mod media;
mod platform;
mod relay;
mod store;
mod translate;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::types::Platform;
use config::{env::get_config_path, load_and_validate};
use media::FfmpegTranscoder;
use platform::ProcessClient;
use relay::{DedupGuard, Relay};
use store::FileMappingStore;

/// How long helper processes get to exit after the relay stops.
const HELPER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Ferryman v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  State directory: {}", config.relay.state_dir.display());
    info!("  Bidirectional: {}", config.relay.bidirectional);
    info!("  Forward channels: {}", config.relay.forward_channels);
    info!("  Media workers: {}", config.media.workers);

    let store = FileMappingStore::open(&config.relay.state_dir)
        .await
        .context("Failed to open mapping store")?;
    info!("Mappings loaded from {}", store.path().display());
    let horizon = Duration::from_secs(config.dedup.horizon_hours * 3600);
    let guard = DedupGuard::open(&config.relay.state_dir, horizon)
        .await
        .context("Failed to open delivered log")?;
    if !guard.is_empty() {
        info!("Restored {} delivered keys", guard.len());
    }

    let helpers = CancellationToken::new();
    let (telegram, telegram_events, telegram_task) = ProcessClient::spawn(
        Platform::Telegram,
        config.platforms.telegram.clone(),
        helpers.clone(),
    );
    let (signal_client, signal_events, signal_task) = ProcessClient::spawn(
        Platform::Signal,
        config.platforms.signal.clone(),
        helpers.clone(),
    );

    let relay = Relay::new(
        &config,
        Arc::new(store),
        Arc::new(guard),
        telegram,
        signal_client,
        Arc::new(FfmpegTranscoder::new(config.media.ffmpeg.clone())),
    );

    let mut running = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run(telegram_events, signal_events).await })
    };

    let finished = tokio::select! {
        biased;
        _ = shutdown_signal() => None,
        result = &mut running => Some(result),
    };
    let result = match finished {
        Some(result) => result,
        None => {
            info!("Shutdown signal received - stopping relay...");
            relay.stop();
            running.await
        }
    };

    helpers.cancel();
    for (platform, task) in [(Platform::Telegram, telegram_task), (Platform::Signal, signal_task)] {
        match tokio::time::timeout(HELPER_EXIT_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} helper task panicked: {}", platform, e),
            Err(_) => warn!("{} helper did not exit in time", platform),
        }
    }

    match result {
        Ok(Ok(())) => {
            info!("Exiting...");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Relay stopped: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Relay task panicked: {}", e);
            Err(e.into())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
