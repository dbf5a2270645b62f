//! VoxLive - talk to Gemini Live from the terminal
//!
//! Usage: `voxlive [english|urdu|hindi]`. Needs `GEMINI_API_KEY` and a
//! running PulseAudio (or PipeWire) server. Runs until Ctrl-C or until the
//! session ends.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voxlive::console::ConsoleObserver;
use voxlive::gemini_client::GeminiTransport;
use voxlive::pulse::PulseDevices;
use voxlive::{AssistantConfig, ConnectionState, LanguageMode, SessionConnector};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let language = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<LanguageMode>()
            .map_err(anyhow::Error::msg)
            .context("Invalid language argument")?,
        None => LanguageMode::default(),
    };

    let config = AssistantConfig::from_env()?;
    info!("Starting voxlive ({} mode, voice {})", language, config.voice);

    let transport = Arc::new(GeminiTransport::from_config(&config));
    let devices = Arc::new(PulseDevices::from_config("voxlive", &config));
    let (observer, mut state) = ConsoleObserver::new();
    let connector = SessionConnector::new(config, transport, devices, Arc::new(observer));

    connector
        .connect(language)
        .await
        .context("Failed to start session")?;
    println!("Listening. Press Ctrl-C to quit.");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Ctrl-C received, shutting down");
        }
        _ = state.wait_for(|s| matches!(s, ConnectionState::Disconnected | ConnectionState::Error)) => {
            info!("Session ended");
        }
    }

    connector.disconnect().await;
    Ok(())
}
