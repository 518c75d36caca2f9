//! # scribe
//!
//! Transcription service binary. Loads settings, wires the stores, engine and
//! lifecycle manager together and serves the HTTP API until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scribe_engine::sidecar::SidecarConfig;
use scribe_engine::{JobDirectory, JobManager, SidecarEngine, TranscriptionEngine};
use scribe_settings::ScribeSettings;
use scribe_store::{ArtifactStore, MetadataStore};
use scribe_telemetry::{init_telemetry, TelemetryConfig};

/// Audio transcription service.
#[derive(Parser, Debug)]
#[command(name = "scribe", about = "Audio transcription service")]
struct Cli {
    /// Settings file (defaults to ~/.scribe/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding uploads/ and transcripts/.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Base URL of the transcription sidecar.
    #[arg(long)]
    engine_url: Option<String>,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, settings: &mut ScribeSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref dir) = self.data_dir {
            settings.storage.data_dir.clone_from(dir);
        }
        if let Some(ref url) = self.engine_url {
            settings.engine.base_url.clone_from(url);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn load_settings(cli: &Cli) -> Result<ScribeSettings> {
    let mut settings = match cli.config {
        Some(ref path) => scribe_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => scribe_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let telemetry = TelemetryConfig::from_strings(
        &settings.logging.level,
        &settings.logging.module_levels,
        settings.logging.json,
    );
    init_telemetry(&telemetry)?;
    let metrics = scribe_telemetry::metrics::install_recorder()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting scribe");

    let transcripts_dir = settings.storage.transcripts_path();
    let uploads_dir = settings.storage.uploads_path();
    let store = Arc::new(
        MetadataStore::open(&transcripts_dir, settings.storage_retry.clone())
            .await
            .with_context(|| format!("Failed to open metadata store at {}", transcripts_dir.display()))?,
    );
    let artifacts = Arc::new(
        ArtifactStore::open(&transcripts_dir, &uploads_dir)
            .await
            .context("Failed to open artifact store")?,
    );
    tracing::info!(
        transcripts = %transcripts_dir.display(),
        uploads = %uploads_dir.display(),
        "storage ready"
    );

    let engine: Arc<dyn TranscriptionEngine> = Arc::new(
        SidecarEngine::new(SidecarConfig {
            base_url: settings.engine.base_url.clone(),
            timeout: Duration::from_millis(settings.engine.timeout_ms),
            connect_timeout: Duration::from_millis(settings.engine.connect_timeout_ms),
        })
        .context("Failed to create sidecar engine")?,
    );
    tracing::info!(engine = engine.name(), url = %settings.engine.base_url, "engine configured");

    let manager = JobManager::new(Arc::clone(&store), Arc::clone(&artifacts), engine);
    let recovered = manager
        .recover_interrupted()
        .await
        .context("Startup recovery failed")?;
    if recovered > 0 {
        tracing::warn!(recovered, "jobs from a previous run were marked failed");
    }

    let config = scribe_server::ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_upload_bytes: settings.server.max_upload_bytes,
        request_timeout_secs: settings.server.request_timeout_secs,
    };
    let handle = scribe_server::start(
        config,
        manager.clone(),
        JobDirectory::new(store, artifacts),
        Some(metrics),
    )
    .await
    .context("Failed to start server")?;

    tracing::info!(port = handle.port, "scribe ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!(active_jobs = manager.active_count(), "Shutting down");
    handle.shutdown().await;
    if manager.active_count() > 0 {
        tracing::warn!(
            active_jobs = manager.active_count(),
            "exiting with jobs in flight; they will be marked failed on next start"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_can_repair_the_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"engine": {"baseUrl": ""}}"#).unwrap();
        let config = path.to_str().unwrap();

        let broken = Cli::parse_from(["scribe", "--config", config]);
        assert!(load_settings(&broken).is_err());

        let repaired = Cli::parse_from([
            "scribe",
            "--config",
            config,
            "--engine-url",
            "http://gpu-box:9000",
            "--port",
            "0",
        ]);
        let settings = load_settings(&repaired).unwrap();
        assert_eq!(settings.engine.base_url, "http://gpu-box:9000");
        assert_eq!(settings.server.port, 0);
    }
}
