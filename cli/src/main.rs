//! tsbridge - stdio server hosting a component language-intelligence backend.
//!
//! ```text
//! editor <-- Content-Length JSON-RPC on stdin/stdout --> server::serve
//!                                                         |
//!                                                         v
//!                                   select_backend() -> BackendClient
//!                                     bridged | sidecar + tsserver fallback
//! ```
//!
//! stdout carries the protocol, so logs go to stderr and, when it can be
//! opened, `~/.tsbridge/logs/tsbridge.log`.

mod server;

use std::{
    env,
    fs::{self, OpenOptions},
    io,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tsbridge_config::{BACKEND_ENV, TsBridgeConfig, apply_backend_override};
use tsbridge_types::BridgeSettings;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();
    let log_path = log_file.as_ref().map(|(path, _)| path.clone());
    let file_layer = log_file
        .map(|(_, file)| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(io::stderr))
        .with(file_layer)
        .with(env_filter)
        .init();

    if let Some(log_path) = log_path {
        tracing::info!(path = %log_path.display(), "Logging initialized");
    }
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();
    let Some(candidate) = log_file_path() else {
        return (None, warnings);
    };

    if let Some(parent) = candidate.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warnings.push(format!(
            "Failed to create log dir {}: {e}",
            parent.display()
        ));
        return (None, warnings);
    }

    match OpenOptions::new().create(true).append(true).open(&candidate) {
        Ok(file) => (Some((candidate, file)), warnings),
        Err(e) => {
            warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            ));
            (None, warnings)
        }
    }
}

/// `logs/tsbridge.log` next to the config file.
fn log_file_path() -> Option<PathBuf> {
    let config_path = TsBridgeConfig::path()?;
    let config_dir = config_path.parent()?;
    Some(config_dir.join("logs").join("tsbridge.log"))
}

/// Config file, then `TSBRIDGE_BACKEND`. Bad input degrades to defaults.
fn load_settings() -> BridgeSettings {
    let mut settings = match TsBridgeConfig::load() {
        Ok(config) => config
            .map(TsBridgeConfig::into_settings)
            .unwrap_or_default(),
        Err(e) => {
            tracing::warn!("{e}; using default settings");
            BridgeSettings::default()
        }
    };
    let mode = env::var(BACKEND_ENV).ok();
    if let Err(e) = apply_backend_override(&mut settings, mode.as_deref()) {
        tracing::warn!("{e}; keeping {:?}", settings.mode);
    }
    settings
}

#[tokio::main]
async fn main() -> Result<()> {
    if env::args().skip(1).any(|arg| arg == "--version") {
        println!("tsbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing();
    let settings = load_settings();
    tracing::debug!(?settings, "settings resolved");

    server::serve(settings, tokio::io::stdin(), tokio::io::stdout()).await
}
