//! Backend selection from the configured preference.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tsbridge_types::{BackendPreference, BridgeSettings, SidecarSettings};

use crate::bridge::{BridgeClient, HostBridge};
use crate::client::BackendClient;
use crate::documents::DocumentStore;
use crate::fallback::FallbackClient;
use crate::sidecar::SidecarClient;
use crate::tsserver::TsServerClient;

/// The chosen client, plus the bridge handle when host responses must be
/// routed to one.
pub struct SelectedBackend {
    pub client: Arc<dyn BackendClient>,
    pub bridge: Option<Arc<BridgeClient>>,
}

/// Run `<command> --version` and require a clean exit. Output is ignored.
pub fn probe_sidecar(settings: &SidecarSettings) -> bool {
    let status = Command::new(settings.command())
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::info!(command = settings.command(), %status, "sidecar probe failed");
            false
        }
        Err(e) => {
            tracing::info!(command = settings.command(), "sidecar probe failed: {e}");
            false
        }
    }
}

pub fn select_backend(
    settings: &BridgeSettings,
    host: Arc<dyn HostBridge>,
    documents: Arc<dyn DocumentStore>,
    workspace_root: &Path,
) -> SelectedBackend {
    let use_sidecar = match settings.mode {
        BackendPreference::Bridged => false,
        BackendPreference::Sidecar => true,
        BackendPreference::Auto => probe_sidecar(&settings.sidecar),
    };

    if !use_sidecar {
        tracing::info!(preference = ?settings.mode, "using bridged backend");
        let bridge = Arc::new(BridgeClient::new(host, documents));
        return SelectedBackend {
            client: bridge.clone(),
            bridge: Some(bridge),
        };
    }

    let (secondary, bridge): (Arc<dyn BackendClient>, Option<Arc<BridgeClient>>) =
        match TsServerClient::new(&settings.tsserver, workspace_root, documents.clone()) {
            Ok(tsserver) => (Arc::new(tsserver), None),
            Err(e) => {
                tracing::warn!("{e}; component queries fall back to the bridged backend (degraded)");
                let bridge = Arc::new(BridgeClient::new(host, documents.clone()));
                (bridge.clone(), Some(bridge))
            }
        };

    let sidecar = SidecarClient::new(&settings.sidecar, workspace_root, documents.clone());
    tracing::info!(
        command = settings.sidecar.command(),
        secondary = %secondary.mode(),
        "using sidecar backend"
    );
    let client = FallbackClient::new(Arc::new(sidecar), secondary, documents, settings.warmup);
    SelectedBackend {
        client: Arc::new(client),
        bridge,
    }
}
