//! Spawned tsserver transport.
//!
//! Runs `node tsserver.js` with the component plugin loaded. Requests go out
//! as JSON lines; responses and events come back Content-Length framed.
//! Every request is preceded by an `updateOpen` bringing the referenced file
//! up to date, on the same writer channel so ordering holds.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tsbridge_types::{
    BackendMode, ComponentQuery, DocumentHighlights, EncodedClassifications, ProjectInfo,
    QuickInfo, TextSpan, TsServerSettings,
};

use crate::client::BackendClient;
use crate::codec::Framing;
use crate::correlator::Correlator;
use crate::documents::DocumentStore;
use crate::forward::{CommandSender, TsForwarder};
use crate::process::{LaunchSpec, ProcessChannel, ProcessEvents, ProcessExit, ProcessSupervisor};
use crate::sync::{DocumentSynchronizer, SyncAction};

const TSSERVER_RELATIVE: &str = "node_modules/typescript/lib/tsserver.js";

#[derive(Debug, thiserror::Error)]
#[error("tsserver.js not found (tried {})", display_paths(.tried))]
pub struct TsServerNotFound {
    pub tried: Vec<PathBuf>,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Candidate `tsserver.js` locations, highest priority first.
fn tsserver_candidates(settings: &TsServerSettings, workspace_root: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(tsdk) = settings.tsdk() {
        candidates.push(tsdk.join("tsserver.js"));
    }
    // <prefix>/bin/node → <prefix>/lib/node_modules/typescript/lib/tsserver.js
    if let Ok(node) = which::which(settings.node())
        && let Some(prefix) = node.parent().and_then(Path::parent)
    {
        candidates.push(prefix.join("lib").join(TSSERVER_RELATIVE));
    }
    candidates.push(workspace_root.join(TSSERVER_RELATIVE));
    if let Some(global) = settings.global_typescript() {
        candidates.push(global.join("lib").join("tsserver.js"));
    }
    candidates
}

/// First existing `tsserver.js` among the candidates.
pub fn resolve_tsserver(
    settings: &TsServerSettings,
    workspace_root: &Path,
) -> Result<PathBuf, TsServerNotFound> {
    let candidates = tsserver_candidates(settings, workspace_root);
    match candidates.iter().find(|path| path.is_file()) {
        Some(found) => Ok(found.clone()),
        None => Err(TsServerNotFound { tried: candidates }),
    }
}

fn launch_spec(settings: &TsServerSettings, tsserver: &Path, workspace_root: &Path) -> LaunchSpec {
    let mut args = vec![
        tsserver.display().to_string(),
        "--disableAutomaticTypingAcquisition".to_string(),
        "--suppressDiagnosticEvents".to_string(),
        "--globalPlugins".to_string(),
        settings.plugin_name().to_string(),
    ];
    let probe = settings.plugin_probe_location().map(Path::to_path_buf).or_else(|| {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
    });
    if let Some(probe) = probe {
        args.push("--pluginProbeLocations".to_string());
        args.push(probe.display().to_string());
    }

    let program = which::which(settings.node()).unwrap_or_else(|_| PathBuf::from(settings.node()));
    LaunchSpec {
        program,
        args,
        cwd: Some(workspace_root.to_path_buf()),
        framing: Framing::JsonLines,
    }
}

/// Files the current process generation has been told about.
struct SyncState {
    generation: u64,
    docs: DocumentSynchronizer,
}

struct TsServerShared {
    correlator: Correlator,
    sync: Mutex<SyncState>,
}

impl TsServerShared {
    fn lock_sync(&self) -> MutexGuard<'_, SyncState> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessEvents for TsServerShared {
    fn on_message(&self, message: Value, _channel: &ProcessChannel) {
        match message.get("type").and_then(Value::as_str) {
            Some("response") => {
                let Some(seq) = message.get("request_seq").and_then(Value::as_u64) else {
                    return;
                };
                let success = message
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let body = if success {
                    Some(message.get("body").cloned().unwrap_or(Value::Null))
                } else {
                    let command = message.get("command").and_then(Value::as_str).unwrap_or("");
                    let reason = message.get("message").and_then(Value::as_str).unwrap_or("");
                    tracing::debug!(seq, command, reason, "tsserver request failed");
                    None
                };
                self.correlator.resolve(seq, body);
            }
            Some("event") => {
                let event = message.get("event").and_then(Value::as_str).unwrap_or("");
                tracing::trace!(event, "tsserver event");
            }
            _ => tracing::debug!("unrecognized tsserver message"),
        }
    }

    fn on_exit(&self, _exit: ProcessExit) {
        self.correlator.fail_all();
        self.lock_sync().docs.reset();
    }
}

fn update_open(seq: u64, action: &SyncAction) -> Value {
    let (open, closed) = match action {
        SyncAction::Open { path, text, .. } | SyncAction::Change { path, text, .. } => (
            vec![json!({ "file": path, "fileContent": &**text })],
            Vec::new(),
        ),
        SyncAction::Close { path } => (Vec::new(), vec![json!(path)]),
    };
    json!({
        "seq": seq,
        "type": "request",
        "command": "updateOpen",
        "arguments": {
            "openFiles": open,
            "changedFiles": [],
            "closedFiles": closed,
        }
    })
}

struct TsServerSender {
    supervisor: ProcessSupervisor,
    shared: Arc<TsServerShared>,
    documents: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl TsServerSender {
    /// Queue the `updateOpen` that brings `file` up to date on this process
    /// generation, if any is needed. The send happens under the sync lock so
    /// the writer sees updates in the order they were recorded.
    fn synchronize(&self, channel: &ProcessChannel, file: &Path) {
        let mut state = self.shared.lock_sync();
        if state.generation != channel.generation() {
            state.docs.reset();
            state.generation = channel.generation();
        }
        let action = match self.documents.get(file) {
            Some(doc) => state.docs.sync_open(&doc),
            None => state.docs.sync_closed(file),
        };
        if let Some(action) = action {
            let seq = self.shared.correlator.next_id();
            channel.send(update_open(seq, &action));
        }
    }

    fn close_all(&self) {
        let Some(channel) = self.supervisor.current() else {
            return;
        };
        let paths = self.shared.lock_sync().docs.drain();
        if paths.is_empty() {
            return;
        }
        let seq = self.shared.correlator.next_id();
        channel.send(json!({
            "seq": seq,
            "type": "request",
            "command": "updateOpen",
            "arguments": { "openFiles": [], "changedFiles": [], "closedFiles": paths }
        }));
    }
}

#[async_trait]
impl CommandSender for TsServerSender {
    async fn request(&self, file: &Path, command: &str, arguments: Value) -> Option<Value> {
        let channel = match self.supervisor.ensure_started().await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::debug!(command, "tsserver unavailable: {e}");
                return None;
            }
        };
        self.synchronize(&channel, file);
        self.shared
            .correlator
            .call(self.timeout, |seq| {
                channel.send(json!({
                    "seq": seq,
                    "type": "request",
                    "command": command,
                    "arguments": arguments,
                }))
            })
            .await
    }
}

/// The compiler service as a child process of this one.
pub struct TsServerClient {
    forwarder: TsForwarder<TsServerSender>,
}

impl TsServerClient {
    /// Resolve `tsserver.js` and prepare the client. Nothing is spawned until
    /// the first request.
    pub fn new(
        settings: &TsServerSettings,
        workspace_root: &Path,
        documents: Arc<dyn DocumentStore>,
    ) -> Result<Self, TsServerNotFound> {
        let tsserver = resolve_tsserver(settings, workspace_root)?;
        tracing::info!(tsserver = %tsserver.display(), "resolved tsserver");

        let shared = Arc::new(TsServerShared {
            correlator: Correlator::new("tsserver"),
            sync: Mutex::new(SyncState {
                generation: 0,
                docs: DocumentSynchronizer::new(),
            }),
        });
        let supervisor = ProcessSupervisor::new(
            "tsserver",
            launch_spec(settings, &tsserver, workspace_root),
            shared.clone(),
            None,
        );
        let sender = TsServerSender {
            supervisor,
            shared,
            documents: documents.clone(),
            timeout: settings.request_timeout(),
        };
        Ok(Self {
            forwarder: TsForwarder::new(sender, "", documents),
        })
    }

    /// Kill the running process; the next request respawns it.
    pub fn kill(&self) {
        self.forwarder.sender().supervisor.kill();
    }

    pub fn pending_count(&self) -> usize {
        self.forwarder.sender().shared.correlator.pending_count()
    }
}

#[async_trait]
impl BackendClient for TsServerClient {
    fn mode(&self) -> BackendMode {
        BackendMode::SpawnedCompilerProtocol
    }

    async fn project_info(&self, file: &Path) -> Option<ProjectInfo> {
        self.forwarder.project_info(file).await
    }

    async fn quick_info(&self, file: &Path, offset: u32) -> Option<QuickInfo> {
        self.forwarder.quick_info(file, offset).await
    }

    async fn document_highlights(
        &self,
        file: &Path,
        offset: u32,
    ) -> Option<Vec<DocumentHighlights>> {
        self.forwarder.document_highlights(file, offset).await
    }

    async fn semantic_classifications(
        &self,
        file: &Path,
        span: TextSpan,
    ) -> Option<EncodedClassifications> {
        self.forwarder.semantic_classifications(file, span).await
    }

    async fn resolve_module_name(&self, file: &Path, module_name: &str) -> Option<String> {
        self.forwarder.resolve_module_name(file, module_name).await
    }

    async fn component_query(&self, file: &Path, query: ComponentQuery) -> Option<Value> {
        self.forwarder.component_query(file, query).await
    }

    async fn dispose(&self) {
        let sender = self.forwarder.sender();
        if sender.supervisor.is_disposed() {
            return;
        }
        sender.close_all();
        sender.supervisor.dispose().await;
        sender.shared.correlator.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(json: Value) -> TsServerSettings {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn tsdk_wins_over_workspace_install() {
        let dir = tempfile::tempdir().unwrap();
        let tsdk = dir.path().join("sdk");
        std::fs::create_dir_all(&tsdk).unwrap();
        std::fs::write(tsdk.join("tsserver.js"), "").unwrap();
        let local = dir.path().join(TSSERVER_RELATIVE);
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, "").unwrap();

        let with_tsdk = settings(json!({ "node": "/nonexistent/node", "tsdk": tsdk }));
        assert_eq!(
            resolve_tsserver(&with_tsdk, dir.path()).unwrap(),
            tsdk.join("tsserver.js")
        );

        let without = settings(json!({ "node": "/nonexistent/node" }));
        assert_eq!(resolve_tsserver(&without, dir.path()).unwrap(), local);
    }

    #[test]
    fn global_typescript_is_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global/typescript");
        std::fs::create_dir_all(global.join("lib")).unwrap();
        std::fs::write(global.join("lib/tsserver.js"), "").unwrap();

        let workspace = dir.path().join("workspace");
        let s = settings(json!({ "node": "/nonexistent/node", "global_typescript": global }));
        assert_eq!(
            resolve_tsserver(&s, &workspace).unwrap(),
            global.join("lib/tsserver.js")
        );
    }

    #[test]
    fn missing_tsserver_lists_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(json!({ "node": "/nonexistent/node" }));
        let err = resolve_tsserver(&s, dir.path()).unwrap_err();
        assert_eq!(err.tried, [dir.path().join(TSSERVER_RELATIVE)]);
        assert!(err.to_string().contains("tsserver.js not found"));
    }

    #[test]
    fn launch_flags_load_plugin() {
        let s = settings(json!({
            "node": "/nonexistent/node",
            "plugin_probe_location": "/opt/plugins",
        }));
        let spec = launch_spec(&s, Path::new("/ts/tsserver.js"), Path::new("/w"));
        assert_eq!(spec.program, PathBuf::from("/nonexistent/node"));
        assert_eq!(
            spec.args,
            [
                "/ts/tsserver.js",
                "--disableAutomaticTypingAcquisition",
                "--suppressDiagnosticEvents",
                "--globalPlugins",
                "@vue/typescript-plugin",
                "--pluginProbeLocations",
                "/opt/plugins",
            ]
        );
        assert_eq!(spec.framing, Framing::JsonLines);
    }

    #[test]
    fn update_open_encodes_each_action() {
        let text: Arc<str> = "let a;".into();
        let open = update_open(
            7,
            &SyncAction::Change {
                path: PathBuf::from("/w/a.ts"),
                version: 2,
                text,
            },
        );
        assert_eq!(open["seq"], 7);
        assert_eq!(open["command"], "updateOpen");
        assert_eq!(
            open["arguments"]["openFiles"],
            json!([{ "file": "/w/a.ts", "fileContent": "let a;" }])
        );

        let close = update_open(
            8,
            &SyncAction::Close {
                path: PathBuf::from("/w/a.ts"),
            },
        );
        assert_eq!(close["arguments"]["closedFiles"], json!(["/w/a.ts"]));
        assert_eq!(close["arguments"]["openFiles"], json!([]));
    }
}
