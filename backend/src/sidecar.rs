//! Language-server sidecar transport for plain script files.
//!
//! JSON-RPC over stdio with Content-Length frames. The process is started
//! with an `initialize` / `initialized` exchange before any document traffic.
//! Only hover and document highlights go over the wire; project lookup and
//! module resolution are answered from the file system.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tsbridge_types::{
    BackendMode, ComponentQuery, DocumentHighlights, EncodedClassifications, HighlightSpan,
    HighlightSpanKind, ProjectInfo, QuickInfo, SidecarSettings, TextSpan,
};

use crate::client::BackendClient;
use crate::codec::Framing;
use crate::correlator::Correlator;
use crate::documents::{DocumentStore, read_text};
use crate::position::LineIndex;
use crate::process::{
    Handshake, LaunchSpec, ProcessChannel, ProcessEvents, ProcessExit, ProcessSupervisor,
    StartError,
};
use crate::project::{CompilerOptionsCache, find_project_config, resolve_module};
use crate::protocol::{
    Incoming, LspDocumentHighlight, LspHover, Notification, Request, did_change_params,
    did_close_params, did_open_params, hover_text, initialize_params, method_not_found,
    parse_incoming, path_to_file_uri, text_document_position_params,
};
use crate::sync::{DocumentSynchronizer, SyncAction};

/// Bound on the `shutdown` request during dispose.
const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

fn encode<T: Serialize>(message: &T) -> Option<Value> {
    serde_json::to_value(message).ok()
}

fn send_request(
    channel: &ProcessChannel,
    id: u64,
    method: &'static str,
    params: Option<Value>,
) -> bool {
    encode(&Request::new(id, method, params)).is_some_and(|msg| channel.send(msg))
}

fn send_notification(channel: &ProcessChannel, method: &'static str, params: Option<Value>) -> bool {
    encode(&Notification::new(method, params)).is_some_and(|msg| channel.send(msg))
}

/// LSP language id for a declared extension.
fn language_id(extension: &str) -> &'static str {
    match extension.rsplit('.').next().unwrap_or(extension) {
        "tsx" => "typescriptreact",
        "jsx" => "javascriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        _ => "typescript",
    }
}

struct SyncState {
    generation: u64,
    docs: DocumentSynchronizer,
}

struct SidecarShared {
    correlator: Correlator,
    sync: Mutex<SyncState>,
}

impl SidecarShared {
    fn lock_sync(&self) -> MutexGuard<'_, SyncState> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessEvents for SidecarShared {
    fn on_message(&self, message: Value, channel: &ProcessChannel) {
        match parse_incoming(&message) {
            Some(Incoming::Response { id, result, error }) => {
                let Some(id) = id.as_u64() else {
                    return;
                };
                if let Some(error) = error {
                    tracing::debug!(id, %error, "sidecar request failed");
                    self.correlator.resolve(id, None);
                } else {
                    // A null result still acknowledges the request.
                    self.correlator.resolve(id, Some(result.unwrap_or(Value::Null)));
                }
            }
            Some(Incoming::Request { id, method, .. }) => {
                tracing::debug!(%method, "declining sidecar request");
                channel.send(method_not_found(&id, &method));
            }
            Some(Incoming::Notification { method, .. }) => {
                tracing::trace!(%method, "sidecar notification");
            }
            None => tracing::debug!("unrecognized sidecar message"),
        }
    }

    fn on_exit(&self, _exit: ProcessExit) {
        self.correlator.fail_all();
        self.lock_sync().docs.reset();
    }
}

fn initialize_handshake(shared: Arc<SidecarShared>, timeout: Duration) -> Handshake {
    Arc::new(move |channel: ProcessChannel| {
        let shared = shared.clone();
        async move {
            let response = shared
                .correlator
                .call(timeout, |id| {
                    send_request(&channel, id, "initialize", Some(initialize_params()))
                })
                .await;
            if response.is_none() {
                return Err(StartError::Handshake {
                    name: "sidecar".to_string(),
                    message: "no initialize response".to_string(),
                });
            }
            send_notification(&channel, "initialized", Some(serde_json::json!({})));
            Ok(())
        }
        .boxed()
    })
}

/// Encode one synchronization step as its LSP notification.
fn send_sync(channel: &ProcessChannel, uri: &str, language: &str, action: &SyncAction) -> bool {
    let (method, params) = match action {
        SyncAction::Open { version, text, .. } => (
            "textDocument/didOpen",
            did_open_params(uri, language, *version, text),
        ),
        SyncAction::Change { version, text, .. } => (
            "textDocument/didChange",
            did_change_params(uri, *version, text),
        ),
        SyncAction::Close { .. } => ("textDocument/didClose", did_close_params(uri)),
    };
    send_notification(channel, method, Some(params))
}

/// A file made current on the sidecar, ready for a positional request.
struct Prepared {
    channel: ProcessChannel,
    uri: String,
    index: LineIndex,
}

pub struct SidecarClient {
    settings: SidecarSettings,
    supervisor: ProcessSupervisor,
    shared: Arc<SidecarShared>,
    documents: Arc<dyn DocumentStore>,
    compiler_options: CompilerOptionsCache,
}

impl SidecarClient {
    /// Prepare the client. The sidecar is spawned on first use.
    pub fn new(
        settings: &SidecarSettings,
        workspace_root: &Path,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let shared = Arc::new(SidecarShared {
            correlator: Correlator::new("sidecar"),
            sync: Mutex::new(SyncState {
                generation: 0,
                docs: DocumentSynchronizer::new(),
            }),
        });
        let spec = LaunchSpec {
            program: settings.command().into(),
            args: settings.args().to_vec(),
            cwd: Some(workspace_root.to_path_buf()),
            framing: Framing::ContentLength,
        };
        let handshake = initialize_handshake(shared.clone(), settings.request_timeout());
        let supervisor = ProcessSupervisor::new("sidecar", spec, shared.clone(), Some(handshake));
        Self {
            settings: settings.clone(),
            supervisor,
            shared,
            documents,
            compiler_options: CompilerOptionsCache::new(),
        }
    }

    /// Kill the running sidecar; the next request respawns it.
    pub fn kill(&self) {
        self.supervisor.kill();
    }

    pub fn pending_count(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    async fn request(
        &self,
        channel: &ProcessChannel,
        method: &'static str,
        params: Value,
    ) -> Option<Value> {
        self.shared
            .correlator
            .call(self.settings.request_timeout(), |id| {
                send_request(channel, id, method, Some(params))
            })
            .await
    }

    /// Start the sidecar if needed and bring `file` up to date on it.
    ///
    /// Host documents are sent at the host's version. Files the host has not
    /// opened are sent with their disk content and resent whenever that
    /// content changes; a file the host has since closed is closed on the
    /// sidecar before its disk copy is opened.
    async fn prepare(&self, file: &Path) -> Option<Prepared> {
        let extension = self.settings.matching_extension(file)?;
        let disk = match self.documents.get(file) {
            Some(_) => None,
            None => Some(read_text(self.documents.as_ref(), file).await?),
        };
        let uri = match path_to_file_uri(file) {
            Ok(uri) => uri.to_string(),
            Err(e) => {
                tracing::debug!("{e}");
                return None;
            }
        };
        let channel = match self.supervisor.ensure_started().await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::debug!("sidecar unavailable: {e}");
                return None;
            }
        };

        // The host document is read and the result sent under the lock, so
        // the writer sees updates in the order they were recorded.
        let text = {
            let mut state = self.shared.lock_sync();
            if state.generation != channel.generation() {
                state.docs.reset();
                state.generation = channel.generation();
            }
            let (actions, text): (Vec<SyncAction>, _) = match (self.documents.get(file), disk) {
                (Some(doc), _) => (state.docs.sync_open(&doc).into_iter().collect(), Some(doc.text)),
                (None, Some(text)) => (state.docs.sync_disk(file, &text), Some(text)),
                // Closed by the host while its disk copy was not read.
                (None, None) => (state.docs.sync_closed(file).into_iter().collect(), None),
            };
            for action in &actions {
                send_sync(&channel, &uri, language_id(extension), action);
            }
            text
        }?;

        Some(Prepared {
            channel,
            uri,
            index: LineIndex::new(&text),
        })
    }

    fn close_all(&self) {
        let Some(channel) = self.supervisor.current() else {
            return;
        };
        for path in self.shared.lock_sync().docs.drain() {
            if let Ok(uri) = path_to_file_uri(&path) {
                send_notification(
                    &channel,
                    "textDocument/didClose",
                    Some(did_close_params(uri.as_str())),
                );
            }
        }
    }
}

/// Split hover markdown into the leading code block and the prose after it.
fn split_hover(text: &str) -> (String, String) {
    let Some(rest) = text.strip_prefix("```") else {
        return (text.trim().to_string(), String::new());
    };
    let Some((_, body)) = rest.split_once('\n') else {
        return (text.trim().to_string(), String::new());
    };
    match body.split_once("```") {
        Some((code, docs)) => (code.trim().to_string(), docs.trim().to_string()),
        None => (body.trim().to_string(), String::new()),
    }
}

fn highlight_kind(kind: Option<u8>) -> HighlightSpanKind {
    match kind {
        Some(2) => HighlightSpanKind::Reference,
        Some(3) => HighlightSpanKind::WrittenReference,
        _ => HighlightSpanKind::None,
    }
}

#[async_trait]
impl BackendClient for SidecarClient {
    fn mode(&self) -> BackendMode {
        BackendMode::SpawnedLanguageProtocol
    }

    fn supports_file(&self, file: &Path) -> bool {
        self.settings.matching_extension(file).is_some()
    }

    async fn project_info(&self, file: &Path) -> Option<ProjectInfo> {
        find_project_config(file)
            .await
            .map(|config_file_name| ProjectInfo { config_file_name })
    }

    async fn quick_info(&self, file: &Path, offset: u32) -> Option<QuickInfo> {
        let prepared = self.prepare(file).await?;
        let params = text_document_position_params(&prepared.uri, prepared.index.position(offset));
        let result = self
            .request(&prepared.channel, "textDocument/hover", params)
            .await?;
        let hover: LspHover = serde_json::from_value(result).ok()?;

        let text = hover_text(&hover.contents);
        if text.trim().is_empty() {
            return None;
        }
        let text_span = match hover.range {
            Some(range) => TextSpan::from_bounds(
                prepared.index.offset(range.start),
                prepared.index.offset(range.end),
            ),
            None => TextSpan::new(offset, 0),
        };
        let (display_string, documentation) = split_hover(&text);
        Some(QuickInfo {
            text_span,
            display_string,
            documentation,
            ..QuickInfo::default()
        })
    }

    async fn document_highlights(
        &self,
        file: &Path,
        offset: u32,
    ) -> Option<Vec<DocumentHighlights>> {
        let prepared = self.prepare(file).await?;
        let params = text_document_position_params(&prepared.uri, prepared.index.position(offset));
        let result = self
            .request(&prepared.channel, "textDocument/documentHighlight", params)
            .await?;
        let highlights: Vec<LspDocumentHighlight> = serde_json::from_value(result).ok()?;
        if highlights.is_empty() {
            return None;
        }
        let highlight_spans = highlights
            .into_iter()
            .map(|h| HighlightSpan {
                text_span: TextSpan::from_bounds(
                    prepared.index.offset(h.range.start),
                    prepared.index.offset(h.range.end),
                ),
                kind: highlight_kind(h.kind),
            })
            .collect();
        Some(vec![DocumentHighlights {
            file_name: file.to_path_buf(),
            highlight_spans,
        }])
    }

    async fn semantic_classifications(
        &self,
        _file: &Path,
        _span: TextSpan,
    ) -> Option<EncodedClassifications> {
        None
    }

    async fn resolve_module_name(&self, file: &Path, module_name: &str) -> Option<String> {
        let resolved = resolve_module(file, module_name, &self.compiler_options).await?;
        Some(resolved.display().to_string())
    }

    async fn component_query(&self, _file: &Path, _query: ComponentQuery) -> Option<Value> {
        None
    }

    async fn dispose(&self) {
        if self.supervisor.is_disposed() {
            return;
        }
        if let Some(channel) = self.supervisor.current() {
            self.close_all();
            let acknowledged = self
                .shared
                .correlator
                .call(SHUTDOWN_REQUEST_TIMEOUT, |id| {
                    send_request(&channel, id, "shutdown", None)
                })
                .await
                .is_some();
            if acknowledged {
                send_notification(&channel, "exit", None);
            }
        }
        self.supervisor.dispose().await;
        self.shared.correlator.fail_all();
    }
}
