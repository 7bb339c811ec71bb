//! Editor-facing JSON-RPC loop.
//!
//! Lifecycle and document notifications are handled inline on the read
//! loop; `tsbridge/*` requests are spawned so a slow backend call never
//! blocks document updates or other requests. In bridged mode the backend's
//! tsserver traffic is relayed to the editor as `tsserver/request`
//! notifications and answered with `tsserver/response`.

use std::env;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tsbridge_backend::codec::{Framing, MessageReader, MessageWriter};
use tsbridge_backend::protocol::{
    INVALID_PARAMS, Incoming, METHOD_NOT_FOUND, error_response, file_uri_to_path,
    method_not_found, parse_incoming, success_response,
};
use tsbridge_backend::{
    BackendClient, DocumentStore, HostBridge, InMemoryDocuments, SelectedBackend, select_backend,
};
use tsbridge_types::{BridgeSettings, ComponentQuery, TextSpan};

const INVALID_REQUEST: i64 = -32600;
const INTERNAL_ERROR: i64 = -32603;
const SERVER_NOT_INITIALIZED: i64 = -32002;

/// How long queued replies get to reach the editor after the loop ends.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Forwards backend tsserver requests to the editor.
struct EditorRelay {
    outbound: mpsc::UnboundedSender<Value>,
}

impl HostBridge for EditorRelay {
    fn send_request(&self, id: u64, command: &str, arguments: Value) -> bool {
        self.outbound
            .send(json!({
                "jsonrpc": "2.0",
                "method": "tsserver/request",
                "params": [id, command, arguments],
            }))
            .is_ok()
    }
}

#[derive(Debug)]
struct RequestError {
    code: i64,
    message: String,
}

impl RequestError {
    fn invalid_params(method: &str, err: &serde_json::Error) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: format!("invalid params for {method}: {err}"),
        }
    }
}

fn params_of<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, RequestError> {
    serde_json::from_value(params).map_err(|e| RequestError::invalid_params(method, &e))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, RequestError> {
    serde_json::to_value(value).map_err(|e| RequestError {
        code: INTERNAL_ERROR,
        message: format!("failed to serialize result: {e}"),
    })
}

#[derive(Deserialize)]
struct FileParams {
    file: PathBuf,
}

#[derive(Deserialize)]
struct PositionParams {
    file: PathBuf,
    offset: u32,
}

#[derive(Deserialize)]
struct SpanParams {
    file: PathBuf,
    span: TextSpan,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModuleParams {
    file: PathBuf,
    module_name: String,
}

#[derive(Deserialize)]
struct ComponentParams {
    file: PathBuf,
    query: ComponentQuery,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadyParams {
    #[serde(default)]
    timeout_ms: u64,
}

/// Run one `tsbridge/*` request against the backend. `None` results
/// serialize as `null`.
async fn dispatch(
    client: &dyn BackendClient,
    method: &str,
    params: Value,
) -> Result<Value, RequestError> {
    match method {
        "tsbridge/projectInfo" => {
            let p: FileParams = params_of(method, params)?;
            to_result(client.project_info(&p.file).await)
        }
        "tsbridge/quickInfo" => {
            let p: PositionParams = params_of(method, params)?;
            to_result(client.quick_info(&p.file, p.offset).await)
        }
        "tsbridge/documentHighlights" => {
            let p: PositionParams = params_of(method, params)?;
            to_result(client.document_highlights(&p.file, p.offset).await)
        }
        "tsbridge/semanticClassifications" => {
            let p: SpanParams = params_of(method, params)?;
            to_result(client.semantic_classifications(&p.file, p.span).await)
        }
        "tsbridge/resolveModuleName" => {
            let p: ModuleParams = params_of(method, params)?;
            to_result(client.resolve_module_name(&p.file, &p.module_name).await)
        }
        "tsbridge/componentQuery" => {
            let p: ComponentParams = params_of(method, params)?;
            to_result(client.component_query(&p.file, p.query).await)
        }
        "tsbridge/awaitReadyForHover" => {
            let p: ReadyParams = params_of(method, params)?;
            let ready = client
                .await_ready_for_hover(Duration::from_millis(p.timeout_ms))
                .await;
            Ok(Value::Bool(ready))
        }
        "tsbridge/warmup" => to_result(client.warmup().await),
        _ => Err(RequestError {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }),
    }
}

#[derive(Deserialize)]
struct TextDocumentItem {
    uri: String,
    version: i32,
    text: String,
}

#[derive(Deserialize)]
struct VersionedTextDocumentIdentifier {
    uri: String,
    version: i32,
}

#[derive(Deserialize)]
struct TextDocumentIdentifier {
    uri: String,
}

#[derive(Deserialize)]
struct ContentChange {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidOpenParams {
    text_document: TextDocumentItem,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidChangeParams {
    text_document: VersionedTextDocumentIdentifier,
    content_changes: Vec<ContentChange>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidCloseParams {
    text_document: TextDocumentIdentifier,
}

fn document_path(uri: &str) -> Option<PathBuf> {
    let path = file_uri_to_path(uri);
    if path.is_none() {
        tracing::debug!(uri, "ignoring non-file document");
    }
    path
}

/// `rootUri`, then `rootPath`, then the first workspace folder.
fn workspace_root(params: &Value) -> Option<PathBuf> {
    if let Some(uri) = params.get("rootUri").and_then(Value::as_str) {
        return file_uri_to_path(uri);
    }
    if let Some(path) = params.get("rootPath").and_then(Value::as_str) {
        return Some(PathBuf::from(path));
    }
    params
        .get("workspaceFolders")
        .and_then(Value::as_array)
        .and_then(|folders| folders.first())
        .and_then(|folder| folder.get("uri"))
        .and_then(Value::as_str)
        .and_then(file_uri_to_path)
}

struct Server {
    settings: BridgeSettings,
    documents: Arc<InMemoryDocuments>,
    outbound: mpsc::UnboundedSender<Value>,
    backend: Option<SelectedBackend>,
    shutting_down: bool,
}

impl Server {
    fn send(&self, message: Value) {
        if self.outbound.send(message).is_err() {
            tracing::warn!("editor writer closed; dropping message");
        }
    }

    async fn handle_request(&mut self, id: Value, method: &str, params: Option<Value>) {
        match method {
            "initialize" => {
                let reply = self.initialize(&id, params.unwrap_or(Value::Null)).await;
                self.send(reply);
            }
            "shutdown" => {
                self.shutting_down = true;
                self.dispose().await;
                self.send(success_response(&id, Value::Null));
            }
            _ if method.starts_with("tsbridge/") => self.spawn_backend_request(id, method, params),
            _ => self.send(method_not_found(&id, method)),
        }
    }

    fn spawn_backend_request(&self, id: Value, method: &str, params: Option<Value>) {
        let Some(backend) = &self.backend else {
            self.send(error_response(
                &id,
                SERVER_NOT_INITIALIZED,
                "server not initialized",
            ));
            return;
        };
        if self.shutting_down {
            self.send(error_response(&id, INVALID_REQUEST, "server is shutting down"));
            return;
        }

        let client = backend.client.clone();
        let outbound = self.outbound.clone();
        let method = method.to_string();
        tokio::spawn(async move {
            let params = params.unwrap_or(Value::Null);
            let reply = match dispatch(client.as_ref(), &method, params).await {
                Ok(result) => success_response(&id, result),
                Err(e) => {
                    tracing::debug!(method = %method, code = e.code, "{}", e.message);
                    error_response(&id, e.code, &e.message)
                }
            };
            let _ = outbound.send(reply);
        });
    }

    async fn initialize(&mut self, id: &Value, params: Value) -> Value {
        if self.backend.is_some() {
            return error_response(id, INVALID_REQUEST, "server already initialized");
        }
        let root = workspace_root(&params)
            .or_else(|| env::current_dir().ok())
            .unwrap_or_default();
        tracing::info!(root = %root.display(), preference = ?self.settings.mode, "initializing");

        let settings = self.settings.clone();
        let host: Arc<dyn HostBridge> = Arc::new(EditorRelay {
            outbound: self.outbound.clone(),
        });
        let documents: Arc<dyn DocumentStore> = self.documents.clone();
        // Probing the sidecar runs a child process to completion.
        let selected = tokio::task::spawn_blocking(move || {
            select_backend(&settings, host, documents, &root)
        })
        .await;
        let selected = match selected {
            Ok(selected) => selected,
            Err(e) => {
                tracing::error!("backend selection failed: {e}");
                return error_response(id, INTERNAL_ERROR, &format!("backend selection failed: {e}"));
            }
        };

        let mode = selected.client.mode();
        tracing::info!(%mode, "backend selected");
        self.backend = Some(selected);
        success_response(
            id,
            json!({
                "capabilities": { "textDocumentSync": 1 },
                "serverInfo": { "name": "tsbridge", "version": env!("CARGO_PKG_VERSION") },
                "backendMode": mode,
            }),
        )
    }

    fn handle_notification(&mut self, method: &str, params: Option<Value>) -> ControlFlow<()> {
        let params = params.unwrap_or(Value::Null);
        match method {
            "initialized" => self.start_warmup(),
            "exit" => return ControlFlow::Break(()),
            "textDocument/didOpen" => match serde_json::from_value::<DidOpenParams>(params) {
                Ok(p) => {
                    if let Some(path) = document_path(&p.text_document.uri) {
                        self.documents
                            .upsert(&path, p.text_document.version, p.text_document.text);
                    }
                }
                Err(e) => tracing::warn!("bad didOpen params: {e}"),
            },
            "textDocument/didChange" => match serde_json::from_value::<DidChangeParams>(params) {
                // Full sync: the last change carries the whole text.
                Ok(p) => {
                    if let Some(path) = document_path(&p.text_document.uri)
                        && let Some(change) = p.content_changes.into_iter().last()
                    {
                        self.documents
                            .upsert(&path, p.text_document.version, change.text);
                    }
                }
                Err(e) => tracing::warn!("bad didChange params: {e}"),
            },
            "textDocument/didClose" => match serde_json::from_value::<DidCloseParams>(params) {
                Ok(p) => {
                    if let Some(path) = document_path(&p.text_document.uri) {
                        self.documents.close(&path);
                    }
                }
                Err(e) => tracing::warn!("bad didClose params: {e}"),
            },
            "tsserver/response" => self.relay_response(params),
            _ if method.starts_with("$/") => tracing::trace!(method, "ignoring notification"),
            _ => tracing::debug!(method, "unhandled notification"),
        }
        ControlFlow::Continue(())
    }

    fn start_warmup(&self) {
        let Some(backend) = &self.backend else {
            tracing::warn!("initialized before initialize");
            return;
        };
        let client = backend.client.clone();
        tokio::spawn(async move {
            let outcome = client.warmup().await;
            tracing::info!(?outcome, "warmup finished");
        });
    }

    fn relay_response(&self, params: Value) {
        let Some(bridge) = self.backend.as_ref().and_then(|b| b.bridge.as_ref()) else {
            tracing::debug!("tsserver/response without a bridged backend");
            return;
        };
        match serde_json::from_value::<(u64, Value)>(params) {
            Ok((id, body)) => {
                if !bridge.handle_response(id, Some(body)) {
                    tracing::debug!(id, "late or unknown tsserver response");
                }
            }
            Err(e) => tracing::warn!("bad tsserver/response params: {e}"),
        }
    }

    async fn dispose(&mut self) {
        if let Some(backend) = &self.backend {
            backend.client.dispose().await;
        }
    }
}

/// Serve one editor session until `exit` or end of input.
pub async fn serve<R, W>(settings: BridgeSettings, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, mut queue) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut writer = MessageWriter::new(output, Framing::ContentLength);
        while let Some(message) = queue.recv().await {
            if let Err(e) = writer.write_message(&message).await {
                tracing::error!("failed to write to editor: {e:#}");
                break;
            }
        }
    });

    let mut server = Server {
        settings,
        documents: Arc::new(InMemoryDocuments::new()),
        outbound,
        backend: None,
        shutting_down: false,
    };
    let mut reader = MessageReader::new(input);

    loop {
        let frame = match reader.read_message().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("editor closed input");
                break;
            }
            Err(e) => {
                tracing::error!("unreadable editor message: {e:#}");
                break;
            }
        };
        match parse_incoming(&frame) {
            Some(Incoming::Request { id, method, params }) => {
                server.handle_request(id, &method, params).await;
            }
            Some(Incoming::Notification { method, params }) => {
                if server.handle_notification(&method, params).is_break() {
                    break;
                }
            }
            Some(Incoming::Response { id, .. }) => {
                tracing::debug!(%id, "ignoring editor response");
            }
            None => tracing::warn!("ignoring malformed editor message"),
        }
    }

    if !server.shutting_down {
        tracing::warn!("exiting without shutdown");
        server.dispose().await;
    }
    drop(server);
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        tracing::debug!("editor writer still busy at exit");
    }
    Ok(())
}
