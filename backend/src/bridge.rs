//! Bridged transport: the compiler service runs inside the editor host and
//! is reached through a notification relay.
//!
//! Outbound `[id, command, args]` goes through [`HostBridge`]; the host
//! answers with `[id, body]`, delivered to [`BridgeClient::handle_response`].
//! The host already sees open documents, so nothing is synchronized here.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tsbridge_types::{
    BackendMode, ComponentQuery, DocumentHighlights, EncodedClassifications, ProjectInfo,
    QuickInfo, TextSpan, WarmupOutcome,
};

use crate::client::BackendClient;
use crate::correlator::Correlator;
use crate::documents::DocumentStore;
use crate::forward::{CommandSender, PLUGIN_PREFIX, TsForwarder};

pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Relay to the host's compiler service.
pub trait HostBridge: Send + Sync {
    /// Emit one request notification. `false` when the host connection is
    /// unavailable.
    fn send_request(&self, id: u64, command: &str, arguments: Value) -> bool;
}

struct BridgeSender {
    host: Arc<dyn HostBridge>,
    correlator: Correlator,
    timeout: Duration,
}

#[async_trait]
impl CommandSender for BridgeSender {
    async fn request(&self, _file: &Path, command: &str, arguments: Value) -> Option<Value> {
        self.correlator
            .call(self.timeout, |id| {
                self.host.send_request(id, command, arguments)
            })
            .await
    }
}

pub struct BridgeClient {
    forwarder: TsForwarder<BridgeSender>,
}

impl BridgeClient {
    pub fn new(host: Arc<dyn HostBridge>, documents: Arc<dyn DocumentStore>) -> Self {
        Self::with_timeout(host, documents, DEFAULT_BRIDGE_TIMEOUT)
    }

    pub fn with_timeout(
        host: Arc<dyn HostBridge>,
        documents: Arc<dyn DocumentStore>,
        timeout: Duration,
    ) -> Self {
        let sender = BridgeSender {
            host,
            correlator: Correlator::new("bridge"),
            timeout,
        };
        Self {
            forwarder: TsForwarder::new(sender, PLUGIN_PREFIX, documents),
        }
    }

    /// Deliver the host's `[id, body]` answer. A `null` body means the host
    /// had no result. Returns `false` for late or unknown ids.
    pub fn handle_response(&self, id: u64, body: Option<Value>) -> bool {
        let body = body.filter(|body| !body.is_null());
        self.forwarder.sender().correlator.resolve(id, body)
    }

    pub fn pending_count(&self) -> usize {
        self.forwarder.sender().correlator.pending_count()
    }
}

#[async_trait]
impl BackendClient for BridgeClient {
    fn mode(&self) -> BackendMode {
        BackendMode::BridgedCompilerProtocol
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

    async fn warmup(&self) -> WarmupOutcome {
        WarmupOutcome::NotNeeded
    }

    async fn await_ready_for_hover(&self, _timeout: Duration) -> bool {
        true
    }

    async fn dispose(&self) {
        self.forwarder.sender().correlator.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::documents::InMemoryDocuments;

    struct ChannelHost {
        tx: mpsc::UnboundedSender<(u64, String, Value)>,
    }

    impl HostBridge for ChannelHost {
        fn send_request(&self, id: u64, command: &str, arguments: Value) -> bool {
            self.tx.send((id, command.to_string(), arguments)).is_ok()
        }
    }

    struct DisconnectedHost;

    impl HostBridge for DisconnectedHost {
        fn send_request(&self, _id: u64, _command: &str, _arguments: Value) -> bool {
            false
        }
    }

    fn documents() -> Arc<InMemoryDocuments> {
        let docs = Arc::new(InMemoryDocuments::new());
        docs.upsert(Path::new("/w/App.vue"), 1, "let a = 1;");
        docs
    }

    #[tokio::test]
    async fn request_round_trips_through_host() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Arc::new(BridgeClient::new(Arc::new(ChannelHost { tx }), documents()));

        let request = {
            let client = client.clone();
            tokio::spawn(async move { client.project_info(Path::new("/w/App.vue")).await })
        };
        let (id, command, args) = rx.recv().await.unwrap();
        assert_eq!(command, "_vue:projectInfo");
        assert_eq!(args["file"], "/w/App.vue");

        assert!(client.handle_response(id, Some(json!({ "configFileName": "/w/tsconfig.json" }))));
        assert_eq!(
            request.await.unwrap().unwrap().config_file_name,
            PathBuf::from("/w/tsconfig.json")
        );
        assert!(!client.handle_response(id, Some(json!({}))));
    }

    #[tokio::test]
    async fn null_body_resolves_none() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Arc::new(BridgeClient::new(Arc::new(ChannelHost { tx }), documents()));
        let request = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .component_query(Path::new("/w/App.vue"), ComponentQuery::ElementNames)
                    .await
            })
        };
        let (id, command, _) = rx.recv().await.unwrap();
        assert_eq!(command, "_vue:getElementNames");
        client.handle_response(id, Some(Value::Null));
        assert!(request.await.unwrap().is_none());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn disconnected_host_resolves_immediately() {
        let client = BridgeClient::new(Arc::new(DisconnectedHost), documents());
        assert!(client.project_info(Path::new("/w/App.vue")).await.is_none());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = BridgeClient::with_timeout(
            Arc::new(ChannelHost { tx }),
            documents(),
            Duration::from_secs(30),
        );
        let started = tokio::time::Instant::now();
        assert!(client.quick_info(Path::new("/w/App.vue"), 4).await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn no_cold_start_phase() {
        let client = BridgeClient::new(Arc::new(DisconnectedHost), documents());
        assert_eq!(client.mode(), BackendMode::BridgedCompilerProtocol);
        assert_eq!(client.warmup().await, WarmupOutcome::NotNeeded);
        assert!(client.await_ready_for_hover(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn dispose_releases_pending_requests() {
        let seen = Arc::new(Mutex::new(0u32));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Arc::new(BridgeClient::new(Arc::new(ChannelHost { tx }), documents()));
        let request = {
            let client = client.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let result = client.project_info(Path::new("/w/App.vue")).await;
                *seen.lock().unwrap() += 1;
                result
            })
        };
        rx.recv().await.unwrap();
        client.dispose().await;
        assert!(request.await.unwrap().is_none());
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
