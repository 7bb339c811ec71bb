//! The uniform backend interface.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tsbridge_types::{
    BackendMode, ComponentQuery, DocumentHighlights, EncodedClassifications, ProjectInfo,
    QuickInfo, TextSpan, WarmupOutcome,
};

/// Everything the editor extension asks of a backend.
///
/// Every query resolves `None` on timeout, disconnection, backend-reported
/// failure, or when the backend has no such capability. Callers never see
/// transport errors.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Whether this backend can serve requests for `file` at all.
    fn supports_file(&self, _file: &Path) -> bool {
        true
    }

    async fn project_info(&self, file: &Path) -> Option<ProjectInfo>;

    async fn quick_info(&self, file: &Path, offset: u32) -> Option<QuickInfo>;

    async fn document_highlights(&self, file: &Path, offset: u32)
    -> Option<Vec<DocumentHighlights>>;

    async fn semantic_classifications(
        &self,
        file: &Path,
        span: TextSpan,
    ) -> Option<EncodedClassifications>;

    /// Resolve `module_name` as imported from `file` to a file path.
    async fn resolve_module_name(&self, file: &Path, module_name: &str) -> Option<String>;

    /// Vue language-service query against the component in `file`.
    async fn component_query(&self, file: &Path, query: ComponentQuery) -> Option<Value>;

    async fn warmup(&self) -> WarmupOutcome {
        WarmupOutcome::NotNeeded
    }

    /// Wait until hover is expected to answer. `true` when ready.
    async fn await_ready_for_hover(&self, _timeout: Duration) -> bool {
        true
    }

    async fn dispose(&self);
}
