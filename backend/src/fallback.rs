//! Sidecar-first composition: a primary client for the files it declares,
//! a secondary client for everything else and for whatever the primary
//! could not answer.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::sync::watch;
use tsbridge_types::{
    BackendMode, ComponentQuery, DocumentHighlights, EncodedClassifications, ProjectInfo,
    QuickInfo, TextSpan, WarmupOutcome, WarmupSettings,
};

use crate::client::BackendClient;
use crate::documents::DocumentStore;
use crate::readiness::HoverReadiness;
use crate::warmup::Warmup;

pub struct FallbackClient {
    primary: Arc<dyn BackendClient>,
    secondary: Arc<dyn BackendClient>,
    documents: Arc<dyn DocumentStore>,
    readiness: Arc<HoverReadiness>,
    warmup_settings: WarmupSettings,
    warmup: OnceLock<Shared<BoxFuture<'static, WarmupOutcome>>>,
    stop: watch::Sender<bool>,
    disposed: AtomicBool,
}

impl FallbackClient {
    pub fn new(
        primary: Arc<dyn BackendClient>,
        secondary: Arc<dyn BackendClient>,
        documents: Arc<dyn DocumentStore>,
        warmup_settings: WarmupSettings,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            primary,
            secondary,
            documents,
            readiness: Arc::new(HoverReadiness::new()),
            warmup_settings,
            warmup: OnceLock::new(),
            stop,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn secondary_mode(&self) -> BackendMode {
        self.secondary.mode()
    }

    fn primary_for(&self, file: &Path) -> Option<&dyn BackendClient> {
        self.primary
            .supports_file(file)
            .then(|| self.primary.as_ref())
    }
}

#[async_trait]
impl BackendClient for FallbackClient {
    fn mode(&self) -> BackendMode {
        self.primary.mode()
    }

    async fn project_info(&self, file: &Path) -> Option<ProjectInfo> {
        if let Some(info) = self.primary.project_info(file).await {
            return Some(info);
        }
        self.secondary.project_info(file).await
    }

    async fn quick_info(&self, file: &Path, offset: u32) -> Option<QuickInfo> {
        let mut info = None;
        if let Some(primary) = self.primary_for(file) {
            info = primary.quick_info(file, offset).await;
        }
        if info.is_none() {
            info = self.secondary.quick_info(file, offset).await;
        }
        // Readiness means the hover path ran, not that it found anything.
        self.readiness.mark_ready();
        info
    }

    async fn document_highlights(
        &self,
        file: &Path,
        offset: u32,
    ) -> Option<Vec<DocumentHighlights>> {
        if let Some(primary) = self.primary_for(file)
            && let Some(highlights) = primary.document_highlights(file, offset).await
        {
            return Some(highlights);
        }
        self.secondary.document_highlights(file, offset).await
    }

    async fn semantic_classifications(
        &self,
        file: &Path,
        span: TextSpan,
    ) -> Option<EncodedClassifications> {
        self.secondary.semantic_classifications(file, span).await
    }

    async fn resolve_module_name(&self, file: &Path, module_name: &str) -> Option<String> {
        if let Some(primary) = self.primary_for(file)
            && let Some(resolved) = primary.resolve_module_name(file, module_name).await
        {
            return Some(resolved);
        }
        self.secondary.resolve_module_name(file, module_name).await
    }

    async fn component_query(&self, file: &Path, query: ComponentQuery) -> Option<Value> {
        self.secondary.component_query(file, query).await
    }

    async fn warmup(&self) -> WarmupOutcome {
        let run = self.warmup.get_or_init(|| {
            Warmup {
                primary: self.primary.clone(),
                secondary: self.secondary.clone(),
                documents: self.documents.clone(),
                settings: self.warmup_settings,
                readiness: self.readiness.clone(),
                stop: self.stop.subscribe(),
            }
            .run()
            .boxed()
            .shared()
        });
        run.clone().await
    }

    async fn await_ready_for_hover(&self, timeout: Duration) -> bool {
        self.readiness.wait(timeout).await
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.send_replace(true);
        self.readiness.dispose();
        self.primary.dispose().await;
        self.secondary.dispose().await;
    }
}
