//! Best-effort priming of freshly spawned backends, so the first interactive
//! hover does not pay the whole cold start.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::watch;
use tokio::time::Instant;
use tsbridge_types::{WarmupOutcome, WarmupSettings};

use crate::client::BackendClient;
use crate::documents::DocumentStore;
use crate::readiness::HoverReadiness;

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:const|let|var|function|class|interface|type|enum)\s+([A-Za-z_$][\w$]*)")
        .unwrap_or_else(|e| panic!("declaration pattern: {e}"))
});

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_$][\w$]*").unwrap_or_else(|e| panic!("identifier pattern: {e}"))
});

/// Probe position in UTF-16 units: a declared name, else the first
/// identifier, else the start of the text.
pub(crate) fn probe_offset(text: &str) -> u32 {
    let byte = DECLARATION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .or_else(|| IDENTIFIER.find(text))
        .map_or(0, |m| m.start());
    text[..byte].encode_utf16().count() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Primary,
    Secondary,
}

pub(crate) struct Warmup {
    pub primary: Arc<dyn BackendClient>,
    pub secondary: Arc<dyn BackendClient>,
    pub documents: Arc<dyn DocumentStore>,
    pub settings: WarmupSettings,
    /// Marked once a probe hover has run to completion.
    pub readiness: Arc<HoverReadiness>,
    /// Flips to `true` when the owning client is disposed.
    pub stop: watch::Receiver<bool>,
}

impl Warmup {
    fn target(&self, path: &Path) -> Target {
        if self.primary.supports_file(path) {
            Target::Primary
        } else {
            Target::Secondary
        }
    }

    fn client(&self, target: Target) -> &dyn BackendClient {
        match target {
            Target::Primary => self.primary.as_ref(),
            Target::Secondary => self.secondary.as_ref(),
        }
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep for `duration` or until stopped, never past `until`.
    async fn pause(&mut self, duration: std::time::Duration, until: Instant) {
        let wake = (Instant::now() + duration).min(until);
        tokio::select! {
            () = tokio::time::sleep_until(wake) => {}
            Ok(()) = self.stop.changed() => {}
        }
    }

    pub async fn run(mut self) -> WarmupOutcome {
        if !self.settings.enabled() {
            return WarmupOutcome::Disabled;
        }
        let started = Instant::now();
        let deadline = started + self.settings.deadline();
        let poll = self.settings.poll_interval();

        let open_by = started + self.settings.open_document_timeout();
        while self.documents.open_documents().is_empty() {
            if self.stopped() || Instant::now() >= open_by {
                tracing::debug!("warmup found no open documents");
                return WarmupOutcome::NoDocuments;
            }
            self.pause(poll, open_by).await;
        }

        let mut primed: Vec<Target> = Vec::new();
        let mut probes = 0usize;
        loop {
            let docs = self.documents.open_documents();
            let pending: Vec<_> = docs
                .iter()
                .map(|doc| (self.target(&doc.path), doc))
                .filter(|(target, _)| !primed.contains(target))
                .collect();
            if pending.is_empty() && !docs.is_empty() {
                tracing::info!(
                    probes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "warmup complete"
                );
                return WarmupOutcome::Primed { probes };
            }

            for (target, doc) in pending {
                if primed.contains(&target) {
                    continue;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || self.stopped() {
                    break;
                }
                let offset = probe_offset(&doc.text);
                probes += 1;
                let Ok(info) = tokio::time::timeout(
                    remaining,
                    self.client(target).quick_info(&doc.path, offset),
                )
                .await
                else {
                    continue;
                };
                self.readiness.mark_ready();
                if info.is_some() {
                    tracing::debug!(path = %doc.path.display(), ?target, "warmup probe answered");
                    primed.push(target);
                }
            }

            if self.stopped() || Instant::now() >= deadline {
                tracing::info!(probes, "warmup deadline elapsed");
                return WarmupOutcome::DeadlineElapsed { probes };
            }
            self.pause(poll, deadline).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tsbridge_types::{
        BackendMode, ComponentQuery, DocumentHighlights, EncodedClassifications, ProjectInfo,
        QuickInfo, TextSpan,
    };

    use super::*;
    use crate::documents::InMemoryDocuments;

    /// Answers hover after `answer_after` failed attempts; records offsets.
    struct Probed {
        scripts: bool,
        answer_after: usize,
        calls: AtomicUsize,
        offsets: Mutex<Vec<u32>>,
    }

    impl Probed {
        fn new(scripts: bool, answer_after: usize) -> Arc<Self> {
            Arc::new(Self {
                scripts,
                answer_after,
                calls: AtomicUsize::new(0),
                offsets: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BackendClient for Probed {
        fn mode(&self) -> BackendMode {
            BackendMode::SpawnedLanguageProtocol
        }

        fn supports_file(&self, file: &Path) -> bool {
            self.scripts && file.extension().is_some_and(|ext| ext == "ts")
        }

        async fn project_info(&self, _file: &Path) -> Option<ProjectInfo> {
            None
        }

        async fn quick_info(&self, _file: &Path, offset: u32) -> Option<QuickInfo> {
            self.offsets.lock().unwrap().push(offset);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (call >= self.answer_after).then(QuickInfo::default)
        }

        async fn document_highlights(
            &self,
            _file: &Path,
            _offset: u32,
        ) -> Option<Vec<DocumentHighlights>> {
            None
        }

        async fn semantic_classifications(
            &self,
            _file: &Path,
            _span: TextSpan,
        ) -> Option<EncodedClassifications> {
            None
        }

        async fn resolve_module_name(&self, _file: &Path, _module_name: &str) -> Option<String> {
            None
        }

        async fn component_query(&self, _file: &Path, _query: ComponentQuery) -> Option<Value> {
            None
        }

        async fn dispose(&self) {}
    }

    fn warmup(
        primary: Arc<Probed>,
        secondary: Arc<Probed>,
        documents: Arc<InMemoryDocuments>,
        settings: WarmupSettings,
    ) -> (Warmup, watch::Sender<bool>) {
        let (stop_tx, stop) = watch::channel(false);
        (
            Warmup {
                primary,
                secondary,
                documents,
                settings,
                readiness: Arc::new(HoverReadiness::new()),
                stop,
            },
            stop_tx,
        )
    }

    #[test]
    fn probe_targets_declaration_then_identifier() {
        assert_eq!(probe_offset("import x from 'y';\nconst answer = 42;"), 25);
        assert_eq!(probe_offset("  foo(1)"), 2);
        // Offsets count UTF-16 units, not bytes.
        assert_eq!(probe_offset("// é\nlet x = 1"), 9);
        assert_eq!(probe_offset("123 + 456"), 0);
        assert_eq!(probe_offset(""), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_settings_skip_everything() {
        let primary = Probed::new(true, 0);
        let (run, _stop) = warmup(
            primary.clone(),
            Probed::new(false, 0),
            Arc::new(InMemoryDocuments::new()),
            WarmupSettings::disabled(),
        );
        assert_eq!(run.run().await, WarmupOutcome::Disabled);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_documents_within_wait_window() {
        let started = Instant::now();
        let (run, _stop) = warmup(
            Probed::new(true, 0),
            Probed::new(false, 0),
            Arc::new(InMemoryDocuments::new()),
            WarmupSettings::default(),
        );
        assert_eq!(run.run().await, WarmupOutcome::NoDocuments);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn primes_each_implicated_backend_once() {
        let docs = Arc::new(InMemoryDocuments::new());
        docs.upsert(Path::new("/w/a.ts"), 1, "export const a = 1;");
        docs.upsert(Path::new("/w/b.ts"), 1, "export const b = 2;");
        docs.upsert(Path::new("/w/App.vue"), 1, "<script setup>\nlet n = 0;\n</script>");
        let primary = Probed::new(true, 0);
        let secondary = Probed::new(false, 2);
        let (run, _stop) = warmup(primary.clone(), secondary.clone(), docs, WarmupSettings::default());

        let outcome = run.run().await;
        // Primary answers the first probe; secondary answers its third.
        assert_eq!(outcome, WarmupOutcome::Primed { probes: 4 });
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*primary.offsets.lock().unwrap(), [13]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_unanswered_probing() {
        let docs = Arc::new(InMemoryDocuments::new());
        docs.upsert(Path::new("/w/a.ts"), 1, "let a;");
        let started = Instant::now();
        let (run, _stop) = warmup(
            Probed::new(true, usize::MAX),
            Probed::new(false, 0),
            docs,
            WarmupSettings::default(),
        );
        let outcome = run.run().await;
        assert!(matches!(outcome, WarmupOutcome::DeadlineElapsed { probes } if probes > 1));
        assert!(started.elapsed() >= Duration::from_secs(8));
        assert!(started.elapsed() < Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_first_document() {
        let docs = Arc::new(InMemoryDocuments::new());
        let (run, _stop) = warmup(
            Probed::new(true, 0),
            Probed::new(false, 0),
            docs.clone(),
            WarmupSettings::default(),
        );
        let task = tokio::spawn(run.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        docs.upsert(&PathBuf::from("/w/a.ts"), 1, "let a;");
        assert_eq!(task.await.unwrap(), WarmupOutcome::Primed { probes: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn completed_probe_releases_hover_waiters() {
        let docs = Arc::new(InMemoryDocuments::new());
        docs.upsert(Path::new("/w/a.ts"), 1, "let a;");
        let (run, _stop) = warmup(
            Probed::new(true, 0),
            Probed::new(false, 0),
            docs,
            WarmupSettings::default(),
        );
        let readiness = run.readiness.clone();
        let waiter = {
            let readiness = readiness.clone();
            tokio::spawn(async move { readiness.wait(Duration::from_secs(20)).await })
        };
        assert_eq!(run.run().await, WarmupOutcome::Primed { probes: 1 });
        assert!(readiness.wait(Duration::ZERO).await);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_probe_still_marks_ready() {
        let docs = Arc::new(InMemoryDocuments::new());
        docs.upsert(Path::new("/w/a.ts"), 1, "let a;");
        let (run, stop) = warmup(
            Probed::new(true, usize::MAX),
            Probed::new(false, 0),
            docs,
            WarmupSettings::default(),
        );
        let readiness = run.readiness.clone();
        let task = tokio::spawn(run.run());
        assert!(readiness.wait(Duration::from_secs(1)).await);
        let _ = stop.send(true);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_warmup_early() {
        let docs = Arc::new(InMemoryDocuments::new());
        docs.upsert(Path::new("/w/a.ts"), 1, "let a;");
        let started = Instant::now();
        let (run, stop) = warmup(
            Probed::new(true, usize::MAX),
            Probed::new(false, 0),
            docs,
            WarmupSettings::default(),
        );
        let task = tokio::spawn(run.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.send(true).unwrap();
        assert!(matches!(
            task.await.unwrap(),
            WarmupOutcome::DeadlineElapsed { .. }
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
