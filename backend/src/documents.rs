//! Host-side view of open documents.
//!
//! The editor owns document state; backends only read it. Transports look
//! documents up here before every request so each backend can be brought up
//! to date, and fall back to disk for files the editor has not opened.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// One open document at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub path: PathBuf,
    pub version: i32,
    pub text: Arc<str>,
}

/// Read access to the host's open documents.
pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &Path) -> Option<DocumentSnapshot>;

    /// All open documents, ordered by path.
    fn open_documents(&self) -> Vec<DocumentSnapshot>;
}

/// Lexically normalize a path: drop `.` components and resolve `..`
/// against preceding components. Does not touch the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Thread-safe in-memory document table, keyed by normalized path.
#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    docs: RwLock<HashMap<PathBuf, DocumentSnapshot>>,
}

impl InMemoryDocuments {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document as open (or replace its content and version).
    pub fn upsert(&self, path: &Path, version: i32, text: impl Into<Arc<str>>) {
        let path = normalize_path(path);
        let snapshot = DocumentSnapshot {
            path: path.clone(),
            version,
            text: text.into(),
        };
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, snapshot);
    }

    /// Forget a document. Returns whether it was open.
    pub fn close(&self, path: &Path) -> bool {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&normalize_path(path))
            .is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for InMemoryDocuments {
    fn get(&self, path: &Path) -> Option<DocumentSnapshot> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_path(path))
            .cloned()
    }

    fn open_documents(&self) -> Vec<DocumentSnapshot> {
        let mut docs: Vec<DocumentSnapshot> = self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        docs
    }
}

/// Current text of `path`: the host's open document, else disk content.
pub(crate) async fn read_text(store: &dyn DocumentStore, path: &Path) -> Option<Arc<str>> {
    if let Some(doc) = store.get(path) {
        return Some(doc.text);
    }
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Some(text.into()),
        Err(e) => {
            tracing::debug!(path = %path.display(), "cannot read document text: {e}");
            None
        }
    }
}
