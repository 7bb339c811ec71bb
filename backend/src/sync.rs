//! Per-transport record of which document versions a backend has seen.
//!
//! The synchronizer only decides *what* must be sent; each transport encodes
//! the resulting [`SyncAction`] in its own wire format.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::documents::{DocumentSnapshot, normalize_path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SyncAction {
    Open {
        path: PathBuf,
        version: i32,
        text: Arc<str>,
    },
    /// Full-text replacement of an already open document.
    Change {
        path: PathBuf,
        version: i32,
        text: Arc<str>,
    },
    Close {
        path: PathBuf,
    },
}

/// Where the backend's copy of a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// The host's open document, versioned by the host.
    Host,
    /// Disk content, versioned locally and identified by a content hash.
    Disk { fingerprint: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    version: i32,
    source: Source,
}

fn fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Default)]
pub(crate) struct DocumentSynchronizer {
    tracked: HashMap<PathBuf, Tracked>,
}

impl DocumentSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the host's `doc` up to date. `None` when the backend already has
    /// this version.
    pub fn sync_open(&mut self, doc: &DocumentSnapshot) -> Option<SyncAction> {
        let path = normalize_path(&doc.path);
        let current = Tracked {
            version: doc.version,
            source: Source::Host,
        };
        match self.tracked.insert(path.clone(), current) {
            None => Some(SyncAction::Open {
                path,
                version: doc.version,
                text: doc.text.clone(),
            }),
            Some(previous) if previous.source == Source::Host && previous.version == doc.version => {
                None
            }
            Some(_) => Some(SyncAction::Change {
                path,
                version: doc.version,
                text: doc.text.clone(),
            }),
        }
    }

    /// Bring a file the host has not opened up to date from its disk `text`.
    ///
    /// A copy the host had opened is closed first, then reopened from disk at
    /// version 0. Later disk edits bump the version by one.
    pub fn sync_disk(&mut self, path: &Path, text: &Arc<str>) -> Vec<SyncAction> {
        let path = normalize_path(path);
        let fingerprint = fingerprint(text);
        let mut actions = Vec::new();
        let previous = self.tracked.get(&path).copied();
        let version = match previous {
            Some(Tracked {
                source: Source::Disk { fingerprint: seen },
                ..
            }) if seen == fingerprint => return actions,
            Some(Tracked {
                version,
                source: Source::Disk { .. },
            }) => {
                let version = version.saturating_add(1);
                actions.push(SyncAction::Change {
                    path: path.clone(),
                    version,
                    text: text.clone(),
                });
                version
            }
            Some(Tracked {
                source: Source::Host,
                ..
            }) => {
                actions.push(SyncAction::Close { path: path.clone() });
                actions.push(SyncAction::Open {
                    path: path.clone(),
                    version: 0,
                    text: text.clone(),
                });
                0
            }
            None => {
                actions.push(SyncAction::Open {
                    path: path.clone(),
                    version: 0,
                    text: text.clone(),
                });
                0
            }
        };
        self.tracked.insert(
            path,
            Tracked {
                version,
                source: Source::Disk { fingerprint },
            },
        );
        actions
    }

    /// Forget `path`. `None` when the backend was never told about it.
    pub fn sync_closed(&mut self, path: &Path) -> Option<SyncAction> {
        let path = normalize_path(path);
        self.tracked
            .remove(&path)
            .map(|_| SyncAction::Close { path })
    }

    /// Stop tracking everything, returning the paths that were open.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.tracked.drain().map(|(path, _)| path).collect();
        paths.sort();
        paths
    }

    /// Forget all records without producing close actions (the backend
    /// process went away and took its state with it).
    pub fn reset(&mut self) {
        self.tracked.clear();
    }

    #[cfg(test)]
    pub fn version(&self, path: &Path) -> Option<i32> {
        self.tracked.get(&normalize_path(path)).map(|t| t.version)
    }
}
