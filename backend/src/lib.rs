//! Backend clients for component language intelligence.
//!
//! One uniform request surface, [`BackendClient`], over three transports:
//! a host-bridged compiler service ([`BridgeClient`]), a spawned tsserver
//! ([`TsServerClient`]), and a language-server sidecar for plain script
//! files composed with a secondary client ([`FallbackClient`] over
//! [`SidecarClient`]). [`select_backend`] picks one from settings.

mod bridge;
mod client;
pub mod codec;
mod correlator;
mod documents;
mod fallback;
mod forward;
mod position;
mod process;
mod project;
pub mod protocol;
mod readiness;
mod selector;
mod sidecar;
mod sync;
mod tsserver;
mod warmup;

pub use bridge::{BridgeClient, DEFAULT_BRIDGE_TIMEOUT, HostBridge};
pub use client::BackendClient;
pub use documents::{DocumentSnapshot, DocumentStore, InMemoryDocuments, normalize_path};
pub use fallback::FallbackClient;
pub use readiness::HoverReadiness;
pub use selector::{SelectedBackend, probe_sidecar, select_backend};
pub use sidecar::SidecarClient;
pub use tsserver::{TsServerClient, TsServerNotFound, resolve_tsserver};
