//! Core domain types for tsbridge.
//!
//! Everything here is plain data: backend modes, the result types of the
//! uniform request surface, and resolved settings. No IO, no async.

mod mode;
mod requests;
pub mod settings;

pub use mode::{BackendMode, BackendPreference, UnknownPreference};
pub use requests::{
    ComponentQuery, DocumentHighlights, EncodedClassifications, HighlightSpan, HighlightSpanKind,
    JsDocTag, ProjectInfo, QuickInfo, TextSpan, WarmupOutcome,
};
pub use settings::{
    BridgeSettings, SettingsError, SidecarSettings, TsServerSettings, WarmupSettings,
};
