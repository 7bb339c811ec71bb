//! Result types of the uniform request surface.
//!
//! Offsets and lengths are UTF-16 code units into the document text, the
//! unit editors and the compiler service both use for string positions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: u32,
    pub length: u32,
}

impl TextSpan {
    #[must_use]
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// Span covering `start..end`; an inverted range yields an empty span at `start`.
    #[must_use]
    pub fn from_bounds(start: u32, end: u32) -> Self {
        Self {
            start,
            length: end.saturating_sub(start),
        }
    }

    #[must_use]
    pub fn end(self) -> u32 {
        self.start + self.length
    }
}

/// Project owning a file, identified by its configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub config_file_name: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsDocTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Hover content at a position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickInfo {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub kind_modifiers: String,
    pub text_span: TextSpan,
    #[serde(default)]
    pub display_string: String,
    #[serde(default)]
    pub documentation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<JsDocTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HighlightSpanKind {
    #[default]
    None,
    Definition,
    Reference,
    WrittenReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightSpan {
    pub text_span: TextSpan,
    #[serde(default)]
    pub kind: HighlightSpanKind,
}

/// Highlights for one file, as returned by `documentHighlights-full`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHighlights {
    pub file_name: PathBuf,
    #[serde(default)]
    pub highlight_spans: Vec<HighlightSpan>,
}

/// Semantic classification in the compiler's encoded triple format
/// (`start, length, classification` repeated).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedClassifications {
    pub spans: Vec<u32>,
    #[serde(default)]
    pub end_of_line_state: u32,
}

/// Component-structure-aware queries. These inspect template constructs and
/// are only answered by the compiler service running the component plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ComponentQuery {
    #[serde(rename_all = "camelCase")]
    CollectExtractProps { template_code_range: [u32; 2] },
    ComponentNames,
    ComponentProps { tag: String },
    ComponentEvents { tag: String },
    ComponentDirectives,
    ComponentSlots,
    ElementAttrs { tag: String },
    ElementNames,
    AutoImportSuggestions { offset: u32 },
    RefAtPosition { offset: u32 },
}

impl ComponentQuery {
    /// Plugin command name, without namespace.
    #[must_use]
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::CollectExtractProps { .. } => "collectExtractProps",
            Self::ComponentNames => "getComponentNames",
            Self::ComponentProps { .. } => "getComponentProps",
            Self::ComponentEvents { .. } => "getComponentEvents",
            Self::ComponentDirectives => "getComponentDirectives",
            Self::ComponentSlots => "getComponentSlots",
            Self::ElementAttrs { .. } => "getElementAttrs",
            Self::ElementNames => "getElementNames",
            Self::AutoImportSuggestions { .. } => "getAutoImportSuggestions",
            Self::RefAtPosition { .. } => "isRefAtPosition",
        }
    }
}

/// How a warmup run ended. Warmup never fails outward; it only reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum WarmupOutcome {
    /// The backend has no cold-start phase.
    NotNeeded,
    /// Disabled by settings.
    Disabled,
    /// No document was opened within the wait window.
    NoDocuments,
    /// Every implicated backend answered a probe.
    Primed { probes: usize },
    /// The deadline passed before every backend answered.
    DeadlineElapsed { probes: usize },
}
