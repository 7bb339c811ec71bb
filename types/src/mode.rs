use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which transport answers requests for a constructed client.
///
/// Fixed at construction; a client never changes mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendMode {
    /// tsserver hosted by the editor, reached through notification relay.
    #[serde(rename = "bridged")]
    BridgedCompilerProtocol,
    /// tsserver spawned and owned by this process.
    #[serde(rename = "tsserver")]
    SpawnedCompilerProtocol,
    /// Language-protocol sidecar with a tsserver-style fallback.
    #[serde(rename = "sidecar")]
    SpawnedLanguageProtocol,
}

impl BackendMode {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::BridgedCompilerProtocol => "bridged",
            Self::SpawnedCompilerProtocol => "tsserver",
            Self::SpawnedLanguageProtocol => "sidecar",
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Configured backend preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Always relay through the editor-hosted tsserver.
    Bridged,
    /// Always spawn the sidecar, with tsserver as fallback.
    Sidecar,
    /// Probe the sidecar executable; use it when it runs, bridge otherwise.
    #[default]
    Auto,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown backend preference '{0}' (expected bridged, sidecar or auto)")]
pub struct UnknownPreference(String);

impl FromStr for BackendPreference {
    type Err = UnknownPreference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bridged" | "bridge" | "tsserver" => Ok(Self::Bridged),
            "sidecar" => Ok(Self::Sidecar),
            "auto" | "automatic" => Ok(Self::Auto),
            _ => Err(UnknownPreference(s.to_string())),
        }
    }
}
