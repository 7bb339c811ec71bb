//! Resolved configuration types shared across crates.
//!
//! Raw deserialization structs carry defaults and loose shapes; they are
//! validated into these types at the parse boundary through
//! `#[serde(try_from)]`. Holding a `SidecarSettings` is proof that the
//! command is non-empty and at least one extension is declared.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::BackendPreference;

const DEFAULT_SIDECAR_COMMAND: &str = "tsgo";
const DEFAULT_SIDECAR_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TSSERVER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PLUGIN_NAME: &str = "@vue/typescript-plugin";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("sidecar command must not be empty")]
    EmptySidecarCommand,
    #[error("sidecar must declare at least one file extension")]
    NoSidecarExtensions,
    #[error("node command must not be empty")]
    EmptyNodeCommand,
    #[error("plugin name must not be empty")]
    EmptyPluginName,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

fn non_zero(ms: u64, field: &'static str) -> Result<Duration, SettingsError> {
    if ms == 0 {
        return Err(SettingsError::ZeroDuration(field));
    }
    Ok(Duration::from_millis(ms))
}

fn default_sidecar_extensions() -> Vec<String> {
    [
        "ts", "tsx", "mts", "cts", "d.ts", "d.mts", "d.cts", "js", "jsx", "mjs", "cjs",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Deserialize)]
#[serde(default)]
struct RawSidecarSettings {
    command: String,
    args: Vec<String>,
    extensions: Vec<String>,
    request_timeout_ms: u64,
}

impl Default for RawSidecarSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_SIDECAR_COMMAND.to_string(),
            args: vec!["--lsp".to_string(), "--stdio".to_string()],
            extensions: default_sidecar_extensions(),
            request_timeout_ms: DEFAULT_SIDECAR_TIMEOUT_MS,
        }
    }
}

/// Language-protocol sidecar launch and routing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSidecarSettings")]
pub struct SidecarSettings {
    command: String,
    args: Vec<String>,
    extensions: Vec<String>,
    request_timeout: Duration,
}

impl TryFrom<RawSidecarSettings> for SidecarSettings {
    type Error = SettingsError;

    fn try_from(raw: RawSidecarSettings) -> Result<Self, Self::Error> {
        if raw.command.trim().is_empty() {
            return Err(SettingsError::EmptySidecarCommand);
        }
        // Normalize ".ts" / "TS" to "ts"; multi-part extensions keep their inner dot.
        let extensions: Vec<String> = raw
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(SettingsError::NoSidecarExtensions);
        }
        Ok(Self {
            command: raw.command,
            args: raw.args,
            extensions,
            request_timeout: non_zero(raw.request_timeout_ms, "sidecar.request_timeout_ms")?,
        })
    }
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_SIDECAR_COMMAND.to_string(),
            args: vec!["--lsp".to_string(), "--stdio".to_string()],
            extensions: default_sidecar_extensions(),
            request_timeout: Duration::from_millis(DEFAULT_SIDECAR_TIMEOUT_MS),
        }
    }
}

impl SidecarSettings {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Declared extensions, lowercase, without a leading dot.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The declared extension matching `path`, preferring the longest.
    ///
    /// Matching is on the file name suffix, so `d.ts` claims `index.d.ts`
    /// even though the last extension is just `ts`.
    #[must_use]
    pub fn matching_extension(&self, path: &Path) -> Option<&str> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        self.extensions
            .iter()
            .filter(|ext| {
                name.len() > ext.len() + 1
                    && name.ends_with(ext.as_str())
                    && name.as_bytes()[name.len() - ext.len() - 1] == b'.'
            })
            .max_by_key(|ext| ext.len())
            .map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawTsServerSettings {
    node: String,
    tsdk: Option<PathBuf>,
    global_typescript: Option<PathBuf>,
    plugin_name: String,
    plugin_probe_location: Option<PathBuf>,
    request_timeout_ms: u64,
}

impl Default for RawTsServerSettings {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            tsdk: None,
            global_typescript: None,
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            plugin_probe_location: None,
            request_timeout_ms: DEFAULT_TSSERVER_TIMEOUT_MS,
        }
    }
}

/// Spawned compiler-service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawTsServerSettings")]
pub struct TsServerSettings {
    node: String,
    tsdk: Option<PathBuf>,
    global_typescript: Option<PathBuf>,
    plugin_name: String,
    plugin_probe_location: Option<PathBuf>,
    request_timeout: Duration,
}

impl TryFrom<RawTsServerSettings> for TsServerSettings {
    type Error = SettingsError;

    fn try_from(raw: RawTsServerSettings) -> Result<Self, Self::Error> {
        if raw.node.trim().is_empty() {
            return Err(SettingsError::EmptyNodeCommand);
        }
        if raw.plugin_name.trim().is_empty() {
            return Err(SettingsError::EmptyPluginName);
        }
        Ok(Self {
            node: raw.node,
            tsdk: raw.tsdk,
            global_typescript: raw.global_typescript,
            plugin_name: raw.plugin_name,
            plugin_probe_location: raw.plugin_probe_location,
            request_timeout: non_zero(raw.request_timeout_ms, "tsserver.request_timeout_ms")?,
        })
    }
}

impl Default for TsServerSettings {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            tsdk: None,
            global_typescript: None,
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            plugin_probe_location: None,
            request_timeout: Duration::from_millis(DEFAULT_TSSERVER_TIMEOUT_MS),
        }
    }
}

impl TsServerSettings {
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Explicit TypeScript `lib` directory; takes precedence over probing.
    #[must_use]
    pub fn tsdk(&self) -> Option<&Path> {
        self.tsdk.as_deref()
    }

    /// Global `typescript` package directory, probed last.
    #[must_use]
    pub fn global_typescript(&self) -> Option<&Path> {
        self.global_typescript.as_deref()
    }

    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    #[must_use]
    pub fn plugin_probe_location(&self) -> Option<&Path> {
        self.plugin_probe_location.as_deref()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawWarmupSettings {
    enabled: bool,
    open_document_timeout_ms: u64,
    deadline_ms: u64,
    poll_interval_ms: u64,
}

impl Default for RawWarmupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            open_document_timeout_ms: 5_000,
            deadline_ms: 8_000,
            poll_interval_ms: 200,
        }
    }
}

/// Bounded timeline for priming a freshly spawned sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawWarmupSettings")]
pub struct WarmupSettings {
    enabled: bool,
    open_document_timeout: Duration,
    deadline: Duration,
    poll_interval: Duration,
}

impl TryFrom<RawWarmupSettings> for WarmupSettings {
    type Error = SettingsError;

    fn try_from(raw: RawWarmupSettings) -> Result<Self, Self::Error> {
        Ok(Self {
            enabled: raw.enabled,
            open_document_timeout: Duration::from_millis(raw.open_document_timeout_ms),
            deadline: non_zero(raw.deadline_ms, "warmup.deadline_ms")?,
            poll_interval: non_zero(raw.poll_interval_ms, "warmup.poll_interval_ms")?,
        })
    }
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            open_document_timeout: Duration::from_secs(5),
            deadline: Duration::from_secs(8),
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl WarmupSettings {
    #[must_use]
    pub fn new(open_document_timeout: Duration, deadline: Duration, poll_interval: Duration) -> Self {
        Self {
            enabled: true,
            open_document_timeout,
            deadline,
            poll_interval,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn open_document_timeout(&self) -> Duration {
        self.open_document_timeout
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Fully resolved settings for backend selection and construction.
#[derive(Debug, Clone, Default)]
pub struct BridgeSettings {
    pub mode: BackendPreference,
    pub sidecar: SidecarSettings,
    pub tsserver: TsServerSettings,
    pub warmup: WarmupSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_defaults_apply_to_empty_table() {
        let sidecar: SidecarSettings = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(sidecar.command(), "tsgo");
        assert_eq!(sidecar.args(), ["--lsp", "--stdio"]);
        assert_eq!(sidecar.request_timeout(), Duration::from_secs(10));
        assert!(sidecar.extensions().iter().any(|e| e == "d.ts"));
    }

    #[test]
    fn sidecar_rejects_empty_command() {
        let json = serde_json::json!({ "command": "  " });
        assert!(serde_json::from_value::<SidecarSettings>(json).is_err());
    }

    #[test]
    fn sidecar_rejects_empty_extension_list() {
        let json = serde_json::json!({ "extensions": [".", ""] });
        assert!(serde_json::from_value::<SidecarSettings>(json).is_err());
    }

    #[test]
    fn sidecar_normalizes_extensions() {
        let sidecar: SidecarSettings =
            serde_json::from_value(serde_json::json!({ "extensions": [".TS", "d.ts"] })).unwrap();
        assert_eq!(sidecar.extensions(), ["ts", "d.ts"]);
    }

    #[test]
    fn matching_extension_prefers_multi_part() {
        let sidecar: SidecarSettings =
            serde_json::from_value(serde_json::json!({ "extensions": ["ts", "d.ts"] })).unwrap();
        assert_eq!(
            sidecar.matching_extension(Path::new("/w/types/index.d.ts")),
            Some("d.ts")
        );
        assert_eq!(
            sidecar.matching_extension(Path::new("/w/src/main.ts")),
            Some("ts")
        );
        assert_eq!(sidecar.matching_extension(Path::new("/w/App.vue")), None);
        // The extension alone is not a file name with that extension.
        assert_eq!(sidecar.matching_extension(Path::new("/w/ts")), None);
        assert_eq!(sidecar.matching_extension(Path::new("/w/.ts")), None);
        // "mts" must not match "ts" by plain suffix.
        assert_eq!(sidecar.matching_extension(Path::new("/w/tool.mts")), None);
    }

    #[test]
    fn tsserver_rejects_zero_timeout() {
        let json = serde_json::json!({ "request_timeout_ms": 0 });
        assert_eq!(
            serde_json::from_value::<TsServerSettings>(json)
                .unwrap_err()
                .to_string(),
            "tsserver.request_timeout_ms must be greater than zero"
        );
    }

    #[test]
    fn warmup_defaults() {
        let warmup: WarmupSettings = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(warmup.enabled());
        assert_eq!(warmup.open_document_timeout(), Duration::from_secs(5));
        assert_eq!(warmup.deadline(), Duration::from_secs(8));
        assert_eq!(warmup.poll_interval(), Duration::from_millis(200));
        assert_eq!(warmup, WarmupSettings::default());
    }
}
