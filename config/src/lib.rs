//! Configuration file loading for tsbridge.
//!
//! Settings live in `~/.tsbridge/config.toml`, or wherever `TSBRIDGE_CONFIG`
//! points. Every section is optional and validated at parse time; a missing
//! file means defaults. `TSBRIDGE_BACKEND` overrides `[backend] mode`.
//!
//! ```toml
//! [backend]
//! mode = "auto"          # bridged | sidecar | auto
//!
//! [sidecar]
//! command = "tsgo"
//! args = ["--lsp", "--stdio"]
//!
//! [tsserver]
//! tsdk = "/opt/typescript/lib"
//!
//! [warmup]
//! deadline_ms = 8000
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::Deserialize;
use tsbridge_types::{
    BackendPreference, BridgeSettings, SidecarSettings, TsServerSettings, UnknownPreference,
    WarmupSettings,
};

pub const CONFIG_PATH_ENV: &str = "TSBRIDGE_CONFIG";
pub const BACKEND_ENV: &str = "TSBRIDGE_BACKEND";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("TSBRIDGE_BACKEND: {0}")]
    BackendOverride(#[from] UnknownPreference),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::BackendOverride(_) => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub mode: BackendPreference,
}

/// The parsed config file.
#[derive(Debug, Default, Deserialize)]
pub struct TsBridgeConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub sidecar: SidecarSettings,
    #[serde(default)]
    pub tsserver: TsServerSettings,
    #[serde(default)]
    pub warmup: WarmupSettings,
}

impl TsBridgeConfig {
    /// Load from [`config_path`]. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file");
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path).map(Some)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn into_settings(self) -> BridgeSettings {
        BridgeSettings {
            mode: self.backend.mode,
            sidecar: self.sidecar,
            tsserver: self.tsserver,
            warmup: self.warmup,
        }
    }
}

/// `$TSBRIDGE_CONFIG` when set and non-empty, else `~/.tsbridge/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".tsbridge").join("config.toml"))
}

/// Apply a `TSBRIDGE_BACKEND` value, if any, over the file's mode.
pub fn apply_backend_override(
    settings: &mut BridgeSettings,
    value: Option<&str>,
) -> Result<(), ConfigError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(());
    };
    let mode: BackendPreference = value.parse()?;
    if mode != settings.mode {
        tracing::info!(?mode, "backend mode overridden by {BACKEND_ENV}");
    }
    settings.mode = mode;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parse(content: &str) -> Result<TsBridgeConfig, ConfigError> {
        TsBridgeConfig::parse(content, Path::new("/test/config.toml"))
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let settings = parse("").unwrap().into_settings();
        assert_eq!(settings.mode, BackendPreference::Auto);
        assert_eq!(settings.sidecar.command(), "tsgo");
        assert_eq!(settings.tsserver.node(), "node");
        assert_eq!(settings.warmup, WarmupSettings::default());
    }

    #[test]
    fn sections_resolve_into_settings() {
        let settings = parse(
            r#"
[backend]
mode = "sidecar"

[sidecar]
command = "/opt/tsgo/bin/tsgo"
args = ["--lsp", "--stdio", "--verbose"]
extensions = ["ts", ".MTS"]
request_timeout_ms = 2500

[tsserver]
node = "/usr/local/bin/node"
tsdk = "/opt/typescript/lib"
plugin_probe_location = "/opt/plugins"

[warmup]
enabled = false
"#,
        )
        .unwrap()
        .into_settings();

        assert_eq!(settings.mode, BackendPreference::Sidecar);
        assert_eq!(settings.sidecar.command(), "/opt/tsgo/bin/tsgo");
        assert_eq!(settings.sidecar.args().len(), 3);
        assert_eq!(settings.sidecar.extensions(), ["ts", "mts"]);
        assert_eq!(settings.sidecar.request_timeout(), Duration::from_millis(2500));
        assert_eq!(settings.tsserver.node(), "/usr/local/bin/node");
        assert_eq!(
            settings.tsserver.tsdk(),
            Some(Path::new("/opt/typescript/lib"))
        );
        assert_eq!(settings.tsserver.plugin_name(), "@vue/typescript-plugin");
        assert!(!settings.warmup.enabled());
    }

    #[test]
    fn invalid_values_are_parse_errors_with_path() {
        for content in [
            "[backend]\nmode = \"fastest\"",
            "[sidecar]\ncommand = \"\"",
            "[warmup]\ndeadline_ms = 0",
            "invalid toml [",
        ] {
            let err = parse(content).unwrap_err();
            assert!(matches!(err, ConfigError::Parse { .. }), "{content}");
            assert_eq!(err.path(), Some(Path::new("/test/config.toml")));
        }
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = TsBridgeConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[backend]\nmode = \"bridged\"\n").unwrap();
        let config = TsBridgeConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(config.backend.mode, BackendPreference::Bridged);
    }

    #[test]
    fn unreadable_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let err = TsBridgeConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.path(), Some(dir.path()));
    }

    #[test]
    fn backend_override_accepts_aliases() {
        let mut settings = BridgeSettings::default();
        apply_backend_override(&mut settings, Some("bridge")).unwrap();
        assert_eq!(settings.mode, BackendPreference::Bridged);

        apply_backend_override(&mut settings, None).unwrap();
        apply_backend_override(&mut settings, Some("  ")).unwrap();
        assert_eq!(settings.mode, BackendPreference::Bridged);

        let err = apply_backend_override(&mut settings, Some("fastest")).unwrap_err();
        assert!(matches!(err, ConfigError::BackendOverride(_)));
        assert!(err.path().is_none());
        assert_eq!(settings.mode, BackendPreference::Bridged);
    }
}
