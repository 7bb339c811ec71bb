//! Project discovery and module resolution for plain script files, answered
//! locally instead of through a backend round trip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;

use crate::documents::normalize_path;

/// Recognized project files, in tie-break priority order.
const CONFIG_FILE_NAMES: [&str; 2] = ["tsconfig.json", "jsconfig.json"];

const MODULE_EXTENSIONS: [&str; 6] = [".ts", ".tsx", ".d.ts", ".js", ".jsx", ".vue"];

/// `extends` chains deeper than this are cut off.
const MAX_EXTENDS_DEPTH: usize = 8;

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

/// Choose among candidate config files: the deepest containing directory
/// wins, then the longest directory path, then `tsconfig.json`.
fn pick_config(candidates: &[PathBuf]) -> Option<&PathBuf> {
    candidates.iter().max_by_key(|path| {
        let dir = path.parent().unwrap_or(Path::new(""));
        let rank = path
            .file_name()
            .and_then(|name| CONFIG_FILE_NAMES.iter().position(|n| name == *n))
            .unwrap_or(CONFIG_FILE_NAMES.len());
        (
            dir.components().count(),
            dir.as_os_str().len(),
            std::cmp::Reverse(rank),
        )
    })
}

/// Nearest `tsconfig.json` / `jsconfig.json` above `file`.
pub(crate) async fn find_project_config(file: &Path) -> Option<PathBuf> {
    let file = normalize_path(file);
    let mut candidates = Vec::new();
    for dir in file.ancestors().skip(1) {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if is_file(&candidate).await {
                candidates.push(candidate);
            }
        }
    }
    pick_config(&candidates).cloned()
}

/// The module-resolution subset of `compilerOptions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CompilerOptions {
    /// Absolute.
    pub base_url: Option<PathBuf>,
    /// Directory `paths` substitutions are relative to when there is no `baseUrl`.
    pub paths_base: PathBuf,
    pub paths: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    extends: Option<serde_json::Value>,
    #[serde(default)]
    compiler_options: RawCompilerOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompilerOptions {
    base_url: Option<String>,
    paths: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Parsed `compilerOptions` per config file. Filled lazily; entries are
/// never invalidated.
#[derive(Debug, Default)]
pub(crate) struct CompilerOptionsCache {
    entries: Mutex<HashMap<PathBuf, Arc<CompilerOptions>>>,
}

impl CompilerOptionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, config: &Path) -> Arc<CompilerOptions> {
        let key = normalize_path(config);
        if let Some(cached) = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return cached.clone();
        }

        let options = Arc::new(load_compiler_options(&key).await);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(options)
            .clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Read `config` and the relative `extends` chain under it. Unreadable or
/// malformed files contribute nothing.
async fn load_compiler_options(config: &Path) -> CompilerOptions {
    let mut chain = Vec::new();
    let mut next = Some(config.to_path_buf());
    while let Some(path) = next.take() {
        if chain.len() >= MAX_EXTENDS_DEPTH {
            tracing::debug!(config = %config.display(), "extends chain too deep");
            break;
        }
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<RawConfig>(&strip_jsonc(&text)) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!(config = %path.display(), "cannot parse project config: {e}");
                    break;
                }
            },
            Err(e) => {
                tracing::debug!(config = %path.display(), "cannot read project config: {e}");
                break;
            }
        };
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        next = raw
            .extends
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .filter(|base| base.starts_with('.'))
            .map(|base| {
                let base = normalize_path(&dir.join(base));
                if base.extension().is_some_and(|ext| ext == "json") {
                    base
                } else {
                    let mut with_json = base.into_os_string();
                    with_json.push(".json");
                    PathBuf::from(with_json)
                }
            });
        chain.push((dir, raw.compiler_options));
    }

    // Apply the most distant base first so nearer files override it.
    let mut options = CompilerOptions {
        paths_base: config.parent().map(Path::to_path_buf).unwrap_or_default(),
        ..CompilerOptions::default()
    };
    for (dir, raw) in chain.into_iter().rev() {
        if let Some(base_url) = raw.base_url {
            options.base_url = Some(normalize_path(&dir.join(base_url)));
        }
        if let Some(paths) = raw.paths {
            options.paths_base = dir.clone();
            options.paths = paths
                .into_iter()
                .map(|(pattern, targets)| {
                    let targets = targets
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(serde_json::Value::as_str)
                                .map(String::from)
                                .collect()
                        })
                        .unwrap_or_default();
                    (pattern, targets)
                })
                .collect();
        }
    }
    options
}

/// Remove `//` and `/* */` comments and trailing commas so tsconfig-style
/// JSON parses strictly.
fn strip_jsonc(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut uncommented = String::with_capacity(text.len());
    let mut i = 0;
    let mut in_string = false;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            uncommented.push(c);
            if c == '\\' && i + 1 < chars.len() {
                uncommented.push(chars[i + 1]);
                i += 2;
                continue;
            }
            in_string = c != '"';
            i += 1;
            continue;
        }
        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                uncommented.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                uncommented.push(c);
                i += 1;
            }
        }
    }

    let chars: Vec<char> = uncommented.chars().collect();
    let mut out = String::with_capacity(uncommented.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            in_string = escaped || c != '"';
            escaped = !escaped && c == '\\';
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ','
            && chars[i + 1..]
                .iter()
                .find(|next| !next.is_whitespace())
                .is_some_and(|next| matches!(next, '}' | ']'))
        {
            continue;
        }
        out.push(c);
    }
    out
}

/// The text captured by `pattern`'s `*`, or `""` for an exact match.
fn match_pattern<'a>(pattern: &str, specifier: &'a str) -> Option<&'a str> {
    match pattern.split_once('*') {
        None => (pattern == specifier).then_some(""),
        Some((prefix, suffix)) => specifier
            .strip_prefix(prefix)?
            .strip_suffix(suffix)
            .filter(|_| specifier.len() >= prefix.len() + suffix.len()),
    }
}

/// First existing file for a module path, trying it verbatim, with each
/// known extension, then as a directory index.
async fn probe_module(base: &Path) -> Option<PathBuf> {
    let base = normalize_path(base);
    if base.extension().is_some() && is_file(&base).await {
        return Some(base);
    }
    let name = base.as_os_str().to_string_lossy().into_owned();
    for ext in MODULE_EXTENSIONS {
        let candidate = PathBuf::from(format!("{name}{ext}"));
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    for ext in MODULE_EXTENSIONS {
        let candidate = base.join(format!("index{ext}"));
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

fn is_relative_specifier(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Resolve `specifier` imported from `file`: relative specifiers against the
/// importing directory, bare ones through `paths` then `baseUrl`.
pub(crate) async fn resolve_module(
    file: &Path,
    specifier: &str,
    cache: &CompilerOptionsCache,
) -> Option<PathBuf> {
    let dir = file.parent()?;
    if is_relative_specifier(specifier) {
        return probe_module(&dir.join(specifier)).await;
    }
    if Path::new(specifier).is_absolute() {
        return probe_module(Path::new(specifier)).await;
    }

    let config = find_project_config(file).await?;
    let options = cache.get(&config).await;
    let substitution_base = options.base_url.as_deref().unwrap_or(&options.paths_base);

    // Longest matching prefix wins.
    let mut matches: Vec<(&str, &str, &[String])> = options
        .paths
        .iter()
        .filter_map(|(pattern, targets)| {
            match_pattern(pattern, specifier).map(|star| (pattern.as_str(), star, targets.as_slice()))
        })
        .collect();
    matches.sort_by_key(|(pattern, _, _)| std::cmp::Reverse(pattern.split('*').next().map_or(0, str::len)));

    for (_, star, targets) in matches {
        for target in targets {
            let substituted = target.replacen('*', star, 1);
            if let Some(found) = probe_module(&substitution_base.join(substituted)).await {
                return Some(found);
            }
        }
    }

    let base_url = options.base_url.as_deref()?;
    probe_module(&base_url.join(specifier)).await
}
