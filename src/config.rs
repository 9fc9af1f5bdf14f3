use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::registry::SourceRegistry;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// One table per configured source instance, keyed by instance name.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Directory the config file was loaded from; relative credential
    /// paths resolve against it.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Concurrent detail fetches per source.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per network call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_user_agent() -> String {
    format!("omnidex/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_limit() -> usize {
    20
}
fn default_excerpt_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Configuration for one source instance: its doctype, credential
/// material, and scope filters. Never mutated after loading.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    /// Registry tag, e.g. `github_issue_pr`.
    pub doctype: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    // Credential material, first present wins.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub token_path: Option<PathBuf>,

    // Scope filters.
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub orgs: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub forums: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub mimetypes: Vec<String>,

    /// Override the remote API base URL (enterprise installs, mocks).
    #[serde(default)]
    pub api_url: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    /// Resolve the credential: `token`, then `token_env`, then
    /// `token_path`. A token file may hold the raw token or a JSON object
    /// with `access_token` or `token`.
    pub fn credential(&self, name: &str, config_dir: &Path) -> Result<String, SourceError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        if let Some(var) = &self.token_env {
            return std::env::var(var)
                .map_err(|_| SourceError::credential(name, format!("environment variable {} is not set", var)));
        }
        if let Some(path) = &self.token_path {
            let path = resolve_path(path, config_dir);
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                SourceError::credential(name, format!("cannot read {}: {}", path.display(), e))
            })?;
            return parse_token_file(&raw)
                .ok_or_else(|| SourceError::credential(name, format!("no token in {}", path.display())));
        }
        Err(SourceError::credential(name, "no token, token_env, or token_path configured"))
    }

    pub fn api_url_or(&self, default: &str) -> String {
        self.api_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

fn resolve_path(path: &Path, config_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

fn parse_token_file(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        let json: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        return ["access_token", "token"]
            .iter()
            .find_map(|k| json.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string);
    }
    Some(trimmed.to_string())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.config_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(config)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sync.workers == 0 {
        anyhow::bail!("sync.workers must be >= 1");
    }
    if config.sync.timeout_secs == 0 {
        anyhow::bail!("sync.timeout_secs must be > 0");
    }
    if config.search.limit == 0 {
        anyhow::bail!("search.limit must be >= 1");
    }
    if config.search.excerpt_chars == 0 {
        anyhow::bail!("search.excerpt_chars must be > 0");
    }

    let registry = SourceRegistry::global();
    for (name, source) in &config.sources {
        if name.is_empty() || name.contains(char::is_whitespace) {
            anyhow::bail!("source name '{}' must be non-empty and contain no whitespace", name);
        }
        let kind = registry
            .dispatch(&source.doctype)
            .with_context(|| format!("sources.{}", name))?;
        if source.token.is_none() && source.token_env.is_none() && source.token_path.is_none() {
            anyhow::bail!(
                "sources.{}: one of token, token_env, or token_path is required",
                name
            );
        }
        (kind.check)(source).with_context(|| format!("sources.{}", name))?;
    }

    Ok(())
}
