//! Static source registry.
//!
//! Maps a doctype tag (`github_issue_pr`, `gdrive_docx`, ...) to the
//! compiled-in [`SourceKind`] for that variant. The table is built once,
//! on first use, from [`REGISTERED`] and is read-only afterwards, so
//! lookups from concurrent sync tasks and renderers need no locking.
//!
//! Unknown tags fail with [`SourceError::UnknownSourceType`]; config
//! loading checks every configured doctype up front, so a running sync
//! never meets one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use omnidex_core::models::{DisplayRecord, IndexedDocument};

use crate::config::SourceConfig;
use crate::doctype::{disqus, gdrive, github, groupsio, DocumentSource};
use crate::error::{Result, SourceError};
use crate::http::HttpSettings;

/// Everything a variant needs to construct itself.
pub struct SourceContext<'a> {
    pub name: &'a str,
    pub config: &'a SourceConfig,
    pub http: &'a HttpSettings,
    pub config_dir: &'a Path,
}

/// Registry entry for one source variant.
pub struct SourceKind {
    pub tag: &'static str,
    /// Presentation template selected for results of this kind.
    pub template_key: &'static str,
    pub description: &'static str,
    /// Variant-specific config checks (scope filters, repo syntax). No I/O.
    pub check: fn(&SourceConfig) -> Result<()>,
    pub build: fn(&SourceContext<'_>) -> Result<Arc<dyn DocumentSource>>,
    pub render: fn(&IndexedDocument) -> DisplayRecord,
}

impl std::fmt::Debug for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceKind")
            .field("tag", &self.tag)
            .field("template_key", &self.template_key)
            .finish()
    }
}

/// Every compiled-in variant.
pub static REGISTERED: &[&SourceKind] = &[
    &github::ISSUE_PR,
    &github::FILE,
    &github::MARKDOWN,
    &gdrive::FILE,
    &gdrive::DOCX,
    &disqus::THREAD,
    &groupsio::TOPIC,
];

pub struct SourceRegistry {
    by_tag: HashMap<&'static str, &'static SourceKind>,
}

impl SourceRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static SourceRegistry {
        static REGISTRY: OnceLock<SourceRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| SourceRegistry::from_kinds(REGISTERED))
    }

    fn from_kinds(kinds: &[&'static SourceKind]) -> Self {
        let by_tag = kinds.iter().map(|kind| (kind.tag, *kind)).collect();
        Self { by_tag }
    }

    pub fn dispatch(&self, tag: &str) -> Result<&'static SourceKind> {
        self.by_tag
            .get(tag)
            .copied()
            .ok_or_else(|| SourceError::UnknownSourceType(tag.to_string()))
    }

    pub fn template_key(&self, tag: &str) -> Result<&'static str> {
        Ok(self.dispatch(tag)?.template_key)
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> &'static [&'static SourceKind] {
        REGISTERED
    }

    /// Construct the configured source `name`. No network calls happen
    /// here; see [`DocumentSource::validate_credentials`].
    pub fn instantiate(
        &self,
        name: &str,
        config: &SourceConfig,
        http: &HttpSettings,
        config_dir: &Path,
    ) -> Result<Arc<dyn DocumentSource>> {
        let kind = self.dispatch(&config.doctype)?;
        (kind.check)(config)?;
        (kind.build)(&SourceContext {
            name,
            config,
            http,
            config_dir,
        })
    }
}
