//! Data model shared by sources, the sync engine, and index stores.
//!
//! Timestamps are Unix seconds (UTC) throughout. Remote systems report
//! RFC 3339 strings; sources convert at the edge with [`parse_timestamp`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One entry of a source's remote listing. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub source_tag: String,
    pub remote_id: String,
    pub modified_at: i64,
    /// Content hash reported by the listing (blob sha, md5), when the
    /// remote system has one.
    pub fingerprint: Option<String>,
}

impl RemoteItem {
    pub fn new(source_tag: impl Into<String>, remote_id: impl Into<String>, modified_at: i64) -> Self {
        Self {
            source_tag: source_tag.into(),
            remote_id: remote_id.into(),
            modified_at,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn index_id(&self) -> String {
        index_id(&self.source_tag, &self.remote_id)
    }
}

/// Shape of the content a document was normalized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Markdown,
    Html,
    PlainText,
    /// Metadata-only documents (file listings) carry no body.
    Empty,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Markdown => "markdown",
            ContentKind::Html => "html",
            ContentKind::PlainText => "plain_text",
            ContentKind::Empty => "empty",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(ContentKind::Markdown),
            "html" => Ok(ContentKind::Html),
            "plain_text" => Ok(ContentKind::PlainText),
            "empty" => Ok(ContentKind::Empty),
            other => Err(format!("unknown content kind '{}'", other)),
        }
    }
}

/// Canonical persisted record. Exactly one exists per
/// `(source_tag, remote_id)`; `index_id` is derived from that pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub index_id: String,
    pub source_tag: String,
    /// Configured instance that last wrote this record.
    pub source_name: String,
    pub remote_id: String,
    pub title: String,
    pub url: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
    pub indexed_at: i64,
    /// Plain text used for full-text indexing.
    pub content: String,
    /// Sanitized HTML fragment used for previews.
    pub content_html: String,
    pub content_kind: ContentKind,
    pub owner: Option<String>,
    pub fingerprint: Option<String>,
    pub extra_fields: BTreeMap<String, String>,
}

impl IndexedDocument {
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra_fields.get(key).map(String::as_str)
    }
}

/// Derive the index key for a remote item.
///
/// `hex(sha256(source_tag || 0x1f || remote_id))`. The unit separator keeps
/// `("ab", "c")` and `("a", "bc")` apart.
pub fn index_id(source_tag: &str, remote_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_tag.as_bytes());
    hasher.update([0x1f]);
    hasher.update(remote_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// The per-document stamp the sync engine diffs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStamp {
    pub index_id: String,
    pub remote_id: String,
    pub source_name: String,
    pub modified_at: i64,
    pub fingerprint: Option<String>,
}

impl From<&IndexedDocument> for StoredStamp {
    fn from(doc: &IndexedDocument) -> Self {
        Self {
            index_id: doc.index_id.clone(),
            remote_id: doc.remote_id.clone(),
            source_name: doc.source_name.clone(),
            modified_at: doc.modified_at,
            fingerprint: doc.fingerprint.clone(),
        }
    }
}

/// A labelled value shown next to a search result (repository, mimetype,
/// mailing list...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub label: String,
    pub value: String,
    pub href: Option<String>,
}

impl Badge {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            href: None,
        }
    }

    pub fn linked(label: impl Into<String>, value: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            href: Some(href.into()),
        }
    }
}

/// Display-ready view of one stored document.
///
/// Produced by a source's render mapping; `highlight` is left empty and
/// filled in by the query layer from the store's excerpt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRecord {
    pub index_id: String,
    pub template_key: String,
    pub kind_label: String,
    pub title: String,
    pub url: Option<String>,
    pub owner: Option<String>,
    pub created: String,
    pub modified: String,
    pub preview_html: String,
    pub highlight: Option<String>,
    pub badges: Vec<Badge>,
}

/// Counts recorded for one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounts {
    pub new: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl PassCounts {
    /// Number of writes (upserts + deletes) the pass performed.
    pub fn writes(&self) -> u64 {
        self.new + self.updated + self.deleted
    }
}

/// Outcome of one pass for one configured source, kept for the
/// operations view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRecord {
    pub source_name: String,
    pub source_tag: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub counts: PassCounts,
    pub listing_complete: bool,
    pub error: Option<String>,
}

/// Field filters accepted by [`IndexStore::query`](crate::store::IndexStore::query).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilters {
    pub source_tag: Option<String>,
    pub source_name: Option<String>,
    pub owner: Option<String>,
    pub modified_since: Option<i64>,
    /// Exact matches against `extra_fields`.
    pub extra: BTreeMap<String, String>,
}

impl FieldFilters {
    pub fn matches(&self, doc: &IndexedDocument) -> bool {
        if let Some(tag) = &self.source_tag {
            if &doc.source_tag != tag {
                return false;
            }
        }
        if let Some(name) = &self.source_name {
            if &doc.source_name != name {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if doc.owner.as_ref() != Some(owner) {
                return false;
            }
        }
        if let Some(since) = self.modified_since {
            if doc.modified_at < since {
                return false;
            }
        }
        self.extra
            .iter()
            .all(|(k, v)| doc.extra_fields.get(k) == Some(v))
    }
}

/// One query match: the stored record, its score (higher is better) and
/// an HTML-escaped excerpt with matches wrapped in `<mark>`.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub doc: IndexedDocument,
    pub score: f64,
    pub highlight: String,
}

/// Parse an RFC 3339 timestamp into Unix seconds.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
}

/// ISO-8601 UTC rendering used in JSON output.
pub fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Human rendering used on result cards, e.g. `2024-03-07 09:15 PM`.
pub fn format_ts_display(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %I:%M %p").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_id_is_deterministic() {
        let a = index_id("github_issue_pr", "https://github.com/o/r/issues/1");
        let b = index_id("github_issue_pr", "https://github.com/o/r/issues/1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn index_id_separates_tag_and_id() {
        assert_ne!(index_id("ab", "c"), index_id("a", "bc"));
        assert_ne!(index_id("gdrive_file", "x"), index_id("gdrive_docx", "x"));
    }

    #[test]
    fn content_kind_round_trips_through_str() {
        for kind in [
            ContentKind::Markdown,
            ContentKind::Html,
            ContentKind::PlainText,
            ContentKind::Empty,
        ] {
            assert_eq!(kind.as_str().parse::<ContentKind>().unwrap(), kind);
        }
        assert!("pdf".parse::<ContentKind>().is_err());
    }

    #[test]
    fn parse_timestamp_handles_offsets() {
        assert_eq!(parse_timestamp("1970-01-01T00:01:40Z"), Some(100));
        assert_eq!(parse_timestamp("1970-01-01T01:01:40+01:00"), Some(100));
        assert_eq!(parse_timestamp("2024-02-30"), None);
    }

    #[test]
    fn display_format_uses_twelve_hour_clock() {
        assert_eq!(format_ts_display(0), "1970-01-01 12:00 AM");
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn filters_match_extra_fields() {
        let mut doc = IndexedDocument {
            index_id: index_id("t", "1"),
            source_tag: "t".into(),
            source_name: "main".into(),
            remote_id: "1".into(),
            title: "T".into(),
            url: None,
            created_at: 0,
            modified_at: 50,
            indexed_at: 60,
            content: String::new(),
            content_html: String::new(),
            content_kind: ContentKind::Empty,
            owner: Some("ada".into()),
            fingerprint: None,
            extra_fields: BTreeMap::new(),
        };
        doc.extra_fields.insert("repo_name".into(), "o/r".into());

        let mut filters = FieldFilters::default();
        assert!(filters.matches(&doc));
        filters.extra.insert("repo_name".into(), "o/r".into());
        assert!(filters.matches(&doc));
        filters.modified_since = Some(51);
        assert!(!filters.matches(&doc));
        filters.modified_since = None;
        filters.owner = Some("grace".into());
        assert!(!filters.matches(&doc));
    }
}
