//! Document sources ("doctypes").
//!
//! Every remote system omnidex indexes is a [`DocumentSource`]: a
//! stateless capability object over one credential that can validate that
//! credential, enumerate remote items with modification timestamps, fetch
//! one item in full, and map a stored record back into a
//! [`DisplayRecord`].
//!
//! ```text
//! DocumentSource
//!   ├── github::IssuePrSource      github_issue_pr
//!   ├── github::FileSource         github_file
//!   ├── github::MarkdownSource     github_markdown
//!   ├── gdrive::FileSource         gdrive_file
//!   ├── gdrive::DocxSource         gdrive_docx
//!   ├── disqus::ThreadSource       disqus
//!   └── groupsio::TopicSource      groupsio
//! ```
//!
//! Variants share behavior through the free functions in this module
//! ([`paginate`], [`display_base`], [`PathFilter`]) rather than a common
//! base type.

pub mod disqus;
pub mod gdrive;
pub mod github;
pub mod groupsio;

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};

use omnidex_core::models::{format_ts_display, DisplayRecord, IndexedDocument, RemoteItem};
use omnidex_core::normalize::{escape_html, excerpt};

use crate::error::{Result, SourceError};
use crate::registry::SourceKind;

/// Shown for documents that carry no body (file listings).
pub const NO_PREVIEW: &str = "(A preview of this document is not available.)";

const PREVIEW_CHARS: usize = 400;

/// Full payload for one remote item, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub remote_id: String,
    pub title: String,
    pub url: Option<String>,
    pub created_at: Option<i64>,
    /// Detail-level modification time, when the detail endpoint reports
    /// one. The engine keeps the newest of listing, detail, and stored.
    pub modified_at: Option<i64>,
    pub owner: Option<String>,
    pub fingerprint: Option<String>,
    pub body: RawBody,
    pub extra_fields: BTreeMap<String, String>,
}

impl RawDocument {
    pub fn new(remote_id: impl Into<String>, title: impl Into<String>, body: RawBody) -> Self {
        Self {
            remote_id: remote_id.into(),
            title: title.into(),
            url: None,
            created_at: None,
            modified_at: None,
            owner: None,
            fingerprint: None,
            body,
            extra_fields: BTreeMap::new(),
        }
    }

    pub fn extra(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.extra_fields.insert(key.to_string(), value);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBody {
    Markdown(String),
    Html(String),
    PlainText(String),
    /// Office payload that needs text extraction.
    Binary { mimetype: String, bytes: Vec<u8> },
    Empty,
}

/// The uniform contract every remote system implements.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Configured instance name (`[sources.<name>]`).
    fn name(&self) -> &str;

    /// Static registry entry of this variant.
    fn kind(&self) -> &'static SourceKind;

    fn tag(&self) -> &'static str {
        self.kind().tag
    }

    fn template_key(&self) -> &'static str {
        self.kind().template_key
    }

    /// One cheap authenticated call. No other side effects.
    async fn validate_credentials(&self) -> Result<()>;

    /// Every item visible to the credential, page by page.
    ///
    /// The stream is lazy and finite; calling this again starts a fresh
    /// listing. A page that still fails after retries ends the stream with
    /// [`SourceError::Unavailable`] (or `Credential`).
    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>>;

    /// Full content for one item. [`SourceError::NotFound`] means the item
    /// was deleted after it was listed.
    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument>;

    /// Pure mapping from a stored record to display fields.
    fn render_mapping(&self, doc: &IndexedDocument) -> DisplayRecord {
        (self.kind().render)(doc)
    }
}

/// One page of a listing plus the cursor for the next one.
pub struct Page<S> {
    pub items: Vec<RemoteItem>,
    pub next: Option<S>,
}

impl<S> Page<S> {
    pub fn new(items: Vec<RemoteItem>, next: Option<S>) -> Self {
        Self { items, next }
    }
}

/// Turn a page fetcher into a lazy item stream.
///
/// `fetch` receives the cursor for one page (`first` for the first call)
/// and returns that page's items and the next cursor, if any. The cursor
/// type is whatever the remote API uses: a URL from a `Link` header, a
/// page token, an opaque Disqus cursor.
pub fn paginate<'a, S, F, Fut>(first: S, mut fetch: F) -> BoxStream<'a, Result<RemoteItem>>
where
    S: Send + 'a,
    F: FnMut(S) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<S>>> + Send + 'a,
{
    stream::try_unfold(Some(first), move |cursor| {
        let pending = cursor.map(&mut fetch);
        async move {
            match pending {
                None => Ok(None),
                Some(page) => {
                    let page = page.await?;
                    Ok(Some((page.items, page.next)))
                }
            }
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok::<RemoteItem, SourceError>)))
    .try_flatten()
    .boxed()
}

/// Flatten a fallible list of scopes (repositories, forums, groups) into
/// one stream, listing each scope with `per_scope`.
pub fn for_each_scope<'a, Fut, F>(
    scopes: Fut,
    per_scope: F,
) -> BoxStream<'a, Result<RemoteItem>>
where
    Fut: Future<Output = Result<Vec<String>>> + Send + 'a,
    F: FnMut(String) -> BoxStream<'a, Result<RemoteItem>> + Send + 'a,
{
    stream::once(scopes)
        .map_ok(|scopes| stream::iter(scopes.into_iter().map(Ok::<String, SourceError>)))
        .try_flatten()
        .map_ok(per_scope)
        .try_flatten()
        .boxed()
}

/// Include/exclude glob filter over repository paths.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = if include.is_empty() {
            None
        } else {
            Some(build_globset(include)?)
        };
        Ok(Self {
            include,
            exclude: build_globset(exclude)?,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.exclude.is_match(path) {
            return false;
        }
        self.include
            .as_ref()
            .map(|set| set.is_match(path))
            .unwrap_or(true)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SourceError::config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SourceError::config(format!("invalid glob set: {}", e)))
}

/// Display fields every variant shares; variants add badges on top.
pub fn display_base(doc: &IndexedDocument, template_key: &str, kind_label: &str) -> DisplayRecord {
    DisplayRecord {
        index_id: doc.index_id.clone(),
        template_key: template_key.to_string(),
        kind_label: kind_label.to_string(),
        title: if doc.title.is_empty() {
            doc.remote_id.clone()
        } else {
            doc.title.clone()
        },
        url: doc.url.clone(),
        owner: doc.owner.clone(),
        created: format_ts_display(doc.created_at),
        modified: format_ts_display(doc.modified_at),
        preview_html: preview_html(doc),
        highlight: None,
        badges: Vec::new(),
    }
}

/// Escaped excerpt of the document text, or [`NO_PREVIEW`].
pub fn preview_html(doc: &IndexedDocument) -> String {
    if doc.content.trim().is_empty() {
        NO_PREVIEW.to_string()
    } else {
        escape_html(&excerpt(&doc.content, PREVIEW_CHARS))
    }
}

/// Require a non-empty scope list in a source table.
pub fn require_scope(values: &[String], field: &str, doctype: &str) -> Result<()> {
    if values.iter().all(|v| v.trim().is_empty()) {
        return Err(SourceError::config(format!(
            "{} requires at least one entry in '{}'",
            doctype, field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn item(id: u32) -> RemoteItem {
        RemoteItem::new("fake", id.to_string(), id as i64)
    }

    #[tokio::test]
    async fn paginate_follows_cursor_until_exhausted() {
        let pages = vec![vec![1, 2], vec![3], vec![4, 5]];
        let listed: Vec<RemoteItem> = paginate(0usize, move |n| {
            let page = pages[n].iter().map(|i| item(*i)).collect();
            let next = (n + 1 < pages.len()).then_some(n + 1);
            async move { Ok(Page::new(page, next)) }
        })
        .try_collect()
        .await
        .unwrap();

        let ids: Vec<&str> = listed.iter().map(|i| i.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn paginate_yields_items_before_a_failing_page() {
        let mut stream = paginate(0u32, |n| async move {
            if n == 0 {
                Ok(Page::new(vec![item(1)], Some(1)))
            } else {
                Err(SourceError::unavailable("fake", "HTTP 502"))
            }
        });

        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(SourceError::Unavailable { .. })
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn scopes_are_listed_in_order() {
        let listed: Vec<RemoteItem> = for_each_scope(
            async { Ok(vec!["a".to_string(), "b".to_string()]) },
            |scope| {
                stream::iter(vec![Ok(RemoteItem::new("fake", format!("{}/1", scope), 1))]).boxed()
            },
        )
        .try_collect()
        .await
        .unwrap();
        assert_eq!(listed[0].remote_id, "a/1");
        assert_eq!(listed[1].remote_id, "b/1");
    }

    #[test]
    fn path_filter_applies_excludes_after_includes() {
        let filter = PathFilter::new(
            &["**/*.md".to_string()],
            &["vendor/**".to_string()],
        )
        .unwrap();
        assert!(filter.matches("docs/readme.md"));
        assert!(filter.matches("README.md"));
        assert!(!filter.matches("vendor/lib/readme.md"));
        assert!(!filter.matches("src/main.rs"));

        let all = PathFilter::new(&[], &[]).unwrap();
        assert!(all.matches("anything/at/all"));
    }

    #[test]
    fn invalid_glob_is_a_config_error() {
        assert!(matches!(
            PathFilter::new(&["a[".to_string()], &[]),
            Err(SourceError::Config(_))
        ));
    }
}
