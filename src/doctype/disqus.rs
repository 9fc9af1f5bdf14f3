//! Disqus comment threads over the Disqus 3.0 API.
//!
//! Each configured forum is listed with `forums/listThreads`; a thread's
//! posts are fetched in full and indexed as one HTML document. The API
//! reports only a thread's `createdAt`, so that is its modification time.
//! New posts on an indexed thread show up after `sync --full`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use omnidex_core::models::{Badge, DisplayRecord, IndexedDocument, RemoteItem};
use omnidex_core::normalize::escape_html;

use super::{display_base, for_each_scope, paginate, require_scope, DocumentSource, Page, RawBody, RawDocument};
use crate::config::SourceConfig;
use crate::error::{Result, SourceError};
use crate::http::{ApiClient, Auth, HttpError};
use crate::registry::{SourceContext, SourceKind};

pub const API_URL: &str = "https://disqus.com/api/3.0";

/// API-level code for an invalid argument, returned for unknown threads.
const CODE_INVALID_ARGUMENT: i64 = 2;
/// API-level code for a rejected or missing key.
const CODE_AUTH: [i64; 3] = [4, 5, 12];

pub static THREAD: SourceKind = SourceKind {
    tag: "disqus",
    template_key: "search_item_disqus",
    description: "Disqus comment threads, with all posts",
    check: check,
    build: build,
    render: render,
};

fn check(config: &SourceConfig) -> Result<()> {
    require_scope(&config.forums, "forums", THREAD.tag)
}

/// Parse Disqus' zone-less UTC timestamps (`2024-03-01T12:00:05`).
pub fn parse_disqus_time(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: i64,
    response: T,
    #[serde(default)]
    cursor: Option<Cursor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cursor {
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    next: Option<String>,
}

impl Cursor {
    fn next(self) -> Option<String> {
        if self.has_next {
            self.next.filter(|n| !n.is_empty())
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thread {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: Option<String>,
    created_at: String,
    #[serde(default)]
    forum: String,
    #[serde(default)]
    posts: u64,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    is_closed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Post {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Deserialize)]
struct Author {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
}

fn api_code(err: &HttpError) -> Option<i64> {
    err.body()
        .and_then(|body| serde_json::from_str::<ErrorBody>(body).ok())
        .map(|e| e.code)
}

pub struct ThreadSource {
    name: String,
    api: String,
    client: ApiClient,
    forums: Vec<String>,
}

fn build(ctx: &SourceContext<'_>) -> Result<Arc<dyn DocumentSource>> {
    let key = ctx.config.credential(ctx.name, ctx.config_dir)?;
    Ok(Arc::new(ThreadSource {
        name: ctx.name.to_string(),
        api: ctx.config.api_url_or(API_URL),
        client: ApiClient::new(ctx.http, Auth::Query("api_key", key))?,
        forums: ctx.config.forums.clone(),
    }))
}

impl ThreadSource {
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<Envelope<T>, HttpError> {
        let url = format!("{}/{}", self.api, endpoint);
        self.client.get_json(&url, query).await
    }

    fn listing_error(&self, err: HttpError) -> SourceError {
        match api_code(&err) {
            Some(code) if CODE_AUTH.contains(&code) => SourceError::credential(&self.name, err),
            _ => err.into_listing(&self.name),
        }
    }

    fn fetch_error(&self, remote_id: &str, err: HttpError) -> SourceError {
        let unknown_thread = err.status() == Some(StatusCode::BAD_REQUEST)
            && api_code(&err) == Some(CODE_INVALID_ARGUMENT);
        if unknown_thread {
            SourceError::not_found(remote_id)
        } else {
            err.into_fetch(remote_id)
        }
    }

    async fn posts(&self, remote_id: &str) -> Result<Vec<Post>> {
        let mut posts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("thread", remote_id), ("limit", "100"), ("order", "asc")];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }
            let page: Envelope<Vec<Post>> = self
                .call("threads/listPosts.json", &query)
                .await
                .map_err(|e| self.fetch_error(remote_id, e))?;
            posts.extend(page.response);
            cursor = page.cursor.and_then(Cursor::next);
            if cursor.is_none() {
                return Ok(posts);
            }
        }
    }
}

#[async_trait]
impl DocumentSource for ThreadSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static SourceKind {
        &THREAD
    }

    async fn validate_credentials(&self) -> Result<()> {
        let forum = self.forums.first().map(String::as_str).unwrap_or_default();
        let reply: Envelope<serde_json::Value> = self
            .call("forums/details.json", &[("forum", forum)])
            .await
            .map_err(|e| self.listing_error(e))?;
        if reply.code != 0 {
            return Err(SourceError::credential(
                &self.name,
                format!("Disqus API returned code {}", reply.code),
            ));
        }
        Ok(())
    }

    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>> {
        let forums = self.forums.clone();
        for_each_scope(async move { Ok::<_, SourceError>(forums) }, move |forum| {
            paginate(None, move |cursor: Option<String>| {
                let forum = forum.clone();
                async move {
                    let mut query = vec![("forum", forum.as_str()), ("limit", "100")];
                    if let Some(c) = cursor.as_deref() {
                        query.push(("cursor", c));
                    }
                    let page: Envelope<Vec<Thread>> = self
                        .call("forums/listThreads.json", &query)
                        .await
                        .map_err(|e| self.listing_error(e))?;

                    let mut items = Vec::new();
                    for thread in page.response.into_iter().filter(|t| !t.is_deleted) {
                        let created = parse_disqus_time(&thread.created_at).ok_or_else(|| {
                            SourceError::unavailable(
                                &self.name,
                                format!("unparseable createdAt '{}'", thread.created_at),
                            )
                        })?;
                        items.push(RemoteItem::new(THREAD.tag, thread.id, created));
                    }
                    Ok(Page::new(items, page.cursor.and_then(Cursor::next).map(Some)))
                }
            })
        })
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument> {
        let details: Envelope<Thread> = self
            .call("threads/details.json", &[("thread", remote_id)])
            .await
            .map_err(|e| self.fetch_error(remote_id, e))?;
        let thread = details.response;
        if thread.is_deleted {
            return Err(SourceError::not_found(remote_id));
        }

        let posts = self.posts(remote_id).await?;
        let mut html = String::new();
        let mut participants: Vec<String> = Vec::new();
        for post in posts.iter().filter(|p| !p.is_deleted) {
            let author = post
                .author
                .as_ref()
                .and_then(|a| a.name.clone().or_else(|| a.username.clone()))
                .unwrap_or_else(|| "Anonymous".to_string());
            html.push_str(&format!(
                "<article><p><strong>{}</strong></p>{}</article>\n",
                escape_html(&author),
                post.message
            ));
            if !participants.contains(&author) {
                participants.push(author);
            }
        }

        let mut raw = RawDocument::new(remote_id, thread.title.clone(), RawBody::Html(html))
            .extra("forum", thread.forum.clone())
            .extra("post_count", thread.posts.to_string())
            .extra("thread_state", if thread.is_closed { "closed" } else { "open" })
            .extra("participants", participants.join(","));
        raw.url = thread.link.clone();
        raw.created_at = parse_disqus_time(&thread.created_at);
        raw.modified_at = raw.created_at;
        Ok(raw)
    }
}

fn render(doc: &IndexedDocument) -> DisplayRecord {
    let mut record = display_base(doc, THREAD.template_key, "Disqus Thread");
    if let Some(forum) = doc.extra("forum") {
        record.badges.push(Badge::new("forum", forum));
    }
    if let Some(count) = doc.extra("post_count") {
        record.badges.push(Badge::new("posts", count));
    }
    if doc.extra("thread_state") == Some("closed") {
        record.badges.push(Badge::new("state", "closed"));
    }
    record
}
