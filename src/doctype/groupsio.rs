//! Groups.io topics over the v1 REST API.
//!
//! Remote ids are `group/topic_id`: topic ids are numeric and the group
//! name is needed to build the topic's web URL. All messages of a topic
//! are indexed as one HTML document.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use omnidex_core::models::{parse_timestamp, Badge, DisplayRecord, IndexedDocument, RemoteItem};
use omnidex_core::normalize::escape_html;

use super::{display_base, for_each_scope, paginate, require_scope, DocumentSource, Page, RawBody, RawDocument};
use crate::config::SourceConfig;
use crate::error::{Result, SourceError};
use crate::http::{ApiClient, Auth, HttpError};
use crate::registry::{SourceContext, SourceKind};

pub const API_URL: &str = "https://groups.io/api/v1";
pub const WEB_URL: &str = "https://groups.io/g";

pub static TOPIC: SourceKind = SourceKind {
    tag: "groupsio",
    template_key: "search_item_groupsio",
    description: "Groups.io topics, with all messages",
    check,
    build,
    render,
};

fn check(config: &SourceConfig) -> Result<()> {
    require_scope(&config.groups, "groups", TOPIC.tag)?;
    if let Some(bad) = config.groups.iter().find(|g| g.contains('/')) {
        return Err(SourceError::config(format!(
            "group name '{}' must not contain '/'",
            bad
        )));
    }
    Ok(())
}

pub fn topic_remote_id(group: &str, topic_id: u64) -> String {
    format!("{}/{}", group, topic_id)
}

pub fn split_remote_id(remote_id: &str) -> Option<(&str, u64)> {
    let (group, id) = remote_id.split_once('/')?;
    if group.is_empty() {
        return None;
    }
    Some((group, id.parse().ok()?))
}

pub fn topic_url(group: &str, topic_id: u64) -> String {
    format!("{}/{}/topic/{}", WEB_URL, group, topic_id)
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct List<T> {
    #[serde(default)]
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page_token: u64,
}

impl<T> List<T> {
    fn next(&self) -> Option<u64> {
        (self.has_more && self.next_page_token != 0).then_some(self.next_page_token)
    }
}

#[derive(Deserialize)]
struct Topic {
    id: u64,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    created: Option<String>,
    updated: String,
    #[serde(default)]
    num_messages: u64,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    body: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
}

/// Groups.io reports some failures as HTTP 400 with a typed error body.
fn error_type(err: &HttpError) -> Option<String> {
    err.body()
        .and_then(|body| serde_json::from_str::<ErrorBody>(body).ok())
        .map(|e| e.kind)
}

pub struct TopicSource {
    name: String,
    api: String,
    client: ApiClient,
    groups: Vec<String>,
}

fn build(ctx: &SourceContext<'_>) -> Result<Arc<dyn DocumentSource>> {
    let token = ctx.config.credential(ctx.name, ctx.config_dir)?;
    Ok(Arc::new(TopicSource {
        name: ctx.name.to_string(),
        api: ctx.config.api_url_or(API_URL),
        client: ApiClient::new(ctx.http, Auth::Bearer(token))?,
        groups: ctx.config.groups.clone(),
    }))
}

impl TopicSource {
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<T, HttpError> {
        self.client
            .get_json(&format!("{}/{}", self.api, endpoint), query)
            .await
    }

    fn listing_error(&self, err: HttpError) -> SourceError {
        match error_type(&err).as_deref() {
            Some("unauthorized" | "inadequate_permissions") => SourceError::credential(&self.name, err),
            _ => err.into_listing(&self.name),
        }
    }

    fn fetch_error(&self, remote_id: &str, err: HttpError) -> SourceError {
        match error_type(&err).as_deref() {
            Some("invalid_value" | "not_found") => SourceError::not_found(remote_id),
            _ => err.into_fetch(remote_id),
        }
    }

    async fn messages(&self, remote_id: &str, topic_id: &str) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("topic_id", topic_id), ("limit", "100")];
            if let Some(t) = token.as_deref() {
                query.push(("page_token", t));
            }
            let page: List<Message> = self
                .call("getmessages", &query)
                .await
                .map_err(|e| self.fetch_error(remote_id, e))?;
            token = page.next().map(|t| t.to_string());
            messages.extend(page.data);
            if token.is_none() {
                return Ok(messages);
            }
        }
    }
}

#[async_trait]
impl DocumentSource for TopicSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static SourceKind {
        &TOPIC
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.call::<serde_json::Value>("getuser", &[])
            .await
            .map(|_| ())
            .map_err(|e| self.listing_error(e))
    }

    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>> {
        let groups = self.groups.clone();
        for_each_scope(async move { Ok::<_, SourceError>(groups) }, move |group| {
            paginate(None, move |token: Option<u64>| {
                let group = group.clone();
                async move {
                    let token = token.map(|t| t.to_string());
                    let mut query = vec![("group_name", group.as_str()), ("limit", "100")];
                    if let Some(t) = token.as_deref() {
                        query.push(("page_token", t));
                    }
                    let page: List<Topic> = self
                        .call("gettopics", &query)
                        .await
                        .map_err(|e| self.listing_error(e))?;

                    let next = page.next();
                    let mut items = Vec::new();
                    for topic in page.data.into_iter().filter(|t| !t.is_deleted) {
                        let updated = parse_timestamp(&topic.updated).ok_or_else(|| {
                            SourceError::unavailable(
                                &self.name,
                                format!("unparseable updated '{}'", topic.updated),
                            )
                        })?;
                        items.push(RemoteItem::new(
                            TOPIC.tag,
                            topic_remote_id(&group, topic.id),
                            updated,
                        ));
                    }
                    Ok(Page::new(items, next.map(Some)))
                }
            })
        })
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument> {
        let (group, topic_id) = split_remote_id(remote_id)
            .ok_or_else(|| SourceError::fetch(remote_id, "expected group/topic_id"))?;
        let id = topic_id.to_string();

        let topic: Topic = self
            .call("gettopic", &[("topic_id", id.as_str())])
            .await
            .map_err(|e| self.fetch_error(remote_id, e))?;
        if topic.is_deleted {
            return Err(SourceError::not_found(remote_id));
        }

        let messages = self.messages(remote_id, &id).await?;
        let mut html = String::new();
        let mut participants: Vec<String> = Vec::new();
        for message in &messages {
            let author = message.name.clone().unwrap_or_else(|| "Unknown".to_string());
            let when = message.created.as_deref().unwrap_or_default();
            html.push_str(&format!(
                "<article><p><strong>{}</strong> {}</p>{}</article>\n",
                escape_html(&author),
                escape_html(when),
                message.body
            ));
            if !participants.contains(&author) {
                participants.push(author);
            }
        }

        let mut raw = RawDocument::new(remote_id, topic.subject.clone(), RawBody::Html(html))
            .extra("group", group)
            .extra("message_count", topic.num_messages.to_string())
            .extra("participants", participants.join(","));
        raw.url = Some(topic_url(group, topic_id));
        raw.owner = participants.first().cloned();
        raw.created_at = topic.created.as_deref().and_then(parse_timestamp);
        raw.modified_at = parse_timestamp(&topic.updated);
        Ok(raw)
    }
}

fn render(doc: &IndexedDocument) -> DisplayRecord {
    let mut record = display_base(doc, TOPIC.template_key, "Groups.io Topic");
    if let Some(group) = doc.extra("group") {
        record
            .badges
            .push(Badge::linked("group", group, format!("{}/{}", WEB_URL, group)));
    }
    if let Some(count) = doc.extra("message_count") {
        record.badges.push(Badge::new("messages", count));
    }
    record
}
