//! Google Drive sources over the Drive v3 REST API.
//!
//! `gdrive_file` indexes metadata for every non-folder file visible to the
//! credential, optionally narrowed by `mimetypes`. `gdrive_docx` indexes
//! the text of Google Docs and uploaded `.docx`/`.doc` files.
//!
//! The credential is an OAuth access token, usually read from a
//! `token_path` JSON file with an `access_token` field. Refreshing it is
//! left to whatever writes that file.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use omnidex_core::models::{parse_timestamp, Badge, DisplayRecord, IndexedDocument, RemoteItem};

use super::{display_base, paginate, DocumentSource, Page, RawBody, RawDocument};
use crate::config::SourceConfig;
use crate::error::{Result, SourceError};
use crate::http::{ApiClient, Auth};
use crate::registry::{SourceContext, SourceKind};

pub const API_URL: &str = "https://www.googleapis.com/drive/v3";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,modifiedTime,md5Checksum)";
const DETAIL_FIELDS: &str =
    "id,name,mimeType,createdTime,modifiedTime,md5Checksum,webViewLink,owners(displayName,emailAddress),trashed";

pub static FILE: SourceKind = SourceKind {
    tag: "gdrive_file",
    template_key: "search_item_gdrive_file",
    description: "Google Drive files (name and metadata)",
    check: check_file,
    build: build_file,
    render: render_file,
};

pub static DOCX: SourceKind = SourceKind {
    tag: "gdrive_docx",
    template_key: "search_item_gdrive_docx",
    description: "Google Docs and Word documents in Google Drive, with text",
    check: check_docx,
    build: build_docx,
    render: render_docx,
};

fn check_file(config: &SourceConfig) -> Result<()> {
    if config.mimetypes.iter().any(|m| !m.contains('/')) {
        return Err(SourceError::config("gdrive_file mimetypes must look like type/subtype"));
    }
    Ok(())
}

fn check_docx(config: &SourceConfig) -> Result<()> {
    if !config.mimetypes.is_empty() {
        return Err(SourceError::config(
            "gdrive_docx selects documents itself; remove 'mimetypes'",
        ));
    }
    Ok(())
}

/// Whether a listed file belongs to a doctype.
type Selector = fn(&ListedFile, &[String]) -> bool;

fn select_any(file: &ListedFile, mimetypes: &[String]) -> bool {
    mimetypes.is_empty() || mimetypes.iter().any(|m| m == &file.mime_type)
}

fn select_documents(file: &ListedFile, _: &[String]) -> bool {
    is_word_document(&file.name, &file.mime_type)
}

pub fn is_word_document(name: &str, mimetype: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    mimetype == GOOGLE_DOC_MIME || lower.ends_with(".docx") || lower.ends_with(".doc")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<ListedFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedFile {
    id: String,
    name: String,
    mime_type: String,
    modified_time: String,
    #[serde(default)]
    md5_checksum: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    created_time: Option<String>,
    modified_time: String,
    #[serde(default)]
    md5_checksum: Option<String>,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    owners: Vec<Owner>,
    #[serde(default)]
    trashed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Owner {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
}

/// Client and listing shared by both Drive doctypes.
struct Drive {
    name: String,
    api: String,
    client: ApiClient,
    tag: &'static str,
    mimetypes: Vec<String>,
    select: Selector,
}

impl Drive {
    fn from_context(ctx: &SourceContext<'_>, tag: &'static str, select: Selector) -> Result<Self> {
        let token = ctx.config.credential(ctx.name, ctx.config_dir)?;
        Ok(Self {
            name: ctx.name.to_string(),
            api: ctx.config.api_url_or(API_URL),
            client: ApiClient::new(ctx.http, Auth::Bearer(token))?,
            tag,
            mimetypes: ctx.config.mimetypes.clone(),
            select,
        })
    }

    async fn validate(&self) -> Result<()> {
        self.client
            .get(&format!("{}/about", self.api), &[("fields", "user")])
            .await
            .map(|_| ())
            .map_err(|e| e.into_listing(&self.name))
    }

    fn list(&self) -> BoxStream<'_, Result<RemoteItem>> {
        paginate(None, move |token: Option<String>| async move {
            let url = format!("{}/files", self.api);
            let mut query = vec![
                ("pageSize", "100"),
                ("fields", LIST_FIELDS),
                ("q", "trashed = false"),
                ("spaces", "drive"),
            ];
            if let Some(token) = token.as_deref() {
                query.push(("pageToken", token));
            }
            let list: FileList = self
                .client
                .get_json(&url, &query)
                .await
                .map_err(|e| e.into_listing(&self.name))?;

            let mut items = Vec::new();
            for file in list.files {
                if file.mime_type == FOLDER_MIME || !(self.select)(&file, &self.mimetypes) {
                    continue;
                }
                let modified_at = parse_timestamp(&file.modified_time).ok_or_else(|| {
                    SourceError::unavailable(
                        &self.name,
                        format!("unparseable modifiedTime '{}'", file.modified_time),
                    )
                })?;
                let mut item = RemoteItem::new(self.tag, file.id, modified_at);
                item.fingerprint = file.md5_checksum;
                items.push(item);
            }
            Ok(Page::new(items, list.next_page_token.map(Some)))
        })
    }

    async fn file(&self, remote_id: &str) -> Result<DriveFile> {
        let file: DriveFile = self
            .client
            .get_json(
                &format!("{}/files/{}", self.api, remote_id),
                &[("fields", DETAIL_FIELDS)],
            )
            .await
            .map_err(|e| e.into_fetch(remote_id))?;
        if file.trashed {
            return Err(SourceError::not_found(remote_id));
        }
        Ok(file)
    }

    fn describe(&self, file: &DriveFile, body: RawBody) -> RawDocument {
        let owner = file.owners.first();
        let owner_email = owner.and_then(|o| o.email_address.clone()).unwrap_or_default();
        let owner_name = owner.and_then(|o| o.display_name.clone()).unwrap_or_default();
        let file_url = file
            .web_view_link
            .clone()
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", file.id));

        let mut raw = RawDocument::new(file.id.clone(), file.name.clone(), body)
            .extra("file_name", file.name.clone())
            .extra("file_url", file_url.clone())
            .extra("mimetype", file.mime_type.clone())
            .extra("owner_email", owner_email.clone())
            .extra("owner_name", owner_name);
        raw.url = Some(file_url);
        raw.owner = Some(owner_email).filter(|e| !e.is_empty());
        raw.created_at = file.created_time.as_deref().and_then(parse_timestamp);
        raw.modified_at = parse_timestamp(&file.modified_time);
        raw.fingerprint = file.md5_checksum.clone();
        raw
    }
}

pub struct FileSource {
    drive: Drive,
}

fn build_file(ctx: &SourceContext<'_>) -> Result<Arc<dyn DocumentSource>> {
    Ok(Arc::new(FileSource {
        drive: Drive::from_context(ctx, FILE.tag, select_any)?,
    }))
}

#[async_trait]
impl DocumentSource for FileSource {
    fn name(&self) -> &str {
        &self.drive.name
    }

    fn kind(&self) -> &'static SourceKind {
        &FILE
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.drive.validate().await
    }

    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>> {
        self.drive.list()
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument> {
        let file = self.drive.file(remote_id).await?;
        Ok(self.drive.describe(&file, RawBody::Empty))
    }
}

pub struct DocxSource {
    drive: Drive,
}

fn build_docx(ctx: &SourceContext<'_>) -> Result<Arc<dyn DocumentSource>> {
    Ok(Arc::new(DocxSource {
        drive: Drive::from_context(ctx, DOCX.tag, select_documents)?,
    }))
}

#[async_trait]
impl DocumentSource for DocxSource {
    fn name(&self) -> &str {
        &self.drive.name
    }

    fn kind(&self) -> &'static SourceKind {
        &DOCX
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.drive.validate().await
    }

    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>> {
        self.drive.list()
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument> {
        let drive = &self.drive;
        let file = drive.file(remote_id).await?;

        let body = if file.mime_type == GOOGLE_DOC_MIME {
            // Native documents have no bytes of their own; export them.
            let text = drive
                .client
                .get_text(
                    &format!("{}/files/{}/export", drive.api, remote_id),
                    &[("mimeType", "text/plain")],
                )
                .await
                .map_err(|e| e.into_fetch(remote_id))?;
            RawBody::PlainText(text)
        } else {
            let bytes = drive
                .client
                .get_bytes(
                    &format!("{}/files/{}", drive.api, remote_id),
                    &[("alt", "media")],
                )
                .await
                .map_err(|e| e.into_fetch(remote_id))?;
            RawBody::Binary {
                mimetype: file.mime_type.clone(),
                bytes,
            }
        };

        Ok(drive.describe(&file, body))
    }
}

fn owner_badge(doc: &IndexedDocument, record: &mut DisplayRecord) {
    match (doc.extra("owner_name"), doc.extra("owner_email")) {
        (Some(name), Some(email)) => record
            .badges
            .push(Badge::linked("owner", format!("{} <{}>", name, email), format!("mailto:{}", email))),
        (None, Some(email)) => record
            .badges
            .push(Badge::linked("owner", email, format!("mailto:{}", email))),
        (Some(name), None) => record.badges.push(Badge::new("owner", name)),
        (None, None) => {}
    }
}

fn render_file(doc: &IndexedDocument) -> DisplayRecord {
    let mut record = display_base(doc, FILE.template_key, "Google Drive File");
    owner_badge(doc, &mut record);
    if let Some(mimetype) = doc.extra("mimetype") {
        record.badges.push(Badge::new("type", mimetype));
    }
    record
}

fn render_docx(doc: &IndexedDocument) -> DisplayRecord {
    let mut record = display_base(doc, DOCX.template_key, "Google Document");
    owner_badge(doc, &mut record);
    if let Some(mimetype) = doc.extra("mimetype") {
        let label = if mimetype == GOOGLE_DOC_MIME {
            "Google Doc"
        } else {
            "Word"
        };
        record.badges.push(Badge::new("type", label));
    }
    record
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use omnidex_core::models::{index_id, ContentKind};

    use super::*;

    fn listed(name: &str, mime: &str) -> ListedFile {
        ListedFile {
            id: "f1".into(),
            name: name.into(),
            mime_type: mime.into(),
            modified_time: "2024-01-01T00:00:00Z".into(),
            md5_checksum: None,
        }
    }

    #[test]
    fn docx_selection_by_name_or_native_type() {
        assert!(select_documents(&listed("Notes", GOOGLE_DOC_MIME), &[]));
        assert!(select_documents(&listed("Plan.DOCX", "application/octet-stream"), &[]));
        assert!(select_documents(&listed("old.doc", "application/msword"), &[]));
        assert!(!select_documents(&listed("slides.pptx", "application/zip"), &[]));
        assert!(!select_documents(&listed("docx-notes.txt", "text/plain"), &[]));
    }

    #[test]
    fn file_selection_honours_mimetypes() {
        let pdf = listed("a.pdf", "application/pdf");
        assert!(select_any(&pdf, &[]));
        assert!(select_any(&pdf, &["application/pdf".to_string()]));
        assert!(!select_any(&pdf, &["image/png".to_string()]));
    }

    #[test]
    fn config_checks() {
        let mut cfg = SourceConfig {
            doctype: "gdrive_file".into(),
            mimetypes: vec!["pdf".into()],
            ..Default::default()
        };
        assert!(check_file(&cfg).is_err());
        cfg.mimetypes = vec!["application/pdf".into()];
        assert!(check_file(&cfg).is_ok());
        assert!(check_docx(&cfg).is_err());
    }

    #[test]
    fn render_shows_owner_and_type() {
        let doc = IndexedDocument {
            index_id: index_id("gdrive_docx", "f1"),
            source_tag: "gdrive_docx".into(),
            source_name: "drive".into(),
            remote_id: "f1".into(),
            title: "Roadmap".into(),
            url: None,
            created_at: 0,
            modified_at: 0,
            indexed_at: 0,
            content: "Ship it".into(),
            content_html: "<p>Ship it</p>".into(),
            content_kind: ContentKind::PlainText,
            owner: None,
            fingerprint: None,
            extra_fields: BTreeMap::from([
                ("owner_name".to_string(), "Ada".to_string()),
                ("owner_email".to_string(), "ada@example.org".to_string()),
                ("mimetype".to_string(), GOOGLE_DOC_MIME.to_string()),
            ]),
        };
        let record = render_docx(&doc);
        assert_eq!(record.kind_label, "Google Document");
        assert_eq!(record.badges[0].value, "Ada <ada@example.org>");
        assert_eq!(record.badges[1].value, "Google Doc");
        assert_eq!(record.preview_html, "Ship it");

        let bare = render_file(&IndexedDocument {
            extra_fields: BTreeMap::new(),
            ..doc
        });
        assert!(bare.badges.is_empty());
    }
}
