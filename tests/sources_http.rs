//! Remote sources against a mock HTTP server.
//!
//! Each test points one configured source at `httpmock` through its
//! `api_url` override and drives a full pass or a credential check.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use httpmock::prelude::*;
use serde_json::json;

use omnidex::config::parse_config;
use omnidex::doctype::DocumentSource;
use omnidex::engine::{run_pass, SyncOptions};
use omnidex::error::SourceError;
use omnidex::http::HttpSettings;
use omnidex::progress::NoProgress;
use omnidex::registry::SourceRegistry;
use omnidex_core::models::{index_id, PassRecord};
use omnidex_core::store::memory::InMemoryStore;
use omnidex_core::store::IndexStore;

/// Build the single source described by `table` (the body of a
/// `[sources.s]` table) against `server`.
fn source(server: &MockServer, table: &str) -> Arc<dyn DocumentSource> {
    let text = format!(
        r#"
[db]
path = "unused.sqlite"

[sync]
max_retries = 2
backoff_base_ms = 1
timeout_secs = 5

[sources.s]
api_url = "{}"
{}
"#,
        server.base_url(),
        table
    );
    let config = parse_config(&text).unwrap();
    let (name, source_config) = config.sources.iter().next().unwrap();
    SourceRegistry::global()
        .instantiate(
            name,
            source_config,
            &HttpSettings::from_config(&config.sync),
            Path::new("."),
        )
        .unwrap()
}

async fn sync(source: &dyn DocumentSource, store: &dyn IndexStore) -> PassRecord {
    run_pass(source, store, SyncOptions::default(), &NoProgress)
        .await
        .unwrap()
}

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

// ─── GitHub ─────────────────────────────────────────────────────────

#[tokio::test]
async fn github_issues_follow_link_pagination() {
    let server = MockServer::start_async().await;
    let page_two = server.url("/repos/octo/hello/issues?state=all&page=2");

    let first = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/issues")
                .query_param("state", "all")
                .query_param("sort", "created")
                .query_param("direction", "asc")
                .query_param_missing("page")
                .header("authorization", "Bearer gh-token");
            then.status(200)
                .header("link", format!("<{}>; rel=\"next\"", page_two))
                .json_body(json!([
                    {"html_url": "https://github.com/octo/hello/issues/1", "updated_at": "2024-01-02T00:00:00Z"}
                ]));
        })
        .await;
    let second = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/issues")
                .query_param("page", "2");
            then.status(200).json_body(json!([
                {"html_url": "https://github.com/octo/hello/pull/2", "updated_at": "2024-01-01T00:00:00Z"}
            ]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello/issues/1");
            then.status(200).json_body(json!({
                "html_url": "https://github.com/octo/hello/issues/1",
                "number": 1,
                "title": "Crash on startup",
                "body": "It **crashes**.",
                "user": {"login": "alice"},
                "state": "open",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-02T00:00:00Z",
                "comments": 1,
                "labels": [{"name": "bug"}]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello/issues/1/comments");
            then.status(200)
                .json_body(json!([{"body": "Fixed on main.", "user": {"login": "bob"}}]));
        })
        .await;
    // Deleted between listing and fetch.
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello/issues/2");
            then.status(404).json_body(json!({"message": "Not Found"}));
        })
        .await;

    let gh = source(
        &server,
        r#"doctype = "github_issue_pr"
token = "gh-token"
repos = ["octo/hello"]"#,
    );
    let store = InMemoryStore::new();
    let record = sync(gh.as_ref(), &store).await;

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(record.counts.new, 1);
    assert_eq!(record.counts.failed, 0);
    assert!(record.listing_complete);

    let doc = store
        .get(&index_id("github_issue_pr", "https://github.com/octo/hello/issues/1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.title, "Crash on startup");
    assert_eq!(doc.owner.as_deref(), Some("alice"));
    assert!(doc.content.contains("crashes"));
    assert!(doc.content.contains("Fixed on main."));
    assert!(doc.content_html.contains("<strong>crashes</strong>"));
    assert_eq!(doc.extra("issue_kind"), Some("issue"));
    assert_eq!(doc.extra("labels"), Some("bug"));
    assert_eq!(doc.extra("github_user"), Some("alice,bob"));
    assert_eq!(doc.created_at, 1_704_067_200);
    assert_eq!(doc.modified_at, 1_704_153_600);
}

#[tokio::test]
async fn github_markdown_lists_the_branch_tree() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello");
            then.status(200).json_body(json!({"default_branch": "main"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello/branches/main");
            then.status(200).json_body(json!({
                "commit": {"sha": "c0ffee", "commit": {"committer": {"date": "2024-02-01T00:00:00Z"}}}
            }));
        })
        .await;
    let tree = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/git/trees/c0ffee")
                .query_param("recursive", "1");
            then.status(200).json_body(json!({
                "truncated": false,
                "tree": [
                    {"path": "README.md", "type": "blob", "sha": "b1"},
                    {"path": "docs", "type": "tree", "sha": "t1"},
                    {"path": "docs/guide.markdown", "type": "blob", "sha": "b2"},
                    {"path": "src/lib.rs", "type": "blob", "sha": "b3"}
                ]
            }));
        })
        .await;
    let encoded = base64::engine::general_purpose::STANDARD.encode("# Hello\n\nWorld of widgets\n");
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/contents/README.md")
                .query_param("ref", "main");
            then.status(200).json_body(json!({
                "name": "README.md", "path": "README.md", "sha": "b1", "size": 24,
                "type": "file", "encoding": "base64", "content": encoded,
                "html_url": "https://github.com/octo/hello/blob/main/README.md"
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/contents/docs/guide.markdown")
                .query_param("ref", "main");
            then.status(200).json_body(json!({
                "name": "guide.markdown", "path": "docs/guide.markdown", "sha": "b2", "size": 0,
                "type": "file", "content": ""
            }));
        })
        .await;

    let md = source(
        &server,
        r#"doctype = "github_markdown"
token = "t"
repos = ["octo/hello"]"#,
    );
    let store = InMemoryStore::new();
    let record = sync(md.as_ref(), &store).await;
    assert_eq!(record.counts.new, 2);

    let readme = store
        .get(&index_id(
            "github_markdown",
            "https://github.com/octo/hello/blob/main/README.md",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(readme.title, "README.md");
    assert_eq!(readme.fingerprint.as_deref(), Some("b1"));
    assert!(readme.content.contains("World of widgets"));
    assert_eq!(readme.modified_at, 1_706_745_600);
    assert_eq!(
        readme.extra("raw_url"),
        Some("https://raw.githubusercontent.com/octo/hello/main/README.md")
    );

    // A truncated tree is a partial listing: nothing gets deleted.
    tree.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello/git/trees/c0ffee");
            then.status(200).json_body(json!({"truncated": true, "tree": []}));
        })
        .await;
    let record = sync(md.as_ref(), &store).await;
    assert!(!record.listing_complete);
    assert_eq!(record.counts.deleted, 0);
    assert_eq!(store.get_all("github_markdown").await.unwrap().len(), 2);
}

#[tokio::test]
async fn github_branch_with_slash_fetches_from_that_branch() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello/branches/release/1.0");
            then.status(200).json_body(json!({
                "commit": {"sha": "abc123", "commit": {"committer": {"date": "2024-03-01T00:00:00Z"}}}
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/octo/hello/git/trees/abc123");
            then.status(200).json_body(json!({
                "truncated": false,
                "tree": [{"path": "docs/notes.md", "type": "blob", "sha": "n1"}]
            }));
        })
        .await;
    let contents = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/contents/docs/notes.md")
                .query_param("ref", "release/1.0");
            then.status(200).json_body(json!({
                "name": "notes.md", "path": "docs/notes.md", "sha": "n1", "size": 12,
                "type": "file", "encoding": "base64",
                "content": base64::engine::general_purpose::STANDARD.encode("Release notes")
            }));
        })
        .await;

    let md = source(
        &server,
        r#"doctype = "github_markdown"
token = "t"
repos = ["octo/hello"]
branch = "release/1.0""#,
    );
    let store = InMemoryStore::new();
    let record = sync(md.as_ref(), &store).await;
    contents.assert_async().await;
    assert_eq!(record.counts.new, 1);

    let doc = store
        .get(&index_id(
            "github_markdown",
            "https://github.com/octo/hello/blob/release/1.0/docs/notes.md",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.extra("branch"), Some("release/1.0"));
    assert_eq!(doc.extra("file_path"), Some("docs/notes.md"));
    assert_eq!(
        doc.extra("raw_url"),
        Some("https://raw.githubusercontent.com/octo/hello/release/1.0/docs/notes.md")
    );
}

#[tokio::test]
async fn github_rejected_token_is_a_credential_error() {
    let server = MockServer::start_async().await;
    let user = server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(401).json_body(json!({"message": "Bad credentials"}));
        })
        .await;

    let gh = source(
        &server,
        r#"doctype = "github_file"
token = "expired"
repos = ["octo/hello"]"#,
    );
    let err = gh.validate_credentials().await.unwrap_err();
    assert!(matches!(err, SourceError::Credential { .. }));
    // Auth failures are not retried.
    user.assert_calls_async(1).await;
}

// ─── Google Drive ───────────────────────────────────────────────────

#[tokio::test]
async fn gdrive_docx_exports_and_extracts() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/files")
                .query_param("spaces", "drive")
                .query_param_missing("pageToken");
            then.status(200).json_body(json!({
                "nextPageToken": "p2",
                "files": [
                    {"id": "gdoc", "name": "Minutes", "mimeType": "application/vnd.google-apps.document", "modifiedTime": "2024-03-01T10:00:00Z"},
                    {"id": "report", "name": "Report.docx", "mimeType": "application/vnd.openxmlformats-officedocument.wordprocessingml.document", "modifiedTime": "2024-03-02T10:00:00Z", "md5Checksum": "m1"},
                    {"id": "photo", "name": "cat.png", "mimeType": "image/png", "modifiedTime": "2024-03-02T10:00:00Z"},
                    {"id": "dir", "name": "Archive", "mimeType": "application/vnd.google-apps.folder", "modifiedTime": "2024-03-02T10:00:00Z"}
                ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/files").query_param("pageToken", "p2");
            then.status(200).json_body(json!({
                "files": [
                    {"id": "legacy", "name": "old.doc", "mimeType": "application/msword", "modifiedTime": "2020-01-01T00:00:00Z"}
                ]
            }));
        })
        .await;

    for (id, name, mime) in [
        ("gdoc", "Minutes", "application/vnd.google-apps.document"),
        (
            "report",
            "Report.docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ),
        ("legacy", "old.doc", "application/msword"),
    ] {
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("/files/{}", id))
                    .query_param_exists("fields");
                then.status(200).json_body(json!({
                    "id": id, "name": name, "mimeType": mime,
                    "createdTime": "2019-01-01T00:00:00Z",
                    "modifiedTime": "2024-03-01T10:00:00Z",
                    "webViewLink": format!("https://drive.google.com/file/d/{}/view", id),
                    "owners": [{"displayName": "Dana", "emailAddress": "dana@example.com"}]
                }));
            })
            .await;
    }
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/files/gdoc/export")
                .query_param("mimeType", "text/plain");
            then.status(200).body("Agenda\nShip the release");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/files/report").query_param("alt", "media");
            then.status(200).body(docx(&["Quarterly results", "Revenue grew"]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/files/legacy").query_param("alt", "media");
            then.status(200).body(b"\xd0\xcf\x11\xe0 legacy".to_vec());
        })
        .await;

    let drive = source(
        &server,
        r#"doctype = "gdrive_docx"
token = "ya29""#,
    );
    let store = InMemoryStore::new();
    let record = sync(drive.as_ref(), &store).await;
    assert_eq!(record.counts.new, 2);
    // Legacy .doc cannot be extracted.
    assert_eq!(record.counts.failed, 1);

    let report = store.get(&index_id("gdrive_docx", "report")).await.unwrap().unwrap();
    assert!(report.content.contains("Quarterly results"));
    assert!(report.content.contains("Revenue grew"));
    assert_eq!(report.owner.as_deref(), Some("dana@example.com"));
    assert_eq!(report.created_at, 1_546_300_800);
    // Listing time is newer than the detail time; the newer one wins.
    assert_eq!(report.modified_at, 1_709_373_600);

    let minutes = store.get(&index_id("gdrive_docx", "gdoc")).await.unwrap().unwrap();
    assert!(minutes.content.contains("Ship the release"));
    assert!(store.get(&index_id("gdrive_docx", "photo")).await.unwrap().is_none());
}

#[tokio::test]
async fn transient_errors_are_retried_then_reported() {
    let server = MockServer::start_async().await;
    let about = server
        .mock_async(|when, then| {
            when.method(GET).path("/about");
            then.status(503).body("try later");
        })
        .await;

    let drive = source(
        &server,
        r#"doctype = "gdrive_file"
token = "ya29""#,
    );
    let err = drive.validate_credentials().await.unwrap_err();
    assert!(matches!(err, SourceError::Unavailable { .. }));
    // One attempt plus two retries.
    about.assert_calls_async(3).await;
}

#[tokio::test]
async fn rate_limits_honour_retry_after() {
    let server = MockServer::start_async().await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/files");
            then.status(429).header("retry-after", "0").body("slow down");
        })
        .await;

    let drive = source(
        &server,
        r#"doctype = "gdrive_file"
token = "ya29""#,
    );
    let store = InMemoryStore::new();
    let record = sync(drive.as_ref(), &store).await;
    assert!(!record.listing_complete);
    assert_eq!(record.counts, Default::default());
    list.assert_calls_async(3).await;
}

// ─── Disqus ─────────────────────────────────────────────────────────

#[tokio::test]
async fn disqus_threads_and_unknown_thread() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/forums/listThreads.json")
                .query_param("forum", "blog")
                .query_param("api_key", "dq-key");
            then.status(200).json_body(json!({
                "code": 0,
                "cursor": {"hasNext": false, "next": "1:0:0"},
                "response": [
                    {"id": "100", "title": "Hello world", "createdAt": "2024-01-05T08:00:00", "forum": "blog"},
                    {"id": "101", "title": "Gone", "createdAt": "2024-01-06T08:00:00", "forum": "blog"},
                    {"id": "102", "title": "Deleted", "createdAt": "2024-01-07T08:00:00", "forum": "blog", "isDeleted": true}
                ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/threads/details.json")
                .query_param("thread", "100");
            then.status(200).json_body(json!({
                "code": 0,
                "response": {
                    "id": "100", "title": "Hello world", "link": "https://blog.example/hello",
                    "createdAt": "2024-01-05T08:00:00", "forum": "blog", "posts": 2
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/threads/listPosts.json")
                .query_param("thread", "100");
            then.status(200).json_body(json!({
                "code": 0,
                "cursor": {"hasNext": false},
                "response": [
                    {"message": "<p>First!</p><script>alert(1)</script>", "author": {"name": "Ann"}},
                    {"message": "<p>Nice post</p>", "author": {"username": "bo"}}
                ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/threads/details.json")
                .query_param("thread", "101");
            then.status(400)
                .json_body(json!({"code": 2, "response": "Invalid argument, 'thread': Unable to find thread"}));
        })
        .await;

    let disqus = source(
        &server,
        r#"doctype = "disqus"
token = "dq-key"
forums = ["blog"]"#,
    );
    let store = InMemoryStore::new();
    let record = sync(disqus.as_ref(), &store).await;
    assert_eq!(record.counts.new, 1);
    assert_eq!(record.counts.failed, 0);

    let thread = store.get(&index_id("disqus", "100")).await.unwrap().unwrap();
    assert_eq!(thread.url.as_deref(), Some("https://blog.example/hello"));
    assert!(thread.content.contains("First!"));
    assert!(thread.content.contains("Nice post"));
    assert!(!thread.content_html.contains("<script"));
    assert_eq!(thread.extra("participants"), Some("Ann,bo"));
    assert_eq!(thread.modified_at, 1_704_441_600);
}

#[tokio::test]
async fn disqus_invalid_key_is_a_credential_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/forums/details.json");
            then.status(400)
                .json_body(json!({"code": 5, "response": "Invalid API key"}));
        })
        .await;

    let disqus = source(
        &server,
        r#"doctype = "disqus"
token = "bad"
forums = ["blog"]"#,
    );
    let err = disqus.validate_credentials().await.unwrap_err();
    assert!(matches!(err, SourceError::Credential { .. }));
}

// ─── Groups.io ──────────────────────────────────────────────────────

#[tokio::test]
async fn groupsio_pages_topics_and_messages() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/gettopics")
                .query_param("group_name", "dev")
                .query_param_missing("page_token")
                .header("authorization", "Bearer gio");
            then.status(200).json_body(json!({
                "data": [
                    {"id": 1, "subject": "Release 1.0", "created": "2024-04-01T00:00:00Z", "updated": "2024-04-02T00:00:00Z", "num_messages": 2},
                    {"id": 2, "subject": "spam", "updated": "2024-04-02T00:00:00Z", "is_deleted": true}
                ],
                "has_more": true,
                "next_page_token": 42
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/gettopics")
                .query_param("group_name", "dev")
                .query_param("page_token", "42");
            then.status(200).json_body(json!({
                "data": [
                    {"id": 3, "subject": "Vanished", "updated": "2024-04-03T00:00:00Z"}
                ],
                "has_more": false,
                "next_page_token": 0
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/gettopic").query_param("topic_id", "1");
            then.status(200).json_body(json!({
                "id": 1, "subject": "Release 1.0", "created": "2024-04-01T00:00:00Z",
                "updated": "2024-04-02T00:00:00Z", "num_messages": 2
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/getmessages")
                .query_param("topic_id", "1")
                .query_param_missing("page_token");
            then.status(200).json_body(json!({
                "data": [{"body": "<p>Tagging today</p>", "name": "Lee", "created": "2024-04-01T00:00:00Z"}],
                "has_more": true,
                "next_page_token": 7
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/getmessages")
                .query_param("topic_id", "1")
                .query_param("page_token", "7");
            then.status(200).json_body(json!({
                "data": [{"body": "<p>Shipped</p>", "name": "Kim"}],
                "has_more": false,
                "next_page_token": 0
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/gettopic").query_param("topic_id", "3");
            then.status(400)
                .json_body(json!({"object": "error", "type": "invalid_value", "extra": "topic_id"}));
        })
        .await;

    let groups = source(
        &server,
        r#"doctype = "groupsio"
token = "gio"
groups = ["dev"]"#,
    );
    let store = InMemoryStore::new();
    let record = sync(groups.as_ref(), &store).await;
    assert_eq!(record.counts.new, 1);
    assert_eq!(record.counts.failed, 0);
    assert!(record.listing_complete);

    let ids: Vec<String> = store
        .get_all("groupsio")
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.remote_id)
        .collect();
    assert_eq!(ids, vec!["dev/1"]);

    let topic = store.get(&index_id("groupsio", "dev/1")).await.unwrap().unwrap();
    assert_eq!(topic.url.as_deref(), Some("https://groups.io/g/dev/topic/1"));
    assert_eq!(topic.owner.as_deref(), Some("Lee"));
    assert!(topic.content.contains("Tagging today"));
    assert!(topic.content.contains("Shipped"));
    assert_eq!(topic.extra("participants"), Some("Lee,Kim"));
}
