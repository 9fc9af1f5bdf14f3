//! GitHub sources: issues and pull requests, repository files, and
//! Markdown files.
//!
//! All three share a [`GitHub`] client over the REST v3 API. Repositories
//! come from `repos = ["owner/repo"]` plus every repository of each entry
//! in `orgs` (organisation first, user account as fallback).
//!
//! | Doctype | Remote id | modified_at |
//! |---------|-----------|-------------|
//! | `github_issue_pr` | issue `html_url` | issue `updated_at` |
//! | `github_file` | blob URL | branch head commit date |
//! | `github_markdown` | blob URL | branch head commit date |
//!
//! File listings report the head commit date for every blob, so a push
//! bumps every file; the blob sha travels as the fingerprint and lets the
//! engine restamp untouched files instead of downloading them again.
//!
//! Issue listings page in creation order, which stays stable while an
//! issue is updated mid-listing. Comment activity bumps an issue's
//! `updated_at`, so issue listings see new comments. Edits to comments do not, and are picked up on the next
//! change to the issue itself.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use base64::Engine as _;
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use omnidex_core::models::{parse_timestamp, Badge, DisplayRecord, IndexedDocument, RemoteItem};

use super::{display_base, for_each_scope, paginate, DocumentSource, Page, PathFilter, RawBody, RawDocument};
use crate::config::SourceConfig;
use crate::error::{Result, SourceError};
use crate::http::{decode_json, ApiClient, Auth, HttpError};
use crate::registry::{SourceContext, SourceKind};

pub const API_URL: &str = "https://api.github.com";
pub const WEB_URL: &str = "https://github.com";
pub const RAW_URL: &str = "https://raw.githubusercontent.com";

pub static ISSUE_PR: SourceKind = SourceKind {
    tag: "github_issue_pr",
    template_key: "search_item_issue_pr",
    description: "GitHub issues and pull requests, with all comments",
    check: check_repos,
    build: build_issue_pr,
    render: render_issue_pr,
};

pub static FILE: SourceKind = SourceKind {
    tag: "github_file",
    template_key: "search_item_file",
    description: "Every file in a GitHub branch (metadata only)",
    check: check_files,
    build: build_file,
    render: render_file,
};

pub static MARKDOWN: SourceKind = SourceKind {
    tag: "github_markdown",
    template_key: "search_item_markdown",
    description: "Markdown files in a GitHub branch, rendered and indexed",
    check: check_files,
    build: build_markdown,
    render: render_markdown,
};

// ═══════════════════════════════════════════════════════════════════════
// URL helpers
// ═══════════════════════════════════════════════════════════════════════

/// `https://github.com/{repo}/blob/{branch}/{path}`
pub fn blob_url(repo: &str, branch: &str, path: &str) -> String {
    format!("{}/{}/blob/{}/{}", WEB_URL, repo, branch, path)
}

/// Split a blob URL into `(repo, branch, path)`.
///
/// Branch names containing `/` cannot be told apart from the path; the
/// first segment after `blob` is taken as the branch.
pub fn split_blob_url(url: &str) -> Option<(String, String, String)> {
    let rest = url.strip_prefix(WEB_URL)?.strip_prefix('/')?;
    let mut parts = rest.splitn(5, '/');
    let owner = parts.next()?;
    let name = parts.next()?;
    if parts.next()? != "blob" {
        return None;
    }
    let branch = parts.next()?;
    let path = parts.next()?;
    if owner.is_empty() || name.is_empty() || branch.is_empty() || path.is_empty() {
        return None;
    }
    Some((format!("{}/{}", owner, name), branch.to_string(), path.to_string()))
}

/// Split a blob URL whose branch is known into `(repo, path)`. Works for
/// branch names containing `/`.
pub fn split_blob_url_on(url: &str, branch: &str) -> Option<(String, String)> {
    let repo = repo_from_url(url)?;
    let prefix = format!("{}/{}/blob/{}/", WEB_URL, repo, branch);
    let path = url.strip_prefix(&prefix).filter(|p| !p.is_empty())?;
    Some((repo, path.to_string()))
}

/// Raw-content URL for a blob URL.
pub fn raw_url(blob: &str) -> Option<String> {
    let (repo, branch, path) = split_blob_url(blob)?;
    Some(raw_file_url(&repo, &branch, &path))
}

pub fn raw_file_url(repo: &str, branch: &str, path: &str) -> String {
    format!("{}/{}/{}/{}", RAW_URL, repo, branch, path)
}

/// `owner/repo` from any github.com URL below a repository.
pub fn repo_from_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix(WEB_URL)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{}/{}", owner, name))
}

/// `(owner/repo, number)` from an issue or pull request URL.
pub fn issue_from_url(url: &str) -> Option<(String, u64)> {
    let rest = url.strip_prefix(WEB_URL)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
    match parts.as_slice() {
        [owner, name, "issues" | "pull", number] => {
            Some((format!("{}/{}", owner, name), number.parse().ok()?))
        }
        _ => None,
    }
}

pub fn user_url(login: &str) -> String {
    format!("{}/{}", WEB_URL, login)
}

/// One linked badge per user in a comma-separated login list.
pub fn user_badges(logins: &str) -> Vec<Badge> {
    logins
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|login| Badge::linked("user", format!("@{}", login), user_url(login)))
        .collect()
}

fn next_link(headers: &HeaderMap) -> Option<String> {
    static NEXT: OnceLock<Regex> = OnceLock::new();
    let re = NEXT.get_or_init(|| {
        Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("static regex")
    });
    let value = headers.get(LINK)?.to_str().ok()?;
    re.captures(value).map(|c| c[1].to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Shared client
// ═══════════════════════════════════════════════════════════════════════

fn check_repos(config: &SourceConfig) -> Result<()> {
    if config.repos.is_empty() && config.orgs.is_empty() {
        return Err(SourceError::config(format!(
            "{} requires 'repos' or 'orgs'",
            config.doctype
        )));
    }
    for repo in &config.repos {
        let mut parts = repo.split('/');
        let valid = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
        );
        if !valid {
            return Err(SourceError::config(format!(
                "repository '{}' must be given as owner/repo",
                repo
            )));
        }
    }
    Ok(())
}

fn check_files(config: &SourceConfig) -> Result<()> {
    check_repos(config)?;
    PathFilter::new(&config.include_globs, &config.exclude_globs).map(|_| ())
}

struct GitHub {
    name: String,
    api: String,
    client: ApiClient,
    repos: Vec<String>,
    orgs: Vec<String>,
}

#[derive(Deserialize)]
struct RepoSummary {
    full_name: String,
}

impl GitHub {
    fn from_context(ctx: &SourceContext<'_>) -> Result<Self> {
        let token = ctx.config.credential(ctx.name, ctx.config_dir)?;
        Ok(Self {
            name: ctx.name.to_string(),
            api: ctx.config.api_url_or(API_URL),
            client: ApiClient::new(ctx.http, Auth::Bearer(token))?,
            repos: ctx.config.repos.clone(),
            orgs: ctx.config.orgs.clone(),
        })
    }

    async fn validate(&self) -> Result<()> {
        self.client
            .get(&format!("{}/user", self.api), &[])
            .await
            .map(|_| ())
            .map_err(|e| e.into_listing(&self.name))
    }

    /// GET one page and the `rel="next"` link from its headers.
    async fn page<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<(T, Option<String>), HttpError> {
        let response = self.client.get(url, &[]).await?;
        let next = next_link(response.headers());
        let body = decode_json(url, response).await?;
        Ok((body, next))
    }

    /// Every page of a `Link`-paginated collection.
    async fn all_pages<T: DeserializeOwned>(&self, first: String) -> std::result::Result<Vec<T>, HttpError> {
        let mut out = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let (items, link): (Vec<T>, _) = self.page(&url).await?;
            out.extend(items);
            next = link;
        }
        Ok(out)
    }

    /// Configured repositories plus every repository of each org/user.
    async fn repositories(&self) -> Result<Vec<String>> {
        let mut repos: BTreeSet<String> = self.repos.iter().cloned().collect();
        for org in &self.orgs {
            let first = format!("{}/orgs/{}/repos?per_page=100", self.api, org);
            let listed = match self.all_pages::<RepoSummary>(first).await {
                Err(e) if e.is_gone() => {
                    let first = format!("{}/users/{}/repos?per_page=100", self.api, org);
                    self.all_pages::<RepoSummary>(first).await
                }
                other => other,
            }
            .map_err(|e| e.into_listing(&self.name))?;
            repos.extend(listed.into_iter().map(|r| r.full_name));
        }
        Ok(repos.into_iter().collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// github_issue_pr
// ═══════════════════════════════════════════════════════════════════════

pub struct IssuePrSource {
    github: GitHub,
}

fn build_issue_pr(ctx: &SourceContext<'_>) -> Result<Arc<dyn DocumentSource>> {
    Ok(Arc::new(IssuePrSource {
        github: GitHub::from_context(ctx)?,
    }))
}

#[derive(Deserialize)]
struct IssueSummary {
    html_url: String,
    updated_at: String,
}

#[derive(Deserialize)]
struct User {
    login: String,
}

#[derive(Deserialize)]
struct Label {
    name: String,
}

#[derive(Deserialize)]
struct Issue {
    html_url: String,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<User>,
    state: String,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    comments: u64,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Comment {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

fn timestamp(name: &str, value: &str) -> Result<i64> {
    parse_timestamp(value)
        .ok_or_else(|| SourceError::unavailable(name, format!("unparseable timestamp '{}'", value)))
}

#[async_trait]
impl DocumentSource for IssuePrSource {
    fn name(&self) -> &str {
        &self.github.name
    }

    fn kind(&self) -> &'static SourceKind {
        &ISSUE_PR
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.github.validate().await
    }

    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>> {
        let gh = &self.github;
        for_each_scope(gh.repositories(), move |repo| {
            let first = format!(
                "{}/repos/{}/issues?state=all&per_page=100&sort=created&direction=asc",
                gh.api, repo
            );
            paginate(first, move |url: String| async move {
                let (issues, next): (Vec<IssueSummary>, _) =
                    gh.page(&url).await.map_err(|e| e.into_listing(&gh.name))?;
                let items = issues
                    .into_iter()
                    .map(|issue| {
                        Ok(RemoteItem::new(
                            ISSUE_PR.tag,
                            issue.html_url,
                            timestamp(&gh.name, &issue.updated_at)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Page::new(items, next))
            })
        })
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument> {
        let gh = &self.github;
        let (repo, number) = issue_from_url(remote_id)
            .ok_or_else(|| SourceError::fetch(remote_id, "not a GitHub issue or pull request URL"))?;

        let issue: Issue = gh
            .client
            .get_json(&format!("{}/repos/{}/issues/{}", gh.api, repo, number), &[])
            .await
            .map_err(|e| e.into_fetch(remote_id))?;

        let comments: Vec<Comment> = if issue.comments > 0 {
            gh.all_pages(format!(
                "{}/repos/{}/issues/{}/comments?per_page=100",
                gh.api, repo, number
            ))
            .await
            .map_err(|e| e.into_fetch(remote_id))?
        } else {
            Vec::new()
        };

        let author = issue.user.as_ref().map(|u| u.login.clone());
        let mut participants: Vec<String> = Vec::new();
        for login in author
            .iter()
            .cloned()
            .chain(comments.iter().filter_map(|c| c.user.as_ref().map(|u| u.login.clone())))
        {
            if !participants.contains(&login) {
                participants.push(login);
            }
        }

        let mut content = issue.body.clone().unwrap_or_default();
        for comment in &comments {
            if let Some(body) = comment.body.as_deref().filter(|b| !b.trim().is_empty()) {
                content.push_str("\n\n");
                content.push_str(body);
            }
        }

        let kind = if issue.pull_request.is_some() {
            "pull_request"
        } else {
            "issue"
        };
        let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();

        let mut raw = RawDocument::new(remote_id, issue.title.clone(), RawBody::Markdown(content))
            .extra("repo_name", repo.clone())
            .extra("repo_url", format!("{}/{}", WEB_URL, repo))
            .extra("issue_number", issue.number.to_string())
            .extra("issue_kind", kind)
            .extra("issue_state", issue.state.clone())
            .extra("issue_url", issue.html_url.clone())
            .extra("labels", labels.join(","))
            .extra("github_user", participants.join(","));
        raw.url = Some(issue.html_url.clone());
        raw.owner = author;
        raw.created_at = parse_timestamp(&issue.created_at);
        raw.modified_at = parse_timestamp(&issue.updated_at);
        Ok(raw)
    }
}

fn render_issue_pr(doc: &IndexedDocument) -> DisplayRecord {
    let label = match doc.extra("issue_kind") {
        Some("pull_request") => "Pull Request",
        _ => "Issue",
    };
    let mut record = display_base(doc, ISSUE_PR.template_key, label);
    if let Some(number) = doc.extra("issue_number") {
        record.title = format!("#{} {}", number, record.title);
    }
    if let Some(repo) = doc.extra("repo_name") {
        let href = doc
            .extra("repo_url")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{}", WEB_URL, repo));
        record.badges.push(Badge::linked("repo", repo, href));
    }
    if let Some(state) = doc.extra("issue_state") {
        record.badges.push(Badge::new("state", state));
    }
    if let Some(labels) = doc.extra("labels") {
        record
            .badges
            .extend(labels.split(',').filter(|l| !l.is_empty()).map(|l| Badge::new("label", l)));
    }
    if let Some(users) = doc.extra("github_user") {
        record.badges.extend(user_badges(users));
    }
    record
}

// ═══════════════════════════════════════════════════════════════════════
// github_file / github_markdown
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct Branch {
    commit: BranchCommit,
}

#[derive(Deserialize)]
struct BranchCommit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    #[serde(default)]
    committer: Option<Signature>,
    #[serde(default)]
    author: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: String,
}

#[derive(Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Deserialize)]
struct Contents {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Branch-scoped blob listing shared by the two file doctypes.
struct BlobLister {
    github: GitHub,
    branch: Option<String>,
    /// Default branch per repository, as resolved by the last listing.
    resolved: Mutex<HashMap<String, String>>,
    filter: PathFilter,
}

impl BlobLister {
    fn from_context(ctx: &SourceContext<'_>, default_include: &[&str]) -> Result<Self> {
        let include = if ctx.config.include_globs.is_empty() {
            default_include.iter().map(|s| s.to_string()).collect()
        } else {
            ctx.config.include_globs.clone()
        };
        Ok(Self {
            github: GitHub::from_context(ctx)?,
            branch: ctx.config.branch.clone(),
            resolved: Mutex::new(HashMap::new()),
            filter: PathFilter::new(&include, &ctx.config.exclude_globs)?,
        })
    }

    /// Listed items for one repository. A truncated tree ends the list
    /// with an error so the pass never deletes on partial data.
    async fn repo_items(&self, tag: &'static str, repo: &str) -> Result<Vec<Result<RemoteItem>>> {
        let gh = &self.github;
        let listing = |e: HttpError| e.into_listing(&gh.name);

        let branch = match &self.branch {
            Some(branch) => branch.clone(),
            None => {
                let info: RepoInfo = gh
                    .client
                    .get_json(&format!("{}/repos/{}", gh.api, repo), &[])
                    .await
                    .map_err(listing)?;
                if let Ok(mut resolved) = self.resolved.lock() {
                    resolved.insert(repo.to_string(), info.default_branch.clone());
                }
                info.default_branch
            }
        };

        let head: Branch = gh
            .client
            .get_json(&format!("{}/repos/{}/branches/{}", gh.api, repo, branch), &[])
            .await
            .map_err(listing)?;
        let date = head
            .commit
            .commit
            .committer
            .as_ref()
            .or(head.commit.commit.author.as_ref())
            .map(|s| s.date.as_str())
            .unwrap_or_default();
        let modified_at = timestamp(&gh.name, date)?;

        let tree: Tree = gh
            .client
            .get_json(
                &format!("{}/repos/{}/git/trees/{}", gh.api, repo, head.commit.sha),
                &[("recursive", "1")],
            )
            .await
            .map_err(listing)?;

        let mut items: Vec<Result<RemoteItem>> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob" && self.filter.matches(&entry.path))
            .map(|entry| {
                Ok(RemoteItem::new(tag, blob_url(repo, &branch, &entry.path), modified_at)
                    .with_fingerprint(entry.sha))
            })
            .collect();

        if tree.truncated {
            tracing::warn!(source = %gh.name, repo, "git tree truncated; deletions skipped this pass");
            items.push(Err(SourceError::unavailable(
                &gh.name,
                format!("tree listing for {} was truncated", repo),
            )));
        }
        Ok(items)
    }

    fn list(&self, tag: &'static str) -> BoxStream<'_, Result<RemoteItem>> {
        for_each_scope(self.github.repositories(), move |repo| {
            futures::stream::once(async move { self.repo_items(tag, &repo).await })
                .map(|listed| match listed {
                    Ok(items) => futures::stream::iter(items).boxed(),
                    Err(e) => futures::stream::iter(vec![Err(e)]).boxed(),
                })
                .flatten()
                .boxed()
        })
    }

    async fn contents(&self, remote_id: &str) -> Result<(String, String, Contents)> {
        let gh = &self.github;
        let not_blob = || SourceError::fetch(remote_id, "not a GitHub blob URL");
        let known = match &self.branch {
            Some(branch) => Some(branch.clone()),
            None => repo_from_url(remote_id).and_then(|repo| {
                self.resolved.lock().ok()?.get(&repo).cloned()
            }),
        };
        let (repo, branch, path) = match known {
            Some(branch) => {
                let (repo, path) = split_blob_url_on(remote_id, &branch).ok_or_else(not_blob)?;
                (repo, branch, path)
            }
            None => split_blob_url(remote_id).ok_or_else(not_blob)?,
        };

        let mut url = reqwest::Url::parse(&format!("{}/repos/{}/contents", gh.api, repo))
            .map_err(|e| SourceError::fetch(remote_id, e))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::fetch(remote_id, "api_url cannot carry a path"))?
            .extend(path.split('/'));

        let contents: Contents = gh
            .client
            .get_json(url.as_str(), &[("ref", branch.as_str())])
            .await
            .map_err(|e| e.into_fetch(remote_id))?;
        if contents.kind != "file" {
            return Err(SourceError::not_found(remote_id));
        }
        Ok((repo, branch, contents))
    }

    fn describe(&self, remote_id: &str, repo: &str, branch: &str, contents: &Contents, body: RawBody) -> RawDocument {
        let mut raw = RawDocument::new(remote_id, contents.name.clone(), body)
            .extra("repo_name", repo)
            .extra("repo_url", format!("{}/{}", WEB_URL, repo))
            .extra("branch", branch)
            .extra("file_path", contents.path.clone())
            .extra("file_name", contents.name.clone())
            .extra("file_size", contents.size.to_string())
            .extra("raw_url", raw_file_url(repo, branch, &contents.path));
        raw.url = Some(
            contents
                .html_url
                .clone()
                .unwrap_or_else(|| remote_id.to_string()),
        );
        raw.fingerprint = Some(contents.sha.clone());
        raw
    }
}

pub struct FileSource {
    blobs: BlobLister,
}

fn build_file(ctx: &SourceContext<'_>) -> Result<Arc<dyn DocumentSource>> {
    Ok(Arc::new(FileSource {
        blobs: BlobLister::from_context(ctx, &[])?,
    }))
}

#[async_trait]
impl DocumentSource for FileSource {
    fn name(&self) -> &str {
        &self.blobs.github.name
    }

    fn kind(&self) -> &'static SourceKind {
        &FILE
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.blobs.github.validate().await
    }

    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>> {
        self.blobs.list(FILE.tag)
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument> {
        let (repo, branch, contents) = self.blobs.contents(remote_id).await?;
        Ok(self
            .blobs
            .describe(remote_id, &repo, &branch, &contents, RawBody::Empty))
    }
}

fn render_file(doc: &IndexedDocument) -> DisplayRecord {
    let mut record = display_base(doc, FILE.template_key, "File");
    file_badges(doc, &mut record);
    record
}

pub struct MarkdownSource {
    blobs: BlobLister,
}

fn build_markdown(ctx: &SourceContext<'_>) -> Result<Arc<dyn DocumentSource>> {
    Ok(Arc::new(MarkdownSource {
        blobs: BlobLister::from_context(ctx, &["**/*.md", "**/*.markdown"])?,
    }))
}

#[async_trait]
impl DocumentSource for MarkdownSource {
    fn name(&self) -> &str {
        &self.blobs.github.name
    }

    fn kind(&self) -> &'static SourceKind {
        &MARKDOWN
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.blobs.github.validate().await
    }

    fn list_remote(&self) -> BoxStream<'_, Result<RemoteItem>> {
        self.blobs.list(MARKDOWN.tag)
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<RawDocument> {
        let (repo, branch, contents) = self.blobs.contents(remote_id).await?;

        let inline = contents
            .content
            .as_deref()
            .map(|c| c.chars().filter(|ch| !ch.is_whitespace()).collect::<String>())
            .filter(|c| !c.is_empty());
        let bytes = match (inline, &contents.download_url) {
            (Some(encoded), _) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| SourceError::normalization(remote_id, e))?,
            // Files over 1 MB come without inline content.
            (None, Some(download)) => self
                .blobs
                .github
                .client
                .get_bytes(download, &[])
                .await
                .map_err(|e| e.into_fetch(remote_id))?,
            (None, None) => Vec::new(),
        };
        let text = String::from_utf8(bytes).map_err(|e| SourceError::normalization(remote_id, e))?;

        Ok(self
            .blobs
            .describe(remote_id, &repo, &branch, &contents, RawBody::Markdown(text)))
    }
}

fn render_markdown(doc: &IndexedDocument) -> DisplayRecord {
    let mut record = display_base(doc, MARKDOWN.template_key, "Markdown");
    file_badges(doc, &mut record);
    if let Some(raw) = doc.extra("raw_url") {
        record.badges.push(Badge::linked("raw", "raw", raw));
    }
    record
}

fn file_badges(doc: &IndexedDocument, record: &mut DisplayRecord) {
    if let Some(repo) = doc.extra("repo_name") {
        let href = doc
            .extra("repo_url")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{}", WEB_URL, repo));
        record.badges.push(Badge::linked("repo", repo, href));
    }
    if let Some(branch) = doc.extra("branch") {
        record.badges.push(Badge::new("branch", branch));
    }
    if let Some(path) = doc.extra("file_path") {
        record.badges.push(Badge::new("path", path));
    }
}
