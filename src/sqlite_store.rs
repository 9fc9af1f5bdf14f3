//! SQLite-backed [`IndexStore`] implementation.
//!
//! Documents live in `documents`; `documents_fts` mirrors title and plain
//! text for FTS5 matching and is rewritten in the same transaction as
//! every upsert and delete. Pass history goes to `sync_passes`.
//!
//! Ranking is plain bm25 with title matches weighted ten times body
//! matches.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use omnidex_core::models::{
    FieldFilters, IndexedDocument, PassCounts, PassRecord, QueryHit, StoredStamp,
};
use omnidex_core::normalize::escape_html;
use omnidex_core::store::IndexStore;

const DOCUMENT_COLUMNS: &str = "d.id, d.source_tag, d.source_name, d.remote_id, d.title, d.url, \
     d.owner, d.created_at, d.modified_at, d.indexed_at, d.content, d.content_html, \
     d.content_kind, d.fingerprint, d.extra_json";

/// Snippet delimiters; control characters never survive normalization.
const MARK_OPEN: char = '\u{2}';
const MARK_CLOSE: char = '\u{3}';

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::db::connect(path).await?;
        crate::migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Turn free text into an FTS5 query: every term quoted, all required.
pub fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

/// Escape FTS5 snippet output and swap its delimiters for `<mark>`.
fn highlight_html(snippet: &str) -> String {
    escape_html(snippet)
        .replace(MARK_OPEN, "<mark>")
        .replace(MARK_CLOSE, "</mark>")
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &FieldFilters) {
    if let Some(tag) = &filters.source_tag {
        qb.push(" AND d.source_tag = ").push_bind(tag.clone());
    }
    if let Some(name) = &filters.source_name {
        qb.push(" AND d.source_name = ").push_bind(name.clone());
    }
    if let Some(owner) = &filters.owner {
        qb.push(" AND d.owner = ").push_bind(owner.clone());
    }
    if let Some(since) = filters.modified_since {
        qb.push(" AND d.modified_at >= ").push_bind(since);
    }
    for (key, value) in &filters.extra {
        qb.push(" AND json_extract(d.extra_json, ")
            .push_bind(format!("$.\"{}\"", key.replace('"', "")))
            .push(") = ")
            .push_bind(value.clone());
    }
}

fn row_to_document(row: &SqliteRow) -> Result<IndexedDocument> {
    let kind: String = row.try_get("content_kind")?;
    let extra_json: String = row.try_get("extra_json")?;
    let extra_fields: BTreeMap<String, String> = serde_json::from_str(&extra_json)
        .with_context(|| format!("corrupt extra_json for {}", row.get::<String, _>("id")))?;

    Ok(IndexedDocument {
        index_id: row.try_get("id")?,
        source_tag: row.try_get("source_tag")?,
        source_name: row.try_get("source_name")?,
        remote_id: row.try_get("remote_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
        indexed_at: row.try_get("indexed_at")?,
        content: row.try_get("content")?,
        content_html: row.try_get("content_html")?,
        content_kind: kind.parse().map_err(|e: String| anyhow!(e))?,
        owner: row.try_get("owner")?,
        fingerprint: row.try_get("fingerprint")?,
        extra_fields,
    })
}

fn row_to_pass(row: &SqliteRow) -> Result<PassRecord> {
    let count = |col: &str| -> Result<u64> { Ok(row.try_get::<i64, _>(col)?.max(0) as u64) };
    Ok(PassRecord {
        source_name: row.try_get("source_name")?,
        source_tag: row.try_get("source_tag")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        counts: PassCounts {
            new: count("new_count")?,
            updated: count("updated_count")?,
            deleted: count("deleted_count")?,
            unchanged: count("unchanged_count")?,
            failed: count("failed_count")?,
        },
        listing_complete: row.try_get("listing_complete")?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn upsert(&self, doc: &IndexedDocument) -> Result<bool> {
        let extra_json = serde_json::to_string(&doc.extra_fields)?;
        let mut tx = self.pool.begin().await?;

        let applied = sqlx::query(
            r#"
            INSERT INTO documents (id, source_tag, source_name, remote_id, title, url, owner,
                                   created_at, modified_at, indexed_at, content, content_html,
                                   content_kind, fingerprint, extra_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_name = excluded.source_name,
                title = excluded.title,
                url = excluded.url,
                owner = excluded.owner,
                created_at = excluded.created_at,
                modified_at = excluded.modified_at,
                indexed_at = excluded.indexed_at,
                content = excluded.content,
                content_html = excluded.content_html,
                content_kind = excluded.content_kind,
                fingerprint = excluded.fingerprint,
                extra_json = excluded.extra_json
            WHERE excluded.modified_at >= documents.modified_at
            "#,
        )
        .bind(&doc.index_id)
        .bind(&doc.source_tag)
        .bind(&doc.source_name)
        .bind(&doc.remote_id)
        .bind(&doc.title)
        .bind(&doc.url)
        .bind(&doc.owner)
        .bind(doc.created_at)
        .bind(doc.modified_at)
        .bind(doc.indexed_at)
        .bind(&doc.content)
        .bind(&doc.content_html)
        .bind(doc.content_kind.as_str())
        .bind(&doc.fingerprint)
        .bind(&extra_json)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if applied {
            sqlx::query("DELETE FROM documents_fts WHERE document_id = ?")
                .bind(&doc.index_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO documents_fts (document_id, title, content) VALUES (?, ?, ?)")
                .bind(&doc.index_id)
                .bind(&doc.title)
                .bind(&doc.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(applied)
    }

    async fn restamp(&self, index_id: &str, modified_at: i64, source_name: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET modified_at = ?, source_name = ? WHERE id = ? AND modified_at <= ?",
        )
        .bind(modified_at)
        .bind(source_name)
        .bind(index_id)
        .bind(modified_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, index_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM documents_fts WHERE document_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        tx.commit().await?;
        Ok(removed)
    }

    async fn get(&self, index_id: &str) -> Result<Option<IndexedDocument>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents d WHERE d.id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(index_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn get_all(&self, source_tag: &str) -> Result<Vec<IndexedDocument>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents d WHERE d.source_tag = ? ORDER BY d.remote_id",
            DOCUMENT_COLUMNS
        ))
        .bind(source_tag)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn list_stamps(&self, source_tag: &str) -> Result<Vec<StoredStamp>> {
        let rows = sqlx::query(
            "SELECT id, remote_id, source_name, modified_at, fingerprint FROM documents WHERE source_tag = ?",
        )
        .bind(source_tag)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StoredStamp {
                    index_id: row.try_get("id")?,
                    remote_id: row.try_get("remote_id")?,
                    source_name: row.try_get("source_name")?,
                    modified_at: row.try_get("modified_at")?,
                    fingerprint: row.try_get("fingerprint")?,
                })
            })
            .collect()
    }

    async fn query(
        &self,
        text: &str,
        filters: &FieldFilters,
        limit: usize,
    ) -> Result<Vec<QueryHit>> {
        let Some(matcher) = fts_query(text) else {
            return Ok(Vec::new());
        };

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {}, bm25(documents_fts, 0.0, 10.0, 1.0) AS match_rank, \
             snippet(documents_fts, -1, char(2), char(3), '...', 32) AS snip \
             FROM documents_fts JOIN documents d ON d.id = documents_fts.document_id \
             WHERE documents_fts MATCH ",
            DOCUMENT_COLUMNS
        ));
        qb.push_bind(matcher);
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY match_rank, d.id LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let rank: f64 = row.try_get("match_rank")?;
                let snippet: String = row.try_get("snip")?;
                Ok(QueryHit {
                    doc: row_to_document(row)?,
                    score: -rank,
                    highlight: highlight_html(&snippet),
                })
            })
            .collect()
    }

    async fn count(&self, filters: &FieldFilters) -> Result<u64> {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM documents d WHERE 1 = 1");
        push_filters(&mut qb, filters);
        let n: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn record_pass(&self, record: &PassRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_passes (source_name, source_tag, started_at, finished_at,
                                     new_count, updated_count, deleted_count,
                                     unchanged_count, failed_count, listing_complete, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.source_name)
        .bind(&record.source_tag)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.counts.new as i64)
        .bind(record.counts.updated as i64)
        .bind(record.counts.deleted as i64)
        .bind(record.counts.unchanged as i64)
        .bind(record.counts.failed as i64)
        .bind(record.listing_complete)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_pass(&self, source_name: &str) -> Result<Option<PassRecord>> {
        let row = sqlx::query(
            "SELECT * FROM sync_passes WHERE source_name = ? ORDER BY finished_at DESC, id DESC LIMIT 1",
        )
        .bind(source_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_pass).transpose()
    }
}

#[cfg(test)]
mod tests {
    use omnidex_core::models::{index_id, ContentKind};

    use super::*;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.sqlite")).await.unwrap();
        (dir, store)
    }

    fn doc(remote_id: &str, title: &str, content: &str, modified_at: i64) -> IndexedDocument {
        IndexedDocument {
            index_id: index_id("github_issue_pr", remote_id),
            source_tag: "github_issue_pr".into(),
            source_name: "gh".into(),
            remote_id: remote_id.into(),
            title: title.into(),
            url: Some(remote_id.into()),
            created_at: 1,
            modified_at,
            indexed_at: 100,
            content: content.into(),
            content_html: format!("<p>{}</p>", content),
            content_kind: ContentKind::Markdown,
            owner: Some("ada".into()),
            fingerprint: None,
            extra_fields: BTreeMap::from([("repo_name".to_string(), "octo/hello".to_string())]),
        }
    }

    #[test]
    fn fts_query_quotes_terms() {
        assert_eq!(fts_query("crash  on\"start"), Some("\"crash\" \"onstart\"".into()));
        assert_eq!(fts_query("  \"\" "), None);
        assert_eq!(highlight_html("a \u{2}<b>\u{3} c"), "a <mark>&lt;b&gt;</mark> c");
    }

    #[tokio::test]
    async fn upsert_get_and_monotonic_writes() {
        let (_dir, store) = store().await;
        let d = doc("https://github.com/octo/hello/issues/1", "Crash", "boom", 10);
        assert!(store.upsert(&d).await.unwrap());
        assert_eq!(store.get(&d.index_id).await.unwrap(), Some(d.clone()));

        let older = IndexedDocument {
            modified_at: 5,
            title: "Stale".into(),
            ..d.clone()
        };
        assert!(!store.upsert(&older).await.unwrap());
        assert_eq!(store.get(&d.index_id).await.unwrap().unwrap().title, "Crash");

        assert!(store.restamp(&d.index_id, 20, "gh2").await.unwrap());
        assert!(!store.restamp(&d.index_id, 15, "gh").await.unwrap());
        let stamps = store.list_stamps("github_issue_pr").await.unwrap();
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].modified_at, 20);
        assert_eq!(stamps[0].source_name, "gh2");
    }

    #[tokio::test]
    async fn query_ranks_titles_and_filters() {
        let (_dir, store) = store().await;
        let a = doc("a", "Parser crash", "stack trace attached", 10);
        let b = doc("b", "Docs", "the parser crash happens at startup", 10);
        let c = IndexedDocument {
            source_name: "other".into(),
            ..doc("c", "Unrelated", "nothing here", 10)
        };
        for d in [&a, &b, &c] {
            store.upsert(d).await.unwrap();
        }

        let hits = store.query("parser crash", &FieldFilters::default(), 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc.remote_id, "a");
        assert!(hits[1].highlight.contains("<mark>parser</mark>"));

        let filtered = FieldFilters {
            extra: BTreeMap::from([("repo_name".to_string(), "octo/other".to_string())]),
            ..Default::default()
        };
        assert!(store.query("parser", &filtered, 10).await.unwrap().is_empty());

        let by_name = FieldFilters {
            source_name: Some("other".into()),
            ..Default::default()
        };
        assert_eq!(store.count(&by_name).await.unwrap(), 1);
        assert_eq!(store.count(&FieldFilters::default()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_removes_from_search() {
        let (_dir, store) = store().await;
        let d = doc("a", "Parser crash", "boom", 10);
        store.upsert(&d).await.unwrap();
        assert!(store.delete(&d.index_id).await.unwrap());
        assert!(!store.delete(&d.index_id).await.unwrap());
        assert!(store.query("parser", &FieldFilters::default(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_pass_is_most_recent() {
        let (_dir, store) = store().await;
        assert!(store.last_pass("gh").await.unwrap().is_none());
        for finished in [100, 300, 200] {
            store
                .record_pass(&PassRecord {
                    source_name: "gh".into(),
                    source_tag: "github_issue_pr".into(),
                    started_at: finished - 10,
                    finished_at: finished,
                    counts: PassCounts {
                        new: finished as u64,
                        ..Default::default()
                    },
                    listing_complete: true,
                    error: None,
                })
                .await
                .unwrap();
        }
        let last = store.last_pass("gh").await.unwrap().unwrap();
        assert_eq!(last.finished_at, 300);
        assert_eq!(last.counts.new, 300);
    }
}
