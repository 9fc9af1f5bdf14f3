//! Index store abstraction.
//!
//! The [`IndexStore`] trait is the only durable collaborator of the sync
//! engine. `index_id` is the natural key: an upsert or delete of one id is
//! a single atomic write, so concurrent writers never need a separate lock.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{FieldFilters, IndexedDocument, PassRecord, QueryHit, StoredStamp};

/// Persistent keyed document store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](IndexStore::upsert) | Insert or replace one document |
/// | [`restamp`](IndexStore::restamp) | Advance `modified_at` without touching content |
/// | [`delete`](IndexStore::delete) | Remove one document by index id |
/// | [`get`](IndexStore::get) | Lookup by index id |
/// | [`get_all`](IndexStore::get_all) | Every document with a source tag |
/// | [`list_stamps`](IndexStore::list_stamps) | Lightweight `(remote_id, modified_at)` view of a tag |
/// | [`query`](IndexStore::query) | Full-text search with field filters |
/// | [`count`](IndexStore::count) | Number of documents matching filters |
/// | [`record_pass`](IndexStore::record_pass) / [`last_pass`](IndexStore::last_pass) | Per-source pass history |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or replace a document keyed by its `index_id`.
    ///
    /// A write that would move the stored `modified_at` backwards is
    /// ignored; returns whether the write was applied.
    async fn upsert(&self, doc: &IndexedDocument) -> Result<bool>;

    /// Set `modified_at` (and owner) of an existing record, never
    /// decreasing it. Returns whether a record was updated.
    async fn restamp(&self, index_id: &str, modified_at: i64, source_name: &str) -> Result<bool>;

    /// Returns whether a record was removed.
    async fn delete(&self, index_id: &str) -> Result<bool>;

    async fn get(&self, index_id: &str) -> Result<Option<IndexedDocument>>;

    async fn get_all(&self, source_tag: &str) -> Result<Vec<IndexedDocument>>;

    /// Stamps of every document with `source_tag`.
    ///
    /// The default goes through [`get_all`](IndexStore::get_all); stores
    /// that can avoid loading bodies should override it.
    async fn list_stamps(&self, source_tag: &str) -> Result<Vec<StoredStamp>> {
        Ok(self
            .get_all(source_tag)
            .await?
            .iter()
            .map(StoredStamp::from)
            .collect())
    }

    /// Full-text search, best match first.
    async fn query(
        &self,
        text: &str,
        filters: &FieldFilters,
        limit: usize,
    ) -> Result<Vec<QueryHit>>;

    async fn count(&self, filters: &FieldFilters) -> Result<u64>;

    async fn record_pass(&self, record: &PassRecord) -> Result<()>;

    /// Most recent pass recorded for a configured source instance.
    async fn last_pass(&self, source_name: &str) -> Result<Option<PassRecord>>;
}
