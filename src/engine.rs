//! Incremental synchronization engine.
//!
//! One pass per configured source:
//!
//! ```text
//! list_remote ──▶ SyncState::observe ──▶ classify against stored stamps
//!                                         │
//!           ┌─────────────────────────────┼──────────────────┐
//!           ▼                             ▼                  ▼
//!      restamp (same               fetch_detail ×N       delete orphans
//!      fingerprint)                ─▶ normalize          (complete
//!                                  ─▶ upsert              listings only)
//! ```
//!
//! Detail fetches run on a bounded `buffer_unordered` window of
//! `workers`. Each upsert and delete is one atomic store write, so a pass
//! interrupted at any point leaves every committed item valid and the
//! next pass converges from there.
//!
//! [`sync_sources`] runs one task per source on a `JoinSet`; sources never
//! share items, so their passes need no coordination beyond the store.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tokio::task::JoinSet;

use omnidex_core::diff::{Change, PlanOptions, PlannedUpsert, SyncState};
use omnidex_core::models::{index_id, now_ts, ContentKind, IndexedDocument, PassCounts, PassRecord};
use omnidex_core::normalize::normalize;
use omnidex_core::store::IndexStore;

use crate::doctype::{DocumentSource, RawBody, RawDocument};
use crate::error::SourceError;
use crate::extract::extract_text;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Concurrent detail fetches per source.
    pub workers: usize,
    /// Treat every listed item as changed.
    pub full: bool,
    /// List and classify only; no fetches, no writes.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            full: false,
            dry_run: false,
        }
    }
}

/// Run one synchronization pass of `source` against `store`.
///
/// Per-item failures are counted, never returned. An error here means the
/// store itself failed; everything written before it stays committed.
pub async fn run_pass(
    source: &dyn DocumentSource,
    store: &dyn IndexStore,
    opts: SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<PassRecord> {
    let name = source.name().to_string();
    let tag = source.tag();
    let started_at = now_ts();

    progress.report(SyncProgressEvent::Discovering {
        source: name.clone(),
    });

    let mut state = SyncState::new();
    let mut listing_error: Option<String> = None;
    {
        let mut listing = source.list_remote();
        while let Some(next) = listing.next().await {
            match next {
                Ok(item) if item.source_tag != tag => {
                    tracing::warn!(source = %name, remote_id = %item.remote_id, tag = %item.source_tag, "listed item carries a foreign tag; ignored");
                }
                Ok(item) => state.observe(item),
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "listing incomplete; deletions suppressed");
                    state.mark_incomplete();
                    listing_error.get_or_insert_with(|| e.to_string());
                }
            }
        }
    }

    let stored = store.list_stamps(tag).await?;
    state.classify(
        &stored,
        PlanOptions {
            owner: &name,
            full: opts.full,
        },
    );
    tracing::debug!(
        source = %name,
        listed = state.seen_count(),
        stored = stored.len(),
        upserts = state.to_upsert.len(),
        restamps = state.to_restamp.len(),
        deletes = state.to_delete.len(),
        deferred = state.deferred,
        "classified listing"
    );

    let mut counts = PassCounts {
        unchanged: state.unchanged,
        ..Default::default()
    };

    if opts.dry_run {
        for plan in &state.to_upsert {
            match plan.change {
                Change::New => counts.new += 1,
                Change::Changed => counts.updated += 1,
            }
        }
        counts.unchanged += state.to_restamp.len() as u64;
        counts.deleted = state.to_delete.len() as u64;
        return Ok(PassRecord {
            source_name: name,
            source_tag: tag.to_string(),
            started_at,
            finished_at: now_ts(),
            counts,
            listing_complete: state.listing_complete(),
            error: listing_error,
        });
    }

    for restamp in std::mem::take(&mut state.to_restamp) {
        store
            .restamp(&restamp.index_id, restamp.modified_at, &name)
            .await?;
        counts.unchanged += 1;
    }

    let planned = std::mem::take(&mut state.to_upsert);
    let total = planned.len() as u64;
    let mut fetches = stream::iter(planned)
        .map(|plan| async move {
            let result = fetch_document(source, &plan).await;
            (plan, result)
        })
        .buffer_unordered(opts.workers.max(1));

    let mut done = 0u64;
    while let Some((plan, result)) = fetches.next().await {
        done += 1;
        match result {
            Ok(doc) => {
                if store.upsert(&doc).await? {
                    match plan.change {
                        Change::New => counts.new += 1,
                        Change::Changed => counts.updated += 1,
                    }
                } else {
                    counts.unchanged += 1;
                }
            }
            Err(SourceError::NotFound { .. }) => {
                if state.reclassify_not_found(tag, &plan.item.remote_id).is_some() {
                    tracing::info!(source = %name, remote_id = %plan.item.remote_id, "gone since listing; removing");
                } else {
                    tracing::info!(source = %name, remote_id = %plan.item.remote_id, "gone since listing; kept until a complete listing");
                }
            }
            Err(e) => {
                tracing::warn!(source = %name, remote_id = %plan.item.remote_id, kind = e.kind(), error = %e, "item skipped");
                counts.failed += 1;
            }
        }
        progress.report(SyncProgressEvent::Fetching {
            source: name.clone(),
            n: done,
            total,
        });
    }
    drop(fetches);

    for id in &state.to_delete {
        if store.delete(id).await? {
            counts.deleted += 1;
        }
    }

    let record = PassRecord {
        source_name: name.clone(),
        source_tag: tag.to_string(),
        started_at,
        finished_at: now_ts(),
        counts,
        listing_complete: state.listing_complete(),
        error: listing_error,
    };
    store.record_pass(&record).await?;

    progress.report(SyncProgressEvent::Finished {
        source: name.clone(),
        counts,
    });
    tracing::info!(
        source = %name,
        new = counts.new,
        updated = counts.updated,
        deleted = counts.deleted,
        unchanged = counts.unchanged,
        failed = counts.failed,
        complete = record.listing_complete,
        "pass finished"
    );
    Ok(record)
}

async fn fetch_document(
    source: &dyn DocumentSource,
    plan: &PlannedUpsert,
) -> Result<IndexedDocument, SourceError> {
    let raw = source.fetch_detail(&plan.item.remote_id).await?;
    build_document(source.name(), plan, raw)
}

/// Normalize a fetched payload into the record the store keeps.
pub fn build_document(
    source_name: &str,
    plan: &PlannedUpsert,
    raw: RawDocument,
) -> Result<IndexedDocument, SourceError> {
    let item = &plan.item;
    let remote_id = item.remote_id.as_str();

    let (kind, body) = match raw.body {
        RawBody::Markdown(s) => (ContentKind::Markdown, s),
        RawBody::Html(s) => (ContentKind::Html, s),
        RawBody::PlainText(s) => (ContentKind::PlainText, s),
        RawBody::Binary { mimetype, bytes } => {
            let text = extract_text(&bytes, &mimetype)
                .map_err(|e| SourceError::normalization(remote_id, e))?;
            (ContentKind::PlainText, text)
        }
        RawBody::Empty => (ContentKind::Empty, String::new()),
    };
    let normalized = normalize(&body, kind).map_err(|e| SourceError::from_normalize(remote_id, e))?;

    // Never move backwards: the detail view, the listing, and the stored
    // record may each have seen a different revision.
    let modified_at = raw
        .modified_at
        .unwrap_or(item.modified_at)
        .max(item.modified_at)
        .max(plan.stored_modified_at.unwrap_or(i64::MIN));

    Ok(IndexedDocument {
        index_id: index_id(&item.source_tag, remote_id),
        source_tag: item.source_tag.clone(),
        source_name: source_name.to_string(),
        remote_id: remote_id.to_string(),
        title: raw.title,
        url: raw.url,
        created_at: raw.created_at.unwrap_or(modified_at),
        modified_at,
        indexed_at: now_ts(),
        content: normalized.text,
        content_html: normalized.html,
        content_kind: kind,
        owner: raw.owner,
        fingerprint: raw.fingerprint.or_else(|| item.fingerprint.clone()),
        extra_fields: raw.extra_fields,
    })
}

/// How one source fared in a multi-source sync.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    Completed(PassRecord),
    /// Credentials rejected; the source was skipped.
    Rejected(String),
    /// The pass aborted (store failure, remote unavailable at validation,
    /// task panic).
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub tag: String,
    pub outcome: PassOutcome,
}

impl SourceReport {
    pub fn rejected(name: &str, tag: &str, reason: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
            outcome: PassOutcome::Rejected(reason.to_string()),
        }
    }
}

/// Validate and sync every source concurrently. Reports come back sorted
/// by source name.
pub async fn sync_sources(
    sources: Vec<Arc<dyn DocumentSource>>,
    store: Arc<dyn IndexStore>,
    opts: SyncOptions,
    progress: Arc<dyn SyncProgressReporter>,
) -> Vec<SourceReport> {
    let mut tasks = JoinSet::new();
    let mut names = HashMap::new();

    for source in sources {
        let name = source.name().to_string();
        let tag = source.tag().to_string();
        let store = Arc::clone(&store);
        let progress = Arc::clone(&progress);
        let handle = tasks.spawn(async move {
            let outcome = match source.validate_credentials().await {
                Err(e @ SourceError::Credential { .. }) => {
                    tracing::error!(source = %source.name(), error = %e, "credentials rejected; source skipped");
                    PassOutcome::Rejected(e.to_string())
                }
                Err(e) => {
                    tracing::error!(source = %source.name(), error = %e, "source unavailable; skipped");
                    PassOutcome::Failed(e.to_string())
                }
                Ok(()) => match run_pass(source.as_ref(), store.as_ref(), opts, progress.as_ref()).await {
                    Ok(record) => PassOutcome::Completed(record),
                    Err(e) => {
                        tracing::error!(source = %source.name(), error = %e, "pass aborted");
                        PassOutcome::Failed(format!("{:#}", e))
                    }
                },
            };
            SourceReport {
                name: source.name().to_string(),
                tag: source.tag().to_string(),
                outcome,
            }
        });
        names.insert(handle.id(), (name, tag));
    }

    let mut reports = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, report)) => reports.push(report),
            Err(e) => {
                let (name, tag) = names.remove(&e.id()).unwrap_or_default();
                tracing::error!(source = %name, error = %e, "sync task failed");
                reports.push(SourceReport {
                    name,
                    tag,
                    outcome: PassOutcome::Failed(e.to_string()),
                });
            }
        }
    }
    reports.sort_by(|a, b| a.name.cmp(&b.name));
    reports
}
