//! Sync classification.
//!
//! A [`SyncState`] is the working set of one synchronization pass. The
//! engine feeds it every listed [`RemoteItem`], then classifies the
//! listing against the stamps already in the index:
//!
//! | Remote vs stored | Outcome |
//! |------------------|---------|
//! | absent from store | **new**, fetch and upsert |
//! | `remote > stored` | **changed**, fetch and upsert |
//! | `remote > stored`, same fingerprint | **restamp**, rewrite the timestamp only |
//! | `remote <= stored` | **unchanged**, skip |
//! | stored, not listed | **orphaned**, delete (only after a complete listing) |
//!
//! An incomplete listing never changes which documents exist: orphans
//! are not computed, new items are deferred to a later pass, and an item
//! reported gone during fetch is left in place.
//!
//! Classification is pure; nothing here performs I/O.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{index_id, RemoteItem, StoredStamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Changed,
}

/// A remote item that must be fetched and upserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpsert {
    pub item: RemoteItem,
    pub change: Change,
    pub stored_modified_at: Option<i64>,
}

impl PlannedUpsert {
    pub fn index_id(&self) -> String {
        self.item.index_id()
    }
}

/// A stored record whose remote timestamp moved but whose content
/// fingerprint did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restamp {
    pub index_id: String,
    pub remote_id: String,
    pub modified_at: i64,
}

/// Options that vary per pass.
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions<'a> {
    /// Configured instance running the pass. Only its own records can be
    /// orphaned.
    pub owner: &'a str,
    /// Treat every stored item as changed (forced refetch).
    pub full: bool,
}

/// Working set for one pass over one source.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    seen: Vec<RemoteItem>,
    positions: HashMap<String, usize>,
    listing_complete: bool,
    pub to_upsert: Vec<PlannedUpsert>,
    pub to_restamp: Vec<Restamp>,
    pub to_delete: BTreeSet<String>,
    pub unchanged: u64,
    /// New items held back because the listing was cut short.
    pub deferred: u64,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            listing_complete: true,
            ..Self::default()
        }
    }

    /// Record one listed item.
    ///
    /// An id listed twice keeps its first position and the newer of the
    /// two timestamps.
    pub fn observe(&mut self, item: RemoteItem) {
        match self.positions.get(&item.remote_id) {
            Some(&pos) => {
                let existing = &mut self.seen[pos];
                if item.modified_at > existing.modified_at {
                    *existing = item;
                }
            }
            None => {
                self.positions.insert(item.remote_id.clone(), self.seen.len());
                self.seen.push(item);
            }
        }
    }

    /// Mark the listing as cut short. Orphan detection is disabled for
    /// the rest of the pass.
    pub fn mark_incomplete(&mut self) {
        self.listing_complete = false;
    }

    pub fn listing_complete(&self) -> bool {
        self.listing_complete
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Classify the listing against stored stamps for the same tag.
    ///
    /// `stored` holds every record of the tag; records written by other
    /// instances count for new/changed/unchanged but are never orphaned
    /// by this pass.
    pub fn classify(&mut self, stored: &[StoredStamp], opts: PlanOptions<'_>) {
        self.to_upsert.clear();
        self.to_restamp.clear();
        self.to_delete.clear();
        self.unchanged = 0;
        self.deferred = 0;

        let by_remote: HashMap<&str, &StoredStamp> =
            stored.iter().map(|s| (s.remote_id.as_str(), s)).collect();

        for item in &self.seen {
            match by_remote.get(item.remote_id.as_str()) {
                None if !self.listing_complete => self.deferred += 1,
                None => self.to_upsert.push(PlannedUpsert {
                    item: item.clone(),
                    change: Change::New,
                    stored_modified_at: None,
                }),
                Some(stamp) if opts.full || item.modified_at > stamp.modified_at => {
                    let same_content = !opts.full
                        && item.fingerprint.is_some()
                        && item.fingerprint == stamp.fingerprint;
                    if same_content {
                        self.to_restamp.push(Restamp {
                            index_id: stamp.index_id.clone(),
                            remote_id: item.remote_id.clone(),
                            modified_at: item.modified_at,
                        });
                    } else {
                        self.to_upsert.push(PlannedUpsert {
                            item: item.clone(),
                            change: Change::Changed,
                            stored_modified_at: Some(stamp.modified_at),
                        });
                    }
                }
                Some(_) => self.unchanged += 1,
            }
        }

        if !self.listing_complete {
            return;
        }

        let seen: HashSet<&str> = self.seen.iter().map(|item| item.remote_id.as_str()).collect();
        for stamp in stored {
            if stamp.source_name == opts.owner && !seen.contains(stamp.remote_id.as_str()) {
                self.to_delete.insert(stamp.index_id.clone());
            }
        }
    }

    /// Move an item from upsert to delete after its detail fetch reported
    /// it gone. Returns `None` when the listing was incomplete and the
    /// stored record is kept.
    pub fn reclassify_not_found(&mut self, source_tag: &str, remote_id: &str) -> Option<String> {
        if !self.listing_complete {
            return None;
        }
        let id = index_id(source_tag, remote_id);
        self.to_delete.insert(id.clone());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: &str = "fake";

    fn stamp(remote_id: &str, modified_at: i64, owner: &str) -> StoredStamp {
        StoredStamp {
            index_id: index_id(TAG, remote_id),
            remote_id: remote_id.to_string(),
            source_name: owner.to_string(),
            modified_at,
            fingerprint: None,
        }
    }

    fn opts(owner: &str) -> PlanOptions<'_> {
        PlanOptions { owner, full: false }
    }

    #[test]
    fn new_changed_unchanged_orphaned() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 100));
        state.observe(RemoteItem::new(TAG, "2", 200));
        state.classify(&[stamp("1", 100, "main"), stamp("3", 50, "main")], opts("main"));

        assert_eq!(state.unchanged, 1);
        assert_eq!(state.to_upsert.len(), 1);
        assert_eq!(state.to_upsert[0].item.remote_id, "2");
        assert_eq!(state.to_upsert[0].change, Change::New);
        assert_eq!(state.to_delete, BTreeSet::from([index_id(TAG, "3")]));
    }

    #[test]
    fn newer_remote_timestamp_is_changed() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 150));
        state.classify(&[stamp("1", 100, "main")], opts("main"));

        assert_eq!(state.to_upsert[0].change, Change::Changed);
        assert_eq!(state.to_upsert[0].stored_modified_at, Some(100));
    }

    #[test]
    fn older_remote_timestamp_is_unchanged() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 90));
        state.classify(&[stamp("1", 100, "main")], opts("main"));

        assert!(state.to_upsert.is_empty());
        assert_eq!(state.unchanged, 1);
    }

    #[test]
    fn incomplete_listing_never_orphans() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 100));
        state.mark_incomplete();
        state.classify(&[stamp("1", 100, "main"), stamp("2", 10, "main")], opts("main"));

        assert!(state.to_delete.is_empty());
        assert!(!state.listing_complete());
    }

    #[test]
    fn incomplete_listing_defers_new_items_and_keeps_gone_ones() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 200));
        state.observe(RemoteItem::new(TAG, "new", 50));
        state.mark_incomplete();
        state.classify(&[stamp("1", 100, "main")], opts("main"));

        assert_eq!(state.deferred, 1);
        assert_eq!(state.to_upsert.len(), 1);
        assert_eq!(state.to_upsert[0].change, Change::Changed);
        assert_eq!(state.reclassify_not_found(TAG, "1"), None);
        assert!(state.to_delete.is_empty());
    }

    #[test]
    fn gone_item_is_deleted_after_complete_listing() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 200));
        state.classify(&[stamp("1", 100, "main")], opts("main"));
        assert_eq!(state.reclassify_not_found(TAG, "1"), Some(index_id(TAG, "1")));
        assert!(state.to_delete.contains(&index_id(TAG, "1")));
    }

    #[test]
    fn other_instances_records_are_not_orphaned() {
        let mut state = SyncState::new();
        state.classify(&[stamp("9", 10, "other")], opts("main"));
        assert!(state.to_delete.is_empty());
    }

    #[test]
    fn matching_fingerprint_restamps_instead_of_fetching() {
        let mut stored = stamp("1", 100, "main");
        stored.fingerprint = Some("abc".into());
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 200).with_fingerprint("abc"));
        state.classify(&[stored], opts("main"));

        assert!(state.to_upsert.is_empty());
        assert_eq!(
            state.to_restamp,
            vec![Restamp {
                index_id: index_id(TAG, "1"),
                remote_id: "1".into(),
                modified_at: 200,
            }]
        );
    }

    #[test]
    fn full_pass_refetches_everything_listed() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 100));
        state.classify(
            &[stamp("1", 100, "main")],
            PlanOptions {
                owner: "main",
                full: true,
            },
        );
        assert_eq!(state.to_upsert.len(), 1);
        assert_eq!(state.unchanged, 0);
    }

    #[test]
    fn duplicate_listing_keeps_newest_timestamp() {
        let mut state = SyncState::new();
        state.observe(RemoteItem::new(TAG, "1", 100));
        state.observe(RemoteItem::new(TAG, "2", 100));
        state.observe(RemoteItem::new(TAG, "1", 300));
        state.observe(RemoteItem::new(TAG, "1", 200));

        assert_eq!(state.seen_count(), 2);
        state.classify(&[], opts("main"));
        assert_eq!(state.to_upsert[0].item.modified_at, 300);
        assert_eq!(state.to_upsert[1].item.remote_id, "2");
    }
}
