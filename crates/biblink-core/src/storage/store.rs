use serde::Serialize;

use crate::error::Result;
use crate::models::{DedupGroup, DedupId, KeyField, Record};

/// Which records a batch run should visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFilter {
    All,
    #[default]
    UpdateNeeded,
}

/// A partial update applied to one or more records without rewriting them.
///
/// `dedup_id: Some(None)` clears the group reference. With
/// `expected_dedup_id` set, only records still referencing that group (or
/// none, for `Some(None)`) are changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub dedup_id: Option<Option<DedupId>>,
    pub update_needed: Option<bool>,
    pub touch_updated: bool,
    pub expected_dedup_id: Option<Option<DedupId>>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dedup_id(mut self, id: DedupId) -> Self {
        self.dedup_id = Some(Some(id));
        self
    }

    pub fn unset_dedup_id(mut self) -> Self {
        self.dedup_id = Some(None);
        self
    }

    pub fn update_needed(mut self, value: bool) -> Self {
        self.update_needed = Some(value);
        self
    }

    pub fn touch(mut self) -> Self {
        self.touch_updated = true;
        self
    }

    /// Applies the patch only where `dedup_id` still equals `expected`.
    pub fn if_dedup_id(mut self, expected: Option<DedupId>) -> Self {
        self.expected_dedup_id = Some(expected);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.dedup_id.is_none() && self.update_needed.is_none() && !self.touch_updated
    }
}

/// Result of [`RecordStore::link_duplicates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLink {
    pub group_id: DedupId,
    /// A new group was created for the pair.
    pub created: bool,
    /// Group the first record left to join the second record's group.
    pub left: Option<DedupId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub deleted_records: usize,
    pub grouped_records: usize,
    pub pending_updates: usize,
    pub groups: usize,
    pub deleted_groups: usize,
}

/// Operations the dedup engine needs from the record store.
///
/// Implementations must make `modify_group` atomic with respect to every other
/// group mutation so concurrent workers cannot lose membership updates.
pub trait RecordStore: Send + Sync {
    fn get_record(&self, id: &str) -> Result<Option<Record>>;

    /// Upserts a record, rewriting its candidate-key index entries.
    fn save_record(&self, record: &Record) -> Result<()>;

    /// Applies `patch` to every listed record; returns the number of rows changed.
    fn update_record_fields(&self, ids: &[String], patch: &RecordPatch, live_only: bool)
    -> Result<usize>;

    /// All records, live or deleted, carrying `value` in the given key set.
    fn find_records_by_key(&self, field: KeyField, value: &str) -> Result<Vec<Record>>;

    fn find_records_by_group(&self, group_id: &DedupId, live_only: bool) -> Result<Vec<Record>>;

    /// Component parts whose `host_record_id` equals `linking_id` within one source.
    fn find_component_parts(&self, source_id: &str, linking_id: &str) -> Result<Vec<Record>>;

    /// Counts at most `limit` records of `source_id` that reference the group.
    fn count_records_in_group_for_source(
        &self,
        group_id: &DedupId,
        source_id: &str,
        limit: usize,
    ) -> Result<usize>;

    fn get_group(&self, id: &DedupId) -> Result<Option<DedupGroup>>;

    fn save_group(&self, group: &DedupGroup) -> Result<()>;

    /// Atomically loads, mutates and writes back a group.
    /// Returns `None` without calling `f` when the group does not exist.
    fn modify_group(
        &self,
        id: &DedupId,
        f: &mut dyn FnMut(&mut DedupGroup),
    ) -> Result<Option<DedupGroup>>;

    /// Puts two records into one group in a single atomic step.
    ///
    /// The decision uses the `dedup_id`s stored at the time of the call:
    /// `first` leaves its own group and joins the live group of `second`, or
    /// `second` joins the live group of `first`, or a new group is created.
    /// Both records are stamped with the group id and `update_needed = false`.
    fn link_duplicates(&self, first: &str, second: &str) -> Result<GroupLink>;

    fn list_record_ids(&self, filter: RecordFilter) -> Result<Vec<String>>;

    fn list_groups(&self, include_deleted: bool) -> Result<Vec<DedupGroup>>;

    fn stats(&self) -> Result<StoreStats>;
}
