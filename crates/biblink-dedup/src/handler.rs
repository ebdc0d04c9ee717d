use std::sync::Arc;
use std::time::{Duration, Instant};

use biblink_core::{DedupGroup, Record, RecordPatch, RecordStore};
use chrono::Utc;
use tracing::debug;

use crate::components::ComponentReconciler;
use crate::consistency::ConsistencyChecker;
use crate::error::Result;
use crate::groups::GroupManager;
use crate::keys::{clear_candidate_keys, update_candidate_keys};
use crate::locator::CandidateLocator;
use crate::matcher::MatchScorer;
use crate::metadata::MetadataParser;

/// Searches slower than this are logged.
pub const SLOW_SEARCH: Duration = Duration::from_millis(200);

/// Entry point of the dedup engine for one worker.
///
/// A handler owns its throttle cache, so each worker thread should build its
/// own handler over a shared store and parser.
pub struct DedupHandler {
    store: Arc<dyn RecordStore>,
    parser: Arc<dyn MetadataParser>,
    locator: CandidateLocator,
    groups: GroupManager,
    checker: ConsistencyChecker,
}

impl DedupHandler {
    pub fn new(store: Arc<dyn RecordStore>, parser: Arc<dyn MetadataParser>) -> Self {
        let scorer = MatchScorer::new(Arc::clone(&parser));
        let components = ComponentReconciler::new(Arc::clone(&store), scorer.clone());
        let groups = GroupManager::new(Arc::clone(&store)).with_components(components);
        let checker = ConsistencyChecker::new(Arc::clone(&store), groups.clone());
        let locator = CandidateLocator::new(Arc::clone(&store), scorer);

        Self {
            store,
            parser,
            locator,
            groups,
            checker,
        }
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    /// Finds a duplicate for `record` and groups the two.
    ///
    /// Without a match the record leaves its current group, if any. Returns
    /// whether a duplicate was found.
    pub fn deduplicate(&mut self, record: &mut Record) -> Result<bool> {
        let started = Instant::now();
        let search = self.locator.find_match(record)?;
        let elapsed = started.elapsed();
        if elapsed > SLOW_SEARCH {
            debug!(
                record = %record.id,
                candidates = search.candidates,
                matched = search.matched.is_some(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow candidate search"
            );
        }

        if let Some(mut matched) = search.matched {
            self.groups.mark_duplicate(record, &mut matched)?;
            return Ok(true);
        }

        if record.dedup_id.is_some() || record.update_needed {
            let previous = record.dedup_id;
            if let Some(group_id) = previous {
                self.groups.remove_from_group(&group_id, &record.id)?;
            }
            // Only detach the record if nobody linked it since it was read.
            let patch = RecordPatch::new()
                .unset_dedup_id()
                .update_needed(false)
                .touch()
                .if_dedup_id(previous);
            let ids = std::slice::from_ref(&record.id);
            if self.store.update_record_fields(ids, &patch, false)? > 0 {
                record.dedup_id = None;
                record.update_needed = false;
                record.updated = Utc::now();
            } else {
                debug!(record = %record.id, "record was regrouped concurrently, keeping its group");
            }
        }
        Ok(false)
    }

    /// Parses the record payload and refreshes its candidate keys in place.
    ///
    /// A payload that no longer parses leaves the record without keys, so a
    /// stale key set cannot keep matching it. The error is still returned.
    pub fn update_candidate_keys(&self, record: &mut Record) -> Result<bool> {
        match self.parser.parse_record(record) {
            Ok(metadata) => Ok(update_candidate_keys(record, metadata.as_ref())),
            Err(e) => {
                clear_candidate_keys(record);
                Err(e)
            }
        }
    }

    pub fn check_group(&self, group: &DedupGroup) -> Result<Vec<String>> {
        self.checker.check_group(group)
    }

    pub fn check_all_groups(&self) -> Result<Vec<String>> {
        self.checker.check_all_groups()
    }
}
