use std::sync::Arc;

use biblink_core::{DedupGroup, Record, RecordPatch, RecordStore};
use tracing::{info, warn};

use crate::error::Result;
use crate::groups::GroupManager;

/// Audits dedup groups against the records they reference.
#[derive(Clone)]
pub struct ConsistencyChecker {
    store: Arc<dyn RecordStore>,
    groups: GroupManager,
}

fn inconsistency(group: &DedupGroup, record: Option<&Record>) -> Option<String> {
    let Some(record) = record else {
        return Some("record does not exist".to_string());
    };
    if group.deleted {
        return Some("dedup group deleted".to_string());
    }
    if record.deleted {
        return Some("record deleted".to_string());
    }
    if group.len() < 2 {
        return Some("single record in a dedup group".to_string());
    }
    match record.dedup_id {
        None => Some("record is missing dedup_id".to_string()),
        Some(id) if id != group.id => Some(format!("record linked with dedup group '{id}'")),
        Some(_) => None,
    }
}

impl ConsistencyChecker {
    pub fn new(store: Arc<dyn RecordStore>, groups: GroupManager) -> Self {
        Self { store, groups }
    }

    /// Removes every member of the `group` snapshot that does not belong
    /// there and returns one line per repair.
    pub fn check_group(&self, group: &DedupGroup) -> Result<Vec<String>> {
        let mut repairs = Vec::new();

        for id in &group.member_ids {
            let record = self.store.get_record(id)?;
            let Some(reason) = inconsistency(group, record.as_ref()) else {
                continue;
            };

            self.groups.remove_from_group(&group.id, id)?;
            let seen = record.as_ref().and_then(|record| record.dedup_id);
            let patch = RecordPatch::new()
                .unset_dedup_id()
                .update_needed(true)
                .if_dedup_id(seen);
            self.store
                .update_record_fields(std::slice::from_ref(id), &patch, true)?;

            let line = format!("Removed '{id}' from dedup group '{}' ({reason})", group.id);
            warn!("{line}");
            repairs.push(line);
        }

        Ok(repairs)
    }

    /// Checks every live group, re-reading each one so earlier repairs are seen.
    pub fn check_all_groups(&self) -> Result<Vec<String>> {
        let mut repairs = Vec::new();
        let groups = self.store.list_groups(false)?;
        let total = groups.len();

        for listed in groups {
            let Some(group) = self.store.get_group(&listed.id)? else {
                continue;
            };
            if group.deleted {
                continue;
            }
            repairs.extend(self.check_group(&group)?);
        }

        info!(groups = total, repairs = repairs.len(), "checked dedup groups");
        Ok(repairs)
    }
}
