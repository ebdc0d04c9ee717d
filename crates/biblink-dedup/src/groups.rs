use std::sync::Arc;

use biblink_core::{DedupId, Record, RecordPatch, RecordStore, Removal};
use chrono::Utc;
use tracing::{debug, error};

use crate::components::ComponentReconciler;
use crate::error::Result;

/// Owns every mutation of dedup groups.
///
/// Membership changes go through [`RecordStore::modify_group`] and
/// [`RecordStore::link_duplicates`], so concurrent workers touching the same
/// group or record are serialized by the store.
#[derive(Clone)]
pub struct GroupManager {
    store: Arc<dyn RecordStore>,
    components: Option<ComponentReconciler>,
}

impl GroupManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            components: None,
        }
    }

    /// Reconcile component parts whenever two host records are marked duplicates.
    pub fn with_components(mut self, components: ComponentReconciler) -> Self {
        self.components = Some(components);
        self
    }

    /// Removes a member, collapsing the group when one member or none is left.
    ///
    /// A lone survivor is detached and flagged for reprocessing; otherwise all
    /// remaining live members are flagged. Returns whether anything was removed.
    pub fn remove_from_group(&self, group_id: &DedupId, record_id: &str) -> Result<bool> {
        let mut removal = Removal::default();
        let updated = self.store.modify_group(group_id, &mut |group| {
            removal = group.take_member(record_id);
        })?;

        if updated.is_none() {
            error!(group = %group_id, record = record_id, "dangling reference to dedup group");
            return Ok(false);
        }
        if !removal.removed {
            return Ok(false);
        }

        let collapsed = removal.remaining.is_empty();
        if let Some(survivor) = removal.survivor {
            // The survivor may have been linked elsewhere in the meantime.
            let patch = RecordPatch::new()
                .unset_dedup_id()
                .update_needed(true)
                .if_dedup_id(Some(*group_id));
            self.store.update_record_fields(&[survivor], &patch, true)?;
        } else if !collapsed {
            let patch = RecordPatch::new().update_needed(true);
            self.store
                .update_record_fields(&removal.remaining, &patch, true)?;
        }
        debug!(group = %group_id, record = record_id, collapsed, "removed record from dedup group");
        Ok(true)
    }

    /// Puts two matched records into the same group.
    ///
    /// `rec1` is the record being deduplicated and `rec2` the match found for
    /// it. Group membership is decided from the stored records, not from the
    /// in-memory copies, which may be stale. Both copies are stamped with the
    /// resulting group id before component parts of `rec1` are reconciled.
    pub fn mark_duplicate(&self, rec1: &mut Record, rec2: &mut Record) -> Result<DedupId> {
        let link = self.store.link_duplicates(&rec1.id, &rec2.id)?;
        if let Some(left) = link.left {
            debug!(record = %rec1.id, group = %left, "moved record out of its dedup group");
        }
        if link.created {
            debug!(group = %link.group_id, first = %rec1.id, second = %rec2.id, "created dedup group");
        }

        let now = Utc::now();
        for record in [&mut *rec1, &mut *rec2] {
            record.dedup_id = Some(link.group_id);
            record.update_needed = false;
            record.updated = now;
        }
        debug!(first = %rec1.id, second = %rec2.id, group = %link.group_id, "marked duplicates");

        if !rec1.is_component_part()
            && let Some(components) = &self.components
        {
            let count = components.reconcile(rec1, self)?;
            if count > 0 {
                debug!(host = %rec1.id, count, "deduplicated component parts");
            }
        }

        Ok(link.group_id)
    }
}
