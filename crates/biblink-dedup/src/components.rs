use std::sync::Arc;

use biblink_core::{Record, RecordStore};
use tracing::{debug, error};

use crate::error::Result;
use crate::groups::GroupManager;
use crate::matcher::MatchScorer;
use crate::normalize::id_sort_key;

/// Aligns the component parts of two grouped host records.
#[derive(Clone)]
pub struct ComponentReconciler {
    store: Arc<dyn RecordStore>,
    scorer: MatchScorer,
}

impl ComponentReconciler {
    pub fn new(store: Arc<dyn RecordStore>, scorer: MatchScorer) -> Self {
        Self { store, scorer }
    }

    /// Marks the host's component parts as duplicates of the parts of the
    /// first other-source group member whose parts all match pairwise.
    /// Returns the number of pairs marked.
    pub fn reconcile(&self, host: &Record, groups: &GroupManager) -> Result<usize> {
        let Some(linking_id) = host.linking_id.as_deref() else {
            error!(record = %host.id, "linking id missing from host record");
            return Ok(0);
        };
        let Some(group_id) = host.dedup_id else {
            return Ok(0);
        };

        let mut parts = self.sorted_parts(&host.source_id, linking_id)?;
        if parts.is_empty() {
            return Ok(0);
        }

        for other in self.store.find_records_by_group(&group_id, true)? {
            if other.source_id == host.source_id {
                continue;
            }
            let Some(other_linking_id) = other.linking_id.as_deref() else {
                continue;
            };
            let mut other_parts = self.sorted_parts(&other.source_id, other_linking_id)?;
            if other_parts.len() != parts.len() || !self.all_match(&parts, &other_parts) {
                debug!(host = %host.id, other = %other.id, "component parts differ");
                continue;
            }

            for (part, other_part) in parts.iter_mut().zip(other_parts.iter_mut()) {
                groups.mark_duplicate(part, other_part)?;
            }
            debug!(host = %host.id, other = %other.id, count = parts.len(), "all component parts match");
            return Ok(parts.len());
        }

        Ok(0)
    }

    fn all_match(&self, parts: &[Record], other_parts: &[Record]) -> bool {
        parts.iter().zip(other_parts).all(|(part, other_part)| {
            match self.scorer.parser().parse_record(part) {
                Ok(meta) => self.scorer.is_match(part, meta.as_ref(), other_part),
                Err(e) => {
                    debug!(record = %part.id, error = %e, "component part could not be parsed");
                    false
                }
            }
        })
    }

    /// Live component parts of one host, ordered by their natural id order.
    pub fn sorted_parts(&self, source_id: &str, linking_id: &str) -> Result<Vec<Record>> {
        let mut parts: Vec<Record> = self
            .store
            .find_component_parts(source_id, linking_id)?
            .into_iter()
            .filter(|part| !part.deleted)
            .collect();
        parts.sort_by_cached_key(|part| (id_sort_key(&part.id).into_owned(), part.id.clone()));
        Ok(parts)
    }
}
