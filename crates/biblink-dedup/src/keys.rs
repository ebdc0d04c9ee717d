use std::collections::BTreeSet;

use biblink_core::{KeyField, Record};

use crate::metadata::MetadataRecord;
use crate::normalize::title_key;

/// Recomputes the candidate keys of `record` from its parsed metadata.
///
/// Returns true when any key set changed. Access-restricted records lose all
/// keys so they can never be found as candidates. The caller persists.
pub fn update_candidate_keys(record: &mut Record, metadata: &dyn MetadataRecord) -> bool {
    if metadata.access_restricted() {
        return clear_candidate_keys(record);
    }

    let title: BTreeSet<String> = Some(title_key(metadata.title()))
        .filter(|key| !key.is_empty())
        .into_iter()
        .collect();

    let mut changed = false;
    for (field, keys) in [
        (KeyField::Title, title),
        (KeyField::Isbn, metadata.isbns().clone()),
        (KeyField::Id, metadata.unique_ids().clone()),
    ] {
        let stored = record.keys_mut(field);
        if *stored != keys {
            *stored = keys;
            changed = true;
        }
    }
    changed
}

/// Drops every candidate key. Returns whether the record had any.
pub fn clear_candidate_keys(record: &mut Record) -> bool {
    let had_keys = record.has_any_keys();
    for field in KeyField::SEARCH_ORDER {
        record.keys_mut(field).clear();
    }
    had_keys
}
