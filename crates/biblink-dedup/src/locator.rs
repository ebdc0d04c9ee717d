use std::sync::Arc;

use biblink_core::{KeyField, Record, RecordStore};
use tracing::{debug, trace};

use crate::error::Result;
use crate::matcher::MatchScorer;
use crate::metadata::MetadataRecord;
use crate::throttle::ThrottleCache;

/// Candidates examined per key before the scan of that key is abandoned.
pub const MAX_CANDIDATES: usize = 1000;
/// Lower cap for keys that overflowed before.
pub const MAX_CANDIDATES_FLAGGED: usize = 100;

#[derive(Debug, Default)]
pub struct SearchResult {
    pub matched: Option<Record>,
    /// Candidates that survived the cheap filters.
    pub candidates: usize,
}

/// Finds an existing record that duplicates a given one.
pub struct CandidateLocator {
    store: Arc<dyn RecordStore>,
    scorer: MatchScorer,
    throttle: ThrottleCache,
}

impl CandidateLocator {
    pub fn new(store: Arc<dyn RecordStore>, scorer: MatchScorer) -> Self {
        Self {
            store,
            scorer,
            throttle: ThrottleCache::new(),
        }
    }

    pub fn throttle(&self) -> &ThrottleCache {
        &self.throttle
    }

    /// Walks the record's ISBN, id and title keys in that order and returns
    /// the first candidate the scorer accepts.
    pub fn find_match(&mut self, record: &Record) -> Result<SearchResult> {
        let mut result = SearchResult::default();
        let mut source_meta: Option<Box<dyn MetadataRecord>> = None;

        'search: for field in KeyField::SEARCH_ORDER {
            for key in record.keys(field).iter().filter(|k| !k.is_empty()) {
                let candidates = self.store.find_records_by_key(field, key)?;
                let limit = if self.throttle.is_flagged(field, key) {
                    MAX_CANDIDATES_FLAGGED
                } else {
                    MAX_CANDIDATES
                };
                let mut processed = 0;

                for candidate in candidates {
                    if candidate.deleted || candidate.source_id == record.source_id {
                        continue;
                    }
                    if self.has_stronger_signal(field, record, &candidate) {
                        continue;
                    }
                    result.candidates += 1;
                    if self.source_already_in_group(record, &candidate)? {
                        trace!(candidate = %candidate.id, "already deduplicated with this source");
                        continue;
                    }

                    processed += 1;
                    if processed > limit {
                        debug!(record = %record.id, %field, %key, "too many candidates");
                        self.throttle.flag(field, key);
                        break;
                    }

                    if source_meta.is_none() {
                        let parsed = self.scorer.parser().parse_record(record)?;
                        if parsed.access_restricted() {
                            break 'search;
                        }
                        source_meta = Some(parsed);
                    }
                    if let Some(meta) = source_meta.as_deref()
                        && self.scorer.is_match(record, meta, &candidate)
                    {
                        result.matched = Some(candidate);
                        break 'search;
                    }
                }
            }
        }

        Ok(result)
    }

    /// A shared ISBN or id on a weaker key means the stronger comparison has
    /// already been made and failed.
    fn has_stronger_signal(&self, field: KeyField, record: &Record, candidate: &Record) -> bool {
        match field {
            KeyField::Isbn => false,
            KeyField::Id => !record.isbn_keys.is_disjoint(&candidate.isbn_keys),
            KeyField::Title => {
                !record.isbn_keys.is_disjoint(&candidate.isbn_keys)
                    || !record.id_keys.is_disjoint(&candidate.id_keys)
            }
        }
    }

    /// A source contributes at most one member to a group.
    fn source_already_in_group(&self, record: &Record, candidate: &Record) -> Result<bool> {
        let Some(group_id) = candidate.dedup_id else {
            return Ok(false);
        };
        if record.dedup_id == Some(group_id) {
            return Ok(false);
        }
        let count = self
            .store
            .count_records_in_group_for_source(&group_id, &record.source_id, 1)?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::JsonMetadataParser;
    use biblink_core::Database;

    fn locator() -> CandidateLocator {
        let store = Arc::new(Database::open_in_memory().unwrap());
        CandidateLocator::new(store, MatchScorer::new(Arc::new(JsonMetadataParser::new())))
    }

    fn record(id: &str, isbn: Option<&str>, unique_id: Option<&str>) -> Record {
        let mut record = Record::new(id, id, "Book", "{}");
        record.isbn_keys.extend(isbn.map(str::to_string));
        record.id_keys.extend(unique_id.map(str::to_string));
        record
    }

    #[test]
    fn test_shared_isbn_skips_weaker_keys() {
        let locator = locator();
        let a = record("s1.a", Some("9780306406157"), None);
        let b = record("s2.b", Some("9780306406157"), None);

        assert!(!locator.has_stronger_signal(KeyField::Isbn, &a, &b));
        assert!(locator.has_stronger_signal(KeyField::Id, &a, &b));
        assert!(locator.has_stronger_signal(KeyField::Title, &a, &b));
    }

    #[test]
    fn test_shared_id_skips_title_only() {
        let locator = locator();
        let a = record("s1.a", None, Some("(fi-nb)123"));
        let b = record("s2.b", Some("9780306406157"), Some("(fi-nb)123"));

        assert!(!locator.has_stronger_signal(KeyField::Id, &a, &b));
        assert!(locator.has_stronger_signal(KeyField::Title, &a, &b));
    }

    #[test]
    fn test_record_without_keys_finds_nothing() {
        let mut locator = locator();
        let result = locator.find_match(&record("s1.a", None, None)).unwrap();
        assert!(result.matched.is_none());
        assert_eq!(result.candidates, 0);
        assert!(locator.throttle().is_empty());
    }
}
