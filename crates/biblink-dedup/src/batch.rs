use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use biblink_core::{Record, RecordFilter, RecordPatch, RecordStore};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::handler::DedupHandler;
use crate::metadata::MetadataParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub filter: RecordFilter,
    pub workers: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            filter: RecordFilter::UpdateNeeded,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub matched: usize,
    pub removed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    matched: AtomicUsize,
    removed: AtomicUsize,
    failed: AtomicUsize,
}

enum Outcome {
    Matched,
    Unmatched,
    Removed,
    Skipped,
}

/// Deduplicates the selected records on `options.workers` threads.
///
/// `cancel` is checked between records; a record already being processed
/// always completes. Failures of single records are logged and counted.
pub fn run_dedup(
    store: Arc<dyn RecordStore>,
    parser: Arc<dyn MetadataParser>,
    options: BatchOptions,
    cancel: &AtomicBool,
) -> Result<BatchReport> {
    let ids = store.list_record_ids(options.filter)?;
    let workers = options.workers.clamp(1, ids.len().max(1));
    let cursor = AtomicUsize::new(0);
    let counters = Counters::default();
    let started = Instant::now();
    info!(records = ids.len(), workers, "starting deduplication");

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let store = Arc::clone(&store);
            let parser = Arc::clone(&parser);
            let (ids, cursor, counters) = (&ids, &cursor, &counters);

            scope.spawn(move || {
                let mut handler = DedupHandler::new(Arc::clone(&store), parser);
                while !cancel.load(Ordering::Relaxed) {
                    let idx = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(id) = ids.get(idx) else {
                        break;
                    };

                    match process_record(store.as_ref(), &mut handler, id) {
                        Ok(outcome) => {
                            counters.processed.fetch_add(1, Ordering::Relaxed);
                            match outcome {
                                Outcome::Matched => counters.matched.fetch_add(1, Ordering::Relaxed),
                                Outcome::Removed => counters.removed.fetch_add(1, Ordering::Relaxed),
                                Outcome::Unmatched | Outcome::Skipped => 0,
                            };
                        }
                        Err(e) => {
                            error!(worker, record = %id, error = %e, "deduplication failed");
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    let report = BatchReport {
        total: ids.len(),
        processed: counters.processed.into_inner(),
        matched: counters.matched.into_inner(),
        removed: counters.removed.into_inner(),
        failed: counters.failed.into_inner(),
        cancelled: cancel.load(Ordering::Relaxed),
    };
    if report.cancelled {
        warn!(processed = report.processed, total = report.total, "deduplication cancelled");
    }
    info!(
        processed = report.processed,
        matched = report.matched,
        removed = report.removed,
        failed = report.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "deduplication finished"
    );
    Ok(report)
}

fn process_record(
    store: &dyn RecordStore,
    handler: &mut DedupHandler,
    id: &str,
) -> Result<Outcome> {
    let Some(mut record) = store.get_record(id)? else {
        return Ok(Outcome::Skipped);
    };
    if record.deleted {
        return retire_deleted(store, handler, &record);
    }
    if handler.deduplicate(&mut record)? {
        Ok(Outcome::Matched)
    } else {
        Ok(Outcome::Unmatched)
    }
}

/// Deleted records leave their group and stop asking for updates.
fn retire_deleted(
    store: &dyn RecordStore,
    handler: &DedupHandler,
    record: &Record,
) -> Result<Outcome> {
    let mut patch = RecordPatch::new()
        .update_needed(false)
        .if_dedup_id(record.dedup_id);
    let outcome = match record.dedup_id {
        Some(group_id) => {
            handler.groups().remove_from_group(&group_id, &record.id)?;
            patch = patch.unset_dedup_id();
            Outcome::Removed
        }
        None => Outcome::Skipped,
    };
    if record.update_needed || record.dedup_id.is_some() {
        store.update_record_fields(std::slice::from_ref(&record.id), &patch.touch(), false)?;
    }
    Ok(outcome)
}
