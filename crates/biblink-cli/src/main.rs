use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use biblink_core::{AppConfig, Database, ExitCode, Record, RecordFilter, RecordStore};
use biblink_dedup::{BatchOptions, DedupHandler, JsonMetadataParser, MetadataParser, run_dedup};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "biblink",
    about = "Deduplicates bibliographic records harvested from many sources",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting BIBLINK_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Database file, overriding the configured path.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// More log output; repeat for trace level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import records from a JSON Lines file.
    Import { file: PathBuf },

    /// Recompute candidate keys for every record.
    Keys,

    /// Deduplicate records.
    Dedup {
        /// Process every record, not only those flagged for update.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Verify and repair every dedup group.
    Check,

    /// Show a single record.
    Show { id: String },

    /// Show store statistics.
    Stats,
}

/// One line of an import file. `metadata` becomes the stored payload.
#[derive(Debug, Deserialize)]
struct ImportLine {
    id: String,
    source_id: String,
    format: String,
    #[serde(default)]
    oai_id: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    host_record_id: Option<String>,
    #[serde(default)]
    linking_id: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    // ── Env var overrides ──────────────────────────────────────────────────
    let json_output = cli.json || std::env::var("BIBLINK_JSON").as_deref() == Ok("1");

    let mut config = AppConfig::load()?;
    if let Some(path) = &cli.database {
        config.set_database_path(path.clone());
    }
    init_logging(&config, cli.verbose, cli.quiet);

    let db: Arc<Database> = Arc::new(open_db(&config)?);
    let store: Arc<dyn RecordStore> = db.clone();
    let parser: Arc<dyn MetadataParser> =
        Arc::new(JsonMetadataParser::new().with_format_mappings(config.format_mappings()));

    match cli.command {
        // ── Import ─────────────────────────────────────────────────────────
        Commands::Import { file } => {
            let handler = DedupHandler::new(store.clone(), parser);
            let (imported, failed) = import_file(&file, store.as_ref(), &handler)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "imported": imported, "failed": failed },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Imported {imported} records ({failed} failed) in {dur} ms");
            }
        }

        // ── Keys ───────────────────────────────────────────────────────────
        Commands::Keys => {
            let handler = DedupHandler::new(store.clone(), parser);
            let mut changed = 0usize;
            let ids = store.list_record_ids(RecordFilter::All)?;
            for id in &ids {
                let Some(mut record) = store.get_record(id)? else {
                    continue;
                };
                let had_keys = record.has_any_keys();
                match handler.update_candidate_keys(&mut record) {
                    Ok(true) => {
                        record.update_needed = true;
                        store.save_record(&record)?;
                        changed += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(record = %id, error = %e, "could not update keys, dropping them");
                        if had_keys {
                            store.save_record(&record)?;
                            changed += 1;
                        }
                    }
                }
            }
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "records": ids.len(), "changed": changed },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Updated keys of {changed} of {} records", ids.len());
            }
        }

        // ── Dedup ──────────────────────────────────────────────────────────
        Commands::Dedup { all, workers } => {
            let options = BatchOptions {
                filter: if all { RecordFilter::All } else { RecordFilter::UpdateNeeded },
                workers: workers.unwrap_or(config.dedup.workers).max(1),
            };

            let cancel = Arc::new(AtomicBool::new(false));
            let signal_flag = Arc::clone(&cancel);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after records in progress");
                    signal_flag.store(true, Ordering::Relaxed);
                }
            });

            let batch_flag = Arc::clone(&cancel);
            let report = tokio::task::spawn_blocking(move || {
                run_dedup(store, parser, options, &batch_flag)
            })
            .await??;
            let dur = start.elapsed().as_millis();
            let status = if report.cancelled { "cancelled" } else { "ok" };

            if json_output {
                print_json(&serde_json::json!({
                    "status": status,
                    "data": report,
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Deduplication {}:", if report.cancelled { "cancelled" } else { "finished" });
                println!("  Selected:  {}", report.total);
                println!("  Processed: {}", report.processed);
                println!("  Matched:   {}", report.matched);
                println!("  Removed:   {}", report.removed);
                println!("  Failed:    {}", report.failed);
            }
            if report.cancelled {
                std::process::exit(ExitCode::Interrupted as i32);
            }
        }

        // ── Check ──────────────────────────────────────────────────────────
        Commands::Check => {
            let handler = DedupHandler::new(store.clone(), parser);
            let repairs = handler.check_all_groups()?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "repairs": repairs },
                    "meta": { "duration_ms": dur }
                }))?;
            } else if repairs.is_empty() {
                println!("All dedup groups are consistent.");
            } else {
                for line in &repairs {
                    println!("{line}");
                }
            }
        }

        // ── Show ───────────────────────────────────────────────────────────
        Commands::Show { id } => {
            let dur = start.elapsed().as_millis();
            match store.get_record(&id)? {
                Some(record) => {
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":record,"meta":{"duration_ms":dur}}))?;
                    } else {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    }
                }
                None => {
                    if json_output {
                        print_json(&serde_json::json!({"status":"error","error":"not_found","message":format!("Record {id} not found"),"meta":{"duration_ms":dur}}))?;
                    } else {
                        eprintln!("Record {id} not found");
                    }
                    std::process::exit(ExitCode::NotFound as i32);
                }
            }
        }

        // ── Stats ──────────────────────────────────────────────────────────
        Commands::Stats => {
            let stats = store.stats()?;
            let pairs = db.count_groups_of_size(2)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "stats": stats, "two_member_groups": pairs },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Store statistics:");
                println!("  Records:         {}", stats.records);
                println!("  Deleted records: {}", stats.deleted_records);
                println!("  Grouped records: {}", stats.grouped_records);
                println!("  Pending updates: {}", stats.pending_updates);
                println!("  Dedup groups:    {} ({pairs} pairs)", stats.groups);
                println!("  Deleted groups:  {}", stats.deleted_groups);
            }
        }
    }

    Ok(())
}

/// Upserts every line of a JSON Lines file, keeping the grouping of records
/// that already exist, and flags each record for deduplication.
fn import_file(path: &Path, store: &dyn RecordStore, handler: &DedupHandler) -> Result<(usize, usize)> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut imported = 0;
    let mut failed = 0;

    for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ImportLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping malformed line");
                failed += 1;
                continue;
            }
        };

        let mut record = match store.get_record(&parsed.id)? {
            Some(existing) => existing,
            None => Record::new(&parsed.id, &parsed.source_id, &parsed.format, ""),
        };
        record.source_id = parsed.source_id;
        record.format = parsed.format;
        record.oai_id = parsed.oai_id;
        record.deleted = parsed.deleted;
        record.host_record_id = parsed.host_record_id;
        record.linking_id = parsed.linking_id;
        record.payload = parsed.metadata.to_string();
        record.update_needed = true;
        record.updated = chrono::Utc::now();

        if !record.deleted
            && let Err(e) = handler.update_candidate_keys(&mut record)
        {
            // The handler has already dropped any keys of the previous version.
            warn!(record = %record.id, error = %e, "could not extract candidate keys");
        }
        store.save_record(&record)?;
        imported += 1;
    }

    info!(imported, failed, file = %path.display(), "import finished");
    Ok((imported, failed))
}

fn init_logging(config: &AppConfig, verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => config.logging.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = if verbose == 0 && !quiet {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn open_db(config: &AppConfig) -> Result<Database> {
    let db_path = config.database_path();
    Ok(Database::open(&db_path)?)
}
