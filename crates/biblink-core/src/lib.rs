pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::{AppConfig, DedupConfig, LoggingConfig, SourceConfig, StoreConfig};
pub use error::{BiblinkError, ExitCode, Result};
pub use models::*;

pub use storage::database::{ConnectionPool, Database, open_database, open_in_memory};
pub use storage::repositories::{
    DedupGroupRepository, RecordRepository, Repository, SqliteDedupGroupRepository,
    SqliteRecordRepository,
};
pub use storage::store::{GroupLink, RecordFilter, RecordPatch, RecordStore, StoreStats};
