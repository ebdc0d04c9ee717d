mod dedup_repository;
mod record_repository;

pub use dedup_repository::{DedupGroupRepository, SqliteDedupGroupRepository};
pub use record_repository::{RecordRepository, SqliteRecordRepository};

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use crate::error::Result;

pub trait Repository {
    type Entity;
    type Id;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>>;
    fn save(&self, entity: &Self::Entity) -> Result<()>;
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn json_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Option<uuid::Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| uuid::Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}
