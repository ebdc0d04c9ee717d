use rusqlite::types::Value;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior, params, params_from_iter};
use std::sync::MutexGuard;

use crate::error::Result;
use crate::models::{DedupId, KeyField, Record};
use crate::storage::store::{RecordFilter, RecordPatch};

use super::{Repository, json_column, timestamp_column, uuid_column};

pub trait RecordRepository: Repository<Entity = Record, Id = String> {
    fn find_by_key(&self, field: KeyField, value: &str) -> Result<Vec<Record>>;
    fn find_by_group(&self, group_id: &DedupId, live_only: bool) -> Result<Vec<Record>>;
    fn find_component_parts(&self, source_id: &str, linking_id: &str) -> Result<Vec<Record>>;
    fn count_in_group_for_source(
        &self,
        group_id: &DedupId,
        source_id: &str,
        limit: usize,
    ) -> Result<usize>;
    fn update_fields(&self, ids: &[String], patch: &RecordPatch, live_only: bool) -> Result<usize>;
    fn list_ids(&self, filter: RecordFilter) -> Result<Vec<String>>;
}

const RECORD_COLUMNS: &str = "r.id, r.source_id, r.oai_id, r.format, r.deleted, r.dedup_id,
    r.update_needed, r.title_keys, r.isbn_keys, r.id_keys, r.host_record_id, r.linking_id,
    r.payload, r.created, r.updated";

pub struct SqliteRecordRepository<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> SqliteRecordRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<Record> {
        Ok(Record {
            id: row.get(0)?,
            source_id: row.get(1)?,
            oai_id: row.get(2)?,
            format: row.get(3)?,
            deleted: row.get(4)?,
            dedup_id: uuid_column(row, 5)?,
            update_needed: row.get(6)?,
            title_keys: json_column(row, 7)?,
            isbn_keys: json_column(row, 8)?,
            id_keys: json_column(row, 9)?,
            host_record_id: row.get(10)?,
            linking_id: row.get(11)?,
            payload: row.get(12)?,
            created: timestamp_column(row, 13)?,
            updated: timestamp_column(row, 14)?,
        })
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl<'a> Repository for SqliteRecordRepository<'a> {
    type Entity = Record;
    type Id = String;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ?1");
        Ok(self.query_records(&sql, params![id])?.into_iter().next())
    }

    fn save(&self, record: &Self::Entity) -> Result<()> {
        let title_keys = serde_json::to_string(&record.title_keys)?;
        let isbn_keys = serde_json::to_string(&record.isbn_keys)?;
        let id_keys = serde_json::to_string(&record.id_keys)?;

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO records
                (id, source_id, oai_id, format, deleted, dedup_id, update_needed,
                 title_keys, isbn_keys, id_keys, host_record_id, linking_id,
                 payload, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                oai_id = excluded.oai_id,
                format = excluded.format,
                deleted = excluded.deleted,
                dedup_id = excluded.dedup_id,
                update_needed = excluded.update_needed,
                title_keys = excluded.title_keys,
                isbn_keys = excluded.isbn_keys,
                id_keys = excluded.id_keys,
                host_record_id = excluded.host_record_id,
                linking_id = excluded.linking_id,
                payload = excluded.payload,
                updated = excluded.updated",
            params![
                record.id,
                record.source_id,
                record.oai_id,
                record.format,
                record.deleted,
                record.dedup_id.map(|id| id.to_string()),
                record.update_needed,
                title_keys,
                isbn_keys,
                id_keys,
                record.host_record_id,
                record.linking_id,
                record.payload,
                record.created.to_rfc3339(),
                record.updated.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM record_keys WHERE record_id = ?1", params![record.id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO record_keys (record_id, field, value) VALUES (?1, ?2, ?3)",
            )?;
            for field in KeyField::SEARCH_ORDER {
                for value in record.keys(field) {
                    stmt.execute(params![record.id, field.as_str(), value])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl<'a> RecordRepository for SqliteRecordRepository<'a> {
    fn find_by_key(&self, field: KeyField, value: &str) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM record_keys k
             JOIN records r ON r.id = k.record_id
             WHERE k.field = ?1 AND k.value = ?2
             ORDER BY r.id"
        );
        self.query_records(&sql, params![field.as_str(), value])
    }

    fn find_by_group(&self, group_id: &DedupId, live_only: bool) -> Result<Vec<Record>> {
        let filter = if live_only { "AND r.deleted = 0" } else { "" };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records r
             WHERE r.dedup_id = ?1 {filter}
             ORDER BY r.id"
        );
        self.query_records(&sql, params![group_id.to_string()])
    }

    fn find_component_parts(&self, source_id: &str, linking_id: &str) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records r
             WHERE r.source_id = ?1 AND r.host_record_id = ?2
             ORDER BY r.id"
        );
        self.query_records(&sql, params![source_id, linking_id])
    }

    fn count_in_group_for_source(
        &self,
        group_id: &DedupId,
        source_id: &str,
        limit: usize,
    ) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT 1 FROM records WHERE dedup_id = ?1 AND source_id = ?2 LIMIT ?3
             )",
            params![group_id.to_string(), source_id, limit as i64],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn update_fields(&self, ids: &[String], patch: &RecordPatch, live_only: bool) -> Result<usize> {
        if ids.is_empty() || patch.is_empty() {
            return Ok(0);
        }

        let mut assignments = Vec::with_capacity(3);
        let mut values: Vec<Value> = Vec::with_capacity(4);
        if let Some(dedup_id) = patch.dedup_id {
            assignments.push("dedup_id = ?");
            values.push(dedup_value(dedup_id));
        }
        if let Some(flag) = patch.update_needed {
            assignments.push("update_needed = ?");
            values.push(Value::Integer(i64::from(flag)));
        }
        if patch.touch_updated {
            assignments.push("updated = ?");
            values.push(Value::Text(chrono::Utc::now().to_rfc3339()));
        }

        let mut sql = format!("UPDATE records SET {} WHERE id = ?", assignments.join(", "));
        if live_only {
            sql.push_str(" AND deleted = 0");
        }
        let expected = patch.expected_dedup_id.map(dedup_value);
        if expected.is_some() {
            sql.push_str(" AND dedup_id IS ?");
        }

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for id in ids {
                let row_values = values
                    .iter()
                    .cloned()
                    .chain(std::iter::once(Value::Text(id.clone())))
                    .chain(expected.clone());
                changed += stmt.execute(params_from_iter(row_values))?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn list_ids(&self, filter: RecordFilter) -> Result<Vec<String>> {
        let sql = match filter {
            RecordFilter::All => "SELECT id FROM records ORDER BY id",
            RecordFilter::UpdateNeeded => {
                "SELECT id FROM records WHERE update_needed = 1 ORDER BY id"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn dedup_value(id: Option<DedupId>) -> Value {
    match id {
        Some(id) => Value::Text(id.to_string()),
        None => Value::Null,
    }
}
