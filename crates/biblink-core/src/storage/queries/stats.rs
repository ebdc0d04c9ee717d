use rusqlite::Connection;
use std::sync::MutexGuard;

use crate::error::Result;
use crate::storage::store::StoreStats;

pub struct StoreStatsQuery<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> StoreStatsQuery<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            records: self.count("SELECT COUNT(*) FROM records")?,
            deleted_records: self.count("SELECT COUNT(*) FROM records WHERE deleted = 1")?,
            grouped_records: self.count("SELECT COUNT(*) FROM records WHERE dedup_id IS NOT NULL")?,
            pending_updates: self.count("SELECT COUNT(*) FROM records WHERE update_needed = 1")?,
            groups: self.count("SELECT COUNT(*) FROM dedup_groups WHERE deleted = 0")?,
            deleted_groups: self.count("SELECT COUNT(*) FROM dedup_groups WHERE deleted = 1")?,
        })
    }

    /// Number of live groups holding exactly `size` members.
    pub fn count_groups_of_size(&self, size: usize) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM dedup_groups
             WHERE deleted = 0 AND json_array_length(member_ids) = ?1",
            rusqlite::params![size as i64],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
