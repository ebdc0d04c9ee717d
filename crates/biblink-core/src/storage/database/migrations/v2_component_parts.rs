use rusqlite::Connection;

use super::Migration;
use crate::error::Result;

pub struct V2ComponentParts;

impl Migration for V2ComponentParts {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Index component parts by source and host"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE INDEX IF NOT EXISTS idx_records_source_host
                ON records(source_id, host_record_id);
            ",
        )?;
        Ok(())
    }
}
