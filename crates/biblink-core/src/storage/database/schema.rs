use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 2;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            id             TEXT PRIMARY KEY,
            source_id      TEXT NOT NULL,
            oai_id         TEXT,
            format         TEXT NOT NULL,
            deleted        INTEGER NOT NULL DEFAULT 0,
            dedup_id       TEXT,
            update_needed  INTEGER NOT NULL DEFAULT 0,
            title_keys     TEXT NOT NULL DEFAULT '[]',
            isbn_keys      TEXT NOT NULL DEFAULT '[]',
            id_keys        TEXT NOT NULL DEFAULT '[]',
            host_record_id TEXT,
            linking_id     TEXT,
            payload        TEXT NOT NULL DEFAULT '',
            created        TEXT NOT NULL,
            updated        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS record_keys (
            record_id  TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
            field      TEXT NOT NULL CHECK(field IN ('title_keys', 'isbn_keys', 'id_keys')),
            value      TEXT NOT NULL,
            PRIMARY KEY (record_id, field, value)
        );

        CREATE TABLE IF NOT EXISTS dedup_groups (
            id          TEXT PRIMARY KEY,
            member_ids  TEXT NOT NULL DEFAULT '[]',
            deleted     INTEGER NOT NULL DEFAULT 0,
            changed     TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_record_keys_lookup   ON record_keys(field, value);
        CREATE INDEX IF NOT EXISTS idx_records_dedup_source ON records(dedup_id, source_id);
        CREATE INDEX IF NOT EXISTS idx_records_update       ON records(update_needed);
        CREATE INDEX IF NOT EXISTS idx_dedup_groups_deleted ON dedup_groups(deleted);
        ",
    )?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    create_indexes(conn)?;
    Ok(())
}
