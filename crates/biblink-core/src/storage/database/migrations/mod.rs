mod v1_initial;
mod v2_component_parts;

use chrono::Utc;
use rusqlite::Connection;

use crate::error::{BiblinkError, Result};

pub trait Migration {
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up(&self, conn: &Connection) -> Result<()>;
}

fn record_migration(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn has_migrations_table(conn: &Connection) -> Result<bool> {
    let has_table = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'")?
        .exists([])?;
    Ok(has_table)
}

fn is_migration_applied(conn: &Connection, version: u32) -> Result<bool> {
    if !has_migrations_table(conn)? {
        return Ok(false);
    }

    let applied = conn
        .prepare("SELECT 1 FROM schema_migrations WHERE version = ?1")?
        .exists(rusqlite::params![version])?;
    Ok(applied)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let migrations: Vec<Box<dyn Migration>> = vec![
        Box::new(v1_initial::V1Initial),
        Box::new(v2_component_parts::V2ComponentParts),
    ];

    for migration in migrations {
        if !is_migration_applied(conn, migration.version())? {
            migration.up(conn).map_err(|e| BiblinkError::Migration {
                version: migration.version(),
                message: format!("{} failed: {e}", migration.description()),
            })?;
            record_migration(conn, migration.version())?;
        }
    }

    Ok(())
}

pub fn get_applied_versions(conn: &Connection) -> Result<Vec<u32>> {
    if !has_migrations_table(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::schema::SCHEMA_VERSION;

    #[test]
    fn test_migrations_apply_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let versions = get_applied_versions(&conn).unwrap();
        assert_eq!(versions, (1..=SCHEMA_VERSION).collect::<Vec<_>>());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_applied_versions(&conn).unwrap().len(), SCHEMA_VERSION as usize);
    }

    #[test]
    fn test_fresh_connection_has_no_versions() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(get_applied_versions(&conn).unwrap().is_empty());
    }
}
