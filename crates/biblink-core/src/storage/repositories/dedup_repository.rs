use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::sync::MutexGuard;

use crate::error::Result;
use crate::models::{DedupGroup, DedupId};
use crate::storage::store::GroupLink;

use super::{Repository, conversion_error, json_column, timestamp_column, uuid_column};

pub trait DedupGroupRepository: Repository<Entity = DedupGroup, Id = DedupId> {
    /// Load-mutate-store under one immediate transaction.
    fn modify(
        &self,
        id: &DedupId,
        f: &mut dyn FnMut(&mut DedupGroup),
    ) -> Result<Option<DedupGroup>>;

    fn list(&self, include_deleted: bool) -> Result<Vec<DedupGroup>>;

    /// Groups two records under one immediate transaction, reading and
    /// stamping their `dedup_id`s inside it.
    fn link(&self, first: &str, second: &str) -> Result<GroupLink>;
}

pub struct SqliteDedupGroupRepository<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> SqliteDedupGroupRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn row_to_group(row: &Row) -> rusqlite::Result<DedupGroup> {
        let raw_id: String = row.get(0)?;
        Ok(DedupGroup {
            id: DedupId::parse_str(&raw_id).map_err(|e| conversion_error(0, e))?,
            member_ids: json_column(row, 1)?,
            deleted: row.get(2)?,
            changed: timestamp_column(row, 3)?,
        })
    }

    fn load(conn: &Connection, id: &DedupId) -> Result<Option<DedupGroup>> {
        let group = conn
            .query_row(
                "SELECT id, member_ids, deleted, changed FROM dedup_groups WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_group,
            )
            .optional()?;
        Ok(group)
    }

    fn store(conn: &Connection, group: &DedupGroup) -> Result<()> {
        let members = serde_json::to_string(&group.member_ids)?;
        conn.execute(
            "INSERT INTO dedup_groups (id, member_ids, deleted, changed)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                member_ids = excluded.member_ids,
                deleted = excluded.deleted,
                changed = excluded.changed",
            params![
                group.id.to_string(),
                members,
                group.deleted,
                group.changed.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// ─── Record links ──────────────────────────────────────────

impl<'a> SqliteDedupGroupRepository<'a> {
    fn record_group(conn: &Connection, record_id: &str) -> Result<Option<DedupId>> {
        let group = conn
            .query_row(
                "SELECT dedup_id FROM records WHERE id = ?1",
                params![record_id],
                |row| uuid_column(row, 0),
            )
            .optional()?;
        Ok(group.flatten())
    }

    /// Adds a member to a live group. Returns false for a missing or deleted group.
    fn join(conn: &Connection, group_id: &DedupId, record_id: &str) -> Result<bool> {
        match Self::load(conn, group_id)? {
            Some(mut group) if !group.deleted => {
                group.add_member(record_id);
                Self::store(conn, &group)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Takes a member out of a group and flags or detaches who is left.
    fn leave(conn: &Connection, group_id: &DedupId, record_id: &str) -> Result<()> {
        let Some(mut group) = Self::load(conn, group_id)? else {
            return Ok(());
        };
        let removal = group.take_member(record_id);
        if !removal.removed {
            return Ok(());
        }
        Self::store(conn, &group)?;

        if let Some(survivor) = removal.survivor {
            conn.execute(
                "UPDATE records SET dedup_id = NULL, update_needed = 1
                 WHERE id = ?1 AND deleted = 0 AND dedup_id = ?2",
                params![survivor, group_id.to_string()],
            )?;
        }
        for member in &removal.remaining {
            conn.execute(
                "UPDATE records SET update_needed = 1 WHERE id = ?1 AND deleted = 0",
                params![member],
            )?;
        }
        Ok(())
    }
}

impl<'a> Repository for SqliteDedupGroupRepository<'a> {
    type Entity = DedupGroup;
    type Id = DedupId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        Self::load(&self.conn, id)
    }

    fn save(&self, group: &Self::Entity) -> Result<()> {
        Self::store(&self.conn, group)
    }
}

impl<'a> DedupGroupRepository for SqliteDedupGroupRepository<'a> {
    fn modify(
        &self,
        id: &DedupId,
        f: &mut dyn FnMut(&mut DedupGroup),
    ) -> Result<Option<DedupGroup>> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let Some(mut group) = Self::load(&tx, id)? else {
            return Ok(None);
        };
        f(&mut group);
        Self::store(&tx, &group)?;
        tx.commit()?;
        Ok(Some(group))
    }

    fn link(&self, first: &str, second: &str) -> Result<GroupLink> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let first_group = Self::record_group(&tx, first)?;
        let second_group = Self::record_group(&tx, second)?;

        let mut left = None;
        let joined = match (first_group, second_group) {
            (old, Some(target)) => {
                if let Some(old) = old
                    && old != target
                {
                    Self::leave(&tx, &old, first)?;
                    left = Some(old);
                }
                Self::join(&tx, &target, first)?.then_some(target)
            }
            (Some(existing), None) => Self::join(&tx, &existing, second)?.then_some(existing),
            (None, None) => None,
        };

        let (group_id, created) = match joined {
            Some(group_id) => (group_id, false),
            None => {
                let group = DedupGroup::new(first, second);
                Self::store(&tx, &group)?;
                (group.id, true)
            }
        };

        tx.execute(
            "UPDATE records SET dedup_id = ?1, update_needed = 0, updated = ?2
             WHERE id IN (?3, ?4)",
            params![group_id.to_string(), Utc::now().to_rfc3339(), first, second],
        )?;
        tx.commit()?;
        Ok(GroupLink {
            group_id,
            created,
            left,
        })
    }

    fn list(&self, include_deleted: bool) -> Result<Vec<DedupGroup>> {
        let sql = if include_deleted {
            "SELECT id, member_ids, deleted, changed FROM dedup_groups ORDER BY id"
        } else {
            "SELECT id, member_ids, deleted, changed FROM dedup_groups WHERE deleted = 0 ORDER BY id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let groups = stmt
            .query_map([], Self::row_to_group)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(groups)
    }
}
