mod connection;
mod migrations;
mod schema;

pub use connection::ConnectionPool;
pub use migrations::{Migration, get_applied_versions, run_migrations};
pub use schema::{SCHEMA_VERSION, init_schema};

use std::path::Path;

use crate::error::Result;
use crate::models::{DedupGroup, DedupId, KeyField, Record};

use super::queries::StoreStatsQuery;
use super::repositories::{
    DedupGroupRepository, RecordRepository, Repository, SqliteDedupGroupRepository,
    SqliteRecordRepository,
};
use super::store::{GroupLink, RecordFilter, RecordPatch, RecordStore, StoreStats};

pub fn open_database(path: &Path) -> Result<ConnectionPool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pool = ConnectionPool::open(path)?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = ConnectionPool::open_in_memory()?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

/// SQLite-backed record store.
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let pool = open_database(path)?;
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self> {
        let pool = open_in_memory()?;
        Ok(Self { pool })
    }

    pub fn path(&self) -> Option<&str> {
        self.pool.path()
    }

    fn records(&self) -> SqliteRecordRepository<'_> {
        SqliteRecordRepository::new(self.pool.get_connection())
    }

    fn groups(&self) -> SqliteDedupGroupRepository<'_> {
        SqliteDedupGroupRepository::new(self.pool.get_connection())
    }

    pub fn count_groups_of_size(&self, size: usize) -> Result<usize> {
        StoreStatsQuery::new(self.pool.get_connection()).count_groups_of_size(size)
    }
}

impl RecordStore for Database {
    fn get_record(&self, id: &str) -> Result<Option<Record>> {
        self.records().find_by_id(&id.to_string())
    }

    fn save_record(&self, record: &Record) -> Result<()> {
        self.records().save(record)
    }

    fn update_record_fields(
        &self,
        ids: &[String],
        patch: &RecordPatch,
        live_only: bool,
    ) -> Result<usize> {
        self.records().update_fields(ids, patch, live_only)
    }

    fn find_records_by_key(&self, field: KeyField, value: &str) -> Result<Vec<Record>> {
        self.records().find_by_key(field, value)
    }

    fn find_records_by_group(&self, group_id: &DedupId, live_only: bool) -> Result<Vec<Record>> {
        self.records().find_by_group(group_id, live_only)
    }

    fn find_component_parts(&self, source_id: &str, linking_id: &str) -> Result<Vec<Record>> {
        self.records().find_component_parts(source_id, linking_id)
    }

    fn count_records_in_group_for_source(
        &self,
        group_id: &DedupId,
        source_id: &str,
        limit: usize,
    ) -> Result<usize> {
        self.records()
            .count_in_group_for_source(group_id, source_id, limit)
    }

    fn get_group(&self, id: &DedupId) -> Result<Option<DedupGroup>> {
        self.groups().find_by_id(id)
    }

    fn save_group(&self, group: &DedupGroup) -> Result<()> {
        self.groups().save(group)
    }

    fn modify_group(
        &self,
        id: &DedupId,
        f: &mut dyn FnMut(&mut DedupGroup),
    ) -> Result<Option<DedupGroup>> {
        self.groups().modify(id, f)
    }

    fn link_duplicates(&self, first: &str, second: &str) -> Result<GroupLink> {
        self.groups().link(first, second)
    }

    fn list_record_ids(&self, filter: RecordFilter) -> Result<Vec<String>> {
        self.records().list_ids(filter)
    }

    fn list_groups(&self, include_deleted: bool) -> Result<Vec<DedupGroup>> {
        self.groups().list(include_deleted)
    }

    fn stats(&self) -> Result<StoreStats> {
        StoreStatsQuery::new(self.pool.get_connection()).get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(id: &str, source: &str) -> Record {
        Record::new(id, source, "Book", "{}")
    }

    #[test]
    fn test_save_and_get_record() {
        let db = Database::open_in_memory().unwrap();
        let mut rec = record("a.1", "a");
        rec.isbn_keys.insert("9789510123456".to_string());
        rec.title_keys.insert("seitsemanveljesta".to_string());
        db.save_record(&rec).unwrap();

        let loaded = db.get_record("a.1").unwrap().unwrap();
        assert_eq!(loaded.source_id, "a");
        assert_eq!(loaded.isbn_keys, rec.isbn_keys);
        assert_eq!(loaded.title_keys, rec.title_keys);
        assert!(db.get_record("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_record_rewrites_key_index() {
        let db = Database::open_in_memory().unwrap();
        let mut rec = record("a.1", "a");
        rec.isbn_keys.insert("9789510123456".to_string());
        db.save_record(&rec).unwrap();
        assert_eq!(
            db.find_records_by_key(KeyField::Isbn, "9789510123456").unwrap().len(),
            1
        );

        rec.isbn_keys.clear();
        rec.isbn_keys.insert("9780000000002".to_string());
        db.save_record(&rec).unwrap();
        assert!(
            db.find_records_by_key(KeyField::Isbn, "9789510123456")
                .unwrap()
                .is_empty()
        );
        let found = db.find_records_by_key(KeyField::Isbn, "9780000000002").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a.1");
    }

    #[test]
    fn test_find_by_key_includes_deleted_records() {
        let db = Database::open_in_memory().unwrap();
        let mut rec = record("a.1", "a");
        rec.deleted = true;
        rec.id_keys.insert("(FI-MELINDA)123".to_string());
        db.save_record(&rec).unwrap();

        let found = db.find_records_by_key(KeyField::Id, "(FI-MELINDA)123").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].deleted);
    }

    #[test]
    fn test_update_record_fields() {
        let db = Database::open_in_memory().unwrap();
        let mut deleted = record("b.1", "b");
        deleted.deleted = true;
        db.save_record(&record("a.1", "a")).unwrap();
        db.save_record(&deleted).unwrap();

        let group = DedupGroup::new("a.1", "b.1");
        let ids = vec!["a.1".to_string(), "b.1".to_string()];
        let patch = RecordPatch::new().set_dedup_id(group.id).touch();

        assert_eq!(db.update_record_fields(&ids, &patch, true).unwrap(), 1);
        assert_eq!(db.get_record("a.1").unwrap().unwrap().dedup_id, Some(group.id));
        assert_eq!(db.get_record("b.1").unwrap().unwrap().dedup_id, None);

        let clear = RecordPatch::new().unset_dedup_id().update_needed(true);
        assert_eq!(db.update_record_fields(&ids, &clear, false).unwrap(), 2);
        let a = db.get_record("a.1").unwrap().unwrap();
        assert_eq!(a.dedup_id, None);
        assert!(a.update_needed);
    }

    #[test]
    fn test_update_record_fields_checks_expected_group() {
        let db = Database::open_in_memory().unwrap();
        let group = DedupGroup::new("a.1", "b.1");
        let mut a = record("a.1", "a");
        a.dedup_id = Some(group.id);
        db.save_record(&a).unwrap();
        let ids = vec!["a.1".to_string()];

        let stale = RecordPatch::new().if_dedup_id(None).update_needed(true);
        assert_eq!(db.update_record_fields(&ids, &stale, false).unwrap(), 0);
        assert!(!db.get_record("a.1").unwrap().unwrap().update_needed);

        let current = RecordPatch::new().if_dedup_id(Some(group.id)).unset_dedup_id();
        assert_eq!(db.update_record_fields(&ids, &current, false).unwrap(), 1);
        assert_eq!(db.get_record("a.1").unwrap().unwrap().dedup_id, None);

        let ungrouped = RecordPatch::new().if_dedup_id(None).update_needed(true);
        assert_eq!(db.update_record_fields(&ids, &ungrouped, false).unwrap(), 1);
    }

    #[test]
    fn test_link_duplicates_creates_then_extends() {
        let db = Database::open_in_memory().unwrap();
        for (id, source) in [("a.1", "a"), ("b.1", "b"), ("c.1", "c")] {
            let mut rec = record(id, source);
            rec.update_needed = true;
            db.save_record(&rec).unwrap();
        }

        let link = db.link_duplicates("a.1", "b.1").unwrap();
        assert!(link.created);
        assert_eq!(link.left, None);
        let b = db.get_record("b.1").unwrap().unwrap();
        assert_eq!(b.dedup_id, Some(link.group_id));
        assert!(!b.update_needed);

        let joined = db.link_duplicates("c.1", "a.1").unwrap();
        assert_eq!(joined.group_id, link.group_id);
        assert!(!joined.created);
        let group = db.get_group(&link.group_id).unwrap().unwrap();
        assert_eq!(group.member_ids, vec!["a.1", "b.1", "c.1"]);
        assert_eq!(db.get_record("c.1").unwrap().unwrap().dedup_id, Some(link.group_id));
    }

    #[test]
    fn test_link_duplicates_moves_first_record_out_of_its_group() {
        let db = Database::open_in_memory().unwrap();
        for (id, source) in [("a.1", "a"), ("b.1", "b"), ("c.1", "c"), ("d.1", "d")] {
            db.save_record(&record(id, source)).unwrap();
        }
        let old = db.link_duplicates("a.1", "b.1").unwrap().group_id;
        let target = db.link_duplicates("c.1", "d.1").unwrap().group_id;

        let link = db.link_duplicates("a.1", "c.1").unwrap();
        assert_eq!(link.group_id, target);
        assert_eq!(link.left, Some(old));

        let old = db.get_group(&old).unwrap().unwrap();
        assert!(old.deleted);
        assert!(old.is_empty());
        let b = db.get_record("b.1").unwrap().unwrap();
        assert_eq!(b.dedup_id, None);
        assert!(b.update_needed);
        assert_eq!(
            db.get_group(&target).unwrap().unwrap().member_ids,
            vec!["c.1", "d.1", "a.1"]
        );
    }

    #[test]
    fn test_link_duplicates_ignores_deleted_group() {
        let db = Database::open_in_memory().unwrap();
        let mut gone = DedupGroup::new("x.1", "y.1");
        gone.deleted = true;
        gone.member_ids.clear();
        db.save_group(&gone).unwrap();
        let mut b = record("b.1", "b");
        b.dedup_id = Some(gone.id);
        db.save_record(&record("a.1", "a")).unwrap();
        db.save_record(&b).unwrap();

        let link = db.link_duplicates("a.1", "b.1").unwrap();
        assert!(link.created);
        assert_ne!(link.group_id, gone.id);
        assert!(db.get_group(&gone.id).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_links_of_one_pair_share_a_group() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_record(&record("a.1", "a")).unwrap();
        db.save_record(&record("b.1", "b")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    let (first, second) = if n % 2 == 0 { ("a.1", "b.1") } else { ("b.1", "a.1") };
                    db.link_duplicates(first, second).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let groups = db.list_groups(false).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        for id in ["a.1", "b.1"] {
            assert_eq!(db.get_record(id).unwrap().unwrap().dedup_id, Some(groups[0].id));
        }
    }

    #[test]
    fn test_group_queries() {
        let db = Database::open_in_memory().unwrap();
        let group = DedupGroup::new("a.1", "b.1");
        db.save_group(&group).unwrap();

        for (id, source, deleted) in [("a.1", "a", false), ("b.1", "b", false), ("b.2", "b", true)] {
            let mut rec = record(id, source);
            rec.deleted = deleted;
            rec.dedup_id = Some(group.id);
            db.save_record(&rec).unwrap();
        }

        assert_eq!(db.find_records_by_group(&group.id, true).unwrap().len(), 2);
        assert_eq!(db.find_records_by_group(&group.id, false).unwrap().len(), 3);
        assert_eq!(
            db.count_records_in_group_for_source(&group.id, "b", 10).unwrap(),
            2
        );
        assert_eq!(
            db.count_records_in_group_for_source(&group.id, "b", 1).unwrap(),
            1
        );
        assert_eq!(
            db.count_records_in_group_for_source(&group.id, "c", 10).unwrap(),
            0
        );
    }

    #[test]
    fn test_find_component_parts() {
        let db = Database::open_in_memory().unwrap();
        db.save_record(&record("a.host", "a").with_linking_id("123")).unwrap();
        db.save_record(&record("a.p1", "a").with_host("123")).unwrap();
        db.save_record(&record("a.p2", "a").with_host("123")).unwrap();
        db.save_record(&record("b.p1", "b").with_host("123")).unwrap();

        let parts = db.find_component_parts("a", "123").unwrap();
        let ids: Vec<_> = parts.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a.p1", "a.p2"]);
    }

    #[test]
    fn test_modify_group() {
        let db = Database::open_in_memory().unwrap();
        let group = DedupGroup::new("a.1", "b.1");
        db.save_group(&group).unwrap();

        let updated = db
            .modify_group(&group.id, &mut |g| {
                g.add_member("c.1");
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.member_ids, vec!["a.1", "b.1", "c.1"]);
        assert_eq!(db.get_group(&group.id).unwrap().unwrap(), updated);

        let mut called = false;
        let missing = db
            .modify_group(&uuid::Uuid::now_v7(), &mut |_| called = true)
            .unwrap();
        assert!(missing.is_none());
        assert!(!called);
    }

    #[test]
    fn test_concurrent_modify_group_loses_nothing() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let group = DedupGroup::new("a.1", "b.1");
        db.save_group(&group).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let db = Arc::clone(&db);
                let id = group.id;
                std::thread::spawn(move || {
                    db.modify_group(&id, &mut |g| {
                        g.add_member(format!("c.{n}"));
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.get_group(&group.id).unwrap().unwrap().len(), 10);
    }

    #[test]
    fn test_list_record_ids_and_groups() {
        let db = Database::open_in_memory().unwrap();
        let mut pending = record("b.1", "b");
        pending.update_needed = true;
        db.save_record(&record("a.1", "a")).unwrap();
        db.save_record(&pending).unwrap();

        assert_eq!(db.list_record_ids(RecordFilter::All).unwrap(), vec!["a.1", "b.1"]);
        assert_eq!(db.list_record_ids(RecordFilter::UpdateNeeded).unwrap(), vec!["b.1"]);

        let live = DedupGroup::new("a.1", "b.1");
        let mut gone = DedupGroup::new("x.1", "y.1");
        gone.deleted = true;
        gone.member_ids.clear();
        db.save_group(&live).unwrap();
        db.save_group(&gone).unwrap();

        assert_eq!(db.list_groups(false).unwrap().len(), 1);
        assert_eq!(db.list_groups(true).unwrap().len(), 2);
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        let group = DedupGroup::new("a.1", "b.1");
        db.save_group(&group).unwrap();
        let mut a = record("a.1", "a");
        a.dedup_id = Some(group.id);
        let mut b = record("b.1", "b");
        b.dedup_id = Some(group.id);
        b.update_needed = true;
        let mut c = record("c.1", "c");
        c.deleted = true;
        for rec in [&a, &b, &c] {
            db.save_record(rec).unwrap();
        }

        let stats = db.stats().unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.deleted_records, 1);
        assert_eq!(stats.grouped_records, 2);
        assert_eq!(stats.pending_updates, 1);
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.deleted_groups, 0);
        assert_eq!(db.count_groups_of_size(2).unwrap(), 1);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("biblink.db");
        {
            let db = Database::open(&path).unwrap();
            db.save_record(&record("a.1", "a")).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.get_record("a.1").unwrap().is_some());
        assert_eq!(db.path(), Some(path.to_string_lossy().as_ref()));
    }
}
