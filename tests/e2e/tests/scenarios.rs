//! End-to-end scenarios across the index write and purge surfaces.

use arkiv_e2e_tests::harness::{stat, TestIndex};
use arkiv_index::{EntryFilter, EntryKind, EntryKindSet, EntryPayload, IndexId, SortOrdering};

/// One file split across two storages: one entry, two fragments, exact
/// per-storage and per-entity totals.
#[test]
fn two_fragment_file() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-split");
    let s1 = harness.storage(entity, "host:/backup/part1.bar");
    let s2 = harness.storage(entity, "host:/backup/part2.bar");

    let first = index
        .add_file_entry(entity, s1, "/data/blob", 1000, stat(500), 0, 600)
        .unwrap();
    let second = index
        .add_file_entry(entity, s2, "/data/blob", 1000, stat(500), 600, 400)
        .unwrap();
    assert_eq!(first, second, "same natural key resolves to one entry");

    let fragments = index.list_entry_fragments(first, 0, None).unwrap();
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].offset + fragments[0].size, 600);
    assert_eq!(fragments[1].offset + fragments[1].size, 1000);

    let s1_info = index.storage_info(s1).unwrap().unwrap();
    assert_eq!(s1_info.total.file_count, 1);
    assert_eq!(s1_info.total.file_size, 600);

    let s2_info = index.storage_info(s2).unwrap().unwrap();
    assert_eq!(s2_info.total.file_count, 1);
    assert_eq!(s2_info.total.file_size, 400);

    let entity_info = index.entity_info(entity).unwrap().unwrap();
    assert_eq!(entity_info.total.file_count, 1);
    assert_eq!(entity_info.total.file_size, 1000);
}

/// Clearing one of the two storages keeps the entry with the surviving
/// fragment and shrinks the entity totals accordingly.
#[test]
fn clear_reclaims_half() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-clear");
    let s1 = harness.storage(entity, "host:/backup/part1.bar");
    let s2 = harness.storage(entity, "host:/backup/part2.bar");

    let entry = index
        .add_file_entry(entity, s1, "/data/blob", 1000, stat(500), 0, 600)
        .unwrap();
    index
        .add_file_entry(entity, s2, "/data/blob", 1000, stat(500), 600, 400)
        .unwrap();

    index.clear_storage(s1).unwrap();

    let fragments = index.list_entry_fragments(entry, 0, None).unwrap();
    assert_eq!(fragments.len(), 1);
    assert_eq!((fragments[0].offset, fragments[0].size), (600, 400));

    let entity_info = index.entity_info(entity).unwrap().unwrap();
    assert_eq!(entity_info.total.file_count, 1);
    assert_eq!(entity_info.total.file_size, 400);

    assert!(index.is_deleted_storage(s1).unwrap());
    let s1_info = index.storage_info(s1).unwrap();
    // soft-deleted rows are invisible to listings but the row still exists
    assert!(s1_info.is_some());
    assert_eq!(s1_info.unwrap().total.file_size, 0);
}

/// The newest projection follows the highest change time across storages and
/// falls back after a clear.
#[test]
fn newest_across_storages() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-newest");
    let s1 = harness.storage(entity, "host:/backup/old.bar");
    let s2 = harness.storage(entity, "host:/backup/new.bar");

    index
        .add_file_entry(entity, s1, "/a", 10, stat(100), 0, 10)
        .unwrap();
    index
        .add_file_entry(entity, s2, "/a", 20, stat(200), 0, 20)
        .unwrap();

    let newest = index
        .list_entries(&EntryFilter {
            newest_only: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].stat.time_last_changed, 200);
    assert_eq!(newest[0].size, 20);

    index.clear_storage(s2).unwrap();

    let newest = index
        .list_entries(&EntryFilter {
            newest_only: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].stat.time_last_changed, 100);
    assert_eq!(newest[0].size, 10);
}

/// Purging all storages of an archive name keeps the designated survivor and
/// the hierarchy above it.
#[test]
fn purge_all_by_name_keeps_survivor() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-purgeall");
    let s1 = harness.storage(entity, "sftp://host/backups/backup.bar");
    let s2 = harness.storage(entity, "sftp://host/backups/backup.bar");
    let s3 = harness.storage(entity, "sftp://host/backups/backup.bar");

    index
        .add_file_entry(entity, s2, "/kept", 42, stat(10), 0, 42)
        .unwrap();

    index
        .purge_all_storages_by_name("sftp://host/backups", "backup.bar", s2)
        .unwrap();

    assert!(index.storage_info(s1).unwrap().is_none());
    assert!(index.storage_info(s3).unwrap().is_none());
    assert!(index.storage_info(s2).unwrap().is_some());

    let entity_info = index.entity_info(entity).unwrap().unwrap();
    assert!(!entity_info.deleted);
    assert_ne!(index.find_uuid("job-purgeall").unwrap(), IndexId::None);
}

/// A clear interrupted mid-teardown (simulated crash) completes on the next
/// clear call after restart; the final math matches a clean clear.
#[test]
fn interrupted_clear_resumes() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-resume");
    let s1 = harness.storage(entity, "host:/backup/doomed.bar");
    let s2 = harness.storage(entity, "host:/backup/kept.bar");

    for i in 0..40 {
        index
            .add_file_entry(entity, s1, &format!("/f/{i:03}"), 10, stat(100 + i), 0, 10)
            .unwrap();
    }
    index
        .add_file_entry(entity, s2, "/keep", 400, stat(999), 0, 400)
        .unwrap();

    let db_path = harness.path().clone();
    drop_partial_clear_state(&db_path, &harness);

    // restart: clean-up resets the stale state on the soft-deleted row
    let harness = harness.reopen();
    let index = &harness.index;
    assert!(index.is_deleted_storage(s1).unwrap());

    // a subsequent clear completes the teardown
    index.clear_storage(s1).unwrap();

    let remaining = index
        .list_entries(&EntryFilter {
            kinds: EntryKindSet::EMPTY.with(EntryKind::File),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "/keep");

    let entity_info = index.entity_info(entity).unwrap().unwrap();
    assert_eq!(entity_info.total.file_count, 1);
    assert_eq!(entity_info.total.file_size, 400);
}

/// Simulate a crash three batches into a clear: the storage is soft-deleted
/// with a stale state, some fragments are gone, the rest remain.
fn drop_partial_clear_state(path: &std::path::Path, harness: &TestIndex) {
    // the index holds WAL-mode connections; a second process-like connection
    // is fine for injection
    let storage_id = harness
        .index
        .find_storage_by_name("host:/backup/doomed.bar")
        .unwrap()
        .unwrap()
        .storage_id;
    let raw_id = storage_id.database_id().unwrap();

    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute(
        "UPDATE storages SET deletedFlag=1, state=3 WHERE id=?1",
        rusqlite::params![raw_id],
    )
    .unwrap();
    // three batches of eight fragments got deleted before the crash
    conn.execute(
        "DELETE FROM entryFragments WHERE id IN \
         (SELECT id FROM entryFragments WHERE storageId=?1 LIMIT 24)",
        rusqlite::params![raw_id],
    )
    .unwrap();
}

/// Directory rollups follow the ancestry of inserted entries.
#[test]
fn directory_rollup() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-dirs");
    let storage = harness.storage(entity, "host:/backup/tree.bar");

    index
        .add_directory_entry(entity, storage, "/d", stat(1))
        .unwrap();
    index
        .add_file_entry(entity, storage, "/d/f1", 10, stat(2), 0, 10)
        .unwrap();
    index
        .add_file_entry(entity, storage, "/d/e/f2", 5, stat(3), 0, 5)
        .unwrap();

    let dirs = index
        .list_entries(&EntryFilter {
            kinds: EntryKindSet::EMPTY.with(EntryKind::Directory),
            sort: arkiv_index::EntrySortKey::Name,
            ordering: SortOrdering::Ascending,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(dirs.len(), 1);
    match &dirs[0].payload {
        EntryPayload::Directory {
            total_entry_count,
            total_entry_size,
            ..
        } => {
            assert_eq!(*total_entry_count, 2);
            assert_eq!(*total_entry_size, 15);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

/// A storage created without a name gets a unique placeholder and vanishes
/// at the next startup clean-up.
#[test]
fn unnamed_storage_is_collected_at_startup() {
    let harness = TestIndex::new();
    let entity = harness.entity("job-unnamed");
    let unnamed = harness.storage(entity, "");
    let named = harness.storage(entity, "host:/backup/real.bar");

    let info = harness.index.storage_info(unnamed).unwrap().unwrap();
    assert!(!info.name.is_empty(), "placeholder name is assigned");

    let harness = harness.reopen();
    assert!(harness.index.storage_info(unnamed).unwrap().is_none());
    assert!(harness.index.storage_info(named).unwrap().is_some());
}
