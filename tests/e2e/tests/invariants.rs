//! Property-style checks of the index invariants.

use arkiv_e2e_tests::harness::{stat, TestIndex};
use arkiv_index::{
    EntryFilter, EntryKind, EntryKindSet, IndexId, StorageFilter, StorageUpdate,
};

/// add_entry twice with the same natural key and fragment leaves exactly one
/// entry and one fragment.
#[test]
fn natural_key_insert_is_idempotent() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-idem");
    let storage = harness.storage(entity, "host:/a.bar");

    let first = index
        .add_file_entry(entity, storage, "/f", 100, stat(50), 0, 100)
        .unwrap();
    let second = index
        .add_file_entry(entity, storage, "/f", 100, stat(50), 0, 100)
        .unwrap();
    assert_eq!(first, second);

    assert_eq!(index.list_entries(&EntryFilter::default()).unwrap().len(), 1);
    assert_eq!(index.list_entry_fragments(first, 0, None).unwrap().len(), 1);

    let info = index.storage_info(storage).unwrap().unwrap();
    assert_eq!(info.total.file_count, 1);
    assert_eq!(info.total.file_size, 100);
}

/// Cached storage totals equal the recompute oracle's result after a mix of
/// inserts.
#[test]
fn incremental_totals_match_recompute() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-totals");
    let storage = harness.storage(entity, "host:/a.bar");

    index
        .add_directory_entry(entity, storage, "/d", stat(1))
        .unwrap();
    index
        .add_file_entry(entity, storage, "/d/a", 10, stat(2), 0, 10)
        .unwrap();
    index
        .add_file_entry(entity, storage, "/d/b", 20, stat(3), 0, 20)
        .unwrap();
    index
        .add_link_entry(entity, storage, "/d/l", "/d/a", stat(4))
        .unwrap();
    index
        .add_hardlink_entry(entity, storage, "/d/h", 30, stat(5), 0, 30)
        .unwrap();

    let before = index.storage_info(storage).unwrap().unwrap().total;

    // update_storage with a newest refresh runs the full recompute
    index
        .update_storage(
            storage,
            StorageUpdate {
                update_newest: true,
                ..Default::default()
            },
        )
        .unwrap();

    let after = index.storage_info(storage).unwrap().unwrap().total;
    assert_eq!(before, after);
    assert_eq!(after.file_count, 2);
    assert_eq!(after.file_size, 30);
    assert_eq!(after.directory_count, 1);
    assert_eq!(after.link_count, 1);
    assert_eq!(after.hardlink_count, 1);
    assert_eq!(after.hardlink_size, 30);
    assert_eq!(after.total_entry_count, 5);
    assert_eq!(after.total_entry_size, 60);
}

/// Clearing a storage and reinserting identical entries under a new storage
/// returns the entity aggregates to their prior values.
#[test]
fn clear_and_reinsert_round_trips_aggregates() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-roundtrip");
    let s1 = harness.storage(entity, "host:/gen1.bar");

    index
        .add_file_entry(entity, s1, "/a", 10, stat(1), 0, 10)
        .unwrap();
    index
        .add_file_entry(entity, s1, "/b", 20, stat(2), 0, 20)
        .unwrap();
    index
        .add_directory_entry(entity, s1, "/d", stat(3))
        .unwrap();

    let before = index.entity_info(entity).unwrap().unwrap().total;

    index.clear_storage(s1).unwrap();
    let cleared = index.entity_info(entity).unwrap().unwrap().total;
    assert_eq!(cleared.total_entry_count, 0);
    assert_eq!(cleared.total_entry_size, 0);

    let s2 = harness.storage(entity, "host:/gen2.bar");
    index
        .add_file_entry(entity, s2, "/a", 10, stat(1), 0, 10)
        .unwrap();
    index
        .add_file_entry(entity, s2, "/b", 20, stat(2), 0, 20)
        .unwrap();
    index
        .add_directory_entry(entity, s2, "/d", stat(3))
        .unwrap();

    let after = index.entity_info(entity).unwrap().unwrap().total;
    assert_eq!(before, after);
}

/// After a purge, entries owned only by the purged storage are gone, shared
/// entries keep their remaining fragments, and entity totals shrink by
/// exactly the removed amount.
#[test]
fn purge_removes_exclusive_keeps_shared() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-shared");
    let s1 = harness.storage(entity, "host:/gen1.bar");
    let s2 = harness.storage(entity, "host:/gen2.bar");

    // exclusive to s1
    index
        .add_file_entry(entity, s1, "/only-s1", 10, stat(1), 0, 10)
        .unwrap();
    // shared
    let shared = index
        .add_file_entry(entity, s1, "/shared", 100, stat(2), 0, 60)
        .unwrap();
    index
        .add_file_entry(entity, s2, "/shared", 100, stat(2), 60, 40)
        .unwrap();

    index.purge_storage(s1).unwrap();

    assert!(index.storage_info(s1).unwrap().is_none());
    let entries = index.list_entries(&EntryFilter::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "/shared");
    assert_eq!(index.list_entry_fragments(shared, 0, None).unwrap().len(), 1);

    let total = index.entity_info(entity).unwrap().unwrap().total;
    assert_eq!(total.file_count, 1);
    assert_eq!(total.file_size, 40);
}

/// The newest projection references, per name, the live entry with the
/// greatest change time, ties broken by the larger entry id.
#[test]
fn newest_points_at_greatest_change_time() {
    let harness = TestIndex::new();
    let index = &harness.index;
    // two jobs capture the same path with the same change time
    let entity_a = harness.entity("job-newest-a");
    let entity_b = harness.entity("job-newest-b");
    let sa = harness.storage(entity_a, "host:/a.bar");
    let sb = harness.storage(entity_b, "host:/b.bar");

    index
        .add_file_entry(entity_a, sa, "/x", 1, stat(100), 0, 1)
        .unwrap();
    // same name, same change time, later entry id wins the tie
    let tied = index
        .add_file_entry(entity_b, sb, "/x", 2, stat(100), 0, 2)
        .unwrap();

    let newest = index
        .list_entries(&EntryFilter {
            newest_only: true,
            kinds: EntryKindSet::EMPTY.with(EntryKind::File),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].entry_id, tied);
}

/// Soft-deleted rows are invisible to every listing.
#[test]
fn deleted_rows_are_invisible() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-invisible");
    let storage = harness.storage(entity, "host:/a.bar");
    index
        .add_file_entry(entity, storage, "/f", 10, stat(1), 0, 10)
        .unwrap();

    index.clear_storage(storage).unwrap();

    assert!(index.list_storages(&StorageFilter::default()).unwrap().is_empty());
    assert!(index.list_entries(&EntryFilter::default()).unwrap().is_empty());
    assert!(index.find_storage_by_name("host:/a.bar").unwrap().is_none());
    assert!(index.has_deleted_storages().unwrap());
}

/// A fragment whose offset+size reaches the entry size completes the entry.
#[test]
fn fragments_sum_to_entry_size_when_complete() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-complete");
    let storage = harness.storage(entity, "host:/a.bar");

    let entry = index
        .add_file_entry(entity, storage, "/f", 100, stat(1), 0, 60)
        .unwrap();
    index
        .add_file_entry(entity, storage, "/f", 100, stat(1), 60, 40)
        .unwrap();

    let fragments = index.list_entry_fragments(entry, 0, None).unwrap();
    let total: u64 = fragments.iter().map(|f| f.size).sum();
    let last = fragments.last().unwrap();
    assert_eq!(total, 100);
    assert_eq!(last.offset + last.size, 100);
}

/// Purging the last storage of a job removes the entity and the uuid row.
#[test]
fn hierarchy_prunes_bottom_up() {
    let harness = TestIndex::new();
    let index = &harness.index;
    let entity = harness.entity("job-prune-up");
    let storage = harness.storage(entity, "host:/a.bar");

    index.purge_storage(storage).unwrap();

    assert!(index.entity_info(entity).unwrap().unwrap().deleted);
    assert_eq!(index.find_uuid("job-prune-up").unwrap(), IndexId::None);
    assert!(index.list_uuids(0, None).unwrap().is_empty());
}
