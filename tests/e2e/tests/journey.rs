//! Complete workflow: a job backed up twice, queried, re-indexed and torn
//! down, the way the archiver drives the index over a deployment's life.

use arkiv_e2e_tests::harness::{stat, TestIndex};
use arkiv_index::{
    EntryFilter, EntryKind, IndexId, SortOrdering, StorageFilter, StorageSortKey, StorageState,
    StorageStateSet, StorageUpdate,
};

#[test]
fn backup_job_lifecycle() {
    let harness = TestIndex::new();
    let index = &harness.index;

    // --- first run: full backup ---------------------------------------
    let entity1 = index
        .new_entity(
            "7c3e02aa-1f",
            Some("nightly"),
            "fileserver",
            "backup",
            arkiv_index::ArchiveKind::Full,
            10_000,
            true,
        )
        .unwrap();

    let storage1 = harness.storage(entity1, "sftp://vault/backups/full-001.bar");
    index
        .set_storage_state(storage1, StorageState::Create, None, None)
        .unwrap();

    index
        .add_directory_entry(entity1, storage1, "/home", stat(10_000))
        .unwrap();
    index
        .add_file_entry(entity1, storage1, "/home/report.txt", 1_500, stat(10_100), 0, 1_500)
        .unwrap();
    index
        .add_file_entry(entity1, storage1, "/home/notes.md", 300, stat(10_200), 0, 300)
        .unwrap();
    index
        .add_link_entry(entity1, storage1, "/home/latest", "/home/report.txt", stat(10_000))
        .unwrap();
    index
        .add_skipped_entry(entity1, EntryKind::Special, "/home/.gnupg/S.agent")
        .unwrap();

    index
        .update_storage(
            storage1,
            StorageUpdate {
                size: Some(2_048),
                update_newest: true,
                ..Default::default()
            },
        )
        .unwrap();
    index
        .set_storage_state(storage1, StorageState::Ok, Some(10_300), None)
        .unwrap();
    index.unlock_entity(entity1).unwrap();

    let info = index.storage_info(storage1).unwrap().unwrap();
    assert_eq!(info.state, StorageState::Ok);
    assert_eq!(info.total.file_count, 2);
    assert_eq!(info.total.file_size, 1_800);
    assert_eq!(info.total.link_count, 1);
    assert_eq!(info.newest.file_count, 2);

    // --- second run: the report grew ----------------------------------
    let entity2 = index
        .new_entity(
            "7c3e02aa-1f",
            Some("nightly"),
            "fileserver",
            "backup",
            arkiv_index::ArchiveKind::Incremental,
            20_000,
            true,
        )
        .unwrap();
    let storage2 = harness.storage(entity2, "sftp://vault/backups/incr-001.bar");

    index
        .add_file_entry(entity2, storage2, "/home/report.txt", 2_000, stat(20_100), 0, 2_000)
        .unwrap();
    index
        .set_storage_state(storage2, StorageState::Ok, Some(20_300), None)
        .unwrap();
    index.unlock_entity(entity2).unwrap();

    // the newest projection now points at the second run's copy
    let newest = index
        .list_entries(&EntryFilter {
            newest_only: true,
            name_pattern: Some("report".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].stat.time_last_changed, 20_100);
    assert_eq!(newest[0].size, 2_000);

    // job rollup sees both runs
    let uuid = index.find_uuid("7c3e02aa-1f").unwrap();
    let uuid_info = index.uuid_info(uuid).unwrap().unwrap();
    assert_eq!(uuid_info.entity_count, 2);
    assert_eq!(uuid_info.storage_count, 2);

    // --- operator browses ---------------------------------------------
    let by_size = index
        .list_storages(&StorageFilter {
            job_uuid: Some("7c3e02aa-1f".to_string()),
            states: StorageStateSet::EMPTY.with(StorageState::Ok),
            sort: StorageSortKey::Size,
            ordering: SortOrdering::Descending,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_size.len(), 2);
    assert_eq!(by_size[0].storage_id, storage1);

    let mut seen = 0;
    let mut cursor = index.entry_cursor(EntryFilter::default());
    while let Some(entry) = cursor.try_next().unwrap() {
        assert!(!entry.name.is_empty());
        seen += 1;
    }
    assert_eq!(seen, 5);

    // --- a failing check, then retirement of the first run ------------
    index
        .set_storage_state(
            storage1,
            StorageState::Error,
            Some(30_000),
            Some("checksum mismatch in fragment 3"),
        )
        .unwrap();
    let (_, _, message) = index.storage_state(storage1).unwrap().unwrap();
    assert_eq!(message.as_deref(), Some("checksum mismatch in fragment 3"));

    index.purge_storage(storage1).unwrap();

    // first run gone, its entity pruned with it; the job survives
    assert!(index.storage_info(storage1).unwrap().is_none());
    assert!(index.entity_info(entity1).unwrap().unwrap().deleted);
    assert!(!index.entity_info(entity2).unwrap().unwrap().deleted);
    assert_ne!(index.find_uuid("7c3e02aa-1f").unwrap(), IndexId::None);

    // --- last run retires too; the job disappears ---------------------
    index.purge_storage(storage2).unwrap();
    assert_eq!(index.find_uuid("7c3e02aa-1f").unwrap(), IndexId::None);
    assert!(index.list_entries(&EntryFilter::default()).unwrap().is_empty());
}
