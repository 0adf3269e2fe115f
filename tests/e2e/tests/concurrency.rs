//! Concurrent use of a shared index handle.

use std::sync::Arc;
use std::thread;

use arkiv_e2e_tests::harness::{stat, TestIndex};
use arkiv_index::{EntryFilter, IndexError, StorageFilter};

/// Parallel writers on distinct names all land; totals add up.
#[test]
fn parallel_writers_from_threads() {
    let harness = TestIndex::new();
    let entity = harness.entity("job-parallel");
    let storage = harness.storage(entity, "host:/parallel.bar");
    let index = Arc::new(harness.index.clone());

    let mut handles = Vec::new();
    for worker in 0..4 {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                index
                    .add_file_entry(
                        entity,
                        storage,
                        &format!("/w{worker}/f{i}"),
                        10,
                        stat(1_000 + i),
                        0,
                        10,
                    )
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = harness.index.list_entries(&EntryFilter::default()).unwrap();
    assert_eq!(entries.len(), 100);

    let info = harness.index.storage_info(storage).unwrap().unwrap();
    assert_eq!(info.total.file_count, 100);
    assert_eq!(info.total.file_size, 1000);
}

/// Racing writers on the same natural key converge on a single entry.
#[test]
fn racing_writers_same_natural_key() {
    let harness = TestIndex::new();
    let entity = harness.entity("job-race");
    let storage = harness.storage(entity, "host:/race.bar");
    let index = Arc::new(harness.index.clone());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                index
                    .add_file_entry(entity, storage, "/same", 100, stat(7), 0, 100)
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = harness.index.list_entries(&EntryFilter::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        harness
            .index
            .list_entry_fragments(entries[0].entry_id, 0, None)
            .unwrap()
            .len(),
        1
    );
}

/// A reader sees an entry as soon as the writer returned.
#[test]
fn write_then_read_visibility() {
    let harness = TestIndex::new();
    let entity = harness.entity("job-visible");
    let storage = harness.storage(entity, "host:/v.bar");
    let index = harness.index.clone();

    let writer = thread::spawn(move || {
        index
            .add_file_entry(entity, storage, "/seen", 10, stat(1), 0, 10)
            .unwrap();
    });
    writer.join().unwrap();

    let entries = harness.index.list_entries(&EntryFilter::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "/seen");
}

/// Clearing a storage while writers target a sibling leaves the sibling
/// intact.
#[test]
fn clear_races_writers_on_other_storage() {
    let harness = TestIndex::new();
    let entity = harness.entity("job-clear-race");
    let doomed = harness.storage(entity, "host:/doomed.bar");
    let kept = harness.storage(entity, "host:/kept.bar");

    for i in 0..50 {
        harness
            .index
            .add_file_entry(entity, doomed, &format!("/old/{i}"), 10, stat(i), 0, 10)
            .unwrap();
    }

    let writer_index = harness.index.clone();
    let writer = thread::spawn(move || {
        for i in 0..50 {
            writer_index
                .add_file_entry(entity, kept, &format!("/new/{i}"), 20, stat(500 + i), 0, 20)
                .unwrap();
        }
    });

    harness.index.clear_storage(doomed).unwrap();
    writer.join().unwrap();

    let kept_info = harness.index.storage_info(kept).unwrap().unwrap();
    assert_eq!(kept_info.total.file_count, 50);
    assert_eq!(kept_info.total.file_size, 1000);

    let listed = harness
        .index
        .list_storages(&StorageFilter::default())
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "host:/kept.bar");
}

/// The maintenance thread starts with the index and stops with the last
/// handle.
#[test]
fn maintenance_thread_starts_and_stops() {
    use arkiv_index::{DatabaseUri, Index, IndexConfig};

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("maintenance.db");
    let mut config = IndexConfig::new(DatabaseUri::Sqlite(path));
    config.sleep_time_purge = std::time::Duration::from_millis(1);

    let index = Index::open(config).unwrap();
    let clone = index.clone();
    // writes keep working while the maintenance thread is up
    let entity = clone
        .new_entity("job-maint", None, "h", "u", arkiv_index::ArchiveKind::Full, 1, false)
        .unwrap();
    assert!(clone.entity_info(entity).unwrap().is_some());
    drop(clone);
    // last handle joins the thread
    drop(index);
}

/// The maintenance cycle physically purges soft-deleted storages.
#[test]
fn maintenance_cycle_purges_soft_deleted_storages() {
    use arkiv_index::{DatabaseUri, Index, IndexConfig};
    use std::time::{Duration, Instant};

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("cycle.db");
    let mut config = IndexConfig::new(DatabaseUri::Sqlite(path));
    config.sleep_time_purge = Duration::from_millis(1);
    config.time_index_cleanup = Duration::from_millis(50);
    let index = Index::open(config).unwrap();

    let entity = index
        .new_entity("job-cycle", None, "h", "u", arkiv_index::ArchiveKind::Full, 1, false)
        .unwrap();
    let storage = index
        .new_storage(arkiv_index::NewStorage {
            entity,
            name: "host:/cycle.bar".to_string(),
            state: arkiv_index::StorageState::Ok,
            ..Default::default()
        })
        .unwrap();
    index
        .add_file_entry(entity, storage, "/f", 10, stat(1), 0, 10)
        .unwrap();

    index.clear_storage(storage).unwrap();
    assert!(index.has_deleted_storages().unwrap());

    // the cycle fires once the index goes idle; the purge prunes the empty
    // entity and uuid transitively
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        std::thread::sleep(Duration::from_millis(100));
        let purged = !index.has_deleted_storages().unwrap()
            && index.find_uuid("job-cycle").unwrap() == arkiv_index::IndexId::None;
        if purged {
            break;
        }
        assert!(Instant::now() < deadline, "maintenance cycle never purged");
    }
    drop(index);
}

/// After shutdown every operation returns the shutting-down error.
#[test]
fn operations_fail_after_close() {
    let harness = TestIndex::new();
    let entity = harness.entity("job-close");
    let index = harness.index.clone();

    harness.index.clone().close();

    let result = index.entity_info(entity);
    assert!(matches!(result, Err(IndexError::ShuttingDown)));
}
