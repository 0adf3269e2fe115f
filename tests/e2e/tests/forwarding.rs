//! Slave-mode forwarding: every mutation travels to the master as a text
//! command line and is decoded and applied there; reads stay local.

use arkiv_e2e_tests::harness::{stat, TestIndex};
use arkiv_index::{
    EntryFilter, Forwarder, Index, IndexCommand, IndexConfig, IndexId, NewStorage, ResultMap,
    StorageFilter, StorageState,
};

/// Master stand-in: round-trips each command through its wire form, applies
/// it to a real index and answers with the created handles.
struct MockMaster {
    master: Index,
    log: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl Forwarder for MockMaster {
    fn send(&self, command: &IndexCommand) -> arkiv_index::Result<ResultMap> {
        let line = command.encode();
        self.log.lock().unwrap().push(line.clone());
        let decoded = IndexCommand::decode(&line)?;

        let mut result = ResultMap::new();
        match decoded {
            IndexCommand::NewUuid { job_uuid } => {
                let id = self.master.new_uuid(&job_uuid)?;
                result.insert_id("uuidId", id);
            }
            IndexCommand::NewEntity {
                job_uuid,
                schedule_uuid,
                host_name,
                user_name,
                archive_kind,
                created,
                locked,
            } => {
                let id = self.master.new_entity(
                    &job_uuid,
                    schedule_uuid.as_deref(),
                    &host_name,
                    &user_name,
                    archive_kind,
                    created,
                    locked,
                )?;
                result.insert_id("entityId", id);
            }
            IndexCommand::NewStorage(new) => {
                let id = self.master.new_storage(new)?;
                result.insert_id("storageId", id);
            }
            IndexCommand::UpdateStorage { storage, update } => {
                self.master.update_storage(storage, update)?;
            }
            IndexCommand::SetStorageState {
                id,
                state,
                last_checked,
                error_message,
            } => {
                self.master
                    .set_storage_state(id, state, last_checked, error_message.as_deref())?;
            }
            IndexCommand::AddEntry(entry) => {
                let id = self.master.add_entry(*entry)?;
                result.insert_id("entryId", id);
            }
            IndexCommand::AddSkippedEntry { entity, kind, name } => {
                self.master.add_skipped_entry(entity, kind, &name)?;
            }
            IndexCommand::ClearStorage { storage } => {
                self.master.clear_storage(storage)?;
            }
            IndexCommand::PurgeStorage { storage } => {
                self.master.purge_storage(storage)?;
            }
            IndexCommand::PurgeAllStoragesById { keep } => {
                self.master.purge_all_storages_by_id(keep)?;
            }
            IndexCommand::PurgeAllStoragesByName {
                specifier,
                archive_name,
                keep,
            } => {
                self.master
                    .purge_all_storages_by_name(&specifier, &archive_name, keep)?;
            }
        }
        Ok(result)
    }
}

fn open_slave(master: Index, log: &std::sync::Arc<std::sync::Mutex<Vec<String>>>) -> Index {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("slave.db");
    std::mem::forget(dir);
    let mut config = IndexConfig::new(arkiv_index::DatabaseUri::Sqlite(path));
    config.maintenance = false;

    Index::open_slave(
        config,
        Box::new(MockMaster {
            master,
            log: std::sync::Arc::clone(log),
        }),
    )
    .unwrap()
}

#[test]
fn mutations_are_forwarded_to_the_master() {
    let master_harness = TestIndex::new();
    let master = master_harness.index.clone();
    let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let slave = open_slave(master.clone(), &log);

    let entity = slave
        .new_entity(
            "job-fwd",
            None,
            "host",
            "user",
            arkiv_index::ArchiveKind::Full,
            100,
            false,
        )
        .unwrap();
    let storage = slave
        .new_storage(NewStorage {
            entity,
            name: "sftp://vault/fwd-001.bar".to_string(),
            state: StorageState::Create,
            ..Default::default()
        })
        .unwrap();
    let entry = slave
        .add_file_entry(entity, storage, "/fwd/file", 64, stat(7), 0, 64)
        .unwrap();
    slave
        .set_storage_state(storage, StorageState::Ok, Some(200), None)
        .unwrap();

    // the master carries the rows
    assert!(matches!(entry, IndexId::Entry(_, _)));
    let info = master.storage_info(storage).unwrap().unwrap();
    assert_eq!(info.name, "sftp://vault/fwd-001.bar");
    assert_eq!(info.state, StorageState::Ok);
    assert_eq!(master.list_entries(&EntryFilter::default()).unwrap().len(), 1);

    // the slave's own database stayed untouched: reads are local
    assert!(slave.list_storages(&StorageFilter::default()).unwrap().is_empty());

    // every mutation went over the wire as one command line
    let lines = log.lock().unwrap();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("NEW_ENTITY "));
    assert!(lines[1].starts_with("NEW_STORAGE "));
    assert!(lines[2].starts_with("ADD_ENTRY "));
    assert!(lines[3].starts_with("SET_STORAGE_STATE "));
}

#[test]
fn forwarded_purge_tears_down_on_the_master() {
    let master_harness = TestIndex::new();
    let master = master_harness.index.clone();
    let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let slave = open_slave(master.clone(), &log);

    let entity = slave
        .new_entity(
            "job-fwd-purge",
            None,
            "host",
            "user",
            arkiv_index::ArchiveKind::Full,
            100,
            false,
        )
        .unwrap();
    let storage = slave
        .new_storage(NewStorage {
            entity,
            name: "sftp://vault/fwd-002.bar".to_string(),
            state: StorageState::Ok,
            ..Default::default()
        })
        .unwrap();
    slave
        .add_file_entry(entity, storage, "/f", 10, stat(1), 0, 10)
        .unwrap();

    slave.purge_storage(storage).unwrap();

    assert!(master.storage_info(storage).unwrap().is_none());
    assert_eq!(master.find_uuid("job-fwd-purge").unwrap(), IndexId::None);
}
