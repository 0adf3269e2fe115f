//! Maintenance thread
//!
//! Dedicated background thread that periodically purges soft-deleted
//! storages and prunes empty entities and uuids. It sleeps on the gate
//! trigger so a client entering the index wakes it out of any transaction;
//! between purge batches it pauses so clients keep their latency.

use std::sync::{Arc, Mutex, Weak};

use crate::db::Database;

use super::gate::{UsageGate, WakeReason};
use super::{entities, purge, uuids, IndexInner};

pub(crate) fn run(inner: Weak<IndexInner>, gate: Arc<UsageGate>) {
    tracing::debug!("maintenance thread started");
    let mut connection: Option<Mutex<Database>> = None;

    loop {
        let interval = match inner.upgrade() {
            Some(strong) => strong.config.time_index_cleanup,
            None => break,
        };

        match gate.wait_trigger(interval) {
            WakeReason::Quit => break,
            // a client is active; defer the cycle
            WakeReason::Triggered => continue,
            WakeReason::TimedOut => {}
        }

        let Some(strong) = inner.upgrade() else { break };

        if connection.is_none() {
            match Database::open(&strong.config.uri, strong.config.database_timeout) {
                Ok(db) => connection = Some(Mutex::new(db)),
                Err(e) => {
                    tracing::warn!(error = %e, "maintenance connection failed, retrying next cycle");
                    continue;
                }
            }
        }
        let db_mutex = connection.as_ref().expect("maintenance connection open");

        if let Err(e) = run_cycle(&strong, db_mutex) {
            tracing::warn!(error = %e, "maintenance cycle aborted, remaining work deferred");
        }
    }
    tracing::debug!("maintenance thread stopped");
}

fn run_cycle(inner: &IndexInner, db_mutex: &Mutex<Database>) -> crate::error::Result<()> {
    let purged = purge::purge_deleted_storages(inner, db_mutex)?;

    let (pruned_entities, pruned_uuids) = {
        let mut db = super::interrupt::lock_db(db_mutex)?;
        (
            entities::prune_all_entities(&mut db)?,
            uuids::prune_all_uuids(&mut db)?,
        )
    };

    if purged > 0 || pruned_entities > 0 || pruned_uuids > 0 {
        tracing::info!(
            purged_storages = purged,
            pruned_entities,
            pruned_uuids,
            "maintenance cycle finished"
        );
    }
    Ok(())
}
