//! Interruptable operations
//!
//! A body performing many small writes inside one logical unit must
//! periodically yield the engine lock so client threads cannot starve. The
//! wrapper commits the open transaction at each declared yield point, sleeps
//! while clients proceed, then reopens a fresh transaction. Any error aborts
//! the body; remaining batches are picked up by a later prune cycle, which is
//! safe because every purge stage is idempotent.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::db::{Database, DatabaseError, LockKind};
use crate::error::{IndexError, Result};

use super::gate::UsageGate;

/// Acquire a connection mutex, mapping poisoning to a database error.
pub(crate) fn lock_db(mutex: &Mutex<Database>) -> Result<MutexGuard<'_, Database>> {
    mutex
        .lock()
        .map_err(|_| IndexError::Database(DatabaseError::Other("connection lock poisoned".into())))
}

/// A transaction that can be broken and restarted at yield points.
pub(crate) struct InterruptableOp<'a> {
    db_mutex: &'a Mutex<Database>,
    gate: &'a UsageGate,
    guard: Option<MutexGuard<'a, Database>>,
    lock: LockKind,
    poll: Duration,
}

impl<'a> InterruptableOp<'a> {
    /// Open the first transaction.
    pub fn begin(
        db_mutex: &'a Mutex<Database>,
        gate: &'a UsageGate,
        lock: LockKind,
        poll: Duration,
    ) -> Result<Self> {
        if gate.is_quit() {
            return Err(IndexError::ShuttingDown);
        }
        let mut guard = lock_db(db_mutex)?;
        guard.begin(lock)?;
        Ok(Self {
            db_mutex,
            gate,
            guard: Some(guard),
            lock,
            poll,
        })
    }

    /// The connection of the currently open transaction.
    pub fn db(&mut self) -> &mut Database {
        self.guard
            .as_mut()
            .expect("interruptable operation has an open transaction")
    }

    /// Commit, release the connection while clients proceed, then reopen.
    pub fn interrupt(&mut self) -> Result<()> {
        if let Some(mut guard) = self.guard.take() {
            guard.commit()?;
            drop(guard);
        }
        self.gate.sleep_interruptable(self.poll);
        if self.gate.is_quit() {
            return Err(IndexError::ShuttingDown);
        }
        let mut guard = lock_db(self.db_mutex)?;
        guard.begin(self.lock)?;
        self.guard = Some(guard);
        Ok(())
    }

    /// Yield only when another thread is waiting for the index or shutdown
    /// was requested.
    pub fn yield_point(&mut self) -> Result<()> {
        if self.gate.is_quit() {
            return Err(IndexError::ShuttingDown);
        }
        if self.gate.is_in_use() {
            self.interrupt()?;
        }
        Ok(())
    }

    /// Commit the final transaction.
    pub fn commit(mut self) -> Result<()> {
        if let Some(mut guard) = self.guard.take() {
            guard.commit()?;
        }
        Ok(())
    }
}

impl Drop for InterruptableOp<'_> {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            if guard.in_transaction() {
                if let Err(e) = guard.rollback() {
                    tracing::error!(error = %e, "interruptable rollback failed");
                }
            }
        }
    }
}
