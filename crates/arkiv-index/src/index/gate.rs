//! Concurrency gate
//!
//! Tracks which threads are inside the index so the maintenance thread can
//! yield to latency-sensitive work. The tracked set is a multiset keyed by
//! thread id: re-entry from the same thread is permitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, RwLock};
use std::thread::ThreadId;
use std::time::Duration;

use crate::error::{IndexError, Result};

/// Why a maintenance wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A client signalled the trigger
    Triggered,
    /// The wait ran to its timeout
    TimedOut,
    /// The quit flag is set
    Quit,
}

/// Gate between client threads and the maintenance thread.
pub struct UsageGate {
    used_by: RwLock<HashMap<ThreadId, usize>>,
    trigger: Condvar,
    trigger_generation: Mutex<u64>,
    quit: AtomicBool,
}

impl UsageGate {
    pub fn new() -> Self {
        Self {
            used_by: RwLock::new(HashMap::new()),
            trigger: Condvar::new(),
            trigger_generation: Mutex::new(0),
            quit: AtomicBool::new(false),
        }
    }

    /// Register the current thread as using the index. The guard removes the
    /// registration on drop.
    pub fn enter(&self) -> UsageGuard<'_> {
        let mut used = self.used_by.write().unwrap_or_else(|e| e.into_inner());
        *used.entry(std::thread::current().id()).or_insert(0) += 1;
        UsageGuard { gate: self }
    }

    fn leave(&self) {
        let mut used = self.used_by.write().unwrap_or_else(|e| e.into_inner());
        let thread_id = std::thread::current().id();
        if let Some(count) = used.get_mut(&thread_id) {
            *count -= 1;
            if *count == 0 {
                used.remove(&thread_id);
            }
        }
    }

    /// True when any thread other than the caller is inside the index.
    pub fn is_in_use(&self) -> bool {
        let used = self.used_by.read().unwrap_or_else(|e| e.into_inner());
        let current = std::thread::current().id();
        used.iter().any(|(id, count)| *id != current && *count > 0)
    }

    /// Spin-wait until no other thread uses the index or the quit flag is
    /// set.
    pub fn wait_not_in_use(&self, poll: Duration) -> Result<()> {
        loop {
            if self.is_quit() {
                return Err(IndexError::ShuttingDown);
            }
            if !self.is_in_use() {
                return Ok(());
            }
            std::thread::sleep(poll);
        }
    }

    /// Wake the maintenance thread so it releases its transaction before the
    /// caller proceeds.
    pub fn interrupt_maintenance(&self) {
        let mut generation = self
            .trigger_generation
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *generation += 1;
        self.trigger.notify_all();
    }

    /// Maintenance-side wait: returns on trigger, timeout, or quit.
    pub fn wait_trigger(&self, timeout: Duration) -> WakeReason {
        let generation = self
            .trigger_generation
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let start = *generation;
        let (generation, wait_result) = self
            .trigger
            .wait_timeout_while(generation, timeout, |g| {
                *g == start && !self.is_quit()
            })
            .unwrap_or_else(|e| e.into_inner());
        if self.is_quit() {
            WakeReason::Quit
        } else if *generation != start {
            WakeReason::Triggered
        } else if wait_result.timed_out() {
            WakeReason::TimedOut
        } else {
            WakeReason::Triggered
        }
    }

    /// Sleep that ends early on trigger or quit.
    pub fn sleep_interruptable(&self, duration: Duration) {
        let _ = self.wait_trigger(duration);
    }

    /// Set the process-wide quit flag; all waits exit with a shutting-down
    /// status.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.trigger.notify_all();
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

impl Default for UsageGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration token returned by [`UsageGate::enter`].
pub struct UsageGuard<'a> {
    gate: &'a UsageGate,
}

impl Drop for UsageGuard<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}
