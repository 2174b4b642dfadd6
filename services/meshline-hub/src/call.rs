//! Outstanding-call correlation table for one peer connection (spec §4.5).
//!
//! The timeout watchdog itself is not a separate task: a caller waits on its
//! `oneshot::Receiver` wrapped in `tokio::time::timeout`, the same pattern
//! this workspace already uses for session reads. Whichever resolves first —
//! a response arriving or the deadline elapsing — wins outright, which is
//! what makes cancellation race-safe: there is no window where both a
//! response and a timeout can both be "the" outcome.

use meshline_protocol::{RemoteError, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type CallOutcome = Result<Value, RemoteError>;

/// The serial counter every [`CallTable`] in one hub draws from. Shared
/// (not per-connection) so that spec §8 property 4 — "for all serials
/// issued in one process, no two concurrent outstanding calls share a
/// serial" — holds across every peer a hub talks to, not just within one
/// connection (spec §9: the counter is "scoped to the hub instance").
pub type SerialSource = Arc<AtomicU64>;

pub fn new_serial_source() -> SerialSource {
    Arc::new(AtomicU64::new(0))
}

/// Table of outstanding calls keyed by serial, scoped to one connection.
/// The serial counter itself is shared with every other connection of the
/// same hub via [`SerialSource`].
pub struct CallTable {
    serials: SerialSource,
    outstanding: Mutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
}

impl CallTable {
    pub fn new(serials: SerialSource) -> Self {
        Self {
            serials,
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Monotonic, hub-wide serial; a relaxed fetch-add is enough since only
    /// uniqueness, not ordering with other state, is required.
    pub fn next_serial(&self) -> u64 {
        self.serials.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register(&self, serial: u64) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.outstanding.lock().await.insert(serial, tx);
        rx
    }

    /// Delivers a response to its slot. A response for a serial that has
    /// already been discarded (by a fired watchdog) or that never existed on
    /// this table is silently dropped, per spec §8 property 6.
    pub async fn complete(&self, serial: u64, outcome: CallOutcome) {
        if let Some(tx) = self.outstanding.lock().await.remove(&serial) {
            let _ = tx.send(outcome);
        }
    }

    /// Removes a slot without completing it. Called after a timeout elapses
    /// so a response that shows up a moment later has nothing left to land
    /// on.
    pub async fn discard(&self, serial: u64) {
        self.outstanding.lock().await.remove(&serial);
    }

    /// Wakes every outstanding caller on this connection with a terminal
    /// error — used on peer-connection teardown.
    pub async fn fail_all(&self, reason: &str) {
        let mut table = self.outstanding.lock().await;
        for (_, tx) in table.drain() {
            let _ = tx.send(Err(RemoteError::new(reason.to_owned())));
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.outstanding.lock().await.len()
    }
}
