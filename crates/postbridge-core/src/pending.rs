//! Pending-call table of the correlation engine.
//!
//! Mints correlation ids for outgoing requests and holds one single-shot
//! completion handle per in-flight request until its response arrives or the
//! channel is torn down.

use crate::config::BridgeConfig;
use crate::protocol::Response;
use crate::{BridgeError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug)]
struct PendingTable {
    next_id: u64,
    waiters: HashMap<u64, oneshot::Sender<Response>>,
    closed: bool,
}

/// Correlation id → completion handle, for one endpoint direction.
///
/// The lock is only ever held for synchronous bookkeeping, never across an
/// await point.
#[derive(Debug)]
pub(crate) struct PendingCalls {
    table: Mutex<PendingTable>,
    max_pending: usize,
    max_id: u64,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::with_limits(BridgeConfig::MAX_PENDING_CALLS, BridgeConfig::MAX_CORRELATION_ID)
    }

    pub(crate) fn with_limits(max_pending: usize, max_id: u64) -> Self {
        Self {
            table: Mutex::new(PendingTable {
                next_id: 1,
                waiters: HashMap::new(),
                closed: false,
            }),
            max_pending,
            max_id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a fresh correlation id and register a waiter for it.
    pub(crate) fn register(&self) -> Result<(u64, oneshot::Receiver<Response>)> {
        let mut table = self.lock();
        if table.closed {
            return Err(BridgeError::ChannelClosed);
        }
        if table.waiters.len() >= self.max_pending {
            warn!(
                "Refusing new call: {} calls already pending",
                table.waiters.len()
            );
            return Err(BridgeError::TooManyPendingCalls {
                limit: self.max_pending,
            });
        }
        if table.next_id > self.max_id {
            return Err(BridgeError::CorrelationIdsExhausted);
        }

        let id = table.next_id;
        table.next_id += 1;
        let (tx, rx) = oneshot::channel();
        table.waiters.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver `response` to the waiter registered under `id`.
    ///
    /// Returns `false` if no call with that id is pending.
    pub(crate) fn settle(&self, id: u64, response: Response) -> bool {
        let waiter = self.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!("Caller for reply {} is no longer waiting", id);
                }
                true
            }
            None => false,
        }
    }

    /// Drop the waiter for `id` without settling it.
    pub(crate) fn forget(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }

    /// Reject every pending call and refuse new ones.
    ///
    /// Returns the number of calls rejected, or `None` if the table was
    /// already closed.
    pub(crate) fn close(&self) -> Option<usize> {
        let mut table = self.lock();
        if table.closed {
            return None;
        }
        table.closed = true;
        let abandoned = table.waiters.len();
        // Dropping the senders wakes every receiver with a closed-channel error.
        table.waiters.clear();
        Some(abandoned)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Removes a call's waiter when the caller stops waiting, whether it got its
/// response or was dropped mid-flight.
pub(crate) struct PendingGuard<'a> {
    pub(crate) calls: &'a PendingCalls,
    pub(crate) id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.calls.forget(self.id);
    }
}
