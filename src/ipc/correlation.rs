//! Correlation table — requests awaiting a response, keyed by correlation id.
//!
//! Each pending request owns a `oneshot` waiter. An entry leaves the table
//! exactly once: on resolution, on deadline, when the caller stops waiting, or
//! when the connection closes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::messages::Payload;
use crate::types::{CorrelationId, Error, Result};

type Waiter = oneshot::Sender<Result<Payload>>;

/// Bookkeeping for one outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    pub sent_at: Instant,
    pub deadline: Instant,
    waiter: Waiter,
}

#[derive(Debug, Default)]
struct TableState {
    pending: HashMap<CorrelationId, PendingRequest>,
    closed: bool,
}

/// Shared handle to one connection's pending requests.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    state: Arc<Mutex<TableState>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id` with deadline `now + timeout`.
    ///
    /// Fails with `ConnectionClosed` once the table has been closed.
    pub fn register(&self, id: CorrelationId, timeout: Duration) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        let sent_at = Instant::now();
        let deadline = sent_at + timeout;

        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        state.pending.insert(
            id.clone(),
            PendingRequest {
                sent_at,
                deadline,
                waiter: tx,
            },
        );
        drop(state);

        Ok(PendingResponse {
            id,
            timeout,
            deadline,
            rx,
            table: self.clone(),
        })
    }

    /// Hand an inbound result to the waiter registered under `id`.
    ///
    /// Returns `false` when no waiter matches (never sent, already timed out,
    /// or already resolved).
    pub fn resolve(&self, id: &CorrelationId, result: Result<Payload>) -> bool {
        let Some(pending) = self.state.lock().pending.remove(id) else {
            return false;
        };
        tracing::trace!(
            "Resolved {} after {:?}",
            id,
            pending.sent_at.elapsed()
        );
        // The caller may have stopped waiting between removal and send.
        let _ = pending.waiter.send(result);
        true
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.state.lock().pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail every remaining waiter with `ConnectionClosed` and refuse new ones.
    ///
    /// Returns the number of waiters failed.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.waiter.send(Err(Error::ConnectionClosed));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn remove(&self, id: &CorrelationId) {
        self.state.lock().pending.remove(id);
    }
}

/// Receiving side of one pending request.
///
/// Dropping it before resolution removes the table entry.
#[derive(Debug)]
pub struct PendingResponse {
    id: CorrelationId,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Result<Payload>>,
    table: CorrelationTable,
}

impl PendingResponse {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, the deadline, or connection teardown.
    pub async fn wait(mut self) -> Result<Payload> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a value: the table went away with the connection.
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                tracing::debug!("Request {} timed out after {:?}", self.id, self.timeout);
                Err(Error::timeout(format!(
                    "no response to {} within {:?}",
                    self.id, self.timeout
                )))
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
