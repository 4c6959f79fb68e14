//! Pending request table
//!
//! Each session keeps one entry per Request that is waiting for a Response
//! it does not produce itself (a forwarded call). Entries are bounded in
//! number; every entry is eventually completed, cancelled, or failed when
//! the session closes.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use ng_core::RouteError;

/// Outcome delivered to a pending caller
pub type PendingOutcome = Result<Bytes, RouteError>;

struct Inner {
    waiters: HashMap<u64, oneshot::Sender<PendingOutcome>>,
    closed: bool,
}

/// Pending requests of one session, keyed by request id
pub struct PendingRequests {
    inner: Mutex<Inner>,
    limit: usize,
}

impl PendingRequests {
    /// Create an empty table holding at most `limit` entries
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                waiters: HashMap::new(),
                closed: false,
            }),
            limit,
        }
    }

    /// Register a waiter for request `id`
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<PendingOutcome>, RouteError> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(RouteError::SessionClosed);
        }
        if inner.waiters.contains_key(&id) {
            return Err(RouteError::DuplicateRequest(id));
        }
        if inner.waiters.len() >= self.limit {
            tracing::warn!(
                pending = inner.waiters.len(),
                limit = self.limit,
                "too many pending requests; refusing request {}",
                id
            );
            return Err(RouteError::TooManyPending { limit: self.limit });
        }

        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(id, tx);
        tracing::trace!(pending = inner.waiters.len(), "registered pending request {}", id);
        Ok(rx)
    }

    /// Deliver the outcome for request `id` and remove its entry
    pub fn complete(&self, id: u64, outcome: PendingOutcome) -> Result<(), RouteError> {
        let waiter = self.inner.lock().waiters.remove(&id);

        match waiter {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!("caller for request {} went away before completion", id);
                }
                Ok(())
            }
            None => Err(RouteError::UnmatchedResponse(id)),
        }
    }

    /// Remove the entry for `id` without delivering anything
    pub fn cancel(&self, id: u64) -> bool {
        self.inner.lock().waiters.remove(&id).is_some()
    }

    /// Fail every entry with `error` and refuse new registrations.
    ///
    /// Returns how many entries were failed.
    pub fn close(&self, error: RouteError) -> usize {
        let waiters: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.waiters.drain().collect()
        };

        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Whether `id` is waiting
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().waiters.contains_key(&id)
    }

    /// Number of waiting entries
    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
