//! In-flight request bookkeeping.
//!
//! The table is shared by the callers of a connection, its response listener
//! and the per-request timers. Every path that finishes a request goes through
//! one private `complete` step, which removes the entry before touching
//! it, so whichever path removes first wins and all others become no-ops.

use crate::contract::CallShape;
use crate::error::{Result, RpcError};
use crate::protocol::{ttl_after, RequestFrame};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Receiving end of a request's completion handle.
pub type ReplyReceiver = oneshot::Receiver<Result<Bytes>>;

/// One outbound call attempt.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub correlation_id: String,
    pub method: String,
    pub args: Bytes,
    pub shape: CallShape,
    pub timeout: Duration,
    pub destination: String,
}

impl RpcRequest {
    pub fn new(
        method: impl Into<String>,
        args: Bytes,
        shape: CallShape,
        timeout: Duration,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            args,
            shape,
            timeout,
            destination: destination.into(),
        }
    }

    /// Wire form, with the TTL computed from the current time.
    pub fn frame(&self) -> RequestFrame {
        RequestFrame {
            correlation_id: self.correlation_id.clone(),
            method: self.method.clone(),
            args: self.args.clone(),
            ttl_millis: ttl_after(self.timeout),
        }
    }
}

struct PendingEntry {
    method: String,
    timeout: Duration,
    completion: oneshot::Sender<Result<Bytes>>,
    timer: Option<AbortHandle>,
}

/// Correlation id -> unresolved request.
#[derive(Clone, Default)]
pub struct PendingRequestTable {
    entries: Arc<DashMap<String, PendingEntry>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiver its caller waits on.
    pub fn insert(&self, request: &RpcRequest) -> ReplyReceiver {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request.correlation_id.clone(),
            PendingEntry {
                method: request.method.clone(),
                timeout: request.timeout,
                completion: tx,
                timer: None,
            },
        );
        rx
    }

    /// Attach the timer of a pending request so a response can disarm it.
    ///
    /// If the request already finished, the timer is aborted right away.
    pub fn attach_timer(&self, correlation_id: &str, timer: AbortHandle) {
        match self.entries.get_mut(correlation_id) {
            Some(mut entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Remove and resolve a request. Returns `false` if it was no longer pending.
    pub fn resolve(&self, correlation_id: &str, result: Result<Bytes>) -> bool {
        self.complete(correlation_id, |_| result)
    }

    /// Fail a request with a timeout naming its method and duration.
    pub fn expire(&self, correlation_id: &str) -> bool {
        self.complete(correlation_id, |entry| {
            Err(RpcError::Timeout {
                method: entry.method.clone(),
                timeout: entry.timeout,
            })
        })
    }

    /// Fail a request as cancelled by its caller.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.complete(correlation_id, |entry| {
            Err(RpcError::Cancelled {
                method: entry.method.clone(),
            })
        })
    }

    /// Drop a request whose send failed; the caller already has the error.
    pub fn discard(&self, correlation_id: &str) {
        if let Some((_, entry)) = self.entries.remove(correlation_id) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    /// Fail every pending request. Returns how many were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| {
                self.complete(id, |entry| {
                    Err(RpcError::transport(format!("{} ({})", reason, entry.method)))
                })
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.entries.contains_key(correlation_id)
    }

    fn complete(
        &self,
        correlation_id: &str,
        outcome: impl FnOnce(&PendingEntry) -> Result<Bytes>,
    ) -> bool {
        let Some((_, entry)) = self.entries.remove(correlation_id) else {
            return false;
        };
        if let Some(timer) = &entry.timer {
            timer.abort();
        }
        let result = outcome(&entry);
        // The caller may have stopped waiting; that is not an error.
        let _ = entry.completion.send(result);
        true
    }
}

impl std::fmt::Debug for PendingRequestTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequestTable")
            .field("pending", &self.entries.len())
            .finish()
    }
}
