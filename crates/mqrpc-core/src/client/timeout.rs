//! Per-request timers and caller-side cancellation.

use super::pending::PendingRequestTable;
use std::time::Duration;
use tracing::debug;

/// Arm the timer of a pending request.
///
/// When it fires, the request is failed with a timeout unless a response or a
/// cancellation removed it first. The timer is attached to the table entry so
/// whichever path resolves the request disarms it.
pub fn arm(table: &PendingRequestTable, correlation_id: &str, timeout: Duration) {
    let timer_table = table.clone();
    let id = correlation_id.to_string();

    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if timer_table.expire(&id) {
            debug!("Request {} timed out after {:?}", id, timeout);
        }
    });

    table.attach_timer(correlation_id, timer.abort_handle());
}

/// Cancels one pending request.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    table: PendingRequestTable,
    correlation_id: String,
}

impl CancelHandle {
    pub(crate) fn new(table: PendingRequestTable, correlation_id: String) -> Self {
        Self {
            table,
            correlation_id,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Fail the request with `Cancelled` if it is still pending.
    ///
    /// This only affects local bookkeeping. A request already sent still runs
    /// on the server and its reply is discarded.
    pub fn cancel(&self) -> bool {
        let cancelled = self.table.cancel(&self.correlation_id);
        if cancelled {
            debug!("Request {} cancelled", self.correlation_id);
        }
        cancelled
    }
}
