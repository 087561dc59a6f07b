//! Background reader of a client connection.

use super::pending::PendingRequestTable;
use crate::error::RpcError;
use crate::protocol::{ReplyFrame, WireFrame};
use crate::transport::DealerReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Start the response listener of a connection.
///
/// Runs until the connection closes, then fails whatever is still pending.
pub fn spawn(mut receiver: DealerReceiver, table: PendingRequestTable) -> JoinHandle<()> {
    tokio::spawn(async move {
        let endpoint = receiver.endpoint().to_string();
        loop {
            match receiver.recv().await {
                Ok(Some(frame)) => handle_frame(&table, frame),
                Ok(None) => {
                    info!("Connection to {} closed", endpoint);
                    break;
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", endpoint, e);
                    break;
                }
            }
        }

        let failed = table.fail_all(&format!("connection to {} closed", endpoint));
        if failed > 0 {
            warn!("Failed {} pending requests on {}", failed, endpoint);
        }
    })
}

/// Route one reply to its waiting caller.
pub(crate) fn handle_frame(table: &PendingRequestTable, frame: WireFrame) {
    let (correlation_id, result) = match ReplyFrame::decode(&frame) {
        Ok(ReplyFrame::Success {
            correlation_id,
            payload,
        }) => (correlation_id, Ok(payload)),
        Ok(ReplyFrame::Error {
            correlation_id,
            error,
        }) => (correlation_id, Err(RpcError::from(error))),
        Err(e) => match frame.correlation_id() {
            Some(id) => (id.to_string(), Err(e)),
            None => {
                warn!("Dropping malformed reply: {}", e);
                return;
            }
        },
    };

    if !table.resolve(&correlation_id, result) {
        debug!("Discarding reply for {}: no longer pending", correlation_id);
    }
}
