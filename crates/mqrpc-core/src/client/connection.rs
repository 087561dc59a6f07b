//! One physical connection shared by every proxy that targets a destination.

use super::listener;
use super::pending::{PendingRequestTable, ReplyReceiver, RpcRequest};
use super::timeout::{self, CancelHandle};
use crate::config::ConnectionConfiguration;
use crate::error::Result;
use crate::transport::{DealerSocket, TransportContext};
use tokio::task::JoinHandle;
use tracing::debug;

/// A dealer socket, its pending table and its response listener.
pub struct Connection {
    socket: DealerSocket,
    table: PendingRequestTable,
    listener: JoinHandle<()>,
}

impl Connection {
    /// Connect under a routing identity derived from `identifier`.
    ///
    /// Every connection gets its own identity, so clients built from one
    /// configuration never shadow each other at the router.
    pub async fn open(
        transport: &TransportContext,
        destination: &ConnectionConfiguration,
        identifier: &str,
    ) -> Result<Self> {
        let identity = format!("{}-{}", identifier, uuid::Uuid::new_v4().simple());
        let (socket, receiver) = DealerSocket::connect(transport, destination, &identity).await?;
        let table = PendingRequestTable::new();
        let listener = listener::spawn(receiver, table.clone());

        Ok(Self {
            socket,
            table,
            listener,
        })
    }

    /// Register a request, arm its timer and send it.
    ///
    /// The entry exists before the frame leaves, so a fast reply always finds it.
    pub fn call(&self, request: &RpcRequest) -> Result<(ReplyReceiver, CancelHandle)> {
        let rx = self.table.insert(request);
        timeout::arm(&self.table, &request.correlation_id, request.timeout);

        if let Err(e) = self.socket.send(&request.frame().encode()) {
            self.table.discard(&request.correlation_id);
            return Err(e);
        }

        let cancel = CancelHandle::new(self.table.clone(), request.correlation_id.clone());
        Ok((rx, cancel))
    }

    /// Send a request without tracking a reply.
    pub fn send(&self, request: &RpcRequest) -> Result<()> {
        self.socket.send(&request.frame().encode())
    }

    /// Whether the listener has stopped, i.e. the peer went away.
    pub fn is_closed(&self) -> bool {
        self.listener.is_finished()
    }

    pub fn pending(&self) -> usize {
        self.table.len()
    }

    pub fn endpoint(&self) -> &str {
        self.socket.endpoint()
    }

    /// Routing identity announced to the router.
    pub fn identity(&self) -> &[u8] {
        self.socket.identity()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("Closing connection to {}", self.socket.endpoint());
        self.listener.abort();
        self.table.fail_all("client connection closed");
    }
}
