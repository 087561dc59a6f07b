//! Dealer/router transport adapter over ZeroMQ.
//!
//! A dealer connects and sends/receives payload frames; a router binds,
//! receives `(identity, frame)` pairs and replies to a peer by identity. The
//! identity part is added and stripped by the ROUTER socket, so application
//! code only handles the payload parts described in [`crate::protocol`].
//!
//! ZeroMQ sockets are not thread safe, so each one is owned by a dedicated
//! thread. Async code talks to that thread through an inproc PUSH/PULL pair
//! (outbound) and a Tokio channel (inbound).
//!
//! # Protocols
//!
//! - **tcp**: ZMTP over TCP with keep-alive.
//! - **inproc**: in-process; client and server must share a
//!   [`TransportContext`]. A dealer may connect before the router binds.
//! - **udp**: rejected; dealer/router needs a connected, reliable transport.

pub mod dealer;
pub mod router;

pub use dealer::{DealerReceiver, DealerSocket};
pub use router::{RouterSender, RouterSocket};

use crate::config::{ConnectionConfiguration, Protocol, RpcDefaults};
use crate::error::{Result, RpcError};
use crate::protocol::WireFrame;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Identity of a dealer as seen by the router.
pub type Identity = Bytes;

/// Message received by a router.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub identity: Identity,
    pub frame: WireFrame,
}

/// Shared transport state: the ZeroMQ context every socket is created from.
///
/// Cloning is cheap and every clone sees the same `inproc` endpoints.
#[derive(Clone)]
pub struct TransportContext {
    context: Arc<zmq::Context>,
}

impl TransportContext {
    pub fn new() -> Self {
        Self {
            context: Arc::new(zmq::Context::new()),
        }
    }

    /// A socket that discards unsent messages when closed.
    pub(crate) fn socket(&self, kind: zmq::SocketType) -> Result<zmq::Socket> {
        let socket = self.context.socket(kind)?;
        socket.set_linger(0)?;
        Ok(socket)
    }

    /// A connected PUSH/PULL pair on a private inproc endpoint.
    ///
    /// The PULL end goes to the thread that owns a socket; the PUSH end
    /// hands it work from any thread.
    pub(crate) fn control_pair(&self, name: &str) -> Result<(Outbox, zmq::Socket)> {
        let endpoint = format!("inproc://mqrpc-{}-{}", name, uuid::Uuid::new_v4().simple());
        let pull = self.socket(zmq::PULL)?;
        pull.set_rcvhwm(0)?;
        pull.bind(&endpoint)?;

        let push = self.socket(zmq::PUSH)?;
        // A stop pushed right before the outbox is dropped must not be lost.
        push.set_linger(RpcDefaults::LINGER.as_millis() as i32)?;
        push.set_sndhwm(0)?;
        push.connect(&endpoint)?;

        Ok((Outbox(Arc::new(Mutex::new(push))), pull))
    }
}

impl Default for TransportContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext").finish_non_exhaustive()
    }
}

/// Sending end of a control pair. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Outbox(Arc<Mutex<zmq::Socket>>);

impl Outbox {
    /// Queue a message for the owning thread. Never blocks: the pair has no
    /// high-water mark.
    pub fn push<I, T>(&self, parts: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<zmq::Message>,
    {
        let socket = self
            .0
            .lock()
            .map_err(|_| RpcError::transport("control socket lock poisoned"))?;
        socket.send_multipart(parts, zmq::DONTWAIT)?;
        Ok(())
    }

    /// Ask the owning thread to exit.
    pub fn stop(&self) {
        if let Err(e) = self.push([Vec::<u8>::new()]) {
            warn!("Failed to stop socket thread: {}", e);
        }
    }
}

/// A control message made of one empty part.
pub(crate) fn is_stop(parts: &[Vec<u8>]) -> bool {
    matches!(parts, [only] if only.is_empty())
}

pub(crate) fn into_frame(parts: Vec<Vec<u8>>) -> WireFrame {
    WireFrame::new(parts.into_iter().map(Bytes::from).collect())
}

/// Reject protocols the dealer/router pattern cannot run on.
pub(crate) fn check_protocol(config: &ConnectionConfiguration) -> Result<()> {
    match config.protocol {
        Protocol::Tcp | Protocol::InProc => Ok(()),
        Protocol::Udp => Err(RpcError::transport(format!(
            "{} is not supported by the dealer/router transport",
            config
        ))),
    }
}

/// `host` as ZeroMQ expects it in a TCP endpoint (IPv6 literals bracketed).
pub(crate) fn tcp_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}
