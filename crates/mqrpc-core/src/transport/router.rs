//! Server side of the transport.
//!
//! A ROUTER socket and the PULL end of its control pair live on one thread.
//! Received messages go into a bounded inbound queue that the owner of the
//! [`RouterSocket`] drains. Replies go through [`RouterSender`], which can be
//! cloned into handler tasks and never blocks.

use super::{
    check_protocol, into_frame, is_stop, tcp_host, Identity, Inbound, Outbox, TransportContext,
};
use crate::config::{ConnectionConfiguration, Protocol, RpcDefaults};
use crate::error::{Result, RpcError};
use crate::protocol::WireFrame;
use bytes::Bytes;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Bound router: receives messages from any connected dealer.
pub struct RouterSocket {
    inbound: mpsc::Receiver<Inbound>,
    sender: RouterSender,
    local: ConnectionConfiguration,
    thread: Option<JoinHandle<()>>,
}

/// Reply half of a router. Cheap to clone.
#[derive(Clone)]
pub struct RouterSender {
    outbox: Outbox,
}

impl RouterSocket {
    /// Bind to the configured endpoint.
    ///
    /// For TCP with port 0 the OS picks a port; [`RouterSocket::local`] reports it.
    pub async fn bind(
        context: &TransportContext,
        config: &ConnectionConfiguration,
    ) -> Result<Self> {
        check_protocol(config)?;
        let (endpoint, ipv6) = Self::bind_endpoint(config).await?;

        let router = context.socket(zmq::ROUTER)?;
        // Replies queued just before a graceful stop still go out.
        router.set_linger(RpcDefaults::LINGER.as_millis() as i32)?;
        router.set_router_mandatory(true)?;
        router.set_maxmsgsize(RpcDefaults::MAX_MESSAGE_SIZE as i64)?;
        if config.protocol == Protocol::Tcp {
            router.set_tcp_keepalive(1)?;
            router.set_ipv6(ipv6)?;
        }
        router.bind(&endpoint)?;
        let local = Self::bound(&router, config)?;

        let (outbox, control) = context.control_pair("router")?;
        let (inbound_tx, inbound_rx) = mpsc::channel(RpcDefaults::INBOUND_QUEUE_DEPTH);
        let unbind = (local.protocol == Protocol::InProc).then(|| local.endpoint());

        let thread = std::thread::Builder::new()
            .name(format!("mqrpc-router-{}", local.port))
            .spawn(move || {
                if let Err(e) = Self::run(&router, &control, &inbound_tx) {
                    error!("Router socket thread failed: {}", e);
                }
                if let Some(endpoint) = unbind {
                    // Release the inproc name now rather than when the
                    // socket is reaped.
                    let _ = router.unbind(&endpoint);
                }
            })?;

        info!("Router bound to {}", local);

        Ok(Self {
            inbound: inbound_rx,
            sender: RouterSender { outbox },
            local,
            thread: Some(thread),
        })
    }

    /// ZeroMQ endpoint to bind, and whether it needs IPv6 enabled.
    async fn bind_endpoint(config: &ConnectionConfiguration) -> Result<(String, bool)> {
        if config.protocol != Protocol::Tcp {
            return Ok((config.endpoint(), false));
        }
        let port = match config.port {
            0 => "*".to_string(),
            port => port.to_string(),
        };
        if config.host == "*" {
            return Ok((format!("tcp://*:{}", port), false));
        }

        // ZeroMQ binds to interfaces and addresses, not host names.
        let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await?
            .next()
            .ok_or_else(|| RpcError::transport(format!("could not resolve {}", config.host)))?;
        let host = tcp_host(&addr.ip().to_string());
        Ok((format!("tcp://{}:{}", host, port), addr.is_ipv6()))
    }

    /// The configuration actually bound, with an OS-assigned port filled in.
    fn bound(
        router: &zmq::Socket,
        config: &ConnectionConfiguration,
    ) -> Result<ConnectionConfiguration> {
        if config.protocol != Protocol::Tcp || config.port != 0 {
            return Ok(config.clone());
        }
        let bound = router
            .get_last_endpoint()?
            .map_err(|_| RpcError::transport("bound endpoint is not valid UTF-8"))?;
        let port = bound
            .rsplit(':')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| RpcError::transport(format!("cannot read port of {}", bound)))?;
        Ok(config.with_port(port))
    }

    /// Socket thread: move inbound messages to the queue and control
    /// messages to the wire until stopped.
    fn run(
        router: &zmq::Socket,
        control: &zmq::Socket,
        inbound: &mpsc::Sender<Inbound>,
    ) -> Result<()> {
        loop {
            let mut items = [
                router.as_poll_item(zmq::POLLIN),
                control.as_poll_item(zmq::POLLIN),
            ];
            zmq::poll(&mut items, -1)?;
            let (from_peer, from_owner) = (items[0].is_readable(), items[1].is_readable());

            if from_peer {
                loop {
                    let parts = match router.recv_multipart(zmq::DONTWAIT) {
                        Ok(parts) => parts,
                        Err(zmq::Error::EAGAIN) => break,
                        Err(e) => return Err(e.into()),
                    };
                    let Some(message) = Self::inbound(parts) else {
                        continue;
                    };
                    if inbound.blocking_send(message).is_err() {
                        debug!("Router inbound queue closed");
                        return Ok(());
                    }
                }
            }

            if from_owner {
                loop {
                    let parts = match control.recv_multipart(zmq::DONTWAIT) {
                        Ok(parts) => parts,
                        Err(zmq::Error::EAGAIN) => break,
                        Err(e) => return Err(e.into()),
                    };
                    if is_stop(&parts) {
                        return Ok(());
                    }
                    Self::deliver(router, parts);
                }
            }
        }
    }

    fn inbound(mut parts: Vec<Vec<u8>>) -> Option<Inbound> {
        if parts.len() < 2 {
            warn!("Dropping router message without payload");
            return None;
        }
        if parts.len() - 1 > RpcDefaults::MAX_MESSAGE_PARTS {
            warn!(
                "Dropping message with {} parts, maximum is {}",
                parts.len() - 1,
                RpcDefaults::MAX_MESSAGE_PARTS
            );
            return None;
        }
        let identity = Bytes::from(parts.remove(0));
        Some(Inbound {
            identity,
            frame: into_frame(parts),
        })
    }

    /// Put `[identity, parts...]` on the wire.
    ///
    /// A message for an unknown or disconnected identity is dropped.
    fn deliver(router: &zmq::Socket, parts: Vec<Vec<u8>>) {
        match router.send_multipart(parts.iter().map(|p| p.as_slice()), zmq::DONTWAIT) {
            Ok(()) => {}
            Err(zmq::Error::EHOSTUNREACH) => debug!(
                "Dropping message for unknown peer {}",
                String::from_utf8_lossy(&parts[0])
            ),
            Err(e) => warn!(
                "Send to peer {} failed: {}",
                String::from_utf8_lossy(&parts[0]),
                e
            ),
        }
    }

    /// Receive the next message and the identity of the dealer that sent it.
    pub async fn recv(&mut self) -> Option<(Identity, WireFrame)> {
        self.inbound
            .recv()
            .await
            .map(|inbound| (inbound.identity, inbound.frame))
    }

    pub fn sender(&self) -> RouterSender {
        self.sender.clone()
    }

    /// The endpoint actually bound (TCP port resolved).
    pub fn local(&self) -> &ConnectionConfiguration {
        &self.local
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        // Unblocks a socket thread waiting on a full queue.
        self.inbound.close();
        self.sender.outbox.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Router socket thread panicked");
            }
        }
        debug!("Router on {} closed", self.local);
    }
}

impl RouterSender {
    /// Queue a message for the dealer with the given identity.
    pub fn send(&self, identity: &Identity, frame: &WireFrame) -> Result<()> {
        if identity.is_empty() {
            return Err(RpcError::transport("cannot route to an empty identity"));
        }
        let parts = std::iter::once(&identity[..]).chain(frame.parts().iter().map(|p| &p[..]));
        self.outbox.push(parts)
    }
}
