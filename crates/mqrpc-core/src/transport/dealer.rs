//! Client side of the transport.
//!
//! `DealerSocket::connect` returns a send half and a receive half. The send
//! half is shared by every caller on the connection; the receive half is
//! owned by a single reader task. For TCP a socket monitor reports when the
//! peer goes away, and the receive half then ends.

use super::{check_protocol, into_frame, is_stop, tcp_host, Identity, Outbox, TransportContext};
use crate::config::{ConnectionConfiguration, Protocol, RpcDefaults};
use crate::error::{Result, RpcError};
use crate::protocol::WireFrame;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// ZeroMQ limits routing identities to 255 bytes.
const MAX_IDENTITY_LEN: usize = 255;

/// Send half of a dealer connection.
pub struct DealerSocket {
    identity: Identity,
    endpoint: String,
    outbox: Outbox,
}

/// Receive half of a dealer connection.
pub struct DealerReceiver {
    endpoint: String,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
}

/// Sockets owned by a dealer's thread.
struct DealerThread {
    dealer: zmq::Socket,
    control: zmq::Socket,
    monitor: Option<zmq::Socket>,
    inbound: mpsc::UnboundedSender<WireFrame>,
    ready: Option<oneshot::Sender<()>>,
}

impl DealerSocket {
    /// Connect to a router under the given identity.
    ///
    /// A TCP connect resolves once the peer accepted the connection, or fails
    /// after [`RpcDefaults::CONNECT_TIMEOUT`]. An inproc connect resolves at
    /// once, even if nothing is bound yet.
    pub async fn connect(
        context: &TransportContext,
        config: &ConnectionConfiguration,
        identity: &str,
    ) -> Result<(DealerSocket, DealerReceiver)> {
        if identity.is_empty() {
            return Err(RpcError::config("Dealer identity cannot be empty"));
        }
        if identity.len() > MAX_IDENTITY_LEN {
            return Err(RpcError::config(format!(
                "Dealer identity is longer than {} bytes",
                MAX_IDENTITY_LEN
            )));
        }
        check_protocol(config)?;
        let endpoint = config.endpoint();

        let dealer = context.socket(zmq::DEALER)?;
        dealer.set_identity(identity.as_bytes())?;
        dealer.set_maxmsgsize(RpcDefaults::MAX_MESSAGE_SIZE as i64)?;

        let (connect_to, monitor) = match config.protocol {
            Protocol::Tcp => {
                dealer.set_tcp_keepalive(1)?;
                dealer.set_ipv6(config.host.contains(':'))?;
                let monitor = Self::monitor(context, &dealer)?;
                let endpoint = format!("tcp://{}:{}", tcp_host(&config.host), config.port);
                (endpoint, Some(monitor))
            }
            _ => (endpoint.clone(), None),
        };
        dealer.connect(&connect_to)?;

        let (outbox, control) = context.control_pair("dealer")?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let ready = monitor.is_some().then_some(ready_tx);

        let owned = DealerThread {
            dealer,
            control,
            monitor,
            inbound: inbound_tx,
            ready,
        };
        let thread_endpoint = endpoint.clone();
        std::thread::Builder::new()
            .name("mqrpc-dealer".to_string())
            .spawn(move || {
                if let Err(e) = owned.run() {
                    warn!("Dealer socket thread for {} failed: {}", thread_endpoint, e);
                }
            })?;

        let socket = DealerSocket {
            identity: Bytes::copy_from_slice(identity.as_bytes()),
            endpoint: endpoint.clone(),
            outbox,
        };

        if config.protocol == Protocol::Tcp {
            match tokio::time::timeout(RpcDefaults::CONNECT_TIMEOUT, ready_rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(RpcError::transport(format!("connect to {} failed", endpoint)))
                }
                // Dropping `socket` stops the thread.
                Err(_) => {
                    return Err(RpcError::transport(format!(
                        "connect to {} timed out",
                        endpoint
                    )))
                }
            }
        }

        debug!("Dealer connected to {}", endpoint);

        Ok((
            socket,
            DealerReceiver {
                endpoint,
                inbound: inbound_rx,
            },
        ))
    }

    /// PAIR socket receiving connect and disconnect events of `dealer`.
    fn monitor(context: &TransportContext, dealer: &zmq::Socket) -> Result<zmq::Socket> {
        let endpoint = format!("inproc://mqrpc-monitor-{}", uuid::Uuid::new_v4().simple());
        let events =
            zmq::SocketEvent::CONNECTED.to_raw() | zmq::SocketEvent::DISCONNECTED.to_raw();
        dealer.monitor(&endpoint, events as i32)?;

        let monitor = context.socket(zmq::PAIR)?;
        monitor.connect(&endpoint)?;
        Ok(monitor)
    }

    /// Queue one message for sending. Never blocks.
    pub fn send(&self, frame: &WireFrame) -> Result<()> {
        if frame.is_empty() {
            return Err(RpcError::protocol("cannot send an empty message"));
        }
        self.outbox.push(frame.parts().iter().map(|p| &p[..]))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        self.outbox.stop();
    }
}

impl DealerThread {
    /// Socket thread: forward control messages to the wire and replies to
    /// the receive half until stopped or disconnected.
    fn run(mut self) -> Result<()> {
        loop {
            let (from_peer, from_owner, from_monitor) = {
                let mut items = vec![
                    self.dealer.as_poll_item(zmq::POLLIN),
                    self.control.as_poll_item(zmq::POLLIN),
                ];
                if let Some(monitor) = &self.monitor {
                    items.push(monitor.as_poll_item(zmq::POLLIN));
                }
                zmq::poll(&mut items, -1)?;
                (
                    items[0].is_readable(),
                    items[1].is_readable(),
                    items.get(2).is_some_and(|item| item.is_readable()),
                )
            };

            if from_peer && !self.drain()? {
                return Ok(());
            }

            if from_owner {
                loop {
                    let parts = match self.control.recv_multipart(zmq::DONTWAIT) {
                        Ok(parts) => parts,
                        Err(zmq::Error::EAGAIN) => break,
                        Err(e) => return Err(e.into()),
                    };
                    if is_stop(&parts) {
                        return Ok(());
                    }
                    let sent = self
                        .dealer
                        .send_multipart(parts.iter().map(|p| p.as_slice()), zmq::DONTWAIT);
                    if let Err(e) = sent {
                        warn!("Dealer send failed: {}", e);
                    }
                }
            }

            if from_monitor && !self.on_event()? {
                // Replies that arrived before the disconnect still count.
                self.drain()?;
                return Ok(());
            }
        }
    }

    /// Hand every queued reply to the receive half. Returns `false` once
    /// the receive half is gone.
    fn drain(&self) -> Result<bool> {
        loop {
            let parts = match self.dealer.recv_multipart(zmq::DONTWAIT) {
                Ok(parts) => parts,
                Err(zmq::Error::EAGAIN) => return Ok(true),
                Err(e) => return Err(e.into()),
            };
            if self.inbound.send(into_frame(parts)).is_err() {
                return Ok(false);
            }
        }
    }

    /// Handle one monitor event. Returns `false` once the peer is gone.
    fn on_event(&mut self) -> Result<bool> {
        let Some(monitor) = &self.monitor else {
            return Ok(true);
        };
        let parts = monitor.recv_multipart(0)?;
        let event = parts
            .first()
            .filter(|head| head.len() >= 2)
            .map(|head| u16::from_ne_bytes([head[0], head[1]]));

        match event {
            Some(raw) if raw == zmq::SocketEvent::CONNECTED.to_raw() => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(());
                }
                Ok(true)
            }
            Some(raw) if raw == zmq::SocketEvent::DISCONNECTED.to_raw() => {
                info!("Dealer lost its peer");
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

impl DealerReceiver {
    /// Receive the next message. `None` means the connection is gone.
    pub async fn recv(&mut self) -> Result<Option<WireFrame>> {
        Ok(self.inbound.recv().await)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RouterSocket;

    #[tokio::test]
    async fn test_udp_is_rejected() {
        let context = TransportContext::new();
        let config = ConnectionConfiguration::new("127.0.0.1", 5556, Protocol::Udp).unwrap();
        let result = DealerSocket::connect(&context, &config, "client").await;
        assert!(matches!(result, Err(RpcError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_inproc_connect_before_bind() {
        let context = TransportContext::new();
        let config = ConnectionConfiguration::inproc("late-router", 1).unwrap();
        let (dealer, mut receiver) = DealerSocket::connect(&context, &config, "early")
            .await
            .unwrap();

        let mut router = RouterSocket::bind(&context, &config).await.unwrap();
        dealer.send(&["hello"].into_iter().collect()).unwrap();

        let (identity, frame) = router.recv().await.unwrap();
        assert_eq!(&identity[..], b"early");
        router.sender().send(&identity, &frame).unwrap();
        assert_eq!(receiver.recv().await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn test_empty_identity_is_rejected() {
        let context = TransportContext::new();
        let config = ConnectionConfiguration::inproc("svc", 1).unwrap();
        let result = DealerSocket::connect(&context, &config, "").await;
        assert!(matches!(result, Err(RpcError::Configuration { .. })));

        let long = "x".repeat(MAX_IDENTITY_LEN + 1);
        let result = DealerSocket::connect(&context, &config, &long).await;
        assert!(matches!(result, Err(RpcError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_connect_to_dead_tcp_port_fails() {
        let context = TransportContext::new();
        let config = ConnectionConfiguration::tcp("127.0.0.1", 1).unwrap();
        let result = DealerSocket::connect(&context, &config, "client").await;
        assert!(matches!(result, Err(RpcError::Transport { .. })));
    }
}
