//! Client side: connections, request correlation and call stubs.
//!
//! An [`RpcClientContext`] owns one [`connection::Connection`] per destination.
//! Every [`ServiceProxy`] created from it that targets the same destination
//! shares that connection, its pending table and its response listener. A
//! connection whose peer went away is replaced on the next call. Opening a
//! connection only holds up callers of the same destination.
//!
//! # Example
//!
//! ```rust,ignore
//! use mqrpc::{CallShape, ClientConfiguration, MethodContract, RpcClientContext, ServiceContract};
//!
//! let client = RpcClientContext::new(ClientConfiguration::default())?;
//! let contract = ServiceContract::builder("IExampleService")
//!     .namespace("Demo")
//!     .method(MethodContract::new("MultipleParameter", CallShape::AwaitGeneric))
//!     .build()?;
//! let proxy = client.proxy(contract)?;
//! let joined: String = proxy.invoke("MultipleParameter", ("Hello", "World")).await?;
//! ```

pub mod connection;
pub mod listener;
pub mod pending;
pub mod proxy;
pub mod retry;
pub mod timeout;

pub use pending::{PendingRequestTable, RpcRequest};
pub use proxy::{PendingCall, ServiceProxy};
pub use timeout::CancelHandle;

use crate::config::{ClientConfiguration, ConnectionConfiguration};
use crate::contract::ServiceContract;
use crate::error::{Result, RpcError};
use crate::transport::TransportContext;
use connection::Connection;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Owner of a client's configuration and connections.
///
/// Cloning is cheap; clones share connections.
#[derive(Clone)]
pub struct RpcClientContext {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfiguration,
    transport: TransportContext,
    runtime: Handle,
    connections: DashMap<String, ConnectionSlot>,
}

/// Connection to one destination. Locked while (re)connecting.
type ConnectionSlot = Arc<Mutex<Option<Arc<Connection>>>>;

impl RpcClientContext {
    /// Create a client with its own transport context.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfiguration) -> Result<Self> {
        Self::with_transport(config, TransportContext::new())
    }

    /// Create a client on a shared transport context (needed for `inproc`).
    pub fn with_transport(
        config: ClientConfiguration,
        transport: TransportContext,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            RpcError::config("RpcClientContext must be created inside a Tokio runtime")
        })?;
        if config.identifier.trim().is_empty() {
            return Err(RpcError::config("Client identifier cannot be empty"));
        }

        debug!(
            "Client {} created (default timeout {:?})",
            config.identifier, config.default_timeout
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                runtime,
                connections: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.inner.config
    }

    pub fn transport(&self) -> &TransportContext {
        &self.inner.transport
    }

    /// Proxy for a service at the configured connection.
    pub fn proxy(&self, contract: ServiceContract) -> Result<ServiceProxy> {
        self.proxy_to(contract, self.inner.config.connection.clone())
    }

    /// Proxy for a service at an explicit destination.
    ///
    /// Fails when the contract has no namespace binding.
    pub fn proxy_to(
        &self,
        contract: ServiceContract,
        destination: ConnectionConfiguration,
    ) -> Result<ServiceProxy> {
        if contract.namespace().is_none() {
            return Err(RpcError::config(format!(
                "Service '{}' has no namespace binding",
                contract.name()
            )));
        }
        Ok(ServiceProxy::new(self.clone(), Arc::new(contract), destination))
    }

    /// Shared connection to a destination, opened on first use.
    pub(crate) async fn connection(
        &self,
        destination: &ConnectionConfiguration,
    ) -> Result<Arc<Connection>> {
        // Clone the slot out so no map guard is held across the await.
        let slot = self
            .inner
            .connections
            .entry(destination.endpoint())
            .or_default()
            .clone();
        let mut current = slot.lock().await;

        if let Some(existing) = current.as_ref() {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
            info!("Reconnecting to {}", existing.endpoint());
        }

        let connection = Arc::new(
            Connection::open(&self.inner.transport, destination, &self.inner.config.identifier)
                .await?,
        );
        *current = Some(connection.clone());
        Ok(connection)
    }

    fn slots(&self) -> Vec<ConnectionSlot> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        let mut count = 0;
        for slot in self.slots() {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Requests waiting for a reply across all connections.
    pub async fn pending_requests(&self) -> usize {
        let mut pending = 0;
        for slot in self.slots() {
            if let Some(connection) = slot.lock().await.as_ref() {
                pending += connection.pending();
            }
        }
        pending
    }

    /// Close every connection. Requests still pending fail with a transport
    /// error once no call holds the connection any more.
    pub async fn close(&self) {
        let mut closed = 0;
        for slot in self.slots() {
            if slot.lock().await.take().is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            info!("Closing {} client connections", closed);
        }
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }
}

impl std::fmt::Debug for RpcClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClientContext")
            .field("identifier", &self.inner.config.identifier)
            .field("connection", &self.inner.config.connection.endpoint())
            .finish()
    }
}
