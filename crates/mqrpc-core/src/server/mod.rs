//! Server side: registry, service lookup, dispatch and the receive loop.
//!
//! [`RpcServer::start`] binds a router and runs a receive loop in the
//! background. Every inbound frame is handed to a [`Dispatch`] implementation
//! in its own task, so a slow handler never holds up the loop and replies may
//! go out in a different order than the requests came in.
//!
//! [`ServerHandle::stop`] is graceful: it stops receiving, waits (bounded by
//! [`RpcDefaults::DRAIN_TIMEOUT`]) for dispatched requests to send their
//! replies, then closes the endpoint. Dropping the handle stops at once.

pub mod dispatcher;
pub mod locator;
pub mod registry;

pub use dispatcher::{Dispatch, Dispatcher};
pub use locator::{ServiceCollection, ServiceInstance, ServiceLocator};
pub use registry::{MethodDescriptor, ServiceDefinition, ServiceRegistry, ServiceRegistryBuilder};

use crate::config::{ConnectionConfiguration, RpcDefaults};
use crate::error::Result;
use crate::transport::{RouterSocket, TransportContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Handle to a running server. Dropping it shuts the server down without
/// waiting for requests in flight.
pub struct ServerHandle {
    local: ConnectionConfiguration,
    in_flight: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// The endpoint the server is bound to (TCP port resolved).
    pub fn local(&self) -> &ConnectionConfiguration {
        &self.local
    }

    pub fn port(&self) -> u16 {
        self.local.port
    }

    /// Requests currently being dispatched.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Stop receiving. Requests already being dispatched still get their
    /// replies out, unless the handle is dropped first.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Shut down, let requests in flight reply, and wait for the endpoint to
    /// be released.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Router-side RPC server.
pub struct RpcServer;

impl RpcServer {
    /// Bind `config` and serve requests with `dispatch` until shut down.
    pub async fn start<D: Dispatch>(
        transport: &TransportContext,
        config: &ConnectionConfiguration,
        dispatch: Arc<D>,
    ) -> Result<ServerHandle> {
        let router = RouterSocket::bind(transport, config).await?;
        let local = router.local().clone();

        info!("RPC server listening on {}", local);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::receive_loop(
            router,
            dispatch,
            shutdown_rx,
            in_flight.clone(),
        ));

        Ok(ServerHandle {
            local,
            in_flight,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    /// Serve a registry with services from `locator`.
    pub async fn serve(
        transport: &TransportContext,
        config: &ConnectionConfiguration,
        registry: ServiceRegistry,
        locator: impl ServiceLocator,
    ) -> Result<ServerHandle> {
        info!("Serving {} methods", registry.len());
        Self::start(transport, config, Arc::new(Dispatcher::new(registry, locator))).await
    }

    async fn receive_loop<D: Dispatch>(
        mut router: RouterSocket,
        dispatch: Arc<D>,
        mut shutdown_rx: oneshot::Receiver<()>,
        in_flight: Arc<AtomicUsize>,
    ) {
        let sender = router.sender();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("RPC server on {} shutting down", router.local());
                    break;
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                received = router.recv() => {
                    let Some((identity, frame)) = received else {
                        debug!("Router inbound queue closed");
                        break;
                    };

                    let dispatch = dispatch.clone();
                    let sender = sender.clone();
                    let in_flight = in_flight.clone();
                    in_flight.fetch_add(1, Ordering::Relaxed);

                    tasks.spawn(async move {
                        if let Some(reply) = dispatch.dispatch(frame).await {
                            if let Err(e) = sender.send(&identity, &reply) {
                                warn!("Failed to send reply: {}", e);
                            }
                        }
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }

        // The router must outlive the replies it still has to send.
        if !tasks.is_empty() {
            info!("Waiting for {} requests in flight", tasks.len());
            let drained = tokio::time::timeout(RpcDefaults::DRAIN_TIMEOUT, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Abandoning {} requests still in flight", tasks.len());
                tasks.abort_all();
            }
        }
        drop(router);
    }
}
