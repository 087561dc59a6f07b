//! mqrpc - remote method calls over a dealer/router message transport.
//!
//! A client calls methods of a declared service as if they were local; the
//! calls run in a server process reachable over `tcp` (or `inproc` within one
//! process). This crate is the engine shared by both sides:
//!
//! - [`protocol`]: the parts of request, success and error frames.
//! - [`transport`]: dealer/router sockets with identity routing.
//! - [`client`]: request correlation, timeouts, cancellation, retries and the
//!   typed [`ServiceProxy`] stubs.
//! - [`server`]: the method registry, service lookup and the dispatcher.
//!
//! # Example
//!
//! ```rust,ignore
//! use mqrpc::*;
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! #[tokio::main]
//! async fn main() -> mqrpc::Result<()> {
//!     let transport = TransportContext::new();
//!     let endpoint = ConnectionConfiguration::inproc("greeter", 1)?;
//!
//!     let registry = ServiceRegistry::builder()
//!         .service(ServiceDefinition::<Greeter>::new("Demo", "IGreeter").handler(
//!             "Greet",
//!             CallShape::AwaitGeneric,
//!             |_svc: Arc<Greeter>, (name,): (String,)| async move {
//!                 anyhow::Ok(format!("Hello {}", name))
//!             },
//!         ))
//!         .build()?;
//!     let services = ServiceCollection::new().add(Greeter);
//!     let _server = RpcServer::serve(&transport, &endpoint, registry, services).await?;
//!
//!     let config = ClientConfiguration::new(endpoint);
//!     let client = RpcClientContext::with_transport(config, transport)?;
//!     let proxy = client.proxy(
//!         ServiceContract::builder("IGreeter")
//!             .namespace("Demo")
//!             .method(MethodContract::new("Greet", CallShape::AwaitGeneric))
//!             .build()?,
//!     )?;
//!     let greeting: String = proxy.invoke("Greet", ("world",)).await?;
//!     println!("{}", greeting);
//!     Ok(())
//! }
//! ```

pub mod args;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use args::{FromArgs, RpcArgs};
pub use client::{CancelHandle, PendingCall, RpcClientContext, ServiceProxy};
pub use config::{ClientConfiguration, ConnectionConfiguration, Protocol, RpcDefaults};
pub use contract::{CallShape, MethodContract, ServiceContract};
pub use error::{RemoteError, RemoteErrorKind, Result, RpcError};
pub use protocol::WireFrame;
pub use server::{
    Dispatch, Dispatcher, RpcServer, ServerHandle, ServiceCollection, ServiceDefinition,
    ServiceLocator, ServiceRegistry,
};
pub use transport::TransportContext;
