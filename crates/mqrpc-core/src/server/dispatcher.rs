//! Request dispatch.
//!
//! For each request frame, in order:
//!
//! 1. drop it (log only) if its TTL has passed;
//! 2. look up the method key (`methodNotFound`);
//! 3. check the argument count (`parameterMismatch`);
//! 4. locate the service instance (`serviceNotFound`);
//! 5. invoke the handler in its own task, so a panic becomes an
//!    `invocationFault` reply instead of taking the server down;
//! 6. reply with the encoded value, or with nothing for `FireAndForget` and
//!    `AwaitValue` methods that succeeded.

use super::locator::ServiceLocator;
use super::registry::ServiceRegistry;
use crate::args::encode_result;
use crate::error::{RemoteError, RemoteErrorKind};
use crate::protocol::{decode_args, now_millis, ReplyFrame, RequestFrame, WireFrame};
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns a request frame into an optional reply frame.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    async fn dispatch(&self, frame: WireFrame) -> Option<WireFrame>;
}

/// Registry-backed dispatcher.
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    locator: Arc<dyn ServiceLocator>,
}

impl Dispatcher {
    pub fn new(registry: ServiceRegistry, locator: impl ServiceLocator) -> Self {
        Self::from_shared(Arc::new(registry), Arc::new(locator))
    }

    pub fn from_shared(registry: Arc<ServiceRegistry>, locator: Arc<dyn ServiceLocator>) -> Self {
        Self { registry, locator }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Steps 2 to 6 for a decoded, unexpired request.
    async fn handle(&self, request: &RequestFrame) -> Result<Option<Bytes>, RemoteError> {
        let method = self
            .registry
            .get(&request.method)
            .ok_or_else(|| RemoteError::method_not_found(&request.method))?;

        let args = decode_args(&request.args).map_err(|e| RemoteError::protocol(e.to_string()))?;
        if args.len() != method.param_types().len() {
            return Err(RemoteError::parameter_mismatch(method.name()));
        }

        let service = self
            .locator
            .locate(method.service_type())
            .ok_or_else(|| RemoteError::service_not_found(method.service_type_name()))?;

        let call = method.invoke(service, args).map_err(RemoteError::from)?;
        let value = match tokio::spawn(call).await {
            Ok(Ok(value)) => value,
            Ok(Err(fault)) => return Err(RemoteError::from_fault(&fault)),
            Err(e) if e.is_panic() => return Err(panic_fault(e.into_panic())),
            Err(e) => return Err(RemoteError::from_fault(&anyhow::Error::new(e))),
        };

        if !method.shape().expects_reply() {
            return Ok(None);
        }
        encode_result(&value).map(Some).map_err(RemoteError::from)
    }
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn dispatch(&self, frame: WireFrame) -> Option<WireFrame> {
        let Some(correlation_id) = frame.correlation_id().map(str::to_string) else {
            warn!("Dropping request without a correlation id ({} parts)", frame.len());
            return None;
        };

        let request = match RequestFrame::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request {}: {}", correlation_id, e);
                return error_reply(correlation_id, RemoteError::protocol(e.to_string()));
            }
        };

        if request.is_expired(now_millis()) {
            debug!(
                "Dropping expired request {} for {} (ttl {})",
                request.correlation_id, request.method, request.ttl_millis
            );
            return None;
        }

        match self.handle(&request).await {
            Ok(Some(payload)) => ReplyFrame::Success {
                correlation_id,
                payload,
            }
            .encode()
            .ok(),
            Ok(None) => None,
            Err(error) => {
                debug!(
                    "Request {} for {} failed: {}",
                    correlation_id, request.method, error.message
                );
                error_reply(correlation_id, error)
            }
        }
    }
}

fn error_reply(correlation_id: String, error: RemoteError) -> Option<WireFrame> {
    match (ReplyFrame::Error {
        correlation_id,
        error,
    })
    .encode()
    {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Could not encode error reply: {}", e);
            None
        }
    }
}

fn panic_fault(payload: Box<dyn Any + Send>) -> RemoteError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());

    RemoteError {
        kind: RemoteErrorKind::InvocationFault,
        message,
        details: Some("handler panicked".to_string()),
        subject: None,
    }
}
