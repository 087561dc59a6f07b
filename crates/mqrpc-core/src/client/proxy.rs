//! Typed call stubs for a remote service.
//!
//! A [`ServiceProxy`] turns a local method name plus a tuple of arguments into
//! a request, using the method's [`MethodContract`](crate::contract::MethodContract)
//! for the remote path, timeout, retry count and result shape. Each stub
//! requires the matching [`CallShape`]:
//!
//! | Stub | Shape | Returns |
//! |---|---|---|
//! | [`ServiceProxy::invoke_blocking`] | `Sync` | `T`, blocking the thread |
//! | [`ServiceProxy::invoke`] | `AwaitGeneric` | `T` |
//! | [`ServiceProxy::start`] | `AwaitGeneric` | [`PendingCall<T>`] |
//! | [`ServiceProxy::send`] | `AwaitValue` | `()` once sent |
//! | [`ServiceProxy::notify`] | `FireAndForget` | `()` immediately |

use super::pending::RpcRequest;
use super::retry::with_retries;
use super::timeout::CancelHandle;
use super::RpcClientContext;
use crate::args::{decode_result, RpcArgs};
use crate::config::ConnectionConfiguration;
use crate::contract::{CallShape, ServiceContract};
use crate::error::{Result, RpcError};
use crate::protocol::encode_args;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Client-side stand-in for a remote service.
#[derive(Clone)]
pub struct ServiceProxy {
    client: RpcClientContext,
    contract: Arc<ServiceContract>,
    destination: ConnectionConfiguration,
}

/// Everything needed to (re)issue one logical call.
#[derive(Debug, Clone)]
struct PreparedCall {
    path: String,
    args: Bytes,
    shape: CallShape,
    timeout: Duration,
    retries: u32,
}

impl ServiceProxy {
    pub(crate) fn new(
        client: RpcClientContext,
        contract: Arc<ServiceContract>,
        destination: ConnectionConfiguration,
    ) -> Self {
        Self {
            client,
            contract,
            destination,
        }
    }

    pub fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    pub fn destination(&self) -> &ConnectionConfiguration {
        &self.destination
    }

    /// Call a `Sync` method and block the current thread until it completes.
    ///
    /// # Panics
    ///
    /// Panics when called from an asynchronous execution context; call it from
    /// a plain thread or inside `tokio::task::spawn_blocking`.
    pub fn invoke_blocking<A, T>(&self, method: &str, args: A) -> Result<T>
    where
        A: RpcArgs,
        T: DeserializeOwned,
    {
        let call = self.prepare(method, CallShape::Sync, args)?;
        let payload = self.client.runtime().block_on(execute(
            self.client.clone(),
            self.destination.clone(),
            call,
            CallState::default(),
        ))?;
        decode_result(&payload)
    }

    /// Call an `AwaitGeneric` method and wait for its value.
    pub async fn invoke<A, T>(&self, method: &str, args: A) -> Result<T>
    where
        A: RpcArgs,
        T: DeserializeOwned,
    {
        let call = self.prepare(method, CallShape::AwaitGeneric, args)?;
        let payload = execute(
            self.client.clone(),
            self.destination.clone(),
            call,
            CallState::default(),
        )
        .await?;
        decode_result(&payload)
    }

    /// Issue an `AwaitGeneric` call and return a handle to its result.
    ///
    /// The call runs in the background; the returned [`PendingCall`] can be
    /// awaited or cancelled. Dropping it does not cancel the call.
    pub fn start<A, T>(&self, method: &str, args: A) -> Result<PendingCall<T>>
    where
        A: RpcArgs,
        T: DeserializeOwned,
    {
        let call = self.prepare(method, CallShape::AwaitGeneric, args)?;
        let path = call.path.clone();
        let state = CallState::default();
        let task = self.client.runtime().spawn(execute(
            self.client.clone(),
            self.destination.clone(),
            call,
            state.clone(),
        ));

        Ok(PendingCall {
            method: path,
            state,
            task,
            _result: PhantomData,
        })
    }

    /// Call an `AwaitValue` method. Completes once the request is sent.
    pub async fn send<A: RpcArgs>(&self, method: &str, args: A) -> Result<()> {
        let call = self.prepare(method, CallShape::AwaitValue, args)?;
        execute(
            self.client.clone(),
            self.destination.clone(),
            call,
            CallState::default(),
        )
        .await
        .map(|_| ())
    }

    /// Call a `FireAndForget` method. Returns without waiting for the send.
    pub fn notify<A: RpcArgs>(&self, method: &str, args: A) -> Result<()> {
        let call = self.prepare(method, CallShape::FireAndForget, args)?;
        let path = call.path.clone();
        let client = self.client.clone();
        let destination = self.destination.clone();

        self.client.runtime().spawn(async move {
            if let Err(e) = execute(client, destination, call, CallState::default()).await {
                warn!("Notification {} was not delivered: {}", path, e);
            }
        });
        Ok(())
    }

    fn prepare<A: RpcArgs>(
        &self,
        method: &str,
        expected: CallShape,
        args: A,
    ) -> Result<PreparedCall> {
        let contract = self.contract.method(method)?;
        if contract.shape() != expected {
            return Err(RpcError::config(format!(
                "Method '{}' is declared as {}, not {}",
                method,
                contract.shape(),
                expected
            )));
        }

        Ok(PreparedCall {
            path: self.contract.method_path(contract)?,
            args: encode_args(&args.into_values()?)?,
            shape: expected,
            timeout: contract
                .timeout_override()
                .unwrap_or(self.client.config().default_timeout),
            retries: contract.retry_count(),
        })
    }
}

/// Run a call, replaying it on retryable failures.
async fn execute(
    client: RpcClientContext,
    destination: ConnectionConfiguration,
    call: PreparedCall,
    state: CallState,
) -> Result<Bytes> {
    let (client, destination, call, state) = (&client, &destination, &call, &state);
    with_retries(call.retries, move || attempt(client, destination, call, state)).await
}

async fn attempt(
    client: &RpcClientContext,
    destination: &ConnectionConfiguration,
    call: &PreparedCall,
    state: &CallState,
) -> Result<Bytes> {
    if state.is_cancelled() {
        return Err(RpcError::Cancelled {
            method: call.path.clone(),
        });
    }

    let connection = client.connection(destination).await?;
    let request = RpcRequest::new(
        call.path.as_str(),
        call.args.clone(),
        call.shape,
        call.timeout,
        connection.endpoint(),
    );

    if !call.shape.expects_reply() {
        connection.send(&request)?;
        debug!("Sent {} ({})", request.method, request.correlation_id);
        return Ok(Bytes::new());
    }

    let (reply, cancel) = connection.call(&request)?;
    state.track(cancel);
    reply.await.unwrap_or_else(|_| {
        Err(RpcError::transport(format!(
            "connection to {} dropped the reply for {}",
            request.destination, request.method
        )))
    })
}

#[derive(Default)]
struct AttemptState {
    cancelled: bool,
    current: Option<CancelHandle>,
}

/// Cancellation state shared by a logical call and all of its attempts.
#[derive(Clone, Default)]
struct CallState {
    inner: Arc<Mutex<AttemptState>>,
}

impl CallState {
    fn lock(&self) -> std::sync::MutexGuard<'_, AttemptState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Make `handle` the attempt that `cancel` acts on.
    fn track(&self, handle: CancelHandle) {
        let mut state = self.lock();
        if state.cancelled {
            handle.cancel();
        }
        state.current = Some(handle);
    }

    fn cancel(&self) -> bool {
        let mut state = self.lock();
        state.cancelled = true;
        state.current.as_ref().is_some_and(CancelHandle::cancel)
    }

    fn correlation_id(&self) -> Option<String> {
        self.lock()
            .current
            .as_ref()
            .map(|handle| handle.correlation_id().to_string())
    }
}

/// Result of [`ServiceProxy::start`]: awaitable, cancellable.
pub struct PendingCall<T> {
    method: String,
    state: CallState,
    task: JoinHandle<Result<Bytes>>,
    _result: PhantomData<fn() -> T>,
}

impl<T> PendingCall<T> {
    /// Fail the call with `Cancelled` if it is still waiting for its reply.
    ///
    /// Returns `true` if a pending request was cancelled. A call that has not
    /// been sent yet is cancelled before it is sent and this returns `false`.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    /// Correlation id of the current attempt, once it has been sent.
    pub fn correlation_id(&self) -> Option<String> {
        self.state.correlation_id()
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl<T: DeserializeOwned> Future for PendingCall<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let joined = match Pin::new(&mut this.task).poll(cx) {
            Poll::Ready(joined) => joined,
            Poll::Pending => return Poll::Pending,
        };

        Poll::Ready(match joined {
            Ok(Ok(payload)) => decode_result(&payload),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(RpcError::Invocation {
                message: format!("call task for {} failed: {}", this.method, e),
                details: None,
            }),
        })
    }
}

impl<T> std::fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("method", &self.method)
            .field("correlation_id", &self.correlation_id())
            .finish()
    }
}
