//! Error types for mqrpc.
//!
//! `RpcError` is what callers see on both sides of the wire. `RemoteError` is
//! the serialized form carried in the error frame; a server-side failure is
//! turned into a `RemoteError`, sent, and rebuilt into an `RpcError` by the
//! client that issued the call.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for mqrpc.
#[derive(Debug, Error)]
pub enum RpcError {
    // Binding and configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Dispatch errors (raised on the server, delivered to the caller)
    #[error("Method '{method}' not found.")]
    MethodNotFound { method: String },

    #[error("Parameter count mismatch for method '{method}'.")]
    ParameterMismatch { method: String },

    #[error("Service for type '{service_type}' not found.")]
    ServiceNotFound { service_type: String },

    #[error("{message}")]
    Invocation {
        message: String,
        /// Diagnostic text from the callee (cause chain), when available.
        details: Option<String>,
    },

    // Client-side request lifecycle
    #[error("Request to {method} timed out after {} ms", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    #[error("Request to {method} was cancelled")]
    Cancelled { method: String },

    // Transport and framing
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for mqrpc operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<zmq::Error> for RpcError {
    fn from(err: zmq::Error) -> Self {
        RpcError::transport(format!("zmq: {}", err))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    pub fn config(message: impl Into<String>) -> Self {
        RpcError::Configuration {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RpcError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        RpcError::Protocol {
            message: message.into(),
        }
    }

    /// Check if this error should trigger a replay of the call.
    ///
    /// Only local failures are retryable; an error reported by the server is
    /// the server's final word on that call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Timeout { .. } | RpcError::Transport { .. })
    }

    /// Check if this error was produced by the remote side.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            RpcError::MethodNotFound { .. }
                | RpcError::ParameterMismatch { .. }
                | RpcError::ServiceNotFound { .. }
                | RpcError::Invocation { .. }
        )
    }
}

/// Discriminant of an error carried in an error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteErrorKind {
    MethodNotFound,
    ParameterMismatch,
    ServiceNotFound,
    InvocationFault,
    Protocol,
}

/// Error value as it travels in the last part of an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Subject of the error (method key, method name or service type).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl RemoteError {
    pub fn method_not_found(key: &str) -> Self {
        RpcError::MethodNotFound {
            method: key.to_string(),
        }
        .into()
    }

    pub fn parameter_mismatch(method: &str) -> Self {
        RpcError::ParameterMismatch {
            method: method.to_string(),
        }
        .into()
    }

    pub fn service_not_found(service_type: &str) -> Self {
        RpcError::ServiceNotFound {
            service_type: service_type.to_string(),
        }
        .into()
    }

    /// Build an invocation fault from a handler error, unwrapped to its innermost cause.
    pub fn from_fault(err: &anyhow::Error) -> Self {
        let chain = format!("{:#}", err);
        let root = err.root_cause().to_string();
        Self {
            kind: RemoteErrorKind::InvocationFault,
            details: (chain != root).then_some(chain),
            message: root,
            subject: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Protocol,
            message: message.into(),
            details: None,
            subject: None,
        }
    }
}

impl From<RpcError> for RemoteError {
    fn from(err: RpcError) -> Self {
        let message = err.to_string();
        let (kind, subject, details) = match err {
            RpcError::MethodNotFound { method } => {
                (RemoteErrorKind::MethodNotFound, Some(method), None)
            }
            RpcError::ParameterMismatch { method } => {
                (RemoteErrorKind::ParameterMismatch, Some(method), None)
            }
            RpcError::ServiceNotFound { service_type } => {
                (RemoteErrorKind::ServiceNotFound, Some(service_type), None)
            }
            RpcError::Invocation { details, .. } => {
                (RemoteErrorKind::InvocationFault, None, details)
            }
            RpcError::Protocol { .. } => (RemoteErrorKind::Protocol, None, None),
            _ => (RemoteErrorKind::InvocationFault, None, None),
        };
        Self {
            kind,
            message,
            details,
            subject,
        }
    }
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        match (err.kind, err.subject) {
            (RemoteErrorKind::MethodNotFound, Some(method)) => RpcError::MethodNotFound { method },
            (RemoteErrorKind::ParameterMismatch, Some(method)) => {
                RpcError::ParameterMismatch { method }
            }
            (RemoteErrorKind::ServiceNotFound, Some(service_type)) => {
                RpcError::ServiceNotFound { service_type }
            }
            (RemoteErrorKind::Protocol, _) => RpcError::Protocol {
                message: err.message,
            },
            // Unknown subject: keep the server's message verbatim.
            _ => RpcError::Invocation {
                message: err.message,
                details: err.details,
            },
        }
    }
}
