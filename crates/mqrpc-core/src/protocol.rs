//! Wire protocol: the parts of each message kind.
//!
//! Payload parts as produced/consumed by application code (the transport
//! prepends or strips the peer identity on the router side):
//!
//! ```text
//! request  client -> server  [correlation_id, method_path, args_json, ttl]
//! success  server -> client  [correlation_id, payload_json]
//! error    server -> client  [correlation_id, <empty>, error_json]
//! ```
//!
//! `ttl` is an i64 big-endian absolute expiry in Unix epoch milliseconds.
//! Text parts are UTF-8. `args_json` is a JSON array of positional arguments.

use crate::error::{RemoteError, Result, RpcError};
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;

mod index {
    pub const CORRELATION_ID: usize = 0;
    pub const METHOD: usize = 1;
    pub const ARGS: usize = 2;
    pub const TTL: usize = 3;
    pub const PAYLOAD: usize = 1;
    pub const ERROR: usize = 2;
}

const REQUEST_PARTS: usize = 4;
const SUCCESS_PARTS: usize = 2;

/// One multipart message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireFrame {
    parts: Vec<Bytes>,
}

impl WireFrame {
    pub fn new(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }

    pub fn push(&mut self, part: impl Into<Bytes>) {
        self.parts.push(part.into());
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }

    pub fn part(&self, index: usize) -> Option<&Bytes> {
        self.parts.get(index)
    }

    /// Read a part as UTF-8 text.
    pub fn text(&self, index: usize) -> Result<&str> {
        let part = self
            .part(index)
            .ok_or_else(|| RpcError::protocol(format!("frame has no part {}", index)))?;
        std::str::from_utf8(part)
            .map_err(|_| RpcError::protocol(format!("frame part {} is not valid UTF-8", index)))
    }

    /// Correlation id of a request or reply, if the frame carries one.
    pub fn correlation_id(&self) -> Option<&str> {
        self.text(index::CORRELATION_ID).ok().filter(|id| !id.is_empty())
    }
}

impl<P: Into<Bytes>> FromIterator<P> for WireFrame {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Current time in Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a request sent now with the given timeout.
pub fn ttl_after(timeout: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX))
}

/// Serialize positional arguments as a JSON array.
pub fn encode_args(args: &[Value]) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(args)?))
}

/// Parse a JSON array of positional arguments.
pub fn decode_args(raw: &[u8]) -> Result<Vec<Value>> {
    match serde_json::from_slice::<Value>(raw)? {
        Value::Array(values) => Ok(values),
        Value::Null => Ok(Vec::new()),
        other => Err(RpcError::protocol(format!(
            "arguments must be a JSON array, got {}",
            other
        ))),
    }
}

/// Client -> server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub correlation_id: String,
    pub method: String,
    pub args: Bytes,
    pub ttl_millis: i64,
}

impl RequestFrame {
    pub fn encode(&self) -> WireFrame {
        WireFrame::new(vec![
            Bytes::copy_from_slice(self.correlation_id.as_bytes()),
            Bytes::copy_from_slice(self.method.as_bytes()),
            self.args.clone(),
            Bytes::copy_from_slice(&self.ttl_millis.to_be_bytes()),
        ])
    }

    pub fn decode(frame: &WireFrame) -> Result<Self> {
        if frame.len() != REQUEST_PARTS {
            return Err(RpcError::protocol(format!(
                "request frame has {} parts, expected {}",
                frame.len(),
                REQUEST_PARTS
            )));
        }
        let ttl_part = &frame.parts[index::TTL];
        let ttl_bytes: [u8; 8] = ttl_part.as_ref().try_into().map_err(|_| {
            RpcError::protocol(format!("TTL part has {} bytes, expected 8", ttl_part.len()))
        })?;

        Ok(Self {
            correlation_id: frame.text(index::CORRELATION_ID)?.to_string(),
            method: frame.text(index::METHOD)?.to_string(),
            args: frame.parts[index::ARGS].clone(),
            ttl_millis: i64::from_be_bytes(ttl_bytes),
        })
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis > self.ttl_millis
    }
}

/// Server -> client reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFrame {
    Success {
        correlation_id: String,
        payload: Bytes,
    },
    Error {
        correlation_id: String,
        error: RemoteError,
    },
}

impl ReplyFrame {
    pub fn correlation_id(&self) -> &str {
        match self {
            ReplyFrame::Success { correlation_id, .. }
            | ReplyFrame::Error { correlation_id, .. } => correlation_id,
        }
    }

    pub fn encode(&self) -> Result<WireFrame> {
        Ok(match self {
            ReplyFrame::Success {
                correlation_id,
                payload,
            } => WireFrame::new(vec![
                Bytes::copy_from_slice(correlation_id.as_bytes()),
                payload.clone(),
            ]),
            ReplyFrame::Error {
                correlation_id,
                error,
            } => WireFrame::new(vec![
                Bytes::copy_from_slice(correlation_id.as_bytes()),
                Bytes::new(),
                Bytes::from(serde_json::to_vec(error)?),
            ]),
        })
    }

    /// Two parts is a success, three or more an error.
    pub fn decode(frame: &WireFrame) -> Result<Self> {
        let correlation_id = frame.text(index::CORRELATION_ID)?.to_string();
        match frame.len() {
            SUCCESS_PARTS => Ok(ReplyFrame::Success {
                correlation_id,
                payload: frame.parts[index::PAYLOAD].clone(),
            }),
            n if n > SUCCESS_PARTS => {
                let error = serde_json::from_slice(&frame.parts[index::ERROR]).map_err(|e| {
                    RpcError::protocol(format!("undecodable error part: {}", e))
                })?;
                Ok(ReplyFrame::Error {
                    correlation_id,
                    error,
                })
            }
            n => Err(RpcError::protocol(format!("reply frame has {} parts", n))),
        }
    }
}
