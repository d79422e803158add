//! Messages exchanged between the caller, the bridge and the backend.
//!
//! Payloads come in two independent channels. Structured payloads are
//! opaque text (the bridge never looks inside them); raw payloads are `f32`
//! arrays that skip encoding altogether.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::token::CorrelationToken;

/// Function name used for structured input when the caller gives none.
pub const DEFAULT_INPUT_FUNCTION: &str = "onJsonInput";

/// Function name used for raw input when the caller gives none.
pub const DEFAULT_RAW_INPUT_FUNCTION: &str = "onFloatArrayInput";

/// The two payload channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Structured,
    Raw,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Structured => f.write_str("structured"),
            ChannelKind::Raw => f.write_str("raw"),
        }
    }
}

/// Request or result data on one of the two channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Structured(String),
    Raw(Vec<f32>),
}

impl Payload {
    pub fn channel(&self) -> ChannelKind {
        match self {
            Payload::Structured(_) => ChannelKind::Structured,
            Payload::Raw(_) => ChannelKind::Raw,
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Structured(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Structured(value.to_string())
    }
}

impl From<Vec<f32>> for Payload {
    fn from(value: Vec<f32>) -> Self {
        Payload::Raw(value)
    }
}

/// An outbound inference request. Immutable once handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub payload: Payload,
    /// Backend function the request is addressed to. Results echo it back.
    pub function_name: String,
    /// Present for latent calls only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<CorrelationToken>,
}

/// A result reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResult {
    pub payload: Payload,
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<CorrelationToken>,
}

impl BackendResult {
    /// Build the result answering `request` with `payload`.
    pub fn reply_to(request: &Request, payload: Payload) -> Self {
        Self {
            payload,
            function_name: request.function_name.clone(),
            token: request.token,
        }
    }
}

/// Descriptor of the backend a bridge is connected to (a socket address,
/// a library path, ...). Only used for notifications and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    /// Endpoint of an in-process backend.
    pub fn local(name: &str) -> Self {
        Self(format!("local://{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a backend may report, in the order it reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Connected(Endpoint),
    Disconnected,
    Result(BackendResult),
    /// The backend could not answer a request. Fails the matching latent
    /// call; without a token it is only logged.
    Failed {
        token: Option<CorrelationToken>,
        function_name: String,
        message: String,
    },
}

/// Result broadcast to fire-and-forget subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct InputResult<T> {
    pub data: T,
    pub function_name: String,
}
