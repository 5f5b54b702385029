//! Protocol messages exchanged over a subscription connection.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::errors::ProtocolError;
use crate::request::ExecutionResult;

/// Sub-protocol name advertised by Apollo-style clients at upgrade time.
pub const GRAPHQL_WS: &str = "graphql-ws";

/// Every message type known to the transport.
///
/// Wire names follow the `graphql-ws` (subscriptions-transport-ws) protocol.
/// [`MessageType::from_str`] also accepts the legacy names older clients send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client → server: open the logical connection.
    ConnectionInit,
    /// Server → client: connection accepted.
    ConnectionAck,
    /// Server → client: connection rejected or connection-scoped failure.
    ConnectionError,
    /// Client → server: close everything.
    ConnectionTerminate,
    /// Client → server: run an operation.
    Start,
    /// Client → server: cancel an operation.
    Stop,
    /// Server → client: one result of an operation.
    Data,
    /// Server → client: an operation failed.
    Error,
    /// Server → client: an operation finished.
    Complete,
    /// Server → client: liveness signal.
    KeepAlive,
    /// Server → client (fallback protocol): first result, confirming the subscription.
    SubscriptionSuccess,
}

impl MessageType {
    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::ConnectionTerminate => "connection_terminate",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::KeepAlive => "ka",
            Self::SubscriptionSuccess => "subscription_success",
        }
    }

    /// Whether messages of this type must carry an operation id.
    pub fn requires_id(self) -> bool {
        matches!(
            self,
            Self::Start | Self::Stop | Self::Data | Self::Error | Self::Complete
        )
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "connection_init" | "init" => Self::ConnectionInit,
            "connection_ack" | "init_success" => Self::ConnectionAck,
            "connection_error" | "init_fail" => Self::ConnectionError,
            "connection_terminate" => Self::ConnectionTerminate,
            "start" | "subscription_start" => Self::Start,
            "stop" | "subscription_end" => Self::Stop,
            "data" | "subscription_data" => Self::Data,
            "error" | "subscription_fail" => Self::Error,
            "complete" => Self::Complete,
            "ka" | "keep_alive" => Self::KeepAlive,
            "subscription_success" => Self::SubscriptionSuccess,
            other => return Err(ProtocolError::UnknownType(other.to_owned())),
        };
        Ok(kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame of the protocol: a type tag plus optional id and payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolMessage {
    /// Message type.
    pub kind: MessageType,
    /// Operation id (only for operation-scoped types).
    pub id: Option<String>,
    /// Opaque payload.
    pub payload: Option<Value>,
}

impl ProtocolMessage {
    /// Build a message from parts.
    pub fn new(kind: MessageType, id: Option<String>, payload: Option<Value>) -> Self {
        Self { kind, id, payload }
    }

    /// `connection_ack`.
    pub fn connection_ack() -> Self {
        Self::new(MessageType::ConnectionAck, None, None)
    }

    /// `connection_error` with a `{message}` payload.
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::new(
            MessageType::ConnectionError,
            None,
            Some(serde_json::json!({ "message": message.into() })),
        )
    }

    /// Keep-alive frame (no id, no payload).
    pub fn keep_alive() -> Self {
        Self::new(MessageType::KeepAlive, None, None)
    }

    /// `data` for an operation.
    pub fn data(id: impl Into<String>, result: &ExecutionResult) -> Self {
        Self::new(MessageType::Data, Some(id.into()), Some(result.to_payload()))
    }

    /// `error` for an operation, with a `{message}` payload.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            MessageType::Error,
            Some(id.into()),
            Some(serde_json::json!({ "message": message.into() })),
        )
    }

    /// Connection-scoped `error` (no id) for failures after initialisation.
    pub fn connection_scoped_error(message: impl Into<String>) -> Self {
        Self::new(
            MessageType::Error,
            None,
            Some(serde_json::json!({ "message": message.into() })),
        )
    }

    /// `complete` for an operation.
    pub fn complete(id: impl Into<String>) -> Self {
        Self::new(MessageType::Complete, Some(id.into()), None)
    }

    /// Fallback-protocol confirmation carrying the first result.
    pub fn subscription_success(id: impl Into<String>, result: &ExecutionResult) -> Self {
        Self::new(
            MessageType::SubscriptionSuccess,
            Some(id.into()),
            Some(result.to_payload()),
        )
    }

    /// Operation id, or an error naming the type that required one.
    pub fn require_id(&self) -> Result<&str, ProtocolError> {
        self.id
            .as_deref()
            .ok_or(ProtocolError::MissingId(self.kind))
    }
}
