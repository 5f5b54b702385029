//! Error taxonomy for the subscription transport.
//!
//! Four families, matching how each one is surfaced:
//! - [`ProtocolError`] is reported to the peer as an `error` / `connection_error` frame.
//! - [`ExecutionError`] ends one operation with an `error` frame for its id.
//! - [`TransportError`] tears down the affected connection or operation; never retried.
//! - [`ConfigError`] fails at construction, never while handling messages.

use thiserror::Error;

use crate::message::MessageType;

/// A frame that could not be accepted by the protocol state machine.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame was not a JSON object of the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The `type` field named no known message type.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// A message type that requires an `id` arrived without one.
    #[error("message of type '{0}' is missing an id")]
    MissingId(MessageType),
    /// A `start` arrived without a payload.
    #[error("operation '{0}' has no payload")]
    MissingPayload(String),
    /// A `start` payload could not be read as a GraphQL request.
    #[error("operation '{id}' has an invalid payload: {reason}")]
    InvalidPayload {
        /// Operation id.
        id: String,
        /// Parser message.
        reason: String,
    },
    /// A `start` reused the id of an operation that is still running.
    #[error("subscriber for id '{0}' already exists")]
    DuplicateOperation(String),
    /// An operation was started before `connection_init` was acknowledged.
    #[error("connection has not been initialized")]
    NotInitialized,
}

impl ProtocolError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownType(_) => "unknown_type",
            Self::MissingId(_) => "missing_id",
            Self::MissingPayload(_) => "missing_payload",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::DuplicateOperation(_) => "duplicate_operation",
            Self::NotInitialized => "not_initialized",
        }
    }
}

/// A failure raised by the query executor outside of an error-shaped result.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The executor refused to run the operation.
    #[error("execution rejected: {0}")]
    Rejected(String),
    /// A result stream failed part-way through.
    #[error("result stream failed: {0}")]
    StreamFailed(String),
}

/// A failure writing to or managing a connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is no longer open.
    #[error("connection closed")]
    Closed,
    /// The underlying socket reported an error.
    #[error("i/o error: {0}")]
    Io(String),
    /// An outbound message could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Configuration that cannot be honored.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No context-sharing mode was selected for a batch.
    #[error("context setting is not configured")]
    ContextSettingNotConfigured,
    /// The configured context-sharing mode has no implementation.
    #[error("unsupported context setting: '{0}' (expected 'per-query' or 'per-request')")]
    UnsupportedContextSetting(String),
    /// A configuration value was out of range or otherwise invalid.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Failed to read a configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse a configuration file.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::DuplicateOperation("7".into());
        assert_eq!(err.to_string(), "subscriber for id '7' already exists");

        let err = ProtocolError::MissingId(MessageType::Start);
        assert_eq!(err.to_string(), "message of type 'start' is missing an id");
    }

    #[test]
    fn protocol_error_kinds() {
        assert_eq!(ProtocolError::NotInitialized.error_kind(), "not_initialized");
        assert_eq!(
            ProtocolError::UnknownType("bogus".into()).error_kind(),
            "unknown_type"
        );
        assert_eq!(
            ProtocolError::InvalidPayload {
                id: "1".into(),
                reason: "x".into()
            }
            .error_kind(),
            "invalid_payload"
        );
    }

    #[test]
    fn config_errors_are_distinct() {
        let missing = ConfigError::ContextSettingNotConfigured;
        let unknown = ConfigError::UnsupportedContextSetting("per-galaxy".into());
        assert!(matches!(missing, ConfigError::ContextSettingNotConfigured));
        assert!(unknown.to_string().contains("per-galaxy"));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn transport_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "connection closed");
        assert!(TransportError::Io("reset".into()).to_string().contains("reset"));
    }
}
