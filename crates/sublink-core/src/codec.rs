//! Text-frame codec: JSON `{type, id?, payload?}` ↔ [`ProtocolMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, TransportError};
use crate::message::{MessageType, ProtocolMessage};

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a Value>,
}

/// Decode one inbound text frame.
///
/// Integer ids are normalised to strings; a `null` payload is treated as absent.
pub fn decode(text: &str) -> Result<ProtocolMessage, ProtocolError> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let kind: MessageType = frame.kind.parse()?;

    let id = match frame.id {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            return Err(ProtocolError::Malformed(format!(
                "id must be a string or integer, got {other}"
            )));
        }
    };
    let payload = frame.payload.filter(|p| !p.is_null());

    Ok(ProtocolMessage { kind, id, payload })
}

/// Encode one outbound message as a text frame.
pub fn encode(message: &ProtocolMessage) -> Result<String, TransportError> {
    let frame = OutboundFrame {
        kind: message.kind.as_str(),
        id: message.id.as_deref(),
        payload: message.payload.as_ref(),
    };
    serde_json::to_string(&frame).map_err(|e| TransportError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn decode_start() {
        let msg = decode(r#"{"type":"start","id":"1","payload":{"query":"{ hello }"}}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Start);
        assert_eq!(msg.id.as_deref(), Some("1"));
        assert_eq!(msg.payload.unwrap()["query"], "{ hello }");
    }

    #[test]
    fn decode_numeric_id() {
        let msg = decode(r#"{"type":"stop","id":42}"#).unwrap();
        assert_eq!(msg.id.as_deref(), Some("42"));
    }

    #[test]
    fn decode_null_payload_is_absent() {
        let msg = decode(r#"{"type":"connection_init","payload":null}"#).unwrap();
        assert!(msg.payload.is_none());
    }

    #[test]
    fn decode_rejects_bad_json() {
        assert_matches!(decode("not json"), Err(ProtocolError::Malformed(_)));
        assert_matches!(decode(""), Err(ProtocolError::Malformed(_)));
        assert_matches!(decode("[1,2]"), Err(ProtocolError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_missing_type() {
        assert_matches!(decode(r#"{"id":"1"}"#), Err(ProtocolError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert_matches!(
            decode(r#"{"type":"launch_missiles"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "launch_missiles"
        );
    }

    #[test]
    fn decode_rejects_object_id() {
        assert_matches!(
            decode(r#"{"type":"stop","id":{"x":1}}"#),
            Err(ProtocolError::Malformed(_))
        );
    }

    #[test]
    fn encode_omits_absent_fields() {
        let text = encode(&ProtocolMessage::keep_alive()).unwrap();
        assert_eq!(text, r#"{"type":"ka"}"#);

        let text = encode(&ProtocolMessage::connection_ack()).unwrap();
        assert_eq!(text, r#"{"type":"connection_ack"}"#);
    }

    #[test]
    fn encode_operation_message() {
        let msg = ProtocolMessage::new(
            MessageType::Data,
            Some("3".into()),
            Some(json!({"data": {"n": 1}})),
        );
        let parsed: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(parsed, json!({"type": "data", "id": "3", "payload": {"data": {"n": 1}}}));
    }

    #[test]
    fn legacy_frame_decodes_to_canonical_type() {
        let msg = decode(r#"{"type":"subscription_start","id":"a","payload":{"query":"subscription { x }"}}"#)
            .unwrap();
        assert_eq!(msg.kind, MessageType::Start);
        let reencoded = encode(&msg).unwrap();
        assert!(reencoded.contains(r#""type":"start""#));
    }
}
