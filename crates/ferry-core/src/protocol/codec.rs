//! Transport-value codec and the text boundary.
//!
//! Outbound: `Response -> serde_json::Value -> Codec::encode -> JSON text`.
//! Inbound: `JSON text -> serde_json::Value -> Codec::decode -> shape check -> Request`.
//!
//! Anything that fails before the shape check is not a protocol message and
//! is reported as `None`: the transport may carry unrelated traffic.

use super::envelope::{command_of, request_id_of, Command, Request, RequestId, Response};
use crate::error::Result;
use serde_json::Value;

/// Pluggable transform applied to envelopes at the transport boundary.
///
/// Both directions must be pure from the broker's perspective.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, value: Value) -> Result<Value>;
    fn decode(&self, value: Value) -> Result<Value>;
}

/// Codec that passes values through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn encode(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn decode(&self, value: Value) -> Result<Value> {
        Ok(value)
    }
}

/// A client message recognised at ingress.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(Request),
    /// Carries a client command discriminator but an unusable payload.
    Malformed {
        command: Command,
        request_id: Option<RequestId>,
        reason: String,
    },
}

/// Serialize a response into the text handed to an endpoint.
pub fn encode_response(codec: &dyn Codec, response: &Response) -> Result<String> {
    let value = serde_json::to_value(response)?;
    let value = codec.encode(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Decode raw transport text into a client message.
///
/// Returns `None` for text that is not JSON, that the codec rejects, or that
/// lacks a client command discriminator.
pub fn decode_message(codec: &dyn Codec, text: &str) -> Option<Inbound> {
    let value: Value = serde_json::from_str(text).ok()?;
    let value = codec.decode(value).ok()?;
    decode_value(value)
}

/// Classify an already decoded envelope value.
///
/// Batch items go through here directly; the codec applies only to the
/// outer envelope.
pub fn decode_value(value: Value) -> Option<Inbound> {
    let command = command_of(&value).filter(|c| c.is_client())?;
    let request_id = request_id_of(&value);

    match serde_json::from_value::<Request>(value) {
        Ok(request) => Some(Inbound::Request(request)),
        Err(e) => Some(Inbound::Malformed {
            command,
            request_id,
            reason: format!("Malformed {} payload: {}", command, e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FerryError;
    use serde_json::json;

    /// Wraps envelopes in `{"payload": ...}` on the way out and unwraps on the way in.
    struct WrappingCodec;

    impl Codec for WrappingCodec {
        fn encode(&self, value: Value) -> Result<Value> {
            Ok(json!({ "payload": value }))
        }

        fn decode(&self, value: Value) -> Result<Value> {
            value
                .get("payload")
                .cloned()
                .ok_or_else(|| FerryError::codec("missing payload"))
        }
    }

    #[test]
    fn test_decode_valid_request() {
        let text = r#"{"__ferry_command":"subscribeClient","__ferry_request_id":"s1","propertyPath":["a"]}"#;
        match decode_message(&IdentityCodec, text) {
            Some(Inbound::Request(Request::Subscribe { request_id, .. })) => {
                assert_eq!(request_id.as_str(), "s1")
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_foreign_traffic_is_not_a_message() {
        assert_eq!(decode_message(&IdentityCodec, "not json"), None);
        assert_eq!(decode_message(&IdentityCodec, r#"{"hello":"world"}"#), None);
        assert_eq!(decode_message(&IdentityCodec, "42"), None);
        assert_eq!(
            decode_message(&IdentityCodec, r#"{"__ferry_command":"unknown"}"#),
            None
        );
    }

    #[test]
    fn test_batch_with_bad_item_still_decodes() {
        let text = r#"{"__ferry_command":"coalesceRequestClient","__ferry_request_id":"b1","requests":[
            {"__ferry_command":"invokeClient","__ferry_request_id":"i1","propertyPath":["a"]},
            {"__ferry_command":"invokeClient","__ferry_request_id":"i2","propertyPath":"not-a-path"}
        ]}"#;
        let requests = match decode_message(&IdentityCodec, text) {
            Some(Inbound::Request(Request::Coalesce { requests, .. })) => requests,
            other => panic!("unexpected decode result: {:?}", other),
        };

        assert!(matches!(
            decode_value(requests[0].clone()),
            Some(Inbound::Request(Request::Invoke { .. }))
        ));
        assert!(matches!(
            decode_value(requests[1].clone()),
            Some(Inbound::Malformed { command: Command::InvokeClient, request_id: Some(_), .. })
        ));
    }

    #[test]
    fn test_server_envelopes_are_ignored_at_ingress() {
        let text = r#"{"__ferry_command":"invokeServerSuccess","__ferry_request_id":"x","value":1}"#;
        assert_eq!(decode_message(&IdentityCodec, text), None);
    }

    #[test]
    fn test_malformed_payload_keeps_command_and_id() {
        let text = r#"{"__ferry_command":"invokeClient","__ferry_request_id":"r2","propertyPath":"nope"}"#;
        match decode_message(&IdentityCodec, text) {
            Some(Inbound::Malformed {
                command,
                request_id,
                reason,
            }) => {
                assert_eq!(command, Command::InvokeClient);
                assert_eq!(request_id, Some(RequestId::from("r2")));
                assert!(reason.starts_with("Malformed invokeClient payload"));
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_codec_applies_in_both_directions() {
        let text = encode_response(
            &WrappingCodec,
            &Response::SubscribeSuccess {
                request_id: RequestId::from("s1"),
            },
        )
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["payload"]["__ferry_request_id"], json!("s1"));

        let inbound = r#"{"payload":{"__ferry_command":"invokeClient","__ferry_request_id":"r","propertyPath":[]}}"#;
        assert!(matches!(
            decode_message(&WrappingCodec, inbound),
            Some(Inbound::Request(Request::Invoke { .. }))
        ));
    }

    #[test]
    fn test_codec_rejection_is_silent() {
        let text = r#"{"__ferry_command":"invokeClient","__ferry_request_id":"r","propertyPath":[]}"#;
        assert_eq!(decode_message(&WrappingCodec, text), None);
    }
}
