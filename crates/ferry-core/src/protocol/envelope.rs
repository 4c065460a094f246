//! Envelope types exchanged between remote contexts and the broker.
//!
//! Every envelope is a JSON object tagged by [`COMMAND_FIELD`]. Requests flow
//! client to broker, responses (including unsolicited updates and discovery)
//! flow broker to client. The correlation id lives in [`REQUEST_ID_FIELD`] and
//! is echoed back untouched.
//!
//! ```text
//! {"__ferry_command":"invokeClient","__ferry_request_id":"7","propertyPath":["math","add"],"args":[1,2]}
//! {"__ferry_command":"invokeServerSuccess","__ferry_request_id":"7","value":3}
//! ```

use super::path::PropertyPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the discriminator field carried by every envelope.
pub const COMMAND_FIELD: &str = "__ferry_command";

/// Name of the correlation id field.
pub const REQUEST_ID_FIELD: &str = "__ferry_request_id";

/// Opaque correlation token chosen by the remote caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Command discriminators known to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    InvokeClient,
    InvokeServerSuccess,
    InvokeServerError,
    SubscribeClient,
    SubscribeServerSuccess,
    SubscribeServerError,
    SubscribeServerUpdate,
    UnsubscribeClient,
    UnsubscribeServerSuccess,
    UnsubscribeServerError,
    CoalesceRequestClient,
    CoalesceRequestServer,
    DiscoveryServer,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::InvokeClient,
        Command::InvokeServerSuccess,
        Command::InvokeServerError,
        Command::SubscribeClient,
        Command::SubscribeServerSuccess,
        Command::SubscribeServerError,
        Command::SubscribeServerUpdate,
        Command::UnsubscribeClient,
        Command::UnsubscribeServerSuccess,
        Command::UnsubscribeServerError,
        Command::CoalesceRequestClient,
        Command::CoalesceRequestServer,
        Command::DiscoveryServer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::InvokeClient => "invokeClient",
            Command::InvokeServerSuccess => "invokeServerSuccess",
            Command::InvokeServerError => "invokeServerError",
            Command::SubscribeClient => "subscribeClient",
            Command::SubscribeServerSuccess => "subscribeServerSuccess",
            Command::SubscribeServerError => "subscribeServerError",
            Command::SubscribeServerUpdate => "subscribeServerUpdate",
            Command::UnsubscribeClient => "unsubscribeClient",
            Command::UnsubscribeServerSuccess => "unsubscribeServerSuccess",
            Command::UnsubscribeServerError => "unsubscribeServerError",
            Command::CoalesceRequestClient => "coalesceRequestClient",
            Command::CoalesceRequestServer => "coalesceRequestServer",
            Command::DiscoveryServer => "discoveryServer",
        }
    }

    pub fn parse(name: &str) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// True for commands a remote context may send to the broker.
    pub fn is_client(self) -> bool {
        matches!(
            self,
            Command::InvokeClient
                | Command::SubscribeClient
                | Command::UnsubscribeClient
                | Command::CoalesceRequestClient
        )
    }

    /// Error response answering a client command whose payload was unusable.
    ///
    /// Batches have no error variant of their own and are answered with an
    /// empty aggregate. Server commands yield `None`.
    pub fn error_response(self, request_id: RequestId, reason: String) -> Option<Response> {
        match self {
            Command::InvokeClient => Some(Response::InvokeError { reason, request_id }),
            Command::SubscribeClient => Some(Response::SubscribeError { reason, request_id }),
            Command::UnsubscribeClient => Some(Response::UnsubscribeError { reason, request_id }),
            Command::CoalesceRequestClient => Some(Response::Coalesce {
                responses: Vec::new(),
                request_id,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope sent by a remote context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__ferry_command")]
pub enum Request {
    #[serde(rename = "invokeClient", rename_all = "camelCase")]
    Invoke {
        property_path: PropertyPath,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "subscribeClient", rename_all = "camelCase")]
    Subscribe {
        property_path: PropertyPath,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "unsubscribeClient", rename_all = "camelCase")]
    Unsubscribe {
        property_path: PropertyPath,
        /// Id of the subscribe request that created the listener.
        subscription_request_id: RequestId,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "coalesceRequestClient", rename_all = "camelCase")]
    Coalesce {
        /// Raw sub-requests, decoded one by one so a bad item only affects itself.
        requests: Vec<Value>,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Invoke { .. } => Command::InvokeClient,
            Request::Subscribe { .. } => Command::SubscribeClient,
            Request::Unsubscribe { .. } => Command::UnsubscribeClient,
            Request::Coalesce { .. } => Command::CoalesceRequestClient,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Request::Invoke { request_id, .. }
            | Request::Subscribe { request_id, .. }
            | Request::Unsubscribe { request_id, .. }
            | Request::Coalesce { request_id, .. } => request_id,
        }
    }
}

/// Envelope sent by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__ferry_command")]
pub enum Response {
    #[serde(rename = "invokeServerSuccess")]
    InvokeSuccess {
        #[serde(default)]
        value: Value,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "invokeServerError")]
    InvokeError {
        reason: String,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "subscribeServerSuccess")]
    SubscribeSuccess {
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "subscribeServerError")]
    SubscribeError {
        reason: String,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    /// Pushed value change, tagged with the listener's subscribe request id.
    #[serde(rename = "subscribeServerUpdate")]
    SubscribeUpdate {
        #[serde(default)]
        value: Value,
        #[serde(rename = "__ferry_request_id")]
        subscription_request_id: RequestId,
    },

    #[serde(rename = "unsubscribeServerSuccess")]
    UnsubscribeSuccess {
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "unsubscribeServerError")]
    UnsubscribeError {
        reason: String,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "coalesceRequestServer")]
    Coalesce {
        responses: Vec<Response>,
        #[serde(rename = "__ferry_request_id")]
        request_id: RequestId,
    },

    #[serde(rename = "discoveryServer")]
    Discovery,
}

impl Response {
    pub fn command(&self) -> Command {
        match self {
            Response::InvokeSuccess { .. } => Command::InvokeServerSuccess,
            Response::InvokeError { .. } => Command::InvokeServerError,
            Response::SubscribeSuccess { .. } => Command::SubscribeServerSuccess,
            Response::SubscribeError { .. } => Command::SubscribeServerError,
            Response::SubscribeUpdate { .. } => Command::SubscribeServerUpdate,
            Response::UnsubscribeSuccess { .. } => Command::UnsubscribeServerSuccess,
            Response::UnsubscribeError { .. } => Command::UnsubscribeServerError,
            Response::Coalesce { .. } => Command::CoalesceRequestServer,
            Response::Discovery => Command::DiscoveryServer,
        }
    }

    /// Correlation id carried by this response, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Response::InvokeSuccess { request_id, .. }
            | Response::InvokeError { request_id, .. }
            | Response::SubscribeSuccess { request_id }
            | Response::SubscribeError { request_id, .. }
            | Response::UnsubscribeSuccess { request_id }
            | Response::UnsubscribeError { request_id, .. }
            | Response::Coalesce { request_id, .. } => Some(request_id),
            Response::SubscribeUpdate {
                subscription_request_id,
                ..
            } => Some(subscription_request_id),
            Response::Discovery => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Response::InvokeError { .. }
                | Response::SubscribeError { .. }
                | Response::UnsubscribeError { .. }
        )
    }
}

/// Read the command discriminator of a decoded transport value.
pub fn command_of(value: &Value) -> Option<Command> {
    value
        .get(COMMAND_FIELD)
        .and_then(Value::as_str)
        .and_then(Command::parse)
}

/// Shape check applied before a value is treated as a protocol message.
///
/// Only the discriminator is inspected; payload shape is checked when the
/// value is parsed into a [`Request`].
pub fn is_valid_envelope(value: &Value) -> bool {
    command_of(value).is_some()
}

/// Read the correlation id of a decoded transport value without parsing the rest.
pub fn request_id_of(value: &Value) -> Option<RequestId> {
    value
        .get(REQUEST_ID_FIELD)
        .and_then(Value::as_str)
        .map(RequestId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invoke_request_wire_shape() {
        let raw = json!({
            "__ferry_command": "invokeClient",
            "__ferry_request_id": "r1",
            "propertyPath": ["math", "add"],
            "args": [1, 2]
        });
        let request: Request = serde_json::from_value(raw.clone()).unwrap();

        match &request {
            Request::Invoke {
                property_path,
                args,
                request_id,
            } => {
                assert_eq!(property_path.len(), 2);
                assert_eq!(args, &vec![json!(1), json!(2)]);
                assert_eq!(request_id.as_str(), "r1");
            }
            other => panic!("unexpected request: {:?}", other),
        }
        assert_eq!(serde_json::to_value(&request).unwrap(), raw);
    }

    #[test]
    fn test_invoke_args_default_to_empty() {
        let request: Request = serde_json::from_value(json!({
            "__ferry_command": "invokeClient",
            "__ferry_request_id": "r1",
            "propertyPath": ["version"]
        }))
        .unwrap();
        assert!(matches!(request, Request::Invoke { ref args, .. } if args.is_empty()));
    }

    #[test]
    fn test_unsubscribe_carries_both_ids() {
        let request: Request = serde_json::from_value(json!({
            "__ferry_command": "unsubscribeClient",
            "__ferry_request_id": "u9",
            "propertyPath": ["clock"],
            "subscriptionRequestId": "s1"
        }))
        .unwrap();
        assert_eq!(request.command(), Command::UnsubscribeClient);
        assert_eq!(request.request_id().as_str(), "u9");
        assert!(matches!(
            request,
            Request::Unsubscribe { ref subscription_request_id, .. } if subscription_request_id.as_str() == "s1"
        ));
    }

    #[test]
    fn test_coalesce_request_keeps_items_raw() {
        let request: Request = serde_json::from_value(json!({
            "__ferry_command": "coalesceRequestClient",
            "__ferry_request_id": "batch",
            "requests": [
                {"__ferry_command": "invokeClient", "__ferry_request_id": "a", "propertyPath": ["x"]},
                {"__ferry_command": "subscribeClient", "__ferry_request_id": "b", "propertyPath": ["y"]}
            ]
        }))
        .unwrap();
        match request {
            Request::Coalesce { requests, .. } => {
                assert_eq!(requests.len(), 2);
                assert_eq!(command_of(&requests[0]), Some(Command::InvokeClient));
                assert_eq!(command_of(&requests[1]), Some(Command::SubscribeClient));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_update_uses_request_id_field() {
        let update = Response::SubscribeUpdate {
            value: json!(5),
            subscription_request_id: RequestId::from("s1"),
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"__ferry_command": "subscribeServerUpdate", "__ferry_request_id": "s1", "value": 5})
        );
    }

    #[test]
    fn test_discovery_has_no_request_id() {
        let value = serde_json::to_value(Response::Discovery).unwrap();
        assert_eq!(value, json!({"__ferry_command": "discoveryServer"}));
        assert_eq!(Response::Discovery.request_id(), None);
    }

    #[test]
    fn test_serialized_tag_matches_command() {
        let id = RequestId::from("x");
        let responses = vec![
            Response::InvokeSuccess { value: json!(null), request_id: id.clone() },
            Response::InvokeError { reason: "e".into(), request_id: id.clone() },
            Response::SubscribeSuccess { request_id: id.clone() },
            Response::SubscribeError { reason: "e".into(), request_id: id.clone() },
            Response::SubscribeUpdate { value: json!(1), subscription_request_id: id.clone() },
            Response::UnsubscribeSuccess { request_id: id.clone() },
            Response::UnsubscribeError { reason: "e".into(), request_id: id.clone() },
            Response::Coalesce { responses: vec![], request_id: id.clone() },
            Response::Discovery,
        ];
        for response in responses {
            let value = serde_json::to_value(&response).unwrap();
            assert_eq!(command_of(&value), Some(response.command()));
            assert!(!response.command().is_client());
        }
    }

    #[test]
    fn test_command_names_roundtrip() {
        for command in Command::ALL {
            assert_eq!(Command::parse(command.as_str()), Some(command));
        }
        assert_eq!(Command::parse("somethingElse"), None);
    }

    #[test]
    fn test_envelope_validation() {
        assert!(is_valid_envelope(&json!({"__ferry_command": "invokeClient"})));
        assert!(is_valid_envelope(&json!({"__ferry_command": "discoveryServer"})));
        assert!(!is_valid_envelope(&json!({"type": "invokeClient"})));
        assert!(!is_valid_envelope(&json!({"__ferry_command": 3})));
        assert!(!is_valid_envelope(&json!({"__ferry_command": "nope"})));
        assert!(!is_valid_envelope(&json!("invokeClient")));
        assert!(!is_valid_envelope(&json!(null)));
    }

    #[test]
    fn test_error_response_per_command() {
        let id = RequestId::from("r");
        assert!(matches!(
            Command::InvokeClient.error_response(id.clone(), "bad".into()),
            Some(Response::InvokeError { .. })
        ));
        assert!(matches!(
            Command::SubscribeClient.error_response(id.clone(), "bad".into()),
            Some(Response::SubscribeError { .. })
        ));
        assert!(matches!(
            Command::UnsubscribeClient.error_response(id.clone(), "bad".into()),
            Some(Response::UnsubscribeError { .. })
        ));
        assert_eq!(
            Command::CoalesceRequestClient.error_response(id.clone(), "bad".into()),
            Some(Response::Coalesce {
                responses: vec![],
                request_id: id.clone()
            })
        );
        assert_eq!(Command::DiscoveryServer.error_response(id, "bad".into()), None);
    }

    #[test]
    fn test_field_constants_match_serde_names() {
        let value = serde_json::to_value(Response::SubscribeSuccess {
            request_id: RequestId::from("z"),
        })
        .unwrap();
        assert!(value.get(COMMAND_FIELD).is_some());
        assert_eq!(request_id_of(&value), Some(RequestId::from("z")));
    }
}
