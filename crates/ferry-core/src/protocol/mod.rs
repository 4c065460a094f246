//! Wire protocol: envelopes, property paths and the transport codec.

pub mod codec;
pub mod envelope;
pub mod path;

pub use codec::{decode_message, decode_value, encode_response, Codec, IdentityCodec, Inbound};
pub use envelope::{
    is_valid_envelope, Command, Request, RequestId, Response, COMMAND_FIELD, REQUEST_ID_FIELD,
};
pub use path::{PropertyKey, PropertyPath, SubscriptionKey};
