//! Ferry Host - serves a ferry broker over local TCP.
//!
//! One TCP connection is one client endpoint. Envelopes travel as
//! length-prefixed UTF-8 JSON frames, and the broker's handlers are backed by
//! a shared [`DocumentStore`].

pub mod config;
pub mod error;
pub mod framing;
pub mod server;
pub mod store;

pub use config::HostConfig;
pub use error::{HostError, Result};
pub use framing::{read_frame, read_text_frame, write_frame, FrameHeader};
pub use server::{HostServer, HostServerHandle};
pub use store::DocumentStore;
