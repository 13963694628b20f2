#![forbid(unsafe_code)]

//! Upstream IRC client: wire messages, line codec and the per-network connection task.

pub mod client;
pub mod codec;
pub mod message;

pub use client::{UpstreamConfig, UpstreamControl, UpstreamHandle};
pub use codec::{CodecError, IrcCodec, MAX_LINE_LENGTH};
pub use message::{Message, MessageParseError, strip_formatting};
