//! Tarantool binary protocol implementation.
//!
//! This module provides the wire codec for values, the packet model with its
//! length-prefixed frame wrapper, request builders, and the handshake helpers.

mod auth;
mod codec;
pub mod constants;
pub mod msgpack;
mod packet;
mod request;

pub use auth::{scramble, Greeting};
pub use codec::{PacketCodec, DEFAULT_MAX_FRAME_SIZE};
pub use constants::*;
pub use packet::{encode_request, Body, Header, Packet};
pub use request::{IteratorType, Request, RequestType};
