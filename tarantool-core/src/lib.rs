//! Core types and protocol for the Tarantool binary protocol.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;
pub mod value;

pub use error::{Result, TarantoolError};
pub use value::{Integer, Value};
