//! Request types and builders.

use std::fmt;

use crate::error::{Result, TarantoolError};
use crate::value::Value;

use super::packet::Body;

/// Operation code carried in the request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestType {
    /// Select tuples by index key.
    Select = 1,
    /// Insert a tuple.
    Insert = 2,
    /// Insert or replace a tuple.
    Replace = 3,
    /// Update a tuple by key.
    Update = 4,
    /// Delete a tuple by key.
    Delete = 5,
    /// Call a stored procedure, legacy result format.
    OldCall = 6,
    /// Authenticate the session.
    Auth = 7,
    /// Evaluate a Lua expression.
    Eval = 8,
    /// Insert or update a tuple.
    Upsert = 9,
    /// Call a stored procedure.
    Call = 10,
    /// Liveness check.
    Ping = 64,
}

impl RequestType {
    /// Returns the wire code of this request type.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for RequestType {
    type Error = TarantoolError;

    fn try_from(code: u32) -> Result<Self> {
        Ok(match code {
            1 => Self::Select,
            2 => Self::Insert,
            3 => Self::Replace,
            4 => Self::Update,
            5 => Self::Delete,
            6 => Self::OldCall,
            7 => Self::Auth,
            8 => Self::Eval,
            9 => Self::Upsert,
            10 => Self::Call,
            64 => Self::Ping,
            other => {
                return Err(TarantoolError::Protocol(format!(
                    "unknown request type {}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Replace => "REPLACE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::OldCall => "OLD_CALL",
            Self::Auth => "AUTH",
            Self::Eval => "EVAL",
            Self::Upsert => "UPSERT",
            Self::Call => "CALL",
            Self::Ping => "PING",
        };
        f.write_str(name)
    }
}

/// Index iteration order for select requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum IteratorType {
    /// Keys equal to the search key.
    #[default]
    Eq = 0,
    /// Keys equal to the search key, reverse order.
    Req = 1,
    /// All keys.
    All = 2,
    /// Keys less than the search key.
    Lt = 3,
    /// Keys less than or equal to the search key.
    Le = 4,
    /// Keys greater than or equal to the search key.
    Ge = 5,
    /// Keys greater than the search key.
    Gt = 6,
    /// All bits of the search key are set.
    BitsAllSet = 7,
    /// Any bit of the search key is set.
    BitsAnySet = 8,
    /// No bit of the search key is set.
    BitsAllNotSet = 9,
    /// Rectangles overlapping the search key.
    Overlaps = 10,
    /// Points nearest to the search key.
    Neighbor = 11,
}

impl IteratorType {
    /// Returns the wire code of this iterator.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A request ready to be framed: operation code plus body fields.
///
/// The sync id is assigned at submission time, so the same request can be
/// framed again for a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    request_type: RequestType,
    body: Body,
}

impl Request {
    /// Creates a request from raw parts.
    pub fn new(request_type: RequestType, body: Body) -> Self {
        Self { request_type, body }
    }

    /// Returns the operation code.
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Returns the body fields.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Builds a select request.
    pub fn select(
        space: u32,
        index: u32,
        key: Vec<Value>,
        offset: u32,
        limit: u32,
        iterator: IteratorType,
    ) -> Self {
        Self::new(
            RequestType::Select,
            Body {
                space: Some(space),
                index: Some(index),
                key: Some(key),
                offset: Some(offset),
                limit: Some(limit),
                iterator: Some(iterator.code()),
                ..Body::default()
            },
        )
    }

    /// Builds an insert request.
    pub fn insert(space: u32, tuple: Vec<Value>) -> Self {
        Self::new(
            RequestType::Insert,
            Body {
                space: Some(space),
                tuple: Some(tuple),
                ..Body::default()
            },
        )
    }

    /// Builds a replace request.
    pub fn replace(space: u32, tuple: Vec<Value>) -> Self {
        Self::new(
            RequestType::Replace,
            Body {
                space: Some(space),
                tuple: Some(tuple),
                ..Body::default()
            },
        )
    }

    /// Builds an update request. `ops` are update operations such as
    /// `["=", 1, "new value"]`.
    pub fn update(space: u32, index: u32, key: Vec<Value>, ops: Vec<Value>) -> Self {
        Self::new(
            RequestType::Update,
            Body {
                space: Some(space),
                index: Some(index),
                key: Some(key),
                tuple: Some(ops),
                ..Body::default()
            },
        )
    }

    /// Builds an upsert request.
    pub fn upsert(space: u32, tuple: Vec<Value>, ops: Vec<Value>) -> Self {
        Self::new(
            RequestType::Upsert,
            Body {
                space: Some(space),
                tuple: Some(tuple),
                ops: Some(ops),
                ..Body::default()
            },
        )
    }

    /// Builds a delete request.
    pub fn delete(space: u32, index: u32, key: Vec<Value>) -> Self {
        Self::new(
            RequestType::Delete,
            Body {
                space: Some(space),
                index: Some(index),
                key: Some(key),
                ..Body::default()
            },
        )
    }

    /// Builds a call request using the current call format.
    pub fn call(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::call_with(RequestType::Call, function, args)
    }

    /// Builds a call request using the legacy call format, where every
    /// returned value is wrapped into a tuple.
    pub fn old_call(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::call_with(RequestType::OldCall, function, args)
    }

    fn call_with(request_type: RequestType, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(
            request_type,
            Body {
                function: Some(function.into()),
                tuple: Some(args),
                ..Body::default()
            },
        )
    }

    /// Builds an eval request.
    pub fn eval(expression: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(
            RequestType::Eval,
            Body {
                expression: Some(expression.into()),
                tuple: Some(args),
                ..Body::default()
            },
        )
    }

    /// Builds a ping request.
    pub fn ping() -> Self {
        Self::new(RequestType::Ping, Body::default())
    }

    /// Builds an authentication request carrying a CHAP-SHA1 scramble.
    pub fn auth(username: impl Into<String>, scramble: &[u8]) -> Self {
        Self::new(
            RequestType::Auth,
            Body {
                username: Some(username.into()),
                tuple: Some(vec![
                    Value::from(super::constants::CHAP_SHA1),
                    Value::binary(scramble),
                ]),
                ..Body::default()
            },
        )
    }
}
