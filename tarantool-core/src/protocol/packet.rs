//! Packet model: fixed-field header and body structs plus the frame wrapper.
//!
//! On the wire each frame is `[0xCE][u32 length][header map][body map]`,
//! where `length` counts the header and body bytes. Both maps use small
//! integer keys. In memory they are plain structs with optional fields.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::*;
use super::msgpack;
use super::request::Request;
use crate::error::{Result, TarantoolError};
use crate::value::Value;

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Request type on requests, response code on responses.
    pub code: u32,
    /// Correlation id echoed by the server.
    pub sync: u64,
    /// Schema version, if present.
    pub schema_id: Option<u64>,
}

/// Packet body. Requests and responses use disjoint subsets of the fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    /// Space id.
    pub space: Option<u32>,
    /// Index id.
    pub index: Option<u32>,
    /// Select limit.
    pub limit: Option<u32>,
    /// Select offset.
    pub offset: Option<u32>,
    /// Select iterator code.
    pub iterator: Option<u32>,
    /// Index key.
    pub key: Option<Vec<Value>>,
    /// Tuple, update operations, or call/eval arguments.
    pub tuple: Option<Vec<Value>>,
    /// Function name for calls.
    pub function: Option<String>,
    /// User name for authentication.
    pub username: Option<String>,
    /// Lua expression for eval.
    pub expression: Option<String>,
    /// Upsert operations.
    pub ops: Option<Vec<Value>>,
    /// Result payload of a successful response.
    pub data: Option<Value>,
    /// Error message of a failed response.
    pub error: Option<String>,
}

/// A complete packet: header plus body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    /// Header fields.
    pub header: Header,
    /// Body fields.
    pub body: Body,
}

impl Header {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let len = if self.schema_id.is_some() { 3 } else { 2 };
        msgpack::encode_map_len(len, dst)?;
        msgpack::encode_u64(KEY_CODE, dst);
        msgpack::encode_u64(u64::from(self.code), dst);
        msgpack::encode_u64(KEY_SYNC, dst);
        msgpack::encode_u64(self.sync, dst);
        if let Some(schema_id) = self.schema_id {
            msgpack::encode_u64(KEY_SCHEMA_ID, dst);
            msgpack::encode_u64(schema_id, dst);
        }
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let entries = expect_map(msgpack::decode(src)?, "header")?;
        let mut code = None;
        let mut sync = None;
        let mut schema_id = None;
        for (key, value) in entries {
            match key.as_u64() {
                Some(KEY_CODE) => code = Some(expect_u32(&value, "code")?),
                Some(KEY_SYNC) => sync = Some(expect_u64(&value, "sync")?),
                Some(KEY_SCHEMA_ID) => schema_id = Some(expect_u64(&value, "schema id")?),
                _ => {}
            }
        }
        Ok(Self {
            code: code.ok_or_else(|| missing("code"))?,
            sync: sync.ok_or_else(|| missing("sync"))?,
            schema_id,
        })
    }
}

impl Body {
    fn field_count(&self) -> usize {
        [
            self.space.is_some(),
            self.index.is_some(),
            self.limit.is_some(),
            self.offset.is_some(),
            self.iterator.is_some(),
            self.key.is_some(),
            self.tuple.is_some(),
            self.function.is_some(),
            self.username.is_some(),
            self.expression.is_some(),
            self.ops.is_some(),
            self.data.is_some(),
            self.error.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        msgpack::encode_map_len(self.field_count(), dst)?;

        let uints = [
            (KEY_SPACE, self.space),
            (KEY_INDEX, self.index),
            (KEY_LIMIT, self.limit),
            (KEY_OFFSET, self.offset),
            (KEY_ITERATOR, self.iterator),
        ];
        for (key, value) in uints {
            if let Some(v) = value {
                msgpack::encode_u64(key, dst);
                msgpack::encode_u64(u64::from(v), dst);
            }
        }

        encode_array_field(dst, KEY_KEY, self.key.as_deref())?;
        encode_array_field(dst, KEY_TUPLE, self.tuple.as_deref())?;
        encode_str_field(dst, KEY_FUNCTION, self.function.as_deref())?;
        encode_str_field(dst, KEY_USERNAME, self.username.as_deref())?;
        encode_str_field(dst, KEY_EXPRESSION, self.expression.as_deref())?;
        encode_array_field(dst, KEY_UPSERT_OPS, self.ops.as_deref())?;
        if let Some(data) = &self.data {
            msgpack::encode_u64(KEY_DATA, dst);
            msgpack::encode(data, dst)?;
        }
        encode_str_field(dst, KEY_ERROR, self.error.as_deref())?;
        Ok(())
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        let entries = expect_map(msgpack::decode(src)?, "body")?;
        let mut body = Body::default();
        for (key, value) in entries {
            match key.as_u64() {
                Some(KEY_SPACE) => body.space = Some(expect_u32(&value, "space")?),
                Some(KEY_INDEX) => body.index = Some(expect_u32(&value, "index")?),
                Some(KEY_LIMIT) => body.limit = Some(expect_u32(&value, "limit")?),
                Some(KEY_OFFSET) => body.offset = Some(expect_u32(&value, "offset")?),
                Some(KEY_ITERATOR) => body.iterator = Some(expect_u32(&value, "iterator")?),
                Some(KEY_KEY) => body.key = Some(expect_array(value, "key")?),
                Some(KEY_TUPLE) => body.tuple = Some(expect_array(value, "tuple")?),
                Some(KEY_FUNCTION) => body.function = Some(expect_text(value, "function")?),
                Some(KEY_USERNAME) => body.username = Some(expect_text(value, "username")?),
                Some(KEY_EXPRESSION) => body.expression = Some(expect_text(value, "expression")?),
                Some(KEY_UPSERT_OPS) => body.ops = Some(expect_array(value, "ops")?),
                Some(KEY_DATA) => body.data = Some(value),
                Some(KEY_ERROR) => body.error = Some(expect_text(value, "error")?),
                // Newer servers send extra keys (e.g. extended error info).
                _ => {}
            }
        }
        Ok(body)
    }
}

impl Packet {
    /// Creates a request packet for the given sync id.
    pub fn request(sync: u64, schema_id: Option<u64>, request: &Request) -> Self {
        Self {
            header: Header {
                code: request.request_type().code(),
                sync,
                schema_id,
            },
            body: request.body().clone(),
        }
    }

    /// Creates a successful response packet.
    pub fn ok_response(sync: u64, schema_id: Option<u64>, data: Value) -> Self {
        Self {
            header: Header { code: 0, sync, schema_id },
            body: Body {
                data: Some(data),
                ..Body::default()
            },
        }
    }

    /// Creates an error response packet. `code` is the plain error code.
    pub fn error_response(sync: u64, code: u32, message: impl Into<String>) -> Self {
        Self {
            header: Header {
                code: ERROR_TYPE_MARKER | code,
                sync,
                schema_id: None,
            },
            body: Body {
                error: Some(message.into()),
                ..Body::default()
            },
        }
    }

    /// Appends this packet as one frame to `dst`.
    ///
    /// The length prefix is always the 5-byte form. It is written as a
    /// placeholder and patched once header and body have been encoded.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        dst.put_u8(FRAME_MARKER);
        dst.put_u32(0);
        self.header.encode(dst)?;
        self.body.encode(dst)?;

        let payload_len = dst.len() - start - FRAME_PREFIX_SIZE;
        let payload_len = u32::try_from(payload_len).map_err(|_| {
            TarantoolError::UnsupportedType(format!(
                "packet of {} bytes exceeds the frame size limit",
                payload_len
            ))
        })?;
        dst[start + 1..start + FRAME_PREFIX_SIZE].copy_from_slice(&payload_len.to_be_bytes());
        Ok(())
    }

    /// Decodes a packet from a frame payload (the bytes after the prefix).
    pub fn decode_payload(mut payload: &[u8]) -> Result<Self> {
        let header = Header::decode(&mut payload)?;
        let body = if payload.is_empty() {
            Body::default()
        } else {
            Body::decode(&mut payload)?
        };
        if !payload.is_empty() {
            return Err(TarantoolError::Protocol(format!(
                "{} trailing bytes after packet body",
                payload.len()
            )));
        }
        Ok(Self { header, body })
    }

    /// Returns true if the response code marks a failure.
    pub fn is_error(&self) -> bool {
        self.header.code != 0
    }

    /// Converts a response into the call outcome: the `DATA` field on success,
    /// a server error otherwise.
    pub fn into_result(self) -> Result<Value> {
        if self.header.code == 0 {
            return Ok(self.body.data.unwrap_or(Value::Nil));
        }
        Err(TarantoolError::Server {
            code: self.header.code & !ERROR_TYPE_MARKER,
            message: self
                .body
                .error
                .unwrap_or_else(|| "unknown server error".to_string()),
        })
    }
}

/// Frames a request under `sync` into a new buffer of the given capacity.
pub fn encode_request(
    sync: u64,
    schema_id: Option<u64>,
    request: &Request,
    capacity: usize,
) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(capacity);
    Packet::request(sync, schema_id, request).encode(&mut buf)?;
    Ok(buf)
}

fn encode_array_field(dst: &mut BytesMut, key: u64, items: Option<&[Value]>) -> Result<()> {
    if let Some(items) = items {
        msgpack::encode_u64(key, dst);
        msgpack::encode_array_len(items.len(), dst)?;
        for item in items {
            msgpack::encode(item, dst)?;
        }
    }
    Ok(())
}

fn encode_str_field(dst: &mut BytesMut, key: u64, text: Option<&str>) -> Result<()> {
    if let Some(text) = text {
        msgpack::encode_u64(key, dst);
        msgpack::encode_str(text, dst)?;
    }
    Ok(())
}

fn missing(field: &str) -> TarantoolError {
    TarantoolError::Protocol(format!("packet header has no {} field", field))
}

fn expect_map(value: Value, what: &str) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::Map(entries) => Ok(entries),
        other => Err(TarantoolError::Protocol(format!(
            "expected {} map, got {}",
            what, other
        ))),
    }
}

fn expect_u64(value: &Value, what: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| TarantoolError::Protocol(format!("{} is not an unsigned integer", what)))
}

fn expect_u32(value: &Value, what: &str) -> Result<u32> {
    u32::try_from(expect_u64(value, what)?)
        .map_err(|_| TarantoolError::Protocol(format!("{} does not fit 32 bits", what)))
}

fn expect_array(value: Value, what: &str) -> Result<Vec<Value>> {
    value
        .into_array()
        .ok_or_else(|| TarantoolError::Protocol(format!("{} is not an array", what)))
}

fn expect_text(value: Value, what: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Binary(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
        _ => Err(TarantoolError::Protocol(format!("{} is not a string", what))),
    }
}
