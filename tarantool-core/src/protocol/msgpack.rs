//! MessagePack encoding and decoding of [`Value`]s.
//!
//! Integers, string/binary lengths and container sizes always use the
//! smallest representation that fits. Decoding reads exactly one value and
//! leaves any trailing bytes in the buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TarantoolError};
use crate::value::{Integer, Value};

const NIL: u8 = 0xc0;
const FALSE: u8 = 0xc2;
const TRUE: u8 = 0xc3;
const BIN8: u8 = 0xc4;
const BIN16: u8 = 0xc5;
const BIN32: u8 = 0xc6;
const EXT8: u8 = 0xc7;
const EXT16: u8 = 0xc8;
const EXT32: u8 = 0xc9;
const FLOAT32: u8 = 0xca;
const FLOAT64: u8 = 0xcb;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;
const INT8: u8 = 0xd0;
const INT16: u8 = 0xd1;
const INT32: u8 = 0xd2;
const INT64: u8 = 0xd3;
const FIXEXT1: u8 = 0xd4;
const FIXEXT2: u8 = 0xd5;
const FIXEXT4: u8 = 0xd6;
const FIXEXT8: u8 = 0xd7;
const FIXEXT16: u8 = 0xd8;
const STR8: u8 = 0xd9;
const STR16: u8 = 0xda;
const STR32: u8 = 0xdb;
const ARRAY16: u8 = 0xdc;
const ARRAY32: u8 = 0xdd;
const MAP16: u8 = 0xde;
const MAP32: u8 = 0xdf;

const FIXMAP_PREFIX: u8 = 0x80;
const FIXARRAY_PREFIX: u8 = 0x90;
const FIXSTR_PREFIX: u8 = 0xa0;

/// Maximum container nesting accepted by the decoder.
///
/// Decoding recurses once per level, so this stays well inside a 2 MiB
/// tokio worker stack even in unoptimised builds.
pub const MAX_DEPTH: usize = 128;

/// Encodes a value, appending it to `dst`.
pub fn encode(value: &Value, dst: &mut BytesMut) -> Result<()> {
    match value {
        Value::Nil => dst.put_u8(NIL),
        Value::Boolean(b) => dst.put_u8(if *b { TRUE } else { FALSE }),
        Value::Integer(i) => encode_integer(*i, dst),
        Value::F32(v) => {
            dst.put_u8(FLOAT32);
            dst.put_f32(*v);
        }
        Value::F64(v) => {
            dst.put_u8(FLOAT64);
            dst.put_f64(*v);
        }
        Value::String(s) => encode_str(s, dst)?,
        Value::Binary(b) => encode_bin(b, dst)?,
        Value::Array(items) => {
            encode_array_len(items.len(), dst)?;
            for item in items {
                encode(item, dst)?;
            }
        }
        Value::Map(entries) => {
            encode_map_len(entries.len(), dst)?;
            for (k, v) in entries {
                encode(k, dst)?;
                encode(v, dst)?;
            }
        }
        Value::Ext(ty, data) => encode_ext(*ty, data, dst)?,
    }
    Ok(())
}

/// Encodes a value into a freshly allocated buffer.
pub fn to_bytes(value: &Value) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    encode(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encodes an unsigned integer.
pub fn encode_u64(v: u64, dst: &mut BytesMut) {
    if v <= 0x7f {
        dst.put_u8(v as u8);
    } else if v <= u64::from(u8::MAX) {
        dst.put_u8(UINT8);
        dst.put_u8(v as u8);
    } else if v <= u64::from(u16::MAX) {
        dst.put_u8(UINT16);
        dst.put_u16(v as u16);
    } else if v <= u64::from(u32::MAX) {
        dst.put_u8(UINT32);
        dst.put_u32(v as u32);
    } else {
        dst.put_u8(UINT64);
        dst.put_u64(v);
    }
}

/// Encodes a signed integer. Non-negative values use the unsigned forms.
pub fn encode_i64(v: i64, dst: &mut BytesMut) {
    if v >= 0 {
        encode_u64(v as u64, dst);
    } else if v >= -32 {
        dst.put_i8(v as i8);
    } else if v >= i64::from(i8::MIN) {
        dst.put_u8(INT8);
        dst.put_i8(v as i8);
    } else if v >= i64::from(i16::MIN) {
        dst.put_u8(INT16);
        dst.put_i16(v as i16);
    } else if v >= i64::from(i32::MIN) {
        dst.put_u8(INT32);
        dst.put_i32(v as i32);
    } else {
        dst.put_u8(INT64);
        dst.put_i64(v);
    }
}

fn encode_integer(i: Integer, dst: &mut BytesMut) {
    match i.as_u64() {
        Some(v) => encode_u64(v, dst),
        // Negative integers always fit i64.
        None => encode_i64(i.as_i64().unwrap_or(i64::MIN), dst),
    }
}

fn checked_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        TarantoolError::UnsupportedType(format!(
            "{} of length {} exceeds the 32-bit size limit",
            what, len
        ))
    })
}

/// Encodes a UTF-8 string.
pub fn encode_str(s: &str, dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(s.len(), "string")?;
    if len < 32 {
        dst.put_u8(FIXSTR_PREFIX | len as u8);
    } else if len <= u32::from(u8::MAX) {
        dst.put_u8(STR8);
        dst.put_u8(len as u8);
    } else if len <= u32::from(u16::MAX) {
        dst.put_u8(STR16);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(STR32);
        dst.put_u32(len);
    }
    dst.put_slice(s.as_bytes());
    Ok(())
}

/// Encodes raw bytes.
pub fn encode_bin(b: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(b.len(), "binary")?;
    if len <= u32::from(u8::MAX) {
        dst.put_u8(BIN8);
        dst.put_u8(len as u8);
    } else if len <= u32::from(u16::MAX) {
        dst.put_u8(BIN16);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(BIN32);
        dst.put_u32(len);
    }
    dst.put_slice(b);
    Ok(())
}

/// Encodes an array header for `len` elements.
pub fn encode_array_len(len: usize, dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(len, "array")?;
    if len < 16 {
        dst.put_u8(FIXARRAY_PREFIX | len as u8);
    } else if len <= u32::from(u16::MAX) {
        dst.put_u8(ARRAY16);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(ARRAY32);
        dst.put_u32(len);
    }
    Ok(())
}

/// Encodes a map header for `len` key/value pairs.
pub fn encode_map_len(len: usize, dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(len, "map")?;
    if len < 16 {
        dst.put_u8(FIXMAP_PREFIX | len as u8);
    } else if len <= u32::from(u16::MAX) {
        dst.put_u8(MAP16);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(MAP32);
        dst.put_u32(len);
    }
    Ok(())
}

fn encode_ext(ty: i8, data: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(data.len(), "extension")?;
    match len {
        1 => dst.put_u8(FIXEXT1),
        2 => dst.put_u8(FIXEXT2),
        4 => dst.put_u8(FIXEXT4),
        8 => dst.put_u8(FIXEXT8),
        16 => dst.put_u8(FIXEXT16),
        n if n <= u32::from(u8::MAX) => {
            dst.put_u8(EXT8);
            dst.put_u8(n as u8);
        }
        n if n <= u32::from(u16::MAX) => {
            dst.put_u8(EXT16);
            dst.put_u16(n as u16);
        }
        n => {
            dst.put_u8(EXT32);
            dst.put_u32(n);
        }
    }
    dst.put_i8(ty);
    dst.put_slice(data);
    Ok(())
}

/// Decodes exactly one value from the front of `src`.
pub fn decode<B: Buf>(src: &mut B) -> Result<Value> {
    decode_at_depth(src, 0)
}

/// Decodes one value from a byte slice, ignoring trailing bytes.
pub fn from_slice(mut data: &[u8]) -> Result<Value> {
    decode(&mut data)
}

fn ensure<B: Buf>(src: &B, n: usize) -> Result<()> {
    if src.remaining() < n {
        Err(TarantoolError::Protocol(format!(
            "truncated value: need {} bytes, have {}",
            n,
            src.remaining()
        )))
    } else {
        Ok(())
    }
}

fn read_u8<B: Buf>(src: &mut B) -> Result<u8> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

fn read_u16<B: Buf>(src: &mut B) -> Result<u16> {
    ensure(src, 2)?;
    Ok(src.get_u16())
}

fn read_u32<B: Buf>(src: &mut B) -> Result<u32> {
    ensure(src, 4)?;
    Ok(src.get_u32())
}

fn read_raw<B: Buf>(src: &mut B, len: usize) -> Result<Vec<u8>> {
    ensure(src, len)?;
    let mut out = vec![0u8; len];
    src.copy_to_slice(&mut out);
    Ok(out)
}

fn read_string<B: Buf>(src: &mut B, len: usize) -> Result<Value> {
    let raw = read_raw(src, len)?;
    String::from_utf8(raw)
        .map(Value::String)
        .map_err(|e| TarantoolError::Protocol(format!("invalid UTF-8 in string: {}", e)))
}

fn read_ext<B: Buf>(src: &mut B, len: usize) -> Result<Value> {
    ensure(src, 1)?;
    let ty = src.get_i8();
    Ok(Value::Ext(ty, read_raw(src, len)?))
}

fn decode_at_depth<B: Buf>(src: &mut B, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(TarantoolError::Protocol(format!(
            "value nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }

    let tag = read_u8(src)?;
    let value = match tag {
        0x00..=0x7f => Value::from(tag),
        0x80..=0x8f => decode_map(src, usize::from(tag & 0x0f), depth)?,
        0x90..=0x9f => decode_array(src, usize::from(tag & 0x0f), depth)?,
        0xa0..=0xbf => read_string(src, usize::from(tag & 0x1f))?,
        NIL => Value::Nil,
        FALSE => Value::Boolean(false),
        TRUE => Value::Boolean(true),
        BIN8 => {
            let len = read_u8(src)?;
            Value::Binary(read_raw(src, usize::from(len))?)
        }
        BIN16 => {
            let len = read_u16(src)?;
            Value::Binary(read_raw(src, usize::from(len))?)
        }
        BIN32 => {
            let len = read_u32(src)?;
            Value::Binary(read_raw(src, len as usize)?)
        }
        EXT8 => {
            let len = read_u8(src)?;
            read_ext(src, usize::from(len))?
        }
        EXT16 => {
            let len = read_u16(src)?;
            read_ext(src, usize::from(len))?
        }
        EXT32 => {
            let len = read_u32(src)?;
            read_ext(src, len as usize)?
        }
        FLOAT32 => {
            ensure(src, 4)?;
            Value::F32(src.get_f32())
        }
        FLOAT64 => {
            ensure(src, 8)?;
            Value::F64(src.get_f64())
        }
        UINT8 => Value::from(read_u8(src)?),
        UINT16 => Value::from(read_u16(src)?),
        UINT32 => Value::from(read_u32(src)?),
        UINT64 => {
            ensure(src, 8)?;
            Value::from(src.get_u64())
        }
        INT8 => {
            ensure(src, 1)?;
            Value::from(src.get_i8())
        }
        INT16 => {
            ensure(src, 2)?;
            Value::from(src.get_i16())
        }
        INT32 => {
            ensure(src, 4)?;
            Value::from(src.get_i32())
        }
        INT64 => {
            ensure(src, 8)?;
            Value::from(src.get_i64())
        }
        FIXEXT1 => read_ext(src, 1)?,
        FIXEXT2 => read_ext(src, 2)?,
        FIXEXT4 => read_ext(src, 4)?,
        FIXEXT8 => read_ext(src, 8)?,
        FIXEXT16 => read_ext(src, 16)?,
        STR8 => {
            let len = read_u8(src)?;
            read_string(src, usize::from(len))?
        }
        STR16 => {
            let len = read_u16(src)?;
            read_string(src, usize::from(len))?
        }
        STR32 => {
            let len = read_u32(src)?;
            read_string(src, len as usize)?
        }
        ARRAY16 => {
            let len = read_u16(src)?;
            decode_array(src, usize::from(len), depth)?
        }
        ARRAY32 => {
            let len = read_u32(src)?;
            decode_array(src, len as usize, depth)?
        }
        MAP16 => {
            let len = read_u16(src)?;
            decode_map(src, usize::from(len), depth)?
        }
        MAP32 => {
            let len = read_u32(src)?;
            decode_map(src, len as usize, depth)?
        }
        0xe0..=0xff => Value::from(tag as i8),
        other => {
            return Err(TarantoolError::Protocol(format!(
                "unknown type tag 0x{:02x}",
                other
            )))
        }
    };
    Ok(value)
}

fn decode_array<B: Buf>(src: &mut B, len: usize, depth: usize) -> Result<Value> {
    // Every element takes at least one byte.
    let mut items = Vec::with_capacity(len.min(src.remaining()));
    for _ in 0..len {
        items.push(decode_at_depth(src, depth + 1)?);
    }
    Ok(Value::Array(items))
}

fn decode_map<B: Buf>(src: &mut B, len: usize, depth: usize) -> Result<Value> {
    let mut entries = Vec::with_capacity(len.min(src.remaining() / 2));
    for _ in 0..len {
        let key = decode_at_depth(src, depth + 1)?;
        let value = decode_at_depth(src, depth + 1)?;
        entries.push((key, value));
    }
    Ok(Value::Map(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) -> Vec<u8> {
        let bytes = to_bytes(&v).unwrap();
        let mut slice = &bytes[..];
        let decoded = decode(&mut slice).unwrap();
        assert_eq!(decoded, v);
        assert!(slice.is_empty(), "decoder left {} bytes", slice.len());
        bytes.to_vec()
    }

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(roundtrip(Value::Nil), vec![0xc0]);
        assert_eq!(roundtrip(Value::Boolean(true)), vec![0xc3]);
        assert_eq!(roundtrip(Value::Boolean(false)), vec![0xc2]);
        assert_eq!(roundtrip(Value::F32(1.5)), vec![0xca, 0x3f, 0xc0, 0x00, 0x00]);
        assert_eq!(roundtrip(Value::F64(-0.5))[0], 0xcb);
    }

    #[test]
    fn test_unsigned_size_classes() {
        assert_eq!(roundtrip(0u8.into()), vec![0x00]);
        assert_eq!(roundtrip(127u8.into()), vec![0x7f]);
        assert_eq!(roundtrip(128u8.into()), vec![0xcc, 0x80]);
        assert_eq!(roundtrip(256u16.into()), vec![0xcd, 0x01, 0x00]);
        assert_eq!(roundtrip(65_536u32.into()), vec![0xce, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(roundtrip(u64::MAX.into())[0], 0xcf);
    }

    #[test]
    fn test_negative_size_classes() {
        assert_eq!(roundtrip((-1i8).into()), vec![0xff]);
        assert_eq!(roundtrip((-32i8).into()), vec![0xe0]);
        assert_eq!(roundtrip((-33i8).into()), vec![0xd0, 0xdf]);
        assert_eq!(roundtrip((-128i16).into()), vec![0xd0, 0x80]);
        assert_eq!(roundtrip((-129i16).into()), vec![0xd1, 0xff, 0x7f]);
        assert_eq!(roundtrip((-32_769i32).into())[0], 0xd2);
        assert_eq!(roundtrip(i64::MIN.into())[0], 0xd3);
    }

    #[test]
    fn test_sign_extension_of_fixed_negatives() {
        // int8/int16/int32 payloads with the top bit set must decode negative.
        assert_eq!(from_slice(&[0xd0, 0x80]).unwrap(), Value::from(-128i64));
        assert_eq!(from_slice(&[0xd1, 0x80, 0x00]).unwrap(), Value::from(-32_768i64));
        assert_eq!(
            from_slice(&[0xd2, 0x80, 0x00, 0x00, 0x00]).unwrap(),
            Value::from(i64::from(i32::MIN))
        );
        assert_eq!(from_slice(&[0xf0]).unwrap(), Value::from(-16i64));
    }

    #[test]
    fn test_signed_encodings_of_positive_values_decode() {
        // Other encoders may use signed tags for positive numbers.
        assert_eq!(from_slice(&[0xd0, 0x05]).unwrap(), Value::from(5u8));
        assert_eq!(from_slice(&[0xd3, 0, 0, 0, 0, 0, 0, 1, 0]).unwrap(), Value::from(256u16));
    }

    #[test]
    fn test_string_size_classes() {
        assert_eq!(roundtrip("".into())[0], 0xa0);
        assert_eq!(roundtrip("a".repeat(31).into())[0], 0xbf);
        assert_eq!(roundtrip("a".repeat(32).into())[..2], [0xd9, 32]);
        assert_eq!(roundtrip("a".repeat(256).into())[..3], [0xda, 0x01, 0x00]);
        assert_eq!(roundtrip("a".repeat(70_000).into())[0], 0xdb);
    }

    #[test]
    fn test_binary_size_classes() {
        assert_eq!(roundtrip(Value::binary(vec![1, 2, 3]))[..2], [0xc4, 3]);
        assert_eq!(roundtrip(Value::binary(vec![0; 300]))[0], 0xc5);
        assert_eq!(roundtrip(Value::binary(vec![0; 70_000]))[0], 0xc6);
    }

    #[test]
    fn test_container_size_classes() {
        let small: Vec<Value> = (0..15u8).map(Value::from).collect();
        assert_eq!(roundtrip(Value::Array(small))[0], 0x9f);

        let medium: Vec<Value> = (0..16u8).map(Value::from).collect();
        assert_eq!(roundtrip(Value::Array(medium))[..3], [0xdc, 0x00, 0x10]);

        let large: Vec<Value> = (0..70_000u32).map(|_| Value::Nil).collect();
        assert_eq!(roundtrip(Value::Array(large))[0], 0xdd);

        let map: Vec<(Value, Value)> = (0..16u8).map(|i| (i.into(), "v".into())).collect();
        assert_eq!(roundtrip(Value::Map(map))[0], 0xde);
    }

    #[test]
    fn test_nested_structures() {
        let v = Value::Map(vec![
            (Value::from(0x10u8), Value::from(512u32)),
            (
                Value::from("tuple"),
                Value::Array(vec![
                    Value::from(1u8),
                    Value::from("hello"),
                    Value::Array(vec![Value::Nil, Value::F64(2.25)]),
                ]),
            ),
        ]);
        roundtrip(v);
    }

    #[test]
    fn test_ext_roundtrip() {
        assert_eq!(roundtrip(Value::Ext(1, vec![0xaa]))[..2], [0xd4, 0x01]);
        assert_eq!(roundtrip(Value::Ext(2, vec![0; 16]))[0], 0xd8);
        assert_eq!(roundtrip(Value::Ext(-3, vec![0; 3]))[..3], [0xc7, 3, 0xfd]);
    }

    #[test]
    fn test_decode_consumes_only_one_value() {
        let mut buf = BytesMut::new();
        encode(&Value::from(1u8), &mut buf).unwrap();
        encode(&Value::from("two"), &mut buf).unwrap();
        let mut slice = &buf[..];
        assert_eq!(decode(&mut slice).unwrap(), Value::from(1u8));
        assert_eq!(decode(&mut slice).unwrap(), Value::from("two"));
        assert!(slice.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let err = from_slice(&[0xc1]).unwrap_err();
        assert!(matches!(err, TarantoolError::Protocol(ref m) if m.contains("0xc1")));
    }

    #[test]
    fn test_truncated_input() {
        assert!(from_slice(&[]).is_err());
        assert!(from_slice(&[0xcd, 0x01]).is_err());
        assert!(from_slice(&[0xa5, b'a', b'b']).is_err());
        // Declared huge array with no elements must fail without allocating it.
        assert!(from_slice(&[0xdd, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert!(from_slice(&[0xa2, 0xff, 0xfe]).is_err());
    }

    fn nested_arrays(depth: usize) -> Vec<u8> {
        let mut data = vec![0x91u8; depth];
        data.push(0xc0);
        data
    }

    #[test]
    fn test_depth_limit() {
        let err = from_slice(&nested_arrays(MAX_DEPTH + 1)).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn test_depth_limit_fits_worker_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let decoded = from_slice(&nested_arrays(MAX_DEPTH)).unwrap();
                let mut depth = 0;
                let mut current = &decoded;
                while let Value::Array(items) = current {
                    depth += 1;
                    current = &items[0];
                }
                assert_eq!(depth, MAX_DEPTH);
                assert_eq!(current, &Value::Nil);

                assert!(from_slice(&nested_arrays(MAX_DEPTH + 1)).is_err());
                assert!(from_slice(&nested_arrays(MAX_DEPTH * 4)).is_err());
            })
            .unwrap();
        handle.join().unwrap();
    }
}
