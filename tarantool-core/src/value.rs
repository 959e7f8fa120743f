//! Dynamically typed values exchanged with the server.

use std::fmt;

/// An integer as it travels on the wire.
///
/// Non-negative values are always stored unsigned, so two integers with the
/// same numeric value compare equal no matter how they were constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Integer(IntRepr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IntRepr {
    Unsigned(u64),
    Negative(i64),
}

impl Integer {
    /// Returns the value as `i64` if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self.0 {
            IntRepr::Unsigned(v) => i64::try_from(v).ok(),
            IntRepr::Negative(v) => Some(v),
        }
    }

    /// Returns the value as `u64` if it is non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match self.0 {
            IntRepr::Unsigned(v) => Some(v),
            IntRepr::Negative(_) => None,
        }
    }

    /// Returns true if the value is below zero.
    pub fn is_negative(&self) -> bool {
        matches!(self.0, IntRepr::Negative(_))
    }
}

impl From<u64> for Integer {
    fn from(v: u64) -> Self {
        Self(IntRepr::Unsigned(v))
    }
}

impl From<i64> for Integer {
    fn from(v: i64) -> Self {
        if v < 0 {
            Self(IntRepr::Negative(v))
        } else {
            Self(IntRepr::Unsigned(v as u64))
        }
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            IntRepr::Unsigned(v) => write!(f, "{}", v),
            IntRepr::Negative(v) => write!(f, "{}", v),
        }
    }
}

/// A self-describing value of the wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Nil,
    /// Boolean.
    Boolean(bool),
    /// Signed or unsigned integer.
    Integer(Integer),
    /// IEEE 754 single precision float.
    F32(f32),
    /// IEEE 754 double precision float.
    F64(f64),
    /// UTF-8 text.
    String(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Key/value pairs in wire order.
    Map(Vec<(Value, Value)>),
    /// Application-specific extension type with an opaque payload.
    Ext(i8, Vec<u8>),
}

impl Value {
    /// Creates a binary value.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Binary(bytes.into())
    }

    /// Returns true if this is `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns the boolean if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer as `i64` if this is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => i.as_i64(),
            _ => None,
        }
    }

    /// Returns the integer as `u64` if this is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(i) => i.as_u64(),
            _ => None,
        }
    }

    /// Returns the value as `f64` if it is a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes of a binary or string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Returns the elements if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries if this is a map.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Consumes the value and returns the elements if this is an array.
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a map entry by integer key.
    pub fn get_by_key(&self, key: u64) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_u64() == Some(key))
            .map(|(_, v)| v)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Integer(Integer::from(v as u64))
            }
        })*
    };
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Integer(Integer::from(v as i64))
            }
        })*
    };
}

impl_from_unsigned!(u8, u16, u32, u64, usize);
impl_from_signed!(i8, i16, i32, i64, isize);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Integer> for Value {
    fn from(v: Integer) -> Self {
        Value::Integer(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Ext(ty, data) => write!(f, "ext({}, <{} bytes>)", ty, data.len()),
        }
    }
}
