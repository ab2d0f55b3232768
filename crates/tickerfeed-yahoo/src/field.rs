//! Typed lookups into untyped JSON.
//!
//! Upstream payloads are navigated by key rather than deserialized into fixed
//! structs, because the key set varies by symbol and endpoint. A lookup
//! distinguishes an absent value from one of the wrong type; parsers treat
//! the former as optional data and the latter as a contract change.

use serde_json::{Map, Value};
use tickerfeed_core::{DataError, Result};

/// Outcome of a typed lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Field<T> {
    /// The key holds a value of the requested type.
    Present(T),
    /// The key is absent or `null`.
    Missing,
    /// The key holds a value of another type.
    WrongType,
}

impl<T> Field<T> {
    /// The value, if present.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Present(v) => Some(v),
            Self::Missing | Self::WrongType => None,
        }
    }

    /// Returns true if the value is present.
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// The value, or a [`DataError::Shape`] naming `what`.
    ///
    /// # Errors
    ///
    /// Fails if the value is missing or of the wrong type.
    pub fn required(self, what: &str) -> Result<T> {
        match self {
            Self::Present(v) => Ok(v),
            Self::Missing => Err(DataError::Shape(format!("missing {what}"))),
            Self::WrongType => Err(DataError::Shape(format!("{what} has an unexpected type"))),
        }
    }

    /// The value, `None` if missing, or a [`DataError::Shape`] on a type
    /// mismatch.
    ///
    /// # Errors
    ///
    /// Fails if the value is of the wrong type.
    pub fn optional(self, what: &str) -> Result<Option<T>> {
        match self {
            Self::Present(v) => Ok(Some(v)),
            Self::Missing => Ok(None),
            Self::WrongType => Err(DataError::Shape(format!("{what} has an unexpected type"))),
        }
    }

    /// Maps a present value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Self::Present(v) => Field::Present(f(v)),
            Self::Missing => Field::Missing,
            Self::WrongType => Field::WrongType,
        }
    }
}

fn lookup<'a, T>(
    object: &'a Value,
    key: &str,
    extract: impl FnOnce(&'a Value) -> Option<T>,
) -> Field<T> {
    let Some(map) = object.as_object() else {
        return Field::WrongType;
    };
    match map.get(key) {
        None | Some(Value::Null) => Field::Missing,
        Some(value) => extract(value).map_or(Field::WrongType, Field::Present),
    }
}

/// Any non-null value.
pub fn value<'a>(object: &'a Value, key: &str) -> Field<&'a Value> {
    lookup(object, key, Some)
}

/// A number read as `f64`.
pub fn f64_field(object: &Value, key: &str) -> Field<f64> {
    lookup(object, key, Value::as_f64)
}

/// An integer; integral floats are accepted.
pub fn i64_field(object: &Value, key: &str) -> Field<i64> {
    lookup(object, key, as_integer)
}

/// A string.
pub fn str_field<'a>(object: &'a Value, key: &str) -> Field<&'a str> {
    lookup(object, key, Value::as_str)
}

/// An array.
pub fn array_field<'a>(object: &'a Value, key: &str) -> Field<&'a Vec<Value>> {
    lookup(object, key, Value::as_array)
}

/// An object.
pub fn object_field<'a>(object: &'a Value, key: &str) -> Field<&'a Map<String, Value>> {
    lookup(object, key, Value::as_object)
}

/// Reads a JSON number as an integer, accepting integral floats.
pub fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}
