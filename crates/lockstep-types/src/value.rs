//! Scalar attribute values and their fixed-width byte encoding.
//!
//! Attribute records and interaction payloads are byte blobs laid out by
//! the catalog; the values stored in them are scalars tagged by a
//! [`WireType`]. The encoding is little-endian and fixed-width so that
//! an attribute's offset and size are the same on every peer, which the
//! one-sided read and write paths depend on.

use serde::{Deserialize, Serialize};

/// Errors produced when encoding, decoding or converting values.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// A value was used where a different wire type was expected.
    #[error("wire type mismatch: expected {expected:?}, got {got:?}")]
    WireMismatch {
        /// The wire type declared in the catalog.
        expected: WireType,
        /// The wire type of the supplied value.
        got: WireType,
    },

    /// A byte slice was too short for the wire type.
    #[error("truncated value: {wire:?} needs {need} bytes, found {have}")]
    Truncated {
        /// The wire type being decoded.
        wire: WireType,
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// A JSON value does not fit the declared wire type.
    #[error("json value `{json}` does not fit wire type {wire:?}")]
    Json {
        /// The wire type declared in the catalog.
        wire: WireType,
        /// Rendering of the offending JSON value.
        json: String,
    },
}

/// The scalar representation of an attribute or payload field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireType {
    /// One byte, `0` or `1`.
    Bool,
    /// Signed 64-bit integer, little-endian.
    I64,
    /// Unsigned 64-bit integer, little-endian.
    U64,
    /// IEEE-754 double, little-endian.
    F64,
}

impl WireType {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Bool => 1,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// The zero value of this wire type, used for unspecified defaults.
    pub const fn zero(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::I64 => Value::I64(0),
            Self::U64 => Value::U64(0),
            Self::F64 => Value::F64(0.0),
        }
    }
}

/// A scalar value carried by an attribute or an interaction payload field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    I64(i64),
    /// Unsigned integer.
    U64(u64),
    /// Floating point number.
    F64(f64),
}

impl Value {
    /// The wire type of this value.
    pub const fn wire_type(&self) -> WireType {
        match self {
            Self::Bool(_) => WireType::Bool,
            Self::I64(_) => WireType::I64,
            Self::U64(_) => WireType::U64,
            Self::F64(_) => WireType::F64,
        }
    }

    /// Encode the value into `dst`, which must be exactly `wire.size()` long.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WireMismatch`] if `dst` has the wrong length
    /// for this value's wire type.
    pub fn encode(&self, dst: &mut [u8]) -> Result<(), ValueError> {
        let wire = self.wire_type();
        if dst.len() != wire.size() {
            return Err(ValueError::Truncated {
                wire,
                need: wire.size(),
                have: dst.len(),
            });
        }
        match self {
            Self::Bool(b) => dst[0] = u8::from(*b),
            Self::I64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Self::U64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            Self::F64(v) => dst.copy_from_slice(&v.to_le_bytes()),
        }
        Ok(())
    }

    /// Decode a value of the given wire type from the front of `src`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Truncated`] if `src` is shorter than the
    /// encoded size.
    pub fn decode(wire: WireType, src: &[u8]) -> Result<Self, ValueError> {
        let need = wire.size();
        if src.len() < need {
            return Err(ValueError::Truncated {
                wire,
                need,
                have: src.len(),
            });
        }
        let value = match wire {
            WireType::Bool => Self::Bool(src[0] != 0),
            WireType::I64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&src[..8]);
                Self::I64(i64::from_le_bytes(buf))
            }
            WireType::U64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&src[..8]);
                Self::U64(u64::from_le_bytes(buf))
            }
            WireType::F64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&src[..8]);
                Self::F64(f64::from_le_bytes(buf))
            }
        };
        Ok(value)
    }

    /// Convert the value to its JSON representation for snapshots.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::I64(v) => serde_json::Value::from(*v),
            Self::U64(v) => serde_json::Value::from(*v),
            Self::F64(v) => serde_json::Value::from(*v),
        }
    }

    /// Interpret a JSON value as a scalar of the given wire type.
    ///
    /// Used when parsing instantiation documents, where numbers arrive
    /// untyped and must fit the catalog's declared wire type.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Json`] if the JSON value cannot represent
    /// the wire type (wrong kind, out of range, fractional integer).
    pub fn from_json(wire: WireType, json: &serde_json::Value) -> Result<Self, ValueError> {
        let mismatch = || ValueError::Json {
            wire,
            json: json.to_string(),
        };
        match wire {
            WireType::Bool => json.as_bool().map(Self::Bool).ok_or_else(mismatch),
            WireType::I64 => json.as_i64().map(Self::I64).ok_or_else(mismatch),
            WireType::U64 => json.as_u64().map(Self::U64).ok_or_else(mismatch),
            WireType::F64 => json.as_f64().map(Self::F64).ok_or_else(mismatch),
        }
    }

    /// Check that this value matches `wire`, returning it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WireMismatch`] on a type mismatch.
    pub fn expect_wire(self, wire: WireType) -> Result<Self, ValueError> {
        if self.wire_type() == wire {
            Ok(self)
        } else {
            Err(ValueError::WireMismatch {
                expected: wire,
                got: self.wire_type(),
            })
        }
    }

    /// Extract an unsigned integer, if that is what this value holds.
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a float, if that is what this value holds.
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }
}
