//! Concrete values carried through graph slots and their wire encoding.

use serde::{Deserialize, Serialize};

use crate::backend::spec::{BufferId, ScalarKind, WireValue};

/// A concrete value a graph slot can hold.
///
/// The enum is closed on purpose: anything convertible into a `Value` has a
/// defined wire encoding, so an "unrecognised type" can never reach the
/// backend half-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Buffer(BufferId),
}

impl Value {
    /// Encodes the value into its `(payload, size)` wire pair.
    ///
    /// Scalars occupy 4 or 8 bytes according to their tag; 32-bit integers
    /// are sign-extended and floats travel as their IEEE-754 bit pattern.
    /// Buffer handles report size `-1`: the backend determines the real size
    /// from its own type metadata.
    pub fn to_wire(self) -> WireValue {
        match self {
            Value::Bool(b) => WireValue {
                value: b as u64,
                size: 4,
            },
            Value::I32(v) => WireValue {
                value: v as i64 as u64,
                size: 4,
            },
            Value::I64(v) => WireValue {
                value: v as u64,
                size: 8,
            },
            Value::F32(v) => WireValue {
                value: v.to_bits() as u64,
                size: 4,
            },
            Value::F64(v) => WireValue {
                value: v.to_bits(),
                size: 8,
            },
            Value::Buffer(id) => WireValue {
                value: id.0,
                size: WireValue::BUFFER_SIZE,
            },
        }
    }

    /// Appends the flat byte representation used for invoke argument packing.
    /// Scalars are written little-endian at their wire width; buffer handles
    /// travel as their 8-byte id.
    pub fn pack_into(self, out: &mut Vec<u8>) {
        match self {
            Value::Bool(b) => out.extend_from_slice(&(b as u32).to_le_bytes()),
            Value::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Buffer(id) => out.extend_from_slice(&id.0.to_le_bytes()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Buffer(_) => ValueKind::Buffer,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<BufferId> {
        match self {
            Value::Buffer(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the zero value for a scalar kind, used for buffer initialisation.
    pub fn zero(kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::I32 => Value::I32(0),
            ScalarKind::I64 => Value::I64(0),
            ScalarKind::F32 => Value::F32(0.0),
            ScalarKind::F64 => Value::F64(0.0),
        }
    }
}

/// Tag of a [`Value`], used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Buffer,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Buffer => "buffer",
        };
        f.write_str(name)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
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

impl From<BufferId> for Value {
    fn from(id: BufferId) -> Self {
        Value::Buffer(id)
    }
}

/// Packs an argument list into the flat byte buffer an invoke closure carries.
pub fn pack_args(args: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for arg in args {
        arg.pack_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_widths_follow_tags() {
        assert_eq!(Value::Bool(true).to_wire(), WireValue { value: 1, size: 4 });
        assert_eq!(
            Value::Bool(false).to_wire(),
            WireValue { value: 0, size: 4 }
        );
        assert_eq!(Value::I32(7).to_wire().size, 4);
        assert_eq!(Value::I64(7).to_wire().size, 8);
        assert_eq!(Value::F32(1.5).to_wire().size, 4);
        assert_eq!(Value::F64(1.5).to_wire().size, 8);
        assert_eq!(Value::Buffer(BufferId(9)).to_wire().size, -1);
    }

    #[test]
    fn negative_i32_is_sign_extended() {
        let wire = Value::I32(-2).to_wire();
        assert_eq!(wire.value as u32 as i32, -2);
        assert_eq!(wire.value, (-2i64) as u64);
    }

    #[test]
    fn floats_travel_as_bit_patterns() {
        let wire = Value::F32(2.5).to_wire();
        assert_eq!(f32::from_bits(wire.value as u32), 2.5);
        let wire = Value::F64(-0.25).to_wire();
        assert_eq!(f64::from_bits(wire.value), -0.25);
    }

    #[test]
    fn buffer_wire_carries_handle() {
        let wire = Value::Buffer(BufferId(42)).to_wire();
        assert_eq!(wire.value, 42);
    }

    #[test]
    fn packed_args_use_wire_widths() {
        let bytes = pack_args(&[Value::I32(3), Value::F64(2.5), Value::Bool(true)]);
        assert_eq!(bytes.len(), 4 + 8 + 4);
        assert_eq!(&bytes[0..4], &3i32.to_le_bytes());
        assert_eq!(&bytes[4..12], &2.5f64.to_le_bytes());
        assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
    }
}
