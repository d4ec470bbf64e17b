//! Runtime-typed memory values for the dynamic read/write path

use super::address::Address;
use super::error::{MemoryError, MemoryResult};
use crate::layout::{Marshal, TypeCategory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A value whose type is only known at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MemoryValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    Pointer(Address),
    Bytes(Vec<u8>),
    String(String),
}

impl MemoryValue {
    /// Returns the size in bytes of the value in the local process
    pub fn size(&self) -> usize {
        match self {
            MemoryValue::Bytes(b) => b.len(),
            MemoryValue::String(s) => s.len(),
            other => other
                .value_type()
                .size()
                .unwrap_or_default(),
        }
    }

    /// Converts the value to native-order bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        match self {
            MemoryValue::Bool(v) => v.encode(&mut out),
            MemoryValue::I8(v) => v.encode(&mut out),
            MemoryValue::I16(v) => v.encode(&mut out),
            MemoryValue::I32(v) => v.encode(&mut out),
            MemoryValue::I64(v) => v.encode(&mut out),
            MemoryValue::U8(v) => v.encode(&mut out),
            MemoryValue::U16(v) => v.encode(&mut out),
            MemoryValue::U32(v) => v.encode(&mut out),
            MemoryValue::U64(v) => v.encode(&mut out),
            MemoryValue::F32(v) => v.encode(&mut out),
            MemoryValue::F64(v) => v.encode(&mut out),
            MemoryValue::Char(v) => v.encode(&mut out),
            MemoryValue::Pointer(v) => v.encode(&mut out),
            MemoryValue::Bytes(b) => out.extend_from_slice(b),
            MemoryValue::String(s) => out.extend_from_slice(s.as_bytes()),
        }
        out
    }

    /// Creates a value from native-order bytes of the given type
    pub fn from_bytes(bytes: &[u8], value_type: ValueType) -> MemoryResult<Self> {
        let value = match value_type {
            ValueType::Bool => MemoryValue::Bool(bool::decode(bytes)?),
            ValueType::I8 => MemoryValue::I8(i8::decode(bytes)?),
            ValueType::I16 => MemoryValue::I16(i16::decode(bytes)?),
            ValueType::I32 => MemoryValue::I32(i32::decode(bytes)?),
            ValueType::I64 => MemoryValue::I64(i64::decode(bytes)?),
            ValueType::U8 => MemoryValue::U8(u8::decode(bytes)?),
            ValueType::U16 => MemoryValue::U16(u16::decode(bytes)?),
            ValueType::U32 => MemoryValue::U32(u32::decode(bytes)?),
            ValueType::U64 => MemoryValue::U64(u64::decode(bytes)?),
            ValueType::F32 => MemoryValue::F32(f32::decode(bytes)?),
            ValueType::F64 => MemoryValue::F64(f64::decode(bytes)?),
            ValueType::Char => MemoryValue::Char(char::decode(bytes)?),
            ValueType::Pointer => MemoryValue::Pointer(Address::decode(bytes)?),
            ValueType::Bytes => MemoryValue::Bytes(bytes.to_vec()),
            ValueType::String => MemoryValue::String(
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| MemoryError::InvalidValueType(e.to_string()))?,
            ),
        };
        Ok(value)
    }

    /// Gets the value type enum for this value
    pub fn value_type(&self) -> ValueType {
        match self {
            MemoryValue::Bool(_) => ValueType::Bool,
            MemoryValue::I8(_) => ValueType::I8,
            MemoryValue::I16(_) => ValueType::I16,
            MemoryValue::I32(_) => ValueType::I32,
            MemoryValue::I64(_) => ValueType::I64,
            MemoryValue::U8(_) => ValueType::U8,
            MemoryValue::U16(_) => ValueType::U16,
            MemoryValue::U32(_) => ValueType::U32,
            MemoryValue::U64(_) => ValueType::U64,
            MemoryValue::F32(_) => ValueType::F32,
            MemoryValue::F64(_) => ValueType::F64,
            MemoryValue::Char(_) => ValueType::Char,
            MemoryValue::Pointer(_) => ValueType::Pointer,
            MemoryValue::Bytes(_) => ValueType::Bytes,
            MemoryValue::String(_) => ValueType::String,
        }
    }
}

/// Enum representing the type of a memory value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    Pointer,
    Bytes,
    String,
}

impl ValueType {
    /// Layout category used for dispatch, `None` for variable-size types
    pub fn category(&self) -> Option<TypeCategory> {
        let category = match self {
            ValueType::Bool => TypeCategory::Boolean,
            ValueType::I8 => TypeCategory::I8,
            ValueType::I16 => TypeCategory::I16,
            ValueType::I32 => TypeCategory::I32,
            ValueType::I64 => TypeCategory::I64,
            ValueType::U8 => TypeCategory::U8,
            ValueType::U16 => TypeCategory::U16,
            ValueType::U32 => TypeCategory::U32,
            ValueType::U64 => TypeCategory::U64,
            ValueType::F32 => TypeCategory::F32,
            ValueType::F64 => TypeCategory::F64,
            ValueType::Char => TypeCategory::Character,
            ValueType::Pointer => TypeCategory::Address,
            ValueType::Bytes | ValueType::String => return None,
        };
        Some(category)
    }

    /// Returns the size in bytes for this value type
    pub fn size(&self) -> Option<usize> {
        self.category().and_then(|category| category.fixed_size())
    }
}

impl FromStr for ValueType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(ValueType::Bool),
            "i8" => Ok(ValueType::I8),
            "i16" => Ok(ValueType::I16),
            "i32" => Ok(ValueType::I32),
            "i64" => Ok(ValueType::I64),
            "u8" | "byte" => Ok(ValueType::U8),
            "u16" => Ok(ValueType::U16),
            "u32" => Ok(ValueType::U32),
            "u64" => Ok(ValueType::U64),
            "f32" | "float" => Ok(ValueType::F32),
            "f64" | "double" => Ok(ValueType::F64),
            "char" => Ok(ValueType::Char),
            "pointer" | "ptr" => Ok(ValueType::Pointer),
            "bytes" => Ok(ValueType::Bytes),
            "string" => Ok(ValueType::String),
            other => Err(MemoryError::InvalidValueType(other.to_string())),
        }
    }
}

impl fmt::Display for MemoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryValue::Bool(v) => write!(f, "{}", v),
            MemoryValue::I8(v) => write!(f, "{}", v),
            MemoryValue::I16(v) => write!(f, "{}", v),
            MemoryValue::I32(v) => write!(f, "{}", v),
            MemoryValue::I64(v) => write!(f, "{}", v),
            MemoryValue::U8(v) => write!(f, "{}", v),
            MemoryValue::U16(v) => write!(f, "{}", v),
            MemoryValue::U32(v) => write!(f, "{}", v),
            MemoryValue::U64(v) => write!(f, "{}", v),
            MemoryValue::F32(v) => write!(f, "{}", v),
            MemoryValue::F64(v) => write!(f, "{}", v),
            MemoryValue::Char(v) => write!(f, "'{}'", v),
            MemoryValue::Pointer(v) => write!(f, "{}", v),
            MemoryValue::Bytes(b) => write!(f, "{}", hex::encode_upper(b)),
            MemoryValue::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_size() {
        assert_eq!(MemoryValue::I32(42).size(), 4);
        assert_eq!(MemoryValue::U64(100).size(), 8);
        assert_eq!(MemoryValue::Bool(true).size(), 1);
        assert_eq!(MemoryValue::Char('x').size(), 4);
        assert_eq!(
            MemoryValue::Pointer(Address::new(1)).size(),
            std::mem::size_of::<usize>()
        );
        assert_eq!(MemoryValue::Bytes(vec![1, 2, 3]).size(), 3);
    }

    #[test]
    fn test_value_to_bytes() {
        assert_eq!(
            MemoryValue::U32(0x12345678).to_bytes(),
            0x12345678u32.to_ne_bytes().to_vec()
        );
        assert_eq!(MemoryValue::I8(-1).to_bytes(), vec![0xFF]);
        assert_eq!(MemoryValue::Bool(true).to_bytes(), vec![1]);
        assert_eq!(MemoryValue::String("Hi".to_string()).to_bytes(), vec![b'H', b'i']);
    }

    #[test]
    fn test_value_from_bytes() {
        let bytes = 0x12345678u32.to_ne_bytes();
        let value = MemoryValue::from_bytes(&bytes, ValueType::U32).unwrap();
        assert_eq!(value, MemoryValue::U32(0x12345678));

        assert!(matches!(
            MemoryValue::from_bytes(&[1, 2], ValueType::U32),
            Err(MemoryError::InvalidValueType(_))
        ));
        assert!(matches!(
            MemoryValue::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF], ValueType::Char),
            Err(MemoryError::InvalidValueType(_))
        ));
    }

    #[test]
    fn test_value_type_categories() {
        assert_eq!(ValueType::Pointer.category(), Some(TypeCategory::Address));
        assert_eq!(ValueType::Char.category(), Some(TypeCategory::Character));
        assert_eq!(ValueType::String.category(), None);
        assert_eq!("double".parse::<ValueType>().unwrap(), ValueType::F64);
        assert!("quad".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(MemoryValue::Bytes(vec![0xAA, 0x0B]).to_string(), "AA0B");
        assert_eq!(MemoryValue::Char('z').to_string(), "'z'");
    }
}
