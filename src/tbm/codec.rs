//! Catalog value encoding: length-prefixed strings, typed field values and
//! the string → index-key hash.

use crate::error::{Result, StratumError};

const STR_HASH_SEED: i64 = 13331;

pub fn encode_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + s.len());
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    out
}

/// Returns the string and the number of bytes consumed.
pub fn decode_string(raw: &[u8]) -> Result<(String, usize)> {
    if raw.len() < 4 {
        return Err(StratumError::InvalidValues);
    }
    let len = u32::from_be_bytes(raw[..4].try_into().unwrap()) as usize;
    if raw.len() < 4 + len {
        return Err(StratumError::InvalidValues);
    }
    let s = String::from_utf8_lossy(&raw[4..4 + len]).into_owned();
    Ok((s, 4 + len))
}

/// Hashes a string to a 64-bit index key with the same rolling fold the
/// WAL checksum uses.
pub fn string_to_key(s: &str) -> i64 {
    let mut key = 0i64;
    for &b in s.as_bytes() {
        key = key.wrapping_mul(STR_HASH_SEED).wrapping_add(b as i8 as i64);
    }
    key
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldType {
    Int32,
    Int64,
    Str,
}

impl FieldType {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "int32" => Ok(FieldType::Int32),
            "int64" => Ok(FieldType::Int64),
            "string" => Ok(FieldType::Str),
            _ => Err(StratumError::InvalidField),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Str => "string",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Str(String),
}

impl Value {
    /// Parses a SQL literal for a field of the given type.
    pub fn parse(ftype: FieldType, literal: &str) -> Result<Self> {
        match ftype {
            FieldType::Int32 => literal
                .parse::<i32>()
                .map(Value::Int32)
                .map_err(|_| StratumError::InvalidValues),
            FieldType::Int64 => literal
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| StratumError::InvalidValues),
            FieldType::Str => Ok(Value::Str(literal.to_string())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::Int32(v) => v.to_be_bytes().to_vec(),
            Value::Int64(v) => v.to_be_bytes().to_vec(),
            Value::Str(s) => encode_string(s),
        }
    }

    /// Decodes a value of the given type, returning it and the bytes
    /// consumed.
    pub fn decode(ftype: FieldType, raw: &[u8]) -> Result<(Self, usize)> {
        match ftype {
            FieldType::Int32 => {
                if raw.len() < 4 {
                    return Err(StratumError::InvalidValues);
                }
                let v = i32::from_be_bytes(raw[..4].try_into().unwrap());
                Ok((Value::Int32(v), 4))
            }
            FieldType::Int64 => {
                if raw.len() < 8 {
                    return Err(StratumError::InvalidValues);
                }
                let v = i64::from_be_bytes(raw[..8].try_into().unwrap());
                Ok((Value::Int64(v), 8))
            }
            FieldType::Str => {
                let (s, n) = decode_string(raw)?;
                Ok((Value::Str(s), n))
            }
        }
    }

    /// The 64-bit index key for this value.
    pub fn to_key(&self) -> i64 {
        match self {
            Value::Int32(v) => *v as i64,
            Value::Int64(v) => *v,
            Value::Str(s) => string_to_key(s),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::Str(s) => s.clone(),
        }
    }
}
