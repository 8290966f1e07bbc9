// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// A typed scalar used both as column data and as primary-key material.
///
/// `Null` compares as "larger than any value" everywhere in this crate,
/// matching the internal scan order used by the merge path.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
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
    Timestamp(i64),
    Binary(Vec<u8>),
    NChar(String),
}

/// Discriminant tag written on the wire; also used as a last-resort
/// tiebreak when comparing values of differing variants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
enum ValueTag {
    Null = 0,
    Bool = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    U8 = 6,
    U16 = 7,
    U32 = 8,
    U64 = 9,
    F32 = 10,
    F64 = 11,
    Timestamp = 12,
    Binary = 13,
    NChar = 14,
}

impl TryFrom<u8> for ValueTag {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Null,
            1 => Self::Bool,
            2 => Self::I8,
            3 => Self::I16,
            4 => Self::I32,
            5 => Self::I64,
            6 => Self::U8,
            7 => Self::U16,
            8 => Self::U32,
            9 => Self::U64,
            10 => Self::F32,
            11 => Self::F64,
            12 => Self::Timestamp,
            13 => Self::Binary,
            14 => Self::NChar,
            _ => return Err(()),
        })
    }
}

impl Value {
    fn tag(&self) -> ValueTag {
        match self {
            Self::Null => ValueTag::Null,
            Self::Bool(_) => ValueTag::Bool,
            Self::I8(_) => ValueTag::I8,
            Self::I16(_) => ValueTag::I16,
            Self::I32(_) => ValueTag::I32,
            Self::I64(_) => ValueTag::I64,
            Self::U8(_) => ValueTag::U8,
            Self::U16(_) => ValueTag::U16,
            Self::U32(_) => ValueTag::U32,
            Self::U64(_) => ValueTag::U64,
            Self::F32(_) => ValueTag::F32,
            Self::F64(_) => ValueTag::F64,
            Self::Timestamp(_) => ValueTag::Timestamp,
            Self::Binary(_) => ValueTag::Binary,
            Self::NChar(_) => ValueTag::NChar,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Approximate in-memory/on-wire payload size, used for SMA and
    /// block-size accounting.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + match self {
            Self::Null => 0,
            Self::Bool(_) | Self::I8(_) | Self::U8(_) => 1,
            Self::I16(_) | Self::U16(_) => 2,
            Self::I32(_) | Self::U32(_) | Self::F32(_) => 4,
            Self::I64(_) | Self::U64(_) | Self::F64(_) | Self::Timestamp(_) => 8,
            Self::Binary(b) => 4 + b.len(),
            Self::NChar(s) => 4 + s.len(),
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::{
            Binary, Bool, F32, F64, I16, I32, I64, I8, NChar, Null, Timestamp, U16, U32, U64, U8,
        };

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            // NOTE: Null sorts after every real value, per the merge scan's
            // internal ordering contract.
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,
            (Bool(a), Bool(b)) => a.cmp(b),
            (I8(a), I8(b)) => a.cmp(b),
            (I16(a), I16(b)) => a.cmp(b),
            (I32(a), I32(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (U8(a), U8(b)) => a.cmp(b),
            (U16(a), U16(b)) => a.cmp(b),
            (U32(a), U32(b)) => a.cmp(b),
            (U64(a), U64(b)) => a.cmp(b),
            (F32(a), F32(b)) => a.total_cmp(b),
            (F64(a), F64(b)) => a.total_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Binary(a), Binary(b)) => a.cmp(b),
            (NChar(a), NChar(b)) => a.cmp(b),
            // Differing variants should not occur within one column/PK slot
            // in practice; fall back to tag order for a total, deterministic
            // comparison rather than panicking.
            (a, b) => (a.tag() as u8).cmp(&(b.tag() as u8)),
        }
    }
}

impl Encode for Value {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(self.tag() as u8)?;

        match self {
            Self::Null => {}
            Self::Bool(v) => writer.write_u8(u8::from(*v))?,
            Self::I8(v) => writer.write_i8(*v)?,
            Self::I16(v) => writer.write_i16::<BigEndian>(*v)?,
            Self::I32(v) => writer.write_i32::<BigEndian>(*v)?,
            Self::I64(v) => writer.write_i64::<BigEndian>(*v)?,
            Self::U8(v) => writer.write_u8(*v)?,
            Self::U16(v) => writer.write_u16::<BigEndian>(*v)?,
            Self::U32(v) => writer.write_u32::<BigEndian>(*v)?,
            Self::U64(v) => writer.write_u64::<BigEndian>(*v)?,
            Self::F32(v) => writer.write_f32::<BigEndian>(*v)?,
            Self::F64(v) => writer.write_f64::<BigEndian>(*v)?,
            Self::Timestamp(v) => writer.write_i64::<BigEndian>(*v)?,
            Self::Binary(v) => {
                writer.write_u32_varint(v.len() as u32)?;
                writer.write_all(v)?;
            }
            Self::NChar(v) => {
                let bytes = v.as_bytes();
                writer.write_u32_varint(bytes.len() as u32)?;
                writer.write_all(bytes)?;
            }
        }

        Ok(())
    }
}

impl Decode for Value {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        let tag = ValueTag::try_from(tag).map_err(|()| DecodeError::InvalidTag(("Value", tag)))?;

        Ok(match tag {
            ValueTag::Null => Self::Null,
            ValueTag::Bool => Self::Bool(reader.read_u8()? != 0),
            ValueTag::I8 => Self::I8(reader.read_i8()?),
            ValueTag::I16 => Self::I16(reader.read_i16::<BigEndian>()?),
            ValueTag::I32 => Self::I32(reader.read_i32::<BigEndian>()?),
            ValueTag::I64 => Self::I64(reader.read_i64::<BigEndian>()?),
            ValueTag::U8 => Self::U8(reader.read_u8()?),
            ValueTag::U16 => Self::U16(reader.read_u16::<BigEndian>()?),
            ValueTag::U32 => Self::U32(reader.read_u32::<BigEndian>()?),
            ValueTag::U64 => Self::U64(reader.read_u64::<BigEndian>()?),
            ValueTag::F32 => Self::F32(reader.read_f32::<BigEndian>()?),
            ValueTag::F64 => Self::F64(reader.read_f64::<BigEndian>()?),
            ValueTag::Timestamp => Self::Timestamp(reader.read_i64::<BigEndian>()?),
            ValueTag::Binary => {
                let len = reader.read_u32_varint()?;
                let mut buf = vec![0; len as usize];
                reader.read_exact(&mut buf)?;
                Self::Binary(buf)
            }
            ValueTag::NChar => {
                let len = reader.read_u32_varint()?;
                let mut buf = vec![0; len as usize];
                reader.read_exact(&mut buf)?;
                Self::NChar(String::from_utf8_lossy(&buf).into_owned())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn null_sorts_last() {
        assert!(Value::I32(5) < Value::Null);
        assert!(Value::Null > Value::Binary(vec![0xff; 4]));
        assert_eq!(Value::Null.cmp(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn value_roundtrip() -> crate::Result<()> {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::I64(-5),
            Value::U32(9),
            Value::F64(3.25),
            Value::Timestamp(1_700_000_000_000),
            Value::Binary(vec![1, 2, 3]),
            Value::NChar("hello".into()),
        ] {
            let bytes = v.encode_into_vec();
            let mut cursor = Cursor::new(bytes);
            let back = Value::decode_from(&mut cursor)?;
            assert_eq!(v, back);
        }
        Ok(())
    }
}
