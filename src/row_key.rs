// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::value::Value;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::io::{Read, Write};

/// Upper bound on the number of primary-key columns a row key may carry,
/// mirroring the reference engine's `TD_MAX_PK_COLS`.
pub const MAX_PK_COLS: usize = 4;

/// A row's sort key: a timestamp plus 0..`MAX_PK_COLS` primary-key values.
///
/// Compared lexicographically on `(timestamp, primary_keys...)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowKey {
    pub timestamp: i64,
    pub primary_keys: Vec<Value>,
}

impl RowKey {
    #[must_use]
    pub fn new(timestamp: i64, primary_keys: Vec<Value>) -> Self {
        debug_assert!(primary_keys.len() <= MAX_PK_COLS);
        Self {
            timestamp,
            primary_keys,
        }
    }

    #[must_use]
    pub fn bare(timestamp: i64) -> Self {
        Self::new(timestamp, Vec::new())
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.primary_keys.cmp(&other.primary_keys))
    }
}

impl Encode for RowKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<BigEndian>(self.timestamp)?;
        writer.write_u8(self.primary_keys.len() as u8)?;
        for pk in &self.primary_keys {
            pk.encode_into(writer)?;
        }
        Ok(())
    }
}

impl Decode for RowKey {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let timestamp = reader.read_i64::<BigEndian>()?;
        let n_pk = reader.read_u8()? as usize;
        let mut primary_keys = Vec::with_capacity(n_pk);
        for _ in 0..n_pk {
            primary_keys.push(Value::decode_from(reader)?);
        }
        Ok(Self {
            timestamp,
            primary_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn orders_by_timestamp_then_pk() {
        let a = RowKey::new(10, vec![Value::I32(1)]);
        let b = RowKey::new(10, vec![Value::I32(2)]);
        let c = RowKey::new(20, vec![Value::I32(0)]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn roundtrip() -> crate::Result<()> {
        let key = RowKey::new(123, vec![Value::I32(7), Value::NChar("x".into())]);
        let bytes = key.encode_into_vec();
        let mut cursor = Cursor::new(bytes);
        let back = RowKey::decode_from(&mut cursor)?;
        assert_eq!(key, back);
        Ok(())
    }
}
