// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Identifies a table: a "super table" id plus a per-table unique id.
///
/// The canonical ordering is lexicographic on `(suid, uid)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId {
    pub suid: i64,
    pub uid: i64,
}

impl TableId {
    /// Sentinel used to mean "past all real tables" while draining a merge.
    pub const MAX: Self = Self {
        suid: i64::MAX,
        uid: i64::MAX,
    };

    #[must_use]
    pub fn new(suid: i64, uid: i64) -> Self {
        Self { suid, uid }
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        *self == Self::MAX
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.suid, self.uid)
    }
}

impl Encode for TableId {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<BigEndian>(self.suid)?;
        writer.write_i64::<BigEndian>(self.uid)?;
        Ok(())
    }
}

impl Decode for TableId {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let suid = reader.read_i64::<BigEndian>()?;
        let uid = reader.read_i64::<BigEndian>()?;
        Ok(Self { suid, uid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn table_id_orders_lexicographically() {
        assert!(TableId::new(1, 5) < TableId::new(1, 6));
        assert!(TableId::new(1, 9) < TableId::new(2, 0));
        assert!(TableId::new(1, 5) < TableId::MAX);
    }

    #[test]
    fn table_id_roundtrip() -> crate::Result<()> {
        let before = TableId::new(3, 42);
        let bytes = before.encode_into_vec();
        let mut cursor = Cursor::new(bytes);
        let after = TableId::decode_from(&mut cursor)?;
        assert_eq!(before, after);
        Ok(())
    }
}
