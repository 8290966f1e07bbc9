// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A `{offset, size}` byte range into one file, reused by `HeadFooter`,
/// `TombFooter`, and `BrinBlk`/`TombBlk`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DiskPtr {
    pub offset: u64,
    pub size: u64,
}

impl DiskPtr {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Encode for DiskPtr {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_u64::<BigEndian>(self.size)?;
        Ok(())
    }
}

impl Decode for DiskPtr {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let offset = reader.read_u64::<BigEndian>()?;
        let size = reader.read_u64::<BigEndian>()?;
        Ok(Self { offset, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn roundtrip() -> crate::Result<()> {
        let before = DiskPtr { offset: 128, size: 64 };
        let bytes = before.encode_into_vec();
        let mut cursor = Cursor::new(bytes);
        let after = DiskPtr::decode_from(&mut cursor)?;
        assert_eq!(before, after);
        Ok(())
    }
}
