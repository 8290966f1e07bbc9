// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-size trailer records at the end of `.head` and `.tomb`, pointing
//! at the packed `BrinBlk`/`TombBlk` array that precedes them.
//!
//! Mirrors the reference engine's fixed trailer-with-magic-bytes
//! convention: a short byte tag lets a reader confirm it landed on a real
//! footer rather than reading residue from a torn write.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::disk_ptr::DiskPtr;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const HEAD_MAGIC: [u8; 4] = [b'H', b'F', b'T', 1];
const TOMB_MAGIC: [u8; 4] = [b'T', b'F', b'T', 1];

/// `sizeof(HeadFooter)` / `sizeof(TombFooter)`: `DiskPtr` (16 bytes) plus
/// the 4-byte magic tag.
pub const FOOTER_SIZE: usize = 16 + 4;

/// Trailer at the end of `.head`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeadFooter {
    pub brin_blk_ptr: DiskPtr,
}

impl Encode for HeadFooter {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.brin_blk_ptr.encode_into(writer)?;
        writer.write_all(&HEAD_MAGIC)?;
        Ok(())
    }
}

impl Decode for HeadFooter {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let brin_blk_ptr = DiskPtr::decode_from(reader)?;
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != HEAD_MAGIC {
            return Err(DecodeError::InvalidHeader("HeadFooter magic mismatch"));
        }
        Ok(Self { brin_blk_ptr })
    }
}

impl HeadFooter {
    /// Validates the "footer invariants" testable property:
    /// `brin_blk_ptr.offset + brin_blk_ptr.size + sizeof(HeadFooter) == file_size`.
    pub fn validate_against_file_size(&self, file_size: u64) -> Result<()> {
        let expected = self
            .brin_blk_ptr
            .offset
            .checked_add(self.brin_blk_ptr.size)
            .and_then(|v| v.checked_add(FOOTER_SIZE as u64));
        if expected != Some(file_size) {
            return Err(Error::Corruption(format!(
                "head footer invariant violated: brin_blk_ptr {:?} + footer {FOOTER_SIZE} != file size {file_size}",
                self.brin_blk_ptr
            )));
        }
        Ok(())
    }
}

/// Trailer at the end of `.tomb`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TombFooter {
    pub tomb_blk_ptr: DiskPtr,
}

impl Encode for TombFooter {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.tomb_blk_ptr.encode_into(writer)?;
        writer.write_all(&TOMB_MAGIC)?;
        Ok(())
    }
}

impl Decode for TombFooter {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tomb_blk_ptr = DiskPtr::decode_from(reader)?;
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != TOMB_MAGIC {
            return Err(DecodeError::InvalidHeader("TombFooter magic mismatch"));
        }
        Ok(Self { tomb_blk_ptr })
    }
}

impl TombFooter {
    pub fn validate_against_file_size(&self, file_size: u64) -> Result<()> {
        let expected = self
            .tomb_blk_ptr
            .offset
            .checked_add(self.tomb_blk_ptr.size)
            .and_then(|v| v.checked_add(FOOTER_SIZE as u64));
        if expected != Some(file_size) {
            return Err(Error::Corruption(format!(
                "tomb footer invariant violated: tomb_blk_ptr {:?} + footer {FOOTER_SIZE} != file size {file_size}",
                self.tomb_blk_ptr
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn head_footer_roundtrip_and_fixed_size() -> crate::Result<()> {
        let footer = HeadFooter {
            brin_blk_ptr: DiskPtr { offset: 40, size: 60 },
        };
        let bytes = footer.encode_into_vec();
        assert_eq!(bytes.len(), FOOTER_SIZE);
        let mut cursor = Cursor::new(bytes);
        let back = HeadFooter::decode_from(&mut cursor)?;
        assert_eq!(footer, back);
        Ok(())
    }

    #[test]
    fn head_footer_validates_file_size_invariant() {
        let footer = HeadFooter {
            brin_blk_ptr: DiskPtr { offset: 40, size: 60 },
        };
        assert!(footer.validate_against_file_size(40 + 60 + FOOTER_SIZE as u64).is_ok());
        assert!(footer.validate_against_file_size(1).is_err());
    }

    #[test]
    fn tomb_footer_rejects_wrong_magic() {
        let footer = HeadFooter::default();
        let bytes = footer.encode_into_vec();
        let mut cursor = Cursor::new(bytes);
        assert!(TombFooter::decode_from(&mut cursor).is_err());
    }
}
