// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Which of the four files in a file group a `STFile` describes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum FileType {
    Head = 0,
    Data = 1,
    Sma = 2,
    Tomb = 3,
}

impl TryFrom<u8> for FileType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Head,
            1 => Self::Data,
            2 => Self::Sma,
            3 => Self::Tomb,
            _ => return Err(()),
        })
    }
}

/// Min/max version accumulator for a single emitted file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VersionRange {
    pub min_ver: i64,
    pub max_ver: i64,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl VersionRange {
    /// Sentinel for "no records observed yet".
    pub const EMPTY: Self = Self {
        min_ver: i64::MAX,
        max_ver: i64::MIN,
    };

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn update(&mut self, min_ver: i64, max_ver: i64) {
        self.min_ver = self.min_ver.min(min_ver);
        self.max_ver = self.max_ver.max(max_ver);
    }

    pub fn merge(&mut self, other: Self) {
        if !other.is_empty() {
            self.update(other.min_ver, other.max_ver);
        }
    }
}

/// File descriptor record for one file in a file group.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct STFile {
    pub ftype: FileType,
    pub did: i32,
    pub fid: i64,
    pub cid: i64,
    pub size: u64,
    pub min_ver: i64,
    pub max_ver: i64,
}

impl STFile {
    /// A file group is created empty with this sentinel: zero size and an
    /// inverted version range, becoming live only once the writer's
    /// commit-time file-op array is applied atomically.
    #[must_use]
    pub fn empty(ftype: FileType, did: i32, fid: i64, cid: i64) -> Self {
        Self {
            ftype,
            did,
            fid,
            cid,
            size: 0,
            min_ver: VersionRange::EMPTY.min_ver,
            max_ver: VersionRange::EMPTY.max_ver,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[must_use]
    pub fn version_range(&self) -> VersionRange {
        VersionRange {
            min_ver: self.min_ver,
            max_ver: self.max_ver,
        }
    }
}

impl Encode for STFile {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(self.ftype as u8)?;
        writer.write_i32::<BigEndian>(self.did)?;
        writer.write_i64::<BigEndian>(self.fid)?;
        writer.write_i64::<BigEndian>(self.cid)?;
        writer.write_u64::<BigEndian>(self.size)?;
        writer.write_i64::<BigEndian>(self.min_ver)?;
        writer.write_i64::<BigEndian>(self.max_ver)?;
        Ok(())
    }
}

impl Decode for STFile {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let ftype = reader.read_u8()?;
        let ftype =
            FileType::try_from(ftype).map_err(|()| DecodeError::InvalidTag(("FileType", ftype)))?;
        let did = reader.read_i32::<BigEndian>()?;
        let fid = reader.read_i64::<BigEndian>()?;
        let cid = reader.read_i64::<BigEndian>()?;
        let size = reader.read_u64::<BigEndian>()?;
        let min_ver = reader.read_i64::<BigEndian>()?;
        let max_ver = reader.read_i64::<BigEndian>()?;
        Ok(Self {
            ftype,
            did,
            fid,
            cid,
            size,
            min_ver,
            max_ver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn version_range_accumulates() {
        let mut range = VersionRange::EMPTY;
        assert!(range.is_empty());
        range.update(5, 10);
        range.update(2, 8);
        assert_eq!(range.min_ver, 2);
        assert_eq!(range.max_ver, 10);
    }

    #[test]
    fn stfile_roundtrip() -> crate::Result<()> {
        let before = STFile {
            ftype: FileType::Data,
            did: 1,
            fid: 99,
            cid: 7,
            size: 4_096,
            min_ver: 1,
            max_ver: 50,
        };
        let bytes = before.encode_into_vec();
        let mut cursor = Cursor::new(bytes);
        let after = STFile::decode_from(&mut cursor)?;
        assert_eq!(before, after);
        Ok(())
    }
}
