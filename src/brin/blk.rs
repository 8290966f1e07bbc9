// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block::BrinBlockSummary;
use crate::codec::CompressionType;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::disk_ptr::DiskPtr;
use crate::error::{Error, Result};
use crate::table_id::TableId;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Fixed-size sparse upper-level entry describing one persisted
/// `BrinBlock`. A packed array of these sits at the tail of `.head`,
/// pointed at by `HeadFooter.brin_blk_ptr`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BrinBlk {
    pub disk_ptr: DiskPtr,
    pub min_tbid: TableId,
    pub max_tbid: TableId,
    pub min_ver: i64,
    pub max_ver: i64,
    pub num_rec: u32,
    pub num_of_pks: u8,
    pub cmpr_alg: CompressionType,
    pub size: [u32; 15],
}

/// Encoded byte length of one `BrinBlk` entry: used to validate the packed
/// array's size against a whole multiple.
pub const SERIALIZED_LEN: usize = 16 // disk_ptr
    + 16 // min_tbid
    + 16 // max_tbid
    + 8 // min_ver
    + 8 // max_ver
    + 4 // num_rec
    + 1 // num_of_pks
    + 1 // cmpr_alg
    + 15 * 4; // size[15]

impl BrinBlk {
    #[must_use]
    pub fn from_summary(summary: BrinBlockSummary, disk_ptr: DiskPtr, cmpr_alg: CompressionType, size: [u32; 15]) -> Self {
        Self {
            disk_ptr,
            min_tbid: summary.min_tbid,
            max_tbid: summary.max_tbid,
            min_ver: summary.min_ver,
            max_ver: summary.max_ver,
            num_rec: summary.num_rec,
            num_of_pks: summary.num_of_pks,
            cmpr_alg,
            size,
        }
    }
}

impl Encode for BrinBlk {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.disk_ptr.encode_into(writer)?;
        self.min_tbid.encode_into(writer)?;
        self.max_tbid.encode_into(writer)?;
        writer.write_i64::<BigEndian>(self.min_ver)?;
        writer.write_i64::<BigEndian>(self.max_ver)?;
        writer.write_u32::<BigEndian>(self.num_rec)?;
        writer.write_u8(self.num_of_pks)?;
        self.cmpr_alg.encode_into(writer)?;
        for s in &self.size {
            writer.write_u32::<BigEndian>(*s)?;
        }
        Ok(())
    }
}

impl Decode for BrinBlk {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let disk_ptr = DiskPtr::decode_from(reader)?;
        let min_tbid = TableId::decode_from(reader)?;
        let max_tbid = TableId::decode_from(reader)?;
        let min_ver = reader.read_i64::<BigEndian>()?;
        let max_ver = reader.read_i64::<BigEndian>()?;
        let num_rec = reader.read_u32::<BigEndian>()?;
        let num_of_pks = reader.read_u8()?;
        let cmpr_alg = CompressionType::decode_from(reader)?;
        let mut size = [0u32; 15];
        for s in &mut size {
            *s = reader.read_u32::<BigEndian>()?;
        }
        Ok(Self {
            disk_ptr,
            min_tbid,
            max_tbid,
            min_ver,
            max_ver,
            num_rec,
            num_of_pks,
            cmpr_alg,
            size,
        })
    }
}

/// Encodes a packed array of `BrinBlk` entries (no length prefix: the
/// element count is derived from the containing `DiskPtr.size`).
#[must_use]
pub fn encode_array(blks: &[BrinBlk]) -> Vec<u8> {
    let mut out = Vec::with_capacity(blks.len() * SERIALIZED_LEN);
    for blk in blks {
        blk.encode_into(&mut out).expect("writing to Vec cannot fail");
    }
    out
}

/// Decodes a packed array of `BrinBlk` entries, failing if `bytes.len()` is
/// not a whole multiple of [`SERIALIZED_LEN`].
pub fn decode_array(bytes: &[u8]) -> Result<Vec<BrinBlk>> {
    if bytes.len() % SERIALIZED_LEN != 0 {
        return Err(Error::Corruption(format!(
            "brin blk array size {} is not a multiple of entry size {SERIALIZED_LEN}",
            bytes.len()
        )));
    }

    let n = bytes.len() / SERIALIZED_LEN;
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(BrinBlk::decode_from(&mut cursor)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample() -> BrinBlk {
        BrinBlk {
            disk_ptr: DiskPtr { offset: 10, size: 200 },
            min_tbid: TableId::new(1, 2),
            max_tbid: TableId::new(1, 9),
            min_ver: 1,
            max_ver: 100,
            num_rec: 50,
            num_of_pks: 1,
            cmpr_alg: CompressionType::Lz4,
            size: [1; 15],
        }
    }

    #[test]
    fn roundtrip_matches_serialized_len() -> crate::Result<()> {
        let blk = sample();
        let bytes = blk.encode_into_vec();
        assert_eq!(bytes.len(), SERIALIZED_LEN);
        let mut cursor = Cursor::new(bytes);
        let back = BrinBlk::decode_from(&mut cursor)?;
        assert_eq!(blk, back);
        Ok(())
    }

    #[test]
    fn array_roundtrip() -> crate::Result<()> {
        let blks = vec![sample(), sample()];
        let bytes = encode_array(&blks);
        let back = decode_array(&bytes)?;
        assert_eq!(blks, back);
        Ok(())
    }

    #[test]
    fn array_rejects_misaligned_residue() {
        let blks = vec![sample()];
        let mut bytes = encode_array(&blks);
        bytes.pop();
        assert!(decode_array(&bytes).is_err());
    }
}
