// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block::TombBlockSummary;
use crate::codec::CompressionType;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::disk_ptr::DiskPtr;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Fixed-size upper-level entry describing one persisted `TombBlock`,
/// analogous to [`crate::brin::BrinBlk`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TombBlk {
    pub disk_ptr: DiskPtr,
    pub min_ver: i64,
    pub max_ver: i64,
    pub num_rec: u32,
    pub cmpr_alg: CompressionType,
    pub size: [u32; 5],
}

pub const SERIALIZED_LEN: usize = 16 // disk_ptr
    + 8 // min_ver
    + 8 // max_ver
    + 4 // num_rec
    + 1 // cmpr_alg
    + 5 * 4; // size[5]

impl TombBlk {
    #[must_use]
    pub fn from_summary(summary: TombBlockSummary, disk_ptr: DiskPtr, cmpr_alg: CompressionType, size: [u32; 5]) -> Self {
        Self {
            disk_ptr,
            min_ver: summary.min_ver,
            max_ver: summary.max_ver,
            num_rec: summary.num_rec,
            cmpr_alg,
            size,
        }
    }
}

impl Encode for TombBlk {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.disk_ptr.encode_into(writer)?;
        writer.write_i64::<BigEndian>(self.min_ver)?;
        writer.write_i64::<BigEndian>(self.max_ver)?;
        writer.write_u32::<BigEndian>(self.num_rec)?;
        self.cmpr_alg.encode_into(writer)?;
        for s in &self.size {
            writer.write_u32::<BigEndian>(*s)?;
        }
        Ok(())
    }
}

impl Decode for TombBlk {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let disk_ptr = DiskPtr::decode_from(reader)?;
        let min_ver = reader.read_i64::<BigEndian>()?;
        let max_ver = reader.read_i64::<BigEndian>()?;
        let num_rec = reader.read_u32::<BigEndian>()?;
        let cmpr_alg = CompressionType::decode_from(reader)?;
        let mut size = [0u32; 5];
        for s in &mut size {
            *s = reader.read_u32::<BigEndian>()?;
        }
        Ok(Self {
            disk_ptr,
            min_ver,
            max_ver,
            num_rec,
            cmpr_alg,
            size,
        })
    }
}

#[must_use]
pub fn encode_array(blks: &[TombBlk]) -> Vec<u8> {
    let mut out = Vec::with_capacity(blks.len() * SERIALIZED_LEN);
    for blk in blks {
        blk.encode_into(&mut out).expect("writing to Vec cannot fail");
    }
    out
}

pub fn decode_array(bytes: &[u8]) -> Result<Vec<TombBlk>> {
    if bytes.len() % SERIALIZED_LEN != 0 {
        return Err(Error::Corruption(format!(
            "tomb blk array size {} is not a multiple of entry size {SERIALIZED_LEN}",
            bytes.len()
        )));
    }

    let n = bytes.len() / SERIALIZED_LEN;
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(TombBlk::decode_from(&mut cursor)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample() -> TombBlk {
        TombBlk {
            disk_ptr: DiskPtr { offset: 5, size: 50 },
            min_ver: 1,
            max_ver: 10,
            num_rec: 3,
            cmpr_alg: CompressionType::None,
            size: [2; 5],
        }
    }

    #[test]
    fn roundtrip_matches_serialized_len() -> crate::Result<()> {
        let blk = sample();
        let bytes = blk.encode_into_vec();
        assert_eq!(bytes.len(), SERIALIZED_LEN);
        let mut cursor = Cursor::new(bytes);
        let back = TombBlk::decode_from(&mut cursor)?;
        assert_eq!(blk, back);
        Ok(())
    }

    #[test]
    fn array_rejects_misaligned_residue() {
        let bytes = encode_array(&[sample()]);
        assert!(decode_array(&bytes[..bytes.len() - 1]).is_err());
    }
}
