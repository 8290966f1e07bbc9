// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Reference implementation of the block/value-column compression
//! contract the writer and reader depend on.
//!
//! The real engine's codec (per-type SMA calculators, dictionary/RLE value
//! encodings, ...) is out of scope for this crate; what lives here is a
//! working stand-in good enough to round-trip through `.data`/`.sma`/`.head`
//! on disk, built the same way the reference storage engine layers a
//! pluggable `CompressionType` under a checksummed block.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::error::Error;
use crate::value::Value;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Opaque codec selector passed through to the compressor, named `cmprAlg`
/// in the original system.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(match self {
            Self::None => 0,
            Self::Lz4 => 1,
        })?;
        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            0 => Self::None,
            1 => Self::Lz4,
            _ => return Err(DecodeError::InvalidTag(("CompressionType", tag))),
        })
    }
}

/// Computes a block checksum, the same `xxh3` hash family the reference
/// engine uses for its block trailers.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// Compresses `data` under `alg`. Never fails: `None` passes bytes through,
/// and lz4 compression of arbitrary bytes cannot fail.
#[must_use]
pub fn compress_bytes(alg: CompressionType, data: &[u8]) -> Vec<u8> {
    match alg {
        CompressionType::None => data.to_vec(),
        CompressionType::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                lz4_flex::compress_prepend_size(data)
            }
            #[cfg(not(feature = "lz4"))]
            {
                data.to_vec()
            }
        }
    }
}

/// Decompresses `data` that was produced by [`compress_bytes`] under `alg`,
/// verifying the result matches `original_len`.
pub fn decompress_bytes(alg: CompressionType, data: &[u8], original_len: usize) -> crate::error::Result<Vec<u8>> {
    let out = match alg {
        CompressionType::None => data.to_vec(),
        CompressionType::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                lz4_flex::decompress_size_prepended(data)
                    .map_err(|e| Error::Codec(format!("lz4 decompress failed: {e}")))?
            }
            #[cfg(not(feature = "lz4"))]
            {
                data.to_vec()
            }
        }
    };

    if out.len() != original_len {
        return Err(Error::Corruption(format!(
            "decompressed {} bytes, expected {original_len}",
            out.len()
        )));
    }

    Ok(out)
}

/// Header describing one compressed value-column chunk (used for the
/// primary-key first/last-key columns inside a `BrinBlock`, and reused for
/// generic column-of-`Value` compression elsewhere).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ValueColumnCompressInfo {
    pub alg: CompressionType,
    pub n_rows: u32,
    pub original_len: u32,
    pub compressed_len: u32,
}

impl Encode for ValueColumnCompressInfo {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.alg.encode_into(writer)?;
        writer.write_u32::<BigEndian>(self.n_rows)?;
        writer.write_u32::<BigEndian>(self.original_len)?;
        writer.write_u32::<BigEndian>(self.compressed_len)?;
        Ok(())
    }
}

impl Decode for ValueColumnCompressInfo {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let alg = CompressionType::decode_from(reader)?;
        let n_rows = reader.read_u32::<BigEndian>()?;
        let original_len = reader.read_u32::<BigEndian>()?;
        let compressed_len = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            alg,
            n_rows,
            original_len,
            compressed_len,
        })
    }
}

/// Compresses a column of primary-key-capable values into a self-describing
/// `(info, bytes)` pair.
#[must_use]
pub fn compress_value_column(values: &[Value], alg: CompressionType) -> (ValueColumnCompressInfo, Vec<u8>) {
    let mut raw = Vec::new();
    for v in values {
        // `encode_into_vec` cannot fail for an in-memory Vec sink.
        v.encode_into(&mut raw).expect("encoding into a Vec cannot fail");
    }

    let compressed = compress_bytes(alg, &raw);

    let info = ValueColumnCompressInfo {
        alg,
        n_rows: values.len() as u32,
        original_len: raw.len() as u32,
        compressed_len: compressed.len() as u32,
    };

    (info, compressed)
}

/// Inverse of [`compress_value_column`].
pub fn decompress_value_column(info: &ValueColumnCompressInfo, bytes: &[u8]) -> crate::error::Result<Vec<Value>> {
    let raw = decompress_bytes(info.alg, bytes, info.original_len as usize)?;
    let mut cursor = std::io::Cursor::new(raw);
    let mut values = Vec::with_capacity(info.n_rows as usize);
    for _ in 0..info.n_rows {
        values.push(Value::decode_from(&mut cursor)?);
    }
    Ok(values)
}

/// Compresses a fixed-width `i64` column (used by the 10 `i64` `BrinBlock`
/// fields and the 4 `i64` `TombBlock` fields).
#[must_use]
pub fn compress_i64_column(values: &[i64], alg: CompressionType) -> Vec<u8> {
    let mut raw = Vec::with_capacity(values.len() * 8);
    for v in values {
        raw.write_i64::<BigEndian>(*v).expect("writing to Vec cannot fail");
    }
    compress_bytes(alg, &raw)
}

/// Inverse of [`compress_i64_column`].
pub fn decompress_i64_column(bytes: &[u8], alg: CompressionType, n: usize) -> crate::error::Result<Vec<i64>> {
    let raw = decompress_bytes(alg, bytes, n * 8)?;
    let mut cursor = std::io::Cursor::new(raw);
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(cursor.read_i64::<BigEndian>()?);
    }
    Ok(out)
}

/// Compresses a fixed-width `i32` column (used by the 5 `i32` `BrinBlock`
/// fields).
#[must_use]
pub fn compress_i32_column(values: &[i32], alg: CompressionType) -> Vec<u8> {
    let mut raw = Vec::with_capacity(values.len() * 4);
    for v in values {
        raw.write_i32::<BigEndian>(*v).expect("writing to Vec cannot fail");
    }
    compress_bytes(alg, &raw)
}

/// Inverse of [`compress_i32_column`].
pub fn decompress_i32_column(bytes: &[u8], alg: CompressionType, n: usize) -> crate::error::Result<Vec<i32>> {
    let raw = decompress_bytes(alg, bytes, n * 4)?;
    let mut cursor = std::io::Cursor::new(raw);
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(cursor.read_i32::<BigEndian>()?);
    }
    Ok(out)
}

/// Per-column aggregate summary precomputed per data block: sum, min, max,
/// and null-count.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDataAgg {
    pub cid: i32,
    pub sum: f64,
    pub min: Value,
    pub max: Value,
    pub null_count: u64,
    pub count: u64,
}

impl Encode for ColumnDataAgg {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i32::<BigEndian>(self.cid)?;
        writer.write_f64::<BigEndian>(self.sum)?;
        self.min.encode_into(writer)?;
        self.max.encode_into(writer)?;
        writer.write_u64::<BigEndian>(self.null_count)?;
        writer.write_u64::<BigEndian>(self.count)?;
        Ok(())
    }
}

impl Decode for ColumnDataAgg {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let cid = reader.read_i32::<BigEndian>()?;
        let sum = reader.read_f64::<BigEndian>()?;
        let min = Value::decode_from(reader)?;
        let max = Value::decode_from(reader)?;
        let null_count = reader.read_u64::<BigEndian>()?;
        let count = reader.read_u64::<BigEndian>()?;
        Ok(Self {
            cid,
            sum,
            min,
            max,
            null_count,
            count,
        })
    }
}

/// Computes the SMA for one column's worth of values.
///
/// Returns `None` if every value is null (per the writer's rule of skipping
/// SMA for columns that have no non-null values in the block).
#[must_use]
pub fn compute_sma(cid: i32, values: &[Value]) -> Option<ColumnDataAgg> {
    let mut sum = 0.0_f64;
    let mut min: Option<Value> = None;
    let mut max: Option<Value> = None;
    let mut null_count = 0u64;
    let mut non_null = 0u64;

    for v in values {
        if v.is_null() {
            null_count += 1;
            continue;
        }

        non_null += 1;

        if let Some(n) = numeric(v) {
            sum += n;
        }

        min = Some(match min {
            None => v.clone(),
            Some(m) if *v < m => v.clone(),
            Some(m) => m,
        });
        max = Some(match max {
            None => v.clone(),
            Some(m) if *v > m => v.clone(),
            Some(m) => m,
        });
    }

    let (min, max) = (min?, max?);

    Some(ColumnDataAgg {
        cid,
        sum,
        min,
        max,
        null_count,
        count: non_null,
    })
}

fn numeric(v: &Value) -> Option<f64> {
    Some(match v {
        Value::I8(n) => f64::from(*n),
        Value::I16(n) => f64::from(*n),
        Value::I32(n) => f64::from(*n),
        Value::I64(n) => *n as f64,
        Value::U8(n) => f64::from(*n),
        Value::U16(n) => f64::from(*n),
        Value::U32(n) => f64::from(*n),
        Value::U64(n) => *n as f64,
        Value::F32(n) => f64::from(*n),
        Value::F64(n) => *n,
        Value::Timestamp(n) => *n as f64,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn i64_column_roundtrips_under_each_algorithm() -> crate::Result<()> {
        let values = vec![1, -2, 3, i64::MAX, i64::MIN];
        for alg in [CompressionType::None, CompressionType::Lz4] {
            let bytes = compress_i64_column(&values, alg);
            let back = decompress_i64_column(&bytes, alg, values.len())?;
            assert_eq!(values, back);
        }
        Ok(())
    }

    #[test]
    fn value_column_roundtrips() -> crate::Result<()> {
        let values = vec![Value::I32(1), Value::Null, Value::I32(3)];
        let (info, bytes) = compress_value_column(&values, CompressionType::Lz4);
        let back = decompress_value_column(&info, &bytes)?;
        assert_eq!(values, back);
        Ok(())
    }

    #[test]
    fn sma_skips_all_null_column() {
        assert!(compute_sma(1, &[Value::Null, Value::Null]).is_none());
    }

    #[test]
    fn sma_computes_min_max_sum() {
        let agg = compute_sma(1, &[Value::I32(5), Value::Null, Value::I32(-2)]).unwrap();
        assert_eq!(agg.min, Value::I32(-2));
        assert_eq!(agg.max, Value::I32(5));
        assert_eq!(agg.null_count, 1);
        assert_eq!(agg.count, 2);
        assert!((agg.sum - 3.0).abs() < f64::EPSILON);
    }
}
