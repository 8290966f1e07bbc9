// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `BrinBlock`: a columnar batch of [`BrinRecord`]s.
//!
//! Laid out as 10 `i64` columns followed by 5 `i32` columns (the fixed
//! schedule named in [`I64_FIELDS`]/[`I32_FIELDS`]), then `num_of_pks` pairs
//! of compressed primary-key value-columns (first-key PKs, then last-key
//! PKs). Each of the 15 primitive columns is compressed independently and
//! its compressed length recorded in the caller's `size: [u32; 15]` array
//! (see [`crate::brin::blk::BrinBlk`]); the PK value-column chunks are
//! self-describing via an embedded [`crate::codec::ValueColumnCompressInfo`]
//! header, so no extra length bookkeeping is needed for them.

use super::record::BrinRecord;
use crate::codec::{
    compress_i32_column, compress_i64_column, compress_value_column, decompress_i32_column,
    decompress_i64_column, decompress_value_column, CompressionType, ValueColumnCompressInfo,
};
use crate::coding::{Decode, Encode};
use crate::error::{Error, Result};
use crate::row_key::RowKey;
use crate::table_id::TableId;
use crate::value::Value;
use std::io::Cursor;

/// Names of the 10 fixed `i64` columns, in on-disk order.
pub const I64_FIELDS: [&str; 10] = [
    "suid",
    "uid",
    "min_ver",
    "max_ver",
    "block_offset",
    "sma_offset",
    "first_key_ts",
    "last_key_ts",
    "num_row",
    "count",
];

/// Names of the 5 fixed `i32` columns, in on-disk order. The last two are
/// reserved for future fields and always encode as `0`.
pub const I32_FIELDS: [&str; 5] = ["block_key_size", "block_size", "sma_size", "reserved0", "reserved1"];

/// An in-memory, growable batch of `BrinRecord`s accumulated by the writer
/// before being flushed to `.head` as one compressed `BrinBlock`.
#[derive(Clone, Debug, Default)]
pub struct BrinBlock {
    records: Vec<BrinRecord>,
}

impl BrinBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[BrinRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn is_full(&self, max_row: usize) -> bool {
        self.records.len() >= max_row
    }

    /// Appends `record`, rejecting it with `InvalidArgument` if its
    /// first/last-key primary-key arity or element types are incompatible
    /// with records already buffered (the "incompatible-PK" case the writer
    /// must flush-and-retry on).
    pub fn put(&mut self, record: BrinRecord) -> Result<()> {
        if let Some(existing) = self.records.first() {
            if !pk_shapes_compatible(&existing.first_key, &record.first_key) {
                return Err(Error::InvalidArgument(format!(
                    "brin block PK shape mismatch: expected arity {}, got {}",
                    existing.num_pks(),
                    record.num_pks()
                )));
            }
        }
        self.records.push(record);
        Ok(())
    }
}

fn pk_shapes_compatible(a: &RowKey, b: &RowKey) -> bool {
    if a.primary_keys.len() != b.primary_keys.len() {
        return false;
    }
    a.primary_keys
        .iter()
        .zip(b.primary_keys.iter())
        .all(|(x, y)| std::mem::discriminant(x) == std::mem::discriminant(y))
}

/// Summary statistics over a set of records, used to populate `BrinBlk`.
#[derive(Copy, Clone, Debug)]
pub struct BrinBlockSummary {
    pub min_tbid: TableId,
    pub max_tbid: TableId,
    pub min_ver: i64,
    pub max_ver: i64,
    pub num_rec: u32,
    pub num_of_pks: u8,
}

/// Computes [`BrinBlockSummary`] over `records`. Panics if `records` is
/// empty; callers must not flush an empty block.
#[must_use]
pub fn summarize(records: &[BrinRecord]) -> BrinBlockSummary {
    assert!(!records.is_empty(), "cannot summarize an empty brin block");

    let min_tbid = TableId::new(records[0].suid, records[0].uid);
    let max_tbid = TableId::new(
        records[records.len() - 1].suid,
        records[records.len() - 1].uid,
    );

    let mut min_ver = i64::MAX;
    let mut max_ver = i64::MIN;
    for r in records {
        min_ver = min_ver.min(r.min_ver);
        max_ver = max_ver.max(r.max_ver);
    }

    BrinBlockSummary {
        min_tbid,
        max_tbid,
        min_ver,
        max_ver,
        num_rec: records.len() as u32,
        num_of_pks: records[0].num_pks() as u8,
    }
}

/// Compresses `records` into the on-disk `BrinBlock` byte stream, returning
/// the bytes and the compressed length of each of the 15 primitive columns.
#[must_use]
pub fn compress_brin_block(records: &[BrinRecord], alg: CompressionType) -> (Vec<u8>, [u32; 15]) {
    let n = records.len();

    let suid: Vec<i64> = records.iter().map(|r| r.suid).collect();
    let uid: Vec<i64> = records.iter().map(|r| r.uid).collect();
    let min_ver: Vec<i64> = records.iter().map(|r| r.min_ver).collect();
    let max_ver: Vec<i64> = records.iter().map(|r| r.max_ver).collect();
    let block_offset: Vec<i64> = records.iter().map(|r| r.block_offset as i64).collect();
    let sma_offset: Vec<i64> = records.iter().map(|r| r.sma_offset as i64).collect();
    let first_key_ts: Vec<i64> = records.iter().map(|r| r.first_key.timestamp).collect();
    let last_key_ts: Vec<i64> = records.iter().map(|r| r.last_key.timestamp).collect();
    let num_row: Vec<i64> = records.iter().map(|r| i64::from(r.num_row)).collect();
    let count: Vec<i64> = records.iter().map(|r| i64::from(r.count)).collect();

    let i64_columns = [
        &suid,
        &uid,
        &min_ver,
        &max_ver,
        &block_offset,
        &sma_offset,
        &first_key_ts,
        &last_key_ts,
        &num_row,
        &count,
    ];

    let block_key_size: Vec<i32> = records.iter().map(|r| r.block_key_size as i32).collect();
    let block_size: Vec<i32> = records.iter().map(|r| r.block_size as i32).collect();
    let sma_size: Vec<i32> = records.iter().map(|r| r.sma_size as i32).collect();
    let reserved0 = vec![0i32; n];
    let reserved1 = vec![0i32; n];

    let i32_columns = [&block_key_size, &block_size, &sma_size, &reserved0, &reserved1];

    let mut bytes = Vec::new();
    let mut sizes = [0u32; 15];

    for (i, column) in i64_columns.into_iter().enumerate() {
        let chunk = compress_i64_column(column, alg);
        sizes[i] = chunk.len() as u32;
        bytes.extend_from_slice(&chunk);
    }

    for (i, column) in i32_columns.into_iter().enumerate() {
        let chunk = compress_i32_column(column, alg);
        sizes[10 + i] = chunk.len() as u32;
        bytes.extend_from_slice(&chunk);
    }

    let num_of_pks = records.first().map_or(0, BrinRecord::num_pks);
    for pk_idx in 0..num_of_pks {
        for key_selector in [KeySelector::First, KeySelector::Last] {
            let column: Vec<Value> = records
                .iter()
                .map(|r| match key_selector {
                    KeySelector::First => r.first_key.primary_keys[pk_idx].clone(),
                    KeySelector::Last => r.last_key.primary_keys[pk_idx].clone(),
                })
                .collect();
            let (info, chunk) = compress_value_column(&column, alg);
            info.encode_into(&mut bytes).expect("writing to Vec cannot fail");
            bytes.extend_from_slice(&chunk);
        }
    }

    (bytes, sizes)
}

#[derive(Copy, Clone)]
enum KeySelector {
    First,
    Last,
}

/// Inverse of [`compress_brin_block`]. Asserts the entire `bytes` buffer is
/// consumed exactly; any residue is a corruption error.
pub fn decompress_brin_block(
    bytes: &[u8],
    sizes: &[u32; 15],
    num_rec: usize,
    num_of_pks: usize,
    alg: CompressionType,
) -> Result<Vec<BrinRecord>> {
    let mut offset = 0usize;
    let mut i64_cols: Vec<Vec<i64>> = Vec::with_capacity(10);
    for &size in &sizes[0..10] {
        let chunk = &bytes[offset..offset + size as usize];
        i64_cols.push(decompress_i64_column(chunk, alg, num_rec)?);
        offset += size as usize;
    }

    let mut i32_cols: Vec<Vec<i32>> = Vec::with_capacity(5);
    for &size in &sizes[10..15] {
        let chunk = &bytes[offset..offset + size as usize];
        i32_cols.push(decompress_i32_column(chunk, alg, num_rec)?);
        offset += size as usize;
    }

    let mut first_pk_cols: Vec<Vec<Value>> = Vec::with_capacity(num_of_pks);
    let mut last_pk_cols: Vec<Vec<Value>> = Vec::with_capacity(num_of_pks);
    for _ in 0..num_of_pks {
        let mut cursor = Cursor::new(&bytes[offset..]);
        let info = ValueColumnCompressInfo::decode_from(&mut cursor)?;
        let header_len = cursor.position() as usize;
        offset += header_len;
        let chunk = &bytes[offset..offset + info.compressed_len as usize];
        first_pk_cols.push(decompress_value_column(&info, chunk)?);
        offset += info.compressed_len as usize;

        let mut cursor = Cursor::new(&bytes[offset..]);
        let info = ValueColumnCompressInfo::decode_from(&mut cursor)?;
        let header_len = cursor.position() as usize;
        offset += header_len;
        let chunk = &bytes[offset..offset + info.compressed_len as usize];
        last_pk_cols.push(decompress_value_column(&info, chunk)?);
        offset += info.compressed_len as usize;
    }

    if offset != bytes.len() {
        return Err(Error::Corruption(format!(
            "brin block decode consumed {offset} bytes, expected {}",
            bytes.len()
        )));
    }

    let mut records = Vec::with_capacity(num_rec);
    for i in 0..num_rec {
        let first_pks: Vec<Value> = first_pk_cols.iter().map(|c| c[i].clone()).collect();
        let last_pks: Vec<Value> = last_pk_cols.iter().map(|c| c[i].clone()).collect();

        records.push(BrinRecord {
            suid: i64_cols[0][i],
            uid: i64_cols[1][i],
            first_key: RowKey::new(i64_cols[6][i], first_pks),
            last_key: RowKey::new(i64_cols[7][i], last_pks),
            min_ver: i64_cols[2][i],
            max_ver: i64_cols[3][i],
            block_offset: i64_cols[4][i] as u64,
            block_key_size: i32_cols[0][i] as u32,
            block_size: i32_cols[1][i] as u32,
            sma_offset: i64_cols[5][i] as u64,
            sma_size: i32_cols[2][i] as u32,
            num_row: i64_cols[8][i] as u32,
            count: i64_cols[9][i] as u32,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_records() -> Vec<BrinRecord> {
        (0..4)
            .map(|i| BrinRecord {
                suid: 1,
                uid: 2,
                first_key: RowKey::new(i * 100, vec![Value::I32(i as i32)]),
                last_key: RowKey::new(i * 100 + 50, vec![Value::I32(i as i32)]),
                min_ver: i + 1,
                max_ver: i + 2,
                block_offset: (i as u64) * 1000,
                block_key_size: 16,
                block_size: 256,
                sma_offset: (i as u64) * 64,
                sma_size: 32,
                num_row: 10,
                count: 10,
            })
            .collect()
    }

    #[test]
    fn roundtrips_under_each_algorithm() -> crate::Result<()> {
        let records = sample_records();
        for alg in [CompressionType::None, CompressionType::Lz4] {
            let (bytes, sizes) = compress_brin_block(&records, alg);
            let back = decompress_brin_block(&bytes, &sizes, records.len(), 1, alg)?;
            assert_eq!(records, back);
        }
        Ok(())
    }

    #[test]
    fn summarize_computes_tbid_and_version_bounds() {
        let records = sample_records();
        let summary = summarize(&records);
        assert_eq!(summary.min_tbid, TableId::new(1, 2));
        assert_eq!(summary.max_tbid, TableId::new(1, 2));
        assert_eq!(summary.min_ver, 1);
        assert_eq!(summary.max_ver, 5);
        assert_eq!(summary.num_rec, 4);
        assert_eq!(summary.num_of_pks, 1);
    }

    #[test]
    fn put_rejects_incompatible_pk_shape() {
        let mut block = BrinBlock::new();
        block.put(sample_records().remove(0)).unwrap();

        let mut mismatched = sample_records().remove(1);
        mismatched.first_key = RowKey::new(0, vec![Value::NChar("x".into())]);

        assert!(block.put(mismatched).is_err());
    }
}
