// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `TombBlock`: a columnar batch of [`TombRecord`]s, analogous to
//! [`crate::brin::BrinBlock`] but with no primary-key columns.
//!
//! Widened to 5 fixed `i64` columns (`suid`, `uid`, `version`, `skey`,
//! `ekey`) rather than 4: the original system's own commit-drain sentinel
//! sets exactly `{suid, uid, version}`, which confirms `TombRecord` needs a
//! full 5-tuple to also carry the deleted key range.

use super::record::TombRecord;
use crate::codec::{compress_i64_column, decompress_i64_column, CompressionType};
use crate::error::{Error, Result};

/// Names of the 5 fixed `i64` columns, in on-disk order.
pub const I64_FIELDS: [&str; 5] = ["suid", "uid", "version", "skey", "ekey"];

/// An in-memory, growable batch of `TombRecord`s accumulated by the writer
/// before being flushed to `.tomb` as one compressed `TombBlock`.
#[derive(Clone, Debug, Default)]
pub struct TombBlock {
    records: Vec<TombRecord>,
}

impl TombBlock {
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
    pub fn records(&self) -> &[TombRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn is_full(&self, max_row: usize) -> bool {
        self.records.len() >= max_row
    }

    pub fn push(&mut self, record: TombRecord) {
        self.records.push(record);
    }
}

/// Summary over a set of tomb records, used to populate `TombBlk`.
#[derive(Copy, Clone, Debug)]
pub struct TombBlockSummary {
    pub min_ver: i64,
    pub max_ver: i64,
    pub num_rec: u32,
}

#[must_use]
pub fn summarize(records: &[TombRecord]) -> TombBlockSummary {
    assert!(!records.is_empty(), "cannot summarize an empty tomb block");

    let mut min_ver = i64::MAX;
    let mut max_ver = i64::MIN;
    for r in records {
        min_ver = min_ver.min(r.version);
        max_ver = max_ver.max(r.version);
    }

    TombBlockSummary {
        min_ver,
        max_ver,
        num_rec: records.len() as u32,
    }
}

/// Compresses `records` into the on-disk `TombBlock` byte stream, returning
/// the bytes and the compressed length of each of the 5 columns.
#[must_use]
pub fn compress_tomb_block(records: &[TombRecord], alg: CompressionType) -> (Vec<u8>, [u32; 5]) {
    let suid: Vec<i64> = records.iter().map(|r| r.suid).collect();
    let uid: Vec<i64> = records.iter().map(|r| r.uid).collect();
    let version: Vec<i64> = records.iter().map(|r| r.version).collect();
    let skey: Vec<i64> = records.iter().map(|r| r.skey).collect();
    let ekey: Vec<i64> = records.iter().map(|r| r.ekey).collect();

    let columns = [&suid, &uid, &version, &skey, &ekey];

    let mut bytes = Vec::new();
    let mut sizes = [0u32; 5];
    for (i, column) in columns.into_iter().enumerate() {
        let chunk = compress_i64_column(column, alg);
        sizes[i] = chunk.len() as u32;
        bytes.extend_from_slice(&chunk);
    }

    (bytes, sizes)
}

/// Inverse of [`compress_tomb_block`]. Asserts the entire `bytes` buffer is
/// consumed exactly.
pub fn decompress_tomb_block(
    bytes: &[u8],
    sizes: &[u32; 5],
    num_rec: usize,
    alg: CompressionType,
) -> Result<Vec<TombRecord>> {
    let mut offset = 0usize;
    let mut cols: Vec<Vec<i64>> = Vec::with_capacity(5);
    for &size in sizes {
        let chunk = &bytes[offset..offset + size as usize];
        cols.push(decompress_i64_column(chunk, alg, num_rec)?);
        offset += size as usize;
    }

    if offset != bytes.len() {
        return Err(Error::Corruption(format!(
            "tomb block decode consumed {offset} bytes, expected {}",
            bytes.len()
        )));
    }

    let mut records = Vec::with_capacity(num_rec);
    for i in 0..num_rec {
        records.push(TombRecord {
            suid: cols[0][i],
            uid: cols[1][i],
            version: cols[2][i],
            skey: cols[3][i],
            ekey: cols[4][i],
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_records() -> Vec<TombRecord> {
        (0..3)
            .map(|i| TombRecord {
                suid: 1,
                uid: 2,
                version: i + 1,
                skey: i * 10,
                ekey: i * 10 + 5,
            })
            .collect()
    }

    #[test]
    fn roundtrips_under_each_algorithm() -> crate::Result<()> {
        let records = sample_records();
        for alg in [CompressionType::None, CompressionType::Lz4] {
            let (bytes, sizes) = compress_tomb_block(&records, alg);
            let back = decompress_tomb_block(&bytes, &sizes, records.len(), alg)?;
            assert_eq!(records, back);
        }
        Ok(())
    }

    #[test]
    fn summarize_computes_version_bounds() {
        let summary = summarize(&sample_records());
        assert_eq!(summary.min_ver, 1);
        assert_eq!(summary.max_ver, 3);
        assert_eq!(summary.num_rec, 3);
    }
}
