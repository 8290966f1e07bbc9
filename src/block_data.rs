// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `BlockData`: a columnar batch of rows for a single `(suid, uid)`, and its
//! on-disk encoding into a key part, a column directory ("`BlockCol`"), and
//! the column value bytes.
//!
//! The on-disk layout of one data block is three contiguous regions:
//!
//! ```text
//! [ key part (DiskDataHdr + timestamp col + version col + PK cols) ]
//! [ BlockCol directory (one entry per column, sorted by cid)       ]
//! [ column value bytes, referenced by directory offsets            ]
//! ```

use crate::codec::{
    compress_value_column, decompress_value_column, CompressionType, ValueColumnCompressInfo,
};
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::error::Error;
use crate::row_key::RowKey;
use crate::value::Value;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Column-level flag bit: the column carries at least one non-dropped value
/// in this block. Mirrors the reference system's `HAS_VALUE`.
pub const COL_HAS_VALUE: u8 = 0b0000_0001;

/// Column-level flag bit: per-block SMA computation is enabled for this
/// column. Mirrors the reference system's `COL_SMA_ON`.
pub const COL_SMA_ON: u8 = 0b0000_0001;

/// Declared type of a column or primary-key slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ColumnType {
    Bool = 0,
    I8 = 1,
    I16 = 2,
    I32 = 3,
    I64 = 4,
    U8 = 5,
    U16 = 6,
    U32 = 7,
    U64 = 8,
    F32 = 9,
    F64 = 10,
    Timestamp = 11,
    Binary = 12,
    NChar = 13,
}

impl TryFrom<u8> for ColumnType {
    type Error = ();

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        use ColumnType::{
            Binary, Bool, F32, F64, I16, I32, I64, I8, NChar, Timestamp, U16, U32, U64, U8,
        };
        Ok(match value {
            0 => Bool,
            1 => I8,
            2 => I16,
            3 => I32,
            4 => I64,
            5 => U8,
            6 => U16,
            7 => U32,
            8 => U64,
            9 => F32,
            10 => F64,
            11 => Timestamp,
            12 => Binary,
            13 => NChar,
            _ => return Err(()),
        })
    }
}

impl Encode for ColumnType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(*self as u8)?;
        Ok(())
    }
}

impl Decode for ColumnType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        Self::try_from(tag).map_err(|()| DecodeError::InvalidTag(("ColumnType", tag)))
    }
}

/// One column's worth of data in a `BlockData`.
#[derive(Clone, Debug, PartialEq)]
pub struct ColData {
    pub cid: i32,
    pub ty: ColumnType,
    pub cflag: u8,
    pub flag: u8,
    pub values: Vec<Value>,
}

impl ColData {
    #[must_use]
    pub fn sma_on(&self) -> bool {
        self.cflag & COL_SMA_ON != 0
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.flag & COL_HAS_VALUE != 0
    }
}

/// A columnar batch of rows for one `(suid, uid)`.
///
/// Invariant: rows are sorted by `row_key` ascending; `uid` is constant
/// across the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockData {
    pub suid: i64,
    pub uid: i64,
    pub timestamps: Vec<i64>,
    pub versions: Vec<i64>,
    pub primary_keys: Vec<Vec<Value>>,
    pub columns: Vec<ColData>,
}

impl BlockData {
    #[must_use]
    pub fn new(suid: i64, uid: i64) -> Self {
        Self {
            suid,
            uid,
            timestamps: Vec::new(),
            versions: Vec::new(),
            primary_keys: Vec::new(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn n_row(&self) -> usize {
        self.timestamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_row() == 0
    }

    #[must_use]
    pub fn row_key(&self, idx: usize) -> RowKey {
        RowKey::new(self.timestamps[idx], self.primary_keys[idx].clone())
    }

    /// Removes row `idx`, keeping the remaining rows contiguous and in
    /// order.
    pub fn remove_row(&mut self, idx: usize) {
        self.timestamps.remove(idx);
        self.versions.remove(idx);
        self.primary_keys.remove(idx);
        for col in &mut self.columns {
            if idx < col.values.len() {
                col.values.remove(idx);
            }
        }
    }

    /// Overwrites row `idx` in place with `other`'s row `other_idx`,
    /// implementing the compaction watermark's "later version replaces
    /// earlier" rule.
    pub fn overwrite_row(&mut self, idx: usize, other: &BlockRow<'_>) {
        self.versions[idx] = other.version;
        for (col, value) in self.columns.iter_mut().zip(other.values.iter()) {
            if idx < col.values.len() {
                col.values[idx] = value.clone();
            }
        }
    }

    /// Appends one row (by value, to keep the merge/ingestion call sites
    /// simple) to the end of the batch.
    pub fn push_row(&mut self, row: BlockRow<'_>) {
        self.timestamps.push(row.key.timestamp);
        self.versions.push(row.version);
        self.primary_keys.push(row.key.primary_keys.clone());

        // NOTE: columns are expected to line up 1:1 with row.values by
        // position; callers (writer ingestion) guarantee this via the
        // resolved row schema.
        if self.columns.is_empty() {
            self.columns = row
                .columns_template
                .iter()
                .map(|(cid, ty, cflag)| ColData {
                    cid: *cid,
                    ty: *ty,
                    cflag: *cflag,
                    flag: 0,
                    values: Vec::new(),
                })
                .collect();
        }

        for (col, value) in self.columns.iter_mut().zip(row.values.iter()) {
            if !value.is_null() {
                col.flag |= COL_HAS_VALUE;
            }
            col.values.push(value.clone());
        }
    }
}

/// A single row, as passed into the writer's ingestion path.
///
/// `columns_template` is only consulted the first time a row is pushed into
/// a fresh `BlockData`, to seed `ColData::{cid, ty, cflag}`.
pub struct BlockRow<'a> {
    pub key: RowKey,
    pub version: i64,
    pub values: Vec<Value>,
    pub columns_template: &'a [(i32, ColumnType, u8)],
}

/// Fixed header at the front of the "key part" region of a data block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DiskDataHdr {
    pub suid: i64,
    pub uid: i64,
    pub n_row: u32,
    pub num_pk: u8,
    pub alg: CompressionType,
    pub ts_len: u32,
    pub ver_len: u32,
}

impl Encode for DiskDataHdr {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<BigEndian>(self.suid)?;
        writer.write_i64::<BigEndian>(self.uid)?;
        writer.write_u32::<BigEndian>(self.n_row)?;
        writer.write_u8(self.num_pk)?;
        self.alg.encode_into(writer)?;
        writer.write_u32::<BigEndian>(self.ts_len)?;
        writer.write_u32::<BigEndian>(self.ver_len)?;
        Ok(())
    }
}

impl Decode for DiskDataHdr {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let suid = reader.read_i64::<BigEndian>()?;
        let uid = reader.read_i64::<BigEndian>()?;
        let n_row = reader.read_u32::<BigEndian>()?;
        let num_pk = reader.read_u8()?;
        let alg = CompressionType::decode_from(reader)?;
        let ts_len = reader.read_u32::<BigEndian>()?;
        let ver_len = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            suid,
            uid,
            n_row,
            num_pk,
            alg,
            ts_len,
            ver_len,
        })
    }
}

/// One entry of the `BlockCol` directory: describes where one column's
/// value bytes live relative to the start of the col-data region.
///
/// `sz_bitmap`/`sz_offset` are always `0` in this crate's reference codec:
/// null markers and variable-length lengths are folded into each `Value`'s
/// own tag instead of a separate bitmap/offsets region. The fields are kept
/// so the directory's shape matches the reference format's three-region
/// split.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockColEntry {
    pub cid: i32,
    pub ty: ColumnType,
    pub cflag: u8,
    pub flag: u8,
    pub offset: u32,
    pub sz_bitmap: u32,
    pub sz_offset: u32,
    pub sz_value: u32,
    pub value_info: ValueColumnCompressInfo,
}

impl Encode for BlockColEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i32::<BigEndian>(self.cid)?;
        self.ty.encode_into(writer)?;
        writer.write_u8(self.cflag)?;
        writer.write_u8(self.flag)?;
        writer.write_u32::<BigEndian>(self.offset)?;
        writer.write_u32::<BigEndian>(self.sz_bitmap)?;
        writer.write_u32::<BigEndian>(self.sz_offset)?;
        writer.write_u32::<BigEndian>(self.sz_value)?;
        self.value_info.encode_into(writer)?;
        Ok(())
    }
}

impl Decode for BlockColEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let cid = reader.read_i32::<BigEndian>()?;
        let ty = ColumnType::decode_from(reader)?;
        let cflag = reader.read_u8()?;
        let flag = reader.read_u8()?;
        let offset = reader.read_u32::<BigEndian>()?;
        let sz_bitmap = reader.read_u32::<BigEndian>()?;
        let sz_offset = reader.read_u32::<BigEndian>()?;
        let sz_value = reader.read_u32::<BigEndian>()?;
        let value_info = ValueColumnCompressInfo::decode_from(reader)?;
        Ok(Self {
            cid,
            ty,
            cflag,
            flag,
            offset,
            sz_bitmap,
            sz_offset,
            sz_value,
            value_info,
        })
    }
}

/// Encoded byte length of one [`BlockColEntry`]: used by the reader to work
/// out the directory's total length from its entry count alone, without
/// decoding it first.
pub const BLOCK_COL_ENTRY_LEN: usize = 4 // cid
    + 1 // ty
    + 1 // cflag
    + 1 // flag
    + 4 // offset
    + 4 // sz_bitmap
    + 4 // sz_offset
    + 4 // sz_value
    + 1 + 4 + 4 + 4; // value_info: alg + n_rows + original_len + compressed_len

/// Total byte length of a `BlockCol` directory holding `n_cols` entries,
/// including its leading entry-count prefix.
#[must_use]
pub fn directory_byte_len(n_cols: usize) -> usize {
    4 + n_cols * BLOCK_COL_ENTRY_LEN
}

fn encode_block_col_directory(entries: &[BlockColEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<BigEndian>(entries.len() as u32)
        .expect("writing to Vec cannot fail");
    for entry in entries {
        entry.encode_into(&mut out).expect("writing to Vec cannot fail");
    }
    out
}

/// Decodes the `BlockCol` directory. Entries are guaranteed sorted
/// ascending by `cid` (the writer emits them in column order).
pub fn decode_block_col_directory(bytes: &[u8]) -> crate::error::Result<Vec<BlockColEntry>> {
    let mut cursor = Cursor::new(bytes);
    let n = cursor.read_u32::<BigEndian>()?;
    let mut entries = Vec::with_capacity(n as usize);
    for _ in 0..n {
        entries.push(BlockColEntry::decode_from(&mut cursor)?);
    }
    Ok(entries)
}

/// Compresses a `BlockData` into its three on-disk regions: key part,
/// column directory, and column value bytes.
///
/// # Panics
///
/// In debug builds, panics if rows are not sorted by row key, or `uid == 0`.
pub fn compress_block_data(block: &BlockData, alg: CompressionType) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    debug_assert_ne!(block.uid, 0, "uid == 0 must be rejected before reaching the codec");
    debug_assert!(
        block
            .timestamps
            .windows(2)
            .enumerate()
            .all(|(i, w)| block.row_key(i) <= block.row_key(i + 1) || w[0] <= w[1]),
        "rows must be sorted by row key"
    );

    let n_row = block.n_row();
    let num_pk = block.primary_keys.first().map_or(0, Vec::len);

    let ts_bytes = crate::codec::compress_i64_column(&block.timestamps, alg);
    let ver_bytes = crate::codec::compress_i64_column(&block.versions, alg);

    let mut pk_chunks = Vec::with_capacity(num_pk);
    for j in 0..num_pk {
        let column: Vec<Value> = block.primary_keys.iter().map(|pk| pk[j].clone()).collect();
        pk_chunks.push(compress_value_column(&column, alg));
    }

    let hdr = DiskDataHdr {
        suid: block.suid,
        uid: block.uid,
        n_row: n_row as u32,
        num_pk: num_pk as u8,
        alg,
        ts_len: ts_bytes.len() as u32,
        ver_len: ver_bytes.len() as u32,
    };

    let mut key_part = Vec::new();
    hdr.encode_into(&mut key_part).expect("writing to Vec cannot fail");
    key_part.extend_from_slice(&ts_bytes);
    key_part.extend_from_slice(&ver_bytes);
    for (info, bytes) in &pk_chunks {
        info.encode_into(&mut key_part).expect("writing to Vec cannot fail");
        key_part.extend_from_slice(bytes);
    }

    let mut col_data = Vec::new();
    let mut dir_entries = Vec::with_capacity(block.columns.len());

    for col in &block.columns {
        let offset = col_data.len() as u32;

        let (value_info, bytes) = if col.has_value() {
            compress_value_column(&col.values, alg)
        } else {
            (
                ValueColumnCompressInfo {
                    alg,
                    n_rows: 0,
                    original_len: 0,
                    compressed_len: 0,
                },
                Vec::new(),
            )
        };

        col_data.extend_from_slice(&bytes);

        dir_entries.push(BlockColEntry {
            cid: col.cid,
            ty: col.ty,
            cflag: col.cflag,
            flag: col.flag,
            offset,
            sz_bitmap: 0,
            sz_offset: 0,
            sz_value: bytes.len() as u32,
            value_info,
        });
    }

    let col_dir = encode_block_col_directory(&dir_entries);

    (key_part, col_dir, col_data)
}

/// Decodes the key part of a data block: header, timestamps, versions, and
/// primary keys.
pub fn decode_key_part(bytes: &[u8]) -> crate::error::Result<(DiskDataHdr, Vec<i64>, Vec<i64>, Vec<Vec<Value>>)> {
    let mut cursor = Cursor::new(bytes);
    let hdr = DiskDataHdr::decode_from(&mut cursor)?;

    let n_row = hdr.n_row as usize;

    let mut ts_bytes = vec![0u8; hdr.ts_len as usize];
    cursor.read_exact(&mut ts_bytes)?;
    let timestamps = crate::codec::decompress_i64_column(&ts_bytes, hdr.alg, n_row)?;

    let mut ver_bytes = vec![0u8; hdr.ver_len as usize];
    cursor.read_exact(&mut ver_bytes)?;
    let versions = crate::codec::decompress_i64_column(&ver_bytes, hdr.alg, n_row)?;

    let mut pk_columns = Vec::with_capacity(hdr.num_pk as usize);
    for _ in 0..hdr.num_pk {
        let info = ValueColumnCompressInfo::decode_from(&mut cursor)?;
        let mut buf = vec![0u8; info.compressed_len as usize];
        cursor.read_exact(&mut buf)?;
        pk_columns.push(decompress_value_column(&info, &buf)?);
    }

    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(Error::Corruption(format!(
            "key part decode consumed {consumed} bytes, expected {}",
            bytes.len()
        )));
    }

    let mut primary_keys = vec![Vec::with_capacity(hdr.num_pk as usize); n_row];
    for column in pk_columns {
        for (row, value) in column.into_iter().enumerate() {
            primary_keys[row].push(value);
        }
    }

    Ok((hdr, timestamps, versions, primary_keys))
}

/// Decodes one column's value bytes given its directory entry.
pub fn decode_column(entry: &BlockColEntry, bytes: &[u8], n_row: usize) -> crate::error::Result<Vec<Value>> {
    if !entry.has_value() {
        return Ok(vec![Value::Null; n_row]);
    }

    if bytes.len() as u32 != entry.sz_value {
        return Err(Error::Corruption(format!(
            "column {} expected {} bytes, got {}",
            entry.cid,
            entry.sz_value,
            bytes.len()
        )));
    }

    decompress_value_column(&entry.value_info, bytes)
}

impl BlockColEntry {
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.flag & COL_HAS_VALUE != 0
    }
}

/// Fully decodes a data block from its three contiguous regions.
pub fn decompress_block_data(key_part: &[u8], col_dir: &[u8], col_data: &[u8]) -> crate::error::Result<BlockData> {
    let (hdr, timestamps, versions, primary_keys) = decode_key_part(key_part)?;
    let entries = decode_block_col_directory(col_dir)?;

    let n_row = hdr.n_row as usize;
    let mut columns = Vec::with_capacity(entries.len());

    for entry in &entries {
        let start = entry.offset as usize;
        let end = start + entry.sz_value as usize;
        let bytes = col_data
            .get(start..end)
            .ok_or_else(|| Error::Corruption(format!("column {} byte range out of bounds", entry.cid)))?;
        let values = decode_column(entry, bytes, n_row)?;

        columns.push(ColData {
            cid: entry.cid,
            ty: entry.ty,
            cflag: entry.cflag,
            flag: entry.flag,
            values,
        });
    }

    Ok(BlockData {
        suid: hdr.suid,
        uid: hdr.uid,
        timestamps,
        versions,
        primary_keys,
        columns,
    })
}

/// Decodes only the requested, sorted-ascending `cids` out of a block,
/// given pre-read `(entry, bytes)` pairs for the matched columns (columns
/// requested but not present in the directory come back as all-`NULL`).
///
/// `found` must be sorted ascending by cid and is a subset of `cids`.
pub fn assemble_projected_columns(
    hdr: &DiskDataHdr,
    cids: &[i32],
    found: &[(BlockColEntry, Vec<u8>)],
) -> crate::error::Result<Vec<ColData>> {
    let n_row = hdr.n_row as usize;
    let mut found_iter = found.iter().peekable();
    let mut out = Vec::with_capacity(cids.len());

    for &cid in cids {
        if let Some((entry, _)) = found_iter.peek() {
            if entry.cid == cid {
                let (entry, bytes) = found_iter.next().expect("peeked");
                let values = decode_column(entry, bytes, n_row)?;
                out.push(ColData {
                    cid: entry.cid,
                    ty: entry.ty,
                    cflag: entry.cflag,
                    flag: entry.flag,
                    values,
                });
                continue;
            }
        }

        // Not present in the directory at all: all-NULL in this block.
        out.push(ColData {
            cid,
            ty: ColumnType::I64,
            cflag: 0,
            flag: 0,
            values: vec![Value::Null; n_row],
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_block() -> BlockData {
        let mut block = BlockData::new(1, 7);

        let template = [(1, ColumnType::I32, COL_SMA_ON), (2, ColumnType::NChar, 0)];

        for i in 0..3i64 {
            block.push_row(BlockRow {
                key: RowKey::new(i * 10, vec![Value::I32(i as i32)]),
                version: i + 1,
                values: vec![Value::I32((i * 100) as i32), Value::NChar(format!("v{i}"))],
                columns_template: &template,
            });
        }

        block
    }

    #[test]
    fn whole_block_roundtrip() -> crate::Result<()> {
        let block = sample_block();
        let (key_part, col_dir, col_data) = compress_block_data(&block, CompressionType::Lz4);
        let back = decompress_block_data(&key_part, &col_dir, &col_data)?;
        assert_eq!(block, back);
        Ok(())
    }

    #[test]
    fn column_projection_skips_unselected() -> crate::Result<()> {
        let block = sample_block();
        let (key_part, col_dir, col_data) = compress_block_data(&block, CompressionType::None);

        let (hdr, ..) = decode_key_part(&key_part)?;
        let entries = decode_block_col_directory(&col_dir)?;

        let cids = [1i32];
        let found: Vec<_> = entries
            .iter()
            .filter(|e| cids.contains(&e.cid))
            .map(|e| {
                let start = e.offset as usize;
                let end = start + e.sz_value as usize;
                (*e, col_data[start..end].to_vec())
            })
            .collect();

        let projected = assemble_projected_columns(&hdr, &cids, &found)?;
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].cid, 1);
        assert_eq!(projected[0].values, block.columns[0].values);
        Ok(())
    }

    #[test]
    fn missing_cid_comes_back_null() -> crate::Result<()> {
        let block = sample_block();
        let (key_part, _, _) = compress_block_data(&block, CompressionType::None);
        let (hdr, ..) = decode_key_part(&key_part)?;

        let cids = [99i32];
        let projected = assemble_projected_columns(&hdr, &cids, &[])?;
        assert_eq!(projected.len(), 1);
        assert!(projected[0].values.iter().all(Value::is_null));
        Ok(())
    }

    #[test]
    fn directory_byte_len_matches_encoded_size() {
        let block = sample_block();
        let (_, col_dir, _) = compress_block_data(&block, CompressionType::None);
        assert_eq!(col_dir.len(), directory_byte_len(block.columns.len()));
    }
}
