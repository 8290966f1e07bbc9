// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk read/write core for one time-series file group: four parallel
//! files (`.data`, `.sma`, `.head`, `.tomb`) indexed by a two-level sparse
//! "brin" index, written by streaming merge against a prior file group and
//! committed atomically through a file-op log.
//!
//! ##### NOTE
//!
//! > This crate only provides the on-disk file-group format and its
//! > reader/writer. It does not own table/schema metadata, a write-ahead
//! > log, or a query planner — those are external collaborators reached
//! > through the [`MetaCatalog`] and [`SchemaCache`] traits.
//!
//! ##### About
//!
//! [`Reader`] gives random access to a committed file group: its footers,
//! its sparse brin/tombstone indexes, whole or column-projected data
//! blocks, and per-column SMA (min/max/sum/count) aggregates.
//!
//! [`Writer`] ingests rows or whole pre-assembled blocks in non-decreasing
//! key order, optionally merging them against an older file group (dropped
//! tables are filtered via [`MetaCatalog`], rows at or below a compaction
//! watermark are overwritten in place), and finishes with [`Writer::commit`]
//! or [`Writer::abort`].

pub mod block_data;
pub mod brin;
pub mod catalog;
pub mod codec;
pub mod coding;
pub mod disk_ptr;
pub mod error;
pub mod fd;
pub mod file_header;
pub mod file_op;
pub mod footer;
pub mod reader;
pub mod row_key;
pub mod schema;
pub mod stfile;
pub mod table_id;
pub mod tomb;
pub mod value;
pub mod writer;

pub use block_data::{BlockData, BlockRow, ColData, ColumnType};
pub use catalog::{MetaCatalog, TableInfo};
pub use codec::CompressionType;
pub use coding::{Decode, DecodeError, Encode, EncodeError};
pub use disk_ptr::DiskPtr;
pub use error::{Error, Result};
pub use fd::Fd;
pub use file_op::{FileOp, FileOpLog};
pub use reader::{FileGroupPaths, Reader, ReaderConfig};
pub use row_key::RowKey;
pub use schema::{RowSchema, SchemaCache};
pub use stfile::{FileType, STFile, VersionRange};
pub use table_id::TableId;
pub use value::Value;
pub use writer::{OldFiles, RowInfo, Writer, WriterConfig};
