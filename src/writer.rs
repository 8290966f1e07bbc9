// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Streaming writer for one file group: row/block ingestion merged against
//! an optional prior file group, tombstone ingestion merged the same way,
//! and an atomic commit that returns the resulting file-op log.

use crate::block_data::{BlockData, BlockRow, ColumnType};
use crate::brin::{self, BrinBlk, BrinBlock, BrinRecord};
use crate::catalog::{MetaCatalog, TableInfo};
use crate::coding::Encode;
use crate::disk_ptr::DiskPtr;
use crate::error::{Error, Result};
use crate::fd::Fd;
use crate::file_header::write_zero_header;
use crate::file_op::{FileOp, FileOpLog};
use crate::footer::{HeadFooter, TombFooter};
use crate::reader::{FileGroupPaths, Reader, ReaderConfig};
use crate::row_key::RowKey;
use crate::schema::SchemaCache;
use crate::stfile::{FileType, STFile, VersionRange};
use crate::table_id::TableId;
use crate::tomb::{self, TombBlk, TombBlock, TombRecord};
use crate::value::Value;
use std::cmp::Ordering;
use std::path::PathBuf;

/// Explicit tagged state machine modeling the writer's position in the
/// row-merge cursor, in place of the reference engine's ad hoc `ctx` struct
/// and sentinel-record trick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MergeCursor {
    /// No table has been opened yet.
    Idle,
    /// Forwarding/dropping old records that belong to tables strictly
    /// before the table just opened.
    SkippingOlderTables,
    /// Merging new and old rows for the named table (`uid`).
    DrainingTable(i64),
    /// The merge has been driven all the way past every table (commit).
    Done,
}

/// Which of the prior file group's four files exist, and their `STFile`
/// records (used to decide whether `.data`/`.sma` are created fresh or
/// extended, and to carry forward version ranges on removal).
#[derive(Clone, Debug, Default)]
pub struct OldFiles {
    pub head: Option<STFile>,
    pub data: Option<STFile>,
    pub sma: Option<STFile>,
    pub tomb: Option<STFile>,
}

/// Construction-time configuration for a [`Writer`].
///
/// `.data`/`.sma` are extended in place, so they carry a single path used
/// both for the embedded reader's old-side access and the writer's
/// append-side access. `.head`/`.tomb` are always rewritten fresh at a new
/// path, with the prior file (if any) named separately so it can be
/// scheduled for removal at commit.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub fid: i64,
    pub cid: i64,
    pub did: i32,
    pub data_path: PathBuf,
    pub sma_path: PathBuf,
    pub head_path: PathBuf,
    pub tomb_path: PathBuf,
    pub old_head_path: Option<PathBuf>,
    pub old_tomb_path: Option<PathBuf>,
    pub old_files: OldFiles,
    pub cmpr_alg: crate::codec::CompressionType,
    pub max_row: usize,
    pub compact_version: i64,
}

/// One incoming row, as passed to [`Writer::write_row`].
pub struct RowInfo {
    pub tbid: TableId,
    pub version: i64,
    pub sver: i32,
    pub key: RowKey,
    pub values: Vec<Value>,
}

struct IncomingRow {
    key: RowKey,
    version: i64,
    values: Vec<Value>,
}

/// Compares `key` (`None` meaning "+infinity", used to drain a table's old
/// data wholesale at table-end/commit) against `other`.
fn cmp_key(key: Option<&RowKey>, other: &RowKey) -> Ordering {
    match key {
        None => Ordering::Greater,
        Some(k) => k.cmp(other),
    }
}

/// Streaming writer over one file group, optionally merging against a prior
/// file group read through an embedded [`Reader`].
pub struct Writer<C, S> {
    config: WriterConfig,
    catalog: C,
    schema_cache: S,

    opened: bool,
    data_fds_opened: bool,
    tomb_fd_opened: bool,

    head_fd: Option<Fd>,
    data_fd: Option<Fd>,
    sma_fd: Option<Fd>,
    tomb_fd: Option<Fd>,

    head_file: STFile,
    data_file: STFile,
    sma_file: STFile,
    tomb_file: STFile,

    old: Option<Reader>,

    old_brin_blk_array: Vec<BrinBlk>,
    old_blk_idx: usize,
    old_block_records: Vec<BrinRecord>,
    old_rec_idx: usize,
    old_block_data: Option<BlockData>,
    old_row_idx: usize,

    old_tomb_blk_array: Vec<TombBlk>,
    old_tomb_blk_idx: usize,
    old_tomb_block_records: Vec<TombRecord>,
    old_tomb_rec_idx: usize,
    tomb_has_old: bool,

    current_tbid: Option<TableId>,
    tb_has_old_data: bool,
    columns_template: Vec<(i32, ColumnType, u8)>,
    block_data: Option<BlockData>,

    brin_block: BrinBlock,
    brin_blk_array: Vec<BrinBlk>,
    version_range: VersionRange,

    tomb_block: TombBlock,
    new_tomb_blk_array: Vec<TombBlk>,
    tomb_version_range: VersionRange,

    drop_cache: Option<(i64, bool)>,
    cursor_state: MergeCursor,
}

impl<C: MetaCatalog, S: SchemaCache> Writer<C, S> {
    /// Construction is side-effect-free: no file is opened until the first
    /// call to `write_row`/`write_block_data` (which opens `.head`/`.data`/
    /// `.sma`) or `write_tomb_record` (which opens `.tomb`).
    #[must_use]
    pub fn open(config: WriterConfig, catalog: C, schema_cache: S) -> Self {
        let data_file = config
            .old_files
            .data
            .unwrap_or_else(|| STFile::empty(FileType::Data, config.did, config.fid, config.cid));
        let sma_file = config
            .old_files
            .sma
            .unwrap_or_else(|| STFile::empty(FileType::Sma, config.did, config.fid, config.cid));
        let head_file = STFile::empty(FileType::Head, config.did, config.fid, config.cid);
        let tomb_file = STFile::empty(FileType::Tomb, config.did, config.fid, config.cid);

        Self {
            config,
            catalog,
            schema_cache,

            opened: false,
            data_fds_opened: false,
            tomb_fd_opened: false,

            head_fd: None,
            data_fd: None,
            sma_fd: None,
            tomb_fd: None,

            head_file,
            data_file,
            sma_file,
            tomb_file,

            old: None,

            old_brin_blk_array: Vec::new(),
            old_blk_idx: 0,
            old_block_records: Vec::new(),
            old_rec_idx: 0,
            old_block_data: None,
            old_row_idx: 0,

            old_tomb_blk_array: Vec::new(),
            old_tomb_blk_idx: 0,
            old_tomb_block_records: Vec::new(),
            old_tomb_rec_idx: 0,
            tomb_has_old: false,

            current_tbid: None,
            tb_has_old_data: false,
            columns_template: Vec::new(),
            block_data: None,

            brin_block: BrinBlock::new(),
            brin_blk_array: Vec::new(),
            version_range: VersionRange::EMPTY,

            tomb_block: TombBlock::new(),
            new_tomb_blk_array: Vec::new(),
            tomb_version_range: VersionRange::EMPTY,

            drop_cache: None,
            cursor_state: MergeCursor::Idle,
        }
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }

        let old_paths = FileGroupPaths {
            head: self
                .config
                .old_files
                .head
                .is_some()
                .then(|| self.config.old_head_path.clone())
                .flatten(),
            data: self
                .config
                .old_files
                .data
                .is_some()
                .then(|| self.config.data_path.clone()),
            sma: self
                .config
                .old_files
                .sma
                .is_some()
                .then(|| self.config.sma_path.clone()),
            tomb: self
                .config
                .old_files
                .tomb
                .is_some()
                .then(|| self.config.old_tomb_path.clone())
                .flatten(),
        };

        let any_old =
            old_paths.head.is_some() || old_paths.data.is_some() || old_paths.sma.is_some() || old_paths.tomb.is_some();

        if any_old {
            self.old = Some(Reader::open(ReaderConfig { paths: old_paths })?);
        }

        log::debug!("writer opened for fid={}: old group present={any_old}", self.config.fid);
        self.opened = true;
        Ok(())
    }

    /// Opens `.head`/`.data`/`.sma` and positions the brin merge cursor.
    /// Writers that only ever call `write_tomb_record` never reach this.
    fn open_data_fd(&mut self) -> Result<()> {
        if self.data_fds_opened {
            return Ok(());
        }
        self.ensure_open()?;

        let mut head_fd = Fd::create_truncate(&self.config.head_path)?;
        write_zero_header(&mut head_fd)?;
        self.head_file.size = head_fd.size();
        self.head_fd = Some(head_fd);

        let mut data_fd = if self.data_file.size == 0 {
            let mut fd = Fd::create_truncate(&self.config.data_path)?;
            write_zero_header(&mut fd)?;
            fd
        } else {
            Fd::open_append(&self.config.data_path)?
        };
        self.data_file.size = data_fd.size();
        self.data_fd = Some(data_fd);

        let mut sma_fd = if self.sma_file.size == 0 {
            let mut fd = Fd::create_truncate(&self.config.sma_path)?;
            write_zero_header(&mut fd)?;
            fd
        } else {
            Fd::open_append(&self.config.sma_path)?
        };
        self.sma_file.size = sma_fd.size();
        self.sma_fd = Some(sma_fd);

        if let Some(reader) = self.old.as_mut() {
            self.old_brin_blk_array = reader.read_brin_blk_array()?.to_vec();
        }

        log::debug!(
            "opened head/data/sma FDs for fid={}: {} old brin blks",
            self.config.fid,
            self.old_brin_blk_array.len()
        );
        self.data_fds_opened = true;
        Ok(())
    }

    /// Opens `.tomb` and positions the tombstone merge cursor. Writers that
    /// never call `write_tomb_record` never touch `.tomb`.
    fn open_tomb_fd(&mut self) -> Result<()> {
        if self.tomb_fd_opened {
            return Ok(());
        }
        self.ensure_open()?;

        let mut tomb_fd = Fd::create_truncate(&self.config.tomb_path)?;
        write_zero_header(&mut tomb_fd)?;
        self.tomb_file.size = tomb_fd.size();
        self.tomb_fd = Some(tomb_fd);

        if let Some(reader) = self.old.as_mut() {
            self.old_tomb_blk_array = reader.read_tomb_blk_array()?.to_vec();
            self.tomb_has_old = !self.old_tomb_blk_array.is_empty();
        }

        log::debug!(
            "opened tomb FD for fid={}: {} old tomb blks",
            self.config.fid,
            self.old_tomb_blk_array.len()
        );
        self.tomb_fd_opened = true;
        Ok(())
    }

    // -- old brin-record cursor -------------------------------------------

    fn peek_old_record(&mut self) -> Result<Option<BrinRecord>> {
        loop {
            if self.old_rec_idx < self.old_block_records.len() {
                return Ok(Some(self.old_block_records[self.old_rec_idx].clone()));
            }
            if self.old_blk_idx >= self.old_brin_blk_array.len() {
                return Ok(None);
            }
            let blk = self.old_brin_blk_array[self.old_blk_idx];
            self.old_blk_idx += 1;
            let reader = self
                .old
                .as_mut()
                .expect("a non-empty old brin blk array implies an open embedded reader");
            self.old_block_records = reader.read_brin_block(&blk)?;
            self.old_rec_idx = 0;
        }
    }

    fn consume_old_record(&mut self) {
        self.old_rec_idx += 1;
    }

    fn should_drop(&mut self, uid: i64) -> bool {
        if let Some((last_uid, decision)) = self.drop_cache {
            if last_uid == uid {
                return decision;
            }
        }
        let decision = matches!(self.catalog.meta_get_info(uid), TableInfo::Absent);
        self.drop_cache = Some((uid, decision));
        decision
    }

    // -- table transitions --------------------------------------------------

    fn write_table_data_begin(&mut self, new_tbid: TableId) -> Result<()> {
        self.cursor_state = MergeCursor::SkippingOlderTables;

        loop {
            let Some(record) = self.peek_old_record()? else {
                self.tb_has_old_data = false;
                break;
            };
            if record.uid == new_tbid.uid {
                self.tb_has_old_data = true;
                break;
            }
            if TableId::new(record.suid, record.uid) > new_tbid {
                self.tb_has_old_data = false;
                break;
            }
            if !self.should_drop(record.uid) {
                self.write_brin_record(record.clone())?;
            }
            self.consume_old_record();
        }

        self.current_tbid = Some(new_tbid);
        self.cursor_state = if new_tbid.is_sentinel() {
            MergeCursor::Done
        } else {
            MergeCursor::DrainingTable(new_tbid.uid)
        };

        if new_tbid.is_sentinel() {
            self.columns_template.clear();
            self.block_data = None;
        } else {
            let schema = self.schema_cache.update_table_schema(new_tbid)?;
            self.columns_template = schema.columns_template();
            self.block_data = Some(BlockData::new(new_tbid.suid, new_tbid.uid));
        }

        log::trace!(
            "table begin: tbid={new_tbid} tb_has_old_data={} cursor={:?}",
            self.tb_has_old_data,
            self.cursor_state
        );
        Ok(())
    }

    fn write_table_data_end(&mut self) -> Result<()> {
        if self.current_tbid.is_none() {
            return Ok(());
        }
        self.do_write_table_old_data(None)?;
        self.flush_block_data_if_any()?;
        log::trace!("table end: tbid={:?}", self.current_tbid);
        Ok(())
    }

    fn flush_block_data_if_any(&mut self) -> Result<()> {
        if let Some(block) = self.block_data.take() {
            if !block.is_empty() {
                self.do_write_block_data(&block)?;
            }
            if let Some(tbid) = self.current_tbid {
                if !tbid.is_sentinel() {
                    self.block_data = Some(BlockData::new(tbid.suid, tbid.uid));
                }
            }
        }
        Ok(())
    }

    // -- row/old-data merge ---------------------------------------------

    fn extract_old_row(&self, idx: usize) -> IncomingRow {
        let old_block = self
            .old_block_data
            .as_ref()
            .expect("caller only extracts a row after checking old_block_data is Some");
        IncomingRow {
            key: old_block.row_key(idx),
            version: old_block.versions[idx],
            values: old_block.columns.iter().map(|c| c.values[idx].clone()).collect(),
        }
    }

    fn forward_old_brin_record(&mut self, record: &BrinRecord) -> Result<()> {
        self.write_brin_record(record.clone())
    }

    /// Drains old data for the current table up to `key` (`None` = drain
    /// everything). Old rows are fed through [`Self::do_write_ts_row`] just
    /// like newly-ingested ones, which is what lets one code path implement
    /// both merge-ordering and compaction.
    fn do_write_table_old_data(&mut self, key: Option<&RowKey>) -> Result<()> {
        loop {
            if let Some(old_block) = &self.old_block_data {
                if self.old_row_idx < old_block.n_row() {
                    let row_key = old_block.row_key(self.old_row_idx);
                    if cmp_key(key, &row_key) == Ordering::Less {
                        return Ok(());
                    }
                    let row = self.extract_old_row(self.old_row_idx);
                    self.old_row_idx += 1;
                    self.do_write_ts_row(row)?;
                    continue;
                }
                self.old_block_data = None;
                self.old_row_idx = 0;
            }

            let Some(record) = self.peek_old_record()? else {
                self.tb_has_old_data = false;
                return Ok(());
            };

            let current_uid = self.current_tbid.map(|t| t.uid).unwrap_or(i64::MIN);
            if record.uid != current_uid {
                self.tb_has_old_data = false;
                return Ok(());
            }

            if cmp_key(key, &record.first_key) == Ordering::Less {
                return Ok(());
            }

            if cmp_key(key, &record.last_key) == Ordering::Greater {
                self.flush_block_data_if_any()?;
                self.forward_old_brin_record(&record)?;
                self.consume_old_record();
                continue;
            }

            let old_reader = self
                .old
                .as_mut()
                .expect("a matched old record implies an open embedded reader");
            let block = old_reader.read_block_data(&record)?;
            self.consume_old_record();
            self.old_block_data = Some(block);
            self.old_row_idx = 0;
        }
    }

    fn push_row(&mut self, key: RowKey, version: i64, values: Vec<Value>) {
        let columns_template = self.columns_template.clone();
        let block_data = self
            .block_data
            .as_mut()
            .expect("a table is always open by the time a row is pushed");
        block_data.push_row(BlockRow {
            key,
            version,
            values,
            columns_template: &columns_template,
        });
    }

    fn overwrite_last_row(&mut self, idx: usize, version: i64, values: Vec<Value>) {
        let columns_template = self.columns_template.clone();
        let block_data = self
            .block_data
            .as_mut()
            .expect("a table is always open by the time a row is overwritten");
        let key = block_data.row_key(idx);
        let other = BlockRow {
            key,
            version,
            values,
            columns_template: &columns_template,
        };
        block_data.overwrite_row(idx, &other);
    }

    fn do_write_ts_row(&mut self, row: IncomingRow) -> Result<()> {
        let last_key = self
            .block_data
            .as_ref()
            .filter(|b| b.n_row() > 0)
            .map(|b| b.row_key(b.n_row() - 1));

        if let Some(last_key) = &last_key {
            if *last_key > row.key {
                return Err(Error::PreconditionViolated(format!(
                    "row keys must arrive non-decreasing: last={last_key:?}, incoming={:?}",
                    row.key
                )));
            }
            if *last_key == row.key && row.version <= self.config.compact_version {
                let idx = self.block_data.as_ref().expect("checked Some above").n_row() - 1;
                self.overwrite_last_row(idx, row.version, row.values);
                return Ok(());
            }
        }

        if self.block_data.as_ref().is_some_and(|b| b.n_row() >= self.config.max_row) {
            self.flush_block_data_if_any()?;
        }

        self.push_row(row.key, row.version, row.values);
        Ok(())
    }

    // -- brin emission --------------------------------------------------

    fn write_brin_record(&mut self, record: BrinRecord) -> Result<()> {
        loop {
            match self.brin_block.put(record.clone()) {
                Ok(()) => break,
                Err(Error::InvalidArgument(_)) => {
                    self.file_write_brin_block()?;
                }
                Err(e) => return Err(e),
            }
        }
        if self.brin_block.is_full(self.config.max_row) {
            self.file_write_brin_block()?;
        }
        Ok(())
    }

    fn file_write_brin_block(&mut self) -> Result<()> {
        if self.brin_block.is_empty() {
            return Ok(());
        }

        let records = self.brin_block.records().to_vec();
        let summary = brin::summarize(&records);
        let (bytes, sizes) = brin::compress_brin_block(&records, self.config.cmpr_alg);

        let head_fd = self.head_fd.as_mut().expect(".head FD open by the time a brin block flushes");
        let offset = head_fd.append(&bytes)?;
        self.head_file.size = head_fd.size();

        let blk = BrinBlk::from_summary(summary, DiskPtr { offset, size: bytes.len() as u64 }, self.config.cmpr_alg, sizes);
        self.version_range.update(blk.min_ver, blk.max_ver);
        self.brin_blk_array.push(blk);
        self.brin_block.clear();

        log::trace!("flushed brin block: {} records at head offset {offset}", records.len());
        Ok(())
    }

    fn do_write_block_data(&mut self, block: &BlockData) -> Result<()> {
        let min_ver = block.versions.iter().copied().min().expect("block is non-empty");
        let max_ver = block.versions.iter().copied().max().expect("block is non-empty");

        let mut count = 1u32;
        for i in 1..block.n_row() {
            if block.row_key(i) != block.row_key(i - 1) {
                count += 1;
            }
        }

        let (key_part, col_dir, col_data) = crate::block_data::compress_block_data(block, self.config.cmpr_alg);

        let data_fd = self.data_fd.as_mut().expect(".data FD open by the time a block flushes");
        let block_offset = data_fd.append(&key_part)?;
        data_fd.append(&col_dir)?;
        data_fd.append(&col_data)?;
        self.data_file.size = data_fd.size();

        let sma_fd = self.sma_fd.as_mut().expect(".sma FD open by the time a block flushes");
        let sma_offset = sma_fd.size();
        let mut sma_size = 0u32;
        for col in &block.columns {
            if !col.sma_on() {
                continue;
            }
            if let Some(agg) = crate::codec::compute_sma(col.cid, &col.values) {
                let bytes = agg.encode_into_vec();
                sma_fd.append(&bytes)?;
                sma_size += bytes.len() as u32;
            }
        }
        self.sma_file.size = sma_fd.size();

        let record = BrinRecord {
            suid: block.suid,
            uid: block.uid,
            first_key: block.row_key(0),
            last_key: block.row_key(block.n_row() - 1),
            min_ver,
            max_ver,
            block_offset,
            block_key_size: key_part.len() as u32,
            block_size: (key_part.len() + col_dir.len() + col_data.len()) as u32,
            sma_offset,
            sma_size,
            num_row: block.n_row() as u32,
            count,
        };

        log::trace!(
            "flushed block data: uid={} n_row={} block_size={}",
            block.uid,
            block.n_row(),
            record.block_size
        );
        self.write_brin_record(record)
    }

    // -- public row/block ingestion --------------------------------------

    /// Ingests one row, in non-decreasing `(tbid, row_key)` order.
    pub fn write_row(&mut self, row: RowInfo) -> Result<()> {
        if row.tbid.uid == 0 {
            return Err(Error::PreconditionViolated("uid == 0 is not a valid table".into()));
        }
        self.open_data_fd()?;

        if self.current_tbid != Some(row.tbid) {
            if let Some(cur) = self.current_tbid {
                if row.tbid < cur {
                    return Err(Error::PreconditionViolated(format!(
                        "tables must arrive non-decreasing: last={cur} incoming={}",
                        row.tbid
                    )));
                }
            }
            self.write_table_data_end()?;
            self.write_table_data_begin(row.tbid)?;
        }

        // Resolving the row's schema version is part of the ingestion
        // contract even though this crate assumes one stable schema per
        // table within a file group (schema migration is out of scope).
        self.schema_cache.update_row_schema(row.tbid, row.sver)?;

        self.do_write_table_old_data(Some(&row.key))?;
        self.do_write_ts_row(IncomingRow {
            key: row.key,
            version: row.version,
            values: row.values,
        })
    }

    /// Ingests a whole pre-assembled block. All old data for the table is
    /// drained first; if none was pending and nothing is buffered yet, the
    /// block is written through wholesale, otherwise each row is merged
    /// through [`Self::do_write_ts_row`] just like `write_row`, so ordering
    /// and compaction against the drained old rows are honored.
    pub fn write_block_data(&mut self, block: BlockData) -> Result<()> {
        if block.uid == 0 {
            return Err(Error::PreconditionViolated("uid == 0 is not a valid table".into()));
        }
        if block.is_empty() {
            return Ok(());
        }
        self.open_data_fd()?;

        let tbid = TableId::new(block.suid, block.uid);
        if self.current_tbid != Some(tbid) {
            if let Some(cur) = self.current_tbid {
                if tbid < cur {
                    return Err(Error::PreconditionViolated(format!(
                        "tables must arrive non-decreasing: last={cur} incoming={tbid}"
                    )));
                }
            }
            self.write_table_data_end()?;
            self.write_table_data_begin(tbid)?;
        }

        self.do_write_table_old_data(None)?;

        let buffer_empty = self.block_data.as_ref().is_none_or(|b| b.n_row() == 0);
        if !self.tb_has_old_data && buffer_empty {
            self.flush_block_data_if_any()?;
            return self.do_write_block_data(&block);
        }

        for i in 0..block.n_row() {
            let row = IncomingRow {
                key: block.row_key(i),
                version: block.versions[i],
                values: block.columns.iter().map(|c| c.values[i].clone()).collect(),
            };
            self.do_write_ts_row(row)?;
        }
        Ok(())
    }

    /// Flushes whatever is buffered (in-progress block, in-progress brin
    /// block) without ending the current table.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_block_data_if_any()?;
        self.file_write_brin_block()
    }

    // -- tombstones -------------------------------------------------------

    fn peek_old_tomb_record(&mut self) -> Result<Option<TombRecord>> {
        loop {
            if self.old_tomb_rec_idx < self.old_tomb_block_records.len() {
                return Ok(Some(self.old_tomb_block_records[self.old_tomb_rec_idx]));
            }
            if self.old_tomb_blk_idx >= self.old_tomb_blk_array.len() {
                return Ok(None);
            }
            let blk = self.old_tomb_blk_array[self.old_tomb_blk_idx];
            self.old_tomb_blk_idx += 1;
            let reader = self
                .old
                .as_mut()
                .expect("a non-empty old tomb blk array implies an open embedded reader");
            self.old_tomb_block_records = reader.read_tomb_block(&blk)?;
            self.old_tomb_rec_idx = 0;
        }
    }

    fn consume_old_tomb_record(&mut self) {
        self.old_tomb_rec_idx += 1;
    }

    fn push_tomb_record(&mut self, record: TombRecord) -> Result<()> {
        self.tomb_block.push(record);
        if self.tomb_block.is_full(self.config.max_row) {
            self.file_write_tomb_block()?;
        }
        Ok(())
    }

    fn file_write_tomb_block(&mut self) -> Result<()> {
        if self.tomb_block.is_empty() {
            return Ok(());
        }

        let records = self.tomb_block.records().to_vec();
        let summary = tomb::summarize(&records);
        let (bytes, sizes) = tomb::compress_tomb_block(&records, self.config.cmpr_alg);

        let tomb_fd = self.tomb_fd.as_mut().expect(".tomb FD open by the time a tomb block flushes");
        let offset = tomb_fd.append(&bytes)?;
        self.tomb_file.size = tomb_fd.size();

        let blk = TombBlk::from_summary(summary, DiskPtr { offset, size: bytes.len() as u64 }, self.config.cmpr_alg, sizes);
        self.tomb_version_range.update(blk.min_ver, blk.max_ver);
        self.new_tomb_blk_array.push(blk);
        self.tomb_block.clear();

        log::trace!("flushed tomb block: {} records at tomb offset {offset}", records.len());
        Ok(())
    }

    fn drain_remaining_old_tomb(&mut self) -> Result<()> {
        while self.tomb_has_old {
            let Some(old) = self.peek_old_tomb_record()? else {
                self.tomb_has_old = false;
                break;
            };
            self.push_tomb_record(old)?;
            self.consume_old_tomb_record();
        }
        Ok(())
    }

    /// Ingests one tombstone, in non-decreasing `(suid, uid, version)` order.
    /// Rejects a duplicate `(suid, uid, version)` triple against the prior
    /// file group's tombstones.
    pub fn write_tomb_record(&mut self, record: TombRecord) -> Result<()> {
        self.open_tomb_fd()?;

        while self.tomb_has_old {
            let Some(old) = self.peek_old_tomb_record()? else {
                self.tomb_has_old = false;
                break;
            };
            match record.order_key().cmp(&old.order_key()) {
                Ordering::Less => break,
                Ordering::Greater => {
                    self.push_tomb_record(old)?;
                    self.consume_old_tomb_record();
                }
                Ordering::Equal => {
                    return Err(Error::InvalidArgument(format!(
                        "duplicate tombstone for (suid={}, uid={}, version={})",
                        record.suid, record.uid, record.version
                    )));
                }
            }
        }

        self.push_tomb_record(record)
    }

    // -- commit/abort -----------------------------------------------------

    fn push_data_sma_ops(&mut self, ops: &mut FileOpLog) {
        self.data_file.min_ver = self.version_range.min_ver;
        self.data_file.max_ver = self.version_range.max_ver;
        self.sma_file.min_ver = self.version_range.min_ver;
        self.sma_file.max_ver = self.version_range.max_ver;

        if let Some(old_data) = self.config.old_files.data {
            if self.data_file.size != old_data.size {
                ops.push(FileOp::Modify {
                    fid: self.config.fid,
                    old: old_data,
                    new: self.data_file,
                });
            }
        } else if self.data_file.size > 0 {
            ops.push(FileOp::Create { fid: self.config.fid, new: self.data_file });
        }

        if let Some(old_sma) = self.config.old_files.sma {
            if self.sma_file.size != old_sma.size {
                ops.push(FileOp::Modify {
                    fid: self.config.fid,
                    old: old_sma,
                    new: self.sma_file,
                });
            }
        } else if self.sma_file.size > 0 {
            ops.push(FileOp::Create { fid: self.config.fid, new: self.sma_file });
        }
    }

    /// Finalizes the file group: drains every remaining table/tombstone,
    /// writes the two index arrays and their footers, fsyncs every open
    /// file, and returns the file-op log describing what changed.
    ///
    /// An empty writer (no row/block/tomb call ever made) opens no files
    /// and returns an empty log.
    pub fn commit(mut self) -> Result<FileOpLog> {
        let mut ops = FileOpLog::new();

        if self.head_fd.is_some() {
            self.write_table_data_end()?;
            self.write_table_data_begin(TableId::MAX)?;
            self.file_write_brin_block()?;

            let array_bytes = brin::blk::encode_array(&self.brin_blk_array);
            let head_fd = self.head_fd.as_mut().expect("checked is_some above");
            let blk_ptr_offset = head_fd.append(&array_bytes)?;
            let footer = HeadFooter {
                brin_blk_ptr: DiskPtr { offset: blk_ptr_offset, size: array_bytes.len() as u64 },
            };
            footer.encode_into(head_fd)?;
            self.head_file.size = head_fd.size();

            if let Some(old_head) = self.config.old_files.head {
                ops.push(FileOp::Remove { fid: self.config.fid, old: old_head });
            }
            let mut new_head = self.head_file;
            new_head.min_ver = self.version_range.min_ver;
            new_head.max_ver = self.version_range.max_ver;
            ops.push(FileOp::Create { fid: self.config.fid, new: new_head });

            self.push_data_sma_ops(&mut ops);
        }

        if self.tomb_fd.is_some() {
            self.drain_remaining_old_tomb()?;
            self.file_write_tomb_block()?;

            let array_bytes = tomb::blk::encode_array(&self.new_tomb_blk_array);
            let tomb_fd = self.tomb_fd.as_mut().expect("checked is_some above");
            let blk_ptr_offset = tomb_fd.append(&array_bytes)?;
            let footer = TombFooter {
                tomb_blk_ptr: DiskPtr { offset: blk_ptr_offset, size: array_bytes.len() as u64 },
            };
            footer.encode_into(tomb_fd)?;
            self.tomb_file.size = tomb_fd.size();

            if let Some(old_tomb) = self.config.old_files.tomb {
                ops.push(FileOp::Remove { fid: self.config.fid, old: old_tomb });
            }
            let mut new_tomb = self.tomb_file;
            new_tomb.min_ver = self.tomb_version_range.min_ver;
            new_tomb.max_ver = self.tomb_version_range.max_ver;
            ops.push(FileOp::Create { fid: self.config.fid, new: new_tomb });
        }

        for fd in [&mut self.head_fd, &mut self.data_fd, &mut self.sma_fd, &mut self.tomb_fd]
            .into_iter()
            .flatten()
        {
            fd.fsync()?;
        }

        log::debug!("committed writer for fid={}: {} file ops", self.config.fid, ops.len());
        Ok(ops)
    }

    /// Cancels the write: every open FD is simply dropped (no fsync), and an
    /// empty file-op log is returned. Whatever bytes were already written
    /// remain on disk as garbage for an external sweep to reclaim; this
    /// crate never deletes files itself.
    #[must_use]
    pub fn abort(mut self) -> FileOpLog {
        log::debug!("aborting writer for fid={}", self.config.fid);
        self.head_fd = None;
        self.data_fd = None;
        self.sma_fd = None;
        self.tomb_fd = None;
        FileOpLog::new()
    }

    /// `close(false)` commits, `close(true)` aborts.
    pub fn close(self, abort: bool) -> Result<FileOpLog> {
        if abort {
            Ok(self.abort())
        } else {
            self.commit()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_data::COL_SMA_ON;
    use crate::catalog::StaticCatalog;
    use crate::codec::CompressionType;
    use crate::coding::Decode;
    use crate::schema::{ColumnSchema, RowSchema, StaticSchemaCache};
    use test_log::test;

    fn template() -> Vec<(i32, ColumnType, u8)> {
        vec![(1, ColumnType::I32, COL_SMA_ON)]
    }

    fn schema_cache_with(tbid: TableId) -> StaticSchemaCache {
        let mut cache = StaticSchemaCache::new();
        cache.register(
            tbid,
            RowSchema {
                sver: 1,
                columns: vec![ColumnSchema {
                    cid: 1,
                    ty: ColumnType::I32,
                    cflag: COL_SMA_ON,
                }],
            },
        );
        cache
    }

    fn fresh_config(dir: &std::path::Path, max_row: usize, compact_version: i64) -> WriterConfig {
        WriterConfig {
            fid: 1,
            cid: 1,
            did: 0,
            data_path: dir.join("f.data"),
            sma_path: dir.join("f.sma"),
            head_path: dir.join("f.head"),
            tomb_path: dir.join("f.tomb"),
            old_head_path: None,
            old_tomb_path: None,
            old_files: OldFiles::default(),
            cmpr_alg: CompressionType::Lz4,
            max_row,
            compact_version,
        }
    }

    fn row(tbid: TableId, ts: i64, version: i64, value: i32) -> RowInfo {
        RowInfo {
            tbid,
            version,
            sver: 1,
            key: RowKey::bare(ts),
            values: vec![Value::I32(value)],
        }
    }

    fn stfile_for(ops: &FileOpLog, ftype: FileType) -> STFile {
        for op in ops {
            let candidate = match op {
                FileOp::Create { new, .. } | FileOp::Modify { new, .. } => Some(new),
                FileOp::Remove { .. } => None,
            };
            if let Some(f) = candidate {
                if f.ftype == ftype {
                    return *f;
                }
            }
        }
        panic!("no STFile of type {ftype:?} in ops");
    }

    #[test]
    fn write_block_data_merges_against_drained_old_rows_with_compaction() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let tbid = TableId::new(1, 1);
        let cache = schema_cache_with(tbid);

        let mut writer1 = Writer::open(fresh_config(dir.path(), 100, 0), StaticCatalog::new(), cache.clone());
        writer1.write_row(row(tbid, 10, 1, 1))?;
        let ops1 = writer1.commit()?;

        let mut config2 = fresh_config(dir.path(), 100, 5);
        config2.head_path = dir.path().join("f2.head");
        config2.tomb_path = dir.path().join("f2.tomb");
        config2.old_head_path = Some(dir.path().join("f.head"));
        config2.old_files = OldFiles {
            head: Some(stfile_for(&ops1, FileType::Head)),
            data: Some(stfile_for(&ops1, FileType::Data)),
            sma: Some(stfile_for(&ops1, FileType::Sma)),
            tomb: None,
        };

        let mut writer2 = Writer::open(config2, StaticCatalog::new(), cache);
        let mut block = BlockData::new(1, 1);
        let template = template();
        block.push_row(BlockRow {
            key: RowKey::bare(10),
            version: 2,
            values: vec![Value::I32(2)],
            columns_template: &template,
        });
        writer2.write_block_data(block)?;
        writer2.commit()?;

        let mut reader = Reader::open(ReaderConfig {
            paths: FileGroupPaths {
                head: Some(dir.path().join("f2.head")),
                data: Some(dir.path().join("f.data")),
                sma: Some(dir.path().join("f.sma")),
                tomb: None,
            },
        })?;
        let blks = reader.read_brin_blk_array()?.to_vec();
        let records = reader.read_brin_block(&blks[0])?;
        assert_eq!(records.len(), 1);
        let block = reader.read_block_data(&records[0])?;
        assert_eq!(block.n_row(), 1);
        assert_eq!(block.versions, vec![2]);
        assert_eq!(block.columns[0].values, vec![Value::I32(2)]);
        Ok(())
    }

    #[test]
    fn write_block_data_rejects_key_earlier_than_drained_old_rows() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let tbid = TableId::new(1, 1);
        let cache = schema_cache_with(tbid);

        let mut writer1 = Writer::open(fresh_config(dir.path(), 100, 0), StaticCatalog::new(), cache.clone());
        writer1.write_row(row(tbid, 10, 1, 1))?;
        let ops1 = writer1.commit()?;

        let mut config2 = fresh_config(dir.path(), 100, 0);
        config2.head_path = dir.path().join("f2.head");
        config2.tomb_path = dir.path().join("f2.tomb");
        config2.old_head_path = Some(dir.path().join("f.head"));
        config2.old_files = OldFiles {
            head: Some(stfile_for(&ops1, FileType::Head)),
            data: Some(stfile_for(&ops1, FileType::Data)),
            sma: Some(stfile_for(&ops1, FileType::Sma)),
            tomb: None,
        };

        let mut writer2 = Writer::open(config2, StaticCatalog::new(), cache);
        let mut block = BlockData::new(1, 1);
        let template = template();
        block.push_row(BlockRow {
            key: RowKey::bare(5),
            version: 2,
            values: vec![Value::I32(2)],
            columns_template: &template,
        });
        assert!(writer2.write_block_data(block).is_err());
        Ok(())
    }

    #[test]
    fn two_tables_roundtrip_through_reader() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let t1 = TableId::new(1, 1);
        let t2 = TableId::new(1, 2);

        let mut cache = schema_cache_with(t1);
        cache.register(
            t2,
            RowSchema {
                sver: 1,
                columns: vec![ColumnSchema {
                    cid: 1,
                    ty: ColumnType::I32,
                    cflag: COL_SMA_ON,
                }],
            },
        );

        let mut writer = Writer::open(fresh_config(dir.path(), 100, 0), StaticCatalog::new(), cache);
        writer.write_row(row(t1, 0, 1, 10))?;
        writer.write_row(row(t1, 10, 1, 20))?;
        writer.write_row(row(t2, 0, 1, 99))?;
        let ops = writer.commit()?;
        assert_eq!(ops.len(), 3); // head, data, sma all created fresh

        let mut reader = Reader::open(ReaderConfig {
            paths: FileGroupPaths {
                head: Some(dir.path().join("f.head")),
                data: Some(dir.path().join("f.data")),
                sma: Some(dir.path().join("f.sma")),
                tomb: None,
            },
        })?;

        let blks = reader.read_brin_blk_array()?.to_vec();
        assert_eq!(blks.len(), 1);
        let records = reader.read_brin_block(&blks[0])?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].uid, 1);
        assert_eq!(records[1].uid, 2);

        let block1 = reader.read_block_data(&records[0])?;
        assert_eq!(block1.n_row(), 2);
        assert_eq!(block1.columns[0].values, vec![Value::I32(10), Value::I32(20)]);

        let block2 = reader.read_block_data(&records[1])?;
        assert_eq!(block2.n_row(), 1);
        Ok(())
    }

    #[test]
    fn max_row_splits_into_two_blocks() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let tbid = TableId::new(1, 1);
        let cache = schema_cache_with(tbid);

        let mut writer = Writer::open(fresh_config(dir.path(), 2, 0), StaticCatalog::new(), cache);
        for i in 0..5i64 {
            writer.write_row(row(tbid, i, 1, i as i32))?;
        }
        writer.commit()?;

        let mut reader = Reader::open(ReaderConfig {
            paths: FileGroupPaths {
                head: Some(dir.path().join("f.head")),
                data: Some(dir.path().join("f.data")),
                sma: Some(dir.path().join("f.sma")),
                tomb: None,
            },
        })?;
        let blks = reader.read_brin_blk_array()?.to_vec();
        let mut total_rows = 0;
        for blk in &blks {
            let records = reader.read_brin_block(blk)?;
            for record in &records {
                total_rows += reader.read_block_data(record)?.n_row();
            }
        }
        assert_eq!(total_rows, 5);
        Ok(())
    }

    #[test]
    fn compaction_overwrites_below_watermark_and_keeps_above() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let tbid = TableId::new(1, 1);
        let cache = schema_cache_with(tbid);

        let mut writer = Writer::open(fresh_config(dir.path(), 100, 5), StaticCatalog::new(), cache);
        writer.write_row(row(tbid, 0, 1, 1))?;
        writer.write_row(row(tbid, 0, 2, 2))?; // same key, v2<=compact_version(5): overwrite
        writer.write_row(row(tbid, 0, 9, 3))?; // same key, v9>compact_version(5): append
        writer.commit()?;

        let mut reader = Reader::open(ReaderConfig {
            paths: FileGroupPaths {
                head: Some(dir.path().join("f.head")),
                data: Some(dir.path().join("f.data")),
                sma: Some(dir.path().join("f.sma")),
                tomb: None,
            },
        })?;
        let blks = reader.read_brin_blk_array()?.to_vec();
        let records = reader.read_brin_block(&blks[0])?;
        let block = reader.read_block_data(&records[0])?;
        assert_eq!(block.n_row(), 2);
        assert_eq!(block.versions, vec![2, 9]);
        assert_eq!(block.columns[0].values, vec![Value::I32(2), Value::I32(3)]);
        Ok(())
    }

    #[test]
    fn duplicate_tombstone_is_rejected() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = StaticSchemaCache::new();
        let mut writer = Writer::open(fresh_config(dir.path(), 100, 0), StaticCatalog::new(), cache);

        writer.write_tomb_record(TombRecord { suid: 1, uid: 1, version: 1, skey: 0, ekey: 10 })?;
        let err = writer.write_tomb_record(TombRecord { suid: 1, uid: 1, version: 1, skey: 0, ekey: 20 });
        assert!(err.is_err());
        Ok(())
    }

    #[test]
    fn empty_writer_commits_no_file_ops() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = Writer::open(fresh_config(dir.path(), 100, 0), StaticCatalog::new(), StaticSchemaCache::new());
        let ops = writer.commit()?;
        assert!(ops.is_empty());
        assert!(!dir.path().join("f.head").exists());
        assert!(!dir.path().join("f.data").exists());
        Ok(())
    }

    #[test]
    fn abort_returns_empty_ops() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let tbid = TableId::new(1, 1);
        let cache = schema_cache_with(tbid);
        let mut writer = Writer::open(fresh_config(dir.path(), 100, 0), StaticCatalog::new(), cache);
        writer.write_row(row(tbid, 0, 1, 1))?;
        let ops = writer.abort();
        assert!(ops.is_empty());
        Ok(())
    }

    #[test]
    fn commit_head_footer_decodes_and_validates() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let tbid = TableId::new(1, 1);
        let cache = schema_cache_with(tbid);
        let mut writer = Writer::open(fresh_config(dir.path(), 100, 0), StaticCatalog::new(), cache);
        writer.write_row(row(tbid, 0, 1, 1))?;
        writer.commit()?;

        let bytes = std::fs::read(dir.path().join("f.head"))?;
        let footer_bytes = &bytes[bytes.len() - crate::footer::FOOTER_SIZE..];
        let footer = HeadFooter::decode_from(&mut std::io::Cursor::new(footer_bytes))?;
        footer.validate_against_file_size(bytes.len() as u64)?;
        Ok(())
    }
}
