// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The table-schema registry is an external collaborator
//! (`UpdateRowSchema`/`UpdateTableSchema`) out of scope for this crate.
//! What lives here is the contract the writer needs from it, plus a small
//! in-memory reference cache good enough to drive tests and single-process
//! callers.

use crate::block_data::ColumnType;
use crate::table_id::TableId;
use std::collections::HashMap;

/// One column's declaration within a table's row schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSchema {
    pub cid: i32,
    pub ty: ColumnType,
    pub cflag: u8,
}

/// A table's resolved row schema: its columns, in `cid` order, plus the
/// schema version it was resolved at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowSchema {
    pub sver: i32,
    pub columns: Vec<ColumnSchema>,
}

impl RowSchema {
    #[must_use]
    pub fn columns_template(&self) -> Vec<(i32, ColumnType, u8)> {
        self.columns.iter().map(|c| (c.cid, c.ty, c.cflag)).collect()
    }
}

/// The schema-registry contract the writer depends on: resolving a row's
/// schema version, and resolving a table's current schema wholesale.
pub trait SchemaCache {
    fn update_row_schema(&mut self, tbid: TableId, sver: i32) -> crate::error::Result<RowSchema>;

    fn update_table_schema(&mut self, tbid: TableId) -> crate::error::Result<RowSchema>;
}

/// An in-memory reference `SchemaCache`: a fixed map from `TableId` to its
/// current `RowSchema`, registered up front by the caller (there is no
/// external registry to consult in-process).
#[derive(Clone, Debug, Default)]
pub struct StaticSchemaCache {
    schemas: HashMap<TableId, RowSchema>,
}

impl StaticSchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tbid: TableId, schema: RowSchema) {
        self.schemas.insert(tbid, schema);
    }
}

impl SchemaCache for StaticSchemaCache {
    fn update_row_schema(&mut self, tbid: TableId, _sver: i32) -> crate::error::Result<RowSchema> {
        self.update_table_schema(tbid)
    }

    fn update_table_schema(&mut self, tbid: TableId) -> crate::error::Result<RowSchema> {
        self.schemas.get(&tbid).cloned().ok_or_else(|| {
            crate::error::Error::InvalidArgument(format!("no schema registered for table {tbid}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn static_cache_resolves_registered_schema() -> crate::Result<()> {
        let mut cache = StaticSchemaCache::new();
        let tbid = TableId::new(1, 2);
        cache.register(
            tbid,
            RowSchema {
                sver: 1,
                columns: vec![ColumnSchema {
                    cid: 1,
                    ty: ColumnType::I32,
                    cflag: 0,
                }],
            },
        );

        let resolved = cache.update_table_schema(tbid)?;
        assert_eq!(resolved.columns.len(), 1);
        Ok(())
    }

    #[test]
    fn static_cache_rejects_unknown_table() {
        let mut cache = StaticSchemaCache::new();
        assert!(cache.update_table_schema(TableId::new(9, 9)).is_err());
    }
}
