// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::stfile::STFile;

/// One entry of the file-op log returned at commit.
///
/// The external commit manager applies the whole `FileOpLog` atomically;
/// no file named here is mutated in place by this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileOp {
    /// A brand-new file was written.
    Create { fid: i64, new: STFile },

    /// An existing file was extended or otherwise changed size.
    Modify { fid: i64, old: STFile, new: STFile },

    /// An existing file is superseded and should be deleted.
    Remove { fid: i64, old: STFile },
}

/// Append-only list of file operations describing one commit.
pub type FileOpLog = Vec<FileOp>;
