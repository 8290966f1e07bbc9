// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The page-aligned file I/O abstraction (`open`/`read_at`/`write_at`/`fsync`)
//! is an external collaborator out of scope for this crate. What lives here
//! is a thin direct [`std::fs::File`] wrapper plus a positional-read helper,
//! the same way the reference storage engine reaches straight for `File`
//! instead of introducing its own `FD` trait indirection at this layer.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// One file within a file group, opened for either random-access reading or
/// monotonic appending.
///
/// `size` tracks the logical end of file so `append` never needs a `stat`
/// call on the hot path.
pub struct Fd {
    file: File,
    size: u64,
}

impl Fd {
    /// Opens an existing file read-only.
    pub fn open_read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    /// Creates `path` fresh, truncating any existing file of the same name.
    pub fn create_truncate(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file, size: 0 })
    }

    /// Opens an existing file for reading and appending, picking up its
    /// current size (used for `.data`/`.sma`, which are extended rather than
    /// rewritten when a prior file group is being merged).
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Appends `bytes` at the current end of file, returning the offset they
    /// were written at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        self.file.seek(SeekFrom::End(0))?;
        let offset = self.size;
        self.file.write_all(bytes)?;
        self.size += bytes.len() as u64;
        Ok(offset)
    }

    pub fn fsync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Lets a `Fd` be handed directly to [`crate::coding::Encode::encode_into`]
/// and other `Write`-generic helpers (e.g. [`crate::file_header::write_zero_header`]);
/// every write lands at the current end of file, same as [`Fd::append`].
impl Write for Fd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn append_then_read_at_roundtrips() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("f.data");

        let mut fd = Fd::create_truncate(&path)?;
        assert_eq!(fd.size(), 0);

        let off1 = fd.append(b"hello")?;
        let off2 = fd.append(b"world!")?;
        assert_eq!(off1, 0);
        assert_eq!(off2, 5);
        assert_eq!(fd.size(), 11);

        assert_eq!(fd.read_at(0, 5)?, b"hello");
        assert_eq!(fd.read_at(5, 6)?, b"world!");
        fd.fsync()?;
        Ok(())
    }

    #[test]
    fn open_append_picks_up_existing_size() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("f.data");

        {
            let mut fd = Fd::create_truncate(&path)?;
            fd.append(b"existing")?;
        }

        let mut fd = Fd::open_append(&path)?;
        assert_eq!(fd.size(), 8);
        let off = fd.append(b"-more")?;
        assert_eq!(off, 8);
        assert_eq!(fd.read_at(0, 13)?, b"existing-more");
        Ok(())
    }

    #[test]
    fn open_read_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Fd::open_read(&dir.path().join("nope")).is_err());
    }
}
