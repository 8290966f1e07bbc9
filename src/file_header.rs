// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The fixed-size zero header every `.head`/`.data`/`.sma`/`.tomb` file
//! begins with, mirroring the reference engine's `TSDB_FHDR_SIZE` preamble.

use std::io::Write;

/// Width of the zero header written at offset 0 of every file in a group.
pub const FHDR_SIZE: usize = 512;

/// Writes the zero header to `writer`, returning the number of bytes
/// written (always [`FHDR_SIZE`]).
pub fn write_zero_header<W: Write>(writer: &mut W) -> std::io::Result<usize> {
    writer.write_all(&[0u8; FHDR_SIZE])?;
    Ok(FHDR_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn writes_exactly_fhdr_size_zero_bytes() {
        let mut buf = Vec::new();
        let written = write_zero_header(&mut buf).unwrap();
        assert_eq!(written, FHDR_SIZE);
        assert_eq!(buf.len(), FHDR_SIZE);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
