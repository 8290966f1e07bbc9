// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{DecodeError, EncodeError};

/// Represents errors that can occur while reading or writing a file group.
#[derive(Debug)]
pub enum Error {
    /// I/O error (short read, short write, fsync failure, ...)
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// On-disk data failed an internal consistency check: an offset/size
    /// residue mismatch, a misaligned footer, or a block that did not
    /// decode to exactly its declared length.
    Corruption(String),

    /// The external block/value-column codec failed to compress or
    /// decompress a buffer.
    Codec(String),

    /// A buffer allocation failed or exceeded a sane bound.
    OutOfMemory,

    /// A caller-supplied argument violates a structural precondition
    /// (e.g. a primary-key shape mismatch, or a duplicate tombstone).
    InvalidArgument(String),

    /// A caller violated an ordering precondition of the writer
    /// (e.g. out-of-order rows, or `uid == 0`).
    PreconditionViolated(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::Codec(msg) => write!(f, "codec error: {msg}"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::PreconditionViolated(msg) => write!(f, "precondition violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// File-group result
pub type Result<T> = std::result::Result<T, Error>;
