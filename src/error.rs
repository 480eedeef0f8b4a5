use std::io;

use thiserror::Error;

/// The error type returned by every fallible cabinet operation.
///
/// Each variant maps to one [`ErrorKind`]; the kind of the most recent
/// failure is also retrievable from the decompressor via
/// [`last_error`](crate::CabDecompressor::last_error).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller supplied contradictory or out-of-range arguments.
    #[error("bad argument: {0}")]
    Args(String),

    /// The I/O backend could not open the named file.
    #[error("failed to open {name}")]
    Open {
        /// Name passed to [`System::open`](crate::System::open).
        name: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A read from an opened handle failed or came up short.
    #[error("read failed")]
    Read(#[source] io::Error),

    /// A write to an output handle failed or came up short.
    #[error("write failed")]
    Write(#[source] io::Error),

    /// A seek failed or the offset was out of range.
    #[error("seek failed")]
    Seek(#[source] io::Error),

    /// The bytes at the expected header position are not `MSCF`.
    #[error("not a cabinet file (no MSCF signature)")]
    Signature,

    /// The cabinet is self-inconsistent (zero folders or files, bad folder
    /// index, broken merge anchors, oversize block, unknown compression
    /// method, ...).
    #[error("bad cabinet data format: {0}")]
    DataFormat(String),

    /// A stored data-block checksum did not match.
    #[error("checksum mismatch in data block {block} (expected {expected:08x}, got {actual:08x})")]
    Checksum {
        /// One-based index of the failing block within its folder.
        block: u32,
        /// Checksum stored in the block header.
        expected: u32,
        /// Checksum computed over the block payload.
        actual: u32,
    },

    /// A decoder hit an internal error: bad Huffman tree, invalid DEFLATE
    /// stream, arithmetic-coder failure, invalid LZX block type, ...
    #[error("decompression failed: {0}")]
    Decrunch(String),
}

impl Error {
    /// The coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Args(_) => ErrorKind::Args,
            Error::Open { .. } => ErrorKind::Open,
            Error::Read(_) => ErrorKind::Read,
            Error::Write(_) => ErrorKind::Write,
            Error::Seek(_) => ErrorKind::Seek,
            Error::Signature => ErrorKind::Signature,
            Error::DataFormat(_) => ErrorKind::DataFormat,
            Error::Checksum { .. } => ErrorKind::Checksum,
            Error::Decrunch(_) => ErrorKind::Decrunch,
        }
    }
}

/// A specialized `Result` type for cabinet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification codes, mirroring the variants of [`Error`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// No error.
    Ok,
    /// Bad caller arguments.
    Args,
    /// Open failure.
    Open,
    /// Read failure.
    Read,
    /// Write failure.
    Write,
    /// Seek failure.
    Seek,
    /// Missing `MSCF` signature.
    Signature,
    /// Self-inconsistent cabinet.
    DataFormat,
    /// Data-block checksum mismatch.
    Checksum,
    /// Decoder-internal failure.
    Decrunch,
}

/// A cabinet that could not be merged, handed back to the caller together
/// with the reason, so that a failed [`append`](crate::CabDecompressor::append)
/// or [`prepend`](crate::CabDecompressor::prepend) destroys nothing.
pub struct MergeError {
    /// The unconsumed right-hand (or left-hand, for prepend) cabinet.
    pub cabinet: crate::cabinet::Cabinet,
    /// Why the merge was refused.
    pub error: Error,
}

impl std::fmt::Debug for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeError").field("error", &self.error).finish()
    }
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
