//! A library for reading and extracting [Windows
//! cabinet](https://en.wikipedia.org/wiki/Cabinet_(file_format)) (CAB)
//! files, including multi-part cabinet sets whose compressed folders span
//! several files on disk.
//!
//! All four cabinet compression schemes are decoded natively: stored,
//! MSZIP (framed DEFLATE), Quantum (arithmetic-coded LZ77) and LZX
//! (Huffman-coded LZ77 with repeated offsets and the Intel-E8 filter).
//!
//! # Example
//!
//! ```no_run
//! use mscab::CabDecompressor;
//!
//! # fn main() -> mscab::Result<()> {
//! let mut cabd = CabDecompressor::new();
//! let cabinet = cabd.open("example.cab")?;
//! for file in cabinet.file_entries() {
//!     cabd.extract(&cabinet, file, file.name())?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod bitstream;
mod cabinet;
mod checksum;
mod consts;
mod ctype;
mod datetime;
mod decompressor;
mod error;
mod extract;
mod file;
mod folder;
mod huffman;
mod lzx;
mod merge;
mod mszip;
mod quantum;
mod scanner;
mod string;
mod system;

pub use crate::cabinet::{Cabinet, CabinetPart};
pub use crate::ctype::CompressionType;
pub use crate::decompressor::{CabDecompressor, Parameter};
pub use crate::error::{Error, ErrorKind, MergeError, Result};
pub use crate::file::{FileEntries, FileEntry};
pub use crate::folder::{FolderEntries, FolderEntry};
pub use crate::system::{
    DiskSystem, Md5Sink, MemSystem, OpenMode, StdoutSink, SysFile, System,
};
