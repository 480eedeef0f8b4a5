//! The pluggable I/O layer.
//!
//! All file access performed by the decompressor goes through the
//! [`System`] capability trait, so cabinets can live on disk, in memory, or
//! anywhere else, and extraction output can be routed to a file, to stdout
//! or into an MD5 digest without the library knowing the difference.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use md5::{Digest, Md5};

use crate::error::{Error, Result};

/// How a file should be opened by [`System::open`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    /// Existing file, read-only.
    Read,
    /// Create or truncate, write-only.
    Write,
    /// Existing file, read and write.
    Update,
    /// Create if needed, append writes at the end.
    Append,
}

/// One open file or sink.
///
/// A short read at end-of-file is not an error; `read` returns the number
/// of bytes actually obtained. Sinks that cannot read or seek return an
/// error from those methods instead.
pub trait SysFile {
    /// Read up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Write the whole of `buf`, returning how many bytes were written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    /// Reposition the handle.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
    /// Current position of the handle.
    fn tell(&mut self) -> Result<u64>;
    /// The name this handle was opened under.
    fn name(&self) -> &str;
}

/// The capability interface the decompressor performs all I/O through.
pub trait System {
    /// Open `name` in the given mode.
    fn open(&self, name: &str, mode: OpenMode) -> Result<Box<dyn SysFile>>;
    /// Emit a diagnostic concerning `file` (or the operation in general).
    fn message(&self, file: Option<&dyn SysFile>, text: &str);
}

/// Read exactly `buf.len()` bytes or fail with a read error.
pub(crate) fn read_exact(file: &mut dyn SysFile, buf: &mut [u8]) -> Result<()> {
    let mut done = 0;
    while done < buf.len() {
        let n = file.read(&mut buf[done..])?;
        if n == 0 {
            return Err(Error::Read(io::ErrorKind::UnexpectedEof.into()));
        }
        done += n;
    }
    Ok(())
}

/// Write all of `buf` or fail with a write error.
pub(crate) fn write_all(file: &mut dyn SysFile, buf: &[u8]) -> Result<()> {
    let mut done = 0;
    while done < buf.len() {
        let n = file.write(&buf[done..])?;
        if n == 0 {
            return Err(Error::Write(io::ErrorKind::WriteZero.into()));
        }
        done += n;
    }
    Ok(())
}

// ========================================================================= //

/// The default [`System`]: regular files, diagnostics to stderr.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiskSystem;

struct DiskFile {
    file: fs::File,
    name: String,
}

impl System for DiskSystem {
    fn open(&self, name: &str, mode: OpenMode) -> Result<Box<dyn SysFile>> {
        let mut options = fs::OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Update => options.read(true).write(true),
            OpenMode::Append => options.write(true).create(true).append(true),
        };
        match options.open(name) {
            Ok(file) => {
                Ok(Box::new(DiskFile { file, name: name.to_string() }))
            }
            Err(source) => {
                Err(Error::Open { name: name.to_string(), source })
            }
        }
    }

    fn message(&self, file: Option<&dyn SysFile>, text: &str) {
        match file {
            Some(file) => eprintln!("{}: {}", file.name(), text),
            None => eprintln!("{}", text),
        }
    }
}

impl SysFile for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file.read(buf).map_err(Error::Read)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write(buf).map_err(Error::Write)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.file.seek(pos).map_err(Error::Seek)
    }

    fn tell(&mut self) -> Result<u64> {
        self.file.stream_position().map_err(Error::Seek)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ========================================================================= //

/// An in-memory [`System`] backend.
///
/// Useful for tests and for reading cabinets that never touch the
/// filesystem. Diagnostics are collected rather than printed.
#[derive(Default)]
pub struct MemSystem {
    files: RefCell<HashMap<String, Rc<RefCell<Vec<u8>>>>>,
    messages: RefCell<Vec<String>>,
}

struct MemFile {
    name: String,
    data: Rc<RefCell<Vec<u8>>>,
    pos: usize,
    writable: bool,
}

impl MemSystem {
    /// Create an empty in-memory filesystem.
    pub fn new() -> MemSystem {
        MemSystem::default()
    }

    /// Add (or replace) a file.
    pub fn insert(&self, name: &str, data: Vec<u8>) {
        self.files
            .borrow_mut()
            .insert(name.to_string(), Rc::new(RefCell::new(data)));
    }

    /// The current contents of a file, if it exists.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).map(|data| data.borrow().clone())
    }

    /// All diagnostics emitted so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl System for MemSystem {
    fn open(&self, name: &str, mode: OpenMode) -> Result<Box<dyn SysFile>> {
        let mut files = self.files.borrow_mut();
        let data = match mode {
            OpenMode::Read | OpenMode::Update => match files.get(name) {
                Some(data) => data.clone(),
                None => {
                    return Err(Error::Open {
                        name: name.to_string(),
                        source: io::ErrorKind::NotFound.into(),
                    });
                }
            },
            OpenMode::Write => {
                let data = Rc::new(RefCell::new(Vec::new()));
                files.insert(name.to_string(), data.clone());
                data
            }
            OpenMode::Append => files
                .entry(name.to_string())
                .or_insert_with(|| Rc::new(RefCell::new(Vec::new())))
                .clone(),
        };
        let pos =
            if mode == OpenMode::Append { data.borrow().len() } else { 0 };
        Ok(Box::new(MemFile {
            name: name.to_string(),
            data,
            pos,
            writable: mode != OpenMode::Read,
        }))
    }

    fn message(&self, file: Option<&dyn SysFile>, text: &str) {
        let line = match file {
            Some(file) => format!("{}: {}", file.name(), text),
            None => text.to_string(),
        };
        self.messages.borrow_mut().push(line);
    }
}

impl SysFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.borrow();
        let avail = data.len().saturating_sub(self.pos);
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::Write(io::ErrorKind::PermissionDenied.into()));
        }
        let mut data = self.data.borrow_mut();
        if self.pos > data.len() {
            data.resize(self.pos, 0);
        }
        let end = (self.pos + buf.len()).min(data.len());
        data[self.pos..end].copy_from_slice(&buf[..end - self.pos]);
        data.extend_from_slice(&buf[end - self.pos..]);
        self.pos += buf.len();
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.data.borrow().len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if target < 0 {
            return Err(Error::Seek(io::ErrorKind::InvalidInput.into()));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ========================================================================= //

/// A write-only sink that copies extracted bytes to standard output.
#[derive(Default)]
pub struct StdoutSink {
    written: u64,
}

impl StdoutSink {
    /// Create a stdout sink.
    pub fn new() -> StdoutSink {
        StdoutSink::default()
    }
}

impl SysFile for StdoutSink {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Read(io::ErrorKind::Unsupported.into()))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        io::stdout().write_all(buf).map_err(Error::Write)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(Error::Seek(io::ErrorKind::Unsupported.into()))
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.written)
    }

    fn name(&self) -> &str {
        "<stdout>"
    }
}

// ========================================================================= //

/// A write-only sink that feeds extracted bytes into an MD5 context
/// instead of a file, for integrity-test modes.
#[derive(Default)]
pub struct Md5Sink {
    context: Md5,
    written: u64,
}

impl Md5Sink {
    /// Create a fresh digest sink.
    pub fn new() -> Md5Sink {
        Md5Sink::default()
    }

    /// Finish the digest, resetting the sink for reuse.
    pub fn finish(&mut self) -> [u8; 16] {
        self.written = 0;
        std::mem::take(&mut self.context).finalize().into()
    }
}

impl SysFile for Md5Sink {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Read(io::ErrorKind::Unsupported.into()))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.context.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(Error::Seek(io::ErrorKind::Unsupported.into()))
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.written)
    }

    fn name(&self) -> &str {
        "<md5>"
    }
}

// ========================================================================= //
