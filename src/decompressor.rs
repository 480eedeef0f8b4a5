//! The decompressor instance: the entry point tying together parsing,
//! scanning, set linking and extraction.

use crate::cabinet::{read_headers, Cabinet};
use crate::consts::CAB_BLOCKMAX;
use crate::error::{ErrorKind, MergeError, Result};
use crate::extract::{DecompressState, DriverParams};
use crate::file::FileEntry;
use crate::merge::merge;
use crate::scanner::{self, ScanParams};
use crate::system::{DiskSystem, OpenMode, SysFile, System};

/// Tunable decompressor parameters for
/// [`set_param`](CabDecompressor::set_param).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Parameter {
    /// Size in bytes of the buffer [`search`](CabDecompressor::search)
    /// scans with (default 32 KiB, minimum 4).
    SearchBufSize,
    /// Nonzero to downgrade MSZIP integrity errors to warnings.
    FixMsZip,
    /// Size in bytes of the extraction copy buffer (default 4096,
    /// minimum 4).
    DecompBufSize,
    /// Nonzero to keep partial results from malformed cabinets.
    Salvage,
}

struct Params {
    searchbuf_size: usize,
    fix_mszip: bool,
    decomp_buf_size: usize,
    salvage: bool,
}

impl Default for Params {
    fn default() -> Params {
        Params {
            searchbuf_size: 32768,
            fix_mszip: false,
            decomp_buf_size: 4096,
            salvage: false,
        }
    }
}

/// A cabinet decompressor.
///
/// One instance holds the lazily-created decoder state for the folder
/// most recently extracted from, so extracting a folder's files in
/// offset order costs one pass over the folder.  Distinct instances are
/// fully independent.
pub struct CabDecompressor<S: System = DiskSystem> {
    system: S,
    params: Params,
    state: Option<DecompressState>,
    last_error: ErrorKind,
    next_cabinet_id: u64,
}

impl CabDecompressor<DiskSystem> {
    /// Create a decompressor reading through the local filesystem.
    pub fn new() -> CabDecompressor<DiskSystem> {
        CabDecompressor::with_system(DiskSystem)
    }
}

impl Default for CabDecompressor<DiskSystem> {
    fn default() -> Self {
        CabDecompressor::new()
    }
}

impl<S: System> CabDecompressor<S> {
    /// Create a decompressor over a custom [`System`] backend.
    pub fn with_system(system: S) -> CabDecompressor<S> {
        CabDecompressor {
            system,
            params: Params::default(),
            state: None,
            last_error: ErrorKind::Ok,
            next_cabinet_id: 1,
        }
    }

    /// The I/O backend this decompressor runs on.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// The classification of the most recent failure, or
    /// [`ErrorKind::Ok`] if the last operation succeeded.
    pub fn last_error(&self) -> ErrorKind {
        self.last_error
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.last_error = match &result {
            Ok(_) => ErrorKind::Ok,
            Err(error) => error.kind(),
        };
        result
    }

    /// Set a tunable parameter.
    pub fn set_param(&mut self, param: Parameter, value: u32) -> Result<()> {
        let result = (|| {
            match param {
                Parameter::SearchBufSize => {
                    if value < 4 {
                        bad_args!("search buffer size must be at least 4");
                    }
                    self.params.searchbuf_size = value as usize;
                }
                Parameter::FixMsZip => {
                    self.params.fix_mszip = value != 0;
                }
                Parameter::DecompBufSize => {
                    if value < 4 {
                        bad_args!("decompression buffer must be at least 4");
                    }
                    self.params.decomp_buf_size = value as usize;
                }
                Parameter::Salvage => {
                    self.params.salvage = value != 0;
                }
            }
            Ok(())
        })();
        self.finish(result)
    }

    /// Open a cabinet file, reading its headers at offset 0.
    pub fn open(&mut self, filename: &str) -> Result<Cabinet> {
        let result = (|| {
            let mut fh = self.system.open(filename, OpenMode::Read)?;
            let id = self.next_cabinet_id;
            let cabinet = read_headers(
                &self.system,
                &mut *fh,
                filename,
                0,
                false,
                self.params.salvage,
                id,
            )?;
            self.next_cabinet_id += 1;
            Ok(cabinet)
        })();
        self.finish(result)
    }

    /// Scan an arbitrary container file for embedded cabinets and return
    /// every one that parses.
    pub fn search(&mut self, filename: &str) -> Result<Vec<Cabinet>> {
        let params = ScanParams {
            searchbuf_size: self.params.searchbuf_size,
            salvage: self.params.salvage,
        };
        let result = scanner::search(
            &self.system,
            filename,
            &params,
            &mut self.next_cabinet_id,
        );
        self.finish(result)
    }

    /// Join `next` onto the end of `cab`, splicing a folder split across
    /// the boundary.  On failure `next` is handed back untouched inside
    /// the error.
    pub fn append(
        &mut self,
        cab: &mut Cabinet,
        next: Cabinet,
    ) -> std::result::Result<(), MergeError> {
        self.invalidate_state(&[cab.id, next.id]);
        let left = std::mem::replace(cab, Cabinet::hollow());
        match merge(&self.system, left, next) {
            Ok(merged) => {
                *cab = merged;
                self.last_error = ErrorKind::Ok;
                Ok(())
            }
            Err((left, right, error)) => {
                *cab = left;
                self.last_error = error.kind();
                Err(MergeError { cabinet: right, error })
            }
        }
    }

    /// Join `prev` in front of `cab`; the mirror image of
    /// [`append`](CabDecompressor::append).
    pub fn prepend(
        &mut self,
        cab: &mut Cabinet,
        prev: Cabinet,
    ) -> std::result::Result<(), MergeError> {
        self.invalidate_state(&[cab.id, prev.id]);
        let right = std::mem::replace(cab, Cabinet::hollow());
        match merge(&self.system, prev, right) {
            Ok(merged) => {
                *cab = merged;
                self.last_error = ErrorKind::Ok;
                Ok(())
            }
            Err((left, right, error)) => {
                *cab = right;
                self.last_error = error.kind();
                Err(MergeError { cabinet: left, error })
            }
        }
    }

    /// Extract one file, writing its bytes to `output_name` via the
    /// system backend.
    pub fn extract(
        &mut self,
        cab: &Cabinet,
        file: &FileEntry,
        output_name: &str,
    ) -> Result<()> {
        let result = (|| {
            let mut out = self.system.open(output_name, OpenMode::Write)?;
            extract_impl(
                &self.system,
                &mut self.state,
                &self.params,
                cab,
                file,
                &mut *out,
            )
        })();
        self.finish(result)
    }

    /// Extract one file into a caller-supplied sink.
    pub fn extract_to(
        &mut self,
        cab: &Cabinet,
        file: &FileEntry,
        out: &mut dyn SysFile,
    ) -> Result<()> {
        let result = extract_impl(
            &self.system,
            &mut self.state,
            &self.params,
            cab,
            file,
            out,
        );
        self.finish(result)
    }

    /// Release a cabinet set and any decoder state tied to it.
    pub fn close(&mut self, cab: Cabinet) {
        self.invalidate_state(&[cab.id]);
        self.last_error = ErrorKind::Ok;
        drop(cab);
    }

    fn invalidate_state(&mut self, ids: &[u64]) {
        if let Some(state) = &self.state {
            if ids.contains(&state.cab_id) {
                self.state = None;
            }
        }
    }
}

fn extract_impl(
    sys: &dyn System,
    state: &mut Option<DecompressState>,
    params: &Params,
    cab: &Cabinet,
    file: &FileEntry,
    out: &mut dyn SysFile,
) -> Result<()> {
    let folder = match cab.folders.get(file.folder) {
        Some(folder) => folder,
        None => bad_args!("file does not belong to this cabinet set"),
    };
    let end = file.offset as u64 + file.length as u64;
    if folder.merge_prev.is_some()
        || end / CAB_BLOCKMAX as u64 > folder.num_blocks as u64
    {
        sys.message(
            None,
            &format!(
                "ERROR; file \"{}\" cannot be extracted, cabinet set is \
                 incomplete",
                file.name
            ),
        );
        data_format!("cabinet set is incomplete");
    }

    // (Re)initialise the decoder if we are on a different folder, or past
    // the file and a rewind is needed.
    let rebuild = match state {
        Some(state) => {
            state.cab_id != cab.id
                || state.folder_index != file.folder
                || state.offset > file.offset as u64
        }
        None => true,
    };
    if rebuild {
        *state = None; // old decoder torn down before the new one opens
        *state = Some(DecompressState::new(sys, cab, file.folder)?);
    }

    let driver = DriverParams {
        fix_mszip: params.fix_mszip,
        buf_size: params.decomp_buf_size,
    };
    let result = (|| {
        let state = state.as_mut().unwrap();
        // Decode up to the file's offset into the void, then for real.
        let skip = file.offset as u64 - state.offset;
        if skip > 0 {
            state.decompress(sys, cab, &driver, None, skip)?;
        }
        state.decompress(sys, cab, &driver, Some(out), file.length as u64)
    })();
    if result.is_err() {
        // A failed extraction leaves the decoder mid-stream; tear it down
        // so the next call starts the folder afresh.
        *state = None;
    }
    result
}
