//! The extraction driver: walks a folder's framed data blocks, re-joins
//! blocks split across cabinet parts, verifies per-block checksums and
//! feeds whole frames to whichever decoder the folder calls for.

use std::io::SeekFrom;

use byteorder::{ByteOrder, LittleEndian};

use crate::cabinet::Cabinet;
use crate::checksum::block_checksum;
use crate::consts::{CAB_BLOCKMAX, CAB_INPUTMAX};
use crate::ctype::CompressionType;
use crate::error::{Error, Result};
use crate::lzx::LzxDecompressor;
use crate::mszip::MszipDecompressor;
use crate::quantum::QuantumDecompressor;
use crate::system::{read_exact, write_all, OpenMode, SysFile, System};

pub(crate) struct DriverParams {
    pub fix_mszip: bool,
    pub buf_size: usize,
}

/// The per-folder decoder, dispatched once at (re)initialisation.
enum FolderDecompressor {
    Uncompressed,
    MsZip(Box<MszipDecompressor>),
    Quantum(Box<QuantumDecompressor>),
    Lzx(Box<LzxDecompressor>),
}

/// Decompression state for the folder currently being extracted.  It is
/// created lazily on the first extraction from a folder and torn down
/// when the folder changes or a rewind is needed.
pub(crate) struct DecompressState {
    /// Which cabinet set the folder belongs to.
    pub cab_id: u64,
    /// Which folder of that set.
    pub folder_index: usize,
    /// Bytes of the folder's uncompressed stream consumed so far.
    pub offset: u64,
    decompressor: FolderDecompressor,
    is_mszip: bool,
    /// Open handle on the part currently being read.
    infh: Box<dyn SysFile>,
    in_part: usize,
    /// Index into the folder's data-segment list.
    segment: usize,
    /// Logical data blocks consumed so far.
    block: u32,
    /// Re-assembled compressed bytes of the current block.
    staging: Vec<u8>,
    /// Decoded frame being handed out.
    frame: Vec<u8>,
    frame_pos: usize,
}

impl DecompressState {
    pub fn new(
        sys: &dyn System,
        cab: &Cabinet,
        folder_index: usize,
    ) -> Result<DecompressState> {
        let folder = cab.folder(folder_index);
        let segment = &folder.data[0];
        let part = &cab.parts[segment.part];
        let mut infh = sys.open(&part.filename, OpenMode::Read)?;
        infh.seek(SeekFrom::Start(segment.offset))?;
        let ctype = CompressionType::from_bitfield(folder.comp_bits)?;
        let decompressor = match ctype {
            CompressionType::None => FolderDecompressor::Uncompressed,
            CompressionType::MsZip => {
                FolderDecompressor::MsZip(Box::new(MszipDecompressor::new()))
            }
            CompressionType::Quantum(_, window) => FolderDecompressor::Quantum(
                Box::new(QuantumDecompressor::new(window)),
            ),
            CompressionType::Lzx(window) => {
                FolderDecompressor::Lzx(Box::new(LzxDecompressor::new(window)))
            }
        };
        Ok(DecompressState {
            cab_id: cab.id,
            folder_index,
            offset: 0,
            is_mszip: ctype == CompressionType::MsZip,
            decompressor,
            infh,
            in_part: segment.part,
            segment: 0,
            block: 0,
            staging: Vec::with_capacity(CAB_INPUTMAX),
            frame: Vec::with_capacity(CAB_BLOCKMAX),
            frame_pos: 0,
        })
    }

    /// Decode `todo` bytes of the folder stream, copying them to `out`
    /// (or discarding them when skipping forward to a file's offset).
    pub fn decompress(
        &mut self,
        sys: &dyn System,
        cab: &Cabinet,
        params: &DriverParams,
        mut out: Option<&mut dyn SysFile>,
        mut todo: u64,
    ) -> Result<()> {
        while todo > 0 {
            if self.frame_pos == self.frame.len() {
                self.next_frame(sys, cab, params)?;
            }
            let available = self.frame.len() - self.frame_pos;
            let run = (todo.min(available as u64) as usize)
                .min(params.buf_size.max(4));
            if let Some(out) = out.as_deref_mut() {
                write_all(
                    out,
                    &self.frame[self.frame_pos..self.frame_pos + run],
                )?;
            }
            self.frame_pos += run;
            self.offset += run as u64;
            todo -= run as u64;
        }
        Ok(())
    }

    /// Read and decode the next framed data block.
    fn next_frame(
        &mut self,
        sys: &dyn System,
        cab: &Cabinet,
        params: &DriverParams,
    ) -> Result<()> {
        let folder = cab.folder(self.folder_index);
        self.block += 1;
        if self.block > folder.num_blocks {
            data_format!(
                "folder has only {} data blocks",
                folder.num_blocks
            );
        }
        let ignore_checksum = params.fix_mszip && self.is_mszip;
        let uncompressed_size =
            self.read_block(sys, cab, ignore_checksum)?;
        if self.block < folder.num_blocks
            && uncompressed_size != CAB_BLOCKMAX
        {
            sys.message(Some(&*self.infh), "WARNING; non-maximal data block");
        }

        self.frame.clear();
        self.frame_pos = 0;
        let result = match &mut self.decompressor {
            FolderDecompressor::Uncompressed => {
                if self.staging.len() != uncompressed_size {
                    data_format!(
                        "stored block is {} bytes, header claims {}",
                        self.staging.len(),
                        uncompressed_size
                    );
                }
                self.frame.extend_from_slice(&self.staging);
                Ok(())
            }
            FolderDecompressor::MsZip(decompressor) => decompressor
                .decompress_block(
                    &self.staging,
                    uncompressed_size,
                    &mut self.frame,
                ),
            FolderDecompressor::Quantum(decompressor) => {
                // One trailer byte per frame lets the arithmetic decoder
                // realign; real cabinets rely on it.
                self.staging.push(0xff);
                decompressor.decompress_block(
                    &self.staging,
                    uncompressed_size,
                    &mut self.frame,
                )
            }
            FolderDecompressor::Lzx(decompressor) => decompressor
                .decompress_block(
                    &self.staging,
                    uncompressed_size,
                    &mut self.frame,
                ),
        };
        match result {
            Ok(()) => Ok(()),
            Err(error @ Error::Decrunch(_)) if params.fix_mszip
                && self.is_mszip =>
            {
                // Fix mode: keep the bytes the decoder managed to produce,
                // pad the rest of the frame with zeros and carry on with a
                // clean dictionary.
                sys.message(
                    Some(&*self.infh),
                    &format!(
                        "WARNING; MSZIP error, {} bytes of data lost ({})",
                        uncompressed_size.saturating_sub(self.frame.len()),
                        error
                    ),
                );
                self.frame.resize(uncompressed_size, 0);
                if let FolderDecompressor::MsZip(decompressor) =
                    &mut self.decompressor
                {
                    decompressor.reset();
                }
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Read one logical data block into the staging buffer, re-assembling
    /// a block split across cabinet parts, and return its declared
    /// uncompressed size.
    fn read_block(
        &mut self,
        sys: &dyn System,
        cab: &Cabinet,
        ignore_checksum: bool,
    ) -> Result<usize> {
        let folder = cab.folder(self.folder_index);
        self.staging.clear();
        loop {
            let part = &cab.parts[folder.data[self.segment].part];
            let mut header = [0u8; 8];
            read_exact(&mut *self.infh, &mut header)?;
            if part.block_reserve > 0 {
                self.infh
                    .seek(SeekFrom::Current(part.block_reserve as i64))?;
            }
            let stored_checksum = LittleEndian::read_u32(&header[0..4]);
            let compressed_size =
                LittleEndian::read_u16(&header[4..6]) as usize;
            let uncompressed_size =
                LittleEndian::read_u16(&header[6..8]) as usize;
            if self.staging.len() + compressed_size > CAB_INPUTMAX {
                data_format!(
                    "data block larger than {} bytes",
                    CAB_INPUTMAX
                );
            }
            if uncompressed_size > CAB_BLOCKMAX {
                data_format!(
                    "data block inflates past {} bytes",
                    CAB_BLOCKMAX
                );
            }

            let start = self.staging.len();
            self.staging.resize(start + compressed_size, 0);
            read_exact(&mut *self.infh, &mut self.staging[start..])?;

            // A zero checksum means "not stored".
            if stored_checksum != 0 {
                let actual = block_checksum(
                    &self.staging[start..],
                    compressed_size as u16,
                    uncompressed_size as u16,
                );
                if actual != stored_checksum {
                    if !ignore_checksum {
                        return Err(Error::Checksum {
                            block: self.block,
                            expected: stored_checksum,
                            actual,
                        });
                    }
                    sys.message(
                        Some(&*self.infh),
                        "WARNING; bad block checksum found",
                    );
                }
            }

            // A declared uncompressed size of zero means the block
            // continues as the first block of the next cabinet in the set.
            if uncompressed_size != 0 {
                return Ok(uncompressed_size);
            }
            self.segment += 1;
            if self.segment >= folder.data.len() {
                data_format!("split data block but no next cabinet in set");
            }
            let segment = &folder.data[self.segment];
            tracing::debug!(
                segment = self.segment,
                part = segment.part,
                "data block continues in next cabinet"
            );
            if segment.part != self.in_part {
                self.infh =
                    sys.open(&cab.parts[segment.part].filename, OpenMode::Read)?;
                self.in_part = segment.part;
            }
            self.infh.seek(SeekFrom::Start(segment.offset))?;
        }
    }
}
