use std::slice;

use byteorder::{ByteOrder, LittleEndian};

use crate::ctype::CompressionType;
use crate::error::Result;
use crate::system::{read_exact, SysFile};

/// An iterator over the folder entries in a cabinet (or merged set).
#[derive(Clone)]
pub struct FolderEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FolderEntry>,
}

impl<'a> Iterator for FolderEntries<'a> {
    type Item = &'a FolderEntry;

    fn next(&mut self) -> Option<&'a FolderEntry> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FolderEntries<'a> {}

/// One span of a folder's data blocks within a single cabinet part.  A
/// freshly parsed folder has exactly one segment; merging split folders
/// appends the continuation segments.
#[derive(Clone, Debug)]
pub(crate) struct DataSegment {
    /// Index of the owning part within the cabinet set.
    pub part: usize,
    /// Absolute offset of the segment's first data block.
    pub offset: u64,
    /// Number of whole data blocks this segment contributes.
    pub num_blocks: u32,
}

/// Metadata about one folder (compressed stream) in a cabinet set.
#[derive(Debug)]
pub struct FolderEntry {
    pub(crate) comp_bits: u16,
    pub(crate) num_blocks: u32,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) reserve_data: Vec<u8>,
    /// First file entry continued into this folder from the previous
    /// cabinet, if any; used only while linking a set.
    pub(crate) merge_prev: Option<usize>,
    /// First file entry continuing out of this folder into the next
    /// cabinet, if any.
    pub(crate) merge_next: Option<usize>,
}

impl FolderEntry {
    /// Returns the scheme used to compress this folder's data, or a
    /// data-format error if the stored compression-type word is invalid.
    pub fn compression_type(&self) -> Result<CompressionType> {
        CompressionType::from_bitfield(self.comp_bits)
    }

    /// Returns the number of data blocks holding this folder's data
    /// (counting a block split across cabinets once).
    pub fn num_data_blocks(&self) -> u32 {
        self.num_blocks
    }

    /// Returns the application-defined reserve data for this folder.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }

    /// True if this folder's data continues from a cabinet that has not
    /// been joined to the set yet, so its files cannot be extracted.
    pub fn is_continued_from_prev(&self) -> bool {
        self.merge_prev.is_some()
    }
}

pub(crate) fn parse_folder_entry(
    fh: &mut dyn SysFile,
    part: usize,
    base_offset: u64,
    reserve_size: usize,
) -> Result<FolderEntry> {
    let mut buf = [0u8; 8];
    read_exact(fh, &mut buf)?;
    let data_offset = LittleEndian::read_u32(&buf[0..4]);
    let num_blocks = LittleEndian::read_u16(&buf[4..6]);
    let comp_bits = LittleEndian::read_u16(&buf[6..8]);
    let mut reserve_data = vec![0u8; reserve_size];
    if reserve_size > 0 {
        read_exact(fh, &mut reserve_data)?;
    }
    Ok(FolderEntry {
        comp_bits,
        num_blocks: num_blocks as u32,
        data: vec![DataSegment {
            part,
            offset: base_offset + data_offset as u64,
            num_blocks: num_blocks as u32,
        }],
        reserve_data,
        merge_prev: None,
        merge_next: None,
    })
}
