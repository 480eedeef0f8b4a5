//! Parsing of cabinet headers, and the in-memory cabinet-set object.
//!
//! A [`Cabinet`] models a whole chain of on-disk cabinet files ("parts"):
//! opening a file yields a single-part set, and merging appends further
//! parts while splicing split folders together.  Folder and file lists
//! always describe the complete set, so iterating after a merge sees the
//! merged view no matter which part a record originally came from.

use std::io::SeekFrom;

use byteorder::{ByteOrder, LittleEndian};

use crate::consts;
use crate::error::{Error, Result};
use crate::file::{parse_file_entry, FileEntries, FileEntry};
use crate::folder::{parse_folder_entry, FolderEntries, FolderEntry};
use crate::string::read_string;
use crate::system::{read_exact, SysFile, System};

/// One cabinet file's own header metadata within a set.
#[derive(Debug)]
pub struct CabinetPart {
    pub(crate) filename: String,
    pub(crate) base_offset: u64,
    pub(crate) length: u32,
    pub(crate) set_id: u16,
    pub(crate) set_index: u16,
    pub(crate) flags: u16,
    pub(crate) block_reserve: u8,
    pub(crate) reserve_data: Vec<u8>,
    pub(crate) prev_name: Option<String>,
    pub(crate) prev_disk: Option<String>,
    pub(crate) next_name: Option<String>,
    pub(crate) next_disk: Option<String>,
}

impl CabinetPart {
    /// The name this part was opened under.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Offset of the cabinet within its container file; non-zero for
    /// cabinets embedded by [`search`](crate::CabDecompressor::search).
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Declared total length of the cabinet in bytes.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// The set identifier shared by all cabinets of one set.
    pub fn set_id(&self) -> u16 {
        self.set_id
    }

    /// This cabinet's zero-based index within its set.
    pub fn set_index(&self) -> u16 {
        self.set_index
    }

    /// True if the header names a preceding cabinet in the set.
    pub fn has_prev(&self) -> bool {
        (self.flags & consts::FLAG_PREV_CABINET) != 0
    }

    /// True if the header names a following cabinet in the set.
    pub fn has_next(&self) -> bool {
        (self.flags & consts::FLAG_NEXT_CABINET) != 0
    }

    /// Name of the preceding cabinet file, if recorded.
    pub fn prev_name(&self) -> Option<&str> {
        self.prev_name.as_deref()
    }

    /// Disk label of the preceding cabinet, if recorded.
    pub fn prev_disk(&self) -> Option<&str> {
        self.prev_disk.as_deref()
    }

    /// Name of the following cabinet file, if recorded.
    pub fn next_name(&self) -> Option<&str> {
        self.next_name.as_deref()
    }

    /// Disk label of the following cabinet, if recorded.
    pub fn next_disk(&self) -> Option<&str> {
        self.next_disk.as_deref()
    }

    /// Application-defined reserve data from the cabinet header.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }
}

/// A parsed cabinet, or a chain of cabinets once others have been
/// appended or prepended.
#[derive(Debug)]
pub struct Cabinet {
    pub(crate) id: u64,
    pub(crate) parts: Vec<CabinetPart>,
    pub(crate) folders: Vec<FolderEntry>,
    pub(crate) files: Vec<FileEntry>,
}

impl Cabinet {
    /// The cabinet files making up this (possibly merged) set, in order.
    pub fn parts(&self) -> &[CabinetPart] {
        &self.parts
    }

    /// Returns an iterator over the folder entries in this set.
    pub fn folder_entries(&self) -> FolderEntries<'_> {
        FolderEntries { iter: self.folders.iter() }
    }

    /// Returns an iterator over the file entries in this set.
    pub fn file_entries(&self) -> FileEntries<'_> {
        FileEntries { iter: self.files.iter() }
    }

    /// Returns the entry for the file with the given name, if any.
    pub fn get_file_entry(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|file| file.name() == name)
    }

    pub(crate) fn folder(&self, index: usize) -> &FolderEntry {
        &self.folders[index]
    }

    /// Placeholder set used only while swapping during a merge.
    pub(crate) fn hollow() -> Cabinet {
        Cabinet { id: 0, parts: Vec::new(), folders: Vec::new(), files: Vec::new() }
    }
}

/// Read a cabinet's header, folder list and file list from `fh`, which
/// may be positioned anywhere (the cabinet starts at `base_offset`).
///
/// In quiet mode (used by the scanner) no warnings are emitted.  In
/// salvage mode certain malformed structures degrade to warnings and the
/// partial result is kept.
pub(crate) fn read_headers(
    sys: &dyn System,
    fh: &mut dyn SysFile,
    filename: &str,
    base_offset: u64,
    quiet: bool,
    salvage: bool,
    id: u64,
) -> Result<Cabinet> {
    fh.seek(SeekFrom::Start(base_offset))?;
    let mut header = [0u8; 36];
    read_exact(fh, &mut header)?;
    if LittleEndian::read_u32(&header[0..4]) != consts::FILE_SIGNATURE {
        return Err(Error::Signature);
    }
    let length = LittleEndian::read_u32(&header[8..12]);
    let files_offset = LittleEndian::read_u32(&header[16..20]);
    let minor_version = header[24];
    let major_version = header[25];
    let num_folders = LittleEndian::read_u16(&header[26..28]) as usize;
    let num_files = LittleEndian::read_u16(&header[28..30]) as usize;
    let flags = LittleEndian::read_u16(&header[30..32]);
    let set_id = LittleEndian::read_u16(&header[32..34]);
    let set_index = LittleEndian::read_u16(&header[34..36]);

    if num_folders == 0 {
        if !quiet {
            sys.message(Some(fh), "no folders in cabinet");
        }
        data_format!("cabinet has no folders");
    }
    if num_files == 0 {
        if !quiet {
            sys.message(Some(fh), "no files in cabinet");
        }
        data_format!("cabinet has no files");
    }
    if (major_version, minor_version)
        != (consts::VERSION_MAJOR, consts::VERSION_MINOR)
        && !quiet
    {
        sys.message(
            Some(fh),
            &format!(
                "WARNING; cabinet version {}.{} is not 1.3",
                major_version, minor_version
            ),
        );
    }

    let mut header_reserve_size = 0u16;
    let mut folder_reserve_size = 0u8;
    let mut block_reserve = 0u8;
    if (flags & consts::FLAG_RESERVE_PRESENT) != 0 {
        let mut sizes = [0u8; 4];
        read_exact(fh, &mut sizes)?;
        header_reserve_size = LittleEndian::read_u16(&sizes[0..2]);
        folder_reserve_size = sizes[2];
        block_reserve = sizes[3];
        if header_reserve_size > consts::MAX_HEADER_RESERVE_SIZE && !quiet {
            sys.message(Some(fh), "WARNING; reserved header > 60000");
        }
    }
    let mut reserve_data = vec![0u8; header_reserve_size as usize];
    if header_reserve_size > 0 {
        read_exact(fh, &mut reserve_data)?;
    }

    let (prev_name, prev_disk) = if (flags & consts::FLAG_PREV_CABINET) != 0
    {
        (Some(read_string(fh, false)?), Some(read_string(fh, false)?))
    } else {
        (None, None)
    };
    let (next_name, next_disk) = if (flags & consts::FLAG_NEXT_CABINET) != 0
    {
        (Some(read_string(fh, false)?), Some(read_string(fh, false)?))
    } else {
        (None, None)
    };

    let mut folders = Vec::with_capacity(num_folders);
    for _ in 0..num_folders {
        folders.push(parse_folder_entry(
            fh,
            0,
            base_offset,
            folder_reserve_size as usize,
        )?);
    }

    fh.seek(SeekFrom::Start(base_offset + files_offset as u64))?;
    let mut files: Vec<FileEntry> = Vec::with_capacity(num_files);
    for _ in 0..num_files {
        let raw = match parse_file_entry(fh) {
            Ok(raw) => raw,
            Err(error) if salvage && !files.is_empty() => {
                sys.message(
                    Some(fh),
                    &format!("WARNING; file list truncated: {}", error),
                );
                break;
            }
            Err(error) => return Err(error),
        };
        let mut entry = raw.entry;
        let file_index = files.len();
        match raw.folder_field {
            consts::FILE_CONTINUED_FROM_PREV => {
                entry.folder = 0;
                let folder = &mut folders[0];
                folder.merge_prev.get_or_insert(file_index);
            }
            consts::FILE_CONTINUED_TO_NEXT => {
                entry.folder = folders.len() - 1;
                let folder = folders.last_mut().unwrap();
                folder.merge_next.get_or_insert(file_index);
            }
            consts::FILE_CONTINUED_PREV_AND_NEXT => {
                let last = folders.len() - 1;
                folders[last].merge_next.get_or_insert(file_index);
                entry.folder = 0;
                folders[0].merge_prev.get_or_insert(file_index);
            }
            index if (index as usize) < folders.len() => {
                entry.folder = index as usize;
            }
            index => {
                if salvage {
                    sys.message(
                        Some(fh),
                        &format!(
                            "WARNING; file \"{}\" has invalid folder index \
                             {}, skipped",
                            entry.name, index
                        ),
                    );
                    continue;
                }
                tracing::debug!(index, name = %entry.name, "invalid folder index");
                data_format!("file entry folder index out of bounds");
            }
        }
        files.push(entry);
    }
    if files.is_empty() {
        data_format!("cabinet has no readable files");
    }

    Ok(Cabinet {
        id,
        parts: vec![CabinetPart {
            filename: filename.to_string(),
            base_offset,
            length,
            set_id,
            set_index,
            flags,
            block_reserve,
            reserve_data,
            prev_name,
            prev_disk,
            next_name,
            next_disk,
        }],
        folders,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::read_headers;
    use crate::ctype::CompressionType;
    use crate::error::ErrorKind;
    use crate::system::{MemSystem, OpenMode, System};

    fn parse(
        binary: &[u8],
        salvage: bool,
    ) -> crate::error::Result<super::Cabinet> {
        let sys = MemSystem::new();
        sys.insert("test.cab", binary.to_vec());
        let mut fh = sys.open("test.cab", OpenMode::Read).unwrap();
        read_headers(&sys, &mut *fh, "test.cab", 0, false, salvage, 1)
    }

    #[test]
    fn parse_uncompressed_cabinet_with_one_file() {
        let binary: &[u8] = b"MSCF\0\0\0\0\x59\0\0\0\0\0\0\0\
            \x2c\0\0\0\0\0\0\0\x03\x01\x01\0\x01\0\0\0\x34\x12\0\0\
            \x43\0\0\0\x01\0\0\0\
            \x0e\0\0\0\0\0\0\0\0\0\x6c\x22\xba\x59\x01\0hi.txt\0\
            \x4c\x1a\x2e\x7f\x0e\0\x0e\0Hello, world!\n";
        assert_eq!(binary.len(), 0x59);
        let cabinet = parse(binary, false).unwrap();
        let part = &cabinet.parts()[0];
        assert_eq!(part.set_id(), 0x1234);
        assert_eq!(part.set_index(), 0);
        assert_eq!(part.length(), 0x59);
        assert!(!part.has_prev());
        assert!(!part.has_next());
        assert_eq!(cabinet.folder_entries().len(), 1);
        let folder = cabinet.folder_entries().next().unwrap();
        assert_eq!(
            folder.compression_type().unwrap(),
            CompressionType::None
        );
        assert_eq!(folder.num_data_blocks(), 1);

        let file = cabinet.get_file_entry("hi.txt").unwrap();
        assert_eq!(file.name(), "hi.txt");
        assert_eq!(file.uncompressed_size(), 14);
        assert!(!file.is_name_utf());
        assert!(file.is_read_only());
        let dt = file.datetime().unwrap();
        assert_eq!(dt.year(), 1997);
        assert_eq!(dt.month(), time::Month::March);
        assert_eq!(dt.day(), 12);
        assert_eq!(dt.hour(), 11);
        assert_eq!(dt.minute(), 13);
        assert_eq!(dt.second(), 52);
    }

    #[test]
    fn bad_signature_is_a_signature_error() {
        let error = parse(b"MSCG\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\
            \x03\x01\x01\0\x01\0\0\0\x34\x12\0\0", false)
        .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Signature);
    }

    #[test]
    fn truncated_header_is_a_read_error() {
        let error = parse(b"MSCF\0\0\0\0\x59\0\0", false).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Read);
    }

    #[test]
    fn zero_folders_is_a_data_format_error() {
        let binary: &[u8] = b"MSCF\0\0\0\0\x28\0\0\0\0\0\0\0\
            \x24\0\0\0\0\0\0\0\x03\x01\0\0\x01\0\0\0\x34\x12\0\0";
        let error = parse(binary, false).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn bad_folder_index_is_a_data_format_error() {
        // Same as the one-file cabinet but the file claims folder 7.
        let binary: &[u8] = b"MSCF\0\0\0\0\x59\0\0\0\0\0\0\0\
            \x2c\0\0\0\0\0\0\0\x03\x01\x01\0\x01\0\0\0\x34\x12\0\0\
            \x43\0\0\0\x01\0\0\0\
            \x0e\0\0\0\0\0\0\0\x07\0\x6c\x22\xba\x59\x01\0hi.txt\0\
            \x4c\x1a\x2e\x7f\x0e\0\x0e\0Hello, world!\n";
        let error = parse(binary, false).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn salvage_keeps_partial_file_lists() {
        // Two files claimed; the second record is cut short.
        let binary: &[u8] = b"MSCF\0\0\0\0\x59\0\0\0\0\0\0\0\
            \x2c\0\0\0\0\0\0\0\x03\x01\x01\0\x02\0\0\0\x34\x12\0\0\
            \x43\0\0\0\x01\0\0\0\
            \x0e\0\0\0\0\0\0\0\0\0\x6c\x22\xba\x59\x01\0hi.txt\0\
            \x0e\0\0\0";
        assert!(parse(binary, false).is_err());
        let cabinet = parse(binary, true).unwrap();
        assert_eq!(cabinet.file_entries().len(), 1);
    }

    #[test]
    fn sentinel_folder_indices_set_merge_anchors() {
        let binary: &[u8] = b"MSCF\0\0\0\0\x60\0\0\0\0\0\0\0\
            \x3c\0\0\0\0\0\0\0\x03\x01\x01\0\x02\0\x02\0\x34\x12\x01\0\
            next.cab\0disk 2\0\
            \x43\0\0\0\x01\0\0\0\
            \x0e\0\0\0\0\0\0\0\xfd\xff\x6c\x22\xba\x59\x01\0a\0\
            \x10\0\0\0\x0e\0\0\0\xfe\xff\x6c\x22\xba\x59\x01\0b\0";
        assert_eq!(binary.len(), 0x60);
        let cabinet = parse(binary, false).unwrap();
        let folder = cabinet.folder_entries().next().unwrap();
        assert_eq!(folder.merge_prev, Some(0));
        assert_eq!(folder.merge_next, Some(1));
        assert!(folder.is_continued_from_prev());
        assert!(cabinet.parts()[0].has_next());
        assert_eq!(cabinet.parts()[0].next_name(), Some("next.cab"));
        assert_eq!(cabinet.parts()[0].next_disk(), Some("disk 2"));
    }
}
