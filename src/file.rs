use std::slice;

use byteorder::{ByteOrder, LittleEndian};
use time::PrimitiveDateTime;

use crate::consts;
use crate::datetime::datetime_from_bits;
use crate::error::Result;
use crate::string::read_string;
use crate::system::{read_exact, SysFile};

/// An iterator over the file entries in a cabinet (or merged cabinet set).
#[derive(Clone)]
pub struct FileEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FileEntry>,
}

impl<'a> Iterator for FileEntries<'a> {
    type Item = &'a FileEntry;

    fn next(&mut self) -> Option<&'a FileEntry> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FileEntries<'a> {}

/// Metadata about one file stored in a cabinet.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub(crate) name: String,
    /// Index of this file's folder within the owning cabinet set.
    pub(crate) folder: usize,
    pub(crate) length: u32,
    /// Offset of this file within the folder's uncompressed stream.
    pub(crate) offset: u32,
    pub(crate) date: u16,
    pub(crate) time: u16,
    pub(crate) attributes: u16,
}

impl FileEntry {
    /// Returns the name of the file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index of the folder holding this file's data.
    pub fn folder_index(&self) -> usize {
        self.folder
    }

    /// Returns the total size of the file when decompressed, in bytes.
    pub fn uncompressed_size(&self) -> u32 {
        self.length
    }

    /// Returns this file's offset within its folder's uncompressed stream.
    pub fn uncompressed_offset(&self) -> u32 {
        self.offset
    }

    /// Returns the modification datetime recorded for this file, or `None`
    /// if the stored fields are not a valid date and time.
    pub fn datetime(&self) -> Option<PrimitiveDateTime> {
        datetime_from_bits(self.date, self.time)
    }

    /// Returns true if this file has the "read-only" attribute set.
    pub fn is_read_only(&self) -> bool {
        (self.attributes & consts::ATTR_READ_ONLY) != 0
    }

    /// Returns true if this file has the "hidden" attribute set.
    pub fn is_hidden(&self) -> bool {
        (self.attributes & consts::ATTR_HIDDEN) != 0
    }

    /// Returns true if this file has the "system file" attribute set.
    pub fn is_system(&self) -> bool {
        (self.attributes & consts::ATTR_SYSTEM) != 0
    }

    /// Returns true if this file has the "archive" (modified since last
    /// backup) attribute set.
    pub fn is_archive(&self) -> bool {
        (self.attributes & consts::ATTR_ARCH) != 0
    }

    /// Returns true if this file has the "execute after extraction"
    /// attribute set.
    pub fn is_exec(&self) -> bool {
        (self.attributes & consts::ATTR_EXEC) != 0
    }

    /// Returns true if this file's name is flagged as UTF-8.
    pub fn is_name_utf(&self) -> bool {
        (self.attributes & consts::ATTR_NAME_IS_UTF) != 0
    }
}

/// A file record as read from disk, before its folder reference has been
/// resolved against the folder list.
pub(crate) struct RawFileEntry {
    pub entry: FileEntry,
    pub folder_field: u16,
}

pub(crate) fn parse_file_entry(fh: &mut dyn SysFile) -> Result<RawFileEntry> {
    let mut buf = [0u8; 16];
    read_exact(fh, &mut buf)?;
    let length = LittleEndian::read_u32(&buf[0..4]);
    let offset = LittleEndian::read_u32(&buf[4..8]);
    let folder_field = LittleEndian::read_u16(&buf[8..10]);
    let date = LittleEndian::read_u16(&buf[10..12]);
    let time = LittleEndian::read_u16(&buf[12..14]);
    let attributes = LittleEndian::read_u16(&buf[14..16]);
    let is_utf8 = (attributes & consts::ATTR_NAME_IS_UTF) != 0;
    let name = read_string(fh, is_utf8)?;
    Ok(RawFileEntry {
        entry: FileEntry {
            name,
            folder: 0,
            length,
            offset,
            date,
            time,
            attributes,
        },
        folder_field,
    })
}
