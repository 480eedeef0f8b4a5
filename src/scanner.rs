//! Byte-wise search for cabinet headers embedded in arbitrary containers.
//!
//! The container is read in search-buffer-sized chunks and fed through a
//! twenty-step state machine that watches for the `MSCF` signature and
//! captures the candidate's declared length (bytes 8-11) and first-file
//! offset (bytes 16-19).  Plausible candidates are handed to the header
//! parser in quiet mode; false positives resume the scan just past the
//! signature, real cabinets resume past their declared end.

use std::io::SeekFrom;

use byteorder::{ByteOrder, LittleEndian};

use crate::cabinet::{read_headers, Cabinet};
use crate::error::Result;
use crate::system::{SysFile, System};

/// The InstallShield container signature `ISc(`; not a cabinet at all.
const INSTALLSHIELD_SIGNATURE: u32 = 0x28635349;

pub(crate) struct ScanParams {
    pub searchbuf_size: usize,
    pub salvage: bool,
}

pub(crate) fn search(
    sys: &dyn System,
    filename: &str,
    params: &ScanParams,
    next_id: &mut u64,
) -> Result<Vec<Cabinet>> {
    let mut fh = sys.open(filename, crate::system::OpenMode::Read)?;
    let file_length = fh.seek(SeekFrom::End(0))?;
    let (cabinets, first_length) =
        find(sys, &mut *fh, filename, file_length, params, next_id)?;

    // If there is a cabinet at offset 0, compare its declared length with
    // the container's to report truncation or trailing junk.
    let at_zero = cabinets
        .first()
        .map_or(true, |cabinet| cabinet.parts[0].base_offset == 0);
    if first_length != 0 && first_length != file_length && at_zero {
        if first_length < file_length {
            sys.message(
                Some(&*fh),
                &format!(
                    "WARNING; possible {} extra bytes at end of file",
                    file_length - first_length
                ),
            );
        } else {
            sys.message(
                Some(&*fh),
                &format!(
                    "WARNING; file possibly truncated by {} bytes",
                    first_length - file_length
                ),
            );
        }
    }
    Ok(cabinets)
}

fn find(
    sys: &dyn System,
    fh: &mut dyn SysFile,
    filename: &str,
    file_length: u64,
    params: &ScanParams,
    next_id: &mut u64,
) -> Result<(Vec<Cabinet>, u64)> {
    let mut cabinets = Vec::new();
    let mut buf = vec![0u8; params.searchbuf_size];
    let mut first_length = 0u64;
    let mut false_cabs = 0u32;
    let mut state = 0u32;
    let mut cab_length = 0u32;
    let mut file_offset = 0u32;

    let mut offset = 0u64;
    'chunks: while offset < file_length {
        let length = (file_length - offset).min(buf.len() as u64) as usize;
        fh.seek(SeekFrom::Start(offset))?;
        crate::system::read_exact(fh, &mut buf[..length])?;

        if offset == 0
            && length >= 4
            && LittleEndian::read_u32(&buf[0..4]) == INSTALLSHIELD_SIGNATURE
        {
            sys.message(
                Some(fh),
                "WARNING; found InstallShield header. This is probably an \
                 InstallShield file. Use UNSHIELD to unpack it.",
            );
        }

        let mut p = 0usize;
        while p < length {
            let byte = buf[p];
            p += 1;
            match state {
                // Most of the time goes here, hunting for an 'M'.
                0 => state = u32::from(byte == b'M'),
                1 => state = if byte == b'S' { 2 } else { 0 },
                2 => state = if byte == b'C' { 3 } else { 0 },
                3 => state = if byte == b'F' { 4 } else { 0 },
                8 => {
                    cab_length = byte as u32;
                    state = 9;
                }
                9 => {
                    cab_length |= (byte as u32) << 8;
                    state = 10;
                }
                10 => {
                    cab_length |= (byte as u32) << 16;
                    state = 11;
                }
                11 => {
                    cab_length |= (byte as u32) << 24;
                    state = 12;
                }
                16 => {
                    file_offset = byte as u32;
                    state = 17;
                }
                17 => {
                    file_offset |= (byte as u32) << 8;
                    state = 18;
                }
                18 => {
                    file_offset |= (byte as u32) << 16;
                    state = 19;
                }
                19 => {
                    file_offset |= (byte as u32) << 24;
                    // Twenty bytes of potential header seen; this is where
                    // the candidate cabinet would start.
                    let cab_offset = offset + p as u64 - 20;
                    // Should reading it fail, restart just past 'MSCF'.
                    let mut resume = cab_offset + 4;

                    if cab_offset == 0 {
                        first_length = cab_length as u64;
                    }
                    if (file_offset as u64) < cab_length as u64
                        && cab_offset + (file_offset as u64) < file_length + 32
                        && cab_offset + (cab_length as u64) < file_length + 32
                    {
                        match read_headers(
                            sys,
                            fh,
                            filename,
                            cab_offset,
                            true,
                            params.salvage,
                            *next_id,
                        ) {
                            Ok(cabinet) => {
                                *next_id += 1;
                                resume = cab_offset + cab_length as u64;
                                cabinets.push(cabinet);
                            }
                            Err(error) => {
                                tracing::debug!(
                                    offset = cab_offset,
                                    %error,
                                    "false cabinet candidate"
                                );
                                false_cabs += 1;
                            }
                        }
                    }

                    state = 0;
                    if resume >= file_length {
                        break 'chunks;
                    }
                    offset = resume;
                    continue 'chunks;
                }
                // Bytes 4-7 and 12-15 of the candidate header are skipped.
                _ => state += 1,
            }
        }
        offset += length as u64;
    }

    if false_cabs > 1 {
        sys.message(
            Some(fh),
            &format!("WARNING; {} false cabinet headers found", false_cabs),
        );
    }
    Ok((cabinets, first_length))
}

#[cfg(test)]
mod tests {
    use super::{search, ScanParams};
    use crate::system::MemSystem;

    fn params() -> ScanParams {
        ScanParams { searchbuf_size: 32768, salvage: false }
    }

    fn one_file_cabinet() -> Vec<u8> {
        let binary: &[u8] = b"MSCF\0\0\0\0\x59\0\0\0\0\0\0\0\
            \x2c\0\0\0\0\0\0\0\x03\x01\x01\0\x01\0\0\0\x34\x12\0\0\
            \x43\0\0\0\x01\0\0\0\
            \x0e\0\0\0\0\0\0\0\0\0\x6c\x22\xba\x59\x01\0hi.txt\0\
            \x4c\x1a\x2e\x7f\x0e\0\x0e\0Hello, world!\n";
        binary.to_vec()
    }

    #[test]
    fn finds_cabinet_at_offset_zero() {
        let sys = MemSystem::new();
        sys.insert("a.bin", one_file_cabinet());
        let mut id = 1;
        let cabs = search(&sys, "a.bin", &params(), &mut id).unwrap();
        assert_eq!(cabs.len(), 1);
        assert_eq!(cabs[0].parts()[0].base_offset(), 0);
    }

    #[test]
    fn finds_embedded_cabinet_after_junk() {
        let sys = MemSystem::new();
        let mut container = b"XXXX".to_vec();
        container.extend_from_slice(&one_file_cabinet());
        sys.insert("a.bin", container);
        let mut id = 1;
        let cabs = search(&sys, "a.bin", &params(), &mut id).unwrap();
        assert_eq!(cabs.len(), 1);
        assert_eq!(cabs[0].parts()[0].base_offset(), 4);
    }

    #[test]
    fn finds_two_concatenated_cabinets() {
        let sys = MemSystem::new();
        let mut container = one_file_cabinet();
        container.extend_from_slice(b"garbage in between MSC but not F");
        let second_base = container.len() as u64;
        container.extend_from_slice(&one_file_cabinet());
        sys.insert("a.bin", container);
        let mut id = 1;
        let cabs = search(&sys, "a.bin", &params(), &mut id).unwrap();
        assert_eq!(cabs.len(), 2);
        assert_eq!(cabs[0].parts()[0].base_offset(), 0);
        assert_eq!(cabs[1].parts()[0].base_offset(), second_base);
    }

    #[test]
    fn truncated_candidate_reports_no_cabinets() {
        let sys = MemSystem::new();
        // A plausible header start with nothing behind it.
        sys.insert("a.bin", b"MSCF\0\0\0\0\x20\0\0\0\0\0\0\0\x10\0\0\0".to_vec());
        let mut id = 1;
        let cabs = search(&sys, "a.bin", &params(), &mut id).unwrap();
        assert!(cabs.is_empty());
    }

    #[test]
    fn signature_straddling_chunk_boundary_is_found() {
        let sys = MemSystem::new();
        let mut container = vec![b'M'; 4094];
        container.extend_from_slice(&one_file_cabinet());
        sys.insert("a.bin", container);
        let mut id = 1;
        let small = ScanParams { searchbuf_size: 4096, salvage: false };
        let cabs = search(&sys, "a.bin", &small, &mut id).unwrap();
        assert_eq!(cabs.len(), 1);
        assert_eq!(cabs[0].parts()[0].base_offset(), 4094);
    }

    #[test]
    fn installshield_header_warns() {
        let sys = MemSystem::new();
        sys.insert("a.bin", b"ISc(not a cabinet at all".to_vec());
        let mut id = 1;
        let cabs = search(&sys, "a.bin", &params(), &mut id).unwrap();
        assert!(cabs.is_empty());
        assert!(sys
            .messages()
            .iter()
            .any(|message| message.contains("InstallShield")));
    }
}
