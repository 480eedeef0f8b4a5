//! Multi-part cabinet sets: building, linking in assorted orders, split
//! folders, and the failure modes of incomplete sets.

use mscab::{CabDecompressor, ErrorKind, MemSystem, Parameter};

// ========================================================================= //
// A tiny cabinet assembler, enough for single-folder test parts.

const CONTINUED_FROM_PREV: u16 = 0xfffd;
const CONTINUED_TO_NEXT: u16 = 0xfffe;
const CONTINUED_PREV_AND_NEXT: u16 = 0xffff;

struct TestFile {
    name: &'static str,
    offset: u32,
    length: u32,
    folder: u16,
}

struct TestBlock {
    payload: Vec<u8>,
    uncompressed_size: u16,
    corrupt_checksum: bool,
}

struct TestPart {
    set_id: u16,
    set_index: u16,
    comp_bits: u16,
    prev: Option<(&'static str, &'static str)>,
    next: Option<(&'static str, &'static str)>,
    reserve: Option<(u16, u8, u8)>,
    files: Vec<TestFile>,
    blocks: Vec<TestBlock>,
}

fn block_checksum(payload: &[u8], csize: u16, usize_: u16) -> u32 {
    let mut sum = 0u32;
    let mut chunks = payload.chunks_exact(4);
    for chunk in &mut chunks {
        sum ^= u32::from_le_bytes(chunk.try_into().unwrap());
    }
    let tail = chunks.remainder();
    let mut ul = 0u32;
    for &byte in tail {
        ul = (ul << 8) | byte as u32;
    }
    sum ^ ul ^ (csize as u32 | (usize_ as u32) << 16)
}

fn build_part(part: &TestPart) -> Vec<u8> {
    let (header_reserve, folder_reserve, block_reserve) =
        part.reserve.unwrap_or((0, 0, 0));
    let mut flags = 0u16;
    if part.prev.is_some() {
        flags |= 0x1;
    }
    if part.next.is_some() {
        flags |= 0x2;
    }
    if part.reserve.is_some() {
        flags |= 0x4;
    }

    let mut strings = Vec::new();
    for (name, disk) in part.prev.iter().chain(part.next.iter()) {
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
        strings.extend_from_slice(disk.as_bytes());
        strings.push(0);
    }

    let header_ext = if part.reserve.is_some() {
        4 + header_reserve as usize
    } else {
        0
    };
    let files_offset =
        36 + header_ext + strings.len() + 8 + folder_reserve as usize;
    let file_records: usize = part
        .files
        .iter()
        .map(|file| 16 + file.name.len() + 1)
        .sum();
    let data_offset = files_offset + file_records;
    let data_len: usize = part
        .blocks
        .iter()
        .map(|block| 8 + block_reserve as usize + block.payload.len())
        .sum();
    let total = (data_offset + data_len) as u32;

    let mut cab = Vec::with_capacity(total as usize);
    cab.extend_from_slice(b"MSCF");
    cab.extend_from_slice(&[0; 4]);
    cab.extend_from_slice(&total.to_le_bytes());
    cab.extend_from_slice(&[0; 4]);
    cab.extend_from_slice(&(files_offset as u32).to_le_bytes());
    cab.extend_from_slice(&[0; 4]);
    cab.push(3); // minor version
    cab.push(1); // major version
    cab.extend_from_slice(&1u16.to_le_bytes()); // folders
    cab.extend_from_slice(&(part.files.len() as u16).to_le_bytes());
    cab.extend_from_slice(&flags.to_le_bytes());
    cab.extend_from_slice(&part.set_id.to_le_bytes());
    cab.extend_from_slice(&part.set_index.to_le_bytes());
    if part.reserve.is_some() {
        cab.extend_from_slice(&header_reserve.to_le_bytes());
        cab.push(folder_reserve);
        cab.push(block_reserve);
        cab.extend(std::iter::repeat(0xEE).take(header_reserve as usize));
    }
    cab.extend_from_slice(&strings);

    cab.extend_from_slice(&(data_offset as u32).to_le_bytes());
    cab.extend_from_slice(&(part.blocks.len() as u16).to_le_bytes());
    cab.extend_from_slice(&part.comp_bits.to_le_bytes());
    cab.extend(std::iter::repeat(0xDD).take(folder_reserve as usize));

    for file in &part.files {
        cab.extend_from_slice(&file.length.to_le_bytes());
        cab.extend_from_slice(&file.offset.to_le_bytes());
        cab.extend_from_slice(&file.folder.to_le_bytes());
        cab.extend_from_slice(&0x226cu16.to_le_bytes()); // 1997-03-12
        cab.extend_from_slice(&0x59bau16.to_le_bytes()); // 11:13:52
        cab.extend_from_slice(&0x20u16.to_le_bytes());
        cab.extend_from_slice(file.name.as_bytes());
        cab.push(0);
    }

    for block in &part.blocks {
        let csize = block.payload.len() as u16;
        let mut checksum =
            block_checksum(&block.payload, csize, block.uncompressed_size);
        if block.corrupt_checksum {
            checksum ^= 0xdead_beef;
        }
        cab.extend_from_slice(&checksum.to_le_bytes());
        cab.extend_from_slice(&csize.to_le_bytes());
        cab.extend_from_slice(&block.uncompressed_size.to_le_bytes());
        cab.extend(std::iter::repeat(0xCC).take(block_reserve as usize));
        cab.extend_from_slice(&block.payload);
    }
    cab
}

// ========================================================================= //
// The five-part set: hello.c and welcome.c complete in part 1, large.txt
// spans all five parts inside one split folder.

fn large_content() -> Vec<u8> {
    (0..500u32).map(|i| (i % 251) as u8).collect()
}

fn folder_content() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&[b'h'; 77]);
    data.extend_from_slice(&[b'w'; 74]);
    data.extend_from_slice(&large_content());
    data
}

/// Split points of the folder data over the five parts.
const PIECES: [usize; 5] = [200, 100, 150, 100, 101];

fn five_part_set() -> Vec<Vec<u8>> {
    let content = folder_content();
    let total = content.len() as u16;
    assert_eq!(content.len(), PIECES.iter().sum::<usize>());

    let mut parts = Vec::new();
    let mut consumed = 0;
    for (index, &piece) in PIECES.iter().enumerate() {
        let payload = content[consumed..consumed + piece].to_vec();
        consumed += piece;
        let last = index == PIECES.len() - 1;
        let files = if index == 0 {
            vec![
                TestFile { name: "hello.c", offset: 0, length: 77, folder: 0 },
                TestFile {
                    name: "welcome.c",
                    offset: 77,
                    length: 74,
                    folder: 0,
                },
                TestFile {
                    name: "large.txt",
                    offset: 151,
                    length: 500,
                    folder: CONTINUED_TO_NEXT,
                },
            ]
        } else {
            vec![TestFile {
                name: "large.txt",
                offset: 151,
                length: 500,
                folder: if last {
                    CONTINUED_FROM_PREV
                } else {
                    CONTINUED_PREV_AND_NEXT
                },
            }]
        };
        parts.push(build_part(&TestPart {
            set_id: 0x0ace,
            set_index: index as u16,
            comp_bits: 0,
            prev: (index > 0).then_some(("prev.cab", "disk")),
            next: (!last).then_some(("next.cab", "disk")),
            reserve: None,
            files,
            blocks: vec![TestBlock {
                payload,
                uncompressed_size: if last { total } else { 0 },
                corrupt_checksum: false,
            }],
        }));
    }
    parts
}

fn decompressor_with_parts(
    parts: &[Vec<u8>],
) -> CabDecompressor<MemSystem> {
    let sys = MemSystem::new();
    for (index, part) in parts.iter().enumerate() {
        sys.insert(&format!("pt{}.cab", index + 1), part.clone());
    }
    CabDecompressor::with_system(sys)
}

fn extract_named(
    cabd: &mut CabDecompressor<MemSystem>,
    cab: &mscab::Cabinet,
    name: &str,
) -> mscab::Result<Vec<u8>> {
    let file = cab.get_file_entry(name).expect("file not in cabinet");
    cabd.extract(cab, file, "out.bin")?;
    Ok(cabd.system().contents("out.bin").unwrap())
}

// ========================================================================= //

#[test]
fn merge_five_parts_in_order() {
    let parts = five_part_set();
    let mut cabd = decompressor_with_parts(&parts);
    let mut cab = cabd.open("pt1.cab").unwrap();
    for index in 2..=5 {
        let next = cabd.open(&format!("pt{}.cab", index)).unwrap();
        cabd.append(&mut cab, next).unwrap();
    }
    assert_eq!(cab.file_entries().len(), 3);
    assert_eq!(cab.folder_entries().len(), 1);
    assert_eq!(cab.parts().len(), 5);
    let folder = cab.folder_entries().next().unwrap();
    assert_eq!(folder.num_data_blocks(), 1);
    assert!(!folder.is_continued_from_prev());

    assert_eq!(extract_named(&mut cabd, &cab, "hello.c").unwrap(), vec![b'h'; 77]);
    assert_eq!(extract_named(&mut cabd, &cab, "welcome.c").unwrap(), vec![b'w'; 74]);
    assert_eq!(extract_named(&mut cabd, &cab, "large.txt").unwrap(), large_content());
}

#[test]
fn merge_five_parts_haphazardly() {
    // Same ordering dance as the classic five-part merge test: 1+2, then
    // prepend (1,2) to 3, then 4+5, then prepend (1,2,3) to (4,5).
    let parts = five_part_set();
    let mut cabd = decompressor_with_parts(&parts);
    let mut cab1 = cabd.open("pt1.cab").unwrap();
    let cab2 = cabd.open("pt2.cab").unwrap();
    let mut cab3 = cabd.open("pt3.cab").unwrap();
    let mut cab4 = cabd.open("pt4.cab").unwrap();
    let cab5 = cabd.open("pt5.cab").unwrap();

    cabd.append(&mut cab1, cab2).unwrap();
    cabd.prepend(&mut cab3, cab1).unwrap();
    cabd.append(&mut cab4, cab5).unwrap();
    cabd.prepend(&mut cab4, cab3).unwrap();

    assert_eq!(cab4.file_entries().len(), 3);
    assert_eq!(cab4.folder_entries().len(), 1);
    assert_eq!(cab4.parts().len(), 5);

    let names: Vec<&str> =
        cab4.file_entries().map(|file| file.name()).collect();
    assert_eq!(names, ["hello.c", "welcome.c", "large.txt"]);
    assert_eq!(extract_named(&mut cabd, &cab4, "large.txt").unwrap(), large_content());
}

#[test]
fn append_and_prepend_agree() {
    let parts = five_part_set();

    let mut cabd = decompressor_with_parts(&parts);
    let mut appended = cabd.open("pt1.cab").unwrap();
    let part2 = cabd.open("pt2.cab").unwrap();
    cabd.append(&mut appended, part2).unwrap();
    let by_append: Vec<String> = appended
        .file_entries()
        .map(|file| format!("{}@{}", file.name(), file.uncompressed_offset()))
        .collect();

    let mut cabd = decompressor_with_parts(&parts);
    let mut prepended = cabd.open("pt2.cab").unwrap();
    let part1 = cabd.open("pt1.cab").unwrap();
    cabd.prepend(&mut prepended, part1).unwrap();
    let by_prepend: Vec<String> = prepended
        .file_entries()
        .map(|file| format!("{}@{}", file.name(), file.uncompressed_offset()))
        .collect();

    assert_eq!(by_append, by_prepend);
}

#[test]
fn one_sided_merge_is_refused_and_returns_the_cabinet() {
    let parts = five_part_set();
    let mut cabd = decompressor_with_parts(&parts);
    // Joining part 2 after part 5 is backwards: part 5's folder does not
    // continue anywhere, but part 2's continues from somewhere.
    let mut cab5 = cabd.open("pt5.cab").unwrap();
    let cab2 = cabd.open("pt2.cab").unwrap();
    let merge_error = cabd.append(&mut cab5, cab2).unwrap_err();
    assert_eq!(merge_error.error.kind(), ErrorKind::DataFormat);
    assert_eq!(cabd.last_error(), ErrorKind::DataFormat);
    // Both cabinets survive the refusal.
    assert_eq!(cab5.file_entries().len(), 1);
    assert_eq!(merge_error.cabinet.file_entries().len(), 1);
}

#[test]
fn mismatched_offsets_are_refused() {
    let mut parts = five_part_set();
    // Rebuild part 2 with a lying continuation offset.
    parts[1] = build_part(&TestPart {
        set_id: 0x0ace,
        set_index: 1,
        comp_bits: 0,
        prev: Some(("prev.cab", "disk")),
        next: Some(("next.cab", "disk")),
        reserve: None,
        files: vec![TestFile {
            name: "large.txt",
            offset: 190, // should be 151
            length: 500,
            folder: CONTINUED_PREV_AND_NEXT,
        }],
        blocks: vec![TestBlock {
            payload: vec![0; PIECES[1]],
            uncompressed_size: 0,
            corrupt_checksum: false,
        }],
    });
    let mut cabd = decompressor_with_parts(&parts);
    let mut cab1 = cabd.open("pt1.cab").unwrap();
    let cab2 = cabd.open("pt2.cab").unwrap();
    let merge_error = cabd.append(&mut cab1, cab2).unwrap_err();
    assert_eq!(merge_error.error.kind(), ErrorKind::DataFormat);
}

#[test]
fn differing_set_ids_warn_but_merge() {
    let parts = five_part_set();
    let mut cabd = decompressor_with_parts(&parts);
    // Patch part 2's set ID.
    let mut bytes = parts[1].clone();
    bytes[32] = 0x99;
    bytes[33] = 0x99;
    cabd.system().insert("pt2.cab", bytes);

    let mut cab = cabd.open("pt1.cab").unwrap();
    let next = cabd.open("pt2.cab").unwrap();
    cabd.append(&mut cab, next).unwrap();
    assert!(cabd
        .system()
        .messages()
        .iter()
        .any(|message| message.contains("differing set IDs")));
}

#[test]
fn files_of_an_unjoined_continuation_cannot_be_extracted() {
    let parts = five_part_set();
    let mut cabd = decompressor_with_parts(&parts);
    let cab = cabd.open("pt3.cab").unwrap();
    let file = cab.get_file_entry("large.txt").unwrap();
    let error = cabd.extract(&cab, file, "out.bin").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DataFormat);
    assert_eq!(cabd.last_error(), ErrorKind::DataFormat);
}

#[test]
fn file_longer_than_the_folder_is_refused() {
    // A single-part cabinet whose only file claims more data than the
    // folder's blocks can hold.
    let part = build_part(&TestPart {
        set_id: 1,
        set_index: 0,
        comp_bits: 0,
        prev: None,
        next: None,
        reserve: None,
        files: vec![TestFile {
            name: "big.bin",
            offset: 0,
            length: 100_000,
            folder: 0,
        }],
        blocks: vec![TestBlock {
            payload: vec![0; 64],
            uncompressed_size: 64,
            corrupt_checksum: false,
        }],
    });
    let mut cabd = decompressor_with_parts(&[part]);
    let cab = cabd.open("pt1.cab").unwrap();
    let file = cab.get_file_entry("big.bin").unwrap();
    let error = cabd.extract(&cab, file, "out.bin").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DataFormat);
}

#[test]
fn reserve_fields_do_not_change_the_payload() {
    let content = b"reserved areas are opaque and skipped".to_vec();
    let bare = build_part(&TestPart {
        set_id: 7,
        set_index: 0,
        comp_bits: 0,
        prev: None,
        next: None,
        reserve: None,
        files: vec![TestFile {
            name: "data.bin",
            offset: 0,
            length: content.len() as u32,
            folder: 0,
        }],
        blocks: vec![TestBlock {
            payload: content.clone(),
            uncompressed_size: content.len() as u16,
            corrupt_checksum: false,
        }],
    });
    let reserved = build_part(&TestPart {
        set_id: 7,
        set_index: 0,
        comp_bits: 0,
        prev: None,
        next: None,
        reserve: Some((1000, 5, 3)),
        files: vec![TestFile {
            name: "data.bin",
            offset: 0,
            length: content.len() as u32,
            folder: 0,
        }],
        blocks: vec![TestBlock {
            payload: content.clone(),
            uncompressed_size: content.len() as u16,
            corrupt_checksum: false,
        }],
    });

    let mut cabd = decompressor_with_parts(&[bare, reserved]);
    let cab1 = cabd.open("pt1.cab").unwrap();
    let out1 = extract_named(&mut cabd, &cab1, "data.bin").unwrap();
    let cab2 = cabd.open("pt2.cab").unwrap();
    assert_eq!(cab2.parts()[0].reserve_data().len(), 1000);
    let out2 = extract_named(&mut cabd, &cab2, "data.bin").unwrap();
    assert_eq!(out1, content);
    assert_eq!(out2, content);
}

#[test]
fn checksum_mismatch_fails_and_fix_mode_does_not_cover_stored_folders() {
    let part = build_part(&TestPart {
        set_id: 1,
        set_index: 0,
        comp_bits: 0,
        prev: None,
        next: None,
        reserve: None,
        files: vec![TestFile {
            name: "data.bin",
            offset: 0,
            length: 8,
            folder: 0,
        }],
        blocks: vec![TestBlock {
            payload: b"12345678".to_vec(),
            uncompressed_size: 8,
            corrupt_checksum: true,
        }],
    });
    let mut cabd = decompressor_with_parts(&[part]);
    let cab = cabd.open("pt1.cab").unwrap();
    let file = cab.get_file_entry("data.bin").unwrap();
    let error = cabd.extract(&cab, file, "out.bin").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Checksum);

    // fix-mszip only forgives MSZIP folders; stored folders still fail.
    cabd.set_param(Parameter::FixMsZip, 1).unwrap();
    let file = cab.get_file_entry("data.bin").unwrap();
    let error = cabd.extract(&cab, file, "out.bin").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Checksum);
}

#[test]
fn stored_folder_with_many_blocks_of_random_data() {
    use rand::{RngCore, SeedableRng};

    let mut content = vec![0u8; 3 * 32768 + 1234];
    rand::rngs::SmallRng::seed_from_u64(0x5eed).fill_bytes(&mut content);
    let blocks = content
        .chunks(32768)
        .map(|chunk| TestBlock {
            payload: chunk.to_vec(),
            uncompressed_size: chunk.len() as u16,
            corrupt_checksum: false,
        })
        .collect::<Vec<TestBlock>>();
    let part = build_part(&TestPart {
        set_id: 3,
        set_index: 0,
        comp_bits: 0,
        prev: None,
        next: None,
        reserve: None,
        files: vec![TestFile {
            name: "noise.bin",
            offset: 0,
            length: content.len() as u32,
            folder: 0,
        }],
        blocks,
    });
    let mut cabd = decompressor_with_parts(&[part]);
    let cab = cabd.open("pt1.cab").unwrap();
    assert_eq!(cab.folder_entries().next().unwrap().num_data_blocks(), 4);
    assert_eq!(extract_named(&mut cabd, &cab, "noise.bin").unwrap(), content);
}

#[test]
fn extraction_through_the_disk_backend() {
    let parts = five_part_set();
    let dir = tempfile::tempdir().unwrap();
    let mut names = Vec::new();
    for (index, part) in parts.iter().enumerate() {
        let path = dir.path().join(format!("pt{}.cab", index + 1));
        std::fs::write(&path, part).unwrap();
        names.push(path.to_string_lossy().into_owned());
    }

    let mut cabd = CabDecompressor::new();
    let mut cab = cabd.open(&names[0]).unwrap();
    for name in &names[1..] {
        let next = cabd.open(name).unwrap();
        cabd.append(&mut cab, next).unwrap();
    }
    let out_path = dir.path().join("large.txt");
    let file = cab.get_file_entry("large.txt").unwrap();
    cabd.extract(&cab, file, &out_path.to_string_lossy()).unwrap();
    assert_eq!(std::fs::read(&out_path).unwrap(), large_content());
}

#[test]
fn fix_mode_forgives_mszip_checksums() {
    // A stored-DEFLATE MSZIP block whose cabinet checksum field lies.
    let mut payload = Vec::from(&b"CK"[..]);
    payload.push(0x01);
    payload.extend_from_slice(&5u16.to_le_bytes());
    payload.extend_from_slice(&(!5u16).to_le_bytes());
    payload.extend_from_slice(b"fixed");
    let part = build_part(&TestPart {
        set_id: 1,
        set_index: 0,
        comp_bits: 1, // MSZIP
        prev: None,
        next: None,
        reserve: None,
        files: vec![TestFile {
            name: "data.bin",
            offset: 0,
            length: 5,
            folder: 0,
        }],
        blocks: vec![TestBlock {
            payload,
            uncompressed_size: 5,
            corrupt_checksum: true,
        }],
    });
    let mut cabd = decompressor_with_parts(&[part]);
    let cab = cabd.open("pt1.cab").unwrap();
    let file = cab.get_file_entry("data.bin").unwrap();
    let error = cabd.extract(&cab, file, "out.bin").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Checksum);

    cabd.set_param(Parameter::FixMsZip, 1).unwrap();
    let file = cab.get_file_entry("data.bin").unwrap();
    cabd.extract(&cab, file, "out.bin").unwrap();
    assert_eq!(cabd.system().contents("out.bin").unwrap(), b"fixed");
    assert!(cabd
        .system()
        .messages()
        .iter()
        .any(|message| message.contains("bad block checksum")));
}
