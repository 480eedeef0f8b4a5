//! The MSZIP decoder: one RFC 1951 DEFLATE stream per 32 KiB data block,
//! each prefixed with a two-byte `CK` signature.  The 32 KiB history
//! window carries over from block to block within a folder, so matches in
//! one block may reach back into the previous block's output.

use crate::bitstream::MszipBitstream;
use crate::consts::CAB_BLOCKMAX;
use crate::error::Result;
use crate::huffman::HuffmanTable;

const MSZIP_SIGNATURE: [u8; 2] = [b'C', b'K'];

const LITERAL_TABLE_BITS: u32 = 9;
const DISTANCE_TABLE_BITS: u32 = 6;
const PRECODE_TABLE_BITS: u32 = 7;

/// Order in which the code-length-code lengths are stored.
const PRECODE_ORDER: [usize; 19] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

/// Base match length and extra bits for length codes 257-285.
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59,
    67, 83, 99, 115, 131, 163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4,
    5, 5, 5, 5, 0,
];

/// Base distance and extra bits for distance codes 0-29.
const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385,
    513, 769, 1025, 1537, 2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DISTANCE_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10,
    10, 11, 11, 12, 12, 13, 13,
];

pub(crate) struct MszipDecompressor {
    /// Up to 32 KiB of decoded history from previous blocks.
    dictionary: Vec<u8>,
}

impl MszipDecompressor {
    pub fn new() -> MszipDecompressor {
        MszipDecompressor { dictionary: Vec::with_capacity(CAB_BLOCKMAX) }
    }

    /// Forget all history; used on rewind and after a fix-mode recovery.
    pub fn reset(&mut self) {
        self.dictionary.clear();
    }

    /// Decode one framed block of `out_len` bytes into `out`.  On failure
    /// `out` keeps whatever was decoded before the error, so the caller's
    /// fix-mode can pad and continue.
    pub fn decompress_block(
        &mut self,
        data: &[u8],
        out_len: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if data.len() < 2 || data[..2] != MSZIP_SIGNATURE {
            decrunch!("MSZIP block signature missing");
        }
        let mut bits = MszipBitstream::new(&data[2..]);
        self.inflate(&mut bits, out_len, out)?;
        if out.len() != out_len {
            decrunch!(
                "MSZIP block inflated to {} bytes, expected {}",
                out.len(),
                out_len
            );
        }
        self.push_history(out);
        Ok(())
    }

    fn inflate(
        &mut self,
        bits: &mut MszipBitstream<'_>,
        out_len: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        loop {
            let last_block = bits.read_bit();
            match bits.read_bits(2) {
                0 => self.inflate_stored(bits, out)?,
                1 => {
                    let (literals, distances) = fixed_trees()?;
                    self.inflate_huffman(bits, &literals, &distances, out)?;
                }
                2 => {
                    let (literals, distances) = dynamic_trees(bits)?;
                    self.inflate_huffman(bits, &literals, &distances, out)?;
                }
                _ => decrunch!("reserved DEFLATE block type"),
            }
            if out.len() > out_len {
                decrunch!("DEFLATE stream overruns the block size");
            }
            if last_block == 1 {
                return Ok(());
            }
        }
    }

    fn inflate_stored(
        &mut self,
        bits: &mut MszipBitstream<'_>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        bits.align_byte();
        let len = bits.read_bits(16) as u16;
        let nlen = bits.read_bits(16) as u16;
        if len != !nlen {
            decrunch!("stored block length check failed");
        }
        let start = out.len();
        out.resize(start + len as usize, 0);
        bits.read_bytes(&mut out[start..])?;
        Ok(())
    }

    fn inflate_huffman(
        &mut self,
        bits: &mut MszipBitstream<'_>,
        literals: &HuffmanTable,
        distances: &HuffmanTable,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        loop {
            let code = literals.decode_lsb(bits)?;
            if code < 256 {
                if out.len() >= CAB_BLOCKMAX {
                    decrunch!("DEFLATE stream overruns the block size");
                }
                out.push(code as u8);
            } else if code == 256 {
                return Ok(());
            } else if code <= 285 {
                let index = (code - 257) as usize;
                let length = LENGTH_BASE[index] as usize
                    + bits.read_bits(LENGTH_EXTRA[index] as u32) as usize;
                let dist_code = distances.decode_lsb(bits)? as usize;
                if dist_code >= 30 {
                    decrunch!("invalid DEFLATE distance code {}", dist_code);
                }
                let distance = DISTANCE_BASE[dist_code] as usize
                    + bits.read_bits(DISTANCE_EXTRA[dist_code] as u32)
                        as usize;
                self.copy_match(out, distance, length)?;
            } else {
                decrunch!("invalid DEFLATE literal/length code {}", code);
            }
        }
    }

    fn copy_match(
        &self,
        out: &mut Vec<u8>,
        distance: usize,
        length: usize,
    ) -> Result<()> {
        if distance > out.len() + self.dictionary.len() {
            decrunch!("DEFLATE match reaches before the start of history");
        }
        if out.len() + length > CAB_BLOCKMAX {
            decrunch!("DEFLATE stream overruns the block size");
        }
        for _ in 0..length {
            let byte = if distance <= out.len() {
                out[out.len() - distance]
            } else {
                self.dictionary[self.dictionary.len() - (distance - out.len())]
            };
            out.push(byte);
        }
        Ok(())
    }

    fn push_history(&mut self, block: &[u8]) {
        if block.len() >= CAB_BLOCKMAX {
            self.dictionary.clear();
            self.dictionary.extend_from_slice(
                &block[block.len() - CAB_BLOCKMAX..],
            );
        } else {
            let total = self.dictionary.len() + block.len();
            if total > CAB_BLOCKMAX {
                self.dictionary.drain(..total - CAB_BLOCKMAX);
            }
            self.dictionary.extend_from_slice(block);
        }
    }
}

fn fixed_trees() -> Result<(HuffmanTable, HuffmanTable)> {
    let mut lit_lens = [0u8; 288];
    for (sym, len) in lit_lens.iter_mut().enumerate() {
        *len = match sym {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    let literals = HuffmanTable::new_lsb(&lit_lens, LITERAL_TABLE_BITS)?;
    // The fixed distance "tree" is 5-bit indices; codes 30 and 31 exist in
    // the code space but are invalid if decoded.
    let distances = HuffmanTable::new_lsb(&[5u8; 32], DISTANCE_TABLE_BITS)?;
    Ok((literals, distances))
}

fn dynamic_trees(
    bits: &mut MszipBitstream<'_>,
) -> Result<(HuffmanTable, HuffmanTable)> {
    let hlit = bits.read_bits(5) as usize + 257;
    let hdist = bits.read_bits(5) as usize + 1;
    let hclen = bits.read_bits(4) as usize + 4;

    let mut precode_lens = [0u8; 19];
    for i in 0..hclen {
        precode_lens[PRECODE_ORDER[i]] = bits.read_bits(3) as u8;
    }
    let precode = HuffmanTable::new_lsb(&precode_lens, PRECODE_TABLE_BITS)?;

    let mut lens = vec![0u8; hlit + hdist];
    let mut i = 0;
    while i < lens.len() {
        match precode.decode_lsb(bits)? {
            code @ 0..=15 => {
                lens[i] = code as u8;
                i += 1;
            }
            16 => {
                if i == 0 {
                    decrunch!("code-length repeat with no previous length");
                }
                let repeat = bits.read_bits(2) as usize + 3;
                if i + repeat > lens.len() {
                    decrunch!("code-length run overflows the tables");
                }
                let previous = lens[i - 1];
                lens[i..i + repeat].fill(previous);
                i += repeat;
            }
            17 => {
                let repeat = bits.read_bits(3) as usize + 3;
                if i + repeat > lens.len() {
                    decrunch!("code-length run overflows the tables");
                }
                i += repeat;
            }
            18 => {
                let repeat = bits.read_bits(7) as usize + 11;
                if i + repeat > lens.len() {
                    decrunch!("code-length run overflows the tables");
                }
                i += repeat;
            }
            code => decrunch!("invalid code-length code {}", code),
        }
    }

    let literals = HuffmanTable::new_lsb(&lens[..hlit], LITERAL_TABLE_BITS)?;
    let distances =
        HuffmanTable::new_lsb(&lens[hlit..], DISTANCE_TABLE_BITS)?;
    Ok((literals, distances))
}
