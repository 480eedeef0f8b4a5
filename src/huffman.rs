//! Canonical Huffman decoding tables shared by the MSZIP and LZX decoders.
//!
//! A table pairs a direct-lookup array for codes of at most `table_bits`
//! bits with a bit-at-a-time canonical walk for the longer ones.  The
//! builder rejects length sets that do not form a complete code, with one
//! exception: a tree with no used symbols at all is accepted and returned
//! as an empty sentinel, because LZX legitimately writes an empty length
//! tree for folders that contain no long matches.

use crate::bitstream::{LzxBitstream, MszipBitstream};
use crate::error::Result;

pub(crate) const MAX_CODE_LENGTH: usize = 16;

const FAST_NONE: u16 = u16::MAX;

pub(crate) struct HuffmanTable {
    table_bits: u32,
    /// Direct map from the next `table_bits` input bits to a symbol, or
    /// `FAST_NONE` where the code is longer than `table_bits`.
    fast: Vec<u16>,
    /// Code length per symbol (0 = unused).
    lens: Vec<u8>,
    /// Number of codes of each length.
    counts: [u16; MAX_CODE_LENGTH + 1],
    /// Symbols in canonical order.
    symbols: Vec<u16>,
    empty: bool,
}

impl HuffmanTable {
    /// Build a table decoded MSB-first (LZX).
    pub fn new_msb(lengths: &[u8], table_bits: u32) -> Result<HuffmanTable> {
        HuffmanTable::build(lengths, table_bits, true)
    }

    /// Build a table decoded from an LSB-first stream (DEFLATE).
    pub fn new_lsb(lengths: &[u8], table_bits: u32) -> Result<HuffmanTable> {
        HuffmanTable::build(lengths, table_bits, false)
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    fn build(lengths: &[u8], table_bits: u32, msb: bool) -> Result<HuffmanTable> {
        debug_assert!(table_bits >= 1 && table_bits <= MAX_CODE_LENGTH as u32);
        let mut counts = [0u16; MAX_CODE_LENGTH + 1];
        for &len in lengths {
            if len as usize > MAX_CODE_LENGTH {
                decrunch!("Huffman code length {} out of range", len);
            }
            counts[len as usize] += 1;
        }
        if counts[0] as usize == lengths.len() {
            return Ok(HuffmanTable {
                table_bits,
                fast: Vec::new(),
                lens: lengths.to_vec(),
                counts,
                symbols: Vec::new(),
                empty: true,
            });
        }

        // A complete code uses up exactly all the code space.
        let mut space = 1i32;
        for len in 1..=MAX_CODE_LENGTH {
            space <<= 1;
            space -= counts[len] as i32;
            if space < 0 {
                decrunch!("over-subscribed Huffman code");
            }
        }
        if space != 0 {
            decrunch!("incomplete Huffman code");
        }

        // Symbols in canonical order, and each symbol's code.  Length 0
        // means "unused" and contributes nothing to the code space.
        let mut next_code = [0u32; MAX_CODE_LENGTH + 1];
        let mut code = 0u32;
        for len in 1..=MAX_CODE_LENGTH {
            let shorter = if len == 1 { 0 } else { counts[len - 1] as u32 };
            code = (code + shorter) << 1;
            next_code[len] = code;
        }
        let mut symbols = Vec::with_capacity(lengths.len());
        for len in 1..=MAX_CODE_LENGTH {
            for (sym, &l) in lengths.iter().enumerate() {
                if l as usize == len {
                    symbols.push(sym as u16);
                }
            }
        }

        let mut fast = vec![FAST_NONE; 1 << table_bits];
        for &sym in &symbols {
            let len = lengths[sym as usize] as u32;
            let code = next_code[len as usize];
            next_code[len as usize] += 1;
            if len > table_bits {
                continue;
            }
            if msb {
                let lo = (code << (table_bits - len)) as usize;
                let hi = ((code + 1) << (table_bits - len)) as usize;
                for entry in &mut fast[lo..hi] {
                    *entry = sym;
                }
            } else {
                // DEFLATE serves code bits most-significant-first out of an
                // LSB-first stream, so the lookup index is bit-reversed.
                let mut index = reverse_bits(code, len) as usize;
                while index < fast.len() {
                    fast[index] = sym;
                    index += 1 << len;
                }
            }
        }

        Ok(HuffmanTable {
            table_bits,
            fast,
            lens: lengths.to_vec(),
            counts,
            symbols,
            empty: false,
        })
    }

    /// Decode one symbol from an MSB-first LZX stream.
    pub fn decode_msb(&self, bits: &mut LzxBitstream<'_>) -> Result<u16> {
        if self.empty {
            decrunch!("symbol requested from an empty Huffman tree");
        }
        let peeked = bits.peek(self.table_bits) as usize;
        let sym = self.fast[peeked];
        if sym != FAST_NONE {
            bits.consume(self.lens[sym as usize] as u32);
            return Ok(sym);
        }
        let mut next_bit = || -> Result<u32> { Ok(bits.read_bit()) };
        self.decode_slow(&mut next_bit)
    }

    /// Decode one symbol from an LSB-first DEFLATE stream.
    pub fn decode_lsb(&self, bits: &mut MszipBitstream<'_>) -> Result<u16> {
        if self.empty {
            decrunch!("symbol requested from an empty Huffman tree");
        }
        let peeked = bits.peek(self.table_bits) as usize;
        let sym = self.fast[peeked];
        if sym != FAST_NONE {
            bits.consume(self.lens[sym as usize] as u32);
            return Ok(sym);
        }
        let mut next_bit = || -> Result<u32> { Ok(bits.read_bit()) };
        self.decode_slow(&mut next_bit)
    }

    /// Canonical bit-at-a-time walk; bits arrive in code order for both
    /// stream flavours.
    fn decode_slow(
        &self,
        read_bit: &mut dyn FnMut() -> Result<u32>,
    ) -> Result<u16> {
        let mut code = 0u32;
        let mut first = 0u32;
        let mut index = 0usize;
        for len in 1..=MAX_CODE_LENGTH {
            code = (code << 1) | read_bit()?;
            let count = self.counts[len] as u32;
            if code.wrapping_sub(first) < count {
                return Ok(self.symbols[index + (code - first) as usize]);
            }
            index += count as usize;
            first = (first + count) << 1;
        }
        decrunch!("invalid Huffman code in stream");
    }
}

fn reverse_bits(code: u32, len: u32) -> u32 {
    let mut code = code;
    let mut out = 0;
    for _ in 0..len {
        out = (out << 1) | (code & 1);
        code >>= 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::HuffmanTable;
    use crate::bitstream::{LzxBitstream, MszipBitstream};

    #[test]
    fn empty_tree_is_a_sentinel() {
        let table = HuffmanTable::new_msb(&[0u8; 8], 3).unwrap();
        assert!(table.is_empty());
        let mut bits = LzxBitstream::new(&[0, 0]);
        assert!(table.decode_msb(&mut bits).is_err());
    }

    #[test]
    fn incomplete_tree_is_rejected() {
        // One symbol of length 1 leaves half the code space unused.
        assert!(HuffmanTable::new_msb(&[1, 0, 0], 3).is_err());
        // Four symbols of length 1 overflow it.
        assert!(HuffmanTable::new_msb(&[1, 1, 1, 1], 3).is_err());
    }

    #[test]
    fn decode_msb_short_and_long_codes() {
        // Canonical codes: a=0, b=10, c=110, d=111.
        let table = HuffmanTable::new_msb(&[1, 2, 3, 3], 2).unwrap();
        // Stream (MSB-first): 0 10 110 111 0, as one LE 16-bit word:
        // 0101_1011_1000_0000.
        let word = 0b0101_1011_1000_0000u16.to_le_bytes();
        let mut bits = LzxBitstream::new(&word);
        assert_eq!(table.decode_msb(&mut bits).unwrap(), 0);
        assert_eq!(table.decode_msb(&mut bits).unwrap(), 1);
        assert_eq!(table.decode_msb(&mut bits).unwrap(), 2);
        assert_eq!(table.decode_msb(&mut bits).unwrap(), 3);
        assert_eq!(table.decode_msb(&mut bits).unwrap(), 0);
    }

    #[test]
    fn decode_lsb_matches_deflate_packing() {
        // Same alphabet; DEFLATE packs each code MSB-first into an
        // LSB-first byte stream: 0, 10, 110, 111, 0 -> bits
        // 0,1,0,1,1,0,1,1,1,0 from the low end up.
        let data = [0b1101_1010u8, 0b0000_0001];
        let table = HuffmanTable::new_lsb(&[1, 2, 3, 3], 2).unwrap();
        let mut bits = MszipBitstream::new(&data);
        assert_eq!(table.decode_lsb(&mut bits).unwrap(), 0);
        assert_eq!(table.decode_lsb(&mut bits).unwrap(), 1);
        assert_eq!(table.decode_lsb(&mut bits).unwrap(), 2);
        assert_eq!(table.decode_lsb(&mut bits).unwrap(), 3);
        assert_eq!(table.decode_lsb(&mut bits).unwrap(), 0);
    }
}
