//! The Quantum decoder: LZ77 over a 2^10..2^21 byte window, driven by an
//! arithmetic coder with adaptive frequency models.
//!
//! The framing layer hands us one data block at a time.  The window and
//! the models persist across blocks; the coder interval (H, L, C) restarts
//! at each block boundary, which is what the encoder's per-frame flush
//! (and the framing layer's trailing `0xFF` byte) exists for.  A match may
//! straddle the 32 KiB frame boundary, in which case the overhanging bytes
//! are replayed at the start of the next block.

use crate::bitstream::QuantumBitstream;
use crate::error::Result;

/// Base offsets for the 42 position slots.
const POSITION_BASE: [u32; 42] = [
    0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384,
    512, 768, 1024, 1536, 2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576,
    32768, 49152, 65536, 98304, 131072, 196608, 262144, 393216, 524288,
    786432, 1048576, 1572864,
];
/// Extra bits per position slot.
const EXTRA_BITS: [u8; 42] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10,
    10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18, 19,
    19,
];

/// Length slots for selector 6 matches.
const LENGTH_BASE: [u16; 27] = [
    0, 1, 2, 3, 4, 5, 6, 8, 10, 12, 14, 18, 22, 26, 30, 38, 46, 54, 62, 78,
    94, 110, 126, 158, 190, 222, 254,
];
const LENGTH_EXTRA: [u8; 27] = [
    0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5,
    5, 5, 0,
];

#[derive(Clone, Copy)]
struct ModelSym {
    sym: u16,
    cumfreq: u16,
}

/// One adaptive frequency model.  `syms[i].cumfreq` is the total frequency
/// of symbols at positions `i..`, so `syms[0].cumfreq` is the grand total
/// and the final entry is a zero sentinel.
struct Model {
    /// Rescales remaining until the next re-sort of the symbol table.
    shifts_left: u8,
    entries: usize,
    syms: Vec<ModelSym>,
}

impl Model {
    fn new(start: u16, len: usize) -> Model {
        let syms = (0..=len)
            .map(|i| ModelSym {
                sym: start + i as u16,
                cumfreq: (len - i) as u16,
            })
            .collect();
        Model { shifts_left: 4, entries: len, syms }
    }

    /// Halve the frequencies; every fiftieth rescale, convert to
    /// individual frequencies, sort descending and rebuild.
    fn rescale(&mut self) {
        self.shifts_left -= 1;
        if self.shifts_left > 0 {
            for i in (0..self.entries).rev() {
                // -1, not -2; also makes sure the cumfreqs stay decreasing.
                self.syms[i].cumfreq >>= 1;
                if self.syms[i].cumfreq <= self.syms[i + 1].cumfreq {
                    self.syms[i].cumfreq = self.syms[i + 1].cumfreq + 1;
                }
            }
        } else {
            self.shifts_left = 50;
            for i in 0..self.entries {
                // Revert to individual frequencies, plus one so no symbol
                // ends up with a zero frequency, then halve.
                self.syms[i].cumfreq -= self.syms[i + 1].cumfreq;
                self.syms[i].cumfreq += 1;
                self.syms[i].cumfreq >>= 1;
            }
            // Stable selection sort, most frequent first.
            for i in 0..self.entries.saturating_sub(1) {
                for j in i + 1..self.entries {
                    if self.syms[i].cumfreq < self.syms[j].cumfreq {
                        self.syms.swap(i, j);
                    }
                }
            }
            for i in (0..self.entries).rev() {
                self.syms[i].cumfreq += self.syms[i + 1].cumfreq;
            }
        }
    }
}

/// The arithmetic-coder interval registers.
struct Coder {
    high: u16,
    low: u16,
    current: u16,
}

impl Coder {
    fn init(bits: &mut QuantumBitstream<'_>) -> Coder {
        Coder { high: 0xffff, low: 0, current: bits.read_bits(16) as u16 }
    }

    /// Decode one symbol from `model`, update the model, renormalise.
    fn symbol(
        &mut self,
        model: &mut Model,
        bits: &mut QuantumBitstream<'_>,
    ) -> Result<u16> {
        let total = model.syms[0].cumfreq as u32;
        if total == 0 {
            decrunch!("Quantum model has no frequency left");
        }
        let range =
            ((self.high.wrapping_sub(self.low)) as u32 & 0xffff) + 1;
        let symf = (((self.current.wrapping_sub(self.low) as u32 + 1)
            * total
            - 1)
            / range)
            & 0xffff;

        let mut i = 1;
        while i < model.entries {
            if (model.syms[i].cumfreq as u32) <= symf {
                break;
            }
            i += 1;
        }
        let sym = model.syms[i - 1].sym;

        // Narrow the interval to the chosen symbol's frequency band.
        let low32 = self.low as u32;
        let range = (self.high.wrapping_sub(self.low) as u32 & 0xffff) + 1;
        self.high = (low32
            + model.syms[i - 1].cumfreq as u32 * range / total
            - 1) as u16;
        self.low = (low32 + model.syms[i].cumfreq as u32 * range / total)
            as u16;

        // Update the model: the chosen symbol gains weight 8.
        for j in (0..i).rev() {
            model.syms[j].cumfreq += 8;
        }
        if model.syms[0].cumfreq > 3800 {
            model.rescale();
        }

        loop {
            if (self.low & 0x8000) != (self.high & 0x8000) {
                if (self.low & 0x4000) != 0 && (self.high & 0x4000) == 0 {
                    // Underflow: grow the interval around the midpoint.
                    self.current ^= 0x4000;
                    self.low &= 0x3fff;
                    self.high |= 0x4000;
                } else {
                    break;
                }
            }
            self.low = self.low.wrapping_shl(1);
            self.high = self.high.wrapping_shl(1) | 1;
            self.current =
                self.current.wrapping_shl(1) | bits.read_bit() as u16;
        }
        Ok(sym)
    }
}

pub(crate) struct QuantumDecompressor {
    window: Vec<u8>,
    window_posn: usize,
    selector: Model,
    literals: [Model; 4],
    match3: Model,
    match4: Model,
    match_pos: Model,
    match_len: Model,
    /// Bytes decoded past the previous block's frame boundary.
    overflow: Vec<u8>,
}

impl QuantumDecompressor {
    pub fn new(window_bits: u16) -> QuantumDecompressor {
        debug_assert!((10..=21).contains(&window_bits));
        let slots = window_bits as usize * 2;
        QuantumDecompressor {
            window: vec![0; 1 << window_bits],
            window_posn: 0,
            selector: Model::new(0, 7),
            literals: [
                Model::new(0x00, 64),
                Model::new(0x40, 64),
                Model::new(0x80, 64),
                Model::new(0xc0, 64),
            ],
            match3: Model::new(0, slots.min(24)),
            match4: Model::new(0, slots.min(36)),
            match_pos: Model::new(0, slots),
            match_len: Model::new(0, 27),
            overflow: Vec::new(),
        }
    }

    /// Decode one framed block of `out_len` bytes into `out`.  `data` must
    /// include the framing layer's trailing `0xFF` byte.
    pub fn decompress_block(
        &mut self,
        data: &[u8],
        out_len: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        // Bytes already decoded by a match that straddled the previous
        // frame boundary.
        out.append(&mut self.overflow);

        let mask = self.window.len() - 1;
        let mut bits = QuantumBitstream::new(data);
        let mut coder = Coder::init(&mut bits);

        while out.len() < out_len {
            let selector = coder.symbol(&mut self.selector, &mut bits)?;
            if selector < 4 {
                let model = &mut self.literals[selector as usize];
                let byte = coder.symbol(model, &mut bits)? as u8;
                self.window[self.window_posn] = byte;
                self.window_posn = (self.window_posn + 1) & mask;
                out.push(byte);
                continue;
            }

            let (offset, length) = match selector {
                4 => {
                    let slot =
                        coder.symbol(&mut self.match3, &mut bits)? as usize;
                    let extra =
                        bits.read_many_bits(EXTRA_BITS[slot] as u32);
                    ((POSITION_BASE[slot] + extra) as usize + 1, 3)
                }
                5 => {
                    let slot =
                        coder.symbol(&mut self.match4, &mut bits)? as usize;
                    let extra =
                        bits.read_many_bits(EXTRA_BITS[slot] as u32);
                    ((POSITION_BASE[slot] + extra) as usize + 1, 4)
                }
                6 => {
                    let len_slot = coder
                        .symbol(&mut self.match_len, &mut bits)?
                        as usize;
                    let length = LENGTH_BASE[len_slot] as usize
                        + bits.read_many_bits(LENGTH_EXTRA[len_slot] as u32)
                            as usize
                        + 5;
                    let slot = coder.symbol(&mut self.match_pos, &mut bits)?
                        as usize;
                    let extra =
                        bits.read_many_bits(EXTRA_BITS[slot] as u32);
                    ((POSITION_BASE[slot] + extra) as usize + 1, length)
                }
                _ => decrunch!("invalid Quantum selector {}", selector),
            };

            if offset > self.window.len() {
                decrunch!("Quantum match offset exceeds the window");
            }
            let mut src = (self.window_posn + self.window.len() - offset)
                & mask;
            // Matches may overshoot the frame boundary; the excess is
            // carried into the next block below.
            for _ in 0..length {
                let byte = self.window[src];
                self.window[self.window_posn] = byte;
                out.push(byte);
                src = (src + 1) & mask;
                self.window_posn = (self.window_posn + 1) & mask;
            }
        }

        if out.len() > out_len {
            self.overflow = out.split_off(out_len);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Coder, Model, QuantumDecompressor};
    use crate::bitstream::QuantumBitstream;

    #[test]
    fn model_update_keeps_cumfreqs_decreasing() {
        let mut model = Model::new(0, 7);
        assert_eq!(model.syms[0].cumfreq, 7);
        assert_eq!(model.syms[7].cumfreq, 0);
        // Hammer one symbol until several rescales have happened.
        for _ in 0..4000 {
            for j in (0..3).rev() {
                model.syms[j].cumfreq += 8;
            }
            if model.syms[0].cumfreq > 3800 {
                model.rescale();
            }
        }
        for i in 0..model.entries {
            assert!(model.syms[i].cumfreq > model.syms[i + 1].cumfreq);
        }
    }

    #[test]
    fn rescale_resorts_by_frequency() {
        let mut model = Model::new(0, 4);
        // Make symbol 2 (at position 2) by far the most frequent, then
        // force the sorting rescale.
        model.shifts_left = 1;
        for j in (0..3).rev() {
            model.syms[j].cumfreq += 3900;
        }
        model.rescale();
        assert_eq!(model.syms[0].sym, 2);
    }

    #[test]
    fn first_symbol_of_an_all_zero_stream() {
        // With a fresh 7-entry selector model (cumfreqs 7..0) and C=0,
        // symf = (1*7-1)/65536 = 0, which falls in the last band, so the
        // decoded symbol is 6.
        let data = [0u8; 8];
        let mut bits = QuantumBitstream::new(&data);
        let mut coder = Coder::init(&mut bits);
        let mut model = Model::new(0, 7);
        let sym = coder.symbol(&mut model, &mut bits).unwrap();
        assert_eq!(sym, 6);
        // Symbol 6 sits at position 6; everything before it gained 8.
        assert_eq!(model.syms[0].cumfreq, 7 + 8);
        assert_eq!(model.syms[6].cumfreq, 1 + 8);
        assert_eq!(model.syms[7].cumfreq, 0);
    }

    #[test]
    fn window_size_matches_exponent() {
        let decompressor = QuantumDecompressor::new(10);
        assert_eq!(decompressor.window.len(), 1024);
        let decompressor = QuantumDecompressor::new(21);
        assert_eq!(decompressor.window.len(), 1 << 21);
    }
}
