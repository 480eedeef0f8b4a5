use std::fmt;

use crate::error::Result;

const CTYPE_NONE: u16 = 0;
const CTYPE_MSZIP: u16 = 1;
const CTYPE_QUANTUM: u16 = 2;
const CTYPE_LZX: u16 = 3;

const QUANTUM_LEVEL_MIN: u16 = 1;
const QUANTUM_LEVEL_MAX: u16 = 7;
const QUANTUM_MEMORY_MIN: u16 = 10;
const QUANTUM_MEMORY_MAX: u16 = 21;
const LZX_WINDOW_MIN: u16 = 15;
const LZX_WINDOW_MAX: u16 = 21;

/// The scheme used to compress a folder's data.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression.
    None,
    /// MSZIP compression (per-block DEFLATE).  MSZIP is described further
    /// in [MS-MCI](https://msdn.microsoft.com/en-us/library/cc483131.aspx).
    MsZip,
    /// Quantum compression with the given level and window exponent.
    Quantum(u16, u16),
    /// LZX compression with the given window exponent.  The LZX scheme is
    /// described further in
    /// [MS-PATCH](https://msdn.microsoft.com/en-us/library/cc483133.aspx).
    Lzx(u16),
}

impl CompressionType {
    /// Decode the 16-bit compression-type word of a folder record: low
    /// nibble is the method, bits 8-12 the window exponent.
    pub(crate) fn from_bitfield(bits: u16) -> Result<CompressionType> {
        let ctype = bits & 0x000f;
        if ctype == CTYPE_NONE {
            Ok(CompressionType::None)
        } else if ctype == CTYPE_MSZIP {
            Ok(CompressionType::MsZip)
        } else if ctype == CTYPE_QUANTUM {
            let level = (bits & 0x00f0) >> 4;
            if !(QUANTUM_LEVEL_MIN..=QUANTUM_LEVEL_MAX).contains(&level) {
                data_format!("invalid Quantum level: 0x{:02x}", level);
            }
            let memory = (bits & 0x1f00) >> 8;
            if !(QUANTUM_MEMORY_MIN..=QUANTUM_MEMORY_MAX).contains(&memory) {
                data_format!("invalid Quantum window: 0x{:02x}", memory);
            }
            Ok(CompressionType::Quantum(level, memory))
        } else if ctype == CTYPE_LZX {
            let window = (bits & 0x1f00) >> 8;
            if !(LZX_WINDOW_MIN..=LZX_WINDOW_MAX).contains(&window) {
                data_format!("invalid LZX window: 0x{:02x}", window);
            }
            Ok(CompressionType::Lzx(window))
        } else {
            data_format!("unknown compression type: 0x{:04x}", bits);
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CompressionType::None => write!(f, "None"),
            CompressionType::MsZip => write!(f, "MSZIP"),
            CompressionType::Quantum(level, memory) => {
                write!(f, "Quantum/{}:{}", level, memory)
            }
            CompressionType::Lzx(window) => write!(f, "LZX:{}", window),
        }
    }
}
