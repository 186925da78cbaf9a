//! Memory image loading
//!
//! Images are flat byte buffers with a base address, loaded from Motorola
//! S-record, Intel HEX or raw binary files. Text formats are tried in that
//! order; a file that is neither is taken as raw binary.
//!
//! Unless given explicitly, the base address of a text image is the address
//! of its first data record. Every later record must lie at or above the base
//! and inside [`CAPACITY`] bytes from it. Gaps are filled with 0xFF, the
//! erased flash value.

mod ihex;
mod srec;

use std::fmt;
use std::path::Path;

use thiserror::Error;

pub use ihex::parse_ihex;
pub use srec::parse_srec;

/// Largest image that can be loaded, in bytes
pub const CAPACITY: usize = 0x20000;

/// Base address of raw binary images when none is given
pub const DEFAULT_BASE: u32 = 0x0800_0000;

/// Erased flash byte, used to fill gaps and pad partial words
pub const FILL_BYTE: u8 = 0xFF;

/// Image parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Line is not a valid record of the detected format
    #[error("line {line}: bad record")]
    BadRecord {
        /// 1-based line number
        line: usize,
    },

    /// A non-record line after data records
    #[error("line {line}: bad file format")]
    BadFormat {
        /// 1-based line number
        line: usize,
    },

    /// Intel HEX checksum mismatch
    #[error("line {line}: bad hex checksum")]
    BadChecksum {
        /// 1-based line number
        line: usize,
    },

    /// Intel HEX data record with an odd byte count
    #[error("line {line}: odd length")]
    OddLength {
        /// 1-based line number
        line: usize,
    },

    /// Intel HEX data record not on a word boundary
    #[error("line {line}: odd address 0x{addr:08X}")]
    OddAddress {
        /// 1-based line number
        line: usize,
        /// Record address
        addr: u32,
    },

    /// Intel HEX record type other than 00, 01, 04, 05
    #[error("line {line}: unknown hex record type: {kind}")]
    UnknownRecordType {
        /// 1-based line number
        line: usize,
        /// Record type
        kind: u8,
    },

    /// Record address below the image base
    #[error("incorrect address 0x{addr:08X}, must be 0x{base:08X} or greater")]
    BelowBase {
        /// Record address
        addr: u32,
        /// Image base
        base: u32,
    },

    /// Record ends beyond the image capacity
    #[error("address too large: 0x{addr:08X} + 0x{len:X}")]
    TooLarge {
        /// Record address
        addr: u32,
        /// Record length in bytes
        len: usize,
    },
}

/// Source format of an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Motorola S-record
    Srec,
    /// Intel HEX
    Ihex,
    /// Raw binary
    Binary,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Srec => "S-record",
            Format::Ihex => "Intel HEX",
            Format::Binary => "binary",
        })
    }
}

/// A contiguous memory image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Target address of `data[0]`
    pub base: u32,
    /// Image contents
    pub data: Vec<u8>,
    /// Format the image was loaded from
    pub format: Format,
}

impl Image {
    /// Wrap raw bytes placed at `base`
    pub fn from_bin(data: &[u8], base: u32) -> Result<Self, ImageError> {
        if data.len() > CAPACITY || !fits(base, data.len()) {
            return Err(ImageError::TooLarge {
                addr: base,
                len: data.len(),
            });
        }
        Ok(Self {
            base,
            data: data.to_vec(),
            format: Format::Binary,
        })
    }

    /// Detect the format of `contents` and parse it
    ///
    /// With `base` set the file is always taken as raw binary at that
    /// address.
    pub fn parse(contents: &[u8], base: Option<u32>) -> Result<Self, ImageError> {
        if let Some(base) = base {
            return Self::from_bin(contents, base);
        }
        if let Some(image) = parse_srec(contents)? {
            return Ok(image);
        }
        if let Some(image) = parse_ihex(contents)? {
            return Ok(image);
        }
        Self::from_bin(contents, DEFAULT_BASE)
    }

    /// Read and parse an image file
    pub fn load(path: impl AsRef<Path>, base: Option<u32>) -> crate::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read(path)?;
        let image = Self::parse(&contents, base)?;
        log::debug!(
            "{}: {} image, {} bytes at 0x{:08X}",
            path.display(),
            image.format,
            image.len(),
            image.base
        );
        Ok(image)
    }

    /// Image length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image holds no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Little-endian words of `data[offset..offset + len]`
    ///
    /// A trailing partial word is padded with [`FILL_BYTE`].
    pub fn words(&self, offset: usize, len: usize) -> Vec<u32> {
        let end = (offset + len).min(self.data.len());
        let bytes = &self.data[offset.min(end)..end];
        bytes
            .chunks(4)
            .map(|chunk| {
                let mut word = [FILL_BYTE; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect()
    }
}

/// Collects data records into a flat buffer
struct Builder {
    base: Option<u32>,
    data: Vec<u8>,
}

impl Builder {
    fn new() -> Self {
        Self {
            base: None,
            data: Vec::new(),
        }
    }

    fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    fn put(&mut self, addr: u32, bytes: &[u8]) -> Result<(), ImageError> {
        let base = *self.base.get_or_insert(addr);
        if addr < base {
            return Err(ImageError::BelowBase { addr, base });
        }
        let offset = (addr - base) as usize;
        let end = offset + bytes.len();
        if end > CAPACITY || !fits(base, end) {
            return Err(ImageError::TooLarge {
                addr,
                len: bytes.len(),
            });
        }
        if self.data.len() < end {
            self.data.resize(end, FILL_BYTE);
        }
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn finish(self, format: Format) -> Option<Image> {
        match self.base {
            Some(base) if !self.data.is_empty() => Some(Image {
                base,
                data: self.data,
                format,
            }),
            _ => None,
        }
    }
}

/// Whether `len` bytes at `base` stay inside the 32-bit address space
fn fits(base: u32, len: usize) -> bool {
    base as u64 + len as u64 <= 1 << 32
}

/// Split text into numbered lines, skipping blank ones
fn lines(contents: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    contents
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_ascii_end()))
        .filter(|(_, line)| !line.is_empty())
}

/// Decode the hex byte pairs of `text`
fn hex_bytes(text: &[u8]) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}
