//! Program images.
//!
//! ```text
//! offset 0   D7 FB          markers
//!        2   rom_count      cells in the constant pool
//!        3   global_count
//!        4   rom cells      5 bytes each
//!        ..  code           execution starts here
//! ```
//!
//! Images come either as raw binaries or as Intel HEX text.
use log::{debug, warn};

use crate::{CELL_SIZE, Cell, VmError};

pub const MARKERS: [u8; 2] = [0xD7, 0xFB];
pub const HEADER_SIZE: usize = 4;
/// Largest image the 16 bit HEX addresses can describe.
pub const MAX_IMAGE_SIZE: usize = 1 << 16;

/// An immutable program image.
#[derive(Debug, Clone)]
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    /// Validates the header and the size of the constant pool.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, VmError> {
        if bytes.len() < HEADER_SIZE {
            return Err(VmError::bad_image(format!(
                "{} bytes is too short for a header",
                bytes.len()
            )));
        }
        if bytes[..2] != MARKERS {
            return Err(VmError::bad_image(format!(
                "wrong markers {:#04x} {:#04x}",
                bytes[0], bytes[1]
            )));
        }
        if bytes.len() > MAX_IMAGE_SIZE {
            return Err(VmError::bad_image("image larger than 64 KiB"));
        }

        let image = Self { bytes };
        if image.code_start() > image.len() {
            return Err(VmError::bad_image(format!(
                "constant pool of {} cells runs past the end",
                image.rom_count()
            )));
        }
        Ok(image)
    }

    /// Parses Intel HEX. Only data and end-of-file records are used, other
    /// record types are skipped.
    pub fn from_hex(text: &str) -> Result<Self, VmError> {
        let mut buffer = vec![0u8; MAX_IMAGE_SIZE];
        let mut end = 0;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            let Some(record) = line.strip_prefix(':') else {
                continue;
            };
            let number = number + 1;
            let bytes = decode_hex_record(record)
                .map_err(|reason| VmError::bad_image(format!("line {number}: {reason}")))?;

            let [len, addr_hi, addr_lo, kind, ref rest @ ..] = bytes[..] else {
                return Err(VmError::bad_image(format!("line {number}: short record")));
            };
            let len = len as usize;
            if rest.len() != len + 1 {
                return Err(VmError::bad_image(format!(
                    "line {number}: record length {len} does not match its data"
                )));
            }
            if bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)) != 0 {
                return Err(VmError::bad_image(format!("line {number}: bad checksum")));
            }

            let data = &rest[..len];
            match kind {
                0 => {
                    let addr = u16::from_be_bytes([addr_hi, addr_lo]) as usize;
                    if addr + len > MAX_IMAGE_SIZE {
                        return Err(VmError::bad_image(format!(
                            "line {number}: data past 64 KiB"
                        )));
                    }
                    buffer[addr..addr + len].copy_from_slice(data);
                    end = end.max(addr + len);
                }
                1 => break,
                other => warn!("line {number}: skipping record type {other}"),
            }
        }

        debug!("hex image: {end} bytes");
        buffer.truncate(end);
        Self::from_bytes(buffer)
    }

    /// An image the builder laid out itself.
    pub(crate) fn assembled(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() >= HEADER_SIZE && bytes[..2] == MARKERS);
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn rom_count(&self) -> u8 {
        self.bytes[2]
    }

    pub fn global_count(&self) -> u8 {
        self.bytes[3]
    }

    /// Offset of the first instruction.
    pub fn code_start(&self) -> usize {
        HEADER_SIZE + self.rom_count() as usize * CELL_SIZE
    }

    #[inline(always)]
    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    /// Decodes the constant pool.
    pub fn rom_cells(&self) -> Result<Vec<Cell>, VmError> {
        self.bytes[HEADER_SIZE..self.code_start()]
            .chunks_exact(CELL_SIZE)
            .map(Cell::decode)
            .collect()
    }
}

fn decode_hex_record(record: &str) -> Result<Vec<u8>, String> {
    fn digit(c: u8) -> Option<u8> {
        (c as char).to_digit(16).map(|d| d as u8)
    }

    let record = record.as_bytes();
    if record.len() % 2 != 0 {
        return Err("odd number of hex digits".into());
    }
    record
        .chunks_exact(2)
        .map(|pair| match (digit(pair[0]), digit(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(format!(
                "invalid hex digits {:?}",
                String::from_utf8_lossy(pair)
            )),
        })
        .collect()
}
