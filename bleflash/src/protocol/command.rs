//! Bootloader command encoding.
//!
//! The engine only needs three commands from the device: erase, program one
//! page and reset. [`CommandSet`] is the seam for the wire encoding;
//! [`Bl702Commands`] is the default.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+----------+--------+---------------+
//! | OPCODE | CHECKSUM | LENGTH |    PAYLOAD    |
//! +--------+----------+--------+---------------+
//! | 1      | 1        | 2 (LE) |   variable    |
//! +--------+----------+--------+---------------+
//! ```
//!
//! `CHECKSUM` is the low byte of the sum of the two length bytes and every
//! payload byte.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Magic sequence that switches the application into its bootloader.
///
/// Sent as raw ASCII, without packet framing.
pub const BOOTLOADER_MAGIC: &[u8] = b"BL702BOOT";

/// Encoder for the commands the updater sends.
///
/// An encoding error is [`Error::Protocol`]; the updater treats it as fatal
/// because retrying cannot change the result.
pub trait CommandSet {
    /// Erase enough flash to hold an image of `image_size` bytes.
    fn erase_flash(&self, image_size: usize) -> Result<Vec<u8>>;

    /// Program one flash page.
    fn program_page(&self, page: &[u8]) -> Result<Vec<u8>>;

    /// Restart the device into the new image.
    fn system_reset(&self) -> Result<Vec<u8>>;
}

/// Bootloader opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Reset the chip.
    Reset = 0x21,
    /// Erase flash.
    FlashErase = 0x30,
    /// Program one flash page.
    FlashProgram = 0x31,
}

/// Command frame builder.
#[derive(Debug)]
pub struct CommandFrame {
    op: Opcode,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a new command frame with an empty payload.
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            data: Vec::new(),
        }
    }

    /// Erase command for an image of `image_size` bytes.
    ///
    /// The size field is 32 bits wide; larger images are rejected.
    pub fn erase(image_size: usize) -> Result<Self> {
        let size = u32::try_from(image_size).map_err(|_| {
            Error::Protocol(format!(
                "image of {image_size} bytes does not fit the erase size field"
            ))
        })?;
        let mut frame = Self::new(Opcode::FlashErase);
        frame
            .data
            .resize(4, 0);
        LittleEndian::write_u32(&mut frame.data, size);
        Ok(frame)
    }

    /// Program command carrying one page.
    pub fn program(page: &[u8]) -> Self {
        let mut frame = Self::new(Opcode::FlashProgram);
        frame
            .data
            .extend_from_slice(page);
        frame
    }

    /// Reset command.
    pub fn reset() -> Self {
        Self::new(Opcode::Reset)
    }

    /// Build the complete frame.
    ///
    /// Fails if the payload does not fit the 16-bit length field.
    pub fn build(&self) -> Result<Vec<u8>> {
        let len = u16::try_from(
            self.data
                .len(),
        )
        .map_err(|_| {
            Error::Protocol(format!(
                "{:?} payload of {} bytes exceeds the length field",
                self.op,
                self.data
                    .len()
            ))
        })?;
        let mut buf = Vec::with_capacity(4 + self.data.len());

        buf.push(self.op as u8);
        buf.extend_from_slice(&[0; 3]);
        LittleEndian::write_u16(&mut buf[2..4], len);
        buf.extend_from_slice(&self.data);

        buf[1] = checksum(&buf[2..]);
        Ok(buf)
    }

    /// Get the opcode.
    pub fn opcode(&self) -> Opcode {
        self.op
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Default BL702 bootloader encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bl702Commands;

impl CommandSet for Bl702Commands {
    fn erase_flash(&self, image_size: usize) -> Result<Vec<u8>> {
        CommandFrame::erase(image_size)?.build()
    }

    fn program_page(&self, page: &[u8]) -> Result<Vec<u8>> {
        CommandFrame::program(page).build()
    }

    fn system_reset(&self) -> Result<Vec<u8>> {
        CommandFrame::reset().build()
    }
}
