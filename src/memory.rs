use log::{debug, info};
use std::cell::Cell;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by bulk memory initialization.
///
/// A failed load leaves memory exactly as it was, so the caller can retry
/// with a different image or abort setup cleanly.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("could not read ROM image: {0}")]
    Io(#[from] std::io::Error),
    #[error("ROM image of {len} bytes does not fit at {start:#06X}")]
    ImageTooLarge { start: u16, len: usize },
}

/// Flat 64KB address space, partitioned into RAM, memory-mapped I/O and ROM
/// windows. The CPU reads and writes every address through the same two
/// entry points; the partitioning only decides side effects on this end:
/// the ROM window rejects stray writes, and the I/O window carries the
/// keyboard soft switches.
pub struct Memory {
    data: Vec<u8>,
    /// Keyboard latch: last key code with bit 7 set until the strobe is
    /// cleared. Interior mutability because clearing happens on a read.
    key_latch: Cell<u8>,
}

impl Memory {
    pub const RAM_START: u16 = 0x0000;
    pub const RAM_END: u16 = 0xBFFF;
    pub const IO_START: u16 = 0xC000;
    pub const IO_END: u16 = 0xCFFF;
    pub const ROM_START: u16 = 0xD000;
    pub const ROM_END: u16 = 0xFFFF;

    /// Keyboard data soft switch: latched key code, bit 7 = key ready.
    pub const KBD: u16 = 0xC000;
    /// Keyboard strobe soft switch: any access clears the ready bit.
    pub const KBDSTRB: u16 = 0xC010;

    /// Create a new memory instance with all 64KB initialized to 0
    pub fn new() -> Self {
        Self {
            data: vec![0; 0x10000],
            key_latch: Cell::new(0),
        }
    }

    /// Read a byte from memory
    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            Self::KBD => self.key_latch.get(),
            Self::KBDSTRB => {
                let cleared = self.key_latch.get() & 0x7F;
                self.key_latch.set(cleared);
                cleared
            }
            _ => self.data[addr as usize],
        }
    }

    /// Write a byte to memory
    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            Self::KBDSTRB => {
                self.key_latch.set(self.key_latch.get() & 0x7F);
            }
            Self::ROM_START..=Self::ROM_END => {
                debug!("ignoring write of {value:#04X} to ROM address {addr:#06X}");
            }
            _ => self.data[addr as usize] = value,
        }
    }

    /// Read a 16-bit word from memory (little-endian)
    pub fn read_u16(&self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Write a 16-bit word to memory (little-endian)
    pub fn write_u16(&mut self, addr: u16, value: u16) {
        self.write(addr, (value & 0xFF) as u8);
        self.write(addr.wrapping_add(1), (value >> 8) as u8);
    }

    /// Latch a key code for the program to pick up at the KBD soft switch.
    /// Bit 7 marks the key as not yet consumed.
    pub fn key_press(&mut self, code: u8) {
        self.key_latch.set(code | 0x80);
    }

    /// Bulk-copy bytes into memory starting at `start`, bypassing the ROM
    /// write protection. Data running past the end of the address space is
    /// dropped. Used by the ROM loader and by test harnesses that need to
    /// place code or vectors directly.
    pub fn load_bytes(&mut self, start: u16, bytes: &[u8]) {
        let start = start as usize;
        let len = bytes.len().min(0x10000 - start);
        if len < bytes.len() {
            debug!(
                "load of {} bytes at {start:#06X} truncated to {len}",
                bytes.len()
            );
        }
        self.data[start..start + len].copy_from_slice(&bytes[..len]);
    }

    /// Load a raw ROM image (headerless binary blob) from a file into
    /// memory at `start`. Returns the number of bytes loaded. On failure
    /// memory is left untouched.
    pub fn load_rom<P: AsRef<Path>>(&mut self, path: P, start: u16) -> Result<usize, MemoryError> {
        let image = fs::read(path.as_ref())?;
        if start as usize + image.len() > 0x10000 {
            return Err(MemoryError::ImageTooLarge {
                start,
                len: image.len(),
            });
        }
        self.load_bytes(start, &image);
        info!(
            "loaded {} byte ROM image at {start:#06X} from {}",
            image.len(),
            path.as_ref().display()
        );
        Ok(image.len())
    }
}
