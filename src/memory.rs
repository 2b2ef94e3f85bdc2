//! The flat cell image backing the virtual machine.
//!
//! Registers are distinguished offsets into the same array as the
//! dictionary and the stacks; they are named constants, not fields.

use byteorder::{ByteOrder, LittleEndian};

use crate::exception::Exception;

/// The machine word. Arithmetic on cells is modular.
pub type Cell = u32;

/// Width of a cell in bytes, recorded at register `INFO`.
pub const CELL_BYTES: usize = std::mem::size_of::<Cell>();

// Registers, as indices into the image.
pub const DIC: usize = 0;
pub const RSTK: usize = 1;
pub const STATE: usize = 8;
pub const HEX: usize = 9;
pub const PWD: usize = 10;
pub const INFO: usize = 11;

/// First cell of the scratch string buffer.
pub const STRING_OFFSET: usize = 32;
/// Maximum length of a word name, terminating NUL included.
pub const MAX_WORD_LENGTH: usize = 32;
/// First cell of the dictionary.
pub const DICTIONARY_START: usize = STRING_OFFSET + MAX_WORD_LENGTH;

/// Size of a Forth block in bytes.
pub const BLOCK_SIZE: usize = 1024;
pub const MINIMUM_CORE_SIZE: usize = 2048;
pub const DEFAULT_CORE_SIZE: usize = 32768;

/// Low seven bits of a code cell select the opcode.
pub const INSTRUCTION_MASK: Cell = 0x7f;
/// Bit 7 of a code cell hides the word from lookup.
pub const HIDDEN: Cell = 0x80;
/// The name length in cells occupies the byte above the hidden flag.
pub const WORD_LENGTH_OFFSET: u32 = 8;

/// Name length in cells, from a code cell.
pub fn word_length(code: Cell) -> Cell {
    (code >> WORD_LENGTH_OFFSET) & 0xff
}

pub fn word_hidden(code: Cell) -> bool {
    code & HIDDEN != 0
}

/// A contiguous, zero-initialized array of cells. Every access outside
/// `[0, core_size)` is refused with `InvalidMemoryAddress`; the caller
/// treats that as the machine's fatal bounds escape.
pub struct CoreImage {
    cells: Vec<Cell>,
    stack_size: usize,
}

impl CoreImage {
    pub fn new(size: usize) -> CoreImage {
        CoreImage {
            cells: vec![0; size],
            stack_size: size / 64,
        }
    }

    pub fn core_size(&self) -> usize {
        self.cells.len()
    }

    /// Cells reserved for each of the two stacks.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn get(&self, addr: Cell) -> Result<Cell, Exception> {
        match self.cells.get(addr as usize) {
            Some(v) => Ok(*v),
            None => Err(Exception::InvalidMemoryAddress),
        }
    }

    pub fn put(&mut self, addr: Cell, v: Cell) -> Result<(), Exception> {
        match self.cells.get_mut(addr as usize) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(Exception::InvalidMemoryAddress),
        }
    }

    /// Read a register. Register indices are compile-time constants below
    /// `STRING_OFFSET`, so no bound check is needed.
    pub fn reg(&self, r: usize) -> Cell {
        self.cells[r]
    }

    pub fn set_reg(&mut self, r: usize, v: Cell) {
        self.cells[r] = v;
    }

    /// Append one cell at the dictionary pointer.
    pub fn comma(&mut self, v: Cell) -> Result<(), Exception> {
        let dic = self.reg(DIC);
        self.put(dic, v)?;
        self.set_reg(DIC, dic.wrapping_add(1));
        Ok(())
    }

    // Byte views. Strings (word names, the scratch buffer, PRINT operands)
    // are packed little-endian into cells, so a byte address b lives in
    // cell b / CELL_BYTES.

    pub fn byte(&self, addr: usize) -> Result<u8, Exception> {
        match self.cells.get(addr / CELL_BYTES) {
            Some(cell) => Ok((cell >> ((addr % CELL_BYTES) * 8)) as u8),
            None => Err(Exception::InvalidMemoryAddress),
        }
    }

    pub fn set_byte(&mut self, addr: usize, v: u8) -> Result<(), Exception> {
        match self.cells.get_mut(addr / CELL_BYTES) {
            Some(cell) => {
                let shift = (addr % CELL_BYTES) * 8;
                *cell = (*cell & !(0xff << shift)) | ((v as Cell) << shift);
                Ok(())
            }
            None => Err(Exception::InvalidMemoryAddress),
        }
    }

    /// Copy a NUL-terminated string into whole cells starting at `cell_idx`,
    /// zero-padding the last cell. Returns the number of cells written.
    pub fn put_cstr(&mut self, s: &[u8], cell_idx: Cell) -> Result<Cell, Exception> {
        let cells = (s.len() + 1 + CELL_BYTES - 1) / CELL_BYTES;
        for i in 0..cells {
            self.put(cell_idx.wrapping_add(i as Cell), 0)?;
        }
        let base = cell_idx as usize * CELL_BYTES;
        for (i, b) in s.iter().enumerate() {
            self.set_byte(base + i, *b)?;
        }
        Ok(cells as Cell)
    }

    /// The NUL-terminated string starting at byte address `addr`. Stops at
    /// the end of the image if no terminator is found.
    pub fn cstr(&self, addr: usize) -> Result<Vec<u8>, Exception> {
        if addr / CELL_BYTES >= self.cells.len() {
            return Err(Exception::InvalidMemoryAddress);
        }
        let mut s = Vec::new();
        let mut i = addr;
        while let Ok(b) = self.byte(i) {
            if b == 0 {
                break;
            }
            s.push(b);
            i += 1;
        }
        Ok(s)
    }

    /// The cell array as little-endian bytes, for core dumps and block I/O.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.cells.len() * CELL_BYTES];
        LittleEndian::write_u32_into(&self.cells, &mut buf);
        buf
    }

    /// Rebuild an image from the byte form produced by `to_bytes`.
    pub fn from_bytes(buf: &[u8]) -> Result<CoreImage, Exception> {
        if buf.len() % CELL_BYTES != 0 {
            return Err(Exception::InvalidCoreImage);
        }
        let mut cells = vec![0 as Cell; buf.len() / CELL_BYTES];
        LittleEndian::read_u32_into(buf, &mut cells);
        let stack_size = cells.len() / 64;
        Ok(CoreImage { cells, stack_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut m = CoreImage::new(MINIMUM_CORE_SIZE);
        assert_eq!(m.get(0), Ok(0));
        assert_eq!(m.put(2047, 7), Ok(()));
        assert_eq!(m.get(2047), Ok(7));
        assert_eq!(m.get(2048), Err(Exception::InvalidMemoryAddress));
        assert_eq!(m.put(2048, 1), Err(Exception::InvalidMemoryAddress));
    }

    #[test]
    fn test_byte_packing_is_little_endian() {
        let mut m = CoreImage::new(MINIMUM_CORE_SIZE);
        m.set_byte(64 * CELL_BYTES, b'r').unwrap();
        m.set_byte(64 * CELL_BYTES + 1, b'e').unwrap();
        assert_eq!(m.get(64), Ok(0x6572));
        assert_eq!(m.byte(64 * CELL_BYTES), Ok(b'r'));
        assert_eq!(m.byte(64 * CELL_BYTES + 1), Ok(b'e'));
    }

    #[test]
    fn test_put_cstr_pads_and_round_trips() {
        let mut m = CoreImage::new(MINIMUM_CORE_SIZE);
        let l = m.put_cstr(b"read", 64).unwrap();
        assert_eq!(l, 2);
        assert_eq!(m.cstr(64 * CELL_BYTES).unwrap(), b"read");
        // The byte after the terminator is still zero.
        assert_eq!(m.byte(64 * CELL_BYTES + 5), Ok(0));
    }

    #[test]
    fn test_comma_advances_dic() {
        let mut m = CoreImage::new(MINIMUM_CORE_SIZE);
        m.set_reg(DIC, DICTIONARY_START as Cell);
        m.comma(42).unwrap();
        m.comma(43).unwrap();
        assert_eq!(m.reg(DIC), DICTIONARY_START as Cell + 2);
        assert_eq!(m.get(DICTIONARY_START as Cell), Ok(42));
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut m = CoreImage::new(MINIMUM_CORE_SIZE);
        m.put(100, 0xdeadbeef).unwrap();
        let bytes = m.to_bytes();
        let m2 = CoreImage::from_bytes(&bytes).unwrap();
        assert_eq!(m2.get(100), Ok(0xdeadbeef));
        assert_eq!(m2.to_bytes(), bytes);
    }
}
