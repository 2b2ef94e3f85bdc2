//! Source files, core dumps and block I/O.
//!
//! A core dump is a small little-endian header followed by the full cell
//! array; it reloads only on a host with the same cell width. Blocks are
//! 1024-byte windows of the image exchanged with `%04x.blk` files in the
//! current directory.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::core::Forth;
use crate::exception::Exception;
use crate::memory::{Cell, CoreImage, BLOCK_SIZE, CELL_BYTES, INFO, MINIMUM_CORE_SIZE};
use crate::source::Source;

/// "4TH" and a NUL, little-endian.
pub const CORE_MAGIC: u32 = 0x0048_5434;

const HEADER_CELLS: usize = 6;
const HEADER_BYTES: usize = HEADER_CELLS * 4;

pub trait HasLoader {
    /// Run a source file against the machine. A first line starting with
    /// `#` is consumed, so block files and scripts may carry a shebang.
    fn load(&mut self, path: &str) -> Result<(), Exception>;

    /// Write the machine state as a core dump.
    fn dump_core<W: Write>(&self, out: W) -> Result<(), Exception>;

    /// Rebuild a machine from a core dump. Refused unless the dump's cell
    /// width matches this build's.
    fn load_core<R: Read>(input: R) -> Result<Self, Exception>
    where
        Self: Sized;

    /// ( addr id -- status ) behind the `save` primitive.
    fn block_write(&self, addr: Cell, id: Cell) -> Cell;

    /// ( addr id -- status ) behind the `load` primitive.
    fn block_read(&mut self, addr: Cell, id: Cell) -> Cell;
}

impl HasLoader for Forth {
    fn load(&mut self, path: &str) -> Result<(), Exception> {
        let file = File::open(path).map_err(|_| Exception::FileIOException)?;
        let mut reader = BufReader::new(file);
        let mut first = [0u8; 1];
        let n = reader.read(&mut first).map_err(|_| Exception::FileIOException)?;
        if n == 0 {
            return Ok(());
        }
        if first[0] == b'#' {
            let mut line = Vec::new();
            reader
                .read_until(b'\n', &mut line)
                .map_err(|_| Exception::FileIOException)?;
            self.set_input(Source::from_reader(Box::new(reader)));
        } else {
            let head = Cursor::new(first);
            self.set_input(Source::from_reader(Box::new(head.chain(reader))));
        }
        self.run()
    }

    fn dump_core<W: Write>(&self, mut out: W) -> Result<(), Exception> {
        let mut header = [0u8; HEADER_BYTES];
        LittleEndian::write_u32_into(
            &[
                CORE_MAGIC,
                CELL_BYTES as u32,
                self.image.core_size() as u32,
                self.top,
                self.sp,
                self.ip,
            ],
            &mut header,
        );
        out.write_all(&header)
            .and_then(|_| out.write_all(&self.image.to_bytes()))
            .map_err(|_| Exception::FileIOException)
    }

    fn load_core<R: Read>(mut input: R) -> Result<Forth, Exception> {
        let mut header = [0u8; HEADER_BYTES];
        input
            .read_exact(&mut header)
            .map_err(|_| Exception::InvalidCoreImage)?;
        let mut fields = [0u32; HEADER_CELLS];
        LittleEndian::read_u32_into(&header, &mut fields);
        let [magic, cell_bytes, core_size, top, sp, ip] = fields;
        if magic != CORE_MAGIC || cell_bytes as usize != CELL_BYTES {
            return Err(Exception::InvalidCoreImage);
        }
        if (core_size as usize) < MINIMUM_CORE_SIZE {
            return Err(Exception::InvalidCoreImage);
        }
        let mut cells = vec![0u8; core_size as usize * CELL_BYTES];
        input
            .read_exact(&mut cells)
            .map_err(|_| Exception::InvalidCoreImage)?;
        let image = CoreImage::from_bytes(&cells)?;
        if image.reg(INFO) as usize != CELL_BYTES {
            return Err(Exception::InvalidCoreImage);
        }
        Ok(Forth::from_parts(image, top, sp, ip))
    }

    fn block_write(&self, addr: Cell, id: Cell) -> Cell {
        match write_block(&self.image, addr, id) {
            Ok(()) => 0,
            Err(_) => Cell::max_value(),
        }
    }

    fn block_read(&mut self, addr: Cell, id: Cell) -> Cell {
        match read_block(&mut self.image, addr, id) {
            Ok(()) => 0,
            Err(_) => Cell::max_value(),
        }
    }
}

fn block_name(id: Cell) -> String {
    format!("{:04x}.blk", id)
}

// The reference bounds the byte offset by the cell count. Kept as is: the
// byte extent always covers offset + BLOCK_SIZE whenever this passes.
fn block_in_range(image: &CoreImage, addr: Cell) -> bool {
    (addr as usize) <= image.core_size() - BLOCK_SIZE
}

fn write_block(image: &CoreImage, addr: Cell, id: Cell) -> Result<(), Exception> {
    if !block_in_range(image, addr) {
        return Err(Exception::InvalidBlockNumber);
    }
    let mut buf = [0u8; BLOCK_SIZE];
    for (i, b) in buf.iter_mut().enumerate() {
        *b = image.byte(addr as usize + i)?;
    }
    let name = block_name(id);
    let mut file = match File::create(&name) {
        Ok(f) => f,
        Err(_) => {
            eprintln!("( error 'file-open \"{} : could not open file\" )", name);
            return Err(Exception::BlockWriteException);
        }
    };
    file.write_all(&buf)
        .map_err(|_| Exception::BlockWriteException)
}

fn read_block(image: &mut CoreImage, addr: Cell, id: Cell) -> Result<(), Exception> {
    if !block_in_range(image, addr) {
        return Err(Exception::InvalidBlockNumber);
    }
    let name = block_name(id);
    let mut file = match File::open(&name) {
        Ok(f) => f,
        Err(_) => {
            eprintln!("( error 'file-open \"{} : could not open file\" )", name);
            return Err(Exception::BlockReadException);
        }
    };
    let mut buf = [0u8; BLOCK_SIZE];
    file.read_exact(&mut buf)
        .map_err(|_| Exception::BlockReadException)?;
    for (i, b) in buf.iter().enumerate() {
        image.set_byte(addr as usize + i, *b)?;
    }
    Ok(())
}
