//! Programmer conveniences: stack display and dictionary listing.

use std::fmt::Write;

use crate::core::Forth;
use crate::exception::Exception;
use crate::memory::{word_hidden, word_length, Cell, CELL_BYTES, DICTIONARY_START, HEX, PWD};
use crate::output::Output;

pub trait Tools {
    /// Render the variable stack, bottom to top, one tab after each value.
    /// Respects the HEX register. Nothing prints when the stack is empty.
    fn dot_s(&mut self) -> Result<(), Exception>;

    /// Names of all findable words, most recent first.
    fn words(&self) -> Result<Vec<String>, Exception>;
}

impl Tools for Forth {
    fn dot_s(&mut self) -> Result<(), Exception> {
        let base = (self.image.core_size() - self.image.stack_size()) as Cell;
        let hex = self.image.reg(HEX) != 0;
        let mut out = String::new();
        let mut i = base.wrapping_add(2);
        while i <= self.sp {
            let v = self.image.get(i)?;
            if hex {
                write!(out, "{:x}\t", v).unwrap();
            } else {
                write!(out, "{}\t", v).unwrap();
            }
            i = i.wrapping_add(1);
        }
        if self.sp > base {
            if hex {
                write!(out, "{:x}\t", self.top).unwrap();
            } else {
                write!(out, "{}\t", self.top).unwrap();
            }
        }
        self.push_output(&out);
        Ok(())
    }

    fn words(&self) -> Result<Vec<String>, Exception> {
        let mut names = Vec::new();
        let mut w = self.image.reg(PWD);
        while w > DICTIONARY_START as Cell {
            let code = self.image.get(w.wrapping_add(1))?;
            if !word_hidden(code) {
                let addr = (w.wrapping_sub(word_length(code))) as usize * CELL_BYTES;
                let name = self.image.cstr(addr)?;
                names.push(String::from_utf8_lossy(&name).into_owned());
            }
            w = self.image.get(w)?;
        }
        Ok(names)
    }
}
