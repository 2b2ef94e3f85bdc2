//! The virtual machine: opcodes, the colon-compiler, name lookup, the
//! indirect-threaded inner interpreter and the outer interpreter (READ).
//!
//! Execution walks threads of cell addresses. Each thread cell is the
//! address of a code or body cell; the low seven bits of the referenced
//! cell select the opcode. READ is itself a primitive, wired at boot into
//! a two-cell thread that re-invokes it forever, which is the whole of the
//! interpreter's top level.

use crate::exception::Exception;
use crate::loader::HasLoader;
use crate::memory::{
    word_hidden, word_length, Cell, CoreImage, CELL_BYTES, DIC, DICTIONARY_START, HEX, INFO,
    INSTRUCTION_MASK, MAX_WORD_LENGTH, MINIMUM_CORE_SIZE, PWD, RSTK, STATE, STRING_OFFSET,
    WORD_LENGTH_OFFSET,
};
use crate::output::Output;
use crate::parser;
use crate::source::Source;
use crate::tools::Tools;

/// Primitive opcodes. The numbering is embedded in compiled dictionaries
/// and in saved core images, so it never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Push = 0,
    Compile,
    Run,
    Define,
    Immediate,
    Comment,
    Read,
    Load,
    Store,
    Sub,
    Add,
    And,
    Or,
    Xor,
    Inv,
    Shl,
    Shr,
    Mul,
    Less,
    Exit,
    Emit,
    Key,
    FromR,
    ToR,
    Jmp,
    Jmpz,
    Pnum,
    Quote,
    Comma,
    Equal,
    Swap,
    Dup,
    Drop,
    Over,
    Tail,
    Bsave,
    Bload,
    Find,
    Print,
    Pstk,
}

const OPCODES: [Opcode; 40] = [
    Opcode::Push,
    Opcode::Compile,
    Opcode::Run,
    Opcode::Define,
    Opcode::Immediate,
    Opcode::Comment,
    Opcode::Read,
    Opcode::Load,
    Opcode::Store,
    Opcode::Sub,
    Opcode::Add,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Inv,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Mul,
    Opcode::Less,
    Opcode::Exit,
    Opcode::Emit,
    Opcode::Key,
    Opcode::FromR,
    Opcode::ToR,
    Opcode::Jmp,
    Opcode::Jmpz,
    Opcode::Pnum,
    Opcode::Quote,
    Opcode::Comma,
    Opcode::Equal,
    Opcode::Swap,
    Opcode::Dup,
    Opcode::Drop,
    Opcode::Over,
    Opcode::Tail,
    Opcode::Bsave,
    Opcode::Bload,
    Opcode::Find,
    Opcode::Print,
    Opcode::Pstk,
];

impl Opcode {
    pub fn from_cell(v: Cell) -> Option<Opcode> {
        OPCODES.get(v as usize).copied()
    }
}

/// Names of the compile-class primitives, in opcode order starting at READ.
const COMPILING_WORDS: [&str; 34] = [
    "read", "@", "!", "-", "+", "and", "or", "xor", "invert", "lshift", "rshift", "*", "<", "exit",
    "emit", "key", "r>", ">r", "j", "jz", ".", "'", ",", "=", "swap", "dup", "drop", "over",
    "tail", "save", "load", "find", "print", ".s",
];

/// The program that builds the rest of the system. It runs against READ
/// with only the seeded primitives available, so definition order matters.
const STARTUP: &str = "\\ FORTH startup program.\n\
: state 8 ! exit : ; immediate ' exit , 0 state exit : hex 9 ! ; : pwd 10 ;\n\
: h 0 ; : r 1 ; : here h @ ; : [ immediate 0 state ; : ] 1 state ;\n\
: :noname immediate here 2 , ] ; : if immediate ' jz , here 0 , ;\n\
: else immediate ' j , here 0 , swap dup here swap - swap ! ;\n\
: then immediate dup here swap - swap ! ; : 2dup over over ;\n\
: begin immediate here ; : until immediate ' jz , here - , ;\n\
: 0= 0 = ; : 1+ 1 + ; : 1- 1 - ; : ')' 41 ; : tab 9 emit ; : cr 10 emit ;\n\
: .( key drop begin key dup ')' = if drop exit then emit 0 until ;\n\
: line dup . tab dup 4 + swap begin dup @ . tab 1+ 2dup = until drop ;\n\
: literal 2 , , ; : size [ 11 @ literal ] ;\n\
: list swap begin line cr 2dup < until ; : allot here + h ! ;\n\
: words pwd @ begin dup dup 1 + @ 8 rshift 255 and - size * print tab @ dup 32 < until drop cr ;\n\
: tuck swap over ; : nip swap drop ; : rot >r swap r> swap ;\n\
: -rot rot rot ; : ? 0= if [ find \\ , ] then ; : :: [ find : , ] ;\n";

/// The virtual machine. The image fully describes machine state except for
/// the three hot values cached here and the attached input source.
pub struct Forth {
    pub(crate) image: CoreImage,
    pub(crate) source: Source,
    /// Cached top of the variable stack.
    pub(crate) top: Cell,
    /// Variable stack pointer; addresses the cell below `top`.
    pub(crate) sp: Cell,
    /// Interpreter pointer into the current thread.
    pub(crate) ip: Cell,
    pub(crate) outbuf: Option<String>,
    last_error: Option<Exception>,
}

impl Forth {
    /// Create a machine of `size` cells, seed the primitives and run the
    /// startup program against them. The new machine's input source is
    /// empty; attach one with `set_source` or `set_input`.
    pub fn new(size: usize) -> Result<Forth, Exception> {
        if size < MINIMUM_CORE_SIZE {
            return Err(Exception::InvalidNumericArgument);
        }
        let mut vm = Forth {
            image: CoreImage::new(size),
            source: Source::from_str(""),
            top: 0,
            sp: 0,
            ip: 0,
            outbuf: Some(String::with_capacity(128)),
            last_error: None,
        };
        vm.seed()?;
        vm.eval(STARTUP)?;
        Ok(vm)
    }

    pub(crate) fn from_parts(image: CoreImage, top: Cell, sp: Cell, ip: Cell) -> Forth {
        Forth {
            image,
            source: Source::from_str(""),
            top,
            sp,
            ip,
            outbuf: Some(String::with_capacity(128)),
            last_error: None,
        }
    }

    /// Lay down the registers, the self-invoking READ thread, the special
    /// forms and the compile-class primitives, then point the stacks at
    /// the top of the image.
    fn seed(&mut self) -> Result<(), Exception> {
        let size = self.image.core_size() as Cell;
        self.image.set_reg(DIC, DICTIONARY_START as Cell);
        self.image.set_reg(PWD, 1);
        self.image.set_reg(INFO, CELL_BYTES as Cell);
        self.image.set_reg(INFO + 1, size);

        // A word that reads in FORTH, calling itself forever.
        let read_cell = self.image.reg(DIC);
        self.image.comma(Opcode::Read as Cell)?;
        self.image.comma(Opcode::Run as Cell)?;
        self.ip = self.image.reg(DIC);
        self.image.comma(read_cell)?;
        self.image.comma(self.ip.wrapping_sub(1))?;

        self.compile(Opcode::Define, Some(b":"))?;
        self.compile(Opcode::Immediate, Some(b"immediate"))?;
        self.compile(Opcode::Comment, Some(b"\\"))?;
        for (i, name) in COMPILING_WORDS.iter().enumerate() {
            self.compile(Opcode::Compile, Some(name.as_bytes()))?;
            self.image.comma(Opcode::Read as Cell + i as Cell)?;
        }

        let stack = self.image.stack_size() as Cell;
        self.image.set_reg(RSTK, size - 2 * stack);
        self.sp = size - stack;
        Ok(())
    }

    pub fn last_error(&self) -> Option<Exception> {
        self.last_error
    }

    pub fn output_buffer(&mut self) -> &mut Option<String> {
        &mut self.outbuf
    }

    pub fn set_output_buffer(&mut self, buffer: String) {
        self.outbuf = Some(buffer);
    }

    /// Read input from a string.
    pub fn set_source(&mut self, s: &str) {
        self.source = Source::from_str(s);
    }

    /// Read input from an arbitrary source.
    pub fn set_input(&mut self, source: Source) {
        self.source = source;
    }

    /// Evaluate a string against the current machine state.
    pub fn eval(&mut self, s: &str) -> Result<(), Exception> {
        self.set_source(s);
        self.run()
    }

    /// The variable stack, bottom to top.
    pub fn stack(&self) -> Vec<Cell> {
        let base = (self.image.core_size() - self.image.stack_size()) as Cell;
        let mut values = Vec::new();
        let mut i = base.wrapping_add(2);
        while i <= self.sp {
            match self.image.get(i) {
                Ok(v) => values.push(v),
                Err(_) => break,
            }
            i = i.wrapping_add(1);
        }
        if self.sp > base {
            values.push(self.top);
        }
        values
    }

    fn push(&mut self, v: Cell) -> Result<(), Exception> {
        self.sp = self.sp.wrapping_add(1);
        self.image.put(self.sp, self.top)?;
        self.top = v;
        Ok(())
    }

    fn pop(&mut self) -> Result<Cell, Exception> {
        let v = self.top;
        self.top = self.image.get(self.sp)?;
        self.sp = self.sp.wrapping_sub(1);
        Ok(v)
    }

    /// Parse the next token from the source into the scratch buffer.
    fn read_token(&mut self) -> Result<Option<usize>, Exception> {
        let mut buf = [0u8; MAX_WORD_LENGTH];
        match self.source.read_word(&mut buf) {
            Some(n) => {
                self.image.put_cstr(&buf[..n], STRING_OFFSET as Cell)?;
                Ok(Some(n))
            }
            None => Ok(None),
        }
    }

    /// The token currently in the scratch buffer.
    fn token(&self) -> Vec<u8> {
        self.image
            .cstr(STRING_OFFSET * CELL_BYTES)
            .unwrap_or_default()
    }

    /// Install a new header at the dictionary pointer. With no name given,
    /// one token is parsed from the source; an exhausted source is
    /// `UnexpectedEndOfFile`, which DEFINE treats as a clean end of run.
    pub(crate) fn compile(&mut self, op: Opcode, name: Option<&[u8]>) -> Result<(), Exception> {
        let parsed;
        let name: &[u8] = match name {
            Some(s) => s,
            None => {
                if self.read_token()?.is_none() {
                    return Err(Exception::UnexpectedEndOfFile);
                }
                parsed = self.token();
                &parsed[..]
            }
        };
        let header = self.image.reg(DIC);
        let l = self.image.put_cstr(name, header)?;
        self.image.set_reg(DIC, header.wrapping_add(l));
        let pwd = self.image.reg(PWD);
        self.image.comma(pwd)?;
        self.image.set_reg(PWD, self.image.reg(DIC).wrapping_sub(1));
        self.image.comma((l << WORD_LENGTH_OFFSET) | op as Cell)?;
        Ok(())
    }

    /// Look up the scratch-buffer token. Returns the index of the matching
    /// link cell, or 0 when the chain runs out.
    pub(crate) fn find(&self) -> Result<Cell, Exception> {
        let query = self.token();
        let mut w = self.image.reg(PWD);
        while w > DICTIONARY_START as Cell {
            let code = self.image.get(w.wrapping_add(1))?;
            if !word_hidden(code) {
                let name = (w.wrapping_sub(word_length(code))) as usize * CELL_BYTES;
                if self.image.cstr(name)? == query {
                    return Ok(w);
                }
            }
            w = self.image.get(w)?;
        }
        Ok(0)
    }

    /// Run the inner interpreter until the input source is exhausted or the
    /// current thread ends. A fatal error (bounds violation, illegal
    /// opcode) invalidates the machine: every later call returns the same
    /// error without executing anything.
    pub fn run(&mut self) -> Result<(), Exception> {
        if let Some(e) = self.last_error {
            return Err(e);
        }
        match self.exec() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.last_error = Some(e);
                eprintln!("( fatal \"{}\" )", e.description());
                Err(e)
            }
        }
    }

    fn exec(&mut self) -> Result<(), Exception> {
        'outer: loop {
            let mut pc = self.image.get(self.ip)?;
            self.ip = self.ip.wrapping_add(1);
            if pc == 0 {
                break;
            }
            'inner: loop {
                let op = self.image.get(pc)? & INSTRUCTION_MASK;
                pc = pc.wrapping_add(1);
                match Opcode::from_cell(op) {
                    Some(Opcode::Push) | Some(Opcode::Quote) => {
                        let v = self.image.get(self.ip)?;
                        self.ip = self.ip.wrapping_add(1);
                        self.push(v)?;
                    }
                    Some(Opcode::Compile) => {
                        self.image.comma(pc)?;
                    }
                    Some(Opcode::Run) => {
                        let r = self.image.reg(RSTK).wrapping_add(1);
                        self.image.put(r, self.ip)?;
                        self.image.set_reg(RSTK, r);
                        self.ip = pc;
                    }
                    Some(Opcode::Define) => {
                        self.image.set_reg(STATE, 1);
                        match self.compile(Opcode::Compile, None) {
                            Ok(()) => self.image.comma(Opcode::Run as Cell)?,
                            Err(Exception::UnexpectedEndOfFile) => break 'outer,
                            Err(e) => return Err(e),
                        }
                    }
                    Some(Opcode::Immediate) => {
                        // Rewind over the RUN stub DEFINE appended, turn the
                        // code cell into RUN, and let the body overwrite the
                        // stub.
                        let dic = self.image.reg(DIC).wrapping_sub(2);
                        let code = self.image.get(dic)?;
                        self.image
                            .put(dic, (code & !INSTRUCTION_MASK) | Opcode::Run as Cell)?;
                        self.image.set_reg(DIC, dic.wrapping_add(1));
                    }
                    Some(Opcode::Comment) => loop {
                        match self.source.read_char() {
                            Some(b'\n') => break,
                            Some(_) => {}
                            None => break 'outer,
                        }
                    },
                    Some(Opcode::Read) => {
                        let r = self.image.reg(RSTK);
                        self.image.set_reg(RSTK, r.wrapping_sub(1));
                        if self.read_token()?.is_none() {
                            break 'outer;
                        }
                        let w = self.find()?;
                        if w > 1 {
                            pc = w.wrapping_add(1);
                            if self.image.reg(STATE) == 0
                                && self.image.get(pc)? & INSTRUCTION_MASK
                                    == Opcode::Compile as Cell
                            {
                                pc = pc.wrapping_add(1);
                            }
                            continue 'inner;
                        }
                        let token = self.token();
                        if !parser::is_number(&token) {
                            eprintln!(
                                "( error \"{} is not a word\" )",
                                String::from_utf8_lossy(&token)
                            );
                        } else if self.image.reg(STATE) != 0 {
                            // Cell 2 of the image is permanently zero, so
                            // threading through it dispatches PUSH.
                            self.image.comma(2)?;
                            self.image.comma(parser::parse_number(&token))?;
                        } else {
                            self.push(parser::parse_number(&token))?;
                        }
                    }
                    Some(Opcode::Load) => {
                        self.top = self.image.get(self.top)?;
                    }
                    Some(Opcode::Store) => {
                        let addr = self.pop()?;
                        let v = self.pop()?;
                        self.image.put(addr, v)?;
                    }
                    Some(Opcode::Sub) => {
                        let t = self.pop()?;
                        self.top = self.top.wrapping_sub(t);
                    }
                    Some(Opcode::Add) => {
                        let t = self.pop()?;
                        self.top = self.top.wrapping_add(t);
                    }
                    Some(Opcode::And) => {
                        let t = self.pop()?;
                        self.top &= t;
                    }
                    Some(Opcode::Or) => {
                        let t = self.pop()?;
                        self.top |= t;
                    }
                    Some(Opcode::Xor) => {
                        let t = self.pop()?;
                        self.top ^= t;
                    }
                    Some(Opcode::Inv) => {
                        self.top = !self.top;
                    }
                    Some(Opcode::Shl) => {
                        let t = self.pop()?;
                        self.top = self.top.checked_shl(t).unwrap_or(0);
                    }
                    Some(Opcode::Shr) => {
                        let t = self.pop()?;
                        self.top = self.top.checked_shr(t).unwrap_or(0);
                    }
                    Some(Opcode::Mul) => {
                        let t = self.pop()?;
                        self.top = self.top.wrapping_mul(t);
                    }
                    Some(Opcode::Less) => {
                        let t = self.pop()?;
                        self.top = (self.top < t) as Cell;
                    }
                    Some(Opcode::Exit) => {
                        let r = self.image.reg(RSTK);
                        self.ip = self.image.get(r)?;
                        self.image.set_reg(RSTK, r.wrapping_sub(1));
                    }
                    Some(Opcode::Emit) => {
                        let c = self.pop()?;
                        self.emit_byte(c as u8);
                    }
                    Some(Opcode::Key) => {
                        let c = match self.source.read_char() {
                            Some(b) => b as Cell,
                            None => Cell::max_value(),
                        };
                        self.push(c)?;
                    }
                    Some(Opcode::FromR) => {
                        let r = self.image.reg(RSTK);
                        let v = self.image.get(r)?;
                        self.image.set_reg(RSTK, r.wrapping_sub(1));
                        self.push(v)?;
                    }
                    Some(Opcode::ToR) => {
                        let v = self.pop()?;
                        let r = self.image.reg(RSTK).wrapping_add(1);
                        self.image.put(r, v)?;
                        self.image.set_reg(RSTK, r);
                    }
                    Some(Opcode::Jmp) => {
                        let off = self.image.get(self.ip)?;
                        self.ip = self.ip.wrapping_add(off);
                    }
                    Some(Opcode::Jmpz) => {
                        let off = if self.top == 0 {
                            self.image.get(self.ip)?
                        } else {
                            1
                        };
                        self.ip = self.ip.wrapping_add(off);
                        self.pop()?;
                    }
                    Some(Opcode::Pnum) => {
                        let n = self.pop()?;
                        let s = if self.image.reg(HEX) != 0 {
                            format!("{:x}", n)
                        } else {
                            format!("{}", n)
                        };
                        self.push_output(&s);
                    }
                    Some(Opcode::Comma) => {
                        let v = self.pop()?;
                        self.image.comma(v)?;
                    }
                    Some(Opcode::Equal) => {
                        let t = self.pop()?;
                        self.top = (self.top == t) as Cell;
                    }
                    Some(Opcode::Swap) => {
                        let w = self.top;
                        self.top = self.image.get(self.sp)?;
                        self.image.put(self.sp, w)?;
                    }
                    Some(Opcode::Dup) => {
                        let t = self.top;
                        self.push(t)?;
                    }
                    Some(Opcode::Drop) => {
                        self.pop()?;
                    }
                    Some(Opcode::Over) => {
                        let w = self.image.get(self.sp)?;
                        self.push(w)?;
                    }
                    Some(Opcode::Tail) => {
                        let r = self.image.reg(RSTK);
                        self.image.set_reg(RSTK, r.wrapping_sub(1));
                    }
                    Some(Opcode::Bsave) => {
                        let id = self.top;
                        let addr = self.image.get(self.sp)?;
                        self.sp = self.sp.wrapping_sub(1);
                        self.top = self.block_write(addr, id);
                    }
                    Some(Opcode::Bload) => {
                        let id = self.top;
                        let addr = self.image.get(self.sp)?;
                        self.sp = self.sp.wrapping_sub(1);
                        self.top = self.block_read(addr, id);
                    }
                    Some(Opcode::Find) => {
                        let t = self.top;
                        self.push(t)?;
                        if self.read_token()?.is_none() {
                            break 'outer;
                        }
                        let w = self.find()?.wrapping_add(2);
                        self.top = if w < DICTIONARY_START as Cell { 0 } else { w };
                    }
                    Some(Opcode::Print) => {
                        let addr = self.pop()?;
                        let s = self.image.cstr(addr as usize)?;
                        let s = String::from_utf8_lossy(&s).into_owned();
                        self.push_output(&s);
                    }
                    Some(Opcode::Pstk) => {
                        self.dot_s()?;
                    }
                    None => return Err(Exception::IllegalInstruction),
                }
                break 'inner;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DEFAULT_CORE_SIZE;

    fn vm() -> Forth {
        Forth::new(DEFAULT_CORE_SIZE).expect("boot")
    }

    fn output_of(vm: &mut Forth) -> String {
        vm.output_buffer().clone().unwrap_or_default()
    }

    #[test]
    fn test_boot_succeeds_at_minimum_size() {
        assert!(Forth::new(MINIMUM_CORE_SIZE).is_ok());
        assert_eq!(
            Forth::new(MINIMUM_CORE_SIZE - 1).err(),
            Some(Exception::InvalidNumericArgument)
        );
    }

    #[test]
    fn test_push_literals() {
        let vm = &mut vm();
        vm.eval("1 2 3").unwrap();
        assert_eq!(vm.stack(), [1, 2, 3]);
    }

    #[test]
    fn test_add_and_print() {
        let vm = &mut vm();
        vm.eval("2 3 + .").unwrap();
        assert_eq!(output_of(vm), "5");
        assert_eq!(vm.stack(), []);
    }

    #[test]
    fn test_arithmetic_wraps() {
        let vm = &mut vm();
        vm.eval("0 1 - 1 +").unwrap();
        assert_eq!(vm.stack(), [0]);
    }

    #[test]
    fn test_number_bases() {
        let vm = &mut vm();
        vm.eval("0x10 017 9").unwrap();
        assert_eq!(vm.stack(), [16, 15, 9]);
    }

    #[test]
    fn test_colon_definition() {
        let vm = &mut vm();
        vm.eval(": sq dup * ; 7 sq .").unwrap();
        assert_eq!(output_of(vm), "49");
    }

    #[test]
    fn test_emit() {
        let vm = &mut vm();
        vm.eval("42 emit 43 emit").unwrap();
        assert_eq!(output_of(vm), "*+");
    }

    #[test]
    fn test_if_else_then_in_definition() {
        let vm = &mut vm();
        vm.eval(": t 10 0 < 0= if 42 . else 7 . then ; t").unwrap();
        assert_eq!(output_of(vm), "42");
        let vm2 = &mut self::vm();
        vm2.eval(": t 0 10 < 0= if 42 . else 7 . then ; t").unwrap();
        assert_eq!(output_of(vm2), "7");
    }

    #[test]
    fn test_recursive_factorial() {
        let vm = &mut vm();
        vm.eval(": fact dup 1 < if drop 1 exit then dup 1 - fact * ; 5 fact .")
            .unwrap();
        assert_eq!(output_of(vm), "120");
    }

    #[test]
    fn test_begin_until() {
        let vm = &mut vm();
        vm.eval(": count 0 begin 1+ dup 5 = until ; count").unwrap();
        assert_eq!(vm.stack(), [5]);
    }

    #[test]
    fn test_hex_print_is_lowercase() {
        let vm = &mut vm();
        vm.eval(": decimal 0 9 ! ; 1 hex 255 . decimal 255 .").unwrap();
        assert_eq!(output_of(vm), "ff255");
    }

    #[test]
    fn test_dot_s_prints_bottom_to_top() {
        let vm = &mut vm();
        vm.eval("1 2 3 .s").unwrap();
        assert_eq!(output_of(vm), "1\t2\t3\t");
    }

    #[test]
    fn test_dot_paren() {
        let vm = &mut vm();
        vm.eval(".( hi there)").unwrap();
        assert_eq!(output_of(vm), "hi there");
    }

    #[test]
    fn test_comment_runs_to_end_of_line() {
        let vm = &mut vm();
        vm.eval("\\ 1 2 3 nonsense\n7").unwrap();
        assert_eq!(vm.stack(), [7]);
    }

    #[test]
    fn test_unknown_word_continues() {
        let vm = &mut vm();
        vm.eval("frobnicate 5").unwrap();
        assert_eq!(vm.last_error(), None);
        assert_eq!(vm.stack(), [5]);
    }

    #[test]
    fn test_stack_shuffles() {
        let vm = &mut vm();
        vm.eval("1 2 swap over").unwrap();
        assert_eq!(vm.stack(), [2, 1, 2]);
        let vm2 = &mut self::vm();
        vm2.eval("1 2 3 rot").unwrap();
        assert_eq!(vm2.stack(), [2, 3, 1]);
        let vm3 = &mut self::vm();
        vm3.eval("1 2 tuck nip").unwrap();
        assert_eq!(vm3.stack(), [2, 2]);
    }

    #[test]
    fn test_logic_and_shifts() {
        let vm = &mut vm();
        vm.eval("12 10 and 12 10 or 12 10 xor").unwrap();
        assert_eq!(vm.stack(), [8, 14, 6]);
        let vm2 = &mut self::vm();
        vm2.eval("1 4 lshift 256 8 rshift 0 invert").unwrap();
        assert_eq!(vm2.stack(), [16, 1, Cell::max_value()]);
    }

    #[test]
    fn test_here_and_store_fetch() {
        let vm = &mut vm();
        vm.eval("here here =").unwrap();
        assert_eq!(vm.stack(), [1]);
        let vm2 = &mut self::vm();
        vm2.eval("7 20 ! 20 @").unwrap();
        assert_eq!(vm2.stack(), [7]);
    }

    #[test]
    fn test_bracket_literal() {
        let vm = &mut vm();
        vm.eval(": five [ 2 3 + literal ] ; five").unwrap();
        assert_eq!(vm.stack(), [5]);
    }

    #[test]
    fn test_noname_leaves_body_address() {
        let vm = &mut vm();
        vm.eval(":noname 3 4 + ;").unwrap();
        // The body address stays on the stack; the definition is anonymous.
        assert_eq!(vm.stack().len(), 1);
    }

    #[test]
    fn test_size_reports_cell_width() {
        let vm = &mut vm();
        vm.eval("size").unwrap();
        assert_eq!(vm.stack(), [CELL_BYTES as Cell]);
    }

    #[test]
    fn test_to_r_from_r() {
        let vm = &mut vm();
        vm.eval(": t 3 >r 2 r> + ; t").unwrap();
        assert_eq!(vm.stack(), [5]);
    }

    #[test]
    fn test_tail_drops_one_return_slot() {
        let vm = &mut vm();
        let before = vm.image.reg(RSTK);
        vm.eval("tail").unwrap();
        assert_eq!(vm.image.reg(RSTK), before.wrapping_sub(1));
    }

    #[test]
    fn test_find_pushes_body_address() {
        let vm = &mut vm();
        vm.eval("find dup").unwrap();
        let xt = vm.stack()[0];
        assert_eq!(
            vm.image.get(xt).unwrap() & INSTRUCTION_MASK,
            Opcode::Dup as Cell
        );
        let vm2 = &mut self::vm();
        vm2.eval("find no-such-word").unwrap();
        assert_eq!(vm2.stack(), [0]);
    }

    #[test]
    fn test_compiled_body_is_disassemblable() {
        let vm = &mut vm();
        vm.eval(": t dup * ; find t").unwrap();
        let xt = vm.stack()[0];
        // xt addresses the RUN cell; the thread follows it in definition
        // order, closed by exit.
        assert_eq!(vm.image.get(xt).unwrap(), Opcode::Run as Cell);
        assert_eq!(vm.image.get(xt + 1).unwrap(), vm.find_xt("dup"));
        assert_eq!(vm.image.get(xt + 2).unwrap(), vm.find_xt("*"));
        assert_eq!(vm.image.get(xt + 3).unwrap(), vm.find_xt("exit"));
    }

    #[test]
    fn test_bounds_violation_is_fatal_and_sticky() {
        let vm = &mut vm();
        assert_eq!(
            vm.eval("0x7fffffff @"),
            Err(Exception::InvalidMemoryAddress)
        );
        assert_eq!(vm.last_error(), Some(Exception::InvalidMemoryAddress));
        // The machine refuses further work.
        assert_eq!(vm.eval("1 2 +"), Err(Exception::InvalidMemoryAddress));
    }

    #[test]
    fn test_illegal_opcode_is_fatal() {
        let vm = &mut vm();
        let dic = vm.image.reg(DIC);
        vm.image.put(dic, 63).unwrap();
        vm.image.put(dic + 1, dic).unwrap();
        vm.image.put(dic + 2, 0).unwrap();
        vm.ip = dic + 1;
        assert_eq!(vm.run(), Err(Exception::IllegalInstruction));
        assert_eq!(vm.eval("1"), Err(Exception::IllegalInstruction));
    }

    #[test]
    fn test_state_survives_between_evals() {
        let vm = &mut vm();
        vm.eval(": t 1 2").unwrap();
        assert_eq!(vm.image.reg(STATE), 1);
        vm.eval("+ ; t").unwrap();
        assert_eq!(vm.stack(), [3]);
    }

    impl Forth {
        fn find_xt(&mut self, name: &str) -> Cell {
            self.image
                .put_cstr(name.as_bytes(), STRING_OFFSET as Cell)
                .unwrap();
            self.find().unwrap().wrapping_add(2)
        }
    }
}
