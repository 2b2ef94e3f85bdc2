//! Input sources.
//!
//! The machine reads from exactly one source at a time: a byte buffer with
//! an index (used for the startup program and the REPL) or a boxed stream
//! (files, piped stdin). The word scanner must leave the delimiting
//! whitespace in the source; `.(` and friends consume it themselves with
//! `key`.

use std::io::Read;

use crate::memory::MAX_WORD_LENGTH;

pub enum Source {
    Buffer { bytes: Vec<u8>, pos: usize },
    Stream { input: Box<dyn Read>, peeked: Option<u8> },
}

impl Source {
    pub fn from_str(s: &str) -> Source {
        Source::Buffer {
            bytes: s.as_bytes().to_vec(),
            pos: 0,
        }
    }

    pub fn from_reader(input: Box<dyn Read>) -> Source {
        Source::Stream {
            input,
            peeked: None,
        }
    }

    /// Next byte without consuming it. None at end of input.
    fn peek(&mut self) -> Option<u8> {
        match self {
            Source::Buffer { bytes, pos } => bytes.get(*pos).copied(),
            Source::Stream { input, peeked } => {
                if peeked.is_none() {
                    let mut b = [0u8; 1];
                    *peeked = match input.read(&mut b) {
                        Ok(1) => Some(b[0]),
                        _ => None,
                    };
                }
                *peeked
            }
        }
    }

    fn bump(&mut self) {
        match self {
            Source::Buffer { bytes, pos } => {
                if *pos < bytes.len() {
                    *pos += 1;
                }
            }
            Source::Stream { peeked, .. } => {
                *peeked = None;
            }
        }
    }

    /// Read one byte. None at end of input.
    pub fn read_char(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.bump();
        }
        c
    }

    /// Read one whitespace-delimited word of up to `MAX_WORD_LENGTH - 1`
    /// bytes into `word`, NUL-terminated. Leading whitespace (newlines
    /// included) is skipped; the trailing delimiter is left in the source.
    /// Returns the number of bytes read, or None at end of input.
    pub fn read_word(&mut self, word: &mut [u8]) -> Option<usize> {
        debug_assert!(word.len() >= MAX_WORD_LENGTH);
        while let Some(c) = self.peek() {
            if !c.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
        let mut n = 0;
        while n < MAX_WORD_LENGTH - 1 {
            match self.peek() {
                Some(c) if !c.is_ascii_whitespace() => {
                    word[n] = c;
                    n += 1;
                    self.bump();
                }
                _ => break,
            }
        }
        word[n] = 0;
        if n == 0 {
            None
        } else {
            Some(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_of(s: &str) -> Vec<String> {
        let mut src = Source::from_str(s);
        let mut buf = [0u8; MAX_WORD_LENGTH];
        let mut out = vec![];
        while let Some(n) = src.read_word(&mut buf) {
            out.push(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
        out
    }

    #[test]
    fn test_read_word_skips_whitespace() {
        assert_eq!(words_of("  2 \t3\n+  ."), ["2", "3", "+", "."]);
        assert_eq!(words_of(""), Vec::<String>::new());
        assert_eq!(words_of("   \n\t "), Vec::<String>::new());
    }

    #[test]
    fn test_read_word_truncates_at_31() {
        let long = "a".repeat(40);
        let words = words_of(&long);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].len(), 31);
        assert_eq!(words[1].len(), 9);
    }

    #[test]
    fn test_delimiter_stays_in_source() {
        let mut src = Source::from_str(".( hi)");
        let mut buf = [0u8; MAX_WORD_LENGTH];
        assert_eq!(src.read_word(&mut buf), Some(2));
        // The space after the word is still there for `key`.
        assert_eq!(src.read_char(), Some(b' '));
        assert_eq!(src.read_char(), Some(b'h'));
    }

    #[test]
    fn test_stream_matches_buffer() {
        let reader: Box<dyn Read> = Box::new(&b"  one\ntwo "[..]);
        let mut src = Source::from_reader(reader);
        let mut buf = [0u8; MAX_WORD_LENGTH];
        assert_eq!(src.read_word(&mut buf), Some(3));
        assert_eq!(&buf[..3], b"one");
        assert_eq!(src.read_char(), Some(b'\n'));
        assert_eq!(src.read_word(&mut buf), Some(3));
        assert_eq!(&buf[..3], b"two");
        assert_eq!(src.read_word(&mut buf), None);
    }
}
