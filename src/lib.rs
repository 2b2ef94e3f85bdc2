//! An image-based, self-hosting Forth virtual machine.
//!
//! The whole machine lives in one flat array of cells: registers at the
//! bottom, a scratch buffer for the last parsed word, a dictionary of word
//! headers and threaded code growing upward, and the return and variable
//! stacks at the top. A handful of primitives is seeded by hand; everything
//! else is compiled by running an embedded Forth program against the
//! machine's own outer interpreter.

pub mod exception;
pub mod memory;
pub mod source;
pub mod parser;
pub mod core;
pub mod output;
pub mod loader;
pub mod tools;
