//! # structmap: declarative binary record maps
//!
//! A small language for describing binary record layouts, a compiler for it, and a bit-precise
//! decoder that walks a byte buffer against the compiled map and writes a readable trace.
//!
//! ## Map language
//!
//! ```text
//! #define COUNT 4
//!
//! struct Header {
//!     char4   magic = "RIFF";
//!     uint32  size;
//! };
//!
//! struct Chunk {
//!     char4   id;
//!     uint32  len;
//!     uint8   body[len];
//! };
//!
//! struct Fmt : inherits Chunk {
//!     char4   id = "fmt ";
//!     uint32  len;
//!     uint16  format;
//!     uint8   version:4;
//!     uint8   flags:4;
//!     if (flags & 1) {
//!         uint32 extra;
//!     }
//! };
//!
//! struct Main {
//!     Header  hdr;
//!     Chunk   chunks[COUNT];
//! };
//! ```
//!
//! - Built-in types: `int8/16/32/64`, `uint8/16/32/64`, `float`, `double`, `char`, `char16`,
//!   `char64`, `charN` (N one-byte chars), `strz`, `strz16`, `strz64`, `nibbleN`.
//! - `name:bits` declares an integer bitfield, read MSB-first.
//! - `= literal` constrains a field; a mismatch fails the enclosing struct.
//! - `[expr]` array lengths and `if (expr)` conditions are evaluated while decoding and may
//!   name fields decoded earlier or `#define`s.
//! - `struct X : inherits Y` makes `X` a specialization of `Y`; a `Y` field decodes as the
//!   first specialization whose constrained fields match the data.
//!
//! ## Usage
//!
//! ```
//! use structmap::{compile, CompileOptions, Decoder, DecodeOptions, ExprEvaluator};
//!
//! let compiled = compile("struct Main { uint16 id; uint8 flags; };", &CompileOptions::default());
//! assert!(compiled.success());
//! let evaluator = ExprEvaluator::new();
//! let mut trace = Vec::new();
//! let done = Decoder::new(&compiled.map, &evaluator)
//!     .decode(&[0x34, 0x12, 0x01], &DecodeOptions::default(), &mut trace)
//!     .unwrap();
//! assert_eq!(done.consumed, 3);
//! assert_eq!(String::from_utf8(trace).unwrap(), "id = 4660 (0x1234)\nflags = 1 (0x01)\n");
//! ```

pub mod ast;
pub mod compiler;
pub mod cursor;
pub mod decoder;
pub mod expr;
pub mod format;
pub mod lexer;
pub mod sniff;
pub mod value;
pub mod walk;

pub use ast::{StructDef, StructId, StructMap};
pub use compiler::{compile, Compilation, CompileError, CompileOptions};
pub use cursor::{BitCursor, Endianness};
pub use decoder::{visualise, DecodeError, DecodeOptions, Decoded, Decoder};
pub use expr::{EvalError, Evaluator, ExprEvaluator, Number, Resolver};
pub use sniff::{identify, Candidate};
pub use value::Scalar;
