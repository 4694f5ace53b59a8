//! Measurement samples and the acquisition line protocol.
//!
//! The acquisition process prints one `(sequence, diameter)` pair per line. The
//! [`parser`] turns those lines into [`ParsedSample`] values with a depth derived
//! from the sequence number.

pub mod parser;
pub mod sample;

pub use parser::{parse_line, LineParser, ParseError};
pub use sample::ParsedSample;
