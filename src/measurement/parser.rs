//! Line protocol parser for acquisition output.
//!
//! The acquisition process emits one sample per line in any of these equivalent,
//! case-insensitive forms:
//!
//! ```text
//! 序号<N>,直径<D>
//! 序号: <N>, 直径: <D>
//! No: <N>, Diameter: <D>
//! ```
//!
//! Patterns are tried in that order and the first match wins. Full-width
//! punctuation (`，` `：`) is accepted wherever its ASCII counterpart is, and a
//! trailing `mm` unit is ignored.
//!
//! Parsing is pure: no state, no I/O, safe to call from any thread.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use super::sample::ParsedSample;

/// Decimal number: `17`, `17.70`, `.5`, `-0.25`, `1.2e1`.
macro_rules! decimal {
    () => {
        r"([-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)"
    };
}

/// Primary form: `序号<N>,直径<D>`
static PRIMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^序号\s*(\d+)\s*[,，]\s*直径\s*",
        decimal!(),
        r"\s*(?:mm)?$"
    ))
    .expect("Invalid primary line pattern")
});

/// Labelled form: `序号: <N>, 直径: <D>`
static LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^序号\s*[:：]\s*(\d+)\s*[,，;；]\s*直径\s*[:：]\s*",
        decimal!(),
        r"\s*(?:mm)?$"
    ))
    .expect("Invalid labelled line pattern")
});

/// English form: `No: <N>, Diameter: <D>`
static ENGLISH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^no\.?\s*[:：]?\s*(\d+)\s*[,，;；]\s*diameter\s*[:：]?\s*",
        decimal!(),
        r"\s*(?:mm)?$"
    ))
    .expect("Invalid English line pattern")
});

/// Why a non-blank line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line matched none of the accepted forms.
    #[error("unrecognized line format")]
    NoMatch,
    /// A pattern matched but a field did not convert.
    #[error("invalid {field} value '{value}'")]
    InvalidNumber {
        /// Field name ("sequence" or "diameter").
        field: &'static str,
        /// Raw text of the field.
        value: String,
    },
}

/// Parse one line with the given depth step.
///
/// Returns `Ok(None)` for blank lines, `Ok(Some(sample))` on a match and
/// `Err(ParseError)` otherwise.
pub fn parse_line(line: &str, depth_step: f64) -> Result<Option<ParsedSample>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let captures = [&*PRIMARY, &*LABELLED, &*ENGLISH]
        .iter()
        .find_map(|pattern| pattern.captures(line))
        .ok_or(ParseError::NoMatch)?;

    let sequence_text = &captures[1];
    let sequence: u64 = sequence_text
        .parse()
        .map_err(|_| ParseError::InvalidNumber {
            field: "sequence",
            value: sequence_text.to_string(),
        })?;

    let diameter_text = &captures[2];
    let diameter = diameter_text
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber {
            field: "diameter",
            value: diameter_text.to_string(),
        })?;

    Ok(Some(ParsedSample::new(sequence, diameter, depth_step)))
}

/// Parser bound to a fixed depth step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineParser {
    depth_step: f64,
}

impl LineParser {
    /// Create a parser deriving `depth = sequence * depth_step`.
    pub fn new(depth_step: f64) -> Self {
        Self { depth_step }
    }

    /// Depth increment per sequence number.
    pub fn depth_step(&self) -> f64 {
        self.depth_step
    }

    /// See [`parse_line`].
    pub fn parse(&self, line: &str) -> Result<Option<ParsedSample>, ParseError> {
        parse_line(line, self.depth_step)
    }
}
