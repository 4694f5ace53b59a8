//! Parsed measurement sample.

use serde::{Deserialize, Serialize};

/// One measurement point decoded from the acquisition stream.
///
/// `depth` is always `sequence * depth_step` for the step the parser was built with;
/// it is never reported by the acquisition process itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParsedSample {
    /// Sequence number reported by the acquisition process
    pub sequence: u64,
    /// Depth derived from the sequence number
    pub depth: f64,
    /// Measured diameter
    pub diameter: f64,
}

impl ParsedSample {
    /// Build a sample, deriving depth from the sequence number.
    pub fn new(sequence: u64, diameter: f64, depth_step: f64) -> Self {
        Self {
            sequence,
            depth: sequence as f64 * depth_step,
            diameter,
        }
    }
}

impl std::fmt::Display for ParsedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} depth={:.3} diameter={:.3}",
            self.sequence, self.depth, self.diameter
        )
    }
}
