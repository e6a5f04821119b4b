//! # Persistence Module
//!
//! ## Why This Module Exists
//! The agent must never lose a sample just because the network is down. Every sample
//! produced by the resilience loop is written to a plain text file on the device before
//! any attempt is made to send it to the broker. This module owns that file and the
//! [`Sample`] type that flows through it.
//!
//! ## Key Abstractions
//! - **Sample**: a strictly increasing counter value, one per publish period
//! - **LocalBuffer**: an append-only text file, one sample per line, truncated at startup
//!
//! ## Error Handling Strategy
//! File errors surface as [`BufferError`] values. The resilience loop logs them and keeps
//! running, so a full or read-only filesystem degrades the agent instead of stopping it.

pub mod local_buffer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

pub use local_buffer::{BufferError, LocalBuffer};

/// One unit of telemetry.
///
/// ## Design Rationale
/// The value is a plain counter rather than a sensor reading so that gaps and duplicates
/// are visible in the persisted file and on the broker feed. The first sample is `1`;
/// each publish period produces the successor of the previous one, whether or not the
/// previous one reached the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sample(u64);

impl Sample {
    pub fn first() -> Self {
        Sample(1)
    }

    pub fn next(self) -> Self {
        Sample(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Payload sent to the broker feed.
    pub fn to_payload(self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }
}

impl From<u64> for Sample {
    fn from(value: u64) -> Self {
        Sample(value)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Sample {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_count_up_from_one() {
        let first = Sample::first();
        assert_eq!(first.value(), 1);
        assert_eq!(first.next().next().value(), 3);
    }

    #[test]
    fn payload_is_decimal_text() {
        assert_eq!(Sample::from(42).to_payload(), b"42".to_vec());
    }

    #[test]
    fn parses_lines_with_trailing_whitespace() {
        assert_eq!("17 \n".parse::<Sample>().unwrap(), Sample::from(17));
        assert!("seventeen".parse::<Sample>().is_err());
    }
}
