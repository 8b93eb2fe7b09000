//! Access-log ingestion: line grammar and the bounded, tail-only reader.

pub mod reader;

pub use reader::LogReader;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the trailing window read from large files (20 MiB).
pub const DEFAULT_TAIL_WINDOW_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read log file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// <ip> - - [<timestamp>] "<request>" <status> <size>, anchored at line start.
static LINE_GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip>\d+\.\d+\.\d+\.\d+) - - \[(?P<timestamp>.*?)\] "(?P<request>.*?)" (?P<status>\d+) (?P<size>\d+)"#,
    )
    .expect("log line grammar is a valid regex")
});

/// One parsed request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source_address: String,
    pub timestamp: String,
    pub request_line: String,
    pub status_code: u16,
    pub response_size: u64,
}

impl LogRecord {
    /// Parse a single line. Returns `None` unless all five fields extract cleanly.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = LINE_GRAMMAR.captures(line)?;
        let status_code = caps.name("status")?.as_str().parse().ok()?;
        let response_size = caps.name("size")?.as_str().parse().ok()?;

        Some(Self {
            source_address: caps.name("ip")?.as_str().to_string(),
            timestamp: caps.name("timestamp")?.as_str().to_string(),
            request_line: caps.name("request")?.as_str().to_string(),
            status_code,
            response_size,
        })
    }

    /// Feature vector used by the outlier detector.
    pub fn features(&self) -> [f64; 2] {
        [self.status_code as f64, self.response_size as f64]
    }
}
