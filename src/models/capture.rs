//! Capture model
//!
//! A capture is one intercepted response body persisted as a `.bin` file,
//! accompanied by a `.json` metadata record and an optional `.txt` file of
//! extracted strings. All three share a [`CaptureStem`].

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Content type recorded when the response carried none.
pub const UNKNOWN_CONTENT_TYPE: &str = "unknown";

/// Shared file stem of a capture triple: `capture_<YYYYmmdd_HHMMSS>_<seq>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureStem(String);

impl CaptureStem {
    pub fn new(at: DateTime<Local>, seq: u64) -> Self {
        Self(format!("capture_{}_{}", at.format("%Y%m%d_%H%M%S"), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw response body
    pub fn body_name(&self) -> String {
        format!("{}.bin", self.0)
    }

    /// JSON metadata record
    pub fn metadata_name(&self) -> String {
        format!("{}.json", self.0)
    }

    /// Extracted strings
    pub fn strings_name(&self) -> String {
        format!("{}.txt", self.0)
    }
}

impl fmt::Display for CaptureStem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Borrowed view of one intercepted response, as handed to the capture hook.
#[derive(Debug, Clone, Copy)]
pub struct ResponseFlow<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub status: u16,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

/// Metadata sidecar written next to every captured body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Local wall-clock time of the capture, ISO-8601 with microseconds
    pub timestamp: String,
    pub path: String,
    pub method: String,
    pub status: u16,
    pub content_type: String,
    pub size_bytes: usize,
    /// File name of the raw body this record describes
    pub filename: String,
}

impl CaptureMetadata {
    pub fn from_flow(flow: &ResponseFlow<'_>, stem: &CaptureStem, at: DateTime<Local>) -> Self {
        Self {
            timestamp: at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            path: flow.path.to_string(),
            method: flow.method.to_string(),
            status: flow.status,
            content_type: flow
                .content_type
                .unwrap_or(UNKNOWN_CONTENT_TYPE)
                .to_string(),
            size_bytes: flow.body.len(),
            filename: stem.body_name(),
        }
    }
}

/// Files written for one capture.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub stem: CaptureStem,
    pub body_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Absent when no string met the threshold or the sidecar could not be written
    pub strings_path: Option<PathBuf>,
    pub string_count: usize,
}

/// A capture file found in the capture directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEntry {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}
