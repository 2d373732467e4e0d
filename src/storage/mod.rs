//! Capture persistence
//!
//! Captures live as flat files in one directory; see [`CaptureStore`].

mod capture_store;

pub use capture_store::*;
