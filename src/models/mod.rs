//! Data models for captured traffic
//!
//! Plain values shared by the capture hook, the capture store and the CLI.

pub mod capture;

pub use capture::*;
