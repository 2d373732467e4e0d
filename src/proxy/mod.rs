//! Capture proxy
//!
//! A native reverse proxy in front of the language server, with the capture
//! hook applied to every response.

pub mod hook;
pub mod server;

pub use hook::{CaptureHook, PathFilter};
pub use server::*;
