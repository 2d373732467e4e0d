//! # Antigravity Capture
//!
//! Tools for inspecting what the Antigravity desktop application exchanges
//! with its local language server and keeps on disk.
//!
//! ## Features
//!
//! - mitmproxy capture driver (`agcapture start`)
//! - Native reverse proxy that saves matching gRPC responses (`agcapture serve`)
//! - Schema-less payload decoding with a string-extraction fallback
//! - Read-only dump of the `state.vscdb` key/value store (`agstate`)
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐      ┌──────────────────────┐      ┌─────────────────┐
//! │ Antigravity│─────▶│ proxy (hook + server)│─────▶│ language server │
//! └────────────┘      └──────────┬───────────┘      └─────────────────┘
//!                                │ .bin / .json / .txt
//!                                ▼
//!                     ┌──────────────────────┐
//!                     │ storage (capture dir)│◀── decode / list
//!                     └──────────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod decode;
pub mod extract;
pub mod inspect;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod storage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
