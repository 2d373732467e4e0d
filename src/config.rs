//! Configuration
//!
//! Every setting has a default matching the Antigravity layout, so the tools
//! run without a config file. A TOML file can override any subset:
//!
//! ```toml
//! capture_dir = "history_dump/grpc_captures"
//!
//! [hook]
//! listen = "127.0.0.1:43406"
//! upstream = "http://127.0.0.1:43405"
//! response_paths = ["StreamCascadeReactiveUpdates", "GetCascade"]
//!
//! [inspect]
//! key_prefix = "chat."
//! ```

use crate::extract::{DECODE_MIN_LEN, HOOK_MIN_LEN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Local endpoint of the Antigravity language server.
pub const LANGUAGE_SERVER_ADDR: &str = "127.0.0.1:43405";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding flow dumps, captures and decoded sidecars
    pub capture_dir: PathBuf,
    pub capture: CaptureConfig,
    pub hook: HookConfig,
    pub decode: DecodeConfig,
    pub inspect: InspectConfig,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capture_dir: PathBuf::from("history_dump").join("grpc_captures"),
            capture: CaptureConfig::default(),
            hook: HookConfig::default(),
            decode: DecodeConfig::default(),
            inspect: InspectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// mitmproxy invocation used by `agcapture start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub program: String,
    /// Upstream mitmproxy forwards intercepted traffic to
    pub upstream: String,
    /// Skip upstream certificate verification (the language server is self-signed)
    pub ssl_insecure: bool,
    /// mitmproxy flow filter expression; empty disables filtering
    pub flow_filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "mitmproxy".to_string(),
            upstream: format!("https://{LANGUAGE_SERVER_ADDR}"),
            ssl_insecure: true,
            flow_filter: "~u StreamCascade".to_string(),
        }
    }
}

/// Native capture proxy used by `agcapture serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub listen: String,
    /// Plain-text upstream base URL, e.g. `http://127.0.0.1:43405`
    pub upstream: String,
    /// Speak HTTP/2 with prior knowledge to the upstream (gRPC over h2c)
    pub upstream_http2: bool,
    /// Responses whose path contains any of these are captured
    pub response_paths: Vec<String>,
    /// Requests whose path contains any of these are logged
    pub request_paths: Vec<String>,
    pub min_string_len: usize,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:43406".to_string(),
            upstream: format!("http://{LANGUAGE_SERVER_ADDR}"),
            upstream_http2: true,
            response_paths: vec![
                "StreamCascadeReactiveUpdates".to_string(),
                "GetCascade".to_string(),
                "HandleAsync".to_string(),
            ],
            request_paths: vec!["Cascade".to_string()],
            min_string_len: HOOK_MIN_LEN,
        }
    }
}

/// Disassembler used by `agcapture decode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub program: String,
    /// Flag preceding the input file path
    pub input_flag: String,
    /// Threshold for the string-extraction fallback
    pub min_string_len: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            program: "protoscope".to_string(),
            input_flag: "-I".to_string(),
            min_string_len: DECODE_MIN_LEN,
        }
    }
}

/// State database dump used by `agstate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    pub database: PathBuf,
    pub table: String,
    pub key_prefix: String,
    /// Characters of each decoded value to print
    pub preview_chars: usize,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            database: default_state_db(),
            table: "ItemTable".to_string(),
            key_prefix: "chat.".to_string(),
            preview_chars: 200,
        }
    }
}

/// `<config_dir>/Antigravity/User/globalStorage/state.vscdb`
pub fn default_state_db() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Antigravity")
        .join("User")
        .join("globalStorage")
        .join("state.vscdb")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    pub level: String,
    /// Also write daily-rotated log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
