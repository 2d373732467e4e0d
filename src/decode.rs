//! Captured payload decoding
//!
//! Schema-less disassembly through an external tool (protoscope by default),
//! with printable-string extraction as the fallback when the tool is missing
//! or rejects the input. Each invocation writes exactly one sidecar next to
//! the input: `<name>.decoded.txt` or `<name>.strings.txt`.

use crate::config::DecodeConfig;
use crate::extract::{extract_strings, render_strings};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisassembleError {
    #[error("disassembler `{program}` not found on PATH")]
    ToolNotFound { program: String },
    #[error("disassembler `{program}` failed with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to run disassembler `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot read capture {path:?}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Disassembler(#[from] DisassembleError),
    #[error("cannot write {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// External schema-less protobuf disassembler.
#[derive(Debug, Clone)]
pub struct Disassembler {
    program: String,
    input_flag: String,
}

impl Disassembler {
    pub fn new(program: impl Into<String>, input_flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            input_flag: input_flag.into(),
        }
    }

    pub fn from_config(config: &DecodeConfig) -> Self {
        Self::new(&config.program, &config.input_flag)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the tool on `input` and return its standard output.
    pub fn disassemble(&self, input: &Path) -> Result<String, DisassembleError> {
        let mut cmd = Command::new(&self.program);
        if !self.input_flag.is_empty() {
            cmd.arg(&self.input_flag);
        }
        cmd.arg(input);

        let output = cmd.output().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                DisassembleError::ToolNotFound {
                    program: self.program.clone(),
                }
            } else {
                DisassembleError::Io {
                    program: self.program.clone(),
                    source,
                }
            }
        })?;

        if !output.status.success() {
            return Err(DisassembleError::ToolFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for Disassembler {
    fn default() -> Self {
        Self::from_config(&DecodeConfig::default())
    }
}

/// Which sidecar a decode produced.
#[derive(Debug)]
pub enum DecodeOutcome {
    Disassembled {
        output: PathBuf,
    },
    Strings {
        output: PathBuf,
        count: usize,
        /// Why the disassembler was not used
        reason: DisassembleError,
    },
}

impl DecodeOutcome {
    pub fn output(&self) -> &Path {
        match self {
            DecodeOutcome::Disassembled { output } => output,
            DecodeOutcome::Strings { output, .. } => output,
        }
    }
}

/// `capture.bin` -> `capture.decoded.txt`
pub fn decoded_path(input: &Path) -> PathBuf {
    input.with_extension("decoded.txt")
}

/// `capture.bin` -> `capture.strings.txt`
pub fn strings_path(input: &Path) -> PathBuf {
    input.with_extension("strings.txt")
}

/// Decode a capture file, falling back to string extraction when the
/// disassembler is missing or exits non-zero.
pub fn decode_capture(
    input: &Path,
    disassembler: &Disassembler,
    min_len: usize,
) -> Result<DecodeOutcome, DecodeError> {
    fs::metadata(input).map_err(|source| DecodeError::Input {
        path: input.to_path_buf(),
        source,
    })?;

    let reason = match disassembler.disassemble(input) {
        Ok(text) => {
            let output = decoded_path(input);
            write_output(&output, text.as_bytes())?;
            tracing::info!("Decoded {} with {}", input.display(), disassembler.program());
            return Ok(DecodeOutcome::Disassembled { output });
        }
        Err(err @ DisassembleError::ToolNotFound { .. })
        | Err(err @ DisassembleError::ToolFailed { .. }) => err,
        Err(err) => return Err(err.into()),
    };

    tracing::warn!("{reason}; falling back to string extraction");

    let data = fs::read(input).map_err(|source| DecodeError::Input {
        path: input.to_path_buf(),
        source,
    })?;
    let strings = extract_strings(&data, min_len);
    let output = strings_path(input);
    write_output(&output, render_strings(&strings).as_bytes())?;

    Ok(DecodeOutcome::Strings {
        output,
        count: strings.len(),
        reason,
    })
}

fn write_output(path: &Path, contents: &[u8]) -> Result<(), DecodeError> {
    fs::write(path, contents).map_err(|source| DecodeError::Output {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DECODE_MIN_LEN;
    use tempfile::tempdir;

    const PAYLOAD: &[u8] = b"\x0a\x05hello\x12\x0bcascade-id-1\x00\x01ab";

    fn write_capture(dir: &Path) -> PathBuf {
        let path = dir.join("capture_20250101_000000_1.bin");
        fs::write(&path, PAYLOAD).unwrap();
        path
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn sidecar_paths_replace_extension() {
        let input = Path::new("/caps/capture_1.bin");
        assert_eq!(decoded_path(input), PathBuf::from("/caps/capture_1.decoded.txt"));
        assert_eq!(strings_path(input), PathBuf::from("/caps/capture_1.strings.txt"));
        assert_eq!(
            strings_path(Path::new("/caps/raw")),
            PathBuf::from("/caps/raw.strings.txt")
        );
    }

    #[test]
    fn missing_tool_falls_back_to_strings() {
        let dir = tempdir().unwrap();
        let input = write_capture(dir.path());
        let tool = Disassembler::new("definitely-not-a-real-disassembler-1f2e", "-I");

        let outcome = decode_capture(&input, &tool, DECODE_MIN_LEN).expect("decode ok");

        match &outcome {
            DecodeOutcome::Strings { count, reason, .. } => {
                assert_eq!(*count, 2);
                assert!(matches!(reason, DisassembleError::ToolNotFound { .. }));
            }
            other => panic!("expected string fallback, got {other:?}"),
        }
        let written = fs::read_to_string(outcome.output()).unwrap();
        assert_eq!(
            written,
            render_strings(&extract_strings(PAYLOAD, DECODE_MIN_LEN))
        );
        assert!(!decoded_path(&input).exists());
    }

    #[cfg(unix)]
    #[test]
    fn successful_tool_writes_decoded_only() {
        let dir = tempdir().unwrap();
        let input = write_capture(dir.path());
        let tool_path = fake_tool(dir.path(), "protoscope", "echo \"1: {\\\"hello\\\"} $1\"");
        let tool = Disassembler::new(tool_path.to_string_lossy(), "-I");

        let outcome = decode_capture(&input, &tool, DECODE_MIN_LEN).expect("decode ok");

        assert!(matches!(outcome, DecodeOutcome::Disassembled { .. }));
        let decoded = fs::read_to_string(decoded_path(&input)).unwrap();
        assert_eq!(decoded, "1: {\"hello\"} -I\n");
        assert!(!strings_path(&input).exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_falls_back_to_strings() {
        let dir = tempdir().unwrap();
        let input = write_capture(dir.path());
        let tool_path = fake_tool(dir.path(), "protoscope", "echo 'bad wire type' >&2\nexit 3");
        let tool = Disassembler::new(tool_path.to_string_lossy(), "-I");

        let outcome = decode_capture(&input, &tool, DECODE_MIN_LEN).expect("decode ok");

        match outcome {
            DecodeOutcome::Strings { reason, .. } => match reason {
                DisassembleError::ToolFailed { stderr, status, .. } => {
                    assert_eq!(stderr, "bad wire type");
                    assert_eq!(status.code(), Some(3));
                }
                other => panic!("unexpected reason {other:?}"),
            },
            other => panic!("expected string fallback, got {other:?}"),
        }
        assert!(strings_path(&input).exists());
        assert!(!decoded_path(&input).exists());
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("absent.bin");
        let err = decode_capture(&input, &Disassembler::default(), DECODE_MIN_LEN).unwrap_err();
        assert!(matches!(err, DecodeError::Input { .. }));
        assert!(!strings_path(&input).exists());
    }
}
