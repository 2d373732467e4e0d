//! mitmproxy capture driver
//!
//! Runs mitmproxy in upstream mode in front of the language server and
//! waits for it. Rerouting the application's traffic through the proxy is
//! left to the operator.

use crate::config::CaptureConfig;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// How long mitmproxy gets to flush its flow file after Ctrl+C before it is killed.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("`{program}` not found on PATH (install mitmproxy: pip install mitmproxy)")]
    ProxyNotFound { program: String },
    #[error("capture proxy I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub enum CaptureOutcome {
    /// The proxy exited on its own
    Exited(ExitStatus),
    /// The operator pressed Ctrl+C
    Interrupted,
}

#[derive(Debug)]
pub struct CaptureSession {
    pub flow_file: PathBuf,
    pub outcome: CaptureOutcome,
}

/// Fully-resolved mitmproxy command line.
#[derive(Debug, Clone)]
pub struct MitmproxyInvocation {
    pub program: String,
    pub upstream: String,
    pub ssl_insecure: bool,
    pub flow_filter: String,
    pub output: PathBuf,
    /// Time the proxy gets to exit on its own after an interrupt
    pub interrupt_grace: Duration,
}

impl MitmproxyInvocation {
    pub fn new(config: &CaptureConfig, output: impl Into<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            upstream: config.upstream.clone(),
            ssl_insecure: config.ssl_insecure,
            flow_filter: config.flow_filter.clone(),
            output: output.into(),
            interrupt_grace: INTERRUPT_GRACE,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--mode".to_string(), format!("upstream:{}", self.upstream)];
        if self.ssl_insecure {
            args.push("--ssl-insecure".to_string());
        }
        args.push("-w".to_string());
        args.push(self.output.to_string_lossy().into_owned());
        if !self.flow_filter.is_empty() {
            args.push("--set".to_string());
            args.push(format!("flow_filter={}", self.flow_filter));
        }
        args
    }

    /// Human-readable command line for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Run the proxy until it exits or Ctrl+C is pressed.
    pub async fn run(self) -> Result<CaptureSession, CaptureError> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run the proxy until it exits or `interrupt` resolves.
    pub async fn run_until<F>(self, interrupt: F) -> Result<CaptureSession, CaptureError>
    where
        F: std::future::Future<Output = ()>,
    {
        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    CaptureError::ProxyNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    CaptureError::Io(e)
                }
            })?;

        tracing::info!("Capture proxy started (pid {:?})", child.id());

        let outcome = tokio::select! {
            status = child.wait() => CaptureOutcome::Exited(status?),
            _ = interrupt => {
                // mitmproxy shares our process group and usually got the same SIGINT.
                match tokio::time::timeout(self.interrupt_grace, child.wait()).await {
                    Ok(status) => {
                        tracing::debug!("Capture proxy exited after interrupt: {:?}", status?);
                    }
                    Err(_) => {
                        tracing::warn!("Capture proxy still running after interrupt, killing it");
                        child.kill().await?;
                    }
                }
                CaptureOutcome::Interrupted
            }
        };

        Ok(CaptureSession {
            flow_file: self.output,
            outcome,
        })
    }
}
