//! Capture Antigravity session data from the local language server.
//!
//! Usage:
//! ```text
//! agcapture start            # mitmproxy in front of 127.0.0.1:43405
//! agcapture serve            # native capture proxy on 127.0.0.1:43406
//! agcapture decode <file>    # protoscope, or string extraction fallback
//! agcapture list             # captures in the capture directory
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use antigravity_capture::capture::{CaptureOutcome, MitmproxyInvocation};
use antigravity_capture::config::Settings;
use antigravity_capture::decode::{decode_capture, DecodeOutcome, Disassembler};
use antigravity_capture::logging::init_tracing;
use antigravity_capture::proxy::{run_server, CaptureHook};
use antigravity_capture::storage::CaptureStore;
use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "agcapture", version)]
#[command(about = "Capture and decode Antigravity gRPC session traffic")]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true, env = "AGCAPTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the capture directory
    #[arg(long, global = true, env = "AGCAPTURE_DIR")]
    capture_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start mitmproxy in upstream mode in front of the language server
    Start,
    /// Run the native capture proxy and save matching responses
    Serve,
    /// Decode a captured protobuf payload
    Decode {
        /// Capture file to decode
        file: PathBuf,
    },
    /// List captures
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.capture_dir {
        settings.capture_dir = dir;
    }
    let _log_guard = init_tracing(&settings.logging, cli.verbose);

    match cli.command {
        Command::Start => start_capture(&settings).await,
        Command::Serve => serve_captures(&settings).await,
        Command::Decode { file } => decode(&settings, file),
        Command::List => list_captures(&settings),
    }
}

async fn start_capture(settings: &Settings) -> anyhow::Result<()> {
    let store = CaptureStore::open(&settings.capture_dir)?;
    let flow_file = store.session_flow_path(chrono::Utc::now().timestamp());
    let invocation = MitmproxyInvocation::new(&settings.capture, &flow_file);

    println!("🔌 Starting gRPC capture proxy...");
    println!("   Listening on port 8080");
    println!("   Forwarding to {}", settings.capture.upstream);
    println!();
    println!("⚠️  You need to redirect Antigravity's gRPC traffic to this proxy.");
    println!("   Option 1: Set HTTPS_PROXY=http://localhost:8080 before starting Antigravity");
    println!("   Option 2: Use iptables to redirect 43405 -> 8080");
    println!();
    println!("📁 Saving to: {}", flow_file.display());
    println!("🚀 Running: {}", invocation.command_line());
    println!();
    println!("Press Ctrl+C to stop capture");

    let session = invocation.run().await?;
    match session.outcome {
        CaptureOutcome::Interrupted => {
            println!();
            println!("✅ Capture stopped");
            println!("📁 Saved to: {}", session.flow_file.display());
        }
        CaptureOutcome::Exited(status) if status.success() => {
            println!("📁 Saved to: {}", session.flow_file.display());
        }
        CaptureOutcome::Exited(status) => {
            tracing::warn!("Capture proxy exited with {}", status);
        }
    }
    Ok(())
}

async fn serve_captures(settings: &Settings) -> anyhow::Result<()> {
    let store = CaptureStore::open(&settings.capture_dir)?;
    println!("🎯 Capturing to {}", store.dir().display());
    println!(
        "   Redirect traffic, e.g.: iptables -t nat -A OUTPUT -p tcp --dport 43405 -j REDIRECT --to-port {}",
        settings
            .hook
            .listen
            .rsplit(':')
            .next()
            .unwrap_or(settings.hook.listen.as_str())
    );

    let hook = Arc::new(CaptureHook::new(store, &settings.hook));
    run_server(&settings.hook, hook.clone()).await?;

    println!(
        "✅ Saved {} of {} matching responses",
        hook.saved_count(),
        hook.capture_count()
    );
    Ok(())
}

fn decode(settings: &Settings, file: PathBuf) -> anyhow::Result<()> {
    println!("📖 Decoding: {}", file.display());

    let disassembler = Disassembler::from_config(&settings.decode);
    let outcome = decode_capture(&file, &disassembler, settings.decode.min_string_len)
        .with_context(|| format!("decoding {}", file.display()))?;

    match outcome {
        DecodeOutcome::Disassembled { output } => {
            println!("✅ Decoded with {}: {}", disassembler.program(), output.display());
        }
        DecodeOutcome::Strings {
            output,
            count,
            reason,
        } => {
            println!("⚠️  {reason}");
            println!("🔍 Extracted {} strings: {}", count, output.display());
        }
    }
    Ok(())
}

fn list_captures(settings: &Settings) -> anyhow::Result<()> {
    let store = CaptureStore::at(&settings.capture_dir);
    let captures = store.list_captures()?;
    if captures.is_empty() {
        println!("📭 No captures found");
        return Ok(());
    }

    println!("📁 Captures in {}:", store.dir().display());
    for capture in captures {
        println!(
            "   {} ({} bytes)",
            capture.name,
            group_thousands(capture.size_bytes)
        );
    }
    Ok(())
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["agcapture", "decode", "capture.bin"]).unwrap();
        assert!(matches!(cli.command, Command::Decode { file } if file == PathBuf::from("capture.bin")));
        assert!(Cli::try_parse_from(["agcapture", "decode"]).is_err());
        assert!(Cli::try_parse_from(["agcapture"]).is_err());
        assert!(Cli::try_parse_from(["agcapture", "bogus"]).is_err());
    }
}
