use crate::extract::render_strings;
use crate::models::{CaptureEntry, CaptureMetadata, CaptureStem};
use anyhow::Context;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extensions `list_captures` reports: mitmproxy flow dumps and raw bodies.
const LISTED_EXTENSIONS: [&str; 2] = ["flow", "bin"];

/// Writer and lister for one capture directory.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating capture directory {:?}", dir))?;
        }
        Ok(Self { dir })
    }

    /// Refer to a directory without creating it. Listing a missing directory
    /// yields nothing.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path mitmproxy should write its flow dump to for a session started at `unix_secs`.
    pub fn session_flow_path(&self, unix_secs: i64) -> PathBuf {
        self.dir.join(format!("session_{unix_secs}.flow"))
    }

    pub fn write_body(&self, stem: &CaptureStem, body: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(stem.body_name());
        fs::write(&path, body).with_context(|| format!("writing capture body {:?}", path))?;
        Ok(path)
    }

    pub fn write_metadata(
        &self,
        stem: &CaptureStem,
        metadata: &CaptureMetadata,
    ) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(stem.metadata_name());
        let payload = serde_json::to_string_pretty(metadata)?;
        fs::write(&path, payload).with_context(|| format!("writing metadata {:?}", path))?;
        Ok(path)
    }

    pub fn write_strings(&self, stem: &CaptureStem, strings: &[String]) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(stem.strings_name());
        fs::write(&path, render_strings(strings))
            .with_context(|| format!("writing strings {:?}", path))?;
        Ok(path)
    }

    /// All `*.flow` and `*.bin` files, sorted by name.
    pub fn list_captures(&self) -> anyhow::Result<Vec<CaptureEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading capture directory {:?}", self.dir))
            }
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            let listed = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| LISTED_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if !listed {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            entries.push(CaptureEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size_bytes: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
