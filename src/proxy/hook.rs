//! Capture hook
//!
//! Decides which flows are interesting and persists their response bodies.

use crate::config::HookConfig;
use crate::extract::extract_strings;
use crate::models::{CaptureMetadata, CaptureRecord, CaptureStem, ResponseFlow};
use crate::storage::CaptureStore;
use chrono::Local;
use std::sync::atomic::{AtomicU64, Ordering};

/// Substring filter over request paths. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFilter {
    needles: Vec<String>,
}

impl PathFilter {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(Into::<String>::into)
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.needles.is_empty() || self.needles.iter().any(|n| path.contains(n.as_str()))
    }
}

/// Persists matching responses as `.bin` / `.json` / `.txt` triples.
pub struct CaptureHook {
    store: CaptureStore,
    response_filter: PathFilter,
    request_filter: PathFilter,
    min_string_len: usize,
    captured: AtomicU64,
    saved: AtomicU64,
}

impl CaptureHook {
    pub fn new(store: CaptureStore, config: &HookConfig) -> Self {
        Self {
            store,
            response_filter: PathFilter::new(config.response_paths.iter().cloned()),
            request_filter: PathFilter::new(config.request_paths.iter().cloned()),
            min_string_len: config.min_string_len,
            captured: AtomicU64::new(0),
            saved: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    /// Number of matching responses seen so far, including empty ones.
    pub fn capture_count(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Number of responses whose body and metadata were written.
    pub fn saved_count(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    pub fn wants_response(&self, path: &str) -> bool {
        self.response_filter.matches(path)
    }

    pub fn on_request(&self, method: &str, path: &str) {
        if self.request_filter.matches(path) {
            tracing::info!("Request: {} {}", method, path);
        }
    }

    /// Persist `flow` if it matches. Returns what was written.
    ///
    /// Write failures are logged and never propagate: the proxy keeps
    /// forwarding regardless of what happens to the capture.
    pub fn on_response(&self, flow: &ResponseFlow<'_>) -> Option<CaptureRecord> {
        if !self.wants_response(flow.path) {
            return None;
        }
        let seq = self.captured.fetch_add(1, Ordering::Relaxed) + 1;

        if flow.body.is_empty() {
            tracing::debug!("Skipping empty response body for {}", flow.path);
            return None;
        }

        let now = Local::now();
        let stem = CaptureStem::new(now, seq);

        let body_path = match self.store.write_body(&stem, flow.body) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Failed to save capture {}: {:#}", stem, e);
                return None;
            }
        };

        let metadata = CaptureMetadata::from_flow(flow, &stem, now);
        let metadata_path = match self.store.write_metadata(&stem, &metadata) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Failed to save metadata for {}: {:#}", stem, e);
                return None;
            }
        };

        self.saved.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Captured: {} ({} bytes)", stem.body_name(), flow.body.len());

        let strings = extract_strings(flow.body, self.min_string_len);
        let strings_path = if strings.is_empty() {
            None
        } else {
            match self.store.write_strings(&stem, &strings) {
                Ok(path) => {
                    tracing::info!("Extracted {} strings", strings.len());
                    Some(path)
                }
                Err(e) => {
                    tracing::warn!("String extraction failed for {}: {:#}", stem, e);
                    None
                }
            }
        };

        Some(CaptureRecord {
            stem,
            body_path,
            metadata_path,
            string_count: strings_path.as_ref().map_or(0, |_| strings.len()),
            strings_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CASCADE_PATH: &str =
        "/exa.language_server_pb.LanguageServerService/StreamCascadeReactiveUpdates";

    fn hook_in(dir: &std::path::Path) -> CaptureHook {
        let store = CaptureStore::open(dir).expect("store opens");
        CaptureHook::new(store, &HookConfig::default())
    }

    fn flow<'a>(path: &'a str, body: &'a [u8]) -> ResponseFlow<'a> {
        ResponseFlow {
            method: "POST",
            path,
            status: 200,
            content_type: Some("application/grpc"),
            body,
        }
    }

    #[test]
    fn path_filter_matches_substrings() {
        let filter = PathFilter::new(["GetCascade", "HandleAsync"]);
        assert!(filter.matches("/svc/GetCascadeTrajectory"));
        assert!(filter.matches("/svc/HandleAsync"));
        assert!(!filter.matches("/svc/GetUserStatus"));
        assert!(!filter.matches("/svc/getcascade"));
    }

    #[test]
    fn empty_path_filter_matches_all() {
        assert!(PathFilter::new(Vec::<String>::new()).matches("/anything"));
        assert!(PathFilter::new([""]).matches("/anything"));
    }

    #[test]
    fn matching_response_writes_triple() {
        let dir = tempdir().unwrap();
        let hook = hook_in(dir.path());
        let body = b"\x00\x00\x00\x00\x20cascade-7f3a9e21-title\x12\x02ok";

        let record = hook
            .on_response(&flow(CASCADE_PATH, body))
            .expect("captured");

        assert!(record.stem.as_str().starts_with("capture_"));
        assert!(record.stem.as_str().ends_with("_1"));
        assert_eq!(fs::read(&record.body_path).unwrap(), body);

        let meta: CaptureMetadata =
            serde_json::from_str(&fs::read_to_string(&record.metadata_path).unwrap()).unwrap();
        assert_eq!(meta.path, CASCADE_PATH);
        assert_eq!(meta.size_bytes, body.len());
        assert_eq!(meta.content_type, "application/grpc");

        let strings_path = record.strings_path.expect("strings written");
        assert_eq!(
            fs::read_to_string(strings_path).unwrap(),
            " cascade-7f3a9e21-title"
        );
        assert_eq!(record.string_count, 1);
    }

    #[test]
    fn non_matching_response_is_ignored() {
        let dir = tempdir().unwrap();
        let hook = hook_in(dir.path());

        assert!(hook
            .on_response(&flow("/svc/GetUserStatus", b"payload-bytes"))
            .is_none());
        assert_eq!(hook.capture_count(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_body_advances_counter_without_writing() {
        let dir = tempdir().unwrap();
        let hook = hook_in(dir.path());

        assert!(hook.on_response(&flow(CASCADE_PATH, b"")).is_none());
        assert_eq!(hook.capture_count(), 1);
        assert_eq!(hook.saved_count(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let record = hook
            .on_response(&flow(CASCADE_PATH, b"short"))
            .expect("captured");
        assert!(record.stem.as_str().ends_with("_2"));
        assert_eq!(hook.capture_count(), 2);
        assert_eq!(hook.saved_count(), 1);
    }

    #[test]
    fn body_without_long_strings_skips_txt() {
        let dir = tempdir().unwrap();
        let hook = hook_in(dir.path());

        let record = hook
            .on_response(&flow(CASCADE_PATH, b"\x01abc\x02def"))
            .expect("captured");
        assert!(record.strings_path.is_none());
        assert_eq!(record.string_count, 0);
        assert!(!dir.path().join(record.stem.strings_name()).exists());
    }

    #[test]
    fn write_failure_does_not_panic() {
        let dir = tempdir().unwrap();
        let hook = hook_in(&dir.path().join("caps"));
        fs::remove_dir(dir.path().join("caps")).unwrap();

        assert!(hook
            .on_response(&flow(CASCADE_PATH, b"some-long-body-text"))
            .is_none());
        assert_eq!(hook.capture_count(), 1);
        assert_eq!(hook.saved_count(), 0);
    }
}
