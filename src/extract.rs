//! Printable-string extraction
//!
//! Pulls human-readable fragments out of opaque binary payloads. Captured gRPC
//! bodies are length-prefixed protobuf frames; field values like ids, titles
//! and message text survive as runs of printable ASCII.

/// Threshold used by `agcapture decode` when falling back to extraction.
pub const DECODE_MIN_LEN: usize = 5;

/// Threshold used by the capture hook for its `.txt` sidecar.
pub const HOOK_MIN_LEN: usize = 10;

#[inline]
fn is_printable(byte: u8) -> bool {
    (32..=126).contains(&byte)
}

/// Iterate the maximal printable runs of `data` that are at least `min_len` bytes long.
pub fn printable_runs(data: &[u8], min_len: usize) -> impl Iterator<Item = &[u8]> {
    let min_len = min_len.max(1);
    data.split(|b| !is_printable(*b))
        .filter(move |run| run.len() >= min_len)
}

/// Extract printable ASCII strings of at least `min_len` characters, in input order.
pub fn extract_strings(data: &[u8], min_len: usize) -> Vec<String> {
    printable_runs(data, min_len)
        .map(|run| run.iter().map(|&b| b as char).collect())
        .collect()
}

/// Sidecar text format: one string per line, no trailing newline.
pub fn render_strings(strings: &[String]) -> String {
    strings.join("\n")
}
