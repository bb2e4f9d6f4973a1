use serde::{Deserialize, Serialize};

/// Body returned by the upload acceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "receivedBytes")]
    pub received_bytes: u64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl UploadResponse {
    /// Parse an acceptor response. Generic echo services answer with other
    /// JSON shapes, which yield `None` rather than an error.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Deterministic upload payload: `byte[i] = (i * 1103515245 + 12345) & 0xFF`.
///
/// The low byte of the sequence repeats every 256 bytes, so the body is
/// reproducible across runs but compresses easily. Acceptors are expected
/// to count raw bytes.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| {
            let value =
                (i as u64).wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (value & 0xFF) as u8
        })
        .collect()
}
