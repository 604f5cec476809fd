//! Request/response/progress envelope types exchanged across the Bridge.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Which transport a request/progress event belongs to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Ftp,
    Tcp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Ftp => "ftp",
            TransportKind::Tcp => "tcp",
        }
    }
}

/// Direction of a chunked streaming transfer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// An outbound command sent over the Bridge, keyed by `request_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: String,
    pub command: String,
    pub payload: serde_json::Value,
    pub timeout_ms: u64,
}

/// The single terminal response delivered for a [`Request`].
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct BackendResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BackendResponse {
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            message: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: None,
            message: Some(message.into()),
        }
    }
}

/// A non-terminal progress update for an in-flight request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub loaded: u64,
    pub total: u64,
    pub filename: String,
    pub direction: Direction,
    pub transport: TransportKind,
}

impl ProgressInfo {
    /// Percent complete, clamped to `0..=100`. `total == 0` reports 100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = (self.loaded.min(self.total) as f64 / self.total as f64) * 100.0;
        pct.round().clamp(0.0, 100.0) as u8
    }
}

/// Generate a request id unique within a Bridge channel's lifetime.
///
/// Format: `<prefix>_<epoch-ms>_<9-char-random>` (spec §3).
pub fn generate_request_id(prefix: &str) -> String {
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = random_alnum(9);
    format!("{prefix}_{epoch_ms}_{suffix}")
}

fn random_alnum(len: usize) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_id_has_expected_shape() {
        let id = generate_request_id("http");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "http");
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn generate_request_id_is_unique_across_calls() {
        let a = generate_request_id("tcp");
        let b = generate_request_id("tcp");
        assert_ne!(a, b);
    }

    #[test]
    fn progress_percent_handles_zero_total() {
        let p = ProgressInfo {
            loaded: 0,
            total: 0,
            filename: "x".to_string(),
            direction: Direction::Upload,
            transport: TransportKind::Http,
        };
        assert_eq!(p.percent(), 100);
    }

    #[test]
    fn progress_percent_clamps_to_hundred() {
        let p = ProgressInfo {
            loaded: 50,
            total: 50,
            filename: "x".to_string(),
            direction: Direction::Download,
            transport: TransportKind::Tcp,
        };
        assert_eq!(p.percent(), 100);
    }

    #[test]
    fn backend_response_fail_carries_message() {
        let resp = BackendResponse::fail("operation cancelled");
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("operation cancelled"));
    }
}
