//! Error taxonomy (spec §7).
//!
//! The core never swallows an error silently: every error reaches the
//! caller through the normal response path (`OperationResult`/
//! `BackendResponse`), never a panic or a dropped future.

use thiserror::Error;

/// The six error kinds named in spec §7. Variant names classify the
/// failure; the `String` payload is the human-readable detail that ends
/// up on `BackendResponse::message`/`error`.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transport could not be established or was lost mid-operation.
    /// Not retried by the core; connection status moves to `Error`.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed frame, bad magic/trailer/CRC, out-of-order chunk ack,
    /// or unknown response code. Fatal to the current connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server reported failure for a single operation. Local; does not
    /// disconnect.
    #[error("{0}")]
    Operation(String),

    /// No activity within the adjusted window. Does not disconnect.
    #[error("request timeout")]
    Timeout,

    /// User-requested cancellation. Not an exception at the caller's
    /// boundary: always surfaced as `{success:false, message:"operation
    /// cancelled"}`.
    #[error("operation cancelled")]
    Cancelled,

    /// Write/stat/unlink failures during download-to-path. `ENOENT` is
    /// benign for cleanup; other kinds are surfaced.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
}

impl TransferError {
    /// Map an HTTP status + optional server-supplied body message to a
    /// classified error (spec §7: 404 -> "resource not found", 403 ->
    /// "permission denied", 5xx -> server message).
    pub fn classify_http_status(status: u16, body_message: Option<&str>) -> Self {
        match status {
            404 => TransferError::Operation("resource not found".to_string()),
            403 => TransferError::Operation("permission denied".to_string()),
            401 => TransferError::Operation("authentication required".to_string()),
            415 => TransferError::Operation("unsupported media type".to_string()),
            500..=599 => TransferError::Operation(
                body_message
                    .filter(|m| !m.trim().is_empty())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("server error ({status})")),
            ),
            _ => TransferError::Operation(
                body_message
                    .filter(|m| !m.trim().is_empty())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("request failed ({status})")),
            ),
        }
    }

    /// True when this is the HTTP-415 case the opt-in base64 fallback is
    /// gated on (spec §9 REDESIGN: opt-in, not "any multipart failure").
    pub fn is_unsupported_media_type(&self) -> bool {
        matches!(self, TransferError::Operation(m) if m == "unsupported media type")
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_404_as_not_found() {
        let err = TransferError::classify_http_status(404, None);
        assert_eq!(err.message(), "resource not found");
    }

    #[test]
    fn classify_403_as_permission_denied() {
        let err = TransferError::classify_http_status(403, None);
        assert_eq!(err.message(), "permission denied");
    }

    #[test]
    fn classify_5xx_uses_server_message_when_present() {
        let err = TransferError::classify_http_status(503, Some("overloaded"));
        assert_eq!(err.message(), "overloaded");
    }

    #[test]
    fn classify_5xx_falls_back_when_server_message_blank() {
        let err = TransferError::classify_http_status(503, Some("  "));
        assert_eq!(err.message(), "server error (503)");
    }

    #[test]
    fn is_unsupported_media_type_only_matches_415() {
        let err = TransferError::classify_http_status(415, None);
        assert!(err.is_unsupported_media_type());
        let other = TransferError::classify_http_status(500, None);
        assert!(!other.is_unsupported_media_type());
    }
}
