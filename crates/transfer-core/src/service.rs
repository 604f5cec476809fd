//! Connection Service Interface (C10): the one capability trait every
//! transport adapter implements, plus a small `TransportKind`-keyed
//! factory registry. Not an inheritance tree, one trait, several impls.

use async_trait::async_trait;

use transfer_types::{ConnectionConfig, FileItem, TransportKind};

use crate::error::TransferError;

/// What a transport can do beyond the baseline operation set. Callers use
/// this to choose e.g. whether to drive a chunked stream upload or fall
/// back to a single-shot multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub stream_upload: bool,
    pub direct_download: bool,
}

/// Progress/result hooks a caller passes into a long-running operation.
/// `on_progress` may be called any number of times before the operation
/// resolves.
#[derive(Default)]
pub struct OperationHooks {
    pub on_progress: Option<Box<dyn Fn(u64, u64) + Send + Sync>>,
}

/// Outcome of a non-listing, non-info operation (delete/rename/mkdir/
/// upload/download-to-path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Connection status observable by subscribers (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// The capability trait every adapter implements (HTTP, FTP, custom TCP).
#[async_trait]
pub trait ConnectionService: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<bool, TransferError>;

    async fn disconnect(&self);

    async fn test_connection(&self, config: &ConnectionConfig) -> Result<bool, TransferError>;

    async fn list_files(&self, path: &str) -> Result<Vec<FileItem>, TransferError>;

    async fn get_file_info(&self, path: &str) -> Result<FileItem, TransferError>;

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransferError>;

    async fn download_file_to_path(
        &self,
        path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError>;

    async fn upload_file(
        &self,
        local_path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError>;

    async fn delete_file(&self, path: &str) -> Result<OperationResult, TransferError>;

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<OperationResult, TransferError>;

    async fn create_directory(&self, path: &str) -> Result<OperationResult, TransferError>;

    fn capabilities(&self) -> Capabilities;

    fn status(&self) -> ConnectionStatus;
}

/// Build a boxed adapter for `config`'s transport kind. Adapter
/// construction never fails at this layer; connection establishment is a
/// separate step (`ConnectionService::connect`).
pub fn build(kind: TransportKind, config: ConnectionConfig) -> Box<dyn ConnectionService> {
    match kind {
        TransportKind::Http => Box::new(crate::adapters::http::HttpAdapter::new(config)),
        TransportKind::Ftp => Box::new(crate::adapters::ftp::FtpAdapter::new(config)),
        TransportKind::Tcp => Box::new(crate::adapters::tcp::TcpAdapter::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_default_to_false() {
        let caps = Capabilities::default();
        assert!(!caps.stream_upload);
        assert!(!caps.direct_download);
    }
}
