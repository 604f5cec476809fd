//! Custom TCP adapter (C6): hand-rolled over `tokio::net::TcpStream` plus
//! the frame codec (C1) and session multiplexer (C2); frame bodies are
//! protobuf-encoded (format byte `0x02`).

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use transfer_types::{Command, ConnectionConfig, FileItem, FileItemType, TcpFrame, TransportKind};

use crate::chunk::ChunkSource;
use crate::error::TransferError;
use crate::proto;
use crate::queue::{OperationQueue, QueueKey};
use crate::service::{Capabilities, ConnectionService, ConnectionStatus, OperationHooks, OperationResult};
use crate::stream::download::{self, DownloadChunk, DownloadStartAck, DownloadTransport};
use crate::stream::upload::{self, ChunkAck, StartAck, UploadTransport};
use crate::tcp::mux::{TcpMultiplexer, DEFAULT_IDLE_TIMEOUT};

pub struct TcpAdapter {
    host: String,
    port: u16,
    mux: Mutex<Option<TcpMultiplexer>>,
    status: StdMutex<ConnectionStatus>,
    queue: OperationQueue,
}

fn proto_file_to_file_item(info: proto::FileInfo) -> FileItem {
    FileItem {
        name: info.name,
        path: info.path,
        file_type: if info.is_directory { FileItemType::Directory } else { FileItemType::File },
        size: info.size,
        last_modified: FileItem::parse_timestamp(Some(&info.last_modified)),
        permissions: (!info.permissions.is_empty()).then_some(info.permissions),
        is_readonly: Some(info.is_readonly),
    }
}

impl TcpAdapter {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            host: config.host,
            port: config.port,
            mux: Mutex::new(None),
            status: StdMutex::new(ConnectionStatus::Disconnected),
            queue: OperationQueue::new(),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap() = status;
    }

    async fn ensure_connected(&self) -> Result<TcpMultiplexer, TransferError> {
        let mut guard = self.mux.lock().await;
        if let Some(mux) = &*guard {
            return Ok(mux.clone());
        }

        self.set_status(ConnectionStatus::Connecting);
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let mux = TcpMultiplexer::spawn(stream);

        let handshake = proto::HandshakeRequest {
            client_id: "transfer-core".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            supported_formats: vec!["protobuf".to_string()],
        };
        let reply = mux
            .request(Command::Connect, handshake.encode_to_vec(), DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        Self::check_terminal(&reply)?;

        *guard = Some(mux.clone());
        self.set_status(ConnectionStatus::Connected);
        Ok(mux)
    }

    /// Validate a terminal reply frame, turning `Error` frames into
    /// `TransferError::Operation` using the server's message if present.
    fn check_terminal(frame: &TcpFrame) -> Result<(), TransferError> {
        match frame.command {
            Command::Success => Ok(()),
            Command::Error => {
                let message = proto::OperationError::decode(frame.data.as_slice())
                    .map(|e| e.message)
                    .unwrap_or_else(|_| "operation failed".to_string());
                Err(TransferError::Operation(message))
            }
            other => Err(TransferError::Protocol(format!("unexpected response command {other:?}"))),
        }
    }

    async fn request(&self, command: Command, body: Vec<u8>) -> Result<TcpFrame, TransferError> {
        let mux = self.ensure_connected().await?;
        let frame = mux
            .request(command, body, DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        Self::check_terminal(&frame)?;
        Ok(frame)
    }
}

#[async_trait]
impl ConnectionService for TcpAdapter {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<bool, TransferError> {
        match self.ensure_connected().await {
            Ok(_) => Ok(true),
            Err(err) => {
                self.set_status(ConnectionStatus::Error);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) {
        let mut guard = self.mux.lock().await;
        *guard = None;
        self.set_status(ConnectionStatus::Disconnected);
    }

    async fn test_connection(&self, _config: &ConnectionConfig) -> Result<bool, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Tcp, "test")).await;
        self.ensure_connected().await?;
        let mux = self.mux.lock().await.clone().expect("connected above");
        let reply = mux.request(Command::Ping, Vec::new(), Duration::from_secs(5)).await;
        Ok(matches!(reply, Ok(frame) if frame.command == Command::Success))
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileItem>, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Tcp, "list")).await;
        let request = proto::ListFilesRequest { path: path.to_string() };
        let frame = self.request(Command::ListFiles, request.encode_to_vec()).await?;
        let response = proto::ListFilesResponse::decode(frame.data.as_slice())
            .map_err(|err| TransferError::Protocol(format!("bad list_files payload: {err}")))?;
        Ok(response.files.into_iter().map(proto_file_to_file_item).collect())
    }

    async fn get_file_info(&self, path: &str) -> Result<FileItem, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Tcp, "info")).await;
        let request = proto::FileInfoRequest { path: path.to_string() };
        let frame = self.request(Command::FileInfo, request.encode_to_vec()).await?;
        let info = proto::FileInfo::decode(frame.data.as_slice())
            .map_err(|err| TransferError::Protocol(format!("bad file_info payload: {err}")))?;
        Ok(proto_file_to_file_item(info))
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransferError> {
        let mux = self.ensure_connected().await?;
        let transport = TcpDownloadTransport { mux };
        let outcome =
            download::run_download(&transport, path, None, CancellationToken::new(), None).await;
        if outcome.success {
            Ok(outcome.blob.unwrap_or_default())
        } else {
            Err(TransferError::Operation(outcome.message))
        }
    }

    async fn download_file_to_path(
        &self,
        path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError> {
        let mux = self.ensure_connected().await?;
        let transport = TcpDownloadTransport { mux };
        let outcome = download::run_download(
            &transport,
            path,
            Some(std::path::PathBuf::from(target_path)),
            CancellationToken::new(),
            hooks.on_progress.as_deref(),
        )
        .await;
        Ok(OperationResult { success: outcome.success, message: outcome.message })
    }

    async fn upload_file(
        &self,
        local_path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError> {
        let mux = self.ensure_connected().await?;
        let metadata = tokio::fs::metadata(local_path).await?;
        let file_size = metadata.len();
        let filename = std::path::Path::new(local_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let transport = TcpUploadTransport { mux };
        let source = ChunkSource::File { path: std::path::PathBuf::from(local_path) };
        let outcome = upload::run_upload(
            &transport,
            source,
            &filename,
            file_size,
            target_path,
            None,
            None,
            CancellationToken::new(),
            hooks.on_progress.as_deref(),
        )
        .await;
        Ok(OperationResult { success: outcome.success, message: outcome.message })
    }

    async fn delete_file(&self, path: &str) -> Result<OperationResult, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Tcp, "delete")).await;
        let request = proto::DeleteFileRequest { path: path.to_string() };
        self.request(Command::DeleteFile, request.encode_to_vec()).await?;
        Ok(OperationResult::ok("deleted"))
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<OperationResult, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Tcp, "rename")).await;
        let request = proto::RenameFileRequest {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        };
        self.request(Command::RenameFile, request.encode_to_vec()).await?;
        Ok(OperationResult::ok("renamed"))
    }

    async fn create_directory(&self, path: &str) -> Result<OperationResult, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Tcp, "mkdir")).await;
        let request = proto::CreateDirRequest { path: path.to_string() };
        self.request(Command::CreateDir, request.encode_to_vec()).await?;
        Ok(OperationResult::ok("directory created"))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { stream_upload: true, direct_download: true }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }
}

struct TcpUploadTransport {
    mux: TcpMultiplexer,
}

#[async_trait]
impl UploadTransport for TcpUploadTransport {
    async fn start_upload(
        &self,
        filename: &str,
        file_size: u64,
        target_path: &str,
        requested_chunk_size: Option<u64>,
        _extra_payload: Option<serde_json::Value>,
    ) -> Result<StartAck, TransferError> {
        let request = proto::UploadStartRequest {
            filename: filename.to_string(),
            file_size,
            target_path: target_path.to_string(),
            chunk_size: requested_chunk_size,
        };
        let frame = self
            .mux
            .request(Command::UploadReq, request.encode_to_vec(), DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        TcpAdapter::check_terminal(&frame)?;
        let response = proto::UploadStartResponse::decode(frame.data.as_slice())
            .map_err(|err| TransferError::Protocol(format!("bad upload start payload: {err}")))?;
        Ok(StartAck {
            session_id: response.session_id,
            accepted_chunk_size: response.accepted_chunk_size,
            total_chunks: response.total_chunks,
        })
    }

    async fn send_chunk(
        &self,
        session_id: &str,
        chunk_index: u64,
        chunk_total: u64,
        data: Vec<u8>,
    ) -> Result<ChunkAck, TransferError> {
        let request = proto::UploadChunk {
            session_id: session_id.to_string(),
            chunk_index,
            chunk_total,
            data,
        };
        let frame = self
            .mux
            .request(Command::UploadData, request.encode_to_vec(), DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        TcpAdapter::check_terminal(&frame)?;
        let ack = proto::UploadChunkAck::decode(frame.data.as_slice())
            .map_err(|err| TransferError::Protocol(format!("bad chunk ack payload: {err}")))?;
        Ok(ChunkAck { chunk_index: ack.chunk_index })
    }

    async fn finish_upload(&self, session_id: &str) -> Result<(), TransferError> {
        let request = proto::UploadEnd { session_id: session_id.to_string() };
        let frame = self
            .mux
            .request(Command::UploadEnd, request.encode_to_vec(), DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        TcpAdapter::check_terminal(&frame)
    }

    async fn abort_upload(&self, session_id: &str) {
        let request = proto::UploadEnd { session_id: session_id.to_string() };
        let _ = self
            .mux
            .request(Command::Disconnect, request.encode_to_vec(), Duration::from_secs(5))
            .await;
    }
}

struct TcpDownloadTransport {
    mux: TcpMultiplexer,
}

#[async_trait]
impl DownloadTransport for TcpDownloadTransport {
    async fn start_download(&self, path: &str) -> Result<DownloadStartAck, TransferError> {
        let request = proto::DownloadStartRequest { path: path.to_string() };
        let frame = self
            .mux
            .request(Command::DownloadReq, request.encode_to_vec(), DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        TcpAdapter::check_terminal(&frame)?;
        let response = proto::DownloadStartResponse::decode(frame.data.as_slice())
            .map_err(|err| TransferError::Protocol(format!("bad download start payload: {err}")))?;
        Ok(DownloadStartAck {
            session_id: response.session_id,
            file_size: response.file_size,
            chunk_size: response.chunk_size,
            total_chunks: response.total_chunks,
        })
    }

    async fn fetch_chunk(
        &self,
        session_id: &str,
        chunk_index: u64,
    ) -> Result<DownloadChunk, TransferError> {
        let request = proto::DownloadChunk {
            session_id: session_id.to_string(),
            chunk_index,
            data: Vec::new(),
        };
        let frame = self
            .mux
            .request(Command::DownloadData, request.encode_to_vec(), DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        TcpAdapter::check_terminal(&frame)?;
        let chunk = proto::DownloadChunk::decode(frame.data.as_slice())
            .map_err(|err| TransferError::Protocol(format!("bad download chunk payload: {err}")))?;
        Ok(DownloadChunk { data: chunk.data })
    }

    async fn finish_download(&self, session_id: &str) -> Result<(), TransferError> {
        let request = proto::DownloadEnd { session_id: session_id.to_string() };
        let frame = self
            .mux
            .request(Command::DownloadEnd, request.encode_to_vec(), DEFAULT_IDLE_TIMEOUT)
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        TcpAdapter::check_terminal(&frame)
    }

    async fn abort_download(&self, session_id: &str) {
        let request = proto::DownloadEnd { session_id: session_id.to_string() };
        let _ = self
            .mux
            .request(Command::Disconnect, request.encode_to_vec(), Duration::from_secs(5))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_file_maps_directory_flag() {
        let info = proto::FileInfo {
            name: "sub".to_string(),
            path: "/sub".to_string(),
            is_directory: true,
            size: 0,
            last_modified: "2024-01-01T00:00:00Z".to_string(),
            permissions: String::new(),
            is_readonly: false,
        };
        let item = proto_file_to_file_item(info);
        assert_eq!(item.file_type, FileItemType::Directory);
        assert_eq!(item.permissions, None);
    }
}
