//! HTTP adapter (C6). One struct, one `reqwest::Client`, narrow
//! per-endpoint methods, the shape of `BridgeTransportClient`'s async
//! half, generalised from a bridge-status API to a file-transfer API.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use transfer_types::{ConnectionConfig, FileItem, HttpProtocol, TransportDetail};

use crate::error::TransferError;
use crate::service::{Capabilities, ConnectionService, ConnectionStatus, OperationHooks, OperationResult};

/// Gates the base64 JSON upload fallback. Off by default: base64 is not a
/// general fallback, only an explicit compatibility opt-in (spec §9).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompatibilityMode {
    pub base64_upload_fallback: bool,
}

pub struct HttpAdapter {
    base_url: String,
    client: Client,
    headers: Vec<(String, String)>,
    compatibility: CompatibilityMode,
    status: Mutex<ConnectionStatus>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListFilesResponse {
    Array(Vec<FileItem>),
    Files { files: Vec<FileItem> },
    Data { data: Vec<FileItem> },
}

impl ListFilesResponse {
    fn into_items(self) -> Vec<FileItem> {
        match self {
            ListFilesResponse::Array(items) => items,
            ListFilesResponse::Files { files } => files,
            ListFilesResponse::Data { data } => data,
        }
    }
}

impl HttpAdapter {
    pub fn new(config: ConnectionConfig) -> Self {
        let scheme = match &config.detail {
            TransportDetail::Http(detail) => match detail.protocol.unwrap_or(HttpProtocol::Http) {
                HttpProtocol::Http => "http",
                HttpProtocol::Https => "https",
            },
            _ => "http",
        };
        let headers = match &config.detail {
            TransportDetail::Http(detail) => {
                detail.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            _ => Vec::new(),
        };
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .expect("build reqwest client");
        Self {
            base_url: format!("{scheme}://{}:{}", config.host, config.port),
            client,
            headers,
            compatibility: CompatibilityMode::default(),
            status: Mutex::new(ConnectionStatus::Disconnected),
        }
    }

    pub fn with_compatibility(mut self, compatibility: CompatibilityMode) -> Self {
        self.compatibility = compatibility;
        self
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url).timeout(Duration::from_secs(30));
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
    }

    async fn classify_error(&self, status: StatusCode, body: String) -> TransferError {
        TransferError::classify_http_status(status.as_u16(), Some(body.as_str()))
    }
}

#[async_trait]
impl ConnectionService for HttpAdapter {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<bool, TransferError> {
        self.set_status(ConnectionStatus::Connecting);
        match self.test_connection(_config).await {
            Ok(true) => {
                self.set_status(ConnectionStatus::Connected);
                Ok(true)
            }
            Ok(false) => {
                self.set_status(ConnectionStatus::Error);
                Ok(false)
            }
            Err(err) => {
                self.set_status(ConnectionStatus::Error);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) {
        self.set_status(ConnectionStatus::Disconnected);
    }

    async fn test_connection(&self, _config: &ConnectionConfig) -> Result<bool, TransferError> {
        let url = format!("{}/api/files?path=%2F", self.base_url);
        match self.request(reqwest::Method::GET, &url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(err) => Err(TransferError::Connection(err.to_string())),
        }
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileItem>, TransferError> {
        let url = format!("{}/api/files?path={}", self.base_url, urlencoding::encode(path));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_error(status, body).await);
        }
        let payload: ListFilesResponse = resp
            .json()
            .await
            .map_err(|err| TransferError::Protocol(format!("bad listing payload: {err}")))?;
        Ok(payload.into_items())
    }

    async fn get_file_info(&self, path: &str) -> Result<FileItem, TransferError> {
        let url = format!("{}/api/files/info?path={}", self.base_url, urlencoding::encode(path));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_error(status, body).await);
        }
        resp.json()
            .await
            .map_err(|err| TransferError::Protocol(format!("bad file info payload: {err}")))
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransferError> {
        let url = format!(
            "{}/api/files/download?path={}",
            self.base_url,
            urlencoding::encode(path)
        );
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_error(status, body).await);
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|err| TransferError::Connection(err.to_string()))
    }

    async fn download_file_to_path(
        &self,
        path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError> {
        use futures_util::StreamExt;
        use tokio::io::AsyncWriteExt;

        let url = format!(
            "{}/api/files/download?path={}",
            self.base_url,
            urlencoding::encode(path)
        );
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_error(status, body).await);
        }
        let total = resp.content_length().unwrap_or(0);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(target_path)
            .await?;

        let mut loaded: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(item) = stream.next().await {
            let bytes = item.map_err(|err| TransferError::Connection(err.to_string()))?;
            file.write_all(&bytes).await?;
            loaded += bytes.len() as u64;
            if let Some(on_progress) = &hooks.on_progress {
                on_progress(loaded, total);
            }
        }
        file.flush().await?;
        Ok(OperationResult::ok("download complete"))
    }

    async fn upload_file(
        &self,
        local_path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError> {
        let bytes = tokio::fs::read(local_path).await?;
        let total = bytes.len() as u64;
        let filename = std::path::Path::new(local_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes.clone()).file_name(filename.clone());
        let form = reqwest::multipart::Form::new()
            .text("targetPath", target_path.to_string())
            .part("file", part);

        let url = format!("{}/api/files/upload", self.base_url);
        let resp = self
            .request(reqwest::Method::POST, &url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            if let Some(on_progress) = &hooks.on_progress {
                on_progress(total, total);
            }
            return Ok(OperationResult::ok("upload complete"));
        }

        let body = resp.text().await.unwrap_or_default();
        let classified = self.classify_error(status, body).await;

        if self.compatibility.base64_upload_fallback && classified.is_unsupported_media_type() {
            debug!("multipart upload rejected with 415, falling back to base64 JSON upload");
            let result = self.upload_base64(&bytes, &filename, target_path).await?;
            if let Some(on_progress) = &hooks.on_progress {
                on_progress(total, total);
            }
            return Ok(result);
        }

        Err(classified)
    }

    async fn delete_file(&self, path: &str) -> Result<OperationResult, TransferError> {
        let url = format!("{}/api/files?path={}", self.base_url, urlencoding::encode(path));
        let resp = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(OperationResult::ok("deleted"))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(self.classify_error(status, body).await)
        }
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<OperationResult, TransferError> {
        let url = format!("{}/api/files/rename", self.base_url);
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&json!({ "oldPath": old_path, "newPath": new_path }))
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(OperationResult::ok("renamed"))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(self.classify_error(status, body).await)
        }
    }

    async fn create_directory(&self, path: &str) -> Result<OperationResult, TransferError> {
        let (parent, leaf) = split_parent_leaf(path);
        let url = format!("{}/api/files/directory", self.base_url);
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({ "path": parent, "name": leaf }))
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(OperationResult::ok("directory created"))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(self.classify_error(status, body).await)
        }
    }

    fn capabilities(&self) -> Capabilities {
        // No chunked-upload endpoint is specified for HTTP (only a single
        // multipart POST and its base64 fallback); chunked streaming is a
        // TCP-only capability here (see DESIGN.md).
        Capabilities { stream_upload: false, direct_download: true }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }
}

impl HttpAdapter {
    async fn upload_base64(
        &self,
        bytes: &[u8],
        filename: &str,
        target_path: &str,
    ) -> Result<OperationResult, TransferError> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let url = format!("{}/api/files/upload-base64", self.base_url);
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({ "filename": filename, "targetPath": target_path, "data": encoded }))
            .send()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(OperationResult::ok("upload complete (base64 fallback)"))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(self.classify_error(status, body).await)
        }
    }
}

/// Split a path at its last `/`, matching the client-side split the
/// HTTP directory-create endpoint expects.
fn split_parent_leaf(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((parent, leaf)) => {
            let parent = if parent.is_empty() { "/".to_string() } else { parent.to_string() };
            (parent, leaf.to_string())
        }
        None => ("/".to_string(), path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_parent_leaf_splits_at_last_slash() {
        assert_eq!(split_parent_leaf("/a/b/c"), ("/a/b".to_string(), "c".to_string()));
    }

    #[test]
    fn split_parent_leaf_with_no_slash_uses_root() {
        assert_eq!(split_parent_leaf("c"), ("/".to_string(), "c".to_string()));
    }

    #[test]
    fn list_files_response_accepts_array_shape() {
        let raw = r#"[{"name":"a","path":"/a","type":"file","size":1,"lastModified":"2024-01-01T00:00:00Z"}]"#;
        let parsed: ListFilesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_items().len(), 1);
    }

    #[test]
    fn list_files_response_accepts_files_wrapper_shape() {
        let raw = r#"{"files":[]}"#;
        let parsed: ListFilesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_items().len(), 0);
    }

    #[test]
    fn list_files_response_accepts_data_wrapper_shape() {
        let raw = r#"{"data":[]}"#;
        let parsed: ListFilesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_items().len(), 0);
    }

    #[test]
    fn all_three_list_files_shapes_produce_an_identical_result() {
        let entry = r#"{"name":"a","path":"/a","type":"file","size":1,"lastModified":"2024-01-01T00:00:00Z"}"#;
        let array = format!("[{entry}]");
        let files_wrapper = format!(r#"{{"files":[{entry}]}}"#);
        let data_wrapper = format!(r#"{{"data":[{entry}]}}"#);

        let a: ListFilesResponse = serde_json::from_str(&array).unwrap();
        let b: ListFilesResponse = serde_json::from_str(&files_wrapper).unwrap();
        let c: ListFilesResponse = serde_json::from_str(&data_wrapper).unwrap();

        assert_eq!(a.into_items(), b.into_items());
        assert_eq!(b.into_items(), c.into_items());
    }

    /// One multipart POST, one success response, a terminal 100% progress
    /// event, no base64 fallback triggered.
    #[tokio::test]
    async fn upload_file_multipart_posts_once_and_reports_full_progress() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let dir = tempfile::tempdir().unwrap();
        let local_path = dir.path().join("payload.bin");
        let payload = vec![0x5au8; 64 * 1024];
        tokio::fs::write(&local_path, &payload).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let request_count = std::sync::Arc::new(AtomicUsize::new(0));
        let server_count = request_count.clone();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 16 * 1024];
            let header_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            server_count.fetch_add(1, Ordering::SeqCst);

            let body = br#"{"success":true}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let config = ConnectionConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeout_ms: 5_000,
            detail: TransportDetail::Http(transfer_types::HttpDetail::default()),
        };
        let adapter = HttpAdapter::new(config);

        let progress_calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = progress_calls.clone();
        let hooks = OperationHooks {
            on_progress: Some(Box::new(move |done, total| {
                recorded.lock().unwrap().push((done, total));
            })),
        };

        let result = adapter
            .upload_file(local_path.to_str().unwrap(), "/remote/payload.bin", hooks)
            .await
            .unwrap();
        server.await.unwrap();

        assert!(result.success);
        assert_eq!(request_count.load(Ordering::SeqCst), 1);
        let calls = progress_calls.lock().unwrap();
        assert_eq!(calls.last(), Some(&(payload.len() as u64, payload.len() as u64)));
    }
}
