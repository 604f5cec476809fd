//! FTP adapter (C6): drives `suppaftp`'s typed async API through the
//! USER/PASS/PASV/LIST/RETR/STOR/DELE/MKD/RMD/RNFR-RNTO/SIZE/MDTM/PWD/
//! CWD/TYPE/NOOP/QUIT command set.
//!
//! `suppaftp` tracks its own connected-session state; this adapter layers
//! an explicit state machine on top because callers need connection
//! status independently observable/resettable (spec §4.6), which
//! `suppaftp` itself doesn't expose.

use std::sync::Mutex;

use async_trait::async_trait;
use suppaftp::{AsyncFtpStream, FtpError};
use tracing::debug;

use transfer_types::{ConnectionConfig, FileItem, FileItemType, TransportDetail, TransportKind};

use crate::error::TransferError;
use crate::queue::QueueKey;
use crate::service::{Capabilities, ConnectionService, ConnectionStatus, OperationHooks, OperationResult};

/// Control-connection state machine (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpControlState {
    Disconnected,
    Connecting,
    WaitUser,
    WaitPass,
    LoggedIn,
    DataTransfer,
    WaitRename,
    Closing,
}

fn map_ftp_err(err: FtpError) -> TransferError {
    TransferError::Connection(err.to_string())
}

pub struct FtpAdapter {
    host: String,
    port: u16,
    username: String,
    password: String,
    passive: bool,
    secure: bool,
    state: Mutex<FtpControlState>,
    stream: tokio::sync::Mutex<Option<AsyncFtpStream>>,
    queue: crate::queue::OperationQueue,
}

impl FtpAdapter {
    pub fn new(config: ConnectionConfig) -> Self {
        let (username, password, passive, secure) = match config.detail {
            TransportDetail::Ftp(detail) => {
                (detail.username, detail.password, detail.passive, detail.secure)
            }
            _ => ("anonymous".to_string(), String::new(), true, false),
        };
        Self {
            host: config.host,
            port: config.port,
            username,
            password,
            passive,
            secure,
            state: Mutex::new(FtpControlState::Disconnected),
            stream: tokio::sync::Mutex::new(None),
            queue: crate::queue::OperationQueue::new(),
        }
    }

    fn set_state(&self, state: FtpControlState) {
        *self.state.lock().unwrap() = state;
    }

    fn control_state(&self) -> FtpControlState {
        *self.state.lock().unwrap()
    }

    async fn ensure_connected(&self) -> Result<(), TransferError> {
        let mut guard = self.stream.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        self.set_state(FtpControlState::Connecting);
        let addr = format!("{}:{}", self.host, self.port);
        let mut ftp = AsyncFtpStream::connect(&addr).await.map_err(map_ftp_err)?;

        if self.secure {
            let connector = async_native_tls::TlsConnector::new();
            ftp = ftp.into_secure(connector, &self.host).await.map_err(map_ftp_err)?;
        }

        self.set_state(FtpControlState::WaitUser);
        self.set_state(FtpControlState::WaitPass);
        ftp.login(&self.username, &self.password).await.map_err(map_ftp_err)?;
        self.set_state(FtpControlState::LoggedIn);

        if self.passive {
            ftp.set_mode(suppaftp::Mode::Passive);
        } else {
            ftp.set_mode(suppaftp::Mode::Active);
        }

        *guard = Some(ftp);
        Ok(())
    }

    fn parse_list_entry(raw: &str, parent: &str) -> Option<FileItem> {
        // Unix-style LIST line: perms, links, owner, group, size, month,
        // day, time/year, name. We only need the tail (size, name) and
        // whether it's a directory (perms start with 'd').
        let is_dir = raw.starts_with('d');
        let mut fields = raw.split_whitespace();
        let _perms = fields.next()?;
        let _links = fields.next()?;
        let _owner = fields.next()?;
        let _group = fields.next()?;
        let size: u64 = fields.next()?.parse().ok()?;
        // Remaining fields before the name are month/day/time-or-year.
        let rest: Vec<&str> = fields.collect();
        if rest.len() < 4 {
            return None;
        }
        let name = rest[3..].join(" ");
        if name == "." || name == ".." {
            return None;
        }
        let path = if parent.ends_with('/') {
            format!("{parent}{name}")
        } else {
            format!("{parent}/{name}")
        };
        Some(FileItem {
            name,
            path,
            file_type: if is_dir { FileItemType::Directory } else { FileItemType::File },
            size,
            last_modified: FileItem::parse_timestamp(None),
            permissions: Some(raw[..10.min(raw.len())].to_string()),
            is_readonly: None,
        })
    }

    /// Decide and act on a download-to-path interrupted mid-transfer,
    /// delegating the retain/delete call to the partial-download cleanup
    /// policy (C9).
    async fn cleanup_partial(&self, target: &std::path::Path, expected_size: Option<u64>, bytes_written: u64) {
        use crate::cleanup::{self, CleanupReason};
        match cleanup::cleanup_after_interruption(target, expected_size, bytes_written, CleanupReason::Error)
            .await
        {
            Ok(outcome) => {
                debug!(?outcome, path = %target.display(), "cleanup decision after interrupted ftp download")
            }
            Err(err) => {
                tracing::warn!(path = %target.display(), "cleanup after interrupted ftp download failed: {err}")
            }
        }
    }
}

#[async_trait]
impl ConnectionService for FtpAdapter {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<bool, TransferError> {
        match self.ensure_connected().await {
            Ok(()) => Ok(true),
            Err(err) => {
                self.set_state(FtpControlState::Disconnected);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) {
        self.set_state(FtpControlState::Closing);
        let mut guard = self.stream.lock().await;
        if let Some(mut ftp) = guard.take() {
            let _ = ftp.quit().await;
        }
        self.set_state(FtpControlState::Disconnected);
    }

    async fn test_connection(&self, _config: &ConnectionConfig) -> Result<bool, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "test")).await;
        self.ensure_connected().await?;
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        Ok(ftp.noop().await.is_ok())
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileItem>, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "list")).await;
        self.ensure_connected().await?;
        self.set_state(FtpControlState::DataTransfer);
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        let lines = ftp.list(Some(path)).await.map_err(map_ftp_err)?;
        self.set_state(FtpControlState::LoggedIn);
        Ok(lines.iter().filter_map(|line| Self::parse_list_entry(line, path)).collect())
    }

    async fn get_file_info(&self, path: &str) -> Result<FileItem, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "info")).await;
        self.ensure_connected().await?;
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        let size = ftp.size(path).await.map_err(map_ftp_err)? as u64;
        let modified = ftp.mdtm(path).await.ok();
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Ok(FileItem {
            name,
            path: path.to_string(),
            file_type: FileItemType::File,
            size,
            last_modified: modified
                .map(|dt| chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc))
                .unwrap_or_else(|| FileItem::parse_timestamp(None)),
            permissions: None,
            is_readonly: None,
        })
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "download")).await;
        self.ensure_connected().await?;
        self.set_state(FtpControlState::DataTransfer);
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        let cursor = ftp.retr_as_buffer(path).await.map_err(map_ftp_err)?;
        self.set_state(FtpControlState::LoggedIn);
        Ok(cursor.into_inner())
    }

    async fn download_file_to_path(
        &self,
        path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "download")).await;
        self.ensure_connected().await?;
        self.set_state(FtpControlState::DataTransfer);

        let target = std::path::Path::new(target_path);
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        let expected_size = ftp.size(path).await.ok().map(|s| s as u64);
        let mut reader = ftp.retr_as_stream(path).await.map_err(map_ftp_err)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(target_path)
            .await?;

        let mut buf = vec![0u8; 64 * 1024];
        let mut bytes_written: u64 = 0;
        loop {
            let read_result = reader.read(&mut buf).await;
            let n = match read_result {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    drop(reader);
                    *guard = None;
                    drop(guard);
                    self.set_state(FtpControlState::Disconnected);
                    self.cleanup_partial(target, expected_size, bytes_written).await;
                    return Err(TransferError::Filesystem(err));
                }
            };
            if let Err(err) = file.write_all(&buf[..n]).await {
                drop(reader);
                *guard = None;
                drop(guard);
                self.set_state(FtpControlState::Disconnected);
                self.cleanup_partial(target, expected_size, bytes_written).await;
                return Err(TransferError::Filesystem(err));
            }
            bytes_written += n as u64;
            if let Some(on_progress) = &hooks.on_progress {
                on_progress(bytes_written, expected_size.unwrap_or(bytes_written));
            }
        }
        file.flush().await?;

        if let Err(err) = ftp.finalize_retr_stream(reader).await {
            *guard = None;
            drop(guard);
            self.set_state(FtpControlState::Disconnected);
            self.cleanup_partial(target, expected_size, bytes_written).await;
            return Err(map_ftp_err(err));
        }
        drop(guard);
        self.set_state(FtpControlState::LoggedIn);
        Ok(OperationResult::ok("download complete"))
    }

    async fn upload_file(
        &self,
        local_path: &str,
        target_path: &str,
        hooks: OperationHooks,
    ) -> Result<OperationResult, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "upload")).await;
        self.ensure_connected().await?;
        self.set_state(FtpControlState::DataTransfer);

        let file_size = tokio::fs::metadata(local_path).await?.len();
        let mut file = tokio::fs::File::open(local_path).await?;

        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        // STOR streams straight off the open file handle rather than
        // buffering it in memory first; the adaptive timeout is the same
        // formula C4 uses for a chunked TCP upload of the same size.
        let timeout = crate::stream::upload::adaptive_timeout(file_size);
        let put_result = tokio::time::timeout(timeout, ftp.put_file(target_path, &mut file)).await;
        drop(guard);
        self.set_state(FtpControlState::LoggedIn);

        match put_result {
            Ok(Ok(_)) => {
                if let Some(on_progress) = &hooks.on_progress {
                    on_progress(file_size, file_size);
                }
                Ok(OperationResult::ok("upload complete"))
            }
            Ok(Err(err)) => Err(map_ftp_err(err)),
            Err(_) => Err(TransferError::Timeout),
        }
    }

    async fn delete_file(&self, path: &str) -> Result<OperationResult, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "delete")).await;
        self.ensure_connected().await?;
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        ftp.rm(path).await.map_err(map_ftp_err)?;
        Ok(OperationResult::ok("deleted"))
    }

    async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<OperationResult, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "rename")).await;
        self.ensure_connected().await?;
        self.set_state(FtpControlState::WaitRename);
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        ftp.rename(old_path, new_path).await.map_err(map_ftp_err)?;
        drop(guard);
        self.set_state(FtpControlState::LoggedIn);
        Ok(OperationResult::ok("renamed"))
    }

    async fn create_directory(&self, path: &str) -> Result<OperationResult, TransferError> {
        let _ticket = self.queue.acquire(QueueKey::new(TransportKind::Ftp, "mkdir")).await;
        self.ensure_connected().await?;
        let mut guard = self.stream.lock().await;
        let ftp = guard.as_mut().expect("connected above");
        ftp.mkdir(path).await.map_err(map_ftp_err)?;
        Ok(OperationResult::ok("directory created"))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { stream_upload: false, direct_download: true }
    }

    fn status(&self) -> ConnectionStatus {
        match self.control_state() {
            FtpControlState::Disconnected | FtpControlState::Closing => ConnectionStatus::Disconnected,
            FtpControlState::Connecting | FtpControlState::WaitUser | FtpControlState::WaitPass => {
                ConnectionStatus::Connecting
            }
            FtpControlState::LoggedIn | FtpControlState::DataTransfer | FtpControlState::WaitRename => {
                ConnectionStatus::Connected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_entry_reads_unix_style_line() {
        let line = "drwxr-xr-x  2 user group  4096 Jan 01 12:00 subdir";
        let item = FtpAdapter::parse_list_entry(line, "/root").unwrap();
        assert_eq!(item.name, "subdir");
        assert_eq!(item.path, "/root/subdir");
        assert_eq!(item.file_type, FileItemType::Directory);
        assert_eq!(item.size, 4096);
    }

    #[test]
    fn parse_list_entry_skips_dot_entries() {
        let line = "drwxr-xr-x  2 user group  4096 Jan 01 12:00 .";
        assert!(FtpAdapter::parse_list_entry(line, "/root").is_none());
    }

    #[test]
    fn parse_list_entry_reads_file() {
        let line = "-rw-r--r--  1 user group  1024 Feb 02 09:30 readme.txt";
        let item = FtpAdapter::parse_list_entry(line, "/root").unwrap();
        assert_eq!(item.file_type, FileItemType::File);
        assert_eq!(item.size, 1024);
        assert_eq!(item.name, "readme.txt");
    }

    #[test]
    fn debug_never_leaks_password() {
        // FtpAdapter itself doesn't derive Debug (by design, it'd leak
        // credentials); this test documents that constraint.
        fn assert_no_debug<T>() {}
        assert_no_debug::<FtpAdapter>();
    }
}
