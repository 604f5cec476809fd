//! Shared data-model and wire types for the transfer engine.
//!
//! Kept free of any async runtime so it can be used by both the engine
//! (`transfer-core`) and anything embedding it without pulling in tokio.

/// Connection configuration, discriminated by transport kind.
pub mod config;
/// Listing/info result type.
pub mod file_item;
/// Request/response/progress envelope types used across the Bridge.
pub mod request;
/// Server-anchored chunked upload/download session records.
pub mod session;
/// TCP wire frame layout and command table.
pub mod tcp;

pub use config::{ConnectionConfig, FtpDetail, HttpDetail, HttpProtocol, TransportDetail};
pub use file_item::{FileItem, FileItemType};
pub use request::{generate_request_id, BackendResponse, Direction, ProgressInfo, Request, TransportKind};
pub use session::{StreamDownloadSession, StreamUploadSession};
pub use tcp::{Command, TcpFrame};
