//! Transport-agnostic file-transfer engine core: the custom TCP frame
//! codec, session multiplexer, chunked upload/download engines, transport
//! adapters (HTTP/FTP/TCP), the Bridge/Router, operation queues, and
//! partial-download cleanup policy.

pub mod adapters;
pub mod bridge;
pub mod chunk;
pub mod cleanup;
pub mod error;
pub mod frame;
pub mod proto;
pub mod queue;
pub mod service;
pub mod stream;
pub mod tcp;

pub use bridge::{Bridge, Inbound, Outbound};
pub use error::TransferError;
pub use queue::{OperationQueue, QueueKey, Ticket};
pub use service::{build, Capabilities, ConnectionService, ConnectionStatus, OperationHooks, OperationResult};
pub use stream::download::{self, DownloadOutcome, DownloadTransport};
pub use stream::upload::{self, UploadOutcome, UploadTransport};
pub use tcp::{MuxError, TcpMultiplexer};
