//! Transport adapters (C6): one `ConnectionService` impl per wire protocol.

pub mod ftp;
pub mod http;
pub mod tcp;
