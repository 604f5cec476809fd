//! Chunked upload/download session engines (C4, C5).

pub mod download;
pub mod upload;
