//! Chunk sourcing (C3): a uniform way to pull fixed-size slices out of
//! either a file on disk or an in-memory buffer, so the upload engine
//! doesn't need to care which backs a given transfer.

use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Where chunk bytes for an upload come from.
pub enum ChunkSource {
    /// Read chunks directly from a file, seeking to each chunk's offset.
    File { path: PathBuf },
    /// Chunks come from an already-resident buffer (e.g. programmatic
    /// callers that don't have a file on disk).
    Memory { bytes: bytes::Bytes },
}

impl ChunkSource {
    /// Read the chunk at `index` of size `chunk_size` (the last chunk may be
    /// shorter). Returns an empty vec if `index` is past the end.
    pub async fn read_chunk(
        &self,
        index: u64,
        chunk_size: u64,
        total_size: u64,
    ) -> std::io::Result<Vec<u8>> {
        let offset = index * chunk_size;
        if offset >= total_size {
            return Ok(Vec::new());
        }
        let len = chunk_size.min(total_size - offset) as usize;

        match self {
            ChunkSource::File { path } => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
            ChunkSource::Memory { bytes } => {
                let start = offset as usize;
                let end = (start + len).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_splits_into_chunks() {
        let source = ChunkSource::Memory { bytes: bytes::Bytes::from_static(b"abcdefghij") };
        assert_eq!(source.read_chunk(0, 4, 10).await.unwrap(), b"abcd");
        assert_eq!(source.read_chunk(1, 4, 10).await.unwrap(), b"efgh");
        assert_eq!(source.read_chunk(2, 4, 10).await.unwrap(), b"ij");
    }

    #[tokio::test]
    async fn memory_source_past_end_is_empty() {
        let source = ChunkSource::Memory { bytes: bytes::Bytes::from_static(b"abcd") };
        assert!(source.read_chunk(5, 4, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_source_reads_exact_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();
        let source = ChunkSource::File { path: path.clone() };
        assert_eq!(source.read_chunk(0, 3, 10).await.unwrap(), b"012");
        assert_eq!(source.read_chunk(3, 3, 10).await.unwrap(), b"9");
    }
}
