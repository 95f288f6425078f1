use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::StorageError;
use super::hash::ContentHash;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Result of storing bytes in a content store.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Content hash of the stored bytes.
    pub hash: ContentHash,
    /// Path relative to the store root, derivable from the hash alone.
    pub relative_path: String,
    /// Size of the blob in bytes.
    pub size_bytes: u64,
    /// True when identical bytes were already present and no new file was
    /// written.
    pub deduplicated: bool,
}

/// Content-addressed blob storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Consume the reader to EOF, hashing while writing, and place the bytes
    /// under their content hash. Identical existing content is left in place.
    async fn put_stream(&self, reader: BoxReader) -> Result<StoredBlob, StorageError>;

    /// Move a file that already lives on the store's filesystem into the
    /// store. The source path is consumed on success.
    async fn put_file(&self, source: &Path) -> Result<StoredBlob, StorageError>;

    /// Retrieve a blob as a streaming async reader.
    async fn open_stream(&self, hash: &ContentHash) -> Result<BoxReader, StorageError>;

    /// Check whether a blob exists.
    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// Absolute on-disk path for a blob. The file may or may not exist.
    fn blob_path(&self, hash: &ContentHash) -> PathBuf;
}
