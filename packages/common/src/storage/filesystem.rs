use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::hash::{ContentHash, ContentHasher};
use super::traits::{BoxReader, ContentStore, StoredBlob};

/// Filesystem-backed content-addressed store.
///
/// Blobs are stored in a sharded directory layout with fan-out depth 2:
/// `{root}/{hex[0:2]}/{hex[2:4]}/{full hex}`. The relative path is a pure
/// function of the hash, so no lookup table is needed to locate bytes.
///
/// Writes stream through a temporary file in the same filesystem and are
/// renamed into place once complete, so a crash never leaves a partial blob
/// under a final path and concurrent puts of identical bytes are safe.
pub struct FilesystemContentStore {
    root: PathBuf,
}

impl FilesystemContentStore {
    /// Create a new store rooted at `root`, creating directories as needed.
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store-relative path for a hash: `ab/cd/abcd…`.
    pub fn relative_path(hash: &ContentHash) -> String {
        format!(
            "{}/{}/{}",
            hash.shard_prefix(),
            hash.shard_subprefix(),
            hash.to_hex()
        )
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Move `temp` into the final location for `hash`, discarding it when the
    /// blob already exists. Returns whether the content was deduplicated.
    async fn commit(&self, temp: &Path, hash: &ContentHash) -> Result<bool, StorageError> {
        let final_path = self.blob_path(hash);

        if fs::try_exists(&final_path).await? {
            let _ = fs::remove_file(temp).await;
            return Ok(true);
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(temp, &final_path).await {
            let _ = fs::remove_file(temp).await;
            return Err(e.into());
        }

        Ok(false)
    }
}

#[async_trait]
impl ContentStore for FilesystemContentStore {
    async fn put_stream(&self, mut reader: BoxReader) -> Result<StoredBlob, StorageError> {
        let temp_path = self.temp_path();
        let mut hasher = ContentHasher::new();
        let mut size_bytes: u64 = 0;

        let mut buf = vec![0u8; 64 * 1024];
        let mut temp_file = fs::File::create(&temp_path).await?;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    drop(temp_file);
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }

            size_bytes += n as u64;
            hasher.update(&buf[..n]);
            if let Err(e) = temp_file.write_all(&buf[..n]).await {
                drop(temp_file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
        }

        temp_file.flush().await?;
        drop(temp_file);

        let hash = hasher.finalize();
        let deduplicated = self.commit(&temp_path, &hash).await?;

        Ok(StoredBlob {
            hash,
            relative_path: Self::relative_path(&hash),
            size_bytes,
            deduplicated,
        })
    }

    async fn put_file(&self, source: &Path) -> Result<StoredBlob, StorageError> {
        let mut file = fs::File::open(source).await?;
        let mut hasher = ContentHasher::new();
        let mut size_bytes: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            size_bytes += n as u64;
            hasher.update(&buf[..n]);
        }
        drop(file);

        let hash = hasher.finalize();
        let final_path = self.blob_path(&hash);

        if fs::try_exists(&final_path).await? {
            let _ = fs::remove_file(source).await;
            return Ok(StoredBlob {
                hash,
                relative_path: Self::relative_path(&hash),
                size_bytes,
                deduplicated: true,
            });
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Same-filesystem fast path; fall back to a copy across devices.
        if fs::rename(source, &final_path).await.is_err() {
            fs::copy(source, &final_path).await?;
            let _ = fs::remove_file(source).await;
        }

        Ok(StoredBlob {
            hash,
            relative_path: Self::relative_path(&hash),
            size_bytes,
            deduplicated: false,
        })
    }

    async fn open_stream(&self, hash: &ContentHash) -> Result<BoxReader, StorageError> {
        let final_path = self.blob_path(hash);
        match fs::File::open(&final_path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(hash.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.blob_path(hash)).await?)
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.root
            .join(hash.shard_prefix())
            .join(hash.shard_subprefix())
            .join(hash.to_hex())
    }
}
