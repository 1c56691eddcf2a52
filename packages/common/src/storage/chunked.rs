use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

use super::error::StorageError;
use super::id::BlobId;
use super::limit::LimitedReader;
use super::traits::{BlobStore, BoxReader};

/// Default chunk size, 255 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

const STAGING_DIR: &str = ".tmp";

/// Filesystem-backed store that splits every blob into fixed-size chunks.
///
/// Layout within a bucket:
/// `{root}/{bucket}/{first 2 hex chars}/{remaining 30 hex chars}/{chunk:08}`
///
/// Writes go to `{root}/{bucket}/.tmp/{uuid}` and become visible with a
/// single directory rename, so readers never observe a partial blob.
pub struct ChunkedBlobStore {
    bucket_path: PathBuf,
    chunk_size: usize,
    max_size: u64,
}

impl ChunkedBlobStore {
    /// Open (creating if needed) the bucket directory under `root`.
    pub async fn new(
        root: impl AsRef<Path>,
        bucket: &str,
        chunk_size: usize,
        max_size: u64,
    ) -> Result<Self, StorageError> {
        if chunk_size == 0 {
            return Err(StorageError::Backend("chunk size must be positive".into()));
        }

        let bucket_path = root.as_ref().join(bucket);
        fs::create_dir_all(bucket_path.join(STAGING_DIR)).await?;
        Ok(Self {
            bucket_path,
            chunk_size,
            max_size,
        })
    }

    /// Directory holding the chunks of a blob.
    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.bucket_path
            .join(id.shard_prefix())
            .join(id.shard_suffix())
    }

    fn temp_path(&self) -> PathBuf {
        self.bucket_path
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Sorted chunk files of a stored blob.
    async fn chunk_paths(&self, id: &BlobId) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.blob_path(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_hex()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            chunks.push(entry.path());
        }
        chunks.sort();
        Ok(chunks)
    }

    /// Write every chunk of `reader` into `dir`.
    async fn write_chunks(
        &self,
        dir: &Path,
        reader: &mut LimitedReader<BoxReader>,
    ) -> Result<(), StorageError> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut index: u32 = 0;

        loop {
            let filled = fill_chunk(reader, &mut buf)
                .await
                .map_err(|e| reader.classify(e))?;
            if filled == 0 {
                break;
            }

            let mut file = fs::File::create(dir.join(format!("{index:08}"))).await?;
            file.write_all(&buf[..filled]).await?;
            file.flush().await?;
            index += 1;

            if filled < buf.len() {
                break;
            }
        }

        Ok(())
    }
}

/// Read until `buf` is full or the reader is exhausted.
async fn fill_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Staging directory removed on drop unless committed.
///
/// Covers callers that abandon a `store` future mid-write.
struct Staging {
    path: PathBuf,
    committed: bool,
}

impl Staging {
    async fn create(path: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir(&path).await?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    async fn discard(mut self) {
        self.committed = true;
        let _ = fs::remove_dir_all(&self.path).await;
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

#[async_trait]
impl BlobStore for ChunkedBlobStore {
    async fn store(&self, reader: BoxReader) -> Result<BlobId, StorageError> {
        let id = BlobId::generate();
        let staging = Staging::create(self.temp_path()).await?;
        let mut reader = LimitedReader::new(reader, self.max_size);

        if let Err(e) = self.write_chunks(&staging.path, &mut reader).await {
            staging.discard().await;
            return Err(e);
        }

        let blob_path = self.blob_path(&id);
        if let Some(parent) = blob_path.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            staging.discard().await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&staging.path, &blob_path).await {
            staging.discard().await;
            return Err(e.into());
        }

        let mut staging = staging;
        staging.committed = true;
        Ok(id)
    }

    async fn retrieve(&self, id: &BlobId) -> Result<BoxReader, StorageError> {
        let chunks = self.chunk_paths(id).await?;
        Ok(Box::new(ChunkReader::new(chunks)))
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.blob_path(id)).await?)
    }

    async fn delete(&self, id: &BlobId) -> Result<bool, StorageError> {
        // Move out of the visible namespace first so a failed removal never
        // leaves a blob with missing chunks behind.
        let doomed = self.temp_path();
        match fs::rename(self.blob_path(id), &doomed).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        fs::remove_dir_all(&doomed).await?;
        Ok(true)
    }

    async fn size(&self, id: &BlobId) -> Result<u64, StorageError> {
        let mut total = 0;
        for chunk in self.chunk_paths(id).await? {
            total += fs::metadata(&chunk).await?.len();
        }
        Ok(total)
    }

    async fn list(&self) -> Result<Vec<BlobId>, StorageError> {
        let mut ids = Vec::new();
        let mut shards = fs::read_dir(&self.bucket_path).await?;

        while let Some(shard) = shards.next_entry().await? {
            let prefix = shard.file_name().to_string_lossy().into_owned();
            if prefix == STAGING_DIR || !shard.file_type().await?.is_dir() {
                continue;
            }

            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let suffix = entry.file_name().to_string_lossy().into_owned();
                match BlobId::from_hex(&format!("{prefix}{suffix}")) {
                    Ok(id) => ids.push(id),
                    Err(_) => tracing::warn!("Skipping unrecognized bucket entry {prefix}/{suffix}"),
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

type OpenFuture = Pin<Box<dyn Future<Output = io::Result<fs::File>> + Send>>;

enum ChunkState {
    Idle,
    Opening(OpenFuture),
    Reading(fs::File),
    Done,
}

/// Lazily chains the chunk files of one blob, holding at most one open.
struct ChunkReader {
    chunks: VecDeque<PathBuf>,
    state: ChunkState,
}

impl ChunkReader {
    fn new(chunks: Vec<PathBuf>) -> Self {
        Self {
            chunks: chunks.into(),
            state: ChunkState::Idle,
        }
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ChunkState::Reading(file) => {
                    let before = buf.filled().len();
                    ready!(Pin::new(file).poll_read(cx, buf))?;
                    if buf.filled().len() > before || buf.remaining() == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    this.state = ChunkState::Idle;
                }
                ChunkState::Opening(open) => {
                    let file = ready!(open.as_mut().poll(cx))?;
                    this.state = ChunkState::Reading(file);
                }
                ChunkState::Idle => match this.chunks.pop_front() {
                    Some(path) => {
                        this.state = ChunkState::Opening(Box::pin(fs::File::open(path)));
                    }
                    None => {
                        this.state = ChunkState::Done;
                        return Poll::Ready(Ok(()));
                    }
                },
                ChunkState::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}
