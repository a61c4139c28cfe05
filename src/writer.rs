//! Draining a [`ByteSource`] into local storage.
//!
//! Chunks are written one at a time and the next chunk is not pulled before
//! the previous one was accepted by the sink. A slow disk therefore
//! suspends the source instead of letting received data pile up in memory.

use std::path::Path;

use async_trait::async_trait;
use tokio::{
    fs,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
};

use crate::{
    error::{Error, Result},
    source::ByteSource,
};

/// Destination of a transfer.
pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Filesystem collaborator.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether something already exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Creates or truncates the file at `path` for writing.
    async fn create(&self, path: &Path) -> Result<Sink>;
}

/// Storage on the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Write buffer per open file.
    const BUFFER_LEN: usize = 64 * 1024;
}

#[async_trait]
impl Storage for LocalStorage {
    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create(&self, path: &Path) -> Result<Sink> {
        let file = fs::File::create(path).await.map_err(Error::file_system)?;
        Ok(Box::new(BufWriter::with_capacity(Self::BUFFER_LEN, file)))
    }
}

/// Writes every chunk of `source` into `sink`, calling `on_chunk` with the
/// size of each chunk once it has been accepted.
///
/// On success the sink is flushed and shut down. The sink is not deleted or
/// truncated on failure.
///
/// # Errors
///
/// * `FileSystem` when the sink fails; the source is stopped first
/// * `DataLoss` when the source breaks off
pub async fn drain<W, F>(source: &mut ByteSource, sink: &mut W, mut on_chunk: F) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    let mut written = 0;

    loop {
        let chunk = match source.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                source.stop();
                return Err(e);
            }
        };

        // `write_all` suspends for as long as the sink is not ready.
        if let Err(e) = sink.write_all(&chunk).await {
            source.stop();
            return Err(Error::file_system(e));
        }

        let len = chunk.len() as u64;
        written += len;
        on_chunk(len);
    }

    sink.flush().await.map_err(Error::file_system)?;
    sink.shutdown().await.map_err(Error::file_system)?;

    Ok(written)
}

/// Creates `path` in `storage` and drains `source` into it.
///
/// The file handle is released when this function returns, on success and
/// failure alike.
///
/// # Errors
///
/// See [`drain`]. Creating the file can fail with `FileSystem` as well.
pub async fn write_file<S, F>(
    storage: &S,
    path: &Path,
    source: &mut ByteSource,
    on_chunk: F,
) -> Result<u64>
where
    S: Storage + ?Sized,
    F: FnMut(u64),
{
    let mut sink = match storage.create(path).await {
        Ok(sink) => sink,
        Err(e) => {
            source.stop();
            return Err(e);
        }
    };

    drain(source, &mut sink, on_chunk).await
}
