//! Seekable streaming reader over one remote object.
//!
//! The object is fetched lazily in fixed-size chunks: a chunk is a live,
//! partially consumed body of one ranged GET. Reads that stay inside the
//! current chunk drain it without touching the network; an offset mismatch
//! or a read past the chunk's end drops the live body and fetches a new
//! chunk starting at the current offset. Seeks only move the offset; the
//! next read fetches whatever it needs.

use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::store::{ByteStream, ObjectStore};
use super::FsError;

/// Large chunks trade fewer round-trips for longer-lived bodies; the body
/// is streamed, never buffered whole.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Per-request handle for one remote object. Not for concurrent use; the
/// serving machinery drives one handle from one task at a time. Dropping
/// the handle releases the live chunk body.
pub struct ObjectFile {
    store: Arc<dyn ObjectStore>,
    key: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
    chunk_size: u64,
    offset: u64,
    chunk: Option<Chunk>,
    fetch: Option<Fetch>,
}

/// A live byte range `[offset, end)` of the object. Replaced, never
/// extended: at most one open body per handle at any time.
struct Chunk {
    /// Offset of the next byte the body will yield.
    offset: u64,
    /// Exclusive end of the requested range.
    end: u64,
    body: ByteStream,
    /// Bytes already pulled off the body but not yet handed to a reader.
    buffered: Bytes,
    /// Set once the body has yielded at least one non-empty piece.
    delivered: bool,
}

struct Fetch {
    start: u64,
    fut: BoxFuture<'static, anyhow::Result<ByteStream>>,
}

impl std::fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectFile")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl ObjectFile {
    /// Probe the object's metadata and build a handle positioned at
    /// offset 0. A failed probe means the object is effectively absent;
    /// no handle is constructed.
    pub async fn open(store: Arc<dyn ObjectStore>, key: &str) -> Result<Self, FsError> {
        Self::open_with_chunk_size(store, key, DEFAULT_CHUNK_SIZE).await
    }

    pub async fn open_with_chunk_size(
        store: Arc<dyn ObjectStore>,
        key: &str,
        chunk_size: u64,
    ) -> Result<Self, FsError> {
        let meta = store.stat(key).await.map_err(|e| {
            tracing::error!(
                "Cannot head object {:?} in bucket {:?}: {}",
                key,
                store.bucket_name(),
                e
            );
            FsError::InvalidArgument(format!("object {:?} is not readable", key))
        })?;

        Ok(Self {
            store,
            key: key.to_string(),
            size: meta.size,
            modified: meta.modified,
            chunk_size,
            offset: 0,
            chunk: None,
            fetch: None,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }
}

impl AsyncRead for ObjectFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.offset >= this.size || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            // Finish an in-flight chunk fetch before anything else.
            if let Some(fetch) = this.fetch.as_mut() {
                match fetch.fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(body)) => {
                        let start = fetch.start;
                        this.chunk = Some(Chunk {
                            offset: start,
                            end: start + this.chunk_size,
                            body,
                            buffered: Bytes::new(),
                            delivered: false,
                        });
                        this.fetch = None;
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        this.fetch = None;
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            e.to_string(),
                        )));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            let want = (buf.remaining() as u64).min(this.size - this.offset);
            let covered = match &this.chunk {
                Some(chunk) => this.offset == chunk.offset && this.offset + want <= chunk.end,
                None => false,
            };

            if !covered {
                // Drop any live body before opening another one: at most
                // one open network stream per handle.
                this.chunk = None;

                let start = this.offset;
                let end = start + this.chunk_size - 1;
                let store = this.store.clone();
                let key = this.key.clone();
                let fut = async move { store.get_range(&key, start, end).await }.boxed();
                this.fetch = Some(Fetch { start, fut });
                continue;
            }

            let chunk = this.chunk.as_mut().expect("covered implies chunk");

            if !chunk.buffered.is_empty() {
                let n = buf.remaining().min(chunk.buffered.len());
                buf.put_slice(&chunk.buffered.split_to(n));
                chunk.offset += n as u64;
                this.offset += n as u64;
                return Poll::Ready(Ok(()));
            }

            match chunk.body.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if !bytes.is_empty() {
                        chunk.delivered = true;
                        chunk.buffered = bytes;
                    }
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    // Not retried; the handle is left mid-stream and
                    // should be dropped by the caller.
                    this.chunk = None;
                    return Poll::Ready(Err(e));
                }
                Poll::Ready(None) => {
                    if !chunk.delivered {
                        this.chunk = None;
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "range fetch delivered no data",
                        )));
                    }
                    // Body ended short of the requested range (expected
                    // near the object's end); refetch from the current
                    // offset if anything is left.
                    this.chunk = None;
                    continue;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncSeek for ObjectFile {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        let this = self.get_mut();

        let target = match position {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => this.offset as i128 + delta as i128,
            SeekFrom::End(delta) => this.size as i128 + delta as i128,
        };

        if target < 0 || target > this.size as i128 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek outside object bounds",
            ));
        }

        this.offset = target as u64;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Poll::Ready(Ok(self.offset))
    }
}
