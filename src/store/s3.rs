//! S3 implementation of the object store primitives.
//!
//! Built on rust-s3. Ranged reads are streamed: the body is pumped by a
//! background task into a bounded channel, so a chunk is never buffered
//! in full and dropping the receiving side tears the transfer down.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::Region;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

use crate::config::MountConfig;
use super::{ByteStream, ObjectEntry, ObjectMeta, ObjectStore};

/// In-flight body chunks buffered between the fetch task and the reader.
const CHANNEL_CAPACITY: usize = 2;

/// One authenticated client per distinct bucket.
pub struct S3Store {
    bucket_name: String,
    bucket: Box<Bucket>,
}

impl S3Store {
    /// Create a store for `bucket_name` from a mount's credentials. Fails
    /// when the credentials or the region are unusable; the caller decides
    /// what to do with a mount whose store could not be built.
    pub fn new(bucket_name: &str, config: &MountConfig) -> Result<Self> {
        let bucket = Self::create_bucket(bucket_name, config)?;
        Ok(Self {
            bucket_name: bucket_name.to_string(),
            bucket,
        })
    }

    fn create_bucket(bucket_name: &str, config: &MountConfig) -> Result<Box<Bucket>> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| anyhow!("Cannot build S3 credentials: {}", e))?;

        let region_name = config.resolved_region();
        let region = if config.endpoint.is_empty() {
            Region::Custom {
                region: region_name.clone(),
                endpoint: format!("https://s3.{}.amazonaws.com", region_name),
            }
        } else {
            Region::Custom {
                region: region_name,
                endpoint: config.endpoint.clone(),
            }
        };

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| anyhow!("Cannot build S3 bucket client: {}", e))?;

        let bucket = if config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(bucket)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta> {
        let (head, code) = self
            .bucket
            .head_object(key)
            .await
            .map_err(|e| anyhow!("Cannot head object {:?}: {}", key, e))?;

        if code != 200 {
            return Err(anyhow!("Head object {:?} returned status {}", key, code));
        }

        let size = head
            .content_length
            .ok_or_else(|| anyhow!("Head object {:?} returned no content length", key))?;

        let modified = head
            .last_modified
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(ObjectMeta {
            size: size as u64,
            modified,
        })
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<ByteStream> {
        let bucket = self.bucket.clone();
        let key = key.to_string();

        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(CHANNEL_CAPACITY);
        let error_tx = tx.clone();

        tokio::spawn(async move {
            let mut writer = ChannelWriter {
                tx: PollSender::new(tx),
            };

            if let Err(e) = bucket
                .get_object_range_to_writer(&key, start, Some(end), &mut writer)
                .await
            {
                tracing::error!("Range fetch of {:?} [{}-{}] failed: {}", key, start, end, e);
                let _ = error_tx
                    .send(Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        e.to_string(),
                    )))
                    .await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn list(&self, max_keys: usize) -> Result<Vec<ObjectEntry>> {
        // One page only: buckets larger than max_keys render incomplete
        // listings. Known limitation, see DESIGN.md.
        let (page, code) = self
            .bucket
            .list_page(String::new(), None, None, None, Some(max_keys))
            .await
            .map_err(|e| anyhow!("Cannot list bucket {:?}: {}", self.bucket_name, e))?;

        if code != 200 {
            return Err(anyhow!(
                "List bucket {:?} returned status {}",
                self.bucket_name,
                code
            ));
        }

        let entries = page
            .contents
            .into_iter()
            .map(|obj| {
                let modified = DateTime::parse_from_rfc3339(&obj.last_modified)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
                ObjectEntry {
                    key: obj.key,
                    modified,
                }
            })
            .collect();

        Ok(entries)
    }
}

/// AsyncWrite adapter feeding body bytes into the bounded channel. The
/// channel closing (reader dropped the stream) surfaces as BrokenPipe,
/// which aborts the background transfer.
struct ChannelWriter {
    tx: PollSender<std::io::Result<Bytes>>,
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if ready!(self.tx.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "body receiver dropped",
            )));
        }

        if self
            .tx
            .send_item(Ok(Bytes::copy_from_slice(buf)))
            .is_err()
        {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "body receiver dropped",
            )));
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}
