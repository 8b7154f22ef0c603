//! Object store abstraction.
//!
//! The proxy only needs three primitives from a remote store: a metadata
//! probe, a ranged streaming read, and a bounded enumeration. Keeping them
//! behind a trait lets the reader state machine be exercised against an
//! in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub mod s3;

#[cfg(test)]
pub mod mem;

/// A live, incrementally consumed body of a ranged GET. Errors mid-stream
/// abort the in-flight read; they are never retried.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Result of a metadata probe for a single object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// One entry of a bucket enumeration.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Read-only access to one bucket of a remote object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store is bound to.
    fn bucket_name(&self) -> &str;

    /// Probe an object for existence, size and modification time.
    async fn stat(&self, key: &str) -> anyhow::Result<ObjectMeta>;

    /// Fetch the byte range `[start, end]` (inclusive) of an object as a
    /// stream. The store may deliver fewer bytes when the range extends
    /// past the end of the object.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> anyhow::Result<ByteStream>;

    /// Enumerate up to `max_keys` objects in the bucket.
    async fn list(&self, max_keys: usize) -> anyhow::Result<Vec<ObjectEntry>>;
}
