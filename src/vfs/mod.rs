//! Virtual filesystem over a set of mounted buckets.
//!
//! The first path component names a mount, the rest is the object key.
//! `/<mount>` opens a rendered bucket listing, `/<mount>/<key>` opens a
//! seekable streaming handle on the object. The mount table is built once
//! at startup and read-only afterwards.

pub mod listing;
pub mod object;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::store::s3::S3Store;
use crate::store::ObjectStore;
use crate::utils::split_mount;

pub use listing::{ListingFile, MAX_LIST_KEYS};
pub use object::{ObjectFile, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Error)]
pub enum FsError {
    /// Unknown mount, or a mount whose store never came up. Deliberately
    /// indistinguishable from a missing object so configuration failures
    /// do not leak to clients.
    #[error("not found")]
    NotFound,

    /// Object probe failed; the object is treated as effectively absent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Remote call failed mid-operation. Never retried.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("listing render failed: {0}")]
    Render(#[from] std::fmt::Error),
}

/// A handle returned by [`VirtualFs::open`]. Both variants read and seek
/// the same way; the serving layer only cares about size, mtime and
/// content type.
pub enum ProxyFile {
    Object(ObjectFile),
    Listing(ListingFile),
}

impl ProxyFile {
    pub fn size(&self) -> u64 {
        match self {
            ProxyFile::Object(f) => f.size(),
            ProxyFile::Listing(f) => f.size(),
        }
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        match self {
            ProxyFile::Object(f) => f.modified(),
            ProxyFile::Listing(f) => f.modified(),
        }
    }

    pub fn content_type(&self) -> String {
        match self {
            ProxyFile::Object(f) => mime_guess::from_path(f.key())
                .first_or_octet_stream()
                .to_string(),
            ProxyFile::Listing(_) => "text/html; charset=utf-8".to_string(),
        }
    }
}

impl tokio::io::AsyncRead for ProxyFile {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ProxyFile::Object(f) => std::pin::Pin::new(f).poll_read(cx, buf),
            ProxyFile::Listing(f) => std::pin::Pin::new(f).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncSeek for ProxyFile {
    fn start_seek(
        self: std::pin::Pin<&mut Self>,
        position: std::io::SeekFrom,
    ) -> std::io::Result<()> {
        match self.get_mut() {
            ProxyFile::Object(f) => std::pin::Pin::new(f).start_seek(position),
            ProxyFile::Listing(f) => std::pin::Pin::new(f).start_seek(position),
        }
    }

    fn poll_complete(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<u64>> {
        match self.get_mut() {
            ProxyFile::Object(f) => std::pin::Pin::new(f).poll_complete(cx),
            ProxyFile::Listing(f) => std::pin::Pin::new(f).poll_complete(cx),
        }
    }
}

/// Mount table plus one store per distinct bucket.
pub struct VirtualFs {
    /// Mount name -> bucket name.
    mounts: HashMap<String, String>,
    /// Bucket name -> store. A mount whose store failed to initialize has
    /// an entry in `mounts` but none here.
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl VirtualFs {
    /// Build the mount table from configuration. A mount whose store
    /// cannot be initialized is logged and kept as a dead mount; requests
    /// for it resolve to NotFound.
    pub fn new(config: &ProxyConfig) -> Self {
        let mut fs = Self::empty();

        for (mount_name, mount) in &config.mounts {
            let bucket = mount.resolved_bucket(mount_name);

            match S3Store::new(&bucket, mount) {
                Ok(store) => {
                    fs.add_mount(mount_name, &bucket, Arc::new(store));
                    tracing::info!("Mounted bucket {:?} at /{}", bucket, mount_name);
                }
                Err(e) => {
                    tracing::error!("Unable to initialize store for {}: {}", mount_name, e);
                    fs.mounts.insert(mount_name.clone(), bucket);
                }
            }
        }

        fs
    }

    pub fn empty() -> Self {
        Self {
            mounts: HashMap::new(),
            stores: HashMap::new(),
        }
    }

    pub fn add_mount(&mut self, mount_name: &str, bucket: &str, store: Arc<dyn ObjectStore>) {
        self.mounts.insert(mount_name.to_string(), bucket.to_string());
        self.stores.insert(bucket.to_string(), store);
    }

    fn resolve(&self, mount: &str) -> Result<&Arc<dyn ObjectStore>, FsError> {
        let bucket = self.mounts.get(mount).ok_or(FsError::NotFound)?;
        self.stores.get(bucket).ok_or(FsError::NotFound)
    }

    /// Open the file a request path addresses: a listing for a mount
    /// root, an object handle otherwise.
    pub async fn open(&self, path: &str) -> Result<ProxyFile, FsError> {
        let (mount, key) = split_mount(path);
        let store = self.resolve(&mount)?;

        if key.is_empty() {
            return self.open_listing(store, &mount).await;
        }

        let file = ObjectFile::open(store.clone(), &key).await?;
        Ok(ProxyFile::Object(file))
    }

    async fn open_listing(
        &self,
        store: &Arc<dyn ObjectStore>,
        mount: &str,
    ) -> Result<ProxyFile, FsError> {
        let entries = store.list(MAX_LIST_KEYS).await.map_err(|e| {
            tracing::error!("Cannot list bucket {:?}: {}", store.bucket_name(), e);
            FsError::Transport(e.to_string())
        })?;

        let page = listing::render_listing(store.bucket_name(), mount, &entries)?;
        Ok(ProxyFile::Listing(ListingFile::new(page)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;
    use tokio::io::AsyncReadExt;

    fn test_fs() -> VirtualFs {
        let store = MemStore::new("the-bucket")
            .insert("hello.txt", b"hello world", Utc::now())
            .insert("dir/nested.bin", &[1, 2, 3], Utc::now());
        let mut fs = VirtualFs::empty();
        fs.add_mount("data", "the-bucket", Arc::new(store));
        fs
    }

    #[tokio::test]
    async fn test_open_object() {
        let fs = test_fs();
        let mut file = fs.open("/data/hello.txt").await.unwrap();
        assert_eq!(file.size(), 11);
        assert_eq!(file.content_type(), "text/plain");

        let mut out = String::new();
        file.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_open_nested_object() {
        let fs = test_fs();
        let file = fs.open("/data/dir/nested.bin").await.unwrap();
        assert_eq!(file.size(), 3);
        assert_eq!(file.content_type(), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_mount_root_serves_listing() {
        let fs = test_fs();
        for path in ["/data", "/data/"] {
            let mut file = fs.open(path).await.unwrap();
            assert_eq!(file.content_type(), "text/html; charset=utf-8");

            let mut page = String::new();
            file.read_to_string(&mut page).await.unwrap();
            assert!(page.contains("<h2>the-bucket</h2>"));
            assert!(page.contains("href=\"/data/hello.txt\""));
            assert!(page.contains("href=\"/data/dir/nested.bin\""));
            assert_eq!(file.size(), page.len() as u64);
        }
    }

    #[tokio::test]
    async fn test_unknown_mount_is_not_found() {
        let fs = test_fs();
        assert!(matches!(fs.open("/other/x").await, Err(FsError::NotFound)));
        assert!(matches!(fs.open("/").await, Err(FsError::NotFound)));
    }

    #[tokio::test]
    async fn test_dead_mount_degrades_to_not_found() {
        // A mount whose store never initialized must look exactly like a
        // missing one.
        let mut fs = test_fs();
        fs.mounts.insert("broken".to_string(), "no-store".to_string());

        assert!(matches!(fs.open("/broken").await, Err(FsError::NotFound)));
        assert!(matches!(
            fs.open("/broken/key").await,
            Err(FsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_missing_object_is_invalid() {
        let fs = test_fs();
        assert!(matches!(
            fs.open("/data/absent.txt").await,
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_dot_segments_cannot_escape() {
        let fs = test_fs();
        let file = fs.open("/data/../data/hello.txt").await.unwrap();
        assert_eq!(file.size(), 11);
    }
}
