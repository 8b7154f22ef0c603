//! In-memory object store used by tests. Records the number of range
//! fetches issued so chunk-reuse behaviour can be asserted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream;
use futures::StreamExt;

use super::{ByteStream, ObjectEntry, ObjectMeta, ObjectStore};

pub struct MemStore {
    bucket_name: String,
    objects: BTreeMap<String, (Bytes, DateTime<Utc>)>,
    fetches: AtomicUsize,
    /// Bodies are delivered in pieces of this size to exercise the
    /// reader's draining loop.
    piece_size: usize,
    /// When set, every range fetch fails after its first piece.
    poison: bool,
}

impl MemStore {
    pub fn new(bucket_name: &str) -> Self {
        Self {
            bucket_name: bucket_name.to_string(),
            objects: BTreeMap::new(),
            fetches: AtomicUsize::new(0),
            piece_size: 3,
            poison: false,
        }
    }

    pub fn with_piece_size(mut self, piece_size: usize) -> Self {
        self.piece_size = piece_size;
        self
    }

    pub fn insert(mut self, key: &str, data: &[u8], modified: DateTime<Utc>) -> Self {
        self.objects
            .insert(key.to_string(), (Bytes::copy_from_slice(data), modified));
        self
    }

    pub fn poisoned(mut self) -> Self {
        self.poison = true;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    async fn stat(&self, key: &str) -> anyhow::Result<ObjectMeta> {
        let (data, modified) = self
            .objects
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("no such object: {}", key))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            modified: Some(*modified),
        })
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> anyhow::Result<ByteStream> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let (data, _) = self
            .objects
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("no such object: {}", key))?;

        // Inclusive range, clamped to the object like a real store.
        let start = (start as usize).min(data.len());
        let end = ((end + 1) as usize).min(data.len());
        let mut slice = data.slice(start..end);

        let piece_size = self.piece_size;
        let mut pieces = Vec::new();
        while !slice.is_empty() {
            let n = piece_size.min(slice.len());
            pieces.push(Ok(slice.split_to(n)));
        }

        if self.poison {
            pieces.truncate(1);
            pieces.push(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected transport failure",
            )));
        }

        Ok(stream::iter(pieces).boxed())
    }

    async fn list(&self, max_keys: usize) -> anyhow::Result<Vec<ObjectEntry>> {
        Ok(self
            .objects
            .iter()
            .take(max_keys)
            .map(|(key, (_, modified))| ObjectEntry {
                key: key.clone(),
                modified: Some(*modified),
            })
            .collect())
    }
}
