//! HTTP cache sink contract and in-memory reference implementation.
//!
//! Cache mode surfaces broadcast objects to a generic HTTP client
//! stack under synthetic `http://groute/` URLs, with `x-route*`
//! response headers carrying service, low-latency and loop state.

use crate::demux::SharedBlob;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// Root of the synthetic key space.
pub const CACHE_SCHEME_ROOT: &str = "http://groute/";

/// Service id header on manifests (integer) and a `yes` marker on files.
pub const HDR_ROUTE: &str = "x-route";
/// Name of the first segment of the current broadcast loop.
pub const HDR_FIRST_SEG: &str = "x-route-first-seg";
/// Present when the first segment is still being received.
pub const HDR_LOW_LATENCY: &str = "x-route-ll";
/// Present when a carousel loop was detected.
pub const HDR_LOOP: &str = "x-route-loop";

/// Cache key for one object of one service.
pub fn cache_key(service_id: u32, filename: &str) -> String {
    format!("{CACHE_SCHEME_ROOT}service{service_id}/{filename}")
}

/// Parse a synthetic cache URL back into (service id, filename).
pub fn parse_cache_key(url: &str) -> Option<(u32, &str)> {
    let rest = url.strip_prefix(CACHE_SCHEME_ROOT)?;
    let rest = rest.strip_prefix("service")?;
    let (service_id, filename) = rest.split_once('/')?;
    Some((service_id.parse().ok()?, filename))
}

/// Payload stored in a cache entry.
#[derive(Debug, Clone)]
pub enum CachePayload {
    /// Copied out of the broadcast object (manifests, init segments):
    /// the entry must outlive the object's recycling.
    Owned(Bytes),
    /// Shared with the demux-owned blob (regular segments); immutable
    /// once published, lifetime bounded by the demux trimming policy.
    Shared(SharedBlob),
    /// Tombstone for a deleted object.
    Empty,
}

/// Opaque handle to an inserted entry; manifests keep one around for
/// later header rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle(Arc<String>);

impl CacheHandle {
    /// The entry's key.
    pub fn key(&self) -> &str {
        &self.0
    }
}

/// Downstream HTTP cache contract.
pub trait HttpCache {
    /// Insert or refresh the entry under `key`.
    fn insert(
        &mut self,
        key: &str,
        payload: CachePayload,
        mime: &str,
        download_ms: u32,
    ) -> CacheHandle;

    /// Force extra response headers on an entry.
    fn force_headers(&mut self, handle: &CacheHandle, headers: &str);
}

/// One record of the in-memory cache.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub payload: CachePayload,
    pub mime: String,
    pub headers: String,
    pub download_ms: u32,
}

impl CacheRecord {
    /// Materialize the payload bytes, whatever their backing.
    pub fn bytes(&self) -> Bytes {
        match &self.payload {
            CachePayload::Owned(bytes) => bytes.clone(),
            CachePayload::Shared(blob) => Bytes::copy_from_slice(&blob.lock().data),
            CachePayload::Empty => Bytes::new(),
        }
    }
}

/// In-memory reference cache for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryHttpCache {
    entries: Arc<DashMap<String, CacheRecord>>,
}

impl MemoryHttpCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by key.
    pub fn get(&self, key: &str) -> Option<CacheRecord> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HttpCache for MemoryHttpCache {
    fn insert(
        &mut self,
        key: &str,
        payload: CachePayload,
        mime: &str,
        download_ms: u32,
    ) -> CacheHandle {
        let headers = self
            .entries
            .get(key)
            .map(|entry| entry.headers.clone())
            .unwrap_or_default();
        self.entries.insert(
            key.to_string(),
            CacheRecord {
                payload,
                mime: mime.to_string(),
                headers,
                download_ms,
            },
        );
        CacheHandle(Arc::new(key.to_string()))
    }

    fn force_headers(&mut self, handle: &CacheHandle, headers: &str) {
        if let Some(mut entry) = self.entries.get_mut(handle.key()) {
            entry.headers = headers.to_string();
        }
    }
}
