use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::task::TaskRecord;

pub const ACCESS_KEY_HEADER: &str = "X-Access-Key";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to fetch task collection")]
    Fetch(#[source] BoxError),

    #[error("failed to replace task collection")]
    Write(#[source] BoxError),
}

impl StoreError {
    fn fetch(err: impl Into<BoxError>) -> Self {
        Self::Fetch(err.into())
    }

    fn write(err: impl Into<BoxError>) -> Self {
        Self::Write(err.into())
    }
}

/// A remote document holding the whole collection. Reads and writes always
/// move the full sequence; there is no per-record or conditional write, so
/// two writers racing fetch, mutate, replace will overwrite each other.
pub trait RecordStore: Send + Sync {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<TaskRecord>, StoreError>> + Send;

    /// Replaces the document. Callers must fetch again afterwards; the
    /// written value is not assumed to be what the store now holds.
    fn replace_all(
        &self,
        collection: &[TaskRecord],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    record: Option<Vec<TaskRecord>>,
}

/// JSONBin-style store: `GET {base}/b/{id}` answers `{ "record": [...] }`,
/// `PUT {base}/b/{id}` takes the bare array.
#[derive(Debug, Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    endpoint: String,
    access_key: Option<String>,
}

impl HttpRecordStore {
    pub fn new(
        base_url: &str,
        collection_id: &str,
        access_key: Option<String>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("failed building HTTP client for the record store")?;

        Ok(Self {
            client,
            endpoint: format!("{}/b/{}", base_url.trim_end_matches('/'), collection_id),
            access_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_key.as_deref() {
            Some(key) => request.header(ACCESS_KEY_HEADER, key),
            None => request,
        }
    }
}

impl RecordStore for HttpRecordStore {
    #[tracing::instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let response = self
            .authorize(self.client.get(&self.endpoint))
            .send()
            .await
            .map_err(StoreError::fetch)?
            .error_for_status()
            .map_err(StoreError::fetch)?;

        let envelope: Envelope = response.json().await.map_err(StoreError::fetch)?;
        let records = envelope.record.unwrap_or_default();
        debug!(count = records.len(), "fetched collection");
        Ok(records)
    }

    #[tracing::instrument(skip(self, collection), fields(endpoint = %self.endpoint, count = collection.len()))]
    async fn replace_all(&self, collection: &[TaskRecord]) -> Result<(), StoreError> {
        self.authorize(self.client.put(&self.endpoint))
            .json(collection)
            .send()
            .await
            .map_err(StoreError::write)?
            .error_for_status()
            .map_err(StoreError::write)?;

        debug!("replaced collection");
        Ok(())
    }
}

/// Local JSON document with the same whole-document semantics. A missing
/// file reads as an empty collection.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    #[tracing::instrument(skip(path))]
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        info!(file = %path.display(), "opened file record store");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for FileRecordStore {
    #[tracing::instrument(skip(self), fields(file = %self.path.display()))]
    async fn fetch_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        load_document(&self.path).map_err(StoreError::fetch)
    }

    #[tracing::instrument(skip(self, collection), fields(file = %self.path.display(), count = collection.len()))]
    async fn replace_all(&self, collection: &[TaskRecord]) -> Result<(), StoreError> {
        save_document_atomic(&self.path, collection).map_err(StoreError::write)
    }
}

fn load_document(path: &Path) -> Result<Vec<TaskRecord>, BoxError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(vec![]);
    }
    let records: Vec<TaskRecord> = serde_json::from_str(&raw)?;
    debug!(file = %path.display(), count = records.len(), "loaded document");
    Ok(records)
}

fn save_document_atomic(path: &Path, collection: &[TaskRecord]) -> Result<(), BoxError> {
    debug!(file = %path.display(), count = collection.len(), "saving document atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, collection)?;
    writeln!(temp)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| format!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

/// In-memory document with switchable failures and a write counter.
/// Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    document: Mutex<Vec<TaskRecord>>,
    fail_fetch: AtomicBool,
    fail_write: AtomicBool,
    fetches: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new(initial: Vec<TaskRecord>) -> Self {
        let store = Self::default();
        *store.inner.document.lock() = initial;
        store
    }

    pub fn snapshot(&self) -> Vec<TaskRecord> {
        self.inner.document.lock().clone()
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.inner.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.inner.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }
}

impl RecordStore for MemoryRecordStore {
    async fn fetch_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::fetch("memory store fetch failure"));
        }
        Ok(self.snapshot())
    }

    async fn replace_all(&self, collection: &[TaskRecord]) -> Result<(), StoreError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_write.load(Ordering::SeqCst) {
            return Err(StoreError::write("memory store write failure"));
        }
        *self.inner.document.lock() = collection.to_vec();
        Ok(())
    }
}

/// Backend picked from configuration at startup.
#[derive(Debug, Clone)]
pub enum AnyRecordStore {
    Http(HttpRecordStore),
    File(FileRecordStore),
}

impl RecordStore for AnyRecordStore {
    async fn fetch_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        match self {
            Self::Http(store) => store.fetch_all().await,
            Self::File(store) => store.fetch_all().await,
        }
    }

    async fn replace_all(&self, collection: &[TaskRecord]) -> Result<(), StoreError> {
        match self {
            Self::Http(store) => store.replace_all(collection).await,
            Self::File(store) => store.replace_all(collection).await,
        }
    }
}
