// On-disk image store backed by cacache
// Author: kelexine (https://github.com/kelexine)
//
// Payloads are content-addressed blobs; the index entry for each key carries
// the write time plus a small JSON document with the source URL, content type
// and optional expiry. A schema marker at the store root guards against
// opening a layout written by a newer release.

use super::{EntryMeta, PersistentStore};
use crate::cache::{CacheEntry, CacheKey};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Layout version understood by this build.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_FILE: &str = "imgcache.schema";
const PROBE_FILE: &str = ".imgcache-probe";

/// JSON metadata attached to each index entry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexMetadata {
    source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    /// Unix millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

/// A validated handle to the store root.
#[derive(Debug)]
struct Connection {
    root: PathBuf,
}

impl Connection {
    async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            CacheError::Connection(format!("cannot create store at {}: {}", root.display(), e))
        })?;

        Self::check_schema(root).await?;

        // Opening must fail up front on a read-only or denied location,
        // not on the first write.
        let probe = root.join(PROBE_FILE);
        tokio::fs::write(&probe, b"ok").await.map_err(|e| {
            CacheError::Connection(format!("store at {} is not writable: {}", root.display(), e))
        })?;
        let _ = tokio::fs::remove_file(&probe).await;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    async fn check_schema(root: &Path) -> Result<()> {
        let path = root.join(SCHEMA_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let version: u32 = contents.trim().parse().map_err(|_| {
                    CacheError::Connection(format!(
                        "corrupt schema marker in {}: {:?}",
                        root.display(),
                        contents.trim()
                    ))
                })?;
                if version > SCHEMA_VERSION {
                    return Err(CacheError::Connection(format!(
                        "store schema v{} is newer than supported v{}",
                        version, SCHEMA_VERSION
                    )));
                }
                if version < SCHEMA_VERSION {
                    info!("Upgrading store schema v{} -> v{}", version, SCHEMA_VERSION);
                    Self::write_schema(&path).await?;
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Initializing store schema v{} at {}", SCHEMA_VERSION, root.display());
                Self::write_schema(&path).await
            }
            Err(e) => Err(CacheError::Connection(format!(
                "cannot read schema marker in {}: {}",
                root.display(),
                e
            ))),
        }
    }

    async fn write_schema(path: &Path) -> Result<()> {
        tokio::fs::write(path, SCHEMA_VERSION.to_string())
            .await
            .map_err(|e| CacheError::Connection(format!("schema upgrade failed: {}", e)))
    }
}

/// On-disk, content-addressed, integrity-checked image store.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            connection: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared connection, opened on first use.
    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(Arc::clone(conn));
        }

        let conn = Arc::new(Connection::open(&self.root).await?);
        debug!("Store connection opened at {}", self.root.display());
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Map a backend error. Failures caused by the store root disappearing or
    /// being denied drop the connection so the next call reopens it.
    async fn classify(&self, error: cacache::Error, operation: &str) -> CacheError {
        let connection_lost = match &error {
            cacache::Error::IoError(io, _) => {
                io.kind() == ErrorKind::PermissionDenied || !self.root.exists()
            }
            _ => false,
        };

        crate::metrics::record_store_failure(operation);
        if connection_lost {
            warn!("Store connection lost during {}: {}", operation, error);
            self.close().await;
            CacheError::Connection(format!("{} failed: {}", operation, error))
        } else {
            CacheError::Transaction(format!("{} failed: {}", operation, error))
        }
    }

    async fn content_shared(root: &Path, key: &CacheKey, integrity: &cacache::Integrity) -> Result<bool> {
        let root = root.to_path_buf();
        let key = key.as_str().to_string();
        let integrity = integrity.clone();

        tokio::task::spawn_blocking(move || {
            cacache::index::ls(&root)
                .filter_map(|entry| entry.ok())
                .any(|meta| meta.key != key && meta.integrity == integrity)
        })
        .await
        .map_err(|e| CacheError::Transaction(format!("index listing aborted: {}", e)))
    }

    fn to_entry_meta(meta: &cacache::Metadata) -> EntryMeta {
        let extra: IndexMetadata = serde_json::from_value(meta.metadata.clone()).unwrap_or_default();
        EntryMeta {
            key: CacheKey::new(meta.key.clone()),
            size: meta.size,
            stored_at: millis_to_datetime(u128_to_i64(meta.time)),
            source_url: extra.source_url,
            expires_at: extra.expires_at.map(millis_to_datetime),
        }
    }
}

fn u128_to_i64(value: u128) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl PersistentStore for DiskStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn open(&self) -> Result<()> {
        self.connection().await.map(|_| ()).inspect_err(|_| {
            crate::metrics::record_store_failure("open");
        })
    }

    async fn close(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!("Store connection closed at {}", self.root.display());
        }
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let conn = self.connection().await?;

        let meta = match cacache::metadata(&conn.root, key.as_str()).await {
            Ok(Some(meta)) => meta,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.classify(e, "get").await),
        };

        let payload = match cacache::read_hash(&conn.root, &meta.integrity).await {
            Ok(bytes) => bytes,
            // Content reclaimed by a removal of another key with identical bytes
            Err(cacache::Error::EntryNotFound(_, _)) => {
                debug!("Index entry {} points at missing content", key);
                return Ok(None);
            }
            Err(cacache::Error::IoError(io, _))
                if io.kind() == ErrorKind::NotFound && self.root.exists() =>
            {
                debug!("Index entry {} points at missing content", key);
                return Ok(None);
            }
            Err(e) => return Err(self.classify(e, "get").await),
        };

        let extra: IndexMetadata = serde_json::from_value(meta.metadata.clone()).unwrap_or_default();
        let mut entry = CacheEntry::new(
            key.clone(),
            Bytes::from(payload),
            extra.source_url,
            millis_to_datetime(u128_to_i64(meta.time)),
        )?
        .with_content_type(extra.content_type);
        entry.expires_at = extra.expires_at.map(millis_to_datetime);

        Ok(Some(entry))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.connection().await?;

        let metadata = serde_json::to_value(IndexMetadata {
            source_url: entry.source_url.clone(),
            content_type: entry.content_type.clone(),
            expires_at: entry.expires_at.map(|t| t.timestamp_millis()),
        })?;

        let opts = cacache::WriteOpts::new()
            .size(entry.size())
            .time(entry.stored_at.timestamp_millis().max(0) as u128)
            .metadata(metadata);

        let mut writer = match opts.open(&conn.root, entry.key.as_str()).await {
            Ok(writer) => writer,
            Err(e) => return Err(self.classify(e, "put").await),
        };
        writer.write_all(&entry.payload).await.map_err(|e| {
            crate::metrics::record_store_failure("put");
            CacheError::Transaction(format!("put failed for {}: {}", entry.key, e))
        })?;
        if let Err(e) = writer.commit().await {
            return Err(self.classify(e, "put").await);
        }

        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        let conn = self.connection().await?;

        let meta = match cacache::metadata(&conn.root, key.as_str()).await {
            Ok(Some(meta)) => meta,
            Ok(None) => return Ok(()),
            Err(e) => return Err(self.classify(e, "delete").await),
        };

        // Identical payloads share one content blob; keep it while another key points at it
        let shared = Self::content_shared(&conn.root, key, &meta.integrity).await?;

        let result = cacache::index::RemoveOpts::new()
            .remove_fully(!shared)
            .remove(&conn.root, key.as_str())
            .await;

        match result {
            Ok(()) => Ok(()),
            // Content already reclaimed through another key
            Err(cacache::Error::IoError(io, _))
                if io.kind() == ErrorKind::NotFound && self.root.exists() =>
            {
                // Tombstone the index entry so later reads see a miss
                cacache::remove(&conn.root, key.as_str())
                    .await
                    .map_err(|e| CacheError::Transaction(format!("delete failed for {}: {}", key, e)))
            }
            Err(e) => Err(self.classify(e, "delete").await),
        }
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries().await?.len())
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>> {
        let conn = self.connection().await?;
        let root = conn.root.clone();

        let listed = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in cacache::index::ls(&root) {
                match entry {
                    Ok(meta) => out.push(DiskStore::to_entry_meta(&meta)),
                    Err(e) => warn!("Store index entry unreadable: {}", e),
                }
            }
            out
        })
        .await
        .map_err(|e| CacheError::Transaction(format!("index listing aborted: {}", e)))?;

        Ok(listed)
    }

    async fn destroy(&self) -> Result<()> {
        self.close().await;

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!("Store at {} deleted", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                crate::metrics::record_store_failure("reset");
                Err(CacheError::Connection(format!(
                    "cannot delete store at {}: {}",
                    self.root.display(),
                    e
                )))
            }
        }
    }
}
