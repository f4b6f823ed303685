//! Object store port and its two backends
//!
//! The pipeline talks to storage through [`ObjectStore`]: get / head /
//! ranged-get / put / delete over immutable objects keyed by
//! `host + normalized_path`. [`FsObjectStore`] keeps one content file and
//! one JSON metadata sidecar per object, written atomically via a temp
//! file and rename. [`MemoryObjectStore`] backs tests and ephemeral
//! deployments.

use crate::error::{CdnError, Result};
use crate::models::ObjectMetadata;
use crate::stream_util::{collect_stream, once_stream, ByteStream};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

const READ_CHUNK: usize = 64 * 1024;

/// Metadata for a stored object, minus the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: String,
    /// Store-assigned opaque entity tag, already in quoted header form
    pub etag: String,
    pub uploaded: SystemTime,
    pub metadata: ObjectMetadata,
}

/// A stored object with its body stream
pub struct StoredObject {
    pub info: ObjectInfo,
    pub body: ByteStream,
}

/// Abstract get/head/ranged-get/put/delete over the backing object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Full object with body, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Metadata only, or `None` when absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>>;

    /// `length` bytes starting at `offset`, or `None` when the object is
    /// absent or the offset is past its end.
    async fn get_range(&self, key: &str, offset: u64, length: u64)
        -> Result<Option<StoredObject>>;

    /// Store an object of known size. The write fails if the stream
    /// delivers more or fewer bytes than declared; a failed write leaves
    /// no visible object behind.
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

fn make_etag(size: u64, uploaded_ms: u64) -> String {
    format!("\"{:x}-{:x}\"", size, uploaded_ms)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// JSON sidecar persisted next to each content file
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    size: u64,
    content_type: String,
    etag: String,
    uploaded_ms: u64,
    metadata: ObjectMetadata,
}

impl Sidecar {
    fn to_info(&self) -> ObjectInfo {
        ObjectInfo {
            size: self.size,
            content_type: self.content_type.clone(),
            etag: self.etag.clone(),
            uploaded: UNIX_EPOCH + Duration::from_millis(self.uploaded_ms),
            metadata: self.metadata.clone(),
        }
    }
}

/// Filesystem-backed object store
pub struct FsObjectStore {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl FsObjectStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| CdnError::StoreError(format!("create {}: {}", root.display(), e)))?;
        Ok(FsObjectStore {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    fn data_path(&self, key: &str) -> PathBuf {
        let encoded = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.root.join(format!("{}.obj", encoded))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let encoded = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.root.join(format!("{}.meta.json", encoded))
    }

    fn tmp_path(&self, suffix: &str) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".tmp-{}-{}-{}", std::process::id(), seq, suffix))
    }

    async fn read_sidecar(&self, key: &str) -> Result<Option<Sidecar>> {
        match fs::read(self.meta_path(key)).await {
            Ok(raw) => {
                let sidecar: Sidecar = serde_json::from_slice(&raw)
                    .map_err(|e| CdnError::StoreError(format!("corrupt sidecar: {}", e)))?;
                Ok(Some(sidecar))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CdnError::StoreError(e.to_string())),
        }
    }

    /// Stream `length` bytes of a file starting at `offset`.
    fn file_stream(file: fs::File, length: u64) -> ByteStream {
        let limited = file.take(length);
        Box::pin(futures_util::stream::try_unfold(
            limited,
            |mut reader| async move {
                let mut buf = BytesMut::with_capacity(READ_CHUNK);
                let n = reader.read_buf(&mut buf).await?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some((buf.freeze(), reader)))
                }
            },
        ))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let Some(sidecar) = self.read_sidecar(key).await? else {
            return Ok(None);
        };
        let file = match fs::File::open(self.data_path(key)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CdnError::StoreError(e.to_string())),
        };
        let info = sidecar.to_info();
        let body = Self::file_stream(file, info.size);
        Ok(Some(StoredObject { info, body }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        Ok(self.read_sidecar(key).await?.map(|s| s.to_info()))
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<Option<StoredObject>> {
        let Some(sidecar) = self.read_sidecar(key).await? else {
            return Ok(None);
        };
        if offset >= sidecar.size {
            return Ok(None);
        }
        let mut file = match fs::File::open(self.data_path(key)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CdnError::StoreError(e.to_string())),
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| CdnError::StoreError(e.to_string()))?;
        let length = length.min(sidecar.size - offset);
        let info = sidecar.to_info();
        let body = Self::file_stream(file, length);
        Ok(Some(StoredObject { info, body }))
    }

    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        size: u64,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        let tmp = self.tmp_path("obj");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| CdnError::StoreError(format!("create temp: {}", e)))?;

        let mut written: u64 = 0;
        let mut failure: Option<CdnError> = None;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    failure = Some(CdnError::StoreError(format!("body stream: {}", e)));
                    break;
                }
            };
            written += chunk.len() as u64;
            if written > size {
                failure = Some(CdnError::StoreError(format!(
                    "body exceeds declared size {} for {}",
                    size, key
                )));
                break;
            }
            if let Err(e) = file.write_all(&chunk).await {
                failure = Some(CdnError::StoreError(e.to_string()));
                break;
            }
        }
        if failure.is_none() && written != size {
            failure = Some(CdnError::StoreError(format!(
                "short body: {} of {} bytes for {}",
                written, size, key
            )));
        }
        if let Some(err) = failure {
            drop(file);
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }
        file.flush()
            .await
            .map_err(|e| CdnError::StoreError(e.to_string()))?;
        drop(file);

        fs::rename(&tmp, self.data_path(key))
            .await
            .map_err(|e| CdnError::StoreError(format!("publish data: {}", e)))?;

        let uploaded_ms = now_unix_ms();
        let sidecar = Sidecar {
            size,
            content_type: content_type.to_string(),
            etag: make_etag(size, uploaded_ms),
            uploaded_ms,
            metadata,
        };
        let raw = serde_json::to_vec(&sidecar)
            .map_err(|e| CdnError::StoreError(format!("encode sidecar: {}", e)))?;
        let tmp_meta = self.tmp_path("meta");
        fs::write(&tmp_meta, raw)
            .await
            .map_err(|e| CdnError::StoreError(e.to_string()))?;
        fs::rename(&tmp_meta, self.meta_path(key))
            .await
            .map_err(|e| CdnError::StoreError(format!("publish sidecar: {}", e)))?;

        debug!(key, size, "stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Sidecar first so readers miss immediately
        for path in [self.meta_path(key), self.data_path(key)] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(key, error = %e, "delete failed");
                    return Err(CdnError::StoreError(e.to_string()));
                }
            }
        }
        Ok(())
    }
}

struct MemoryEntry {
    data: Bytes,
    info: ObjectInfo,
}

/// In-memory object store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryObjectStore {
    entries: tokio::sync::RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Full body of a stored object, for assertions.
    pub async fn object_bytes(&self, key: &str) -> Option<Bytes> {
        self.entries.read().await.get(key).map(|e| e.data.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|e| StoredObject {
            info: e.info.clone(),
            body: once_stream(e.data.clone()),
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|e| e.info.clone()))
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<Option<StoredObject>> {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if offset >= entry.info.size {
            return Ok(None);
        }
        let end = (offset + length).min(entry.info.size);
        let slice = entry.data.slice(offset as usize..end as usize);
        Ok(Some(StoredObject {
            info: entry.info.clone(),
            body: once_stream(slice),
        }))
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        let data = collect_stream(body)
            .await
            .map_err(|e| CdnError::StoreError(format!("body stream: {}", e)))?;
        if data.len() as u64 != size {
            return Err(CdnError::StoreError(format!(
                "body size {} does not match declared {} for {}",
                data.len(),
                size,
                key
            )));
        }
        let uploaded_ms = now_unix_ms();
        let info = ObjectInfo {
            size,
            content_type: content_type.to_string(),
            etag: make_etag(size, uploaded_ms),
            uploaded: UNIX_EPOCH + Duration::from_millis(uploaded_ms),
            metadata,
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), MemoryEntry { data, info });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
