//! Blob-store gateway.
//!
//! The processing pipeline only ever talks to [`ObjectStore`]: read bytes by
//! (bucket, object), write bytes with a content type, list (name,
//! content-type) pairs under a prefix. [`FsObjectStore`] is the local-disk
//! implementation that backs both binaries; [`MemoryStore`] is an in-memory
//! map used by tests and experiments. A hosted-store client would slot in
//! behind the same trait.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// One listed object: its full name under the bucket and the content type
/// recorded for it, when known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{object}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, object: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, bucket: &str, object: &str) -> StoreResult<Bytes>;
    async fn upload(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreResult<()>;
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>>;
}

/// Local-disk object store laid out as `base_path/{bucket}/{object}`.
///
/// Writes go through a temp file and are fsynced before an atomic rename, so
/// a listed object is always fully written. The filesystem keeps no
/// content-type metadata; listings infer it from the file extension.
#[derive(Clone)]
pub struct FsObjectStore {
    base_path: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, bucket: &str, object: &str) -> StoreResult<PathBuf> {
        ensure_bucket_safe(bucket)?;
        ensure_key_safe(object)?;
        let mut path = self.base_path.clone();
        path.push(bucket);
        path.push(object);
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, bucket: &str, object: &str) -> StoreResult<Bytes> {
        let path = self.object_path(bucket, object)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        _content_type: &str,
    ) -> StoreResult<()> {
        let path = self.object_path(bucket, object)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or(StoreError::InvalidObjectKey)?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let write_result = async {
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        debug!("wrote {}", path.display());
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        ensure_bucket_safe(bucket)?;
        let root = self.base_path.join(bucket);
        let mut entries = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&root) else {
                    continue;
                };
                let name = rel.to_string_lossy().replace('\\', "/");
                // In-flight temp files are not objects.
                if name.rsplit('/').next().is_some_and(|f| f.starts_with(".tmp-")) {
                    continue;
                }
                if name.starts_with(prefix) {
                    entries.push(ObjectEntry {
                        content_type: guess_content_type(&name).map(str::to_string),
                        name,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Reject keys with trivial path-traversal vectors before they reach the
/// filesystem. Same rules the key can rely on regardless of backing store.
fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
        return Err(StoreError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidObjectKey);
    }
    Ok(())
}

fn ensure_bucket_safe(bucket: &str) -> StoreResult<()> {
    if bucket.is_empty() || bucket.contains('/') {
        return Err(StoreError::InvalidObjectKey);
    }
    ensure_key_safe(bucket)
}

fn guess_content_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        Some("gif") => Some("image/gif"),
        Some("bmp") => Some("image/bmp"),
        Some("tif") | Some("tiff") => Some("image/tiff"),
        Some("webp") => Some("image/webp"),
        _ => None,
    }
}

/// In-memory store keyed by (bucket, object). Listing order is the sorted
/// key order, matching what the filesystem store produces.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), (Bytes, Option<String>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing upload. Names ending in `/` model
    /// the directory placeholders some stores surface in listings.
    pub fn insert(&self, bucket: &str, object: &str, data: Bytes, content_type: Option<&str>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), object.to_string()),
            (data, content_type.map(str::to_string)),
        );
    }

    pub fn get(&self, bucket: &str, object: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), object.to_string()))
            .map(|(data, _)| data.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn download(&self, bucket: &str, object: &str) -> StoreResult<Bytes> {
        self.get(bucket, object).ok_or_else(|| StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        ensure_key_safe(object)?;
        self.insert(bucket, object, data, Some(content_type));
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, name), _)| b == bucket && name.starts_with(prefix))
            .map(|((_, name), (_, content_type))| ObjectEntry {
                name: name.clone(),
                content_type: content_type.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> FsObjectStore {
        let dir = std::env::temp_dir().join(format!("thumbnailer-gw-{}", Uuid::new_v4()));
        FsObjectStore::new(dir)
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let store = scratch_store();
        store
            .upload("photos", "a/cat.png", Bytes::from_static(b"png!"), "image/png")
            .await
            .unwrap();
        let data = store.download("photos", "a/cat.png").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"png!"));
        let _ = fs::remove_dir_all(store.base_path()).await;
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = scratch_store();
        let err = store.download("photos", "nope.png").await.unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_sorted_and_prefix_filtered() {
        let store = scratch_store();
        for name in ["b/two.png", "a/one.jpg", "a/zzz.txt", "c.gif"] {
            store
                .upload("photos", name, Bytes::from_static(b"x"), "application/octet-stream")
                .await
                .unwrap();
        }

        let all = store.list("photos", "").await.unwrap();
        let names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a/one.jpg", "a/zzz.txt", "b/two.png", "c.gif"]);
        assert_eq!(all[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(all[1].content_type, None);

        let under_a = store.list("photos", "a/").await.unwrap();
        assert_eq!(under_a.len(), 2);
        let _ = fs::remove_dir_all(store.base_path()).await;
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let store = scratch_store();
        for key in ["../escape.png", "/abs.png", "a/../../b.png", ""] {
            let err = store
                .upload("photos", key, Bytes::from_static(b"x"), "image/png")
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidObjectKey), "key {key:?}");
        }
    }

    #[tokio::test]
    async fn memory_store_lists_in_sorted_order() {
        let store = MemoryStore::new();
        store.insert("b", "z.png", Bytes::new(), None);
        store.insert("b", "a.png", Bytes::new(), Some("image/png"));
        store.insert("other", "m.png", Bytes::new(), None);

        let names: Vec<_> = store
            .list("b", "")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.png", "z.png"]);
    }
}
