//! Disk-backed object store.
//!
//! Payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Presigned URLs point back at this service (`/objects/{bucket}/{key}`) and
//! carry an expiry plus a SHA-256 keyed signature.

use super::{
    ObjectLocation, ObjectStore, PresignedUrl, StorageClass, StorageError, StorageResult,
    StoredObject, ensure_bucket_name_safe, ensure_key_safe,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const TEMP_PREFIX: &str = ".tmp-";

#[derive(Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
    public_base_url: String,
    signing_secret: String,
}

impl LocalObjectStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// First two bytes of MD5(bucket/key) as hex directory names.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn checked_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        Ok(self.object_path(bucket, key))
    }

    /// Keyed digest for local download links: SHA-256 over
    /// `secret|bucket|key|expires|secret`, URL-safe base64.
    ///
    /// This is not HMAC. Links only verify against this exact envelope and
    /// the same secret, so they are not interchangeable with S3 presigning.
    fn sign(&self, bucket: &str, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.as_bytes());
        hasher.update(b"|");
        hasher.update(key.as_bytes());
        hasher.update(b"|");
        hasher.update(expires.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.signing_secret.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Checks a link produced by [`ObjectStore::presign_get`].
    pub fn verify_link(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let expected = self.sign(bucket, key, expires);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(StorageError::InvalidSignature);
        }
        if now.timestamp() > expires {
            return Err(StorageError::LinkExpired);
        }
        Ok(())
    }

    /// Opens a payload for streaming, returning the file and its length.
    pub async fn open(&self, bucket: &str, key: &str) -> StorageResult<(File, u64)> {
        let path = self.checked_path(bucket, key)?;
        let file = File::open(&path)
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Walks up from `start` removing empty directories until `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    /// Writes to a temp file, fsyncs, then renames into place.
    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        _content_type: &str,
    ) -> StorageResult<StoredObject> {
        let file_path = self.checked_path(&location.bucket, &location.key)?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        if let Err(err) = write_durably(&tmp_path, &bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        debug!(bucket = %location.bucket, key = %location.key, size = bytes.len(), "stored object");
        Ok(StoredObject {
            location: location.clone(),
            size_bytes: bytes.len() as i64,
            etag: Some(format!("{:x}", md5::compute(&bytes))),
        })
    }

    async fn get(&self, location: &ObjectLocation) -> StorageResult<Bytes> {
        let path = self.checked_path(&location.bucket, &location.key)?;
        let data = fs::read(&path)
            .await
            .map_err(|err| not_found_or_io(err, &location.bucket, &location.key))?;
        Ok(Bytes::from(data))
    }

    async fn presign_get(
        &self,
        location: &ObjectLocation,
        ttl: Duration,
    ) -> StorageResult<PresignedUrl> {
        ensure_bucket_name_safe(&location.bucket)?;
        ensure_key_safe(&location.key)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| StorageError::Unavailable(format!("invalid link ttl: {err}")))?;
        let expires_at = Utc::now() + ttl;
        let expires = expires_at.timestamp();
        let signature = self.sign(&location.bucket, &location.key, expires);
        Ok(PresignedUrl {
            url: format!(
                "{}/objects/{}/{}?expires={}&signature={}",
                self.public_base_url, location.bucket, location.key, expires, signature
            ),
            expires_at,
        })
    }

    async fn delete(&self, location: &ObjectLocation) -> StorageResult<bool> {
        let file_path = self.checked_path(&location.bucket, &location.key)?;
        let existed = match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed physical file {}", file_path.display());
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(StorageError::Io(err)),
        };

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&location.bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(existed)
    }

    /// Disk has a single tier; the class lives only in document metadata.
    async fn transition_storage_class(
        &self,
        location: &ObjectLocation,
        class: StorageClass,
    ) -> StorageResult<()> {
        let path = self.checked_path(&location.bucket, &location.key)?;
        fs::metadata(&path)
            .await
            .map_err(|err| not_found_or_io(err, &location.bucket, &location.key))?;
        debug!(key = %location.key, class = class.as_str(), "storage class recorded");
        Ok(())
    }

    async fn sweep_temp_artifacts(&self, older_than: Duration) -> StorageResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                let is_temp = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(TEMP_PREFIX));
                if !is_temp {
                    continue;
                }
                let modified = entry.metadata().await?.modified()?;
                if modified <= cutoff {
                    match fs::remove_file(entry.path()).await {
                        Ok(_) => removed += 1,
                        Err(err) => warn!("could not remove {}: {}", entry.path().display(), err),
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Write/read/delete round trip under the base directory.
    async fn ping(&self, _bucket: &str) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let sentinel = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&sentinel, b"readyz").await?;
        let read_back = fs::read(&sentinel).await;
        let _ = fs::remove_file(&sentinel).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Unavailable("readiness file content mismatch".into()));
        }
        Ok(())
    }
}

async fn write_durably(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

fn not_found_or_io(err: io::Error, bucket: &str, key: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StorageError::Io(err)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
