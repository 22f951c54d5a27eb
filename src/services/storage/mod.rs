//! Object storage adapter.
//!
//! Document payloads live in a provider-managed object store addressed by
//! `(bucket, key, region)`. Backends implement [`ObjectStore`]; the rest of
//! the service only sees the trait and [`region::RegionRouter`].

pub mod local;
pub mod memory;
pub mod region;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{io, time::Duration};
use thiserror::Error;

/// Physical address of a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

/// What a backend reports after a successful write.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub location: ObjectLocation,
    pub size_bytes: i64,
    pub etag: Option<String>,
}

/// A time-limited read link for a private object.
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Standard,
    /// Instant-retrieval archive tier.
    Archive,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::Archive => "GLACIER_IR",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("invalid bucket name `{0}`")]
    InvalidBucketName(String),
    #[error("download link has expired")]
    LinkExpired,
    #[error("download link signature does not match")]
    InvalidSignature,
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Operations the service needs from an object store.
///
/// Implementations never retry; callers decide what a failure means.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs and readiness output.
    fn backend_name(&self) -> &'static str;

    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<StoredObject>;

    async fn get(&self, location: &ObjectLocation) -> StorageResult<Bytes>;

    async fn presign_get(
        &self,
        location: &ObjectLocation,
        ttl: Duration,
    ) -> StorageResult<PresignedUrl>;

    /// Returns `false` when the object was already absent.
    async fn delete(&self, location: &ObjectLocation) -> StorageResult<bool>;

    async fn transition_storage_class(
        &self,
        location: &ObjectLocation,
        class: StorageClass,
    ) -> StorageResult<()>;

    /// Remove leftovers of interrupted writes older than `older_than`.
    async fn sweep_temp_artifacts(&self, _older_than: Duration) -> StorageResult<usize> {
        Ok(0)
    }

    async fn ping(&self, _bucket: &str) -> StorageResult<()> {
        Ok(())
    }
}

/// Rejects keys that could escape the bucket directory or confuse providers.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;

    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// S3-style bucket naming: 3-63 chars of `[a-z0-9.-]`, alphanumeric at both
/// ends, no `..`/`.-`/`-.`, and not shaped like an IPv4 address.
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidBucketName(name.to_string());

    if !(3..=63).contains(&name.len()) {
        return Err(invalid());
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid());
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid());
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid());
    }
    if is_ipv4_like(name) {
        return Err(invalid());
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_the_bucket() {
        assert!(ensure_key_safe("documents/clients/a/passport/x.pdf").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/etc/passwd").is_err());
        assert!(ensure_key_safe("documents/../../secret").is_err());
        assert!(ensure_key_safe("bad\\key").is_err());
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("immigration-docs-au").is_ok());
        assert!(ensure_bucket_name_safe("ab").is_err());
        assert!(ensure_bucket_name_safe("Upper").is_err());
        assert!(ensure_bucket_name_safe("-leading").is_err());
        assert!(ensure_bucket_name_safe("a..b").is_err());
        assert!(ensure_bucket_name_safe("192.168.0.1").is_err());
    }
}
