//! In-process object store for tests and throwaway development runs.

use super::{
    ObjectLocation, ObjectStore, PresignedUrl, StorageClass, StorageError, StorageResult,
    StoredObject, ensure_key_safe,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Bytes,
    content_type: String,
    storage_class: StorageClass,
}

/// Keeps payloads in a map. Individual operations can be switched to fail.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), MemoryObject>>,
    deletes: Mutex<Vec<ObjectLocation>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, location: &ObjectLocation) -> bool {
        self.objects()
            .contains_key(&(location.bucket.clone(), location.key.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self, location: &ObjectLocation) -> Option<String> {
        self.objects()
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|object| object.content_type.clone())
    }

    pub fn storage_class(&self, location: &ObjectLocation) -> Option<StorageClass> {
        self.objects()
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|object| object.storage_class)
    }

    /// Every location `delete` was called with, including failed calls.
    pub fn delete_calls(&self) -> Vec<ObjectLocation> {
        self.deletes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<(String, String), MemoryObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn not_found(location: &ObjectLocation) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<StoredObject> {
        ensure_key_safe(&location.key)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("put disabled".into()));
        }
        let size_bytes = bytes.len() as i64;
        let etag = format!("{:x}", md5::compute(&bytes));
        self.objects().insert(
            (location.bucket.clone(), location.key.clone()),
            MemoryObject {
                bytes,
                content_type: content_type.to_string(),
                storage_class: StorageClass::Standard,
            },
        );
        Ok(StoredObject {
            location: location.clone(),
            size_bytes,
            etag: Some(etag),
        })
    }

    async fn get(&self, location: &ObjectLocation) -> StorageResult<Bytes> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("get disabled".into()));
        }
        self.objects()
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|object| object.bytes.clone())
            .ok_or_else(|| Self::not_found(location))
    }

    async fn presign_get(
        &self,
        location: &ObjectLocation,
        ttl: Duration,
    ) -> StorageResult<PresignedUrl> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| StorageError::Unavailable(format!("invalid link ttl: {err}")))?;
        let expires_at = Utc::now() + ttl;
        Ok(PresignedUrl {
            url: format!(
                "memory://{}/{}?expires={}",
                location.bucket,
                location.key,
                expires_at.timestamp()
            ),
            expires_at,
        })
    }

    async fn delete(&self, location: &ObjectLocation) -> StorageResult<bool> {
        self.deletes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(location.clone());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("delete disabled".into()));
        }
        Ok(self
            .objects()
            .remove(&(location.bucket.clone(), location.key.clone()))
            .is_some())
    }

    async fn transition_storage_class(
        &self,
        location: &ObjectLocation,
        class: StorageClass,
    ) -> StorageResult<()> {
        let mut objects = self.objects();
        let object = objects
            .get_mut(&(location.bucket.clone(), location.key.clone()))
            .ok_or_else(|| Self::not_found(location))?;
        object.storage_class = class;
        Ok(())
    }
}
