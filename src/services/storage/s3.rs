//! S3 (and S3-compatible) object store backend.

use super::{
    ObjectLocation, ObjectStore, PresignedUrl, StorageClass, StorageError, StorageResult,
    StoredObject, ensure_key_safe,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{self, MetadataDirective, ServerSideEncryption},
};
use bytes::Bytes;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

const CACHE_CONTROL: &str = "max-age=86400";

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    /// Override for S3-compatible providers such as MinIO.
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Builds a client from the default credential chain.
    pub async fn connect(settings: &S3Settings) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        info!(region = %settings.region, endpoint = ?settings.endpoint_url, "s3 client configured");

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

fn unavailable(op: &str, location: &ObjectLocation, err: impl std::error::Error) -> StorageError {
    let detail = DisplayErrorContext(&err).to_string();
    warn!(bucket = %location.bucket, key = %location.key, "s3 {op} failed: {detail}");
    StorageError::Unavailable(format!("{op} failed: {detail}"))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<StoredObject> {
        ensure_key_safe(&location.key)?;
        let size_bytes = bytes.len() as i64;
        let output = self
            .client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .cache_control(CACHE_CONTROL)
            .send()
            .await
            .map_err(|err| unavailable("put_object", location, err))?;

        Ok(StoredObject {
            location: location.clone(),
            size_bytes,
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
        })
    }

    async fn get(&self, location: &ObjectLocation) -> StorageResult<Bytes> {
        let output = match self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key())
                {
                    return Err(StorageError::ObjectNotFound {
                        bucket: location.bucket.clone(),
                        key: location.key.clone(),
                    });
                }
                return Err(unavailable("get_object", location, err));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| unavailable("get_object body", location, err))?;
        Ok(data.into_bytes())
    }

    async fn presign_get(
        &self,
        location: &ObjectLocation,
        ttl: Duration,
    ) -> StorageResult<PresignedUrl> {
        let config =
            PresigningConfig::expires_in(ttl).map_err(|err| unavailable("presign", location, err))?;
        let issued_at = Utc::now();
        let request = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .presigned(config)
            .await
            .map_err(|err| unavailable("presign", location, err))?;

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| StorageError::Unavailable(format!("invalid link ttl: {err}")))?;
        Ok(PresignedUrl {
            url: request.uri().to_string(),
            expires_at: issued_at + ttl,
        })
    }

    async fn delete(&self, location: &ObjectLocation) -> StorageResult<bool> {
        let existed = match self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => false,
            Err(err) => return Err(unavailable("head_object", location, err)),
        };

        self.client
            .delete_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|err| unavailable("delete_object", location, err))?;
        Ok(existed)
    }

    /// In-place copy with the new storage class.
    async fn transition_storage_class(
        &self,
        location: &ObjectLocation,
        class: StorageClass,
    ) -> StorageResult<()> {
        let target = match class {
            StorageClass::Standard => types::StorageClass::Standard,
            StorageClass::Archive => types::StorageClass::GlacierIr,
        };
        self.client
            .copy_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .copy_source(format!("{}/{}", location.bucket, location.key))
            .storage_class(target)
            .metadata_directive(MetadataDirective::Copy)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .send()
            .await
            .map_err(|err| unavailable("copy_object", location, err))?;
        Ok(())
    }

    async fn ping(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| {
                StorageError::Unavailable(format!(
                    "head_bucket {bucket} failed: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}
