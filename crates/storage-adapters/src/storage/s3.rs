//! S3-compatible object store (AWS S3, Cloudflare R2, MinIO).

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use domains::{ByteStream, DomainError, DomainResult, EntityKind, ObjectStore};
use tracing::{error, info};

use super::{validate_key, PublicBase};

/// Connection settings for [`S3ObjectStore::connect`].
#[derive(Debug, Clone)]
pub struct S3Options {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint; enables path-style addressing.
    pub endpoint_url: Option<String>,
    /// Static credentials. When absent the default AWS provider chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_base_url: String,
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public: PublicBase,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3ObjectStore {
    pub async fn connect(options: S3Options) -> DomainResult<Self> {
        let public = PublicBase::parse(&options.public_base_url)?;
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = options.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        if let (Some(key), Some(secret)) = (options.access_key_id, options.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(key, secret, None, None, "appshare"));
        }

        info!(bucket = %options.bucket, region = %options.region, "s3 object store ready");
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: options.bucket,
            public,
        })
    }
}

fn s3_error(operation: &'static str, e: impl std::fmt::Display) -> DomainError {
    error!(operation, error = %e, "s3 request failed");
    DomainError::internal(format!("object store {operation} failed"))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn generate_upload_url(&self, path: &str, ttl: Duration) -> DomainResult<String> {
        validate_key(path)?;
        let config = PresigningConfig::expires_in(ttl).map_err(|e| s3_error("presign", e))?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type.essence_str())
            .presigned(config)
            .await
            .map_err(|e| s3_error("presign", e))?;
        Ok(presigned.uri().to_string())
    }

    async fn download(&self, path: &str) -> DomainResult<ByteStream> {
        validate_key(path)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    DomainError::not_found(EntityKind::StoredObject)
                } else {
                    s3_error("get_object", aws_sdk_s3::error::DisplayErrorContext(e))
                }
            })?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn delete(&self, path: &str) -> DomainResult<()> {
        validate_key(path)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| s3_error("delete_object", aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        self.public.url_for(path)
    }

    fn extract_storage_path(&self, url: &str) -> Option<String> {
        self.public.key_of(url)
    }
}
