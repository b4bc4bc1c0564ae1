//! # Local filesystem object store
//!
//! Objects live under one root directory, keyed by their storage path.
//! Upload URLs point at the API's own `PUT /files/{path}` route and carry an
//! expiry plus an HMAC-SHA256 signature over the method, path and expiry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domains::{ByteStream, DomainError, DomainResult, EntityKind, ObjectStore};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{validate_key, PublicBase};

type HmacSha256 = Hmac<Sha256>;

pub struct LocalObjectStore {
    root: PathBuf,
    public: PublicBase,
    signing_key: Vec<u8>,
}

impl LocalObjectStore {
    /// `public_base_url` must be where the API mounts its `/files` route.
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: &str,
        signing_key: impl AsRef<[u8]>,
    ) -> DomainResult<Self> {
        let signing_key = signing_key.as_ref().to_vec();
        if signing_key.is_empty() {
            return Err(DomainError::validation("signing_key", "must not be empty"));
        }
        Ok(Self {
            root: root.into(),
            public: PublicBase::parse(public_base_url)?,
            signing_key,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &str) -> DomainResult<PathBuf> {
        validate_key(path)?;
        Ok(self.root.join(path))
    }

    fn mac(&self, path: &str, expires: i64) -> DomainResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| DomainError::internal(format!("signing key rejected: {e}")))?;
        mac.update(b"PUT\n");
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Checks the `expires` and `signature` query parameters of an upload.
    pub fn verify_upload(&self, path: &str, expires: i64, signature: &str) -> DomainResult<()> {
        validate_key(path)?;
        if expires < Utc::now().timestamp() {
            return Err(DomainError::validation("expires", "upload URL has expired"));
        }
        let signature = hex::decode(signature)
            .map_err(|_| DomainError::validation("signature", "malformed signature"))?;
        self.mac(path, expires)?
            .verify_slice(&signature)
            .map_err(|_| {
                warn!(path, "upload signature mismatch");
                DomainError::validation("signature", "signature does not match")
            })
    }

    /// Opens a staging file for `path`. Nothing becomes visible under the
    /// key until [`PendingUpload::finish`] succeeds.
    pub async fn begin_put(&self, path: &str) -> DomainResult<PendingUpload> {
        let target = self.file_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let mut staging = target.clone().into_os_string();
        staging.push(format!(".{}.part", Uuid::now_v7().simple()));
        let staging = PathBuf::from(staging);
        let file = fs::File::create(&staging).await.map_err(io_error)?;
        Ok(PendingUpload {
            file,
            staging,
            target,
            written: 0,
            finished: false,
        })
    }
}

/// An upload being streamed to disk. Dropped before `finish`, it deletes
/// its staging file.
pub struct PendingUpload {
    file: fs::File,
    staging: PathBuf,
    target: PathBuf,
    written: u64,
    finished: bool,
}

impl PendingUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> DomainResult<()> {
        self.file.write_all(chunk).await.map_err(io_error)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flushes to disk and moves the file into place. Returns the byte count.
    pub async fn finish(mut self) -> DomainResult<u64> {
        self.file.flush().await.map_err(io_error)?;
        self.file.sync_all().await.map_err(io_error)?;
        fs::rename(&self.staging, &self.target)
            .await
            .map_err(io_error)?;
        self.finished = true;
        debug!(target = %self.target.display(), bytes = self.written, "upload stored");
        Ok(self.written)
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}

fn io_error(e: std::io::Error) -> DomainError {
    error!(error = %e, "local object store I/O failure");
    DomainError::internal(format!("storage I/O failed: {e}"))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn generate_upload_url(&self, path: &str, ttl: Duration) -> DomainResult<String> {
        validate_key(path)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = hex::encode(self.mac(path, expires)?.finalize().into_bytes());
        Ok(format!(
            "{}?expires={expires}&signature={signature}",
            self.public.url_for(path)
        ))
    }

    async fn download(&self, path: &str) -> DomainResult<ByteStream> {
        let file = fs::File::open(self.file_path(path)?)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DomainError::not_found(EntityKind::StoredObject),
                _ => io_error(e),
            })?;
        Ok(Box::pin(file))
    }

    async fn delete(&self, path: &str) -> DomainResult<()> {
        match fs::remove_file(self.file_path(path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }

    fn public_url(&self, path: &str) -> String {
        self.public.url_for(path)
    }

    fn extract_storage_path(&self, url: &str) -> Option<String> {
        self.public.key_of(url)
    }
}
