//! In-process object store for tests and local experiments.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use domains::{ByteStream, DomainError, DomainResult, EntityKind, ObjectStore};

use super::{validate_key, PublicBase};

#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    public: PublicBase,
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryObjectStore {
    pub fn new(public_base_url: &str) -> DomainResult<Self> {
        Ok(Self {
            public: PublicBase::parse(public_base_url)?,
            objects: Arc::default(),
        })
    }

    /// Stores `bytes` under `path` and returns its public URL.
    pub fn put(&self, path: &str, bytes: impl Into<Bytes>) -> DomainResult<String> {
        validate_key(path)?;
        self.objects
            .write()
            .map_err(|_| DomainError::internal("object map poisoned"))?
            .insert(path.to_owned(), bytes.into());
        Ok(self.public.url_for(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn generate_upload_url(&self, path: &str, ttl: Duration) -> DomainResult<String> {
        validate_key(path)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("{}?expires={expires}", self.public.url_for(path)))
    }

    async fn download(&self, path: &str) -> DomainResult<ByteStream> {
        let bytes = self
            .objects
            .read()
            .map_err(|_| DomainError::internal("object map poisoned"))?
            .get(path)
            .cloned()
            .ok_or_else(|| DomainError::not_found(EntityKind::StoredObject))?;
        Ok(Box::pin(Cursor::new(bytes)))
    }

    async fn delete(&self, path: &str) -> DomainResult<()> {
        self.objects
            .write()
            .map_err(|_| DomainError::internal("object map poisoned"))?
            .remove(path);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        self.public.url_for(path)
    }

    fn extract_storage_path(&self, url: &str) -> Option<String> {
        self.public.key_of(url)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn stored_objects_stream_back() {
        let store = MemoryObjectStore::new("https://cdn.test").unwrap();
        let url = store.put("uploads/u/app.apk", &b"payload"[..]).unwrap();
        let path = store.extract_storage_path(&url).unwrap();

        let mut out = Vec::new();
        store
            .download(&path)
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"payload");
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let store = MemoryObjectStore::new("https://cdn.test").unwrap();
        let err = store.download("nope.apk").await.err().unwrap();
        assert!(matches!(
            err,
            DomainError::NotFound {
                entity: EntityKind::StoredObject
            }
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryObjectStore::new("https://cdn.test").unwrap();
        store.put("a.apk", Bytes::from_static(b"x")).unwrap();
        store.delete("a.apk").await.unwrap();
        store.delete("a.apk").await.unwrap();
        assert!(!store.contains("a.apk"));
    }
}
