use std::sync::Arc;

use domains::{DomainResult, ObjectStore, UploadTarget};
use tracing::instrument;
use uuid::Uuid;

use crate::uploads;

/// Generic per-user uploads, not yet attached to any release.
pub struct FileService {
    store: Arc<dyn ObjectStore>,
}

impl FileService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn upload_url(&self, user_id: Uuid, filename: &str) -> DomainResult<UploadTarget> {
        let path = uploads::user_upload_path(user_id, filename)?;
        uploads::signed_target(self.store.as_ref(), path).await
    }
}

#[cfg(test)]
mod tests {
    use domains::MockObjectStore;

    use super::*;

    #[tokio::test]
    async fn uploads_are_scoped_to_the_user() {
        let user = Uuid::now_v7();
        let mut store = MockObjectStore::new();
        store
            .expect_generate_upload_url()
            .returning(|path, _| Ok(format!("https://cdn.test/{path}?signature=x")));
        store
            .expect_public_url()
            .returning(|path| format!("https://cdn.test/{path}"));

        let target = FileService::new(Arc::new(store))
            .upload_url(user, "dist/app.apk")
            .await
            .unwrap();

        assert!(target.path.starts_with(&format!("uploads/{user}/")));
        assert!(target.path.ends_with("_app.apk"));
        assert!(target.upload_url.contains("signature="));
    }

    #[tokio::test]
    async fn empty_filename_is_rejected() {
        let mut store = MockObjectStore::new();
        store.expect_generate_upload_url().never();

        let err = FileService::new(Arc::new(store))
            .upload_url(Uuid::now_v7(), "uploads/")
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("filename"));
    }
}
