use std::sync::Arc;

use domains::{Artifact, DomainError, DomainResult, NewArtifact, ObjectStore, UploadTarget};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::uploads;
use crate::Repositories;

/// Artifact registration input, as supplied by a client that already
/// uploaded the binary and computed its digest.
#[derive(Debug, Clone)]
pub struct RegisterArtifact {
    pub file_url: String,
    pub sha256: String,
    pub file_size: i64,
    pub file_type: String,
    pub abi: Option<String>,
}

/// 64 lowercase hex characters.
pub fn validate_sha256(sha256: &str) -> DomainResult<()> {
    let valid = sha256.len() == 64
        && sha256
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !valid {
        return Err(DomainError::validation(
            "sha256",
            "expected 64 lowercase hexadecimal characters",
        ));
    }
    Ok(())
}

pub struct ArtifactService {
    repos: Repositories,
    store: Arc<dyn ObjectStore>,
}

impl ArtifactService {
    pub fn new(repos: Repositories, store: Arc<dyn ObjectStore>) -> Self {
        Self { repos, store }
    }

    /// Signed upload target under the release's storage prefix.
    #[instrument(skip(self), fields(user_id = %actor))]
    pub async fn upload_url(
        &self,
        actor: Uuid,
        release_id: Uuid,
        filename: &str,
    ) -> DomainResult<UploadTarget> {
        let (release, application) = self.repos.owned_release(actor, release_id).await?;
        let path = uploads::artifact_path(application.id, release.id, filename)?;
        uploads::signed_target(self.store.as_ref(), path).await
    }

    #[instrument(skip(self, input), fields(user_id = %actor))]
    pub async fn register(
        &self,
        actor: Uuid,
        release_id: Uuid,
        input: RegisterArtifact,
    ) -> DomainResult<Artifact> {
        self.repos.owned_release(actor, release_id).await?;

        validate_sha256(&input.sha256)?;
        if input.file_size < 0 {
            return Err(DomainError::validation(
                "file_size",
                "file size cannot be negative",
            ));
        }
        let file_type: mime::Mime = input.file_type.parse().map_err(|_| {
            DomainError::validation(
                "file_type",
                format!("{:?} is not a MIME type", input.file_type),
            )
        })?;
        let abi = input
            .abi
            .map(|abi| abi.trim().to_owned())
            .filter(|abi| !abi.is_empty());

        let artifact = self
            .repos
            .artifacts
            .create(NewArtifact {
                file_url: input.file_url,
                sha256: input.sha256,
                file_size: input.file_size,
                file_type: file_type.essence_str().to_owned(),
                abi,
                release_id,
            })
            .await?;
        info!(artifact_id = %artifact.id, "artifact registered");
        Ok(artifact)
    }

    pub async fn list_by_release(&self, release_id: Uuid) -> DomainResult<Vec<Artifact>> {
        self.repos.artifacts.list_by_release(release_id).await
    }

    pub async fn delete(&self, actor: Uuid, id: Uuid) -> DomainResult<()> {
        self.repos.owned_artifact(actor, id).await?;
        self.repos.artifacts.soft_delete(id).await
    }

    /// Removes the stored object, then the row itself.
    ///
    /// A failed object deletion leaves the row in place so the purge can be
    /// retried. Artifacts pointing outside the store only lose their row.
    #[instrument(skip(self), fields(user_id = %actor))]
    pub async fn purge(&self, actor: Uuid, id: Uuid) -> DomainResult<()> {
        let artifact = self.repos.owned_artifact(actor, id).await?;

        match self.store.extract_storage_path(&artifact.file_url) {
            Some(path) => self.store.delete(&path).await?,
            None => warn!(file_url = %artifact.file_url, "purged artifact is not in the object store"),
        }
        self.repos.artifacts.hard_delete(id).await?;

        info!(artifact_id = %id, "artifact purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use domains::{ApplicationRelease, MockObjectStore};
    use mockall::predicate::eq;

    use super::*;
    use crate::test_support::{application, project, release, Mocks};

    fn owned_release(mocks: &mut Mocks, owner: Uuid) -> ApplicationRelease {
        let proj = project(owner);
        let app = application(proj.id, "com.example.app");
        let rel = release(app.id, 1);
        let rel_clone = rel.clone();
        mocks
            .releases
            .expect_find_by_id()
            .returning(move |_| Ok(rel_clone.clone()));
        mocks
            .applications
            .expect_find_by_id()
            .returning(move |_| Ok(app.clone()));
        mocks
            .projects
            .expect_find_by_id()
            .returning(move |_| Ok(proj.clone()));
        rel
    }

    fn artifact(release_id: Uuid, file_url: &str) -> Artifact {
        let now = Utc::now();
        Artifact {
            id: Uuid::now_v7(),
            file_url: file_url.into(),
            sha256: "a".repeat(64),
            file_size: 10,
            file_type: domains::APK_MIME_TYPE.into(),
            abi: None,
            release_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn digests_must_be_lowercase_hex() {
        assert!(validate_sha256(&"0f".repeat(32)).is_ok());
        assert!(validate_sha256(&"0F".repeat(32)).is_err());
        assert!(validate_sha256("abc").is_err());
        assert!(validate_sha256(&"g".repeat(64)).is_err());
    }

    #[tokio::test]
    async fn register_normalizes_abi_and_mime() {
        let owner = Uuid::now_v7();
        let mut mocks = Mocks::default();
        let rel = owned_release(&mut mocks, owner);
        mocks.artifacts.expect_create().returning(|input| {
            assert_eq!(input.abi.as_deref(), Some("arm64-v8a"));
            assert_eq!(input.file_type, "application/vnd.android.package-archive");
            let mut a = artifact(input.release_id, &input.file_url);
            a.abi = input.abi;
            Ok(a)
        });

        let service = ArtifactService::new(mocks.build(), Arc::new(MockObjectStore::new()));
        let created = service
            .register(
                owner,
                rel.id,
                RegisterArtifact {
                    file_url: "https://cdn.test/a.apk".into(),
                    sha256: "ab".repeat(32),
                    file_size: 10,
                    file_type: "application/vnd.android.package-archive; charset=binary".into(),
                    abi: Some(" arm64-v8a ".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.abi.as_deref(), Some("arm64-v8a"));
    }

    #[tokio::test]
    async fn register_rejects_bad_mime() {
        let owner = Uuid::now_v7();
        let mut mocks = Mocks::default();
        let rel = owned_release(&mut mocks, owner);
        mocks.artifacts.expect_create().never();

        let err = ArtifactService::new(mocks.build(), Arc::new(MockObjectStore::new()))
            .register(
                owner,
                rel.id,
                RegisterArtifact {
                    file_url: "https://cdn.test/a.apk".into(),
                    sha256: "ab".repeat(32),
                    file_size: 10,
                    file_type: "not a mime".into(),
                    abi: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("file_type"));
    }

    #[tokio::test]
    async fn upload_url_uses_the_release_prefix() {
        let owner = Uuid::now_v7();
        let mut mocks = Mocks::default();
        let rel = owned_release(&mut mocks, owner);
        let prefix = format!("apps/{}/releases/{}/", rel.application_id, rel.id);

        let mut store = MockObjectStore::new();
        let expected_prefix = prefix.clone();
        store
            .expect_generate_upload_url()
            .withf(move |path, ttl| path.starts_with(&expected_prefix) && ttl.as_secs() == 900)
            .returning(|path, _| Ok(format!("https://cdn.test/{path}?signature=x")));
        store
            .expect_public_url()
            .returning(|path| format!("https://cdn.test/{path}"));

        let target = ArtifactService::new(mocks.build(), Arc::new(store))
            .upload_url(owner, rel.id, "../app-release.apk")
            .await
            .unwrap();
        assert!(target.path.starts_with(&prefix));
        assert!(target.path.ends_with("_app-release.apk"));
        assert_eq!(target.file_url, format!("https://cdn.test/{}", target.path));
    }

    #[tokio::test]
    async fn purge_deletes_object_then_row() {
        let owner = Uuid::now_v7();
        let mut mocks = Mocks::default();
        let rel = owned_release(&mut mocks, owner);
        let art = artifact(rel.id, "https://cdn.test/apps/x/app.apk");
        let art_id = art.id;
        mocks
            .artifacts
            .expect_find_by_id()
            .returning(move |_| Ok(art.clone()));
        mocks
            .artifacts
            .expect_hard_delete()
            .with(eq(art_id))
            .times(1)
            .returning(|_| Ok(()));

        let mut store = MockObjectStore::new();
        store
            .expect_extract_storage_path()
            .returning(|url| url.strip_prefix("https://cdn.test/").map(str::to_owned));
        store
            .expect_delete()
            .with(eq("apps/x/app.apk"))
            .times(1)
            .returning(|_| Ok(()));

        ArtifactService::new(mocks.build(), Arc::new(store))
            .purge(owner, art_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_object_delete_keeps_the_row() {
        let owner = Uuid::now_v7();
        let mut mocks = Mocks::default();
        let rel = owned_release(&mut mocks, owner);
        let art = artifact(rel.id, "https://cdn.test/apps/x/app.apk");
        let art_id = art.id;
        mocks
            .artifacts
            .expect_find_by_id()
            .returning(move |_| Ok(art.clone()));
        mocks.artifacts.expect_hard_delete().never();

        let mut store = MockObjectStore::new();
        store
            .expect_extract_storage_path()
            .returning(|url| url.strip_prefix("https://cdn.test/").map(str::to_owned));
        store
            .expect_delete()
            .returning(|_| Err(DomainError::internal("storage unreachable")));

        let err = ArtifactService::new(mocks.build(), Arc::new(store))
            .purge(owner, art_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Internal(_)));
    }
}
