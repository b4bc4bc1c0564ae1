//! # Artifact ingestion
//!
//! Turns an uploaded binary into persisted records:
//! fetch from storage → hash while buffering → parse manifest → validate →
//! one transaction.
//!
//! No connection or transaction is held while the binary is downloaded or
//! parsed. The scratch file is a [`tempfile::NamedTempFile`], removed when it
//! drops, which covers errors, panics and cancelled requests alike.

use std::path::PathBuf;
use std::sync::Arc;

use domains::{
    Application, ApplicationMetadata, ApplicationRelease, Artifact, DomainError, DomainResult,
    EntityKind, IsolationLevel, ManifestReader, NewApplication, NewArtifact, NewRelease, ObjectStore,
    ReleaseEnvironment, TransactionManager, APK_MIME_TYPE, UNIVERSAL_ARCHITECTURE,
};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::applications::validate_title;
use crate::hasher::ContentHasher;
use crate::transaction::run_in_transaction;
use crate::Repositories;

const INITIAL_RELEASE_NOTE: &str = "Initial release from creation";

#[derive(Debug, Clone, Default)]
pub struct IngestionOptions {
    /// Directory for scratch files; the system temp dir when `None`.
    pub scratch_dir: Option<PathBuf>,
    pub hasher: ContentHasher,
}

/// What the transaction creates before the release.
enum Target {
    /// A new release on an existing application.
    Release {
        application: Application,
        environment: ReleaseEnvironment,
        release_note: String,
    },
    /// A brand new application with an initial production release.
    Application { project_id: Uuid, title: String },
}

/// Rows written by one successful ingestion.
#[derive(Debug)]
struct Ingested {
    application: Option<Application>,
    release: ApplicationRelease,
    artifact: Artifact,
}

pub struct ArtifactIngestion {
    repos: Repositories,
    store: Arc<dyn ObjectStore>,
    reader: Arc<dyn ManifestReader>,
    transactions: Arc<dyn TransactionManager>,
    options: IngestionOptions,
}

impl ArtifactIngestion {
    pub fn new(
        repos: Repositories,
        store: Arc<dyn ObjectStore>,
        reader: Arc<dyn ManifestReader>,
        transactions: Arc<dyn TransactionManager>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            repos,
            store,
            reader,
            transactions,
            options,
        }
    }

    /// Creates a release and its artifact from a binary already uploaded to
    /// the object store.
    #[instrument(skip(self, artifact_url, release_note), fields(user_id = %actor))]
    pub async fn create_release_with_artifact_url(
        &self,
        actor: Uuid,
        application_id: Uuid,
        artifact_url: &str,
        release_note: &str,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease> {
        // 1. Ownership: application -> project -> owner, before any download.
        let application = self.repos.owned_application(actor, application_id).await?;

        // 2. Pipeline
        let target = Target::Release {
            application,
            environment,
            release_note: release_note.to_owned(),
        };
        let ingested = self.ingest(target, artifact_url).await?;

        info!(
            release_id = %ingested.release.id,
            artifact_id = %ingested.artifact.id,
            version_code = ingested.release.version_code,
            environment = %ingested.release.environment,
            "release created from artifact"
        );
        Ok(ingested.release)
    }

    /// Creates an application, its initial production release and the
    /// artifact, all from one uploaded binary.
    #[instrument(skip(self, title, artifact_url), fields(user_id = %actor))]
    pub async fn create_application_from_artifact(
        &self,
        actor: Uuid,
        project_id: Uuid,
        title: &str,
        artifact_url: &str,
    ) -> DomainResult<Application> {
        // 1. Ownership: project -> owner, then input checks, before any download.
        self.repos.owned_project(actor, project_id).await?;
        let title = validate_title(title)?;

        // 2. Pipeline
        let target = Target::Application {
            project_id,
            title: title.to_owned(),
        };
        let ingested = self.ingest(target, artifact_url).await?;

        let application = ingested.application.ok_or_else(|| {
            DomainError::internal("application ingestion finished without an application")
        })?;
        info!(
            application_id = %application.id,
            package_name = %application.package_name,
            release_id = %ingested.release.id,
            artifact_id = %ingested.artifact.id,
            "application created from artifact"
        );
        Ok(application)
    }

    /// Downloads, hashes and parses the binary without persisting anything.
    #[instrument(skip(self))]
    pub async fn extract_metadata_from_url(
        &self,
        artifact_url: &str,
    ) -> DomainResult<ApplicationMetadata> {
        self.inspect(artifact_url).await
    }

    async fn ingest(&self, target: Target, artifact_url: &str) -> DomainResult<Ingested> {
        // 3. Download, hash, parse
        let metadata = self.inspect(artifact_url).await?;

        // 4. Validation against existing records
        match &target {
            Target::Release { application, .. } => {
                if metadata.package_name != application.package_name {
                    warn!(
                        expected = %application.package_name,
                        actual = %metadata.package_name,
                        "package name mismatch"
                    );
                    return Err(DomainError::validation(
                        "artifact_url",
                        format!(
                            "package name mismatch: expected {}, got {}",
                            application.package_name, metadata.package_name
                        ),
                    ));
                }
            }
            Target::Application { .. } => {
                if self
                    .repos
                    .applications
                    .package_name_exists(&metadata.package_name)
                    .await?
                {
                    return Err(DomainError::PackageNameExists {
                        package_name: metadata.package_name,
                    });
                }
            }
        }

        // 5. Persistence: one transaction for every row.
        let file_url = artifact_url.to_owned();
        run_in_transaction(
            self.transactions.as_ref(),
            IsolationLevel::ReadCommitted,
            move |uow| {
                Box::pin(async move {
                    let (application, release_input) = match target {
                        Target::Release {
                            application,
                            environment,
                            release_note,
                        } => {
                            let input = NewRelease {
                                title: format!(
                                    "Release {} ({})",
                                    metadata.version_name, metadata.version_code
                                ),
                                version_code: metadata.version_code,
                                version_name: metadata.version_name.clone(),
                                release_note,
                                environment,
                                application_id: application.id,
                            };
                            (None, input)
                        }
                        Target::Application { project_id, title } => {
                            let application = uow
                                .applications()
                                .create(NewApplication {
                                    title,
                                    package_name: metadata.package_name.clone(),
                                    description: String::new(),
                                    project_id,
                                })
                                .await?;
                            let input = NewRelease {
                                title: format!(
                                    "Initial Release {} ({})",
                                    metadata.version_name, metadata.version_code
                                ),
                                version_code: metadata.version_code,
                                version_name: metadata.version_name.clone(),
                                release_note: INITIAL_RELEASE_NOTE.to_owned(),
                                environment: ReleaseEnvironment::Production,
                                application_id: application.id,
                            };
                            (Some(application), input)
                        }
                    };

                    let release = uow.releases().create(release_input).await?;
                    let artifact = uow
                        .artifacts()
                        .create(NewArtifact {
                            file_url,
                            sha256: metadata.sha256.clone(),
                            file_size: metadata.file_size,
                            file_type: APK_MIME_TYPE.to_owned(),
                            abi: None,
                            release_id: release.id,
                        })
                        .await?;

                    Ok(Ingested {
                        application,
                        release,
                        artifact,
                    })
                })
            },
        )
        .await
    }

    /// Resolves the URL, streams the object into a scratch file through the
    /// hasher and parses the manifest off the async runtime.
    async fn inspect(&self, artifact_url: &str) -> DomainResult<ApplicationMetadata> {
        let path = self.store.extract_storage_path(artifact_url).ok_or_else(|| {
            warn!(artifact_url, "rejected artifact outside the object store");
            DomainError::validation("artifact_url", "only internal artifacts are supported")
        })?;

        let mut stream = self.store.download(&path).await.map_err(|e| match e {
            DomainError::NotFound {
                entity: EntityKind::StoredObject,
            } => {
                warn!(path = %path, "artifact missing from storage");
                DomainError::validation("artifact_url", "artifact does not exist in storage")
            }
            other => other,
        })?;
        let scratch = self.scratch_file()?;

        let digest = {
            let handle = scratch.as_file().try_clone().map_err(|e| {
                error!(error = %e, "failed to open scratch file");
                DomainError::internal(format!("failed to open scratch file: {e}"))
            })?;
            let mut sink = tokio::fs::File::from_std(handle);
            self.options
                .hasher
                .copy(&mut stream, &mut sink)
                .await
                .map_err(|e| {
                    error!(error = %e, path = %path, "artifact download failed");
                    DomainError::internal(format!("failed to download artifact: {e}"))
                })?
        };
        drop(stream);
        debug!(path = %path, size = digest.size, sha256 = %digest.sha256, "artifact buffered");

        let file_size = i64::try_from(digest.size)
            .map_err(|_| DomainError::validation("artifact_url", "artifact is too large"))?;

        let reader = Arc::clone(&self.reader);
        let manifest = tokio::task::spawn_blocking(move || {
            let parsed = reader.read_manifest(scratch.path());
            drop(scratch);
            parsed
        })
        .await
        .map_err(|e| DomainError::internal(format!("manifest parser task failed: {e}")))??;
        debug!(
            package_name = %manifest.package_name,
            version_code = manifest.version_code,
            "manifest parsed"
        );

        Ok(ApplicationMetadata {
            package_name: manifest.package_name,
            version_code: manifest.version_code,
            version_name: manifest.version_name,
            min_sdk_version: manifest.min_sdk_version,
            target_sdk_version: manifest.target_sdk_version,
            architecture: UNIVERSAL_ARCHITECTURE.to_owned(),
            platform: self.reader.platform().to_owned(),
            sha256: digest.sha256,
            file_size,
        })
    }

    fn scratch_file(&self) -> DomainResult<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("artifact-").suffix(".apk");
        let created = match &self.options.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        created.map_err(|e| {
            error!(error = %e, "failed to create scratch file");
            DomainError::internal(format!("failed to create temp file: {e}"))
        })
    }
}
