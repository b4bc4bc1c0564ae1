use domains::{ApplicationRelease, DomainError, DomainResult, NewRelease, ReleaseEnvironment};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::Repositories;

/// Release management. Every mutation walks the ownership chain first.
pub struct ReleaseService {
    repos: Repositories,
}

impl ReleaseService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<ApplicationRelease> {
        self.repos.releases.find_by_id(id).await
    }

    pub async fn list_by_application(
        &self,
        application_id: Uuid,
    ) -> DomainResult<Vec<ApplicationRelease>> {
        self.repos.releases.list_by_application(application_id).await
    }

    pub async fn list_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<Vec<ApplicationRelease>> {
        self.repos
            .releases
            .list_by_environment(application_id, environment)
            .await
    }

    pub async fn latest_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease> {
        self.repos
            .releases
            .latest_by_environment(application_id, environment)
            .await
    }

    /// Creates a release without an artifact. Duplicates are left to the
    /// repository's unique constraint.
    #[instrument(skip(self, input), fields(user_id = %actor, application_id = %input.application_id))]
    pub async fn create(&self, actor: Uuid, input: NewRelease) -> DomainResult<ApplicationRelease> {
        self.repos.owned_application(actor, input.application_id).await?;

        if input.version_code <= 0 {
            return Err(DomainError::validation(
                "version_code",
                "version code must be positive",
            ));
        }
        if input.version_name.trim().is_empty() {
            return Err(DomainError::validation(
                "version_name",
                "version name is required",
            ));
        }

        let release = self.repos.releases.create(input).await?;
        info!(release_id = %release.id, "release created");
        Ok(release)
    }

    pub async fn update(
        &self,
        actor: Uuid,
        id: Uuid,
        title: String,
        release_note: String,
    ) -> DomainResult<ApplicationRelease> {
        self.repos.owned_release(actor, id).await?;
        self.repos.releases.update(id, title, release_note).await
    }

    /// Moves a release to another environment. Any environment may follow
    /// any other; a taken (version code, environment) slot is `ReleaseExists`.
    #[instrument(skip(self), fields(user_id = %actor))]
    pub async fn promote(
        &self,
        actor: Uuid,
        id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease> {
        let (release, _) = self.repos.owned_release(actor, id).await?;
        if release.environment == environment {
            return Ok(release);
        }

        let promoted = self.repos.releases.promote(id, environment).await?;
        info!(from = %release.environment, to = %environment, "release promoted");
        Ok(promoted)
    }

    pub async fn delete(&self, actor: Uuid, id: Uuid) -> DomainResult<()> {
        self.repos.owned_release(actor, id).await?;
        self.repos.releases.soft_delete(id).await
    }
}
