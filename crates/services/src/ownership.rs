//! Ownership chain: Artifact → Release → Application → Project → owner.
//!
//! Each helper loads the chain from the requested link upward, so a missing
//! link surfaces as `NotFound` for that entity before ownership is judged.

use domains::{
    Application, ApplicationRelease, Artifact, DomainError, DomainResult, Project,
};
use tracing::warn;
use uuid::Uuid;

use crate::Repositories;

fn ensure_owner(project: &Project, actor: Uuid) -> DomainResult<()> {
    if project.is_owned_by(actor) {
        return Ok(());
    }
    warn!(user_id = %actor, project_id = %project.id, "ownership check failed");
    Err(DomainError::NotProjectOwner {
        user_id: actor,
        project_id: project.id,
    })
}

impl Repositories {
    pub async fn owned_project(&self, actor: Uuid, project_id: Uuid) -> DomainResult<Project> {
        let project = self.projects.find_by_id(project_id).await?;
        ensure_owner(&project, actor)?;
        Ok(project)
    }

    pub async fn owned_application(
        &self,
        actor: Uuid,
        application_id: Uuid,
    ) -> DomainResult<Application> {
        let application = self.applications.find_by_id(application_id).await?;
        self.owned_project(actor, application.project_id).await?;
        Ok(application)
    }

    pub async fn owned_release(
        &self,
        actor: Uuid,
        release_id: Uuid,
    ) -> DomainResult<(ApplicationRelease, Application)> {
        let release = self.releases.find_by_id(release_id).await?;
        let application = self.owned_application(actor, release.application_id).await?;
        Ok((release, application))
    }

    pub async fn owned_artifact(&self, actor: Uuid, artifact_id: Uuid) -> DomainResult<Artifact> {
        let artifact = self.artifacts.find_by_id(artifact_id).await?;
        self.owned_release(actor, artifact.release_id).await?;
        Ok(artifact)
    }
}
