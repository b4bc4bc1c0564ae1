//! # In-memory repositories
//!
//! A complete, process-local implementation of every repository port and of
//! [`TransactionManager`], with the same uniqueness and parent-row rules as
//! the Postgres schema. Used by tests and by `APPSHARE__DATABASE__BACKEND=memory`.
//!
//! A unit of work locks the committed tables for its whole lifetime, works
//! on a private copy and swaps the copy in on commit. Dropping it without
//! committing discards the copy. Plain repository calls made while a unit
//! of work is open wait for it to finish.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domains::{
    Application, ApplicationRelease, ApplicationRepo, Artifact, ArtifactRepo, DomainError,
    DomainResult, EntityKind, IsolationLevel, NewApplication, NewArtifact, NewProject,
    NewRelease, NewUser, Project, ProjectRepo, ReleaseEnvironment, ReleaseRepo, SoftDeletable,
    TransactionManager, UnitOfWork, User, UserRepo,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<Uuid, User>,
    projects: BTreeMap<Uuid, Project>,
    applications: BTreeMap<Uuid, Application>,
    releases: BTreeMap<Uuid, ApplicationRelease>,
    artifacts: BTreeMap<Uuid, Artifact>,
}

type Shared = Arc<Mutex<Tables>>;

/// The single live-row accessor: soft-deleted rows are invisible.
fn live<T: SoftDeletable>(rows: &BTreeMap<Uuid, T>, id: Uuid, entity: EntityKind) -> DomainResult<&T> {
    rows.get(&id)
        .filter(|row| row.is_live())
        .ok_or(DomainError::NotFound { entity })
}

fn live_mut<T: SoftDeletable>(
    rows: &mut BTreeMap<Uuid, T>,
    id: Uuid,
    entity: EntityKind,
) -> DomainResult<&mut T> {
    rows.get_mut(&id)
        .filter(|row| row.is_live())
        .ok_or(DomainError::NotFound { entity })
}

fn live_rows<T: SoftDeletable + Clone>(
    rows: &BTreeMap<Uuid, T>,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    rows.values()
        .filter(|row| row.is_live() && keep(row))
        .cloned()
        .collect()
}

impl Tables {
    fn release_taken(
        &self,
        application_id: Uuid,
        version_code: i32,
        environment: ReleaseEnvironment,
        except: Option<Uuid>,
    ) -> bool {
        self.releases.values().any(|r| {
            r.is_live()
                && Some(r.id) != except
                && r.application_id == application_id
                && r.version_code == version_code
                && r.environment == environment
        })
    }

    fn package_taken(&self, package_name: &str) -> bool {
        self.applications
            .values()
            .any(|a| a.is_live() && a.package_name == package_name)
    }
}

macro_rules! memory_repos {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone)]
            pub struct $name {
                tables: Shared,
            }
        )+
    };
}

memory_repos!(
    MemoryUserRepo,
    MemoryProjectRepo,
    MemoryApplicationRepo,
    MemoryReleaseRepo,
    MemoryArtifactRepo,
);

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create(&self, input: NewUser) -> DomainResult<User> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.is_live() && u.email == input.email) {
            return Err(DomainError::already_exists(EntityKind::User));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::now_v7(),
            email: input.email,
            username: input.username,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<User> {
        let t = self.tables.lock().await;
        live(&t.users, id, EntityKind::User).cloned()
    }
}

#[async_trait]
impl ProjectRepo for MemoryProjectRepo {
    async fn create(&self, input: NewProject) -> DomainResult<Project> {
        let mut t = self.tables.lock().await;
        live(&t.users, input.owner_id, EntityKind::User)?;
        let now = Utc::now();
        let project = Project {
            id: Uuid::now_v7(),
            title: input.title,
            description: input.description,
            owner_id: input.owner_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Project> {
        let t = self.tables.lock().await;
        live(&t.projects, id, EntityKind::Project).cloned()
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> DomainResult<Vec<Project>> {
        let t = self.tables.lock().await;
        Ok(live_rows(&t.projects, |p| p.owner_id == owner_id))
    }

    async fn transfer_ownership(&self, id: Uuid, new_owner_id: Uuid) -> DomainResult<Project> {
        let mut t = self.tables.lock().await;
        live(&t.users, new_owner_id, EntityKind::User)?;
        let project = live_mut(&mut t.projects, id, EntityKind::Project)?;
        project.owner_id = new_owner_id;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let project = live_mut(&mut t.projects, id, EntityKind::Project)?;
        project.deleted_at = Some(now);
        project.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl ApplicationRepo for MemoryApplicationRepo {
    async fn create(&self, input: NewApplication) -> DomainResult<Application> {
        let mut t = self.tables.lock().await;
        live(&t.projects, input.project_id, EntityKind::Project)?;
        if t.package_taken(&input.package_name) {
            return Err(DomainError::PackageNameExists {
                package_name: input.package_name,
            });
        }
        let now = Utc::now();
        let application = Application {
            id: Uuid::now_v7(),
            title: input.title,
            package_name: input.package_name,
            description: input.description,
            project_id: input.project_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.applications.insert(application.id, application.clone());
        Ok(application)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Application> {
        let t = self.tables.lock().await;
        live(&t.applications, id, EntityKind::Application).cloned()
    }

    async fn find_by_package_name(&self, package_name: &str) -> DomainResult<Application> {
        let t = self.tables.lock().await;
        t.applications
            .values()
            .find(|a| a.is_live() && a.package_name == package_name)
            .cloned()
            .ok_or(DomainError::not_found(EntityKind::Application))
    }

    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Application>> {
        let t = self.tables.lock().await;
        Ok(live_rows(&t.applications, |a| a.project_id == project_id))
    }

    async fn update(
        &self,
        id: Uuid,
        title: String,
        description: String,
    ) -> DomainResult<Application> {
        let mut t = self.tables.lock().await;
        let application = live_mut(&mut t.applications, id, EntityKind::Application)?;
        application.title = title;
        application.description = description;
        application.updated_at = Utc::now();
        Ok(application.clone())
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let application = live_mut(&mut t.applications, id, EntityKind::Application)?;
        application.deleted_at = Some(now);
        application.updated_at = now;
        Ok(())
    }

    async fn package_name_exists(&self, package_name: &str) -> DomainResult<bool> {
        Ok(self.tables.lock().await.package_taken(package_name))
    }
}

/// Newest version first.
fn by_version_desc(mut releases: Vec<ApplicationRelease>) -> Vec<ApplicationRelease> {
    releases.sort_by(|a, b| {
        b.version_code
            .cmp(&a.version_code)
            .then(b.created_at.cmp(&a.created_at))
    });
    releases
}

#[async_trait]
impl ReleaseRepo for MemoryReleaseRepo {
    async fn create(&self, input: NewRelease) -> DomainResult<ApplicationRelease> {
        let mut t = self.tables.lock().await;
        live(&t.applications, input.application_id, EntityKind::Application)?;
        if t.release_taken(input.application_id, input.version_code, input.environment, None) {
            return Err(DomainError::ReleaseExists {
                version_code: input.version_code,
                environment: input.environment,
            });
        }
        let now = Utc::now();
        let release = ApplicationRelease {
            id: Uuid::now_v7(),
            title: input.title,
            version_code: input.version_code,
            version_name: input.version_name,
            release_note: input.release_note,
            environment: input.environment,
            application_id: input.application_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.releases.insert(release.id, release.clone());
        Ok(release)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<ApplicationRelease> {
        let t = self.tables.lock().await;
        live(&t.releases, id, EntityKind::Release).cloned()
    }

    async fn list_by_application(
        &self,
        application_id: Uuid,
    ) -> DomainResult<Vec<ApplicationRelease>> {
        let t = self.tables.lock().await;
        Ok(by_version_desc(live_rows(&t.releases, |r| {
            r.application_id == application_id
        })))
    }

    async fn list_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<Vec<ApplicationRelease>> {
        let t = self.tables.lock().await;
        Ok(by_version_desc(live_rows(&t.releases, |r| {
            r.application_id == application_id && r.environment == environment
        })))
    }

    async fn latest_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease> {
        self.list_by_environment(application_id, environment)
            .await?
            .into_iter()
            .next()
            .ok_or(DomainError::not_found(EntityKind::Release))
    }

    async fn update(
        &self,
        id: Uuid,
        title: String,
        release_note: String,
    ) -> DomainResult<ApplicationRelease> {
        let mut t = self.tables.lock().await;
        let release = live_mut(&mut t.releases, id, EntityKind::Release)?;
        release.title = title;
        release.release_note = release_note;
        release.updated_at = Utc::now();
        Ok(release.clone())
    }

    async fn promote(
        &self,
        id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease> {
        let mut t = self.tables.lock().await;
        let current = live(&t.releases, id, EntityKind::Release)?;
        let (application_id, version_code) = (current.application_id, current.version_code);
        if t.release_taken(application_id, version_code, environment, Some(id)) {
            return Err(DomainError::ReleaseExists {
                version_code,
                environment,
            });
        }
        let release = live_mut(&mut t.releases, id, EntityKind::Release)?;
        release.environment = environment;
        release.updated_at = Utc::now();
        Ok(release.clone())
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let release = live_mut(&mut t.releases, id, EntityKind::Release)?;
        release.deleted_at = Some(now);
        release.updated_at = now;
        Ok(())
    }

    async fn version_exists(
        &self,
        application_id: Uuid,
        version_code: i32,
        environment: ReleaseEnvironment,
    ) -> DomainResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .release_taken(application_id, version_code, environment, None))
    }
}

#[async_trait]
impl ArtifactRepo for MemoryArtifactRepo {
    async fn create(&self, input: NewArtifact) -> DomainResult<Artifact> {
        let mut t = self.tables.lock().await;
        live(&t.releases, input.release_id, EntityKind::Release)?;
        let duplicate = t
            .artifacts
            .values()
            .any(|a| a.is_live() && a.release_id == input.release_id && a.abi == input.abi);
        if duplicate {
            return Err(DomainError::already_exists(EntityKind::Artifact));
        }
        let now = Utc::now();
        let artifact = Artifact {
            id: Uuid::now_v7(),
            file_url: input.file_url,
            sha256: input.sha256,
            file_size: input.file_size,
            file_type: input.file_type,
            abi: input.abi,
            release_id: input.release_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.artifacts.insert(artifact.id, artifact.clone());
        Ok(artifact)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Artifact> {
        let t = self.tables.lock().await;
        live(&t.artifacts, id, EntityKind::Artifact).cloned()
    }

    async fn list_by_release(&self, release_id: Uuid) -> DomainResult<Vec<Artifact>> {
        let t = self.tables.lock().await;
        Ok(live_rows(&t.artifacts, |a| a.release_id == release_id))
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let artifact = live_mut(&mut t.artifacts, id, EntityKind::Artifact)?;
        artifact.deleted_at = Some(now);
        artifact.updated_at = now;
        Ok(())
    }

    async fn hard_delete(&self, id: Uuid) -> DomainResult<()> {
        self.tables
            .lock()
            .await
            .artifacts
            .remove(&id)
            .map(|_| ())
            .ok_or(DomainError::not_found(EntityKind::Artifact))
    }
}

/// One set of repositories over one set of tables.
#[derive(Clone)]
struct RepoSet {
    users: MemoryUserRepo,
    projects: MemoryProjectRepo,
    applications: MemoryApplicationRepo,
    releases: MemoryReleaseRepo,
    artifacts: MemoryArtifactRepo,
}

impl RepoSet {
    fn over(tables: &Shared) -> Self {
        Self {
            users: MemoryUserRepo {
                tables: tables.clone(),
            },
            projects: MemoryProjectRepo {
                tables: tables.clone(),
            },
            applications: MemoryApplicationRepo {
                tables: tables.clone(),
            },
            releases: MemoryReleaseRepo {
                tables: tables.clone(),
            },
            artifacts: MemoryArtifactRepo {
                tables: tables.clone(),
            },
        }
    }
}

/// Shared in-memory database. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Shared,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> Arc<MemoryUserRepo> {
        Arc::new(RepoSet::over(&self.tables).users)
    }

    pub fn projects(&self) -> Arc<MemoryProjectRepo> {
        Arc::new(RepoSet::over(&self.tables).projects)
    }

    pub fn applications(&self) -> Arc<MemoryApplicationRepo> {
        Arc::new(RepoSet::over(&self.tables).applications)
    }

    pub fn releases(&self) -> Arc<MemoryReleaseRepo> {
        Arc::new(RepoSet::over(&self.tables).releases)
    }

    pub fn artifacts(&self) -> Arc<MemoryArtifactRepo> {
        Arc::new(RepoSet::over(&self.tables).artifacts)
    }
}

struct MemoryUnitOfWork {
    committed: OwnedMutexGuard<Tables>,
    staged: Shared,
    repos: RepoSet,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn users(&self) -> &dyn UserRepo {
        &self.repos.users
    }

    fn projects(&self) -> &dyn ProjectRepo {
        &self.repos.projects
    }

    fn applications(&self) -> &dyn ApplicationRepo {
        &self.repos.applications
    }

    fn releases(&self) -> &dyn ReleaseRepo {
        &self.repos.releases
    }

    fn artifacts(&self) -> &dyn ArtifactRepo {
        &self.repos.artifacts
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        let MemoryUnitOfWork {
            mut committed,
            staged,
            ..
        } = *self;
        *committed = staged.lock().await.clone();
        debug!("memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        debug!("memory transaction rolled back");
        Ok(())
    }
}

/// Every isolation level is serializable here: units of work never overlap.
#[async_trait]
impl TransactionManager for MemoryDatabase {
    async fn begin(&self, _isolation: IsolationLevel) -> DomainResult<Box<dyn UnitOfWork>> {
        let committed = self.tables.clone().lock_owned().await;
        let staged: Shared = Arc::new(Mutex::new(committed.clone()));
        let repos = RepoSet::over(&staged);
        Ok(Box::new(MemoryUnitOfWork {
            committed,
            staged,
            repos,
        }))
    }
}
