//! # Core Traits (Ports)
//!
//! Any adapter must implement these traits to be wired into the services.
//!
//! Repository methods have one shape whether they run against the pool or
//! inside a transaction: a [`UnitOfWork`] hands out the same traits, bound
//! to its transaction.

use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::errors::DomainResult;
use crate::models::{
    Application, ApplicationRelease, Artifact, NewApplication, NewArtifact, NewProject,
    NewRelease, NewUser, PackageManifest, Project, ReleaseEnvironment, User,
};

/// A readable stream of object bytes, of unknown length.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, input: NewUser) -> DomainResult<User>;
    async fn find_by_id(&self, id: Uuid) -> DomainResult<User>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn create(&self, input: NewProject) -> DomainResult<Project>;
    async fn find_by_id(&self, id: Uuid) -> DomainResult<Project>;
    async fn list_by_owner(&self, owner_id: Uuid) -> DomainResult<Vec<Project>>;
    async fn transfer_ownership(&self, id: Uuid, new_owner_id: Uuid) -> DomainResult<Project>;
    async fn soft_delete(&self, id: Uuid) -> DomainResult<()>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ApplicationRepo: Send + Sync {
    async fn create(&self, input: NewApplication) -> DomainResult<Application>;
    async fn find_by_id(&self, id: Uuid) -> DomainResult<Application>;
    async fn find_by_package_name(&self, package_name: &str) -> DomainResult<Application>;
    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Application>>;
    async fn update(&self, id: Uuid, title: String, description: String)
        -> DomainResult<Application>;
    async fn soft_delete(&self, id: Uuid) -> DomainResult<()>;
    async fn package_name_exists(&self, package_name: &str) -> DomainResult<bool>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ReleaseRepo: Send + Sync {
    /// Fails with `ReleaseExists` when the (application, version code,
    /// environment) triple is already taken by a live release.
    async fn create(&self, input: NewRelease) -> DomainResult<ApplicationRelease>;
    async fn find_by_id(&self, id: Uuid) -> DomainResult<ApplicationRelease>;
    async fn list_by_application(&self, application_id: Uuid)
        -> DomainResult<Vec<ApplicationRelease>>;
    async fn list_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<Vec<ApplicationRelease>>;
    /// Highest version code in the environment.
    async fn latest_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease>;
    async fn update(&self, id: Uuid, title: String, release_note: String)
        -> DomainResult<ApplicationRelease>;
    async fn promote(&self, id: Uuid, environment: ReleaseEnvironment)
        -> DomainResult<ApplicationRelease>;
    async fn soft_delete(&self, id: Uuid) -> DomainResult<()>;
    async fn version_exists(
        &self,
        application_id: Uuid,
        version_code: i32,
        environment: ReleaseEnvironment,
    ) -> DomainResult<bool>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    async fn create(&self, input: NewArtifact) -> DomainResult<Artifact>;
    async fn find_by_id(&self, id: Uuid) -> DomainResult<Artifact>;
    async fn list_by_release(&self, release_id: Uuid) -> DomainResult<Vec<Artifact>>;
    async fn soft_delete(&self, id: Uuid) -> DomainResult<()>;
    /// Physically removes the row. Administrative cleanup only.
    async fn hard_delete(&self, id: Uuid) -> DomainResult<()>;
}

/// Blob storage contract for uploaded binaries.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns a URL a client can `PUT` the object to until `ttl` elapses.
    async fn generate_upload_url(&self, path: &str, ttl: Duration) -> DomainResult<String>;
    /// Opens a read stream over the object at `path`.
    async fn download(&self, path: &str) -> DomainResult<ByteStream>;
    async fn delete(&self, path: &str) -> DomainResult<()>;
    /// Public URL of the object at `path`.
    fn public_url(&self, path: &str) -> String;
    /// Maps a public URL back to a storage path.
    ///
    /// Returns `None` when the URL does not point into this store; such URLs
    /// must never be fetched.
    fn extract_storage_path(&self, url: &str) -> Option<String>;
}

/// Reads the embedded manifest of a local package file.
///
/// Implementations understand exactly one binary format; other platforms
/// need their own reader behind this trait.
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait ManifestReader: Send + Sync {
    /// Platform the reader understands, e.g. `"android"`.
    fn platform(&self) -> &'static str;

    /// Blocking: callers off the async runtime should use `spawn_blocking`.
    fn read_manifest(&self, path: &Path) -> DomainResult<PackageManifest>;
}

/// Transaction isolation requested for a unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    Serializable,
}

/// Repositories bound to one open transaction.
///
/// Dropping a unit of work without committing rolls it back, which also
/// covers panics and cancelled futures.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn users(&self) -> &dyn UserRepo;
    fn projects(&self) -> &dyn ProjectRepo;
    fn applications(&self) -> &dyn ApplicationRepo;
    fn releases(&self) -> &dyn ReleaseRepo;
    fn artifacts(&self) -> &dyn ArtifactRepo;

    async fn commit(self: Box<Self>) -> DomainResult<()>;
    async fn rollback(self: Box<Self>) -> DomainResult<()>;
}

/// Opens units of work.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self, isolation: IsolationLevel) -> DomainResult<Box<dyn UnitOfWork>>;
}
