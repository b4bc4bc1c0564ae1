//! AppShare services.
//!
//! Business rules on top of the domain ports: ownership checks, the artifact
//! ingestion pipeline and the management operations around releases,
//! applications, artifacts, uploads and projects. Services hold their
//! dependencies as `Arc<dyn Trait>` and never name a concrete adapter.

use std::sync::Arc;

use domains::{ApplicationRepo, ArtifactRepo, ProjectRepo, ReleaseRepo, UserRepo};

pub mod applications;
pub mod artifacts;
pub mod files;
pub mod hasher;
pub mod ingestion;
pub mod ownership;
pub mod projects;
pub mod releases;
pub mod transaction;
mod uploads;

pub use applications::ApplicationService;
pub use artifacts::ArtifactService;
pub use files::FileService;
pub use hasher::{ContentDigest, ContentHasher};
pub use ingestion::{ArtifactIngestion, IngestionOptions};
pub use projects::ProjectService;
pub use releases::ReleaseService;
pub use transaction::{run_in_transaction, UowFuture};

/// Pool-backed repositories shared by every service.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepo>,
    pub projects: Arc<dyn ProjectRepo>,
    pub applications: Arc<dyn ApplicationRepo>,
    pub releases: Arc<dyn ReleaseRepo>,
    pub artifacts: Arc<dyn ArtifactRepo>,
}
