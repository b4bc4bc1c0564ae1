//! Shared setup: an in-memory database seeded with an owner, a stranger and
//! one project, an in-memory object store and every service wired on top.

#![allow(dead_code)]

use std::sync::Arc;

use domains::{
    Application, NewApplication, NewProject, NewUser, ObjectStore, Project, ProjectRepo,
    TransactionManager, User, UserRepo,
};
use services::{
    ApplicationService, ArtifactIngestion, ArtifactService, FileService, IngestionOptions,
    ProjectService, ReleaseService, Repositories,
};
use sha2::{Digest, Sha256};
use storage_adapters::apk::fixture::{ManifestFixture, Value};
use storage_adapters::{ApkManifestReader, MemoryDatabase, MemoryObjectStore};

pub const PUBLIC_BASE: &str = "https://cdn.appshare.test/files";

pub struct Harness {
    pub db: MemoryDatabase,
    pub repos: Repositories,
    /// Backing store for [`Harness::upload`]; also the services' store unless
    /// another one was passed to [`Harness::with`].
    pub objects: Arc<MemoryObjectStore>,
    pub store: Arc<dyn ObjectStore>,
    pub ingestion: Arc<ArtifactIngestion>,
    pub releases: Arc<ReleaseService>,
    pub artifacts: Arc<ArtifactService>,
    pub files: Arc<FileService>,
    pub applications: ApplicationService,
    pub projects: ProjectService,
    pub owner: User,
    pub stranger: User,
    pub project: Project,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(None, None).await
    }

    pub async fn with(
        store: Option<Arc<dyn ObjectStore>>,
        transactions: Option<Arc<dyn TransactionManager>>,
    ) -> Self {
        let db = MemoryDatabase::new();
        let repos = Repositories {
            users: db.users(),
            projects: db.projects(),
            applications: db.applications(),
            releases: db.releases(),
            artifacts: db.artifacts(),
        };
        let objects = Arc::new(MemoryObjectStore::new(PUBLIC_BASE).unwrap());
        let store = store.unwrap_or_else(|| objects.clone() as Arc<dyn ObjectStore>);
        let transactions = transactions
            .unwrap_or_else(|| Arc::new(db.clone()) as Arc<dyn TransactionManager>);

        let ingestion = ArtifactIngestion::new(
            repos.clone(),
            store.clone(),
            Arc::new(ApkManifestReader::new()),
            transactions.clone(),
            IngestionOptions::default(),
        );

        let owner = db
            .users()
            .create(NewUser {
                email: "owner@appshare.test".into(),
                username: "owner".into(),
            })
            .await
            .unwrap();
        let stranger = db
            .users()
            .create(NewUser {
                email: "stranger@appshare.test".into(),
                username: "stranger".into(),
            })
            .await
            .unwrap();
        let project = db
            .projects()
            .create(NewProject {
                title: "Mobile".into(),
                description: String::new(),
                owner_id: owner.id,
            })
            .await
            .unwrap();

        Self {
            ingestion: Arc::new(ingestion),
            releases: Arc::new(ReleaseService::new(repos.clone())),
            artifacts: Arc::new(ArtifactService::new(repos.clone(), store.clone())),
            files: Arc::new(FileService::new(store.clone())),
            applications: ApplicationService::new(repos.clone()),
            projects: ProjectService::new(repos.clone(), transactions),
            db,
            repos,
            objects,
            store,
            owner,
            stranger,
            project,
        }
    }

    /// Registers an application directly, without an artifact.
    pub async fn application(&self, package_name: &str) -> Application {
        self.applications
            .create(
                self.owner.id,
                NewApplication {
                    title: "Example".into(),
                    package_name: package_name.into(),
                    description: String::new(),
                    project_id: self.project.id,
                },
            )
            .await
            .unwrap()
    }

    /// Stores `bytes` in the in-memory object store and returns its public URL.
    pub fn upload(&self, path: &str, bytes: Vec<u8>) -> String {
        self.objects.put(path, bytes).unwrap()
    }

    /// Builds an APK and stores it under `path`.
    pub fn upload_apk(
        &self,
        path: &str,
        package_name: &str,
        version_code: i32,
        version_name: &str,
    ) -> (String, Vec<u8>) {
        let bytes = apk(package_name, version_code, version_name);
        (self.upload(path, bytes.clone()), bytes)
    }
}

pub fn apk(package_name: &str, version_code: i32, version_name: &str) -> Vec<u8> {
    ManifestFixture::new(package_name)
        .version_code(Value::Int(version_code))
        .version_name(Value::str(version_name))
        .build_apk()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
