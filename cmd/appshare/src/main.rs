//! # AppShare binary
//!
//! Assembles the backend from configuration: picks the database and object
//! store backends, wires the services and serves the HTTP adapter.

use std::sync::Arc;

use anyhow::Context;
use api_adapters::AppState;
use configs::{DatabaseBackend, LogFormat, LoggingSettings, Settings, StorageBackend};
use domains::{ObjectStore, TransactionManager};
use secrecy::ExposeSecret;
use services::{
    ArtifactIngestion, ArtifactService, ContentHasher, FileService, IngestionOptions,
    ReleaseService, Repositories,
};
use storage_adapters::storage::local::LocalObjectStore;
use storage_adapters::{ApkManifestReader, MemoryDatabase, MemoryObjectStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    init_tracing(&settings.logging);

    // 1. Database
    let (repos, transactions) = open_database(&settings).await?;

    // 2. Object storage
    let (store, local_store) = open_object_store(&settings).await?;

    // 3. Services
    let ingestion = ArtifactIngestion::new(
        repos.clone(),
        store.clone(),
        Arc::new(ApkManifestReader::new()),
        transactions,
        IngestionOptions {
            scratch_dir: settings.ingestion.scratch_dir.clone(),
            hasher: ContentHasher::default(),
        },
    );
    let state = AppState {
        ingestion: Arc::new(ingestion),
        releases: Arc::new(ReleaseService::new(repos.clone())),
        artifacts: Arc::new(ArtifactService::new(repos, store.clone())),
        files: Arc::new(FileService::new(store)),
        local_store,
    };

    // 4. Serve
    let address = settings.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(%address, "appshare listening");

    axum::serve(listener, api_adapters::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("appshare stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn open_database(
    settings: &Settings,
) -> anyhow::Result<(Repositories, Arc<dyn TransactionManager>)> {
    match settings.database.backend {
        #[cfg(feature = "db-postgres")]
        DatabaseBackend::Postgres => {
            let url = settings
                .database
                .url
                .as_ref()
                .context("database.url is required for the postgres backend")?;
            let db = storage_adapters::PgDatabase::connect(
                url.expose_secret(),
                settings.database.max_connections,
                settings.database.acquire_timeout(),
            )
            .await?;
            db.migrate().await?;

            let repos = Repositories {
                users: db.users(),
                projects: db.projects(),
                applications: db.applications(),
                releases: db.releases(),
                artifacts: db.artifacts(),
            };
            let transactions: Arc<dyn TransactionManager> = Arc::new(db);
            Ok((repos, transactions))
        }
        #[cfg(not(feature = "db-postgres"))]
        DatabaseBackend::Postgres => anyhow::bail!("this build does not include the postgres backend"),
        DatabaseBackend::Memory => {
            warn!("using the in-memory database; nothing survives a restart");
            let db = MemoryDatabase::new();
            let repos = Repositories {
                users: db.users(),
                projects: db.projects(),
                applications: db.applications(),
                releases: db.releases(),
                artifacts: db.artifacts(),
            };
            let transactions: Arc<dyn TransactionManager> = Arc::new(db);
            Ok((repos, transactions))
        }
    }
}

async fn open_object_store(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn ObjectStore>, Option<Arc<LocalObjectStore>>)> {
    let storage = &settings.storage;
    match storage.backend {
        StorageBackend::Local => {
            let key = storage
                .local
                .signing_key
                .as_ref()
                .context("storage.local.signing_key is required for the local backend")?;
            let local = Arc::new(LocalObjectStore::new(
                storage.local.root.clone(),
                &storage.public_base_url,
                key.expose_secret().as_bytes(),
            )?);
            info!(root = %storage.local.root.display(), "local object store ready");
            let store: Arc<dyn ObjectStore> = local.clone();
            Ok((store, Some(local)))
        }
        #[cfg(feature = "media-s3")]
        StorageBackend::S3 => {
            let s3 = &storage.s3;
            let store = storage_adapters::storage::s3::S3ObjectStore::connect(
                storage_adapters::storage::s3::S3Options {
                    bucket: s3.bucket.clone(),
                    region: s3.region.clone(),
                    endpoint_url: s3.endpoint_url.clone(),
                    access_key_id: s3.access_key_id.clone(),
                    secret_access_key: s3
                        .secret_access_key
                        .as_ref()
                        .map(|secret| secret.expose_secret().to_owned()),
                    public_base_url: storage.public_base_url.clone(),
                },
            )
            .await?;
            info!(bucket = %s3.bucket, "s3 object store ready");
            let store: Arc<dyn ObjectStore> = Arc::new(store);
            Ok((store, None))
        }
        #[cfg(not(feature = "media-s3"))]
        StorageBackend::S3 => anyhow::bail!("this build does not include the s3 object store"),
        StorageBackend::Memory => {
            warn!("using the in-memory object store; uploads cannot reach it over HTTP");
            let store: Arc<dyn ObjectStore> =
                Arc::new(MemoryObjectStore::new(&storage.public_base_url)?);
            Ok((store, None))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
