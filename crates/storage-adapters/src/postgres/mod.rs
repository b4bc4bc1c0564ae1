//! # Postgres adapter
//!
//! Maps the relational model onto the domain models with `sqlx`. Every
//! repository runs against a [`Scope`]: either the pool or one open
//! transaction, so plain and transaction-scoped repositories share all
//! query code.
//!
//! Reads, updates and soft deletes go through the `live_*` views, which are
//! the only place the `deleted_at IS NULL` filter is written. Inserts and
//! hard deletes target the base tables. Uniqueness rules are partial unique
//! indexes over live rows (see `migrations/`).

mod applications;
mod artifacts;
mod projects;
mod releases;
mod users;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domains::{
    ApplicationRepo, ArtifactRepo, DomainError, DomainResult, EntityKind, IsolationLevel,
    ProjectRepo, ReleaseRepo, TransactionManager, UnitOfWork, UserRepo,
};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, error, info};

pub use self::applications::PgApplicationRepo;
pub use self::artifacts::PgArtifactRepo;
pub use self::projects::PgProjectRepo;
pub use self::releases::PgReleaseRepo;
pub use self::users::PgUserRepo;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

type SharedTx = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// Where a repository sends its queries.
#[derive(Clone)]
pub(crate) enum Scope {
    Pool(PgPool),
    Tx(SharedTx),
}

/// A connection borrowed from a [`Scope`] for one statement or a short
/// sequence of them.
pub(crate) enum Conn<'a> {
    Pooled(PoolConnection<Postgres>),
    Tx(MappedMutexGuard<'a, PgConnection>),
}

impl Deref for Conn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            Conn::Pooled(conn) => conn,
            Conn::Tx(conn) => conn,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            Conn::Pooled(conn) => conn,
            Conn::Tx(conn) => conn,
        }
    }
}

impl Scope {
    pub(crate) async fn conn(&self) -> DomainResult<Conn<'_>> {
        match self {
            Scope::Pool(pool) => pool
                .acquire()
                .await
                .map(Conn::Pooled)
                .map_err(infra_error),
            Scope::Tx(tx) => MutexGuard::try_map(tx.lock().await, |tx| tx.as_deref_mut())
                .map(Conn::Tx)
                .map_err(|_| DomainError::internal("transaction already finished")),
        }
    }
}

/// Translates a driver error. `entity` names what a missing row means.
pub(crate) fn db_error(e: sqlx::Error, entity: EntityKind) -> DomainError {
    match e {
        sqlx::Error::RowNotFound => DomainError::not_found(entity),
        other => infra_error(other),
    }
}

pub(crate) fn infra_error(e: sqlx::Error) -> DomainError {
    error!(error = %e, "database error");
    DomainError::internal("database error")
}

/// Name of the violated unique index, if `e` is a unique violation.
pub(crate) fn unique_violation(e: &sqlx::Error) -> Option<&str> {
    match e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(SQLSTATE_UNIQUE_VIOLATION) => {
            Some(db.constraint().unwrap_or_default())
        }
        _ => None,
    }
}

/// Column decoding failures are schema drift, not caller errors.
pub(crate) fn decode_error(e: sqlx::Error) -> DomainError {
    error!(error = %e, "row decoding failed");
    DomainError::internal("database error")
}

/// Pool-backed database handle. Also the [`TransactionManager`].
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> DomainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| {
                error!(error = %e, "could not connect to postgres");
                DomainError::internal("database unavailable")
            })?;
        info!(max_connections, "postgres pool ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn migrate(&self) -> DomainResult<()> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            error!(error = %e, "migration failed");
            DomainError::internal("database migration failed")
        })?;
        info!("database schema up to date");
        Ok(())
    }

    fn scope(&self) -> Scope {
        Scope::Pool(self.pool.clone())
    }

    pub fn users(&self) -> Arc<PgUserRepo> {
        Arc::new(PgUserRepo::new(self.scope()))
    }

    pub fn projects(&self) -> Arc<PgProjectRepo> {
        Arc::new(PgProjectRepo::new(self.scope()))
    }

    pub fn applications(&self) -> Arc<PgApplicationRepo> {
        Arc::new(PgApplicationRepo::new(self.scope()))
    }

    pub fn releases(&self) -> Arc<PgReleaseRepo> {
        Arc::new(PgReleaseRepo::new(self.scope()))
    }

    pub fn artifacts(&self) -> Arc<PgArtifactRepo> {
        Arc::new(PgArtifactRepo::new(self.scope()))
    }
}

struct PgUnitOfWork {
    tx: SharedTx,
    users: PgUserRepo,
    projects: PgProjectRepo,
    applications: PgApplicationRepo,
    releases: PgReleaseRepo,
    artifacts: PgArtifactRepo,
}

impl PgUnitOfWork {
    async fn take(&self) -> DomainResult<Transaction<'static, Postgres>> {
        self.tx
            .lock()
            .await
            .take()
            .ok_or_else(|| DomainError::internal("transaction already finished"))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn users(&self) -> &dyn UserRepo {
        &self.users
    }

    fn projects(&self) -> &dyn ProjectRepo {
        &self.projects
    }

    fn applications(&self) -> &dyn ApplicationRepo {
        &self.applications
    }

    fn releases(&self) -> &dyn ReleaseRepo {
        &self.releases
    }

    fn artifacts(&self) -> &dyn ArtifactRepo {
        &self.artifacts
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        self.take()
            .await?
            .commit()
            .await
            .map_err(infra_error)?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        self.take()
            .await?
            .rollback()
            .await
            .map_err(infra_error)?;
        debug!("transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for PgDatabase {
    async fn begin(&self, isolation: IsolationLevel) -> DomainResult<Box<dyn UnitOfWork>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(infra_error)?;

        if isolation == IsolationLevel::Serializable {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await
                .map_err(infra_error)?;
        }

        let tx: SharedTx = Arc::new(Mutex::new(Some(tx)));
        let scope = Scope::Tx(tx.clone());
        Ok(Box::new(PgUnitOfWork {
            users: PgUserRepo::new(scope.clone()),
            projects: PgProjectRepo::new(scope.clone()),
            applications: PgApplicationRepo::new(scope.clone()),
            releases: PgReleaseRepo::new(scope.clone()),
            artifacts: PgArtifactRepo::new(scope),
            tx,
        }))
    }
}

#[cfg(test)]
mod tests {
    const LIVE_VIEWS: &str = include_str!("../../migrations/20240201000000_live_views.sql");

    const REPOSITORIES: [(&str, &str); 5] = [
        ("users", include_str!("users.rs")),
        ("projects", include_str!("projects.rs")),
        ("applications", include_str!("applications.rs")),
        ("application_releases", include_str!("releases.rs")),
        ("artifacts", include_str!("artifacts.rs")),
    ];

    #[test]
    fn repositories_filter_soft_deletes_through_the_live_views() {
        for (table, _) in REPOSITORIES {
            assert!(
                LIVE_VIEWS.contains(&format!("CREATE VIEW live_{table} AS")),
                "no view for {table}"
            );
        }
        for (owner, source) in REPOSITORIES {
            assert!(!source.contains("deleted_at IS NULL"), "{owner} filters by hand");
            for (table, _) in REPOSITORIES {
                let reads = source.matches(&format!("FROM {table} ")).count();
                let hard_deletes = source.matches(&format!("DELETE FROM {table} ")).count();
                assert_eq!(reads, hard_deletes, "{owner} reads {table} directly");
                assert!(
                    !source.contains(&format!("UPDATE {table} ")),
                    "{owner} updates {table} directly"
                );
            }
        }
    }
}
