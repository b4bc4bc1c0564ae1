use async_trait::async_trait;
use domains::{
    ApplicationRelease, DomainError, DomainResult, EntityKind, NewRelease, ReleaseEnvironment,
    ReleaseRepo,
};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::{db_error, decode_error, unique_violation, Scope};

macro_rules! release_columns {
    () => {
        "id, title, version_code, version_name, release_note, environment, application_id, \
         created_at, updated_at, deleted_at"
    };
}

pub struct PgReleaseRepo {
    scope: Scope,
}

impl PgReleaseRepo {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

fn release_from_row(row: &PgRow) -> DomainResult<ApplicationRelease> {
    let environment: String = row.try_get("environment").map_err(decode_error)?;
    Ok(ApplicationRelease {
        id: row.try_get("id").map_err(decode_error)?,
        title: row.try_get("title").map_err(decode_error)?,
        version_code: row.try_get("version_code").map_err(decode_error)?,
        version_name: row.try_get("version_name").map_err(decode_error)?,
        release_note: row.try_get("release_note").map_err(decode_error)?,
        environment: environment
            .parse()
            .map_err(|_| DomainError::internal(format!("stored environment {environment:?}")))?,
        application_id: row.try_get("application_id").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
    })
}

fn conflict_or(e: sqlx::Error, version_code: i32, environment: ReleaseEnvironment) -> DomainError {
    if unique_violation(&e).is_some() {
        DomainError::ReleaseExists {
            version_code,
            environment,
        }
    } else {
        db_error(e, EntityKind::Release)
    }
}

#[async_trait]
impl ReleaseRepo for PgReleaseRepo {
    async fn create(&self, input: NewRelease) -> DomainResult<ApplicationRelease> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "INSERT INTO application_releases ",
            "(id, title, version_code, version_name, release_note, environment, application_id) ",
            "SELECT $1, $2, $3, $4, $5, $6, $7 WHERE EXISTS ",
            "(SELECT 1 FROM live_applications WHERE id = $7) RETURNING ",
            release_columns!()
        ))
        .bind(Uuid::now_v7())
        .bind(&input.title)
        .bind(input.version_code)
        .bind(&input.version_name)
        .bind(&input.release_note)
        .bind(input.environment.as_str())
        .bind(input.application_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => DomainError::not_found(EntityKind::Application),
            e => conflict_or(e, input.version_code, input.environment),
        })?;
        release_from_row(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<ApplicationRelease> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            release_columns!(),
            " FROM live_application_releases WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Release))?;
        release_from_row(&row)
    }

    async fn list_by_application(
        &self,
        application_id: Uuid,
    ) -> DomainResult<Vec<ApplicationRelease>> {
        let mut conn = self.scope.conn().await?;
        sqlx::query(concat!(
            "SELECT ",
            release_columns!(),
            " FROM live_application_releases WHERE application_id = $1 ",
            "ORDER BY version_code DESC, created_at DESC"
        ))
        .bind(application_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Release))?
        .iter()
        .map(release_from_row)
        .collect()
    }

    async fn list_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<Vec<ApplicationRelease>> {
        let mut conn = self.scope.conn().await?;
        sqlx::query(concat!(
            "SELECT ",
            release_columns!(),
            " FROM live_application_releases ",
            "WHERE application_id = $1 AND environment = $2 ",
            "ORDER BY version_code DESC, created_at DESC"
        ))
        .bind(application_id)
        .bind(environment.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Release))?
        .iter()
        .map(release_from_row)
        .collect()
    }

    async fn latest_by_environment(
        &self,
        application_id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            release_columns!(),
            " FROM live_application_releases ",
            "WHERE application_id = $1 AND environment = $2 ",
            "ORDER BY version_code DESC, created_at DESC LIMIT 1"
        ))
        .bind(application_id)
        .bind(environment.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Release))?;
        release_from_row(&row)
    }

    async fn update(
        &self,
        id: Uuid,
        title: String,
        release_note: String,
    ) -> DomainResult<ApplicationRelease> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "UPDATE live_application_releases SET title = $2, release_note = $3, updated_at = now() ",
            "WHERE id = $1 RETURNING ",
            release_columns!()
        ))
        .bind(id)
        .bind(title)
        .bind(release_note)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Release))?;
        release_from_row(&row)
    }

    async fn promote(
        &self,
        id: Uuid,
        environment: ReleaseEnvironment,
    ) -> DomainResult<ApplicationRelease> {
        let current = self.find_by_id(id).await?;

        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "UPDATE live_application_releases SET environment = $2, updated_at = now() ",
            "WHERE id = $1 RETURNING ",
            release_columns!()
        ))
        .bind(id)
        .bind(environment.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| conflict_or(e, current.version_code, environment))?;
        release_from_row(&row)
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut conn = self.scope.conn().await?;
        let done = sqlx::query(
            "UPDATE live_application_releases SET deleted_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Release))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(EntityKind::Release));
        }
        Ok(())
    }

    async fn version_exists(
        &self,
        application_id: Uuid,
        version_code: i32,
        environment: ReleaseEnvironment,
    ) -> DomainResult<bool> {
        let mut conn = self.scope.conn().await?;
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM live_application_releases \
             WHERE application_id = $1 AND version_code = $2 AND environment = $3)",
        )
        .bind(application_id)
        .bind(version_code)
        .bind(environment.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Release))
    }
}
