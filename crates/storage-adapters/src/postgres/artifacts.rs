use async_trait::async_trait;
use domains::{Artifact, ArtifactRepo, DomainError, DomainResult, EntityKind, NewArtifact};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::{db_error, decode_error, unique_violation, Scope};

macro_rules! artifact_columns {
    () => {
        "id, file_url, sha256, file_size, file_type, abi, release_id, \
         created_at, updated_at, deleted_at"
    };
}

pub struct PgArtifactRepo {
    scope: Scope,
}

impl PgArtifactRepo {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

fn artifact_from_row(row: &PgRow) -> DomainResult<Artifact> {
    Ok(Artifact {
        id: row.try_get("id").map_err(decode_error)?,
        file_url: row.try_get("file_url").map_err(decode_error)?,
        sha256: row.try_get("sha256").map_err(decode_error)?,
        file_size: row.try_get("file_size").map_err(decode_error)?,
        file_type: row.try_get("file_type").map_err(decode_error)?,
        abi: row.try_get("abi").map_err(decode_error)?,
        release_id: row.try_get("release_id").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
    })
}

#[async_trait]
impl ArtifactRepo for PgArtifactRepo {
    /// The release must be live and hold no artifact for the same ABI.
    async fn create(&self, input: NewArtifact) -> DomainResult<Artifact> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "INSERT INTO artifacts (id, file_url, sha256, file_size, file_type, abi, release_id) ",
            "SELECT $1, $2, $3, $4, $5, $6, $7 WHERE EXISTS ",
            "(SELECT 1 FROM live_application_releases WHERE id = $7) RETURNING ",
            artifact_columns!()
        ))
        .bind(Uuid::now_v7())
        .bind(&input.file_url)
        .bind(&input.sha256)
        .bind(input.file_size)
        .bind(&input.file_type)
        .bind(&input.abi)
        .bind(input.release_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if unique_violation(&e).is_some() {
                DomainError::already_exists(EntityKind::Artifact)
            } else {
                db_error(e, EntityKind::Release)
            }
        })?;
        artifact_from_row(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Artifact> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            artifact_columns!(),
            " FROM live_artifacts WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Artifact))?;
        artifact_from_row(&row)
    }

    async fn list_by_release(&self, release_id: Uuid) -> DomainResult<Vec<Artifact>> {
        let mut conn = self.scope.conn().await?;
        sqlx::query(concat!(
            "SELECT ",
            artifact_columns!(),
            " FROM live_artifacts WHERE release_id = $1 ORDER BY created_at, id"
        ))
        .bind(release_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Artifact))?
        .iter()
        .map(artifact_from_row)
        .collect()
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut conn = self.scope.conn().await?;
        let done = sqlx::query(
            "UPDATE live_artifacts SET deleted_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Artifact))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(EntityKind::Artifact));
        }
        Ok(())
    }

    async fn hard_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut conn = self.scope.conn().await?;
        let done = sqlx::query("DELETE FROM artifacts WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| db_error(e, EntityKind::Artifact))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(EntityKind::Artifact));
        }
        Ok(())
    }
}
