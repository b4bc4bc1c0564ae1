use async_trait::async_trait;
use domains::{DomainError, DomainResult, EntityKind, NewProject, Project, ProjectRepo};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::{db_error, decode_error, Scope};

macro_rules! project_columns {
    () => {
        "id, title, description, owner_id, created_at, updated_at, deleted_at"
    };
}

pub struct PgProjectRepo {
    scope: Scope,
}

impl PgProjectRepo {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

fn project_from_row(row: &PgRow) -> DomainResult<Project> {
    Ok(Project {
        id: row.try_get("id").map_err(decode_error)?,
        title: row.try_get("title").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        owner_id: row.try_get("owner_id").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
    })
}

#[async_trait]
impl ProjectRepo for PgProjectRepo {
    /// The owner must be a live user.
    async fn create(&self, input: NewProject) -> DomainResult<Project> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "INSERT INTO projects (id, title, description, owner_id) ",
            "SELECT $1, $2, $3, $4 WHERE EXISTS ",
            "(SELECT 1 FROM live_users WHERE id = $4) RETURNING ",
            project_columns!()
        ))
        .bind(Uuid::now_v7())
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.owner_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::User))?;
        project_from_row(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Project> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            project_columns!(),
            " FROM live_projects WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Project))?;
        project_from_row(&row)
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> DomainResult<Vec<Project>> {
        let mut conn = self.scope.conn().await?;
        sqlx::query(concat!(
            "SELECT ",
            project_columns!(),
            " FROM live_projects WHERE owner_id = $1 ORDER BY created_at, id"
        ))
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Project))?
        .iter()
        .map(project_from_row)
        .collect()
    }

    async fn transfer_ownership(&self, id: Uuid, new_owner_id: Uuid) -> DomainResult<Project> {
        let mut conn = self.scope.conn().await?;
        let owner_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM live_users WHERE id = $1)",
        )
        .bind(new_owner_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::User))?;
        if !owner_exists {
            return Err(DomainError::not_found(EntityKind::User));
        }

        let row = sqlx::query(concat!(
            "UPDATE live_projects SET owner_id = $2, updated_at = now() ",
            "WHERE id = $1 RETURNING ",
            project_columns!()
        ))
        .bind(id)
        .bind(new_owner_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Project))?;
        project_from_row(&row)
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut conn = self.scope.conn().await?;
        let done = sqlx::query(
            "UPDATE live_projects SET deleted_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Project))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(EntityKind::Project));
        }
        Ok(())
    }
}
