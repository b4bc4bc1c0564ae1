use async_trait::async_trait;
use domains::{Application, ApplicationRepo, DomainError, DomainResult, EntityKind, NewApplication};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::{db_error, decode_error, unique_violation, Scope};

macro_rules! application_columns {
    () => {
        "id, title, package_name, description, project_id, created_at, updated_at, deleted_at"
    };
}

pub struct PgApplicationRepo {
    scope: Scope,
}

impl PgApplicationRepo {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

fn application_from_row(row: &PgRow) -> DomainResult<Application> {
    Ok(Application {
        id: row.try_get("id").map_err(decode_error)?,
        title: row.try_get("title").map_err(decode_error)?,
        package_name: row.try_get("package_name").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        project_id: row.try_get("project_id").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
    })
}

#[async_trait]
impl ApplicationRepo for PgApplicationRepo {
    /// The project must be live; the package name must be free.
    async fn create(&self, input: NewApplication) -> DomainResult<Application> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "INSERT INTO applications (id, title, package_name, description, project_id) ",
            "SELECT $1, $2, $3, $4, $5 WHERE EXISTS ",
            "(SELECT 1 FROM live_projects WHERE id = $5) RETURNING ",
            application_columns!()
        ))
        .bind(Uuid::now_v7())
        .bind(&input.title)
        .bind(&input.package_name)
        .bind(&input.description)
        .bind(input.project_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if unique_violation(&e).is_some() {
                DomainError::PackageNameExists {
                    package_name: input.package_name.clone(),
                }
            } else {
                db_error(e, EntityKind::Project)
            }
        })?;
        application_from_row(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Application> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            application_columns!(),
            " FROM live_applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Application))?;
        application_from_row(&row)
    }

    async fn find_by_package_name(&self, package_name: &str) -> DomainResult<Application> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            application_columns!(),
            " FROM live_applications WHERE package_name = $1"
        ))
        .bind(package_name)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Application))?;
        application_from_row(&row)
    }

    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Application>> {
        let mut conn = self.scope.conn().await?;
        sqlx::query(concat!(
            "SELECT ",
            application_columns!(),
            " FROM live_applications WHERE project_id = $1 ORDER BY created_at, id"
        ))
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Application))?
        .iter()
        .map(application_from_row)
        .collect()
    }

    async fn update(
        &self,
        id: Uuid,
        title: String,
        description: String,
    ) -> DomainResult<Application> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "UPDATE live_applications SET title = $2, description = $3, updated_at = now() ",
            "WHERE id = $1 RETURNING ",
            application_columns!()
        ))
        .bind(id)
        .bind(title)
        .bind(description)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Application))?;
        application_from_row(&row)
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let mut conn = self.scope.conn().await?;
        let done = sqlx::query(
            "UPDATE live_applications SET deleted_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Application))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(EntityKind::Application));
        }
        Ok(())
    }

    async fn package_name_exists(&self, package_name: &str) -> DomainResult<bool> {
        let mut conn = self.scope.conn().await?;
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM live_applications WHERE package_name = $1)",
        )
        .bind(package_name)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::Application))
    }
}
