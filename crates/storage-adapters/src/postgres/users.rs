use async_trait::async_trait;
use domains::{DomainError, DomainResult, EntityKind, NewUser, User, UserRepo};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::{db_error, decode_error, unique_violation, Scope};

macro_rules! user_columns {
    () => {
        "id, email, username, created_at, updated_at, deleted_at"
    };
}

pub struct PgUserRepo {
    scope: Scope,
}

impl PgUserRepo {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

fn user_from_row(row: &PgRow) -> DomainResult<User> {
    Ok(User {
        id: row.try_get("id").map_err(decode_error)?,
        email: row.try_get("email").map_err(decode_error)?,
        username: row.try_get("username").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
    })
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, input: NewUser) -> DomainResult<User> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "INSERT INTO users (id, email, username) VALUES ($1, $2, $3) RETURNING ",
            user_columns!()
        ))
        .bind(Uuid::now_v7())
        .bind(&input.email)
        .bind(&input.username)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if unique_violation(&e).is_some() {
                DomainError::already_exists(EntityKind::User)
            } else {
                db_error(e, EntityKind::User)
            }
        })?;
        user_from_row(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<User> {
        let mut conn = self.scope.conn().await?;
        let row = sqlx::query(concat!(
            "SELECT ",
            user_columns!(),
            " FROM live_users WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error(e, EntityKind::User))?;
        user_from_row(&row)
    }
}
