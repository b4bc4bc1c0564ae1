use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::ApiError;

/// Header the upstream authenticator sets to the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The already-authenticated user a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal(pub Uuid);

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {USER_ID_HEADER} header")))?;
        value
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .map(Principal)
            .ok_or_else(|| ApiError::Unauthenticated(format!("{USER_ID_HEADER} is not a user id")))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<Principal, ApiError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Principal::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_the_user_id() {
        let id = Uuid::now_v7();
        assert_eq!(extract(Some(&id.to_string())).await.unwrap(), Principal(id));
    }

    #[tokio::test]
    async fn missing_or_garbled_ids_are_unauthenticated() {
        for header in [None, Some("alice"), Some("")] {
            let err = extract(header).await.unwrap_err();
            assert_eq!(err.status_code(), 401, "{header:?}");
        }
    }
}
