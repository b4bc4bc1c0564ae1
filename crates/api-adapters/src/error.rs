//! HTTP rendering of failures.
//!
//! Every error leaves the API as JSON `{code, message, field?}`. Domain
//! variants map exhaustively onto status codes; infrastructure details never
//! reach the client.

use domains::DomainError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The request could not be decoded (malformed JSON, bad path id).
    #[error("{message}")]
    BadRequest {
        field: Option<String>,
        message: String,
    },

    /// No usable principal on the request.
    #[error("{0}")]
    Unauthenticated(String),

    /// A signed upload URL that does not verify.
    #[error("{message}")]
    Forbidden { field: String, message: String },
}

/// Wire shape of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    pub fn bad_request(field: Option<&str>, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            field: field.map(str::to_owned),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Domain(err) => match err {
                DomainError::NotFound { .. } => 404,
                DomainError::AlreadyExists { .. }
                | DomainError::PackageNameExists { .. }
                | DomainError::ReleaseExists { .. } => 409,
                DomainError::NotProjectOwner { .. } => 403,
                DomainError::Validation { .. } => 422,
                DomainError::Internal(_) => 500,
            },
            ApiError::BadRequest { .. } => 400,
            ApiError::Unauthenticated(_) => 401,
            ApiError::Forbidden { .. } => 403,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::Domain(DomainError::Internal(_)) => ErrorBody {
                code: "internal".into(),
                message: "internal server error".into(),
                field: None,
            },
            ApiError::Domain(err) => ErrorBody {
                code: err.code().into(),
                message: match err {
                    DomainError::Validation { message, .. } => message.clone(),
                    other => other.to_string(),
                },
                field: err.field().map(str::to_owned),
            },
            ApiError::BadRequest { field, message } => ErrorBody {
                code: "invalid_request".into(),
                message: message.clone(),
                field: field.clone(),
            },
            ApiError::Unauthenticated(message) => ErrorBody {
                code: "unauthenticated".into(),
                message: message.clone(),
                field: None,
            },
            ApiError::Forbidden { field, message } => ErrorBody {
                code: "invalid_upload_signature".into(),
                message: message.clone(),
                field: Some(field.clone()),
            },
        }
    }
}

#[cfg(feature = "web-axum")]
mod web {
    use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use tracing::{error, warn};

    use super::ApiError;

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let status =
                StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                error!(error = %self, "request failed");
            } else if status == StatusCode::FORBIDDEN {
                warn!(error = %self, "request refused");
            }
            (status, Json(self.body())).into_response()
        }
    }

    impl From<JsonRejection> for ApiError {
        fn from(rejection: JsonRejection) -> Self {
            ApiError::bad_request(None, rejection.body_text())
        }
    }

    impl From<PathRejection> for ApiError {
        fn from(rejection: PathRejection) -> Self {
            ApiError::bad_request(Some("id"), rejection.body_text())
        }
    }

    impl From<QueryRejection> for ApiError {
        fn from(rejection: QueryRejection) -> Self {
            ApiError::bad_request(None, rejection.body_text())
        }
    }
}

#[cfg(test)]
mod tests {
    use domains::{EntityKind, ReleaseEnvironment};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases: Vec<(DomainError, u16)> = vec![
            (DomainError::not_found(EntityKind::Release), 404),
            (DomainError::already_exists(EntityKind::Artifact), 409),
            (
                DomainError::PackageNameExists {
                    package_name: "com.example.app".into(),
                },
                409,
            ),
            (
                DomainError::ReleaseExists {
                    version_code: 3,
                    environment: ReleaseEnvironment::Staging,
                },
                409,
            ),
            (
                DomainError::NotProjectOwner {
                    user_id: Uuid::nil(),
                    project_id: Uuid::nil(),
                },
                403,
            ),
            (DomainError::validation("artifact_url", "bad"), 422),
            (DomainError::internal("pool timed out"), 500),
        ];
        for (err, status) in cases {
            let code = err.code();
            assert_eq!(ApiError::from(err).status_code(), status, "{code}");
        }
    }

    #[test]
    fn validation_body_carries_the_field() {
        let body = ApiError::from(DomainError::validation("environment", "unknown environment"))
            .body();
        assert_eq!(body.code, "validation_error");
        assert_eq!(body.message, "unknown environment");
        assert_eq!(body.field.as_deref(), Some("environment"));
    }

    #[test]
    fn internal_details_are_not_rendered() {
        let body = ApiError::from(DomainError::internal("connection refused to 10.0.0.3")).body();
        assert_eq!(body.code, "internal");
        assert!(!body.message.contains("10.0.0.3"));
    }

    #[test]
    fn field_is_omitted_when_absent() {
        let body = ApiError::from(DomainError::not_found(EntityKind::Application)).body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "application_not_found");
        assert!(json.get("field").is_none());
    }
}
