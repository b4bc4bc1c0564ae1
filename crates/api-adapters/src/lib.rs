//! # api-adapters
//!
//! The thin HTTP layer in front of the AppShare services. Handlers parse the
//! request, call exactly one service operation and render the result; every
//! business rule lives in `services`.

pub mod error;
#[cfg(feature = "web-axum")]
pub mod handlers;
#[cfg(feature = "web-axum")]
pub mod middleware;
#[cfg(feature = "web-axum")]
pub mod principal;

pub use error::{ApiError, ErrorBody};
#[cfg(feature = "web-axum")]
pub use handlers::AppState;

#[cfg(feature = "web-axum")]
use axum::routing::{get, post, put};
#[cfg(feature = "web-axum")]
use axum::Router;

/// Builds the application router.
///
/// `PUT /files/{*path}` is only mounted when the state carries a local
/// object store; other backends hand out upload URLs of their own.
#[cfg(feature = "web-axum")]
pub fn router(state: AppState) -> Router {
    let mut routes = Router::new()
        .route("/healthz", get(handlers::health))
        .route(
            "/applications/{id}/releases/from-artifact",
            post(handlers::create_release_from_artifact),
        )
        .route(
            "/projects/{id}/applications/from-artifact",
            post(handlers::create_application_from_artifact),
        )
        .route("/artifacts/metadata", post(handlers::extract_metadata))
        .route("/releases/{id}/promote", post(handlers::promote_release))
        .route("/releases/{id}/upload-url", post(handlers::release_upload_url))
        .route("/uploads/upload-url", post(handlers::user_upload_url));

    if state.local_store.is_some() {
        routes = routes.route("/files/{*path}", put(handlers::put_file));
    }

    middleware::standard_middleware(routes.with_state(state))
}
