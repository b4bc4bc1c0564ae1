//! # Handlers
//!
//! Each handler decodes its request, calls one service operation and renders
//! the outcome. Malformed input is a 400; everything else is whatever the
//! service returned.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use domains::{
    Application, ApplicationMetadata, ApplicationRelease, DomainError, EntityKind,
    ReleaseEnvironment, UploadTarget,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use services::{ArtifactIngestion, ArtifactService, FileService, ReleaseService};
use storage_adapters::storage::local::LocalObjectStore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::principal::Principal;

/// Services shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<ArtifactIngestion>,
    pub releases: Arc<ReleaseService>,
    pub artifacts: Arc<ArtifactService>,
    pub files: Arc<FileService>,
    /// Present when objects are kept on the local filesystem; enables the
    /// signed `PUT /files/{*path}` route.
    pub local_store: Option<Arc<LocalObjectStore>>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseFromArtifactRequest {
    pub artifact_url: String,
    #[serde(default)]
    pub release_note: String,
    pub environment: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationFromArtifactRequest {
    pub title: String,
    pub artifact_url: String,
}

#[derive(Debug, Deserialize)]
pub struct MetadataRequest {
    pub artifact_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub environment: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    pub filename: String,
}

/// Query string of a signed local upload URL.
#[derive(Debug, Deserialize)]
pub struct SignedUpload {
    pub expires: i64,
    pub signature: String,
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "name": "appshare",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

pub async fn create_release_from_artifact(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ReleaseFromArtifactRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApplicationRelease>), ApiError> {
    let Path(application_id) = id?;
    let Json(request) = payload?;
    let environment: ReleaseEnvironment = request.environment.parse()?;

    let release = state
        .ingestion
        .create_release_with_artifact_url(
            user_id,
            application_id,
            &request.artifact_url,
            &request.release_note,
            environment,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(release)))
}

pub async fn create_application_from_artifact(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ApplicationFromArtifactRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Application>), ApiError> {
    let Path(project_id) = id?;
    let Json(request) = payload?;

    let application = state
        .ingestion
        .create_application_from_artifact(user_id, project_id, &request.title, &request.artifact_url)
        .await?;
    Ok((StatusCode::CREATED, Json(application)))
}

/// Read-only: nothing is persisted.
pub async fn extract_metadata(
    State(state): State<AppState>,
    _principal: Principal,
    payload: Result<Json<MetadataRequest>, JsonRejection>,
) -> Result<Json<ApplicationMetadata>, ApiError> {
    let Json(request) = payload?;
    let metadata = state
        .ingestion
        .extract_metadata_from_url(&request.artifact_url)
        .await?;
    Ok(Json(metadata))
}

pub async fn promote_release(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<PromoteRequest>, JsonRejection>,
) -> Result<Json<ApplicationRelease>, ApiError> {
    let Path(release_id) = id?;
    let Json(request) = payload?;
    let environment: ReleaseEnvironment = request.environment.parse()?;

    let release = state.releases.promote(user_id, release_id, environment).await?;
    Ok(Json(release))
}

pub async fn release_upload_url(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UploadUrlRequest>, JsonRejection>,
) -> Result<Json<UploadTarget>, ApiError> {
    let Path(release_id) = id?;
    let Json(request) = payload?;
    let target = state
        .artifacts
        .upload_url(user_id, release_id, &request.filename)
        .await?;
    Ok(Json(target))
}

pub async fn user_upload_url(
    State(state): State<AppState>,
    Principal(user_id): Principal,
    payload: Result<Json<UploadUrlRequest>, JsonRejection>,
) -> Result<Json<UploadTarget>, ApiError> {
    let Json(request) = payload?;
    let target = state.files.upload_url(user_id, &request.filename).await?;
    Ok(Json(target))
}

/// Receives the body of a signed local upload and streams it to disk.
/// The object only appears under its key once the whole body has arrived.
pub async fn put_file(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<SignedUpload>, QueryRejection>,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let store = state
        .local_store
        .as_ref()
        .ok_or(ApiError::Domain(DomainError::not_found(EntityKind::StoredObject)))?;
    let Path(path) = path?;
    let Query(signed) = query.map_err(|_| ApiError::Forbidden {
        field: "signature".into(),
        message: "upload URL is not signed".into(),
    })?;

    store
        .verify_upload(&path, signed.expires, &signed.signature)
        .map_err(|err| match err {
            DomainError::Validation { field, message }
                if field == "expires" || field == "signature" =>
            {
                ApiError::Forbidden { field, message }
            }
            other => ApiError::Domain(other),
        })?;

    let mut upload = store.begin_put(&path).await?;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            warn!(path, error = %e, "upload body interrupted");
            ApiError::bad_request(None, "upload body interrupted")
        })?;
        upload.write(&chunk).await?;
    }
    let size = upload.finish().await?;

    info!(path, size, "object stored");
    Ok(StatusCode::CREATED)
}
