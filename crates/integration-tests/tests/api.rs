//! The HTTP adapter driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use api_adapters::{router, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::{apk, Harness};
use domains::ObjectStore;
use serde_json::{json, Value};
use storage_adapters::storage::local::LocalObjectStore;
use tower::ServiceExt;
use uuid::Uuid;

const LOCAL_ORIGIN: &str = "http://localhost:8080";

fn app(h: &Harness, local_store: Option<Arc<LocalObjectStore>>) -> Router {
    router(AppState {
        ingestion: h.ingestion.clone(),
        releases: h.releases.clone(),
        artifacts: h.artifacts.clone(),
        files: h.files.clone(),
        local_store,
    })
}

fn post(uri: &str, user: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn healthz_answers_without_a_principal() {
    let h = Harness::new().await;
    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();

    let (status, body) = send(&app(&h, None), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn requests_without_a_user_are_unauthenticated() {
    let h = Harness::new().await;
    let request = post("/artifacts/metadata", None, json!({ "artifact_url": "x" }));

    let (status, body) = send(&app(&h, None), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn release_from_artifact_round_trip() {
    let h = Harness::new().await;
    let application = h.application("com.example.app").await;
    let (url, _) = h.upload_apk("apps/demo/app.apk", "com.example.app", 5, "1.0.5");
    let router = app(&h, None);
    let uri = format!("/applications/{}/releases/from-artifact", application.id);
    let payload = json!({
        "artifact_url": url,
        "release_note": "hello",
        "environment": "production",
    });

    let (status, body) = send(&router, post(&uri, Some(h.owner.id), payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version_code"], 5);
    assert_eq!(body["environment"], "production");
    assert_eq!(body["title"], "Release 1.0.5 (5)");

    let (status, body) = send(&router, post(&uri, Some(h.owner.id), payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "release_exists");
}

#[tokio::test]
async fn domain_failures_render_as_json_errors() {
    let h = Harness::new().await;
    let application = h.application("com.example.app").await;
    let (url, _) = h.upload_apk("apps/demo/app.apk", "com.example.app", 5, "1.0.5");
    let router = app(&h, None);
    let uri = format!("/applications/{}/releases/from-artifact", application.id);

    let (status, body) = send(
        &router,
        post(&uri, Some(h.owner.id), json!({ "artifact_url": url, "environment": "beta" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["field"], "environment");

    let (status, body) = send(
        &router,
        post(&uri, Some(h.stranger.id), json!({ "artifact_url": url, "environment": "staging" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_project_owner");

    let missing = format!("/applications/{}/releases/from-artifact", Uuid::now_v7());
    let (status, body) = send(
        &router,
        post(&missing, Some(h.owner.id), json!({ "artifact_url": url, "environment": "staging" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "application_not_found");

    let (status, body) = send(
        &router,
        post(&uri, Some(h.owner.id), json!({ "artifact_url": "https://evil.example/a.apk", "environment": "staging" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "artifact_url");
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let h = Harness::new().await;
    let router = app(&h, None);

    let (status, body) = send(
        &router,
        post("/releases/not-a-uuid/promote", Some(h.owner.id), json!({ "environment": "staging" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(
        &router,
        post("/artifacts/metadata", Some(h.owner.id), json!({ "url": "missing field" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn promote_and_metadata_routes() {
    let h = Harness::new().await;
    let application = h.application("com.example.app").await;
    let (url, _) = h.upload_apk("apps/demo/app.apk", "com.example.app", 8, "1.0.8");
    let router = app(&h, None);

    let (status, metadata) = send(
        &router,
        post("/artifacts/metadata", Some(h.owner.id), json!({ "artifact_url": url })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metadata["package_name"], "com.example.app");
    assert_eq!(metadata["version_code"], 8);

    let (_, release) = send(
        &router,
        post(
            &format!("/applications/{}/releases/from-artifact", application.id),
            Some(h.owner.id),
            json!({ "artifact_url": url, "environment": "development" }),
        ),
    )
    .await;
    let release_id = release["id"].as_str().unwrap();

    let (status, promoted) = send(
        &router,
        post(
            &format!("/releases/{release_id}/promote"),
            Some(h.owner.id),
            json!({ "environment": "staging" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(promoted["environment"], "staging");

    let (status, target) = send(
        &router,
        post(
            &format!("/releases/{release_id}/upload-url"),
            Some(h.owner.id),
            json!({ "filename": "app-arm64.apk" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(target["path"].as_str().unwrap().ends_with("_app-arm64.apk"));
}

#[tokio::test]
async fn files_route_is_absent_without_a_local_store() {
    let h = Harness::new().await;
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/files/uploads/x/app.apk?expires=0&signature=00")
        .body(Body::from("data"))
        .unwrap();

    let response = app(&h, None).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signed_local_upload_feeds_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(
        LocalObjectStore::new(
            dir.path(),
            &format!("{LOCAL_ORIGIN}/files"),
            "an-integration-test-signing-key-of-some-length",
        )
        .unwrap(),
    );
    let h = Harness::with(Some(local.clone() as Arc<dyn ObjectStore>), None).await;
    let router = app(&h, Some(local.clone()));

    // 1. Ask for an upload URL
    let (status, target) = send(
        &router,
        post("/uploads/upload-url", Some(h.owner.id), json!({ "filename": "app.apk" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let upload_url = target["upload_url"].as_str().unwrap();
    let file_url = target["file_url"].as_str().unwrap().to_owned();
    let upload_uri = upload_url.strip_prefix(LOCAL_ORIGIN).unwrap();

    // 2. A tampered signature is refused and leaves nothing behind
    let (forged, _) = upload_uri.split_once("&signature=").unwrap();
    let forged = format!("{forged}&signature={}", "00".repeat(32));
    let request = Request::builder()
        .method(Method::PUT)
        .uri(forged)
        .body(Body::from(apk("com.example.local", 2, "0.2")))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "invalid_upload_signature");
    assert_eq!(body["field"], "signature");

    // 3. The signed upload lands in the store
    let request = Request::builder()
        .method(Method::PUT)
        .uri(upload_uri)
        .body(Body::from(apk("com.example.local", 2, "0.2")))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let stored = target["path"].as_str().unwrap();
    assert!(local.root().join(stored).is_file());

    // 4. The pipeline reads it back from disk
    let (status, application) = send(
        &router,
        post(
            &format!("/projects/{}/applications/from-artifact", h.project.id),
            Some(h.owner.id),
            json!({ "title": "Local", "artifact_url": file_url }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(application["package_name"], "com.example.local");
}
