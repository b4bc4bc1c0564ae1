use std::time::Duration;

use chrono::Utc;
use domains::{DomainError, DomainResult, ObjectStore, UploadTarget};
use uuid::Uuid;

/// Signed upload URLs stay valid for 15 minutes.
pub(crate) const UPLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Last path component of a client-supplied filename, either separator.
pub(crate) fn basename(filename: &str) -> DomainResult<&str> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(DomainError::validation("filename", "filename is required"));
    }
    Ok(name)
}

pub(crate) fn artifact_path(application_id: Uuid, release_id: Uuid, filename: &str) -> DomainResult<String> {
    Ok(format!(
        "apps/{application_id}/releases/{release_id}/{}_{}",
        Utc::now().timestamp(),
        basename(filename)?
    ))
}

pub(crate) fn user_upload_path(user_id: Uuid, filename: &str) -> DomainResult<String> {
    Ok(format!(
        "uploads/{user_id}/{}_{}",
        Utc::now().timestamp(),
        basename(filename)?
    ))
}

pub(crate) async fn signed_target(store: &dyn ObjectStore, path: String) -> DomainResult<UploadTarget> {
    let upload_url = store.generate_upload_url(&path, UPLOAD_URL_TTL).await?;
    Ok(UploadTarget {
        upload_url,
        file_url: store.public_url(&path),
        path,
    })
}
