//! # DomainError
//!
//! Centralized error handling for AppShare.
//! Every adapter translates its own failures into one of these variants at
//! its boundary, so callers can match exhaustively instead of inspecting
//! strings.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::models::ReleaseEnvironment;

/// Kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Project,
    Application,
    Release,
    Artifact,
    /// An object in the blob store rather than a database row.
    StoredObject,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Project => "project",
            EntityKind::Application => "application",
            EntityKind::Release => "release",
            EntityKind::Artifact => "artifact",
            EntityKind::StoredObject => "stored object",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type for all domain operations.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Entity absent or soft-deleted.
    #[error("{entity} not found")]
    NotFound { entity: EntityKind },

    /// Generic uniqueness conflict.
    #[error("{entity} already exists")]
    AlreadyExists { entity: EntityKind },

    /// Package identifiers are unique across all live applications.
    #[error("package name {package_name} is already registered")]
    PackageNameExists { package_name: String },

    /// (application, version code, environment) is taken.
    #[error("version code {version_code} already exists in {environment}")]
    ReleaseExists {
        version_code: i32,
        environment: ReleaseEnvironment,
    },

    /// The acting user does not own the project at the end of the ownership chain.
    #[error("access denied: user {user_id} is not the owner of project {project_id}")]
    NotProjectOwner { user_id: Uuid, project_id: Uuid },

    /// Caller-supplied input was rejected, including unusable binaries.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// Infrastructure failure (database down, storage unreachable, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(entity: EntityKind) -> Self {
        DomainError::NotFound { entity }
    }

    pub fn already_exists(entity: EntityKind) -> Self {
        DomainError::AlreadyExists { entity }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DomainError::Internal(message.into())
    }

    /// Stable machine-readable code, suitable for clients to branch on.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound { entity } => match entity {
                EntityKind::User => "user_not_found",
                EntityKind::Project => "project_not_found",
                EntityKind::Application => "application_not_found",
                EntityKind::Release => "release_not_found",
                EntityKind::Artifact => "artifact_not_found",
                EntityKind::StoredObject => "object_not_found",
            },
            DomainError::AlreadyExists { .. } => "already_exists",
            DomainError::PackageNameExists { .. } => "package_name_exists",
            DomainError::ReleaseExists { .. } => "release_exists",
            DomainError::NotProjectOwner { .. } => "not_project_owner",
            DomainError::Validation { .. } => "validation_error",
            DomainError::Internal(_) => "internal",
        }
    }

    /// Field the error should be attached to in a client form, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            DomainError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// `true` for every uniqueness conflict, whichever constraint raised it.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::AlreadyExists { .. }
                | DomainError::PackageNameExists { .. }
                | DomainError::ReleaseExists { .. }
        )
    }
}

/// A specialized Result type for AppShare logic.
pub type DomainResult<T> = std::result::Result<T, DomainError>;
