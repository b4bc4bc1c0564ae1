//! # Domain Models
//!
//! These structs represent the core entities of AppShare.
//! We use UUID v7 for time-ordered, globally unique identification.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// Canonical MIME type of an Android package archive.
pub const APK_MIME_TYPE: &str = "application/vnd.android.package-archive";

/// Architecture reported for artifacts that were not split per ABI.
pub const UNIVERSAL_ARCHITECTURE: &str = "universal";

/// Entities that are hidden rather than removed.
///
/// Every repository read path filters on [`SoftDeletable::is_live`], so a
/// soft-deleted row behaves exactly like a missing one.
pub trait SoftDeletable {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_live(&self) -> bool {
        self.deleted_at().is_none()
    }
}

macro_rules! soft_deletable {
    ($($ty:ty),+ $(,)?) => {
        $(impl SoftDeletable for $ty {
            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }
        })+
    };
}

soft_deletable!(User, Project, Application, ApplicationRelease, Artifact);

/// An authenticated account. Only the fields ownership checks need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A container of applications, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}

/// An app within a project (e.g. "Main App Android").
///
/// `package_name` is unique across every live application, not per project:
/// package identifiers are global in the Android ecosystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub title: String,
    pub package_name: String,
    pub description: String,
    pub project_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Deployment stage a release is targeted at.
///
/// There is no transition rule between stages; promoting may move a release
/// from any environment to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseEnvironment {
    Development,
    Staging,
    Production,
}

impl ReleaseEnvironment {
    pub const ALL: [ReleaseEnvironment; 3] = [
        ReleaseEnvironment::Development,
        ReleaseEnvironment::Staging,
        ReleaseEnvironment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseEnvironment::Development => "development",
            ReleaseEnvironment::Staging => "staging",
            ReleaseEnvironment::Production => "production",
        }
    }
}

impl fmt::Display for ReleaseEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseEnvironment {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| {
                DomainError::validation(
                    "environment",
                    format!("unknown environment {s:?}, expected development, staging or production"),
                )
            })
    }
}

/// A specific version of an application targeted at one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRelease {
    pub id: Uuid,
    pub title: String,
    pub version_code: i32,
    pub version_name: String,
    pub release_note: String,
    pub environment: ReleaseEnvironment,
    pub application_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A binary attached to a release.
///
/// `abi` is `None` for a universal build; a release holds at most one
/// artifact per ABI value, `None` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub file_url: String,
    pub sha256: String,
    pub file_size: i64,
    pub file_type: String,
    pub abi: Option<String>,
    pub release_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ── Constructors ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub owner_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewApplication {
    pub title: String,
    pub package_name: String,
    pub description: String,
    pub project_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRelease {
    pub title: String,
    pub version_code: i32,
    pub version_name: String,
    pub release_note: String,
    pub environment: ReleaseEnvironment,
    pub application_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact {
    pub file_url: String,
    pub sha256: String,
    pub file_size: i64,
    pub file_type: String,
    pub abi: Option<String>,
    pub release_id: Uuid,
}

// ── Binary inspection ────────────────────────────────────────────────────────

/// Version metadata read from a package's embedded manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub package_name: String,
    pub version_code: i32,
    pub version_name: String,
    pub min_sdk_version: i32,
    pub target_sdk_version: i32,
}

/// Everything the pipeline learns about an uploaded binary before persisting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    pub package_name: String,
    pub version_code: i32,
    pub version_name: String,
    pub min_sdk_version: i32,
    pub target_sdk_version: i32,
    pub architecture: String,
    pub platform: String,
    pub sha256: String,
    pub file_size: i64,
}

/// A signed upload target handed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Signed URL for a `PUT` upload.
    pub upload_url: String,
    /// Public URL the file will be reachable at once uploaded.
    pub file_url: String,
    /// Storage key.
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_round_trips_through_its_wire_name() {
        for env in ReleaseEnvironment::ALL {
            assert_eq!(env.as_str().parse::<ReleaseEnvironment>().unwrap(), env);
        }
        assert_eq!(
            serde_json::to_string(&ReleaseEnvironment::Staging).unwrap(),
            "\"staging\""
        );
    }

    #[test]
    fn unknown_environment_is_a_field_error() {
        let err = "qa".parse::<ReleaseEnvironment>().unwrap_err();
        assert_eq!(err.field(), Some("environment"));
    }

    #[test]
    fn soft_deleted_rows_are_not_live() {
        let now = Utc::now();
        let mut project = Project {
            id: Uuid::now_v7(),
            title: "Demo".into(),
            description: String::new(),
            owner_id: Uuid::now_v7(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        assert!(project.is_live());
        project.deleted_at = Some(now);
        assert!(!project.is_live());
    }
}
