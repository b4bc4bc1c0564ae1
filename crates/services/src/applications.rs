use domains::{Application, DomainError, DomainResult, NewApplication};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::Repositories;

/// Java-style package identifier: at least two dot-separated segments, each
/// starting with a letter and made of ASCII letters, digits and `_`.
pub fn validate_package_name(package_name: &str) -> DomainResult<()> {
    let invalid = || {
        DomainError::validation(
            "package_name",
            format!("{package_name:?} is not a valid package name"),
        )
    };

    let mut segments = 0;
    for segment in package_name.split('.') {
        let mut chars = segment.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {}
            _ => return Err(invalid()),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
        segments += 1;
    }

    if segments < 2 {
        return Err(invalid());
    }
    Ok(())
}

const TITLE_CHARS: std::ops::RangeInclusive<usize> = 3..=100;

/// Application titles are 3 to 100 characters once trimmed. Returns the
/// trimmed title.
pub fn validate_title(title: &str) -> DomainResult<&str> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("title", "title is required"));
    }
    if !TITLE_CHARS.contains(&trimmed.chars().count()) {
        return Err(DomainError::validation(
            "title",
            "title must be between 3 and 100 characters",
        ));
    }
    Ok(trimmed)
}

/// Application management.
pub struct ApplicationService {
    repos: Repositories,
}

impl ApplicationService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Application> {
        self.repos.applications.find_by_id(id).await
    }

    pub async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Application>> {
        self.repos.applications.list_by_project(project_id).await
    }

    /// Registers an application by hand. The package name is immutable
    /// afterwards.
    #[instrument(skip(self, input), fields(user_id = %actor, project_id = %input.project_id))]
    pub async fn create(&self, actor: Uuid, input: NewApplication) -> DomainResult<Application> {
        self.repos.owned_project(actor, input.project_id).await?;

        validate_title(&input.title)?;
        validate_package_name(&input.package_name)?;
        if self
            .repos
            .applications
            .package_name_exists(&input.package_name)
            .await?
        {
            return Err(DomainError::PackageNameExists {
                package_name: input.package_name,
            });
        }

        let application = self.repos.applications.create(input).await?;
        info!(application_id = %application.id, "application created");
        Ok(application)
    }

    pub async fn update(
        &self,
        actor: Uuid,
        id: Uuid,
        title: String,
        description: String,
    ) -> DomainResult<Application> {
        self.repos.owned_application(actor, id).await?;
        validate_title(&title)?;
        self.repos.applications.update(id, title, description).await
    }

    pub async fn delete(&self, actor: Uuid, id: Uuid) -> DomainResult<()> {
        self.repos.owned_application(actor, id).await?;
        self.repos.applications.soft_delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{application, project, Mocks};

    #[test]
    fn package_names() {
        for good in ["com.example.app", "io.github.user_1.tool", "a.b"] {
            assert!(validate_package_name(good).is_ok(), "{good}");
        }
        for bad in ["", "app", "com..app", "com.1app", ".com.app", "com.app.", "com.my-app"] {
            let err = validate_package_name(bad).unwrap_err();
            assert_eq!(err.field(), Some("package_name"), "{bad}");
        }
    }

    #[test]
    fn titles() {
        assert_eq!(validate_title("  Example  ").unwrap(), "Example");
        assert!(validate_title(&"x".repeat(100)).is_ok());
        for bad in ["", "   ", "ab", " ab ", &"x".repeat(101)] {
            let err = validate_title(bad).unwrap_err();
            assert_eq!(err.field(), Some("title"), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn duplicate_package_name_is_a_conflict() {
        let owner = Uuid::now_v7();
        let proj = project(owner);
        let project_id = proj.id;

        let mut mocks = Mocks::default();
        mocks
            .projects
            .expect_find_by_id()
            .returning(move |_| Ok(proj.clone()));
        mocks
            .applications
            .expect_package_name_exists()
            .returning(|_| Ok(true));
        mocks.applications.expect_create().never();

        let err = ApplicationService::new(mocks.build())
            .create(
                owner,
                NewApplication {
                    title: "Example".into(),
                    package_name: "com.example.app".into(),
                    description: String::new(),
                    project_id,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "package_name_exists");
    }

    #[tokio::test]
    async fn update_checks_ownership_first() {
        let proj = project(Uuid::now_v7());
        let app = application(proj.id, "com.example.app");
        let app_id = app.id;

        let mut mocks = Mocks::default();
        mocks
            .applications
            .expect_find_by_id()
            .returning(move |_| Ok(app.clone()));
        mocks
            .projects
            .expect_find_by_id()
            .returning(move |_| Ok(proj.clone()));
        mocks.applications.expect_update().never();

        let err = ApplicationService::new(mocks.build())
            .update(Uuid::now_v7(), app_id, "New".into(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotProjectOwner { .. }));
    }
}
