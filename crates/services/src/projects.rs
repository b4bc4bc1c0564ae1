use std::sync::Arc;

use domains::{
    DomainError, DomainResult, IsolationLevel, Project, TransactionManager,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::transaction::run_in_transaction;
use crate::Repositories;

pub struct ProjectService {
    repos: Repositories,
    transactions: Arc<dyn TransactionManager>,
}

impl ProjectService {
    pub fn new(repos: Repositories, transactions: Arc<dyn TransactionManager>) -> Self {
        Self {
            repos,
            transactions,
        }
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Project> {
        self.repos.projects.find_by_id(id).await
    }

    pub async fn list_by_owner(&self, owner_id: Uuid) -> DomainResult<Vec<Project>> {
        self.repos.projects.list_by_owner(owner_id).await
    }

    /// Hands the project to another user.
    ///
    /// Runs serializable so two concurrent transfers cannot both pass the
    /// owner check.
    #[instrument(skip(self), fields(user_id = %actor))]
    pub async fn transfer_ownership(
        &self,
        actor: Uuid,
        project_id: Uuid,
        new_owner_id: Uuid,
    ) -> DomainResult<Project> {
        let project = run_in_transaction(
            self.transactions.as_ref(),
            IsolationLevel::Serializable,
            move |uow| {
                Box::pin(async move {
                    let project = uow.projects().find_by_id(project_id).await?;
                    if !project.is_owned_by(actor) {
                        warn!(project_id = %project.id, "transfer attempted by non-owner");
                        return Err(DomainError::NotProjectOwner {
                            user_id: actor,
                            project_id,
                        });
                    }

                    match uow.users().find_by_id(new_owner_id).await {
                        Ok(_) => {}
                        Err(DomainError::NotFound { .. }) => {
                            return Err(DomainError::validation(
                                "new_owner_id",
                                "new owner does not exist",
                            ));
                        }
                        Err(e) => return Err(e),
                    }

                    uow.projects()
                        .transfer_ownership(project_id, new_owner_id)
                        .await
                })
            },
        )
        .await?;

        info!(project_id = %project.id, new_owner_id = %new_owner_id, "project ownership transferred");
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use domains::{
        ApplicationRepo, ArtifactRepo, EntityKind, MockApplicationRepo, MockArtifactRepo,
        MockProjectRepo, MockReleaseRepo, MockUserRepo, ProjectRepo, ReleaseRepo, UnitOfWork,
        User, UserRepo,
    };

    use super::*;
    use crate::test_support::{project, Mocks};

    struct FixedUow {
        users: MockUserRepo,
        projects: MockProjectRepo,
        applications: MockApplicationRepo,
        releases: MockReleaseRepo,
        artifacts: MockArtifactRepo,
    }

    #[async_trait]
    impl UnitOfWork for FixedUow {
        fn users(&self) -> &dyn UserRepo {
            &self.users
        }
        fn projects(&self) -> &dyn ProjectRepo {
            &self.projects
        }
        fn applications(&self) -> &dyn ApplicationRepo {
            &self.applications
        }
        fn releases(&self) -> &dyn ReleaseRepo {
            &self.releases
        }
        fn artifacts(&self) -> &dyn ArtifactRepo {
            &self.artifacts
        }
        async fn commit(self: Box<Self>) -> DomainResult<()> {
            Ok(())
        }
        async fn rollback(self: Box<Self>) -> DomainResult<()> {
            Ok(())
        }
    }

    /// Hands out one prepared unit of work and remembers the isolation asked for.
    struct FixedManager {
        uow: Mutex<Option<FixedUow>>,
        isolation: Mutex<Option<IsolationLevel>>,
    }

    #[async_trait]
    impl TransactionManager for FixedManager {
        async fn begin(&self, isolation: IsolationLevel) -> DomainResult<Box<dyn UnitOfWork>> {
            *self.isolation.lock().unwrap() = Some(isolation);
            let uow = self.uow.lock().unwrap().take().expect("single transaction");
            Ok(Box::new(uow))
        }
    }

    fn service(users: MockUserRepo, projects: MockProjectRepo) -> (ProjectService, Arc<FixedManager>) {
        let manager = Arc::new(FixedManager {
            uow: Mutex::new(Some(FixedUow {
                users,
                projects,
                applications: MockApplicationRepo::new(),
                releases: MockReleaseRepo::new(),
                artifacts: MockArtifactRepo::new(),
            })),
            isolation: Mutex::new(None),
        });
        (
            ProjectService::new(Mocks::default().build(), manager.clone()),
            manager,
        )
    }

    #[tokio::test]
    async fn transfer_runs_serializable_and_updates_owner() {
        let owner = Uuid::now_v7();
        let new_owner = Uuid::now_v7();
        let proj = project(owner);
        let project_id = proj.id;

        let mut projects = MockProjectRepo::new();
        let found = proj.clone();
        projects
            .expect_find_by_id()
            .returning(move |_| Ok(found.clone()));
        projects
            .expect_transfer_ownership()
            .times(1)
            .returning(move |_, owner_id| {
                let mut moved = proj.clone();
                moved.owner_id = owner_id;
                Ok(moved)
            });
        let mut users = MockUserRepo::new();
        users.expect_find_by_id().returning(|id| {
            let now = Utc::now();
            Ok(User {
                id,
                email: "new@example.com".into(),
                username: "new".into(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
        });

        let (service, manager) = service(users, projects);
        let moved = service
            .transfer_ownership(owner, project_id, new_owner)
            .await
            .unwrap();

        assert_eq!(moved.owner_id, new_owner);
        assert_eq!(
            *manager.isolation.lock().unwrap(),
            Some(IsolationLevel::Serializable)
        );
    }

    #[tokio::test]
    async fn unknown_new_owner_is_a_field_error() {
        let owner = Uuid::now_v7();
        let proj = project(owner);
        let project_id = proj.id;

        let mut projects = MockProjectRepo::new();
        projects
            .expect_find_by_id()
            .returning(move |_| Ok(proj.clone()));
        projects.expect_transfer_ownership().never();
        let mut users = MockUserRepo::new();
        users
            .expect_find_by_id()
            .returning(|_| Err(DomainError::not_found(EntityKind::User)));

        let (service, _) = service(users, projects);
        let err = service
            .transfer_ownership(owner, project_id, Uuid::now_v7())
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("new_owner_id"));
    }

    #[tokio::test]
    async fn only_the_owner_may_transfer() {
        let proj = project(Uuid::now_v7());
        let project_id = proj.id;

        let mut projects = MockProjectRepo::new();
        projects
            .expect_find_by_id()
            .returning(move |_| Ok(proj.clone()));
        projects.expect_transfer_ownership().never();

        let (service, _) = service(MockUserRepo::new(), projects);
        let err = service
            .transfer_ownership(Uuid::now_v7(), project_id, Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotProjectOwner { .. }));
    }
}
