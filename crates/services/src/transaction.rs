//! Scoped execution of a unit of work.

use std::future::Future;
use std::pin::Pin;

use domains::{DomainResult, IsolationLevel, TransactionManager, UnitOfWork};
use tracing::warn;

/// Future returned by a unit-of-work closure, borrowing the unit of work.
pub type UowFuture<'t, T> = Pin<Box<dyn Future<Output = DomainResult<T>> + Send + 't>>;

/// Runs `work` inside one transaction.
///
/// `Ok` commits. `Err` rolls back and returns the error untouched; a failed
/// rollback is logged and does not replace it. If the future is dropped or
/// panics, the unit of work is dropped with it and the adapter rolls back.
///
/// ```ignore
/// let release = run_in_transaction(tm, IsolationLevel::ReadCommitted, |uow| {
///     Box::pin(async move { uow.releases().create(input).await })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<T, F>(
    manager: &dyn TransactionManager,
    isolation: IsolationLevel,
    work: F,
) -> DomainResult<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t dyn UnitOfWork) -> UowFuture<'t, T> + Send,
{
    let uow = manager.begin(isolation).await?;

    let outcome = work(uow.as_ref()).await;

    match outcome {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, original = %err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use domains::{
        ApplicationRepo, ArtifactRepo, DomainError, MockApplicationRepo, MockArtifactRepo,
        MockProjectRepo, MockReleaseRepo, MockUserRepo, ProjectRepo, ReleaseRepo, UserRepo,
    };

    use super::*;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct RecordingUow {
        journal: Journal,
        fail_rollback: bool,
        users: MockUserRepo,
        projects: MockProjectRepo,
        applications: MockApplicationRepo,
        releases: MockReleaseRepo,
        artifacts: MockArtifactRepo,
    }

    #[async_trait]
    impl UnitOfWork for RecordingUow {
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
            self.journal.lock().unwrap().push("commit".into());
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> DomainResult<()> {
            self.journal.lock().unwrap().push("rollback".into());
            if self.fail_rollback {
                return Err(DomainError::internal("connection lost"));
            }
            Ok(())
        }
    }

    struct RecordingManager {
        journal: Journal,
        fail_rollback: bool,
    }

    #[async_trait]
    impl TransactionManager for RecordingManager {
        async fn begin(&self, isolation: IsolationLevel) -> DomainResult<Box<dyn UnitOfWork>> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("begin {isolation:?}"));
            Ok(Box::new(RecordingUow {
                journal: self.journal.clone(),
                fail_rollback: self.fail_rollback,
                users: MockUserRepo::new(),
                projects: MockProjectRepo::new(),
                applications: MockApplicationRepo::new(),
                releases: MockReleaseRepo::new(),
                artifacts: MockArtifactRepo::new(),
            }))
        }
    }

    fn manager(fail_rollback: bool) -> (RecordingManager, Journal) {
        let journal = Journal::default();
        (
            RecordingManager {
                journal: journal.clone(),
                fail_rollback,
            },
            journal,
        )
    }

    #[tokio::test]
    async fn ok_commits() {
        let (tm, journal) = manager(false);

        let value = run_in_transaction(&tm, IsolationLevel::ReadCommitted, |_uow| {
            Box::pin(async move { Ok(42) })
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(*journal.lock().unwrap(), ["begin ReadCommitted", "commit"]);
    }

    #[tokio::test]
    async fn err_rolls_back_and_returns_the_same_error() {
        let (tm, journal) = manager(false);

        let err = run_in_transaction::<(), _>(&tm, IsolationLevel::Serializable, |_uow| {
            Box::pin(async move { Err(DomainError::validation("title", "empty")) })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DomainError::Validation { ref field, .. } if field == "title"));
        assert_eq!(*journal.lock().unwrap(), ["begin Serializable", "rollback"]);
    }

    #[tokio::test]
    async fn failed_rollback_keeps_the_original_error() {
        let (tm, _journal) = manager(true);

        let err = run_in_transaction::<(), _>(&tm, IsolationLevel::ReadCommitted, |_uow| {
            Box::pin(async move { Err(DomainError::validation("title", "empty")) })
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), "validation_error");
    }
}
