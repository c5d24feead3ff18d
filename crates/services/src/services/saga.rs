//! Compensating-transaction runner for multi-entity writes.

use std::future::Future;

use db::RepoResult;
use futures::{FutureExt, future::BoxFuture};
use tracing::{debug, error, warn};

type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, RepoResult<()>> + Send>;

/// Runs write steps in order. When a step fails, every completed step is
/// undone in reverse order before the error is returned.
pub struct Saga {
    name: &'static str,
    completed: Vec<(String, Compensation)>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            completed: Vec::new(),
        }
    }

    /// Run `action`; register `compensate` to undo it if a later step fails
    pub async fn step<T, F, C, CF>(&mut self, step: &str, action: F, compensate: C) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
        C: FnOnce() -> CF + Send + 'static,
        CF: Future<Output = RepoResult<()>> + Send + 'static,
    {
        match action.await {
            Ok(value) => {
                self.completed
                    .push((step.to_string(), Box::new(move || compensate().boxed())));
                Ok(value)
            }
            Err(e) => {
                self.fail(step, &e).await;
                Err(e)
            }
        }
    }

    /// Run a step that never needs undoing, typically the final write
    pub async fn last<T, F>(&mut self, step: &str, action: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        match action.await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.fail(step, &e).await;
                Err(e)
            }
        }
    }

    pub fn commit(self) {
        debug!(saga = self.name, steps = self.completed.len(), "Saga committed");
    }

    async fn fail(&mut self, step: &str, cause: &db::RepositoryError) {
        warn!(
            saga = self.name,
            step,
            error = %cause,
            completed = self.completed.len(),
            "Saga step failed, compensating"
        );
        while let Some((completed_step, compensate)) = self.completed.pop() {
            if let Err(e) = compensate().await {
                error!(
                    saga = self.name,
                    step = %completed_step,
                    error = %e,
                    "Compensation failed, manual reconciliation required"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use db::RepositoryError;

    use super::*;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn undo(log: &Arc<Mutex<Vec<String>>>, name: &str) -> impl FnOnce() -> BoxFuture<'static, RepoResult<()>> + Send + 'static {
        let log = log.clone();
        let name = name.to_string();
        move || {
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse_order() {
        let log = recorder();
        let mut saga = Saga::new("test");

        saga.step("a", async { Ok(1) }, undo(&log, "undo a"))
            .await
            .unwrap();
        saga.step("b", async { Ok(2) }, undo(&log, "undo b"))
            .await
            .unwrap();
        let result: RepoResult<()> = saga
            .last("c", async { Err(RepositoryError::Server("boom".to_string())) })
            .await;

        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["undo b", "undo a"]);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_compensated_itself() {
        let log = recorder();
        let mut saga = Saga::new("test");

        saga.step("a", async { Ok(()) }, undo(&log, "undo a"))
            .await
            .unwrap();
        let result: RepoResult<()> = saga
            .step(
                "b",
                async { Err(RepositoryError::Network("down".to_string())) },
                undo(&log, "undo b"),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["undo a"]);
    }

    #[tokio::test]
    async fn test_commit_runs_no_compensation() {
        let log = recorder();
        let mut saga = Saga::new("test");
        saga.step("a", async { Ok(()) }, undo(&log, "undo a"))
            .await
            .unwrap();
        saga.commit();
        assert!(log.lock().unwrap().is_empty());
    }
}
