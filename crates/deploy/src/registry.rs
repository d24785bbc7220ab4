use std::{future::Future, sync::Arc, time::Duration};

use deploy_hook_core::{
    DeployError,
    models::Project,
    services::{InsertOutcome, ProjectStore},
};
use moka::future::Cache;
use tokio::sync::Mutex;

use crate::bounded;

/// Idempotent `repository_id -> Project` registration.
///
/// Provisioning for one repository is serialised in-process by a per-repository lock. Writers
/// in other processes are caught by the store's uniqueness constraint: the loser discards what
/// it provisioned and adopts the stored record.
pub struct ProjectRegistry {
    store: Arc<dyn ProjectStore>,
    locks: Cache<u64, Arc<Mutex<()>>>,
    timeout: Duration,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Registration {
    pub project: Project,
    /// Whether this call provisioned the project.
    pub created: bool,
}

impl ProjectRegistry {
    pub fn new(store: Arc<dyn ProjectStore>, timeout: Duration) -> Self {
        let locks = Cache::builder()
            .max_capacity(16 * 1024)
            .time_to_idle(Duration::from_secs(15 * 60))
            .build();
        Self { store, locks, timeout }
    }

    pub async fn find(&self, repository_id: u64) -> Result<Option<Project>, DeployError> {
        bounded("project lookup", self.timeout, async {
            self.store.get_project(repository_id).await.map_err(DeployError::Store)
        })
        .await
    }

    async fn insert(&self, project: &Project) -> Result<InsertOutcome, DeployError> {
        bounded("project insert", self.timeout, async {
            self.store.insert_project(project).await.map_err(DeployError::Store)
        })
        .await
    }

    /// Return the project for `repository_id`, calling `create` only if none exists.
    ///
    /// `discard` receives a project that was provisioned but could not be recorded.
    pub async fn find_or_create<C, CF, D, DF>(
        &self,
        repository_id: u64,
        create: C,
        discard: D,
    ) -> Result<Registration, DeployError>
    where
        C: FnOnce() -> CF,
        CF: Future<Output = Result<Project, DeployError>>,
        D: FnOnce(Project) -> DF,
        DF: Future<Output = ()>,
    {
        if let Some(project) = self.find(repository_id).await? {
            return Ok(Registration { project, created: false });
        }

        let lock = self.locks.get_with(repository_id, async { Arc::new(Mutex::new(())) }).await;
        let _guard = lock.lock().await;
        // A concurrent delivery may have registered it while we waited
        if let Some(project) = self.find(repository_id).await? {
            tracing::debug!(repository_id, "Project registered by concurrent delivery");
            return Ok(Registration { project, created: false });
        }

        let project = create().await?;
        match self.insert(&project).await {
            Ok(InsertOutcome::Inserted) => {
                tracing::info!(
                    repository_id,
                    platform_project_id = %project.platform_project_id,
                    platform_service_id = %project.platform_service_id,
                    "Registered project"
                );
                Ok(Registration { project, created: true })
            }
            Ok(InsertOutcome::Conflict) => {
                tracing::warn!(
                    repository_id,
                    platform_project_id = %project.platform_project_id,
                    "Project registered elsewhere during provisioning, discarding ours"
                );
                discard(project).await;
                match self.find(repository_id).await? {
                    Some(project) => Ok(Registration { project, created: false }),
                    None => Err(DeployError::StoreConflict(repository_id)),
                }
            }
            Err(e) => {
                // A late acknowledgement doesn't mean the row is absent
                tracing::warn!(
                    repository_id,
                    platform_project_id = %project.platform_project_id,
                    error = %e,
                    "Failed to record provisioned project, checking the store"
                );
                match self.find(repository_id).await {
                    Ok(Some(stored))
                        if stored.platform_project_id == project.platform_project_id =>
                    {
                        tracing::info!(
                            repository_id,
                            platform_project_id = %stored.platform_project_id,
                            platform_service_id = %stored.platform_service_id,
                            "Registered project"
                        );
                        Ok(Registration { project: stored, created: true })
                    }
                    Ok(Some(stored)) => {
                        tracing::warn!(
                            repository_id,
                            platform_project_id = %project.platform_project_id,
                            "Project registered elsewhere during provisioning, discarding ours"
                        );
                        discard(project).await;
                        Ok(Registration { project: stored, created: false })
                    }
                    Ok(None) => {
                        tracing::error!(
                            repository_id,
                            platform_project_id = %project.platform_project_id,
                            "Provisioned project was not recorded, discarding it"
                        );
                        discard(project).await;
                        Err(e)
                    }
                    Err(read) => {
                        tracing::error!(
                            repository_id,
                            platform_project_id = %project.platform_project_id,
                            error = %read,
                            "Store unreadable after failed insert, keeping platform project"
                        );
                        Err(DeployError::UnrecordedProject {
                            platform_project_id: project.platform_project_id,
                            message: format!("{e}; re-reading the store failed: {read}"),
                        })
                    }
                }
            }
        }
    }
}
