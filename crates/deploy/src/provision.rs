use std::{sync::Arc, time::Duration};

use deploy_hook_core::{DeployError, models::ProvisionedProject, services::PlatformApi};

use crate::bounded;

/// Creates the platform project and service for a repository.
pub struct ProvisioningService {
    platform: Arc<dyn PlatformApi>,
    timeout: Duration,
}

impl ProvisioningService {
    pub fn new(platform: Arc<dyn PlatformApi>, timeout: Duration) -> Self {
        Self { platform, timeout }
    }

    /// Create a project named `full_name` holding a service named `name`.
    ///
    /// If the service can't be created the project is deleted again, and the failure is
    /// reported as [`DeployError::PartialProvisioningFailure`] either way.
    pub async fn provision(
        &self,
        full_name: &str,
        name: &str,
    ) -> Result<ProvisionedProject, DeployError> {
        let platform_project_id =
            bounded("project creation", self.timeout, self.platform.create_project(full_name))
                .await?;
        tracing::info!(%platform_project_id, "Created platform project");

        let service = bounded(
            "service creation",
            self.timeout,
            self.platform.create_service(&platform_project_id, name),
        )
        .await;
        match service {
            Ok(platform_service_id) => {
                tracing::info!(%platform_project_id, %platform_service_id, "Created platform service");
                Ok(ProvisionedProject { platform_project_id, platform_service_id })
            }
            Err(e) => {
                tracing::warn!(%platform_project_id, error = %e, "Service creation failed");
                let compensated = match self.discard(&platform_project_id).await {
                    Ok(()) => true,
                    Err(cleanup) => {
                        tracing::error!(
                            %platform_project_id,
                            error = %cleanup,
                            "Failed to delete platform project, it is orphaned"
                        );
                        false
                    }
                };
                Err(DeployError::PartialProvisioningFailure {
                    platform_project_id,
                    compensated,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Delete a project this service created.
    pub async fn discard(&self, platform_project_id: &str) -> Result<(), DeployError> {
        bounded("project deletion", self.timeout, self.platform.delete_project(platform_project_id))
            .await?;
        tracing::info!(%platform_project_id, "Deleted platform project");
        Ok(())
    }
}
