use std::{sync::Arc, time::Duration};

use deploy_hook_core::{DeployError, models::WorkflowInputs, services::WorkflowApi};

use crate::bounded;

/// Triggers the build workflow for a provisioned repository. Failures are not retried here.
pub struct BuildDispatcher {
    workflows: Arc<dyn WorkflowApi>,
    timeout: Duration,
}

impl BuildDispatcher {
    pub fn new(workflows: Arc<dyn WorkflowApi>, timeout: Duration) -> Self {
        Self { workflows, timeout }
    }

    pub async fn dispatch(
        &self,
        owner: &str,
        repo: &str,
        platform_service_id: &str,
        repository_id: u64,
    ) -> Result<(), DeployError> {
        let inputs = WorkflowInputs {
            owner: owner.to_string(),
            repo: repo.to_string(),
            platform_service_id: platform_service_id.to_string(),
            repository_id,
        };
        bounded("workflow dispatch", self.timeout, self.workflows.dispatch_workflow(&inputs))
            .await?;
        tracing::info!(%platform_service_id, "Dispatched build workflow");
        Ok(())
    }
}
