pub mod events;
pub mod signature;
pub mod webhook;

use anyhow::{Context, Result};
use async_trait::async_trait;
use deploy_hook_core::{
    DeployError,
    config::{GitHubConfig, WorkflowConfig},
    models::WorkflowInputs,
    services::WorkflowApi,
};
use http::StatusCode;
use octocrab::{Octocrab, service::middleware::retry::RetryConfig};

/// GitHub API client for the build workflow.
#[derive(Clone)]
pub struct GitHub {
    pub client: Octocrab,
    workflow: WorkflowConfig,
}

impl GitHub {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        // Dispatches are not retried here; redelivery is the retry
        let mut builder = Octocrab::builder()
            .personal_token(config.token.clone())
            .add_retry_config(RetryConfig::None);
        if let Some(api_url) = &config.api_url {
            builder = builder.base_uri(api_url.as_str()).context("Invalid GitHub API URL")?;
        }
        let client = builder.build().context("Failed to create GitHub client")?;
        tracing::info!(
            "Build workflow: {}/{} {}@{}",
            config.workflow.owner,
            config.workflow.repo,
            config.workflow.file,
            config.workflow.git_ref
        );
        Ok(Self { client, workflow: config.workflow.clone() })
    }
}

#[async_trait]
impl WorkflowApi for GitHub {
    async fn dispatch_workflow(&self, inputs: &WorkflowInputs) -> Result<(), DeployError> {
        let WorkflowConfig { owner, repo, file, git_ref } = &self.workflow;
        let inputs = serde_json::to_value(inputs)
            .map_err(|e| DeployError::DispatchFailure(format!("invalid inputs: {e}")))?;
        match self
            .client
            .actions()
            .create_workflow_dispatch(owner, repo, file, git_ref)
            .inputs(inputs)
            .send()
            .await
        {
            Ok(()) => Ok(()),
            Err(octocrab::Error::GitHub { source, .. })
                if source.status_code == StatusCode::NOT_FOUND =>
            {
                Err(DeployError::WorkflowNotFound(format!("{owner}/{repo}/{file}")))
            }
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.is_server_error() => {
                Err(DeployError::transient("workflow dispatch", source.message))
            }
            Err(octocrab::Error::GitHub { source, .. }) => Err(DeployError::DispatchFailure(
                format!("{} {}", source.status_code, source.message),
            )),
            Err(e) => Err(DeployError::transient("workflow dispatch", e)),
        }
    }
}
