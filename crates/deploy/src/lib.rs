//! Webhook-driven provisioning and build dispatch.
//!
//! A verified delivery is classified into repositories; each repository is registered
//! (provisioning its platform project and service on first sight) and then handed to the
//! build workflow.

pub mod dispatch;
pub mod orchestrator;
pub mod provision;
pub mod registry;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use std::{future::Future, time::Duration};

use deploy_hook_core::DeployError;
pub use dispatch::BuildDispatcher;
pub use orchestrator::{Acknowledgement, OutcomeStatus, RepositoryOutcome, WebhookOrchestrator};
pub use provision::ProvisioningService;
pub use registry::{ProjectRegistry, Registration};

/// Run a remote call, failing transiently once `timeout` elapses.
pub(crate) async fn bounded<T>(
    operation: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, DeployError>>,
) -> Result<T, DeployError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeployError::transient(operation, format!("timed out after {timeout:?}"))),
    }
}
