use std::sync::Arc;

use deploy_hook_core::{
    DeployError,
    config::Config,
    models::{Project, RepositoryRef},
    services::{PlatformApi, ProjectStore, WorkflowApi},
};
use deploy_hook_github::{events::classify, signature::verify_signature};
use serde::Serialize;
use tracing::Instrument;

use crate::{BuildDispatcher, ProjectRegistry, ProvisioningService};

/// Result of a verified delivery.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Acknowledgement {
    /// Not an actionable event; nothing was done.
    Ignored,
    /// One outcome per classified repository, in payload order.
    Processed(Vec<RepositoryOutcome>),
}

impl Acknowledgement {
    pub fn failures(&self) -> usize {
        match self {
            Self::Ignored => 0,
            Self::Processed(outcomes) => outcomes
                .iter()
                .filter(|o| matches!(o.status, OutcomeStatus::Failed { .. }))
                .count(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct RepositoryOutcome {
    pub repository_id: u64,
    pub full_name: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Dispatched { provisioned: bool },
    Failed { error: &'static str, message: String, retryable: bool },
}

impl From<&DeployError> for OutcomeStatus {
    fn from(e: &DeployError) -> Self {
        Self::Failed { error: e.kind(), message: e.to_string(), retryable: e.is_retryable() }
    }
}

/// Verify, classify, then register and dispatch each repository of a delivery.
pub struct WebhookOrchestrator {
    secret: Vec<u8>,
    fallback_branch: String,
    registry: ProjectRegistry,
    provisioning: ProvisioningService,
    dispatcher: BuildDispatcher,
}

impl WebhookOrchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn ProjectStore>,
        platform: Arc<dyn PlatformApi>,
        workflows: Arc<dyn WorkflowApi>,
    ) -> Self {
        let timeout = config.remote_timeout();
        Self {
            secret: config.github.webhook_secret.as_bytes().to_vec(),
            fallback_branch: config.github.default_branch.0.clone(),
            registry: ProjectRegistry::new(store, timeout),
            provisioning: ProvisioningService::new(platform, timeout),
            dispatcher: BuildDispatcher::new(workflows, timeout),
        }
    }

    /// Process one delivery.
    ///
    /// Returns an error only when the whole delivery is rejected (bad signature, missing event
    /// type or malformed payload). The event type is only looked at once the signature holds.
    /// Failures of individual repositories are reported in the acknowledgement and
    /// don't stop the remaining repositories from being processed.
    pub async fn handle(
        &self,
        event_type: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Acknowledgement, DeployError> {
        if !verify_signature(body, signature, &self.secret) {
            tracing::warn!(event = ?event_type, "Rejected webhook with invalid signature");
            return Err(DeployError::AuthenticationFailure);
        }
        let Some(event_type) = event_type else {
            return Err(DeployError::MalformedPayload("X-GitHub-Event header missing".to_string()));
        };
        let repositories = classify(event_type, body, &self.fallback_branch)?;
        if repositories.is_empty() {
            tracing::info!(event = event_type, "Event ignored");
            return Ok(Acknowledgement::Ignored);
        }
        tracing::info!(event = event_type, count = repositories.len(), "Processing repositories");

        let mut outcomes = Vec::with_capacity(repositories.len());
        for repository in &repositories {
            let span = tracing::info_span!(
                "repository",
                repository_id = repository.id,
                full_name = %repository.full_name
            );
            let status = match self.process_repository(repository).instrument(span.clone()).await
            {
                Ok(provisioned) => OutcomeStatus::Dispatched { provisioned },
                Err(e) => {
                    span.in_scope(|| {
                        tracing::error!(
                            kind = e.kind(),
                            retryable = e.is_retryable(),
                            "Failed to deploy repository: {e}"
                        )
                    });
                    OutcomeStatus::from(&e)
                }
            };
            outcomes.push(RepositoryOutcome {
                repository_id: repository.id,
                full_name: repository.full_name.clone(),
                status,
            });
        }
        Ok(Acknowledgement::Processed(outcomes))
    }

    /// Register (provisioning if needed) then dispatch. Returns whether provisioning ran.
    async fn process_repository(&self, repository: &RepositoryRef) -> Result<bool, DeployError> {
        let registration = self
            .registry
            .find_or_create(
                repository.id,
                move || async move {
                    tracing::info!("First deployment, provisioning platform resources");
                    let provisioned =
                        self.provisioning.provision(&repository.full_name, &repository.name).await?;
                    Ok(Project::new(repository, provisioned))
                },
                move |project| async move {
                    if let Err(e) = self.provisioning.discard(&project.platform_project_id).await {
                        tracing::error!(
                            platform_project_id = %project.platform_project_id,
                            error = %e,
                            "Failed to delete platform project, it is orphaned"
                        );
                    }
                },
            )
            .await?;
        self.dispatcher
            .dispatch(
                &repository.owner,
                &repository.name,
                &registration.project.platform_service_id,
                repository.id,
            )
            .await?;
        Ok(registration.created)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use deploy_hook_core::models::WorkflowInputs;
    use futures_util::future::join_all;
    use serde_json::{Value, json};

    use super::*;
    use crate::testing::{Harness, MockPlatform, sign};

    fn push_to(git_ref: &str, id: u64, owner: &str, name: &str) -> Vec<u8> {
        json!({
            "ref": git_ref,
            "repository": {
                "id": id,
                "name": name,
                "full_name": format!("{owner}/{name}"),
                "owner": { "login": owner },
            },
        })
        .to_string()
        .into_bytes()
    }

    fn push_main() -> Vec<u8> { push_to("refs/heads/main", 42, "acme", "app") }

    fn installation_added(names: &[&str]) -> Vec<u8> {
        let repositories = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                json!({ "id": 100 + i as u64, "name": name, "full_name": format!("acme/{name}") })
            })
            .collect::<Vec<Value>>();
        json!({ "action": "added", "repositories_added": repositories, "repositories_removed": [] })
            .to_string()
            .into_bytes()
    }

    async fn deliver(harness: &Harness, event: &str, body: &[u8]) -> Acknowledgement {
        harness.orchestrator.handle(Some(event), Some(&sign(body)), body).await.unwrap()
    }

    fn acme_app(service: &str) -> WorkflowInputs {
        WorkflowInputs {
            owner: "acme".to_string(),
            repo: "app".to_string(),
            platform_service_id: service.to_string(),
            repository_id: 42,
        }
    }

    #[tokio::test]
    async fn test_first_push_provisions_then_dispatches() {
        let harness = Harness::new();
        let ack = deliver(&harness, "push", &push_main()).await;
        assert_eq!(
            ack,
            Acknowledgement::Processed(vec![RepositoryOutcome {
                repository_id: 42,
                full_name: "acme/app".to_string(),
                status: OutcomeStatus::Dispatched { provisioned: true },
            }])
        );
        assert_eq!(
            harness.store.get(42),
            Some(Project {
                repository_id: 42,
                repository_full_name: "acme/app".to_string(),
                platform_project_id: "p1".to_string(),
                platform_service_id: "s1".to_string(),
            })
        );
        assert_eq!(harness.workflows.calls(), vec![acme_app("s1")]);
    }

    #[tokio::test]
    async fn test_second_push_reuses_project() {
        let harness = Harness::new();
        deliver(&harness, "push", &push_main()).await;
        let ack = deliver(&harness, "push", &push_main()).await;
        assert!(matches!(
            &ack,
            Acknowledgement::Processed(outcomes)
                if outcomes[0].status == OutcomeStatus::Dispatched { provisioned: false }
        ));
        assert_eq!(harness.platform.projects_created(), 1);
        assert_eq!(harness.platform.services_created(), 1);
        assert_eq!(harness.workflows.calls(), vec![acme_app("s1"), acme_app("s1")]);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_deliveries_provision_once() {
        let harness =
            Harness::with_platform(MockPlatform::default().with_delay(Duration::from_millis(20)));
        let body = push_main();
        let deliveries = (0..5).map(|_| deliver(&harness, "push", &body));
        let acks = join_all(deliveries).await;
        assert!(acks.iter().all(|ack| ack.failures() == 0));
        assert_eq!(harness.platform.projects_created(), 1);
        assert_eq!(harness.platform.services_created(), 1);
        assert_eq!(harness.store.len(), 1);
        assert_eq!(harness.workflows.calls(), vec![acme_app("s1"); 5]);
    }

    #[tokio::test]
    async fn test_racing_instances_leave_one_project() {
        // Two processes sharing one store: no shared in-process lock
        let platform = Arc::new(MockPlatform::default().with_delay(Duration::from_millis(20)));
        let store = Arc::new(crate::testing::MemoryStore::default());
        let workflows = Arc::new(crate::testing::RecordingWorkflows::default());
        let config = crate::testing::test_config();
        let instances = [0, 1].map(|_| {
            WebhookOrchestrator::new(&config, store.clone(), platform.clone(), workflows.clone())
        });
        let body = push_main();
        let signature = sign(&body);
        let (a, b) = tokio::join!(
            instances[0].handle(Some("push"), Some(&signature), &body),
            instances[1].handle(Some("push"), Some(&signature), &body),
        );
        assert_eq!(a.unwrap().failures(), 0);
        assert_eq!(b.unwrap().failures(), 0);
        assert_eq!(platform.projects_created(), 2);
        assert_eq!(platform.live_projects().len(), 1);
        let stored = store.get(42).unwrap();
        assert_eq!(platform.live_projects(), vec![stored.platform_project_id.clone()]);
        // Both builds target the recorded service
        let services = workflows.calls().into_iter().map(|c| c.platform_service_id).collect::<Vec<_>>();
        assert_eq!(services, vec![stored.platform_service_id.clone(); 2]);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_without_side_effects() {
        let harness = Harness::new();
        let body = push_main();
        let mut tampered = body.clone();
        let last = tampered.len() - 2;
        tampered[last] ^= 0x01;
        let err = harness.orchestrator.handle(Some("push"), Some(&sign(&body)), &tampered).await;
        assert!(matches!(err, Err(DeployError::AuthenticationFailure)));
        let err = harness.orchestrator.handle(Some("push"), None, &body).await;
        assert!(matches!(err, Err(DeployError::AuthenticationFailure)));
        assert_eq!(harness.platform.projects_created(), 0);
        assert!(harness.workflows.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unactionable_events_ignored() {
        let harness = Harness::new();
        let body = push_to("refs/heads/feature", 42, "acme", "app");
        assert_eq!(deliver(&harness, "push", &body).await, Acknowledgement::Ignored);
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        assert_eq!(deliver(&harness, "ping", body).await, Acknowledgement::Ignored);
        assert!(harness.store.is_empty());
        assert!(harness.workflows.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let harness = Harness::new();
        let body = br#"{"ref":"refs/heads/main"}"#;
        let err = harness.orchestrator.handle(Some("push"), Some(&sign(body)), body).await;
        assert!(matches!(err, Err(DeployError::MalformedPayload(_))));
    }

    #[tokio::test]
    async fn test_missing_event_type_checked_after_signature() {
        let harness = Harness::new();
        let body = push_main();
        let err = harness.orchestrator.handle(None, Some(&sign(&body)), &body).await;
        assert!(matches!(err, Err(DeployError::MalformedPayload(_))));
        let err = harness.orchestrator.handle(None, None, &body).await;
        assert!(matches!(err, Err(DeployError::AuthenticationFailure)));
        assert!(harness.store.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_then_retry() {
        let harness = Harness::new();
        harness.platform.fail_next_services(1);
        let ack = deliver(&harness, "push", &push_main()).await;
        let Acknowledgement::Processed(outcomes) = &ack else { panic!("expected outcomes") };
        assert!(matches!(
            &outcomes[0].status,
            OutcomeStatus::Failed { error: "partial_provisioning_failure", retryable: true, .. }
        ));
        assert!(harness.store.get(42).is_none());
        assert!(harness.workflows.calls().is_empty());

        // Redelivery provisions from scratch; the first project was deleted
        let ack = deliver(&harness, "push", &push_main()).await;
        assert_eq!(ack.failures(), 0);
        assert_eq!(harness.platform.deleted_projects(), vec!["p1".to_string()]);
        assert_eq!(harness.platform.live_projects(), vec!["p2".to_string()]);
        assert_eq!(harness.store.get(42).unwrap().platform_project_id, "p2");
        assert_eq!(harness.workflows.calls(), vec![acme_app("s1")]);
    }

    #[tokio::test]
    async fn test_installation_continues_past_failures() {
        let harness = Harness::new();
        harness.workflows.fail_for("two");
        let ack = deliver(&harness, "installation_repositories", &installation_added(&[
            "one", "two", "three",
        ]))
        .await;
        let Acknowledgement::Processed(outcomes) = &ack else { panic!("expected outcomes") };
        assert_eq!(ack.failures(), 1);
        assert_eq!(
            outcomes.iter().map(|o| o.full_name.as_str()).collect::<Vec<_>>(),
            ["acme/one", "acme/two", "acme/three"]
        );
        assert_eq!(outcomes[0].status, OutcomeStatus::Dispatched { provisioned: true });
        assert!(matches!(
            &outcomes[1].status,
            OutcomeStatus::Failed { error: "dispatch_failure", .. }
        ));
        assert_eq!(outcomes[2].status, OutcomeStatus::Dispatched { provisioned: true });
        // The failed dispatch still left a registered project behind
        assert_eq!(harness.store.len(), 3);
        assert_eq!(harness.workflows.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_outcome_serialization() {
        let outcome = RepositoryOutcome {
            repository_id: 42,
            full_name: "acme/app".to_string(),
            status: OutcomeStatus::from(&DeployError::WorkflowNotFound("o/r/deployer.yml".into())),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "repository_id": 42,
                "full_name": "acme/app",
                "status": "failed",
                "error": "workflow_not_found",
                "message": "build workflow o/r/deployer.yml not found",
                "retryable": false,
            })
        );
    }
}
