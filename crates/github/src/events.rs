//! Classification of webhook deliveries into repositories to deploy.

use deploy_hook_core::{DeployError, models::RepositoryRef};
use octocrab::models::webhook_events::{
    WebhookEventType, payload::InstallationRepositoriesWebhookEventAction,
};
use serde::{Deserialize, de::DeserializeOwned};

// Only the fields read below. octocrab's payload types also require `compare`, `pusher` and
// `commits`.

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    repository: PushRepository,
}

#[derive(Debug, Deserialize)]
struct PushRepository {
    id: u64,
    name: String,
    full_name: String,
    owner: Owner,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct InstallationRepositoriesEvent {
    action: InstallationRepositoriesWebhookEventAction,
    #[serde(default)]
    repositories_added: Vec<InstallationRepository>,
}

/// `repositories_added` entries carry no owner object.
#[derive(Debug, Deserialize)]
struct InstallationRepository {
    id: u64,
    name: String,
    full_name: String,
}

/// Map an event to the repositories that need a deployment.
///
/// Non-actionable events yield an empty list and their bodies are not parsed. `fallback_branch`
/// is the default branch assumed when a push payload doesn't name one.
pub fn classify(
    event_type: &str,
    body: &[u8],
    fallback_branch: &str,
) -> Result<Vec<RepositoryRef>, DeployError> {
    let kind = serde_json::from_value::<WebhookEventType>(event_type.into())
        .map_err(|e| DeployError::MalformedPayload(format!("invalid event type: {e}")))?;
    match kind {
        WebhookEventType::Push => {
            let event: PushEvent = parse(event_type, body)?;
            let default_branch =
                event.repository.default_branch.as_deref().unwrap_or(fallback_branch);
            if event.git_ref.strip_prefix("refs/heads/") != Some(default_branch) {
                tracing::debug!(git_ref = %event.git_ref, default_branch, "Ignoring push");
                return Ok(vec![]);
            }
            let repository = event.repository;
            Ok(vec![RepositoryRef {
                id: repository.id,
                full_name: repository.full_name,
                owner: repository.owner.login,
                name: repository.name,
            }])
        }
        WebhookEventType::InstallationRepositories => {
            let event: InstallationRepositoriesEvent = parse(event_type, body)?;
            if !matches!(event.action, InstallationRepositoriesWebhookEventAction::Added) {
                return Ok(vec![]);
            }
            event
                .repositories_added
                .into_iter()
                .map(|repository| {
                    let Some((owner, _)) = repository.full_name.split_once('/') else {
                        return Err(DeployError::MalformedPayload(format!(
                            "repository full name {:?} has no owner",
                            repository.full_name
                        )));
                    };
                    Ok(RepositoryRef {
                        id: repository.id,
                        owner: owner.to_string(),
                        full_name: repository.full_name.clone(),
                        name: repository.name,
                    })
                })
                .collect()
        }
        _ => Ok(vec![]),
    }
}

fn parse<T: DeserializeOwned>(event_type: &str, body: &[u8]) -> Result<T, DeployError> {
    serde_json::from_slice(body)
        .map_err(|e| DeployError::MalformedPayload(format!("invalid {event_type} event: {e}")))
}
