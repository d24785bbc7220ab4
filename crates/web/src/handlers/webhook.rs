use anyhow::Context;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use deploy_hook_core::{AppError, DeployError};
use deploy_hook_deploy::{Acknowledgement, RepositoryOutcome};
use deploy_hook_github::webhook::GitHubDelivery;
use serde_json::json;

use crate::AppState;

/// Verifies and processes a delivery before responding.
///
/// Processing runs on its own task so a client hanging up can't abort it between provisioning
/// a project and recording it.
pub async fn webhook(
    State(state): State<AppState>,
    GitHubDelivery { event, signature, body }: GitHubDelivery,
) -> Result<Response, AppError> {
    let orchestrator = state.orchestrator.clone();
    let result = tokio::spawn(async move {
        orchestrator.handle(event.as_deref(), signature.as_deref(), &body).await
    })
    .await
    .context("Webhook processing task failed")?;

    let ack = match result {
        Ok(ack) => ack,
        Err(e @ DeployError::AuthenticationFailure) => {
            return Err(AppError::Status(StatusCode::UNAUTHORIZED, e.to_string()));
        }
        Err(e @ DeployError::MalformedPayload(_)) => {
            return Err(AppError::Status(StatusCode::BAD_REQUEST, e.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let failures = ack.failures();
    match ack {
        Acknowledgement::Ignored => {
            Ok((StatusCode::OK, Json(json!({ "message": "Event ignored." }))).into_response())
        }
        Acknowledgement::Processed(outcomes) if failures == 0 => {
            Ok(reply(StatusCode::ACCEPTED, "Deployment process initiated.".to_string(), outcomes))
        }
        Acknowledgement::Processed(outcomes) => Ok(reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Deployment failed for {failures} of {} repositories.", outcomes.len()),
            outcomes,
        )),
    }
}

fn reply(status: StatusCode, message: String, outcomes: Vec<RepositoryOutcome>) -> Response {
    (status, Json(json!({ "message": message, "repositories": outcomes }))).into_response()
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use deploy_hook_deploy::testing::{Harness, sign};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn push_body() -> Vec<u8> {
        json!({
            "ref": "refs/heads/main",
            "repository": {
                "id": 42,
                "name": "app",
                "full_name": "acme/app",
                "owner": { "login": "acme" },
            },
        })
        .to_string()
        .into_bytes()
    }

    async fn send(
        harness: &Harness,
        event: Option<&str>,
        signature: Option<String>,
        body: Vec<u8>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(event) = event {
            request = request.header("x-github-event", event);
        }
        if let Some(signature) = signature {
            request = request.header("x-hub-signature-256", signature);
        }
        let state = AppState { orchestrator: harness.orchestrator.clone() };
        let response =
            crate::app(state).oneshot(request.body(Body::from(body)).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_push_accepted() {
        let harness = Harness::new();
        let body = push_body();
        let signature = sign(&body);
        let (status, json) = send(&harness, Some("push"), Some(signature), body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["message"], "Deployment process initiated.");
        assert_eq!(json["repositories"][0]["status"], "dispatched");
        assert_eq!(json["repositories"][0]["provisioned"], true);
        assert_eq!(harness.workflows.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_unauthorized() {
        let harness = Harness::new();
        let (status, _) =
            send(&harness, Some("push"), Some(sign(b"something else")), push_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&harness, Some("push"), None, push_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(harness.platform.projects_created(), 0);
        assert!(harness.workflows.calls().is_empty());
    }

    #[tokio::test]
    async fn test_other_event_ignored() {
        let harness = Harness::new();
        let body = br#"{"zen":"Keep it logically awesome."}"#.to_vec();
        let signature = sign(&body);
        let (status, json) = send(&harness, Some("ping"), Some(signature), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Event ignored.");
        assert!(harness.store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_event_header_after_signature() {
        let harness = Harness::new();
        let body = push_body();
        let signature = sign(&body);
        let (status, _) = send(&harness, None, Some(signature), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&harness, None, None, push_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let harness = Harness::new();
        let body = b"{not json".to_vec();
        let signature = sign(&body);
        let (status, _) = send(&harness, Some("push"), Some(signature), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dispatch_failure_reported() {
        let harness = Harness::new();
        harness.workflows.fail_for("app");
        let body = push_body();
        let signature = sign(&body);
        let (status, json) = send(&harness, Some("push"), Some(signature), body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["repositories"][0]["status"], "failed");
        assert_eq!(json["repositories"][0]["error"], "dispatch_failure");
        // The mapping is kept for the retry
        assert_eq!(harness.store.len(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let state = AppState { orchestrator: Harness::new().orchestrator };
        let response = crate::app(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
