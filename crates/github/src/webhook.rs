use std::fmt::Display;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Raw GitHub webhook delivery: event type, signature header and the unparsed body.
///
/// Neither header is required here: the signature is verified against the exact body bytes
/// before anything else, including the event type, is looked at.
#[derive(Clone, Debug)]
#[must_use]
pub struct GitHubDelivery {
    pub event: Option<String>,
    pub signature: Option<String>,
    pub body: Bytes,
}

impl<S> FromRequest<S> for GitHubDelivery
where S: Send + Sync
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(m: impl Display) -> Response {
            tracing::warn!("{m}");
            (StatusCode::BAD_REQUEST, Json(json!({ "message": m.to_string() }))).into_response()
        }
        let (event, signature) = {
            let header = |name: &str| {
                req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
            };
            (header(EVENT_HEADER), header(SIGNATURE_HEADER))
        };
        let body = Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?;
        Ok(GitHubDelivery { event, signature, body })
    }
}
