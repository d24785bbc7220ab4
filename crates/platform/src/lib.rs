//! Railway GraphQL client.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use deploy_hook_core::{DeployError, config::PlatformConfig, services::PlatformApi};
use graphql_client::{QueryBody, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

const PROJECT_CREATE: &str = r#"
mutation ProjectCreate($name: String!) {
  projectCreate(input: { name: $name }) { id }
}"#;

const SERVICE_CREATE: &str = r#"
mutation ServiceCreate($projectId: String!, $name: String!, $image: String!) {
  serviceCreate(input: { name: $name, projectId: $projectId, source: { image: $image } }) { id }
}"#;

const PROJECT_DELETE: &str = r#"
mutation ProjectDelete($id: String!) {
  projectDelete(id: $id)
}"#;

#[derive(Serialize)]
struct ProjectCreateVariables<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceCreateVariables<'a> {
    project_id: &'a str,
    name: &'a str,
    image: &'a str,
}

#[derive(Serialize)]
struct ProjectDeleteVariables<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectCreateData {
    project_create: Created,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceCreateData {
    service_create: Created,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDeleteData {
    project_delete: bool,
}

#[derive(Clone)]
pub struct Railway {
    client: reqwest::Client,
    url: Url,
    token: String,
    service_image: String,
}

impl Railway {
    pub fn new(config: &PlatformConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deploy-hook/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create platform HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
            service_image: config.service_image.clone(),
        })
    }

    async fn run_query<V: Serialize, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &'static str,
        variables: V,
    ) -> Result<T, DeployError> {
        let body = QueryBody { variables, query, operation_name: operation };
        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeployError::transient(operation, e))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(DeployError::transient(operation, format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeployError::rejected(operation, format!("HTTP {status}: {text}")));
        }
        let response: Response<T> =
            response.json().await.map_err(|e| DeployError::transient(operation, e))?;
        into_data(operation, response)
    }
}

fn into_data<T>(operation: &'static str, response: Response<T>) -> Result<T, DeployError> {
    if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
        let message = errors.into_iter().map(|error| error.message).collect::<Vec<_>>().join("\n");
        return Err(DeployError::rejected(operation, message));
    }
    response.data.ok_or_else(|| DeployError::rejected(operation, "no data returned"))
}

#[async_trait]
impl PlatformApi for Railway {
    async fn create_project(&self, name: &str) -> Result<String, DeployError> {
        let data: ProjectCreateData = self
            .run_query("ProjectCreate", PROJECT_CREATE, ProjectCreateVariables { name })
            .await?;
        Ok(data.project_create.id)
    }

    async fn create_service(&self, project_id: &str, name: &str) -> Result<String, DeployError> {
        let variables = ServiceCreateVariables { project_id, name, image: &self.service_image };
        let data: ServiceCreateData =
            self.run_query("ServiceCreate", SERVICE_CREATE, variables).await?;
        Ok(data.service_create.id)
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), DeployError> {
        let data: ProjectDeleteData = self
            .run_query("ProjectDelete", PROJECT_DELETE, ProjectDeleteVariables { id: project_id })
            .await?;
        if !data.project_delete {
            return Err(DeployError::rejected("ProjectDelete", "platform refused deletion"));
        }
        Ok(())
    }
}
