//! Interfaces to the collaborators the orchestrator depends on.
//!
//! Production implementations live in the `db`, `platform` and `github` crates; tests
//! substitute in-memory doubles.

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    error::DeployError,
    models::{Project, WorkflowInputs},
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A record for the repository already existed; nothing was written.
    Conflict,
}

/// Persistent `repository_id -> Project` mapping, unique on `repository_id`.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, repository_id: u64) -> Result<Option<Project>>;

    /// Insert if absent. Must never overwrite an existing record.
    async fn insert_project(&self, project: &Project) -> Result<InsertOutcome>;
}

/// Deployment platform API.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Returns the new project ID.
    async fn create_project(&self, name: &str) -> Result<String, DeployError>;

    /// Returns the new service ID.
    async fn create_service(&self, project_id: &str, name: &str) -> Result<String, DeployError>;

    async fn delete_project(&self, project_id: &str) -> Result<(), DeployError>;
}

/// Remote build pipeline trigger.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn dispatch_workflow(&self, inputs: &WorkflowInputs) -> Result<(), DeployError>;
}
