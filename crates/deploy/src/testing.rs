//! In-memory collaborators that record every call.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use deploy_hook_core::{
    DeployError,
    config::Config,
    models::{Project, WorkflowInputs},
    services::{InsertOutcome, PlatformApi, ProjectStore, WorkflowApi},
};
use deploy_hook_github::signature::{compute_signature, format_signature_header};

use crate::WebhookOrchestrator;

pub const TEST_SECRET: &str = "test-webhook-secret";

/// `X-Hub-Signature-256` value for `body` under [`TEST_SECRET`].
pub fn sign(body: &[u8]) -> String {
    format_signature_header(&compute_signature(body, TEST_SECRET.as_bytes()))
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.github.webhook_secret = TEST_SECRET.to_string();
    config.github.token = "gh-token".to_string();
    config.platform.token = "platform-token".to_string();
    config.remote_timeout_secs = 5;
    config
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub platform: Arc<MockPlatform>,
    pub workflows: Arc<RecordingWorkflows>,
    pub orchestrator: Arc<WebhookOrchestrator>,
}

impl Harness {
    pub fn new() -> Self { Self::with_platform(MockPlatform::default()) }

    pub fn with_platform(platform: MockPlatform) -> Self {
        let store = Arc::new(MemoryStore::default());
        let platform = Arc::new(platform);
        let workflows = Arc::new(RecordingWorkflows::default());
        let orchestrator = Arc::new(WebhookOrchestrator::new(
            &test_config(),
            store.clone(),
            platform.clone(),
            workflows.clone(),
        ));
        Self { store, platform, workflows, orchestrator }
    }
}

impl Default for Harness {
    fn default() -> Self { Self::new() }
}

#[derive(Default)]
struct StoreState {
    projects: HashMap<u64, Project>,
    pending_winner: Option<Project>,
    fail_inserts: bool,
}

/// Project store with the same insert-if-absent semantics as the database.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn len(&self) -> usize { self.state.lock().unwrap().projects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, repository_id: u64) -> Option<Project> {
        self.state.lock().unwrap().projects.get(&repository_id).cloned()
    }

    /// Simulate another process registering `project` just before our next insert.
    pub fn insert_before_next_insert(&self, project: Project) {
        self.state.lock().unwrap().pending_winner = Some(project);
    }

    pub fn fail_inserts(&self) { self.state.lock().unwrap().fail_inserts = true; }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get_project(&self, repository_id: u64) -> Result<Option<Project>> {
        Ok(self.get(repository_id))
    }

    async fn insert_project(&self, project: &Project) -> Result<InsertOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.fail_inserts {
            bail!("database is locked");
        }
        if let Some(winner) = state.pending_winner.take() {
            state.projects.insert(winner.repository_id, winner);
        }
        if state.projects.contains_key(&project.repository_id) {
            return Ok(InsertOutcome::Conflict);
        }
        state.projects.insert(project.repository_id, project.clone());
        Ok(InsertOutcome::Inserted)
    }
}

#[derive(Default)]
struct PlatformState {
    project_names: Vec<String>,
    service_names: Vec<(String, String)>,
    deleted: Vec<String>,
    fail_projects: usize,
    fail_services: usize,
    fail_deletes: bool,
}

/// Deployment platform issuing sequential IDs `p1, p2, ...` and `s1, s2, ...`.
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<PlatformState>,
    delay: Option<Duration>,
}

impl MockPlatform {
    /// Delay every create call, widening race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next_projects(&self, n: usize) { self.state.lock().unwrap().fail_projects = n; }

    pub fn fail_next_services(&self, n: usize) { self.state.lock().unwrap().fail_services = n; }

    pub fn fail_deletes(&self) { self.state.lock().unwrap().fail_deletes = true; }

    pub fn projects_created(&self) -> usize { self.state.lock().unwrap().project_names.len() }

    pub fn services_created(&self) -> usize { self.state.lock().unwrap().service_names.len() }

    pub fn project_names(&self) -> Vec<String> { self.state.lock().unwrap().project_names.clone() }

    pub fn service_names(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().service_names.clone()
    }

    pub fn deleted_projects(&self) -> Vec<String> { self.state.lock().unwrap().deleted.clone() }

    /// Projects created and not deleted.
    pub fn live_projects(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let deleted = state.deleted.iter().collect::<HashSet<_>>();
        (1..=state.project_names.len())
            .map(|i| format!("p{i}"))
            .filter(|id| !deleted.contains(id))
            .collect()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn create_project(&self, name: &str) -> Result<String, DeployError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_projects > 0 {
            state.fail_projects -= 1;
            return Err(DeployError::transient("project creation", "HTTP 503"));
        }
        state.project_names.push(name.to_string());
        Ok(format!("p{}", state.project_names.len()))
    }

    async fn create_service(&self, project_id: &str, name: &str) -> Result<String, DeployError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_services > 0 {
            state.fail_services -= 1;
            return Err(DeployError::transient("service creation", "HTTP 503"));
        }
        state.service_names.push((project_id.to_string(), name.to_string()));
        Ok(format!("s{}", state.service_names.len()))
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), DeployError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(DeployError::transient("project deletion", "HTTP 503"));
        }
        state.deleted.push(project_id.to_string());
        Ok(())
    }
}

/// Build workflow that records its inputs.
#[derive(Default)]
pub struct RecordingWorkflows {
    calls: Mutex<Vec<WorkflowInputs>>,
    failing_repos: Mutex<HashSet<String>>,
}

impl RecordingWorkflows {
    pub fn calls(&self) -> Vec<WorkflowInputs> { self.calls.lock().unwrap().clone() }

    pub fn fail_for(&self, repo: &str) {
        self.failing_repos.lock().unwrap().insert(repo.to_string());
    }
}

#[async_trait]
impl WorkflowApi for RecordingWorkflows {
    async fn dispatch_workflow(&self, inputs: &WorkflowInputs) -> Result<(), DeployError> {
        self.calls.lock().unwrap().push(inputs.clone());
        if self.failing_repos.lock().unwrap().contains(&inputs.repo) {
            return Err(DeployError::DispatchFailure(format!("HTTP 422 for {}", inputs.repo)));
        }
        Ok(())
    }
}
