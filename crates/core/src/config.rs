use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "DEPLOY_HOOK_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub github: GitHubConfig,
    pub platform: PlatformConfig,
    /// Upper bound for every remote call (platform, GitHub, store).
    pub remote_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            db: DbConfig::default(),
            github: GitHubConfig::default(),
            platform: PlatformConfig::default(),
            remote_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 3000 } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
}

impl Default for DbConfig {
    fn default() -> Self { Self { url: "sqlite://deploy-hook.db".to_string() } }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Token used for the workflow dispatch API.
    pub token: String,
    /// API base URL, for GitHub Enterprise Server. Defaults to `https://api.github.com`.
    pub api_url: Option<Url>,
    /// Shared secret for `X-Hub-Signature-256`.
    pub webhook_secret: String,
    /// Used when a push payload doesn't carry `repository.default_branch`.
    pub default_branch: DefaultBranch,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DefaultBranch(pub String);

impl Default for DefaultBranch {
    fn default() -> Self { Self("main".to_string()) }
}

/// The build workflow, addressed directly by its file name.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub owner: String,
    pub repo: String,
    pub file: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            owner: "VarunGupta2005".to_string(),
            repo: "Deployer".to_string(),
            file: "deployer.yml".to_string(),
            git_ref: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub url: Url,
    pub token: String,
    /// Source image for newly created services.
    pub service_image: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("https://backboard.railway.app/graphql/v2")
                .expect("static URL is valid"),
            token: String::new(),
            service_image: "ghcr.io/railwayapp/nixpacks/node:latest".to_string(),
        }
    }
}

impl Config {
    /// Load `config.yml` (or the file named by `DEPLOY_HOOK_CONFIG`) if present, then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.yml".to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(secret) = lookup("WEBHOOK_SHARED_SECRET") {
            self.github.webhook_secret = secret;
        }
        if let Some(token) = lookup("DEPLOY_PLATFORM_API_TOKEN") {
            self.platform.token = token;
        }
        if let Some(token) = lookup("SOURCE_CONTROL_API_TOKEN") {
            self.github.token = token;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.db.url = url;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().with_context(|| format!("Invalid PORT: {port}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.github.webhook_secret.is_empty() {
            bail!("Webhook secret is not configured (WEBHOOK_SHARED_SECRET)");
        }
        if self.platform.token.is_empty() {
            bail!("Platform API token is not configured (DEPLOY_PLATFORM_API_TOKEN)");
        }
        if self.github.token.is_empty() {
            bail!("GitHub token is not configured (SOURCE_CONTROL_API_TOKEN)");
        }
        if self.remote_timeout_secs == 0 {
            bail!("remote_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration { Duration::from_secs(self.remote_timeout_secs) }
}
