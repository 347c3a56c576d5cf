//! Process-wide configuration, loaded once at startup.
//!
//! Layering (lowest to highest precedence):
//! 1. Built-in defaults
//! 2. `pagesmith.toml` (or `--config PATH`)
//! 3. Environment variables (a `.env` file is loaded first)
//! 4. CLI flags applied by the caller
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5001
//!
//! [generator]
//! backend = "openai"          # or "command"
//! model = "gpt-4-turbo-preview"
//! json_mode = true
//!
//! [hosting]
//! provider = "github"         # or "local"
//! owner = "octocat"
//! repository = "demo-site"    # optional: deploy every task to one repo
//!
//! [pipeline]
//! work_root = "/tmp/pagesmith"
//! readiness_timeout_secs = 180
//! ```
//!
//! Secrets come only from the environment: `MY_SECRET`, `OPENAI_API_KEY`,
//! `GITHUB_TOKEN`. `GITHUB_USER` overrides `hosting.owner`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "pagesmith.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions over HTTP.
    #[default]
    Openai,
    /// A local generator CLI that prints its reply to stdout.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: BackendKind,
    pub model: String,
    pub api_base: String,
    /// Ask the backend for strict JSON output when it supports it.
    pub json_mode: bool,
    pub timeout_secs: u64,
    /// Program for the `command` backend.
    pub command: String,
    /// Arguments placed before the prompt for the `command` backend.
    pub args: Vec<String>,
    /// Upper bound on prior-repository content inlined into the prompt.
    pub max_context_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Openai,
            model: "gpt-4-turbo-preview".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            json_mode: true,
            timeout_secs: 300,
            command: "claude".to_string(),
            args: vec!["--print".to_string()],
            max_context_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostingProvider {
    #[default]
    Github,
    /// Bare repositories on the local filesystem.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    pub provider: HostingProvider,
    pub owner: String,
    /// Fixed repository name shared by every task. Unset means one
    /// repository per task, named after the task id.
    pub repository: Option<String>,
    pub branch: String,
    pub api_base: String,
    pub local_root: PathBuf,
    pub pages_base_url: String,
    pub commit_name: String,
    pub commit_email: String,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            provider: HostingProvider::Github,
            owner: String::new(),
            repository: None,
            branch: "main".to_string(),
            api_base: "https://api.github.com".to_string(),
            local_root: PathBuf::from("/tmp/pagesmith/remotes"),
            pages_base_url: "http://127.0.0.1:8000".to_string(),
            commit_name: "pagesmith".to_string(),
            commit_email: "pagesmith@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub work_root: PathBuf,
    pub readiness_timeout_secs: u64,
    pub readiness_interval_secs: u64,
    pub attachment_timeout_secs: u64,
    /// Attachments larger than this are skipped.
    pub attachment_max_bytes: u64,
    pub notify_max_attempts: u32,
    pub notify_initial_delay_ms: u64,
    pub notify_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("/tmp/pagesmith"),
            readiness_timeout_secs: 180,
            readiness_interval_secs: 5,
            attachment_timeout_secs: 30,
            attachment_max_bytes: 10 * 1024 * 1024,
            notify_max_attempts: 5,
            notify_initial_delay_ms: 1000,
            notify_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    pub fn notify_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.notify_initial_delay_ms),
            2,
            self.notify_max_attempts,
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Copyright holder for synthesized MIT licenses. Defaults to the owner.
    pub holder: Option<String>,
}

/// Credentials read from the environment. `Debug` never prints values.
#[derive(Clone, Default)]
pub struct Secrets {
    pub build_secret: Option<String>,
    pub generator_api_key: Option<String>,
    pub hosting_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(v: &Option<String>) -> &'static str {
            if v.is_some() { "<set>" } else { "<unset>" }
        }
        f.debug_struct("Secrets")
            .field("build_secret", &mask(&self.build_secret))
            .field("generator_api_key", &mask(&self.generator_api_key))
            .field("hosting_token", &mask(&self.hosting_token))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesmithConfig {
    pub server: ServerConfig,
    pub generator: GeneratorConfig,
    pub hosting: HostingConfig,
    pub pipeline: PipelineConfig,
    pub license: LicenseConfig,
    #[serde(skip)]
    pub secrets: Secrets,
}

impl PagesmithConfig {
    /// Load from `path` (or `pagesmith.toml` if present) and the process
    /// environment, after reading `.env`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let text = match path {
            Some(p) => Some(
                std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?,
            ),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Some(std::fs::read_to_string(default).context("Failed to read pagesmith.toml")?)
                } else {
                    None
                }
            }
        };

        Self::from_sources(text.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from TOML text and an environment lookup.
    pub fn from_sources<F>(toml_text: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: PagesmithConfig = match toml_text {
            Some(text) => toml::from_str(text).context("Failed to parse configuration TOML")?,
            None => PagesmithConfig::default(),
        };

        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        config.secrets = Secrets {
            build_secret: non_empty("MY_SECRET"),
            generator_api_key: non_empty("OPENAI_API_KEY"),
            hosting_token: non_empty("GITHUB_TOKEN"),
        };
        if let Some(owner) = non_empty("GITHUB_USER") {
            config.hosting.owner = owner;
        }
        if let Some(port) = non_empty("PAGESMITH_PORT") {
            config.server.port = port
                .parse()
                .with_context(|| format!("Invalid PAGESMITH_PORT '{}'", port))?;
        }
        if let Some(root) = non_empty("PAGESMITH_WORK_ROOT") {
            config.pipeline.work_root = PathBuf::from(root);
        }

        Ok(config)
    }

    /// Check that everything `serve`/`run` needs is present.
    pub fn validate_for_pipeline(&self) -> Result<()> {
        if self.hosting.owner.trim().is_empty() && self.hosting.provider == HostingProvider::Github {
            anyhow::bail!("hosting owner is not set (GITHUB_USER or [hosting].owner)");
        }
        if self.hosting.provider == HostingProvider::Github && self.secrets.hosting_token.is_none() {
            anyhow::bail!("GITHUB_TOKEN is not set");
        }
        if self.generator.backend == BackendKind::Openai && self.secrets.generator_api_key.is_none() {
            anyhow::bail!("OPENAI_API_KEY is not set");
        }
        Ok(())
    }

    pub fn license_holder(&self) -> String {
        self.license
            .holder
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| self.hosting.owner.clone())
    }

    /// Render the effective configuration with secrets masked.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut out = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        out.push_str(&format!("\n# secrets: {:?}\n", self.secrets));
        Ok(out)
    }
}
