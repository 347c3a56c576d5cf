//! Generation backends.
//!
//! A backend turns a prompt into raw reply text. Everything after that
//! (extraction, validation) is backend-independent.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::config::{BackendKind, GeneratorConfig, Secrets};
use crate::errors::GenerationError;

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Whether replies are guaranteed to be a single JSON object.
    fn json_mode(&self) -> bool;

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Build the backend selected by `[generator].backend`.
pub fn backend_from_config(
    config: &GeneratorConfig,
    secrets: &Secrets,
) -> Result<Arc<dyn CompletionBackend>, GenerationError> {
    match config.backend {
        BackendKind::Openai => {
            let key = secrets
                .generator_api_key
                .clone()
                .ok_or_else(|| GenerationError::Backend("OPENAI_API_KEY is not set".into()))?;
            Ok(Arc::new(OpenAiBackend::new(config, key)))
        }
        BackendKind::Command => Ok(Arc::new(CommandBackend::new(config))),
    }
}

/// OpenAI-compatible chat completions API.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    json_mode: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &GeneratorConfig, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            json_mode: config.json_mode,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn json_mode(&self) -> bool {
        self.json_mode
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        if self.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Backend(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "completion API returned {}: {}",
                status,
                text.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(format!("unreadable completion response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GenerationError::Backend("completion response had no content".into()))
    }
}

/// A local generator CLI invoked as `<command> <args...> <prompt>`.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl CompletionBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.program
    }

    fn json_mode(&self) -> bool {
        false
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                GenerationError::Backend(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| GenerationError::Backend(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Backend(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
