//! Code generation: prompt a backend and turn its reply into a [`FileSet`].

pub mod backend;
pub mod prompt;

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::attachments::StagedAttachment;
use crate::errors::GenerationError;
use crate::extract::{ExtractMode, extract_json};
use crate::models::{ENTRY_POINT_FILE, FileSet, GeneratedFile};

pub use backend::{CommandBackend, CompletionBackend, OpenAiBackend, backend_from_config};

/// Shape the backend is instructed to reply with.
#[derive(Debug, Deserialize)]
struct GeneratedFiles {
    files: Vec<GeneratedFile>,
}

pub struct CodeGenerator {
    backend: Arc<dyn CompletionBackend>,
    max_context_bytes: usize,
}

impl CodeGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, max_context_bytes: usize) -> Self {
        Self {
            backend,
            max_context_bytes,
        }
    }

    /// Generate the files for one round.
    ///
    /// `prior_repo` is the working tree of the previous round; when present,
    /// its files are embedded so the backend edits rather than rewrites.
    pub async fn generate(
        &self,
        brief: &str,
        attachments: &[StagedAttachment],
        prior_repo: Option<&Path>,
    ) -> Result<FileSet, GenerationError> {
        let json_mode = self.backend.json_mode();
        let prior = prior_repo.map(|repo| prompt::collect_prior_files(repo, self.max_context_bytes));
        if let Some(files) = &prior {
            tracing::info!(prior_files = files.len(), "embedding existing repository in prompt");
        }
        let prompt = prompt::build_prompt(brief, attachments, prior.as_deref(), json_mode);

        tracing::info!(backend = self.backend.name(), json_mode, prompt_bytes = prompt.len(), "requesting generation");
        let reply = self.backend.complete(&prompt).await?;

        let mode = if json_mode {
            ExtractMode::Strict
        } else {
            ExtractMode::Loose
        };
        let parsed: GeneratedFiles = extract_json(&reply, mode).inspect_err(|e| {
            tracing::warn!(
                error = %e,
                reply_head = %reply.chars().take(500).collect::<String>(),
                "generator reply did not contain a usable file list"
            );
        })?;

        let mut files = FileSet::from_generated(parsed.files)?;
        files.ensure_readme(&readme_title(brief), brief);
        if !files.contains(ENTRY_POINT_FILE) {
            tracing::warn!("generated files have no {}; the site may not render", ENTRY_POINT_FILE);
        }

        tracing::info!(files = ?files.names(), "generation complete");
        Ok(files)
    }
}

/// First line of the brief, shortened for a README heading.
fn readme_title(brief: &str) -> String {
    let first = brief.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("Web App");
    let mut title: String = first.chars().take(60).collect();
    if first.chars().count() > 60 {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct StubBackend {
        reply: String,
        json_mode: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl StubBackend {
        fn new(reply: &str, json_mode: bool) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                json_mode,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        fn json_mode(&self) -> bool {
            self.json_mode
        }

        async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl CompletionBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn json_mode(&self) -> bool {
            true
        }

        async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
            Err(GenerationError::Backend("connection refused".into()))
        }
    }

    const ONE_FILE: &str = r#"{"files": [{"name": "index.html", "content": "<h1>Hi</h1>"}]}"#;

    #[tokio::test]
    async fn test_generate_returns_files_and_synthesized_readme() {
        let backend = StubBackend::new(ONE_FILE, true);
        let generator = CodeGenerator::new(backend.clone(), 10_000);
        let files = generator.generate("A greeting page", &[], None).await.unwrap();

        assert_eq!(files.names(), vec!["index.html", "README.md"]);
        let prompt = &backend.prompts.lock().unwrap()[0];
        assert!(prompt.contains("A greeting page"));
        assert!(!prompt.contains("EXISTING CODE"));
    }

    #[tokio::test]
    async fn test_generate_extracts_from_chatty_reply() {
        let reply = format!("Sure! Here you go:\n```json\n{}\n```\nLet me know.", ONE_FILE);
        let generator = CodeGenerator::new(StubBackend::new(&reply, false), 10_000);
        let files = generator.generate("brief", &[], None).await.unwrap();
        assert!(files.contains("index.html"));
    }

    #[tokio::test]
    async fn test_generate_round_two_embeds_existing_files() {
        let repo = tempdir().unwrap();
        std::fs::write(repo.path().join("index.html"), "<h1>Round one</h1>").unwrap();
        std::fs::write(repo.path().join("style.css"), "h1 { color: red; }").unwrap();

        let backend = StubBackend::new(ONE_FILE, true);
        let generator = CodeGenerator::new(backend.clone(), 10_000);
        generator
            .generate("Make the heading blue", &[], Some(repo.path()))
            .await
            .unwrap();

        let prompt = &backend.prompts.lock().unwrap()[0];
        assert!(prompt.contains("--- EXISTING CODE ---"));
        assert!(prompt.contains("<h1>Round one</h1>"));
        assert!(prompt.contains("h1 { color: red; }"));
    }

    #[tokio::test]
    async fn test_generate_fails_on_malformed_reply() {
        let generator = CodeGenerator::new(StubBackend::new("I cannot do that.", false), 10_000);
        let err = generator.generate("brief", &[], None).await.unwrap_err();
        assert!(matches!(err, GenerationError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_generate_fails_on_empty_file_list() {
        let generator = CodeGenerator::new(StubBackend::new(r#"{"files": []}"#, true), 10_000);
        let err = generator.generate("brief", &[], None).await.unwrap_err();
        assert!(matches!(err, GenerationError::EmptyFileSet));
    }

    #[tokio::test]
    async fn test_generate_fails_on_unsafe_name() {
        let reply = r#"{"files": [{"name": "../escape.html", "content": "x"}]}"#;
        let generator = CodeGenerator::new(StubBackend::new(reply, true), 10_000);
        let err = generator.generate("brief", &[], None).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidFile { .. }));
    }

    #[tokio::test]
    async fn test_generate_propagates_backend_failure() {
        let generator = CodeGenerator::new(Arc::new(FailingBackend), 10_000);
        let err = generator.generate("brief", &[], None).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_readme_title_uses_first_line() {
        assert_eq!(readme_title("\n  Todo app  \nwith details"), "Todo app");
        assert_eq!(readme_title(""), "Web App");
        let long = "x".repeat(80);
        assert_eq!(readme_title(&long).len(), 63);
    }
}
