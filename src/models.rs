//! Domain types shared by every pipeline component.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::errors::GenerationError;

/// A named auxiliary input referenced by a data URL or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// An accepted build request. Immutable once the front door hands it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub email: String,
    /// Task identifier; the wire name is `task`.
    pub task: String,
    /// 1 for the initial build, >= 2 for updates.
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub evaluation_url: String,
}

impl BuildRequest {
    pub fn is_initial_round(&self) -> bool {
        self.round <= 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// Relative path inside the repository.
    pub name: String,
    pub content: String,
}

/// Ordered set of generated files with unique, normalized relative names.
///
/// Construction through [`FileSet::from_generated`] guarantees the set is
/// non-empty and that every name is a safe relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSet {
    files: Vec<GeneratedFile>,
}

pub const README_FILE: &str = "README.md";
pub const LICENSE_FILE: &str = "LICENSE";
pub const ENTRY_POINT_FILE: &str = "index.html";

impl FileSet {
    pub fn from_generated(files: Vec<GeneratedFile>) -> Result<Self, GenerationError> {
        if files.is_empty() {
            return Err(GenerationError::EmptyFileSet);
        }

        let mut normalized: Vec<GeneratedFile> = Vec::with_capacity(files.len());
        for file in files {
            let name = normalize_file_name(&file.name)?;
            if let Some(existing) = normalized.iter_mut().find(|f| f.name == name) {
                tracing::warn!(file = %name, "generator emitted a duplicate file; keeping the last copy");
                existing.content = file.content;
            } else {
                normalized.push(GeneratedFile {
                    name,
                    content: file.content,
                });
            }
        }

        Ok(Self { files: normalized })
    }

    pub fn files(&self) -> &[GeneratedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    /// Append a README derived from the brief when the generator left it out.
    pub fn ensure_readme(&mut self, title: &str, brief: &str) {
        if self.contains(README_FILE) {
            return;
        }
        tracing::info!("generator omitted README.md; synthesizing one from the brief");
        self.files.push(GeneratedFile {
            name: README_FILE.to_string(),
            content: format!(
                "# {}\n\n## Overview\n\n{}\n\n## Usage\n\nOpen `{}` in a browser, or visit the published site.\n\n## License\n\nMIT\n",
                title,
                brief.trim(),
                ENTRY_POINT_FILE
            ),
        });
    }
}

/// Normalize a generator-supplied file name into a safe relative path.
pub fn normalize_file_name(raw: &str) -> Result<String, GenerationError> {
    let invalid = |reason: &str| GenerationError::InvalidFile {
        name: raw.to_string(),
        reason: reason.to_string(),
    };

    let cleaned = raw.trim().replace('\\', "/");
    let cleaned = cleaned.trim_start_matches("./");
    if cleaned.is_empty() {
        return Err(invalid("empty name"));
    }
    if cleaned.starts_with('/') {
        return Err(invalid("absolute path"));
    }

    let mut parts = Vec::new();
    for component in Path::new(cleaned).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory reference")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute path")),
        }
    }
    if parts.is_empty() {
        return Err(invalid("empty name"));
    }
    if parts[0] == ".git" {
        return Err(invalid("version-control metadata"));
    }
    Ok(parts.join("/"))
}

/// Outcome of a successful publish. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

/// Body posted to the evaluator's callback URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

impl NotificationPayload {
    pub fn new(request: &BuildRequest, deployment: &DeploymentResult) -> Self {
        Self {
            email: request.email.clone(),
            task: request.task.clone(),
            round: request.round,
            nonce: request.nonce.clone(),
            repo_url: deployment.repo_url.clone(),
            commit_sha: deployment.commit_sha.clone(),
            pages_url: deployment.pages_url.clone(),
        }
    }
}

/// Stage of a single round. Transitions are strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStage {
    Received,
    Materializing,
    Generating,
    Publishing,
    AwaitingReadiness,
    Notifying,
    Done,
    Aborted,
}

impl RoundStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Materializing => "materializing",
            Self::Generating => "generating",
            Self::Publishing => "publishing",
            Self::AwaitingReadiness => "awaiting_readiness",
            Self::Notifying => "notifying",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Validate a stage transition: one step forward, or abort from any
    /// non-terminal stage.
    pub fn can_transition_to(&self, next: RoundStage) -> bool {
        if next == RoundStage::Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Received, Self::Materializing)
                | (Self::Materializing, Self::Generating)
                | (Self::Generating, Self::Publishing)
                | (Self::Publishing, Self::AwaitingReadiness)
                | (Self::AwaitingReadiness, Self::Notifying)
                | (Self::Notifying, Self::Done)
        )
    }
}

impl std::fmt::Display for RoundStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundOutcome {
    Done,
    Aborted { at: RoundStage },
}

/// Everything the orchestrator learned about one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub task: String,
    pub round: u32,
    /// Every stage entered, in order, ending with the terminal stage.
    pub stages: Vec<RoundStage>,
    pub outcome: RoundOutcome,
    pub deployment: Option<DeploymentResult>,
    /// `None` when the readiness stage was never reached.
    pub ready: Option<bool>,
    pub notify_attempts: Option<u32>,
    pub error: Option<String>,
}

impl RoundReport {
    pub fn is_done(&self) -> bool {
        self.outcome == RoundOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content: &str) -> GeneratedFile {
        GeneratedFile {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_build_request_uses_task_wire_name() {
        let json = serde_json::json!({
            "email": "a@b.c",
            "task": "t1",
            "round": 2,
            "nonce": "n",
            "brief": "todo app",
            "evaluation_url": "http://eval/notify"
        });
        let request: BuildRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.task, "t1");
        assert!(request.attachments.is_empty());
        assert!(!request.is_initial_round());
    }

    #[test]
    fn test_file_set_rejects_empty() {
        let err = FileSet::from_generated(vec![]).unwrap_err();
        assert!(matches!(err, GenerationError::EmptyFileSet));
    }

    #[test]
    fn test_file_set_rejects_empty_name() {
        let err = FileSet::from_generated(vec![file("  ", "x")]).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidFile { .. }));
    }

    #[test]
    fn test_file_set_rejects_traversal_and_absolute_paths() {
        assert!(FileSet::from_generated(vec![file("../etc/passwd", "x")]).is_err());
        assert!(FileSet::from_generated(vec![file("/etc/passwd", "x")]).is_err());
        assert!(FileSet::from_generated(vec![file(".git/config", "x")]).is_err());
    }

    #[test]
    fn test_file_set_normalizes_names() {
        let set = FileSet::from_generated(vec![
            file("./index.html", "a"),
            file("assets\\app.js", "b"),
        ])
        .unwrap();
        assert_eq!(set.names(), vec!["index.html", "assets/app.js"]);
    }

    #[test]
    fn test_file_set_duplicate_keeps_last_content_first_position() {
        let set = FileSet::from_generated(vec![
            file("index.html", "old"),
            file("app.js", "js"),
            file("index.html", "new"),
        ])
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.files()[0].name, "index.html");
        assert_eq!(set.files()[0].content, "new");
    }

    #[test]
    fn test_ensure_readme_only_when_missing() {
        let mut set = FileSet::from_generated(vec![file("index.html", "x")]).unwrap();
        set.ensure_readme("t1", "A todo app");
        assert!(set.contains("README.md"));
        assert_eq!(set.len(), 2);
        let readme = &set.files()[1].content;
        assert!(readme.contains("A todo app"));

        set.ensure_readme("t1", "other");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_notification_payload_from_request_and_deployment() {
        let request = BuildRequest {
            email: "s@x.io".into(),
            task: "t1".into(),
            round: 1,
            nonce: "abc".into(),
            brief: "b".into(),
            attachments: vec![],
            evaluation_url: "http://e".into(),
        };
        let deployment = DeploymentResult {
            repo_url: "https://github.com/o/t1".into(),
            commit_sha: "deadbeef".into(),
            pages_url: "https://o.github.io/t1/".into(),
        };
        let payload = NotificationPayload::new(&request, &deployment);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["task"], "t1");
        assert_eq!(json["round"], 1);
        assert_eq!(json["nonce"], "abc");
        assert_eq!(json["commit_sha"], "deadbeef");
        assert_eq!(json.as_object().unwrap().len(), 7);
    }

    #[test]
    fn test_valid_stage_transitions() {
        use RoundStage::*;
        let order = [
            Received,
            Materializing,
            Generating,
            Publishing,
            AwaitingReadiness,
            Notifying,
            Done,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        for stage in &order[..6] {
            assert!(stage.can_transition_to(Aborted));
        }
    }

    #[test]
    fn test_invalid_stage_transitions() {
        use RoundStage::*;
        assert!(!Received.can_transition_to(Generating));
        assert!(!Publishing.can_transition_to(Generating));
        assert!(!Done.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Received));
        assert!(!Notifying.can_transition_to(Publishing));
    }

    #[test]
    fn test_round_outcome_serialization() {
        let json = serde_json::to_value(RoundOutcome::Aborted {
            at: RoundStage::Publishing,
        })
        .unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["at"], "publishing");
    }
}
