//! Prompt assembly for the code generator.

use std::path::Path;
use walkdir::WalkDir;

use crate::attachments::StagedAttachment;
use crate::publisher::inspect::RepoInspector;

/// Text attachments up to this size are inlined into the prompt.
pub const ATTACHMENT_PREVIEW_BYTES: u64 = 8 * 1024;

const INSTRUCTIONS: &str = r##"INSTRUCTIONS:
1. Generate all necessary code. Prefer a single `index.html` with inline CSS and JavaScript unless the brief needs more files.
2. Create a professional `README.md` covering the project summary, setup, usage, and how the code is organized.
3. Create a `LICENSE` file with the MIT License text.
4. Your response MUST be a JSON object with a single key "files", an array of objects. Each object has two keys: "name" (relative file path) and "content" (full file contents).
5. Only list files you create or change. Files you leave out keep their current contents.

Example JSON output:
{
  "files": [
    { "name": "index.html", "content": "<!DOCTYPE html>..." },
    { "name": "README.md", "content": "# Project..." }
  ]
}
"##;

const JSON_ONLY_INSTRUCTION: &str = "Respond with the JSON object only. Do not wrap it in markdown fences and do not add any explanation before or after it.";

/// A file from the previous round's tree. `content` is `None` when it was
/// left out to stay within the context budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorFile {
    pub path: String,
    pub content: Option<String>,
}

/// Collect the existing repository files the generator should edit.
///
/// Uses HEAD's tracked files when `repo` is a git repository, otherwise
/// walks the tree skipping `.git`. Non-UTF-8 files are skipped; once
/// `max_bytes` is spent, remaining files are listed by name only.
pub fn collect_prior_files(repo: &Path, max_bytes: usize) -> Vec<PriorFile> {
    let mut paths: Vec<String> = match RepoInspector::open(repo).and_then(|i| i.tracked_files()) {
        Ok(files) if !files.is_empty() => files
            .iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect(),
        Ok(_) | Err(_) => walk_files(repo),
    };
    paths.sort();

    let mut remaining = max_bytes;
    let mut prior = Vec::new();
    for path in paths {
        let Ok(content) = std::fs::read_to_string(repo.join(&path)) else {
            tracing::debug!(file = %path, "skipping unreadable or non-UTF-8 file from prior context");
            continue;
        };
        if content.len() <= remaining {
            remaining -= content.len();
            prior.push(PriorFile {
                path,
                content: Some(content),
            });
        } else {
            tracing::warn!(file = %path, bytes = content.len(), "prior file exceeds context budget; listing name only");
            prior.push(PriorFile { path, content: None });
        }
    }
    prior
}

fn walk_files(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

fn attachment_preview(attachment: &StagedAttachment) -> Option<String> {
    let path = attachment.path.as_ref()?;
    let size = std::fs::metadata(path).ok()?.len();
    if size > ATTACHMENT_PREVIEW_BYTES {
        return None;
    }
    std::fs::read_to_string(path).ok()
}

/// Render the full generation prompt.
pub fn build_prompt(
    brief: &str,
    attachments: &[StagedAttachment],
    prior: Option<&[PriorFile]>,
    json_mode: bool,
) -> String {
    let mut prompt = String::from(
        "You are an expert web developer. Build a single-page web application that satisfies the following brief.\n\n",
    );
    prompt.push_str(&format!("BRIEF:\n{}\n\n", brief.trim()));

    if !attachments.is_empty() {
        prompt.push_str("ATTACHMENTS (published next to index.html under the same names):\n");
        for attachment in attachments {
            prompt.push_str(&format!("- {} ({})", attachment.name, attachment.media_type));
            if !attachment.is_staged() {
                prompt.push_str(" [unavailable]");
            }
            prompt.push('\n');
            if let Some(preview) = attachment_preview(attachment) {
                prompt.push_str(&format!("```\n{}\n```\n", preview.trim_end()));
            }
        }
        prompt.push('\n');
    }

    if let Some(files) = prior {
        prompt.push_str("--- EXISTING CODE ---\n");
        prompt.push_str("Modify the following existing files. Do not start from scratch.\n");
        for file in files {
            match &file.content {
                Some(content) => {
                    prompt.push_str(&format!("\n-- File: {} --\n{}\n", file.path, content));
                }
                None => {
                    prompt.push_str(&format!("\n-- File: {} -- (omitted, too large)\n", file.path));
                }
            }
        }
        prompt.push_str("--- END EXISTING CODE ---\n\n");
    }

    prompt.push_str(INSTRUCTIONS);
    if !json_mode {
        prompt.push('\n');
        prompt.push_str(JSON_ONLY_INSTRUCTION);
        prompt.push('\n');
    }
    prompt
}
