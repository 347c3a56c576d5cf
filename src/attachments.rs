//! Stage request attachments on local disk before generation.
//!
//! Attachments arrive either inline as `data:` URLs or as remote URLs. Each
//! one is written under the round's staging directory. A failure for one
//! attachment is logged and skipped; it never aborts the round.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Attachment;

const DEFAULT_MEDIA_TYPE: &str = "text/plain";
const REMOTE_MEDIA_TYPE: &str = "application/octet-stream";

/// An attachment after staging. `path` is `None` when it could not be
/// decoded or fetched; the name is still handed to the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAttachment {
    pub name: String,
    pub media_type: String,
    pub path: Option<PathBuf>,
}

impl StagedAttachment {
    pub fn is_staged(&self) -> bool {
        self.path.is_some()
    }
}

/// Decoded contents of a `data:` URL.
#[derive(Debug, PartialEq, Eq)]
pub struct DataUrl {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Parse `data:[<media type>][;base64],<payload>`.
pub fn parse_data_url(url: &str) -> Result<DataUrl> {
    let rest = url
        .strip_prefix("data:")
        .context("not a data URL")?;
    let (header, payload) = rest.split_once(',').context("data URL has no payload separator")?;

    let mut params = header.split(';');
    let media_type = params
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_string();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .context("invalid base64 in data URL")?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    Ok(DataUrl { media_type, bytes })
}

/// Reduce an attachment name to a safe file name (its final component).
pub fn staged_file_name(raw: &str) -> Option<String> {
    let name = raw.trim().replace('\\', "/");
    let last = name.rsplit('/').next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}

pub struct AttachmentMaterializer {
    client: reqwest::Client,
    max_bytes: u64,
}

impl AttachmentMaterializer {
    /// `max_bytes` caps every attachment, inline or fetched. Larger ones
    /// are skipped like any other failed attachment.
    pub fn new(fetch_timeout: Duration, max_bytes: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .user_agent("pagesmith")
            .build()
            .unwrap_or_default();
        Self { client, max_bytes }
    }

    /// Clear `staging_dir`, then decode or fetch every attachment into it.
    ///
    /// Returns one entry per input, in order. Only a failure to prepare the
    /// staging directory itself is an error.
    pub async fn materialize(
        &self,
        attachments: &[Attachment],
        staging_dir: &Path,
    ) -> Result<Vec<StagedAttachment>> {
        reset_dir(staging_dir).await?;

        let mut staged = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let Some(name) = staged_file_name(&attachment.name) else {
                tracing::warn!(name = %attachment.name, "skipping attachment with unusable name");
                staged.push(StagedAttachment {
                    name: attachment.name.clone(),
                    media_type: DEFAULT_MEDIA_TYPE.to_string(),
                    path: None,
                });
                continue;
            };

            match self.stage_one(&attachment.url, staging_dir, &name).await {
                Ok((media_type, path)) => {
                    tracing::info!(attachment = %name, %media_type, "staged attachment");
                    staged.push(StagedAttachment {
                        name,
                        media_type,
                        path: Some(path),
                    });
                }
                Err(e) => {
                    tracing::warn!(attachment = %name, error = %format!("{:#}", e), "failed to stage attachment; continuing without it");
                    staged.push(StagedAttachment {
                        name,
                        media_type: DEFAULT_MEDIA_TYPE.to_string(),
                        path: None,
                    });
                }
            }
        }
        Ok(staged)
    }

    async fn stage_one(&self, url: &str, dir: &Path, name: &str) -> Result<(String, PathBuf)> {
        let (media_type, bytes) = if url.starts_with("data:") {
            let data = parse_data_url(url)?;
            if data.bytes.len() as u64 > self.max_bytes {
                bail!("inline attachment exceeds {} bytes", self.max_bytes);
            }
            (data.media_type, data.bytes)
        } else {
            self.fetch(url).await?
        };

        let path = dir.join(name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok((media_type, path))
    }

    async fn fetch(&self, url: &str) -> Result<(String, Vec<u8>)> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("fetching {} returned {}", url, status);
        }
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| REMOTE_MEDIA_TYPE.to_string());
        if let Some(len) = response.content_length()
            && len > self.max_bytes
        {
            bail!("{} is {} bytes, over the {} byte limit", url, len, self.max_bytes);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                bail!("{} exceeds the {} byte limit", url, self.max_bytes);
            }
            body.extend_from_slice(&chunk);
        }
        Ok((media_type, body))
    }
}

async fn reset_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir)
            .await
            .with_context(|| format!("Failed to clear staging directory {}", dir.display()))?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create staging directory {}", dir.display()))
}
