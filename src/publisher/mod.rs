//! Repository publishing: working tree -> commit -> push -> static site.
//!
//! Round 1 builds a fresh tree and force-pushes it. Later rounds rehydrate
//! the tree from the remote, overwrite only the files in the new set, and
//! push without force, so a rejected push fails the round instead of
//! rewriting history.

pub mod git;
pub mod hosting;
pub mod inspect;
pub mod license;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::attachments::StagedAttachment;
use crate::errors::PublishError;
use crate::models::{DeploymentResult, FileSet, LICENSE_FILE};

pub use git::{GitCli, VcsGateway};
pub use hosting::{GitHubHosting, HostingPlatform, LocalHosting, RepoIdentity, hosting_from_config};

const REMOTE: &str = "origin";

pub struct RepositoryPublisher {
    vcs: Arc<dyn VcsGateway>,
    hosting: Arc<dyn HostingPlatform>,
    work_root: PathBuf,
    license_holder: String,
}

impl RepositoryPublisher {
    pub fn new(
        vcs: Arc<dyn VcsGateway>,
        hosting: Arc<dyn HostingPlatform>,
        work_root: &Path,
        license_holder: &str,
    ) -> Self {
        Self {
            vcs,
            hosting,
            work_root: work_root.to_path_buf(),
            license_holder: license_holder.to_string(),
        }
    }

    pub fn working_dir(&self, id: &RepoIdentity) -> PathBuf {
        id.working_dir(&self.work_root)
    }

    pub fn staging_dir(&self, id: &RepoIdentity) -> PathBuf {
        id.staging_dir(&self.work_root)
    }

    /// Bring the local working tree in line with the remote branch:
    /// fetch + hard reset when a local clone exists, else a fresh clone.
    pub async fn sync_from_remote(&self, id: &RepoIdentity) -> Result<PathBuf, PublishError> {
        let dir = self.working_dir(id);
        let push_url = self.hosting.push_url(id);

        if dir.join(".git").exists() {
            tracing::info!(dir = %dir.display(), "refreshing existing working tree from remote");
            self.vcs.set_remote(&dir, REMOTE, &push_url).await?;
            self.vcs.fetch(&dir, REMOTE, &id.branch).await?;
            self.vcs
                .reset_hard(&dir, &format!("{}/{}", REMOTE, id.branch))
                .await?;
        } else {
            tracing::info!(dir = %dir.display(), "cloning remote into working tree");
            remove_dir_if_exists(&dir).await?;
            create_dir(&self.work_root).await?;
            self.vcs.clone_repo(&push_url, &dir, &id.branch).await?;
        }
        Ok(dir)
    }

    /// Publish `files` for `round` and return where it landed. Staged
    /// attachments are committed next to the generated files unless the
    /// set already has a file of the same name.
    pub async fn publish(
        &self,
        id: &RepoIdentity,
        files: &FileSet,
        attachments: &[StagedAttachment],
        round: u32,
    ) -> Result<DeploymentResult, PublishError> {
        let dir = self.working_dir(id);
        let push_url = self.hosting.push_url(id);

        if round <= 1 {
            remove_dir_if_exists(&dir).await?;
            create_dir(&dir).await?;
            self.vcs.init(&dir).await?;
            self.write_files(&dir, files, attachments).await?;
            self.vcs.add_all(&dir).await?;
            self.vcs.commit(&dir, "Initial commit", false).await?;
            self.vcs.rename_branch(&dir, &id.branch).await?;
            self.hosting.ensure_repository(id).await?;
            self.vcs.set_remote(&dir, REMOTE, &push_url).await?;
            self.vcs.push(&dir, REMOTE, &id.branch, true).await?;
        } else {
            self.sync_from_remote(id).await?;
            self.write_files(&dir, files, attachments).await?;
            self.vcs.add_all(&dir).await?;
            self.vcs
                .commit(&dir, &format!("Apply updates for round {}", round), true)
                .await?;
            self.vcs.push(&dir, REMOTE, &id.branch, false).await?;
        }

        let commit_sha = self.vcs.head_sha(&dir).await?;
        tracing::info!(repo = %id, %commit_sha, "pushed");

        if let Err(e) = self.hosting.enable_pages(id).await {
            tracing::warn!(repo = %id, error = %e, "could not trigger static-site publishing; continuing");
        }

        Ok(DeploymentResult {
            repo_url: self.hosting.repo_url(id),
            commit_sha,
            pages_url: self.hosting.pages_url(id),
        })
    }

    /// Write every file in the set and the staged attachments, then add an
    /// MIT LICENSE if the tree has none.
    async fn write_files(
        &self,
        dir: &Path,
        files: &FileSet,
        attachments: &[StagedAttachment],
    ) -> Result<(), PublishError> {
        for file in files.files() {
            let path = dir.join(&file.name);
            if let Some(parent) = path.parent() {
                create_dir(parent).await?;
            }
            tokio::fs::write(&path, &file.content)
                .await
                .map_err(|source| PublishError::Io {
                    path: path.clone(),
                    source,
                })?;
        }

        for attachment in attachments {
            let Some(source) = &attachment.path else {
                continue;
            };
            if files.contains(&attachment.name) {
                tracing::debug!(attachment = %attachment.name, "generated file takes precedence over attachment");
                continue;
            }
            let target = dir.join(&attachment.name);
            tokio::fs::copy(source, &target)
                .await
                .map_err(|source| PublishError::Io {
                    path: target.clone(),
                    source,
                })?;
        }

        let license = dir.join(LICENSE_FILE);
        if !license.exists() {
            tracing::info!("no LICENSE in tree; adding MIT license");
            let text = license::mit_license(license::current_year(), &self.license_holder);
            tokio::fs::write(&license, text)
                .await
                .map_err(|source| PublishError::Io {
                    path: license.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

async fn create_dir(dir: &Path) -> Result<(), PublishError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| PublishError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

async fn remove_dir_if_exists(dir: &Path) -> Result<(), PublishError> {
    if !dir.exists() {
        return Ok(());
    }
    tokio::fs::remove_dir_all(dir)
        .await
        .map_err(|source| PublishError::Io {
            path: dir.to_path_buf(),
            source,
        })
}
