use anyhow::{Context, Result};
use git2::{ObjectType, Repository, TreeWalkMode, TreeWalkResult};
use std::path::{Path, PathBuf};

/// Read-only view of a working tree's repository.
pub struct RepoInspector {
    repo: Repository,
}

impl RepoInspector {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open(path)
            .with_context(|| format!("Failed to open git repository at {}", path.display()))?;
        Ok(Self { repo })
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    pub fn head_sha(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }

    /// Paths of every blob in HEAD's tree, relative to the repository root.
    /// Empty for an unborn branch.
    pub fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        let Some(commit) = self.head_commit() else {
            return Ok(Vec::new());
        };
        let tree = commit.tree().context("Failed to read HEAD tree")?;

        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob)
                && let Some(name) = entry.name()
            {
                files.push(PathBuf::from(format!("{}{}", root, name)));
            }
            TreeWalkResult::Ok
        })
        .context("Failed to walk HEAD tree")?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        dir
    }

    fn commit_all(dir: &Path, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap();
        }
    }

    #[test]
    fn test_head_sha_unborn_then_populated() {
        let dir = setup_repo();
        let inspector = RepoInspector::open(dir.path()).unwrap();
        assert!(inspector.head_sha().is_none());

        fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();
        commit_all(dir.path(), "init");
        let sha = inspector.head_sha().unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn test_tracked_files_lists_nested_blobs_only() {
        let dir = setup_repo();
        fs::write(dir.path().join("index.html"), "x").unwrap();
        fs::create_dir_all(dir.path().join("assets/js")).unwrap();
        fs::write(dir.path().join("assets/js/app.js"), "y").unwrap();
        commit_all(dir.path(), "init");
        fs::write(dir.path().join("untracked.txt"), "z").unwrap();

        let inspector = RepoInspector::open(dir.path()).unwrap();
        let mut files = inspector.tracked_files().unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![PathBuf::from("assets/js/app.js"), PathBuf::from("index.html")]
        );
    }

    #[test]
    fn test_tracked_files_empty_for_unborn_branch() {
        let dir = setup_repo();
        let inspector = RepoInspector::open(dir.path()).unwrap();
        assert!(inspector.tracked_files().unwrap().is_empty());
    }

    #[test]
    fn test_open_fails_outside_repository() {
        let dir = tempdir().unwrap();
        assert!(RepoInspector::open(dir.path()).is_err());
    }
}
