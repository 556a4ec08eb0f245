//! Source control collaborator (§4.9): reading the managed git repository
//! without mutating the working tree except on `reset_hard`/`pull`/`push`.
//!
//! Grounded on the teacher's `git.rs`, which wraps every blocking `git2`
//! call in `spawn_blocking`. That pattern is kept here; the remote
//! clone/fetch machinery that file used for worker checkouts is dropped,
//! since the Cycle Driver only ever deals with one local repository.

use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use git2::{Repository, ResetType};
use thiserror::Error;

use crate::{CommitHash, Pkgbase};

#[derive(Error, Debug)]
pub enum GitSyncError {
    #[error("failed to open repository at {path}: {source}")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: git2::Error,
    },
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    #[error("repository has no HEAD commit")]
    NoHead,
    #[error("blocking task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The subset of source-control operations the Cycle Driver needs (§4.9).
#[async_trait::async_trait]
pub trait SourceControl: Send + Sync {
    fn current_branch(&self) -> Result<String, GitSyncError>;
    fn head_commit(&self) -> Result<CommitHash, GitSyncError>;
    async fn reset_hard(&self, commit: &CommitHash) -> Result<(), GitSyncError>;
    async fn pull(&self) -> Result<CommitHash, GitSyncError>;
    async fn push(&self) -> Result<(), GitSyncError>;
    /// Paths changed between two commits, relative to the repository root.
    fn changed_files(
        &self,
        from: &CommitHash,
        to: &CommitHash,
    ) -> Result<Vec<PathBuf>, GitSyncError>;
    /// Whether `pkgbase/PKGBUILD`'s `pkgrel=` line changed between the two
    /// commits (§4.1 step 1's pkgrel-changed rule).
    fn package_release_changed(
        &self,
        from: &CommitHash,
        to: &CommitHash,
        pkgbase: &Pkgbase,
    ) -> Result<bool, GitSyncError>;
}

/// [`SourceControl`] backed by a local `git2::Repository`.
pub struct Git2SourceControl {
    repo_path: PathBuf,
}

impl Git2SourceControl {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Git2SourceControl {
            repo_path: repo_path.into(),
        }
    }

    fn open(&self) -> Result<Repository, GitSyncError> {
        Repository::open(&self.repo_path).map_err(|source| GitSyncError::Open {
            path: Utf8PathBuf::from_path_buf(self.repo_path.clone())
                .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned())),
            source,
        })
    }

    fn diff_paths(
        repo: &Repository,
        from: &CommitHash,
        to: &CommitHash,
    ) -> Result<Vec<PathBuf>, GitSyncError> {
        let old_tree = repo.find_commit(git2::Oid::from_str(from.as_str())?)?.tree()?;
        let new_tree = repo.find_commit(git2::Oid::from_str(to.as_str())?)?.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;

        let mut paths = Vec::new();
        diff.foreach(
            &mut |delta, _| {
                if let Some(path) = delta.new_file().path() {
                    paths.push(path.to_path_buf());
                }
                true
            },
            None,
            None,
            None,
        )?;
        Ok(paths)
    }
}

#[async_trait::async_trait]
impl SourceControl for Git2SourceControl {
    fn current_branch(&self) -> Result<String, GitSyncError> {
        let repo = self.open()?;
        let head = repo.head()?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    fn head_commit(&self) -> Result<CommitHash, GitSyncError> {
        let repo = self.open()?;
        let oid = repo.head()?.target().ok_or(GitSyncError::NoHead)?;
        Ok(CommitHash::from(oid.to_string()))
    }

    async fn reset_hard(&self, commit: &CommitHash) -> Result<(), GitSyncError> {
        let repo_path = self.repo_path.clone();
        let commit = commit.clone();
        tokio::task::spawn_blocking(move || -> Result<(), GitSyncError> {
            let repo = Repository::open(&repo_path).map_err(|source| GitSyncError::Open {
                path: Utf8PathBuf::from_path_buf(repo_path.clone())
                    .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned())),
                source,
            })?;
            let oid = git2::Oid::from_str(commit.as_str())?;
            let object = repo.find_object(oid, None)?;
            repo.reset(&object, ResetType::Hard, None)?;
            Ok(())
        })
        .await?
    }

    async fn pull(&self) -> Result<CommitHash, GitSyncError> {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || -> Result<CommitHash, GitSyncError> {
            let repo = Repository::open(&repo_path).map_err(|source| GitSyncError::Open {
                path: Utf8PathBuf::from_path_buf(repo_path.clone())
                    .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned())),
                source,
            })?;
            let branch = repo.head()?.shorthand().unwrap_or("master").to_string();
            let mut remote = repo.find_remote("origin")?;
            remote.fetch(&[&branch], None, None)?;
            let remote_branch = repo.find_branch(
                &format!("origin/{branch}"),
                git2::BranchType::Remote,
            )?;
            let target = remote_branch
                .get()
                .target()
                .ok_or(GitSyncError::NoHead)?;
            let object = repo.find_object(target, None)?;
            repo.reset(&object, ResetType::Hard, None)?;
            Ok(CommitHash::from(target.to_string()))
        })
        .await?
    }

    async fn push(&self) -> Result<(), GitSyncError> {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), GitSyncError> {
            let repo = Repository::open(&repo_path).map_err(|source| GitSyncError::Open {
                path: Utf8PathBuf::from_path_buf(repo_path.clone())
                    .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned())),
                source,
            })?;
            let branch = repo.head()?.shorthand().unwrap_or("master").to_string();
            let mut remote = repo.find_remote("origin")?;
            remote.push(&[format!("refs/heads/{branch}:refs/heads/{branch}")], None)?;
            Ok(())
        })
        .await?
    }

    fn changed_files(
        &self,
        from: &CommitHash,
        to: &CommitHash,
    ) -> Result<Vec<PathBuf>, GitSyncError> {
        let repo = self.open()?;
        Self::diff_paths(&repo, from, to)
    }

    fn package_release_changed(
        &self,
        from: &CommitHash,
        to: &CommitHash,
        pkgbase: &Pkgbase,
    ) -> Result<bool, GitSyncError> {
        let repo = self.open()?;
        let target_path = Path::new(pkgbase.as_ref()).join("PKGBUILD");

        let pkgrel_at = |commit: &CommitHash| -> Result<Option<String>, GitSyncError> {
            let tree = repo.find_commit(git2::Oid::from_str(commit.as_str())?)?.tree()?;
            let Ok(entry) = tree.get_path(&target_path) else {
                return Ok(None);
            };
            let blob = entry.to_object(&repo)?.peel_to_blob()?;
            let content = String::from_utf8_lossy(blob.content()).into_owned();
            Ok(content
                .lines()
                .find_map(|line| line.trim().strip_prefix("pkgrel=").map(|v| v.to_string())))
        };

        Ok(pkgrel_at(from)? != pkgrel_at(to)?)
    }
}
