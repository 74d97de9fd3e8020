//! Source history backed by a local git repository.

use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{Oid, Repository, StatusOptions};

use crate::error::Result;

use super::{VersionControl, VersionId};

#[derive(Debug, Clone)]
pub struct GitHistory {
    work_dir: PathBuf,
}

impl GitHistory {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn open(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.work_dir)?)
    }
}

fn resolve_commit(repo: &Repository, revision: &str) -> Result<Oid> {
    let commit = repo.revparse_single(revision)?.peel_to_commit()?;
    Ok(commit.id())
}

impl VersionControl for GitHistory {
    fn current_version(&self) -> Result<VersionId> {
        let repo = self.open()?;
        let head = repo.head()?.peel_to_commit()?;
        Ok(VersionId::new(head.id().to_string()))
    }

    fn known_locally(&self, revision: &str) -> Result<bool> {
        let repo = self.open()?;
        let found = repo
            .revparse_single(revision)
            .and_then(|obj| obj.peel_to_commit())
            .is_ok();
        Ok(found)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let repo = self.open()?;
        let ancestor = resolve_commit(&repo, ancestor)?;
        let descendant = resolve_commit(&repo, descendant)?;
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(repo.graph_descendant_of(descendant, ancestor)?)
    }

    fn dirty_paths(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = repo.statuses(Some(&mut opts))?;
        let mut paths: Vec<String> = statuses
            .iter()
            .filter(|entry| !entry.status().is_empty())
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn checkout(&self, revision: &str, force: bool) -> Result<()> {
        let repo = self.open()?;
        let commit = repo.revparse_single(revision)?.peel_to_commit()?;

        let mut builder = CheckoutBuilder::new();
        if force {
            builder.force();
        } else {
            builder.safe();
        }
        repo.checkout_tree(commit.as_object(), Some(&mut builder))?;
        repo.set_head_detached(commit.id())?;
        tracing::info!(version = %commit.id(), force, "checked out");
        Ok(())
    }
}
