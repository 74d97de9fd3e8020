//! Version identifiers and the source-history contract.

pub mod ancestry;
pub mod git;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use ancestry::{AncestryValidator, AncestryVerdict, Bypass};
pub use git::GitHistory;

const FORCED_MARKER: &str = "-forced-";

/// A deployable version: a commit identifier, optionally carrying a
/// `-forced-<unix seconds>` marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mark a commit as force-deployed at `unix_seconds`.
    pub fn forced(commit: &str, unix_seconds: i64) -> Self {
        Self(format!("{commit}{FORCED_MARKER}{unix_seconds}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The commit part, with any forced marker removed.
    pub fn clean(&self) -> &str {
        self.0
            .split_once(FORCED_MARKER)
            .map(|(commit, _)| commit)
            .unwrap_or(&self.0)
    }

    pub fn is_forced(&self) -> bool {
        self.0.contains(FORCED_MARKER)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Source-history queries the deploy flow depends on.
///
/// Revisions are passed as plain commit identifiers; callers strip forced
/// markers before asking.
pub trait VersionControl: Send + Sync {
    /// The commit currently checked out.
    fn current_version(&self) -> Result<VersionId>;

    /// Whether `revision` names a commit present in the local history.
    fn known_locally(&self, revision: &str) -> Result<bool>;

    /// Whether `ancestor` is contained in the history of `descendant`.
    /// A commit counts as its own ancestor.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Paths with uncommitted changes, untracked files included.
    fn dirty_paths(&self) -> Result<Vec<String>>;

    /// Check out `revision` as a detached head.
    fn checkout(&self, revision: &str, force: bool) -> Result<()>;
}
