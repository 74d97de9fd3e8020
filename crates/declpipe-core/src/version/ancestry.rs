//! Guards the published pointer against moving backwards in history.

use crate::error::{DeployError, Result};

use super::{VersionControl, VersionId};

/// Operator override for the ancestry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bypass {
    #[default]
    None,
    /// `--force`
    Force,
    /// `--rollback --version <v>`
    Rollback,
}

impl Bypass {
    pub fn from_flags(force: bool, rollback: bool) -> Self {
        if force {
            Bypass::Force
        } else if rollback {
            Bypass::Rollback
        } else {
            Bypass::None
        }
    }

    pub fn is_active(self) -> bool {
        self != Bypass::None
    }
}

/// Why publishing was judged safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AncestryVerdict {
    NoRemote,
    Bypassed,
    /// The remote version is missing from local history and the environment
    /// tolerates that.
    UnknownRemote,
    Descendant,
}

#[derive(Debug, Clone)]
pub struct AncestryValidator {
    relaxed_environments: Vec<String>,
}

impl Default for AncestryValidator {
    fn default() -> Self {
        Self::new(vec!["dev".to_string()])
    }
}

impl AncestryValidator {
    pub fn new(relaxed_environments: Vec<String>) -> Self {
        Self {
            relaxed_environments,
        }
    }

    fn is_relaxed(&self, env: &str) -> bool {
        self.relaxed_environments.iter().any(|e| e == env)
    }

    /// Decide whether `local` may replace `remote` as the published version
    /// of a pipeline in `env`.
    pub fn validate(
        &self,
        history: &dyn VersionControl,
        env: &str,
        remote: Option<&VersionId>,
        local: &VersionId,
        bypass: Bypass,
    ) -> Result<AncestryVerdict> {
        let Some(remote) = remote.filter(|r| !r.as_str().is_empty()) else {
            return Ok(AncestryVerdict::NoRemote);
        };

        if bypass.is_active() {
            tracing::info!(remote = %remote, ?bypass, "bypassing ancestry check");
            return Ok(AncestryVerdict::Bypassed);
        }

        let blocked = || DeployError::RegressionBlocked {
            remote: remote.to_string(),
            local: local.to_string(),
        };

        if !history.known_locally(remote.clean())? {
            if self.is_relaxed(env) {
                tracing::warn!(
                    remote = %remote,
                    env,
                    "remote version unknown locally, proceeding in relaxed environment"
                );
                return Ok(AncestryVerdict::UnknownRemote);
            }
            tracing::error!(remote = %remote, "remote version not found in local history");
            return Err(blocked());
        }

        if history.is_ancestor(remote.clean(), local.clean())? {
            Ok(AncestryVerdict::Descendant)
        } else {
            Err(blocked())
        }
    }
}
