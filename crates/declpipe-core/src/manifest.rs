//! Published-version pointer for a pipeline and its compare-and-swap update.
//!
//! One manifest object exists per pipeline id. It is the only remote object
//! shared between concurrent deployers, so every write is conditioned on the
//! generation read at the start of the same attempt. A lost race discards
//! the computed record and starts over from a fresh read, immediately and
//! without backoff, up to `max_attempts` times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::storage::{Generation, ObjectStore, WritePrecondition, WriteResult};
use crate::version::{AncestryValidator, AncestryVerdict, Bypass, VersionControl, VersionId};

pub const MANIFEST_FILE_NAME: &str = "manifest.yml";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Contents of `manifest.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_version: Option<VersionId>,
    #[serde(default)]
    pub prev_version: Vec<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Generation the record was computed from. Audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_gcs_version: Option<String>,
}

impl ManifestRecord {
    /// Parse manifest content. Empty content and `{}` both yield an empty record.
    pub fn parse(path: &str, content: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(content).map_err(|e| DeployError::ManifestFormat {
            path: path.to_string(),
            message: format!("not valid UTF-8: {e}"),
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let record: Option<ManifestRecord> =
            serde_yaml::from_str(text).map_err(|e| DeployError::ManifestFormat {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(record.unwrap_or_default())
    }

    pub fn to_yaml(&self, path: &str) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| DeployError::ManifestFormat {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// The record that publishes `candidate` on top of this one.
    pub fn succeed(&self, candidate: &VersionId, read_generation: &Generation, timestamp: String) -> Self {
        let mut prev_version = self.prev_version.clone();
        if let Some(current) = &self.default_version {
            prev_version.push(current.clone());
        }
        Self {
            default_version: Some(candidate.clone()),
            prev_version,
            timestamp: Some(timestamp),
            prev_gcs_version: Some(read_generation.to_string()),
        }
    }
}

/// Manifest location for a pipeline inside the orchestration bucket.
pub fn manifest_uri(orchestration_bucket: &str, pipeline_id: &str) -> String {
    format!("gs://{orchestration_bucket}/data/{pipeline_id}/{MANIFEST_FILE_NAME}")
}

/// One publish of a candidate version.
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub manifest_uri: &'a str,
    pub env: &'a str,
    pub version: &'a VersionId,
    pub bypass: Bypass,
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Attempts used, the successful one included.
    pub attempts: u32,
    pub record: ManifestRecord,
    pub verdict: AncestryVerdict,
    /// Generations whose conditional write lost a race, in order.
    pub conflicts: Vec<Generation>,
}

pub struct ManifestPublisher<'a> {
    store: &'a dyn ObjectStore,
    history: &'a dyn VersionControl,
    validator: &'a AncestryValidator,
    max_attempts: u32,
    clock: fn() -> DateTime<Utc>,
}

impl<'a> ManifestPublisher<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        history: &'a dyn VersionControl,
        validator: &'a AncestryValidator,
    ) -> Self {
        Self {
            store,
            history,
            validator,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            clock: Utc::now,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish `request.version` as the pipeline's default version.
    ///
    /// Ancestry failures abort immediately. Precondition failures retry from
    /// a fresh read; exhausting the bound is [`DeployError::ManifestContention`].
    pub fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReport> {
        let path = request.manifest_uri;
        let mut conflicts = Vec::new();

        for attempt in 1..=self.max_attempts {
            let (current, generation) = match self.store.read(path)? {
                Some(object) => (ManifestRecord::parse(path, &object.content)?, object.generation),
                None => (ManifestRecord::default(), Generation::absent()),
            };

            let verdict = self.validator.validate(
                self.history,
                request.env,
                current.default_version.as_ref(),
                request.version,
                request.bypass,
            )?;

            let record = current.succeed(request.version, &generation, (self.clock)().to_rfc3339());
            let content = record.to_yaml(path)?;

            tracing::info!(
                path,
                attempt,
                generation = %generation,
                "attempting to update manifest"
            );
            match self.store.write(
                path,
                content.as_bytes(),
                WritePrecondition::IfGenerationMatch(generation.clone()),
            )? {
                WriteResult::Written => {
                    tracing::info!(path, version = %request.version, attempt, "manifest updated");
                    return Ok(PublishReport {
                        attempts: attempt,
                        record,
                        verdict,
                        conflicts,
                    });
                }
                WriteResult::PreconditionFailed => {
                    tracing::warn!(
                        path,
                        generation = %generation,
                        attempt,
                        max_attempts = self.max_attempts,
                        "manifest changed since read, retrying"
                    );
                    conflicts.push(generation);
                }
            }
        }

        Err(DeployError::ManifestContention {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }
}
