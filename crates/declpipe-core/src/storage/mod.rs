//! Object storage contract.
//!
//! The deploy flow needs exactly two things from object storage: plain
//! uploads for version-scoped artifacts, and conditional writes keyed on the
//! object's generation for the manifest pointer.
//!
//! Generations are opaque tokens. The token `"0"` stands for "object does not
//! exist", so a conditional write against `"0"` only succeeds when creating.

pub mod gcloud;
pub mod memory;

use std::fmt;
use std::path::Path;

use crate::error::StorageError;

pub use gcloud::GcloudStorage;
pub use memory::MemoryObjectStore;

/// Opaque identifier of an exact object revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation(String);

impl Generation {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token matching only a missing object.
    pub fn absent() -> Self {
        Self("0".to_string())
    }

    pub fn is_absent(&self) -> bool {
        self.0 == "0"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Precondition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the object's current generation equals the token.
    IfGenerationMatch(Generation),
    /// Write unconditionally.
    None,
}

/// Outcome of a write. A failed precondition is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written,
    PreconditionFailed,
}

/// An object's content together with the generation it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub generation: Generation,
}

/// Object storage operations used by the deploy flow.
pub trait ObjectStore: Send + Sync {
    /// Read an object. Returns `None` when the object does not exist.
    fn read(&self, uri: &str) -> Result<Option<StoredObject>, StorageError>;

    /// Write an object, honouring the precondition atomically.
    fn write(
        &self,
        uri: &str,
        content: &[u8],
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StorageError>;

    /// Whether any object exists under the prefix.
    fn exists(&self, prefix: &str) -> Result<bool, StorageError>;

    /// Upload a single local file to `dest`.
    fn upload_file(&self, local: &Path, dest: &str) -> Result<(), StorageError>;

    /// Upload the contents of a local directory under `dest_prefix`.
    fn upload_dir(&self, local: &Path, dest_prefix: &str) -> Result<(), StorageError>;
}

/// A parsed `gs://bucket/key` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    pub bucket: String,
    pub key: String,
}

impl ObjectUri {
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let parsed = url::Url::parse(uri).map_err(|e| StorageError::InvalidUri(format!("{uri}: {e}")))?;
        if parsed.scheme() != "gs" {
            return Err(StorageError::InvalidUri(format!(
                "{uri}: expected a gs:// uri"
            )));
        }
        let bucket = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StorageError::InvalidUri(format!("{uri}: missing bucket")))?
            .to_string();
        let key = parsed.path().trim_start_matches('/').to_string();
        Ok(Self { bucket, key })
    }

    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Append a relative path, inserting a separator when needed.
    pub fn join(&self, relative: &str) -> Self {
        let relative = relative.trim_start_matches('/');
        let key = if self.key.is_empty() || self.key.ends_with('/') {
            format!("{}{}", self.key, relative)
        } else {
            format!("{}/{}", self.key, relative)
        };
        Self::new(self.bucket.clone(), key)
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.key)
    }
}
