//! Object store backed by the `gcloud storage` command group.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::StorageError;
use crate::exec::{CommandRunner, Invocation};

use super::{Generation, ObjectStore, StoredObject, WritePrecondition, WriteResult};

const NOT_FOUND_MARKERS: &[&str] = &["matched no objects", "No URLs matched", "NotFound"];
const PRECONDITION_MARKERS: &[&str] = &[
    "PreconditionFailed",
    "HTTPError 412",
    "pre-conditions you specified did not hold",
];

#[derive(Debug, Deserialize)]
struct ObjectDescription {
    #[serde(default)]
    generation: Option<serde_json::Value>,
}

pub struct GcloudStorage {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl GcloudStorage {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "gcloud".to_string(),
        }
    }

    /// Use a different executable name, e.g. a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn storage(&self) -> Invocation {
        Invocation::new(&self.program).arg("storage")
    }

    fn describe_generation(&self, uri: &str) -> Result<Option<Generation>, StorageError> {
        let inv = self
            .storage()
            .args(["objects", "describe", uri, "--format=json"]);
        let output = self.runner.run(&inv).map_err(|e| read_err(uri, e))?;
        if !output.success() {
            if is_not_found(&output.stderr) {
                return Ok(None);
            }
            return Err(read_err(uri, output.stderr.trim()));
        }

        let desc: ObjectDescription =
            serde_json::from_str(&output.stdout).map_err(|e| read_err(uri, e))?;
        let token = match desc.generation {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(read_err(uri, "object description carries no generation")),
        };
        Ok(Some(Generation::new(token)))
    }
}

impl ObjectStore for GcloudStorage {
    fn read(&self, uri: &str) -> Result<Option<StoredObject>, StorageError> {
        let Some(generation) = self.describe_generation(uri)? else {
            return Ok(None);
        };

        let inv = self.storage().args(["cat", uri]);
        let output = self.runner.run(&inv).map_err(|e| read_err(uri, e))?;
        if !output.success() {
            if is_not_found(&output.stderr) {
                return Ok(None);
            }
            return Err(read_err(uri, output.stderr.trim()));
        }

        Ok(Some(StoredObject {
            content: output.stdout.into_bytes(),
            generation,
        }))
    }

    fn write(
        &self,
        uri: &str,
        content: &[u8],
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StorageError> {
        let mut inv = self
            .storage()
            .args(["cp", "-", uri])
            .stdin(String::from_utf8_lossy(content).to_string());
        if let WritePrecondition::IfGenerationMatch(generation) = &precondition {
            inv = inv.arg(format!("--if-generation-match={generation}"));
        }

        let output = self.runner.run(&inv).map_err(|e| upload_err(uri, e))?;
        if output.success() {
            return Ok(WriteResult::Written);
        }
        if PRECONDITION_MARKERS
            .iter()
            .any(|m| output.stderr.contains(m))
        {
            tracing::debug!(path = uri, "conditional write lost the race");
            return Ok(WriteResult::PreconditionFailed);
        }
        Err(upload_err(uri, output.stderr.trim()))
    }

    fn exists(&self, prefix: &str) -> Result<bool, StorageError> {
        let inv = self.storage().args(["ls", prefix]);
        let output = self.runner.run(&inv).map_err(|e| read_err(prefix, e))?;
        if output.success() {
            return Ok(!output.stdout.trim().is_empty());
        }
        if is_not_found(&output.stderr) {
            return Ok(false);
        }
        Err(read_err(prefix, output.stderr.trim()))
    }

    fn upload_file(&self, local: &Path, dest: &str) -> Result<(), StorageError> {
        let inv = self
            .storage()
            .arg("cp")
            .arg(local.display().to_string())
            .arg(dest);
        run_upload(self.runner.as_ref(), &inv, dest)
    }

    fn upload_dir(&self, local: &Path, dest_prefix: &str) -> Result<(), StorageError> {
        let prefix = if dest_prefix.ends_with('/') {
            dest_prefix.to_string()
        } else {
            format!("{dest_prefix}/")
        };
        let entries = std::fs::read_dir(local).map_err(|e| upload_err(&prefix, e))?;
        let mut sources = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| upload_err(&prefix, e))?;
            sources.push(entry.path().display().to_string());
        }
        if sources.is_empty() {
            return Ok(());
        }
        sources.sort();

        let inv = self
            .storage()
            .args(["cp", "-r"])
            .args(sources)
            .arg(&prefix);
        run_upload(self.runner.as_ref(), &inv, &prefix)
    }
}

fn run_upload(runner: &dyn CommandRunner, inv: &Invocation, dest: &str) -> Result<(), StorageError> {
    let output = runner.run(inv).map_err(|e| upload_err(dest, e))?;
    if !output.success() {
        return Err(upload_err(dest, output.stderr.trim()));
    }
    Ok(())
}

fn is_not_found(stderr: &str) -> bool {
    NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m))
}

fn read_err(path: &str, message: impl ToString) -> StorageError {
    StorageError::Read {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn upload_err(path: &str, message: impl ToString) -> StorageError {
    StorageError::Upload {
        path: path.to_string(),
        message: message.to_string(),
    }
}
