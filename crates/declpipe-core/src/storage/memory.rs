//! In-memory object store.
//!
//! Generations are numbered from a store-wide counter, like GCS generations,
//! so a rewritten object never reuses an earlier token.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;

use super::{Generation, ObjectStore, StoredObject, WritePrecondition, WriteResult};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, (Vec<u8>, u64)>,
    next_generation: u64,
    writes: Vec<String>,
}

impl Inner {
    fn insert(&mut self, uri: &str, content: Vec<u8>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.objects.insert(uri.to_string(), (content, generation));
        self.writes.push(uri.to_string());
    }
}

/// Thread-safe in-memory [`ObjectStore`]. Not suitable for production.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, uri: &str) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Read {
            path: uri.to_string(),
            message: "lock poisoned".to_string(),
        })
    }

    /// Current generation of an object, if present.
    pub fn generation(&self, uri: &str) -> Option<Generation> {
        let inner = self.inner.lock().ok()?;
        inner
            .objects
            .get(uri)
            .map(|(_, g)| Generation::new(g.to_string()))
    }

    /// Content of an object as UTF-8 text, if present.
    pub fn read_string(&self, uri: &str) -> Option<String> {
        let inner = self.inner.lock().ok()?;
        inner
            .objects
            .get(uri)
            .map(|(data, _)| String::from_utf8_lossy(data).to_string())
    }

    /// Number of successful writes to an exact uri.
    pub fn write_count(&self, uri: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.writes.iter().filter(|w| w.as_str() == uri).count())
            .unwrap_or(0)
    }

    /// All object uris, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn store(&self, uri: &str, content: Vec<u8>) -> Result<(), StorageError> {
        let mut inner = self.lock(uri)?;
        inner.insert(uri, content);
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn read(&self, uri: &str) -> Result<Option<StoredObject>, StorageError> {
        let inner = self.lock(uri)?;
        Ok(inner.objects.get(uri).map(|(data, generation)| StoredObject {
            content: data.clone(),
            generation: Generation::new(generation.to_string()),
        }))
    }

    fn write(
        &self,
        uri: &str,
        content: &[u8],
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StorageError> {
        let mut inner = self.lock(uri)?;
        if let WritePrecondition::IfGenerationMatch(expected) = &precondition {
            let current = inner
                .objects
                .get(uri)
                .map(|(_, g)| g.to_string())
                .unwrap_or_else(|| Generation::absent().to_string());
            if current != expected.as_str() {
                return Ok(WriteResult::PreconditionFailed);
            }
        }
        inner.insert(uri, content.to_vec());
        Ok(WriteResult::Written)
    }

    fn exists(&self, prefix: &str) -> Result<bool, StorageError> {
        let inner = self.lock(prefix)?;
        Ok(inner.objects.keys().any(|k| k.starts_with(prefix)))
    }

    fn upload_file(&self, local: &Path, dest: &str) -> Result<(), StorageError> {
        let content = std::fs::read(local).map_err(|e| StorageError::Upload {
            path: dest.to_string(),
            message: format!("failed to read {}: {e}", local.display()),
        })?;
        self.store(dest, content)
    }

    fn upload_dir(&self, local: &Path, dest_prefix: &str) -> Result<(), StorageError> {
        let prefix = if dest_prefix.ends_with('/') {
            dest_prefix.to_string()
        } else {
            format!("{dest_prefix}/")
        };
        let entries = std::fs::read_dir(local).map_err(|e| StorageError::Upload {
            path: prefix.clone(),
            message: format!("failed to read {}: {e}", local.display()),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::Upload {
                path: prefix.clone(),
                message: e.to_string(),
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            if path.is_dir() {
                self.upload_dir(&path, &format!("{prefix}{name}/"))?;
            } else {
                self.upload_file(&path, &format!("{prefix}{name}"))?;
            }
        }
        Ok(())
    }
}
