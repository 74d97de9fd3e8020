#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use git2::{IndexAddOption, Repository, Signature};
use serde_json::Value;

use declpipe_core::error::{CommandError, DeployError, ProviderError, StorageError};
use declpipe_core::exec::{CommandOutput, CommandRunner, Invocation};
use declpipe_core::provider::{ApiEndpoint, ApiMethod, HttpVerb, ProviderRequest, ResourceClient};
use declpipe_core::storage::{
    MemoryObjectStore, ObjectStore, StoredObject, WritePrecondition, WriteResult,
};
use declpipe_core::version::{VersionControl, VersionId};

/// One mutating call seen by [`RecordingProvider`].
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub verb: HttpVerb,
    pub request: ProviderRequest,
}

#[derive(Default)]
struct ProviderState {
    resources: BTreeMap<String, Value>,
    calls: Vec<Call>,
    gets: Vec<String>,
    next_id: u32,
}

/// In-memory provider that stores what is created and records every call.
#[derive(Clone, Default)]
pub struct RecordingProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, mut resource: Value) {
        if let Value::Object(map) = &mut resource {
            map.insert("name".to_string(), Value::String(name.to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(name.to_string(), resource);
    }

    pub fn resource(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().resources.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn gets(&self) -> Vec<String> {
        self.state.lock().unwrap().gets.clone()
    }

    pub fn reset_calls(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.clear();
        state.gets.clear();
    }
}

impl ResourceClient for RecordingProvider {
    fn get(&self, _endpoint: ApiEndpoint, name: &str) -> Result<Option<Value>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.gets.push(name.to_string());
        Ok(state.resources.get(name).cloned())
    }

    fn list(
        &self,
        _endpoint: ApiEndpoint,
        collection: &str,
        _field: &str,
    ) -> Result<Vec<Value>, ProviderError> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{collection}/");
        Ok(state
            .resources
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    fn invoke(&self, method: &ApiMethod, request: &ProviderRequest) -> Result<Value, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            method: method.name.to_string(),
            verb: method.verb,
            request: request.clone(),
        });

        let name = match method.verb {
            HttpVerb::Post => {
                let id = request
                    .query
                    .iter()
                    .find(|(key, _)| key.ends_with("Id"))
                    .map(|(_, value)| value.clone());
                let id = match id {
                    Some(id) => id,
                    None => {
                        state.next_id += 1;
                        format!("generated-{}", state.next_id)
                    }
                };
                format!("{}/{id}", request.path)
            }
            _ => request.path.clone(),
        };

        let mut resource = state
            .resources
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        if let (Value::Object(target), Value::Object(fields)) = (&mut resource, &request.body) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
            target.insert("name".to_string(), Value::String(name.clone()));
        }
        state.resources.insert(name, resource.clone());
        Ok(resource)
    }
}

/// Version control with a fixed commit graph given as child -> parent edges.
#[derive(Clone, Default)]
pub struct FixedHistory {
    head: String,
    parents: BTreeMap<String, String>,
    dirty: Vec<String>,
    checkouts: Arc<Mutex<Vec<(String, bool)>>>,
}

impl FixedHistory {
    /// A linear history; the last commit is HEAD.
    pub fn linear(commits: &[&str]) -> Self {
        let parents = commits
            .windows(2)
            .map(|pair| (pair[1].to_string(), pair[0].to_string()))
            .collect();
        Self {
            head: commits.last().copied().unwrap_or_default().to_string(),
            parents,
            ..Self::default()
        }
    }

    pub fn with_dirty(mut self, paths: &[&str]) -> Self {
        self.dirty = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn checkouts(&self) -> Vec<(String, bool)> {
        self.checkouts.lock().unwrap().clone()
    }

    fn known(&self) -> HashSet<&str> {
        self.parents
            .iter()
            .flat_map(|(child, parent)| [child.as_str(), parent.as_str()])
            .chain(std::iter::once(self.head.as_str()))
            .collect()
    }
}

impl VersionControl for FixedHistory {
    fn current_version(&self) -> declpipe_core::error::Result<VersionId> {
        Ok(VersionId::new(self.head.clone()))
    }

    fn known_locally(&self, revision: &str) -> declpipe_core::error::Result<bool> {
        Ok(self.known().contains(revision))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> declpipe_core::error::Result<bool> {
        let mut cursor = Some(descendant);
        while let Some(commit) = cursor {
            if commit == ancestor {
                return Ok(true);
            }
            cursor = self.parents.get(commit).map(String::as_str);
        }
        Ok(false)
    }

    fn dirty_paths(&self) -> declpipe_core::error::Result<Vec<String>> {
        Ok(self.dirty.clone())
    }

    fn checkout(&self, revision: &str, force: bool) -> declpipe_core::error::Result<()> {
        if !self.known().contains(revision) {
            return Err(DeployError::VersionControl(format!(
                "revision '{revision}' not found"
            )));
        }
        self.checkouts
            .lock()
            .unwrap()
            .push((revision.to_string(), force));
        Ok(())
    }
}

type ReadHook = Box<dyn Fn(&MemoryObjectStore, usize) + Send + Sync>;

/// Memory store shared with the test, with an optional hook that runs after
/// each read of one uri. The hook receives the 1-based read count and may
/// write to the store, simulating another deployer between read and write.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<MemoryObjectStore>,
    hook: Arc<Mutex<Option<(String, ReadHook)>>>,
    reads: Arc<Mutex<usize>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryObjectStore::new()),
            hook: Arc::new(Mutex::new(None)),
            reads: Arc::new(Mutex::new(0)),
        }
    }

    pub fn memory(&self) -> &MemoryObjectStore {
        &self.inner
    }

    pub fn after_read(&self, uri: &str, hook: impl Fn(&MemoryObjectStore, usize) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some((uri.to_string(), Box::new(hook)));
    }
}

impl ObjectStore for SharedStore {
    fn read(&self, uri: &str) -> Result<Option<StoredObject>, StorageError> {
        let result = self.inner.read(uri)?;
        let hook = self.hook.lock().unwrap();
        if let Some((hooked, hook)) = hook.as_ref()
            && hooked == uri
        {
            let mut reads = self.reads.lock().unwrap();
            *reads += 1;
            hook(&self.inner, *reads);
        }
        Ok(result)
    }

    fn write(
        &self,
        uri: &str,
        content: &[u8],
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StorageError> {
        self.inner.write(uri, content, precondition)
    }

    fn exists(&self, prefix: &str) -> Result<bool, StorageError> {
        self.inner.exists(prefix)
    }

    fn upload_file(&self, local: &Path, dest: &str) -> Result<(), StorageError> {
        self.inner.upload_file(local, dest)
    }

    fn upload_dir(&self, local: &Path, dest_prefix: &str) -> Result<(), StorageError> {
        self.inner.upload_dir(local, dest_prefix)
    }
}

/// Answers `gcloud composer environments describe` with a DAG prefix and
/// records every invocation. Anything else fails.
#[derive(Clone)]
pub struct ComposerRunner {
    dag_prefix: String,
    seen: Arc<Mutex<Vec<Invocation>>>,
}

impl ComposerRunner {
    pub fn new(dag_prefix: &str) -> Self {
        Self {
            dag_prefix: dag_prefix.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.seen.lock().unwrap().clone()
    }
}

impl CommandRunner for ComposerRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        self.seen.lock().unwrap().push(invocation.clone());
        if invocation.program == "gcloud"
            && invocation.args.starts_with(&[
                "composer".to_string(),
                "environments".to_string(),
                "describe".to_string(),
            ])
        {
            return Ok(CommandOutput {
                code: Some(0),
                stdout: format!("{}\n", self.dag_prefix),
                stderr: String::new(),
            });
        }
        Ok(CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: format!("unexpected command: {}", invocation.display()),
        })
    }
}

pub fn commit_all(repo: &Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("deployer", "deployer@example.com").unwrap();

    match repo.head() {
        Ok(head) => {
            let parent = repo.find_commit(head.target().unwrap()).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
                .unwrap()
        }
        Err(_) => repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
            .unwrap(),
    }
}

pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
