//! Pipeline definition loading and `${name}` substitution.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{DeployError, Result};
use crate::model::EnvironmentModel;

/// A pipeline definition with every placeholder resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPipeline {
    document: Value,
}

impl ResolvedPipeline {
    /// Load and resolve a pipeline file for one environment.
    pub fn load(path: &Path, env_name: &str, env: &EnvironmentModel) -> Result<Self> {
        if !path.exists() {
            return Err(DeployError::BadFile(format!(
                "pipeline definition not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::BadFile(format!("error reading {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content, &variables_for(env_name, env))
    }

    pub fn from_yaml_str(content: &str, variables: &BTreeMap<String, Value>) -> Result<Self> {
        let document: Value = serde_yaml::from_str(content)
            .map_err(|e| DeployError::Config(format!("failed to parse pipeline definition: {e}")))?;
        if !document.is_object() {
            return Err(DeployError::Config(
                "pipeline definition must be a mapping".to_string(),
            ));
        }
        let pipeline = Self {
            document: substitute(document, variables)?,
        };
        pipeline.pipeline_id()?;
        Ok(pipeline)
    }

    pub fn pipeline_id(&self) -> Result<&str> {
        self.document
            .get("pipelineId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DeployError::Config("pipeline definition has no pipelineId".to_string()))
    }

    pub fn defaults(&self) -> Map<String, Value> {
        self.document
            .get("defaults")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn actions(&self) -> &[Value] {
        self.document
            .get("actions")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn actions_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.document.get_mut("actions").and_then(Value::as_array_mut)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.document)
            .map_err(|e| DeployError::Config(format!("failed to render pipeline definition: {e}")))
    }
}

/// Substitution variables for an environment: the built-ins `project`,
/// `region` and `env`, overlaid by the environment's own `variables`.
pub fn variables_for(env_name: &str, env: &EnvironmentModel) -> BTreeMap<String, Value> {
    let mut vars = BTreeMap::new();
    vars.insert("project".to_string(), Value::String(env.project.clone()));
    vars.insert("region".to_string(), Value::String(env.region.clone()));
    vars.insert("env".to_string(), Value::String(env_name.to_string()));
    for (key, value) in &env.variables {
        vars.insert(key.clone(), value.clone());
    }
    vars
}

fn substitute(value: Value, vars: &BTreeMap<String, Value>) -> Result<Value> {
    Ok(match value {
        Value::String(s) => substitute_str(&s, vars)?,
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| substitute(item, vars))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| Ok((k, substitute(v, vars)?)))
                .collect::<Result<_>>()?,
        ),
        other => other,
    })
}

/// A string that is exactly one placeholder takes the variable's value with
/// its type; otherwise values are spliced in as text.
fn substitute_str(input: &str, vars: &BTreeMap<String, Value>) -> Result<Value> {
    if let Some(name) = input
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.contains(['$', '{', '}']))
    {
        return lookup(name.trim(), vars).cloned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            DeployError::Config(format!("unterminated placeholder in '{input}'"))
        })?;
        match lookup(after[..end].trim(), vars)? {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn lookup<'v>(name: &str, vars: &'v BTreeMap<String, Value>) -> Result<&'v Value> {
    vars.get(name)
        .ok_or_else(|| DeployError::Config(format!("undefined variable '${{{name}}}'")))
}
