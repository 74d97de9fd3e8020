//! Maps resource `type` strings to handler constructors.

use crate::error::{DeployError, Result};
use crate::model::{
    DATAFORM_RELEASE_CONFIG, DATAFORM_REPOSITORY, DATAFORM_WORKFLOW_CONFIG, DATAPROC_CLUSTER,
    EnvironmentModel, ResourceDeclaration, TRANSFER_CONFIG,
};

use super::{DataformHandler, DataprocClusterHandler, ResourceHandler, TransferConfigHandler};

pub type HandlerConstructor =
    fn(&ResourceDeclaration, &EnvironmentModel) -> Result<Box<dyn ResourceHandler>>;

/// Registry of handler constructors keyed by declaration type.
pub struct HandlerRegistry {
    constructors: Vec<(String, HandlerConstructor)>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: Vec::new(),
        }
    }

    /// Create a registry with every built-in handler.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(DATAPROC_CLUSTER, |decl, env| {
            Ok(Box::new(DataprocClusterHandler::new(decl, env)?))
        });
        registry.register(TRANSFER_CONFIG, |decl, env| {
            Ok(Box::new(TransferConfigHandler::new(decl, env)?))
        });
        registry.register(DATAFORM_REPOSITORY, |decl, env| {
            Ok(Box::new(DataformHandler::repository(decl, env)?))
        });
        registry.register(DATAFORM_RELEASE_CONFIG, |decl, env| {
            Ok(Box::new(DataformHandler::release_config(decl, env)?))
        });
        registry.register(DATAFORM_WORKFLOW_CONFIG, |decl, env| {
            Ok(Box::new(DataformHandler::workflow_config(decl, env)?))
        });
        registry
    }

    /// Register a constructor, replacing any previous one for the type.
    pub fn register(&mut self, kind: impl Into<String>, constructor: HandlerConstructor) {
        let kind = kind.into();
        self.constructors.retain(|(k, _)| *k != kind);
        self.constructors.push((kind, constructor));
    }

    /// Registered type strings, in registration order.
    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.iter().any(|(k, _)| k == kind)
    }

    /// Build the handler for a declaration.
    pub fn handler_for(
        &self,
        decl: &ResourceDeclaration,
        env: &EnvironmentModel,
    ) -> Result<Box<dyn ResourceHandler>> {
        let (_, constructor) = self
            .constructors
            .iter()
            .find(|(k, _)| *k == decl.kind)
            .ok_or_else(|| DeployError::UnknownResourceType(decl.kind.clone()))?;
        constructor(decl, env)
    }
}
