//! Remote resource provider contract.
//!
//! Handlers describe calls as an [`ApiMethod`] plus a [`ProviderRequest`];
//! a [`ResourceClient`] executes them. Paths are relative to the API's
//! versioned root, e.g. `projects/p/locations/r/repositories`.

pub mod rest;

use std::fmt;

use serde_json::Value;

use crate::error::ProviderError;

pub use rest::RestClient;

/// A versioned Google API surface, e.g. `dataform/v1beta1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiEndpoint {
    pub api: &'static str,
    pub version: &'static str,
}

impl ApiEndpoint {
    pub const fn new(api: &'static str, version: &'static str) -> Self {
        Self { api, version }
    }

    /// `https://<api>.googleapis.com/<version>/`
    pub fn base_url(&self) -> String {
        format!("https://{}.googleapis.com/{}/", self.api, self.version)
    }
}

impl fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVerb {
    Get,
    Post,
    Patch,
}

impl HttpVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Patch => "PATCH",
        }
    }
}

/// A provider call, e.g. `projects.locations.repositories.create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiMethod {
    pub endpoint: ApiEndpoint,
    pub verb: HttpVerb,
    pub name: &'static str,
}

impl ApiMethod {
    pub const fn new(endpoint: ApiEndpoint, verb: HttpVerb, name: &'static str) -> Self {
        Self {
            endpoint,
            verb,
            name,
        }
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.endpoint.api, self.name)
    }
}

/// Arguments of a create or patch call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Value,
}

impl ProviderRequest {
    pub fn new(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a query parameter only when a value is present.
    pub fn query_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Paths of the `updateMask` parameter, if set.
    pub fn update_mask(&self) -> Vec<&str> {
        self.query_value("updateMask")
            .map(|mask| mask.split(',').filter(|p| !p.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Executes provider calls.
pub trait ResourceClient: Send + Sync {
    /// Fetch a resource or operation by full name. A missing resource is
    /// `Ok(None)`, not an error.
    fn get(&self, endpoint: ApiEndpoint, name: &str) -> Result<Option<Value>, ProviderError>;

    /// List every item of a collection, following page tokens. `field` names
    /// the response array, e.g. `transferConfigs`.
    fn list(
        &self,
        endpoint: ApiEndpoint,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Value>, ProviderError>;

    /// Issue a create or update call and return the response body.
    fn invoke(&self, method: &ApiMethod, request: &ProviderRequest) -> Result<Value, ProviderError>;
}
