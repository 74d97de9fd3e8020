//! Blocking REST client for Google Cloud APIs.

use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use url::Url;

use crate::error::ProviderError;
use crate::exec::{CommandRunner, Invocation, check_output};

use super::{ApiEndpoint, ApiMethod, HttpVerb, ProviderRequest, ResourceClient};

pub struct RestClient {
    http: Client,
    runner: Arc<dyn CommandRunner>,
    token: Mutex<Option<String>>,
    base_url: Option<String>,
}

impl RestClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(concat!("declpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            runner,
            token: Mutex::new(None),
            base_url: None,
        })
    }

    /// Send every call to `base_url` instead of `<api>.googleapis.com`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn url(&self, endpoint: ApiEndpoint, path: &str) -> Result<Url, ProviderError> {
        let base = match &self.base_url {
            Some(base) => format!("{}/{}/", base.trim_end_matches('/'), endpoint.version),
            None => endpoint.base_url(),
        };
        Url::parse(&base)
            .and_then(|base| base.join(path.trim_start_matches('/')))
            .map_err(|e| ProviderError::Transport(format!("invalid request url for {path}: {e}")))
    }

    fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| ProviderError::Transport("token cache poisoned".to_string()))?;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = check_output(
            self.runner.as_ref(),
            &Invocation::new("gcloud").args(["auth", "print-access-token"]),
        )
        .map_err(|e| ProviderError::Transport(format!("failed to obtain access token: {e}")))?;
        *cached = Some(token.clone());
        Ok(token)
    }

    fn send(&self, label: &str, builder: RequestBuilder) -> Result<Response, ProviderError> {
        let token = self.access_token()?;
        builder
            .bearer_auth(token)
            .send()
            .map_err(|e| ProviderError::Transport(format!("{label}: {e}")))
    }

    fn read_json(label: &str, response: Response) -> Result<Value, ProviderError> {
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| ProviderError::Transport(format!("{label}: {e}")))?;

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(label.to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Http {
                method: label.to_string(),
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(format!("{label}: {e}")))
    }
}

/// Extract `error.message` from a Google API error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl ResourceClient for RestClient {
    fn get(&self, endpoint: ApiEndpoint, name: &str) -> Result<Option<Value>, ProviderError> {
        let url = self.url(endpoint, name)?;
        let label = format!("GET {url}");
        tracing::debug!(%url, "provider get");
        match Self::read_json(&label, self.send(&label, self.http.get(url.clone()))?) {
            Ok(value) => Ok(Some(value)),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(
        &self,
        endpoint: ApiEndpoint,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Value>, ProviderError> {
        let url = self.url(endpoint, collection)?;
        let label = format!("GET {url}");
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut builder = self.http.get(url.clone());
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let page = Self::read_json(&label, self.send(&label, builder)?)?;
            if let Some(Value::Array(batch)) = page.get(field) {
                items.extend(batch.iter().cloned());
            }
            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        tracing::debug!(%url, count = items.len(), "provider list");
        Ok(items)
    }

    fn invoke(&self, method: &ApiMethod, request: &ProviderRequest) -> Result<Value, ProviderError> {
        let url = self.url(method.endpoint, &request.path)?;
        let label = format!("{method}");
        let builder = match method.verb {
            HttpVerb::Get => self.http.get(url.clone()),
            HttpVerb::Post => self.http.post(url.clone()).json(&request.body),
            HttpVerb::Patch => self.http.patch(url.clone()).json(&request.body),
        };
        tracing::debug!(
            method = %method,
            verb = method.verb.as_str(),
            %url,
            query = ?request.query,
            "provider call"
        );
        Self::read_json(&label, self.send(&label, builder.query(&request.query))?)
    }
}
