//! HTTP client for the external text-completion service.

use std::time::Duration;

use anyhow::Context as _;
use reqwest::Client;
use tally_core::translate::{CompletionError, CompletionRequest, CompletionResponse, TextCompletion};

use crate::settings::CompletionSettings;

/// Posts `{"prompt": ...}` as JSON and expects `{"text": ...}` back.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpCompletion {
  client:   Client,
  endpoint: String,
  api_key:  Option<String>,
}

impl HttpCompletion {
  pub fn new(settings: &CompletionSettings) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self {
      client,
      endpoint: settings.endpoint.clone(),
      api_key: settings.api_key.clone(),
    })
  }
}

impl TextCompletion for HttpCompletion {
  async fn complete(
    &self,
    request: CompletionRequest,
  ) -> Result<CompletionResponse, CompletionError> {
    let mut req = self.client.post(&self.endpoint).json(&request);
    if let Some(key) = &self.api_key {
      req = req.bearer_auth(key);
    }

    let resp = req
      .send()
      .await
      .map_err(|e| CompletionError(format!("POST {} failed: {e}", self.endpoint)))?;
    if !resp.status().is_success() {
      return Err(CompletionError(format!("POST {} → {}", self.endpoint, resp.status())));
    }
    resp
      .json()
      .await
      .map_err(|e| CompletionError(format!("deserialising completion: {e}")))
  }
}

/// The configured service, or none at all.
pub enum Completion {
  Http(HttpCompletion),
  Disabled,
}

impl Completion {
  pub fn from_settings(settings: Option<&CompletionSettings>) -> anyhow::Result<Self> {
    match settings {
      Some(settings) => Ok(Self::Http(HttpCompletion::new(settings)?)),
      None => {
        tracing::info!("no completion endpoint configured; using built-in fallbacks");
        Ok(Self::Disabled)
      }
    }
  }
}

impl TextCompletion for Completion {
  async fn complete(
    &self,
    request: CompletionRequest,
  ) -> Result<CompletionResponse, CompletionError> {
    match self {
      Self::Http(client) => client.complete(request).await,
      Self::Disabled => Err(CompletionError("no completion endpoint configured".into())),
    }
  }
}
