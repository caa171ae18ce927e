use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::info;

use crate::error::EngineError;
use crate::models::{Blueprint, GeneratedApp};

/// Boundary to the service that turns a prompt into an application
/// specification plus generated sources. A trait seam so tests (and future
/// providers) can substitute the transport.
#[async_trait]
pub trait GenerationGateway: Send + Sync + 'static {
    async fn generate(
        &self,
        prompt: &str,
        blueprint: Blueprint,
        app_name: &str,
    ) -> Result<GeneratedApp, EngineError>;
}

#[derive(Debug, Clone)]
pub struct HttpGenerationGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGenerationGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    blueprint: Blueprint,
    app_name: &'a str,
}

#[async_trait]
impl GenerationGateway for HttpGenerationGateway {
    async fn generate(
        &self,
        prompt: &str,
        blueprint: Blueprint,
        app_name: &str,
    ) -> Result<GeneratedApp, EngineError> {
        let url = format!("{}/v1/generate", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&GenerateBody { prompt, blueprint, app_name })
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("generation request failed: {e}")))?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                // not retried: access does not come back on its own
                return Err(EngineError::GenerationAccess(
                    "generation service denied access; verify the service token and plan limits, then retry the request".into(),
                ));
            }
            status if !status.is_success() => {
                return Err(EngineError::Internal(format!("generation service returned {status}")));
            }
            _ => {}
        }
        let generated: GeneratedApp = response
            .json()
            .await
            .map_err(|e| EngineError::Internal(format!("invalid generation response: {e}")))?;
        info!(event = "generation.received", app = %app_name, files = generated.files.len());
        Ok(generated)
    }
}
