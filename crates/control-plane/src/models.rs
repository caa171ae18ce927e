use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::error::EngineError;

/// Deployment topology selected at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Blueprint {
    /// Request/response functions plus a managed NoSQL table.
    Serverless,
    /// Long-running containers plus a relational database.
    Container,
}

impl Blueprint {
    pub fn as_str(self) -> &'static str {
        match self {
            Blueprint::Serverless => "serverless",
            Blueprint::Container => "container",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Structured application specification returned by the generation gateway
/// and recorded verbatim in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AppSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub blueprint: Blueprint,
    /// Blueprint-specific knobs, passed through to the generated infra app.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub contents: String,
}

/// What the generation gateway hands back: the spec plus the source tree to
/// materialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedApp {
    pub spec: AppSpec,
    pub files: Vec<GeneratedFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Success,
    Failed,
}

/// Outcome of one pipeline run. Immutable once written; the next run for the
/// same environment replaces it wholesale, partial results are never merged.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeploymentResult {
    pub stack_name: String,
    pub environment: Environment,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub app_url: String,
    #[serde(default)]
    pub api_url: String,
    pub status: DeployStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentResult {
    pub fn failed(stack_name: &str, environment: Environment, error: &EngineError) -> Self {
        Self {
            stack_name: stack_name.to_owned(),
            environment,
            outputs: BTreeMap::new(),
            app_url: String::new(),
            api_url: String::new(),
            status: DeployStatus::Failed,
            error: Some(error.classed_message()),
            finished_at: Utc::now(),
        }
    }
}

/// Persisted record of one generated application. The record survives even
/// when every environment entry has been destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    pub app_id: String,
    pub app_name: String,
    pub blueprint: Blueprint,
    pub spec: AppSpec,
    pub account_id: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deployments: BTreeMap<Environment, DeploymentResult>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AppSummary {
    pub app_id: String,
    pub app_name: String,
    pub blueprint: Blueprint,
    pub account_id: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub environments: Vec<Environment>,
}

impl From<&AppManifest> for AppSummary {
    fn from(m: &AppManifest) -> Self {
        Self {
            app_id: m.app_id.clone(),
            app_name: m.app_name.clone(),
            blueprint: m.blueprint,
            account_id: m.account_id.clone(),
            region: m.region.clone(),
            created_at: m.created_at,
            updated_at: m.updated_at,
            environments: m.deployments.keys().copied().collect(),
        }
    }
}
