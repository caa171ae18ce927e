use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult};
use crate::jobs::ProgressSink;
use crate::models::{AppSummary, DeploymentResult, Environment};
use crate::pipeline::DeployContext;
use crate::telemetry::PIPELINE_RUNS;
use crate::AppState;

use super::{validate_account_id, validate_region};

/// List generated applications, newest first.
#[utoipa::path(get, path = "/apps", responses( (status = 200, body = [AppSummary]) ))]
#[tracing::instrument(level = "debug", skip(state))]
pub async fn list_apps(State(state): State<AppState>) -> ApiResult<Json<Vec<AppSummary>>> {
    Ok(Json(state.manifests.list()?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishRequest {
    pub account_id: String,
    pub region: String,
    pub app_id: String,
    #[serde(default)]
    pub confirm: bool,
}

/// Synchronous production deploy using the existing manifest's specification.
#[utoipa::path(post, path = "/publish", request_body = PublishRequest,
    responses( (status = 200, body = DeploymentResult), (status = 404, description = "app not found"), (status = 409, description = "a run is already active") ))]
#[tracing::instrument(level = "info", skip(state, req), fields(app_id = %req.app_id))]
pub async fn publish(State(state): State<AppState>, Json(req): Json<PublishRequest>) -> ApiResult<Json<DeploymentResult>> {
    if !req.confirm {
        return Err(ApiError::bad_request("production publish requires confirm:true"));
    }
    validate_account_id(&req.account_id)?;
    validate_region(&req.region)?;
    let manifest = state
        .manifests
        .get(&req.app_id)?
        .ok_or_else(|| ApiError::not_found("application not found"))?;
    let environment = Environment::Prod;
    let Some(_guard) = state.locks.try_acquire(&manifest.app_id, environment) else {
        return Err(ApiError::conflict("a pipeline run is already active for this application and environment"));
    };
    let credentials = state
        .broker
        .assume(
            &req.account_id,
            &req.region,
            &state.settings.deploy_role_name,
            &state.tenant.external_id,
            &format!("vela-publish-{}", manifest.app_name),
        )
        .await?;
    let ctx = DeployContext {
        project_root: state.settings.workspace_root.join(&manifest.app_id),
        stack_name: format!("{}-{environment}", manifest.app_name),
        account_id: req.account_id.clone(),
        region: req.region.clone(),
        environment,
        credentials,
    };
    let sink = ProgressSink::logging();
    match state.pipeline.deploy(&ctx, &sink).await {
        Ok(result) => {
            PIPELINE_RUNS.with_label_values(&["publish", "completed"]).inc();
            state.manifests.update_deployment(&manifest.app_id, environment, result.clone())?;
            info!(event = "publish.done", app_id = %manifest.app_id, url = %result.app_url);
            Ok(Json(result))
        }
        Err(err) => {
            PIPELINE_RUNS.with_label_values(&["publish", "failed"]).inc();
            let failed = DeploymentResult::failed(&ctx.stack_name, environment, &err);
            if let Err(store_err) = state.manifests.update_deployment(&manifest.app_id, environment, failed) {
                error!(event = "manifest.update_failed", app_id = %manifest.app_id, error = %store_err);
            }
            Err(ApiError::from(err))
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DestroyRequest {
    pub account_id: String,
    pub region: String,
    pub app_id: String,
    pub env: Environment,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Serialize, ToSchema)]
pub struct DestroyResponse {
    pub ok: bool,
    pub app_id: String,
    pub env: Environment,
}

/// Synchronous teardown of one environment. Refuses before any subprocess
/// when the manifest has no deployment recorded for the environment.
#[utoipa::path(post, path = "/destroy", request_body = DestroyRequest,
    responses( (status = 200, body = DestroyResponse), (status = 404, description = "app or environment not found"), (status = 409, description = "a run is already active") ))]
#[tracing::instrument(level = "info", skip(state, req), fields(app_id = %req.app_id, env = %req.env))]
pub async fn destroy(State(state): State<AppState>, Json(req): Json<DestroyRequest>) -> ApiResult<Json<DestroyResponse>> {
    if !req.confirm {
        return Err(ApiError::bad_request("destroy requires confirm:true"));
    }
    validate_account_id(&req.account_id)?;
    validate_region(&req.region)?;
    let manifest = state
        .manifests
        .get(&req.app_id)?
        .ok_or_else(|| ApiError::not_found("application not found"))?;
    let Some(recorded) = manifest.deployments.get(&req.env) else {
        return Err(ApiError::not_found(format!("no deployment recorded for environment {}", req.env)));
    };
    let Some(_guard) = state.locks.try_acquire(&manifest.app_id, req.env) else {
        return Err(ApiError::conflict("a pipeline run is already active for this application and environment"));
    };
    let credentials = state
        .broker
        .assume(
            &req.account_id,
            &req.region,
            &state.settings.deploy_role_name,
            &state.tenant.external_id,
            &format!("vela-destroy-{}", manifest.app_name),
        )
        .await?;
    let ctx = DeployContext {
        project_root: state.settings.workspace_root.join(&manifest.app_id),
        stack_name: recorded.stack_name.clone(),
        account_id: req.account_id.clone(),
        region: req.region.clone(),
        environment: req.env,
        credentials,
    };
    let sink = ProgressSink::logging();
    match state.pipeline.destroy(&ctx, &sink).await {
        Ok(()) => {
            PIPELINE_RUNS.with_label_values(&["destroy", "completed"]).inc();
            state.manifests.remove_environment(&req.app_id, req.env)?;
            info!(event = "destroy.done", app_id = %req.app_id, env = %req.env);
            Ok(Json(DestroyResponse { ok: true, app_id: req.app_id.clone(), env: req.env }))
        }
        Err(err) => {
            PIPELINE_RUNS.with_label_values(&["destroy", "failed"]).inc();
            Err(ApiError::from(err))
        }
    }
}
