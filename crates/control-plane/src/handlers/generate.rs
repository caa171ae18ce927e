use axum::{extract::{Path, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, EngineError};
use crate::jobs::{JobStatus, ProgressSink};
use crate::materialize;
use crate::models::{Blueprint, DeploymentResult, Environment};
use crate::pipeline::DeployContext;
use crate::telemetry::PIPELINE_RUNS;
use crate::AppState;

use super::{validate_account_id, validate_app_name, validate_region};

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateRequest {
    pub account_id: String,
    pub region: String,
    pub blueprint: Blueprint,
    pub prompt: String,
    pub app_name: String,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateAccepted {
    pub job_id: String,
    pub status: &'static str,
}

/// Accept a generation request and return a pollable job id immediately. The
/// pipeline itself runs minutes; clients follow it via /generate-status.
#[utoipa::path(post, path = "/generate", request_body = GenerateRequest,
    responses( (status = 202, body = GenerateAccepted), (status = 400, description = "invalid input") ))]
#[tracing::instrument(level = "info", skip(state, req), fields(app = %req.app_name, blueprint = ?req.blueprint))]
pub async fn generate(State(state): State<AppState>, Json(req): Json<GenerateRequest>) -> ApiResult<(StatusCode, Json<GenerateAccepted>)> {
    validate_account_id(&req.account_id)?;
    validate_region(&req.region)?;
    validate_app_name(&req.app_name)?;
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let job_id = Uuid::new_v4().to_string();
    state.jobs.create(&job_id);
    info!(job_id = %job_id, "generation accepted");
    let task_state = state.clone();
    let task_job = job_id.clone();
    tokio::spawn(async move {
        run_generation(task_state, task_job, req).await;
    });
    Ok((StatusCode::ACCEPTED, Json(GenerateAccepted { job_id, status: "in_progress" })))
}

async fn run_generation(state: AppState, job_id: String, req: GenerateRequest) {
    let sink = state.jobs.attach(&job_id);
    match drive_generation(&state, &sink, &req).await {
        Ok(result) => {
            PIPELINE_RUNS.with_label_values(&["generate", "completed"]).inc();
            sink.completed(result);
        }
        Err(err) => {
            PIPELINE_RUNS.with_label_values(&["generate", "failed"]).inc();
            error!(event = "generate.failed", job_id = %job_id, code = err.code(), error = %err);
            sink.failed(err.classed_message());
        }
    }
}

/// The full generation flow: exchange credentials, call the gateway,
/// materialize the repository, then hand the tree to the pipeline. A
/// credential failure aborts before any manifest exists.
async fn drive_generation(state: &AppState, sink: &ProgressSink, req: &GenerateRequest) -> Result<DeploymentResult, EngineError> {
    sink.emit("credentials", format!("assuming deploy role in account {}", req.account_id), false);
    let credentials = state
        .broker
        .assume(
            &req.account_id,
            &req.region,
            &state.settings.deploy_role_name,
            &state.tenant.external_id,
            &format!("vela-generate-{}", req.app_name),
        )
        .await?;
    sink.emit("credentials", "deploy role assumed", true);

    sink.emit("generation", "generating application specification and sources", false);
    let generated = state.gateway.generate(&req.prompt, req.blueprint, &req.app_name).await?;
    sink.emit("generation", "application generated", true);

    sink.emit("materialize", "rendering project repository", false);
    let manifest = state.manifests.create(&req.app_name, req.blueprint, generated.spec.clone(), &req.account_id, &req.region)?;
    let project_root = materialize::materialize(&state.settings.workspace_root, &manifest.app_id, &generated).await?;
    sink.emit("materialize", "repository ready", true);

    let environment = Environment::Dev;
    let Some(_guard) = state.locks.try_acquire(&manifest.app_id, environment) else {
        return Err(EngineError::Validation(format!(
            "a pipeline run is already active for {} {environment}",
            manifest.app_id
        )));
    };
    let ctx = DeployContext {
        project_root,
        stack_name: format!("{}-{environment}", req.app_name),
        account_id: req.account_id.clone(),
        region: req.region.clone(),
        environment,
        credentials,
    };
    match state.pipeline.deploy(&ctx, sink).await {
        Ok(result) => {
            state.manifests.update_deployment(&manifest.app_id, environment, result.clone())?;
            Ok(result)
        }
        Err(err) => {
            let failed = DeploymentResult::failed(&ctx.stack_name, environment, &err);
            if let Err(store_err) = state.manifests.update_deployment(&manifest.app_id, environment, failed) {
                error!(event = "manifest.update_failed", app_id = %manifest.app_id, error = %store_err);
            }
            Err(err)
        }
    }
}

/// Poll a generation job. A reclaimed or never-created id is a plain 404;
/// callers treat that as "unknown, assume lost" rather than failure.
#[utoipa::path(get, path = "/generate-status/{job_id}",
    params( ("job_id" = String, Path, description = "Job identifier returned by /generate") ),
    responses( (status = 200, body = JobStatus), (status = 404, description = "unknown or reclaimed job") ))]
pub async fn generate_status(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<JobStatus>> {
    match state.jobs.get(&job_id) {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::not_found("unknown job")),
    }
}
