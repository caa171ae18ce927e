pub mod config;
pub mod credentials;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod jobs;
pub mod locks;
pub mod manifest;
pub mod materialize;
pub mod models;
pub mod pipeline;
pub mod telemetry;
pub mod tenant;
pub mod test_support;

use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use utoipa::OpenApi;

use config::Settings;
use credentials::CredentialBroker;
use generation::GenerationGateway;
use jobs::JobRegistry;
use locks::RunLocks;
use manifest::ManifestStore;
use pipeline::Pipeline;
use tenant::TenantConfig;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tenant: Arc<TenantConfig>,
    pub broker: Arc<dyn CredentialBroker>,
    pub gateway: Arc<dyn GenerationGateway>,
    pub jobs: JobRegistry,
    pub manifests: ManifestStore,
    pub locks: RunLocks,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        tenant: TenantConfig,
        broker: Arc<dyn CredentialBroker>,
        gateway: Arc<dyn GenerationGateway>,
        pipeline: Pipeline,
    ) -> anyhow::Result<Self> {
        let manifests = ManifestStore::open(&settings.data_root)?;
        let jobs = JobRegistry::new(settings.job_retention);
        Ok(Self {
            settings: Arc::new(settings),
            tenant: Arc::new(tenant),
            broker,
            gateway,
            jobs,
            manifests,
            locks: RunLocks::default(),
            pipeline: Arc::new(pipeline),
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::setup::init,
        handlers::setup::connect_url,
        handlers::setup::check,
        handlers::generate::generate,
        handlers::generate::generate_status,
        handlers::apps::list_apps,
        handlers::apps::publish,
        handlers::apps::destroy,
    ),
    components(schemas(error::ApiErrorBody)),
    tags( (name = "vela", description = "Vela Control Plane API") )
)]
pub struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let openapi = ApiDoc::openapi();
    // reclaim terminal jobs past their retention window
    state.jobs.spawn_sweeper();
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(telemetry::metrics_handler))
        .route("/init", get(handlers::setup::init))
        .route("/connect-url", get(handlers::setup::connect_url))
        .route("/check", post(handlers::setup::check))
        .route("/generate", post(handlers::generate::generate))
        .route("/generate-status/{job_id}", get(handlers::generate::generate_status))
        .route("/apps", get(handlers::apps::list_apps))
        .route("/publish", post(handlers::apps::publish))
        .route("/destroy", post(handlers::apps::destroy))
        .route("/openapi.json", get(move || async move { axum::Json(openapi.clone()) }))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Request, StatusCode}};
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn health_ok() {
        let dir = tempdir().unwrap();
        let app = build_router(test_support::test_state(dir.path()));
        let res = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v, serde_json::json!({"status":"ok"}));
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let dir = tempdir().unwrap();
        let app = build_router(test_support::test_state(dir.path()));
        let res = app.oneshot(Request::builder().uri("/openapi.json").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["paths"]["/generate"].is_object());
        assert!(v["paths"]["/destroy"].is_object());
    }
}
