//! Binary entrypoint for the Vela control plane.
use anyhow::Context;
use axum::{body::Body, http::Request, middleware::{self, Next}, response::Response};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::info;

use vela_control_plane::{
    build_router,
    config::Settings,
    credentials::StsBroker,
    generation::HttpGenerationGateway,
    pipeline::{Pipeline, StageTimeouts, ToolChain},
    telemetry::{normalize_path, HTTP_REQUESTS},
    tenant, AppState,
};

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
    let settings = Settings::from_env();
    std::fs::create_dir_all(&settings.data_root)
        .with_context(|| format!("create data root {}", settings.data_root.display()))?;
    std::fs::create_dir_all(&settings.workspace_root)
        .with_context(|| format!("create workspace root {}", settings.workspace_root.display()))?;
    let tenant = tenant::load_or_create(&settings.data_root)?;
    info!(tenant_id = %tenant.tenant_id, region = %settings.default_region, "tenant identity loaded");
    let gateway = Arc::new(HttpGenerationGateway::new(settings.generation_url.clone()));
    let pipeline = Pipeline::new(ToolChain::from_env(), StageTimeouts::default());
    let addr = settings.bind_addr;
    let state = AppState::new(settings, tenant, Arc::new(StsBroker), gateway, pipeline)?;
    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(track_metrics));
    info!(%addr, "control plane listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = async {
        tokio::signal::ctrl_c().await.expect("install ctrl_c");
        info!(target: "shutdown.signal", "received Ctrl+C");
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = normalize_path(req.uri().path());
    let resp = next.run(req).await;
    HTTP_REQUESTS
        .with_label_values(&[method.as_str(), path.as_str(), resp.status().as_str()])
        .inc();
    resp
}
