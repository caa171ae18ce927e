//! End-to-end generation scenarios: the asynchronous /generate flow driven
//! through the router with a stub gateway, stub credential broker, and a stub
//! deploy toolchain.

use axum::{body::Body, http::{Request, StatusCode}, Router};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tower::util::ServiceExt;

use vela_control_plane::build_router;
use vela_control_plane::config::Settings;
use vela_control_plane::models::{DeployStatus, Environment};
use vela_control_plane::pipeline::{Pipeline, StageTimeouts, ToolChain};
use vela_control_plane::test_support::{self, StaticBroker, StaticGateway};
use vela_control_plane::AppState;

fn generate_request(app_name: &str) -> Request<Body> {
    let body = serde_json::json!({
        "account_id": "123456789012",
        "region": "us-east-1",
        "blueprint": "serverless",
        "prompt": "a todo list app with sharing",
        "app_name": app_name,
    });
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn accept_job(app: &Router, req: Request<Body>) -> String {
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let v = body_json(res).await;
    assert_eq!(v["status"], "in_progress");
    v["job_id"].as_str().unwrap().to_owned()
}

async fn poll_until_terminal(app: &Router, job_id: &str) -> serde_json::Value {
    for _ in 0..400 {
        let res = app
            .clone()
            .oneshot(Request::builder().uri(format!("/generate-status/{job_id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let v = body_json(res).await;
        if v["status"] != "in_progress" {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not reach a terminal state in time");
}

fn step_positions(status: &serde_json::Value) -> Vec<String> {
    status["updates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["step"].as_str().unwrap().to_owned())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn all_stages_succeed_and_the_manifest_records_dev() {
    let dir = tempdir().unwrap();
    let state = test_support::test_state(dir.path());
    let app = build_router(state.clone());

    let job_id = accept_job(&app, generate_request("demo")).await;
    let status = poll_until_terminal(&app, &job_id).await;
    assert_eq!(status["status"], "completed", "job should complete: {status}");

    let result = &status["result"];
    assert_eq!(result["status"], "success");
    assert_eq!(result["environment"], "dev");
    assert_eq!(result["stack_name"], "demo-dev");
    let preview = result["app_url"].as_str().unwrap();
    assert!(!preview.is_empty(), "preview URL must be non-empty on success");

    // stage updates arrive in execution order
    let steps = step_positions(&status);
    let order = ["credentials", "generation", "materialize", "dependencies", "bootstrap", "build", "deploy", "outputs"];
    let mut last = 0;
    for step in order {
        let pos = steps.iter().position(|s| s == step).unwrap_or_else(|| panic!("missing step {step} in {steps:?}"));
        assert!(pos >= last, "step {step} out of order in {steps:?}");
        last = pos;
    }

    // the manifest's dev entry reflects the successful run
    let apps = state.manifests.list().unwrap();
    assert_eq!(apps.len(), 1);
    let manifest = state.manifests.get(&apps[0].app_id).unwrap().unwrap();
    let dev = manifest.deployments.get(&Environment::Dev).unwrap();
    assert_eq!(dev.status, DeployStatus::Success);
    assert_eq!(dev.app_url, "https://app.example.test");
}

#[tokio::test(flavor = "multi_thread")]
async fn credential_failure_fails_the_job_and_creates_no_manifest() {
    let dir = tempdir().unwrap();
    let state = test_support::test_state_with(dir.path(), Arc::new(StaticBroker { fail: true }));
    let app = build_router(state.clone());

    let job_id = accept_job(&app, generate_request("demo")).await;
    let status = poll_until_terminal(&app, &job_id).await;
    assert_eq!(status["status"], "failed");
    let error = status["error"].as_str().unwrap();
    assert!(error.starts_with("credential_error"), "error should be credential-classed: {error}");
    assert!(status.get("result").is_none());

    assert!(state.manifests.list().unwrap().is_empty(), "no manifest may exist after a credential failure");
}

#[tokio::test(flavor = "multi_thread")]
async fn build_failure_short_circuits_before_deploy() {
    let dir = tempdir().unwrap();
    let settings = Settings::for_root(dir.path());
    std::fs::create_dir_all(&settings.workspace_root).unwrap();
    // npm succeeds for install but fails the front-end build
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let npm = test_support::write_script(
        &bin,
        "npm",
        concat!(
            "#!/bin/sh\n",
            "echo \"npm $@\"\n",
            "if [ \"$1\" = \"install\" ]; then mkdir -p node_modules; exit 0; fi\n",
            "if [ \"$1\" = \"run\" ]; then echo 'module not found: ./App' >&2; exit 1; fi\n",
            "exit 0\n",
        ),
    );
    let cdk = test_support::write_script(
        &bin,
        "cdk",
        concat!(
            "#!/bin/sh\n",
            "echo \"cdk $@\"\n",
            "out=\"\"; prev=\"\"\n",
            "for a in \"$@\"; do\n",
            "  if [ \"$prev\" = \"--outputs-file\" ]; then out=\"$a\"; fi\n",
            "  prev=\"$a\"\n",
            "done\n",
            "if [ \"$1\" = \"deploy\" ] && [ -n \"$out\" ]; then echo '{}' > \"$out\"; fi\n",
            "exit 0\n",
        ),
    );
    let tools = ToolChain { npm: npm.display().to_string(), cdk: vec![cdk.display().to_string()] };
    let state = AppState::new(
        settings,
        test_support::test_tenant(),
        Arc::new(StaticBroker { fail: false }),
        Arc::new(StaticGateway),
        Pipeline::new(tools, StageTimeouts::default()),
    )
    .unwrap();
    let app = build_router(state.clone());

    let job_id = accept_job(&app, generate_request("demo")).await;
    let status = poll_until_terminal(&app, &job_id).await;
    assert_eq!(status["status"], "failed");
    let error = status["error"].as_str().unwrap();
    assert!(error.starts_with("build_error"), "error should be build-classed: {error}");

    // the pipeline never reached the deploy stage
    let steps = step_positions(&status);
    assert!(!steps.iter().any(|s| s == "deploy"), "deploy must not start after a build failure: {steps:?}");

    // and no deploy-output file was produced anywhere in the workspace
    let apps = state.manifests.list().unwrap();
    assert_eq!(apps.len(), 1);
    let outputs = state
        .settings
        .workspace_root
        .join(&apps[0].app_id)
        .join("infra")
        .join("outputs-dev.json");
    assert!(!outputs.exists(), "no outputs file may exist after a short-circuited run");

    // the failed run is recorded on the manifest, replacing nothing
    let manifest = state.manifests.get(&apps[0].app_id).unwrap().unwrap();
    let dev = manifest.deployments.get(&Environment::Dev).unwrap();
    assert_eq!(dev.status, DeployStatus::Failed);
    assert!(dev.error.as_deref().unwrap().starts_with("build_error"));
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_skips_unchanged_dependency_install() {
    let dir = tempdir().unwrap();
    let state = test_support::test_state(dir.path());
    let app = build_router(state.clone());

    let first_job = accept_job(&app, generate_request("demo")).await;
    let first = poll_until_terminal(&app, &first_job).await;
    assert_eq!(first["status"], "completed");
    let messages: Vec<String> = first["updates"].as_array().unwrap().iter()
        .map(|u| u["message"].as_str().unwrap().to_owned()).collect();
    assert!(messages.iter().any(|m| m.contains("installing dependencies")));

    // a publish over the same tree reruns the pipeline; unchanged manifests
    // must skip the install and still succeed
    let apps = state.manifests.list().unwrap();
    let publish = Request::builder()
        .method("POST")
        .uri("/publish")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "account_id": "123456789012", "region": "us-east-1",
                "app_id": apps[0].app_id, "confirm": true
            })
            .to_string(),
        ))
        .unwrap();
    let res = app.clone().oneshot(publish).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let v = body_json(res).await;
    assert_eq!(v["status"], "success");

    // the skip is observable at the dependency layer: the markers exist and
    // node_modules was left alone
    let project = state.settings.workspace_root.join(&apps[0].app_id);
    for sub in ["infra", "frontend"] {
        assert!(project.join(sub).join(".deps-sha256").is_file(), "{sub} must carry a dependency hash marker");
        assert!(project.join(sub).join("node_modules").is_dir());
    }
}
