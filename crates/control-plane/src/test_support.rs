//! Test harness utilities for integration and unit tests. Centralizes the
//! sandboxed `AppState`, the stub generation gateway/credential broker, and
//! the stub deploy toolchain so per-test boilerplate stays small.

use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Settings;
use crate::credentials::{AssumedCredentials, CredentialBroker};
use crate::error::EngineError;
use crate::generation::GenerationGateway;
use crate::models::{AppSpec, Blueprint, GeneratedApp, GeneratedFile};
use crate::pipeline::{Pipeline, StageTimeouts, ToolChain};
use crate::tenant::TenantConfig;
use crate::AppState;

/// Gateway stub returning a canned two-sub-project application.
pub struct StaticGateway;

#[async_trait]
impl GenerationGateway for StaticGateway {
    async fn generate(
        &self,
        prompt: &str,
        blueprint: Blueprint,
        app_name: &str,
    ) -> Result<GeneratedApp, EngineError> {
        Ok(sample_app(app_name, blueprint, prompt))
    }
}

/// Broker stub: hands out fixed fake credentials, or fails the exchange the
/// way a wrong external id would.
pub struct StaticBroker {
    pub fail: bool,
}

#[async_trait]
impl CredentialBroker for StaticBroker {
    async fn assume(
        &self,
        account_id: &str,
        _region: &str,
        role_name: &str,
        _external_id: &str,
        _session_label: &str,
    ) -> Result<AssumedCredentials, EngineError> {
        if self.fail {
            return Err(EngineError::Credential {
                role_arn: format!("arn:aws:iam::{account_id}:role/{role_name}"),
                message: "external id mismatch".into(),
            });
        }
        Ok(AssumedCredentials::new(
            "AKIATESTKEY".into(),
            "test-secret".into(),
            "test-token".into(),
            Utc::now() + chrono::Duration::hours(1),
        ))
    }
}

pub fn sample_app(app_name: &str, blueprint: Blueprint, description: &str) -> GeneratedApp {
    GeneratedApp {
        spec: AppSpec {
            name: app_name.to_owned(),
            description: description.to_owned(),
            blueprint,
            parameters: serde_json::Value::Null,
        },
        files: vec![
            GeneratedFile { path: "infra/package.json".into(), contents: "{\n  \"name\": \"infra\"\n}\n".into() },
            GeneratedFile { path: "frontend/package.json".into(), contents: "{\n  \"name\": \"frontend\"\n}\n".into() },
            GeneratedFile { path: "frontend/src/index.html".into(), contents: "<!doctype html>\n".into() },
        ],
    }
}

/// Write an executable shell script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write stub script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod stub script");
    }
    path
}

/// Stub toolchain under `<root>/bin`: an `npm` that creates `node_modules`
/// and a `cdk` whose deploy writes the requested outputs file. Both log their
/// argv and exit 0.
pub fn write_stub_tools(root: &Path) -> ToolChain {
    let bin = root.join("bin");
    fs::create_dir_all(&bin).expect("create stub bin dir");
    let npm = write_script(
        &bin,
        "npm",
        "#!/bin/sh\necho \"npm $@\"\nif [ \"$1\" = \"install\" ]; then mkdir -p node_modules; fi\nexit 0\n",
    );
    let cdk = write_script(
        &bin,
        "cdk",
        concat!(
            "#!/bin/sh\n",
            "echo \"cdk $@\"\n",
            "out=\"\"\n",
            "prev=\"\"\n",
            "for a in \"$@\"; do\n",
            "  if [ \"$prev\" = \"--outputs-file\" ]; then out=\"$a\"; fi\n",
            "  prev=\"$a\"\n",
            "done\n",
            "if [ \"$1\" = \"deploy\" ] && [ -n \"$out\" ]; then\n",
            "  cat > \"$out\" <<'EOF'\n",
            "{\"demo-dev\": {\"ApiEndpoint\": \"https://api.example.test\", \"CloudFrontUrl\": \"https://app.example.test\"}}\n",
            "EOF\n",
            "fi\n",
            "exit 0\n",
        ),
    );
    ToolChain {
        npm: npm.display().to_string(),
        cdk: vec![cdk.display().to_string()],
    }
}

pub fn test_tenant() -> TenantConfig {
    TenantConfig {
        tenant_id: "t-test".into(),
        external_id: "00000000-0000-0000-0000-000000000000".into(),
    }
}

/// Sandboxed state with the stub gateway, stub broker, and stub toolchain.
pub fn test_state(root: &Path) -> AppState {
    test_state_with(root, Arc::new(StaticBroker { fail: false }))
}

pub fn test_state_with(root: &Path, broker: Arc<dyn CredentialBroker>) -> AppState {
    let settings = Settings::for_root(root);
    fs::create_dir_all(&settings.workspace_root).expect("create workspace root");
    let tools = write_stub_tools(root);
    let pipeline = Pipeline::new(tools, StageTimeouts::default());
    AppState::new(settings, test_tenant(), broker, Arc::new(StaticGateway), pipeline).expect("test state")
}
