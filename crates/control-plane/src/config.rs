use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process configuration, resolved once at startup. Filesystem roots are
/// explicit values here rather than ambient working-directory state so tests
/// can sandbox everything under a temp directory.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Tenant record and per-app manifests live under here.
    pub data_root: PathBuf,
    /// Materialized project repositories live under here, one per app id.
    pub workspace_root: PathBuf,
    pub default_region: String,
    /// Name of the role the operator creates in the target account.
    pub deploy_role_name: String,
    /// CloudFormation template behind the one-click connect URL.
    pub connect_template_url: String,
    pub default_account_id: Option<String>,
    pub generation_url: String,
    /// How long terminal jobs stay pollable before reclamation.
    pub job_retention: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        let data_root = PathBuf::from(env_or("VELA_DATA_ROOT", ".vela"));
        let workspace_root = std::env::var("VELA_WORKSPACE_ROOT")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("workspace"));
        Self {
            bind_addr: std::env::var("VELA_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000))),
            workspace_root,
            default_region: env_or("VELA_DEFAULT_REGION", "us-east-1"),
            deploy_role_name: env_or("VELA_DEPLOY_ROLE", "vela-deployer"),
            connect_template_url: env_or(
                "VELA_CONNECT_TEMPLATE_URL",
                "https://vela-public-assets.s3.amazonaws.com/connect/vela-trust-role.yaml",
            ),
            default_account_id: std::env::var("VELA_DEFAULT_ACCOUNT_ID").ok().filter(|v| !v.is_empty()),
            generation_url: env_or("VELA_GENERATION_URL", "http://localhost:8081"),
            job_retention: Duration::from_secs(
                std::env::var("VELA_JOB_RETENTION_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(3600),
            ),
            data_root,
        }
    }

    /// Settings rooted entirely under one directory; used by tests to keep
    /// every file the process touches inside a sandbox.
    pub fn for_root(root: &Path) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_root: root.join("data"),
            workspace_root: root.join("workspace"),
            default_region: "us-east-1".into(),
            deploy_role_name: "vela-deployer".into(),
            connect_template_url: "https://example.test/vela-trust-role.yaml".into(),
            default_account_id: None,
            generation_url: "http://localhost:8081".into(),
            job_retention: Duration::from_secs(3600),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandboxed_settings_stay_under_root() {
        let settings = Settings::for_root(Path::new("/tmp/sandbox"));
        assert!(settings.data_root.starts_with("/tmp/sandbox"));
        assert!(settings.workspace_root.starts_with("/tmp/sandbox"));
        assert_eq!(settings.default_region, "us-east-1");
    }
}
