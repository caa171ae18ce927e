use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Durable identity of this installation. The external id is the secret that
/// differentiates this installation's trust relationship from every other
/// one; it leaves the process only inside the connect URL and the
/// delegated-trust exchange itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub external_id: String,
}

pub fn tenant_file(data_root: &Path) -> PathBuf {
    data_root.join("tenant.json")
}

/// Load the tenant record, creating it on first use. Once written the ids
/// never change; a rewrite would silently break every established trust
/// relationship.
pub fn load_or_create(data_root: &Path) -> Result<TenantConfig> {
    let path = tenant_file(data_root);
    if path.exists() {
        let raw = fs::read_to_string(&path).with_context(|| format!("read tenant record {}", path.display()))?;
        let cfg: TenantConfig = serde_json::from_str(&raw).context("parse tenant record")?;
        return Ok(cfg);
    }
    fs::create_dir_all(data_root).with_context(|| format!("create data root {}", data_root.display()))?;
    let cfg = TenantConfig {
        tenant_id: format!("t-{}", Uuid::new_v4().simple()),
        external_id: Uuid::new_v4().to_string(),
    };
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(&cfg)?).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, &path).context("persist tenant record")?;
    info!(event = "tenant.created", tenant_id = %cfg.tenant_id);
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_once_then_reloads_same_identity() {
        let dir = tempdir().unwrap();
        let first = load_or_create(dir.path()).unwrap();
        assert!(first.tenant_id.starts_with("t-"));
        assert!(!first.external_id.is_empty());
        let second = load_or_create(dir.path()).unwrap();
        assert_eq!(first.tenant_id, second.tenant_id);
        assert_eq!(first.external_id, second.external_id);
        assert!(tenant_file(dir.path()).exists());
    }

    #[test]
    fn distinct_installations_get_distinct_external_ids() {
        let a = load_or_create(tempdir().unwrap().path()).unwrap();
        let b = load_or_create(tempdir().unwrap().path()).unwrap();
        assert_ne!(a.external_id, b.external_id);
    }
}
