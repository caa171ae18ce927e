use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{AppManifest, AppSpec, AppSummary, Blueprint, DeploymentResult, Environment};

/// Whole-file JSON store, one record per generated application. Writes are
/// read-modify-write with an atomic rename. Cross-process coordination is
/// out of scope: a single control process owns this directory, and in-process
/// races are prevented by the per-(app, environment) run lock upstream.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn open(data_root: &Path) -> io::Result<Self> {
        let dir = data_root.join("apps");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, app_id: &str) -> PathBuf {
        self.dir.join(format!("{app_id}.json"))
    }

    pub fn create(
        &self,
        app_name: &str,
        blueprint: Blueprint,
        spec: AppSpec,
        account_id: &str,
        region: &str,
    ) -> Result<AppManifest, EngineError> {
        let now = Utc::now();
        let manifest = AppManifest {
            app_id: Uuid::new_v4().to_string(),
            app_name: app_name.to_owned(),
            blueprint,
            spec,
            account_id: account_id.to_owned(),
            region: region.to_owned(),
            created_at: now,
            updated_at: now,
            deployments: Default::default(),
        };
        self.write(&manifest)?;
        info!(event = "manifest.created", app_id = %manifest.app_id, app = %app_name);
        Ok(manifest)
    }

    pub fn get(&self, app_id: &str) -> Result<Option<AppManifest>, EngineError> {
        let path = self.path_for(app_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Record the outcome of one pipeline run, replacing (never merging) any
    /// previous result for the environment. Returns None when the app is
    /// unknown.
    pub fn update_deployment(
        &self,
        app_id: &str,
        environment: Environment,
        result: DeploymentResult,
    ) -> Result<Option<AppManifest>, EngineError> {
        let Some(mut manifest) = self.get(app_id)? else { return Ok(None) };
        manifest.deployments.insert(environment, result);
        manifest.updated_at = Utc::now();
        self.write(&manifest)?;
        Ok(Some(manifest))
    }

    /// Drop an environment entry after a successful destroy. The application
    /// record itself survives even with zero environments left.
    pub fn remove_environment(
        &self,
        app_id: &str,
        environment: Environment,
    ) -> Result<Option<AppManifest>, EngineError> {
        let Some(mut manifest) = self.get(app_id)? else { return Ok(None) };
        manifest.deployments.remove(&environment);
        manifest.updated_at = Utc::now();
        self.write(&manifest)?;
        Ok(Some(manifest))
    }

    pub fn list(&self) -> Result<Vec<AppSummary>, EngineError> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(entry.path())?;
            match serde_json::from_str::<AppManifest>(&raw) {
                Ok(manifest) => summaries.push(AppSummary::from(&manifest)),
                Err(err) => warn!(event = "manifest.unreadable", path = %entry.path().display(), error = %err),
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    fn write(&self, manifest: &AppManifest) -> Result<(), EngineError> {
        let path = self.path_for(&manifest.app_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
