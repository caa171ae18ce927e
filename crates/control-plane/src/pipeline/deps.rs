use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::jobs::ProgressSink;

use super::process::Subprocess;
use super::ToolChain;

/// Marker written beside `node_modules` after a successful install.
pub const DEPS_HASH_MARKER: &str = ".deps-sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Skipped,
}

/// Content hash of the sub-project's dependency manifest. The lockfile wins
/// over package.json when both exist, since it pins the actual tree.
pub fn dependency_manifest_hash(dir: &Path) -> Option<String> {
    for name in ["package-lock.json", "package.json"] {
        if let Ok(content) = fs::read(dir.join(name)) {
            let mut hasher = Sha256::new();
            hasher.update(name.as_bytes());
            hasher.update(&content);
            return Some(format!("{:x}", hasher.finalize()));
        }
    }
    None
}

/// Install a sub-project's dependencies unless the stored manifest hash shows
/// nothing changed and a tree is already materialized. The new hash is
/// persisted only after a successful install.
pub async fn ensure_dependencies(
    tools: &ToolChain,
    dir: &Path,
    label: &str,
    sink: &ProgressSink,
    timeout: Duration,
) -> Result<InstallOutcome, EngineError> {
    let step = "dependencies";
    let hash = dependency_manifest_hash(dir);
    let marker = dir.join(DEPS_HASH_MARKER);
    if let Some(hash) = hash.as_deref() {
        let stored = fs::read_to_string(&marker).ok();
        if stored.as_deref().map(str::trim) == Some(hash) && dir.join("node_modules").exists() {
            info!(event = "deps.skip", project = %label, "dependency manifest unchanged");
            sink.emit(step, format!("{label}: dependencies unchanged, install skipped"), false);
            return Ok(InstallOutcome::Skipped);
        }
    }
    sink.emit(step, format!("{label}: installing dependencies"), false);
    let run = Subprocess::new(&tools.npm, dir, timeout).arg("install").run().await;
    match run {
        Ok(out) if out.exit_ok => {
            if let Some(hash) = hash.as_deref() {
                if let Err(err) = fs::write(&marker, hash) {
                    warn!(event = "deps.marker_write_failed", project = %label, error = %err);
                }
            }
            info!(event = "deps.installed", project = %label);
            sink.emit(step, format!("{label}: dependencies installed"), false);
            Ok(InstallOutcome::Installed)
        }
        Ok(out) => Err(EngineError::Build(format!("{label}: npm install failed: {}", out.tail(600)))),
        Err(failure) => Err(EngineError::Build(format!("{label}: {failure}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hash_is_stable_for_identical_content() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::write(a.path().join("package.json"), "{\"name\":\"x\"}").unwrap();
        fs::write(b.path().join("package.json"), "{\"name\":\"x\"}").unwrap();
        assert_eq!(dependency_manifest_hash(a.path()), dependency_manifest_hash(b.path()));
    }

    #[test]
    fn lockfile_takes_precedence_over_package_json() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{\"name\":\"x\"}").unwrap();
        let without_lock = dependency_manifest_hash(dir.path()).unwrap();
        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        let with_lock = dependency_manifest_hash(dir.path()).unwrap();
        assert_ne!(without_lock, with_lock);
        // lockfile content changes must be visible
        fs::write(dir.path().join("package-lock.json"), "{\"v\":2}").unwrap();
        assert_ne!(with_lock, dependency_manifest_hash(dir.path()).unwrap());
    }

    #[test]
    fn missing_manifest_means_no_hash() {
        let dir = tempdir().unwrap();
        assert!(dependency_manifest_hash(dir.path()).is_none());
    }
}
