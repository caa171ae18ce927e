use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::models::GeneratedApp;
use crate::pipeline::process::Subprocess;
use crate::pipeline::{FRONTEND_DIR, INFRA_DIR};

/// Render the generated file set into `<workspace_root>/<app_id>/` and put
/// the tree under version control. Everything that happens to the tree
/// afterwards belongs to the pipeline.
pub async fn materialize(
    workspace_root: &Path,
    app_id: &str,
    generated: &GeneratedApp,
) -> Result<PathBuf, EngineError> {
    let project_root = workspace_root.join(app_id);
    fs::create_dir_all(project_root.join(INFRA_DIR))?;
    fs::create_dir_all(project_root.join(FRONTEND_DIR))?;
    for file in &generated.files {
        let rel = sanitize_rel_path(&file.path).ok_or_else(|| {
            EngineError::Validation(format!("generated file path escapes the project tree: {}", file.path))
        })?;
        let target = project_root.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, file.contents.as_bytes())?;
    }
    init_repository(&project_root).await;
    info!(event = "materialize.done", app_id = %app_id, files = generated.files.len(), root = %project_root.display());
    Ok(project_root)
}

fn sanitize_rel_path(raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => clean.push(c),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() { None } else { Some(clean) }
}

/// Best-effort `git init` plus an initial commit; a missing git binary is not
/// fatal to materialization.
async fn init_repository(root: &Path) {
    let steps: [&[&str]; 3] = [
        &["init"],
        &["add", "-A"],
        &["commit", "-m", "initial generated application"],
    ];
    for step in steps {
        let run = Subprocess::new("git", root, Duration::from_secs(30))
            .args(step.iter().copied())
            .env("GIT_AUTHOR_NAME", "vela")
            .env("GIT_AUTHOR_EMAIL", "vela@localhost")
            .env("GIT_COMMITTER_NAME", "vela")
            .env("GIT_COMMITTER_EMAIL", "vela@localhost")
            .run()
            .await;
        match run {
            Ok(out) if out.exit_ok => {}
            Ok(out) => {
                warn!(event = "materialize.git", status = "failed", detail = %out.tail(300));
                return;
            }
            Err(err) => {
                warn!(event = "materialize.git", status = "unavailable", error = %err);
                return;
            }
        }
    }
}
