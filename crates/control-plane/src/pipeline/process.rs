use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

/// One bounded subprocess invocation with captured output. The child is
/// spawned as its own process-group leader so a deadline kill takes the whole
/// tree down, not just the direct child (package managers fork freely).
#[derive(Debug)]
pub struct Subprocess {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: Vec<(String, String)>,
    timeout: Duration,
}

#[derive(Debug)]
pub struct RunOutput {
    pub exit_ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Last `max` bytes of the combined output, for error detail.
    pub fn tail(&self, max: usize) -> String {
        let combined = self.combined();
        let trimmed = combined.trim();
        if trimmed.len() <= max {
            return trimmed.to_owned();
        }
        let mut cut = trimmed.len() - max;
        while !trimmed.is_char_boundary(cut) {
            cut += 1;
        }
        format!("...{}", &trimmed[cut..])
    }
}

#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },
}

impl Subprocess {
    pub fn new(program: impl Into<String>, cwd: &Path, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub async fn run(self) -> Result<RunOutput, RunFailure> {
        let resolved = which::which(&self.program).map_err(|_| RunFailure::Spawn {
            program: self.program.clone(),
            message: "not found in PATH".into(),
        })?;
        let mut cmd = Command::new(&resolved);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        let child = cmd.spawn().map_err(|e| RunFailure::Spawn {
            program: self.program.clone(),
            message: e.to_string(),
        })?;
        let pid = child.id();
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(RunOutput {
                exit_ok: output.status.success(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(RunFailure::Spawn { program: self.program.clone(), message: e.to_string() }),
            Err(_elapsed) => {
                // dropping the wait future killed the direct child; take the
                // rest of the group down with it
                kill_process_group(pid);
                warn!(event = "subprocess.timeout", program = %self.program, timeout_secs = self.timeout.as_secs());
                Err(RunFailure::Timeout { program: self.program.clone(), after: self.timeout })
            }
        }
    }
}

fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: signals a process group this process created; no memory is
        // shared with the callee.
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}
