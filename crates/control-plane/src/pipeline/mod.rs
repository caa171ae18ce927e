//! The build/deploy pipeline: a fixed sequence of subprocess-executed stages
//! run against one materialized project tree with one set of assumed
//! credentials. Failure at any stage short-circuits the rest of the run.

pub mod deps;
pub mod outputs;
pub mod process;
pub mod runtime_config;

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::credentials::AssumedCredentials;
use crate::error::EngineError;
use crate::jobs::ProgressSink;
use crate::models::{DeployStatus, DeploymentResult, Environment};

use deps::ensure_dependencies;
use process::{RunFailure, Subprocess};

/// Sub-project directories every materialized repository carries.
pub const INFRA_DIR: &str = "infra";
pub const FRONTEND_DIR: &str = "frontend";

/// Binaries the pipeline shells out to; injectable so tests can substitute
/// stub scripts for the real toolchain.
#[derive(Debug, Clone)]
pub struct ToolChain {
    pub npm: String,
    pub cdk: Vec<String>,
}

impl Default for ToolChain {
    fn default() -> Self {
        Self { npm: "npm".into(), cdk: vec!["npx".into(), "cdk".into()] }
    }
}

impl ToolChain {
    pub fn from_env() -> Self {
        let default = Self::default();
        let npm = std::env::var("VELA_NPM_BIN").ok().filter(|v| !v.is_empty()).unwrap_or(default.npm);
        let cdk = std::env::var("VELA_CDK_BIN")
            .ok()
            .map(|v| v.split_whitespace().map(str::to_owned).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .unwrap_or(default.cdk);
        Self { npm, cdk }
    }
}

#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub install: Duration,
    pub bootstrap: Duration,
    pub build: Duration,
    pub deploy: Duration,
    pub destroy: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            install: Duration::from_secs(300),
            bootstrap: Duration::from_secs(300),
            build: Duration::from_secs(300),
            deploy: Duration::from_secs(900),
            destroy: Duration::from_secs(600),
        }
    }
}

/// Everything one run needs: the materialized tree, the target, and a
/// single-use credential set.
#[derive(Debug)]
pub struct DeployContext {
    pub project_root: PathBuf,
    pub stack_name: String,
    pub account_id: String,
    pub region: String,
    pub environment: Environment,
    pub credentials: AssumedCredentials,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    tools: ToolChain,
    timeouts: StageTimeouts,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(ToolChain::default(), StageTimeouts::default())
    }
}

impl Pipeline {
    pub fn new(tools: ToolChain, timeouts: StageTimeouts) -> Self {
        Self { tools, timeouts }
    }

    fn aws_env(ctx: &DeployContext) -> Vec<(&'static str, String)> {
        let mut env = ctx.credentials.env_vars();
        env.push(("AWS_REGION", ctx.region.clone()));
        env.push(("AWS_DEFAULT_REGION", ctx.region.clone()));
        env
    }

    fn cdk_command(&self, cwd: &Path, ctx: &DeployContext, timeout: Duration) -> Subprocess {
        let mut subprocess = Subprocess::new(&self.tools.cdk[0], cwd, timeout);
        for extra in &self.tools.cdk[1..] {
            subprocess = subprocess.arg(extra);
        }
        subprocess.envs(Self::aws_env(ctx))
    }

    /// Run the full dependency/bootstrap/build/deploy/extract/publish
    /// sequence and return the successful result. Errors carry the failing
    /// stage's classification; the caller records them into both the job and
    /// the manifest.
    pub async fn deploy(&self, ctx: &DeployContext, sink: &ProgressSink) -> Result<DeploymentResult, EngineError> {
        let infra = ctx.project_root.join(INFRA_DIR);
        let frontend = ctx.project_root.join(FRONTEND_DIR);

        // the two sub-projects are versioned independently; install them
        // concurrently and let both finish before inspecting either outcome
        let (infra_deps, frontend_deps) = tokio::join!(
            ensure_dependencies(&self.tools, &infra, "infra", sink, self.timeouts.install),
            ensure_dependencies(&self.tools, &frontend, "frontend", sink, self.timeouts.install),
        );
        infra_deps?;
        frontend_deps?;
        sink.emit("dependencies", "dependency resolution finished", true);

        self.bootstrap(&infra, ctx, sink).await?;
        self.build_and_synth(&infra, &frontend, ctx, sink).await?;

        let outputs_path = infra.join(format!("outputs-{}.json", ctx.environment));
        self.deploy_stacks(&infra, ctx, &outputs_path, sink).await?;

        sink.emit("outputs", "extracting stack outputs", false);
        let outs = outputs::read_outputs(&outputs_path);
        sink.emit("outputs", "stack outputs extracted", true);

        if outs.web_bucket.is_empty() {
            sink.emit("runtime_config", "no web bucket in stack outputs, publication skipped", true);
        } else {
            sink.emit("runtime_config", format!("publishing runtime config to {}", outs.web_bucket), false);
            runtime_config::publish(&ctx.credentials, &ctx.region, &outs.web_bucket, &outs.api_url, ctx.environment.as_str()).await?;
            sink.emit("runtime_config", "runtime config published", true);
        }

        info!(event = "pipeline.deploy", stack = %ctx.stack_name, environment = %ctx.environment, status = "success");
        Ok(DeploymentResult {
            stack_name: ctx.stack_name.clone(),
            environment: ctx.environment,
            outputs: outs.raw,
            app_url: outs.app_url,
            api_url: outs.api_url,
            status: DeployStatus::Success,
            error: None,
            finished_at: Utc::now(),
        })
    }

    async fn bootstrap(&self, infra: &Path, ctx: &DeployContext, sink: &ProgressSink) -> Result<(), EngineError> {
        let target = format!("aws://{}/{}", ctx.account_id, ctx.region);
        sink.emit("bootstrap", format!("bootstrapping {target}"), false);
        let run = self
            .cdk_command(infra, ctx, self.timeouts.bootstrap)
            .arg("bootstrap")
            .arg(&target)
            .run()
            .await;
        match run {
            Ok(out) if out.exit_ok => {}
            Ok(out) if bootstrap_already_done(&out.combined()) => {
                info!(event = "pipeline.bootstrap", target = %target, status = "already_done");
            }
            Ok(out) => {
                return Err(EngineError::Infrastructure(format!("bootstrap of {target} failed: {}", out.tail(600))))
            }
            Err(failure) => return Err(infrastructure_failure("bootstrap", failure)),
        }
        sink.emit("bootstrap", "environment bootstrapped", true);
        Ok(())
    }

    async fn build_and_synth(
        &self,
        infra: &Path,
        frontend: &Path,
        ctx: &DeployContext,
        sink: &ProgressSink,
    ) -> Result<(), EngineError> {
        sink.emit("build", "building front end and synthesizing infrastructure", false);
        let build = Subprocess::new(&self.tools.npm, frontend, self.timeouts.build)
            .args(["run", "build"])
            .envs(Self::aws_env(ctx));
        let synth = self.cdk_command(infra, ctx, self.timeouts.build).arg("synth");
        // independent work, launched together; neither cancels the other
        let (build_out, synth_out) = tokio::join!(build.run(), synth.run());
        match build_out {
            Ok(out) if out.exit_ok => {}
            Ok(out) => return Err(EngineError::Build(format!("front-end build failed: {}", out.tail(600)))),
            Err(failure) => return Err(EngineError::Build(format!("front-end build: {failure}"))),
        }
        match synth_out {
            Ok(out) if out.exit_ok => {}
            Ok(out) => return Err(EngineError::Infrastructure(format!("synth failed: {}", out.tail(600)))),
            Err(failure) => return Err(infrastructure_failure("synth", failure)),
        }
        sink.emit("build", "build and synthesis finished", true);
        Ok(())
    }

    async fn deploy_stacks(
        &self,
        infra: &Path,
        ctx: &DeployContext,
        outputs_path: &Path,
        sink: &ProgressSink,
    ) -> Result<(), EngineError> {
        sink.emit("deploy", format!("deploying {}", ctx.stack_name), false);
        let run = self
            .cdk_command(infra, ctx, self.timeouts.deploy)
            .args(["deploy", "--all", "--require-approval", "never", "--outputs-file"])
            .arg(outputs_path.display().to_string())
            .run()
            .await;
        match run {
            Ok(out) if out.exit_ok => {}
            Ok(out) => {
                return Err(EngineError::Infrastructure(format!("deploy of {} failed: {}", ctx.stack_name, out.tail(600))))
            }
            Err(failure) => return Err(infrastructure_failure("deploy", failure)),
        }
        sink.emit("deploy", "deploy finished", true);
        Ok(())
    }

    /// Reduced pipeline for teardown: a single non-interactive destroy of one
    /// stack. No dependency or build stages run.
    pub async fn destroy(&self, ctx: &DeployContext, sink: &ProgressSink) -> Result<(), EngineError> {
        let infra = ctx.project_root.join(INFRA_DIR);
        sink.emit("destroy", format!("destroying {}", ctx.stack_name), false);
        let run = self
            .cdk_command(&infra, ctx, self.timeouts.destroy)
            .args(["destroy", ctx.stack_name.as_str(), "--force"])
            .run()
            .await;
        match run {
            Ok(out) if out.exit_ok => {}
            Ok(out) => {
                return Err(EngineError::Infrastructure(format!("destroy of {} failed: {}", ctx.stack_name, out.tail(600))))
            }
            Err(failure) => return Err(infrastructure_failure("destroy", failure)),
        }
        sink.emit("destroy", "stack destroyed", true);
        info!(event = "pipeline.destroy", stack = %ctx.stack_name, status = "success");
        Ok(())
    }
}

/// Detect the "this account/region is already bootstrapped" shape of a failed
/// bootstrap call. The heuristic lives only here; swap this function for a
/// structured pre-check once the toolchain exposes one.
pub fn bootstrap_already_done(output: &str) -> bool {
    const MARKERS: &[&str] = &[
        "already bootstrapped",
        "bootstrap stack already up to date",
        "(no changes)",
    ];
    let lowered = output.to_ascii_lowercase();
    MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn infrastructure_failure(stage: &str, failure: RunFailure) -> EngineError {
    EngineError::Infrastructure(format!("{stage}: {failure}"))
}
