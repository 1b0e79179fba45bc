//! Executor: synthesize, check, plan, then hand the template to the engine.
//!
//! deploy: build -> checks -> order -> plan -> write template -> engine CLI -> lock -> events
//!
//! The engine owns convergence and rollback. A failed engine run leaves the
//! previous lock untouched and records a failed provenance event.

use super::checks;
use super::codegen::{self, EngineTarget, Format};
use super::error::{InfraError, Result};
use super::naming;
use super::planner;
use super::resolver;
use super::state;
use super::types::{DeployResult, ExecutionPlan, ProvenanceEvent, StackConfig};
use crate::resources::app::{build_app_stack, AppStack};
use crate::resources::network::VPC_ID;
use crate::transport::Runner;
use crate::tripwire::{eventlog, hasher};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const DEFAULT_AWS_CLI: &str = "aws";

/// Where the synthesized template for a stack is written.
pub fn template_path(out_dir: &Path, stack: &str) -> PathBuf {
    out_dir.join(format!("{}.template.json", stack))
}

/// Build the stack and write its template under `out_dir`.
pub fn synth_to_disk(config: &StackConfig, out_dir: &Path) -> Result<(AppStack, PathBuf)> {
    let app = build_app_stack(config)?;
    let path = template_path(out_dir, &config.name);
    std::fs::create_dir_all(out_dir)?;
    std::fs::write(&path, codegen::render_template(&app.template, Format::Json)?)?;
    tracing::info!(path = %path.display(), resources = app.template.resources.len(), "template written");
    Ok((app, path))
}

fn engine_target(config: &StackConfig, aws_cli: &str) -> EngineTarget {
    EngineTarget {
        aws_cli: aws_cli.to_string(),
        stack: config.name.clone(),
        region: config.region_name().to_string(),
    }
}

fn log_event(state_dir: &Path, stack: &str, tripwire: bool, event: ProvenanceEvent) {
    if !tripwire {
        return;
    }
    if let Err(e) = eventlog::append_event(state_dir, stack, event) {
        tracing::warn!(error = %e, "could not append provenance event");
    }
}

/// Options for one deploy.
pub struct DeployConfig<'a> {
    pub config: &'a StackConfig,
    pub state_dir: &'a Path,
    pub out_dir: &'a Path,
    pub aws_cli: &'a str,
    /// Upload bucket for templates over the inline size limit
    pub artifact_bucket: Option<&'a str>,
    pub dry_run: bool,
    pub skip_checks: bool,
}

#[derive(Debug)]
pub struct DeployReport {
    pub plan: ExecutionPlan,
    pub template_path: PathBuf,
    pub script: String,
    /// `None` on a dry run
    pub result: Option<DeployResult>,
}

pub fn deploy(cfg: &DeployConfig, runner: &dyn Runner) -> Result<DeployReport> {
    let start = Instant::now();
    let config = cfg.config;
    let policy = &config.policy;

    if policy.check_before_deploy && !cfg.skip_checks {
        let results = checks::run_all(config)?;
        let failed: Vec<_> = results.iter().flat_map(|r| r.findings.iter()).collect();
        for f in &failed {
            tracing::warn!(check = f.check, "{}", f.message);
        }
        if !failed.is_empty() {
            return Err(InfraError::Checks(failed.len()));
        }
    }

    let (app, path) = synth_to_disk(config, cfg.out_dir)?;
    let size = std::fs::metadata(&path)?.len();
    if size > codegen::MAX_INLINE_TEMPLATE_BYTES && cfg.artifact_bucket.is_none() {
        return Err(InfraError::Validation(format!(
            "template is {} bytes, over the {}-byte inline limit; pass --artifact-bucket",
            size,
            codegen::MAX_INLINE_TEMPLATE_BYTES
        )));
    }
    let order = resolver::build_execution_order(&app.template)?;
    let previous = state::load_lock(cfg.state_dir, &config.name)?;
    let plan = planner::plan(&config.name, &app.template, &order, previous.as_ref())?;

    let tags: Vec<(String, String)> = config
        .tags
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let script = codegen::deploy_script(
        &engine_target(config, cfg.aws_cli),
        &path.display().to_string(),
        cfg.artifact_bucket,
        &tags,
    );

    if cfg.dry_run {
        return Ok(DeployReport {
            plan,
            template_path: path,
            script,
            result: None,
        });
    }

    let run_id = eventlog::generate_run_id();
    let template_hash = hasher::hash_template(&app.template)?;
    log_event(
        cfg.state_dir,
        &config.name,
        policy.tripwire,
        ProvenanceEvent::DeployStarted {
            stack: config.name.clone(),
            run_id: run_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            template_hash: template_hash.clone(),
        },
    );
    tracing::info!(stack = %config.name, run_id = %run_id, changes = plan.changes.len(), "deploying");

    let failure = match runner.run(&script) {
        Ok(out) if out.success() => None,
        Ok(out) => Some(InfraError::Command {
            code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        }),
        Err(e) => Some(e),
    };
    if let Some(err) = failure {
        log_event(
            cfg.state_dir,
            &config.name,
            policy.tripwire,
            ProvenanceEvent::DeployFailed {
                stack: config.name.clone(),
                run_id,
                error: err.to_string(),
            },
        );
        return Err(err);
    }

    if policy.lock_file {
        let lock = state::lock_from_template(config, &app.template)?;
        state::save_lock(cfg.state_dir, &lock)?;
    }

    let result = DeployResult {
        stack: config.name.clone(),
        created: plan.to_create,
        updated: plan.to_update,
        destroyed: plan.to_destroy,
        unchanged: plan.unchanged,
        total_duration: start.elapsed(),
    };
    log_event(
        cfg.state_dir,
        &config.name,
        policy.tripwire,
        ProvenanceEvent::DeployCompleted {
            stack: config.name.clone(),
            run_id,
            created: result.created,
            updated: result.updated,
            destroyed: result.destroyed,
            unchanged: result.unchanged,
            total_seconds: result.total_duration.as_secs_f64(),
        },
    );

    Ok(DeployReport {
        plan,
        template_path: path,
        script,
        result: Some(result),
    })
}

/// Options for one destroy.
pub struct DestroyConfig<'a> {
    pub config: &'a StackConfig,
    pub state_dir: &'a Path,
    pub aws_cli: &'a str,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct DestroyReport {
    /// Logical ids, dependents first, as the engine will tear them down
    pub teardown: Vec<String>,
    pub script: String,
    pub cleanup_script: String,
    /// Whether the interface cleanup succeeded; `None` on a dry run
    pub cleanup_ok: Option<bool>,
    pub lock_removed: bool,
}

/// Empty the buckets, delete the stack, then sweep leftover network
/// interfaces. The sweep runs even when deletion fails, since leftover
/// interfaces are the usual cause.
pub fn destroy(cfg: &DestroyConfig, runner: &dyn Runner) -> Result<DestroyReport> {
    let start = Instant::now();
    let config = cfg.config;
    let target = engine_target(config, cfg.aws_cli);
    let buckets = vec![
        naming::bucket_name(config)?,
        naming::frontend_bucket_name(config)?,
    ];
    let script = codegen::destroy_script(&target, &buckets);
    let cleanup_script = codegen::eni_cleanup_script(&target, VPC_ID);
    let teardown = resolver::build_destroy_order(&build_app_stack(config)?.template)?;

    if cfg.dry_run {
        return Ok(DestroyReport {
            teardown,
            script,
            cleanup_script,
            cleanup_ok: None,
            lock_removed: false,
        });
    }

    let run_id = eventlog::generate_run_id();
    let tripwire = config.policy.tripwire;
    log_event(
        cfg.state_dir,
        &config.name,
        tripwire,
        ProvenanceEvent::DestroyStarted {
            stack: config.name.clone(),
            run_id: run_id.clone(),
        },
    );
    tracing::info!(stack = %config.name, run_id = %run_id, "destroying");

    let failure = match runner.run(&script) {
        Ok(out) if out.success() => None,
        Ok(out) => Some(InfraError::Command {
            code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        }),
        Err(e) => Some(e),
    };

    let cleanup_ok = match runner.run(&cleanup_script) {
        Ok(out) => out.success(),
        Err(e) => {
            tracing::warn!(error = %e, "network interface cleanup did not run");
            false
        }
    };
    log_event(
        cfg.state_dir,
        &config.name,
        tripwire,
        ProvenanceEvent::CleanupAttempted {
            stack: config.name.clone(),
            step: "network-interfaces".to_string(),
            success: cleanup_ok,
        },
    );

    if let Some(err) = failure {
        log_event(
            cfg.state_dir,
            &config.name,
            tripwire,
            ProvenanceEvent::DestroyFailed {
                stack: config.name.clone(),
                run_id,
                error: err.to_string(),
            },
        );
        return Err(err);
    }

    let lock_removed = state::remove_lock(cfg.state_dir, &config.name)?;
    log_event(
        cfg.state_dir,
        &config.name,
        tripwire,
        ProvenanceEvent::DestroyCompleted {
            stack: config.name.clone(),
            run_id,
            total_seconds: start.elapsed().as_secs_f64(),
        },
    );

    Ok(DestroyReport {
        teardown,
        script,
        cleanup_script,
        cleanup_ok: Some(cleanup_ok),
        lock_removed,
    })
}

/// Outputs of the deployed stack as the engine reports them (JSON).
pub fn describe_outputs(config: &StackConfig, aws_cli: &str, runner: &dyn Runner) -> Result<String> {
    let out = runner.run(&codegen::describe_outputs_script(&engine_target(config, aws_cli)))?;
    if !out.success() {
        return Err(InfraError::Command {
            code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

/// Whether the template on disk matches what the config synthesizes now.
/// `None` when nothing has been synthesized yet.
pub fn template_is_current(config: &StackConfig, out_dir: &Path) -> Result<Option<bool>> {
    let path = template_path(out_dir, &config.name);
    if !path.exists() {
        return Ok(None);
    }
    let app = build_app_stack(config)?;
    let rendered = codegen::render_template(&app.template, Format::Json)?;
    Ok(Some(hasher::hash_file(&path)? == hasher::hash_string(&rendered)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlanAction;
    use crate::transport::ExecOutput;
    use std::cell::RefCell;

    /// Records every script and answers with a fixed exit code.
    struct FakeRunner {
        exit_code: i32,
        scripts: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn new(exit_code: i32) -> Self {
            Self {
                exit_code,
                scripts: RefCell::new(Vec::new()),
            }
        }
    }

    impl Runner for FakeRunner {
        fn run(&self, script: &str) -> Result<ExecOutput> {
            self.scripts.borrow_mut().push(script.to_string());
            Ok(ExecOutput {
                exit_code: self.exit_code,
                stdout: String::new(),
                stderr: if self.exit_code == 0 {
                    String::new()
                } else {
                    "An error occurred (ValidationError)".to_string()
                },
            })
        }
    }

    fn config() -> StackConfig {
        serde_yaml_ng::from_str(
            "version: \"1.0\"\nname: CodeRefactorInfra\naccount: \"123456789012\"\nregion: us-east-1\n",
        )
        .unwrap()
    }

    fn deploy_cfg<'a>(
        config: &'a StackConfig,
        dir: &'a Path,
        out: &'a Path,
        dry_run: bool,
    ) -> DeployConfig<'a> {
        DeployConfig {
            config,
            state_dir: dir,
            out_dir: out,
            aws_cli: DEFAULT_AWS_CLI,
            artifact_bucket: Some("cfn-artifacts"),
            dry_run,
            skip_checks: false,
        }
    }

    #[test]
    fn test_template_path() {
        assert_eq!(
            template_path(Path::new("out"), "CodeRefactorInfra"),
            PathBuf::from("out/CodeRefactorInfra.template.json")
        );
    }

    #[test]
    fn test_dry_run_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let state_dir = dir.path().join("state");
        let out_dir = dir.path().join("out");
        let runner = FakeRunner::new(0);
        let report = deploy(&deploy_cfg(&c, &state_dir, &out_dir, true), &runner).unwrap();
        assert!(report.result.is_none());
        assert!(runner.scripts.borrow().is_empty());
        assert!(report.template_path.exists());
        assert!(report.script.contains("cloudformation deploy"));
        assert!(report.plan.changes.iter().all(|c| c.action == PlanAction::Create));
        assert!(state::load_lock(&state_dir, "CodeRefactorInfra").unwrap().is_none());
    }

    #[test]
    fn test_oversized_template_needs_artifact_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let state_dir = dir.path().join("state");
        let out_dir = dir.path().join("out");
        let runner = FakeRunner::new(0);
        let cfg = DeployConfig {
            artifact_bucket: None,
            ..deploy_cfg(&c, &state_dir, &out_dir, false)
        };
        let err = deploy(&cfg, &runner).unwrap_err();
        assert!(matches!(&err, InfraError::Validation(m) if m.contains("--artifact-bucket")));
        assert!(runner.scripts.borrow().is_empty());
        assert!(eventlog::read_events(&state_dir, "CodeRefactorInfra").unwrap().is_empty());

        let size = std::fs::metadata(template_path(&out_dir, "CodeRefactorInfra")).unwrap().len();
        assert!(size > codegen::MAX_INLINE_TEMPLATE_BYTES);
    }

    #[test]
    fn test_artifact_bucket_reaches_script() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let state_dir = dir.path().join("state");
        let out_dir = dir.path().join("out");
        let report = deploy(&deploy_cfg(&c, &state_dir, &out_dir, true), &FakeRunner::new(0)).unwrap();
        assert!(report.script.contains("--s3-bucket 'cfn-artifacts'"));
    }

    #[test]
    fn test_deploy_then_redeploy_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let state_dir = dir.path().join("state");
        let out_dir = dir.path().join("out");
        let runner = FakeRunner::new(0);

        let first = deploy(&deploy_cfg(&c, &state_dir, &out_dir, false), &runner).unwrap();
        let result = first.result.unwrap();
        assert!(result.created > 0);
        assert_eq!(runner.scripts.borrow().len(), 1);

        let second = deploy(&deploy_cfg(&c, &state_dir, &out_dir, false), &runner).unwrap();
        assert!(!second.plan.has_changes());
        assert_eq!(second.result.unwrap().unchanged, result.created);

        let events = eventlog::read_events(&state_dir, "CodeRefactorInfra").unwrap();
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_failed_deploy_keeps_previous_lock() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let state_dir = dir.path().join("state");
        let out_dir = dir.path().join("out");

        let err = deploy(&deploy_cfg(&c, &state_dir, &out_dir, false), &FakeRunner::new(255))
            .unwrap_err();
        assert!(matches!(err, InfraError::Command { code: 255, .. }));
        assert!(state::load_lock(&state_dir, "CodeRefactorInfra").unwrap().is_none());
        let events = eventlog::read_events(&state_dir, "CodeRefactorInfra").unwrap();
        assert!(matches!(
            events.last().unwrap().event,
            ProvenanceEvent::DeployFailed { .. }
        ));
    }

    #[test]
    fn test_destroy_sweeps_interfaces_and_removes_lock() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let state_dir = dir.path().join("state");
        let out_dir = dir.path().join("out");
        deploy(&deploy_cfg(&c, &state_dir, &out_dir, false), &FakeRunner::new(0)).unwrap();

        let runner = FakeRunner::new(0);
        let report = destroy(
            &DestroyConfig {
                config: &c,
                state_dir: &state_dir,
                aws_cli: DEFAULT_AWS_CLI,
                dry_run: false,
            },
            &runner,
        )
        .unwrap();
        assert!(report.lock_removed);
        assert_eq!(report.cleanup_ok, Some(true));
        let scripts = runner.scripts.borrow();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains("code-refactor-frontend-123456789012-us-east-1"));
        assert!(scripts[1].contains("delete-network-interface"));
    }

    #[test]
    fn test_destroy_dry_run_lists_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let runner = FakeRunner::new(0);
        let report = destroy(
            &DestroyConfig {
                config: &c,
                state_dir: dir.path(),
                aws_cli: DEFAULT_AWS_CLI,
                dry_run: true,
            },
            &runner,
        )
        .unwrap();
        assert!(runner.scripts.borrow().is_empty());
        assert_eq!(report.cleanup_ok, None);
        let pos = |id: &str| report.teardown.iter().position(|x| x == id).unwrap();
        assert!(pos("CodeRefactorService") < pos(VPC_ID));
    }

    #[test]
    fn test_template_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        assert_eq!(template_is_current(&c, dir.path()).unwrap(), None);
        synth_to_disk(&c, dir.path()).unwrap();
        assert_eq!(template_is_current(&c, dir.path()).unwrap(), Some(true));
        std::fs::write(template_path(dir.path(), &c.name), "{}").unwrap();
        assert_eq!(template_is_current(&c, dir.path()).unwrap(), Some(false));
    }

    #[test]
    fn test_describe_outputs_failure() {
        let err = describe_outputs(&config(), DEFAULT_AWS_CLI, &FakeRunner::new(254)).unwrap_err();
        assert!(matches!(err, InfraError::Command { code: 254, .. }));
    }

    #[test]
    fn test_failed_destroy_still_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let c = config();
        let runner = FakeRunner::new(1);
        let err = destroy(
            &DestroyConfig {
                config: &c,
                state_dir: dir.path(),
                aws_cli: DEFAULT_AWS_CLI,
                dry_run: false,
            },
            &runner,
        )
        .unwrap_err();
        assert!(matches!(err, InfraError::Command { code: 1, .. }));
        assert_eq!(runner.scripts.borrow().len(), 2);
    }
}
