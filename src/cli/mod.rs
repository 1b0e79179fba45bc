//! CLI subcommands: init, validate, synth, plan, deploy, destroy, test, lint,
//! clean, status, schema, completions.

use crate::core::codegen::{self, Format};
use crate::core::error::{InfraError, Result};
use crate::core::executor::{self, DeployConfig, DestroyConfig, DEFAULT_AWS_CLI};
use crate::core::{checks, lint, parser, planner, resolver, state, types};
use crate::resources::app::build_app_stack;
use crate::transport::Local;
use crate::tripwire::eventlog;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "refactor-infra",
    version,
    about = "Typed CloudFormation stack for the code-refactor service"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to infra.yaml
    #[arg(short, long, global = true, default_value = "infra.yaml")]
    pub file: PathBuf,

    /// Target account id (overrides infra.yaml)
    #[arg(long, global = true, env = "CDK_DEFAULT_ACCOUNT")]
    pub account: Option<String>,

    /// Target region (overrides infra.yaml)
    #[arg(long, global = true, env = "CDK_DEFAULT_REGION")]
    pub region: Option<String>,

    /// State directory
    #[arg(long, global = true, default_value = "state")]
    pub state_dir: PathBuf,

    /// Synthesized output directory
    #[arg(long, global = true, default_value = "out")]
    pub out_dir: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter infra.yaml and state directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse and validate infra.yaml
    Validate,

    /// Render the template
    Synth {
        /// Output format (json, yaml)
        #[arg(long, default_value = "json")]
        format: Format,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Diff the template against the last deployed lock
    Plan,

    /// Synthesize and hand the template to the engine
    Deploy {
        /// Print the engine script without running it
        #[arg(long)]
        dry_run: bool,

        /// Upload bucket for templates over the inline size limit
        #[arg(long)]
        artifact_bucket: Option<String>,

        /// Engine CLI executable
        #[arg(long, env = "AWS_CLI", default_value = DEFAULT_AWS_CLI)]
        aws_cli: String,

        /// Deploy even when contract checks fail
        #[arg(long)]
        skip_checks: bool,
    },

    /// Empty the buckets, delete the stack, sweep network interfaces
    Destroy {
        /// Print the scripts without running them
        #[arg(long)]
        dry_run: bool,

        /// Engine CLI executable
        #[arg(long, env = "AWS_CLI", default_value = DEFAULT_AWS_CLI)]
        aws_cli: String,
    },

    /// Run the structural contract checks
    Test,

    /// Config validation plus naming lint
    Lint,

    /// Remove synthesized output
    Clean {
        /// Also remove the state directory
        #[arg(long)]
        state: bool,
    },

    /// Show the last deployed lock
    Status {
        /// Also fetch the deployed stack's outputs from the engine
        #[arg(long)]
        outputs: bool,

        /// Engine CLI executable
        #[arg(long, env = "AWS_CLI", default_value = DEFAULT_AWS_CLI)]
        aws_cli: String,
    },

    /// Print the JSON schema of infra.yaml
    Schema,

    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, global: &GlobalArgs) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate => cmd_validate(global),
        Commands::Synth { format, out } => cmd_synth(global, format, out.as_deref()),
        Commands::Plan => cmd_plan(global),
        Commands::Deploy {
            dry_run,
            artifact_bucket,
            aws_cli,
            skip_checks,
        } => cmd_deploy(global, dry_run, artifact_bucket.as_deref(), &aws_cli, skip_checks),
        Commands::Destroy { dry_run, aws_cli } => cmd_destroy(global, dry_run, &aws_cli),
        Commands::Test => cmd_test(global),
        Commands::Lint => cmd_lint(global),
        Commands::Clean { state } => cmd_clean(global, state),
        Commands::Status { outputs, aws_cli } => cmd_status(global, outputs.then_some(aws_cli.as_str())),
        Commands::Schema => cmd_schema(&mut std::io::stdout()),
        Commands::Completions { shell } => {
            cmd_completions(shell, &mut std::io::stdout());
            Ok(())
        }
    }
}

const STARTER_CONFIG: &str = r#"version: "1.0"
name: CodeRefactorInfra
description: "Code refactor service infrastructure"
prefix: code-refactor

# Or set CDK_DEFAULT_ACCOUNT / CDK_DEFAULT_REGION
# account: "123456789012"
# region: us-east-1

tags:
  Project: code-refactor

policy:
  tripwire: true
  lock_file: true
  check_before_deploy: true
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("infra.yaml");
    if config_path.exists() {
        return Err(InfraError::Validation(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)?;
    std::fs::write(&config_path, STARTER_CONFIG)?;

    println!("Initialized code-refactor stack at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn load(global: &GlobalArgs) -> Result<types::StackConfig> {
    parser::load_config(&global.file, global.account.as_deref(), global.region.as_deref())
}

fn cmd_validate(global: &GlobalArgs) -> Result<()> {
    let mut config = parser::parse_config_file(&global.file)?;
    parser::apply_overrides(&mut config, global.account.as_deref(), global.region.as_deref());
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(InfraError::Validation(format!("{} validation error(s)", errors.len())));
    }
    println!(
        "OK: {} ({} / {})",
        config.name,
        config.account_id(),
        config.region_name()
    );
    Ok(())
}

fn cmd_synth(global: &GlobalArgs, format: Format, out: Option<&Path>) -> Result<()> {
    let config = load(global)?;
    let app = build_app_stack(&config)?;
    let rendered = codegen::render_template(&app.template, format)?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &rendered)?;
            println!(
                "Synthesized {} ({} resources, {} outputs) -> {}",
                config.name,
                app.template.resources.len(),
                app.template.outputs.len(),
                path.display()
            );
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn cmd_plan(global: &GlobalArgs) -> Result<()> {
    let config = load(global)?;
    let app = build_app_stack(&config)?;
    let order = resolver::build_execution_order(&app.template)?;
    let lock = state::load_lock(&global.state_dir, &config.name)?;
    let plan = planner::plan(&config.name, &app.template, &order, lock.as_ref())?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();
    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_deploy(
    global: &GlobalArgs,
    dry_run: bool,
    artifact_bucket: Option<&str>,
    aws_cli: &str,
    skip_checks: bool,
) -> Result<()> {
    let config = load(global)?;
    let cfg = DeployConfig {
        config: &config,
        state_dir: &global.state_dir,
        out_dir: &global.out_dir,
        aws_cli,
        artifact_bucket,
        dry_run,
        skip_checks,
    };
    let report = executor::deploy(&cfg, &Local)?;

    match report.result {
        None => {
            print_plan(&report.plan);
            println!();
            println!("Template: {}", report.template_path.display());
            println!("{}", report.script);
            println!("Dry run: nothing submitted.");
        }
        Some(result) => println!(
            "Deploy complete: {} created, {} updated, {} destroyed, {} unchanged ({:.1}s).",
            result.created,
            result.updated,
            result.destroyed,
            result.unchanged,
            result.total_duration.as_secs_f64()
        ),
    }
    Ok(())
}

fn cmd_destroy(global: &GlobalArgs, dry_run: bool, aws_cli: &str) -> Result<()> {
    let config = load(global)?;
    let cfg = DestroyConfig {
        config: &config,
        state_dir: &global.state_dir,
        aws_cli,
        dry_run,
    };
    let report = executor::destroy(&cfg, &Local)?;

    if dry_run {
        println!("Teardown ({} resources):", report.teardown.len());
        for id in &report.teardown {
            println!("  - {}", id);
        }
        println!();
        println!("{}", report.script);
        println!("{}", report.cleanup_script);
        println!("Dry run: nothing deleted.");
        return Ok(());
    }
    if report.cleanup_ok == Some(false) {
        println!("Network interface cleanup reported errors (ignored).");
    }
    println!("Destroyed {}.", config.name);
    Ok(())
}

fn cmd_test(global: &GlobalArgs) -> Result<()> {
    let config = load(global)?;
    let results = checks::run_all(&config)?;
    let mut failed = 0;
    for r in &results {
        if r.passed() {
            println!("  ok    {}", r.name);
        } else {
            println!("  FAIL  {}", r.name);
            for f in &r.findings {
                println!("        {}", f);
            }
            failed += r.findings.len();
        }
    }
    println!();
    if failed > 0 {
        return Err(InfraError::Checks(failed));
    }
    println!("{} checks passed.", results.len());
    Ok(())
}

fn cmd_lint(global: &GlobalArgs) -> Result<()> {
    let mut config = parser::parse_config_file(&global.file)?;
    parser::apply_overrides(&mut config, global.account.as_deref(), global.region.as_deref());
    let issues = match build_app_stack(&config) {
        Ok(app) => lint::lint(&config, &app.template),
        // an unbuildable config still gets its validation errors listed
        Err(e) => {
            tracing::debug!(error = %e, "stack did not build; linting config only");
            lint::lint(&config, &crate::core::template::Template::new(None))
        }
    };
    if issues.is_empty() {
        println!("Lint: no issues.");
        return Ok(());
    }
    for i in &issues {
        println!("  {}", i);
    }
    Err(InfraError::Validation(format!("{} lint issue(s)", issues.len())))
}

fn cmd_clean(global: &GlobalArgs, state: bool) -> Result<()> {
    let mut targets = vec![global.out_dir.as_path()];
    if state {
        targets.push(global.state_dir.as_path());
    }
    for dir in targets {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
            println!("Removed {}/", dir.display());
        }
    }
    Ok(())
}

fn cmd_status(global: &GlobalArgs, outputs_via: Option<&str>) -> Result<()> {
    let mut config = parser::parse_config_file(&global.file)?;
    parser::apply_overrides(&mut config, global.account.as_deref(), global.region.as_deref());
    let Some(lock) = state::load_lock(&global.state_dir, &config.name)? else {
        println!("No state found for {}. Run `refactor-infra deploy` first.", config.name);
        return Ok(());
    };
    let events = eventlog::read_events(&global.state_dir, &config.name)?;

    println!("Stack: {} ({} / {})", lock.stack, lock.account, lock.region);
    println!("  Generated: {}", lock.generated_at);
    println!("  Generator: {}", lock.generator);
    println!("  Template:  {}", lock.template_hash);
    match executor::template_is_current(&config, &global.out_dir) {
        Ok(Some(true)) => println!("  Synthesized output is current."),
        Ok(Some(false)) => println!("  Synthesized output is stale; run `refactor-infra synth`."),
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "could not compare synthesized output"),
    }
    println!("  Resources: {}", lock.resources.len());
    println!("  Events:    {}", events.len());
    for (id, rl) in &lock.resources {
        println!("    {}: {} [{}]", id, rl.status, rl.resource_type);
    }

    if let Some(aws_cli) = outputs_via {
        println!();
        println!("{}", executor::describe_outputs(&config, aws_cli, &Local)?.trim_end());
    }
    Ok(())
}

fn cmd_schema(out: &mut dyn Write) -> Result<()> {
    let schema = schemars::schema_for!(types::StackConfig);
    writeln!(out, "{}", serde_json::to_string_pretty(&schema)?)?;
    Ok(())
}

fn cmd_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
name: CodeRefactorInfra
account: "123456789012"
region: us-east-1
"#;

    fn global(dir: &Path, yaml: &str) -> GlobalArgs {
        let file = dir.join("infra.yaml");
        std::fs::write(&file, yaml).unwrap();
        GlobalArgs {
            file,
            account: None,
            region: None,
            state_dir: dir.join("state"),
            out_dir: dir.join("out"),
            verbose: false,
        }
    }

    #[test]
    fn test_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("infra.yaml").exists());
        assert!(sub.join("state").is_dir());
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("infra.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_starter_config_needs_only_account_and_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = global(dir.path(), STARTER_CONFIG);
        assert!(cmd_validate(&g).is_err());
        g.account = Some("123456789012".to_string());
        g.region = Some("us-east-1".to_string());
        cmd_validate(&g).unwrap();
    }

    #[test]
    fn test_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), "version: \"2.0\"\nname: \"\"\n");
        assert!(matches!(cmd_validate(&g), Err(InfraError::Validation(_))));
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = global(dir.path(), VALID);
        g.file = dir.path().join("missing.yaml");
        assert!(matches!(cmd_validate(&g), Err(InfraError::Read { .. })));
    }

    #[test]
    fn test_synth_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        let json = dir.path().join("out/t.json");
        cmd_synth(&g, Format::Json, Some(&json)).unwrap();
        let t: crate::core::template::Template =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(t.outputs.len(), 13);

        let yaml = dir.path().join("t.yaml");
        cmd_synth(&g, Format::Yaml, Some(&yaml)).unwrap();
        assert!(std::fs::read_to_string(&yaml).unwrap().contains("AWS::EC2::VPC"));
    }

    #[test]
    fn test_plan_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        cmd_plan(&g).unwrap();
    }

    #[test]
    fn test_deploy_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        cmd_deploy(&g, true, Some("cfn-artifacts"), DEFAULT_AWS_CLI, false).unwrap();
        assert!(g.out_dir.join("CodeRefactorInfra.template.json").exists());
        assert!(!state::lock_file_path(&g.state_dir, "CodeRefactorInfra").exists());
    }

    #[test]
    fn test_deploy_engine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        let err = cmd_deploy(&g, false, Some("cfn-artifacts"), "false", false).unwrap_err();
        assert!(matches!(err, InfraError::Command { code: 1, .. }));
        assert!(!state::lock_file_path(&g.state_dir, "CodeRefactorInfra").exists());
    }

    #[test]
    fn test_deploy_then_status_and_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        cmd_deploy(&g, false, Some("cfn-artifacts"), "true", false).unwrap();
        assert!(state::lock_file_path(&g.state_dir, "CodeRefactorInfra").exists());
        cmd_status(&g, None).unwrap();
        cmd_status(&g, Some("true")).unwrap();
        assert!(cmd_status(&g, Some("false")).is_err());

        cmd_destroy(&g, false, "true").unwrap();
        assert!(!state::lock_file_path(&g.state_dir, "CodeRefactorInfra").exists());
    }

    #[test]
    fn test_destroy_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        cmd_destroy(&g, true, DEFAULT_AWS_CLI).unwrap();
    }

    #[test]
    fn test_contract_checks_pass() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        cmd_test(&g).unwrap();
    }

    #[test]
    fn test_lint_clean_and_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        cmd_lint(&g).unwrap();

        let bad = global(
            dir.path(),
            "version: \"1.0\"\nname: CodeRefactorInfra\naccount: \"123456789012\"\nregion: us-east-1\nnaming:\n  bucket: Bad_Bucket\n",
        );
        assert!(cmd_lint(&bad).is_err());
    }

    #[test]
    fn test_clean() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        std::fs::create_dir_all(&g.out_dir).unwrap();
        std::fs::create_dir_all(&g.state_dir).unwrap();
        cmd_clean(&g, false).unwrap();
        assert!(!g.out_dir.exists());
        assert!(g.state_dir.exists());
        cmd_clean(&g, true).unwrap();
        assert!(!g.state_dir.exists());
    }

    #[test]
    fn test_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        let g = global(dir.path(), VALID);
        cmd_status(&g, None).unwrap();
    }

    #[test]
    fn test_schema() {
        let mut buf = Vec::new();
        cmd_schema(&mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("StackConfig"));
        assert!(s.contains("check_before_deploy"));
    }

    #[test]
    fn test_completions() {
        let mut buf = Vec::new();
        cmd_completions(Shell::Bash, &mut buf);
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("refactor-infra"));
        assert!(s.contains("deploy"));
    }

    #[test]
    fn test_cli_parses_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "refactor-infra",
            "deploy",
            "--dry-run",
            "--region",
            "eu-west-1",
            "--file",
            "x.yaml",
        ])
        .unwrap();
        assert_eq!(cli.global.file, PathBuf::from("x.yaml"));
        assert_eq!(cli.global.region.as_deref(), Some("eu-west-1"));
        assert!(matches!(cli.command, Commands::Deploy { dry_run: true, .. }));
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
