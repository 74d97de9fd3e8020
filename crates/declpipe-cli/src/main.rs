//! Declpipe - declarative pipeline deployer
//!
//! Usage:
//!   declpipe deploy --env dev                  # Reconcile resources, publish pipeline
//!   declpipe deploy --env prod --dry-run       # Report what would change
//!   declpipe deploy --env stage --rollback --version <sha>

mod prompt;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use declpipe_core::commands::{
    DEFAULT_DEPLOYMENT_FILE, DeployCommand, DeployOptions, DeployReport, PipelineReport,
};
use declpipe_core::context::DeployContext;
use declpipe_core::deploy::{EnvironmentReport, ReconcileOutcome};

#[derive(Parser)]
#[command(name = "declpipe")]
#[command(about = "Declarative data-pipeline deployer", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy resources and the orchestration pipeline to an environment
    Deploy(DeployArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Environment {
    Dev,
    Stage,
    Prod,
}

impl Environment {
    fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Stage => "stage",
            Environment::Prod => "prod",
        }
    }
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable summary
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Args)]
struct DeployArgs {
    /// Target environment
    #[arg(long, value_enum)]
    env: Environment,
    /// Deployment file describing the environments
    #[arg(long, default_value = DEFAULT_DEPLOYMENT_FILE)]
    deployment_file: PathBuf,
    /// Report intended changes without applying them
    #[arg(long)]
    dry_run: bool,
    /// Check out and republish an earlier version (requires --version)
    #[arg(long, requires = "version")]
    rollback: bool,
    /// Version id to publish instead of the current commit
    #[arg(long)]
    version: Option<String>,
    /// Deploy with uncommitted changes and skip the ancestry check
    #[arg(long)]
    force: bool,
    /// Skip confirmation prompts (for CI/CD)
    #[arg(short = 'y', long)]
    yes: bool,
    /// Working directory holding the pipeline sources
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
    /// Output format
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "declpipe=debug,declpipe_core=debug,info"
    } else {
        "declpipe=info,declpipe_core=info,warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Deploy(args) => run_deploy(args),
    }
}

fn run_deploy(args: DeployArgs) -> Result<()> {
    let env = args.env.as_str();
    let work_dir = args
        .work_dir
        .canonicalize()
        .with_context(|| format!("Working directory not found: {}", args.work_dir.display()))?;

    let ctx = DeployContext::from_system(&work_dir).context("Failed to initialise deploy context")?;

    let mut options = DeployOptions::new(env)
        .with_deployment_file(args.deployment_file.clone())
        .dry_run(args.dry_run)
        .rollback(args.rollback)
        .force(args.force);
    if let Some(version) = &args.version {
        options = options.with_version(version.clone());
    }

    let yes = args.yes;
    let confirm = move |changes: &[String]| prompt::confirm_forced_deploy(changes, yes);
    let report = DeployCommand::new(&ctx)
        .execute(&options, &confirm)
        .with_context(|| format!("Deployment to '{env}' failed"))?;

    match args.format {
        OutputFormat::Table => print_report(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report_json(&report))?),
    }
    Ok(())
}

fn print_report(report: &DeployReport) {
    if !report.forced_changes.is_empty() {
        println!(
            "{}",
            style("⚠ Deployed with uncommitted changes (--force)").yellow().bold()
        );
    }

    if let Some(resources) = &report.resources {
        print_resources(resources);
    }
    if let Some(pipeline) = &report.pipeline {
        print_pipeline(pipeline);
    }

    println!();
    println!("  Resources: {}", report.resource_status);
    println!("  Pipeline:  {}", report.pipeline_status);
    println!();
    println!("{}", style(format!("✓ {}", report.summary())).green());
}

fn print_resources(resources: &EnvironmentReport) {
    for profile in &resources.skipped_profiles {
        println!("• Skipping resource profile '{profile}'");
    }
    for resource in &resources.resources {
        let verb = match (resource.outcome, resource.applied) {
            (ReconcileOutcome::Created, true) => "Created",
            (ReconcileOutcome::Created, false) => "Would create",
            (ReconcileOutcome::Updated, true) => "Updated",
            (ReconcileOutcome::Updated, false) => "Would update",
            (ReconcileOutcome::Unchanged, _) => "Unchanged",
        };
        println!("✓ {verb} {} '{}'", resource.kind, resource.resource_id);
        if !resource.changed_fields.is_empty() {
            println!("  fields: {}", resource.changed_fields.join(", "));
        }
    }
}

fn print_pipeline(pipeline: &PipelineReport) {
    println!(
        "Pipeline '{}' version {}",
        style(&pipeline.pipeline_id).bold(),
        style(pipeline.version.as_str()).cyan()
    );
    if pipeline.reused_artifacts {
        println!("  Reusing artifacts at {}", pipeline.artifact_base_uri);
    }
    for uri in &pipeline.uploaded {
        println!("  Uploaded {uri}");
    }
    if let Some(publish) = &pipeline.publish {
        for generation in &publish.conflicts {
            println!(
                "  {} manifest changed concurrently (generation match: {generation}), retried",
                style("⚠").yellow()
            );
        }
        println!(
            "  Published {} as default version (attempt {})",
            pipeline.version, publish.attempts
        );
    }
}

fn report_json(report: &DeployReport) -> serde_json::Value {
    let resources = report.resources.as_ref().map(|r| {
        serde_json::json!({
            "skipped_profiles": r.skipped_profiles,
            "resources": r.resources.iter().map(|res| serde_json::json!({
                "kind": res.kind,
                "id": res.resource_id,
                "outcome": format!("{:?}", res.outcome).to_lowercase(),
                "changed_fields": res.changed_fields,
                "applied": res.applied,
            })).collect::<Vec<_>>(),
        })
    });
    let pipeline = report.pipeline.as_ref().map(|p| {
        serde_json::json!({
            "pipeline_id": p.pipeline_id,
            "version": p.version.as_str(),
            "artifact_base_uri": p.artifact_base_uri,
            "manifest_uri": p.manifest_uri,
            "uploaded": p.uploaded,
            "reused_artifacts": p.reused_artifacts,
            "attempts": p.publish.as_ref().map(|r| r.attempts),
            "previous_versions": p.publish.as_ref().map(|r| {
                r.record.prev_version.iter().map(|v| v.as_str().to_string()).collect::<Vec<_>>()
            }),
        })
    });

    serde_json::json!({
        "env": report.env,
        "resource_status": report.resource_status.to_string(),
        "pipeline_status": report.pipeline_status.to_string(),
        "resources": resources,
        "pipeline": pipeline,
        "forced_changes": report.forced_changes,
        "summary": report.summary(),
    })
}
