mod server;
mod upload;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use guide_contracts::profiles::DEFAULT_PROFILE;
use guide_contracts::store::read_plan;
use guide_contracts::{GoalStore, PlanningProfile, ProfileRegistry};
use guide_engine::{
    ArtifactLayout, Capabilities, GeminiConfig, PlanWorkflow, PreviewOutcome, WorkflowArtifacts,
};
use image::DynamicImage;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "guide-rs",
    version,
    about = "Turn scene images into grounded manipulation plans"
)]
struct Cli {
    /// Model backend used for reasoning and preview synthesis.
    #[arg(long, global = true, value_enum, default_value_t = Backend::Gemini)]
    backend: Backend,
    #[arg(long, global = true, default_value = DEFAULT_PROFILE)]
    profile: String,
    /// Artifact directory for `plan` and `refresh`.
    #[arg(long, global = true, default_value = "data")]
    out: PathBuf,
    /// Overrides RUST_LOG (e.g. `debug`, `guide_engine=trace`).
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Gemini,
    Dryrun,
}

impl Backend {
    fn capabilities(self) -> Capabilities {
        match self {
            Self::Gemini => Capabilities::gemini(GeminiConfig::from_env()),
            Self::Dryrun => Capabilities::dryrun(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a plan from a scene image and print it as JSON.
    Plan(PlanArgs),
    /// Check a previous plan against an updated scene image.
    Refresh(RefreshArgs),
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Send an image to a running server.
    Upload(UploadArgs),
}

#[derive(Debug, Parser)]
struct PlanArgs {
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct RefreshArgs {
    image: PathBuf,
    /// JSON plan produced by `plan` or a previous `refresh`.
    plan_json: PathBuf,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,
    #[arg(long, default_value = "goals")]
    goals_dir: PathBuf,
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct UploadArgs {
    image: PathBuf,
    /// Existing goal to refresh; omit to create a new goal.
    #[arg(long)]
    goal_id: Option<String>,
    #[arg(long, default_value = upload::DEFAULT_BASE_URL)]
    base_url: String,
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

/// Which workflow produced the artifacts; selects status wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Generation,
    Continuation,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("guide-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref())?;
    match &cli.command {
        Command::Plan(args) => run_plan(&cli, args),
        Command::Refresh(args) => run_refresh(&cli, args),
        Command::Serve(args) => run_serve(&cli, args),
        Command::Upload(args) => run_upload(args),
    }
}

fn setup_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid --log-level '{directive}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))?;
    Ok(())
}

fn resolve_profile(name: &str) -> Result<PlanningProfile> {
    let registry = ProfileRegistry::default();
    registry.get(name).cloned().ok_or_else(|| {
        let available: Vec<String> = registry
            .list()
            .map(|profile| format!("  {}: {}", profile.name, profile.description))
            .collect();
        anyhow!(
            "unknown profile '{}'; available profiles:\n{}",
            name,
            available.join("\n")
        )
    })
}

fn build_workflow(cli: &Cli) -> Result<PlanWorkflow> {
    let profile = resolve_profile(&cli.profile)?;
    let capabilities = cli.backend.capabilities();
    info!(backend = ?cli.backend, profile = %profile.name, "workflow ready");
    Ok(PlanWorkflow::new(capabilities, profile))
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

fn run_plan(cli: &Cli, args: &PlanArgs) -> Result<i32> {
    let workflow = build_workflow(cli)?;
    let image = load_image(&args.image)?;
    let artifacts = workflow.generate(&image, &ArtifactLayout::new(&cli.out))?;
    report(RunKind::Generation, &artifacts)?;
    Ok(0)
}

fn run_refresh(cli: &Cli, args: &RefreshArgs) -> Result<i32> {
    let workflow = build_workflow(cli)?;
    let existing = read_plan(&args.plan_json)
        .with_context(|| format!("failed to load plan {}", args.plan_json.display()))?;
    let image = load_image(&args.image)?;
    let artifacts = workflow.refresh(&image, &existing, &ArtifactLayout::new(&cli.out))?;
    report(RunKind::Continuation, &artifacts)?;
    Ok(0)
}

fn run_serve(cli: &Cli, args: &ServeArgs) -> Result<i32> {
    let workflow = build_workflow(cli)?;
    let state = server::AppState::new(workflow, GoalStore::new(&args.goals_dir), &args.data_dir);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(server::serve(&args.bind, state))?;
    Ok(0)
}

fn run_upload(args: &UploadArgs) -> Result<i32> {
    let response = upload::upload_image(
        &args.image,
        &args.base_url,
        args.goal_id.as_deref(),
        Duration::from_secs(args.timeout_secs),
    )?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(0)
}

/// Plan JSON to stdout, status lines to stderr.
fn report(kind: RunKind, artifacts: &WorkflowArtifacts) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &artifacts.plan)?;
    writeln!(out)?;
    for line in status_lines(kind, artifacts) {
        eprintln!("{line}");
    }
    Ok(())
}

fn status_lines(kind: RunKind, artifacts: &WorkflowArtifacts) -> Vec<String> {
    let (prefix, title) = match kind {
        RunKind::Generation => ("", "Banana"),
        RunKind::Continuation => ("continuation ", "Continuation banana"),
    };
    // Generation highlights from every returned step, refresh from the
    // actionable ones.
    let has_steps = match kind {
        RunKind::Generation => !artifacts.plan.steps.is_empty(),
        RunKind::Continuation => !artifacts.plan.actionable_steps().is_empty(),
    };

    let highlight = match &artifacts.highlight_path {
        Some(path) => format!(
            "Saved {prefix}first-step bounding box visualization to {}",
            path.display()
        ),
        None if !has_steps => format!(
            "Skipped {prefix}first-step bounding box visualization because no steps were returned."
        ),
        None => format!(
            "Skipped {prefix}first-step bounding box visualization because no matching object was found for the first step."
        ),
    };
    let preview = match &artifacts.preview {
        PreviewOutcome::Generated(path) => format!(
            "Generated {prefix}banana image for the first step at {}",
            path.display()
        ),
        PreviewOutcome::NoImage => format!("{title} image generation failed."),
        PreviewOutcome::Failed(reason) => format!("{title} image generation failed: {reason}"),
        PreviewOutcome::SkippedNoStep => {
            format!("{title} image generation skipped because no steps were returned.")
        }
        PreviewOutcome::SkippedNoHighlight => format!(
            "{title} image generation skipped because the first-step bounding box image was unavailable."
        ),
    };
    vec![highlight, preview]
}
