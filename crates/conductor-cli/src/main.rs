//! Conductor - multi-agent pipeline runner
//!
//! The `conductor` command plans and runs agent pipelines.
//!
//! ## Commands
//!
//! - `run`: Execute a pipeline on a request
//! - `plan`: Show the execution waves of a pipeline
//! - `pipelines`: List known pipeline definitions
//! - `agents`: List the agent catalog
//! - `validate`: Check a request before running it

mod agents;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use conductor_core::obs::RunSpan;
use conductor_core::{
    generate_correlation_id, publish_result, validate_request, Orchestrator, OrchestratorSettings,
    PipelineCatalog, PipelineConfig, PipelineRunResult,
};
use conductor_state::http_sink::HttpSinkConfig;
use conductor_state::{ExecutionId, HttpResultSink};
use serde_json::{json, Value};
use tracing::{info, warn, Level};

const DEFAULT_PIPELINE: &str = include_str!("../pipelines/default.toml");
const ITERATIVE_PIPELINE: &str = include_str!("../pipelines/iterative_development.toml");

#[derive(Parser)]
#[command(name = "conductor")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-agent pipeline orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory of extra *.toml / *.json pipeline definitions
    #[arg(long, global = true, env = "CONDUCTOR_PIPELINES_DIR")]
    pipelines_dir: Option<PathBuf>,

    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SettingsArgs {
    /// Steps of one wave allowed to run at once
    #[arg(
        long,
        global = true,
        env = "CONDUCTOR_MAX_CONCURRENCY",
        default_value_t = 4
    )]
    max_concurrency: usize,

    /// Timeout for regular steps without their own bound, in seconds
    #[arg(
        long,
        global = true,
        env = "CONDUCTOR_STEP_TIMEOUT_SECS",
        default_value_t = 300
    )]
    step_timeout_secs: u64,

    /// Capacity of the live event stream
    #[arg(
        long,
        global = true,
        env = "CONDUCTOR_EVENT_CAPACITY",
        default_value_t = 256
    )]
    event_capacity: usize,
}

impl SettingsArgs {
    fn to_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_concurrency: self.max_concurrency,
            default_step_timeout: Duration::from_secs(self.step_timeout_secs),
            event_capacity: self.event_capacity,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline on a request
    Run {
        /// Request text, or @path to read it from a file
        input: String,

        /// Pipeline to run
        #[arg(short, long, default_value = "default")]
        pipeline: String,

        /// Publish the finished run to the project backend
        #[arg(long)]
        publish: bool,

        /// Backend base URL (default: $CONDUCTOR_BACKEND_URL or http://localhost:8000)
        #[arg(long)]
        sink_url: Option<String>,

        /// Print the full run result as JSON
        #[arg(long)]
        print_json: bool,
    },

    /// Show the execution waves of a pipeline
    Plan {
        #[arg(default_value = "default")]
        pipeline: String,
    },

    /// List known pipeline definitions
    Pipelines,

    /// List the agent catalog
    Agents,

    /// Check a request before running it
    Validate {
        /// Request text, or @path to read it from a file
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    conductor_core::telemetry::init_tracing(cli.json, level);

    let catalog = load_catalog(cli.pipelines_dir.as_deref())?;
    let settings = cli.settings.to_settings();

    match cli.command {
        Commands::Run {
            input,
            pipeline,
            publish,
            sink_url,
            print_json,
        } => {
            let request = read_input(&input)?;
            let sink = if publish {
                let config = sink_url
                    .as_deref()
                    .map(HttpSinkConfig::new)
                    .unwrap_or_else(HttpSinkConfig::from_env);
                Some(HttpResultSink::new(config).context("failed to build result sink")?)
            } else {
                None
            };
            let result = cmd_run(catalog, settings, &pipeline, &request, sink.as_ref()).await?;
            print_run(&result, print_json)?;
            if !result.success {
                bail!(
                    "pipeline '{}' failed: {}",
                    result.pipeline_name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Commands::Plan { pipeline } => cmd_plan(&catalog, &pipeline),
        Commands::Pipelines => {
            cmd_pipelines(&catalog);
            Ok(())
        }
        Commands::Agents => {
            cmd_agents();
            Ok(())
        }
        Commands::Validate { input } => cmd_validate(&read_input(&input)?),
    }
}

/// Built-in definitions plus any found in `dir`; files override built-ins.
fn load_catalog(dir: Option<&Path>) -> Result<PipelineCatalog> {
    let mut catalog = PipelineCatalog::new();
    for source in [DEFAULT_PIPELINE, ITERATIVE_PIPELINE] {
        let config =
            PipelineConfig::from_toml_str(source).context("invalid built-in pipeline")?;
        catalog.insert(config);
    }
    if let Some(dir) = dir {
        let loaded = catalog
            .load_dir(dir)
            .with_context(|| format!("failed to load pipelines from {}", dir.display()))?;
        info!(loaded, dir = %dir.display(), "loaded pipeline definitions");
    }
    Ok(catalog)
}

/// `@path` reads the file, anything else is taken literally.
fn read_input(input: &str) -> Result<String> {
    match input.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read request from {path}")),
        None => Ok(input.to_string()),
    }
}

async fn cmd_run(
    catalog: PipelineCatalog,
    settings: OrchestratorSettings,
    pipeline: &str,
    request: &str,
    sink: Option<&HttpResultSink>,
) -> Result<PipelineRunResult> {
    let check = validate_request(request);
    if !check.ok {
        bail!("request rejected: {}", check.warnings.join("; "));
    }
    for warning in &check.warnings {
        warn!(%warning, "request warning");
    }

    let mut orchestrator = Orchestrator::new(Arc::new(agents::demo_registry()), catalog, settings);
    orchestrator
        .initialize(pipeline)
        .with_context(|| format!("failed to initialize pipeline '{pipeline}'"))?;

    let correlation_id = generate_correlation_id();
    let _span = RunSpan::enter(&correlation_id, pipeline);
    let input = json!(request);
    let result = orchestrator
        .execute(input.clone(), Some(correlation_id))
        .await
        .context("pipeline execution failed")?;

    if let Some(sink) = sink {
        // Best effort: the run result stands either way.
        publish_result(sink, ExecutionId::new(), &input, &result).await;
    }
    Ok(result)
}

fn print_run(result: &PipelineRunResult, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let status = if result.success { "succeeded" } else { "failed" };
    println!(
        "Pipeline '{}' {} in {} ms (correlation id {})",
        result.pipeline_name, status, result.duration_ms, result.correlation_id
    );
    for step in &result.steps {
        let marker = if step.succeeded() {
            "ok"
        } else if step.optional {
            "skipped"
        } else {
            "FAILED"
        };
        println!("  [{marker}] {} ({} ms)", step.key, step.duration_ms);
        if let Some(error) = &step.error {
            println!("        {error}");
        }
        if let Some(score) = result
            .results
            .get(&step.key)
            .and_then(|e| e.get("quality_score"))
        {
            println!("        quality score: {score}");
        }
    }
    if let Some(readme) = result
        .final_output
        .as_ref()
        .and_then(|o| o.get("readme"))
        .and_then(Value::as_str)
    {
        println!("\n{readme}");
    }
    Ok(())
}

fn cmd_plan(catalog: &PipelineCatalog, pipeline: &str) -> Result<()> {
    let config = catalog.get(pipeline)?;
    config.validate()?;
    let plan = conductor_core::plan(&config.steps)?;

    println!("Pipeline '{}' v{}", config.name, config.version);
    for wave in &plan.waves {
        println!("  wave {}: {}", wave.index + 1, wave.steps.join(", "));
    }
    Ok(())
}

fn cmd_pipelines(catalog: &PipelineCatalog) {
    for config in catalog.iter() {
        println!(
            "{:<24} v{:<8} {} steps  {}",
            config.name,
            config.version,
            config.steps.len(),
            config.description.as_deref().unwrap_or("")
        );
    }
}

fn cmd_agents() {
    let registry = agents::demo_registry();
    for meta in registry.available() {
        println!(
            "{:<26} {:<22} v{}  [{}]",
            meta.id,
            meta.name,
            meta.version,
            meta.capabilities.join(", ")
        );
    }
    for issue in registry.validate_dependencies() {
        println!("warning: {issue}");
    }
}

fn cmd_validate(request: &str) -> Result<()> {
    let result = validate_request(request);
    for warning in &result.warnings {
        println!("warning: {warning}");
    }
    for suggestion in &result.suggestions {
        println!("suggestion: {suggestion}");
    }
    if !result.ok {
        bail!("request is not valid");
    }
    println!("Request looks valid");
    Ok(())
}
