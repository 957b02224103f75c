//! Conductor CLI - run task trees through the orchestration core.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor_ai::CommandModel;
use conductor_core::{ArtifactRecord, ArtifactRegistry, ExecutionContext, Task};
use conductor_execution::{ExecutionConfig, ExecutionEngine, StrategyDeps, TracingProgress};
use conductor_tools::{CommandTool, EchoTool, InMemoryToolRegistry, Tool, ToolRegistry};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Task orchestration with pluggable execution strategies", long_about = None)]
struct Cli {
    /// Execution config (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Command that answers prompts on stdin (e.g. "llm -m mini")
    #[arg(long, global = true)]
    model_command: Option<String>,

    /// Print machine-readable JSON only
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task file
    Run {
        /// Task JSON file
        task: PathBuf,
        /// JSON object of artifacts to seed the root context with
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
    /// Show how each strategy evaluates a task
    Explain {
        /// Task JSON file
        task: PathBuf,
    },
    /// List available tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => ExecutionConfig::from_json_file(path)?,
        None => ExecutionConfig::default(),
    };

    let builtin: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool), Arc::new(CommandTool)];
    let tools = Arc::new(InMemoryToolRegistry::new(builtin));
    let mut deps = StrategyDeps::new()
        .with_tools(tools.clone())
        .with_progress(Arc::new(TracingProgress));
    if let Some(line) = cli.model_command.as_deref() {
        let model = CommandModel::from_command_line(line)
            .with_context(|| format!("Invalid model command: {:?}", line))?;
        deps = deps.with_model(Arc::new(model));
    } else {
        info!("No model command configured, prompts will not be executed");
    }

    let mut engine = ExecutionEngine::from_config(deps, config);

    match cli.command {
        Commands::Run { task, artifacts } => {
            let task = load_task(&task)?;
            let artifacts = match artifacts {
                Some(path) => load_artifacts(&path)?,
                None => ArtifactRegistry::new(),
            };

            let result = engine.run_with_artifacts(&task, artifacts).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Task: {}", result.metadata.task_id);
                println!("  Strategy: {}", result.metadata.strategy);
                println!("  Success: {}", result.success);
                println!("  Time: {}ms", result.metadata.execution_time);
                match (&result.result, &result.error) {
                    (Some(value), _) => println!("  Result: {}", serde_json::to_string_pretty(value)?),
                    (None, Some(error)) => println!("  Error: {}", error),
                    (None, None) => {}
                }
            }
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Explain { task } => {
            let task = load_task(&task)?;
            let ctx = ExecutionContext::new();
            let evaluations = engine.resolver().evaluate_strategies(&task, &ctx);
            let selected = match engine.resolver().select_strategy(&task, &ctx).await {
                Ok(strategy) => Some(strategy.name().to_string()),
                Err(e) => {
                    warn!(error = %e, "No strategy selected");
                    None
                }
            };

            if cli.json {
                let report = serde_json::json!({ "selected": selected, "strategies": evaluations });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Task: {}", task.id);
                println!("  Selected: {}", selected.as_deref().unwrap_or("none"));
                for evaluation in evaluations {
                    let verdict = match (evaluation.can_handle, &evaluation.error) {
                        (Some(true), _) => "yes".to_string(),
                        (Some(false), _) => "no".to_string(),
                        (None, Some(error)) => format!("error: {}", error),
                        (None, None) => "unknown".to_string(),
                    };
                    let complexity = evaluation
                        .complexity
                        .map(|c| format!(" (complexity {:.2})", c))
                        .unwrap_or_default();
                    println!("  {:>3} {:<12} {}{}", evaluation.priority, evaluation.name, verdict, complexity);
                }
            }
        }
        Commands::Tools => {
            let schemas = tools.list_tools();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&schemas)?);
            } else {
                println!("Tools ({})", schemas.len());
                for schema in schemas {
                    println!("  {} - {}", schema.name, schema.description);
                    for param in schema.parameters {
                        let required = if param.required { "required" } else { "optional" };
                        println!("    {}: {} ({}) {}", param.name, param.param_type, required, param.description);
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_task(path: &Path) -> Result<Task> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid task in {}", path.display()))
}

fn load_artifacts(path: &Path) -> Result<ArtifactRegistry> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let values: serde_json::Map<String, Value> =
        serde_json::from_str(&text).with_context(|| format!("Artifacts in {} must be a JSON object", path.display()))?;

    let mut registry = ArtifactRegistry::new();
    for (name, value) in values {
        registry.insert(name, ArtifactRecord::new(value).with_purpose("Seeded from the command line"));
    }
    Ok(registry)
}
