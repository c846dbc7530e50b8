use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pipecore::{ExecutionEvent, NodeDefinition, RunStatus, SandboxHandle, WorkflowDefinition};
use pipenodes::DockerSandbox;
use piperuntime::{ExecutorRegistry, PipeRuntime, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipe")]
#[command(about = "Pipeline workflow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file inside a sandbox container
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Container that executes generated fragments
        #[arg(short, long)]
        sandbox: String,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available components
    Components,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            sandbox,
            config,
            verbose,
        } => {
            let default = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
                )
                .init();

            run_workflow(&file, sandbox, config.as_deref()).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Components => {
            list_components();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let definition = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a workflow definition", file.display()))?;
    Ok(definition)
}

fn registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    pipenodes::register_all(&mut registry);
    registry
}

async fn run_workflow(file: &Path, sandbox: String, config: Option<&Path>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let definition = load_definition(file)?;
    println!("📋 Workflow: {}", definition.name.as_deref().unwrap_or("(unnamed)"));
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Edges: {}", definition.edges.len());
    println!();

    let config = RuntimeConfig::load(config)?;
    let runtime = PipeRuntime::new(Arc::new(DockerSandbox::new()), registry(), config);

    // Subscribe before submitting so no event is missed
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { node_count, .. } => {
                    println!("▶️  Run started ({} nodes)", node_count);
                }
                ExecutionEvent::NodeStarted {
                    node_id,
                    component_id,
                    ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, component_id);
                }
                ExecutionEvent::NodeFinished {
                    node_id,
                    duration_ms,
                    error: None,
                    ..
                } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFinished {
                    node_id,
                    error: Some(error),
                    ..
                } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeSkipped { node_id, .. } => {
                    println!("  ⏭️  Node {} skipped", node_id);
                }
                ExecutionEvent::NodeLog {
                    node_id, message, ..
                } => {
                    println!("     ℹ️  [{}] {}", node_id, message);
                }
                ExecutionEvent::RunFinished {
                    status,
                    failed_nodes,
                    ..
                } => {
                    match status {
                        RunStatus::Completed => println!("✨ Run completed successfully"),
                        _ => println!("💥 Run {} ({} failed nodes)", status, failed_nodes),
                    }
                    break;
                }
            }
        }
    });

    let snapshot = runtime
        .execute(definition, SandboxHandle::new(sandbox))
        .await?;

    // Let the printer drain up to RunFinished
    if tokio::time::timeout(Duration::from_secs(1), event_task).await.is_err() {
        tracing::debug!("event printer did not finish");
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", snapshot.run.id);
    println!("   Status: {}", snapshot.run.status);
    if let Some(ms) = snapshot.run.duration_ms() {
        println!("   Duration: {}ms", ms);
    }
    for node in &snapshot.nodes {
        println!("   {} [{}] {}", node.node_id, node.component_id, node.status);
    }

    if let Some(result) = &snapshot.run.result {
        println!();
        println!("📤 Outputs:");
        for (node_id, summary) in result {
            println!("   {}: {}", node_id, summary.to_json());
        }
    }

    if snapshot.run.status != RunStatus::Completed {
        bail!(
            "run {}: {}",
            snapshot.run.status,
            snapshot.run.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let definition = load_definition(file)?;
    let report = pipecore::validate(&definition)?;
    let registry = registry();

    println!("✅ Workflow is valid:");
    println!("   Name: {}", definition.name.as_deref().unwrap_or("(unnamed)"));
    println!("   Execution order: {}", report.order.join(" -> "));

    for warning in &report.warnings {
        println!("   ⚠️  {}", warning);
    }
    for node in &definition.nodes {
        let (Some(id), Some(component_id)) = (&node.id, &node.component_id) else {
            continue;
        };
        if !registry.contains(component_id) {
            println!(
                "   ⚠️  node '{}': component '{}' is not registered; it will resolve by type or run as a script",
                id, component_id
            );
        }
    }

    Ok(())
}

fn list_components() {
    println!("📦 Available Components:");
    println!();

    let registry = registry();
    for component_id in registry.list_component_ids() {
        if let Some(metadata) = registry.get_metadata(&component_id) {
            println!("  • {} ({})", component_id, metadata.category);
            println!("    {}", metadata.description);
            for port in &metadata.inputs {
                let required = if port.required { "" } else { ", optional" };
                println!("      in  {}{}: {}", port.name, required, port.description);
            }
            for port in &metadata.outputs {
                println!("      out {}: {}", port.name, port.description);
            }
        } else {
            println!("  • {}", component_id);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = WorkflowDefinition::new("Example Cleaning Workflow");

    workflow.add_node(
        NodeDefinition::new("load", "csv_loader")
            .with_type("data_source")
            .with_label("Load CSV")
            .with_parameter("path", "data/input.csv")
            .with_position(100.0, 100.0),
    );
    workflow.add_node(
        NodeDefinition::new("clean", "clean_data")
            .with_type("cleaning")
            .with_label("Clean")
            .with_parameter("trim_strings", true)
            .with_position(300.0, 100.0),
    );
    workflow.add_node(
        NodeDefinition::new("show", "debug_log")
            .with_type("debug")
            .with_label("Log Result")
            .with_parameter("message", "cleaned rows")
            .with_position(500.0, 100.0),
    );

    workflow.connect("load", "output", "clean", "input");
    workflow.connect("clean", "output", "show", "input");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  pipe run --file {} --sandbox <container>", output.display());

    Ok(())
}
