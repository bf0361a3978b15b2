//! CareMesh command-line driver.
//!
//! `caremesh demo` runs the orchestrator against the reference fleet with a
//! simulated workload; `caremesh fleet` prints the fleet roster.

mod fleet;

use anyhow::Context;
use caremesh_orchestrator::{
    Heartbeat, Orchestrator, OrchestratorConfig, TaskOutcome, TaskPriority, TaskSpec, TaskStatus,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "caremesh", about = "CareMesh — multi-agent clinical task orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "caremesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demonstration workload against the reference fleet
    Demo {
        /// Seconds to let the workload run before reporting
        #[arg(long, default_value_t = 2)]
        run_secs: u64,
    },
    /// Print the reference agent fleet
    Fleet,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match tokio::fs::read_to_string(&cli.config).await {
        Ok(raw) => OrchestratorConfig::from_toml_str(&raw)
            .with_context(|| format!("failed to parse {}", cli.config.display()))?,
        Err(_) => {
            info!(path = %cli.config.display(), "no config file, using defaults");
            OrchestratorConfig::default()
        }
    };

    match cli.command {
        Commands::Demo { run_secs } => run_demo(config, run_secs).await,
        Commands::Fleet => {
            print_fleet();
            Ok(())
        }
    }
}

fn print_fleet() {
    println!("Reference fleet ({} agents):", fleet::reference_fleet().len());
    for agent in fleet::reference_fleet() {
        let mut capabilities: Vec<&str> =
            agent.capabilities.iter().map(String::as_str).collect();
        capabilities.sort_unstable();
        println!(
            "  {:<28} {:<12} weight {:>2}  [{}]",
            agent.id,
            agent.category.to_string(),
            agent.priority_weight,
            capabilities.join(", ")
        );
    }
}

/// The demo scenario: a critical sepsis screen, an urgent medication check,
/// a routine radiology report, and a background trial-matching pass.
fn demo_tasks() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new("sepsis_screening", TaskPriority::Critical)
            .require("vital_monitoring")
            .require("sepsis_detection")
            .with_payload(json!({
                "patient_id": "P-12345",
                "vital_signs": {"temperature": 38.5, "heart_rate": 120, "spo2": 92},
            })),
        TaskSpec::new("medication_check", TaskPriority::Urgent)
            .require("drug_interaction")
            .require("dose_checking")
            .with_payload(json!({"patient_id": "P-55501", "order": "warfarin 5mg"})),
        TaskSpec::new("radiology_report", TaskPriority::Medium)
            .require("image_analysis")
            .require("report_generation")
            .with_payload(json!({
                "patient_id": "P-67890",
                "study_type": "chest_xray",
                "indication": "Cough, fever",
            })),
        TaskSpec::new("trial_matching", TaskPriority::Low)
            .require("eligibility_screening")
            .require("trial_matching")
            .with_payload(json!({"patient_id": "P-67890", "condition": "NSCLC"})),
    ]
}

async fn run_demo(config: OrchestratorConfig, run_secs: u64) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config);
    orchestrator.start().await;

    for agent in fleet::reference_fleet() {
        orchestrator.register_agent(agent).await?;
    }
    println!(
        "Registered {} agents, strategy: {}",
        orchestrator.status().await.agents.total,
        orchestrator.strategy_name()
    );

    let mut submitted = Vec::new();
    for spec in demo_tasks() {
        let task = orchestrator.submit_task(spec).await?;
        println!("Submitted {:<18} priority {:<8} -> {}", task.task_type, task.priority.to_string(), task.id);
        submitted.push(task.id);
    }

    // Stand in for the real agents: heartbeat, acknowledge, and report
    // each task the loop hands out.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(run_secs.max(1));
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
        for agent in orchestrator.list_agents(None).await {
            let _ = orchestrator.heartbeat(&agent.id, Heartbeat::ok()).await;
        }
        for task in orchestrator.list_tasks(TaskStatus::Assigned).await {
            orchestrator.start_task(task.id).await?;
            orchestrator
                .report_task_outcome(
                    task.id,
                    TaskOutcome::Completed {
                        result: json!({"handled_by": task.assigned_agent_id}),
                    },
                )
                .await?;
        }
    }

    let status = orchestrator.status().await;
    println!();
    println!("Status after {:.1}s:", status.uptime_seconds);
    println!("  agents: {} total, {} idle, {} active", status.agents.total, status.agents.idle, status.agents.active);
    println!(
        "  tasks:  {} completed, {} failed, {} pending (queue depth {})",
        status.tasks.completed, status.tasks.failed, status.tasks.pending, status.tasks.queue_depth
    );

    println!();
    println!("Recent activity:");
    for entry in orchestrator.recent_activity(12).await {
        let who = entry.agent_name.unwrap_or_else(|| entry.sender.clone());
        println!("  {}  {:<16} {}", entry.timestamp.format("%H:%M:%S%.3f"), entry.topic, who);
    }

    for task_id in submitted {
        if let Some(task) = orchestrator.get_task(task_id).await {
            println!("Task {} -> {:?}", task.task_type, task.status);
        }
    }

    orchestrator.stop().await;
    Ok(())
}
