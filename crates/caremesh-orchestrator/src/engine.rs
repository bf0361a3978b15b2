use crate::bus::{MessageBus, Subscription};
use crate::config::OrchestratorConfig;
use crate::registry::{AgentRegistry, RegistryStats};
use crate::router::{RoutingStats, TaskRouter};
use crate::strategy::StrategyKind;
use crate::types::{
    AgentCategory, AgentInfo, AgentRegistration, AgentStatus, Heartbeat, Task, TaskOutcome,
    TaskSpec, TaskStatus,
};
use caremesh_core::CaremeshResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The coordinating facade: owns the registry, router, and bus, runs the
/// assignment and health-sweep loops, and is the only surface external
/// callers use.
///
/// Construction wires the components together by reference; nothing is a
/// process-global, so tests build as many isolated instances as they need.
pub struct Orchestrator {
    config: OrchestratorConfig,
    bus: Arc<MessageBus>,
    registry: Arc<AgentRegistry>,
    router: Arc<TaskRouter>,
    wake: Arc<Notify>,
    runtime: Mutex<Option<Runtime>>,
}

/// Live background state between `start` and `stop`.
struct Runtime {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    /// Builds an orchestrator from configuration. No background work runs
    /// until [`start`](Self::start).
    pub fn new(config: OrchestratorConfig) -> Self {
        let bus = Arc::new(MessageBus::new(config.bus_history, config.subscriber_buffer));
        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&bus),
            config.max_concurrent_tasks,
        ));
        let router = Arc::new(TaskRouter::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            config.default_strategy.build(),
            config.max_retries,
            config.allow_unrestricted_tasks,
        ));
        Self {
            config,
            bus,
            registry,
            router,
            wake: Arc::new(Notify::new()),
            runtime: Mutex::new(None),
        }
    }

    /// The agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The task router.
    pub fn router(&self) -> &Arc<TaskRouter> {
        &self.router
    }

    /// The message bus.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// The configuration this instance runs with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Spins up the assignment loop and the health-sweep loop. Calling
    /// start on a running orchestrator is a logged no-op.
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            warn!("orchestrator already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(assignment_loop(
                Arc::clone(&self.router),
                Arc::clone(&self.wake),
                self.config.assign_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(health_loop(
                Arc::clone(&self.registry),
                Arc::clone(&self.router),
                self.config.heartbeat_timeout(),
                self.config.sweep_interval(),
                shutdown_rx,
            )),
        ];

        *runtime = Some(Runtime {
            shutdown: shutdown_tx,
            handles,
            started_at: Utc::now(),
        });
        info!(
            strategy = self.router.strategy_name(),
            heartbeat_timeout_secs = self.config.heartbeat_timeout_secs,
            "orchestrator started"
        );
    }

    /// Signals both loops to finish their current iteration and waits for
    /// them to exit. No background work survives this call.
    pub async fn stop(&self) {
        let Some(runtime) = self.runtime.lock().await.take() else {
            warn!("orchestrator not running");
            return;
        };
        let _ = runtime.shutdown.send(true);
        self.wake.notify_waiters();
        for handle in runtime.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background loop ended abnormally");
            }
        }
        info!("orchestrator stopped");
    }

    /// True between `start` and `stop`.
    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.is_some()
    }

    /// Registers an external agent.
    pub async fn register_agent(&self, registration: AgentRegistration) -> CaremeshResult<AgentInfo> {
        let agent = self.registry.register(registration).await?;
        // A new agent may unblock pending work.
        self.wake.notify_one();
        Ok(agent)
    }

    /// Removes an agent; any tasks it still holds are failed over.
    pub async fn deregister_agent(&self, agent_id: &str) -> CaremeshResult<AgentInfo> {
        let agent = self.registry.deregister(agent_id).await?;
        let recovered = self.router.failover_agent(agent_id).await;
        if !recovered.is_empty() {
            info!(agent_id, tasks = recovered.len(), "requeued tasks from deregistered agent");
            self.wake.notify_one();
        }
        Ok(agent)
    }

    /// Records an agent liveness ping.
    pub async fn heartbeat(&self, agent_id: &str, hb: Heartbeat) -> CaremeshResult<AgentStatus> {
        self.registry.heartbeat(agent_id, hb).await
    }

    /// Operator transition in or out of maintenance.
    pub async fn set_maintenance(&self, agent_id: &str, on: bool) -> CaremeshResult<AgentStatus> {
        self.registry.set_maintenance(agent_id, on).await
    }

    /// Submits a task; the assignment loop picks it up asynchronously.
    pub async fn submit_task(&self, spec: TaskSpec) -> CaremeshResult<Task> {
        let task = self.router.submit(spec).await?;
        self.wake.notify_one();
        Ok(task)
    }

    /// Agent acknowledgement that work on a task has started.
    pub async fn start_task(&self, task_id: Uuid) -> CaremeshResult<()> {
        self.router.mark_started(task_id).await
    }

    /// Terminal report for an assigned task.
    pub async fn report_task_outcome(&self, task_id: Uuid, outcome: TaskOutcome) -> CaremeshResult<()> {
        self.router.report_outcome(task_id, outcome).await?;
        // A retry may have re-entered the queue.
        self.wake.notify_one();
        Ok(())
    }

    /// Swaps the routing policy.
    pub fn set_strategy(&self, kind: StrategyKind) {
        self.router.set_strategy(kind.build());
    }

    /// Name of the active routing policy.
    pub fn strategy_name(&self) -> &'static str {
        self.router.strategy_name()
    }

    /// Subscribes to a bus topic.
    pub async fn subscribe(&self, topic: &str) -> Subscription {
        self.bus.subscribe(topic).await
    }

    /// Snapshot of one agent.
    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentInfo> {
        self.registry.get(agent_id).await
    }

    /// Snapshot of agents, optionally filtered by status.
    pub async fn list_agents(&self, status: Option<AgentStatus>) -> Vec<AgentInfo> {
        self.registry.list(status).await
    }

    /// Snapshot of agents in one category.
    pub async fn list_agents_by_category(&self, category: AgentCategory) -> Vec<AgentInfo> {
        self.registry.list_by_category(category).await
    }

    /// Snapshot of one task.
    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.router.get_task(task_id).await
    }

    /// Snapshot of tasks in one status.
    pub async fn list_tasks(&self, status: TaskStatus) -> Vec<Task> {
        self.router.tasks_by_status(status).await
    }

    /// Aggregated counts across registry, router, and bus. Pure read.
    pub async fn status(&self) -> OrchestratorStatus {
        let (running, started_at) = {
            let runtime = self.runtime.lock().await;
            (runtime.is_some(), runtime.as_ref().map(|r| r.started_at))
        };
        let uptime_seconds = started_at
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
            .max(0.0);
        OrchestratorStatus {
            running,
            started_at,
            uptime_seconds,
            strategy: self.router.strategy_name().to_string(),
            agents: self.registry.stats().await,
            tasks: self.router.stats().await,
            bus_events: self.bus.history_len().await,
        }
    }

    /// Recent lifecycle events, newest first, with agent names resolved
    /// where the payload names an agent.
    pub async fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        let events = self.bus.recent_history(limit).await;
        let mut entries = Vec::with_capacity(events.len());
        for event in events.into_iter().rev() {
            let agent_id = event.payload.get("agent_id").and_then(|v| v.as_str());
            let agent_name = match agent_id {
                Some(id) => self.registry.get(id).await.map(|a| a.name),
                None => None,
            };
            entries.push(ActivityEntry {
                topic: event.topic,
                sender: event.sender.unwrap_or_else(|| "system".to_string()),
                agent_name,
                payload: event.payload,
                timestamp: event.timestamp,
            });
        }
        entries
    }
}

/// Aggregated orchestrator counts, for dashboards and operators.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Whether the background loops are running.
    pub running: bool,
    /// When `start` was called, if it was.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since start, zero when stopped.
    pub uptime_seconds: f64,
    /// Active routing policy name.
    pub strategy: String,
    /// Agent counts by status plus lifetime counters.
    pub agents: RegistryStats,
    /// Task counts by status plus queue depth.
    pub tasks: RoutingStats,
    /// Events currently held in the bus inspection ring.
    pub bus_events: usize,
}

/// One row of the recent-activity feed.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    /// Event topic.
    pub topic: String,
    /// Publishing component, or "system".
    pub sender: String,
    /// Resolved agent name when the event names a registered agent.
    pub agent_name: Option<String>,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
}

/// Drains the pending queues whenever a tick fires or a submission wakes
/// it, until `assign_next` reports nothing assignable.
async fn assignment_loop(
    router: Arc<TaskRouter>,
    wake: Arc<Notify>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = wake.notified() => {}
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        while let Some(assignment) = router.assign_next().await {
            debug!(
                task_id = %assignment.task.id,
                agent_id = %assignment.agent.id,
                "assignment loop matched task"
            );
        }
    }
    debug!("assignment loop stopped");
}

/// Periodically sweeps expired heartbeats and fails over the tasks of every
/// agent that just went offline.
async fn health_loop(
    registry: Arc<AgentRegistry>,
    router: Arc<TaskRouter>,
    heartbeat_timeout: chrono::Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The immediate first tick sweeps a registry that cannot have expired
    // agents yet; subsequent ticks do the real work.
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        let expired = registry.sweep_expired(heartbeat_timeout).await;
        for agent_id in expired {
            let recovered = router.failover_agent(&agent_id).await;
            info!(
                agent_id = %agent_id,
                tasks = recovered.len(),
                "agent offline, in-flight tasks requeued"
            );
        }
    }
    debug!("health-sweep loop stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;
    use serde_json::json;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            heartbeat_timeout_secs: 1,
            sweep_interval_secs: 1,
            assign_interval_ms: 10,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let orchestrator = Orchestrator::new(fast_config());
        assert!(!orchestrator.is_running().await);

        orchestrator.start().await;
        assert!(orchestrator.is_running().await);
        // Double start is a no-op.
        orchestrator.start().await;

        orchestrator.stop().await;
        assert!(!orchestrator.is_running().await);
        // Double stop is a no-op.
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_status_is_pure_read() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator
            .register_agent(
                AgentRegistration::new("a1", "Agent One", AgentCategory::Clinical)
                    .with_capability("triage"),
            )
            .await
            .unwrap();
        orchestrator
            .submit_task(TaskSpec::new("triage_case", TaskPriority::High).require("triage"))
            .await
            .unwrap();

        let before = orchestrator.status().await;
        let after = orchestrator.status().await;
        assert!(!before.running);
        assert_eq!(before.agents.total, 1);
        assert_eq!(before.tasks.pending, after.tasks.pending);
        assert_eq!(before.tasks.queue_depth, 1);
        assert_eq!(before.strategy, "least_loaded");
    }

    #[tokio::test]
    async fn test_recent_activity_resolves_agent_names() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator
            .register_agent(AgentRegistration::new("a1", "Sepsis Watch", AgentCategory::Emergency))
            .await
            .unwrap();

        let activity = orchestrator.recent_activity(10).await;
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].topic, "agent.registered");
        assert_eq!(activity[0].sender, "registry");
        assert_eq!(activity[0].agent_name.as_deref(), Some("Sepsis Watch"));
    }

    #[tokio::test]
    async fn test_deregister_fails_over_held_tasks() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator
            .register_agent(
                AgentRegistration::new("a1", "Agent One", AgentCategory::Clinical)
                    .with_capability("triage"),
            )
            .await
            .unwrap();
        let task = orchestrator
            .submit_task(TaskSpec::new("triage_case", TaskPriority::High).require("triage"))
            .await
            .unwrap();
        // Loops are not running; drive the router directly.
        orchestrator.router().assign_next().await.unwrap();

        orchestrator.deregister_agent("a1").await.unwrap();
        let requeued = orchestrator.get_task(task.id).await.unwrap();
        assert_eq!(requeued.status, TaskStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
        assert!(orchestrator.get_agent("a1").await.is_none());
    }

    #[tokio::test]
    async fn test_outcome_payload_round_trip() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator
            .register_agent(
                AgentRegistration::new("a1", "Agent One", AgentCategory::Clinical)
                    .with_capability("triage"),
            )
            .await
            .unwrap();
        let task = orchestrator
            .submit_task(
                TaskSpec::new("triage_case", TaskPriority::Critical)
                    .require("triage")
                    .with_payload(json!({"patient_id": "P-1"})),
            )
            .await
            .unwrap();
        orchestrator.router().assign_next().await.unwrap();
        orchestrator.start_task(task.id).await.unwrap();
        orchestrator
            .report_task_outcome(task.id, TaskOutcome::Completed { result: json!({"ok": true}) })
            .await
            .unwrap();

        let finished = orchestrator.get_task(task.id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.payload["patient_id"], "P-1");
        assert_eq!(finished.result.unwrap()["ok"], true);
    }
}
