use crate::bus::MessageBus;
use crate::registry::AgentRegistry;
use crate::strategy::RoutingStrategy;
use crate::types::{AgentCategory, AgentInfo, Task, TaskOutcome, TaskPriority, TaskSpec, TaskStatus};
use caremesh_core::{topics, CaremeshError, CaremeshResult};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A task matched to the agent that will run it.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The task, already marked Assigned.
    pub task: Task,
    /// Snapshot of the chosen agent at assignment time.
    pub agent: AgentInfo,
}

/// Holds the pending-task queues and the assignment policy.
///
/// One FIFO queue per priority tier, consulted in fixed tier order, keeps
/// the submission-order guarantee trivially correct. The task map and the
/// queues share one lock; the registry is only ever called with that lock
/// released.
pub struct TaskRouter {
    registry: Arc<AgentRegistry>,
    bus: Arc<MessageBus>,
    state: RwLock<RouterState>,
    strategy: parking_lot::RwLock<Arc<dyn RoutingStrategy>>,
    max_retries: u32,
    allow_unrestricted: bool,
}

struct RouterState {
    tasks: HashMap<Uuid, Task>,
    queues: [VecDeque<Uuid>; TaskPriority::COUNT],
}

impl RouterState {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            queues: std::array::from_fn(|_| VecDeque::new()),
        }
    }
}

fn unqueue(queue: &mut VecDeque<Uuid>, task_id: Uuid) {
    if let Some(pos) = queue.iter().position(|id| *id == task_id) {
        queue.remove(pos);
    }
}

/// What a terminal/failure report did to the task, decided under the
/// router lock; counters and events follow once the lock is gone.
enum Transition {
    Completed { agent_id: String, response_ms: f64 },
    Retried { agent_id: String, response_ms: f64 },
    Exhausted { agent_id: String, response_ms: f64 },
    Ignored,
}

impl TaskRouter {
    /// Creates a router over `registry`, publishing task lifecycle events
    /// on `bus`.
    pub fn new(
        registry: Arc<AgentRegistry>,
        bus: Arc<MessageBus>,
        strategy: Arc<dyn RoutingStrategy>,
        max_retries: u32,
        allow_unrestricted_tasks: bool,
    ) -> Self {
        Self {
            registry,
            bus,
            state: RwLock::new(RouterState::new()),
            strategy: parking_lot::RwLock::new(strategy),
            max_retries,
            allow_unrestricted: allow_unrestricted_tasks,
        }
    }

    /// Swaps the active routing policy. Takes effect on the next
    /// assignment; nothing else changes.
    pub fn set_strategy(&self, strategy: Arc<dyn RoutingStrategy>) {
        let name = strategy.name();
        *self.strategy.write() = strategy;
        info!(strategy = name, "routing strategy changed");
    }

    /// Name of the active routing policy.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.read().name()
    }

    /// Validates and enqueues a task. The task starts Pending; the
    /// assignment loop picks it up asynchronously.
    pub async fn submit(&self, spec: TaskSpec) -> CaremeshResult<Task> {
        if spec.task_type.trim().is_empty() {
            return Err(CaremeshError::InvalidTask("task_type must not be empty".to_string()));
        }
        if spec.required_capabilities.is_empty() && !self.allow_unrestricted {
            return Err(CaremeshError::InvalidTask(
                "required_capabilities must not be empty in this deployment".to_string(),
            ));
        }

        let task = Task::new(spec);
        {
            let mut state = self.state.write().await;
            state.queues[task.priority.index()].push_back(task.id);
            state.tasks.insert(task.id, task.clone());
        }

        info!(task_id = %task.id, task_type = %task.task_type, priority = %task.priority, "task submitted");
        self.bus
            .publish_from(
                topics::TASK_SUBMITTED,
                json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "priority": task.priority,
                }),
                "router",
            )
            .await;
        Ok(task)
    }

    /// Assigns the highest-priority pending task that has at least one
    /// capable agent, or returns `None` without blocking.
    ///
    /// Tasks are considered strictly in tier order and FIFO within a tier;
    /// a task with no capable agent is skipped, never reordered. The
    /// assignment commits only if the task is still Pending after the
    /// agent slot was reserved, so concurrent callers can never hand the
    /// same task to two agents.
    pub async fn assign_next(&self) -> Option<Assignment> {
        let pending: Vec<(Uuid, HashSet<String>, Option<AgentCategory>)> = {
            let state = self.state.read().await;
            let mut out = Vec::new();
            for priority in TaskPriority::ALL {
                for id in &state.queues[priority.index()] {
                    if let Some(task) = state.tasks.get(id) {
                        if task.status == TaskStatus::Pending {
                            out.push((*id, task.required_capabilities.clone(), task.category));
                        }
                    }
                }
            }
            out
        };

        for (task_id, required, category) in pending {
            let mut candidates = self.registry.find_capable(&required, category).await;
            if candidates.is_empty() {
                continue;
            }
            let strategy = Arc::clone(&*self.strategy.read());

            while !candidates.is_empty() {
                let Some(picked) = strategy.select(&required, &candidates).cloned() else {
                    break;
                };

                if !self.registry.reserve_slot(&picked.id).await {
                    // The agent filled up or went away since the snapshot.
                    candidates.retain(|a| a.id != picked.id);
                    continue;
                }

                let committed = {
                    let mut guard = self.state.write().await;
                    let state = &mut *guard;
                    match state.tasks.get_mut(&task_id) {
                        Some(task) if task.status == TaskStatus::Pending => {
                            task.status = TaskStatus::Assigned;
                            task.assigned_agent_id = Some(picked.id.clone());
                            task.assigned_at = Some(Utc::now());
                            let snapshot = task.clone();
                            unqueue(&mut state.queues[snapshot.priority.index()], task_id);
                            Some(snapshot)
                        }
                        _ => None,
                    }
                };

                match committed {
                    Some(task) => {
                        let agent = match self.registry.get(&picked.id).await {
                            Some(agent) => agent,
                            None => picked,
                        };
                        info!(
                            task_id = %task.id,
                            agent_id = %agent.id,
                            strategy = strategy.name(),
                            "task assigned"
                        );
                        self.bus
                            .publish_from(
                                topics::TASK_ASSIGNED,
                                json!({
                                    "task_id": task.id,
                                    "agent_id": agent.id,
                                    "task_type": task.task_type,
                                    "priority": task.priority,
                                }),
                                "router",
                            )
                            .await;
                        return Some(Assignment { task, agent });
                    }
                    None => {
                        // A concurrent caller took the task; give the slot
                        // back and move on to the next task.
                        self.registry.release_slot(&picked.id).await;
                        break;
                    }
                }
            }
        }
        None
    }

    /// Moves an Assigned task to InProgress when the agent acknowledges
    /// starting work. A duplicate acknowledgement is a no-op.
    pub async fn mark_started(&self, task_id: Uuid) -> CaremeshResult<()> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Err(CaremeshError::TaskNotFound(task_id.to_string()));
        };
        match task.status {
            TaskStatus::Assigned => {
                task.status = TaskStatus::InProgress;
                task.started_at = Some(Utc::now());
                debug!(task_id = %task_id, "task acknowledged by agent");
            }
            TaskStatus::InProgress => {}
            status => {
                warn!(task_id = %task_id, ?status, "start acknowledgement for a task not assigned");
            }
        }
        Ok(())
    }

    /// Records the terminal report for a held task.
    ///
    /// Completed finalizes the task. Failed re-enqueues it at the back of
    /// its tier with `retry_count` bumped, until the retry ceiling makes
    /// the failure terminal. An unknown id is rejected; a duplicate report
    /// for an already-terminal task is a logged no-op.
    pub async fn report_outcome(&self, task_id: Uuid, outcome: TaskOutcome) -> CaremeshResult<()> {
        let (transition, snapshot) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return Err(CaremeshError::TaskNotFound(task_id.to_string()));
            };

            if task.is_terminal() {
                debug!(task_id = %task_id, "duplicate terminal report ignored");
                (Transition::Ignored, None)
            } else if !task.is_held() {
                warn!(task_id = %task_id, status = ?task.status, "outcome reported for a task no agent holds");
                (Transition::Ignored, None)
            } else {
                let now = Utc::now();
                let agent_id = task.assigned_agent_id.clone().unwrap_or_default();
                let response_ms = task
                    .assigned_at
                    .map(|at| (now - at).num_milliseconds() as f64)
                    .unwrap_or(0.0)
                    .max(0.0);

                match outcome {
                    TaskOutcome::Completed { result } => {
                        task.status = TaskStatus::Completed;
                        task.completed_at = Some(now);
                        task.result = Some(result);
                        task.error = None;
                        (Transition::Completed { agent_id, response_ms }, Some(task.clone()))
                    }
                    TaskOutcome::Failed { error } => {
                        if task.retry_count < self.max_retries {
                            task.retry_count += 1;
                            task.status = TaskStatus::Pending;
                            task.assigned_agent_id = None;
                            task.assigned_at = None;
                            task.started_at = None;
                            task.error = Some(error);
                            // Fresh queue timestamp: the retry joins the
                            // back of its tier.
                            task.queued_at = now;
                            let snapshot = task.clone();
                            state.queues[snapshot.priority.index()].push_back(task_id);
                            (Transition::Retried { agent_id, response_ms }, Some(snapshot))
                        } else {
                            task.status = TaskStatus::Failed;
                            task.completed_at = Some(now);
                            task.error = Some(error);
                            (Transition::Exhausted { agent_id, response_ms }, Some(task.clone()))
                        }
                    }
                }
            }
        };

        let Some(task) = snapshot else {
            return Ok(());
        };
        match transition {
            Transition::Completed { agent_id, response_ms } => {
                self.registry.record_outcome(&agent_id, response_ms, true).await;
                info!(task_id = %task.id, agent_id = %agent_id, response_ms, "task completed");
                self.bus
                    .publish_from(
                        topics::TASK_COMPLETED,
                        json!({
                            "task_id": task.id,
                            "agent_id": agent_id,
                            "task_type": task.task_type,
                            "response_ms": response_ms,
                        }),
                        "router",
                    )
                    .await;
            }
            Transition::Retried { agent_id, response_ms } => {
                self.registry.record_outcome(&agent_id, response_ms, false).await;
                info!(
                    task_id = %task.id,
                    agent_id = %agent_id,
                    retry = task.retry_count,
                    "task failed, requeued for retry"
                );
                self.bus
                    .publish_from(
                        topics::TASK_RETRIED,
                        json!({
                            "task_id": task.id,
                            "agent_id": agent_id,
                            "retry_count": task.retry_count,
                            "error": task.error,
                        }),
                        "router",
                    )
                    .await;
            }
            Transition::Exhausted { agent_id, response_ms } => {
                self.registry.record_outcome(&agent_id, response_ms, false).await;
                warn!(
                    task_id = %task.id,
                    agent_id = %agent_id,
                    retries = task.retry_count,
                    "task failed terminally"
                );
                self.bus
                    .publish_from(
                        topics::TASK_FAILED,
                        json!({
                            "task_id": task.id,
                            "agent_id": agent_id,
                            "task_type": task.task_type,
                            "retry_count": task.retry_count,
                            "error": task.error,
                        }),
                        "router",
                    )
                    .await;
            }
            Transition::Ignored => {}
        }
        Ok(())
    }

    /// Fails over every task the agent holds, as if the agent had reported
    /// each one Failed. Run after the health sweep marks an agent offline
    /// or when an agent is deregistered; no task is silently lost.
    ///
    /// Returns the ids of the tasks that were taken away from the agent.
    pub async fn failover_agent(&self, agent_id: &str) -> Vec<Uuid> {
        let held: Vec<Uuid> = {
            let state = self.state.read().await;
            state
                .tasks
                .values()
                .filter(|t| t.is_held() && t.assigned_agent_id.as_deref() == Some(agent_id))
                .map(|t| t.id)
                .collect()
        };

        for task_id in &held {
            let error = format!("agent '{agent_id}' became unavailable");
            if let Err(e) = self.report_outcome(*task_id, TaskOutcome::Failed { error }).await {
                warn!(task_id = %task_id, error = %e, "failover outcome rejected");
            }
        }
        if !held.is_empty() {
            info!(agent_id, count = held.len(), "failed over tasks held by agent");
        }
        held
    }

    /// Snapshot of one task.
    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.state.read().await.tasks.get(&task_id).cloned()
    }

    /// Snapshot of all tasks in a given status, oldest submission first.
    pub async fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> =
            state.tasks.values().filter(|t| t.status == status).cloned().collect();
        tasks.sort_by_key(|t| t.submitted_at);
        tasks
    }

    /// Snapshot of the tasks an agent currently holds.
    pub async fn tasks_for_agent(&self, agent_id: &str) -> Vec<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .values()
            .filter(|t| t.is_held() && t.assigned_agent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    /// Number of tasks waiting in the priority queues.
    pub async fn queue_depth(&self) -> usize {
        let state = self.state.read().await;
        state.queues.iter().map(VecDeque::len).sum()
    }

    /// Aggregate task counts for the status surface. Pure read.
    pub async fn stats(&self) -> RoutingStats {
        let state = self.state.read().await;
        let mut stats = RoutingStats {
            queue_depth: state.queues.iter().map(VecDeque::len).sum(),
            ..RoutingStats::default()
        };
        for task in state.tasks.values() {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Assigned => stats.assigned += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Router-wide aggregate counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingStats {
    /// Tasks ever submitted and still tracked.
    pub total: usize,
    /// Tasks waiting for an agent.
    pub pending: usize,
    /// Tasks assigned, not yet acknowledged.
    pub assigned: usize,
    /// Tasks acknowledged and running.
    pub in_progress: usize,
    /// Tasks finished successfully.
    pub completed: usize,
    /// Tasks failed terminally.
    pub failed: usize,
    /// Entries across the priority queues.
    pub queue_depth: usize,
}
