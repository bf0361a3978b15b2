use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Operational status of a registered agent.
///
/// `Active`/`Idle`/`Busy` are recomputed from load on every heartbeat.
/// `Error` is set by a heartbeat carrying the error flag. `Offline` is set
/// only by the health sweep and cleared only by a subsequent heartbeat.
/// `Maintenance` is entered and left only by an operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Working below the busy threshold.
    Active,
    /// Registered and healthy with no tasks in flight.
    Idle,
    /// At or above the busy threshold.
    Busy,
    /// Last heartbeat reported an error condition.
    Error,
    /// Missed the heartbeat window; ineligible until it reports back.
    Offline,
    /// Withdrawn from assignment by an operator; in-flight tasks unaffected.
    Maintenance,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Functional category of an agent.
///
/// The orchestrator only ever tests categories for equality; the set
/// mirrors the clinical deployment it coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    /// Time-critical response agents (sepsis, outbreak detection).
    Emergency,
    /// Bedside and diagnostic workflow agents.
    Clinical,
    /// Quantum-backed resource optimization.
    Quantum,
    /// Trial matching and genomic analysis.
    Research,
    /// Throughput and logistics agents.
    Operational,
    /// Background reporting and analytics.
    Analytics,
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentCategory::Emergency => write!(f, "emergency"),
            AgentCategory::Clinical => write!(f, "clinical"),
            AgentCategory::Quantum => write!(f, "quantum"),
            AgentCategory::Research => write!(f, "research"),
            AgentCategory::Operational => write!(f, "operational"),
            AgentCategory::Analytics => write!(f, "analytics"),
        }
    }
}

/// Registration request an external agent submits once, before it starts
/// heartbeating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Stable unique id chosen by the agent.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Functional category.
    pub category: AgentCategory,
    /// Capability tags this agent can serve.
    #[serde(default)]
    pub capabilities: HashSet<String>,
    /// Tie-break weight for priority-based routing (higher wins).
    #[serde(default = "default_priority_weight")]
    pub priority_weight: u32,
    /// Per-agent concurrency limit; falls back to the orchestrator default.
    #[serde(default)]
    pub max_concurrent_tasks: Option<u32>,
    /// Agent software version, for operator inspection only.
    #[serde(default)]
    pub version: Option<String>,
}

fn default_priority_weight() -> u32 {
    5
}

impl AgentRegistration {
    /// Creates a registration with default weight and no capabilities.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: AgentCategory,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            capabilities: HashSet::new(),
            priority_weight: default_priority_weight(),
            max_concurrent_tasks: None,
            version: None,
        }
    }

    /// Adds one capability tag.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Adds several capability tags.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Sets the routing tie-break weight.
    pub fn with_priority_weight(mut self, weight: u32) -> Self {
        self.priority_weight = weight;
        self
    }

    /// Overrides the per-agent concurrency limit.
    pub fn with_max_concurrent_tasks(mut self, limit: u32) -> Self {
        self.max_concurrent_tasks = Some(limit);
        self
    }

    /// Records the agent software version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Registry-owned record for one agent: declared identity plus live
/// health and performance state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Stable unique id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Functional category.
    pub category: AgentCategory,
    /// Capability tags this agent serves.
    pub capabilities: HashSet<String>,
    /// Current operational status.
    pub status: AgentStatus,
    /// Tie-break weight for priority-based routing.
    pub priority_weight: u32,
    /// Concurrency ceiling; `active_tasks` never exceeds this.
    pub max_concurrent_tasks: u32,
    /// Tasks currently assigned or in progress on this agent.
    pub active_tasks: u32,
    /// Lifetime completed-task counter.
    pub tasks_completed: u64,
    /// Lifetime failed-task counter.
    pub tasks_failed: u64,
    /// Running mean response time over completed tasks, in milliseconds.
    pub avg_response_time_ms: f64,
    /// Last reported CPU usage, if the agent reports it.
    pub cpu_percent: Option<f64>,
    /// Last reported memory usage, if the agent reports it.
    pub memory_mb: Option<f64>,
    /// Agent software version, if declared.
    pub version: Option<String>,
    /// When the agent registered.
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat arrival; updated only by `heartbeat`.
    pub last_heartbeat: DateTime<Utc>,
    /// When the agent last finished a task.
    pub last_task_at: Option<DateTime<Utc>>,
}

impl AgentInfo {
    /// Builds the initial record for a fresh registration.
    pub fn from_registration(reg: AgentRegistration, default_concurrency: u32) -> Self {
        let now = Utc::now();
        Self {
            id: reg.id,
            name: reg.name,
            category: reg.category,
            capabilities: reg.capabilities,
            status: AgentStatus::Idle,
            priority_weight: reg.priority_weight,
            max_concurrent_tasks: reg.max_concurrent_tasks.unwrap_or(default_concurrency),
            active_tasks: 0,
            tasks_completed: 0,
            tasks_failed: 0,
            avg_response_time_ms: 0.0,
            cpu_percent: None,
            memory_mb: None,
            version: reg.version,
            registered_at: now,
            last_heartbeat: now,
            last_task_at: None,
        }
    }

    /// Share of finished tasks that completed successfully, in percent.
    /// Agents with no history score 100.
    pub fn success_rate(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            100.0
        } else {
            self.tasks_completed as f64 / finished as f64 * 100.0
        }
    }

    /// True if this agent's capability set covers the requirement.
    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// True if the agent may receive one more task right now: a normal
    /// operating status and a free concurrency slot. Busy agents stay
    /// eligible until they hit their limit.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.status,
            AgentStatus::Active | AgentStatus::Idle | AgentStatus::Busy
        ) && self.active_tasks < self.max_concurrent_tasks
    }
}

/// Liveness ping an agent sends at least once per heartbeat interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Set when the agent is up but in a degraded/error condition.
    #[serde(default)]
    pub error: bool,
    /// Optional CPU usage reading.
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    /// Optional memory usage reading.
    #[serde(default)]
    pub memory_mb: Option<f64>,
}

impl Heartbeat {
    /// A plain "still alive" ping with no readings.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A ping reporting a degraded condition.
    pub fn degraded() -> Self {
        Self {
            error: true,
            ..Self::default()
        }
    }
}

/// Urgency tier of a task. Assignment consults tiers in declaration order;
/// within a tier, submission order wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Life-threatening; preempts everything pending below it.
    Critical,
    /// Urgent but not immediately life-threatening.
    Urgent,
    /// Important, timely response needed.
    High,
    /// Routine with moderate urgency.
    Medium,
    /// Background work and analytics.
    Low,
}

impl TaskPriority {
    /// All tiers, most urgent first.
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Critical,
        TaskPriority::Urgent,
        TaskPriority::High,
        TaskPriority::Medium,
        TaskPriority::Low,
    ];

    /// Number of tiers.
    pub const COUNT: usize = 5;

    /// Stable queue index, 0 = most urgent.
    pub fn index(self) -> usize {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::Urgent => 1,
            TaskPriority::High => 2,
            TaskPriority::Medium => 3,
            TaskPriority::Low => 4,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::Urgent => write!(f, "urgent"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::Low => write!(f, "low"),
        }
    }
}

/// Execution status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, no agent holds it.
    Pending,
    /// Matched to exactly one agent, not yet acknowledged.
    Assigned,
    /// The agent acknowledged it has started work.
    InProgress,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed with retries exhausted. Terminal.
    Failed,
}

/// Submission request for a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Free-form type label, used for observability only.
    pub task_type: String,
    /// Urgency tier.
    pub priority: TaskPriority,
    /// Capability tags a candidate agent must cover. Empty means any
    /// available agent, when the deployment allows unrestricted tasks.
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    /// Restricts candidates to one category when set.
    #[serde(default)]
    pub category: Option<AgentCategory>,
    /// Opaque data handed untouched to the assigned agent.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskSpec {
    /// Creates a spec with no capability requirement and an empty payload.
    pub fn new(task_type: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            task_type: task_type.into(),
            priority,
            required_capabilities: HashSet::new(),
            category: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Adds one required capability tag.
    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    /// Restricts candidate agents to a category.
    pub fn in_category(mut self, category: AgentCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Attaches the opaque payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Router-owned record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id generated at submission.
    pub id: Uuid,
    /// Free-form type label.
    pub task_type: String,
    /// Urgency tier; never changes, including across retries.
    pub priority: TaskPriority,
    /// Capability requirement.
    pub required_capabilities: HashSet<String>,
    /// Optional category restriction.
    pub category: Option<AgentCategory>,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Execution status.
    pub status: TaskStatus,
    /// The single agent holding this task while Assigned/InProgress.
    pub assigned_agent_id: Option<String>,
    /// When the task was first submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the task last entered the pending queue; refreshed on every
    /// retry so a requeued task joins the back of its tier.
    pub queued_at: DateTime<Utc>,
    /// When the current/last assignment was made.
    pub assigned_at: Option<DateTime<Utc>>,
    /// When the agent acknowledged starting, if it did.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Automatic retry attempts consumed so far.
    pub retry_count: u32,
    /// Result reported on completion.
    pub result: Option<serde_json::Value>,
    /// Most recent failure reason, if any.
    pub error: Option<String>,
}

impl Task {
    /// Creates a pending task from a submission.
    pub fn new(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: spec.task_type,
            priority: spec.priority,
            required_capabilities: spec.required_capabilities,
            category: spec.category,
            payload: spec.payload,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            submitted_at: now,
            queued_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            result: None,
            error: None,
        }
    }

    /// True once the task reached Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// True while exactly one agent holds the task.
    pub fn is_held(&self) -> bool {
        matches!(self.status, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

/// Terminal report an agent files exactly once per task it was assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The task succeeded, with its result data.
    Completed {
        /// Result payload passed through to subscribers.
        result: serde_json::Value,
    },
    /// The task failed on the agent.
    Failed {
        /// Failure reason for operators and retry bookkeeping.
        error: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_builder() {
        let reg = AgentRegistration::new("sepsis-prediction", "Sepsis Prediction", AgentCategory::Emergency)
            .with_capabilities(["vital_monitoring", "sepsis_detection"])
            .with_priority_weight(10)
            .with_max_concurrent_tasks(3);

        assert_eq!(reg.id, "sepsis-prediction");
        assert_eq!(reg.capabilities.len(), 2);
        assert_eq!(reg.priority_weight, 10);
        assert_eq!(reg.max_concurrent_tasks, Some(3));
    }

    #[test]
    fn test_agent_info_defaults() {
        let reg = AgentRegistration::new("a1", "Agent One", AgentCategory::Clinical);
        let info = AgentInfo::from_registration(reg, 5);
        assert_eq!(info.status, AgentStatus::Idle);
        assert_eq!(info.max_concurrent_tasks, 5);
        assert_eq!(info.active_tasks, 0);
        assert_eq!(info.success_rate(), 100.0);
    }

    #[test]
    fn test_success_rate_derivation() {
        let reg = AgentRegistration::new("a1", "Agent One", AgentCategory::Clinical);
        let mut info = AgentInfo::from_registration(reg, 5);
        info.tasks_completed = 3;
        info.tasks_failed = 1;
        assert!((info.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_has_capabilities_superset() {
        let reg = AgentRegistration::new("a1", "Agent One", AgentCategory::Clinical)
            .with_capabilities(["image_analysis", "report_generation", "dicom_processing"]);
        let info = AgentInfo::from_registration(reg, 5);

        let required: HashSet<String> =
            ["image_analysis", "report_generation"].iter().map(|s| s.to_string()).collect();
        assert!(info.has_capabilities(&required));

        let missing: HashSet<String> = ["genomic_analysis"].iter().map(|s| s.to_string()).collect();
        assert!(!info.has_capabilities(&missing));

        // Empty requirement matches every agent.
        assert!(info.has_capabilities(&HashSet::new()));
    }

    #[test]
    fn test_is_assignable_respects_limit_and_status() {
        let reg = AgentRegistration::new("a1", "Agent One", AgentCategory::Clinical)
            .with_max_concurrent_tasks(2);
        let mut info = AgentInfo::from_registration(reg, 5);
        assert!(info.is_assignable());

        // Busy below the limit stays eligible.
        info.status = AgentStatus::Busy;
        info.active_tasks = 1;
        assert!(info.is_assignable());

        info.active_tasks = 2;
        assert!(!info.is_assignable());

        info.active_tasks = 0;
        info.status = AgentStatus::Maintenance;
        assert!(!info.is_assignable());
        info.status = AgentStatus::Offline;
        assert!(!info.is_assignable());
    }

    #[test]
    fn test_priority_index_is_stable() {
        for (i, priority) in TaskPriority::ALL.iter().enumerate() {
            assert_eq!(priority.index(), i);
        }
        assert!(TaskPriority::Critical < TaskPriority::Low);
    }

    #[test]
    fn test_task_spec_builder_and_task_creation() {
        let spec = TaskSpec::new("sepsis_screening", TaskPriority::Critical)
            .require("vital_monitoring")
            .require("sepsis_detection")
            .in_category(AgentCategory::Emergency)
            .with_payload(serde_json::json!({"patient_id": "P-12345"}));

        let task = Task::new(spec);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.required_capabilities.len(), 2);
        assert_eq!(task.category, Some(AgentCategory::Emergency));
        assert!(task.assigned_agent_id.is_none());
        assert_eq!(task.retry_count, 0);
        assert!(!task.is_terminal());
        assert!(!task.is_held());
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::InProgress);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = TaskOutcome::Failed {
            error: "timeout".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("timeout"));
        let parsed: TaskOutcome = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, TaskOutcome::Failed { .. }));
    }
}
