use crate::bus::MessageBus;
use crate::types::{AgentCategory, AgentInfo, AgentRegistration, AgentStatus, Heartbeat};
use caremesh_core::{topics, CaremeshError, CaremeshResult};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Central registry of all worker agents: identity, declared capabilities,
/// and live health/performance state.
///
/// The agent map and its secondary indexes live behind a single lock.
/// Lifecycle events are published only after the lock is released, so no
/// bus work ever happens under registry state.
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
    bus: Arc<MessageBus>,
    default_concurrency: u32,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, AgentInfo>,
    by_capability: HashMap<String, HashSet<String>>,
    by_category: HashMap<AgentCategory, HashSet<String>>,
}

impl RegistryState {
    fn index(&mut self, agent: &AgentInfo) {
        for capability in &agent.capabilities {
            self.by_capability
                .entry(capability.clone())
                .or_default()
                .insert(agent.id.clone());
        }
        self.by_category
            .entry(agent.category)
            .or_default()
            .insert(agent.id.clone());
    }

    fn unindex(&mut self, agent: &AgentInfo) {
        for capability in &agent.capabilities {
            if let Some(ids) = self.by_capability.get_mut(capability) {
                ids.remove(&agent.id);
                if ids.is_empty() {
                    self.by_capability.remove(capability);
                }
            }
        }
        if let Some(ids) = self.by_category.get_mut(&agent.category) {
            ids.remove(&agent.id);
            if ids.is_empty() {
                self.by_category.remove(&agent.category);
            }
        }
    }

    /// Ids of agents whose capability set covers `required`. An empty
    /// requirement matches every agent.
    fn candidate_ids(&self, required: &HashSet<String>) -> Vec<String> {
        if required.is_empty() {
            return self.agents.keys().cloned().collect();
        }
        let mut iter = required.iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let Some(seed) = self.by_capability.get(first) else {
            return Vec::new();
        };
        let mut ids: HashSet<&String> = seed.iter().collect();
        for capability in iter {
            match self.by_capability.get(capability) {
                Some(set) => ids.retain(|id| set.contains(*id)),
                None => return Vec::new(),
            }
            if ids.is_empty() {
                return Vec::new();
            }
        }
        ids.into_iter().cloned().collect()
    }
}

/// Load status derived from the live task count, used whenever a heartbeat
/// or an operator transition recomputes an agent's normal operating state.
fn load_status(agent: &AgentInfo) -> AgentStatus {
    if agent.active_tasks == 0 {
        AgentStatus::Idle
    } else if agent.active_tasks >= agent.max_concurrent_tasks {
        AgentStatus::Busy
    } else {
        AgentStatus::Active
    }
}

impl AgentRegistry {
    /// Creates an empty registry publishing lifecycle events on `bus`.
    pub fn new(bus: Arc<MessageBus>, default_concurrency: u32) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            bus,
            default_concurrency: default_concurrency.max(1),
        }
    }

    /// Registers a new agent. Re-using an existing id is rejected with
    /// [`CaremeshError::DuplicateAgent`] and changes nothing.
    pub async fn register(&self, registration: AgentRegistration) -> CaremeshResult<AgentInfo> {
        let agent = {
            let mut state = self.state.write().await;
            if state.agents.contains_key(&registration.id) {
                return Err(CaremeshError::DuplicateAgent(registration.id));
            }
            let agent = AgentInfo::from_registration(registration, self.default_concurrency);
            state.index(&agent);
            state.agents.insert(agent.id.clone(), agent.clone());
            agent
        };

        info!(agent_id = %agent.id, category = %agent.category, "agent registered");
        self.bus
            .publish_from(
                topics::AGENT_REGISTERED,
                json!({
                    "agent_id": agent.id,
                    "name": agent.name,
                    "category": agent.category,
                    "capabilities": agent.capabilities,
                }),
                "registry",
            )
            .await;
        Ok(agent)
    }

    /// Removes an agent. This is the only removal path; offline agents stay
    /// visible until an operator deregisters them.
    pub async fn deregister(&self, agent_id: &str) -> CaremeshResult<AgentInfo> {
        let agent = {
            let mut state = self.state.write().await;
            let Some(agent) = state.agents.remove(agent_id) else {
                return Err(CaremeshError::AgentNotFound(agent_id.to_string()));
            };
            state.unindex(&agent);
            agent
        };

        info!(agent_id = %agent.id, "agent deregistered");
        self.bus
            .publish_from(
                topics::AGENT_DEREGISTERED,
                json!({"agent_id": agent.id, "name": agent.name}),
                "registry",
            )
            .await;
        Ok(agent)
    }

    /// Records a liveness ping. This is the only call that moves
    /// `last_heartbeat`, and the only way an offline agent comes back.
    pub async fn heartbeat(&self, agent_id: &str, hb: Heartbeat) -> CaremeshResult<AgentStatus> {
        let mut state = self.state.write().await;
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return Err(CaremeshError::AgentNotFound(agent_id.to_string()));
        };

        agent.last_heartbeat = Utc::now();
        if hb.cpu_percent.is_some() {
            agent.cpu_percent = hb.cpu_percent;
        }
        if hb.memory_mb.is_some() {
            agent.memory_mb = hb.memory_mb;
        }

        let was_offline = agent.status == AgentStatus::Offline;
        agent.status = if agent.status == AgentStatus::Maintenance {
            // Maintenance is operator-scoped; a heartbeat refreshes liveness
            // without ending it.
            AgentStatus::Maintenance
        } else if hb.error {
            AgentStatus::Error
        } else {
            load_status(agent)
        };

        if was_offline && agent.status != AgentStatus::Offline {
            info!(agent_id, status = %agent.status, "agent back online");
        }
        Ok(agent.status)
    }

    /// Operator transition in or out of maintenance. Entering maintenance
    /// stops new assignments without touching in-flight tasks.
    pub async fn set_maintenance(&self, agent_id: &str, on: bool) -> CaremeshResult<AgentStatus> {
        let mut state = self.state.write().await;
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return Err(CaremeshError::AgentNotFound(agent_id.to_string()));
        };
        agent.status = if on {
            AgentStatus::Maintenance
        } else {
            load_status(agent)
        };
        info!(agent_id, status = %agent.status, "maintenance toggled");
        Ok(agent.status)
    }

    /// Snapshot of one agent.
    pub async fn get(&self, agent_id: &str) -> Option<AgentInfo> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    /// Snapshot of all agents, optionally filtered by status.
    pub async fn list(&self, status: Option<AgentStatus>) -> Vec<AgentInfo> {
        let state = self.state.read().await;
        let mut agents: Vec<AgentInfo> = state
            .agents
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Snapshot of all agents in one category.
    pub async fn list_by_category(&self, category: AgentCategory) -> Vec<AgentInfo> {
        let state = self.state.read().await;
        let Some(ids) = state.by_category.get(&category) else {
            return Vec::new();
        };
        let mut agents: Vec<AgentInfo> =
            ids.iter().filter_map(|id| state.agents.get(id).cloned()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Copies out every agent that could take a task with the given
    /// requirement right now: capability superset, optional category match,
    /// a normal operating status, and a free concurrency slot.
    ///
    /// Ordering is not guaranteed; ranking candidates is the router's job.
    pub async fn find_capable(
        &self,
        required: &HashSet<String>,
        category: Option<AgentCategory>,
    ) -> Vec<AgentInfo> {
        let state = self.state.read().await;
        state
            .candidate_ids(required)
            .into_iter()
            .filter_map(|id| state.agents.get(&id))
            .filter(|a| category.map_or(true, |c| a.category == c))
            .filter(|a| a.is_assignable())
            .cloned()
            .collect()
    }

    /// Marks every agent whose last heartbeat is older than `timeout` as
    /// offline, publishing `agent.failed` once per transition. Agents that
    /// are already offline are untouched, so a second sweep without an
    /// intervening heartbeat reports nothing.
    ///
    /// Returns the ids that just went offline so the router can fail over
    /// their in-flight tasks.
    pub async fn sweep_expired(&self, timeout: Duration) -> Vec<String> {
        let expired: Vec<String> = {
            let mut state = self.state.write().await;
            let now = Utc::now();
            let mut expired = Vec::new();
            for agent in state.agents.values_mut() {
                if agent.status == AgentStatus::Offline {
                    continue;
                }
                if now - agent.last_heartbeat > timeout {
                    warn!(agent_id = %agent.id, "agent missed heartbeat window, marking offline");
                    agent.status = AgentStatus::Offline;
                    expired.push(agent.id.clone());
                }
            }
            expired
        };

        for agent_id in &expired {
            self.bus
                .publish_from(topics::AGENT_FAILED, json!({"agent_id": agent_id}), "registry")
                .await;
        }
        expired
    }

    /// Claims one concurrency slot on the agent for an imminent assignment.
    /// Returns false when the agent is gone, ineligible, or already at its
    /// limit — the caller then tries another candidate.
    pub async fn reserve_slot(&self, agent_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.agents.get_mut(agent_id) {
            Some(agent) if agent.is_assignable() => {
                agent.active_tasks += 1;
                true
            }
            _ => false,
        }
    }

    /// Returns a slot claimed by [`reserve_slot`] when the assignment was
    /// abandoned before it committed. No counters move.
    pub async fn release_slot(&self, agent_id: &str) {
        let mut state = self.state.write().await;
        if let Some(agent) = state.agents.get_mut(agent_id) {
            agent.active_tasks = agent.active_tasks.saturating_sub(1);
        }
    }

    /// Frees the agent's slot for a finished task and folds the outcome
    /// into its performance counters. Tolerates an agent that was
    /// deregistered while the task was in flight.
    pub async fn record_outcome(&self, agent_id: &str, response_time_ms: f64, success: bool) {
        let mut state = self.state.write().await;
        let Some(agent) = state.agents.get_mut(agent_id) else {
            debug!(agent_id, "outcome for an agent no longer registered");
            return;
        };
        agent.active_tasks = agent.active_tasks.saturating_sub(1);
        agent.last_task_at = Some(Utc::now());
        if success {
            let completed = agent.tasks_completed as f64;
            agent.avg_response_time_ms = if agent.tasks_completed == 0 {
                response_time_ms
            } else {
                (agent.avg_response_time_ms * completed + response_time_ms) / (completed + 1.0)
            };
            agent.tasks_completed += 1;
        } else {
            agent.tasks_failed += 1;
        }
    }

    /// Aggregate counts for the status surface. Pure read.
    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        let mut stats = RegistryStats::default();
        for agent in state.agents.values() {
            stats.total += 1;
            match agent.status {
                AgentStatus::Active => stats.active += 1,
                AgentStatus::Idle => stats.idle += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Error => stats.error += 1,
                AgentStatus::Offline => stats.offline += 1,
                AgentStatus::Maintenance => stats.maintenance += 1,
            }
            stats.active_tasks += u64::from(agent.active_tasks);
            stats.tasks_completed += agent.tasks_completed;
            stats.tasks_failed += agent.tasks_failed;
        }
        stats
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.state.read().await.agents.len()
    }

    /// True when no agents are registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Registry-wide aggregate counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    /// Registered agents, all statuses.
    pub total: usize,
    /// Agents in Active status.
    pub active: usize,
    /// Agents in Idle status.
    pub idle: usize,
    /// Agents in Busy status.
    pub busy: usize,
    /// Agents in Error status.
    pub error: usize,
    /// Agents in Offline status.
    pub offline: usize,
    /// Agents in Maintenance status.
    pub maintenance: usize,
    /// Tasks currently held across all agents.
    pub active_tasks: u64,
    /// Lifetime completed tasks across all agents.
    pub tasks_completed: u64,
    /// Lifetime failed tasks across all agents.
    pub tasks_failed: u64,
}
