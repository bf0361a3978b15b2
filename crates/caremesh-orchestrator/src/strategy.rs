use crate::types::AgentInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Policy for picking one agent among the capable candidates for a task.
///
/// The router holds one active strategy behind this trait and can swap it
/// at runtime; adding a policy never touches the router's loop. Candidates
/// arrive unordered from the registry, so every implementation must be
/// deterministic on its own — all four ship with an agent-id tie-break.
pub trait RoutingStrategy: Send + Sync {
    /// Short machine name for logs and the status surface.
    fn name(&self) -> &'static str;

    /// Picks one agent, or `None` when `candidates` is empty.
    ///
    /// `required` is the task's capability requirement; round robin uses it
    /// to keep one rotation per capability signature.
    fn select<'a>(
        &self,
        required: &HashSet<String>,
        candidates: &'a [AgentInfo],
    ) -> Option<&'a AgentInfo>;
}

/// Rotates through capable agents, one cursor per capability signature, so
/// tasks with the same requirement spread evenly across the same pool.
pub struct RoundRobin {
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoundRobin {
    /// Creates a rotation with no history.
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn signature(required: &HashSet<String>) -> String {
        let mut tags: Vec<&str> = required.iter().map(String::as_str).collect();
        tags.sort_unstable();
        tags.join("+")
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select<'a>(
        &self,
        required: &HashSet<String>,
        candidates: &'a [AgentInfo],
    ) -> Option<&'a AgentInfo> {
        if candidates.is_empty() {
            return None;
        }
        let mut ordered: Vec<&AgentInfo> = candidates.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(Self::signature(required)).or_insert(0);
        let picked = ordered[*cursor % ordered.len()];
        *cursor = cursor.wrapping_add(1);
        Some(picked)
    }
}

/// Picks the agent with the fewest tasks in flight; ties go to the higher
/// priority weight, then the lexically smaller id.
pub struct LeastLoaded;

impl RoutingStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select<'a>(
        &self,
        _required: &HashSet<String>,
        candidates: &'a [AgentInfo],
    ) -> Option<&'a AgentInfo> {
        candidates.iter().min_by(|a, b| {
            a.active_tasks
                .cmp(&b.active_tasks)
                .then(b.priority_weight.cmp(&a.priority_weight))
                .then(a.id.cmp(&b.id))
        })
    }
}

/// Picks the agent with the lowest mean response time. Agents with no
/// completed tasks count as 0 ms, so fresh agents are tried first and
/// start accumulating history.
pub struct Fastest;

fn effective_response_ms(agent: &AgentInfo) -> f64 {
    if agent.tasks_completed == 0 {
        0.0
    } else {
        agent.avg_response_time_ms
    }
}

impl RoutingStrategy for Fastest {
    fn name(&self) -> &'static str {
        "fastest"
    }

    fn select<'a>(
        &self,
        _required: &HashSet<String>,
        candidates: &'a [AgentInfo],
    ) -> Option<&'a AgentInfo> {
        candidates.iter().min_by(|a, b| {
            effective_response_ms(a)
                .total_cmp(&effective_response_ms(b))
                .then(a.id.cmp(&b.id))
        })
    }
}

/// Picks the agent with the highest declared priority weight; ties go to
/// the lighter-loaded agent, then the lexically smaller id.
pub struct PriorityWeight;

impl RoutingStrategy for PriorityWeight {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select<'a>(
        &self,
        _required: &HashSet<String>,
        candidates: &'a [AgentInfo],
    ) -> Option<&'a AgentInfo> {
        candidates.iter().min_by(|a, b| {
            b.priority_weight
                .cmp(&a.priority_weight)
                .then(a.active_tasks.cmp(&b.active_tasks))
                .then(a.id.cmp(&b.id))
        })
    }
}

/// Config-facing name for a routing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// [`RoundRobin`].
    RoundRobin,
    /// [`LeastLoaded`] — the deployment default.
    #[default]
    LeastLoaded,
    /// [`Fastest`].
    Fastest,
    /// [`PriorityWeight`].
    Priority,
}

impl StrategyKind {
    /// Instantiates the strategy this name stands for.
    pub fn build(self) -> Arc<dyn RoutingStrategy> {
        match self {
            StrategyKind::RoundRobin => Arc::new(RoundRobin::new()),
            StrategyKind::LeastLoaded => Arc::new(LeastLoaded),
            StrategyKind::Fastest => Arc::new(Fastest),
            StrategyKind::Priority => Arc::new(PriorityWeight),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::RoundRobin => write!(f, "round_robin"),
            StrategyKind::LeastLoaded => write!(f, "least_loaded"),
            StrategyKind::Fastest => write!(f, "fastest"),
            StrategyKind::Priority => write!(f, "priority"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentCategory, AgentRegistration};

    fn agent(id: &str, weight: u32, active: u32, avg_ms: f64, completed: u64) -> AgentInfo {
        let mut info = AgentInfo::from_registration(
            AgentRegistration::new(id, format!("Agent {id}"), AgentCategory::Clinical)
                .with_capability("triage")
                .with_priority_weight(weight),
            5,
        );
        info.active_tasks = active;
        info.avg_response_time_ms = avg_ms;
        info.tasks_completed = completed;
        info
    }

    fn no_caps() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_least_loaded_picks_smallest_load() {
        let agents = vec![agent("a1", 5, 2, 0.0, 0), agent("a2", 5, 0, 0.0, 0), agent("a3", 5, 1, 0.0, 0)];
        let picked = LeastLoaded.select(&no_caps(), &agents).unwrap();
        assert_eq!(picked.id, "a2");
    }

    #[test]
    fn test_least_loaded_tie_breaks_by_weight_then_id() {
        let agents = vec![agent("a1", 5, 1, 0.0, 0), agent("a2", 10, 1, 0.0, 0)];
        assert_eq!(LeastLoaded.select(&no_caps(), &agents).unwrap().id, "a2");

        let agents = vec![agent("b", 5, 1, 0.0, 0), agent("a", 5, 1, 0.0, 0)];
        assert_eq!(LeastLoaded.select(&no_caps(), &agents).unwrap().id, "a");
    }

    #[test]
    fn test_fastest_prefers_lowest_mean() {
        let agents = vec![agent("a1", 5, 0, 300.0, 4), agent("a2", 5, 0, 120.0, 4)];
        assert_eq!(Fastest.select(&no_caps(), &agents).unwrap().id, "a2");
    }

    #[test]
    fn test_fastest_treats_no_history_as_zero() {
        // a2 has never completed a task: it must be tried before the proven
        // fast agent so it can gather data.
        let agents = vec![agent("a1", 5, 0, 80.0, 10), agent("a2", 5, 0, 0.0, 0)];
        assert_eq!(Fastest.select(&no_caps(), &agents).unwrap().id, "a2");
    }

    #[test]
    fn test_priority_weight_wins_then_load() {
        let agents = vec![agent("a1", 9, 0, 0.0, 0), agent("a2", 3, 0, 0.0, 0)];
        assert_eq!(PriorityWeight.select(&no_caps(), &agents).unwrap().id, "a1");

        let agents = vec![agent("a1", 9, 3, 0.0, 0), agent("a2", 9, 1, 0.0, 0)];
        assert_eq!(PriorityWeight.select(&no_caps(), &agents).unwrap().id, "a2");
    }

    #[test]
    fn test_round_robin_rotates_per_signature() {
        let rr = RoundRobin::new();
        let agents = vec![agent("a1", 5, 0, 0.0, 0), agent("a2", 5, 0, 0.0, 0), agent("a3", 5, 0, 0.0, 0)];
        let sig: HashSet<String> = ["triage".to_string()].into_iter().collect();

        let picks: Vec<String> = (0..4)
            .map(|_| rr.select(&sig, &agents).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["a1", "a2", "a3", "a1"]);

        // A different signature rotates independently.
        let other: HashSet<String> = ["imaging".to_string()].into_iter().collect();
        assert_eq!(rr.select(&other, &agents).unwrap().id, "a1");
    }

    #[test]
    fn test_round_robin_handles_shrinking_pool() {
        let rr = RoundRobin::new();
        let full = vec![agent("a1", 5, 0, 0.0, 0), agent("a2", 5, 0, 0.0, 0), agent("a3", 5, 0, 0.0, 0)];
        let sig = no_caps();
        rr.select(&sig, &full).unwrap();
        rr.select(&sig, &full).unwrap();

        // Pool shrank to one; the stale cursor must still land in range.
        let small = vec![agent("a9", 5, 0, 0.0, 0)];
        assert_eq!(rr.select(&sig, &small).unwrap().id, "a9");
    }

    #[test]
    fn test_empty_candidates_yield_none() {
        assert!(LeastLoaded.select(&no_caps(), &[]).is_none());
        assert!(Fastest.select(&no_caps(), &[]).is_none());
        assert!(PriorityWeight.select(&no_caps(), &[]).is_none());
        assert!(RoundRobin::new().select(&no_caps(), &[]).is_none());
    }

    #[test]
    fn test_strategy_kind_builds_matching_name() {
        for kind in [
            StrategyKind::RoundRobin,
            StrategyKind::LeastLoaded,
            StrategyKind::Fastest,
            StrategyKind::Priority,
        ] {
            assert_eq!(kind.build().name(), kind.to_string());
        }
    }

    #[test]
    fn test_strategy_kind_deserializes_from_snake_case() {
        let kind: StrategyKind = serde_json::from_str("\"round_robin\"").unwrap();
        assert_eq!(kind, StrategyKind::RoundRobin);
        assert_eq!(StrategyKind::default(), StrategyKind::LeastLoaded);
    }
}
