use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic names published by the orchestrator components.
///
/// Topics are dot-namespaced and matched exactly; there is no wildcard
/// subscription.
pub mod topics {
    /// A new agent was registered.
    pub const AGENT_REGISTERED: &str = "agent.registered";
    /// An agent was explicitly removed from the registry.
    pub const AGENT_DEREGISTERED: &str = "agent.deregistered";
    /// An agent missed its heartbeat window and was marked offline.
    pub const AGENT_FAILED: &str = "agent.failed";
    /// A task entered the pending queue.
    pub const TASK_SUBMITTED: &str = "task.submitted";
    /// A task was matched to an agent.
    pub const TASK_ASSIGNED: &str = "task.assigned";
    /// A task finished successfully.
    pub const TASK_COMPLETED: &str = "task.completed";
    /// A task failed terminally (retries exhausted or no retry allowed).
    pub const TASK_FAILED: &str = "task.failed";
    /// A failed task was returned to the pending queue for another attempt.
    pub const TASK_RETRIED: &str = "task.retried";
}

/// A single message published on the orchestrator bus.
///
/// Events are fire-and-forget notifications; the bus keeps a bounded
/// history of them for inspection but offers no delivery guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number assigned by the bus at publish time.
    pub seq: u64,
    /// Dot-namespaced topic, e.g. `task.submitted`.
    pub topic: String,
    /// Structured event data; shape varies by topic.
    pub payload: serde_json::Value,
    /// Component or agent that published the event, if known.
    #[serde(default)]
    pub sender: Option<String>,
    /// UTC timestamp of publication.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event with sequence number zero; the bus stamps the real
    /// sequence when the event is published.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            seq: 0,
            topic: topic.into(),
            payload,
            sender: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches a sender id to the event.
    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = Event::new(topics::TASK_SUBMITTED, serde_json::json!({"task_id": "t1"}))
            .from_sender("router");
        assert_eq!(event.topic, "task.submitted");
        assert_eq!(event.sender.as_deref(), Some("router"));
        assert_eq!(event.payload["task_id"], "t1");
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let event = Event::new(topics::AGENT_FAILED, serde_json::json!({"agent_id": "a1"}));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.topic, event.topic);
        assert_eq!(parsed.payload, event.payload);
    }
}
