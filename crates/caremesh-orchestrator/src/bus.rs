use caremesh_core::Event;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// In-process publish/subscribe fabric for orchestrator lifecycle events.
///
/// Each topic fans out over its own broadcast channel: publishing never
/// blocks, and a subscriber that falls behind its bounded buffer loses its
/// oldest pending messages rather than stalling the publisher. A bounded
/// ring of recent events across all topics is kept for inspection only —
/// it is not a durable log and carries no delivery guarantee.
pub struct MessageBus {
    topics: RwLock<HashMap<String, broadcast::Sender<Event>>>,
    history: RwLock<VecDeque<Event>>,
    max_history: usize,
    subscriber_capacity: usize,
    seq: AtomicU64,
}

impl MessageBus {
    /// Creates a bus keeping at most `max_history` events for inspection,
    /// with a per-subscriber buffer of `subscriber_capacity` messages.
    pub fn new(max_history: usize, subscriber_capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history: max_history.max(1),
            subscriber_capacity: subscriber_capacity.max(1),
            seq: AtomicU64::new(1),
        }
    }

    /// Publishes an event to all current subscribers of exactly `topic`.
    ///
    /// Returns the stamped event. Never blocks on slow subscribers.
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) -> Event {
        self.publish_event(Event::new(topic, payload)).await
    }

    /// Publishes an event carrying a sender id.
    pub async fn publish_from(
        &self,
        topic: &str,
        payload: serde_json::Value,
        sender: &str,
    ) -> Event {
        self.publish_event(Event::new(topic, payload).from_sender(sender)).await
    }

    async fn publish_event(&self, mut event: Event) -> Event {
        event.seq = self.seq.fetch_add(1, Ordering::Relaxed);

        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let topics = self.topics.read().await;
        if let Some(tx) = topics.get(&event.topic) {
            // Err means every receiver is gone; nothing to deliver.
            let delivered = tx.send(event.clone()).unwrap_or(0);
            debug!(topic = %event.topic, seq = event.seq, subscribers = delivered, "published");
        }

        event
    }

    /// Subscribes to events published on exactly `topic` from now on.
    pub async fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.write().await;
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.subscriber_capacity).0);
        Subscription {
            topic: topic.to_string(),
            receiver: tx.subscribe(),
        }
    }

    /// Returns up to `limit` most recent events across all topics, oldest
    /// first.
    pub async fn recent_history(&self, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Returns up to `limit` most recent events for one topic, oldest first.
    pub async fn history_for(&self, topic: &str, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        let mut matching: Vec<Event> =
            history.iter().filter(|e| e.topic == topic).cloned().collect();
        let skip = matching.len().saturating_sub(limit);
        matching.drain(..skip);
        matching
    }

    /// Number of events currently held in the inspection ring.
    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    /// Topics that have had at least one subscriber.
    pub async fn topics(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }

    /// Discards the inspection history. Active subscriptions are unaffected.
    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

/// Handle yielding events published on one topic after subscription.
///
/// When the subscriber's bounded buffer overflows, the oldest pending
/// messages are dropped; the gap is logged and reception continues with
/// the newest available event.
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// The topic this subscription is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "slow subscriber dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event without waiting, if one is buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "slow subscriber dropped oldest events");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use caremesh_core::topics;
    use serde_json::json;

    fn bus() -> MessageBus {
        MessageBus::new(100, 16)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = bus();
        let mut sub = bus.subscribe(topics::TASK_SUBMITTED).await;

        bus.publish(topics::TASK_SUBMITTED, json!({"task_id": "t1"})).await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.topic, "task.submitted");
        assert_eq!(event.payload["task_id"], "t1");
    }

    #[tokio::test]
    async fn test_exact_topic_matching_only() {
        let bus = bus();
        let mut sub = bus.subscribe("task.completed").await;

        bus.publish("task.failed", json!({})).await;
        assert!(sub.try_recv().is_none());

        bus.publish("task.completed", json!({})).await;
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = bus();
        let event = bus.publish(topics::AGENT_FAILED, json!({"agent_id": "a1"})).await;
        assert!(event.seq > 0);
        assert_eq!(bus.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let bus = bus();
        let first = bus.publish("t", json!(1)).await;
        let second = bus.publish("t", json!(2)).await;
        assert!(second.seq > first.seq);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = MessageBus::new(100, 2);
        let mut sub = bus.subscribe("t").await;

        for i in 0..5 {
            bus.publish("t", json!(i)).await;
        }

        // Buffer holds 2; the three oldest were dropped.
        assert_eq!(sub.recv().await.unwrap().payload, json!(3));
        assert_eq!(sub.recv().await.unwrap().payload, json!(4));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_history_ring_is_bounded() {
        let bus = MessageBus::new(3, 16);
        for i in 0..10 {
            bus.publish("t", json!(i)).await;
        }
        let history = bus.recent_history(10).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].payload, json!(7));
        assert_eq!(history[2].payload, json!(9));
    }

    #[tokio::test]
    async fn test_history_for_topic_filters() {
        let bus = bus();
        bus.publish("task.submitted", json!(1)).await;
        bus.publish("agent.failed", json!(2)).await;
        bus.publish("task.submitted", json!(3)).await;

        let task_events = bus.history_for("task.submitted", 10).await;
        assert_eq!(task_events.len(), 2);
        assert_eq!(task_events[1].payload, json!(3));

        let limited = bus.history_for("task.submitted", 1).await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].payload, json!(3));
    }

    #[tokio::test]
    async fn test_subscription_is_not_a_replay_log() {
        let bus = bus();
        bus.publish("t", json!("before")).await;

        let mut sub = bus.subscribe("t").await;
        assert!(sub.try_recv().is_none());

        bus.publish("t", json!("after")).await;
        assert_eq!(sub.recv().await.unwrap().payload, json!("after"));
    }

    #[tokio::test]
    async fn test_clear_history_keeps_subscriptions() {
        let bus = bus();
        let mut sub = bus.subscribe("t").await;
        bus.publish("t", json!(1)).await;
        bus.clear_history().await;

        assert_eq!(bus.history_len().await, 0);
        // The earlier event is still buffered for the subscriber.
        assert!(sub.try_recv().is_some());

        bus.publish("t", json!(2)).await;
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_topics_listing() {
        let bus = bus();
        let _a = bus.subscribe("task.submitted").await;
        let _b = bus.subscribe("agent.failed").await;
        let mut names = bus.topics().await;
        names.sort();
        assert_eq!(names, vec!["agent.failed", "task.submitted"]);
    }
}
