//! Multi-agent task orchestration core: agent registry, priority routing,
//! pub/sub event fabric, and liveness monitoring.
//!
//! A coordinator registers heterogeneous worker agents, accepts prioritized
//! tasks, matches tasks to capable agents under a pluggable routing policy,
//! tracks agent liveness via heartbeats, and propagates lifecycle events
//! through an in-process bus. Agents are opaque capability providers: the
//! orchestrator never inspects or executes their domain logic.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Facade and background-loop driver; the only entry
//!   point external callers use.
//! - [`AgentRegistry`] — Known agents, their capabilities, and live health
//!   state.
//! - [`TaskRouter`] — Pending-task priority queues and the assignment
//!   policy.
//! - [`MessageBus`] — Topic-based pub/sub with a bounded inspection
//!   history.
//! - [`RoutingStrategy`] — Pluggable agent-selection policy with four
//!   built-in implementations.
//! - [`OrchestratorConfig`] — Every deployment tunable, TOML-loadable.

/// Topic-based pub/sub fabric with bounded history.
pub mod bus;
/// Deployment configuration.
pub mod config;
/// Orchestrator facade and background loops.
pub mod engine;
/// Agent registration, discovery, and liveness bookkeeping.
pub mod registry;
/// Priority queues, assignment, retry, and failover.
pub mod router;
/// Agent-selection policies.
pub mod strategy;
/// Shared orchestration types (agents, tasks, heartbeats).
pub mod types;

pub use bus::{MessageBus, Subscription};
pub use config::OrchestratorConfig;
pub use engine::{ActivityEntry, Orchestrator, OrchestratorStatus};
pub use registry::{AgentRegistry, RegistryStats};
pub use router::{Assignment, RoutingStats, TaskRouter};
pub use strategy::{Fastest, LeastLoaded, PriorityWeight, RoundRobin, RoutingStrategy, StrategyKind};
pub use types::{
    AgentCategory, AgentInfo, AgentRegistration, AgentStatus, Heartbeat, Task, TaskOutcome,
    TaskPriority, TaskSpec, TaskStatus,
};
