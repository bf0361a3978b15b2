//! Core types and error definitions for the CareMesh platform.
//!
//! This crate provides the foundational types shared across all CareMesh
//! crates: the unified error enum, a result alias, and the bus event
//! representation with its topic namespace.
//!
//! # Main types
//!
//! - [`CaremeshError`] — Unified error enum for all CareMesh subsystems.
//! - [`CaremeshResult`] — Convenience alias for `Result<T, CaremeshError>`.
//! - [`Event`] — A single message published on the orchestrator bus.
//! - [`topics`] — Dot-namespaced topic constants for lifecycle events.

/// Bus event representation and topic constants.
pub mod event;

pub use event::{topics, Event};

/// Top-level error type for the CareMesh platform.
///
/// The first three variants are the rejection taxonomy of the registry and
/// router; the remainder cover configuration and serialization plumbing.
#[derive(Debug, thiserror::Error)]
pub enum CaremeshError {
    /// A registration used an agent id that is already present.
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// An operation referenced an agent id that is not registered.
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    /// An outcome report referenced a task id that is not known.
    #[error("task '{0}' not found")]
    TaskNotFound(String),

    /// A task submission failed validation.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CaremeshError`].
pub type CaremeshResult<T> = Result<T, CaremeshError>;
