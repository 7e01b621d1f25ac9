//! Common types shared by the pipeplay element engine and its front ends.
//!
//! This crate defines the vocabulary every pipeline stage speaks: the
//! worker-thread lifecycle ([`ExecutionState`]), the transport mode an
//! orchestrator drives ([`MediaState`]), the error taxonomy
//! ([`ElementError`]) and serializable status snapshots.
//!
//! # Examples
//!
//! ```
//! use common::ExecutionState;
//!
//! assert!(ExecutionState::Idle.can_transition_to(ExecutionState::Executing));
//! assert!(!ExecutionState::Idle.can_transition_to(ExecutionState::Initializing));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle phase of one element's worker thread.
///
/// Transitions follow a fixed directed graph, see
/// [`ExecutionState::can_transition_to`]:
///
/// ```text
/// WaitingForExecute -> Initializing -> Idle <-> Executing
///                                       |          |
///                                       +--> Terminating <--+
///                                              |
///                         WaitingForExecute <--+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionState {
    /// No worker thread is running.
    #[default]
    WaitingForExecute,
    /// The worker is running the stage's `initialize` hook.
    Initializing,
    /// The worker is parked or between units of work.
    Idle,
    /// The worker is running the stage's `do_work` hook.
    Executing,
    /// The worker left its run loop and is running the `terminating` hook.
    Terminating,
}

impl ExecutionState {
    /// All five states, in lifecycle order.
    pub const ALL: [ExecutionState; 5] = [
        ExecutionState::WaitingForExecute,
        ExecutionState::Initializing,
        ExecutionState::Idle,
        ExecutionState::Executing,
        ExecutionState::Terminating,
    ];

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Staying in the same state is not a transition and returns `false`;
    /// callers treat it as a no-op before consulting the table.
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (WaitingForExecute, Initializing)
                | (Initializing, Idle)
                | (Executing, Idle)
                | (Executing, Terminating)
                | (Idle, Executing)
                | (Idle, Terminating)
                | (Terminating, WaitingForExecute)
        )
    }

    /// Whether a worker thread exists while the element is in this state.
    pub fn has_worker(self) -> bool {
        self != ExecutionState::WaitingForExecute
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::WaitingForExecute => "waiting-for-execute",
            ExecutionState::Initializing => "initializing",
            ExecutionState::Idle => "idle",
            ExecutionState::Executing => "executing",
            ExecutionState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Transport mode shared between an orchestrator and an element.
///
/// Only [`MediaState::Playing`] lets the worker run `do_work`; the other
/// states park it. `Paused` is the state flushing and termination require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MediaState {
    Stopped,
    #[default]
    Paused,
    Playing,
}

impl MediaState {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stopped" | "stop" => Some(MediaState::Stopped),
            "paused" | "pause" => Some(MediaState::Paused),
            "playing" | "play" => Some(MediaState::Playing),
            _ => None,
        }
    }
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaState::Stopped => "stopped",
            MediaState::Paused => "paused",
            MediaState::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// Errors raised by element lifecycle operations and stage hooks.
///
/// All errors are serializable so they can travel inside a status report.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementError {
    /// A lifecycle method was called while the element could not honour it.
    /// The element is left untouched.
    #[error("invalid operation: {operation} (execution state {execution_state}, media state {media_state})")]
    InvalidOperation {
        operation: String,
        execution_state: ExecutionState,
        media_state: MediaState,
    },

    /// A transition outside the lifecycle graph was requested.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    /// A lock was poisoned by a panicking thread.
    #[error("synchronization failure: {0}")]
    SynchronizationFailure(String),

    /// The worker thread could not be spawned or joined.
    #[error("thread error: {0}")]
    Thread(String),

    /// A stage hook reported an error.
    #[error("stage {element} failed: {message}")]
    Stage { element: String, message: String },
}

impl ElementError {
    /// Shorthand for a [`ElementError::Stage`] error.
    pub fn stage(element: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Stage {
            element: element.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error points at a caller bug rather than the environment.
    pub fn is_logic_error(&self) -> bool {
        matches!(
            self,
            ElementError::InvalidOperation { .. } | ElementError::InvalidStateTransition { .. }
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for ElementError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::SynchronizationFailure(e.to_string())
    }
}

/// Point-in-time view of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementStatus {
    pub name: String,
    pub execution_state: ExecutionState,
    pub media_state: MediaState,
    pub is_executing: bool,
    pub input_pins: usize,
    pub output_pins: usize,
    /// Buffers currently queued on the element's input links
    pub buffered_inputs: usize,
    /// Buffers currently queued on the element's output links
    pub buffered_outputs: usize,
    pub failure: Option<ElementError>,
}

/// Point-in-time view of a whole pipeline, in element order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub elements: Vec<ElementStatus>,
}

impl PipelineStatus {
    /// Elements that reported a hook failure
    pub fn failures(&self) -> impl Iterator<Item = &ElementStatus> {
        self.elements.iter().filter(|e| e.failure.is_some())
    }

    /// Whether every element's worker thread is gone.
    pub fn all_stopped(&self) -> bool {
        self.elements
            .iter()
            .all(|e| e.execution_state == ExecutionState::WaitingForExecute)
    }
}
