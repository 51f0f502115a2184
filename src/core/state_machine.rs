//! State machine for the build & publish pipeline
//!
//! The pipeline is linear with one designated back-edge,
//! `Publishing(Sdk) -> Publishing(Cli)`, which may be taken at most once.
//! Every other transition outside the table is rejected.

use crate::core::config::PublishStrategy;
use crate::core::error::{PublisherError, Result};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Planning,
    SyncingLock,
    ConsistencyCheck,
    Building,
    Publishing(PublishStrategy),
    Extracting,
    Labeling,
    Persisting,
    Done,
    Failed,
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => f.write_str("PLANNING"),
            Self::SyncingLock => f.write_str("SYNCING_LOCK"),
            Self::ConsistencyCheck => f.write_str("CONSISTENCY_CHECK"),
            Self::Building => f.write_str("BUILDING"),
            Self::Publishing(strategy) => write!(f, "PUBLISHING({})", strategy),
            Self::Extracting => f.write_str("EXTRACTING"),
            Self::Labeling => f.write_str("LABELING"),
            Self::Persisting => f.write_str("PERSISTING"),
            Self::Done => f.write_str("DONE"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

impl Serialize for PublishState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// State transition
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StateTransition {
    pub from: PublishState,
    pub to: PublishState,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// State machine for tracking a single publish invocation
#[derive(Debug)]
pub struct PublishStateMachine {
    current_state: PublishState,
    transitions: Vec<StateTransition>,
    retried: bool,
    started_at: DateTime<Utc>,
}

impl Default for PublishStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishStateMachine {
    /// Create a state machine in `Planning`
    pub fn new() -> Self {
        Self {
            current_state: PublishState::Planning,
            transitions: Vec::new(),
            retried: false,
            started_at: Utc::now(),
        }
    }

    fn is_allowed(&self, to: PublishState) -> bool {
        use PublishState::*;

        if to == Failed {
            return !self.current_state.is_terminal();
        }

        match (self.current_state, to) {
            (Planning, SyncingLock)
            | (SyncingLock, ConsistencyCheck)
            | (ConsistencyCheck, Building)
            | (Building, Publishing(_))
            | (Publishing(_), Extracting)
            | (Extracting, Labeling)
            | (Labeling, Persisting)
            | (Persisting, Done) => true,
            (Publishing(PublishStrategy::Sdk), Publishing(PublishStrategy::Cli)) => !self.retried,
            _ => false,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, to: PublishState, note: Option<String>) -> Result<()> {
        if !self.is_allowed(to) {
            return Err(PublisherError::InvalidTransition {
                from: self.current_state.to_string(),
                to: to.to_string(),
            });
        }

        if matches!(
            (self.current_state, to),
            (PublishState::Publishing(_), PublishState::Publishing(_))
        ) {
            self.retried = true;
        }

        tracing::debug!(from = %self.current_state, to = %to, "pipeline transition");

        self.transitions.push(StateTransition {
            from: self.current_state,
            to,
            timestamp: Utc::now(),
            note,
        });
        self.current_state = to;

        Ok(())
    }

    /// Move to `Failed`, unless already terminal
    pub fn fail(&mut self, error: &PublisherError) {
        if !self.current_state.is_terminal() {
            let _ = self.transition(PublishState::Failed, Some(error.to_string()));
        }
    }

    pub fn get_state(&self) -> PublishState {
        self.current_state
    }

    /// Whether the strategy back-edge has been taken
    pub fn has_retried(&self) -> bool {
        self.retried
    }

    /// Whether the strategy back-edge is still available
    pub fn can_retry(&self) -> bool {
        self.current_state == PublishState::Publishing(PublishStrategy::Sdk) && !self.retried
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Milliseconds from creation to the last transition, or to now before any
    pub fn get_elapsed_time(&self) -> i64 {
        let until = self.transitions.last().map_or_else(Utc::now, |t| t.timestamp);
        (until - self.started_at).num_milliseconds()
    }

    /// Get transition history as human-readable string
    pub fn get_history(&self) -> String {
        self.transitions
            .iter()
            .map(|t| {
                let note = t
                    .note
                    .as_ref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default();
                format!("{}: {} → {}{}", t.timestamp.to_rfc3339(), t.from, t.to, note)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
