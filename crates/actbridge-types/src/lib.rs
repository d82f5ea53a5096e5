//! `actbridge-types` – shared vocabulary of the reverse action bridge.
//!
//! Both protocol sides, the bridge core, and the lifecycle event bus speak in
//! terms of the types defined here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Globally unique goal identifier assigned by the new-protocol layer.
pub type GoalId = Uuid;

/// Answer to an inbound new-protocol goal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalResponse {
    /// The goal is refused; no handle is ever created for it.
    Reject,
    /// The goal is accepted and execution starts right away.
    AcceptAndExecute,
}

/// Answer to an inbound new-protocol cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelResponse {
    Reject,
    Accept,
}

/// Goal state as reported by the legacy simple action client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyGoalState {
    Pending,
    Active,
    Recalled,
    Rejected,
    Preempted,
    Aborted,
    Succeeded,
    Lost,
}

impl fmt::Display for LegacyGoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LegacyGoalState::Pending => "PENDING",
            LegacyGoalState::Active => "ACTIVE",
            LegacyGoalState::Recalled => "RECALLED",
            LegacyGoalState::Rejected => "REJECTED",
            LegacyGoalState::Preempted => "PREEMPTED",
            LegacyGoalState::Aborted => "ABORTED",
            LegacyGoalState::Succeeded => "SUCCEEDED",
            LegacyGoalState::Lost => "LOST",
        };
        f.write_str(name)
    }
}

/// Terminal outcome reported to the remote new-protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Succeeded,
    Aborted,
    Canceled,
}

impl TerminalOutcome {
    /// Map a legacy terminal state onto the new protocol.
    ///
    /// | Legacy | New |
    /// |---|---|
    /// | `SUCCEEDED` | [`TerminalOutcome::Succeeded`] |
    /// | `ABORTED` | [`TerminalOutcome::Aborted`] |
    /// | `REJECTED` | [`TerminalOutcome::Canceled`] |
    /// | anything else | [`TerminalOutcome::Aborted`] |
    ///
    /// `REJECTED` means the legacy server never started the goal, which is
    /// not quite the same thing as a cancellation; the mapping is kept for
    /// compatibility with existing deployments.
    pub fn from_legacy(state: LegacyGoalState) -> Self {
        match state {
            LegacyGoalState::Succeeded => TerminalOutcome::Succeeded,
            LegacyGoalState::Aborted => TerminalOutcome::Aborted,
            LegacyGoalState::Rejected => TerminalOutcome::Canceled,
            _ => TerminalOutcome::Aborted,
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalOutcome::Succeeded => f.write_str("succeeded"),
            TerminalOutcome::Aborted => f.write_str("aborted"),
            TerminalOutcome::Canceled => f.write_str("canceled"),
        }
    }
}

/// Externally observable state of the bridge's single goal slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    /// No goal is active.
    Idle,
    /// A goal has been admitted but not yet handed to the legacy client.
    Accepted,
    /// The goal has been handed to the legacy client and awaits a terminal
    /// status.
    Executing,
}

/// Unified event wrapper for the lifecycle event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "actbridge-runtime::bridge/fibonacci"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Goal lifecycle transitions published by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    GoalReceived { goal_id: GoalId },
    GoalRejected { goal_id: GoalId, reason: String },
    /// The goal left ACCEPTED and was handed to the legacy client.
    GoalSubmitted { goal_id: GoalId },
    /// The legacy server reported the goal as active.
    LegacyActive { goal_id: GoalId },
    /// A translated feedback message was published on the goal handle.
    FeedbackRelayed { goal_id: GoalId, sequence: u64 },
    CancelForwarded { goal_id: GoalId },
    GoalTerminated {
        goal_id: GoalId,
        /// `None` when the bridge resolved the goal without a legacy status
        /// (translation failure, watchdog, shutdown, lost legacy stream).
        legacy_state: Option<LegacyGoalState>,
        outcome: TerminalOutcome,
    },
    LegacyServerUnavailable { action_name: String },
}

/// Crate-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Payload Translation Error: {0}")]
    Translation(String),

    #[error("Legacy Action Server Unavailable: {0}")]
    LegacyUnavailable(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Action Server Closed: {0}")]
    ServerClosed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_status_mapping() {
        assert_eq!(
            TerminalOutcome::from_legacy(LegacyGoalState::Succeeded),
            TerminalOutcome::Succeeded
        );
        assert_eq!(
            TerminalOutcome::from_legacy(LegacyGoalState::Aborted),
            TerminalOutcome::Aborted
        );
        assert_eq!(
            TerminalOutcome::from_legacy(LegacyGoalState::Rejected),
            TerminalOutcome::Canceled
        );
    }

    #[test]
    fn unrecognised_legacy_states_map_to_aborted() {
        for state in [
            LegacyGoalState::Pending,
            LegacyGoalState::Active,
            LegacyGoalState::Recalled,
            LegacyGoalState::Preempted,
            LegacyGoalState::Lost,
        ] {
            assert_eq!(
                TerminalOutcome::from_legacy(state),
                TerminalOutcome::Aborted,
                "{state} must fail safe to aborted"
            );
        }
    }

    #[test]
    fn legacy_state_serialises_in_legacy_spelling() {
        let json = serde_json::to_string(&LegacyGoalState::Preempted).unwrap();
        assert_eq!(json, "\"PREEMPTED\"");
        assert_eq!(LegacyGoalState::Succeeded.to_string(), "SUCCEEDED");
    }

    #[test]
    fn goal_terminated_event_roundtrip() {
        let goal_id = Uuid::new_v4();
        let event = Event::new(
            "actbridge-runtime::bridge/fibonacci",
            EventPayload::GoalTerminated {
                goal_id,
                legacy_state: Some(LegacyGoalState::Rejected),
                outcome: TerminalOutcome::Canceled,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        match back.payload {
            EventPayload::GoalTerminated {
                goal_id: id,
                legacy_state,
                outcome,
            } => {
                assert_eq!(id, goal_id);
                assert_eq!(legacy_state, Some(LegacyGoalState::Rejected));
                assert_eq!(outcome, TerminalOutcome::Canceled);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::Translation("order out of range".to_string());
        assert!(err.to_string().contains("Payload Translation Error"));
        assert!(err.to_string().contains("order out of range"));
    }
}
