use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::intent::Intent;
use crate::domain::schema::SlotName;
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("slot `{slot}` is not part of the {intent} schema")]
    SlotOutsideSchema { slot: SlotName, intent: Intent },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Why a tool call produced no usable result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    NotAllowlisted,
    RateLimited,
    Timeout,
    UpstreamError,
}

impl ToolFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAllowlisted => "not_allowlisted",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::UpstreamError => "upstream_error",
        }
    }
}

/// Non-fatal conditions observed while handling one turn.
///
/// These never abort a turn; they are reported in the turn summary and logs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum TurnCondition {
    PolicyRejected { reason: String },
    ClassificationDegraded { reason: String },
    SlotInvalid { slot: SlotName, reason: String },
    SlotAmbiguous { slot: SlotName, options: Vec<String> },
    ToolUnavailable { tool: String, kind: ToolFailureKind },
    SessionCorrupt { reason: String },
}

impl TurnCondition {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PolicyRejected { .. } => "policy_rejected",
            Self::ClassificationDegraded { .. } => "classification_degraded",
            Self::SlotInvalid { .. } => "slot_invalid",
            Self::SlotAmbiguous { .. } => "slot_ambiguous",
            Self::ToolUnavailable { .. } => "tool_unavailable",
            Self::SessionCorrupt { .. } => "session_corrupt",
        }
    }

    /// Whether the user sees a consequence of this condition in the reply.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::ClassificationDegraded { .. } | Self::SessionCorrupt { .. })
    }
}
