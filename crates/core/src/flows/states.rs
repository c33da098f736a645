use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::schema::SlotName;

/// Nodes of one conversational turn. Every turn starts at `RouteIntent` and stops at `End`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnNode {
    RouteIntent,
    ExtractSlots,
    ValidateSlots,
    AskQuestion,
    CallTool,
    GenerateResponse,
    End,
}

impl TurnNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteIntent => "ROUTE_INTENT",
            Self::ExtractSlots => "EXTRACT_SLOTS",
            Self::ValidateSlots => "VALIDATE_SLOTS",
            Self::AskQuestion => "ASK_QUESTION",
            Self::CallTool => "CALL_TOOL",
            Self::GenerateResponse => "GENERATE_RESPONSE",
            Self::End => "END",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for TurnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    PolicyDenied,
    IntentResolved { needs_slots: bool },
    SlotsExtracted,
    ClarificationNeeded,
    SlotsComplete { tool_bound: bool },
    ToolPolicyDenied,
    ToolCompleted,
    QuestionAsked,
    ResponseGenerated,
}

/// Facts about the session that guard transitions out of `ValidateSlots`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TurnContext {
    pub missing_slots: Vec<SlotName>,
    /// Slots whose candidate was rejected or ambiguous this turn.
    pub pending_issues: Vec<SlotName>,
}

impl TurnContext {
    pub fn needs_clarification(&self) -> bool {
        !self.missing_slots.is_empty() || !self.pending_issues.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnNode,
    pub to: TurnNode,
    pub event: TurnEvent,
}
