pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod policy;

pub use chrono;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::conversation::{ConversationState, ConversationTurn, Role, SessionId};
pub use domain::intent::Intent;
pub use domain::schema::{CabinClass, SlotMap, SlotName, SlotSchema, SlotValue, WEATHER_TOOL};
pub use errors::{DomainError, ToolFailureKind, TurnCondition};
pub use flows::{FlowEngine, FlowTransitionError, SlotFillingFlow, TurnContext, TurnEvent, TurnNode};
pub use policy::{
    ActionClass, Clock, ContentModerator, FixedWindowRateLimiter, ManualClock, ModerationCategory,
    ModerationVerdict, RateDecision, RateKey, RateLimit, RateLimits, SystemClock,
};
