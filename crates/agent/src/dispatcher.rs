use std::collections::BTreeMap;
use std::sync::Arc;

use parley_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use parley_core::domain::conversation::{ConversationState, ConversationTurn};
use parley_core::domain::intent::Intent;
use parley_core::domain::schema::{SlotMap, SlotName, SlotSchema, SlotValue, WEATHER_TOOL};
use parley_core::errors::{DomainError, ToolFailureKind, TurnCondition};
use parley_core::flows::{
    FlowEngine, FlowTransitionError, SlotFillingFlow, TurnContext, TurnEvent, TurnNode,
};
use parley_core::policy::Clock;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ask_policy::{AskPolicy, SlotIssue};
use crate::extractor::{Candidates, SlotExtractor};
use crate::guardrails::{GuardrailDecision, PolicyGuard};
use crate::router::{IntentRouter, RouteDecision};
use crate::tools::{ToolError, ToolInvoker};
use crate::validators::{SlotValidator, SlotVerdict};
use crate::weather::{WeatherQuery, WeatherReport, WEATHER_UNAVAILABLE};

pub const SMALLTALK_REPLY: &str =
    "Hello! How can I help you today? I can assist with travel or weather.";
pub const OTHER_REPLY: &str = "Would you like help with travel or weather?";
pub const RESTART_REPLY: &str = "No problem, let's start over. I can help with travel or weather.";
const RETURN_BEFORE_DEPART: &str = "the return date is before the departure date";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Result of one dispatched turn. `state` is the candidate to persist.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub reply: String,
    pub route: RouteDecision,
    pub path: Vec<TurnNode>,
    pub conditions: Vec<TurnCondition>,
    pub tool_calls: u32,
}

struct Walk<'a> {
    node: TurnNode,
    path: Vec<TurnNode>,
    context: TurnContext,
    audit: &'a AuditContext,
}

/// Drives one message through route → extract → validate → ask | tool | respond.
pub struct TurnDispatcher {
    engine: FlowEngine<SlotFillingFlow>,
    router: IntentRouter,
    extractor: SlotExtractor,
    validator: SlotValidator,
    asker: AskPolicy,
    guard: Arc<PolicyGuard>,
    tools: Arc<ToolInvoker>,
    audit_sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    history_window: usize,
}

impl TurnDispatcher {
    pub fn new(
        router: IntentRouter,
        extractor: SlotExtractor,
        validator: SlotValidator,
        guard: Arc<PolicyGuard>,
        tools: Arc<ToolInvoker>,
        audit_sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine: FlowEngine::default(),
            router,
            extractor,
            validator,
            asker: AskPolicy,
            guard,
            tools,
            audit_sink,
            clock,
            history_window: 0,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Path of a turn denied before routing.
    pub fn refuse(&self, audit: &AuditContext) -> Result<Vec<TurnNode>, FlowTransitionError> {
        let mut walk = self.walk(audit);
        self.advance(&mut walk, TurnEvent::PolicyDenied)?;
        Ok(walk.path)
    }

    pub async fn dispatch(
        &self,
        mut state: ConversationState,
        text: &str,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, DispatchError> {
        let now = self.clock.now();
        let mut walk = self.walk(audit);
        let mut conditions = Vec::new();
        let mut tool_calls = 0;

        let route = self.router.route(&state, text).await;
        if route.restart {
            info!(
                event_name = "turn.restarted",
                correlation_id = %audit.correlation_id,
                session_id = %audit.session_id,
                previous_intent = state.intent.as_str(),
                "user abandoned the current task"
            );
            state.restart();
        }
        if let Some(reason) = &route.degraded {
            warn!(
                event_name = "turn.classification_degraded",
                correlation_id = %audit.correlation_id,
                session_id = %audit.session_id,
                reason = %reason,
                "intent classifier unusable, routed by keywords"
            );
            conditions.push(TurnCondition::ClassificationDegraded { reason: reason.clone() });
        }

        let last_question = if route.restart { None } else { state.last_question().cloned() };
        state.switch_intent(route.intent);
        state.begin_turn(text, now);

        info!(
            event_name = "turn.intent_routed",
            correlation_id = %audit.correlation_id,
            session_id = %audit.session_id,
            intent = route.intent.as_str(),
            source = route.source.as_str(),
            confidence = route.confidence,
            "intent routed"
        );
        self.audit_sink.emit(
            AuditEvent::new(audit, "turn.intent_routed", AuditCategory::Routing, AuditOutcome::Success)
                .with_metadata("intent", route.intent.as_str())
                .with_metadata("source", route.source.as_str()),
        );

        let schema = state.schema().ok_or_else(|| {
            DomainError::InvariantViolation("turn routed to UNSET intent".to_string())
        })?;
        self.advance(&mut walk, TurnEvent::IntentResolved { needs_slots: schema.collects_slots() })?;

        let reply = if walk.node == TurnNode::ExtractSlots {
            let candidates = self.extractor.extract(state.intent, text, last_question.as_ref());
            self.advance(&mut walk, TurnEvent::SlotsExtracted)?;

            let issues = self.validate(&mut state, schema, candidates, &mut conditions, audit)?;
            walk.context = TurnContext {
                missing_slots: state.missing_slots(),
                pending_issues: issues.keys().copied().collect(),
            };

            if walk.context.needs_clarification() {
                self.advance(&mut walk, TurnEvent::ClarificationNeeded)?;
                let pending = walk
                    .context
                    .missing_slots
                    .iter()
                    .chain(walk.context.pending_issues.iter())
                    .copied()
                    .collect::<Vec<_>>();
                let slot = self
                    .asker
                    .next_slot(schema, pending)
                    .ok_or(FlowTransitionError::NoPendingClarification { node: walk.node })?;
                let clarification = self.asker.compose(
                    state.intent,
                    slot,
                    issues.get(&slot),
                    state.next_ask_streak(slot),
                );
                self.advance(&mut walk, TurnEvent::QuestionAsked)?;

                info!(
                    event_name = "turn.question_asked",
                    correlation_id = %audit.correlation_id,
                    session_id = %audit.session_id,
                    slot = slot.as_str(),
                    options = clarification.options.len(),
                    "asked for one slot"
                );
                ConversationTurn::assistant(clarification.text, now)
                    .asking(slot, clarification.options)
            } else {
                let text = match schema.tool {
                    Some(tool) => match self.tools.authorize(tool, state.session_id.as_str()) {
                        Err(error) => {
                            self.advance(&mut walk, TurnEvent::ToolPolicyDenied)?;
                            self.record_tool_failure(&error, &mut conditions, audit);
                            error.user_message()
                        }
                        Ok(()) => {
                            self.advance(&mut walk, TurnEvent::SlotsComplete { tool_bound: true })?;
                            tool_calls += 1;
                            let text = self.run_tool(tool, &state, &mut conditions, audit).await;
                            self.advance(&mut walk, TurnEvent::ToolCompleted)?;
                            text
                        }
                    },
                    None => {
                        self.advance(&mut walk, TurnEvent::SlotsComplete { tool_bound: false })?;
                        travel_summary(&state.slots)
                    }
                };
                self.advance(&mut walk, TurnEvent::ResponseGenerated)?;
                ConversationTurn::assistant(text, now)
            }
        } else {
            let text = conversational_reply(state.intent, route.restart);
            self.advance(&mut walk, TurnEvent::ResponseGenerated)?;
            ConversationTurn::assistant(text, now)
        };

        let reply_text = reply.text.clone();
        state.record_reply(reply);
        state.trim_history(self.history_window);
        state.check_invariants()?;

        Ok(TurnOutcome { state, reply: reply_text, route, path: walk.path, conditions, tool_calls })
    }

    fn walk<'a>(&self, audit: &'a AuditContext) -> Walk<'a> {
        let node = self.engine.initial_node();
        Walk { node, path: vec![node], context: TurnContext::default(), audit }
    }

    fn advance(&self, walk: &mut Walk<'_>, event: TurnEvent) -> Result<(), FlowTransitionError> {
        let outcome = self.engine.apply_with_audit(
            walk.node,
            &event,
            &walk.context,
            self.audit_sink.as_ref(),
            walk.audit,
        )?;
        walk.node = outcome.to;
        walk.path.push(outcome.to);
        Ok(())
    }

    /// Validates candidates in priority order so later slots can see earlier ones.
    fn validate(
        &self,
        state: &mut ConversationState,
        schema: &SlotSchema,
        candidates: Candidates,
        conditions: &mut Vec<TurnCondition>,
        audit: &AuditContext,
    ) -> Result<BTreeMap<SlotName, SlotIssue>, DomainError> {
        let mut ordered: Vec<(SlotName, String)> = candidates.into_iter().collect();
        ordered.sort_by_key(|(slot, _)| schema.rank(*slot));

        let mut issues = BTreeMap::new();
        for (slot, raw) in ordered {
            match self.validator.validate(state.intent, slot, &raw, &state.slots) {
                SlotVerdict::Accepted(value) => {
                    debug!(
                        event_name = "turn.slot_accepted",
                        correlation_id = %audit.correlation_id,
                        session_id = %audit.session_id,
                        slot = slot.as_str(),
                        value = %value,
                        "slot accepted"
                    );
                    state.accept_slot(slot, value)?;
                }
                SlotVerdict::Rejected { reason } => {
                    conditions.push(TurnCondition::SlotInvalid { slot, reason: reason.clone() });
                    issues.insert(slot, SlotIssue::Rejected { reason });
                }
                SlotVerdict::Ambiguous { options } => {
                    conditions.push(TurnCondition::SlotAmbiguous { slot, options: options.clone() });
                    issues.insert(slot, SlotIssue::Ambiguous { options });
                }
            }
        }

        if return_precedes_departure(&state.slots) {
            state.slots.remove(&SlotName::ReturnDate);
            let reason = RETURN_BEFORE_DEPART.to_string();
            conditions
                .push(TurnCondition::SlotInvalid { slot: SlotName::ReturnDate, reason: reason.clone() });
            issues.insert(SlotName::ReturnDate, SlotIssue::Rejected { reason });
        }

        if !issues.is_empty() {
            info!(
                event_name = "turn.slots_rejected",
                correlation_id = %audit.correlation_id,
                session_id = %audit.session_id,
                slots = ?issues.keys().map(SlotName::as_str).collect::<Vec<_>>(),
                "slot candidates need clarification"
            );
        }
        Ok(issues)
    }

    async fn run_tool(
        &self,
        tool: &str,
        state: &ConversationState,
        conditions: &mut Vec<TurnCondition>,
        audit: &AuditContext,
    ) -> String {
        if tool != WEATHER_TOOL {
            let error = ToolError::UpstreamError {
                tool: tool.to_string(),
                message: "no renderer for tool output".to_string(),
            };
            self.record_tool_failure(&error, conditions, audit);
            return error.user_message();
        }

        let Some(mut query) = WeatherQuery::from_slots(&state.slots) else {
            let error = ToolError::UpstreamError {
                tool: tool.to_string(),
                message: "location slot is not a place".to_string(),
            };
            self.record_tool_failure(&error, conditions, audit);
            return WEATHER_UNAVAILABLE.to_string();
        };
        query.date = query.date.or_else(|| Some(self.clock.today()));
        let input = serde_json::to_value(&query).unwrap_or(Value::Null);

        let report = match self.tools.call(tool, input).await {
            Ok(output) => WeatherReport::from_value(output).map_err(|error| ToolError::UpstreamError {
                tool: tool.to_string(),
                message: format!("unreadable weather report: {error}"),
            }),
            Err(error) => Err(error),
        };

        let report = match report {
            Ok(report) => report,
            Err(error) => {
                self.record_tool_failure(&error, conditions, audit);
                return WEATHER_UNAVAILABLE.to_string();
            }
        };

        info!(
            event_name = "turn.tool_invoked",
            correlation_id = %audit.correlation_id,
            session_id = %audit.session_id,
            tool = tool,
            "tool call succeeded"
        );
        self.audit_sink.emit(
            AuditEvent::new(audit, "turn.tool_invoked", AuditCategory::Tool, AuditOutcome::Success)
                .with_metadata("tool", tool),
        );

        let rendered = report.render();
        match self.guard.evaluate_outbound(&rendered) {
            GuardrailDecision::Allow => rendered,
            GuardrailDecision::Deny { reason_code, user_message, .. }
            | GuardrailDecision::Degrade { reason_code, user_message, .. } => {
                warn!(
                    event_name = "turn.policy_rejected",
                    correlation_id = %audit.correlation_id,
                    session_id = %audit.session_id,
                    reason = reason_code,
                    "tool output withheld by moderation"
                );
                conditions.push(TurnCondition::PolicyRejected { reason: reason_code.to_string() });
                user_message
            }
        }
    }

    fn record_tool_failure(
        &self,
        error: &ToolError,
        conditions: &mut Vec<TurnCondition>,
        audit: &AuditContext,
    ) {
        let kind = error.kind();
        warn!(
            event_name = "turn.tool_failed",
            correlation_id = %audit.correlation_id,
            session_id = %audit.session_id,
            tool = error.tool(),
            kind = kind.as_str(),
            error = %error,
            "tool produced no usable result"
        );
        let outcome = if kind == ToolFailureKind::NotAllowlisted || kind == ToolFailureKind::RateLimited
        {
            AuditOutcome::Rejected
        } else {
            AuditOutcome::Failed
        };
        self.audit_sink.emit(
            AuditEvent::new(audit, "turn.tool_failed", AuditCategory::Tool, outcome)
                .with_metadata("tool", error.tool())
                .with_metadata("kind", kind.as_str()),
        );
        conditions.push(TurnCondition::ToolUnavailable { tool: error.tool().to_string(), kind });
    }
}

fn return_precedes_departure(slots: &SlotMap) -> bool {
    let depart = slots.get(&SlotName::DepartDate).and_then(SlotValue::as_date);
    let back = slots.get(&SlotName::ReturnDate).and_then(SlotValue::as_date);
    matches!((depart, back), (Some(depart), Some(back)) if back < depart)
}

pub fn travel_summary(slots: &SlotMap) -> String {
    let value = |slot: SlotName| slots.get(&slot).map(ToString::to_string).unwrap_or_default();

    let mut summary = format!(
        "Got it. {} → {} on {}",
        value(SlotName::Origin),
        value(SlotName::Destination),
        value(SlotName::DepartDate)
    );
    if let Some(back) = slots.get(&SlotName::ReturnDate) {
        summary.push_str(&format!(", returning {back}"));
    }
    summary.push_str(&format!(" for {} adult(s)", value(SlotName::PaxAdults)));
    if let Some(cabin) = slots.get(&SlotName::Cabin) {
        summary.push_str(&format!(" in {cabin}"));
    }
    summary.push('.');
    summary
}

fn conversational_reply(intent: Intent, restarted: bool) -> String {
    if restarted {
        return RESTART_REPLY.to_string();
    }
    match intent {
        Intent::Smalltalk => SMALLTALK_REPLY.to_string(),
        _ => OTHER_REPLY.to_string(),
    }
}
