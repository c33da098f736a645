use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::schema::SlotName;
use crate::flows::states::{TransitionOutcome, TurnContext, TurnEvent, TurnNode};

pub trait FlowDefinition {
    fn name(&self) -> &'static str;
    fn initial_node(&self) -> TurnNode;
    fn transition(
        &self,
        current: TurnNode,
        event: &TurnEvent,
        context: &TurnContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// route → extract → validate → ask | tool | respond → end.
#[derive(Clone, Debug, Default)]
pub struct SlotFillingFlow;

impl FlowDefinition for SlotFillingFlow {
    fn name(&self) -> &'static str {
        "slot_filling"
    }

    fn initial_node(&self) -> TurnNode {
        TurnNode::RouteIntent
    }

    fn transition(
        &self,
        current: TurnNode,
        event: &TurnEvent,
        context: &TurnContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_slot_filling(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn initial_node(&self) -> TurnNode {
        self.flow.initial_node()
    }

    pub fn apply(
        &self,
        current: TurnNode,
        event: &TurnEvent,
        context: &TurnContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: TurnNode,
        event: &TurnEvent,
        context: &TurnContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "turn.transition_applied",
                        AuditCategory::Routing,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "turn.transition_rejected",
                        AuditCategory::Routing,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<SlotFillingFlow> {
    fn default() -> Self {
        Self::new(SlotFillingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required slots before leaving {node}: {missing:?}")]
    MissingRequiredSlots { node: TurnNode, missing: Vec<SlotName> },
    #[error("clarification requested from {node} with nothing left to clarify")]
    NoPendingClarification { node: TurnNode },
    #[error("invalid transition from {node} using event {event:?}")]
    InvalidTransition { node: TurnNode, event: TurnEvent },
}

fn transition_slot_filling(
    current: TurnNode,
    event: &TurnEvent,
    context: &TurnContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TurnEvent::{
        ClarificationNeeded, IntentResolved, PolicyDenied, QuestionAsked, ResponseGenerated,
        SlotsComplete, SlotsExtracted, ToolCompleted, ToolPolicyDenied,
    };
    use TurnNode::{
        AskQuestion, CallTool, End, ExtractSlots, GenerateResponse, RouteIntent, ValidateSlots,
    };

    let to = match (current, event) {
        (End, _) => {
            return Err(FlowTransitionError::InvalidTransition {
                node: current,
                event: event.clone(),
            });
        }
        (_, PolicyDenied) => End,
        (RouteIntent, IntentResolved { needs_slots: true }) => ExtractSlots,
        (RouteIntent, IntentResolved { needs_slots: false }) => GenerateResponse,
        (ExtractSlots, SlotsExtracted) => ValidateSlots,
        (ValidateSlots, ClarificationNeeded) => {
            if !context.needs_clarification() {
                return Err(FlowTransitionError::NoPendingClarification { node: current });
            }
            AskQuestion
        }
        (ValidateSlots, SlotsComplete { tool_bound }) => {
            if !context.missing_slots.is_empty() {
                return Err(FlowTransitionError::MissingRequiredSlots {
                    node: current,
                    missing: context.missing_slots.clone(),
                });
            }
            if *tool_bound {
                CallTool
            } else {
                GenerateResponse
            }
        }
        (ValidateSlots, ToolPolicyDenied) => GenerateResponse,
        (CallTool, ToolCompleted) => GenerateResponse,
        (AskQuestion, QuestionAsked) => End,
        (GenerateResponse, ResponseGenerated) => End,
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                node: current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current, to, event: event.clone() })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::conversation::SessionId;
    use crate::domain::schema::SlotName;
    use crate::flows::engine::{FlowDefinition, FlowEngine, FlowTransitionError, SlotFillingFlow};
    use crate::flows::states::{TurnContext, TurnEvent, TurnNode};

    fn run(engine: &FlowEngine<SlotFillingFlow>, events: &[TurnEvent], context: &TurnContext) -> Vec<TurnNode> {
        let mut node = engine.initial_node();
        let mut visited = vec![node];
        for event in events {
            node = engine.apply(node, event, context).expect("valid transition").to;
            visited.push(node);
        }
        visited
    }

    #[test]
    fn clarification_path_ends_after_question() {
        let engine = FlowEngine::default();
        let context = TurnContext { missing_slots: vec![SlotName::Location], pending_issues: Vec::new() };

        let visited = run(
            &engine,
            &[
                TurnEvent::IntentResolved { needs_slots: true },
                TurnEvent::SlotsExtracted,
                TurnEvent::ClarificationNeeded,
                TurnEvent::QuestionAsked,
            ],
            &context,
        );

        assert_eq!(
            visited,
            vec![
                TurnNode::RouteIntent,
                TurnNode::ExtractSlots,
                TurnNode::ValidateSlots,
                TurnNode::AskQuestion,
                TurnNode::End
            ]
        );
    }

    #[test]
    fn complete_tool_bound_intent_calls_tool_then_responds() {
        let engine = FlowEngine::default();
        let visited = run(
            &engine,
            &[
                TurnEvent::IntentResolved { needs_slots: true },
                TurnEvent::SlotsExtracted,
                TurnEvent::SlotsComplete { tool_bound: true },
                TurnEvent::ToolCompleted,
                TurnEvent::ResponseGenerated,
            ],
            &TurnContext::default(),
        );

        assert!(visited.contains(&TurnNode::CallTool));
        assert_eq!(visited.last(), Some(&TurnNode::End));
    }

    #[test]
    fn conversational_intent_skips_slot_nodes() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                TurnNode::RouteIntent,
                &TurnEvent::IntentResolved { needs_slots: false },
                &TurnContext::default(),
            )
            .expect("route -> respond");
        assert_eq!(outcome.to, TurnNode::GenerateResponse);
    }

    #[test]
    fn complete_without_tool_generates_response_directly() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                TurnNode::ValidateSlots,
                &TurnEvent::SlotsComplete { tool_bound: false },
                &TurnContext::default(),
            )
            .expect("validate -> respond");
        assert_eq!(outcome.to, TurnNode::GenerateResponse);
    }

    #[test]
    fn tool_policy_denial_falls_back_to_response() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(TurnNode::ValidateSlots, &TurnEvent::ToolPolicyDenied, &TurnContext::default())
            .expect("validate -> respond");
        assert_eq!(outcome.to, TurnNode::GenerateResponse);
    }

    #[test]
    fn policy_denial_ends_from_any_live_node() {
        let engine = FlowEngine::default();
        for node in [
            TurnNode::RouteIntent,
            TurnNode::ExtractSlots,
            TurnNode::ValidateSlots,
            TurnNode::AskQuestion,
            TurnNode::CallTool,
            TurnNode::GenerateResponse,
        ] {
            let outcome = engine
                .apply(node, &TurnEvent::PolicyDenied, &TurnContext::default())
                .expect("policy denial always ends the turn");
            assert_eq!(outcome.to, TurnNode::End);
        }
    }

    #[test]
    fn end_is_terminal() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(TurnNode::End, &TurnEvent::PolicyDenied, &TurnContext::default())
            .expect_err("no transitions out of end");
        assert!(matches!(error, FlowTransitionError::InvalidTransition { node: TurnNode::End, .. }));
        assert!(TurnNode::End.is_terminal());
    }

    #[test]
    fn completing_with_missing_slots_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                TurnNode::ValidateSlots,
                &TurnEvent::SlotsComplete { tool_bound: true },
                &TurnContext { missing_slots: vec![SlotName::Origin], pending_issues: Vec::new() },
            )
            .expect_err("cannot call tool with missing slots");
        assert!(matches!(error, FlowTransitionError::MissingRequiredSlots { .. }));
    }

    #[test]
    fn clarifying_with_nothing_pending_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(TurnNode::ValidateSlots, &TurnEvent::ClarificationNeeded, &TurnContext::default())
            .expect_err("nothing to ask");
        assert_eq!(error, FlowTransitionError::NoPendingClarification { node: TurnNode::ValidateSlots });
    }

    #[test]
    fn skipping_nodes_is_invalid() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(TurnNode::RouteIntent, &TurnEvent::ToolCompleted, &TurnContext::default())
            .expect_err("route cannot jump to tool completion");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                node: TurnNode::RouteIntent,
                event: TurnEvent::ToolCompleted
            }
        ));
        assert_eq!(SlotFillingFlow.name(), "slot_filling");
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(SessionId::from("s-42"), "req-42", "dispatcher");

        engine
            .apply_with_audit(
                TurnNode::RouteIntent,
                &TurnEvent::IntentResolved { needs_slots: true },
                &TurnContext::default(),
                &sink,
                &audit,
            )
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(
            TurnNode::RouteIntent,
            &TurnEvent::QuestionAsked,
            &TurnContext::default(),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "turn.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("EXTRACT_SLOTS"));
        assert_eq!(events[1].event_type, "turn.transition_rejected");
        assert_eq!(events[1].correlation_id, "req-42");
    }
}
