use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use parley_core::config::AppConfig;
use parley_core::domain::conversation::{ConversationState, SessionId};
use parley_core::domain::intent::Intent;
use parley_core::errors::TurnCondition;
use parley_core::flows::TurnNode;
use parley_core::policy::{Clock, FixedWindowRateLimiter, SystemClock};
use parley_db::{InMemorySessionStore, RepositoryError, SessionStore};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatcher::TurnDispatcher;
use crate::extractor::SlotExtractor;
use crate::guardrails::{GuardrailDecision, PolicyGuard};
use crate::llm::IntentClassifier;
use crate::router::IntentRouter;
use crate::session_lock::SessionLocks;
use crate::stream::{ChunkSender, CollectedTurn, TurnStatus, TurnStream, TurnSummary};
use crate::tools::{Tool, ToolInvoker, ToolRegistry};
use crate::validators::{LocationDirectory, SlotValidator};

pub const GENERIC_FAILURE: &str = "Sorry, something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum RuntimeBuildError {
    #[error("failed to compile built-in patterns: {0}")]
    Pattern(#[from] regex::Error),
}

/// Entry point for conversational turns.
///
/// Each turn runs on its own task and streams its reply through the returned
/// [`TurnStream`]. Turns of one session are serialized; different sessions run
/// concurrently.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    dispatcher: TurnDispatcher,
    guard: Arc<PolicyGuard>,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    audit_sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    stream_buffer: usize,
    stream_send_timeout: Duration,
}

pub struct AgentRuntimeBuilder {
    config: AppConfig,
    store: Option<Arc<dyn SessionStore>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    tools: ToolRegistry,
    clock: Arc<dyn Clock>,
    audit_sink: Arc<dyn AuditSink>,
    directory: LocationDirectory,
}

impl AgentRuntimeBuilder {
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.tools.register(tool);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    pub fn directory(mut self, directory: LocationDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn build(self) -> Result<AgentRuntime, RuntimeBuildError> {
        let policy = &self.config.policy;
        let conversation = &self.config.conversation;

        let limiter = Arc::new(FixedWindowRateLimiter::new(policy.rate_limits(), self.clock.clone()));
        let guard =
            Arc::new(PolicyGuard::with_default_rules(policy.moderation_enabled, limiter.clone())?);
        let tools = Arc::new(ToolInvoker::new(
            self.tools,
            policy.tool_allowlist.iter().cloned(),
            limiter,
            conversation.tool_timeout(),
        ));
        let router = IntentRouter::new(
            self.classifier,
            conversation.classifier_timeout(),
            conversation.classifier_min_confidence,
        );
        let store = self.store.unwrap_or_else(|| {
            Arc::new(InMemorySessionStore::new(conversation.session_ttl(), self.clock.clone()))
        });

        let dispatcher = TurnDispatcher::new(
            router,
            SlotExtractor::new()?,
            SlotValidator::new(self.clock.clone(), self.directory),
            guard.clone(),
            tools,
            self.audit_sink.clone(),
            self.clock.clone(),
        )
        .with_history_window(conversation.history_window);

        Ok(AgentRuntime {
            inner: Arc::new(RuntimeInner {
                dispatcher,
                guard,
                store,
                locks: SessionLocks::default(),
                audit_sink: self.audit_sink,
                clock: self.clock,
                stream_buffer: conversation.stream_buffer,
                stream_send_timeout: conversation.stream_send_timeout(),
            }),
        })
    }
}

impl AgentRuntime {
    pub fn builder(config: &AppConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            config: config.clone(),
            store: None,
            classifier: None,
            tools: ToolRegistry::default(),
            clock: Arc::new(SystemClock),
            audit_sink: Arc::new(TracingAuditSink),
            directory: LocationDirectory::builtin(),
        }
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.inner.store.clone()
    }

    /// Starts a turn and returns its reply stream.
    pub fn handle_turn(&self, session_id: SessionId, text: impl Into<String>) -> TurnStream {
        let (sender, stream) =
            TurnStream::channel(self.inner.stream_buffer, self.inner.stream_send_timeout);
        let inner = self.inner.clone();
        let text = text.into();
        let correlation_id = Uuid::new_v4().to_string();
        tokio::spawn(async move {
            inner.run_turn(session_id, text, correlation_id, sender).await;
        });
        stream
    }

    /// Runs a turn to completion and returns the whole reply.
    pub async fn respond(&self, session_id: SessionId, text: impl Into<String>) -> CollectedTurn {
        self.handle_turn(session_id, text).collect_reply().await
    }

    /// Drops expired sessions and idle rate-limit windows.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let windows = self.inner.guard.limiter().purge_expired();
        let sessions = self.inner.store.purge_expired().await?;
        info!(
            event_name = "system.maintenance.purged",
            correlation_id = "maintenance",
            sessions,
            rate_windows = windows,
            "expired sessions purged"
        );
        Ok(sessions)
    }
}

impl RuntimeInner {
    async fn run_turn(
        &self,
        session_id: SessionId,
        text: String,
        correlation_id: String,
        sender: ChunkSender,
    ) {
        let started = Instant::now();
        let audit = AuditContext::new(session_id.clone(), correlation_id.clone(), "user");
        info!(
            event_name = "turn.started",
            correlation_id = %correlation_id,
            session_id = %session_id,
            chars = text.chars().count(),
            "turn started"
        );

        let mut summary = TurnSummary {
            session_id: session_id.clone(),
            correlation_id: correlation_id.clone(),
            status: TurnStatus::Completed,
            intent: Intent::Unset,
            path: Vec::new(),
            conditions: Vec::new(),
            missing_slots: Vec::new(),
            tool_calls: 0,
            persisted: false,
        };

        let decision = self.guard.evaluate_inbound(&session_id, &text);
        if let GuardrailDecision::Deny { reason_code, user_message, .. }
        | GuardrailDecision::Degrade { reason_code, user_message, .. } = decision
        {
            warn!(
                event_name = "turn.policy_rejected",
                correlation_id = %correlation_id,
                session_id = %session_id,
                reason = reason_code,
                "inbound message refused"
            );
            self.audit_sink.emit(
                AuditEvent::new(&audit, "turn.policy_rejected", AuditCategory::Policy, AuditOutcome::Rejected)
                    .with_metadata("reason", reason_code),
            );
            summary.status = TurnStatus::Refused;
            summary.path = self
                .dispatcher
                .refuse(&audit)
                .unwrap_or_else(|_| vec![TurnNode::RouteIntent, TurnNode::End]);
            summary.conditions.push(TurnCondition::PolicyRejected { reason: reason_code.to_string() });
            self.deliver(&sender, None, &user_message, summary, started).await;
            return;
        }

        // The lock covers load, dispatch and save; delivery runs after it is released.
        let (intent, reply, summary) = {
            let _session = self.locks.acquire(&session_id).await;
            self.locked_turn(&session_id, &text, &audit, summary).await
        };
        self.deliver(&sender, intent, &reply, summary, started).await;
    }

    /// Load, dispatch and save under the session lock.
    async fn locked_turn(
        &self,
        session_id: &SessionId,
        text: &str,
        audit: &AuditContext,
        mut summary: TurnSummary,
    ) -> (Option<Intent>, String, TurnSummary) {
        let correlation_id = &audit.correlation_id;

        let state = match self.load_state(session_id, audit, &mut summary.conditions).await {
            Ok(state) => state,
            Err(error) => {
                error!(
                    event_name = "turn.failed",
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    stage = "load",
                    error = %error,
                    "session could not be loaded"
                );
                summary.status = TurnStatus::Failed;
                return (None, GENERIC_FAILURE.to_string(), summary);
            }
        };

        let outcome = match self.dispatcher.dispatch(state, text, audit).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(
                    event_name = "turn.failed",
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    stage = "dispatch",
                    error = %error,
                    "turn could not be dispatched"
                );
                summary.status = TurnStatus::Failed;
                return (None, GENERIC_FAILURE.to_string(), summary);
            }
        };

        summary.intent = outcome.state.intent;
        summary.path = outcome.path.clone();
        summary.conditions.extend(outcome.conditions.iter().cloned());
        summary.missing_slots = outcome.state.missing_slots();
        summary.tool_calls = outcome.tool_calls;

        if let Err(error) = self.store.save(&outcome.state).await {
            error!(
                event_name = "turn.failed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                stage = "save",
                error = %error,
                "session could not be saved"
            );
            self.audit_sink.emit(
                AuditEvent::new(audit, "turn.persist_failed", AuditCategory::Persistence, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            summary.status = TurnStatus::Failed;
            return (None, GENERIC_FAILURE.to_string(), summary);
        }

        summary.persisted = true;
        self.audit_sink.emit(
            AuditEvent::new(audit, "turn.persisted", AuditCategory::Persistence, AuditOutcome::Success)
                .with_metadata("intent", outcome.state.intent.as_str()),
        );
        info!(
            event_name = "turn.persisted",
            correlation_id = %correlation_id,
            session_id = %session_id,
            turn_count = outcome.state.turn_count,
            "session state saved"
        );

        (Some(outcome.state.intent), outcome.reply, summary)
    }

    /// Loads the session, starting fresh when it is missing, expired or unreadable.
    async fn load_state(
        &self,
        session_id: &SessionId,
        audit: &AuditContext,
        conditions: &mut Vec<TurnCondition>,
    ) -> Result<ConversationState, RepositoryError> {
        let fresh = || ConversationState::new(session_id.clone(), self.clock.now());
        let corrupt_reason = match self.store.load(session_id).await {
            Ok(Some(state)) => match state.check_invariants() {
                Ok(()) => return Ok(state),
                Err(error) => error.to_string(),
            },
            Ok(None) => return Ok(fresh()),
            Err(error) if error.is_corruption() => error.to_string(),
            Err(error) => return Err(error),
        };

        warn!(
            event_name = "turn.session_corrupt",
            correlation_id = %audit.correlation_id,
            session_id = %session_id,
            reason = %corrupt_reason,
            "stored session unreadable, starting fresh"
        );
        self.audit_sink.emit(
            AuditEvent::new(audit, "turn.session_corrupt", AuditCategory::Persistence, AuditOutcome::Failed)
                .with_metadata("reason", corrupt_reason.clone()),
        );
        conditions.push(TurnCondition::SessionCorrupt { reason: corrupt_reason });
        Ok(fresh())
    }

    async fn deliver(
        &self,
        sender: &ChunkSender,
        intent: Option<Intent>,
        text: &str,
        summary: TurnSummary,
        started: Instant,
    ) {
        let correlation_id = summary.correlation_id.clone();
        let session_id = summary.session_id.clone();
        info!(
            event_name = "turn.completed",
            correlation_id = %correlation_id,
            session_id = %session_id,
            status = ?summary.status,
            intent = summary.intent.as_str(),
            path = %summary.path.iter().map(TurnNode::as_str).collect::<Vec<_>>().join(">"),
            conditions = ?summary.conditions.iter().map(TurnCondition::code).collect::<Vec<_>>(),
            tool_calls = summary.tool_calls,
            persisted = summary.persisted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );

        if let Err(closed) = sender.send_reply(intent, text, summary).await {
            info!(
                event_name = "turn.stream_disconnected",
                correlation_id = %correlation_id,
                session_id = %session_id,
                reason = %closed,
                "client went away before the reply finished"
            );
        }
    }
}
