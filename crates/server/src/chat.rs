use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use parley_agent::{AgentRuntime, TurnChunk, TurnStatus};
use parley_core::{Intent, SessionId, SlotName, TurnCondition};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use tracing::info;

const MAX_SESSION_ID_LEN: usize = 128;
const MAX_MESSAGE_CHARS: usize = 4_000;

#[derive(Clone)]
pub struct ChatState {
    runtime: AgentRuntime,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub correlation_id: Option<String>,
    pub intent: Option<Intent>,
    pub reply: String,
    pub status: Option<TurnStatus>,
    pub missing_slots: Vec<SlotName>,
    pub conditions: Vec<TurnCondition>,
}

#[derive(Debug, Serialize)]
pub struct ChatError {
    pub error: String,
}

type ChatRejection = (StatusCode, Json<ChatError>);

pub fn router(runtime: AgentRuntime) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .with_state(ChatState { runtime })
}

/// Runs one turn and answers with the whole reply.
async fn chat(
    State(state): State<ChatState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ChatRejection> {
    let session_id = validate(&body)?;
    let turn = state.runtime.respond(session_id, body.message).await;
    let summary = turn.summary;

    Ok(Json(ChatResponse {
        session_id: body.session_id,
        correlation_id: summary.as_ref().map(|summary| summary.correlation_id.clone()),
        intent: turn.intent,
        reply: turn.text,
        status: summary.as_ref().map(|summary| summary.status),
        missing_slots: summary.as_ref().map(|s| s.missing_slots.clone()).unwrap_or_default(),
        conditions: summary.map(|summary| summary.conditions).unwrap_or_default(),
    }))
}

/// Runs one turn and forwards each chunk as a server-sent event.
async fn chat_stream(
    State(state): State<ChatState>,
    Json(body): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ChatRejection> {
    let session_id = validate(&body)?;
    info!(
        event_name = "http.chat_stream.opened",
        correlation_id = "pending",
        session_id = %session_id,
        "streaming turn requested"
    );

    let events = state.runtime.handle_turn(session_id, body.message).map(|chunk| {
        let name = match &chunk {
            TurnChunk::Intent(_) => "intent",
            TurnChunk::Text(_) => "text",
            TurnChunk::End(_) => "end",
        };
        Event::default().event(name).json_data(&chunk)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn validate(body: &ChatRequest) -> Result<SessionId, ChatRejection> {
    let session_id = body.session_id.trim();
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(bad_request(format!(
            "session_id must be between 1 and {MAX_SESSION_ID_LEN} characters"
        )));
    }
    if body.message.trim().is_empty() {
        return Err(bad_request("message must not be empty".to_string()));
    }
    if body.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(bad_request(format!("message must be at most {MAX_MESSAGE_CHARS} characters")));
    }
    Ok(SessionId::from(session_id))
}

fn bad_request(error: String) -> ChatRejection {
    (StatusCode::BAD_REQUEST, Json(ChatError { error }))
}
