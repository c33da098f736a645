use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use parley_core::domain::conversation::SessionId;
use parley_core::domain::intent::Intent;
use parley_core::domain::schema::SlotName;
use parley_core::errors::TurnCondition;
use parley_core::flows::TurnNode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// Denied by moderation or rate limiting. Session state untouched.
    Refused,
    /// Something failed before the state could be saved. Session state untouched.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub session_id: SessionId,
    pub correlation_id: String,
    pub status: TurnStatus,
    pub intent: Intent,
    pub path: Vec<TurnNode>,
    pub conditions: Vec<TurnCondition>,
    pub missing_slots: Vec<SlotName>,
    pub tool_calls: u32,
    pub persisted: bool,
}

/// One element of a reply stream: optional intent marker, text, then the summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TurnChunk {
    Intent(Intent),
    Text(String),
    End(TurnSummary),
}

/// Receiving half of a turn. Dropping it tells the producer the client went away.
pub struct TurnStream {
    inner: ReceiverStream<TurnChunk>,
}

impl TurnStream {
    pub fn channel(buffer: usize, send_timeout: Duration) -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (ChunkSender { tx, send_timeout }, Self { inner: ReceiverStream::new(rx) })
    }

    /// Drains the stream into one reply.
    pub async fn collect_reply(mut self) -> CollectedTurn {
        use tokio_stream::StreamExt;

        let mut collected = CollectedTurn::default();
        while let Some(chunk) = self.next().await {
            match chunk {
                TurnChunk::Intent(intent) => collected.intent = Some(intent),
                TurnChunk::Text(text) => collected.text.push_str(&text),
                TurnChunk::End(summary) => collected.summary = Some(summary),
            }
        }
        collected
    }
}

impl Stream for TurnStream {
    type Item = TurnChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectedTurn {
    pub intent: Option<Intent>,
    pub text: String,
    pub summary: Option<TurnSummary>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamClosed {
    #[error("client disconnected")]
    Disconnected,
    #[error("client stopped reading for {0:?}")]
    Stalled(Duration),
}

#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<TurnChunk>,
    send_timeout: Duration,
}

impl ChunkSender {
    pub async fn send(&self, chunk: TurnChunk) -> Result<(), StreamClosed> {
        self.tx.send_timeout(chunk, self.send_timeout).await.map_err(|error| match error {
            SendTimeoutError::Closed(_) => StreamClosed::Disconnected,
            SendTimeoutError::Timeout(_) => StreamClosed::Stalled(self.send_timeout),
        })
    }

    /// Sends a whole reply. `send_timeout` bounds the entire delivery, not each chunk.
    pub async fn send_reply(
        &self,
        intent: Option<Intent>,
        text: &str,
        summary: TurnSummary,
    ) -> Result<(), StreamClosed> {
        let reply = async {
            if let Some(intent) = intent {
                self.send(TurnChunk::Intent(intent)).await?;
            }
            self.send_text(text).await?;
            self.send(TurnChunk::End(summary)).await
        };
        tokio::time::timeout(self.send_timeout, reply)
            .await
            .map_err(|_| StreamClosed::Stalled(self.send_timeout))?
    }

    /// Sends `text` word by word; concatenating the pieces gives `text` back.
    pub async fn send_text(&self, text: &str) -> Result<(), StreamClosed> {
        for piece in split_words(text) {
            self.send(TurnChunk::Text(piece)).await?;
        }
        Ok(())
    }
}

/// Splits into word-sized pieces, each keeping its trailing whitespace.
pub fn split_words(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_gap = false;

    for character in text.chars() {
        if character.is_whitespace() {
            in_gap = true;
        } else {
            if in_gap && !current.trim().is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            in_gap = false;
        }
        current.push(character);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
