use std::io::{self, Write};
use std::sync::Arc;

use parley_agent::{AgentRuntime, TurnChunk, TurnSummary};
use parley_core::config::{AppConfig, LoadOptions};
use parley_core::SessionId;
use parley_db::{connect_from_config, migrations, SqlSessionStore};
use tokio_stream::StreamExt;

use crate::commands::CommandResult;

/// Runs one turn against the configured store, echoing reply text as it streams.
///
/// The last output line is the JSON outcome carrying the turn summary.
pub fn run(session: &str, message: &str) -> CommandResult {
    if session.trim().is_empty() || message.trim().is_empty() {
        return CommandResult::failure(
            "chat",
            "invalid_input",
            "both --session and a non-empty message are required",
            2,
        );
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let store = SqlSessionStore::new(pool.clone()).with_ttl(config.conversation.session_ttl());
        let agent = AgentRuntime::builder(&config)
            .store(Arc::new(store))
            .build()
            .map_err(|error| ("runtime_init", error.to_string(), 3u8))?;

        let summary = echo_turn(&agent, SessionId::from(session.trim()), message).await;
        pool.close().await;
        Ok::<Option<TurnSummary>, (&'static str, String, u8)>(summary)
    });

    match result {
        Ok(Some(summary)) => match serde_json::to_value(&summary) {
            Ok(details) => CommandResult::success_with_details(
                "chat",
                format!("turn {} finished", summary.correlation_id),
                details,
            ),
            Err(error) => CommandResult::failure("chat", "serialization", error.to_string(), 6),
        },
        Ok(None) => CommandResult::failure("chat", "turn_incomplete", "turn ended without a summary", 6),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

async fn echo_turn(agent: &AgentRuntime, session_id: SessionId, message: &str) -> Option<TurnSummary> {
    let mut stream = agent.handle_turn(session_id, message);
    let mut stdout = io::stdout();
    let mut summary = None;

    while let Some(chunk) = stream.next().await {
        match chunk {
            TurnChunk::Intent(intent) => {
                let _ = writeln!(stdout, "[{}]", intent.as_str());
            }
            TurnChunk::Text(text) => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            TurnChunk::End(end) => summary = Some(end),
        }
    }
    let _ = writeln!(stdout);
    summary
}
