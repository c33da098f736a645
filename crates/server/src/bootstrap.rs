use std::sync::Arc;

use parley_agent::{AgentRuntime, LlmIntentClassifier, RuntimeBuildError};
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use parley_db::{connect_with_settings, migrations, DbPool, SessionStore, SqlSessionStore};
use thiserror::Error;
use tracing::{info, warn};

use crate::llm_http::OpenAiCompatibleClient;
use crate::weather_tool::HttpWeatherTool;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<dyn SessionStore>,
    pub runtime: AgentRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("agent runtime setup failed: {0}")]
    Runtime(#[from] RuntimeBuildError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store: Arc<dyn SessionStore> = Arc::new(
        SqlSessionStore::new(db_pool.clone()).with_ttl(config.conversation.session_ttl()),
    );
    let mut builder = AgentRuntime::builder(&config).store(store.clone());

    match OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::HttpClient)? {
        Some(client) => {
            info!(
                event_name = "system.bootstrap.classifier_enabled",
                correlation_id = "bootstrap",
                provider = config.llm.provider.as_str(),
                model = %config.llm.model,
                "llm intent classifier enabled"
            );
            builder = builder.classifier(Arc::new(LlmIntentClassifier::new(Arc::new(client))));
        }
        None => warn!(
            event_name = "system.bootstrap.classifier_disabled",
            correlation_id = "bootstrap",
            "no llm configured, intents are routed by keywords"
        ),
    }

    match config.tools.weather_base_url.as_deref() {
        Some(base_url) => {
            let tool = HttpWeatherTool::new(base_url, config.conversation.tool_timeout())
                .map_err(BootstrapError::HttpClient)?;
            builder = builder.tool(tool);
        }
        None => warn!(
            event_name = "system.bootstrap.weather_disabled",
            correlation_id = "bootstrap",
            "tools.weather_base_url is not set, weather lookups will be unavailable"
        ),
    }

    let runtime = builder.build()?;
    Ok(Application { config, db_pool, store, runtime })
}
