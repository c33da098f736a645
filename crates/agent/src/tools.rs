use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parley_core::errors::ToolFailureKind;
use parley_core::policy::{FixedWindowRateLimiter, RateDecision, RateKey};
use serde_json::Value;
use thiserror::Error;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, input: Value) -> Result<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool `{tool}` is not allowlisted")]
    NotAllowlisted { tool: String },
    #[error("rate limit exceeded for {tool}, retry in {}s", .retry_after.as_secs())]
    RateLimited { tool: String, retry_after: Duration },
    #[error("tool `{tool}` timed out after {}ms", .after.as_millis())]
    Timeout { tool: String, after: Duration },
    #[error("tool `{tool}` failed: {message}")]
    UpstreamError { tool: String, message: String },
}

impl ToolError {
    pub fn kind(&self) -> ToolFailureKind {
        match self {
            Self::NotAllowlisted { .. } => ToolFailureKind::NotAllowlisted,
            Self::RateLimited { .. } => ToolFailureKind::RateLimited,
            Self::Timeout { .. } => ToolFailureKind::Timeout,
            Self::UpstreamError { .. } => ToolFailureKind::UpstreamError,
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            Self::NotAllowlisted { tool }
            | Self::RateLimited { tool, .. }
            | Self::Timeout { tool, .. }
            | Self::UpstreamError { tool, .. } => tool,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { tool, retry_after } => format!(
                "Rate limit exceeded for {tool}. Try again in {}s.",
                retry_after.as_secs().max(1)
            ),
            Self::NotAllowlisted { .. } => {
                "Sorry, I'm not able to look that up right now.".to_string()
            }
            Self::Timeout { .. } | Self::UpstreamError { .. } => {
                "Sorry, that service isn't responding right now. Please try again later.".to_string()
            }
        }
    }
}

/// The only path by which tools run: allowlist, then rate limit, then a
/// bounded call.
pub struct ToolInvoker {
    registry: ToolRegistry,
    allowlist: BTreeSet<String>,
    limiter: Arc<FixedWindowRateLimiter>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(
        registry: ToolRegistry,
        allowlist: impl IntoIterator<Item = String>,
        limiter: Arc<FixedWindowRateLimiter>,
        timeout: Duration,
    ) -> Self {
        Self { registry, allowlist: allowlist.into_iter().collect(), limiter, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn is_allowlisted(&self, tool: &str) -> bool {
        self.allowlist.contains(tool)
    }

    /// Checks the allowlist and counts one call against `principal`'s tool quota.
    pub fn authorize(&self, tool: &str, principal: &str) -> Result<(), ToolError> {
        if !self.is_allowlisted(tool) {
            return Err(ToolError::NotAllowlisted { tool: tool.to_string() });
        }
        match self.limiter.check(&RateKey::tool(tool, principal)) {
            RateDecision::Allow { .. } => Ok(()),
            RateDecision::Deny { retry_after } => {
                Err(ToolError::RateLimited { tool: tool.to_string(), retry_after })
            }
        }
    }

    /// Runs an already authorized tool under the configured timeout.
    pub async fn call(&self, tool: &str, input: Value) -> Result<Value, ToolError> {
        let Some(handler) = self.registry.get(tool) else {
            return Err(ToolError::UpstreamError {
                tool: tool.to_string(),
                message: "tool is not registered".to_string(),
            });
        };

        match tokio::time::timeout(self.timeout, handler.execute(input)).await {
            Err(_) => Err(ToolError::Timeout { tool: tool.to_string(), after: self.timeout }),
            Ok(Err(error)) => {
                Err(ToolError::UpstreamError { tool: tool.to_string(), message: error.to_string() })
            }
            Ok(Ok(output)) => Ok(output),
        }
    }
}
