//! Fixed-window counters keyed by subject and action class.
//!
//! Each `(subject, action)` pair owns one window. A check that lands at or past
//! the window end starts a fresh window at "now" before counting. Denied checks
//! never increment, so `count <= limit` holds for every window.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    ChatMessage,
    ToolCall,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat",
            Self::ToolCall => "tool",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub subject: String,
    pub action: ActionClass,
}

impl RateKey {
    pub fn chat(session_id: impl Into<String>) -> Self {
        Self { subject: session_id.into(), action: ActionClass::ChatMessage }
    }

    /// Tool quotas are tracked per tool and per caller.
    pub fn tool(tool_name: &str, principal: &str) -> Self {
        Self { subject: format!("{tool_name}:{principal}"), action: ActionClass::ToolCall }
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rl:{}:{}", self.action.as_str(), self.subject)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Zero disables the limit.
    pub max_events: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(max_events: u32) -> Self {
        Self { max_events, window: Duration::from_secs(60) }
    }

    pub fn is_disabled(&self) -> bool {
        self.max_events == 0 || self.window.is_zero()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimits {
    pub chat: RateLimit,
    pub tool: RateLimit,
}

impl RateLimits {
    pub fn per_minute(chat: u32, tool: u32) -> Self {
        Self { chat: RateLimit::per_minute(chat), tool: RateLimit::per_minute(tool) }
    }

    pub fn for_action(&self, action: ActionClass) -> RateLimit {
        match action {
            ActionClass::ChatMessage => self.chat,
            ActionClass::ToolCall => self.tool,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allow { remaining: u32 },
    Deny { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RateWindow {
    count: u32,
    window_start: DateTime<Utc>,
}

impl RateWindow {
    fn end(&self, limit: &RateLimit) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(limit.window)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        self.window_start.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

pub struct FixedWindowRateLimiter {
    limits: RateLimits,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<RateKey, RateWindow>>,
}

impl FixedWindowRateLimiter {
    pub fn new(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self { limits, clock, windows: Mutex::new(HashMap::new()) }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Counts one event against `key` if its window still has room.
    pub fn check(&self, key: &RateKey) -> RateDecision {
        let limit = self.limits.for_action(key.action);
        if limit.is_disabled() {
            return RateDecision::Allow { remaining: u32::MAX };
        }

        let now = self.clock.now();
        let mut windows = self.lock_windows();
        let window =
            windows.entry(key.clone()).or_insert(RateWindow { count: 0, window_start: now });

        if now >= window.end(&limit) {
            window.count = 0;
            window.window_start = now;
        }

        if window.count >= limit.max_events {
            let retry_after = (window.end(&limit) - now).to_std().unwrap_or(Duration::ZERO);
            return RateDecision::Deny { retry_after };
        }

        window.count += 1;
        RateDecision::Allow { remaining: limit.max_events - window.count }
    }

    /// Reports the decision `check` would make without counting.
    pub fn peek(&self, key: &RateKey) -> RateDecision {
        let limit = self.limits.for_action(key.action);
        if limit.is_disabled() {
            return RateDecision::Allow { remaining: u32::MAX };
        }

        let now = self.clock.now();
        let windows = self.lock_windows();
        match windows.get(key) {
            Some(window) if now < window.end(&limit) => {
                if window.count >= limit.max_events {
                    let retry_after = (window.end(&limit) - now).to_std().unwrap_or(Duration::ZERO);
                    RateDecision::Deny { retry_after }
                } else {
                    RateDecision::Allow { remaining: limit.max_events - window.count }
                }
            }
            _ => RateDecision::Allow { remaining: limit.max_events },
        }
    }

    /// Drops windows that have ended; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let limits = self.limits;
        let mut windows = self.lock_windows();
        let before = windows.len();
        windows.retain(|key, window| now < window.end(&limits.for_action(key.action)));
        before - windows.len()
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<RateKey, RateWindow>> {
        match self.windows.lock() {
            Ok(windows) => windows,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
