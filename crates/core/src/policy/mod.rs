//! Safety and throttling primitives shared by the chat and tool paths.

pub mod clock;
pub mod moderation;
pub mod rate_limit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use moderation::{ContentModerator, ModerationCategory, ModerationVerdict};
pub use rate_limit::{
    ActionClass, FixedWindowRateLimiter, RateDecision, RateKey, RateLimit, RateLimits,
};
