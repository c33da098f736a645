use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of purposes a user message can be classified into.
///
/// `Unset` only exists on fresh sessions; routers never produce it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Travel,
    Weather,
    Smalltalk,
    Other,
    #[default]
    Unset,
}

impl Intent {
    pub const CLASSIFIABLE: [Intent; 4] =
        [Intent::Travel, Intent::Weather, Intent::Smalltalk, Intent::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Travel => "TRAVEL",
            Self::Weather => "WEATHER",
            Self::Smalltalk => "SMALLTALK",
            Self::Other => "OTHER",
            Self::Unset => "UNSET",
        }
    }

    /// Task intents collect slots; conversational ones are answered directly.
    pub fn is_task(&self) -> bool {
        matches!(self, Self::Travel | Self::Weather)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown intent label `{0}`")]
pub struct UnknownIntent(pub String);

impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TRAVEL" => Ok(Self::Travel),
            "WEATHER" => Ok(Self::Weather),
            "SMALLTALK" => Ok(Self::Smalltalk),
            "OTHER" => Ok(Self::Other),
            "UNSET" => Ok(Self::Unset),
            other => Err(UnknownIntent(other.to_string())),
        }
    }
}
