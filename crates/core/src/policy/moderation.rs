use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModerationCategory {
    #[serde(rename = "self-harm")]
    SelfHarm,
    #[serde(rename = "violent-threat")]
    ViolentThreat,
    #[serde(rename = "sexual-minor")]
    SexualMinor,
    #[serde(rename = "hate")]
    Hate,
    #[serde(rename = "illegal")]
    Illegal,
}

impl ModerationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfHarm => "self-harm",
            Self::ViolentThreat => "violent-threat",
            Self::SexualMinor => "sexual-minor",
            Self::Hate => "hate",
            Self::Illegal => "illegal",
        }
    }
}

impl fmt::Display for ModerationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ModerationVerdict {
    Allow,
    Reject { category: ModerationCategory, reason: String },
}

impl ModerationVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Rule order matters: the first matching category wins.
const DEFAULT_RULES: [(ModerationCategory, &str); 5] = [
    (ModerationCategory::SelfHarm, r"\b(kill myself|suicide|end my life)\b"),
    (ModerationCategory::ViolentThreat, r"\b(kill|murder|bomb|shoot)\b"),
    (ModerationCategory::SexualMinor, r"\b(child porn|cp|underage sex)\b"),
    (ModerationCategory::Hate, r"\b(kill (?:all )?(?:jews|gays|blacks|asians))\b"),
    (ModerationCategory::Illegal, r"\b(how to (?:make|build) (?:a bomb|meth)|credit card skimmer)\b"),
];

#[derive(Clone, Debug)]
pub struct ContentModerator {
    rules: Vec<(ModerationCategory, Regex)>,
}

impl ContentModerator {
    pub fn with_default_rules() -> Result<Self, regex::Error> {
        Self::from_rules(DEFAULT_RULES.iter().copied())
    }

    pub fn from_rules<'a>(
        rules: impl IntoIterator<Item = (ModerationCategory, &'a str)>,
    ) -> Result<Self, regex::Error> {
        let rules = rules
            .into_iter()
            .map(|(category, pattern)| {
                RegexBuilder::new(pattern).case_insensitive(true).build().map(|rx| (category, rx))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn check(&self, text: &str) -> ModerationVerdict {
        let text = text.trim();
        if text.is_empty() {
            return ModerationVerdict::Allow;
        }

        self.rules
            .iter()
            .find(|(_, rule)| rule.is_match(text))
            .map(|(category, _)| ModerationVerdict::Reject {
                category: *category,
                reason: format!("matched '{category}' policy"),
            })
            .unwrap_or(ModerationVerdict::Allow)
    }
}
