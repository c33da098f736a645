use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;

pub const WEATHER_TOOL: &str = "weather.get";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Location,
    Date,
    Origin,
    Destination,
    DepartDate,
    ReturnDate,
    PaxAdults,
    Cabin,
}

impl SlotName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Date => "date",
            Self::Origin => "origin",
            Self::Destination => "destination",
            Self::DepartDate => "depart_date",
            Self::ReturnDate => "return_date",
            Self::PaxAdults => "pax_adults",
            Self::Cabin => "cabin",
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date | Self::DepartDate | Self::ReturnDate)
    }

    pub fn is_place(&self) -> bool {
        matches!(self, Self::Location | Self::Origin | Self::Destination)
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl CabinClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Economy => "ECONOMY",
            Self::PremiumEconomy => "PREMIUM_ECONOMY",
            Self::Business => "BUSINESS",
            Self::First => "FIRST",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Economy => "Economy",
            Self::PremiumEconomy => "Premium Economy",
            Self::Business => "Business",
            Self::First => "First",
        }
    }
}

/// A validated, normalized slot value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    /// Canonical place token: an upper-case IATA code or a title-cased place name.
    Place(String),
    Date(NaiveDate),
    Count(u8),
    Cabin(CabinClass),
}

impl SlotValue {
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(date) => Some(*date),
            _ => None,
        }
    }

    /// Whether this value has the shape the given slot expects.
    pub fn fits(&self, slot: SlotName) -> bool {
        match self {
            Self::Place(_) => slot.is_place(),
            Self::Date(_) => slot.is_date(),
            Self::Count(_) => slot == SlotName::PaxAdults,
            Self::Cabin(_) => slot == SlotName::Cabin,
        }
    }
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Place(place) => f.write_str(place),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Count(count) => write!(f, "{count}"),
            Self::Cabin(cabin) => f.write_str(cabin.label()),
        }
    }
}

pub type SlotMap = BTreeMap<SlotName, SlotValue>;

/// Slot requirements for one intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotSchema {
    pub intent: Intent,
    pub required: &'static [SlotName],
    pub optional: &'static [SlotName],
    /// Ask order when several slots are outstanding.
    pub priority: &'static [SlotName],
    pub tool: Option<&'static str>,
}

static WEATHER_SCHEMA: SlotSchema = SlotSchema {
    intent: Intent::Weather,
    required: &[SlotName::Location],
    optional: &[SlotName::Date],
    priority: &[SlotName::Location, SlotName::Date],
    tool: Some(WEATHER_TOOL),
};

static TRAVEL_SCHEMA: SlotSchema = SlotSchema {
    intent: Intent::Travel,
    required: &[SlotName::Origin, SlotName::Destination, SlotName::DepartDate, SlotName::PaxAdults],
    optional: &[SlotName::ReturnDate, SlotName::Cabin],
    priority: &[
        SlotName::DepartDate,
        SlotName::Destination,
        SlotName::Origin,
        SlotName::ReturnDate,
        SlotName::PaxAdults,
        SlotName::Cabin,
    ],
    tool: None,
};

static SMALLTALK_SCHEMA: SlotSchema = SlotSchema {
    intent: Intent::Smalltalk,
    required: &[],
    optional: &[],
    priority: &[],
    tool: None,
};

static OTHER_SCHEMA: SlotSchema =
    SlotSchema { intent: Intent::Other, required: &[], optional: &[], priority: &[], tool: None };

impl SlotSchema {
    /// Schema lookup; `None` only for [`Intent::Unset`].
    pub fn for_intent(intent: Intent) -> Option<&'static SlotSchema> {
        match intent {
            Intent::Weather => Some(&WEATHER_SCHEMA),
            Intent::Travel => Some(&TRAVEL_SCHEMA),
            Intent::Smalltalk => Some(&SMALLTALK_SCHEMA),
            Intent::Other => Some(&OTHER_SCHEMA),
            Intent::Unset => None,
        }
    }

    pub fn allows(&self, slot: SlotName) -> bool {
        self.required.contains(&slot) || self.optional.contains(&slot)
    }

    pub fn collects_slots(&self) -> bool {
        !self.required.is_empty() || !self.optional.is_empty()
    }

    /// Required slots without a value, in ask order.
    pub fn missing(&self, slots: &SlotMap) -> Vec<SlotName> {
        self.priority
            .iter()
            .chain(self.required.iter())
            .filter(|slot| self.required.contains(slot) && !slots.contains_key(slot))
            .fold(Vec::new(), |mut missing, slot| {
                if !missing.contains(slot) {
                    missing.push(*slot);
                }
                missing
            })
    }

    /// Position of a slot in the ask order; unknown slots sort last.
    pub fn rank(&self, slot: SlotName) -> usize {
        self.priority.iter().position(|candidate| *candidate == slot).unwrap_or(usize::MAX)
    }
}
