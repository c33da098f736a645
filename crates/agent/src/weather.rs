use parley_core::chrono::NaiveDate;
use parley_core::domain::schema::{SlotMap, SlotName, SlotValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arguments for the `weather.get` tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherQuery {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl WeatherQuery {
    pub fn from_slots(slots: &SlotMap) -> Option<Self> {
        let location = match slots.get(&SlotName::Location)? {
            SlotValue::Place(place) => place.clone(),
            _ => return None,
        };
        let date = slots.get(&SlotName::Date).and_then(SlotValue::as_date);
        Some(Self { location, date })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location_label: String,
    pub date: NaiveDate,
    pub summary: String,
    pub temp_c: f64,
}

impl WeatherReport {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn render(&self) -> String {
        format!(
            "{} on {}: {}, {:.0}°C.",
            self.location_label,
            self.date.format("%Y-%m-%d"),
            self.summary,
            self.temp_c
        )
    }
}

pub const WEATHER_UNAVAILABLE: &str =
    "Sorry, I couldn't fetch the weather right now. Please try again later.";
