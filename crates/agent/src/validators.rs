use std::collections::BTreeMap;
use std::sync::Arc;

use parley_core::chrono::{Datelike, Duration, NaiveDate, Weekday};
use parley_core::domain::intent::Intent;
use parley_core::domain::schema::{CabinClass, SlotMap, SlotName, SlotValue};
use parley_core::policy::Clock;

/// Forecasts are only available this many days ahead.
pub const WEATHER_HORIZON_DAYS: i64 = 15;
pub const MAX_PAX_ADULTS: u8 = 9;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotVerdict {
    Accepted(SlotValue),
    Rejected { reason: String },
    Ambiguous { options: Vec<String> },
}

impl SlotVerdict {
    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected { reason: reason.into() }
    }
}

/// Place names that resolve to more than one city or airport.
#[derive(Clone, Debug, Default)]
pub struct LocationDirectory {
    cities: BTreeMap<String, Vec<String>>,
    airports: BTreeMap<String, Vec<String>>,
}

impl LocationDirectory {
    pub fn builtin() -> Self {
        Self::default()
            .with_city("Springfield", ["Springfield, IL", "Springfield, MA", "Springfield, MO"])
            .with_city("Portland", ["Portland, OR", "Portland, ME"])
            .with_city("Columbus", ["Columbus, OH", "Columbus, GA"])
            .with_airports("London", ["LHR", "LGW", "STN", "LCY"])
            .with_airports("New York", ["JFK", "LGA", "EWR"])
            .with_airports("Paris", ["CDG", "ORY"])
            .with_airports("Tokyo", ["HND", "NRT"])
    }

    pub fn with_city<I, S>(mut self, name: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cities.insert(normalize(name), labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_airports<I, S>(mut self, name: &str, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.airports.insert(normalize(name), codes.into_iter().map(Into::into).collect());
        self
    }

    /// Matches a fully qualified label such as "Springfield, IL".
    fn canonical_city(&self, raw: &str) -> Option<&String> {
        let wanted = normalize(&raw.replace(',', " "));
        self.cities.values().flatten().find(|label| normalize(&label.replace(',', " ")) == wanted)
    }

    fn lookup(&self, intent: Intent, raw: &str) -> Option<&[String]> {
        let table = if intent == Intent::Travel { &self.airports } else { &self.cities };
        table.get(&normalize(raw)).map(Vec::as_slice)
    }
}

pub struct SlotValidator {
    clock: Arc<dyn Clock>,
    directory: LocationDirectory,
}

impl SlotValidator {
    pub fn new(clock: Arc<dyn Clock>, directory: LocationDirectory) -> Self {
        Self { clock, directory }
    }

    /// Checks one candidate. `accepted` holds slots already accepted, including
    /// ones accepted earlier in the same turn.
    pub fn validate(
        &self,
        intent: Intent,
        slot: SlotName,
        raw: &str,
        accepted: &SlotMap,
    ) -> SlotVerdict {
        if slot.is_date() {
            self.date(intent, slot, raw, accepted)
        } else if slot.is_place() {
            self.place(intent, raw)
        } else if slot == SlotName::PaxAdults {
            pax(raw)
        } else {
            cabin(raw)
        }
    }

    fn date(&self, intent: Intent, slot: SlotName, raw: &str, accepted: &SlotMap) -> SlotVerdict {
        let today = self.clock.today();
        let text = normalize(raw);
        let resolved = match text.as_str() {
            "today" => vec![today],
            "tomorrow" => vec![today + Duration::days(1)],
            _ => match NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
                Ok(date) => vec![date],
                Err(_) => match relative_candidates(&text, today) {
                    Some(candidates) => candidates,
                    None if is_relative(&text) => {
                        return SlotVerdict::rejected("that date is too vague");
                    }
                    None => return SlotVerdict::rejected("I couldn't read that date"),
                },
            },
        };

        let horizon = today + Duration::days(WEATHER_HORIZON_DAYS);
        let depart = if slot == SlotName::ReturnDate {
            accepted.get(&SlotName::DepartDate).and_then(SlotValue::as_date)
        } else {
            None
        };

        let mut first_problem = None;
        let usable: Vec<NaiveDate> = resolved
            .iter()
            .copied()
            .filter(|date| {
                let problem = if *date < today {
                    Some("that date is in the past".to_string())
                } else if intent == Intent::Weather && *date > horizon {
                    Some(format!(
                        "I can only check the forecast up to {WEATHER_HORIZON_DAYS} days ahead"
                    ))
                } else if depart.is_some_and(|depart| *date < depart) {
                    Some("the return date is before the departure date".to_string())
                } else {
                    None
                };
                let usable = problem.is_none();
                if first_problem.is_none() {
                    first_problem = problem;
                }
                usable
            })
            .collect();

        match usable.as_slice() {
            [] => SlotVerdict::Rejected {
                reason: first_problem.unwrap_or_else(|| "I couldn't read that date".to_string()),
            },
            [only] => SlotVerdict::Accepted(SlotValue::Date(*only)),
            several => SlotVerdict::Ambiguous {
                options: several.iter().map(|date| date.format("%Y-%m-%d").to_string()).collect(),
            },
        }
    }

    fn place(&self, intent: Intent, raw: &str) -> SlotVerdict {
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty()
            || text.chars().count() > 60
            || text.chars().any(|character| character.is_ascii_digit())
        {
            return SlotVerdict::rejected("that doesn't look like a place name");
        }

        let is_code = text.len() == 3 && text.chars().all(|character| character.is_ascii_alphabetic());
        if is_code && (intent == Intent::Travel || text.chars().all(|c| c.is_ascii_uppercase())) {
            return SlotVerdict::Accepted(SlotValue::Place(text.to_ascii_uppercase()));
        }

        if let Some(label) = self.directory.canonical_city(&text) {
            return SlotVerdict::Accepted(SlotValue::Place(label.clone()));
        }

        match self.directory.lookup(intent, &text) {
            Some([only]) => SlotVerdict::Accepted(SlotValue::Place(only.clone())),
            Some(options) if options.len() > 1 => {
                SlotVerdict::Ambiguous { options: options.to_vec() }
            }
            _ => SlotVerdict::Accepted(SlotValue::Place(title_case(&text))),
        }
    }
}

fn pax(raw: &str) -> SlotVerdict {
    let text = normalize(raw);
    let count = text.split_whitespace().next().and_then(|token| {
        token.parse::<u32>().ok().or_else(|| number_word(token).map(u32::from))
    });

    match count {
        None => SlotVerdict::rejected("please give the number of adults as a number"),
        Some(0) => SlotVerdict::rejected("at least one adult has to travel"),
        Some(count) if count > u32::from(MAX_PAX_ADULTS) => SlotVerdict::Rejected {
            reason: format!("I can book for at most {MAX_PAX_ADULTS} adults"),
        },
        Some(count) => match u8::try_from(count) {
            Ok(count) => SlotVerdict::Accepted(SlotValue::Count(count)),
            Err(_) => SlotVerdict::rejected("please give the number of adults as a number"),
        },
    }
}

fn cabin(raw: &str) -> SlotVerdict {
    let text = normalize(raw);
    let text = text
        .split_whitespace()
        .filter(|word| !matches!(*word, "class" | "cabin" | "please"))
        .collect::<Vec<_>>()
        .join(" ");

    let cabin = match text.as_str() {
        "economy" | "coach" | "eco" => CabinClass::Economy,
        "premium economy" | "premium" => CabinClass::PremiumEconomy,
        "business" => CabinClass::Business,
        "first" => CabinClass::First,
        _ => return SlotVerdict::rejected("I didn't recognise that cabin"),
    };
    SlotVerdict::Accepted(SlotValue::Cabin(cabin))
}

pub(crate) fn number_word(word: &str) -> Option<u8> {
    let value = match word {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        _ => return None,
    };
    Some(value)
}

fn is_relative(text: &str) -> bool {
    text.split_whitespace().any(|word| matches!(word, "next" | "this" | "coming"))
}

/// Concrete dates a relative phrase could mean, nearest first.
fn relative_candidates(text: &str, today: NaiveDate) -> Option<Vec<NaiveDate>> {
    let mut words = text.split_whitespace();
    let qualifier = words.next()?;
    let target = words.next()?;
    if words.next().is_some() || !matches!(qualifier, "next" | "this" | "coming") {
        return None;
    }
    let strictly_ahead = qualifier == "next";

    let upcoming = |weekday: Weekday| {
        let ahead = (i64::from(weekday.num_days_from_monday())
            - i64::from(today.weekday().num_days_from_monday()))
        .rem_euclid(7);
        let ahead = if ahead == 0 && strictly_ahead { 7 } else { ahead };
        today + Duration::days(ahead)
    };

    if target == "weekend" {
        let saturday = upcoming(Weekday::Sat);
        return Some(if strictly_ahead {
            vec![saturday, saturday + Duration::days(7)]
        } else {
            vec![saturday, saturday + Duration::days(1)]
        });
    }

    let weekday = target.parse::<Weekday>().ok()?;
    let first = upcoming(weekday);
    Some(vec![first, first + Duration::days(7)])
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut characters = word.chars();
            match characters.next() {
                Some(first) => {
                    first.to_uppercase().chain(characters.flat_map(char::to_lowercase)).collect()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::chrono::{NaiveDate, TimeZone, Utc};
    use parley_core::domain::intent::Intent;
    use parley_core::domain::schema::{CabinClass, SlotMap, SlotName, SlotValue};
    use parley_core::policy::ManualClock;

    use super::{LocationDirectory, SlotValidator, SlotVerdict};

    // 2030-04-03 is a Wednesday.
    fn validator() -> SlotValidator {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2030, 4, 3, 9, 0, 0).single().expect("ts"));
        SlotValidator::new(Arc::new(clock), LocationDirectory::builtin())
    }

    fn date(y: i32, m: u32, d: u32) -> SlotValue {
        SlotValue::Date(NaiveDate::from_ymd_opt(y, m, d).expect("date"))
    }

    fn rejected(verdict: &SlotVerdict) -> &str {
        match verdict {
            SlotVerdict::Rejected { reason } => reason,
            _ => "",
        }
    }

    #[test]
    fn date_words_and_iso_dates_resolve_against_the_clock() {
        let validator = validator();
        let empty = SlotMap::new();
        let cases = [
            ("today", date(2030, 4, 3)),
            ("Tomorrow", date(2030, 4, 4)),
            ("2030-04-10", date(2030, 4, 10)),
        ];
        for (raw, expected) in cases {
            assert_eq!(
                validator.validate(Intent::Weather, SlotName::Date, raw, &empty),
                SlotVerdict::Accepted(expected),
                "raw: {raw}"
            );
        }
    }

    #[test]
    fn past_and_out_of_horizon_dates_are_rejected() {
        let validator = validator();
        let empty = SlotMap::new();

        let past = validator.validate(Intent::Travel, SlotName::DepartDate, "2030-04-02", &empty);
        assert_eq!(rejected(&past), "that date is in the past");

        let far = validator.validate(Intent::Weather, SlotName::Date, "2030-04-19", &empty);
        assert!(rejected(&far).contains("15 days"));

        let edge = validator.validate(Intent::Weather, SlotName::Date, "2030-04-18", &empty);
        assert_eq!(edge, SlotVerdict::Accepted(date(2030, 4, 18)));

        let travel_far = validator.validate(Intent::Travel, SlotName::DepartDate, "2030-09-01", &empty);
        assert_eq!(travel_far, SlotVerdict::Accepted(date(2030, 9, 1)));

        let garbage = validator.validate(Intent::Travel, SlotName::DepartDate, "someday", &empty);
        assert_eq!(rejected(&garbage), "I couldn't read that date");
    }

    #[test]
    fn return_date_must_not_precede_departure() {
        let validator = validator();
        let mut accepted = SlotMap::new();
        accepted.insert(SlotName::DepartDate, date(2030, 5, 10));

        let verdict = validator.validate(Intent::Travel, SlotName::ReturnDate, "2030-05-08", &accepted);
        assert_eq!(rejected(&verdict), "the return date is before the departure date");

        let verdict = validator.validate(Intent::Travel, SlotName::ReturnDate, "2030-05-10", &accepted);
        assert_eq!(verdict, SlotVerdict::Accepted(date(2030, 5, 10)));
    }

    #[test]
    fn relative_phrases_offer_concrete_dates() {
        let validator = validator();
        let empty = SlotMap::new();

        let verdict = validator.validate(Intent::Travel, SlotName::DepartDate, "next friday", &empty);
        assert_eq!(
            verdict,
            SlotVerdict::Ambiguous {
                options: vec!["2030-04-05".to_string(), "2030-04-12".to_string()]
            }
        );

        let verdict = validator.validate(Intent::Weather, SlotName::Date, "this weekend", &empty);
        assert_eq!(
            verdict,
            SlotVerdict::Ambiguous {
                options: vec!["2030-04-06".to_string(), "2030-04-07".to_string()]
            }
        );

        let verdict = validator.validate(Intent::Weather, SlotName::Date, "next week", &empty);
        assert_eq!(rejected(&verdict), "that date is too vague");
    }

    #[test]
    fn this_weekday_includes_today() {
        let verdict = validator().validate(
            Intent::Weather,
            SlotName::Date,
            "this wednesday",
            &SlotMap::new(),
        );
        assert_eq!(
            verdict,
            SlotVerdict::Ambiguous {
                options: vec!["2030-04-03".to_string(), "2030-04-10".to_string()]
            }
        );
    }

    #[test]
    fn places_are_normalised_or_disambiguated() {
        let validator = validator();
        let empty = SlotMap::new();

        assert_eq!(
            validator.validate(Intent::Travel, SlotName::Origin, "lhr", &empty),
            SlotVerdict::Accepted(SlotValue::Place("LHR".to_string()))
        );
        assert_eq!(
            validator.validate(Intent::Weather, SlotName::Location, "new  york", &empty),
            SlotVerdict::Accepted(SlotValue::Place("New York".to_string()))
        );
        assert_eq!(
            validator.validate(Intent::Weather, SlotName::Location, "Rio", &empty),
            SlotVerdict::Accepted(SlotValue::Place("Rio".to_string()))
        );
        assert_eq!(
            validator.validate(Intent::Weather, SlotName::Location, "Springfield", &empty),
            SlotVerdict::Ambiguous {
                options: vec![
                    "Springfield, IL".to_string(),
                    "Springfield, MA".to_string(),
                    "Springfield, MO".to_string()
                ]
            }
        );
        assert_eq!(
            validator.validate(Intent::Weather, SlotName::Location, "springfield ma", &empty),
            SlotVerdict::Accepted(SlotValue::Place("Springfield, MA".to_string()))
        );
        assert!(matches!(
            validator.validate(Intent::Travel, SlotName::Origin, "London", &empty),
            SlotVerdict::Ambiguous { ref options } if options[0] == "LHR"
        ));
        assert_eq!(
            rejected(&validator.validate(Intent::Weather, SlotName::Location, "42", &empty)),
            "that doesn't look like a place name"
        );
    }

    #[test]
    fn party_size_and_cabin_table() {
        let validator = validator();
        let empty = SlotMap::new();
        let cases = [
            (SlotName::PaxAdults, "2", Some(SlotValue::Count(2))),
            (SlotName::PaxAdults, "three", Some(SlotValue::Count(3))),
            (SlotName::PaxAdults, "9", Some(SlotValue::Count(9))),
            (SlotName::PaxAdults, "0", None),
            (SlotName::PaxAdults, "12", None),
            (SlotName::PaxAdults, "a few", None),
            (SlotName::Cabin, "business class", Some(SlotValue::Cabin(CabinClass::Business))),
            (SlotName::Cabin, "Premium Economy", Some(SlotValue::Cabin(CabinClass::PremiumEconomy))),
            (SlotName::Cabin, "First", Some(SlotValue::Cabin(CabinClass::First))),
            (SlotName::Cabin, "cargo hold", None),
        ];

        for (slot, raw, expected) in cases {
            let verdict = validator.validate(Intent::Travel, slot, raw, &empty);
            match expected {
                Some(value) => assert_eq!(verdict, SlotVerdict::Accepted(value), "raw: {raw}"),
                None => assert!(matches!(verdict, SlotVerdict::Rejected { .. }), "raw: {raw}"),
            }
        }
    }
}
