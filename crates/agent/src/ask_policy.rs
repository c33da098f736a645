use parley_core::chrono::NaiveDate;
use parley_core::domain::intent::Intent;
use parley_core::domain::schema::{SlotName, SlotSchema};

/// Same slot asked this many turns in a row earns a way-out hint.
pub const LOOP_HINT_STREAK: u32 = 3;
pub const LOOP_HINT: &str = "If you'd like to start over, just say \"start over\".";
const FALLBACK_QUESTION: &str = "Could you clarify that detail, please?";

/// Why a slot needs asking about again this turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotIssue {
    Rejected { reason: String },
    Ambiguous { options: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clarification {
    pub slot: SlotName,
    pub text: String,
    pub options: Vec<String>,
}

/// Picks the single slot to ask about and phrases the question.
#[derive(Clone, Copy, Debug, Default)]
pub struct AskPolicy;

impl AskPolicy {
    /// Highest-priority slot among `pending`, which holds missing and troubled slots.
    pub fn next_slot(
        &self,
        schema: &SlotSchema,
        pending: impl IntoIterator<Item = SlotName>,
    ) -> Option<SlotName> {
        pending.into_iter().min_by_key(|slot| (schema.rank(*slot), *slot))
    }

    pub fn compose(
        &self,
        intent: Intent,
        slot: SlotName,
        issue: Option<&SlotIssue>,
        streak: u32,
    ) -> Clarification {
        let question = question_for(intent, slot);
        let (mut text, options) = match issue {
            None => (question.to_string(), Vec::new()),
            Some(SlotIssue::Rejected { reason }) => (format!("Sorry, {reason}. {question}"), Vec::new()),
            Some(SlotIssue::Ambiguous { options }) => {
                let listed = options
                    .iter()
                    .enumerate()
                    .map(|(index, option)| format!("{}) {}", index + 1, describe_option(option)))
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    format!("{} Did you mean: {listed}? Reply with the number.", ambiguity_lead(slot)),
                    options.clone(),
                )
            }
        };

        if streak >= LOOP_HINT_STREAK {
            text.push(' ');
            text.push_str(LOOP_HINT);
        }

        Clarification { slot, text, options }
    }
}

pub fn question_for(intent: Intent, slot: SlotName) -> &'static str {
    match (intent, slot) {
        (Intent::Travel, SlotName::DepartDate) => "What departure date works for you? (YYYY-MM-DD)",
        (Intent::Travel, SlotName::Destination) => "Where are you flying to?",
        (Intent::Travel, SlotName::Origin) => "Where are you flying from?",
        (Intent::Travel, SlotName::ReturnDate) => {
            "And the return date? (YYYY-MM-DD) If one-way, just say one-way."
        }
        (Intent::Travel, SlotName::PaxAdults) => "How many adults are travelling?",
        (Intent::Travel, SlotName::Cabin) => {
            "Which cabin do you prefer? Economy, Premium Economy, Business or First?"
        }
        (Intent::Weather, SlotName::Location) => "Which city should I check the weather for?",
        (Intent::Weather, SlotName::Date) => {
            "For which date should I check the forecast? (YYYY-MM-DD)"
        }
        _ => FALLBACK_QUESTION,
    }
}

fn ambiguity_lead(slot: SlotName) -> &'static str {
    match slot {
        SlotName::Location => "There is more than one place with that name.",
        SlotName::Origin | SlotName::Destination => "That city has several airports.",
        _ if slot.is_date() => "That date could mean more than one day.",
        _ => "That could mean more than one thing.",
    }
}

fn describe_option(option: &str) -> String {
    match NaiveDate::parse_from_str(option, "%Y-%m-%d") {
        Ok(date) => format!("{option} ({})", date.format("%A")),
        Err(_) => option.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use parley_core::domain::intent::Intent;
    use parley_core::domain::schema::{SlotName, SlotSchema};

    use super::{AskPolicy, SlotIssue, LOOP_HINT};

    #[test]
    fn next_slot_follows_intent_priority() {
        let travel = SlotSchema::for_intent(Intent::Travel).expect("travel");
        let policy = AskPolicy;
        assert_eq!(
            policy.next_slot(travel, [SlotName::PaxAdults, SlotName::Origin, SlotName::DepartDate]),
            Some(SlotName::DepartDate)
        );
        assert_eq!(
            policy.next_slot(travel, [SlotName::PaxAdults, SlotName::ReturnDate]),
            Some(SlotName::ReturnDate)
        );
        assert_eq!(policy.next_slot(travel, []), None);

        let weather = SlotSchema::for_intent(Intent::Weather).expect("weather");
        assert_eq!(
            policy.next_slot(weather, [SlotName::Date, SlotName::Location]),
            Some(SlotName::Location)
        );
    }

    #[test]
    fn plain_question_uses_fixed_wording() {
        let clarification = AskPolicy.compose(Intent::Travel, SlotName::Destination, None, 1);
        assert_eq!(clarification.text, "Where are you flying to?");
        assert!(clarification.options.is_empty());
    }

    #[test]
    fn rejection_reason_prefixes_the_question() {
        let issue = SlotIssue::Rejected { reason: "that date is in the past".to_string() };
        let clarification = AskPolicy.compose(Intent::Weather, SlotName::Date, Some(&issue), 1);
        assert_eq!(
            clarification.text,
            "Sorry, that date is in the past. For which date should I check the forecast? (YYYY-MM-DD)"
        );
    }

    #[test]
    fn ambiguity_lists_numbered_options() {
        let issue = SlotIssue::Ambiguous {
            options: vec!["Springfield, IL".to_string(), "Springfield, MA".to_string()],
        };
        let clarification = AskPolicy.compose(Intent::Weather, SlotName::Location, Some(&issue), 1);
        assert!(clarification.text.contains("1) Springfield, IL, 2) Springfield, MA"));
        assert_eq!(clarification.options.len(), 2);

        let dates = SlotIssue::Ambiguous {
            options: vec!["2030-04-05".to_string(), "2030-04-12".to_string()],
        };
        let clarification = AskPolicy.compose(Intent::Travel, SlotName::DepartDate, Some(&dates), 1);
        assert!(clarification.text.contains("1) 2030-04-05 (Friday)"));
    }

    #[test]
    fn third_consecutive_ask_adds_loop_hint() {
        let second = AskPolicy.compose(Intent::Weather, SlotName::Location, None, 2);
        assert!(!second.text.contains(LOOP_HINT));

        let third = AskPolicy.compose(Intent::Weather, SlotName::Location, None, 3);
        assert!(third.text.ends_with(LOOP_HINT));
    }
}
