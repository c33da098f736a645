use std::collections::BTreeMap;

use parley_core::domain::conversation::ConversationTurn;
use parley_core::domain::intent::Intent;
use parley_core::domain::schema::{SlotName, SlotSchema};
use regex::Regex;

use crate::router::keyword_intent;

/// Raw, unvalidated slot values pulled out of one message.
pub type Candidates = BTreeMap<SlotName, String>;

const MAX_PLACE_LEN: usize = 40;
const MAX_SHORT_REPLY_WORDS: usize = 4;

/// Leading words that mean the text after a preposition is not a place.
const NOT_A_PLACE: &[&str] = &[
    "a", "an", "be", "book", "check", "do", "fly", "get", "go", "it", "know", "me", "my", "see",
    "the", "travel", "visit",
];

/// Deterministic candidate extraction. Never consults the clock or any service.
pub struct SlotExtractor {
    location_marker: Regex,
    origin_marker: Regex,
    destination_marker: Regex,
    weather_stop: Regex,
    travel_stop: Regex,
    region_suffix: Regex,
    airport_pair: Regex,
    iso_date: Regex,
    relative_date: Regex,
    day_word: Regex,
    return_marker: Regex,
    pax: Regex,
    solo: Regex,
    cabin: Regex,
    option_pick: Regex,
}

struct DateMention {
    at: usize,
    raw: String,
}

impl SlotExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            location_marker: Regex::new(r"(?i)\b(?:in|for|at)\s+")?,
            origin_marker: Regex::new(r"(?i)\bfrom\s+")?,
            destination_marker: Regex::new(r"(?i)\b(?:to|into)\s+")?,
            weather_stop: Regex::new(
                r"(?i)[,;.!?\n]|\b(?:today|tomorrow|next|this|coming|on|at|for|in|from|to)\b",
            )?,
            travel_stop: Regex::new(
                r"(?i)[,;.!?\n]|\b(?:today|tomorrow|next|this|coming|on|at|for|in|to|from|with|and|return|returning|back|departing|leaving|one|two|three|four|five|six|seven|eight|nine|economy|business|first|premium)\b",
            )?,
            region_suffix: Regex::new(r"^,\s*([A-Z]{2})\b")?,
            airport_pair: Regex::new(r"\b([A-Z]{3})\s*(?:to|-|→)\s*([A-Z]{3})\b")?,
            iso_date: Regex::new(r"\b\d{4}-\d{2}-\d{2}\b")?,
            relative_date: Regex::new(
                r"(?i)\b(?:next|this|coming)\s+(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|week|weekend)\b",
            )?,
            day_word: Regex::new(r"(?i)\b(?:today|tomorrow)\b")?,
            return_marker: Regex::new(r"(?i)\b(?:return|returning|back)\b")?,
            pax: Regex::new(
                r"(?i)\b(\d{1,2}|one|two|three|four|five|six|seven|eight|nine|ten)\s+(?:adults?|passengers?|people|persons?|travell?ers?|pax)\b",
            )?,
            solo: Regex::new(r"(?i)\b(?:just me|myself|solo|on my own)\b")?,
            cabin: Regex::new(r"(?i)\b(premium economy|economy|business class|first class)\b")?,
            option_pick: Regex::new(r"(?i)^(?:option\s*)?#?(\d{1,2})[.)]?$")?,
        })
    }

    /// Extracts candidates for `intent` from `message`.
    ///
    /// `last_question` is the assistant turn that preceded the message. When it
    /// asked for a slot, a short reply that matched nothing else fills that slot,
    /// and a bare number picks one of the offered options.
    pub fn extract(
        &self,
        intent: Intent,
        message: &str,
        last_question: Option<&ConversationTurn>,
    ) -> Candidates {
        let Some(schema) = SlotSchema::for_intent(intent) else {
            return Candidates::new();
        };
        if !schema.collects_slots() {
            return Candidates::new();
        }

        let awaited = last_question
            .and_then(|turn| turn.asked_slot.map(|slot| (slot, turn.options.as_slice())))
            .filter(|(slot, _)| schema.allows(*slot));

        let mut candidates = match intent {
            Intent::Weather => self.weather(message),
            Intent::Travel => self.travel(message, awaited.map(|(slot, _)| slot)),
            _ => Candidates::new(),
        };

        if let Some((slot, options)) = awaited {
            self.fill_awaited(&mut candidates, slot, options, message);
        }

        candidates.retain(|slot, _| schema.allows(*slot));
        candidates
    }

    fn weather(&self, message: &str) -> Candidates {
        let mut candidates = Candidates::new();
        if let Some(location) = self.place_after(message, &self.location_marker, &self.weather_stop)
        {
            candidates.insert(SlotName::Location, location);
        }
        if let Some(date) = self.date_mentions(message).into_iter().next() {
            candidates.insert(SlotName::Date, date.raw);
        }
        candidates
    }

    fn travel(&self, message: &str, awaited: Option<SlotName>) -> Candidates {
        let mut candidates = Candidates::new();

        if let Some(pair) = self.airport_pair.captures(message) {
            candidates.insert(SlotName::Origin, pair[1].to_string());
            candidates.insert(SlotName::Destination, pair[2].to_string());
        }
        if let Some(origin) = self.place_after(message, &self.origin_marker, &self.travel_stop) {
            candidates.insert(SlotName::Origin, origin);
        }
        if let Some(destination) =
            self.place_after(message, &self.destination_marker, &self.travel_stop)
        {
            candidates.insert(SlotName::Destination, destination);
        }

        let mentions = self.date_mentions(message);
        match self.return_marker.find(message) {
            Some(marker) => {
                if let Some(depart) = mentions.iter().find(|mention| mention.at < marker.start()) {
                    candidates.insert(SlotName::DepartDate, depart.raw.clone());
                }
                if let Some(back) = mentions.iter().find(|mention| mention.at >= marker.end()) {
                    candidates.insert(SlotName::ReturnDate, back.raw.clone());
                }
            }
            None if awaited == Some(SlotName::ReturnDate) => {
                if let Some(back) = mentions.first() {
                    candidates.insert(SlotName::ReturnDate, back.raw.clone());
                }
            }
            None => {
                let mut dates = mentions.into_iter();
                if let Some(depart) = dates.next() {
                    candidates.insert(SlotName::DepartDate, depart.raw);
                }
                if let Some(back) = dates.next() {
                    candidates.insert(SlotName::ReturnDate, back.raw);
                }
            }
        }

        if let Some(pax) = self.pax.captures(message) {
            candidates.insert(SlotName::PaxAdults, pax[1].to_string());
        } else if self.solo.is_match(message) {
            candidates.insert(SlotName::PaxAdults, "1".to_string());
        }

        if let Some(cabin) = self.cabin.captures(message) {
            candidates.insert(SlotName::Cabin, cabin[1].to_ascii_lowercase());
        }

        candidates
    }

    fn fill_awaited(
        &self,
        candidates: &mut Candidates,
        slot: SlotName,
        options: &[String],
        message: &str,
    ) {
        let reply = message.trim().trim_end_matches(['.', '!', '?']).trim();
        if reply.is_empty() {
            return;
        }

        if !options.is_empty() {
            let picked = self
                .option_pick
                .captures(reply)
                .and_then(|captures| captures[1].parse::<usize>().ok())
                .and_then(|index| index.checked_sub(1))
                .and_then(|index| options.get(index));
            if let Some(option) = picked {
                candidates.insert(slot, option.clone());
                return;
            }
        }

        // Greetings and thanks are not answers.
        if keyword_intent(reply) == Intent::Smalltalk {
            return;
        }

        let short = reply.split_whitespace().count() <= MAX_SHORT_REPLY_WORDS;
        if candidates.is_empty() && short {
            candidates.insert(slot, reply.to_string());
        }
    }

    /// First place-like phrase following any match of `marker`.
    fn place_after(&self, text: &str, marker: &Regex, stop: &Regex) -> Option<String> {
        marker.find_iter(text).find_map(|found| {
            let rest = &text[found.end()..];
            let head_len = rest
                .char_indices()
                .find(|(_, character)| {
                    !(character.is_alphabetic() || matches!(character, ' ' | '\'' | '-' | '.'))
                })
                .map(|(index, _)| index)
                .unwrap_or(rest.len());
            let head = &rest[..head_len];
            let head = match stop.find(head) {
                Some(stop) => &head[..stop.start()],
                None => head,
            };
            let place = head.trim().trim_end_matches(['.', '-', '\'']).trim();

            let first_word = place.split_whitespace().next()?.to_ascii_lowercase();
            if NOT_A_PLACE.contains(&first_word.as_str()) || place.chars().count() > MAX_PLACE_LEN {
                return None;
            }

            let after = &rest[place.len()..];
            match self.region_suffix.captures(after.trim_start_matches(' ')) {
                Some(region) => Some(format!("{place}, {}", &region[1])),
                None => Some(place.to_string()),
            }
        })
    }

    /// Date expressions in order of appearance.
    fn date_mentions(&self, text: &str) -> Vec<DateMention> {
        let mut mentions: Vec<DateMention> = self
            .iso_date
            .find_iter(text)
            .chain(self.relative_date.find_iter(text))
            .chain(self.day_word.find_iter(text))
            .map(|found| DateMention { at: found.start(), raw: found.as_str().to_ascii_lowercase() })
            .collect();
        mentions.sort_by_key(|mention| mention.at);
        mentions
    }
}
