//! Routine details pulled out of a create-routine request.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use rainbow_core::ClassifierConfig;

use crate::normalize::normalize_text;

/// Words that never name a routine on their own.
const CONNECTIVES: &[&str] = &["for", "at", "in", "on", "called", "named", "every"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutineHint {
    pub name: Option<String>,
    pub time_of_day: Option<String>,
    /// `HH:MM`, 24-hour.
    pub schedule_time: Option<String>,
}

impl RoutineHint {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.time_of_day.is_none() && self.schedule_time.is_none()
    }
}

fn clock_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?i)\b(\d{1,2}):(\d{2})\s*(am|pm)?\b").expect("static regex"))
}

fn meridiem_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?i)\b(\d{1,2})\s*(am|pm)\b").expect("static regex"))
}

fn quoted_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#""([^"]+)"|\u{201C}([^\u{201D}]+)\u{201D}|(?:^|\s)'([^']+)'"#).expect("static regex")
    })
}

fn called_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b(?:called|named)\s+([a-z0-9][a-z0-9 ]*?)\s*(?:\b(?:at|for|with|every)\b|[.,!?]|$)")
            .expect("static regex")
    })
}

/// Parse a schedule time out of free text as `HH:MM`.
pub fn extract_schedule_time(raw: &str) -> Option<String> {
    if let Some(caps) = clock_regex().captures(raw) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        let meridiem = caps.get(3).map(|m| m.as_str().to_lowercase());
        return to_24h(hour, minute, meridiem.as_deref());
    }
    let caps = meridiem_regex().captures(raw)?;
    let hour: u32 = caps[1].parse().ok()?;
    to_24h(hour, 0, Some(caps[2].to_lowercase().as_str()))
}

fn to_24h(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<String> {
    if minute > 59 {
        return None;
    }
    let hour = match meridiem {
        Some(m) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (m, hour) {
                ("am", 12) => 0,
                ("am", h) => h,
                ("pm", 12) => 12,
                (_, h) => h + 12,
            }
        }
        None if hour < 24 => hour,
        None => return None,
    };
    Some(format!("{:02}:{:02}", hour, minute))
}

fn title_case(words: &str) -> String {
    words
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_all(words: &[String]) -> Vec<String> {
    words.iter().map(|w| normalize_text(w)).collect()
}

pub struct HintExtractor {
    create_verbs: Vec<String>,
    routine_nouns: Vec<String>,
    stop_words: Vec<String>,
    time_of_day_words: Vec<String>,
}

impl HintExtractor {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            create_verbs: normalize_all(&config.create_verbs),
            routine_nouns: normalize_all(&config.routine_nouns),
            stop_words: normalize_all(&config.stop_words),
            time_of_day_words: normalize_all(&config.time_of_day_words),
        }
    }

    pub fn extract(&self, raw: &str) -> RoutineHint {
        let normalized = normalize_text(raw);
        RoutineHint {
            name: self.extract_name(raw, &normalized),
            time_of_day: normalized
                .split(' ')
                .find(|w| self.time_of_day_words.iter().any(|t| t == w))
                .map(String::from),
            schedule_time: extract_schedule_time(raw),
        }
    }

    fn extract_name(&self, raw: &str, normalized: &str) -> Option<String> {
        if let Some(caps) = quoted_regex().captures(raw) {
            let quoted = (1..=3).find_map(|i| caps.get(i)).map(|m| m.as_str().trim());
            if let Some(name) = quoted.filter(|n| !n.is_empty()) {
                return Some(name.to_string());
            }
        }

        if let Some(caps) = called_regex().captures(normalized) {
            let name = caps[1].trim();
            if !name.is_empty() {
                return Some(title_case(name));
            }
        }

        let words: Vec<&str> = normalized.split(' ').collect();
        let noun_at = words.iter().position(|w| self.routine_nouns.iter().any(|n| n == w))?;
        let before = noun_at.checked_sub(1).map(|i| words[i]).filter(|w| self.names_routine(w));
        let after = || {
            words[noun_at + 1..]
                .iter()
                .copied()
                .find(|w| !CONNECTIVES.contains(w) && !self.is_filler(w))
                .filter(|w| self.names_routine(w))
        };
        before
            .or_else(after)
            .map(|w| format!("{} Routine", title_case(w)))
    }

    fn is_filler(&self, word: &str) -> bool {
        self.stop_words.iter().any(|s| s == word)
    }

    fn names_routine(&self, word: &str) -> bool {
        !word.is_empty()
            && word.chars().all(char::is_alphabetic)
            && !self.is_filler(word)
            && !CONNECTIVES.contains(&word)
            && !self.create_verbs.iter().any(|v| v == word)
            && !self.routine_nouns.iter().any(|n| n == word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> HintExtractor {
        HintExtractor::from_config(&ClassifierConfig::default())
    }

    #[test]
    fn test_schedule_time_formats() {
        assert_eq!(extract_schedule_time("at 7:30"), Some("07:30".into()));
        assert_eq!(extract_schedule_time("at 7:30 pm"), Some("19:30".into()));
        assert_eq!(extract_schedule_time("at 8pm"), Some("20:00".into()));
        assert_eq!(extract_schedule_time("at 12 am"), Some("00:00".into()));
        assert_eq!(extract_schedule_time("at 25:00"), None);
        assert_eq!(extract_schedule_time("no time here"), None);
    }

    #[test]
    fn test_quoted_name_wins() {
        let hint = extractor().extract(r#"make a routine called "Sunny Start" at 7am"#);
        assert_eq!(hint.name.as_deref(), Some("Sunny Start"));
        assert_eq!(hint.schedule_time.as_deref(), Some("07:00"));
    }

    #[test]
    fn test_called_name() {
        let hint = extractor().extract("create a routine called super star for the evening");
        assert_eq!(hint.name.as_deref(), Some("Super Star"));
        assert_eq!(hint.time_of_day.as_deref(), Some("evening"));
    }

    #[test]
    fn test_word_next_to_routine() {
        let ex = extractor();
        assert_eq!(ex.extract("Create a morning routine").name.as_deref(), Some("Morning Routine"));
        assert_eq!(
            ex.extract("I need a routine for bedtime").name.as_deref(),
            Some("Bedtime Routine")
        );
        assert_eq!(ex.extract("make a new routine").name, None);
    }

    #[test]
    fn test_empty_hint() {
        assert!(extractor().extract("plan my day").is_empty());
    }
}
