use std::collections::{HashMap, HashSet};

use rainbow_core::ClassifierConfig;

/// Lowercase, drop apostrophes, turn every other non-alphanumeric into a
/// space and collapse runs of whitespace.
pub fn normalize_text(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_alphanumeric() {
            cleaned.extend(c.to_lowercase());
        } else if c == '\'' || c == '\u{2019}' {
            continue;
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `phrase` occurs in `normalized` on word boundaries.
/// Both sides must already be normalized.
pub fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let padded = format!(" {} ", normalized);
    padded.contains(&format!(" {} ", phrase))
}

/// Whether any single word of `normalized` is in `words`.
pub fn contains_word(normalized: &str, words: &[String]) -> bool {
    normalized.split(' ').any(|w| words.iter().any(|x| x == w))
}

/// An utterance prepared for scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub raw: String,
    pub normalized: String,
    /// `normalized` with leading completion phrases removed.
    pub residual: String,
    /// Content tokens of `residual`: irregular verbs mapped, stop words dropped.
    pub tokens: Vec<String>,
}

pub struct TextNormalizer {
    /// Longest first, so "i just finished" wins over "i just".
    completion_phrases: Vec<String>,
    stop_words: HashSet<String>,
    irregular_verbs: HashMap<String, String>,
    /// Canonical phrase and its synonyms, both as joined content tokens.
    synonyms: Vec<(String, Vec<String>)>,
}

impl TextNormalizer {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let mut completion_phrases: Vec<String> = config
            .completion_phrases
            .iter()
            .map(|p| normalize_text(p))
            .filter(|p| !p.is_empty())
            .collect();
        completion_phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        completion_phrases.dedup();

        let mut normalizer = Self {
            completion_phrases,
            stop_words: config.stop_words.iter().map(|w| normalize_text(w)).collect(),
            irregular_verbs: config
                .irregular_verbs
                .iter()
                .map(|(k, v)| (normalize_text(k), normalize_text(v)))
                .collect(),
            synonyms: Vec::new(),
        };
        normalizer.synonyms = config
            .activity_synonyms
            .iter()
            .filter_map(|(canonical, words)| {
                let canonical = normalizer.content_tokens(canonical).join(" ");
                let words: Vec<String> = words
                    .iter()
                    .map(|w| normalizer.content_tokens(w).join(" "))
                    .filter(|w| !w.is_empty())
                    .collect();
                (!canonical.is_empty() && !words.is_empty()).then_some((canonical, words))
            })
            .collect();
        normalizer
    }

    pub fn utterance(&self, raw: &str) -> Utterance {
        let normalized = normalize_text(raw);
        let residual = self.strip_completion_prefix(&normalized).to_string();
        let tokens = self.content_tokens(&residual);
        Utterance {
            raw: raw.to_string(),
            normalized,
            residual,
            tokens,
        }
    }

    /// Remove completion phrases from the front of `normalized`, repeatedly,
    /// so "yay done i finished brushing" reduces to "brushing" once "yay" is
    /// itself a phrase. Only whole words are stripped.
    pub fn strip_completion_prefix<'a>(&self, normalized: &'a str) -> &'a str {
        let mut rest = normalized;
        loop {
            let stripped = self.completion_phrases.iter().find_map(|phrase| {
                let tail = rest.strip_prefix(phrase.as_str())?;
                if tail.is_empty() {
                    Some(tail)
                } else {
                    tail.strip_prefix(' ')
                }
            });
            match stripped {
                Some(tail) => rest = tail,
                None => return rest,
            }
        }
    }

    /// Tokens of `text` that carry meaning for matching.
    pub fn content_tokens(&self, text: &str) -> Vec<String> {
        normalize_text(text)
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(|w| self.irregular_verbs.get(w).cloned().unwrap_or_else(|| w.to_string()))
            .filter(|w| !self.stop_words.contains(w))
            .collect()
    }

    /// Synonyms that name `activity_name`, from every canonical phrase its
    /// content tokens contain.
    pub fn aliases_for(&self, activity_name: &str) -> Vec<String> {
        let name = self.content_tokens(activity_name).join(" ");
        let mut aliases: Vec<String> = self
            .synonyms
            .iter()
            .filter(|(canonical, _)| contains_phrase(&name, canonical))
            .flat_map(|(_, words)| words.iter().cloned())
            .collect();
        aliases.sort();
        aliases.dedup();
        aliases
    }
}
