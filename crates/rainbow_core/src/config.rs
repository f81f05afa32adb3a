use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Default minimum overlap score for an utterance to count as an activity match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.4;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RainbowConfig {
    pub storage: StorageConfig,
    pub classifier: ClassifierConfig,
}

impl RainbowConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: RainbowConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RAINBOW_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("RAINBOW_MATCH_THRESHOLD") {
            match v.parse::<f64>() {
                Ok(n) if (0.0..=1.0).contains(&n) => self.classifier.match_threshold = n,
                _ => tracing::warn!("Ignoring RAINBOW_MATCH_THRESHOLD={}: expected 0.0-1.0", v),
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "rainbow.db".to_string(),
        }
    }
}

/// Phrase lists and scoring knobs for the intent classifier.
///
/// Phrases are compared after normalization (lowercase, punctuation and
/// apostrophes removed), so write `im done` rather than `I'm done`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum token-overlap score (0.0-1.0) for an activity match.
    pub match_threshold: f64,
    /// Stripped from the start of an utterance before scoring.
    pub completion_phrases: Vec<String>,
    /// Generic positive statements not tied to one step.
    pub praise_phrases: Vec<String>,
    pub create_phrases: Vec<String>,
    pub start_phrases: Vec<String>,
    /// Verbs that, next to a routine noun, signal creation ("make ... routine").
    pub create_verbs: Vec<String>,
    /// Verbs that, next to a routine noun, signal a start ("do my ... routine").
    pub start_verbs: Vec<String>,
    pub routine_nouns: Vec<String>,
    /// Tokens ignored when scoring.
    pub stop_words: Vec<String>,
    /// Past-tense forms mapped to their base verb before scoring.
    pub irregular_verbs: BTreeMap<String, String>,
    /// Canonical activity phrase to words that mean the same activity. Any
    /// activity whose name contains the phrase can be matched by them.
    pub activity_synonyms: BTreeMap<String, Vec<String>>,
    pub time_of_day_words: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            completion_phrases: strings(&[
                "i just finished", "i have finished", "ive finished", "i finished",
                "finished with", "finished", "im all done with", "im done with",
                "i am done with", "im done", "i am done", "all done with", "done with",
                "i just completed", "i completed", "completed", "i just did", "i did",
                "done",
            ]),
            praise_phrases: strings(&[
                "i did it", "did it", "i did good", "im proud", "proud of myself",
                "i succeeded", "i accomplished", "look what i made", "i made something",
                "yay", "hooray", "all done", "i finished", "i completed", "great job",
            ]),
            create_phrases: strings(&[
                "create routine", "create a routine", "new routine", "make routine",
                "make a routine", "add routine", "add a routine", "set up routine",
                "set up a routine", "build routine", "build a routine", "need a routine",
                "help me make", "want to create", "create schedule", "make schedule",
                "plan my day",
            ]),
            start_phrases: strings(&[
                "start", "begin", "lets start", "lets begin", "time for", "ready for",
                "can we start",
            ]),
            create_verbs: strings(&["create", "make", "new", "add", "build"]),
            start_verbs: strings(&["start", "begin", "do"]),
            routine_nouns: strings(&["routine", "routines", "schedule"]),
            stop_words: strings(&[
                "i", "im", "ive", "me", "my", "the", "a", "an", "it", "all", "just", "now",
                "with", "and", "have", "has", "did", "done", "finished", "completed", "so",
                "yay", "already", "lets", "please", "to", "of",
            ]),
            irregular_verbs: [
                ("woke", "wake"), ("ate", "eat"), ("took", "take"), ("got", "get"),
                ("went", "go"), ("had", "have"), ("made", "make"), ("wore", "wear"),
                ("slept", "sleep"), ("brought", "bring"), ("drank", "drink"),
                ("fed", "feed"), ("ran", "run"), ("sat", "sit"), ("drew", "draw"),
                ("wrote", "write"), ("sang", "sing"), ("swam", "swim"), ("threw", "throw"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            activity_synonyms: [
                ("wake up", vec!["awake", "get up"]),
                ("brush teeth", vec!["tooth", "toothbrush", "dental"]),
                ("get dressed", vec!["dress", "clothes", "clothing", "outfit", "shirt", "pants"]),
                ("eat breakfast", vec!["morning meal"]),
                ("eat lunch", vec!["midday meal"]),
                ("eat dinner", vec!["supper", "evening meal"]),
                ("take shower", vec!["shower", "showered", "bath", "bathed"]),
                ("take bath", vec!["bath", "bathed", "shower", "showered"]),
                ("do homework", vec!["schoolwork", "study", "studied"]),
                ("clean room", vec!["tidy", "tidied", "cleanup"]),
                ("put on shoes", vec!["socks", "sneakers", "footwear"]),
                ("put on pajamas", vec!["pjs", "jammies", "pyjamas", "nightclothes", "sleeping clothes"]),
                ("go to bed", vec!["sleep", "asleep"]),
                ("take medicine", vec!["medication", "pills", "vitamin", "vitamins"]),
            ]
            .into_iter()
            .map(|(canonical, words)| (canonical.to_string(), strings(&words)))
            .collect(),
            time_of_day_words: strings(&["morning", "afternoon", "evening", "bedtime", "night"]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RainbowConfig::default();
        assert_eq!(cfg.storage.db_path, "rainbow.db");
        assert_eq!(cfg.classifier.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert!(cfg.classifier.completion_phrases.iter().any(|p| p == "done with"));
        assert_eq!(cfg.classifier.irregular_verbs.get("woke").map(String::as_str), Some("wake"));
        assert!(cfg.classifier.activity_synonyms["put on pajamas"].iter().any(|w| w == "pjs"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[storage]
db_path = "data/kids.db"
"#;
        let cfg: RainbowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.storage.db_path, "data/kids.db");
        // Defaults for unspecified sections
        assert_eq!(cfg.classifier.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert!(!cfg.classifier.stop_words.is_empty());
    }

    #[test]
    fn test_parse_classifier_overrides() {
        let toml_str = r#"
[classifier]
match_threshold = 0.6
praise_phrases = ["high five"]

[classifier.irregular_verbs]
swept = "sweep"

[classifier.activity_synonyms]
"feed the cat" = ["kitty", "meow mix"]
"#;
        let cfg: RainbowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.classifier.match_threshold, 0.6);
        assert_eq!(cfg.classifier.praise_phrases, vec!["high five".to_string()]);
        assert_eq!(cfg.classifier.irregular_verbs.len(), 1);
        assert_eq!(cfg.classifier.activity_synonyms.len(), 1);
        assert_eq!(cfg.classifier.activity_synonyms["feed the cat"], vec!["kitty", "meow mix"]);
        // Untouched lists keep their defaults
        assert!(cfg.classifier.start_phrases.iter().any(|p| p == "begin"));
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        // Part 1: env overrides
        std::env::set_var("RAINBOW_DB_PATH", "/tmp/override.db");
        std::env::set_var("RAINBOW_MATCH_THRESHOLD", "0.55");

        let mut cfg = RainbowConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.storage.db_path, "/tmp/override.db");
        assert_eq!(cfg.classifier.match_threshold, 0.55);

        // Out-of-range values are ignored
        std::env::set_var("RAINBOW_MATCH_THRESHOLD", "7");
        let mut cfg = RainbowConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.classifier.match_threshold, DEFAULT_MATCH_THRESHOLD);

        std::env::remove_var("RAINBOW_DB_PATH");
        std::env::remove_var("RAINBOW_MATCH_THRESHOLD");

        // Part 2: nonexistent path returns defaults (no env interference)
        let cfg = RainbowConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.storage.db_path, "rainbow.db");
    }
}
