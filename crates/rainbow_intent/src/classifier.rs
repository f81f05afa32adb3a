use serde::Serialize;
use std::sync::Arc;

use rainbow_core::{ClassifierConfig, Routine, RoutineSession, SessionStatus};

use crate::hints::{HintExtractor, RoutineHint};
use crate::matcher::{best_match, mentions_alias, overlap_score, shares_any_token, Candidate, SCORE_EPSILON};
use crate::normalize::{contains_phrase, contains_word, normalize_text, TextNormalizer, Utterance};

// ============================================================================
// Intents
// ============================================================================

/// The activity a completion utterance was matched to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRef {
    pub session_id: i64,
    pub routine_id: i64,
    pub activity_index: usize,
    pub activity_name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    CreateRoutine(RoutineHint),
    /// `routine_id` is set when the hint matched one of the child's routines.
    StartRoutine { routine_id: Option<i64>, routine_hint: String },
    CompleteActivity(ActivityRef),
    /// A generic positive statement not tied to any activity.
    AchievementSharing,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    CreateRoutine,
    StartRoutine,
    CompleteActivity,
    AchievementSharing,
    None,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::CreateRoutine => "create_routine",
            IntentKind::StartRoutine => "start_routine",
            IntentKind::CompleteActivity => "complete_activity",
            IntentKind::AchievementSharing => "achievement_sharing",
            IntentKind::None => "none",
        }
    }
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::CreateRoutine(_) => IntentKind::CreateRoutine,
            Intent::StartRoutine { .. } => IntentKind::StartRoutine,
            Intent::CompleteActivity(_) => IntentKind::CompleteActivity,
            Intent::AchievementSharing => IntentKind::AchievementSharing,
            Intent::None => IntentKind::None,
        }
    }

    /// `(session_id, activity_index)` for a completion.
    pub fn activity_ref(&self) -> Option<(i64, usize)> {
        match self {
            Intent::CompleteActivity(r) => Some((r.session_id, r.activity_index)),
            _ => None,
        }
    }

    /// The routine name the child mentioned, if any.
    pub fn routine_hint(&self) -> Option<&str> {
        match self {
            Intent::CreateRoutine(hint) => hint.name.as_deref(),
            Intent::StartRoutine { routine_hint, .. } if !routine_hint.is_empty() => Some(routine_hint),
            _ => None,
        }
    }
}

/// Flat form of a classification for callers that only need the essentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentResult {
    pub intent: IntentKind,
    pub activity_ref: Option<(i64, usize)>,
    pub routine_hint: Option<String>,
}

impl From<&Intent> for IntentResult {
    fn from(intent: &Intent) -> Self {
        Self {
            intent: intent.kind(),
            activity_ref: intent.activity_ref(),
            routine_hint: intent.routine_hint().map(String::from),
        }
    }
}

// ============================================================================
// Child context
// ============================================================================

/// What the classifier may look at for one child. Read-only.
#[derive(Debug, Clone, Default)]
pub struct ChildContext {
    pub routines: Vec<Routine>,
    /// The child's `in_progress` sessions; others are ignored.
    pub sessions: Vec<RoutineSession>,
}

impl ChildContext {
    fn routine(&self, routine_id: i64) -> Option<&Routine> {
        self.routines.iter().find(|r| r.id == routine_id)
    }
}

// ============================================================================
// IntentRule trait
// ============================================================================

pub trait IntentRule: Send + Sync {
    /// Return an intent, or None to pass to the next rule.
    fn evaluate(&self, utterance: &Utterance, child: &ChildContext) -> Option<Intent>;

    /// Name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// IntentClassifier
// ============================================================================

pub struct IntentClassifier {
    normalizer: Arc<TextNormalizer>,
    rules: Vec<Box<dyn IntentRule>>,
}

impl IntentClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            normalizer: Arc::new(TextNormalizer::from_config(config)),
            rules: Vec::new(),
        }
    }

    /// A classifier with the built-in rules, in priority order.
    pub fn with_defaults(config: &ClassifierConfig) -> Self {
        let mut classifier = Self::new(config);
        let normalizer = classifier.normalizer.clone();
        classifier.add_rule(Box::new(CreateRoutineRule::new(config)));
        classifier.add_rule(Box::new(StartRoutineRule::new(config, normalizer.clone())));
        classifier.add_rule(Box::new(CompleteActivityRule::new(config, normalizer.clone())));
        classifier.add_rule(Box::new(AchievementSharingRule::new(config, normalizer)));
        classifier
    }

    pub fn add_rule(&mut self, rule: Box<dyn IntentRule>) {
        self.rules.push(rule);
    }

    /// Route the utterance through the rules. First match wins; no match is `Intent::None`.
    pub fn classify(&self, raw: &str, child: &ChildContext) -> Intent {
        let utterance = self.normalizer.utterance(raw);
        if utterance.normalized.is_empty() {
            return Intent::None;
        }
        for rule in &self.rules {
            if let Some(intent) = rule.evaluate(&utterance, child) {
                tracing::debug!("IntentClassifier: rule '{}' matched → {}", rule.name(), intent.kind().as_str());
                return intent;
            }
        }
        Intent::None
    }
}

// ============================================================================
// Built-in rules
// ============================================================================

fn normalized_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|p| normalize_text(p))
        .filter(|p| !p.is_empty())
        .collect()
}

/// "make a morning routine", "new routine", "plan my day".
pub struct CreateRoutineRule {
    phrases: Vec<String>,
    verbs: Vec<String>,
    nouns: Vec<String>,
    hints: HintExtractor,
}

impl CreateRoutineRule {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            phrases: normalized_list(&config.create_phrases),
            verbs: normalized_list(&config.create_verbs),
            nouns: normalized_list(&config.routine_nouns),
            hints: HintExtractor::from_config(config),
        }
    }
}

impl IntentRule for CreateRoutineRule {
    fn evaluate(&self, utterance: &Utterance, _child: &ChildContext) -> Option<Intent> {
        let text = &utterance.normalized;
        let matched = self.phrases.iter().any(|p| contains_phrase(text, p))
            || (contains_word(text, &self.verbs) && contains_word(text, &self.nouns));
        matched.then(|| Intent::CreateRoutine(self.hints.extract(&utterance.raw)))
    }

    fn name(&self) -> &str { "create_routine" }
}

/// "let's start my morning routine", "time for bedtime".
pub struct StartRoutineRule {
    phrases: Vec<String>,
    verbs: Vec<String>,
    nouns: Vec<String>,
    threshold: f64,
    normalizer: Arc<TextNormalizer>,
}

impl StartRoutineRule {
    pub fn new(config: &ClassifierConfig, normalizer: Arc<TextNormalizer>) -> Self {
        Self {
            phrases: normalized_list(&config.start_phrases),
            verbs: normalized_list(&config.start_verbs),
            nouns: normalized_list(&config.routine_nouns),
            threshold: config.match_threshold,
            normalizer,
        }
    }

    /// Tokens left once trigger words and routine nouns are removed.
    fn name_tokens(&self, text: &str) -> Vec<String> {
        self.normalizer
            .content_tokens(text)
            .into_iter()
            .filter(|t| {
                !self.nouns.contains(t)
                    && !self.verbs.contains(t)
                    && !self.phrases.iter().any(|p| p.split(' ').any(|w| w == t))
            })
            .collect()
    }
}

impl IntentRule for StartRoutineRule {
    fn evaluate(&self, utterance: &Utterance, child: &ChildContext) -> Option<Intent> {
        let text = &utterance.normalized;
        let matched = self.phrases.iter().any(|p| contains_phrase(text, p))
            || (contains_word(text, &self.verbs) && contains_word(text, &self.nouns));
        if !matched {
            return None;
        }

        let wanted = self.name_tokens(text);
        let mut best: Option<(i64, f64)> = None;
        for routine in &child.routines {
            let score = overlap_score(&self.name_tokens(&routine.name), &wanted);
            tracing::trace!("routine '{}' scored {:.3}", routine.name, score);
            if score + SCORE_EPSILON >= self.threshold
                && best.map_or(true, |(_, s)| score > s + SCORE_EPSILON)
            {
                best = Some((routine.id, score));
            }
        }
        Some(Intent::StartRoutine {
            routine_id: best.map(|(id, _)| id),
            routine_hint: wanted.join(" "),
        })
    }

    fn name(&self) -> &str { "start_routine" }
}

/// "I finished brushing my teeth" against the child's open activities.
pub struct CompleteActivityRule {
    threshold: f64,
    normalizer: Arc<TextNormalizer>,
}

impl CompleteActivityRule {
    pub fn new(config: &ClassifierConfig, normalizer: Arc<TextNormalizer>) -> Self {
        Self {
            threshold: config.match_threshold,
            normalizer,
        }
    }

    fn candidates(&self, child: &ChildContext) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for session in child.sessions.iter().filter(|s| s.status == SessionStatus::InProgress) {
            let Some(routine) = child.routine(session.routine_id) else {
                continue;
            };
            for activity in routine.activities().iter().filter(|a| !a.completed) {
                candidates.push(Candidate {
                    session_id: session.id,
                    routine_id: routine.id,
                    activity_index: activity.position,
                    activity_name: activity.name.clone(),
                    tokens: self.normalizer.content_tokens(&activity.name),
                    aliases: self.normalizer.aliases_for(&activity.name),
                });
            }
        }
        candidates
    }
}

impl IntentRule for CompleteActivityRule {
    fn evaluate(&self, utterance: &Utterance, child: &ChildContext) -> Option<Intent> {
        if utterance.tokens.is_empty() {
            return None;
        }
        let candidates = self.candidates(child);
        let found = best_match(&candidates, &utterance.tokens, self.threshold)?;
        tracing::debug!(
            "Matched '{}' to activity {} '{}' (score {:.2})",
            utterance.raw,
            found.activity_index,
            found.activity_name,
            found.score
        );
        Some(Intent::CompleteActivity(ActivityRef {
            session_id: found.session_id,
            routine_id: found.routine_id,
            activity_index: found.activity_index,
            activity_name: found.activity_name,
            score: found.score,
        }))
    }

    fn name(&self) -> &str { "complete_activity" }
}

/// "I did it!" with nothing that names an activity.
pub struct AchievementSharingRule {
    phrases: Vec<String>,
    normalizer: Arc<TextNormalizer>,
}

impl AchievementSharingRule {
    pub fn new(config: &ClassifierConfig, normalizer: Arc<TextNormalizer>) -> Self {
        Self {
            phrases: normalized_list(&config.praise_phrases),
            normalizer,
        }
    }
}

impl IntentRule for AchievementSharingRule {
    fn evaluate(&self, utterance: &Utterance, child: &ChildContext) -> Option<Intent> {
        if !self.phrases.iter().any(|p| contains_phrase(&utterance.normalized, p)) {
            return None;
        }
        let tokens = self.normalizer.content_tokens(&utterance.normalized);
        let names_activity = child.routines.iter().any(|routine| {
            routine.activities().iter().any(|a| {
                shares_any_token(&self.normalizer.content_tokens(&a.name), &tokens)
                    || mentions_alias(&self.normalizer.aliases_for(&a.name), &tokens)
            })
        });
        (!names_activity).then_some(Intent::AchievementSharing)
    }

    fn name(&self) -> &str { "achievement_sharing" }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn routine(id: i64, name: &str, activities: &[&str]) -> Routine {
        let mut r = Routine::new(7, name, activities.iter().copied(), None, 0);
        r.id = id;
        r
    }

    fn context(routine: Routine) -> ChildContext {
        let mut session = RoutineSession::start(&routine, 0);
        session.id = 100 + routine.id;
        ChildContext {
            routines: vec![routine],
            sessions: vec![session],
        }
    }

    fn classifier() -> IntentClassifier {
        IntentClassifier::with_defaults(&ClassifierConfig::default())
    }

    #[test]
    fn test_complete_activity_match() {
        let ctx = context(routine(1, "Morning", &["brush teeth", "wash hands", "put on shoes"]));
        let intent = classifier().classify("I finished brushing my teeth", &ctx);
        assert_eq!(intent.kind(), IntentKind::CompleteActivity);
        assert_eq!(intent.activity_ref(), Some((101, 0)));

        let intent = classifier().classify("done with washing hands", &ctx);
        assert_eq!(intent.activity_ref(), Some((101, 1)));

        let intent = classifier().classify("I put on shoes", &ctx);
        assert_eq!(intent.activity_ref(), Some((101, 2)));
    }

    #[test]
    fn test_brushed_prefers_lowest_index() {
        let ctx = context(routine(1, "Morning", &["brush teeth", "eat breakfast", "brush hair"]));
        let intent = classifier().classify("brushed", &ctx);
        assert_eq!(intent.activity_ref(), Some((101, 0)));
    }

    #[test]
    fn test_completed_activities_are_not_candidates() {
        let mut r = routine(1, "Morning", &["brush teeth", "brush hair"]);
        r.mark_complete(0, 1).unwrap();
        let ctx = context(r);
        let intent = classifier().classify("I brushed", &ctx);
        assert_eq!(intent.activity_ref(), Some((101, 1)));
    }

    #[test]
    fn test_irregular_verb_matches() {
        let ctx = context(routine(1, "Morning", &["wake up", "eat breakfast"]));
        let intent = classifier().classify("I ate my breakfast!", &ctx);
        assert_eq!(intent.activity_ref(), Some((101, 1)));
        let intent = classifier().classify("I woke up", &ctx);
        assert_eq!(intent.activity_ref(), Some((101, 0)));
    }

    #[test]
    fn test_no_match_is_none() {
        let ctx = context(routine(1, "Morning", &["brush teeth"]));
        assert_eq!(classifier().classify("I like dinosaurs", &ctx), Intent::None);
        assert_eq!(classifier().classify("", &ctx), Intent::None);
        assert_eq!(classifier().classify("?!", &ctx), Intent::None);
    }

    #[test]
    fn test_achievement_sharing() {
        let ctx = context(routine(1, "Morning", &["brush teeth"]));
        assert_eq!(classifier().classify("I did it!", &ctx), Intent::AchievementSharing);
        assert_eq!(classifier().classify("Yay!", &ctx), Intent::AchievementSharing);
        // No open sessions: praise still counts when nothing names an activity
        let idle = ChildContext { routines: ctx.routines.clone(), sessions: vec![] };
        assert_eq!(classifier().classify("I did it", &idle), Intent::AchievementSharing);
    }

    #[test]
    fn test_praise_naming_an_activity_is_not_achievement() {
        // The activity is already done, so there is nothing left to match,
        // yet the utterance still names it.
        let mut r = routine(1, "Morning", &["brush teeth"]);
        r.mark_complete(0, 1).unwrap();
        let ctx = ChildContext { routines: vec![r], sessions: vec![] };
        assert_eq!(classifier().classify("yay I did it, teeth are clean", &ctx), Intent::None);
    }

    #[test]
    fn test_word_containing_activity_name_does_not_complete_it() {
        let ctx = context(routine(1, "Bedtime", &["read", "go to bed"]));
        assert_eq!(classifier().classify("I'm ready!", &ctx), Intent::None);
        assert_eq!(classifier().classify("I read", &ctx).activity_ref(), Some((101, 0)));
    }

    #[test]
    fn test_praise_with_morning_routine_open() {
        let ctx = context(routine(
            1,
            "Morning",
            &["wake up", "brush teeth", "get dressed", "eat breakfast"],
        ));
        assert_eq!(classifier().classify("Great job!", &ctx), Intent::AchievementSharing);
        assert_eq!(classifier().classify("I did it!", &ctx), Intent::AchievementSharing);
    }

    #[test]
    fn test_synonyms_match_their_activity() {
        let ctx = context(routine(1, "Bedtime", &["put on shoes", "take a bath", "put on pajamas"]));
        let intent = classifier().classify("I'm in my pjs", &ctx);
        match intent {
            Intent::CompleteActivity(done) => {
                assert_eq!(done.activity_index, 2);
                assert_eq!(done.activity_name, "put on pajamas");
            }
            other => panic!("expected complete_activity, got {:?}", other),
        }
        assert_eq!(classifier().classify("I showered", &ctx).activity_ref(), Some((101, 1)));

        let ctx = context(routine(2, "Morning", &["brush teeth", "eat dinner"]));
        assert_eq!(classifier().classify("used my toothbrush", &ctx).activity_ref(), Some((102, 0)));
        assert_eq!(classifier().classify("supper is done", &ctx).activity_ref(), Some((102, 1)));
    }

    #[test]
    fn test_praise_using_a_synonym_is_not_achievement() {
        let mut r = routine(1, "Bedtime", &["put on pajamas"]);
        r.mark_complete(0, 1).unwrap();
        let ctx = ChildContext { routines: vec![r], sessions: vec![] };
        assert_eq!(classifier().classify("yay my jammies", &ctx), Intent::None);
    }

    #[test]
    fn test_create_routine() {
        let ctx = ChildContext::default();
        let intent = classifier().classify("Can you help me make a bedtime routine at 7:30 pm?", &ctx);
        match intent {
            Intent::CreateRoutine(hint) => {
                assert_eq!(hint.name.as_deref(), Some("Bedtime Routine"));
                assert_eq!(hint.time_of_day.as_deref(), Some("bedtime"));
                assert_eq!(hint.schedule_time.as_deref(), Some("19:30"));
            }
            other => panic!("expected create_routine, got {:?}", other),
        }
        assert_eq!(classifier().classify("plan my day", &ctx).kind(), IntentKind::CreateRoutine);
    }

    #[test]
    fn test_start_routine_matches_child_routine() {
        let ctx = ChildContext {
            routines: vec![
                routine(1, "Morning Routine", &["brush teeth"]),
                routine(2, "Bedtime", &["bath"]),
            ],
            sessions: vec![],
        };
        let intent = classifier().classify("Let's start my bedtime routine", &ctx);
        assert_eq!(
            intent,
            Intent::StartRoutine { routine_id: Some(2), routine_hint: "bedtime".into() }
        );

        let intent = classifier().classify("time for the morning", &ctx);
        assert_eq!(intent.kind(), IntentKind::StartRoutine);
        match intent {
            Intent::StartRoutine { routine_id, .. } => assert_eq!(routine_id, Some(1)),
            _ => unreachable!(),
        }

        let intent = classifier().classify("can we start the swimming routine", &ctx);
        assert_eq!(
            intent,
            Intent::StartRoutine { routine_id: None, routine_hint: "swimming".into() }
        );
    }

    #[test]
    fn test_intent_result_shape() {
        let ctx = context(routine(1, "Morning", &["brush teeth"]));
        let intent = classifier().classify("done with brush teeth", &ctx);
        let result = IntentResult::from(&intent);
        assert_eq!(result.intent, IntentKind::CompleteActivity);
        assert_eq!(result.activity_ref, Some((101, 0)));
        assert_eq!(result.routine_hint, None);

        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["intent"], "complete_activity");
        assert_eq!(json["activity_index"], 0);
    }

    #[test]
    fn test_custom_rule_runs_after_defaults() {
        struct Goodnight;
        impl IntentRule for Goodnight {
            fn evaluate(&self, u: &Utterance, _c: &ChildContext) -> Option<Intent> {
                (u.normalized == "goodnight").then_some(Intent::AchievementSharing)
            }
            fn name(&self) -> &str { "goodnight" }
        }
        let mut c = classifier();
        c.add_rule(Box::new(Goodnight));
        assert_eq!(c.classify("Goodnight!", &ChildContext::default()), Intent::AchievementSharing);
    }
}
