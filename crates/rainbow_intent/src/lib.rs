pub mod classifier;
pub mod hints;
pub mod matcher;
pub mod normalize;

pub use classifier::{
    AchievementSharingRule, ActivityRef, ChildContext, CompleteActivityRule, CreateRoutineRule,
    Intent, IntentClassifier, IntentKind, IntentResult, IntentRule, StartRoutineRule,
};
pub use hints::{extract_schedule_time, HintExtractor, RoutineHint};
pub use matcher::{best_match, overlap_score, stem, token_credit, Candidate, ScoredMatch};
pub use normalize::{normalize_text, TextNormalizer, Utterance};
