//! Token-overlap scoring between an utterance and activity names.

use serde::Serialize;

use crate::normalize::contains_phrase;

/// Scores closer than this are treated as a tie.
pub const SCORE_EPSILON: f64 = 1e-9;

const EXACT_CREDIT: f64 = 1.0;
const STEM_CREDIT: f64 = 0.9;
const SUBSTRING_CREDIT: f64 = 0.6;
const MIN_SUBSTRING_LEN: usize = 3;
/// Score given to an activity when the utterance uses one of its synonyms.
pub const SYNONYM_CREDIT: f64 = 0.9;

/// Crude suffix stripping: "brushing" and "brushed" both become "brush",
/// "running" becomes "run".
pub fn stem(word: &str) -> String {
    let len = word.len();
    let (base, verbal) = if len > 5 && word.ends_with("ing") {
        (&word[..len - 3], true)
    } else if len > 4 && word.ends_with("ed") {
        (&word[..len - 2], true)
    } else if len > 3 && word.ends_with('s') && !word.ends_with("ss") {
        (&word[..len - 1], false)
    } else {
        (word, false)
    };

    if verbal {
        let bytes = base.as_bytes();
        let n = bytes.len();
        if n >= 2 && bytes[n - 1] == bytes[n - 2] && b"bdgmnprt".contains(&bytes[n - 1]) {
            return base[..n - 1].to_string();
        }
    }
    base.to_string()
}

/// Credit one utterance token earns against one activity token.
pub fn token_credit(activity_token: &str, utterance_token: &str) -> f64 {
    if activity_token == utterance_token {
        return EXACT_CREDIT;
    }
    if stem(activity_token) == stem(utterance_token) {
        return STEM_CREDIT;
    }
    let (short, long) = if activity_token.len() <= utterance_token.len() {
        (activity_token, utterance_token)
    } else {
        (utterance_token, activity_token)
    };
    if short.len() >= MIN_SUBSTRING_LEN && long.contains(short) {
        return SUBSTRING_CREDIT;
    }
    0.0
}

fn best_credit(activity_token: &str, utterance_tokens: &[String]) -> f64 {
    utterance_tokens
        .iter()
        .map(|u| token_credit(activity_token, u))
        .fold(0.0, f64::max)
}

/// Order-independent overlap: each activity token takes its best credit from
/// any utterance token, averaged over the activity's tokens.
///
/// Substring credit only counts once some activity token has an exact or
/// stem match, so "ready" alone never scores against "read".
pub fn overlap_score(activity_tokens: &[String], utterance_tokens: &[String]) -> f64 {
    if activity_tokens.is_empty() || utterance_tokens.is_empty() {
        return 0.0;
    }
    let credits: Vec<f64> = activity_tokens
        .iter()
        .map(|a| best_credit(a, utterance_tokens))
        .collect();
    if !credits.iter().any(|c| *c >= STEM_CREDIT) {
        return 0.0;
    }
    credits.iter().sum::<f64>() / activity_tokens.len() as f64
}

/// Whether any utterance token matches one of `activity_tokens` exactly or by stem.
pub fn shares_any_token(activity_tokens: &[String], utterance_tokens: &[String]) -> bool {
    activity_tokens
        .iter()
        .any(|a| best_credit(a, utterance_tokens) >= STEM_CREDIT)
}

/// Whether `utterance_tokens` contain one of `aliases` as a whole phrase.
pub fn mentions_alias(aliases: &[String], utterance_tokens: &[String]) -> bool {
    if aliases.is_empty() {
        return false;
    }
    let joined = utterance_tokens.join(" ");
    aliases.iter().any(|alias| contains_phrase(&joined, alias))
}

/// An incomplete activity the utterance may refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub session_id: i64,
    pub routine_id: i64,
    pub activity_index: usize,
    pub activity_name: String,
    pub tokens: Vec<String>,
    /// Synonyms that refer to this activity as a whole.
    pub aliases: Vec<String>,
}

impl Candidate {
    pub fn score(&self, utterance_tokens: &[String]) -> f64 {
        let overlap = overlap_score(&self.tokens, utterance_tokens);
        if mentions_alias(&self.aliases, utterance_tokens) {
            overlap.max(SYNONYM_CREDIT)
        } else {
            overlap
        }
    }
}

/// The winning candidate and its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub session_id: i64,
    pub routine_id: i64,
    pub activity_index: usize,
    pub activity_name: String,
    pub score: f64,
}

/// Highest-scoring candidate at or above `threshold`. Ties go to the lowest
/// activity index, then to the earlier candidate.
pub fn best_match<'a, I>(candidates: I, utterance_tokens: &[String], threshold: f64) -> Option<ScoredMatch>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    let mut best: Option<(&Candidate, f64)> = None;
    for candidate in candidates {
        let score = candidate.score(utterance_tokens);
        tracing::trace!("candidate '{}' scored {:.3}", candidate.activity_name, score);
        if score + SCORE_EPSILON < threshold {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                score > current_score + SCORE_EPSILON
                    || ((score - current_score).abs() <= SCORE_EPSILON
                        && candidate.activity_index < current.activity_index)
            }
        };
        if better {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, score)| ScoredMatch {
        session_id: c.session_id,
        routine_id: c.routine_id,
        activity_index: c.activity_index,
        activity_name: c.activity_name.clone(),
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn candidate(index: usize, name: &str) -> Candidate {
        Candidate {
            session_id: 1,
            routine_id: 1,
            activity_index: index,
            activity_name: name.to_string(),
            tokens: toks(name),
            aliases: Vec::new(),
        }
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("brushing"), "brush");
        assert_eq!(stem("brushed"), "brush");
        assert_eq!(stem("running"), "run");
        assert_eq!(stem("hands"), "hand");
        assert_eq!(stem("dressed"), "dress");
        assert_eq!(stem("glass"), "glass");
        assert_eq!(stem("bed"), "bed");
        assert_eq!(stem("sing"), "sing");
    }

    #[test]
    fn test_token_credit_tiers() {
        assert_eq!(token_credit("teeth", "teeth"), 1.0);
        assert_eq!(token_credit("brush", "brushed"), 0.9);
        assert_eq!(token_credit("tooth", "toothbrush"), 0.6);
        assert_eq!(token_credit("on", "pony"), 0.0);
        assert_eq!(token_credit("wash", "brush"), 0.0);
    }

    #[test]
    fn test_overlap_is_order_independent() {
        let a = overlap_score(&toks("brush teeth"), &toks("teeth brushing"));
        let b = overlap_score(&toks("brush teeth"), &toks("brushing teeth"));
        assert!((a - b).abs() < 1e-12);
        assert!((a - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_partial_credit_for_brush_teeth() {
        assert!(overlap_score(&toks("brush teeth"), &toks("brushed")) >= 0.4);
        assert!(overlap_score(&toks("brush teeth"), &toks("teeth clean")) >= 0.4);
        assert_eq!(overlap_score(&toks("brush teeth"), &[]), 0.0);
    }

    #[test]
    fn test_substring_alone_is_not_a_match() {
        assert_eq!(overlap_score(&toks("read"), &toks("ready")), 0.0);
        assert_eq!(overlap_score(&toks("eat breakfast"), &toks("great job")), 0.0);
        // Backed by a stem hit, the substring still adds credit
        let backed = overlap_score(&toks("brush tooth"), &toks("brushed toothbrush"));
        assert!((backed - 0.75).abs() < 1e-9);

        let candidates = vec![candidate(0, "read"), candidate(1, "go bed")];
        assert!(best_match(&candidates, &toks("ready"), 0.4).is_none());
    }

    #[test]
    fn test_shares_any_token_ignores_substrings() {
        assert!(!shares_any_token(&toks("eat breakfast"), &toks("great job")));
        assert!(shares_any_token(&toks("eat breakfast"), &toks("eating")));
    }

    #[test]
    fn test_alias_lifts_candidate() {
        let mut pajamas = candidate(1, "put on pajamas");
        pajamas.aliases = vec!["pjs".to_string(), "sleeping clothes".to_string()];
        assert_eq!(pajamas.score(&toks("in pjs")), SYNONYM_CREDIT);
        assert_eq!(pajamas.score(&toks("sleeping clothes on")), SYNONYM_CREDIT);
        assert_eq!(pajamas.score(&toks("clothes")), 0.0);
        assert_eq!(pajamas.score(&toks("put on pajamas")), 1.0);

        let candidates = vec![candidate(0, "put on shoes"), pajamas];
        let m = best_match(&candidates, &toks("in pjs"), 0.4).unwrap();
        assert_eq!(m.activity_index, 1);
    }

    #[test]
    fn test_tie_breaks_to_lowest_index() {
        let candidates = vec![candidate(2, "brush hair"), candidate(0, "brush teeth")];
        let m = best_match(&candidates, &toks("brushed"), 0.4).unwrap();
        assert_eq!(m.activity_index, 0);
        assert_eq!(m.activity_name, "brush teeth");
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let candidates = vec![candidate(0, "put on shoes")];
        assert!(best_match(&candidates, &toks("pizza"), 0.4).is_none());
    }

    #[test]
    fn test_higher_score_beats_lower_index() {
        let candidates = vec![candidate(0, "brush hair"), candidate(1, "brush teeth")];
        let m = best_match(&candidates, &toks("brushing teeth"), 0.4).unwrap();
        assert_eq!(m.activity_index, 1);
    }
}
