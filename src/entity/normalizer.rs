use serde::Serialize;
use std::cmp::Ordering;
use strsim::normalized_damerau_levenshtein;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::MatcherError;
use crate::TARGET_MATCH;

/// Threshold used when searching stored entities for a free-text name
pub const DEFAULT_LOOKUP_THRESHOLD: f64 = 60.0;
/// Threshold used before replacing an existing entity's records
pub const DEFAULT_IDENTITY_THRESHOLD: f64 = 65.0;

// Tokens that carry no identity in club names
const NOISE_TOKENS: &[&str] = &["fc", "cf", "afc", "sc", "the"];

// Minimum per-token similarity for a typo to earn partial credit
const TYPO_FLOOR: f64 = 0.8;

/// Apply basic normalization: Unicode decomposition, accents, case, punctuation, whitespace
pub fn normalize(name: &str) -> String {
    name.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| *c != '\'' && *c != '\u{2019}')
        .collect::<String>()
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric(), " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn identity_tokens(normalized: &str) -> Vec<&str> {
    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .filter(|t| !NOISE_TOKENS.contains(t))
        .collect();
    if tokens.is_empty() {
        normalized.split_whitespace().collect()
    } else {
        tokens
    }
}

/// `short` abbreviates `long` when it starts with the same letter and its
/// characters appear in order ("man"/"manchester", "utd"/"united").
fn is_abbreviation(short: &str, long: &str) -> bool {
    if short.chars().count() < 2 || short.chars().count() >= long.chars().count() {
        return false;
    }
    let mut long_chars = long.chars();
    let mut short_chars = short.chars();
    if short_chars.next() != long_chars.next() {
        return false;
    }
    short_chars.all(|c| long_chars.any(|l| l == c))
}

fn token_similarity(a: &str, b: &str) -> f64 {
    if a == b || is_abbreviation(a, b) || is_abbreviation(b, a) {
        return 1.0;
    }
    let similarity = normalized_damerau_levenshtein(a, b);
    if similarity >= TYPO_FLOOR {
        similarity
    } else {
        0.0
    }
}

/// Similarity of two names on a 0-100 scale.
///
/// Symmetric and deterministic: every token on each side is credited with its
/// best counterpart on the other side, and the credits are averaged over all
/// tokens of both names.
pub fn score(a: &str, b: &str) -> f64 {
    let norm_a = normalize(a);
    let norm_b = normalize(b);
    if norm_a.is_empty() || norm_b.is_empty() {
        return 0.0;
    }
    if norm_a == norm_b {
        return 100.0;
    }

    let tokens_a = identity_tokens(&norm_a);
    let tokens_b = identity_tokens(&norm_b);

    let best = |token: &str, others: &[&str]| {
        others
            .iter()
            .map(|other| token_similarity(token, other))
            .fold(0.0_f64, f64::max)
    };

    let credit_a: f64 = tokens_a.iter().map(|t| best(t, &tokens_b)).sum();
    let credit_b: f64 = tokens_b.iter().map(|t| best(t, &tokens_a)).sum();
    let total = (tokens_a.len() + tokens_b.len()) as f64;

    100.0 * (credit_a + credit_b) / total
}

/// A stored name together with its similarity to the queried name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameMatch {
    pub name: String,
    pub score: f64,
}

/// Result of deciding whether a scraped name denotes an existing entity
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Same(NameMatch),
    Ambiguous(Vec<NameMatch>),
    New,
}

/// Fuzzy comparator with the two thresholds kept apart.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    lookup_threshold: f64,
    identity_threshold: f64,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self {
            lookup_threshold: DEFAULT_LOOKUP_THRESHOLD,
            identity_threshold: DEFAULT_IDENTITY_THRESHOLD,
        }
    }
}

impl SimilarityMatcher {
    pub fn new(lookup_threshold: f64, identity_threshold: f64) -> Result<Self, MatcherError> {
        let in_range = |t: f64| (0.0..=100.0).contains(&t);
        if !in_range(lookup_threshold) || !in_range(identity_threshold) {
            return Err(MatcherError::OutOfRange {
                lookup: lookup_threshold,
                identity: identity_threshold,
            });
        }
        if identity_threshold < lookup_threshold {
            return Err(MatcherError::IdentityBelowLookup {
                lookup: lookup_threshold,
                identity: identity_threshold,
            });
        }
        Ok(Self {
            lookup_threshold,
            identity_threshold,
        })
    }

    pub fn lookup_threshold(&self) -> f64 {
        self.lookup_threshold
    }

    pub fn identity_threshold(&self) -> f64 {
        self.identity_threshold
    }

    pub fn score(&self, a: &str, b: &str) -> f64 {
        score(a, b)
    }

    pub fn is_same_entity(&self, a: &str, b: &str) -> bool {
        score(a, b) >= self.identity_threshold
    }

    fn ranked<'a, I>(&self, name: &str, candidates: I, threshold: f64) -> Vec<NameMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut matches: Vec<NameMatch> = candidates
            .into_iter()
            .map(|candidate| NameMatch {
                name: candidate.to_string(),
                score: score(name, candidate),
            })
            .filter(|m| m.score >= threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        matches.dedup_by(|a, b| normalize(&a.name) == normalize(&b.name));
        matches
    }

    /// Every candidate at or above the lookup threshold, best first.
    pub fn lookup<'a, I>(&self, name: &str, candidates: I) -> Vec<NameMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let matches = self.ranked(name, candidates, self.lookup_threshold);
        debug!(
            target: TARGET_MATCH,
            "Lookup '{}' found {} candidate(s) at threshold {}",
            name, matches.len(), self.lookup_threshold
        );
        matches
    }

    /// Decide whether `name` is one of `candidates` using the identity threshold.
    ///
    /// An exact normalized match always wins. Otherwise the unique top scorer is
    /// the same entity; a tie at the top is ambiguous.
    pub fn reconcile<'a, I>(&self, name: &str, candidates: I) -> Reconciliation
    where
        I: IntoIterator<Item = &'a str>,
    {
        let normalized = normalize(name);
        let matches = self.ranked(name, candidates, self.identity_threshold);

        if let Some(exact) = matches.iter().find(|m| normalize(&m.name) == normalized) {
            return Reconciliation::Same(exact.clone());
        }

        let Some(top) = matches.first() else {
            return Reconciliation::New;
        };

        let tied: Vec<NameMatch> = matches
            .iter()
            .filter(|m| m.score == top.score)
            .cloned()
            .collect();

        if tied.len() > 1 {
            debug!(
                target: TARGET_MATCH,
                "Reconciling '{}' is ambiguous between {:?}",
                name,
                tied.iter().map(|m| &m.name).collect::<Vec<_>>()
            );
            Reconciliation::Ambiguous(tied)
        } else {
            debug!(
                target: TARGET_MATCH,
                "Reconciled '{}' to existing '{}' (score {:.1})", name, top.name, top.score
            );
            Reconciliation::Same(top.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_normalization() {
        assert_eq!(normalize("Manchester United"), "manchester united");
        assert_eq!(normalize(" Paris  Saint-Germain "), "paris saint germain");
        assert_eq!(normalize("Atlético Madrid"), "atletico madrid");
        assert_eq!(normalize("Newell's Old Boys"), "newells old boys");
    }

    #[test]
    fn test_identity_examples() {
        let matcher = SimilarityMatcher::default();

        assert!(matcher.score("Manchester United", "Man United") >= 65.0);
        assert!(matcher.score("Manchester United", "Manchester City") < 65.0);
        assert!(matcher.is_same_entity("Man Utd", "Manchester United"));
        assert!(matcher.is_same_entity("Chelsea FC", "Chelsea"));
        assert!(matcher.is_same_entity("Tottenham Hotspurs", "Tottenham Hotspur"));

        assert!(!matcher.is_same_entity("Real Madrid", "Atletico Madrid"));
        assert!(!matcher.is_same_entity("Arsenal", "Aston Villa"));
    }

    #[test]
    fn test_score_is_symmetric_and_bounded() {
        let pairs = [
            ("Manchester United", "Man Utd"),
            ("Lionel Messi", "Messi"),
            ("Bayern Munich", "Borussia Dortmund"),
            ("Inter", "Internazionale Milano"),
        ];
        for (a, b) in pairs {
            let forward = score(a, b);
            assert_eq!(forward, score(b, a), "{} / {}", a, b);
            assert!((0.0..=100.0).contains(&forward));
        }
        assert_eq!(score("Chelsea", "chelsea"), 100.0);
        assert_eq!(score("", "Chelsea"), 0.0);
    }

    #[test]
    fn test_abbreviations() {
        assert!(is_abbreviation("man", "manchester"));
        assert!(is_abbreviation("utd", "united"));
        assert!(!is_abbreviation("city", "united"));
        assert!(!is_abbreviation("u", "united"));
        assert!(!is_abbreviation("united", "utd"));
    }

    #[test]
    fn test_lookup_returns_every_plausible_match() {
        let matcher = SimilarityMatcher::default();
        let stored = ["Manchester United", "Manchester City", "Liverpool"];

        let matches = matcher.lookup("Manchester", stored);
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Manchester City", "Manchester United"]);

        let matches = matcher.lookup("liverpool", stored);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 100.0);

        assert!(matcher.lookup("Juventus", stored).is_empty());
    }

    #[test]
    fn test_reconcile_outcomes() {
        let matcher = SimilarityMatcher::default();
        let stored = ["Manchester United", "Manchester City", "Chelsea"];

        match matcher.reconcile("Man United", stored) {
            Reconciliation::Same(m) => assert_eq!(m.name, "Manchester United"),
            other => panic!("expected a match, got {:?}", other),
        }
        match matcher.reconcile("chelsea", stored) {
            Reconciliation::Same(m) => assert_eq!(m.score, 100.0),
            other => panic!("expected a match, got {:?}", other),
        }
        assert_eq!(matcher.reconcile("Everton", stored), Reconciliation::New);
    }

    #[test]
    fn test_reconcile_tie_is_ambiguous() {
        let matcher = SimilarityMatcher::default();
        let stored = ["Real Madrid Castilla", "Real Madrid Femenino"];

        match matcher.reconcile("Real Madrid", stored) {
            Reconciliation::Ambiguous(candidates) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_threshold_validation() {
        assert!(SimilarityMatcher::new(60.0, 65.0).is_ok());
        assert!(SimilarityMatcher::new(70.0, 65.0).is_err());
        assert!(SimilarityMatcher::new(60.0, 120.0).is_err());
    }
}
