//! Multi-signal name similarity.
//!
//! A score is a weighted mean of up to three components computed on
//! expanded-normalized names:
//! - Levenshtein similarity over the whole string
//! - token overlap over meaningful words
//! - a mill-only semantic bonus from the `Company - City, ST` structure
//!
//! Components that have nothing to measure (no meaningful words on either
//! side, or a customer name for the semantic bonus) drop out and the remaining
//! weights are rescaled.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::normalize::{normalize, Normalizer};

/// Levenshtein similarity at or above which two words or cities are treated
/// as the same (typo tolerance).
pub const NEAR_DUPLICATE: f64 = 0.85;

/// Separators between company and location in mill names.
const LOCATION_SEPARATORS: [&str; 3] = [" - ", " \u{2013} ", " \u{2014} "];

const COMPANY_POINTS: f64 = 0.5;
const COMPANY_NEAR_POINTS: f64 = 0.4;
const CITY_POINTS: f64 = 0.3;
const STATE_POINTS: f64 = 0.2;

/// Relative weight of each score component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreWeights {
    pub levenshtein: f64,
    pub token_overlap: f64,
    pub semantic: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            levenshtein: 0.50,
            token_overlap: 0.30,
            semantic: 0.20,
        }
    }
}

/// Company / city / state decomposition of a mill name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MillParts {
    pub company: String,
    pub city: String,
    pub state: Option<String>,
}

/// `1 - distance / max_len`, over chars. Two empty strings are identical.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / max_len as f64
}

fn near_duplicate(a: &str, b: &str) -> bool {
    a == b || levenshtein_similarity(a, b) >= NEAR_DUPLICATE
}

/// Shared meaningful words over the smaller set.
///
/// Returns `None` when both sets are empty (nothing to compare) and `0.0`
/// when exactly one is.
pub fn token_overlap(a: &[&str], b: &[&str]) -> Option<f64> {
    let a: HashSet<&str> = a.iter().copied().collect();
    let b: HashSet<&str> = b.iter().copied().collect();
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return None,
        (true, false) | (false, true) => return Some(0.0),
        _ => {}
    }

    let smaller = a.len().min(b.len());
    let a_in_b = a.iter().filter(|t| b.iter().any(|u| near_duplicate(t, u))).count();
    let b_in_a = b.iter().filter(|t| a.iter().any(|u| near_duplicate(t, u))).count();
    let shared = a_in_b.min(b_in_a).min(smaller);
    Some(shared as f64 / smaller as f64)
}

/// Scores pairs of names. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct Scorer {
    normalizer: Normalizer,
    weights: ScoreWeights,
}

impl Scorer {
    pub fn new(normalizer: Normalizer, weights: ScoreWeights) -> Self {
        Self {
            normalizer,
            weights,
        }
    }

    /// Similarity of two raw names in [0, 1]. Symmetric; identical names
    /// (after normalization and expansion) score exactly 1.0.
    pub fn score(&self, a: &str, b: &str, entity_type: EntityType) -> f64 {
        let ea = self.normalizer.comparable(a);
        let eb = self.normalizer.comparable(b);
        if ea == eb {
            return 1.0;
        }

        let mut earned = self.weights.levenshtein * levenshtein_similarity(&ea, &eb);
        let mut possible = self.weights.levenshtein;

        let ta = self.normalizer.tokenize(&ea);
        let tb = self.normalizer.tokenize(&eb);
        if let Some(overlap) = token_overlap(&ta, &tb) {
            earned += self.weights.token_overlap * overlap;
            possible += self.weights.token_overlap;
        }

        if entity_type == EntityType::Mill {
            if let Some(bonus) = self.semantic_bonus(a, b) {
                earned += self.weights.semantic * bonus;
                possible += self.weights.semantic;
            }
        }

        if possible <= 0.0 {
            return 0.0;
        }
        (earned / possible).clamp(0.0, 1.0)
    }

    /// Decompose a mill name into company, city and state.
    ///
    /// `"Canfor - DeQuincy, LA"` splits at the separator. Without a separator
    /// the longest known company prefix is used, then a trailing state code.
    /// Otherwise the whole normalized name is the company.
    pub fn extract_parts(&self, raw: &str) -> MillParts {
        let raw = raw.trim();

        for sep in LOCATION_SEPARATORS {
            if let Some((company, rest)) = raw.split_once(sep) {
                let rest = rest.trim();
                let (city, state) = match rest.split_once(',') {
                    Some((city, state)) => {
                        let state = state.trim().to_ascii_uppercase();
                        (city.trim().to_string(), (!state.is_empty()).then_some(state))
                    }
                    None => self.normalizer.strip_trailing_state(rest),
                };
                return MillParts {
                    company: company.trim().to_string(),
                    city,
                    state,
                };
            }
        }

        if let Some(split) = self.normalizer.split_company(raw) {
            return MillParts {
                company: split.company,
                city: split.remainder,
                state: split.state,
            };
        }

        MillParts {
            company: normalize(raw),
            ..MillParts::default()
        }
    }

    /// Fraction of the attainable company/city/state points earned. Only
    /// parts present on both sides count. `None` when no part is comparable.
    fn semantic_bonus(&self, a: &str, b: &str) -> Option<f64> {
        let pa = self.extract_parts(a);
        let pb = self.extract_parts(b);
        let mut earned = 0.0;
        let mut possible = 0.0;

        if !pa.company.is_empty() && !pb.company.is_empty() {
            possible += COMPANY_POINTS;
            let ca = self.normalizer.canonical_company(&pa.company);
            let cb = self.normalizer.canonical_company(&pb.company);
            if ca == cb {
                earned += COMPANY_POINTS;
            } else if levenshtein_similarity(&ca, &cb) > NEAR_DUPLICATE {
                earned += COMPANY_NEAR_POINTS;
            }
        }

        let city_a = normalize(&pa.city);
        let city_b = normalize(&pb.city);
        if !city_a.is_empty() && !city_b.is_empty() {
            possible += CITY_POINTS;
            if near_duplicate(&city_a, &city_b) {
                earned += CITY_POINTS;
            }
        }

        if let (Some(sa), Some(sb)) = (&pa.state, &pb.state) {
            possible += STATE_POINTS;
            if sa == sb {
                earned += STATE_POINTS;
            }
        }

        if possible > 0.0 {
            Some(earned / possible)
        } else {
            None
        }
    }

    /// Bucket keys for the candidate prefilter: meaningful words of the
    /// expanded name plus their 3-char prefixes. Names made only of noise
    /// words fall back to all their words.
    pub fn blocking_keys(&self, raw: &str) -> HashSet<String> {
        let expanded = self.normalizer.comparable(raw);
        let mut words = self.normalizer.tokenize(&expanded);
        if words.is_empty() {
            words = expanded.split_whitespace().collect();
        }

        let mut keys = HashSet::new();
        for word in words {
            keys.insert(word.to_string());
            let prefix: String = word.chars().take(3).collect();
            keys.insert(format!("{prefix}*"));
        }
        keys
    }
}
