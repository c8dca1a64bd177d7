//! Text canonicalization for mill and customer names.
//!
//! `normalize` is dictionary-free and is the key used for every exact lookup
//! (alias index, canonical key). The [`Normalizer`] layers the configured
//! dictionaries on top: abbreviation expansion, noise-token removal and
//! company-prefix detection for mill names.

use std::collections::{HashMap, HashSet};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::dictionaries::Dictionaries;
use crate::entity::EntityType;

/// Lowercase, fold dashes/slashes/underscores to spaces, fold `&` to `and`,
/// drop all other punctuation and collapse whitespace.
///
/// Example: "Canfor_Southern-Pine, Inc." → "canfor southern pine inc"
pub fn normalize(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for c in raw.nfkd() {
        if is_combining_mark(c) {
            continue;
        }
        match c {
            '-' | '\u{2010}'..='\u{2015}' | '\u{2212}' | '/' | '\\' | '_' => folded.push(' '),
            '&' => folded.push_str(" and "),
            c if c.is_alphanumeric() => folded.extend(c.to_lowercase()),
            c if c.is_whitespace() => folded.push(' '),
            _ => {}
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the slug part of a canonical id: `mill_canfor_dequincy`, `cust_acme_builders_co`.
///
/// Returns `None` when the name has no ASCII alphanumerics to slug.
pub fn canonical_id_slug(entity_type: EntityType, name: &str) -> Option<String> {
    let slug = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        None
    } else {
        Some(format!("{}_{}", entity_type.id_prefix(), slug))
    }
}

/// A mill name split at a known company prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanySplit {
    /// Canonical company display name from the alias table.
    pub company: String,
    /// Normalized words after the company prefix, state code removed.
    pub remainder: String,
    /// Trailing two-letter state code, uppercase.
    pub state: Option<String>,
}

/// Dictionary-aware normalizer. Cheap to build, immutable once built.
#[derive(Debug, Clone)]
pub struct Normalizer {
    noise: HashSet<String>,
    states: HashSet<String>,
    expansions: HashMap<String, String>,
    /// (normalized alias, canonical company), longest alias first.
    company_aliases: Vec<(String, String)>,
    /// normalized alias -> canonical company, for exact lookups.
    company_index: HashMap<String, String>,
}

impl Normalizer {
    pub fn new(dictionaries: &Dictionaries) -> Self {
        let mut company_aliases: Vec<(String, String)> = dictionaries
            .mill_company_aliases
            .iter()
            .map(|(variant, company)| (normalize(variant), company.trim().to_string()))
            .filter(|(variant, company)| !variant.is_empty() && !company.is_empty())
            .collect();
        company_aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        company_aliases.dedup_by(|a, b| a.0 == b.0);

        let company_index = company_aliases.iter().cloned().collect();

        Self {
            noise: dictionaries.noise_tokens.iter().map(|t| normalize(t)).collect(),
            states: dictionaries
                .state_codes
                .iter()
                .map(|s| s.trim().to_ascii_uppercase())
                .collect(),
            expansions: dictionaries
                .company_expansions
                .iter()
                .map(|(k, v)| (normalize(k), normalize(v)))
                .collect(),
            company_aliases,
            company_index,
        }
    }

    /// Replace whole words found in the expansion table. Multi-word phrases
    /// are not matched.
    pub fn expand_abbreviations(&self, normalized: &str) -> String {
        normalized
            .split_whitespace()
            .map(|w| self.expansions.get(w).map(String::as_str).unwrap_or(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Meaningful words: noise tokens and single characters removed.
    pub fn tokenize<'s>(&self, normalized: &'s str) -> Vec<&'s str> {
        normalized
            .split_whitespace()
            .filter(|t| t.chars().count() > 1 && !self.noise.contains(*t))
            .collect()
    }

    /// The form names are scored in: normalized, then abbreviation-expanded.
    pub fn comparable(&self, raw: &str) -> String {
        self.expand_abbreviations(&normalize(raw))
    }

    /// Whether `word` is a configured two-letter state code (case-insensitive).
    pub fn is_state(&self, word: &str) -> bool {
        word.len() == 2 && self.states.contains(&word.to_ascii_uppercase())
    }

    /// Company form used for comparisons: alias table first, then
    /// abbreviation expansion. "Georgia-Pacific", "GP" and "gp" all become
    /// "georgia pacific".
    pub fn canonical_company(&self, company: &str) -> String {
        let norm = normalize(company);
        match self.company_index.get(&norm) {
            Some(canonical) => self.comparable(canonical),
            None => self.expand_abbreviations(&norm),
        }
    }

    /// Longest alias that is the whole name or a word-boundary prefix of it.
    pub fn split_company(&self, raw: &str) -> Option<CompanySplit> {
        let norm = normalize(raw);
        let (alias, company) = self.company_aliases.iter().find(|(alias, _)| {
            norm == *alias
                || (norm.len() > alias.len()
                    && norm.starts_with(alias.as_str())
                    && norm.as_bytes()[alias.len()] == b' ')
        })?;

        let rest = norm[alias.len()..].trim();
        let (remainder, state) = self.strip_trailing_state(rest);
        Some(CompanySplit {
            company: company.clone(),
            remainder,
            state,
        })
    }

    /// Split a trailing state code off a run of words.
    pub fn strip_trailing_state(&self, words: &str) -> (String, Option<String>) {
        let mut parts: Vec<&str> = words.split_whitespace().collect();
        match parts.last() {
            Some(last) if self.is_state(last) => {
                let state = last.to_ascii_uppercase();
                parts.pop();
                (parts.join(" "), Some(state))
            }
            _ => (parts.join(" "), None),
        }
    }
}
