//! Whole-word keyword scoring against the knowledge base.
//!
//! A ticket title qualifies for an entry when at least two distinct
//! keywords of that entry occur in the normalized title as whole words.
//! Substring hits inside longer words do not count ("log" must not fire
//! on "catalogo"). Keyword patterns are compiled once per catalog.

use std::cmp::Reverse;

use regex::Regex;
use thiserror::Error;

use crate::knowledge::KnowledgeBase;
use crate::normalize::normalize;

/// An entry qualifies only with at least this many distinct keyword hits.
/// A single hit is too ambiguous to wake anyone up for.
pub const MIN_KEYWORD_HITS: usize = 2;

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("cannot compile pattern for keyword {keyword:?}: {source}")]
    Pattern {
        keyword: String,
        source: regex::Error,
    },
}

/// One qualifying knowledge entry for a ticket title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub entry_title: String,
    pub category: String,
    /// Which knowledge system the entry belongs to.
    pub system: String,
    pub hit_count: usize,
}

struct CompiledEntry {
    title: String,
    category: String,
    system: String,
    patterns: Vec<Regex>,
}

/// Keyword scorer, compiled once per knowledge base.
pub struct Matcher {
    entries: Vec<CompiledEntry>,
}

impl Matcher {
    /// Normalize and compile every keyword of every entry.
    ///
    /// Keywords that normalize to the same string count as one (hits are
    /// per *distinct* keyword); keywords that normalize to nothing are
    /// dropped.
    pub fn compile(kb: &KnowledgeBase) -> Result<Self, MatcherError> {
        let mut entries = Vec::new();
        for (system, entry) in kb.entries() {
            let mut seen: Vec<String> = Vec::new();
            let mut patterns = Vec::new();
            for keyword in &entry.keywords {
                let norm = normalize(keyword);
                if norm.is_empty() || seen.contains(&norm) {
                    continue;
                }
                let re = Regex::new(&format!(r"\b{}\b", regex::escape(&norm))).map_err(
                    |source| MatcherError::Pattern {
                        keyword: keyword.clone(),
                        source,
                    },
                )?;
                seen.push(norm);
                patterns.push(re);
            }
            entries.push(CompiledEntry {
                title: entry.title.clone(),
                category: entry.category.clone(),
                system: system.to_string(),
                patterns,
            });
        }
        Ok(Self { entries })
    }

    /// Score a raw ticket title against the whole catalog.
    ///
    /// Returns qualifying entries ranked by hit count descending; ties
    /// keep catalog order. An empty result is normal, not an error.
    pub fn score(&self, ticket_title: &str) -> Vec<MatchResult> {
        let title = normalize(ticket_title);
        if title.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<MatchResult> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let hits = entry
                    .patterns
                    .iter()
                    .filter(|re| re.is_match(&title))
                    .count();
                (hits >= MIN_KEYWORD_HITS).then(|| MatchResult {
                    entry_title: entry.title.clone(),
                    category: entry.category.clone(),
                    system: entry.system.clone(),
                    hit_count: hits,
                })
            })
            .collect();

        // sort_by_key is stable, so equal counts keep catalog order.
        results.sort_by_key(|r| Reverse(r.hit_count));
        results
    }

    /// Number of compiled entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}
