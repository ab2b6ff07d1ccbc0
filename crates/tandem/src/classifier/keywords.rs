//! Keyword sets and token-aligned phrase matching.

use serde::{Deserialize, Serialize};

use super::Route;

/// Keyword/phrase sets per route, injected through configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSets {
    /// Aggregation, counting and structured-field vocabulary
    pub sql: Vec<String>,
    /// Policy, explanation and descriptive vocabulary
    pub documents: Vec<String>,
    /// Connectives that ask for both kinds of answer at once
    pub hybrid: Vec<String>,
}

impl KeywordSets {
    pub fn for_route(&self, route: Route) -> &[String] {
        match route {
            Route::Sql => &self.sql,
            Route::Documents => &self.documents,
            Route::Hybrid => &self.hybrid,
        }
    }

    /// Every set needs at least one phrase with at least one token.
    pub fn validate(&self) -> Result<(), String> {
        for route in [Route::Sql, Route::Documents, Route::Hybrid] {
            let set = self.for_route(route);
            if set.is_empty() {
                return Err(format!("keyword set '{}' is empty", route));
            }
            if let Some(bad) = set.iter().find(|p| tokenize(p).is_empty()) {
                return Err(format!(
                    "keyword set '{}' contains a phrase with no words: {:?}",
                    route, bad
                ));
            }
        }
        Ok(())
    }
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self {
            sql: to_strings(&[
                "how many",
                "count",
                "number of",
                "total",
                "sum",
                "average",
                "avg",
                "maximum",
                "minimum",
                "list all",
                "top",
                "highest",
                "lowest",
                "per month",
                "per customer",
                "revenue",
                "sales",
                "orders",
                "customers",
                "products",
                "stock",
                "quantity",
            ]),
            documents: to_strings(&[
                "what is",
                "what are",
                "explain",
                "describe",
                "policy",
                "policies",
                "how does",
                "how do",
                "why",
                "guideline",
                "procedure",
                "documentation",
                "strategy",
                "overview",
                "terms",
            ]),
            hybrid: to_strings(&[
                "and explain",
                "and describe",
                "and why",
                "along with",
                "as well as",
                "together with",
                "combined with",
                "in context of",
            ]),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Lowercase and split on anything that is not alphanumeric.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// A keyword set prepared for matching.
#[derive(Debug, Clone)]
pub(crate) struct PhraseSet {
    phrases: Vec<(String, Vec<String>)>,
}

impl PhraseSet {
    /// Duplicate phrases (after normalisation) collapse into one entry so that
    /// tallies count distinct matches.
    pub(crate) fn compile(phrases: &[String]) -> Self {
        let mut compiled: Vec<(String, Vec<String>)> = Vec::with_capacity(phrases.len());
        for phrase in phrases {
            let tokens = tokenize(phrase);
            if tokens.is_empty() || compiled.iter().any(|(_, t)| *t == tokens) {
                continue;
            }
            compiled.push((tokens.join(" "), tokens));
        }
        Self { phrases: compiled }
    }

    /// Phrases whose token sequence occurs contiguously in `tokens`.
    pub(crate) fn matches(&self, tokens: &[String]) -> Vec<String> {
        self.phrases
            .iter()
            .filter(|(_, phrase)| {
                phrase.len() <= tokens.len() && tokens.windows(phrase.len()).any(|w| w == &phrase[..])
            })
            .map(|(display, _)| display.clone())
            .collect()
    }
}
