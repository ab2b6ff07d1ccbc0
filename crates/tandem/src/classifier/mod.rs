//! Query route classification.
//!
//! Deterministic keyword scoring over three injected phrase sets. No model,
//! no I/O and no state that changes between calls, so one classifier can be
//! shared across concurrent requests without synchronisation.
//!
//! Decision rule, in priority order:
//!
//! 1. `Hybrid` when a hybrid phrase matched and both the SQL and document sets
//!    matched at least once.
//! 2. `Sql` when SQL matches outnumber document matches.
//! 3. `Documents` when document matches outnumber SQL matches.
//! 4. Otherwise the configured tie route (documents by default, which favours
//!    citation-backed answers over unreviewed SQL).
//!
//! Confidence is the winning set's match count over all matches. With
//! `hybrid_confidence = "balanced"` a hybrid decision instead counts the
//! hybrid phrases plus the balanced part of the SQL/document evidence.

mod keywords;

pub use keywords::KeywordSets;

use keywords::{tokenize, PhraseSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::ClassifierConfig;

/// Where a query is answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Sql,
    Documents,
    Hybrid,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Documents => "documents",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a `Hybrid` decision's confidence is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridConfidence {
    /// Hybrid matches over all matches, like the other routes
    #[default]
    WinningShare,
    /// `(hybrid + 2 * min(sql, documents)) / total`; lopsided queries score lower
    Balanced,
}

/// Phrases that fired, per set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatches {
    pub sql: Vec<String>,
    pub documents: Vec<String>,
    pub hybrid: Vec<String>,
}

impl KeywordMatches {
    pub fn total(&self) -> usize {
        self.sql.len() + self.documents.len() + self.hybrid.len()
    }
}

/// Classifier output for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    /// In `[0, 1]`
    pub confidence: f64,
    pub explanation: String,
    pub matches: KeywordMatches,
}

/// Keyword classifier built from configuration.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    sql: PhraseSet,
    documents: PhraseSet,
    hybrid: PhraseSet,
    tie_route: Route,
    confidence_floor: f64,
    hybrid_confidence: HybridConfidence,
}

impl KeywordClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            sql: PhraseSet::compile(&config.keywords.sql),
            documents: PhraseSet::compile(&config.keywords.documents),
            hybrid: PhraseSet::compile(&config.keywords.hybrid),
            tie_route: config.tie_route,
            confidence_floor: config.confidence_floor,
            hybrid_confidence: config.hybrid_confidence,
        }
    }

    pub fn classify(&self, query: &str) -> RouteDecision {
        let tokens = tokenize(query);
        let matches = KeywordMatches {
            sql: self.sql.matches(&tokens),
            documents: self.documents.matches(&tokens),
            hybrid: self.hybrid.matches(&tokens),
        };

        let sql = matches.sql.len();
        let docs = matches.documents.len();
        let hybrid = matches.hybrid.len();
        let total = matches.total();

        let (route, rule) = if hybrid > 0 && sql > 0 && docs > 0 {
            (Route::Hybrid, "hybrid phrase with both SQL and document terms")
        } else if sql > docs {
            (Route::Sql, "more SQL terms than document terms")
        } else if docs > sql {
            (Route::Documents, "more document terms than SQL terms")
        } else if total == 0 {
            (self.tie_route, "no recognised terms, using default route")
        } else {
            (self.tie_route, "SQL and document terms tied, using tie route")
        };

        let confidence = if total == 0 {
            self.confidence_floor
        } else {
            let winning = match route {
                Route::Sql => sql,
                Route::Documents => docs,
                Route::Hybrid => match self.hybrid_confidence {
                    HybridConfidence::WinningShare => hybrid,
                    HybridConfidence::Balanced => hybrid + 2 * sql.min(docs),
                },
            };
            (winning as f64 / total as f64).clamp(0.0, 1.0)
        };

        let explanation = format!(
            "{} ({}); sql: [{}], documents: [{}], hybrid: [{}]",
            route,
            rule,
            matches.sql.join(", "),
            matches.documents.join(", "),
            matches.hybrid.join(", "),
        );

        debug!(
            "Classified query as {} (confidence {:.2}, {} matches)",
            route, confidence, total
        );

        RouteDecision {
            route,
            confidence,
            explanation,
            matches,
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(q: &str) -> RouteDecision {
        KeywordClassifier::default().classify(q)
    }

    #[test]
    fn test_how_many_customers_is_sql() {
        let d = classify("How many customers do we have?");
        assert_eq!(d.route, Route::Sql);
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.matches.sql, vec!["how many", "customers"]);
    }

    #[test]
    fn test_return_policy_is_documents() {
        let d = classify("What is our return policy?");
        assert_eq!(d.route, Route::Documents);
        assert_eq!(d.confidence, 1.0);
        assert!(d.matches.sql.is_empty());
    }

    #[test]
    fn test_sales_and_pricing_is_hybrid() {
        let d = classify("Show total sales and explain our pricing strategy");
        assert_eq!(d.route, Route::Hybrid);
        assert_eq!(d.matches.hybrid, vec!["and explain"]);
        // one hybrid phrase out of five matches
        assert!((d.confidence - 0.2).abs() < 1e-9);
        assert!(d.explanation.starts_with("hybrid"));
    }

    #[test]
    fn test_balanced_hybrid_confidence_is_opt_in() {
        let config = ClassifierConfig {
            hybrid_confidence: HybridConfidence::Balanced,
            ..ClassifierConfig::default()
        };
        let classifier = KeywordClassifier::new(&config);
        let d = classifier.classify("Show total sales and explain our pricing strategy");
        assert_eq!(d.route, Route::Hybrid);
        assert_eq!(d.confidence, 1.0);

        // one sql term against two document terms
        let d = classifier.classify("total and explain the policy");
        assert_eq!(d.route, Route::Hybrid);
        assert!((d.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_only_sql_terms_beat_other_routes() {
        for q in ["average order quantity per customer", "list all products", "top 10 orders"] {
            let d = classify(q);
            assert_eq!(d.route, Route::Sql, "{}", q);
            assert!(d.matches.documents.is_empty() && d.matches.hybrid.is_empty());
            // Other routes would have scored zero matches out of the total
            assert!(d.confidence > 0.0);
            assert_eq!(d.confidence, 1.0);
        }
    }

    #[test]
    fn test_no_keywords_falls_back_to_documents_floor() {
        let d = classify("hello there friend");
        assert_eq!(d.route, Route::Documents);
        assert_eq!(d.confidence, 0.33);
        assert!(d.explanation.contains("no recognised terms"));
    }

    #[test]
    fn test_tie_favours_documents() {
        // one sql term ("revenue"), one document term ("why")
        let d = classify("why did revenue drop");
        assert_eq!(d.route, Route::Documents);
        assert_eq!(d.confidence, 0.5);
    }

    #[test]
    fn test_hybrid_phrase_without_both_sides_is_not_hybrid() {
        // "as well as" is hybrid, but only SQL terms matched beside it
        let d = classify("total sales as well as total orders");
        assert_eq!(d.route, Route::Sql);
        assert!((d.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_tie_route_is_configurable() {
        let config = ClassifierConfig {
            tie_route: Route::Sql,
            confidence_floor: 0.2,
            ..ClassifierConfig::default()
        };
        let classifier = KeywordClassifier::new(&config);
        assert_eq!(classifier.classify("why did revenue drop").route, Route::Sql);
        let d = classifier.classify("zzz");
        assert_eq!(d.route, Route::Sql);
        assert_eq!(d.confidence, 0.2);
    }

    #[test]
    fn test_injected_keywords_replace_defaults() {
        let config = ClassifierConfig {
            keywords: KeywordSets {
                sql: vec!["ledger".into()],
                documents: vec!["handbook".into()],
                hybrid: vec!["plus".into()],
            },
            ..ClassifierConfig::default()
        };
        let classifier = KeywordClassifier::new(&config);
        assert_eq!(classifier.classify("how many ledger rows").route, Route::Sql);
        assert_eq!(
            classifier.classify("ledger totals plus the handbook").route,
            Route::Hybrid
        );
    }

    #[test]
    fn test_confidence_is_bounded() {
        for q in [
            "how many orders and explain why the policy changed along with revenue",
            "explain explain explain total",
            "a",
        ] {
            let d = classify(q);
            assert!((0.0..=1.0).contains(&d.confidence), "{}: {}", q, d.confidence);
        }
    }

    #[test]
    fn test_classifier_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KeywordClassifier>();
    }
}
