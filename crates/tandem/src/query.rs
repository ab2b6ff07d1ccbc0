//! Validated query input.

use crate::config::QueryLimits;
use crate::error::{Result, TandemError};
use serde::Serialize;
use std::fmt;

/// A question that passed length validation. Surrounding whitespace is
/// trimmed; the rest is kept as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    pub fn parse(text: &str, limits: &QueryLimits) -> Result<Self> {
        let trimmed = text.trim();
        let chars = trimmed.chars().count();
        if chars < limits.min_query_chars || chars > limits.max_query_chars {
            return Err(TandemError::validation(format!(
                "query must be between {} and {} characters, got {}",
                limits.min_query_chars, limits.max_query_chars, chars
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `top_k` must be within `1..=max_top_k`.
pub fn validate_top_k(top_k: usize, limits: &QueryLimits) -> Result<usize> {
    if top_k == 0 || top_k > limits.max_top_k {
        return Err(TandemError::validation(format!(
            "top_k must be between 1 and {}, got {}",
            limits.max_top_k, top_k
        )));
    }
    Ok(top_k)
}
