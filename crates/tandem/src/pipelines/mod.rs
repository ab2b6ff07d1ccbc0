//! Collaborator boundaries.
//!
//! The document retrieval pipeline and the SQL generation pipeline live
//! outside this crate (vector index, language model, database driver). The
//! orchestrator talks to them only through the traits below and bounds every
//! call with a timeout.
//!
//! `is_ready` is the injected readiness handle: a collaborator that knows it
//! cannot serve (index still building, database connection down) says so up
//! front and the orchestrator skips it with an annotation instead of calling.

pub mod sql_guard;

use crate::approvals::SqlProposal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Which collaborator a result or failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Documents,
    Sql,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Documents => f.write_str("documents"),
            Self::Sql => f.write_str("sql"),
        }
    }
}

/// One evidence passage from the document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// Document path, URL or chunk reference
    pub source_ref: String,
    pub score: f32,
}

/// Ranked passages plus the answer synthesized from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub passages: Vec<Passage>,
    pub answer: String,
}

impl RetrievalResult {
    /// Passages sorted by descending score. Collaborators are expected to
    /// return them ranked; this keeps the contract when one does not.
    pub fn ranked(mut self) -> Self {
        self.passages
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        self
    }

    pub fn sources(&self) -> Vec<&str> {
        self.passages.iter().map(|p| p.source_ref.as_str()).collect()
    }
}

/// Rows returned by executing an approved statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl SqlRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// One-line rendering used in unified answers.
    pub fn summary(&self) -> String {
        match (self.row_count(), self.columns.len()) {
            (0, _) => "The query returned no rows.".to_string(),
            (1, 1) if !self.rows[0].is_empty() => {
                format!("{}: {}", self.columns[0], render_cell(&self.rows[0][0]))
            }
            (1, _) => format!("1 row: {}", self.render_row(&self.rows[0])),
            (n, _) => {
                let preview: Vec<String> =
                    self.rows.iter().take(3).map(|r| self.render_row(r)).collect();
                let more = if n > 3 { format!("; and {} more", n - 3) } else { String::new() };
                format!("{} rows: {}{}", n, preview.join("; "), more)
            }
        }
    }

    fn render_row(&self, row: &[Value]) -> String {
        row.iter()
            .enumerate()
            .map(|(i, cell)| match self.columns.get(i) {
                Some(col) => format!("{}={}", col, render_cell(cell)),
                None => render_cell(cell),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Failures reported by the document retrieval pipeline.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the SQL generation pipeline.
#[derive(Debug, Clone, Error)]
pub enum SqlPipelineError {
    #[error("SQL service unavailable: {0}")]
    Unavailable(String),

    #[error("unsafe statement: {0}")]
    UnsafeStatement(String),

    #[error("execution error: {0}")]
    Execution(String),
}

/// Semantic search over the document corpus.
#[async_trait]
pub trait DocumentPipeline: Send + Sync {
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievalResult, RetrievalError>;
}

/// Natural language to SQL, plus execution of approved statements.
#[async_trait]
pub trait SqlPipeline: Send + Sync {
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }

    /// Produce a pending proposal without executing anything.
    async fn generate_sql(&self, query: &str) -> Result<SqlProposal, SqlPipelineError>;

    async fn execute_sql(&self, sql: &str) -> Result<SqlRows, SqlPipelineError>;
}
