//! Error types for the routing core.

use crate::approvals::ApprovalError;
use crate::config::ConfigError;
use crate::pipelines::Source;
use std::time::Duration;
use tandem_ids::ProposalId;
use thiserror::Error;

/// Result type for routing core operations.
pub type Result<T> = std::result::Result<T, TandemError>;

/// Errors surfaced to callers of the orchestrator.
#[derive(Error, Debug)]
pub enum TandemError {
    /// Malformed input; no pipeline was invoked.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("SQL service unavailable: {0}")]
    SqlServiceUnavailable(String),

    /// Generated SQL would mutate schema or data. Never stored as pending.
    #[error("Unsafe SQL statement: {0}")]
    UnsafeStatement(String),

    #[error("SQL execution failed{}: {message}", fmt_proposal(.proposal_id))]
    Execution {
        proposal_id: Option<ProposalId>,
        message: String,
    },

    #[error("{stage} call timed out after {}ms", .after.as_millis())]
    Timeout { stage: Source, after: Duration },

    /// Both halves of a hybrid query failed.
    #[error("All sources failed (documents: {documents}; sql: {sql})")]
    AllSourcesFailed { documents: String, sql: String },

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn fmt_proposal(id: &Option<ProposalId>) -> String {
    match id {
        Some(id) => format!(" for proposal {}", id),
        None => String::new(),
    }
}

impl TandemError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// The request itself was wrong: bad input, an unsafe statement, or an
    /// approval call against a missing id or one in the wrong state.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Validation(_) | Self::UnsafeStatement(_) => true,
            Self::Approval(e) => e.is_client_error(),
            _ => false,
        }
    }

    /// Transient upstream conditions a caller may retry. The core never
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetrievalUnavailable(_)
                | Self::SqlServiceUnavailable(_)
                | Self::Timeout { .. }
                | Self::AllSourcesFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = TandemError::Timeout {
            stage: Source::Documents,
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "documents call timed out after 250ms");

        let id = ProposalId::new();
        let err = TandemError::Execution {
            proposal_id: Some(id.clone()),
            message: "relation \"sales\" does not exist".to_string(),
        };
        assert!(err.to_string().contains(id.as_str()));

        let err = TandemError::Execution {
            proposal_id: None,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "SQL execution failed: boom");
    }

    #[test]
    fn test_classification_helpers() {
        assert!(TandemError::validation("too short").is_client_error());
        assert!(!TandemError::validation("too short").is_retryable());

        let err = TandemError::Approval(ApprovalError::NotFound(ProposalId::new()));
        assert!(err.is_client_error());

        let err = TandemError::SqlServiceUnavailable("connection refused".into());
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
    }
}
