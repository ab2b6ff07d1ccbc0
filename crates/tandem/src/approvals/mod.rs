//! SQL Approval Subsystem
//!
//! Generated SQL never runs against live data without an explicit approval.
//! The SQL pipeline produces a proposal, the store records it as pending, and
//! a reviewer resolves it out-of-band through `resolve_proposal`.
//!
//! # Lifecycle
//!
//! ```text
//! pending ──approve──▶ approved ──mark_executed──▶ executed
//!    │                    │
//!    └──reject──▶ rejected └──mark_failed──▶ failed
//! ```
//!
//! Transitions only move forward. Each one is a check-and-set under the
//! store's lock, so concurrent approve/reject calls on one id are totally
//! ordered and exactly one of them wins.
//!
//! # Storage
//!
//! In memory by default. With a journal directory every proposal is mirrored
//! to `{journal_dir}/{proposal_id}.json` and reloaded on open. Ids of purged
//! proposals are kept in `{journal_dir}/retired.ids` so they stay reserved
//! across restarts.

mod journal;
mod store;

pub use journal::ProposalJournal;
pub use store::{ApprovalStore, StatusCounts};

use std::fmt;

use crate::pipelines::SqlRows;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_ids::ProposalId;
use thiserror::Error;

/// Errors raised by the approval store.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Proposal not found: {0}")]
    NotFound(ProposalId),

    #[error("Proposal id already used: {0}")]
    DuplicateId(ProposalId),

    #[error("Invalid transition for proposal {id}: cannot {action} from '{from}'")]
    InvalidTransition {
        id: ProposalId,
        from: &'static str,
        action: &'static str,
    },

    #[error("Invalid {0} window: must be a positive, representable duration")]
    InvalidWindow(&'static str),

    #[error("Proposal journal error: {0}")]
    Journal(String),

    #[error("Approval store lock poisoned")]
    Poisoned,
}

impl ApprovalError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::DuplicateId(_) | Self::InvalidTransition { .. }
        )
    }
}

/// A generated statement awaiting (or past) review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlProposal {
    pub id: ProposalId,
    /// The question the statement was generated for
    pub query: String,
    pub sql: String,
    /// Natural-language description of what the statement does
    pub explanation: String,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
}

impl SqlProposal {
    /// Fresh pending proposal with a new id.
    pub fn new(query: impl Into<String>, sql: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            id: ProposalId::new(),
            query: query.into(),
            sql: sql.into(),
            explanation: explanation.into(),
            created_at: Utc::now(),
            status: ProposalStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, ProposalStatus::Pending)
    }

    /// Rows, once executed.
    pub fn rows(&self) -> Option<&SqlRows> {
        match &self.status {
            ProposalStatus::Executed { rows, .. } => Some(rows),
            _ => None,
        }
    }
}

/// Proposal status. Variants carry the timestamps of the transitions that
/// produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Awaiting review
    Pending,
    /// Approved, not yet executed
    Approved {
        approved_at: DateTime<Utc>,
    },
    /// Rejected by a reviewer or by expiry
    Rejected {
        rejected_at: DateTime<Utc>,
        reason: Option<String>,
    },
    /// Executed successfully
    Executed {
        approved_at: DateTime<Utc>,
        executed_at: DateTime<Utc>,
        rows: SqlRows,
    },
    /// Execution failed after approval
    Failed {
        approved_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
    },
}

/// Status without its payload, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProposalStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Pending => StatusKind::Pending,
            Self::Approved { .. } => StatusKind::Approved,
            Self::Rejected { .. } => StatusKind::Rejected,
            Self::Executed { .. } => StatusKind::Executed,
            Self::Failed { .. } => StatusKind::Failed,
        }
    }

    /// Get status string
    pub fn status_str(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::Executed { .. } | Self::Failed { .. }
        )
    }
}

/// A reviewer's verdict on a pending proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ProposalDecision {
    Approve,
    Reject { reason: Option<String> },
}
