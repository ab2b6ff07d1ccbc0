//! Unified responses returned by the orchestrator.

use crate::approvals::{ProposalStatus, SqlProposal};
use crate::classifier::{Route, RouteDecision};
use crate::error::TandemError;
use crate::pipelines::{RetrievalResult, Source, SqlRows};
use serde::{Deserialize, Serialize};
use tandem_ids::RequestId;

/// What happened to the SQL half of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SqlOutcome {
    /// Stored as pending; needs `resolve_proposal` before anything runs
    PendingApproval { proposal: SqlProposal },
    /// Approved and executed
    Executed { proposal: SqlProposal, rows: SqlRows },
    /// A reviewer (or expiry) rejected it
    Rejected { proposal: SqlProposal },
}

impl SqlOutcome {
    pub fn proposal(&self) -> &SqlProposal {
        match self {
            Self::PendingApproval { proposal }
            | Self::Executed { proposal, .. }
            | Self::Rejected { proposal } => proposal,
        }
    }

    /// Text contributed to the unified answer.
    pub fn summary(&self) -> String {
        match self {
            Self::PendingApproval { proposal } => format!(
                "SQL proposal {} is awaiting approval: {}",
                proposal.id, proposal.explanation
            ),
            Self::Executed { rows, .. } => rows.summary(),
            Self::Rejected { proposal } => {
                let reason = match &proposal.status {
                    ProposalStatus::Rejected { reason: Some(r), .. } => format!(" ({})", r),
                    _ => String::new(),
                };
                format!("SQL proposal {} was rejected{}.", proposal.id, reason)
            }
        }
    }
}

/// Category of a source that did not contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Unavailable,
    Timeout,
    UnsafeStatement,
    ExecutionFailed,
    Error,
}

/// Why a source was skipped or failed. Never dropped from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNotice {
    pub source: Source,
    pub kind: NoticeKind,
    pub detail: String,
}

impl SourceNotice {
    pub fn from_error(source: Source, err: &TandemError) -> Self {
        let kind = match err {
            TandemError::RetrievalUnavailable(_) | TandemError::SqlServiceUnavailable(_) => {
                NoticeKind::Unavailable
            }
            TandemError::Timeout { .. } => NoticeKind::Timeout,
            TandemError::UnsafeStatement(_) => NoticeKind::UnsafeStatement,
            TandemError::Execution { .. } => NoticeKind::ExecutionFailed,
            _ => NoticeKind::Error,
        };
        Self {
            source,
            kind,
            detail: err.to_string(),
        }
    }

    /// e.g. "SQL unavailable: SQL service unavailable: connection refused"
    pub fn message(&self) -> String {
        let label = match self.source {
            Source::Documents => "Documents",
            Source::Sql => "SQL",
        };
        let verb = match self.kind {
            NoticeKind::Unavailable => "unavailable",
            NoticeKind::Timeout => "timed out",
            NoticeKind::UnsafeStatement => "rejected as unsafe",
            NoticeKind::ExecutionFailed => "execution failed",
            NoticeKind::Error => "failed",
        };
        format!("{} {}: {}", label, verb, self.detail)
    }
}

/// The answer to one query, whichever sources produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub request_id: RequestId,
    pub query: String,
    /// What the classifier decided
    pub decision: RouteDecision,
    /// What was actually served; differs from `decision.route` only after a
    /// fallback to the other pipeline
    pub route: Route,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<RetrievalResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<SourceNotice>,
}

impl UnifiedResponse {
    pub(crate) fn assemble(
        request_id: RequestId,
        query: &str,
        decision: RouteDecision,
        route: Route,
        documents: Option<RetrievalResult>,
        sql: Option<SqlOutcome>,
        notices: Vec<SourceNotice>,
    ) -> Self {
        let mut sections: Vec<String> = Vec::new();
        if let Some(docs) = &documents {
            sections.push(docs.answer.clone());
        }
        if let Some(outcome) = &sql {
            sections.push(outcome.summary());
        }
        for notice in &notices {
            sections.push(format!("Note: {}", notice.message()));
        }

        let merge_note = match (&documents, &sql) {
            (Some(docs), Some(outcome)) => Some(format!(
                "Combined {} document passage(s) with SQL proposal {} ({}).",
                docs.passages.len(),
                outcome.proposal().id,
                outcome.proposal().status.status_str()
            )),
            _ if route == Route::Hybrid => notices.first().map(|n| {
                format!("Partial answer: {} did not contribute.", n.source)
            }),
            _ if route != decision.route => Some(format!(
                "Answered from {} because the {} route was unavailable.",
                route, decision.route
            )),
            _ => None,
        };

        Self {
            request_id,
            query: query.to_string(),
            decision,
            route,
            answer: sections.join("\n\n"),
            documents,
            sql,
            merge_note,
            notices,
        }
    }

    /// True when a source that should have contributed did not.
    pub fn is_partial(&self) -> bool {
        !self.notices.is_empty()
    }

    pub fn proposal(&self) -> Option<&SqlProposal> {
        self.sql.as_ref().map(|o| o.proposal())
    }
}
