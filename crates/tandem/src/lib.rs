//! Tandem: query routing core for hybrid document/SQL question answering
//!
//! A question is classified by keyword scoring and answered from a document
//! retrieval pipeline, a natural-language-to-SQL pipeline, or both. Generated
//! SQL is never executed without an explicit approval.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Caller                             │
//! └──────────────────────────────────────────────────────────────┘
//!                │ handle / resolve_proposal
//!                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                                 │
//! │  ┌────────────┐   ┌──────────────┐   ┌─────────────────────┐ │
//! │  │ Classifier │──▶│  Dispatch    │──▶│ Approval Store      │ │
//! │  │ (keywords) │   │  + timeouts  │   │ pending → approved  │ │
//! │  └────────────┘   └──────────────┘   │ → executed | failed │ │
//! │                      │        │      └─────────────────────┘ │
//! └──────────────────────┼────────┼──────────────────────────────┘
//!                        ▼        ▼
//!              DocumentPipeline  SqlPipeline   (collaborators)
//! ```
//!
//! # Design Principles
//!
//! 1. **Approval before execution:** SQL is stored as a pending proposal and
//!    only runs after an approve transition the orchestrator observed.
//!
//! 2. **Read-only statements only:** generated SQL is checked by a local guard
//!    before it is stored and again before it runs.
//!
//! 3. **Degrade, never drop:** a hybrid query with one failing half answers
//!    from the other half and says which source is missing and why.
//!
//! 4. **Injected configuration:** keyword sets, bounds and timeouts come from
//!    `TandemConfig`; pipeline readiness comes from the collaborators.

pub mod approvals;
pub mod classifier;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipelines;
pub mod query;
pub mod response;

// Re-exports for convenience
pub use approvals::{
    ApprovalError, ApprovalStore, ProposalDecision, ProposalJournal, ProposalStatus, SqlProposal,
    StatusCounts, StatusKind,
};
pub use classifier::{
    HybridConfidence, KeywordClassifier, KeywordMatches, KeywordSets, Route, RouteDecision,
};
pub use config::{load_config, load_default_config, ConfigError, TandemConfig};
pub use error::{Result, TandemError};
pub use orchestrator::{Orchestrator, PipelineStatus, ServiceStatus};
pub use pipelines::{
    DocumentPipeline, Passage, RetrievalError, RetrievalResult, Source, SqlPipeline,
    SqlPipelineError, SqlRows,
};
pub use query::Query;
pub use response::{NoticeKind, SourceNotice, SqlOutcome, UnifiedResponse};
pub use tandem_ids::{ProposalId, RequestId};
