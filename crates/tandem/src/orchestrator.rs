//! Query Orchestrator
//!
//! Validates a query, classifies it and dispatches to the document pipeline,
//! the SQL pipeline or both. Generated SQL is guarded and stored as a pending
//! proposal; it only runs once approved, either by the caller in the same
//! request (`auto_approve_sql`) or later through `resolve_proposal`.
//!
//! Every collaborator call is bounded by a timeout from `[timeouts]`. A
//! collaborator that reports itself not ready is skipped without a call. In a
//! hybrid query one failing half yields a partial response carrying a notice;
//! in a single-route query the failure is returned as an error unless
//! `[routing] fallback_to_available` is set.
//!
//! With a journal configured, store transitions write to disk and run on the
//! blocking pool so they never stall the async workers.

use crate::approvals::{
    ApprovalError, ApprovalStore, ProposalDecision, ProposalStatus, SqlProposal, StatusCounts,
};
use crate::classifier::{KeywordClassifier, Route, RouteDecision};
use crate::config::{ApprovalConfig, QueryLimits, RoutingPolicy, TandemConfig, TimeoutConfig};
use crate::error::{Result, TandemError};
use crate::pipelines::sql_guard::ensure_read_only;
use crate::pipelines::{
    DocumentPipeline, RetrievalError, RetrievalResult, Source, SqlPipeline, SqlPipelineError,
};
use crate::query::{validate_top_k, Query};
use crate::response::{SourceNotice, SqlOutcome, UnifiedResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tandem_ids::{ProposalId, RequestId};
use tracing::{error, info, info_span, warn, Instrument};

/// Readiness of one collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub name: String,
    pub ready: bool,
}

/// Snapshot returned by [`Orchestrator::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub version: String,
    pub documents: PipelineStatus,
    pub sql: PipelineStatus,
    pub proposals: StatusCounts,
    pub checked_at: DateTime<Utc>,
}

/// Routes queries and owns the approval lifecycle of generated SQL.
pub struct Orchestrator {
    classifier: KeywordClassifier,
    documents: Arc<dyn DocumentPipeline>,
    sql: Arc<dyn SqlPipeline>,
    store: Arc<ApprovalStore>,
    limits: QueryLimits,
    timeouts: TimeoutConfig,
    approvals: ApprovalConfig,
    routing: RoutingPolicy,
}

impl Orchestrator {
    /// Build from configuration, opening the proposal journal if one is
    /// configured.
    pub fn new(
        config: &TandemConfig,
        documents: Arc<dyn DocumentPipeline>,
        sql: Arc<dyn SqlPipeline>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(ApprovalStore::from_config(&config.approvals)?);
        Self::with_store(config, documents, sql, store)
    }

    /// Build around an existing store, e.g. one shared with a review surface.
    pub fn with_store(
        config: &TandemConfig,
        documents: Arc<dyn DocumentPipeline>,
        sql: Arc<dyn SqlPipeline>,
        store: Arc<ApprovalStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            classifier: KeywordClassifier::new(&config.classifier),
            documents,
            sql,
            store,
            limits: config.limits.clone(),
            timeouts: config.timeouts.clone(),
            approvals: config.approvals.clone(),
            routing: config.routing.clone(),
        })
    }

    /// Answer a query with the configured default `top_k`.
    pub async fn handle(&self, query: &str, auto_approve_sql: bool) -> Result<UnifiedResponse> {
        self.handle_with_top_k(query, self.limits.default_top_k, auto_approve_sql)
            .await
    }

    pub async fn handle_with_top_k(
        &self,
        query: &str,
        top_k: usize,
        auto_approve_sql: bool,
    ) -> Result<UnifiedResponse> {
        let request_id = RequestId::new();
        let span = info_span!("query.handle", request_id = %request_id);
        self.dispatch(request_id, query, top_k, auto_approve_sql)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        request_id: RequestId,
        text: &str,
        top_k: usize,
        auto_approve_sql: bool,
    ) -> Result<UnifiedResponse> {
        let query = Query::parse(text, &self.limits)?;
        let top_k = validate_top_k(top_k, &self.limits)?;

        let decision = self.classifier.classify(query.as_str());
        info!(
            "Routing query to {} (confidence {:.2})",
            decision.route, decision.confidence
        );

        match decision.route {
            Route::Documents => match self.retrieve_documents(&query, top_k).await {
                Ok(docs) => Ok(UnifiedResponse::assemble(
                    request_id,
                    query.as_str(),
                    decision,
                    Route::Documents,
                    Some(docs),
                    None,
                    Vec::new(),
                )),
                Err(err) if self.should_fall_back(&err) => {
                    warn!("Document route failed, falling back to SQL: {}", err);
                    let notice = SourceNotice::from_error(Source::Documents, &err);
                    let outcome = self
                        .run_sql(&query, auto_approve_sql)
                        .await
                        .map_err(|sql_err| all_failed(&err, &sql_err))?;
                    Ok(UnifiedResponse::assemble(
                        request_id,
                        query.as_str(),
                        decision,
                        Route::Sql,
                        None,
                        Some(outcome),
                        vec![notice],
                    ))
                }
                Err(err) => Err(err),
            },
            Route::Sql => match self.run_sql(&query, auto_approve_sql).await {
                Ok(outcome) => Ok(UnifiedResponse::assemble(
                    request_id,
                    query.as_str(),
                    decision,
                    Route::Sql,
                    None,
                    Some(outcome),
                    Vec::new(),
                )),
                Err(err) if self.should_fall_back(&err) => {
                    warn!("SQL route failed, falling back to documents: {}", err);
                    let notice = SourceNotice::from_error(Source::Sql, &err);
                    let docs = self
                        .retrieve_documents(&query, top_k)
                        .await
                        .map_err(|doc_err| all_failed(&doc_err, &err))?;
                    Ok(UnifiedResponse::assemble(
                        request_id,
                        query.as_str(),
                        decision,
                        Route::Documents,
                        Some(docs),
                        None,
                        vec![notice],
                    ))
                }
                Err(err) => Err(err),
            },
            Route::Hybrid => {
                let (docs, sql) = tokio::join!(
                    self.retrieve_documents(&query, top_k),
                    self.run_sql(&query, auto_approve_sql)
                );
                merge_hybrid(request_id, &query, decision, docs, sql)
            }
        }
    }

    fn should_fall_back(&self, err: &TandemError) -> bool {
        self.routing.fallback_to_available
            && matches!(
                err,
                TandemError::RetrievalUnavailable(_)
                    | TandemError::SqlServiceUnavailable(_)
                    | TandemError::Timeout { .. }
            )
    }

    async fn retrieve_documents(&self, query: &Query, top_k: usize) -> Result<RetrievalResult> {
        if !self.documents.is_ready() {
            return Err(TandemError::RetrievalUnavailable(format!(
                "{} reported not ready",
                self.documents.name()
            )));
        }

        let result = bounded(
            Source::Documents,
            self.timeouts.retrieval(),
            self.documents.retrieve(query.as_str(), top_k),
        )
        .await?;

        result.map(RetrievalResult::ranked).map_err(|e| match e {
            RetrievalError::Unavailable(msg) => TandemError::RetrievalUnavailable(msg),
        })
    }

    /// Generate, guard and store a proposal; execute it only when
    /// `auto_approve` is set.
    async fn run_sql(&self, query: &Query, auto_approve: bool) -> Result<SqlOutcome> {
        if !self.sql.is_ready() {
            return Err(TandemError::SqlServiceUnavailable(format!(
                "{} reported not ready",
                self.sql.name()
            )));
        }

        let generated = bounded(
            Source::Sql,
            self.timeouts.generation(),
            self.sql.generate_sql(query.as_str()),
        )
        .await?;
        let mut proposal = generated.map_err(|e| sql_error(e, None))?;
        proposal.query = query.as_str().to_string();

        if let Err(reason) = ensure_read_only(&proposal.sql) {
            warn!("Discarding generated SQL for proposal {}: {}", proposal.id, reason);
            return Err(TandemError::UnsafeStatement(reason));
        }

        let proposal = self.in_store(move |store| store.create(proposal)).await?;
        if !auto_approve {
            return Ok(SqlOutcome::PendingApproval { proposal });
        }

        let id = proposal.id.clone();
        let approved = self.in_store(move |store| store.approve(&id)).await?;
        self.execute_approved(approved).await
    }

    /// Run a store operation, moving it to the blocking pool when it touches
    /// the journal.
    async fn in_store<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&ApprovalStore) -> std::result::Result<T, ApprovalError> + Send + 'static,
        T: Send + 'static,
    {
        if !self.store.is_journaled() {
            return Ok(op(self.store.as_ref())?);
        }
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| ApprovalError::Journal(format!("journal task failed: {}", e)))?;
        Ok(result?)
    }

    /// Mark a proposal failed. The caller returns the failure that got us
    /// here, so a store error is only logged.
    async fn record_failure(&self, id: &ProposalId, message: String) {
        let target = id.clone();
        if let Err(e) = self
            .in_store(move |store| store.mark_failed(&target, message))
            .await
        {
            error!("Could not record failure of proposal {}: {}", id, e);
        }
    }

    /// Run an approved proposal and record the result. Any failure after
    /// approval, including a timeout, leaves the proposal failed.
    async fn execute_approved(&self, proposal: SqlProposal) -> Result<SqlOutcome> {
        let id = proposal.id.clone();

        if let Err(reason) = ensure_read_only(&proposal.sql) {
            self.record_failure(&id, format!("unsafe statement: {}", reason))
                .await;
            return Err(TandemError::UnsafeStatement(reason));
        }

        if !self.sql.is_ready() {
            let message = format!("{} reported not ready", self.sql.name());
            self.record_failure(&id, message.clone()).await;
            return Err(TandemError::SqlServiceUnavailable(message));
        }

        let executed = bounded(
            Source::Sql,
            self.timeouts.execution(),
            self.sql.execute_sql(&proposal.sql),
        )
        .await;

        match executed {
            Ok(Ok(rows)) => {
                let recorded = rows.clone();
                let proposal = self
                    .in_store(move |store| store.mark_executed(&id, recorded))
                    .await?;
                Ok(SqlOutcome::Executed { proposal, rows })
            }
            Ok(Err(e)) => {
                self.record_failure(&id, e.to_string()).await;
                Err(sql_error(e, Some(id)))
            }
            Err(timeout) => {
                self.record_failure(&id, timeout.to_string()).await;
                Err(timeout)
            }
        }
    }

    /// Approve (and execute) or reject a pending proposal.
    pub async fn resolve_proposal(
        &self,
        id: &str,
        decision: ProposalDecision,
    ) -> Result<SqlProposal> {
        let id = parse_proposal_id(id)?;
        match decision {
            ProposalDecision::Reject { reason } => {
                self.in_store(move |store| store.reject(&id, reason)).await
            }
            ProposalDecision::Approve => {
                let approved = self.in_store(move |store| store.approve(&id)).await?;
                let outcome = self.execute_approved(approved).await?;
                Ok(outcome.proposal().clone())
            }
        }
    }

    /// Resolve a proposal, then rebuild the answer in the shape its query was
    /// originally routed to. A hybrid query re-runs document retrieval.
    pub async fn resolve_and_answer(
        &self,
        id: &str,
        decision: ProposalDecision,
    ) -> Result<UnifiedResponse> {
        let request_id = RequestId::new();
        let span = info_span!("proposal.resolve", request_id = %request_id, proposal_id = %id);
        self.answer_resolved(request_id, id, decision)
            .instrument(span)
            .await
    }

    async fn answer_resolved(
        &self,
        request_id: RequestId,
        id: &str,
        decision: ProposalDecision,
    ) -> Result<UnifiedResponse> {
        let proposal = self.resolve_proposal(id, decision).await?;
        let outcome = match &proposal.status {
            ProposalStatus::Executed { rows, .. } => SqlOutcome::Executed {
                rows: rows.clone(),
                proposal: proposal.clone(),
            },
            _ => SqlOutcome::Rejected {
                proposal: proposal.clone(),
            },
        };

        let decision = self.classifier.classify(&proposal.query);
        if decision.route != Route::Hybrid {
            return Ok(UnifiedResponse::assemble(
                request_id,
                &proposal.query,
                decision,
                Route::Sql,
                None,
                Some(outcome),
                Vec::new(),
            ));
        }

        let query = Query::parse(&proposal.query, &self.limits)?;
        let docs = self
            .retrieve_documents(&query, self.limits.default_top_k)
            .await;
        merge_hybrid(request_id, &query, decision, docs, Ok(outcome))
    }

    pub fn list_pending_proposals(&self) -> Result<Vec<SqlProposal>> {
        Ok(self.store.list_pending()?)
    }

    pub fn get_proposal(&self, id: &str) -> Result<SqlProposal> {
        let id = parse_proposal_id(id)?;
        Ok(self.store.get(&id)?)
    }

    /// Reject pending proposals older than `approvals.pending_ttl_minutes`.
    /// No-op when the TTL is unset.
    pub fn expire_stale_proposals(&self) -> Result<Vec<ProposalId>> {
        match self.approvals.pending_ttl()? {
            Some(ttl) => Ok(self.store.expire_stale(ttl)?),
            None => Ok(Vec::new()),
        }
    }

    /// Drop terminal proposals older than `approvals.retention_days`.
    pub fn purge_terminal_proposals(&self) -> Result<usize> {
        Ok(self.store.purge_terminal(self.approvals.retention()?)?)
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            documents: PipelineStatus {
                name: self.documents.name().to_string(),
                ready: self.documents.is_ready(),
            },
            sql: PipelineStatus {
                name: self.sql.name().to_string(),
                ready: self.sql.is_ready(),
            },
            proposals: self.store.counts()?,
            checked_at: Utc::now(),
        })
    }
}

async fn bounded<T, F>(stage: Source, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(after, fut).await.map_err(|_| {
        warn!("{} call timed out after {:?}", stage, after);
        TandemError::Timeout { stage, after }
    })
}

fn merge_hybrid(
    request_id: RequestId,
    query: &Query,
    decision: RouteDecision,
    docs: Result<RetrievalResult>,
    sql: Result<SqlOutcome>,
) -> Result<UnifiedResponse> {
    let (documents, outcome, notices) = match (docs, sql) {
        (Ok(docs), Ok(outcome)) => (Some(docs), Some(outcome), Vec::new()),
        (Ok(docs), Err(err)) => {
            warn!("Hybrid query degraded, SQL half failed: {}", err);
            (Some(docs), None, vec![SourceNotice::from_error(Source::Sql, &err)])
        }
        (Err(err), Ok(outcome)) => {
            warn!("Hybrid query degraded, document half failed: {}", err);
            (None, Some(outcome), vec![SourceNotice::from_error(Source::Documents, &err)])
        }
        (Err(doc_err), Err(sql_err)) => return Err(all_failed(&doc_err, &sql_err)),
    };

    Ok(UnifiedResponse::assemble(
        request_id,
        query.as_str(),
        decision,
        Route::Hybrid,
        documents,
        outcome,
        notices,
    ))
}

fn all_failed(documents: &TandemError, sql: &TandemError) -> TandemError {
    TandemError::AllSourcesFailed {
        documents: documents.to_string(),
        sql: sql.to_string(),
    }
}

fn sql_error(err: SqlPipelineError, proposal_id: Option<ProposalId>) -> TandemError {
    match err {
        SqlPipelineError::Unavailable(msg) => TandemError::SqlServiceUnavailable(msg),
        SqlPipelineError::UnsafeStatement(msg) => TandemError::UnsafeStatement(msg),
        SqlPipelineError::Execution(message) => TandemError::Execution {
            proposal_id,
            message,
        },
    }
}

fn parse_proposal_id(id: &str) -> Result<ProposalId> {
    ProposalId::parse(id).map_err(|e| TandemError::validation(e.to_string()))
}
