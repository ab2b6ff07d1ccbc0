//! Approval Store - Proposal Lifecycle Management
//!
//! Owns every proposal from creation to a terminal state. All mutation goes
//! through the transition methods; each reads the current status, verifies
//! the transition, journals the new state and swaps it in while holding the
//! store lock. Nothing here awaits, so the lock is never held across a
//! pipeline call.

use super::{ApprovalError, ProposalJournal, ProposalStatus, SqlProposal, StatusKind};
use crate::config::ApprovalConfig;
use crate::pipelines::SqlRows;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tandem_ids::ProposalId;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, ApprovalError>;

struct Entry {
    /// Insertion order, breaks creation-time ties in `list_pending`
    seq: u64,
    proposal: SqlProposal,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ProposalId, Entry>,
    /// Ids purged from `entries`; kept so they are never reused
    retired: HashSet<ProposalId>,
    next_seq: u64,
}

impl Inner {
    fn insert(&mut self, proposal: SqlProposal) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(proposal.id.clone(), Entry { seq, proposal });
    }
}

/// Number of proposals per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub executed: usize,
    pub failed: usize,
}

/// Shared store for SQL proposals
pub struct ApprovalStore {
    inner: Mutex<Inner>,
    journal: Option<ProposalJournal>,
}

impl ApprovalStore {
    /// In-memory store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            journal: None,
        }
    }

    /// Store backed by a journal; existing proposals are loaded oldest first.
    pub fn with_journal(journal: ProposalJournal) -> Result<Self> {
        let mut proposals = journal
            .load_all()
            .map_err(|e| ApprovalError::Journal(format!("{:#}", e)))?;
        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut inner = Inner::default();
        inner.retired = journal
            .load_retired()
            .map_err(|e| ApprovalError::Journal(format!("{:#}", e)))?;
        for proposal in proposals {
            inner.insert(proposal);
        }
        info!(
            "Opened approval store with {} proposals from {}",
            inner.entries.len(),
            journal.dir().display()
        );

        Ok(Self {
            inner: Mutex::new(inner),
            journal: Some(journal),
        })
    }

    pub fn from_config(config: &ApprovalConfig) -> Result<Self> {
        match &config.journal_dir {
            Some(dir) => {
                let journal = ProposalJournal::open(dir.clone())
                    .map_err(|e| ApprovalError::Journal(format!("{:#}", e)))?;
                Self::with_journal(journal)
            }
            None => Ok(Self::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| ApprovalError::Poisoned)
    }

    fn persist(&self, proposal: &SqlProposal) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal
                .save(proposal)
                .map_err(|e| ApprovalError::Journal(format!("{:#}", e)))?;
        }
        Ok(())
    }

    /// Whether transitions write to disk.
    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    /// Insert a new proposal. It must be pending and its id never seen before.
    pub fn create(&self, proposal: SqlProposal) -> Result<SqlProposal> {
        let mut inner = self.lock()?;

        if inner.entries.contains_key(&proposal.id) || inner.retired.contains(&proposal.id) {
            return Err(ApprovalError::DuplicateId(proposal.id));
        }
        if !proposal.is_pending() {
            return Err(ApprovalError::InvalidTransition {
                id: proposal.id,
                from: proposal.status.status_str(),
                action: "create",
            });
        }

        self.persist(&proposal)?;
        inner.insert(proposal.clone());

        info!("Created SQL proposal {} for query {:?}", proposal.id, proposal.query);
        Ok(proposal)
    }

    /// Check-and-set on one proposal. `next` returns the new status, or `None`
    /// when the current status does not allow `action`.
    fn transition<F>(&self, id: &ProposalId, action: &'static str, next: F) -> Result<SqlProposal>
    where
        F: FnOnce(&ProposalStatus) -> Option<ProposalStatus>,
    {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| ApprovalError::NotFound(id.clone()))?;

        let status = next(&entry.proposal.status).ok_or_else(|| ApprovalError::InvalidTransition {
            id: id.clone(),
            from: entry.proposal.status.status_str(),
            action,
        })?;

        let mut updated = entry.proposal.clone();
        updated.status = status;
        self.persist(&updated)?;
        entry.proposal = updated.clone();

        info!("Proposal {} is now {}", id, updated.status.status_str());
        Ok(updated)
    }

    pub fn approve(&self, id: &ProposalId) -> Result<SqlProposal> {
        self.transition(id, "approve", |status| match status {
            ProposalStatus::Pending => Some(ProposalStatus::Approved {
                approved_at: Utc::now(),
            }),
            _ => None,
        })
    }

    pub fn reject(&self, id: &ProposalId, reason: Option<String>) -> Result<SqlProposal> {
        self.transition(id, "reject", |status| match status {
            ProposalStatus::Pending => Some(ProposalStatus::Rejected {
                rejected_at: Utc::now(),
                reason,
            }),
            _ => None,
        })
    }

    pub fn mark_executed(&self, id: &ProposalId, rows: SqlRows) -> Result<SqlProposal> {
        self.transition(id, "mark executed", |status| match status {
            ProposalStatus::Approved { approved_at } => Some(ProposalStatus::Executed {
                approved_at: *approved_at,
                executed_at: Utc::now(),
                rows,
            }),
            _ => None,
        })
    }

    pub fn mark_failed(&self, id: &ProposalId, error: impl Into<String>) -> Result<SqlProposal> {
        let error = error.into();
        self.transition(id, "mark failed", |status| match status {
            ProposalStatus::Approved { approved_at } => Some(ProposalStatus::Failed {
                approved_at: *approved_at,
                failed_at: Utc::now(),
                error,
            }),
            _ => None,
        })
    }

    pub fn get(&self, id: &ProposalId) -> Result<SqlProposal> {
        let inner = self.lock()?;
        inner
            .entries
            .get(id)
            .map(|e| e.proposal.clone())
            .ok_or_else(|| ApprovalError::NotFound(id.clone()))
    }

    /// Proposals with an optional status filter, oldest first
    pub fn list(&self, status_filter: Option<StatusKind>) -> Result<Vec<SqlProposal>> {
        let inner = self.lock()?;
        let mut entries: Vec<&Entry> = inner
            .entries
            .values()
            .filter(|e| {
                status_filter
                    .map(|kind| e.proposal.status.kind() == kind)
                    .unwrap_or(true)
            })
            .collect();

        entries.sort_by(|a, b| {
            a.proposal
                .created_at
                .cmp(&b.proposal.created_at)
                .then(a.seq.cmp(&b.seq))
        });

        Ok(entries.into_iter().map(|e| e.proposal.clone()).collect())
    }

    /// Review queue: pending proposals, oldest first
    pub fn list_pending(&self) -> Result<Vec<SqlProposal>> {
        self.list(Some(StatusKind::Pending))
    }

    pub fn counts(&self) -> Result<StatusCounts> {
        let inner = self.lock()?;
        let mut counts = StatusCounts::default();
        for entry in inner.entries.values() {
            match entry.proposal.status {
                ProposalStatus::Pending => counts.pending += 1,
                ProposalStatus::Approved { .. } => counts.approved += 1,
                ProposalStatus::Rejected { .. } => counts.rejected += 1,
                ProposalStatus::Executed { .. } => counts.executed += 1,
                ProposalStatus::Failed { .. } => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Reject pending proposals created more than `ttl` ago.
    pub fn expire_stale(&self, ttl: Duration) -> Result<Vec<ProposalId>> {
        let cutoff = cutoff_before(ttl, "expiry")?;
        let stale: Vec<ProposalId> = self
            .list_pending()?
            .into_iter()
            .filter(|p| p.created_at < cutoff)
            .map(|p| p.id)
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            let reason = format!("expired after {} minutes without review", ttl.num_minutes());
            match self.reject(&id, Some(reason)) {
                Ok(_) => {
                    warn!("Proposal {} expired", id);
                    expired.push(id);
                }
                // Resolved by a reviewer between the scan and the reject
                Err(ApprovalError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    /// Remove terminal proposals created more than `retention` ago. Their ids
    /// stay reserved.
    pub fn purge_terminal(&self, retention: Duration) -> Result<usize> {
        let cutoff = cutoff_before(retention, "retention")?;
        let mut inner = self.lock()?;

        let to_remove: Vec<ProposalId> = inner
            .entries
            .values()
            .filter(|e| e.proposal.status.is_terminal() && e.proposal.created_at < cutoff)
            .map(|e| e.proposal.id.clone())
            .collect();

        if to_remove.is_empty() {
            return Ok(0);
        }

        // Reserve the ids durably before any proposal file disappears
        if let Some(journal) = &self.journal {
            let mut retired = inner.retired.clone();
            retired.extend(to_remove.iter().cloned());
            journal
                .save_retired(&retired)
                .map_err(|e| ApprovalError::Journal(format!("{:#}", e)))?;
        }

        for id in &to_remove {
            inner.entries.remove(id);
            inner.retired.insert(id.clone());
            if let Some(journal) = &self.journal {
                journal
                    .delete(id)
                    .map_err(|e| ApprovalError::Journal(format!("{:#}", e)))?;
            }
        }

        info!("Purged {} terminal proposals", to_remove.len());
        Ok(to_remove.len())
    }
}

/// `now - window`, for a strictly positive window that does not overflow.
fn cutoff_before(window: Duration, label: &'static str) -> Result<DateTime<Utc>> {
    if window <= Duration::zero() {
        return Err(ApprovalError::InvalidWindow(label));
    }
    Utc::now()
        .checked_sub_signed(window)
        .ok_or(ApprovalError::InvalidWindow(label))
}

impl Default for ApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}
