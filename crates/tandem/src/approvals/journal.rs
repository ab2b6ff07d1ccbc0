//! Proposal Journal - Persistent Proposal State
//!
//! Mirrors proposals to JSON files so reviewers can resume after a restart.
//!
//! # Storage Format
//!
//! ```text
//! {journal_dir}/
//! ├── {proposal_id_1}.json
//! ├── {proposal_id_2}.json
//! ├── ...
//! └── retired.ids          # purged ids, one per line

//! ```

use super::SqlProposal;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tandem_ids::ProposalId;
use tracing::debug;

const RETIRED_FILE: &str = "retired.ids";

/// JSON-file journal for proposals
#[derive(Debug)]
pub struct ProposalJournal {
    dir: PathBuf,
}

impl ProposalJournal {
    /// Open (creating if needed) a journal directory
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).with_context(|| {
            format!("Failed to create proposal journal directory: {}", dir.display())
        })?;
        Ok(Self { dir })
    }

    fn proposal_path(&self, id: &ProposalId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    /// Write the current state of a proposal
    pub fn save(&self, proposal: &SqlProposal) -> Result<()> {
        let path = self.proposal_path(&proposal.id);
        let json = serde_json::to_string_pretty(proposal)?;

        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write proposal file: {}", path.display()))?;

        debug!("Saved proposal {} ({})", proposal.id, proposal.status.status_str());
        Ok(())
    }

    /// Load every proposal in the journal
    pub fn load_all(&self) -> Result<Vec<SqlProposal>> {
        let mut proposals = Vec::new();

        let entries = fs::read_dir(&self.dir).with_context(|| {
            format!("Failed to read proposal journal directory: {}", self.dir.display())
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let json = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read proposal file: {}", path.display()))?;
            let proposal: SqlProposal = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse proposal file: {}", path.display()))?;
            proposals.push(proposal);
        }

        debug!("Loaded {} proposals from {}", proposals.len(), self.dir.display());
        Ok(proposals)
    }

    /// Remove a proposal file; false if it did not exist
    pub fn delete(&self, id: &ProposalId) -> Result<bool> {
        let path = self.proposal_path(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete proposal file: {}", path.display()))?;
        Ok(true)
    }

    /// Ids purged from the journal; empty when none were ever purged
    pub fn load_retired(&self) -> Result<HashSet<ProposalId>> {
        let path = self.dir.join(RETIRED_FILE);
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read retired ids: {}", path.display()))?;
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                ProposalId::parse(line)
                    .with_context(|| format!("Corrupt retired id in {}", path.display()))
            })
            .collect()
    }

    /// Replace the retired id list
    pub fn save_retired(&self, ids: &HashSet<ProposalId>) -> Result<()> {
        let path = self.dir.join(RETIRED_FILE);
        let mut sorted: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        sorted.sort_unstable();
        let mut content = sorted.join("\n");
        content.push('\n');
        atomic_write(&path, content.as_bytes())
            .with_context(|| format!("Failed to write retired ids: {}", path.display()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Atomic write via temp file + rename
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to {}", path.display()))?;
    Ok(())
}
