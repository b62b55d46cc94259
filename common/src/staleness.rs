//! Decide whether a candidate is newer than what was last ingested.

use crate::{AuthorRecord, SubmissionCandidate};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Ingest the candidate and stamp the record with this timestamp.
    Accept(i64),
    /// The source has no commits; never ingest undated work.
    Undated,
    /// Nothing newer than the last applied update.
    AlreadyIngested,
}

impl GateDecision {
    #[must_use]
    pub fn accepts(self) -> bool {
        matches!(self, GateDecision::Accept(_))
    }
}

/// Compare a commit timestamp against the last update.
///
/// A `last_updated` of zero or `None` means the author was never ingested.
/// Equal timestamps count as already ingested, so re-running on an unchanged
/// commit is a no-op.
#[must_use]
pub fn evaluate(commit_timestamp: Option<i64>, last_updated: Option<i64>) -> GateDecision {
    let Some(commit_timestamp) = commit_timestamp else {
        return GateDecision::Undated;
    };
    match last_updated {
        None | Some(0) => GateDecision::Accept(commit_timestamp),
        Some(last) if commit_timestamp > last => GateDecision::Accept(commit_timestamp),
        Some(_) => GateDecision::AlreadyIngested,
    }
}

/// Gate a candidate against the author's stored record.
#[must_use]
pub fn evaluate_candidate(candidate: &SubmissionCandidate, record: &AuthorRecord) -> GateDecision {
    evaluate(candidate.source_commit_timestamp, Some(record.last_updated))
}
