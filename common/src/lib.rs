//! A library with common utilities for ingesting and scoring student submissions.
//!
//! One ingestion cycle runs, per registered author:
//! discovery, staleness gate, artifact retrieval, authenticity check, score
//! reduction and state update. The leaderboard is projected from the registry
//! after the cycle regardless of how individual authors fared.

pub mod artifact;
pub mod config;
#[cfg(feature = "database")]
pub mod db_util;
pub mod discovery;
pub mod error;
pub mod leaderboard;
pub mod pipeline;
pub mod registry;
pub mod score;
pub mod staleness;
pub mod transport;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_support;

use serde::{Deserialize, Serialize};

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_NAME_SEPARATOR: &str = "-";
pub const DEFAULT_WORKFLOW_NAME: &str = "Evaluate";
pub const DEFAULT_ARTIFACT_NAME: &str = "result";
pub const DEFAULT_RESULT_FILE: &str = "result.json";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const CLIENT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WORKERS: usize = 4;
pub const REPOS_PER_PAGE: u32 = 100;

/// One registered author as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub name: String,
    pub verification_key: Option<String>,
    pub current_score: f64,
    pub max_score: f64,
    /// Unix seconds of the last applied update, zero if never updated.
    pub last_updated: i64,
}

impl AuthorRecord {
    #[must_use]
    pub fn new(name: &str, verification_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            verification_key: verification_key.map(str::to_string),
            current_score: 0.0,
            max_score: 0.0,
            last_updated: 0,
        }
    }

    /// True until the first successful update has been applied.
    #[must_use]
    pub fn never_updated(&self) -> bool {
        self.last_updated == 0
    }
}

/// Where a submission lives on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocator {
    pub owner: String,
    pub repo: String,
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A remote submission observed during discovery, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionCandidate {
    pub author_name: String,
    /// `None` when the source has no commits to date it by.
    pub source_commit_timestamp: Option<i64>,
    /// The commit the timestamp belongs to; results are only taken from it.
    pub source_commit_sha: Option<String>,
    pub source_locator: SourceLocator,
}
