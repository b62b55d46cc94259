//! The capabilities ingestion needs from the repository hosting service.

use crate::SourceLocator;
use crate::error::TransportError;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[cfg(feature = "network")]
pub mod github;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoInfo {
    pub name: String,
}

/// The newest commit on a repository's default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    /// Unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// The commit the run evaluated.
    #[serde(default)]
    pub head_sha: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub archive_download_url: String,
    #[serde(default)]
    pub expired: bool,
}

/// Read-only access to remote submission sources.
///
/// Implementations own retrying transient failures; anything they return as an
/// error is final for the current attempt.
pub trait Transport: Sync {
    /// All repositories belonging to `owner`.
    fn list_repositories(&self, owner: &str) -> Result<Vec<RepoInfo>, TransportError>;

    /// The newest commit on the default branch, `None` if the repository has
    /// no commits.
    fn latest_commit(&self, source: &SourceLocator) -> Result<Option<CommitInfo>, TransportError>;

    /// Successful runs of the named workflow that evaluated `head_sha`, newest first.
    fn list_successful_runs(
        &self,
        source: &SourceLocator,
        workflow_name: &str,
        head_sha: &str,
    ) -> Result<Vec<WorkflowRun>, TransportError>;

    fn list_artifacts(
        &self,
        source: &SourceLocator,
        run_id: u64,
    ) -> Result<Vec<ArtifactInfo>, TransportError>;

    /// Download an artifact archive and return the bytes of one file inside it.
    fn download_artifact_file(
        &self,
        source: &SourceLocator,
        artifact: &ArtifactInfo,
        file_name: &str,
    ) -> Result<Vec<u8>, TransportError>;

    /// Contents of a file as of the commit `git_ref`.
    fn file_contents(
        &self,
        source: &SourceLocator,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<u8>, TransportError>;
}
