//! Explicit configuration for discovery, retrieval and the pipeline.

use crate::{
    CLIENT_REQUEST_TIMEOUT_SECS, DEFAULT_API_BASE, DEFAULT_ARTIFACT_NAME, DEFAULT_MAX_RETRIES,
    DEFAULT_NAME_SEPARATOR, DEFAULT_RESULT_FILE, DEFAULT_WORKERS, DEFAULT_WORKFLOW_NAME,
};
use clap::ValueEnum;
use std::fmt;

/// Whether results must carry a valid signature before they are applied.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, ValueEnum)]
pub enum TrustMode {
    /// Apply any well-formed result.
    Trusted,
    /// Apply only results signed by the author's registered key.
    #[default]
    Authenticated,
}

/// Where the result document is read from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, ValueEnum)]
pub enum ResultSource {
    /// A file inside an artifact of the latest successful workflow run.
    #[default]
    Artifact,
    /// A file committed to the repository.
    RepositoryFile,
}

/// API token for the hosting service. Never printed.
#[derive(Clone, Default)]
pub struct Credentials(Option<String>);

impl Credentials {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "Credentials(<redacted>)"),
            None => write!(f, "Credentials(none)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Owner (organization) whose repositories are enumerated.
    pub organization: String,
    /// Only repositories starting with this prefix are considered.
    pub repo_prefix: String,
    /// The author name is whatever follows the last occurrence of this.
    pub name_separator: String,
    pub workflow_name: String,
    pub artifact_name: String,
    /// Path of the result document, inside the artifact or the repository.
    pub result_file: String,
    pub result_source: ResultSource,
    pub trust_mode: TrustMode,
    pub credentials: Credentials,
    pub api_base: String,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    /// Upper bound on concurrently running author pipelines.
    pub workers: usize,
}

impl IngestConfig {
    #[must_use]
    pub fn new(organization: &str, repo_prefix: &str) -> Self {
        Self {
            organization: organization.to_string(),
            repo_prefix: repo_prefix.to_string(),
            name_separator: DEFAULT_NAME_SEPARATOR.to_string(),
            workflow_name: DEFAULT_WORKFLOW_NAME.to_string(),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
            result_file: DEFAULT_RESULT_FILE.to_string(),
            result_source: ResultSource::default(),
            trust_mode: TrustMode::default(),
            credentials: Credentials::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout_secs: CLIENT_REQUEST_TIMEOUT_SECS,
            workers: DEFAULT_WORKERS,
        }
    }

    #[must_use]
    pub fn requires_signature(&self) -> bool {
        self.trust_mode == TrustMode::Authenticated
    }
}
