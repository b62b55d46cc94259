//! Find the remote submission sources that belong to registered authors.

use crate::config::IngestConfig;
use crate::error::TransportError;
use crate::transport::Transport;
use crate::{SourceLocator, SubmissionCandidate};
use log::debug;
use std::collections::HashSet;

/// A source whose derived author name matched the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSource {
    pub author_name: String,
    pub locator: SourceLocator,
}

/// Derive the author name from a source identifier: everything after the last
/// `separator`. With no separator present the whole identifier is the name.
///
/// ```
/// use leaderboard_common::discovery::derive_author_name;
/// assert_eq!(derive_author_name("rl-exercise-d-alice", "-"), "alice");
/// assert_eq!(derive_author_name("alice", "-"), "alice");
/// ```
#[must_use]
pub fn derive_author_name<'a>(identifier: &'a str, separator: &str) -> &'a str {
    if separator.is_empty() {
        return identifier;
    }
    match identifier.rsplit_once(separator) {
        Some((_, name)) => name,
        None => identifier,
    }
}

/// List the sources of the configured owner and keep those with the configured
/// prefix whose derived author is registered. At most one source per author is
/// returned; the first listed wins.
///
/// # Errors
/// Returns an error if the repositories cannot be listed.
pub fn discover_sources(
    transport: &dyn Transport,
    config: &IngestConfig,
    registered: &HashSet<String>,
) -> Result<Vec<DiscoveredSource>, TransportError> {
    let repos = transport.list_repositories(&config.organization)?;
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for repo in repos {
        if !repo.name.starts_with(&config.repo_prefix) {
            continue;
        }
        let author_name = derive_author_name(&repo.name, &config.name_separator);
        if author_name.is_empty() || !registered.contains(author_name) {
            debug!("Skipping {}: no registered author {author_name:?}", repo.name);
            continue;
        }
        if !seen.insert(author_name.to_string()) {
            debug!(
                "Skipping {}: author {author_name} already has a source this cycle",
                repo.name
            );
            continue;
        }
        sources.push(DiscoveredSource {
            author_name: author_name.to_string(),
            locator: SourceLocator {
                owner: config.organization.clone(),
                repo: repo.name,
            },
        });
    }

    Ok(sources)
}

/// Date a discovered source by its newest commit.
///
/// # Errors
/// Returns an error if the commit listing fails.
pub fn build_candidate(
    transport: &dyn Transport,
    source: &DiscoveredSource,
) -> Result<SubmissionCandidate, TransportError> {
    let commit = transport.latest_commit(&source.locator)?;
    Ok(SubmissionCandidate {
        author_name: source.author_name.clone(),
        source_commit_timestamp: commit.as_ref().map(|c| c.timestamp),
        source_commit_sha: commit.map(|c| c.sha),
        source_locator: source.locator.clone(),
    })
}
