//! Retrieve and decode the result document for an accepted candidate.

use crate::config::{IngestConfig, ResultSource};
use crate::error::{IngestError, TransportError};
use crate::score::Trial;
use crate::transport::Transport;
use crate::{SourceLocator, SubmissionCandidate};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

/// A decoded result document.
///
/// `result` keeps the trials exactly as submitted so the signed message can be
/// rebuilt from them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub result: Vec<Value>,
    pub signature: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResultDocument {
    Signed {
        result: Vec<Value>,
        #[serde(default)]
        signature: Option<String>,
    },
    Bare(Vec<Value>),
}

impl RawResult {
    /// Parse either `{"result": [...], "signature": "..."}` or a bare trial array.
    ///
    /// # Errors
    /// Returns `IngestError::Decode` if the bytes are not one of those shapes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IngestError> {
        let document: ResultDocument = serde_json::from_slice(bytes)
            .map_err(|e| IngestError::Decode(format!("not a result document: {e}")))?;
        Ok(match document {
            ResultDocument::Signed { result, signature } => RawResult { result, signature },
            ResultDocument::Bare(result) => RawResult {
                result,
                signature: None,
            },
        })
    }

    /// The trials with their scored field.
    ///
    /// # Errors
    /// Returns `IngestError::Decode` if any trial lacks a numeric `average_return`.
    pub fn trials(&self) -> Result<Vec<Trial>, IngestError> {
        self.result
            .iter()
            .enumerate()
            .map(|(i, value)| {
                Trial::deserialize(value)
                    .map_err(|e| IngestError::Decode(format!("trial #{i}: {e}")))
            })
            .collect()
    }
}

/// Download the raw result bytes for one commit from wherever the config says
/// they live.
fn fetch_bytes(
    transport: &dyn Transport,
    config: &IngestConfig,
    source: &SourceLocator,
    commit_sha: &str,
) -> Result<Vec<u8>, TransportError> {
    match config.result_source {
        ResultSource::RepositoryFile => {
            transport.file_contents(source, &config.result_file, commit_sha)
        }
        ResultSource::Artifact => {
            // a run for an older commit must not be scored against this one
            let runs = transport.list_successful_runs(source, &config.workflow_name, commit_sha)?;
            let run = runs
                .iter()
                .find(|run| run.head_sha == commit_sha)
                .ok_or_else(|| {
                    TransportError::NotFound(format!(
                        "successful {} run for commit {commit_sha} in {source}",
                        config.workflow_name
                    ))
                })?;
            debug!("{source}: using run #{} from {}", run.id, run.created_at);

            let artifacts = transport.list_artifacts(source, run.id)?;
            let artifact = artifacts
                .iter()
                .find(|a| a.name == config.artifact_name && !a.expired)
                .ok_or_else(|| {
                    TransportError::NotFound(format!(
                        "artifact {} in run #{} of {source}",
                        config.artifact_name, run.id
                    ))
                })?;

            transport.download_artifact_file(source, artifact, &config.result_file)
        }
    }
}

/// Retrieve and decode the result produced for the candidate's commit.
///
/// # Errors
/// - `UndatedSource` if the candidate has no commit
/// - `NotFound` if no run, artifact or file exists yet for that commit
/// - `Decode` if the payload is not a result document
/// - `Transport` if the hosting service failed
pub fn fetch_result(
    transport: &dyn Transport,
    config: &IngestConfig,
    candidate: &SubmissionCandidate,
) -> Result<RawResult, IngestError> {
    let commit_sha = candidate
        .source_commit_sha
        .as_deref()
        .ok_or(IngestError::UndatedSource)?;
    let bytes = fetch_bytes(transport, config, &candidate.source_locator, commit_sha)?;
    let raw = RawResult::from_slice(&bytes)?;
    // surface malformed trials here rather than after verification
    raw.trials()?;
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveredSource, build_candidate};
    use crate::test_support::{FakeTransport, ORG, PREFIX, locator};

    const ALICE_REPO: &str = "rl-exercise-d-alice";

    fn fetch(transport: &FakeTransport, config: &IngestConfig) -> Result<RawResult, IngestError> {
        let source = DiscoveredSource {
            author_name: "alice".to_string(),
            locator: locator(ALICE_REPO),
        };
        let candidate = build_candidate(transport, &source)?;
        fetch_result(transport, config, &candidate)
    }

    #[test_log::test]
    fn test_parse_signed_document() {
        let raw = RawResult::from_slice(
            br#"{"result": [{"average_return": 2}, {"average_return": 4.5}], "signature": "abcd"}"#,
        )
        .unwrap();
        assert_eq!(raw.signature.as_deref(), Some("abcd"));
        let returns: Vec<f64> = raw.trials().unwrap().iter().map(|t| t.average_return).collect();
        assert_eq!(returns, vec![2.0, 4.5]);
    }

    #[test_log::test]
    fn test_parse_unsigned_and_bare_documents() {
        let raw = RawResult::from_slice(br#"{"result": []}"#).unwrap();
        assert_eq!(raw.signature, None);
        assert!(raw.result.is_empty());

        let raw = RawResult::from_slice(br#"[{"average_return": 1.0}]"#).unwrap();
        assert_eq!(raw.signature, None);
        assert_eq!(raw.result.len(), 1);
    }

    #[test_log::test]
    fn test_parse_garbage_is_decode_error() {
        let payloads: [&[u8]; 3] = [b"not json", br#"{"score": 3}"#, br#""hello""#];
        for payload in payloads {
            let err = RawResult::from_slice(payload).unwrap_err();
            assert!(matches!(err, IngestError::Decode(_)), "{payload:?}");
        }
    }

    #[test_log::test]
    fn test_trial_without_return_is_decode_error() {
        let raw = RawResult::from_slice(br#"{"result": [{"average_return": 1}, {"episodes": 3}]}"#)
            .unwrap();
        assert!(matches!(raw.trials(), Err(IngestError::Decode(_))));
    }

    #[test_log::test]
    fn test_fetch_from_artifact() {
        let transport = FakeTransport::new();
        transport.add_repo("rl-exercise-d-alice");
        transport.set_commit("rl-exercise-d-alice", 1000);
        transport.set_result(
            "rl-exercise-d-alice",
            br#"{"result": [{"average_return": 10}]}"#.to_vec(),
        );

        let config = IngestConfig::new(ORG, PREFIX);
        let raw = fetch(&transport, &config).unwrap();
        assert_eq!(raw.result.len(), 1);
    }

    #[test_log::test]
    fn test_fetch_without_run_is_not_found() {
        let transport = FakeTransport::new();
        transport.add_repo("rl-exercise-d-alice");
        transport.set_commit("rl-exercise-d-alice", 1000);

        let config = IngestConfig::new(ORG, PREFIX);
        let err = fetch(&transport, &config).unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[test_log::test]
    fn test_fetch_from_repository_file() {
        let transport = FakeTransport::new();
        transport.add_repo("rl-exercise-d-alice");
        transport.set_commit("rl-exercise-d-alice", 1000);
        transport.set_file("rl-exercise-d-alice", br#"[{"average_return": 3}]"#.to_vec());

        let mut config = IngestConfig::new(ORG, PREFIX);
        config.result_source = ResultSource::RepositoryFile;
        let raw = fetch(&transport, &config).unwrap();
        assert_eq!(raw.trials().unwrap()[0].average_return, 3.0);
    }

    #[test_log::test]
    fn test_fetch_transport_failure() {
        let transport = FakeTransport::new();
        transport.add_repo("rl-exercise-d-alice");
        transport.fail_repo("rl-exercise-d-alice", "connection reset");

        let config = IngestConfig::new(ORG, PREFIX);
        let err = fetch(&transport, &config).unwrap_err();
        assert!(matches!(err, IngestError::Transport(_)));
    }

    #[test_log::test]
    fn test_run_for_older_commit_is_not_used() {
        let transport = FakeTransport::new();
        transport.add_repo(ALICE_REPO);
        transport.set_commit(ALICE_REPO, 1000);
        transport.set_result(ALICE_REPO, br#"[{"average_return": 10}]"#.to_vec());
        transport.set_commit(ALICE_REPO, 2000);

        let config = IngestConfig::new(ORG, PREFIX);
        let err = fetch(&transport, &config).unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));

        transport.set_result(ALICE_REPO, br#"[{"average_return": 3}]"#.to_vec());
        let raw = fetch(&transport, &config).unwrap();
        assert_eq!(raw.trials().unwrap()[0].average_return, 3.0);
    }

    #[test_log::test]
    fn test_undated_candidate_is_not_fetched() {
        let transport = FakeTransport::new();
        transport.add_repo(ALICE_REPO);
        let config = IngestConfig::new(ORG, PREFIX);
        assert!(matches!(fetch(&transport, &config), Err(IngestError::UndatedSource)));
    }
}
