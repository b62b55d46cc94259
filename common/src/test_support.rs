//! Shared fixtures for unit tests: an in-memory transport and signing helpers.

use crate::SourceLocator;
use crate::error::TransportError;
use crate::transport::{ArtifactInfo, CommitInfo, RepoInfo, Transport, WorkflowRun};
use crate::verify::canonical_message;
use chrono::{TimeZone, Utc};
use ed25519_dalek::pkcs8::EncodePublicKey;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const ORG: &str = "rl2526";
pub const PREFIX: &str = "rl-exercise-d-";

/// Deterministic key for a test author.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn public_key_pem(key: &SigningKey) -> String {
    key.verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap()
}

/// Build a signed result document the way a submission workflow would.
pub fn signed_document(key: &SigningKey, result: &Value) -> Vec<u8> {
    let trials = result.as_array().unwrap();
    let message = canonical_message(trials);
    let signature = hex::encode(key.sign(&message).to_bytes());
    serde_json::to_vec(&json!({ "result": result, "signature": signature })).unwrap()
}

pub fn trials(returns: &[f64]) -> Value {
    Value::Array(
        returns
            .iter()
            .map(|r| json!({ "average_return": r, "episodes": 10 }))
            .collect(),
    )
}

pub fn locator(repo: &str) -> SourceLocator {
    SourceLocator {
        owner: ORG.to_string(),
        repo: repo.to_string(),
    }
}

/// The sha the fake transport gives a commit made at `timestamp`.
pub fn commit_sha(timestamp: i64) -> String {
    format!("{timestamp:040x}")
}

#[derive(Default)]
struct FakeRepo {
    head: Option<CommitInfo>,
    /// Result documents of successful runs, by the commit they evaluated.
    runs: Vec<(String, Vec<u8>)>,
    file: Option<Vec<u8>>,
    fail_with: Option<String>,
}

/// A hosting service held entirely in memory.
///
/// Each commit has at most one successful run with one artifact named `result`.
/// Run and artifact ids are the same number.
#[derive(Default)]
pub struct FakeTransport {
    repos: Mutex<HashMap<String, FakeRepo>>,
    order: Mutex<Vec<String>>,
    pub downloads: AtomicUsize,
    fail_listing: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose repository listing always fails.
    pub fn failing_listing() -> Self {
        Self {
            fail_listing: true,
            ..Self::default()
        }
    }

    pub fn add_repo(&self, repo: &str) {
        self.order.lock().unwrap().push(repo.to_string());
        self.repos
            .lock()
            .unwrap()
            .insert(repo.to_string(), FakeRepo::default());
    }

    /// Push a new head commit. Runs for earlier commits stay visible.
    pub fn set_commit(&self, repo: &str, timestamp: i64) {
        self.repos.lock().unwrap().get_mut(repo).unwrap().head = Some(CommitInfo {
            sha: commit_sha(timestamp),
            timestamp,
        });
    }

    /// Finish a successful run for the current head commit, replacing any
    /// earlier run for that commit.
    pub fn set_result(&self, repo: &str, document: Vec<u8>) {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(repo).unwrap();
        let sha = repo.head.as_ref().expect("set_commit first").sha.clone();
        repo.runs.retain(|(run_sha, _)| *run_sha != sha);
        repo.runs.push((sha, document));
    }

    pub fn set_file(&self, repo: &str, document: Vec<u8>) {
        self.repos.lock().unwrap().get_mut(repo).unwrap().file = Some(document);
    }

    pub fn fail_repo(&self, repo: &str, reason: &str) {
        self.repos.lock().unwrap().get_mut(repo).unwrap().fail_with = Some(reason.to_string());
    }

    fn with_repo<T>(
        &self,
        source: &SourceLocator,
        f: impl FnOnce(&FakeRepo) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let repos = self.repos.lock().unwrap();
        let repo = repos
            .get(&source.repo)
            .ok_or_else(|| TransportError::NotFound(source.to_string()))?;
        if let Some(reason) = &repo.fail_with {
            return Err(TransportError::Request(reason.clone()));
        }
        f(repo)
    }
}

impl Transport for FakeTransport {
    fn list_repositories(&self, owner: &str) -> Result<Vec<RepoInfo>, TransportError> {
        if self.fail_listing {
            return Err(TransportError::Request("503 Service Unavailable".to_string()));
        }
        assert_eq!(owner, ORG);
        Ok(self
            .order
            .lock()
            .unwrap()
            .iter()
            .map(|name| RepoInfo { name: name.clone() })
            .collect())
    }

    fn latest_commit(&self, source: &SourceLocator) -> Result<Option<CommitInfo>, TransportError> {
        self.with_repo(source, |repo| Ok(repo.head.clone()))
    }

    fn list_successful_runs(
        &self,
        source: &SourceLocator,
        workflow_name: &str,
        head_sha: &str,
    ) -> Result<Vec<WorkflowRun>, TransportError> {
        self.with_repo(source, |repo| {
            Ok(repo
                .runs
                .iter()
                .enumerate()
                .filter(|(_, (sha, _))| sha == head_sha)
                .map(|(i, (sha, _))| WorkflowRun {
                    id: i as u64 + 1,
                    name: Some(workflow_name.to_string()),
                    head_sha: sha.clone(),
                    created_at: Utc.timestamp_opt(0, 0).unwrap(),
                })
                .collect())
        })
    }

    fn list_artifacts(
        &self,
        source: &SourceLocator,
        run_id: u64,
    ) -> Result<Vec<ArtifactInfo>, TransportError> {
        self.with_repo(source, |_| {
            Ok(vec![ArtifactInfo {
                id: run_id,
                name: "result".to_string(),
                archive_download_url: format!("https://example.invalid/{}/{run_id}", source.repo),
                expired: false,
            }])
        })
    }

    fn download_artifact_file(
        &self,
        source: &SourceLocator,
        artifact: &ArtifactInfo,
        _file_name: &str,
    ) -> Result<Vec<u8>, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.with_repo(source, |repo| {
            usize::try_from(artifact.id - 1)
                .ok()
                .and_then(|i| repo.runs.get(i))
                .map(|(_, document)| document.clone())
                .ok_or_else(|| TransportError::NotFound("artifact".to_string()))
        })
    }

    fn file_contents(
        &self,
        source: &SourceLocator,
        path: &str,
        _git_ref: &str,
    ) -> Result<Vec<u8>, TransportError> {
        self.with_repo(source, |repo| {
            repo.file
                .clone()
                .ok_or_else(|| TransportError::NotFound(path.to_string()))
        })
    }
}
