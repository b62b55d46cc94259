//! Synchronous GitHub REST client with retry and backoff.

use super::{ArtifactInfo, CommitInfo, RepoInfo, Transport, WorkflowRun};
use crate::config::IngestConfig;
use crate::error::TransportError;
use crate::{CLIENT_VERSION, REPOS_PER_PAGE, SourceLocator};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::{Cursor, Read};
use std::{thread, time::Duration};

/// Failures worth another attempt against the API: timeouts, refused or reset
/// connections, and DNS hiccups.
fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

/// Short label for a client error in retry warnings.
fn error_type_str(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection"
    } else if e.is_request() {
        "request/DNS"
    } else if e.is_body() {
        "body"
    } else if e.is_decode() {
        "decode"
    } else {
        "unknown"
    }
}

/// Seconds to wait after the given failed attempt: 1, 2, 4, ...
fn backoff_secs(attempt: u32) -> u64 {
    2_u64.pow(attempt.saturating_sub(1))
}

/// Send a GitHub request up to `max_retries` times, backing off between
/// attempts while the API is unreachable or answering 5xx. The first response
/// that is not a server error goes to `process_response`, so 404 and 409 are
/// never retried.
fn retry_request<F, P, T>(
    request_fn: F,
    process_response: P,
    max_retries: u32,
) -> Result<T, TransportError>
where
    F: Fn() -> Result<Response, reqwest::Error>,
    P: Fn(Response) -> Result<T, TransportError>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        let retry = attempts < max_retries;

        match request_fn() {
            Ok(response) if response.status().is_server_error() => {
                let status = response.status();
                if !retry {
                    return Err(TransportError::Request(format!(
                        "GitHub answered {status} on all {attempts} attempts"
                    )));
                }
                let wait = backoff_secs(attempts);
                warn!("GitHub answered {status}, retrying in {wait}s ({attempts}/{max_retries})");
                thread::sleep(Duration::from_secs(wait));
            }
            Ok(response) => return process_response(response),
            Err(e) if retry && is_retryable_error(&e) => {
                let wait = backoff_secs(attempts);
                warn!(
                    "GitHub unreachable ({}), retrying in {wait}s ({attempts}/{max_retries}): {e}",
                    error_type_str(&e)
                );
                thread::sleep(Duration::from_secs(wait));
            }
            Err(e) => {
                return Err(TransportError::Request(format!(
                    "{} error after {attempts} attempts: {e}",
                    error_type_str(&e)
                )));
            }
        }
    }
}

/// Map non-success statuses onto transport errors.
fn check_status(response: Response, what: &str) -> Result<Response, TransportError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(TransportError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let msg = response.text().unwrap_or_default();
        return Err(TransportError::Request(format!(
            "{what}: server returned {status}: {msg}"
        )));
    }
    Ok(response)
}

#[derive(Deserialize)]
struct CommitEntry {
    sha: String,
    commit: CommitBody,
}

#[derive(Deserialize)]
struct CommitBody {
    committer: Option<GitActor>,
    author: Option<GitActor>,
}

#[derive(Deserialize)]
struct GitActor {
    date: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct ArtifactsPage {
    artifacts: Vec<ArtifactInfo>,
}

#[derive(Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
}

/// Date a commit by its committer, or its author when the committer is missing.
fn commit_info(entry: CommitEntry) -> Option<CommitInfo> {
    let date = entry.commit.committer.or(entry.commit.author)?.date;
    Some(CommitInfo {
        sha: entry.sha,
        timestamp: date.timestamp(),
    })
}

/// Keep the runs of one workflow that evaluated `head_sha`, newest first.
fn select_runs(runs: Vec<WorkflowRun>, workflow_name: &str, head_sha: &str) -> Vec<WorkflowRun> {
    let mut runs: Vec<WorkflowRun> = runs
        .into_iter()
        .filter(|run| run.name.as_deref() == Some(workflow_name) && run.head_sha == head_sha)
        .collect();
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    runs
}

/// Pull a single file out of a zip archive.
pub fn extract_file_from_zip(archive: &[u8], file_name: &str) -> Result<Vec<u8>, TransportError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| TransportError::Response(format!("artifact is not a zip archive: {e}")))?;
    let mut file = match zip.by_name(file_name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(TransportError::NotFound(format!(
                "{file_name} in artifact archive"
            )));
        }
        Err(e) => {
            return Err(TransportError::Response(format!(
                "could not open {file_name} in artifact archive: {e}"
            )));
        }
    };
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .map_err(|e| TransportError::Response(format!("could not read {file_name}: {e}")))?;
    Ok(contents)
}

/// Decode the base64 body of a contents-API response, which is wrapped with newlines.
pub fn decode_content(content: &str) -> Result<Vec<u8>, TransportError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| TransportError::Response(format!("file content is not base64: {e}")))
}

pub struct GithubTransport {
    client: Client,
    api_base: String,
    max_retries: u32,
}

impl GithubTransport {
    /// Build a client from the ingestion config.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the HTTP
    /// client cannot be built.
    pub fn new(config: &IngestConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = config.credentials.token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Request(format!("invalid API token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(format!("leaderboard/{CLIENT_VERSION}"))
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Request(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, TransportError> {
        debug!("GET {url}");
        retry_request(
            || self.client.get(url).send(),
            |response| {
                check_status(response, what)?
                    .json::<T>()
                    .map_err(|e| TransportError::Response(format!("{what}: {e}")))
            },
            self.max_retries,
        )
    }

    fn repo_url(&self, source: &SourceLocator) -> String {
        format!("{}/repos/{}/{}", self.api_base, source.owner, source.repo)
    }
}

impl Transport for GithubTransport {
    fn list_repositories(&self, owner: &str) -> Result<Vec<RepoInfo>, TransportError> {
        let mut repos = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/orgs/{owner}/repos?per_page={REPOS_PER_PAGE}&page={page}",
                self.api_base
            );
            let batch: Vec<RepoInfo> = self.get_json(&url, &format!("repositories of {owner}"))?;
            let last_page = batch.len() < REPOS_PER_PAGE as usize;
            repos.extend(batch);
            if last_page {
                break;
            }
            page += 1;
        }
        Ok(repos)
    }

    fn latest_commit(&self, source: &SourceLocator) -> Result<Option<CommitInfo>, TransportError> {
        let url = format!("{}/commits?per_page=1", self.repo_url(source));
        let what = format!("commits of {source}");
        debug!("GET {url}");
        retry_request(
            || self.client.get(&url).send(),
            |response| {
                // an empty repository answers 409 instead of an empty list
                if response.status() == StatusCode::CONFLICT {
                    return Ok(None);
                }
                let commits = check_status(response, &what)?
                    .json::<Vec<CommitEntry>>()
                    .map_err(|e| TransportError::Response(format!("{what}: {e}")))?;
                Ok(commits.into_iter().next().and_then(commit_info))
            },
            self.max_retries,
        )
    }

    fn list_successful_runs(
        &self,
        source: &SourceLocator,
        workflow_name: &str,
        head_sha: &str,
    ) -> Result<Vec<WorkflowRun>, TransportError> {
        let url = format!(
            "{}/actions/runs?status=success&head_sha={head_sha}&per_page=100",
            self.repo_url(source)
        );
        let page: RunsPage = self.get_json(&url, &format!("workflow runs of {source}"))?;
        Ok(select_runs(page.workflow_runs, workflow_name, head_sha))
    }

    fn list_artifacts(
        &self,
        source: &SourceLocator,
        run_id: u64,
    ) -> Result<Vec<ArtifactInfo>, TransportError> {
        let url = format!("{}/actions/runs/{run_id}/artifacts", self.repo_url(source));
        let page: ArtifactsPage =
            self.get_json(&url, &format!("artifacts of run {run_id} in {source}"))?;
        Ok(page.artifacts)
    }

    fn download_artifact_file(
        &self,
        source: &SourceLocator,
        artifact: &ArtifactInfo,
        file_name: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let what = format!("artifact {} of {source}", artifact.name);
        debug!("GET {}", artifact.archive_download_url);
        let archive = retry_request(
            || self.client.get(&artifact.archive_download_url).send(),
            |response| {
                check_status(response, &what)?
                    .bytes()
                    .map(|b| b.to_vec())
                    .map_err(|e| TransportError::Response(format!("{what}: {e}")))
            },
            self.max_retries,
        )?;
        extract_file_from_zip(&archive, file_name)
    }

    fn file_contents(
        &self,
        source: &SourceLocator,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/contents/{path}?ref={git_ref}", self.repo_url(source));
        let what = format!("{path} in {source}");
        let entry: ContentEntry = self.get_json(&url, &what)?;
        if entry.kind != "file" {
            return Err(TransportError::NotFound(format!("{what} is not a file")));
        }
        let content = entry
            .content
            .ok_or_else(|| TransportError::Response(format!("{what} has no inline content")))?;
        decode_content(&content)
    }
}
