//! Project the registry into an ordered, immutable leaderboard snapshot.

use crate::AuthorRecord;
use crate::error::StorageError;
use crate::registry::Registry;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub author_name: String,
    pub current_score: f64,
    pub max_score: f64,
    pub last_updated: i64,
}

impl From<AuthorRecord> for LeaderboardEntry {
    fn from(record: AuthorRecord) -> Self {
        Self {
            author_name: record.name,
            current_score: record.current_score,
            max_score: record.max_score,
            last_updated: record.last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaderboard {
    /// When the snapshot was read, unrelated to any entry's `last_updated`.
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<LeaderboardEntry>,
}

/// Order records by current score, highest first, ties broken by name.
#[must_use]
pub fn rank_entries(records: Vec<AuthorRecord>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = records.into_iter().map(Into::into).collect();
    entries.sort_by(|a, b| {
        b.current_score
            .total_cmp(&a.current_score)
            .then_with(|| a.author_name.cmp(&b.author_name))
    });
    entries
}

/// Read every record and rank it, stamped with the given time.
///
/// # Errors
/// Returns an error if the registry cannot be read.
pub fn project_at(
    registry: &dyn Registry,
    generated_at: DateTime<Utc>,
) -> Result<Leaderboard, StorageError> {
    Ok(Leaderboard {
        generated_at,
        entries: rank_entries(registry.all_authors()?),
    })
}

/// Read every record and rank it, stamped with the current time.
///
/// # Errors
/// Returns an error if the registry cannot be read.
pub fn project(registry: &dyn Registry) -> Result<Leaderboard, StorageError> {
    project_at(registry, Utc::now())
}

/// The published leaderboard file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardDocument {
    pub generated_at: String,
    pub entries: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub student: String,
    pub avg_return: f64,
    /// Time of the last applied update, `None` if never updated.
    pub timestamp: Option<String>,
    pub max_score: f64,
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl From<&Leaderboard> for LeaderboardDocument {
    fn from(leaderboard: &Leaderboard) -> Self {
        Self {
            generated_at: format_time(leaderboard.generated_at),
            entries: leaderboard
                .entries
                .iter()
                .map(|e| DocumentEntry {
                    student: e.author_name.clone(),
                    avg_return: e.current_score,
                    timestamp: if e.last_updated == 0 {
                        None
                    } else {
                        Utc.timestamp_opt(e.last_updated, 0).single().map(format_time)
                    },
                    max_score: e.max_score,
                })
                .collect(),
        }
    }
}

/// Write the leaderboard as pretty JSON. The file is replaced in one rename so
/// readers never see a partial document.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_leaderboard(path: &Path, leaderboard: &Leaderboard) -> io::Result<()> {
    let document = LeaderboardDocument::from(leaderboard);
    let body = serde_json::to_string_pretty(&document).map_err(io::Error::other)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, body)?;
    fs::rename(&staging, path)
}
