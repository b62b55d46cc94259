//! Run one ingestion cycle: every discovered author goes through the staleness
//! gate, retrieval, verification, scoring and the state update, independently of
//! every other author.

use crate::config::IngestConfig;
use crate::discovery::{DiscoveredSource, build_candidate, discover_sources};
use crate::error::{CycleError, IngestError, StorageError};
use crate::registry::Registry;
use crate::staleness::{GateDecision, evaluate_candidate};
use crate::transport::Transport;
use crate::{AuthorRecord, artifact, score, verify};
use log::{debug, error, info, log, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// What happened to one author this cycle, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Updated(AuthorRecord),
    /// Nothing newer than the last applied update.
    Unchanged,
    /// The cycle was cancelled before this author started.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub updated: Vec<AuthorRecord>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<(String, IngestError)>,
    pub cancelled: Vec<String>,
}

impl CycleReport {
    pub fn log_summary(&self) {
        info!(
            "Cycle finished: {} updated, {} unchanged, {} skipped, {} cancelled",
            self.updated.len(),
            self.unchanged.len(),
            self.skipped.len(),
            self.cancelled.len()
        );
        for (name, reason) in &self.skipped {
            info!("  skipped {name}: {reason}");
        }
    }
}

pub struct Pipeline<'a> {
    config: &'a IngestConfig,
    transport: &'a dyn Transport,
    registry: &'a dyn Registry,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        config: &'a IngestConfig,
        transport: &'a dyn Transport,
        registry: &'a dyn Registry,
    ) -> Self {
        Self {
            config,
            transport,
            registry,
        }
    }

    /// Take one author from discovery to an applied update.
    ///
    /// # Errors
    /// Returns the reason the author was skipped. Nothing is written unless the
    /// result is `Ok(Outcome::Updated(_))`.
    pub fn ingest_author(&self, source: &DiscoveredSource) -> Result<Outcome, IngestError> {
        let name = &source.author_name;
        let record = self
            .registry
            .get_author(name)?
            .ok_or_else(|| IngestError::RegistrationMissing(name.clone()))?;

        let candidate = build_candidate(self.transport, source)?;
        let timestamp = match evaluate_candidate(&candidate, &record) {
            GateDecision::Accept(timestamp) => timestamp,
            GateDecision::Undated => return Err(IngestError::UndatedSource),
            GateDecision::AlreadyIngested => {
                debug!("{name}: nothing newer than {}", record.last_updated);
                return Ok(Outcome::Unchanged);
            }
        };

        let raw = artifact::fetch_result(self.transport, self.config, &candidate)?;

        if self.config.requires_signature() {
            let key = record.verification_key.as_deref().ok_or_else(|| {
                IngestError::Authentication("no verification key registered".to_string())
            })?;
            if !verify::verify_result(&raw, key) {
                return Err(IngestError::Authentication(
                    "signature could not be verified".to_string(),
                ));
            }
        }

        let trials = raw.trials()?;
        let new_score = score::average_return(&trials);
        if !new_score.is_finite() {
            return Err(IngestError::Decode(format!("score {new_score} is not finite")));
        }

        let updated = self.registry.upsert_score(name, new_score, timestamp)?;
        info!(
            "{name}: score {new_score:.3} over {} trials (max {:.3}), commit at {timestamp}",
            trials.len(),
            updated.max_score
        );
        Ok(Outcome::Updated(updated))
    }

    /// Discover every registered author's source and ingest them on a bounded
    /// worker pool. Setting `cancel` stops authors that have not started yet.
    ///
    /// # Errors
    /// Fails if the registry cannot be read or written, if sources cannot be
    /// listed, or if the worker pool cannot start. Per-author problems are
    /// reported in the returned `CycleReport` instead.
    pub fn run_cycle(&self, cancel: &AtomicBool) -> Result<CycleReport, CycleError> {
        let registered = self.registry.author_names()?;
        let sources = discover_sources(self.transport, self.config, &registered)
            .map_err(CycleError::Discovery)?;
        info!(
            "Discovered {} submission sources for {} registered authors",
            sources.len(),
            registered.len()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()?;
        let storage_failed = AtomicBool::new(false);

        let results: Vec<(String, Result<Outcome, IngestError>)> = pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    let name = source.author_name.clone();
                    if cancel.load(Ordering::SeqCst) || storage_failed.load(Ordering::SeqCst) {
                        return (name, Ok(Outcome::Cancelled));
                    }
                    let result = self.ingest_author(source);
                    if let Err(e) = &result {
                        if e.is_fatal() {
                            storage_failed.store(true, Ordering::SeqCst);
                        }
                    }
                    (name, result)
                })
                .collect()
        });

        let mut report = CycleReport::default();
        let mut fatal: Option<StorageError> = None;
        for (name, result) in results {
            match result {
                Ok(Outcome::Updated(record)) => report.updated.push(record),
                Ok(Outcome::Unchanged) => report.unchanged.push(name),
                Ok(Outcome::Cancelled) => report.cancelled.push(name),
                Err(IngestError::Storage(e)) => {
                    error!("{name}: registry failure: {e}");
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    log!(e.log_level(), "{name}: skipped: {e}");
                    report.skipped.push((name, e));
                }
            }
        }

        report.log_summary();
        if let Some(e) = fatal {
            warn!("Cycle aborted after a registry failure");
            return Err(CycleError::Storage(e));
        }
        Ok(report)
    }
}
