//! Scheduled jobs for the leaderboard: ingest new submissions and publish the ranking.

#![warn(clippy::all, clippy::pedantic)]

use leaderboard_common::config::{Credentials, IngestConfig, ResultSource, TrustMode};
use leaderboard_common::db_util::DbRegistry;
use leaderboard_common::leaderboard::{self, write_leaderboard};
use leaderboard_common::pipeline::Pipeline;
use leaderboard_common::registry::Registry;
use leaderboard_common::transport::github::GithubTransport;
use leaderboard_common::{
    CLIENT_REQUEST_TIMEOUT_SECS, DEFAULT_API_BASE, DEFAULT_ARTIFACT_NAME, DEFAULT_MAX_RETRIES,
    DEFAULT_NAME_SEPARATOR, DEFAULT_RESULT_FILE, DEFAULT_WORKERS, DEFAULT_WORKFLOW_NAME,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// The SQLite database holding the author registry
    #[arg(long, global = true, default_value = "data.db", env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the registry schema
    Init,

    /// Register an author, doing nothing if the name is taken
    Register {
        /// The author name, as it appears at the end of the repository name
        #[arg(long)]
        name: String,

        /// A PEM public key (or raw key in hex) used to verify the author's results
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Ingest new submissions, then write the leaderboard
    Ingest {
        #[command(flatten)]
        ingest: IngestArgs,

        /// Where to write the leaderboard
        #[arg(long, default_value = "leaderboard.json", env = "LEADERBOARD_OUTPUT")]
        output: PathBuf,
    },

    /// Write the leaderboard from the current registry
    Leaderboard {
        /// Where to write the leaderboard
        #[arg(long, default_value = "leaderboard.json", env = "LEADERBOARD_OUTPUT")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// The organization owning the submission repositories
    #[arg(long, env = "LEADERBOARD_ORG")]
    organization: String,

    /// Only repositories starting with this prefix are considered
    #[arg(long, default_value = "", env = "LEADERBOARD_REPO_PREFIX")]
    repo_prefix: String,

    /// The author name is whatever follows the last occurrence of this
    #[arg(long, default_value = DEFAULT_NAME_SEPARATOR, env = "LEADERBOARD_NAME_SEPARATOR")]
    name_separator: String,

    /// The workflow whose successful runs carry results
    #[arg(long, default_value = DEFAULT_WORKFLOW_NAME, env = "LEADERBOARD_WORKFLOW")]
    workflow_name: String,

    /// The artifact holding the result file
    #[arg(long, default_value = DEFAULT_ARTIFACT_NAME, env = "LEADERBOARD_ARTIFACT")]
    artifact_name: String,

    /// The result file, inside the artifact or the repository
    #[arg(long, default_value = DEFAULT_RESULT_FILE, env = "LEADERBOARD_RESULT_FILE")]
    result_file: String,

    /// Where results are read from
    #[arg(long, value_enum, default_value = "artifact", env = "LEADERBOARD_RESULT_SOURCE")]
    result_source: ResultSource,

    /// Whether results must be signed by the author's registered key
    #[arg(long, value_enum, default_value = "authenticated", env = "LEADERBOARD_TRUST_MODE")]
    trust_mode: TrustMode,

    /// API token for reading the repositories
    #[arg(long, env = "LEADERBOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// The base API URL to connect to
    #[arg(long, default_value = DEFAULT_API_BASE, env = "LEADERBOARD_API_BASE")]
    api_base: String,

    /// Attempts per request before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, env = "LEADERBOARD_MAX_RETRIES")]
    max_retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = CLIENT_REQUEST_TIMEOUT_SECS, env = "LEADERBOARD_TIMEOUT")]
    timeout: u64,

    /// Authors ingested in parallel
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "LEADERBOARD_WORKERS")]
    workers: usize,
}

impl From<IngestArgs> for IngestConfig {
    fn from(args: IngestArgs) -> Self {
        IngestConfig {
            name_separator: args.name_separator,
            workflow_name: args.workflow_name,
            artifact_name: args.artifact_name,
            result_file: args.result_file,
            result_source: args.result_source,
            trust_mode: args.trust_mode,
            credentials: Credentials::new(args.token),
            api_base: args.api_base,
            max_retries: args.max_retries,
            request_timeout_secs: args.timeout,
            workers: args.workers,
            ..IngestConfig::new(&args.organization, &args.repo_prefix)
        }
    }
}

fn publish(registry: &dyn Registry, output: &Path) -> Result<()> {
    let leaderboard = leaderboard::project(registry).context("Failed to read the registry")?;
    write_leaderboard(output, &leaderboard)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "Wrote {} entries to {}",
        leaderboard.entries.len(),
        output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let registry = DbRegistry::open(&cli.database_url)
        .with_context(|| format!("Failed to open registry at {}", cli.database_url))?;

    match cli.command {
        Command::Init => {
            info!("Registry schema ready at {}", cli.database_url);
        }
        Command::Register { name, key_file } => {
            let key = key_file
                .map(|path| {
                    fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))
                })
                .transpose()?;
            if key
                .as_deref()
                .is_some_and(|k| leaderboard_common::verify::parse_verification_key(k).is_none())
            {
                bail!("The key file does not contain an Ed25519 public key");
            }
            registry
                .create_author(&name, key.as_deref())
                .context("Failed to register author")?;
            info!("Registered {name}");
        }
        Command::Ingest { ingest, output } => {
            let config = IngestConfig::from(ingest);
            info!(
                "Ingesting {} repositories of {} ({:?} mode)",
                if config.repo_prefix.is_empty() {
                    "all".to_string()
                } else {
                    format!("{}*", config.repo_prefix)
                },
                config.organization,
                config.trust_mode
            );
            let transport =
                GithubTransport::new(&config).context("Failed to set up the API client")?;
            let cancel = AtomicBool::new(false);
            let cycle = Pipeline::new(&config, &transport, &registry).run_cycle(&cancel);

            // publish whatever state the cycle left behind, even if it failed
            publish(&registry, &output)?;

            if let Err(e) = cycle {
                error!("Ingestion cycle failed: {e}");
                return Err(e).context("Ingestion cycle failed");
            }
        }
        Command::Leaderboard { output } => {
            publish(&registry, &output)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ingest_args_to_config() {
        let cli = Cli::parse_from([
            "leaderboard_jobs",
            "ingest",
            "--organization",
            "rl2526",
            "--repo-prefix",
            "rl-exercise-d-",
            "--trust-mode",
            "trusted",
            "--token",
            "ghp_secret",
            "--workers",
            "2",
        ]);
        let Command::Ingest { ingest, output } = cli.command else {
            panic!("expected ingest");
        };
        let config = IngestConfig::from(ingest);
        assert_eq!(config.organization, "rl2526");
        assert_eq!(config.repo_prefix, "rl-exercise-d-");
        assert_eq!(config.trust_mode, TrustMode::Trusted);
        assert_eq!(config.result_source, ResultSource::Artifact);
        assert_eq!(config.credentials.token(), Some("ghp_secret"));
        assert_eq!(config.workers, 2);
        assert_eq!(output, PathBuf::from("leaderboard.json"));
    }
}
