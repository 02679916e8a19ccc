mod batch;
mod config;
mod database;
mod domain;
mod entities;
mod error;
mod logging;
mod matching;
mod metrics;
mod ports;
mod progress;
mod repositories;
mod services;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchConfig, BatchExecutor};
use crate::config::Config;
use crate::database::Database;
use crate::domain::OperationResult;
use crate::entities::sync_checkpoint::CheckpointEntity;
use crate::logging::init_tracing;
use crate::metrics::MetricRegistry;
use crate::ports::connector::ConnectorClient;
use crate::progress::TracingProgress;
use crate::repositories::Repositories;
use crate::services::imports::lastfm::{LastfmIncrementalImport, LastfmRecentImport};
use crate::services::imports::run_import;
use crate::services::imports::spotify_file::SpotifyFileImport;
use crate::services::lastfm::LastfmClient;
use crate::services::likes::LikeSyncService;
use crate::services::metadata::ConnectorMetadataManager;
use crate::services::spotify::SpotifyClient;

/// Checkpoint owner when no service username is configured.
const DEFAULT_USER: &str = "default";

/// Limit used by the full-history Last.fm import after its checkpoint
/// reset.
const FULL_HISTORY_LIMIT: usize = 100_000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "TUNELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Console log level when RUST_LOG is unset (default: info)
    #[arg(long, default_value = "info", global = true, env = "TUNELINK_LOG")]
    log_level: String,

    /// OTLP endpoint for span export
    #[arg(long, global = true, env = "TUNELINK_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import listening history
    Plays {
        #[command(subcommand)]
        command: PlaysCommands,
    },
    /// Synchronize liked tracks between services
    Likes {
        #[command(subcommand)]
        command: LikesCommands,
    },
    /// Refresh per-service track metadata
    Tracks {
        #[command(subcommand)]
        command: TracksCommands,
    },
    /// Manage playlists on external services
    Playlists {
        #[command(subcommand)]
        command: PlaylistsCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TracksCommands {
    /// Refresh stale metadata for the library's liked tracks
    Refresh {
        /// Target service (spotify or lastfm)
        #[arg(long)]
        service: String,
    },
}

#[derive(Subcommand, Debug)]
enum PlaylistsCommands {
    /// Create or update a playlist on an external service
    Publish {
        /// Internal playlist id
        #[arg(long)]
        id: i64,

        /// Target service
        #[arg(long)]
        service: String,
    },
}

#[derive(Subcommand, Debug)]
enum PlaysCommands {
    /// Import a Spotify personal-data export file
    SpotifyFile {
        /// Path to the JSON export
        path: PathBuf,
    },
    /// Import the most recent Last.fm plays
    LastfmRecent {
        /// Maximum number of plays to import
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Resolve plays to internal tracks
        #[arg(long)]
        resolve_tracks: bool,
    },
    /// Import Last.fm plays forward from the stored checkpoint
    LastfmIncremental {
        /// Last.fm username (defaults to the configured one)
        #[arg(long)]
        user: Option<String>,

        /// Resolve plays to internal tracks (on by default)
        #[arg(long, overrides_with = "no_resolve_tracks")]
        resolve_tracks: bool,

        #[arg(long = "no-resolve-tracks")]
        no_resolve_tracks: bool,
    },
    /// Reset the checkpoint and re-import the full Last.fm history
    LastfmFull {
        /// Last.fm username (defaults to the configured one)
        #[arg(long)]
        user: Option<String>,

        /// Required acknowledgement that the checkpoint will be reset
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand, Debug)]
enum LikesCommands {
    /// Import liked tracks from Spotify
    ImportSpotify,
    /// Export internal likes as Last.fm loves
    ExportLastfm,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let _tracing_guard = init_tracing(args.otlp_endpoint.as_deref(), &args.log_level)?;

    let config = Config::load(args.config.as_ref())?;
    let db = Arc::new(Database::open(&config.database_path()).await?);
    let repos = Repositories::new(db);
    let registry = Arc::new(MetricRegistry::with_defaults());

    let result = match args.command {
        Commands::Plays { command } => run_plays(command, &config, &repos).await?,
        Commands::Likes { command } => run_likes(&config, &repos, &registry, command).await?,
        Commands::Tracks { command } => run_tracks(&config, &repos, &registry, command).await?,
        Commands::Playlists { command } => run_playlists(&config, &repos, command).await?,
    };

    finish(result)
}

/// Adapter for a service name; unknown services are a business-rule error.
fn client_for(config: &Config, service: &str) -> Result<Arc<dyn ConnectorClient>> {
    match service {
        "spotify" => Ok(Arc::new(SpotifyClient::new(&config.spotify))),
        "lastfm" => Ok(Arc::new(LastfmClient::new(&config.lastfm))),
        other => Err(eyre!("Unknown service: {other}")),
    }
}

fn lastfm_user(config: &Config, user: Option<String>) -> String {
    user.or_else(|| config.lastfm.username.clone())
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}

fn api_executor(config: &Config, service: &str) -> BatchExecutor {
    BatchExecutor::new(
        BatchConfig::default().with_batch_size(config.api_batch_size_for(service)),
    )
}

async fn run_plays(
    command: PlaysCommands,
    config: &Config,
    repos: &Repositories,
) -> Result<OperationResult> {
    let result = match command {
        PlaysCommands::SpotifyFile { path } => {
            let client: Arc<dyn ConnectorClient> =
                Arc::new(SpotifyClient::new(&config.spotify));
            let import = SpotifyFileImport::new(path, repos.clone(), client);
            run_import(&import, repos, None).await
        }
        PlaysCommands::LastfmRecent {
            limit,
            resolve_tracks,
        } => {
            let client: Arc<dyn ConnectorClient> = Arc::new(LastfmClient::new(&config.lastfm));
            let import = LastfmRecentImport::new(client, repos.clone(), limit, resolve_tracks);
            run_import(&import, repos, None).await
        }
        PlaysCommands::LastfmIncremental {
            user,
            resolve_tracks,
            no_resolve_tracks,
        } => {
            let resolve = resolve_tracks || !no_resolve_tracks;
            let client: Arc<dyn ConnectorClient> = Arc::new(LastfmClient::new(&config.lastfm));
            let import = LastfmIncrementalImport::new(
                client,
                repos.clone(),
                lastfm_user(config, user),
                resolve,
            );
            run_import(&import, repos, None).await
        }
        PlaysCommands::LastfmFull { user, confirm } => {
            if !confirm {
                return Err(eyre!(
                    "full import resets the plays checkpoint; pass --confirm to proceed"
                ));
            }
            let user = lastfm_user(config, user);
            repos
                .checkpoints
                .reset(&user, services::imports::lastfm::SERVICE_NAME, CheckpointEntity::Plays)
                .await?;

            let client: Arc<dyn ConnectorClient> = Arc::new(LastfmClient::new(&config.lastfm));
            let import =
                LastfmRecentImport::new(client, repos.clone(), FULL_HISTORY_LIMIT, true);
            run_import(&import, repos, None).await
        }
    };

    Ok(result)
}

async fn run_likes(
    config: &Config,
    repos: &Repositories,
    registry: &Arc<MetricRegistry>,
    command: LikesCommands,
) -> Result<OperationResult> {
    let metadata = ConnectorMetadataManager::new(repos.clone(), registry.clone());
    let service = LikeSyncService::new(repos.clone(), metadata);
    let cancel = CancellationToken::new();

    let result = match command {
        LikesCommands::ImportSpotify => {
            let client: Arc<dyn ConnectorClient> =
                Arc::new(SpotifyClient::new(&config.spotify));
            service
                .import_likes(client, DEFAULT_USER, config.batch.sync_batch_size)
                .await
        }
        LikesCommands::ExportLastfm => {
            let client: Arc<dyn ConnectorClient> = Arc::new(LastfmClient::new(&config.lastfm));
            let user = lastfm_user(config, None);
            service
                .export_likes(
                    client,
                    &user,
                    config.batch.sync_batch_size,
                    api_executor(config, "lastfm"),
                    &TracingProgress,
                    &cancel,
                )
                .await
        }
    };

    Ok(result)
}

async fn run_tracks(
    config: &Config,
    repos: &Repositories,
    registry: &Arc<MetricRegistry>,
    command: TracksCommands,
) -> Result<OperationResult> {
    let TracksCommands::Refresh { service } = command;
    let client = client_for(config, &service)?;
    let metadata = ConnectorMetadataManager::new(repos.clone(), registry.clone());

    // The liked library is the refresh scope; stale means any registered
    // metric of the service is past its freshness window.
    let liked = repos
        .likes
        .get_all_liked(crate::services::likes::INTERNAL_SERVICE, true)
        .await?;
    let track_ids: Vec<i64> = liked.iter().map(|row| row.track_id).collect();

    let mut stale: std::collections::BTreeSet<i64> = std::collections::BTreeSet::new();
    for metric_name in registry.metrics_for_connector(&service) {
        stale.extend(
            metadata
                .tracks_needing_refresh(&track_ids, metric_name, &service)
                .await?,
        );
    }
    let stale: Vec<i64> = stale.into_iter().collect();

    let (fresh, failed) = metadata
        .refresh_metadata(&stale, &service, client.as_ref())
        .await?;

    let mut result = OperationResult::new(format!("{service} Metadata Refresh"));
    result.processed_count = stale.len();
    result.imported_count = fresh.len();
    result.skipped_count = track_ids.len() - stale.len();
    result.add_stat("library_size", track_ids.len() as i64);
    result.add_stat("refresh_failures", failed.len() as i64);
    Ok(result)
}

async fn run_playlists(
    config: &Config,
    repos: &Repositories,
    command: PlaylistsCommands,
) -> Result<OperationResult> {
    let PlaylistsCommands::Publish { id, service } = command;
    let client = client_for(config, &service)?;
    let publisher = services::playlists::PlaylistPublisher::new(repos.clone());
    publisher.publish(id, &service, client).await
}

/// Print the outcome and map it to the process exit code: zero for success
/// (including zero work), non-zero for an error-shaped result.
fn finish(result: OperationResult) -> Result<()> {
    println!(
        "{}: processed {}, imported {}, exported {}, skipped {}, errors {}",
        result.operation,
        result.processed_count,
        result.imported_count,
        result.exported_count,
        result.skipped_count,
        result.error_count(),
    );
    for (key, value) in &result.stats {
        println!("  {key}: {value}");
    }

    if !result.success {
        for error in &result.errors {
            eprintln!("error: {error}");
        }
        std::process::exit(1);
    }

    Ok(())
}
