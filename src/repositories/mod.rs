pub mod checkpoints;
pub mod connector;
pub mod likes;
pub mod metrics;
pub mod plays;
pub mod playlists;
pub mod track;

use std::sync::Arc;

use crate::database::Database;

/// Bundle of per-entity repositories sharing one connection pool. Passed
/// into use-cases as the single persistence seam.
#[derive(Clone)]
pub struct Repositories {
    pub tracks: track::TrackRepository,
    pub connectors: connector::ConnectorRepository,
    pub metrics: metrics::MetricsRepository,
    pub likes: likes::LikeRepository,
    pub plays: plays::PlayRepository,
    pub checkpoints: checkpoints::CheckpointRepository,
    pub playlists: playlists::PlaylistRepository,
}

impl Repositories {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            tracks: track::TrackRepository::new(db.clone()),
            connectors: connector::ConnectorRepository::new(db.clone()),
            metrics: metrics::MetricsRepository::new(db.clone()),
            likes: likes::LikeRepository::new(db.clone()),
            plays: plays::PlayRepository::new(db.clone()),
            checkpoints: checkpoints::CheckpointRepository::new(db.clone()),
            playlists: playlists::PlaylistRepository::new(db),
        }
    }
}
