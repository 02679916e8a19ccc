use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{Artist, Track};
use crate::error::ConnectorError;
use crate::matching::types::ServiceTrackData;

/// Decoupled representation of a track as an external service reports it.
#[derive(Debug, Clone, Default)]
pub struct ConnectorApiTrack {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    pub release_date: Option<String>,
    pub isrc: Option<String>,
    /// Old id this track was relinked from, when the service reports one.
    pub linked_from_id: Option<String>,
    pub popularity: Option<f64>,
    /// Raw payload, kept opaque until metadata extraction.
    pub raw: Value,
}

impl ConnectorApiTrack {
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or_default()
    }

    /// The scorer's view of this track.
    pub fn as_service_data(&self) -> ServiceTrackData {
        ServiceTrackData {
            title: self.title.clone(),
            artist: self.primary_artist().to_string(),
            duration_ms: self.duration_ms,
        }
    }

    /// Canonical track built from this payload, for first-time ingest.
    pub fn to_internal_track(&self) -> Track {
        let mut track = Track::new(
            self.title.clone(),
            self.artists.iter().map(Artist::new).collect(),
        );
        track.album = self.album.clone();
        track.duration_ms = self.duration_ms;
        track.release_date = self.release_date.clone();
        track.isrc = self.isrc.as_deref().map(str::to_uppercase);
        track
    }
}

/// A liked/loved track from a service's favorites feed.
#[derive(Debug, Clone)]
pub struct ConnectorLikedTrack {
    pub track: ConnectorApiTrack,
    pub liked_at: Option<DateTime<Utc>>,
}

/// One listening event from a service's recent-plays feed. Timestamps are
/// normalized to UTC by the adapter.
#[derive(Debug, Clone)]
pub struct ConnectorPlayRecord {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub played_at: DateTime<Utc>,
    pub ms_played: Option<i64>,
    /// External track id when the service reports one alongside the play.
    pub track_id: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct ConnectorPlaylistEntry {
    pub track_id: String,
    pub position: i32,
    pub added_at: Option<DateTime<Utc>>,
    pub added_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectorApiPlaylist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entries: Vec<ConnectorPlaylistEntry>,
}

/// Conversion from an adapter's enriched track-info payload to a flat
/// attribute map. This is the sole conversion point between external info
/// objects and persisted metadata.
pub trait AsAttributeMap: Send + Sync {
    fn as_attribute_map(&self) -> BTreeMap<String, Value>;
}

impl AsAttributeMap for BTreeMap<String, Value> {
    fn as_attribute_map(&self) -> BTreeMap<String, Value> {
        self.clone()
    }
}

/// Capability protocol every service adapter implements. Methods are async
/// and idempotent on the remote side to the extent the service allows;
/// adapters wrap transport failures into `ConnectorError` so the batch
/// executor's retry treats them uniformly.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ConnectorClient: Send + Sync {
    fn connector_name(&self) -> &'static str;

    /// Whether the service exposes ISRC lookup; gates the matching
    /// provider's first pass.
    fn supports_isrc_search(&self) -> bool;

    /// Bulk lookup by external id. Missing ids are absent from the map.
    async fn batch_get_tracks(
        &self,
        external_ids: &[String],
    ) -> Result<HashMap<String, ConnectorApiTrack>, ConnectorError>;

    async fn search_by_isrc(&self, isrc: &str)
    -> Result<Option<ConnectorApiTrack>, ConnectorError>;

    /// Best-effort fuzzy search by primary artist and title.
    async fn search_track(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<ConnectorApiTrack>, ConnectorError>;

    /// Enriched per-user info (playcount etc.) for already-mapped tracks,
    /// keyed by internal track id. Input pairs are (track_id, external_id).
    async fn batch_get_track_info(
        &self,
        tracks: &[(i64, String)],
    ) -> Result<HashMap<i64, Box<dyn AsAttributeMap>>, ConnectorError>;

    /// Cursor-paginated favorites feed.
    async fn get_liked_tracks(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<(Vec<ConnectorLikedTrack>, Option<String>), ConnectorError>;

    /// Time-ordered plays feed; returns records plus a has-more flag.
    async fn get_recent_plays(
        &self,
        limit: Option<usize>,
        from_time: Option<DateTime<Utc>>,
        page: Option<u32>,
    ) -> Result<(Vec<ConnectorPlayRecord>, bool), ConnectorError>;

    async fn love_track(&self, artist: &str, title: &str) -> Result<bool, ConnectorError>;

    async fn get_playlist(
        &self,
        external_id: &str,
    ) -> Result<ConnectorApiPlaylist, ConnectorError>;

    async fn create_playlist<'a>(
        &self,
        name: &str,
        track_ids: &[String],
        description: Option<&'a str>,
    ) -> Result<String, ConnectorError>;

    async fn update_playlist(
        &self,
        external_id: &str,
        track_ids: &[String],
        replace: bool,
    ) -> Result<(), ConnectorError>;
}
