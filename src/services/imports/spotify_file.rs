//! Spotify personal-data export import (file strategy).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::{OperationResult, TrackPlay, play_context};
use crate::ports::connector::ConnectorClient;
use crate::repositories::Repositories;
use crate::services::imports::PlayImportService;
use crate::services::imports::resolver::{ResolutionStats, SpotifyPlayResolver};

pub const IMPORT_SOURCE: &str = "spotify_file";

/// One listening event from a Spotify personal-data export.
#[derive(Debug, Clone)]
pub struct SpotifyPlayRecord {
    pub played_at: DateTime<Utc>,
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub ms_played: Option<i64>,
    pub platform: Option<String>,
    pub country: Option<String>,
    pub reason_start: Option<String>,
    pub reason_end: Option<String>,
    pub shuffle: Option<bool>,
    pub skipped: Option<bool>,
    pub offline: Option<bool>,
    pub incognito_mode: Option<bool>,
}

/// Raw export schema; most fields are nullable for podcast rows.
#[derive(Debug, Deserialize)]
struct RawExportRecord {
    ts: String,
    spotify_track_uri: Option<String>,
    master_metadata_track_name: Option<String>,
    master_metadata_album_artist_name: Option<String>,
    master_metadata_album_album_name: Option<String>,
    ms_played: Option<i64>,
    platform: Option<String>,
    conn_country: Option<String>,
    reason_start: Option<String>,
    reason_end: Option<String>,
    shuffle: Option<bool>,
    skipped: Option<bool>,
    offline: Option<bool>,
    incognito_mode: Option<bool>,
}

impl SpotifyPlayRecord {
    fn from_raw(raw: RawExportRecord) -> Option<Self> {
        let track_uri = raw.spotify_track_uri?;
        let track_name = raw.master_metadata_track_name?;
        let played_at = DateTime::parse_from_rfc3339(&raw.ts)
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            played_at,
            track_uri,
            track_name,
            artist_name: raw.master_metadata_album_artist_name.unwrap_or_default(),
            album_name: raw.master_metadata_album_album_name,
            ms_played: raw.ms_played,
            platform: raw.platform,
            country: raw.conn_country,
            reason_start: raw.reason_start,
            reason_end: raw.reason_end,
            shuffle: raw.shuffle,
            skipped: raw.skipped,
            offline: raw.offline,
            incognito_mode: raw.incognito_mode,
        })
    }

    /// The play context bag: original metadata plus behavioral flags.
    pub fn to_context(&self) -> Value {
        let mut extra: BTreeMap<String, Value> = BTreeMap::new();
        extra.insert("spotify_track_uri".to_string(), json!(self.track_uri));
        if let Some(platform) = &self.platform {
            extra.insert("platform".to_string(), json!(platform));
        }
        if let Some(country) = &self.country {
            extra.insert("conn_country".to_string(), json!(country));
        }
        if let Some(reason_start) = &self.reason_start {
            extra.insert("reason_start".to_string(), json!(reason_start));
        }
        if let Some(reason_end) = &self.reason_end {
            extra.insert("reason_end".to_string(), json!(reason_end));
        }
        if let Some(shuffle) = self.shuffle {
            extra.insert("shuffle".to_string(), json!(shuffle));
        }
        if let Some(skipped) = self.skipped {
            extra.insert("skipped".to_string(), json!(skipped));
        }
        if let Some(offline) = self.offline {
            extra.insert("offline".to_string(), json!(offline));
        }
        if let Some(incognito) = self.incognito_mode {
            extra.insert("incognito_mode".to_string(), json!(incognito));
        }

        play_context(
            &self.track_name,
            &self.artist_name,
            self.album_name.as_deref(),
            extra,
        )
    }
}

/// Parse a personal-data export file. Records lacking a track URI or name
/// (podcasts, malformed rows) are skipped with a warning; the skip count is
/// returned alongside the parsed records.
pub fn parse_spotify_export(path: &Path) -> Result<(Vec<SpotifyPlayRecord>, usize)> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read export file: {}", path.display()))?;
    let raw_records: Vec<RawExportRecord> = serde_json::from_str(&contents)
        .wrap_err_with(|| format!("Failed to parse export file: {}", path.display()))?;

    let total = raw_records.len();
    let records: Vec<SpotifyPlayRecord> = raw_records
        .into_iter()
        .filter_map(SpotifyPlayRecord::from_raw)
        .collect();

    let skipped = total - records.len();
    if skipped > 0 {
        tracing::warn!(skipped, "skipped records without track uri or name");
    }
    tracing::info!(parsed = records.len(), "parsed Spotify export");

    Ok((records, skipped))
}

/// File-strategy import: parse the export, resolve URIs through the
/// three-stage resolver, persist everything. No checkpoint — files are
/// self-contained.
pub struct SpotifyFileImport {
    path: PathBuf,
    repos: Repositories,
    client: Arc<dyn ConnectorClient>,
    skipped_records: Mutex<usize>,
    stats: Mutex<Option<ResolutionStats>>,
}

impl SpotifyFileImport {
    pub fn new(path: PathBuf, repos: Repositories, client: Arc<dyn ConnectorClient>) -> Self {
        Self {
            path,
            repos,
            client,
            skipped_records: Mutex::new(0),
            stats: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PlayImportService for SpotifyFileImport {
    type Raw = SpotifyPlayRecord;

    fn operation_name(&self) -> &str {
        "Spotify File Import"
    }

    async fn fetch(&self) -> Result<Vec<SpotifyPlayRecord>> {
        let (records, skipped) = parse_spotify_export(&self.path)?;
        *self.skipped_records.lock().unwrap() = skipped;
        Ok(records)
    }

    async fn process(
        &self,
        raw: &[SpotifyPlayRecord],
        batch_id: &str,
        import_timestamp: DateTime<Utc>,
    ) -> Result<Vec<TrackPlay>> {
        let resolver = SpotifyPlayResolver::new(self.repos.clone());
        let resolutions = resolver.resolve_plays(self.client.as_ref(), raw).await?;

        let stats = ResolutionStats::from_resolutions(&resolutions);
        *self.stats.lock().unwrap() = Some(stats);

        Ok(raw
            .iter()
            .zip(resolutions)
            .map(|(record, resolution)| TrackPlay {
                track_id: resolution.track_id,
                service: "spotify".to_string(),
                played_at: record.played_at,
                ms_played: record.ms_played,
                context: record.to_context(),
                import_timestamp,
                import_source: IMPORT_SOURCE.to_string(),
                import_batch_id: batch_id.to_string(),
            })
            .collect())
    }

    async fn handle_checkpoints(&self, _raw: &[SpotifyPlayRecord]) -> Result<()> {
        Ok(())
    }

    fn annotate_result(&self, result: &mut OperationResult) {
        let skipped = *self.skipped_records.lock().unwrap();
        if skipped > 0 {
            result.add_stat("malformed_records_skipped", skipped as i64);
        }
        if let Some(stats) = self.stats.lock().unwrap().as_ref() {
            result.add_stat("direct_id", stats.direct_id as i64);
            result.add_stat("search_match", stats.search_match as i64);
            result.add_stat("preserved_metadata", stats.preserved_metadata as i64);
            result.add_stat("total_with_track_id", stats.total_with_track_id() as i64);
            result.add_stat(
                "resolution_rate_percent",
                stats.resolution_rate_percent(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_skips_records_without_uri_or_name() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            json!([
                {
                    "ts": "2024-01-01T12:00:00Z",
                    "spotify_track_uri": "spotify:track:4iV5W9uYEdYUVa79Axb7Rh",
                    "master_metadata_track_name": "Paranoid Android",
                    "master_metadata_album_artist_name": "Radiohead",
                    "master_metadata_album_album_name": "OK Computer",
                    "ms_played": 386_000,
                    "platform": "ios",
                    "conn_country": "GB",
                    "reason_start": "trackstart",
                    "reason_end": "trackdone",
                    "shuffle": false,
                    "skipped": false,
                    "offline": false,
                    "incognito_mode": false
                },
                {
                    "ts": "2024-01-01T13:00:00Z",
                    "spotify_track_uri": null,
                    "master_metadata_track_name": null,
                    "ms_played": 1200
                }
            ])
            .to_string(),
        )
        .unwrap();

        let (records, skipped) = parse_spotify_export(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 1);

        let record = &records[0];
        assert_eq!(record.track_name, "Paranoid Android");
        assert_eq!(record.played_at.timestamp(), 1_704_110_400);

        let context = record.to_context();
        assert_eq!(context["artist"], json!("Radiohead"));
        assert_eq!(context["platform"], json!("ios"));
        assert_eq!(context["shuffle"], json!(false));
    }
}
