//! Three-stage resolution from Spotify track URIs to internal track ids.
//!
//! Stage 1 batch-fetches by id (with relinking detection), stage 2 falls
//! back to metadata search, stage 3 preserves the original metadata with no
//! track id so the play is never dropped. Every input record comes back
//! with a resolution.

use std::collections::HashMap;
use std::sync::OnceLock;

use color_eyre::Result;
use regex::Regex;

use crate::domain::{Artist, Track};
use crate::matching::score::calculate_confidence;
use crate::matching::types::{ConfidenceEvidence, MatchMethod};
use crate::ports::connector::ConnectorClient;
use crate::repositories::Repositories;
use crate::services::imports::spotify_file::SpotifyPlayRecord;

/// Confidence floor for accepting a stage-2 search match.
const SEARCH_MIN_CONFIDENCE: i32 = 70;

const BATCH_GET_CHUNK: usize = 50;

static TRACK_URI_RE: OnceLock<Regex> = OnceLock::new();

fn track_uri_regex() -> &'static Regex {
    TRACK_URI_RE.get_or_init(|| {
        Regex::new(r"^spotify:track:([0-9A-Za-z]{22})$").expect("valid regex")
    })
}

/// Extract the track id from a well-formed Spotify track URI.
pub fn parse_track_uri(uri: &str) -> Option<&str> {
    track_uri_regex()
        .captures(uri)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Uniform outcome for one URI.
#[derive(Debug, Clone)]
pub struct PlayResolution {
    pub uri: String,
    pub track_id: Option<i64>,
    pub method: Option<MatchMethod>,
    pub confidence: Option<i32>,
    pub evidence: Option<ConfidenceEvidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub direct_id: usize,
    pub search_match: usize,
    pub preserved_metadata: usize,
}

impl ResolutionStats {
    pub fn from_resolutions(resolutions: &[PlayResolution]) -> Self {
        let mut stats = Self::default();
        for resolution in resolutions {
            match resolution.method {
                Some(MatchMethod::DirectId) | Some(MatchMethod::RelinkedId) => {
                    stats.direct_id += 1;
                }
                Some(_) if resolution.track_id.is_some() => stats.search_match += 1,
                _ => stats.preserved_metadata += 1,
            }
        }
        stats
    }

    pub fn total_with_track_id(&self) -> usize {
        self.direct_id + self.search_match
    }

    pub fn total(&self) -> usize {
        self.direct_id + self.search_match + self.preserved_metadata
    }

    pub fn resolution_rate_percent(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        (self.total_with_track_id() as f64 / self.total() as f64) * 100.0
    }
}

pub struct SpotifyPlayResolver {
    repos: Repositories,
}

impl SpotifyPlayResolver {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Resolve each record's URI to an internal track id where possible.
    /// The output is aligned with the input: `resolutions[i]` belongs to
    /// `records[i]`.
    pub async fn resolve_plays(
        &self,
        client: &dyn ConnectorClient,
        records: &[SpotifyPlayRecord],
    ) -> Result<Vec<PlayResolution>> {
        // Resolve each distinct URI once; exports repeat tracks heavily.
        let mut by_uri: HashMap<String, PlayResolution> = HashMap::new();
        for record in records {
            by_uri
                .entry(record.track_uri.clone())
                .or_insert_with(|| PlayResolution {
                    uri: record.track_uri.clone(),
                    track_id: None,
                    method: None,
                    confidence: None,
                    evidence: None,
                });
        }

        self.resolve_direct(client, &mut by_uri).await?;
        self.resolve_by_search(client, records, &mut by_uri).await?;

        let preserved = by_uri.values().filter(|r| r.track_id.is_none()).count();
        if preserved > 0 {
            tracing::info!(preserved, "plays kept with preserved metadata only");
        }

        Ok(records
            .iter()
            .map(|record| by_uri[&record.track_uri].clone())
            .collect())
    }

    /// Stage 1: batch-fetch raw tracks by id, detecting relinked ids.
    async fn resolve_direct(
        &self,
        client: &dyn ConnectorClient,
        by_uri: &mut HashMap<String, PlayResolution>,
    ) -> Result<()> {
        let valid: Vec<(String, String)> = by_uri
            .keys()
            .filter_map(|uri| parse_track_uri(uri).map(|id| (uri.clone(), id.to_string())))
            .collect();

        let malformed = by_uri.len() - valid.len();
        if malformed > 0 {
            tracing::warn!(malformed, "malformed track uris skipped in direct stage");
        }

        for chunk in valid.chunks(BATCH_GET_CHUNK) {
            let external_ids: Vec<String> = chunk.iter().map(|(_, id)| id.clone()).collect();
            let fetched = match client.batch_get_tracks(&external_ids).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    tracing::warn!(error = %err, "direct lookup failed; falling back to search");
                    continue;
                }
            };

            for (uri, external_id) in chunk {
                let Some(record) = fetched.get(external_id) else {
                    continue;
                };
                let method = if record.linked_from_id.is_some() {
                    MatchMethod::RelinkedId
                } else {
                    MatchMethod::DirectId
                };

                let track_id = self
                    .repos
                    .connectors
                    .ingest_external_track("spotify", record, method, 100, None)
                    .await?;

                if let Some(resolution) = by_uri.get_mut(uri) {
                    resolution.track_id = Some(track_id);
                    resolution.method = Some(method);
                    resolution.confidence = Some(100);
                }
            }
        }

        Ok(())
    }

    /// Stage 2: search by the preserved original metadata for URIs the
    /// direct stage could not resolve.
    async fn resolve_by_search(
        &self,
        client: &dyn ConnectorClient,
        records: &[SpotifyPlayRecord],
        by_uri: &mut HashMap<String, PlayResolution>,
    ) -> Result<()> {
        // One representative record per unresolved URI gives us the
        // metadata to search with.
        let mut representative: HashMap<&str, &SpotifyPlayRecord> = HashMap::new();
        for record in records {
            if by_uri
                .get(record.track_uri.as_str())
                .is_some_and(|r| r.track_id.is_none())
            {
                representative.entry(&record.track_uri).or_insert(record);
            }
        }

        for (uri, record) in representative {
            if record.artist_name.is_empty() || record.track_name.is_empty() {
                continue;
            }

            let candidate = match client
                .search_track(&record.artist_name, &record.track_name)
                .await
            {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(uri, error = %err, "search fallback failed");
                    continue;
                }
            };

            let internal = Track::new(
                record.track_name.clone(),
                vec![Artist::new(record.artist_name.clone())],
            );
            let (confidence, evidence) = calculate_confidence(
                &internal,
                &candidate.as_service_data(),
                MatchMethod::ArtistTitle,
            );
            if confidence < SEARCH_MIN_CONFIDENCE {
                tracing::debug!(uri, confidence, "search candidate below threshold");
                continue;
            }

            let track_id = self
                .repos
                .connectors
                .ingest_external_track(
                    "spotify",
                    &candidate,
                    MatchMethod::ArtistTitle,
                    confidence,
                    Some(&evidence),
                )
                .await?;

            if let Some(resolution) = by_uri.get_mut(uri) {
                resolution.track_id = Some(track_id);
                resolution.method = Some(MatchMethod::ArtistTitle);
                resolution.confidence = Some(confidence);
                resolution.evidence = Some(evidence);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::connector::{ConnectorApiTrack, MockConnectorClient};
    use crate::test_utils::test_db;
    use chrono::{TimeZone, Utc};

    fn record(uri: &str, title: &str, artist: &str) -> SpotifyPlayRecord {
        SpotifyPlayRecord {
            played_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            track_uri: uri.to_string(),
            track_name: title.to_string(),
            artist_name: artist.to_string(),
            album_name: None,
            ms_played: Some(200_000),
            platform: None,
            country: None,
            reason_start: None,
            reason_end: None,
            shuffle: None,
            skipped: None,
            offline: None,
            incognito_mode: None,
        }
    }

    fn api_track(id: &str, title: &str, artist: &str) -> ConnectorApiTrack {
        ConnectorApiTrack {
            id: id.to_string(),
            title: title.to_string(),
            artists: vec![artist.to_string()],
            duration_ms: Some(200_000),
            ..Default::default()
        }
    }

    const URI_A: &str = "spotify:track:aaaaaaaaaaaaaaaaaaaaaa";
    const URI_B: &str = "spotify:track:bbbbbbbbbbbbbbbbbbbbbb";
    const URI_C: &str = "spotify:track:cccccccccccccccccccccc";

    #[test]
    fn uri_validation() {
        assert_eq!(
            parse_track_uri("spotify:track:4iV5W9uYEdYUVa79Axb7Rh"),
            Some("4iV5W9uYEdYUVa79Axb7Rh")
        );
        assert!(parse_track_uri("spotify:album:4iV5W9uYEdYUVa79Axb7Rh").is_none());
        assert!(parse_track_uri("spotify:track:short").is_none());
        assert!(parse_track_uri("not a uri").is_none());
    }

    #[tokio::test]
    async fn mixed_resolution_outcomes() {
        let repos = Repositories::new(test_db().await);
        let resolver = SpotifyPlayResolver::new(repos);

        let mut client = MockConnectorClient::new();
        // Stage 1 resolves A only.
        client.expect_batch_get_tracks().returning(|ids| {
            let mut found = HashMap::new();
            if ids.iter().any(|id| id == "aaaaaaaaaaaaaaaaaaaaaa") {
                found.insert(
                    "aaaaaaaaaaaaaaaaaaaaaa".to_string(),
                    api_track("aaaaaaaaaaaaaaaaaaaaaa", "Paranoid Android", "Radiohead"),
                );
            }
            Ok(found)
        });
        // Stage 2 resolves B; C gets nothing.
        client.expect_search_track().returning(|artist, title| {
            if title == "Creep" {
                Ok(Some(api_track("ext-b", title, artist)))
            } else {
                Ok(None)
            }
        });

        let records = vec![
            record(URI_A, "Paranoid Android", "Radiohead"),
            record(URI_B, "Creep", "Radiohead"),
            record(URI_C, "Unknown Song", "Unknown Artist"),
        ];

        let resolutions = resolver.resolve_plays(&client, &records).await.unwrap();

        assert_eq!(resolutions.len(), 3);
        assert!(resolutions[0].track_id.is_some());
        assert_eq!(resolutions[0].method, Some(MatchMethod::DirectId));
        assert_eq!(resolutions[0].confidence, Some(100));

        assert!(resolutions[1].track_id.is_some());
        assert_eq!(resolutions[1].method, Some(MatchMethod::ArtistTitle));
        assert!(resolutions[1].confidence.unwrap() >= 70);

        assert!(resolutions[2].track_id.is_none());

        let stats = ResolutionStats::from_resolutions(&resolutions);
        assert_eq!(stats.direct_id, 1);
        assert_eq!(stats.search_match, 1);
        assert_eq!(stats.preserved_metadata, 1);
        assert_eq!(stats.total_with_track_id(), 2);
        assert!((stats.resolution_rate_percent() - 66.666).abs() < 0.1);
    }

    #[tokio::test]
    async fn relinked_ids_are_recorded() {
        let repos = Repositories::new(test_db().await);
        let resolver = SpotifyPlayResolver::new(repos);

        let mut client = MockConnectorClient::new();
        client.expect_batch_get_tracks().returning(|_| {
            let mut found = HashMap::new();
            let mut track = api_track("new-id", "Creep", "Radiohead");
            track.linked_from_id = Some("aaaaaaaaaaaaaaaaaaaaaa".to_string());
            found.insert("aaaaaaaaaaaaaaaaaaaaaa".to_string(), track);
            Ok(found)
        });

        let records = vec![record(URI_A, "Creep", "Radiohead")];
        let resolutions = resolver.resolve_plays(&client, &records).await.unwrap();

        assert_eq!(resolutions[0].method, Some(MatchMethod::RelinkedId));
        assert_eq!(resolutions[0].confidence, Some(100));
    }

    #[tokio::test]
    async fn malformed_uri_preserves_metadata() {
        let repos = Repositories::new(test_db().await);
        let resolver = SpotifyPlayResolver::new(repos);

        let mut client = MockConnectorClient::new();
        client.expect_batch_get_tracks().never();
        client.expect_search_track().returning(|_, _| Ok(None));

        let records = vec![record("spotify:track:bogus", "Song", "Artist")];
        let resolutions = resolver.resolve_plays(&client, &records).await.unwrap();

        assert_eq!(resolutions.len(), 1);
        assert!(resolutions[0].track_id.is_none());
        assert!(resolutions[0].method.is_none());
    }

    #[tokio::test]
    async fn every_record_gets_a_resolution() {
        let repos = Repositories::new(test_db().await);
        let resolver = SpotifyPlayResolver::new(repos);

        let mut client = MockConnectorClient::new();
        client
            .expect_batch_get_tracks()
            .returning(|_| Ok(HashMap::new()));
        client.expect_search_track().returning(|_, _| Ok(None));

        // The same URI repeated still yields one resolution per record.
        let records = vec![
            record(URI_A, "Creep", "Radiohead"),
            record(URI_A, "Creep", "Radiohead"),
            record(URI_B, "Karma Police", "Radiohead"),
        ];

        let resolutions = resolver.resolve_plays(&client, &records).await.unwrap();
        assert_eq!(resolutions.len(), records.len());
    }
}
