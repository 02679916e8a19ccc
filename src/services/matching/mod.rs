//! Per-service matching strategies for unmapped tracks.
//!
//! Every provider follows the same two-pass flow: identifier-based search
//! first (ISRC where the service supports it), artist+title search for the
//! residue. Candidates are scored by the confidence scorer and anything
//! below the caller's floor is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchExecutor;
use crate::domain::Track;
use crate::matching::score::calculate_confidence;
use crate::matching::types::{ConfidenceEvidence, MatchMethod};
use crate::ports::connector::{ConnectorApiTrack, ConnectorClient};
use crate::progress::ProgressSink;

/// Minimum confidence for accepting a match during unmapped resolution.
pub const DEFAULT_MIN_CONFIDENCE: i32 = 70;

/// A scored candidate, carrying the full service record so the caller can
/// persist the connector track alongside the mapping.
#[derive(Debug, Clone)]
pub struct ProviderMatch {
    pub track_id: i64,
    pub record: ConnectorApiTrack,
    pub confidence: i32,
    pub method: MatchMethod,
    pub evidence: ConfidenceEvidence,
}

#[async_trait]
pub trait MatchingProvider: Send + Sync {
    /// Find candidate connector ids for unmapped tracks. Tracks without an
    /// id are ignored; per-item API failures leave a gap rather than fail
    /// the call.
    async fn find_potential_matches(
        &self,
        tracks: &[Track],
        min_confidence: i32,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<HashMap<i64, ProviderMatch>>;
}

/// Factory keyed by connector name. Unknown services are a business-rule
/// error at the use-case boundary.
pub fn create_provider(
    connector: &str,
    client: Arc<dyn ConnectorClient>,
    executor: BatchExecutor,
) -> Result<Box<dyn MatchingProvider>> {
    match connector {
        "spotify" | "lastfm" => Ok(Box::new(TwoPassProvider::new(client, executor))),
        other => Err(eyre!("Unknown service: {other}")),
    }
}

/// Shared ISRC-then-artist-title strategy.
pub struct TwoPassProvider {
    client: Arc<dyn ConnectorClient>,
    executor: BatchExecutor,
}

impl TwoPassProvider {
    pub fn new(client: Arc<dyn ConnectorClient>, executor: BatchExecutor) -> Self {
        Self { client, executor }
    }

    fn score_candidate(
        track: &Track,
        record: ConnectorApiTrack,
        method: MatchMethod,
        min_confidence: i32,
    ) -> Option<ProviderMatch> {
        let track_id = track.id?;
        let (confidence, evidence) =
            calculate_confidence(track, &record.as_service_data(), method);
        if confidence < min_confidence {
            tracing::debug!(
                track_id,
                confidence,
                min_confidence,
                method = %method,
                "dropping low-confidence candidate"
            );
            return None;
        }
        Some(ProviderMatch {
            track_id,
            record,
            confidence,
            method,
            evidence,
        })
    }
}

#[async_trait]
impl MatchingProvider for TwoPassProvider {
    async fn find_potential_matches(
        &self,
        tracks: &[Track],
        min_confidence: i32,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<HashMap<i64, ProviderMatch>> {
        let mut matches: HashMap<i64, ProviderMatch> = HashMap::new();

        // Pass 1: ISRC lookup for tracks that carry one.
        let isrc_candidates: Vec<Track> = if self.client.supports_isrc_search() {
            tracks
                .iter()
                .filter(|t| t.id.is_some() && t.isrc.is_some())
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        if !isrc_candidates.is_empty() {
            let client = self.client.clone();
            let output = self
                .executor
                .run(
                    "match_by_isrc",
                    isrc_candidates.clone(),
                    move |track: Track| {
                        let client = client.clone();
                        async move {
                            let isrc = track.isrc.clone().unwrap_or_default();
                            client.search_by_isrc(&isrc).await
                        }
                    },
                    progress,
                    cancel,
                )
                .await;

            for (track, result) in isrc_candidates.iter().zip(output.results) {
                if let Ok(Some(record)) = result
                    && let Some(found) =
                        Self::score_candidate(track, record, MatchMethod::Isrc, min_confidence)
                {
                    matches.insert(found.track_id, found);
                }
            }
        }

        // Pass 2: artist+title search for everything still unresolved.
        let residual: Vec<Track> = tracks
            .iter()
            .filter(|t| {
                t.id.is_some_and(|id| !matches.contains_key(&id))
                    && t.primary_artist().is_some()
            })
            .cloned()
            .collect();

        if !residual.is_empty() && !cancel.is_cancelled() {
            let client = self.client.clone();
            let output = self
                .executor
                .run(
                    "match_by_artist_title",
                    residual.clone(),
                    move |track: Track| {
                        let client = client.clone();
                        async move {
                            let artist = track.primary_artist().unwrap_or_default().to_string();
                            client.search_track(&artist, &track.title).await
                        }
                    },
                    progress,
                    cancel,
                )
                .await;

            for (track, result) in residual.iter().zip(output.results) {
                if let Ok(Some(record)) = result
                    && let Some(found) = Self::score_candidate(
                        track,
                        record,
                        MatchMethod::ArtistTitle,
                        min_confidence,
                    )
                {
                    matches.insert(found.track_id, found);
                }
            }
        }

        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::domain::Artist;
    use crate::ports::connector::MockConnectorClient;
    use crate::progress::NoopProgress;

    fn executor() -> BatchExecutor {
        BatchExecutor::new(BatchConfig {
            retry_count: 0,
            ..BatchConfig::default()
        })
    }

    fn track(id: i64, title: &str, artist: &str, isrc: Option<&str>) -> Track {
        let mut t = Track::new(title, vec![Artist::new(artist)]).with_id(id);
        t.duration_ms = Some(238_000);
        t.isrc = isrc.map(str::to_owned);
        t
    }

    fn candidate(id: &str, title: &str, artist: &str) -> ConnectorApiTrack {
        ConnectorApiTrack {
            id: id.to_string(),
            title: title.to_string(),
            artists: vec![artist.to_string()],
            duration_ms: Some(238_000),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn isrc_pass_runs_first_and_wins() {
        let mut client = MockConnectorClient::new();
        client.expect_supports_isrc_search().return_const(true);
        client
            .expect_search_by_isrc()
            .returning(|_| Ok(Some(candidate("ext-1", "Creep", "Radiohead"))));
        client.expect_search_track().never();

        let provider = TwoPassProvider::new(Arc::new(client), executor());
        let tracks = vec![track(1, "Creep", "Radiohead", Some("GBUM71505078"))];

        let matches = provider
            .find_potential_matches(
                &tracks,
                DEFAULT_MIN_CONFIDENCE,
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let found = &matches[&1];
        assert_eq!(found.method, MatchMethod::Isrc);
        assert_eq!(found.confidence, 95);
        assert_eq!(found.record.id, "ext-1");
    }

    #[tokio::test]
    async fn falls_back_to_artist_title_without_isrc_support() {
        let mut client = MockConnectorClient::new();
        client.expect_supports_isrc_search().return_const(false);
        client
            .expect_search_track()
            .returning(|_, _| Ok(Some(candidate("ext-2", "Creep", "Radiohead"))));

        let provider = TwoPassProvider::new(Arc::new(client), executor());
        let tracks = vec![track(1, "Creep", "Radiohead", Some("GBUM71505078"))];

        let matches = provider
            .find_potential_matches(
                &tracks,
                DEFAULT_MIN_CONFIDENCE,
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(matches[&1].method, MatchMethod::ArtistTitle);
    }

    #[tokio::test]
    async fn low_confidence_candidates_are_dropped() {
        let mut client = MockConnectorClient::new();
        client.expect_supports_isrc_search().return_const(false);
        client
            .expect_search_track()
            .returning(|_, _| Ok(Some(candidate("ext-3", "Something Else Entirely", "Nobody"))));

        let provider = TwoPassProvider::new(Arc::new(client), executor());
        let tracks = vec![track(1, "Creep", "Radiohead", None)];

        let matches = provider
            .find_potential_matches(
                &tracks,
                DEFAULT_MIN_CONFIDENCE,
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn per_item_failures_leave_gaps() {
        let mut client = MockConnectorClient::new();
        client.expect_supports_isrc_search().return_const(false);
        client.expect_search_track().returning(|_, title| {
            if title == "Creep" {
                Err(crate::error::ConnectorError::Permanent("404".into()))
            } else {
                Ok(Some(candidate("ext-4", "Paranoid Android", "Radiohead")))
            }
        });

        let provider = TwoPassProvider::new(Arc::new(client), executor());
        let tracks = vec![
            track(1, "Creep", "Radiohead", None),
            track(2, "Paranoid Android", "Radiohead", None),
        ];

        let matches = provider
            .find_potential_matches(
                &tracks,
                DEFAULT_MIN_CONFIDENCE,
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!matches.contains_key(&1));
        assert!(matches.contains_key(&2));
    }

    #[test]
    fn unknown_service_is_rejected() {
        let client = Arc::new(MockConnectorClient::new());
        assert!(create_provider("tidal", client, executor()).is_err());
    }
}
