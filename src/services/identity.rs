//! Identity resolution: mapping internal tracks to their per-service ids.
//!
//! Handles only identity. Metadata fetching, freshness, and extraction live
//! in the metadata manager.

use std::str::FromStr;
use std::sync::Arc;

use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchExecutor;
use crate::domain::Track;
use crate::matching::types::{MatchMethod, MatchResult, MatchResultsById};
use crate::ports::connector::ConnectorClient;
use crate::progress::ProgressSink;
use crate::repositories::Repositories;
use crate::services::matching::{DEFAULT_MIN_CONFIDENCE, create_provider};

pub struct TrackIdentityResolver {
    repos: Repositories,
}

impl TrackIdentityResolver {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Resolve identities for a tracklist against one target service.
    ///
    /// Existing mappings are authoritative: their stored confidence is
    /// returned as-is and no matching API call is made for them. Only the
    /// residue goes to the service's matching provider, and new resolutions
    /// are persisted before returning. A storage failure during persist is
    /// fatal for the call.
    pub async fn resolve_track_identities(
        &self,
        tracks: &[Track],
        connector: &str,
        client: Arc<dyn ConnectorClient>,
        executor: BatchExecutor,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<MatchResultsById> {
        if tracks.is_empty() {
            return Ok(MatchResultsById::new());
        }

        // Tracks without an id are invalid in workflow contexts; drop them
        // up front.
        let valid_tracks: Vec<&Track> = tracks.iter().filter(|t| t.id.is_some()).collect();
        if valid_tracks.is_empty() {
            return Ok(MatchResultsById::new());
        }
        let track_ids: Vec<i64> = valid_tracks.iter().filter_map(|t| t.id).collect();

        tracing::info!(
            connector,
            track_count = track_ids.len(),
            "resolving track identities"
        );

        // Step 1: existing mappings from the store.
        let mut results = self.existing_mappings(&track_ids, connector).await?;

        let to_resolve: Vec<Track> = valid_tracks
            .iter()
            .filter(|t| t.id.is_some_and(|id| !results.contains_key(&id)))
            .map(|t| (*t).clone())
            .collect();

        if to_resolve.is_empty() {
            tracing::info!(
                resolved = results.len(),
                "all tracks already have identity mappings"
            );
            return Ok(results);
        }

        tracing::info!(
            unresolved = to_resolve.len(),
            connector,
            "resolving new track identities"
        );

        // Step 2: matching provider for the residue.
        let provider = create_provider(connector, client, executor)?;
        let found = provider
            .find_potential_matches(&to_resolve, DEFAULT_MIN_CONFIDENCE, progress, cancel)
            .await?;

        // Step 3: persist new resolutions. Any storage error aborts the
        // call; in-memory results are not returned.
        for provider_match in found.values() {
            self.repos
                .connectors
                .map_track_to_connector(
                    provider_match.track_id,
                    connector,
                    &provider_match.record,
                    provider_match.method,
                    provider_match.confidence,
                    Some(&provider_match.evidence),
                )
                .await?;
        }

        // Step 4: union.
        for track in &to_resolve {
            let Some(id) = track.id else { continue };
            if let Some(provider_match) = found.get(&id) {
                results.insert(
                    id,
                    MatchResult {
                        track: track.clone(),
                        connector_id: provider_match.record.id.clone(),
                        confidence: provider_match.confidence,
                        method: provider_match.method,
                        evidence: Some(provider_match.evidence.clone()),
                    },
                );
            }
        }

        Ok(results)
    }

    /// Load stored mappings for the given ids; stored confidence is not
    /// re-scored.
    async fn existing_mappings(
        &self,
        track_ids: &[i64],
        connector: &str,
    ) -> Result<MatchResultsById> {
        let mappings = self
            .repos
            .connectors
            .get_connector_mappings(track_ids, Some(connector))
            .await?;

        if mappings.is_empty() {
            return Ok(MatchResultsById::new());
        }

        let mapped_ids: Vec<i64> = mappings.keys().copied().collect();
        let tracks_by_id = self.repos.tracks.find_by_ids(&mapped_ids).await?;

        let mut results = MatchResultsById::new();
        for (track_id, by_connector) in mappings {
            let Some(connector_id) = by_connector.get(connector) else {
                continue;
            };
            let Some(track) = tracks_by_id.get(&track_id) else {
                continue;
            };
            let Some(info) = self
                .repos
                .connectors
                .get_mapping_info(track_id, connector, connector_id)
                .await?
            else {
                continue;
            };

            results.insert(
                track_id,
                MatchResult {
                    track: track.clone(),
                    connector_id: connector_id.clone(),
                    confidence: info.confidence,
                    method: MatchMethod::from_str(&info.method)
                        .unwrap_or(MatchMethod::ExistingMapping),
                    evidence: info.evidence,
                },
            );
        }

        tracing::info!(found = results.len(), "existing identity mappings loaded");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::domain::Artist;
    use crate::ports::connector::{ConnectorApiTrack, MockConnectorClient};
    use crate::progress::NoopProgress;
    use crate::test_utils::test_db;

    fn executor() -> BatchExecutor {
        BatchExecutor::new(BatchConfig {
            retry_count: 0,
            ..BatchConfig::default()
        })
    }

    async fn setup() -> (Repositories, TrackIdentityResolver) {
        let db = test_db().await;
        let repos = Repositories::new(db);
        (repos.clone(), TrackIdentityResolver::new(repos))
    }

    fn candidate(id: &str) -> ConnectorApiTrack {
        ConnectorApiTrack {
            id: id.to_string(),
            title: "Creep".to_string(),
            artists: vec!["Radiohead".to_string()],
            duration_ms: Some(238_000),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn second_resolution_is_fully_cached() {
        let (repos, resolver) = setup().await;

        let track = repos
            .tracks
            .save(
                &Track::new("Creep", vec![Artist::new("Radiohead")]).with_duration_ms(238_000),
            )
            .await
            .unwrap();

        let mut client = MockConnectorClient::new();
        client.expect_supports_isrc_search().return_const(false);
        // Exactly one search across both resolutions: the second call must
        // come entirely from the store.
        client
            .expect_search_track()
            .times(1)
            .returning(|_, _| Ok(Some(candidate("ext-1"))));
        let client: Arc<dyn ConnectorClient> = Arc::new(client);

        let cancel = CancellationToken::new();
        let tracks = vec![track];

        let first = resolver
            .resolve_track_identities(
                &tracks,
                "spotify",
                client.clone(),
                executor(),
                &NoopProgress,
                &cancel,
            )
            .await
            .unwrap();
        let second = resolver
            .resolve_track_identities(
                &tracks,
                "spotify",
                client,
                executor(),
                &NoopProgress,
                &cancel,
            )
            .await
            .unwrap();

        let id = tracks[0].id.unwrap();
        assert_eq!(first[&id].connector_id, "ext-1");
        assert_eq!(second[&id].connector_id, "ext-1");
        assert_eq!(first[&id].confidence, second[&id].confidence);
    }

    #[tokio::test]
    async fn tracks_without_id_are_dropped() {
        let (_, resolver) = setup().await;

        let mut client = MockConnectorClient::new();
        client.expect_supports_isrc_search().return_const(false);
        client.expect_search_track().never();
        let client: Arc<dyn ConnectorClient> = Arc::new(client);

        let results = resolver
            .resolve_track_identities(
                &[Track::new("Creep", vec![Artist::new("Radiohead")])],
                "spotify",
                client,
                executor(),
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn empty_tracklist_makes_no_remote_calls() {
        let (_, resolver) = setup().await;

        let client: Arc<dyn ConnectorClient> = Arc::new(MockConnectorClient::new());
        let results = resolver
            .resolve_track_identities(
                &[],
                "spotify",
                client,
                executor(),
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn per_item_failure_leaves_gap_not_error() {
        let (repos, resolver) = setup().await;

        let track = repos
            .tracks
            .save(&Track::new("Creep", vec![Artist::new("Radiohead")]))
            .await
            .unwrap();

        let mut client = MockConnectorClient::new();
        client.expect_supports_isrc_search().return_const(false);
        client
            .expect_search_track()
            .returning(|_, _| Err(crate::error::ConnectorError::Permanent("404".into())));
        let client: Arc<dyn ConnectorClient> = Arc::new(client);

        let results = resolver
            .resolve_track_identities(
                &[track],
                "spotify",
                client,
                executor(),
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(results.is_empty());
    }
}
