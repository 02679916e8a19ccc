//! Incremental like synchronization: import favorites from a source
//! service into the internal store, export internal likes to a target
//! service. Both directions checkpoint their progress.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchExecutor;
use crate::domain::OperationResult;
use crate::entities::sync_checkpoint::CheckpointEntity;
use crate::matching::types::MatchMethod;
use crate::ports::connector::ConnectorClient;
use crate::progress::ProgressSink;
use crate::repositories::Repositories;
use crate::services::identity::TrackIdentityResolver;
use crate::services::imports::CAUGHT_UP_RATIO;
use crate::services::metadata::ConnectorMetadataManager;

/// Service name under which our own copy of a like is stored.
pub const INTERNAL_SERVICE: &str = "internal";

/// Checkpoint flush cadence during like import, in pages.
const CHECKPOINT_EVERY_BATCHES: usize = 5;

pub struct LikeSyncService {
    repos: Repositories,
    metadata: ConnectorMetadataManager,
}

impl LikeSyncService {
    pub fn new(repos: Repositories, metadata: ConnectorMetadataManager) -> Self {
        Self { repos, metadata }
    }

    /// Import liked tracks from a source service. Unknown tracks are
    /// ingested; each liked track gets rows for the source service and for
    /// the internal copy, both stamped `last_synced = now`.
    pub async fn import_likes(
        &self,
        client: Arc<dyn ConnectorClient>,
        user: &str,
        batch_size: usize,
    ) -> OperationResult {
        let source = client.connector_name();
        let operation = format!("{source} Likes Import");
        let mut result = OperationResult::new(&operation);

        let checkpoint = match self
            .repos
            .checkpoints
            .get(user, source, CheckpointEntity::Likes)
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(err) => return OperationResult::failed(&operation, err.to_string()),
        };
        let mut cursor = checkpoint.and_then(|c| c.cursor);
        let mut batches = 0usize;

        loop {
            let (records, next_cursor) = match client
                .get_liked_tracks(batch_size, cursor.clone())
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    result.success = false;
                    result.errors.push(format!("{operation} failed: {err}"));
                    break;
                }
            };

            if records.is_empty() {
                cursor = next_cursor;
                break;
            }

            let mut new_in_page = 0usize;
            let mut existing_in_page = 0usize;
            let page_len = records.len();

            for liked in records {
                let track_id = match self
                    .repos
                    .connectors
                    .ingest_external_track(
                        source,
                        &liked.track,
                        MatchMethod::DirectId,
                        100,
                        None,
                    )
                    .await
                {
                    Ok(track_id) => track_id,
                    Err(err) => {
                        // Storage failures abort the use-case; the
                        // transaction boundary already rolled back.
                        result.success = false;
                        result.errors.push(format!("{operation} failed: {err}"));
                        return result;
                    }
                };

                let already_liked = match self
                    .repos
                    .likes
                    .get_track_likes(track_id, &[source.to_string()])
                    .await
                {
                    Ok(rows) => rows.iter().any(|row| row.is_liked),
                    Err(err) => {
                        result.success = false;
                        result.errors.push(format!("{operation} failed: {err}"));
                        return result;
                    }
                };

                let now = Utc::now();
                let save = async {
                    self.repos
                        .likes
                        .save_track_like(track_id, source, true, liked.liked_at, Some(now))
                        .await?;
                    self.repos
                        .likes
                        .save_track_like(
                            track_id,
                            INTERNAL_SERVICE,
                            true,
                            liked.liked_at,
                            Some(now),
                        )
                        .await
                };
                if let Err(err) = save.await {
                    result.success = false;
                    result.errors.push(format!("{operation} failed: {err}"));
                    return result;
                }

                result.processed_count += 1;
                if already_liked {
                    existing_in_page += 1;
                    result.skipped_count += 1;
                } else {
                    new_in_page += 1;
                    result.imported_count += 1;
                }
            }

            batches += 1;
            if batches % CHECKPOINT_EVERY_BATCHES == 0
                && let Err(err) = self
                    .repos
                    .checkpoints
                    .save(
                        user,
                        source,
                        CheckpointEntity::Likes,
                        Some(Utc::now()),
                        next_cursor.clone(),
                    )
                    .await
            {
                tracing::warn!(error = %err, "mid-import checkpoint flush failed");
            }

            // Caught up: the page brought nothing new and was almost
            // entirely known already.
            let present_ratio = existing_in_page as f64 / page_len as f64;
            if new_in_page == 0 && present_ratio >= CAUGHT_UP_RATIO {
                tracing::info!(batches, "like import caught up; stopping pagination");
                cursor = next_cursor;
                break;
            }

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    cursor = None;
                    break;
                }
            }
        }

        if let Err(err) = self
            .repos
            .checkpoints
            .save(user, source, CheckpointEntity::Likes, Some(Utc::now()), cursor)
            .await
        {
            result.success = false;
            result.errors.push(format!("{operation} failed: {err}"));
        }

        tracing::info!(
            imported = result.imported_count,
            skipped = result.skipped_count,
            "like import finished"
        );
        result
    }

    /// Export internal likes to a target service. Already-loved tracks (per
    /// the cached metadata) are skipped without an API call; successful
    /// loves update the target's like row and the checkpoint advances at
    /// batch boundaries.
    pub async fn export_likes(
        &self,
        client: Arc<dyn ConnectorClient>,
        user: &str,
        batch_size: usize,
        executor: BatchExecutor,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> OperationResult {
        let target = client.connector_name();
        let operation = format!("{target} Likes Export");
        let mut result = OperationResult::new(&operation);

        let since = match self
            .repos
            .checkpoints
            .get(user, target, CheckpointEntity::Likes)
            .await
        {
            Ok(checkpoint) => checkpoint.and_then(|c| c.last_timestamp),
            Err(err) => return OperationResult::failed(&operation, err.to_string()),
        };

        let unsynced = match self
            .repos
            .likes
            .get_unsynced_likes(INTERNAL_SERVICE, target, true, since)
            .await
        {
            Ok(rows) => rows,
            Err(err) => return OperationResult::failed(&operation, err.to_string()),
        };

        if unsynced.is_empty() {
            tracing::info!(target, "no likes pending export");
            return result;
        }

        let track_ids: Vec<i64> = unsynced.iter().map(|row| row.track_id).collect();
        let tracks_by_id = match self.repos.tracks.find_by_ids(&track_ids).await {
            Ok(tracks) => tracks,
            Err(err) => return OperationResult::failed(&operation, err.to_string()),
        };

        let resolver = TrackIdentityResolver::new(self.repos.clone());

        for chunk in track_ids.chunks(batch_size) {
            if cancel.is_cancelled() {
                tracing::info!("like export cancelled");
                break;
            }

            let chunk_tracks: Vec<_> = chunk
                .iter()
                .filter_map(|id| tracks_by_id.get(id).cloned())
                .collect();

            let resolved = match resolver
                .resolve_track_identities(
                    &chunk_tracks,
                    target,
                    client.clone(),
                    BatchExecutor::new(executor.config().clone()),
                    progress,
                    cancel,
                )
                .await
            {
                Ok(resolved) => resolved,
                Err(err) => {
                    result.success = false;
                    result.errors.push(format!("{operation} failed: {err}"));
                    return result;
                }
            };

            // Refresh the target's metadata for this chunk so the loved
            // flag check reflects current state, then merge over cache.
            let (fresh, _) = match self
                .metadata
                .refresh_metadata(chunk, target, client.as_ref())
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    result.success = false;
                    result.errors.push(format!("{operation} failed: {err}"));
                    return result;
                }
            };
            let loved_flags = match self.metadata.get_all_metadata(chunk, target, &fresh).await {
                Ok(merged) => merged,
                Err(err) => {
                    result.success = false;
                    result.errors.push(format!("{operation} failed: {err}"));
                    return result;
                }
            };

            // Work items for this chunk: tracks resolved on the target and
            // not already loved there.
            let mut to_love: Vec<(i64, String, String)> = Vec::new();
            for track_id in chunk {
                result.processed_count += 1;

                let Some(track) = tracks_by_id.get(track_id) else {
                    result.skipped_count += 1;
                    continue;
                };
                if !resolved.contains_key(track_id) {
                    tracing::debug!(track_id, "no identity on target; skipping");
                    result.skipped_count += 1;
                    continue;
                }
                let already_loved = loved_flags
                    .get(track_id)
                    .and_then(|attributes| attributes.get("userloved"))
                    .and_then(|value| value.as_f64().or_else(|| value.as_str()?.parse().ok()))
                    .is_some_and(|flag| flag >= 1.0);
                if already_loved {
                    result.skipped_count += 1;
                    continue;
                }

                let Some(artist) = track.primary_artist() else {
                    result.skipped_count += 1;
                    continue;
                };
                to_love.push((*track_id, artist.to_string(), track.title.clone()));
            }

            let love_client = client.clone();
            let output = executor
                .run(
                    "export_loves",
                    to_love.clone(),
                    move |(_, artist, title): (i64, String, String)| {
                        let client = love_client.clone();
                        async move { client.love_track(&artist, &title).await }
                    },
                    progress,
                    cancel,
                )
                .await;

            let now = Utc::now();
            for ((track_id, artist, title), outcome) in to_love.iter().zip(output.results) {
                match outcome {
                    Ok(true) => {
                        if let Err(err) = self
                            .repos
                            .likes
                            .save_track_like(*track_id, target, true, None, Some(now))
                            .await
                        {
                            result.success = false;
                            result.errors.push(format!("{operation} failed: {err}"));
                            return result;
                        }
                        result.exported_count += 1;
                    }
                    Ok(false) => {
                        result.skipped_count += 1;
                        tracing::warn!(artist, title, "service refused love request");
                    }
                    Err(err) => {
                        result.errors.push(format!("{artist} - {title}: {err}"));
                    }
                }
            }

            if let Err(err) = self
                .repos
                .checkpoints
                .save(user, target, CheckpointEntity::Likes, Some(now), None)
                .await
            {
                result.success = false;
                result.errors.push(format!("{operation} failed: {err}"));
                return result;
            }

            if output.cancelled {
                break;
            }
        }

        tracing::info!(
            exported = result.exported_count,
            skipped = result.skipped_count,
            errors = result.error_count(),
            "like export finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::metrics::MetricRegistry;
    use crate::ports::connector::{
        ConnectorApiTrack, ConnectorLikedTrack, MockConnectorClient,
    };
    use crate::progress::NoopProgress;
    use crate::test_utils::test_db;

    fn like_service(repos: &Repositories) -> LikeSyncService {
        let metadata = ConnectorMetadataManager::new(
            repos.clone(),
            Arc::new(MetricRegistry::with_defaults()),
        );
        LikeSyncService::new(repos.clone(), metadata)
    }

    fn liked(id: &str, title: &str) -> ConnectorLikedTrack {
        ConnectorLikedTrack {
            track: ConnectorApiTrack {
                id: id.to_string(),
                title: title.to_string(),
                artists: vec!["Radiohead".to_string()],
                duration_ms: Some(238_000),
                ..Default::default()
            },
            liked_at: Some(Utc::now()),
        }
    }

    fn executor() -> BatchExecutor {
        BatchExecutor::new(BatchConfig {
            retry_count: 0,
            ..BatchConfig::default()
        })
    }

    #[tokio::test]
    async fn import_creates_tracks_and_like_rows() {
        let repos = Repositories::new(test_db().await);
        let service = like_service(&repos);

        let mut client = MockConnectorClient::new();
        client.expect_connector_name().return_const("spotify");
        client
            .expect_get_liked_tracks()
            .times(1)
            .returning(|_, _| Ok((vec![liked("ext-1", "Creep")], None)));

        let result = service.import_likes(Arc::new(client), "user", 50).await;

        assert!(result.success);
        assert_eq!(result.imported_count, 1);

        let track = repos
            .tracks
            .find_by_external("spotify", "ext-1")
            .await
            .unwrap()
            .unwrap();
        let likes = repos
            .likes
            .get_track_likes(track.id.unwrap(), &[])
            .await
            .unwrap();
        let services: Vec<&str> = likes.iter().map(|l| l.service.as_str()).collect();
        assert!(services.contains(&"spotify"));
        assert!(services.contains(&INTERNAL_SERVICE));
        assert!(likes.iter().all(|l| l.is_liked && l.last_synced.is_some()));

        let checkpoint = repos
            .checkpoints
            .get("user", "spotify", CheckpointEntity::Likes)
            .await
            .unwrap();
        assert!(checkpoint.is_some());
    }

    #[tokio::test]
    async fn import_stops_when_caught_up() {
        let repos = Repositories::new(test_db().await);
        let service = like_service(&repos);

        let make_client = || {
            let mut client = MockConnectorClient::new();
            client.expect_connector_name().return_const("spotify");
            // One non-empty page, then an empty tail.
            client.expect_get_liked_tracks().returning(|_, cursor| {
                if cursor.is_none() {
                    Ok((
                        vec![liked("ext-1", "Creep"), liked("ext-2", "Karma Police")],
                        Some("next".to_string()),
                    ))
                } else {
                    Ok((Vec::new(), None))
                }
            });
            client
        };

        // First run imports the page, second run recognizes it and stops
        // despite the service offering another cursor.
        let first = service
            .import_likes(Arc::new(make_client()), "user", 50)
            .await;
        assert_eq!(first.imported_count, 2);

        let second = service
            .import_likes(Arc::new(make_client()), "user", 50)
            .await;
        assert!(second.success);
        assert_eq!(second.imported_count, 0);
        assert_eq!(second.skipped_count, 2);
    }

    #[tokio::test]
    async fn export_loves_unsynced_and_skips_already_loved() {
        let repos = Repositories::new(test_db().await);
        let service = like_service(&repos);

        // Two internally liked tracks, both already mapped to Last.fm.
        let mut ids = Vec::new();
        for (external, title) in [("Radiohead||Creep", "Creep"), ("Radiohead||Lucky", "Lucky")] {
            let track_id = repos
                .connectors
                .ingest_external_track(
                    "lastfm",
                    &ConnectorApiTrack {
                        id: external.to_string(),
                        title: title.to_string(),
                        artists: vec!["Radiohead".to_string()],
                        ..Default::default()
                    },
                    MatchMethod::DirectId,
                    100,
                    None,
                )
                .await
                .unwrap();
            repos
                .likes
                .save_track_like(track_id, INTERNAL_SERVICE, true, None, None)
                .await
                .unwrap();
            ids.push(track_id);
        }

        // The first track is already loved on the target.
        let mut loved = std::collections::BTreeMap::new();
        loved.insert("userloved".to_string(), serde_json::json!(1.0));
        repos
            .connectors
            .update_connector_metadata("lastfm", "Radiohead||Creep", &loved)
            .await
            .unwrap();

        let mut client = MockConnectorClient::new();
        client.expect_connector_name().return_const("lastfm");
        // The refresh returns nothing, so the loved check falls back to the
        // cached metadata written above.
        client
            .expect_batch_get_track_info()
            .returning(|_| Ok(std::collections::HashMap::new()));
        // Only the not-yet-loved track triggers a love call.
        client
            .expect_love_track()
            .times(1)
            .returning(|_, title| {
                assert_eq!(title, "Lucky");
                Ok(true)
            });

        let result = service
            .export_likes(
                Arc::new(client),
                "user",
                20,
                executor(),
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await;

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.exported_count, 1);
        assert_eq!(result.skipped_count, 1);

        let lastfm_like = repos
            .likes
            .get_track_likes(ids[1], &["lastfm".to_string()])
            .await
            .unwrap();
        assert!(lastfm_like[0].is_liked);
        assert!(lastfm_like[0].last_synced.is_some());

        let checkpoint = repos
            .checkpoints
            .get("user", "lastfm", CheckpointEntity::Likes)
            .await
            .unwrap();
        assert!(checkpoint.unwrap().last_timestamp.is_some());
    }

    #[tokio::test]
    async fn export_with_nothing_pending_is_zero_work() {
        let repos = Repositories::new(test_db().await);
        let service = like_service(&repos);

        let mut client = MockConnectorClient::new();
        client.expect_connector_name().return_const("lastfm");
        client.expect_love_track().never();

        let result = service
            .export_likes(
                Arc::new(client),
                "user",
                20,
                executor(),
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.exported_count, 0);
    }
}
