//! Last.fm play imports: head-only (`recent`) and checkpointed
//! (`incremental`) strategies over the same processing core.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use serde_json::json;

use crate::domain::{TrackPlay, play_context};
use crate::entities::sync_checkpoint::CheckpointEntity;
use crate::matching::types::MatchMethod;
use crate::ports::connector::{ConnectorApiTrack, ConnectorClient, ConnectorPlayRecord};
use crate::repositories::Repositories;
use crate::services::imports::{CAUGHT_UP_RATIO, PlayImportService};

pub const SERVICE_NAME: &str = "lastfm";
pub const RECENT_IMPORT_SOURCE: &str = "lastfm_strategy_recent";
pub const INCREMENTAL_IMPORT_SOURCE: &str = "lastfm_strategy_incremental";

const PAGE_SIZE: usize = 200;

/// Build one play from a recent-tracks record, optionally resolving the
/// record to an internal track through the connector repository.
async fn build_play(
    repos: &Repositories,
    record: &ConnectorPlayRecord,
    resolve_tracks: bool,
    import_source: &str,
    batch_id: &str,
    import_timestamp: DateTime<Utc>,
) -> Result<TrackPlay> {
    let track_id = if resolve_tracks {
        match &record.track_id {
            Some(external_id) => {
                let api_track = ConnectorApiTrack {
                    id: external_id.clone(),
                    title: record.title.clone(),
                    artists: vec![record.artist.clone()],
                    album: record.album.clone(),
                    raw: record.raw.clone(),
                    ..Default::default()
                };
                Some(
                    repos
                        .connectors
                        .ingest_external_track(
                            SERVICE_NAME,
                            &api_track,
                            MatchMethod::DirectId,
                            100,
                            None,
                        )
                        .await
                        .wrap_err("Failed to resolve play to internal track")?,
                )
            }
            None => None,
        }
    } else {
        None
    };

    let mut extra = BTreeMap::new();
    if let Some(external_id) = &record.track_id {
        extra.insert("lastfm_track_id".to_string(), json!(external_id));
    }

    Ok(TrackPlay {
        track_id,
        service: SERVICE_NAME.to_string(),
        played_at: record.played_at,
        ms_played: record.ms_played,
        context: play_context(&record.title, &record.artist, record.album.as_deref(), extra),
        import_timestamp,
        import_source: import_source.to_string(),
        import_batch_id: batch_id.to_string(),
    })
}

async fn build_plays(
    repos: &Repositories,
    records: &[ConnectorPlayRecord],
    resolve_tracks: bool,
    import_source: &str,
    batch_id: &str,
    import_timestamp: DateTime<Utc>,
) -> Result<Vec<TrackPlay>> {
    let mut plays = Vec::with_capacity(records.len());
    for record in records {
        plays.push(
            build_play(
                repos,
                record,
                resolve_tracks,
                import_source,
                batch_id,
                import_timestamp,
            )
            .await?,
        );
    }
    Ok(plays)
}

/// Head-only import of the most recent plays, up to a limit. No checkpoint.
pub struct LastfmRecentImport {
    client: Arc<dyn ConnectorClient>,
    repos: Repositories,
    limit: usize,
    resolve_tracks: bool,
}

impl LastfmRecentImport {
    pub fn new(
        client: Arc<dyn ConnectorClient>,
        repos: Repositories,
        limit: usize,
        resolve_tracks: bool,
    ) -> Self {
        Self {
            client,
            repos,
            limit,
            resolve_tracks,
        }
    }
}

#[async_trait]
impl PlayImportService for LastfmRecentImport {
    type Raw = ConnectorPlayRecord;

    fn operation_name(&self) -> &str {
        "Last.fm Recent Plays Import"
    }

    async fn fetch(&self) -> Result<Vec<ConnectorPlayRecord>> {
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            let page_limit = PAGE_SIZE.min(self.limit - records.len());
            let (page_records, has_more) = self
                .client
                .get_recent_plays(Some(page_limit), None, Some(page))
                .await
                .wrap_err("Failed to fetch recent plays")?;

            let empty = page_records.is_empty();
            records.extend(page_records);

            if records.len() >= self.limit || !has_more || empty {
                break;
            }
            page += 1;
        }

        records.truncate(self.limit);
        Ok(records)
    }

    async fn process(
        &self,
        raw: &[ConnectorPlayRecord],
        batch_id: &str,
        import_timestamp: DateTime<Utc>,
    ) -> Result<Vec<TrackPlay>> {
        build_plays(
            &self.repos,
            raw,
            self.resolve_tracks,
            RECENT_IMPORT_SOURCE,
            batch_id,
            import_timestamp,
        )
        .await
    }

    async fn handle_checkpoints(&self, _raw: &[ConnectorPlayRecord]) -> Result<()> {
        Ok(())
    }
}

/// Checkpointed import: fetches forward from the stored timestamp, stops
/// when a page brings nothing new, advances the checkpoint to the newest
/// play seen.
pub struct LastfmIncrementalImport {
    client: Arc<dyn ConnectorClient>,
    repos: Repositories,
    user: String,
    resolve_tracks: bool,
}

impl LastfmIncrementalImport {
    pub fn new(
        client: Arc<dyn ConnectorClient>,
        repos: Repositories,
        user: String,
        resolve_tracks: bool,
    ) -> Self {
        Self {
            client,
            repos,
            user,
            resolve_tracks,
        }
    }
}

#[async_trait]
impl PlayImportService for LastfmIncrementalImport {
    type Raw = ConnectorPlayRecord;

    fn operation_name(&self) -> &str {
        "Last.fm Incremental Plays Import"
    }

    async fn fetch(&self) -> Result<Vec<ConnectorPlayRecord>> {
        let checkpoint = self
            .repos
            .checkpoints
            .get(&self.user, SERVICE_NAME, CheckpointEntity::Plays)
            .await?;
        let from_time = checkpoint.and_then(|c| c.last_timestamp);

        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            let (page_records, has_more) = self
                .client
                .get_recent_plays(Some(PAGE_SIZE), from_time, Some(page))
                .await
                .wrap_err("Failed to fetch incremental plays")?;

            if page_records.is_empty() {
                break;
            }

            // Caught-up heuristic: a page that is almost entirely already
            // stored, with nothing new, means we have reached history we
            // imported before.
            let times: Vec<DateTime<Utc>> =
                page_records.iter().map(|r| r.played_at).collect();
            let existing = self
                .repos
                .plays
                .existing_play_times(SERVICE_NAME, &times)
                .await?;
            let already_present = page_records
                .iter()
                .filter(|r| existing.contains(&r.played_at.timestamp()))
                .count();
            let new_records = page_records.len() - already_present;
            let present_ratio = already_present as f64 / page_records.len() as f64;

            records.extend(page_records);

            if new_records == 0 && present_ratio >= CAUGHT_UP_RATIO {
                tracing::info!(page, "incremental import caught up; stopping pagination");
                break;
            }
            if !has_more {
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    async fn process(
        &self,
        raw: &[ConnectorPlayRecord],
        batch_id: &str,
        import_timestamp: DateTime<Utc>,
    ) -> Result<Vec<TrackPlay>> {
        build_plays(
            &self.repos,
            raw,
            self.resolve_tracks,
            INCREMENTAL_IMPORT_SOURCE,
            batch_id,
            import_timestamp,
        )
        .await
    }

    async fn handle_checkpoints(&self, raw: &[ConnectorPlayRecord]) -> Result<()> {
        let Some(newest) = raw.iter().map(|r| r.played_at).max() else {
            return Ok(());
        };

        self.repos
            .checkpoints
            .save(
                &self.user,
                SERVICE_NAME,
                CheckpointEntity::Plays,
                Some(newest),
                None,
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::connector::MockConnectorClient;
    use crate::services::imports::run_import;
    use crate::test_utils::test_db;
    use chrono::TimeZone;
    use serde_json::Value;

    fn record(title: &str, hour: u32) -> ConnectorPlayRecord {
        ConnectorPlayRecord {
            title: title.to_string(),
            artist: "Radiohead".to_string(),
            album: None,
            played_at: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            ms_played: None,
            track_id: Some(format!("Radiohead||{title}")),
            raw: Value::Null,
        }
    }

    #[tokio::test]
    async fn incremental_import_advances_checkpoint() {
        let repos = Repositories::new(test_db().await);

        // Checkpoint predates the records the service returns.
        repos
            .checkpoints
            .save(
                "user",
                SERVICE_NAME,
                CheckpointEntity::Plays,
                Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()),
                None,
            )
            .await
            .unwrap();

        let mut client = MockConnectorClient::new();
        client
            .expect_get_recent_plays()
            .times(1)
            .returning(|_, from_time, _| {
                assert_eq!(
                    from_time,
                    Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
                );
                Ok((vec![record("Creep", 12), record("Karma Police", 13)], false))
            });

        let import = LastfmIncrementalImport::new(
            Arc::new(client),
            repos.clone(),
            "user".to_string(),
            false,
        );
        let result = run_import(&import, &repos, None).await;

        assert!(result.success);
        assert_eq!(result.imported_count, 2);

        let batch_id = result.batch_id.unwrap();
        let plays = repos.plays.get_plays_by_batch(&batch_id).await.unwrap();
        assert!(plays
            .iter()
            .all(|p| p.import_source == INCREMENTAL_IMPORT_SOURCE));

        let checkpoint = repos
            .checkpoints
            .get("user", SERVICE_NAME, CheckpointEntity::Plays)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            checkpoint.last_timestamp,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn incremental_import_stops_when_caught_up() {
        let repos = Repositories::new(test_db().await);

        // First import stores the page.
        let mut client = MockConnectorClient::new();
        client
            .expect_get_recent_plays()
            .times(1)
            .returning(|_, _, _| {
                Ok((
                    vec![record("One", 10), record("Two", 11), record("Three", 12)],
                    false,
                ))
            });
        let import = LastfmIncrementalImport::new(
            Arc::new(client),
            repos.clone(),
            "user".to_string(),
            false,
        );
        run_import(&import, &repos, None).await;

        // Second import sees the same page with has_more = true; the
        // caught-up rule must stop after one call instead of paginating.
        let mut client = MockConnectorClient::new();
        client
            .expect_get_recent_plays()
            .times(1)
            .returning(|_, _, _| {
                Ok((
                    vec![record("One", 10), record("Two", 11), record("Three", 12)],
                    true,
                ))
            });
        let import = LastfmIncrementalImport::new(
            Arc::new(client),
            repos.clone(),
            "user".to_string(),
            false,
        );
        let result = run_import(&import, &repos, None).await;

        assert!(result.success);
        assert_eq!(result.imported_count, 0);
        assert_eq!(result.skipped_count, 3);
    }

    #[tokio::test]
    async fn recent_import_respects_limit_and_sets_source() {
        let repos = Repositories::new(test_db().await);

        let mut client = MockConnectorClient::new();
        client
            .expect_get_recent_plays()
            .times(1)
            .returning(|limit, _, _| {
                assert_eq!(limit, Some(2));
                Ok((vec![record("One", 10), record("Two", 11)], true))
            });

        let import =
            LastfmRecentImport::new(Arc::new(client), repos.clone(), 2, false);
        let result = run_import(&import, &repos, None).await;

        assert!(result.success);
        assert_eq!(result.imported_count, 2);

        let plays = repos
            .plays
            .get_plays_by_batch(&result.batch_id.unwrap())
            .await
            .unwrap();
        assert!(plays.iter().all(|p| p.import_source == RECENT_IMPORT_SOURCE));
    }

    #[tokio::test]
    async fn resolve_tracks_creates_internal_tracks() {
        let repos = Repositories::new(test_db().await);

        let mut client = MockConnectorClient::new();
        client
            .expect_get_recent_plays()
            .returning(|_, _, _| Ok((vec![record("Creep", 12)], false)));

        let import = LastfmRecentImport::new(Arc::new(client), repos.clone(), 50, true);
        let result = run_import(&import, &repos, None).await;

        let plays = repos
            .plays
            .get_plays_by_batch(&result.batch_id.unwrap())
            .await
            .unwrap();
        let track_id = plays[0].track_id.unwrap();

        let track = repos
            .tracks
            .find_by_external(SERVICE_NAME, "Radiohead||Creep")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(track.id, Some(track_id));
    }
}
