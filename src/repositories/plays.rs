use std::collections::HashSet;
use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait};

use crate::database::Database;
use crate::domain::TrackPlay;
use crate::entities;

/// Persistence for listening events. Inserts are idempotent on the
/// value-based dedup fingerprint.
#[derive(Clone)]
pub struct PlayRepository {
    db: Arc<Database>,
}

impl PlayRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert plays, skipping any whose dedup fingerprint is already
    /// present (in the store or earlier in the same batch). Returns the
    /// number actually inserted.
    pub async fn bulk_insert_plays(&self, plays: &[TrackPlay]) -> Result<usize> {
        if plays.is_empty() {
            return Ok(0);
        }

        let hashes: Vec<String> = plays.iter().map(TrackPlay::dedup_hash).collect();
        let mut seen = self.existing_dedup_hashes(&hashes).await?;

        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        let mut inserted = 0;
        for (play, hash) in plays.iter().zip(hashes) {
            if !seen.insert(hash.clone()) {
                continue;
            }

            let active = entities::play::ActiveModel {
                track_id: Set(play.track_id),
                service: Set(play.service.clone()),
                played_at: Set(play.played_at),
                ms_played: Set(play.ms_played),
                context: Set(play.context.clone()),
                import_timestamp: Set(play.import_timestamp),
                import_source: Set(play.import_source.clone()),
                import_batch_id: Set(play.import_batch_id.clone()),
                dedup_hash: Set(hash),
                is_deleted: Set(false),
                ..Default::default()
            };
            entities::play::Entity::insert(active)
                .exec(&txn)
                .await
                .wrap_err("Failed to insert play")?;
            inserted += 1;
        }

        txn.commit().await.wrap_err("Failed to commit plays")?;

        Ok(inserted)
    }

    pub async fn get_plays_by_batch(
        &self,
        batch_id: &str,
    ) -> Result<Vec<entities::play::Model>> {
        entities::play::Entity::find()
            .filter(entities::play::Column::ImportBatchId.eq(batch_id))
            .filter(entities::play::Column::IsDeleted.eq(false))
            .order_by_asc(entities::play::Column::PlayedAt)
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch plays by batch")
    }

    /// Which of the given `played_at` instants already have a play stored
    /// for the service. Used as the caught-up heuristic during incremental
    /// imports; dedup correctness rests on the fingerprint, not on this.
    pub async fn existing_play_times(
        &self,
        service: &str,
        times: &[chrono::DateTime<chrono::Utc>],
    ) -> Result<HashSet<i64>> {
        if times.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = entities::play::Entity::find()
            .filter(entities::play::Column::Service.eq(service))
            .filter(entities::play::Column::PlayedAt.is_in(times.to_vec()))
            .filter(entities::play::Column::IsDeleted.eq(false))
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch existing play times")?;

        Ok(rows.into_iter().map(|row| row.played_at.timestamp()).collect())
    }

    /// Which of the given fingerprints already exist in the store.
    pub async fn existing_dedup_hashes(&self, hashes: &[String]) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = entities::play::Entity::find()
            .filter(entities::play::Column::DedupHash.is_in(hashes.to_vec()))
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch existing play hashes")?;

        Ok(rows.into_iter().map(|row| row.dedup_hash).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::play_context;
    use crate::test_utils::test_db;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn play(title: &str, minute: u32) -> TrackPlay {
        TrackPlay {
            track_id: None,
            service: "lastfm".to_string(),
            played_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap(),
            ms_played: None,
            context: play_context(title, "Radiohead", None, BTreeMap::new()),
            import_timestamp: Utc::now(),
            import_source: "lastfm_strategy_recent".to_string(),
            import_batch_id: "batch-1".to_string(),
        }
    }

    #[tokio::test]
    async fn bulk_insert_deduplicates_on_fingerprint() {
        let db = test_db().await;
        let repo = PlayRepository::new(db);

        let plays = vec![play("Creep", 0), play("Creep", 0), play("Creep", 1)];
        let inserted = repo.bulk_insert_plays(&plays).await.unwrap();
        assert_eq!(inserted, 2);

        // Re-importing the same payload creates no new rows.
        let second = repo.bulk_insert_plays(&plays).await.unwrap();
        assert_eq!(second, 0);

        let stored = repo.get_plays_by_batch("batch-1").await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn batch_lookup_is_time_ordered() {
        let db = test_db().await;
        let repo = PlayRepository::new(db);

        repo.bulk_insert_plays(&[play("Later", 30), play("Earlier", 5)])
            .await
            .unwrap();

        let stored = repo.get_plays_by_batch("batch-1").await.unwrap();
        let titles: Vec<&str> = stored
            .iter()
            .map(|p| p.context.get("title").and_then(|v| v.as_str()).unwrap())
            .collect();
        assert_eq!(titles, vec!["Earlier", "Later"]);
    }
}
