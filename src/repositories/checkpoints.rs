use std::sync::Arc;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::database::Database;
use crate::entities;
use crate::entities::sync_checkpoint::CheckpointEntity;

/// Durable incremental-sync cursors, keyed by `(user, service, entity)`.
#[derive(Clone)]
pub struct CheckpointRepository {
    db: Arc<Database>,
}

impl CheckpointRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        user_id: &str,
        service: &str,
        entity_type: CheckpointEntity,
    ) -> Result<Option<entities::sync_checkpoint::Model>> {
        entities::sync_checkpoint::Entity::find()
            .filter(entities::sync_checkpoint::Column::UserId.eq(user_id))
            .filter(entities::sync_checkpoint::Column::Service.eq(service))
            .filter(entities::sync_checkpoint::Column::EntityType.eq(entity_type))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch sync checkpoint")
    }

    /// Save a checkpoint. Timestamp advances are monotonic: a write with an
    /// older timestamp keeps the stored one (the cursor still updates).
    pub async fn save(
        &self,
        user_id: &str,
        service: &str,
        entity_type: CheckpointEntity,
        last_timestamp: Option<DateTime<Utc>>,
        cursor: Option<String>,
    ) -> Result<entities::sync_checkpoint::Model> {
        let existing = self.get(user_id, service, entity_type.clone()).await?;

        match existing {
            Some(existing) => {
                let effective_timestamp = match (existing.last_timestamp, last_timestamp) {
                    (Some(stored), Some(new)) if new < stored => Some(stored),
                    (Some(stored), None) => Some(stored),
                    (_, new) => new,
                };

                let mut active: entities::sync_checkpoint::ActiveModel = existing.into();
                active.last_timestamp = Set(effective_timestamp);
                active.cursor = Set(cursor);
                active
                    .update(&self.db.conn)
                    .await
                    .wrap_err("Failed to update sync checkpoint")
            }
            None => {
                let active = entities::sync_checkpoint::ActiveModel {
                    user_id: Set(user_id.to_string()),
                    service: Set(service.to_string()),
                    entity_type: Set(entity_type),
                    last_timestamp: Set(last_timestamp),
                    cursor: Set(cursor),
                    ..entities::sync_checkpoint::ActiveModel::new()
                };
                entities::sync_checkpoint::Entity::insert(active)
                    .exec_with_returning(&self.db.conn)
                    .await
                    .wrap_err("Failed to insert sync checkpoint")
            }
        }
    }

    /// Explicit full-history reset: clears the timestamp and cursor so the
    /// next incremental import starts from scratch.
    pub async fn reset(
        &self,
        user_id: &str,
        service: &str,
        entity_type: CheckpointEntity,
    ) -> Result<()> {
        if let Some(existing) = self.get(user_id, service, entity_type).await? {
            let mut active: entities::sync_checkpoint::ActiveModel = existing.into();
            active.last_timestamp = Set(None);
            active.cursor = Set(None);
            active
                .update(&self.db.conn)
                .await
                .wrap_err("Failed to reset sync checkpoint")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_db;
    use chrono::TimeZone;

    #[tokio::test]
    async fn timestamp_advances_are_monotonic() {
        let db = test_db().await;
        let repo = CheckpointRepository::new(db);

        let newer = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        repo.save("user", "lastfm", CheckpointEntity::Plays, Some(newer), None)
            .await
            .unwrap();

        // Writing an older timestamp is a no-op for the timestamp.
        let saved = repo
            .save("user", "lastfm", CheckpointEntity::Plays, Some(older), None)
            .await
            .unwrap();
        assert_eq!(saved.last_timestamp, Some(newer));
    }

    #[tokio::test]
    async fn reset_clears_timestamp_for_full_history() {
        let db = test_db().await;
        let repo = CheckpointRepository::new(db);

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        repo.save(
            "user",
            "lastfm",
            CheckpointEntity::Plays,
            Some(ts),
            Some("page-3".to_string()),
        )
        .await
        .unwrap();

        repo.reset("user", "lastfm", CheckpointEntity::Plays)
            .await
            .unwrap();

        let checkpoint = repo
            .get("user", "lastfm", CheckpointEntity::Plays)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.last_timestamp, None);
        assert_eq!(checkpoint.cursor, None);
    }

    #[tokio::test]
    async fn entity_types_are_independent() {
        let db = test_db().await;
        let repo = CheckpointRepository::new(db);

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        repo.save("user", "spotify", CheckpointEntity::Likes, Some(ts), None)
            .await
            .unwrap();

        let plays = repo
            .get("user", "spotify", CheckpointEntity::Plays)
            .await
            .unwrap();
        assert!(plays.is_none());
    }
}
