use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::database::Database;
use crate::entities;

/// Persistence for per-service "liked" flags.
#[derive(Clone)]
pub struct LikeRepository {
    db: Arc<Database>,
}

impl LikeRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get_track_likes(
        &self,
        track_id: i64,
        services: &[String],
    ) -> Result<Vec<entities::track_like::Model>> {
        let mut query = entities::track_like::Entity::find()
            .filter(entities::track_like::Column::TrackId.eq(track_id))
            .filter(entities::track_like::Column::IsDeleted.eq(false));

        if !services.is_empty() {
            query = query.filter(entities::track_like::Column::Service.is_in(services.to_vec()));
        }

        query
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track likes")
    }

    /// Upsert the like flag for a `(track, service)` pair.
    pub async fn save_track_like(
        &self,
        track_id: i64,
        service: &str,
        is_liked: bool,
        liked_at: Option<DateTime<Utc>>,
        last_synced: Option<DateTime<Utc>>,
    ) -> Result<entities::track_like::Model> {
        let existing = entities::track_like::Entity::find()
            .filter(entities::track_like::Column::TrackId.eq(track_id))
            .filter(entities::track_like::Column::Service.eq(service))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track like")?;

        match existing {
            Some(existing) => {
                let mut active: entities::track_like::ActiveModel = existing.into();
                active.is_liked = Set(is_liked);
                if liked_at.is_some() {
                    active.liked_at = Set(liked_at);
                }
                if last_synced.is_some() {
                    active.last_synced = Set(last_synced);
                }
                active.is_deleted = Set(false);
                active
                    .update(&self.db.conn)
                    .await
                    .wrap_err("Failed to update track like")
            }
            None => {
                let active = entities::track_like::ActiveModel {
                    track_id: Set(track_id),
                    service: Set(service.to_string()),
                    is_liked: Set(is_liked),
                    liked_at: Set(liked_at),
                    last_synced: Set(last_synced),
                    is_deleted: Set(false),
                    ..Default::default()
                };
                entities::track_like::Entity::insert(active)
                    .exec_with_returning(&self.db.conn)
                    .await
                    .wrap_err("Failed to insert track like")
            }
        }
    }

    pub async fn get_all_liked(
        &self,
        service: &str,
        is_liked: bool,
    ) -> Result<Vec<entities::track_like::Model>> {
        entities::track_like::Entity::find()
            .filter(entities::track_like::Column::Service.eq(service))
            .filter(entities::track_like::Column::IsLiked.eq(is_liked))
            .filter(entities::track_like::Column::IsDeleted.eq(false))
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch liked tracks")
    }

    /// Likes present on `source` that have not been reconciled with
    /// `target`: no target row, target row with a different flag, or a
    /// target row never synced. Optionally limited to likes recorded after
    /// `since`.
    pub async fn get_unsynced_likes(
        &self,
        source: &str,
        target: &str,
        is_liked: bool,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<entities::track_like::Model>> {
        let mut query = entities::track_like::Entity::find()
            .filter(entities::track_like::Column::Service.eq(source))
            .filter(entities::track_like::Column::IsLiked.eq(is_liked))
            .filter(entities::track_like::Column::IsDeleted.eq(false));

        if let Some(since) = since {
            query = query.filter(
                sea_orm::Condition::any()
                    .add(entities::track_like::Column::LikedAt.is_null())
                    .add(entities::track_like::Column::LikedAt.gte(since)),
            );
        }

        let source_rows = query
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch source likes")?;

        if source_rows.is_empty() {
            return Ok(Vec::new());
        }

        let track_ids: Vec<i64> = source_rows.iter().map(|row| row.track_id).collect();
        let synced_target_ids: HashSet<i64> = entities::track_like::Entity::find()
            .filter(entities::track_like::Column::TrackId.is_in(track_ids))
            .filter(entities::track_like::Column::Service.eq(target))
            .filter(entities::track_like::Column::IsLiked.eq(is_liked))
            .filter(entities::track_like::Column::LastSynced.is_not_null())
            .filter(entities::track_like::Column::IsDeleted.eq(false))
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch target likes")?
            .into_iter()
            .map(|row| row.track_id)
            .collect();

        Ok(source_rows
            .into_iter()
            .filter(|row| !synced_target_ids.contains(&row.track_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Artist, Track};
    use crate::repositories::track::TrackRepository;
    use crate::test_utils::test_db;

    async fn make_track(db: &Arc<Database>, title: &str) -> i64 {
        TrackRepository::new(db.clone())
            .save(&Track::new(title, vec![Artist::new("Radiohead")]))
            .await
            .unwrap()
            .id
            .unwrap()
    }

    #[tokio::test]
    async fn like_upsert_is_unique_per_track_and_service() {
        let db = test_db().await;
        let repo = LikeRepository::new(db.clone());
        let track_id = make_track(&db, "Creep").await;

        repo.save_track_like(track_id, "spotify", true, None, None)
            .await
            .unwrap();
        repo.save_track_like(track_id, "spotify", true, None, Some(Utc::now()))
            .await
            .unwrap();

        let likes = repo
            .get_track_likes(track_id, &["spotify".to_string()])
            .await
            .unwrap();
        assert_eq!(likes.len(), 1);
        assert!(likes[0].last_synced.is_some());
    }

    #[tokio::test]
    async fn unsynced_excludes_already_synced_targets() {
        let db = test_db().await;
        let repo = LikeRepository::new(db.clone());
        let synced = make_track(&db, "Creep").await;
        let pending = make_track(&db, "Paranoid Android").await;

        for track_id in [synced, pending] {
            repo.save_track_like(track_id, "internal", true, None, None)
                .await
                .unwrap();
        }
        repo.save_track_like(synced, "lastfm", true, None, Some(Utc::now()))
            .await
            .unwrap();

        let unsynced = repo
            .get_unsynced_likes("internal", "lastfm", true, None)
            .await
            .unwrap();

        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].track_id, pending);
    }
}
