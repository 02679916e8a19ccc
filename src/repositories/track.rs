use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::database::Database;
use crate::domain::Track;
use crate::entities;
use crate::entities::track::StringVec;

/// CRUD for canonical tracks.
#[derive(Clone)]
pub struct TrackRepository {
    db: Arc<Database>,
}

impl TrackRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn find_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Track>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let models = entities::track::Entity::find()
            .filter(entities::track::Column::Id.is_in(ids.to_vec()))
            .filter(entities::track::Column::IsDeleted.eq(false))
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch tracks by ids")?;

        Ok(models
            .into_iter()
            .map(|model| (model.id, Track::from(model)))
            .collect())
    }

    /// Resolve a canonical track by its identity on an external service.
    pub async fn find_by_external(
        &self,
        connector: &str,
        external_id: &str,
    ) -> Result<Option<Track>> {
        let connector_track = entities::connector_track::Entity::find()
            .filter(entities::connector_track::Column::Connector.eq(connector))
            .filter(entities::connector_track::Column::ConnectorTrackId.eq(external_id))
            .filter(entities::connector_track::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch connector track")?;

        let Some(connector_track) = connector_track else {
            return Ok(None);
        };

        let mapping = entities::track_mapping::Entity::find()
            .filter(entities::track_mapping::Column::ConnectorTrackId.eq(connector_track.id))
            .filter(entities::track_mapping::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track mapping")?;

        let Some(mapping) = mapping else {
            return Ok(None);
        };

        let track = entities::track::Entity::find_by_id(mapping.track_id)
            .filter(entities::track::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track")?;

        Ok(track.map(Track::from))
    }

    /// Insert a new track or update an existing one; returns the track with
    /// its id assigned. Title and artists are validated here so no invalid
    /// row can enter the store.
    pub async fn save(&self, track: &Track) -> Result<Track> {
        if track.title.trim().is_empty() {
            return Err(eyre!("Track title must not be empty"));
        }
        if track.artists.is_empty() {
            return Err(eyre!("Track must have at least one artist"));
        }

        let artists = StringVec(track.artist_names());
        let isrc = track.isrc.as_deref().map(str::to_uppercase);

        let model = match track.id {
            Some(id) => {
                let existing = entities::track::Entity::find_by_id(id)
                    .one(&self.db.conn)
                    .await
                    .wrap_err("Failed to fetch track for update")?
                    .ok_or_else(|| eyre!("Track {id} not found"))?;

                let mut active: entities::track::ActiveModel = existing.into();
                active.title = Set(track.title.clone());
                active.artists = Set(artists);
                active.album = Set(track.album.clone());
                active.duration_ms = Set(track.duration_ms);
                active.release_date = Set(track.release_date.clone());
                active.isrc = Set(isrc);
                active
                    .update(&self.db.conn)
                    .await
                    .wrap_err("Failed to update track")?
            }
            None => {
                let active = entities::track::ActiveModel {
                    title: Set(track.title.clone()),
                    artists: Set(artists),
                    album: Set(track.album.clone()),
                    duration_ms: Set(track.duration_ms),
                    release_date: Set(track.release_date.clone()),
                    isrc: Set(isrc),
                    ..entities::track::ActiveModel::new()
                };
                entities::track::Entity::insert(active)
                    .exec_with_returning(&self.db.conn)
                    .await
                    .wrap_err("Failed to insert track")?
            }
        };

        Ok(Track::from(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Artist;
    use crate::test_utils::test_db;

    #[tokio::test]
    async fn save_assigns_id_and_roundtrips() {
        let db = test_db().await;
        let repo = TrackRepository::new(db);

        let track = Track::new(
            "Paranoid Android",
            vec![Artist::new("Radiohead")],
        )
        .with_duration_ms(386_000)
        .with_isrc("gbum71505078");

        let saved = repo.save(&track).await.unwrap();
        let id = saved.id.unwrap();
        assert_eq!(saved.isrc.as_deref(), Some("GBUM71505078"));

        let found = repo.find_by_ids(&[id]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&id].title, "Paranoid Android");
    }

    #[tokio::test]
    async fn save_rejects_invalid_tracks() {
        let db = test_db().await;
        let repo = TrackRepository::new(db);

        let empty_title = Track::new("", vec![Artist::new("Someone")]);
        assert!(repo.save(&empty_title).await.is_err());

        let no_artists = Track::new("Song", vec![]);
        assert!(repo.save(&no_artists).await.is_err());
    }

    #[tokio::test]
    async fn update_keeps_id_stable() {
        let db = test_db().await;
        let repo = TrackRepository::new(db);

        let saved = repo
            .save(&Track::new("Creep", vec![Artist::new("Radiohead")]))
            .await
            .unwrap();
        let id = saved.id.unwrap();

        let mut changed = saved.clone();
        changed.album = Some("Pablo Honey".to_string());
        let updated = repo.save(&changed).await.unwrap();

        assert_eq!(updated.id, Some(id));
        assert_eq!(updated.album.as_deref(), Some("Pablo Honey"));
    }
}
