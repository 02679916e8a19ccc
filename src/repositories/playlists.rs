use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait};

use crate::database::Database;
use crate::entities;
use crate::ports::connector::ConnectorPlaylistEntry;

/// Connector names that can never own a playlist mapping.
const RESERVED_CONNECTORS: &[&str] = &["internal database", "this system"];

/// Persistence for internal playlists and their connector-side mirrors.
#[derive(Clone)]
pub struct PlaylistRepository {
    db: Arc<Database>,
}

impl PlaylistRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create or replace a named playlist with an ordered track list.
    pub async fn save_playlist(
        &self,
        name: &str,
        description: Option<&str>,
        track_ids: &[i64],
    ) -> Result<i64> {
        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        let existing = entities::playlist::Entity::find()
            .filter(entities::playlist::Column::Name.eq(name))
            .filter(entities::playlist::Column::IsDeleted.eq(false))
            .one(&txn)
            .await
            .wrap_err("Failed to fetch playlist")?;

        let playlist_id = match existing {
            Some(existing) => {
                let id = existing.id;
                let mut active: entities::playlist::ActiveModel = existing.into();
                active.description = Set(description.map(str::to_owned));
                active
                    .update(&txn)
                    .await
                    .wrap_err("Failed to update playlist")?;

                entities::playlist_track::Entity::delete_many()
                    .filter(entities::playlist_track::Column::PlaylistId.eq(id))
                    .exec(&txn)
                    .await
                    .wrap_err("Failed to clear playlist tracks")?;
                id
            }
            None => {
                let active = entities::playlist::ActiveModel {
                    name: Set(name.to_string()),
                    description: Set(description.map(str::to_owned)),
                    ..entities::playlist::ActiveModel::new()
                };
                entities::playlist::Entity::insert(active)
                    .exec_with_returning(&txn)
                    .await
                    .wrap_err("Failed to insert playlist")?
                    .id
            }
        };

        for (position, track_id) in track_ids.iter().enumerate() {
            let item = entities::playlist_track::ActiveModel {
                playlist_id: Set(playlist_id),
                track_id: Set(*track_id),
                position: Set(position as i32),
            };
            entities::playlist_track::Entity::insert(item)
                .exec(&txn)
                .await
                .wrap_err("Failed to insert playlist track")?;
        }

        txn.commit().await.wrap_err("Failed to commit playlist")?;

        Ok(playlist_id)
    }

    pub async fn get_playlist(
        &self,
        playlist_id: i64,
    ) -> Result<Option<entities::playlist::Model>> {
        entities::playlist::Entity::find_by_id(playlist_id)
            .filter(entities::playlist::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlist")
    }

    pub async fn get_connector_playlist(
        &self,
        playlist_id: i64,
        connector: &str,
    ) -> Result<Option<entities::connector_playlist::Model>> {
        entities::connector_playlist::Entity::find()
            .filter(entities::connector_playlist::Column::PlaylistId.eq(playlist_id))
            .filter(entities::connector_playlist::Column::Connector.eq(connector))
            .filter(entities::connector_playlist::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch connector playlist")
    }

    /// Ordered track ids of a playlist.
    pub async fn get_playlist_tracks(&self, playlist_id: i64) -> Result<Vec<i64>> {
        let rows = entities::playlist_track::Entity::find()
            .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
            .order_by_asc(entities::playlist_track::Column::Position)
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlist tracks")?;

        Ok(rows.into_iter().map(|row| row.track_id).collect())
    }

    /// Record that a playlist exists on a connector under the given external
    /// id. Reserved connector names are rejected.
    pub async fn link_connector_playlist(
        &self,
        playlist_id: i64,
        connector: &str,
        external_id: &str,
    ) -> Result<i64> {
        if RESERVED_CONNECTORS.contains(&connector) {
            return Err(eyre!("\"{connector}\" is a reserved connector name"));
        }

        let existing = entities::connector_playlist::Entity::find()
            .filter(entities::connector_playlist::Column::PlaylistId.eq(playlist_id))
            .filter(entities::connector_playlist::Column::Connector.eq(connector))
            .filter(entities::connector_playlist::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch connector playlist")?;

        match existing {
            Some(existing) => {
                let id = existing.id;
                let mut active: entities::connector_playlist::ActiveModel = existing.into();
                active.connector_playlist_id = Set(external_id.to_string());
                active
                    .update(&self.db.conn)
                    .await
                    .wrap_err("Failed to update connector playlist")?;
                Ok(id)
            }
            None => {
                let active = entities::connector_playlist::ActiveModel {
                    playlist_id: Set(playlist_id),
                    connector: Set(connector.to_string()),
                    connector_playlist_id: Set(external_id.to_string()),
                    is_deleted: Set(false),
                    ..Default::default()
                };
                let model = entities::connector_playlist::Entity::insert(active)
                    .exec_with_returning(&self.db.conn)
                    .await
                    .wrap_err("Failed to insert connector playlist")?;
                Ok(model.id)
            }
        }
    }

    /// Replace the item snapshot of a connector playlist.
    pub async fn replace_connector_items(
        &self,
        connector_playlist_id: i64,
        entries: &[ConnectorPlaylistEntry],
    ) -> Result<()> {
        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        entities::connector_playlist_item::Entity::delete_many()
            .filter(
                entities::connector_playlist_item::Column::ConnectorPlaylistId
                    .eq(connector_playlist_id),
            )
            .exec(&txn)
            .await
            .wrap_err("Failed to clear connector playlist items")?;

        for entry in entries {
            let active = entities::connector_playlist_item::ActiveModel {
                connector_playlist_id: Set(connector_playlist_id),
                connector_track_id: Set(entry.track_id.clone()),
                position: Set(entry.position),
                added_at: Set(entry.added_at),
                added_by: Set(entry.added_by.clone()),
                ..Default::default()
            };
            entities::connector_playlist_item::Entity::insert(active)
                .exec(&txn)
                .await
                .wrap_err("Failed to insert connector playlist item")?;
        }

        txn.commit()
            .await
            .wrap_err("Failed to commit connector playlist items")?;

        Ok(())
    }
}
