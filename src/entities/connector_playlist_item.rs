use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "connector_playlist_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub connector_playlist_id: i64,
    /// External track identifier as the service reports it inside the playlist.
    pub connector_track_id: String,
    pub position: i32,
    pub added_at: Option<DateTime<Utc>>,
    pub added_by: Option<String>,

    #[sea_orm(belongs_to, from = "connector_playlist_id", to = "id")]
    pub connector_playlist: HasOne<super::connector_playlist::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
