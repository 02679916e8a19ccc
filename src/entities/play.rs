use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "plays")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Unresolved plays keep NULL here and their original metadata in `context`.
    pub track_id: Option<i64>,
    pub service: String,
    pub played_at: DateTime<Utc>,
    pub ms_played: Option<i64>,
    /// Opaque bag preserving original title/artist/album and behavioral flags.
    pub context: Json,
    pub import_timestamp: DateTime<Utc>,
    pub import_source: String,
    pub import_batch_id: String,
    /// Value-based fingerprint; the unique index on it makes inserts idempotent.
    pub dedup_hash: String,
    pub is_deleted: bool,

    #[sea_orm(belongs_to, from = "track_id", to = "id")]
    pub track: HasOne<super::track::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
