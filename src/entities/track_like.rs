use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "track_likes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub track_id: i64,
    /// Service holding this flag, or "internal" for our own copy.
    pub service: String,
    pub is_liked: bool,
    /// The service's own timestamp for the like, when it reports one.
    pub liked_at: Option<DateTime<Utc>>,
    /// When we last reconciled this flag with the service.
    pub last_synced: Option<DateTime<Utc>>,
    pub is_deleted: bool,

    #[sea_orm(belongs_to, from = "track_id", to = "id")]
    pub track: HasOne<super::track::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
