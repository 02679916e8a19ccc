use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "connector_playlists")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub playlist_id: i64,
    pub connector: String,
    pub connector_playlist_id: String,
    pub is_deleted: bool,

    #[sea_orm(belongs_to, from = "playlist_id", to = "id")]
    pub playlist: HasOne<super::playlist::Entity>,

    #[sea_orm(has_many)]
    pub items: HasMany<super::connector_playlist_item::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
