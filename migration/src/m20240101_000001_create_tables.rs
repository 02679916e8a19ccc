use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create tracks table
        manager
            .create_table(
                Table::create()
                    .table(Tracks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tracks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tracks::Title).string().not_null())
                    .col(ColumnDef::new(Tracks::Artists).text().not_null())
                    .col(ColumnDef::new(Tracks::Album).string())
                    .col(ColumnDef::new(Tracks::DurationMs).big_integer())
                    .col(ColumnDef::new(Tracks::ReleaseDate).string())
                    .col(ColumnDef::new(Tracks::Isrc).string())
                    .col(
                        ColumnDef::new(Tracks::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Tracks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Tracks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Create connector_tracks table
        manager
            .create_table(
                Table::create()
                    .table(ConnectorTracks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectorTracks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ConnectorTracks::Connector).string().not_null())
                    .col(
                        ColumnDef::new(ConnectorTracks::ConnectorTrackId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ConnectorTracks::Title).string().not_null())
                    .col(ColumnDef::new(ConnectorTracks::Artists).text().not_null())
                    .col(ColumnDef::new(ConnectorTracks::Album).string())
                    .col(ColumnDef::new(ConnectorTracks::DurationMs).big_integer())
                    .col(ColumnDef::new(ConnectorTracks::ReleaseDate).string())
                    .col(ColumnDef::new(ConnectorTracks::Isrc).string())
                    .col(ColumnDef::new(ConnectorTracks::RawMetadata).json().not_null())
                    .col(
                        ColumnDef::new(ConnectorTracks::LastUpdated)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorTracks::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ConnectorTracks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorTracks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connector_tracks_connector_id")
                    .table(ConnectorTracks::Table)
                    .col(ConnectorTracks::Connector)
                    .col(ConnectorTracks::ConnectorTrackId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connector_tracks_isrc")
                    .table(ConnectorTracks::Table)
                    .col(ConnectorTracks::Isrc)
                    .to_owned(),
            )
            .await?;

        // Create track_mappings table
        manager
            .create_table(
                Table::create()
                    .table(TrackMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TrackMappings::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TrackMappings::TrackId).big_integer().not_null())
                    .col(
                        ColumnDef::new(TrackMappings::ConnectorTrackId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TrackMappings::MatchMethod).string().not_null())
                    .col(ColumnDef::new(TrackMappings::Confidence).integer().not_null())
                    .col(ColumnDef::new(TrackMappings::ConfidenceEvidence).json())
                    .col(
                        ColumnDef::new(TrackMappings::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(TrackMappings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackMappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_track_mappings_track_id")
                            .from(TrackMappings::Table, TrackMappings::TrackId)
                            .to(Tracks::Table, Tracks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_track_mappings_connector_track_id")
                            .from(TrackMappings::Table, TrackMappings::ConnectorTrackId)
                            .to(ConnectorTracks::Table, ConnectorTracks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_track_mappings_track_connector")
                    .table(TrackMappings::Table)
                    .col(TrackMappings::TrackId)
                    .col(TrackMappings::ConnectorTrackId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create track_metrics table
        manager
            .create_table(
                Table::create()
                    .table(TrackMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TrackMetrics::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TrackMetrics::TrackId).big_integer().not_null())
                    .col(ColumnDef::new(TrackMetrics::Connector).string().not_null())
                    .col(ColumnDef::new(TrackMetrics::MetricType).string().not_null())
                    .col(ColumnDef::new(TrackMetrics::Value).double().not_null())
                    .col(
                        ColumnDef::new(TrackMetrics::ObservedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackMetrics::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_track_metrics_track_id")
                            .from(TrackMetrics::Table, TrackMetrics::TrackId)
                            .to(Tracks::Table, Tracks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_track_metrics_track_connector_type")
                    .table(TrackMetrics::Table)
                    .col(TrackMetrics::TrackId)
                    .col(TrackMetrics::Connector)
                    .col(TrackMetrics::MetricType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create track_likes table
        manager
            .create_table(
                Table::create()
                    .table(TrackLikes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TrackLikes::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TrackLikes::TrackId).big_integer().not_null())
                    .col(ColumnDef::new(TrackLikes::Service).string().not_null())
                    .col(
                        ColumnDef::new(TrackLikes::IsLiked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(TrackLikes::LikedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(TrackLikes::LastSynced).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(TrackLikes::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_track_likes_track_id")
                            .from(TrackLikes::Table, TrackLikes::TrackId)
                            .to(Tracks::Table, Tracks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_track_likes_track_service")
                    .table(TrackLikes::Table)
                    .col(TrackLikes::TrackId)
                    .col(TrackLikes::Service)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create plays table
        manager
            .create_table(
                Table::create()
                    .table(Plays::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Plays::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Plays::TrackId).big_integer())
                    .col(ColumnDef::new(Plays::Service).string().not_null())
                    .col(
                        ColumnDef::new(Plays::PlayedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Plays::MsPlayed).big_integer())
                    .col(ColumnDef::new(Plays::Context).json().not_null())
                    .col(
                        ColumnDef::new(Plays::ImportTimestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Plays::ImportSource).string().not_null())
                    .col(ColumnDef::new(Plays::ImportBatchId).string().not_null())
                    .col(ColumnDef::new(Plays::DedupHash).string().not_null())
                    .col(
                        ColumnDef::new(Plays::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_plays_dedup_hash")
                    .table(Plays::Table)
                    .col(Plays::DedupHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_plays_batch_id")
                    .table(Plays::Table)
                    .col(Plays::ImportBatchId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_plays_service_played_at")
                    .table(Plays::Table)
                    .col(Plays::Service)
                    .col(Plays::PlayedAt)
                    .to_owned(),
            )
            .await?;

        // Create sync_checkpoints table
        manager
            .create_table(
                Table::create()
                    .table(SyncCheckpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncCheckpoints::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncCheckpoints::UserId).string().not_null())
                    .col(ColumnDef::new(SyncCheckpoints::Service).string().not_null())
                    .col(ColumnDef::new(SyncCheckpoints::EntityType).string().not_null())
                    .col(ColumnDef::new(SyncCheckpoints::LastTimestamp).timestamp_with_time_zone())
                    .col(ColumnDef::new(SyncCheckpoints::Cursor).string())
                    .col(
                        ColumnDef::new(SyncCheckpoints::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_checkpoints_user_service_entity")
                    .table(SyncCheckpoints::Table)
                    .col(SyncCheckpoints::UserId)
                    .col(SyncCheckpoints::Service)
                    .col(SyncCheckpoints::EntityType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create playlists table
        manager
            .create_table(
                Table::create()
                    .table(Playlists::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Playlists::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Playlists::Name).string().not_null())
                    .col(ColumnDef::new(Playlists::Description).string())
                    .col(
                        ColumnDef::new(Playlists::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Playlists::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Playlists::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Create playlist_tracks junction table
        manager
            .create_table(
                Table::create()
                    .table(PlaylistTracks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PlaylistTracks::PlaylistId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PlaylistTracks::TrackId).big_integer().not_null())
                    .col(ColumnDef::new(PlaylistTracks::Position).integer().not_null())
                    .primary_key(
                        Index::create()
                            .col(PlaylistTracks::PlaylistId)
                            .col(PlaylistTracks::TrackId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_playlist_tracks_playlist_id")
                            .from(PlaylistTracks::Table, PlaylistTracks::PlaylistId)
                            .to(Playlists::Table, Playlists::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_playlist_tracks_track_id")
                            .from(PlaylistTracks::Table, PlaylistTracks::TrackId)
                            .to(Tracks::Table, Tracks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create connector_playlists table
        manager
            .create_table(
                Table::create()
                    .table(ConnectorPlaylists::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectorPlaylists::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConnectorPlaylists::PlaylistId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorPlaylists::Connector)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorPlaylists::ConnectorPlaylistId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorPlaylists::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connector_playlists_playlist_id")
                            .from(ConnectorPlaylists::Table, ConnectorPlaylists::PlaylistId)
                            .to(Playlists::Table, Playlists::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connector_playlists_playlist_connector")
                    .table(ConnectorPlaylists::Table)
                    .col(ConnectorPlaylists::PlaylistId)
                    .col(ConnectorPlaylists::Connector)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create connector_playlist_items table
        manager
            .create_table(
                Table::create()
                    .table(ConnectorPlaylistItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectorPlaylistItems::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConnectorPlaylistItems::ConnectorPlaylistId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorPlaylistItems::ConnectorTrackId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorPlaylistItems::Position)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ConnectorPlaylistItems::AddedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ConnectorPlaylistItems::AddedBy).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connector_playlist_items_playlist_id")
                            .from(
                                ConnectorPlaylistItems::Table,
                                ConnectorPlaylistItems::ConnectorPlaylistId,
                            )
                            .to(ConnectorPlaylists::Table, ConnectorPlaylists::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConnectorPlaylistItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ConnectorPlaylists::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PlaylistTracks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Playlists::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncCheckpoints::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Plays::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TrackLikes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TrackMetrics::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TrackMappings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ConnectorTracks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tracks::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Tracks {
    Table,
    Id,
    Title,
    Artists,
    Album,
    DurationMs,
    ReleaseDate,
    Isrc,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ConnectorTracks {
    Table,
    Id,
    Connector,
    ConnectorTrackId,
    Title,
    Artists,
    Album,
    DurationMs,
    ReleaseDate,
    Isrc,
    RawMetadata,
    LastUpdated,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TrackMappings {
    Table,
    Id,
    TrackId,
    ConnectorTrackId,
    MatchMethod,
    Confidence,
    ConfidenceEvidence,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TrackMetrics {
    Table,
    Id,
    TrackId,
    Connector,
    MetricType,
    Value,
    ObservedAt,
    IsDeleted,
}

#[derive(DeriveIden)]
enum TrackLikes {
    Table,
    Id,
    TrackId,
    Service,
    IsLiked,
    LikedAt,
    LastSynced,
    IsDeleted,
}

#[derive(DeriveIden)]
enum Plays {
    Table,
    Id,
    TrackId,
    Service,
    PlayedAt,
    MsPlayed,
    Context,
    ImportTimestamp,
    ImportSource,
    ImportBatchId,
    DedupHash,
    IsDeleted,
}

#[derive(DeriveIden)]
enum SyncCheckpoints {
    Table,
    Id,
    UserId,
    Service,
    EntityType,
    LastTimestamp,
    Cursor,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Playlists {
    Table,
    Id,
    Name,
    Description,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PlaylistTracks {
    Table,
    PlaylistId,
    TrackId,
    Position,
}

#[derive(DeriveIden)]
enum ConnectorPlaylists {
    Table,
    Id,
    PlaylistId,
    Connector,
    ConnectorPlaylistId,
    IsDeleted,
}

#[derive(DeriveIden)]
enum ConnectorPlaylistItems {
    Table,
    Id,
    ConnectorPlaylistId,
    ConnectorTrackId,
    Position,
    AddedAt,
    AddedBy,
}
