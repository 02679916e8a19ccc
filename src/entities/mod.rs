pub mod connector_playlist;
pub mod connector_playlist_item;
pub mod connector_track;
pub mod play;
pub mod playlist;
pub mod playlist_track;
pub mod sync_checkpoint;
pub mod track;
pub mod track_like;
pub mod track_mapping;
pub mod track_metric;
