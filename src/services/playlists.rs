//! Publishing internal playlists to a connector.

use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::eyre;

use crate::domain::OperationResult;
use crate::ports::connector::ConnectorClient;
use crate::repositories::Repositories;

pub struct PlaylistPublisher {
    repos: Repositories,
}

impl PlaylistPublisher {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Create or update the connector-side copy of an internal playlist
    /// from its already-resolved tracks, then snapshot the connector's item
    /// listing. Tracks without a mapping on the connector are skipped.
    pub async fn publish(
        &self,
        playlist_id: i64,
        connector: &str,
        client: Arc<dyn ConnectorClient>,
    ) -> Result<OperationResult> {
        let operation = format!("{connector} Playlist Publish");
        let mut result = OperationResult::new(&operation);

        let playlist = self
            .repos
            .playlists
            .get_playlist(playlist_id)
            .await?
            .ok_or_else(|| eyre!("Playlist {playlist_id} not found"))?;

        let track_ids = self.repos.playlists.get_playlist_tracks(playlist_id).await?;
        let mappings = self
            .repos
            .connectors
            .get_connector_mappings(&track_ids, Some(connector))
            .await?;

        let mut external_ids = Vec::with_capacity(track_ids.len());
        for track_id in &track_ids {
            result.processed_count += 1;
            match mappings
                .get(track_id)
                .and_then(|by_connector| by_connector.get(connector))
            {
                Some(external) => external_ids.push(external.clone()),
                None => {
                    tracing::warn!(track_id, connector, "track unmapped; left out of playlist");
                    result.skipped_count += 1;
                }
            }
        }

        let existing = self
            .repos
            .playlists
            .get_connector_playlist(playlist_id, connector)
            .await?;

        let external_playlist_id = match existing {
            Some(existing) => {
                match client
                    .update_playlist(&existing.connector_playlist_id, &external_ids, true)
                    .await
                {
                    Ok(()) => existing.connector_playlist_id,
                    Err(err) => {
                        return Ok(OperationResult::failed(
                            &operation,
                            format!("{operation} failed: {err}"),
                        ));
                    }
                }
            }
            None => {
                match client
                    .create_playlist(
                        &playlist.name,
                        &external_ids,
                        playlist.description.as_deref(),
                    )
                    .await
                {
                    Ok(external_id) => external_id,
                    Err(err) => {
                        return Ok(OperationResult::failed(
                            &operation,
                            format!("{operation} failed: {err}"),
                        ));
                    }
                }
            }
        };

        let link_id = self
            .repos
            .playlists
            .link_connector_playlist(playlist_id, connector, &external_playlist_id)
            .await?;

        // Snapshot the connector's own view of the playlist.
        match client.get_playlist(&external_playlist_id).await {
            Ok(snapshot) => {
                self.repos
                    .playlists
                    .replace_connector_items(link_id, &snapshot.entries)
                    .await?;
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not snapshot published playlist");
            }
        }

        result.exported_count = external_ids.len();
        Ok(result)
    }
}
