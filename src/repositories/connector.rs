use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde_json::Value;

use crate::database::Database;
use crate::entities;
use crate::entities::track::StringVec;
use crate::matching::types::{ConfidenceEvidence, MatchMethod};
use crate::ports::connector::ConnectorApiTrack;

/// Stored confidence and method for an existing mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingInfo {
    pub confidence: i32,
    pub method: String,
    pub evidence: Option<ConfidenceEvidence>,
}

/// Persistence for per-service track records and track-to-connector
/// mappings.
#[derive(Clone)]
pub struct ConnectorRepository {
    db: Arc<Database>,
}

impl ConnectorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert a batch of connector tracks in one transaction. Returns
    /// external id -> connector track row id for every record.
    pub async fn bulk_upsert_connector_tracks(
        &self,
        connector: &str,
        records: &[ConnectorApiTrack],
    ) -> Result<HashMap<String, i64>> {
        if records.is_empty() {
            return Ok(HashMap::new());
        }

        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        let mut ids = HashMap::with_capacity(records.len());
        for record in records {
            let row_id = upsert_connector_track(&txn, connector, record).await?;
            ids.insert(record.id.clone(), row_id);
        }

        txn.commit()
            .await
            .wrap_err("Failed to commit connector track upsert")?;

        Ok(ids)
    }

    /// All active mappings for the given tracks, as
    /// `track_id -> {connector -> external_id}`. Optionally narrowed to a
    /// single connector.
    pub async fn get_connector_mappings(
        &self,
        track_ids: &[i64],
        connector: Option<&str>,
    ) -> Result<HashMap<i64, HashMap<String, String>>> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = entities::track_mapping::Entity::find()
            .filter(entities::track_mapping::Column::TrackId.is_in(track_ids.to_vec()))
            .filter(entities::track_mapping::Column::IsDeleted.eq(false))
            .find_also_related(entities::connector_track::Entity)
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch connector mappings")?;

        let mut mappings: HashMap<i64, HashMap<String, String>> = HashMap::new();
        for (mapping, connector_track) in rows {
            let Some(connector_track) = connector_track else {
                continue;
            };
            if connector_track.is_deleted {
                continue;
            }
            if let Some(wanted) = connector
                && connector_track.connector != wanted
            {
                continue;
            }
            mappings
                .entry(mapping.track_id)
                .or_default()
                .insert(connector_track.connector, connector_track.connector_track_id);
        }

        Ok(mappings)
    }

    /// Confidence, method, and evidence stored for one mapping edge.
    pub async fn get_mapping_info(
        &self,
        track_id: i64,
        connector: &str,
        external_id: &str,
    ) -> Result<Option<MappingInfo>> {
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
            .filter(entities::track_mapping::Column::TrackId.eq(track_id))
            .filter(entities::track_mapping::Column::ConnectorTrackId.eq(connector_track.id))
            .filter(entities::track_mapping::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track mapping")?;

        Ok(mapping.map(|mapping| MappingInfo {
            confidence: mapping.confidence,
            method: mapping.match_method,
            evidence: mapping
                .confidence_evidence
                .and_then(|value| serde_json::from_value(value).ok()),
        }))
    }

    /// Create or update the mapping between a track and a connector track.
    ///
    /// At most one live mapping may exist per `(track, connector)` pair: an
    /// existing mapping to a different connector track is repointed rather
    /// than duplicated.
    pub async fn map_track_to_connector(
        &self,
        track_id: i64,
        connector: &str,
        record: &ConnectorApiTrack,
        method: MatchMethod,
        confidence: i32,
        evidence: Option<&ConfidenceEvidence>,
    ) -> Result<()> {
        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        let connector_track_id = upsert_connector_track(&txn, connector, record).await?;
        save_mapping(
            &txn,
            track_id,
            connector,
            connector_track_id,
            method,
            confidence,
            evidence,
        )
        .await?;

        txn.commit()
            .await
            .wrap_err("Failed to commit track mapping")?;

        Ok(())
    }

    /// Find the internal track behind an external id, creating the canonical
    /// track, connector track, and mapping on first observation. Returns the
    /// internal track id.
    pub async fn ingest_external_track(
        &self,
        connector: &str,
        record: &ConnectorApiTrack,
        method: MatchMethod,
        confidence: i32,
        evidence: Option<&ConfidenceEvidence>,
    ) -> Result<i64> {
        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        let connector_track_id = upsert_connector_track(&txn, connector, record).await?;

        let existing_mapping = entities::track_mapping::Entity::find()
            .filter(entities::track_mapping::Column::ConnectorTrackId.eq(connector_track_id))
            .filter(entities::track_mapping::Column::IsDeleted.eq(false))
            .one(&txn)
            .await
            .wrap_err("Failed to fetch existing mapping")?;

        let track_id = match existing_mapping {
            Some(mapping) => mapping.track_id,
            None => {
                let internal = record.to_internal_track();
                if internal.title.trim().is_empty() || internal.artists.is_empty() {
                    txn.rollback()
                        .await
                        .wrap_err("Failed to roll back transaction")?;
                    return Err(eyre!(
                        "Connector track {}:{} lacks a title or artist",
                        connector,
                        record.id
                    ));
                }

                let active = entities::track::ActiveModel {
                    title: Set(internal.title.clone()),
                    artists: Set(StringVec(internal.artist_names())),
                    album: Set(internal.album.clone()),
                    duration_ms: Set(internal.duration_ms),
                    release_date: Set(internal.release_date.clone()),
                    isrc: Set(internal.isrc.clone()),
                    ..entities::track::ActiveModel::new()
                };
                let track = entities::track::Entity::insert(active)
                    .exec_with_returning(&txn)
                    .await
                    .wrap_err("Failed to insert track")?;

                save_mapping(
                    &txn,
                    track.id,
                    connector,
                    connector_track_id,
                    method,
                    confidence,
                    evidence,
                )
                .await?;

                track.id
            }
        };

        txn.commit()
            .await
            .wrap_err("Failed to commit track ingest")?;

        Ok(track_id)
    }

    /// Merge freshly fetched attributes into a connector track's raw
    /// metadata and bump `last_updated`.
    pub async fn update_connector_metadata(
        &self,
        connector: &str,
        external_id: &str,
        attributes: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let existing = entities::connector_track::Entity::find()
            .filter(entities::connector_track::Column::Connector.eq(connector))
            .filter(entities::connector_track::Column::ConnectorTrackId.eq(external_id))
            .filter(entities::connector_track::Column::IsDeleted.eq(false))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch connector track")?
            .ok_or_else(|| eyre!("Connector track {connector}:{external_id} not found"))?;

        let mut metadata = match existing.raw_metadata.clone() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in attributes {
            metadata.insert(key.clone(), value.clone());
        }

        let mut active: entities::connector_track::ActiveModel = existing.into();
        active.raw_metadata = Set(Value::Object(metadata));
        active.last_updated = Set(Utc::now());
        active
            .update(&self.db.conn)
            .await
            .wrap_err("Failed to update connector metadata")?;

        Ok(())
    }

    /// Full raw metadata bags for many tracks, via their mappings to the
    /// connector.
    pub async fn get_connector_metadata(
        &self,
        track_ids: &[i64],
        connector: &str,
    ) -> Result<HashMap<i64, Value>> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = entities::track_mapping::Entity::find()
            .filter(entities::track_mapping::Column::TrackId.is_in(track_ids.to_vec()))
            .filter(entities::track_mapping::Column::IsDeleted.eq(false))
            .find_also_related(entities::connector_track::Entity)
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch connector metadata")?;

        let mut bags = HashMap::new();
        for (mapping, connector_track) in rows {
            let Some(connector_track) = connector_track else {
                continue;
            };
            if connector_track.connector != connector || connector_track.is_deleted {
                continue;
            }
            bags.insert(mapping.track_id, connector_track.raw_metadata);
        }

        Ok(bags)
    }

    /// Raw metadata values for one field across many tracks, via their
    /// mappings to the connector.
    pub async fn get_connector_metadata_field(
        &self,
        track_ids: &[i64],
        connector: &str,
        field_key: &str,
    ) -> Result<HashMap<i64, Value>> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = entities::track_mapping::Entity::find()
            .filter(entities::track_mapping::Column::TrackId.is_in(track_ids.to_vec()))
            .filter(entities::track_mapping::Column::IsDeleted.eq(false))
            .find_also_related(entities::connector_track::Entity)
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch connector metadata")?;

        let mut values = HashMap::new();
        for (mapping, connector_track) in rows {
            let Some(connector_track) = connector_track else {
                continue;
            };
            if connector_track.connector != connector || connector_track.is_deleted {
                continue;
            }
            if let Some(value) = connector_track.raw_metadata.get(field_key) {
                values.insert(mapping.track_id, value.clone());
            }
        }

        Ok(values)
    }
}

/// Insert or refresh one connector track row; shared by every write path.
async fn upsert_connector_track<C: ConnectionTrait>(
    conn: &C,
    connector: &str,
    record: &ConnectorApiTrack,
) -> Result<i64> {
    let existing = entities::connector_track::Entity::find()
        .filter(entities::connector_track::Column::Connector.eq(connector))
        .filter(entities::connector_track::Column::ConnectorTrackId.eq(&record.id))
        .one(conn)
        .await
        .wrap_err("Failed to fetch connector track")?;

    match existing {
        Some(existing) => {
            let id = existing.id;
            let mut active: entities::connector_track::ActiveModel = existing.into();
            active.title = Set(record.title.clone());
            active.artists = Set(StringVec(record.artists.clone()));
            active.album = Set(record.album.clone());
            active.duration_ms = Set(record.duration_ms);
            active.release_date = Set(record.release_date.clone());
            active.isrc = Set(record.isrc.as_deref().map(str::to_uppercase));
            active.raw_metadata = Set(record.raw.clone());
            active.last_updated = Set(Utc::now());
            active
                .update(conn)
                .await
                .wrap_err("Failed to update connector track")?;
            Ok(id)
        }
        None => {
            let active = entities::connector_track::ActiveModel {
                connector: Set(connector.to_string()),
                connector_track_id: Set(record.id.clone()),
                title: Set(record.title.clone()),
                artists: Set(StringVec(record.artists.clone())),
                album: Set(record.album.clone()),
                duration_ms: Set(record.duration_ms),
                release_date: Set(record.release_date.clone()),
                isrc: Set(record.isrc.as_deref().map(str::to_uppercase)),
                raw_metadata: Set(record.raw.clone()),
                ..entities::connector_track::ActiveModel::new()
            };
            let model = entities::connector_track::Entity::insert(active)
                .exec_with_returning(conn)
                .await
                .wrap_err("Failed to insert connector track")?;
            Ok(model.id)
        }
    }
}

/// Write the mapping edge, honoring the one-live-mapping-per-(track,
/// connector) invariant.
async fn save_mapping<C: ConnectionTrait>(
    conn: &C,
    track_id: i64,
    connector: &str,
    connector_track_id: i64,
    method: MatchMethod,
    confidence: i32,
    evidence: Option<&ConfidenceEvidence>,
) -> Result<()> {
    let evidence_json = evidence
        .map(serde_json::to_value)
        .transpose()
        .wrap_err("Failed to serialize confidence evidence")?;

    // Any live mapping for this track on the same connector, regardless of
    // which connector track it points at.
    let rows = entities::track_mapping::Entity::find()
        .filter(entities::track_mapping::Column::TrackId.eq(track_id))
        .filter(entities::track_mapping::Column::IsDeleted.eq(false))
        .find_also_related(entities::connector_track::Entity)
        .all(conn)
        .await
        .wrap_err("Failed to fetch existing mappings")?;

    let existing = rows.into_iter().find(|(_, connector_track)| {
        connector_track
            .as_ref()
            .is_some_and(|ct| ct.connector == connector)
    });

    match existing {
        Some((mapping, _)) => {
            let mut active: entities::track_mapping::ActiveModel = mapping.into();
            active.connector_track_id = Set(connector_track_id);
            active.match_method = Set(method.as_str().to_string());
            active.confidence = Set(confidence);
            active.confidence_evidence = Set(evidence_json);
            active
                .update(conn)
                .await
                .wrap_err("Failed to update track mapping")?;
        }
        None => {
            let active = entities::track_mapping::ActiveModel {
                track_id: Set(track_id),
                connector_track_id: Set(connector_track_id),
                match_method: Set(method.as_str().to_string()),
                confidence: Set(confidence),
                confidence_evidence: Set(evidence_json),
                ..entities::track_mapping::ActiveModel::new()
            };
            entities::track_mapping::Entity::insert(active)
                .exec(conn)
                .await
                .wrap_err("Failed to insert track mapping")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Artist, Track};
    use crate::repositories::track::TrackRepository;
    use crate::test_utils::test_db;
    use serde_json::json;

    fn api_track(id: &str, title: &str) -> ConnectorApiTrack {
        ConnectorApiTrack {
            id: id.to_string(),
            title: title.to_string(),
            artists: vec!["Radiohead".to_string()],
            duration_ms: Some(386_000),
            raw: json!({"id": id}),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn bulk_upsert_is_idempotent() {
        let db = test_db().await;
        let repo = ConnectorRepository::new(db);

        let records = vec![api_track("abc", "Paranoid Android"), api_track("def", "Creep")];

        let first = repo
            .bulk_upsert_connector_tracks("spotify", &records)
            .await
            .unwrap();
        let second = repo
            .bulk_upsert_connector_tracks("spotify", &records)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn one_live_mapping_per_track_and_connector() {
        let db = test_db().await;
        let tracks = TrackRepository::new(db.clone());
        let repo = ConnectorRepository::new(db);

        let track = tracks
            .save(&Track::new("Creep", vec![Artist::new("Radiohead")]))
            .await
            .unwrap();
        let track_id = track.id.unwrap();

        repo.map_track_to_connector(
            track_id,
            "spotify",
            &api_track("first", "Creep"),
            MatchMethod::ArtistTitle,
            80,
            None,
        )
        .await
        .unwrap();

        // Re-mapping to a different external id must repoint, not duplicate.
        repo.map_track_to_connector(
            track_id,
            "spotify",
            &api_track("second", "Creep"),
            MatchMethod::Isrc,
            95,
            None,
        )
        .await
        .unwrap();

        let mappings = repo
            .get_connector_mappings(&[track_id], Some("spotify"))
            .await
            .unwrap();
        assert_eq!(mappings[&track_id]["spotify"], "second");

        let info = repo
            .get_mapping_info(track_id, "spotify", "second")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.confidence, 95);
        assert_eq!(info.method, "isrc");
    }

    #[tokio::test]
    async fn mapping_info_preserves_evidence() {
        let db = test_db().await;
        let tracks = TrackRepository::new(db.clone());
        let repo = ConnectorRepository::new(db);

        let track = tracks
            .save(&Track::new("Creep", vec![Artist::new("Radiohead")]))
            .await
            .unwrap();
        let track_id = track.id.unwrap();

        let evidence = ConfidenceEvidence {
            base_score: 90,
            title_similarity: 1.0,
            final_score: 90,
            ..Default::default()
        };

        repo.map_track_to_connector(
            track_id,
            "lastfm",
            &api_track("xyz", "Creep"),
            MatchMethod::ArtistTitle,
            90,
            Some(&evidence),
        )
        .await
        .unwrap();

        let info = repo
            .get_mapping_info(track_id, "lastfm", "xyz")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.evidence.unwrap(), evidence);
    }

    #[tokio::test]
    async fn ingest_creates_then_reuses_internal_track() {
        let db = test_db().await;
        let repo = ConnectorRepository::new(db);

        let record = api_track("abc", "Paranoid Android");
        let first = repo
            .ingest_external_track("spotify", &record, MatchMethod::DirectId, 100, None)
            .await
            .unwrap();
        let second = repo
            .ingest_external_track("spotify", &record, MatchMethod::DirectId, 100, None)
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn metadata_update_merges_attributes() {
        let db = test_db().await;
        let repo = ConnectorRepository::new(db);

        let ingested = repo
            .ingest_external_track(
                "lastfm",
                &api_track("abc", "Creep"),
                MatchMethod::DirectId,
                100,
                None,
            )
            .await
            .unwrap();

        let mut attrs = BTreeMap::new();
        attrs.insert("userplaycount".to_string(), json!(42));
        repo.update_connector_metadata("lastfm", "abc", &attrs)
            .await
            .unwrap();

        let values = repo
            .get_connector_metadata_field(&[ingested], "lastfm", "userplaycount")
            .await
            .unwrap();
        assert_eq!(values[&ingested], json!(42));
    }
}
