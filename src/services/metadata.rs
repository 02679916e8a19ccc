//! Per-service metadata refresh for already-mapped tracks.
//!
//! The hard rule: matching never re-runs for a mapped track. Refresh always
//! goes through the direct bulk-get capability on the stored external id,
//! and the store is only touched in short read and write phases on either
//! side of the remote call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use color_eyre::Result;
use serde_json::Value;

use crate::metrics::MetricRegistry;
use crate::ports::connector::ConnectorClient;
use crate::repositories::Repositories;

pub struct ConnectorMetadataManager {
    repos: Repositories,
    registry: Arc<MetricRegistry>,
}

impl ConnectorMetadataManager {
    pub fn new(repos: Repositories, registry: Arc<MetricRegistry>) -> Self {
        Self { repos, registry }
    }

    /// Track ids whose metric observation is older than the metric's
    /// freshness window (or missing entirely).
    pub async fn tracks_needing_refresh(
        &self,
        track_ids: &[i64],
        metric_name: &str,
        connector: &str,
    ) -> Result<Vec<i64>> {
        let max_age = self.registry.freshness_hours(metric_name);
        let fresh = self
            .repos
            .metrics
            .get_track_metrics(track_ids, metric_name, connector, max_age)
            .await?;

        Ok(track_ids
            .iter()
            .copied()
            .filter(|id| !fresh.contains_key(id))
            .collect())
    }

    /// Refresh per-service metadata for the given tracks via direct id
    /// lookup. Tracks without a mapping to this service are dropped; tracks
    /// the service fails to return land in `failed_ids`.
    pub async fn refresh_metadata(
        &self,
        track_ids: &[i64],
        connector: &str,
        client: &dyn ConnectorClient,
    ) -> Result<(HashMap<i64, BTreeMap<String, Value>>, HashSet<i64>)> {
        let mut fresh: HashMap<i64, BTreeMap<String, Value>> = HashMap::new();
        let mut failed_ids: HashSet<i64> = HashSet::new();

        if track_ids.is_empty() {
            return Ok((fresh, failed_ids));
        }

        // Short read phase: existing mappings only.
        let mappings = self
            .repos
            .connectors
            .get_connector_mappings(track_ids, Some(connector))
            .await?;

        let pairs: Vec<(i64, String)> = track_ids
            .iter()
            .filter_map(|id| {
                mappings
                    .get(id)
                    .and_then(|by_connector| by_connector.get(connector))
                    .map(|external| (*id, external.clone()))
            })
            .collect();

        if pairs.is_empty() {
            tracing::info!(connector, "no mapped tracks to refresh");
            return Ok((fresh, failed_ids));
        }

        // Remote phase, outside any unit of work.
        let info = match client.batch_get_track_info(&pairs).await {
            Ok(info) => info,
            Err(err) => {
                tracing::error!(connector, error = %err, "metadata refresh call failed");
                failed_ids.extend(pairs.iter().map(|(id, _)| *id));
                return Ok((fresh, failed_ids));
            }
        };

        for (track_id, _) in &pairs {
            match info.get(track_id) {
                // The sole conversion point from external info to a flat
                // attribute map.
                Some(payload) => {
                    fresh.insert(*track_id, payload.as_attribute_map());
                }
                None => {
                    failed_ids.insert(*track_id);
                }
            }
        }

        // Short write phase: metrics plus the connector metadata rows.
        let mut metric_entries: Vec<(i64, String, String, f64)> = Vec::new();
        for metric_name in self.registry.metrics_for_connector(connector) {
            let Some(spec) = self.registry.spec(metric_name) else {
                continue;
            };
            for (track_id, attributes) in &fresh {
                if let Some(value) = attributes.get(&spec.field_key).and_then(value_as_f64) {
                    metric_entries.push((
                        *track_id,
                        connector.to_string(),
                        metric_name.to_string(),
                        value,
                    ));
                }
            }
        }
        if !metric_entries.is_empty() {
            let saved = self.repos.metrics.save_track_metrics(&metric_entries).await?;
            tracing::info!(connector, saved, "persisted refreshed metrics");
        }

        for (track_id, external_id) in &pairs {
            if let Some(attributes) = fresh.get(track_id) {
                self.repos
                    .connectors
                    .update_connector_metadata(connector, external_id, attributes)
                    .await?;
            }
        }

        Ok((fresh, failed_ids))
    }

    /// Resolve one metric for many tracks: fresh metric rows first, then
    /// extraction from the cached connector metadata for the rest. Values
    /// recovered from metadata are written back as metric observations.
    pub async fn resolve_metric(
        &self,
        track_ids: &[i64],
        metric_name: &str,
    ) -> Result<HashMap<i64, f64>> {
        let Some(spec) = self.registry.spec(metric_name) else {
            tracing::warn!(metric_name, "no registry entry for metric");
            return Ok(HashMap::new());
        };

        let mut values = self
            .repos
            .metrics
            .get_track_metrics(track_ids, metric_name, &spec.connector, spec.ttl_hours)
            .await?;

        let missing: Vec<i64> = track_ids
            .iter()
            .copied()
            .filter(|id| !values.contains_key(id))
            .collect();
        if missing.is_empty() {
            return Ok(values);
        }

        tracing::info!(
            metric_name,
            missing = missing.len(),
            "resolving metric from cached connector metadata"
        );

        let metadata = self
            .repos
            .connectors
            .get_connector_metadata_field(&missing, &spec.connector, &spec.field_key)
            .await?;

        let mut to_save = Vec::new();
        for (track_id, value) in metadata {
            if let Some(numeric) = value_as_f64(&value) {
                values.insert(track_id, numeric);
                to_save.push((
                    track_id,
                    spec.connector.clone(),
                    metric_name.to_string(),
                    numeric,
                ));
            }
        }
        if !to_save.is_empty() {
            self.repos.metrics.save_track_metrics(&to_save).await?;
        }

        Ok(values)
    }

    /// Whatever metadata the store currently holds, fresh or not.
    pub async fn get_cached_metadata(
        &self,
        track_ids: &[i64],
        connector: &str,
    ) -> Result<HashMap<i64, Value>> {
        self.repos
            .connectors
            .get_connector_metadata(track_ids, connector)
            .await
    }

    /// Cached metadata with freshly fetched attributes layered on top.
    pub async fn get_all_metadata(
        &self,
        track_ids: &[i64],
        connector: &str,
        fresh: &HashMap<i64, BTreeMap<String, Value>>,
    ) -> Result<HashMap<i64, BTreeMap<String, Value>>> {
        let cached = self.get_cached_metadata(track_ids, connector).await?;

        let mut merged: HashMap<i64, BTreeMap<String, Value>> = HashMap::new();
        for track_id in track_ids {
            let mut attributes: BTreeMap<String, Value> = match cached.get(track_id) {
                Some(Value::Object(map)) => {
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                }
                _ => BTreeMap::new(),
            };
            if let Some(fresh_attributes) = fresh.get(track_id) {
                for (key, value) in fresh_attributes {
                    attributes.insert(key.clone(), value.clone());
                }
            }
            if !attributes.is_empty() {
                merged.insert(*track_id, attributes);
            }
        }

        Ok(merged)
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
