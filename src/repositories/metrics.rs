use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};

use crate::database::Database;
use crate::entities;

/// Persistence for per-service track metrics with freshness-aware reads.
#[derive(Clone)]
pub struct MetricsRepository {
    db: Arc<Database>,
}

impl MetricsRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Metric values observed within the freshness window. Stale rows are
    /// omitted so callers treat them as missing.
    pub async fn get_track_metrics(
        &self,
        track_ids: &[i64],
        metric_type: &str,
        connector: &str,
        max_age_hours: i64,
    ) -> Result<HashMap<i64, f64>> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let cutoff = Utc::now() - Duration::hours(max_age_hours);

        let models = entities::track_metric::Entity::find()
            .filter(entities::track_metric::Column::TrackId.is_in(track_ids.to_vec()))
            .filter(entities::track_metric::Column::MetricType.eq(metric_type))
            .filter(entities::track_metric::Column::Connector.eq(connector))
            .filter(entities::track_metric::Column::IsDeleted.eq(false))
            .filter(entities::track_metric::Column::ObservedAt.gte(cutoff))
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track metrics")?;

        Ok(models
            .into_iter()
            .map(|model| (model.track_id, model.value))
            .collect())
    }

    /// Upsert metric observations; `observed_at` is reset to now on every
    /// write. Entries are `(track_id, connector, metric_type, value)`.
    pub async fn save_track_metrics(
        &self,
        entries: &[(i64, String, String, f64)],
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        let now = Utc::now();
        let mut saved = 0;
        for (track_id, connector, metric_type, value) in entries {
            let existing = entities::track_metric::Entity::find()
                .filter(entities::track_metric::Column::TrackId.eq(*track_id))
                .filter(entities::track_metric::Column::Connector.eq(connector))
                .filter(entities::track_metric::Column::MetricType.eq(metric_type))
                .one(&txn)
                .await
                .wrap_err("Failed to fetch track metric")?;

            match existing {
                Some(existing) => {
                    let mut active: entities::track_metric::ActiveModel = existing.into();
                    active.value = Set(*value);
                    active.observed_at = Set(now);
                    active.is_deleted = Set(false);
                    active
                        .update(&txn)
                        .await
                        .wrap_err("Failed to update track metric")?;
                }
                None => {
                    let active = entities::track_metric::ActiveModel {
                        track_id: Set(*track_id),
                        connector: Set(connector.clone()),
                        metric_type: Set(metric_type.clone()),
                        value: Set(*value),
                        observed_at: Set(now),
                        is_deleted: Set(false),
                        ..Default::default()
                    };
                    entities::track_metric::Entity::insert(active)
                        .exec(&txn)
                        .await
                        .wrap_err("Failed to insert track metric")?;
                }
            }
            saved += 1;
        }

        txn.commit()
            .await
            .wrap_err("Failed to commit track metrics")?;

        Ok(saved)
    }
}
