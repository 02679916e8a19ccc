//! Play-import workflow: a shared skeleton with per-service strategies.
//!
//! Every import runs the same steps in order: set up a batch, fetch raw
//! records, process them into plays, persist through the play repository,
//! advance checkpoints, and assemble a standardized result. Failures at any
//! step produce an error-shaped `OperationResult`, never an error to the
//! caller.

pub mod lastfm;
pub mod resolver;
pub mod spotify_file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use uuid::Uuid;

use crate::domain::{OperationResult, TrackPlay};
use crate::repositories::Repositories;

/// Fraction of a page that must already be present (with no new records)
/// before incremental pagination stops.
pub const CAUGHT_UP_RATIO: f64 = 0.8;

/// One import strategy: how to fetch raw records, turn them into plays,
/// and advance checkpoints. The surrounding workflow is shared.
#[async_trait]
pub trait PlayImportService: Send + Sync {
    type Raw: Send + Sync;

    fn operation_name(&self) -> &str;

    /// Acquire raw play records from the source.
    async fn fetch(&self) -> Result<Vec<Self::Raw>>;

    /// Convert raw records into plays carrying preserved context.
    async fn process(
        &self,
        raw: &[Self::Raw],
        batch_id: &str,
        import_timestamp: DateTime<Utc>,
    ) -> Result<Vec<TrackPlay>>;

    /// Advance checkpoints after a successful persist. Head-only and file
    /// strategies leave this a no-op.
    async fn handle_checkpoints(&self, raw: &[Self::Raw]) -> Result<()>;

    /// Strategy-specific additions to the final result (resolution stats
    /// and the like).
    fn annotate_result(&self, _result: &mut OperationResult) {}
}

/// Drive one import from start to finish.
pub async fn run_import<S: PlayImportService>(
    service: &S,
    repos: &Repositories,
    import_batch_id: Option<String>,
) -> OperationResult {
    let batch_id = import_batch_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let import_timestamp = Utc::now();
    let operation = service.operation_name().to_string();

    tracing::info!(operation, batch_id, "starting import");

    let raw = match service.fetch().await {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(operation, batch_id, error = %err, "fetch failed");
            return OperationResult::failed(&operation, format!("{operation} failed: {err}"))
                .with_batch_id(batch_id);
        }
    };

    if raw.is_empty() {
        // Still run checkpoints so an empty page can advance the cursor.
        if let Err(err) = service.handle_checkpoints(&raw).await {
            tracing::error!(operation, batch_id, error = %err, "checkpoint update failed");
            return OperationResult::failed(&operation, format!("{operation} failed: {err}"))
                .with_batch_id(batch_id);
        }
        tracing::info!(operation, batch_id, "no data to import");
        let mut result = OperationResult::new(&operation).with_batch_id(batch_id);
        service.annotate_result(&mut result);
        return result;
    }

    let plays = match service.process(&raw, &batch_id, import_timestamp).await {
        Ok(plays) => plays,
        Err(err) => {
            tracing::error!(operation, batch_id, error = %err, "processing failed");
            return OperationResult::failed(&operation, format!("{operation} failed: {err}"))
                .with_batch_id(batch_id);
        }
    };

    let imported = match repos.plays.bulk_insert_plays(&plays).await {
        Ok(imported) => imported,
        Err(err) => {
            tracing::error!(operation, batch_id, error = %err, "persist failed");
            return OperationResult::failed(&operation, format!("{operation} failed: {err}"))
                .with_batch_id(batch_id);
        }
    };

    if let Err(err) = service.handle_checkpoints(&raw).await {
        tracing::error!(operation, batch_id, error = %err, "checkpoint update failed");
        return OperationResult::failed(&operation, format!("{operation} failed: {err}"))
            .with_batch_id(batch_id);
    }

    tracing::info!(
        operation,
        batch_id,
        processed = raw.len(),
        imported,
        "import completed"
    );

    let mut result = OperationResult::new(&operation).with_batch_id(batch_id);
    result.processed_count = raw.len();
    result.imported_count = imported;
    result.skipped_count = plays.len().saturating_sub(imported);
    service.annotate_result(&mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::play_context;
    use crate::test_utils::test_db;
    use chrono::TimeZone;
    use color_eyre::eyre::eyre;
    use std::collections::BTreeMap;

    struct FixedImport {
        records: Vec<&'static str>,
        fail_fetch: bool,
    }

    #[async_trait]
    impl PlayImportService for FixedImport {
        type Raw = &'static str;

        fn operation_name(&self) -> &str {
            "Fixed Import"
        }

        async fn fetch(&self) -> Result<Vec<&'static str>> {
            if self.fail_fetch {
                return Err(eyre!("source unavailable"));
            }
            Ok(self.records.clone())
        }

        async fn process(
            &self,
            raw: &[&'static str],
            batch_id: &str,
            import_timestamp: DateTime<Utc>,
        ) -> Result<Vec<TrackPlay>> {
            Ok(raw
                .iter()
                .enumerate()
                .map(|(i, title)| TrackPlay {
                    track_id: None,
                    service: "test".to_string(),
                    played_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, i as u32, 0).unwrap(),
                    ms_played: None,
                    context: play_context(title, "Artist", None, BTreeMap::new()),
                    import_timestamp,
                    import_source: "test_fixed".to_string(),
                    import_batch_id: batch_id.to_string(),
                })
                .collect())
        }

        async fn handle_checkpoints(&self, _raw: &[&'static str]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn successful_import_counts_and_persists() {
        let repos = Repositories::new(test_db().await);
        let service = FixedImport {
            records: vec!["One", "Two"],
            fail_fetch: false,
        };

        let result = run_import(&service, &repos, Some("batch-x".to_string())).await;

        assert!(result.success);
        assert_eq!(result.processed_count, 2);
        assert_eq!(result.imported_count, 2);
        assert_eq!(result.batch_id.as_deref(), Some("batch-x"));
        assert_eq!(repos.plays.get_plays_by_batch("batch-x").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reimport_skips_duplicates() {
        let repos = Repositories::new(test_db().await);
        let service = FixedImport {
            records: vec!["One", "Two"],
            fail_fetch: false,
        };

        run_import(&service, &repos, None).await;
        let second = run_import(&service, &repos, None).await;

        assert!(second.success);
        assert_eq!(second.imported_count, 0);
        assert_eq!(second.skipped_count, 2);
    }

    #[tokio::test]
    async fn fetch_failure_produces_error_shaped_result() {
        let repos = Repositories::new(test_db().await);
        let service = FixedImport {
            records: vec![],
            fail_fetch: true,
        };

        let result = run_import(&service, &repos, None).await;

        assert!(!result.success);
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].contains("source unavailable"));
    }

    #[tokio::test]
    async fn empty_fetch_is_a_successful_zero_result() {
        let repos = Repositories::new(test_db().await);
        let service = FixedImport {
            records: vec![],
            fail_fetch: false,
        };

        let result = run_import(&service, &repos, None).await;

        assert!(result.success);
        assert_eq!(result.processed_count, 0);
        assert_eq!(result.imported_count, 0);
    }
}
