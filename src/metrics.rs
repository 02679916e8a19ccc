//! Registry of per-service track metrics and their freshness rules.
//!
//! Built once at startup, read-only afterwards; passed into the metadata
//! manager by handle rather than looked up globally.

use std::collections::HashMap;

/// Default freshness window for metrics without an explicit override.
pub const DEFAULT_FRESHNESS_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    /// Service whose metadata carries this metric.
    pub connector: String,
    /// Key of the metric inside the connector's attribute map.
    pub field_key: String,
    /// Hours after which an observation is stale.
    pub ttl_hours: i64,
}

#[derive(Debug, Default)]
pub struct MetricRegistry {
    specs: HashMap<String, MetricSpec>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Registry pre-populated with the metrics both adapters expose.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("user_playcount", "lastfm", "userplaycount", 1);
        registry.register(
            "global_playcount",
            "lastfm",
            "playcount",
            DEFAULT_FRESHNESS_HOURS,
        );
        registry.register(
            "listeners",
            "lastfm",
            "listeners",
            DEFAULT_FRESHNESS_HOURS,
        );
        registry.register(
            "popularity",
            "spotify",
            "popularity",
            DEFAULT_FRESHNESS_HOURS,
        );
        registry
    }

    pub fn register(
        &mut self,
        metric_name: impl Into<String>,
        connector: impl Into<String>,
        field_key: impl Into<String>,
        ttl_hours: i64,
    ) {
        self.specs.insert(
            metric_name.into(),
            MetricSpec {
                connector: connector.into(),
                field_key: field_key.into(),
                ttl_hours,
            },
        );
    }

    pub fn spec(&self, metric_name: &str) -> Option<&MetricSpec> {
        self.specs.get(metric_name)
    }

    /// Hours after which the metric is stale; unknown metrics use the
    /// default window.
    pub fn freshness_hours(&self, metric_name: &str) -> i64 {
        self.specs
            .get(metric_name)
            .map(|spec| spec.ttl_hours)
            .unwrap_or(DEFAULT_FRESHNESS_HOURS)
    }

    /// All metric names owned by a connector.
    pub fn metrics_for_connector(&self, connector: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .specs
            .iter()
            .filter(|(_, spec)| spec.connector == connector)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_freshness_windows() {
        let registry = MetricRegistry::with_defaults();
        assert_eq!(registry.freshness_hours("user_playcount"), 1);
        assert_eq!(registry.freshness_hours("global_playcount"), 24);
        assert_eq!(registry.freshness_hours("listeners"), 24);
        assert_eq!(registry.freshness_hours("popularity"), 24);
        assert_eq!(registry.freshness_hours("unknown_metric"), 24);
    }

    #[test]
    fn connector_reverse_lookup() {
        let registry = MetricRegistry::with_defaults();
        let lastfm = registry.metrics_for_connector("lastfm");
        assert_eq!(
            lastfm,
            vec![
                "global_playcount",
                "listeners",
                "user_playcount"
            ]
        );
        assert_eq!(
            registry.metrics_for_connector("spotify"),
            vec!["popularity"]
        );
    }

    #[test]
    fn field_keys_resolve() {
        let registry = MetricRegistry::with_defaults();
        assert_eq!(
            registry.spec("user_playcount").unwrap().field_key,
            "userplaycount"
        );
        assert_eq!(
            registry.spec("popularity").unwrap().field_key,
            "popularity"
        );
    }
}
