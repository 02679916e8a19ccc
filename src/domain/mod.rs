use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::entities;

/// A single credited artist. Shared by name, copied by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub name: String,
}

impl Artist {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Canonical internal track. `id` is `None` until first persisted and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: Option<i64>,
    pub title: String,
    pub artists: Vec<Artist>,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    pub release_date: Option<String>,
    pub isrc: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, artists: Vec<Artist>) -> Self {
        Self {
            id: None,
            title: title.into(),
            artists,
            album: None,
            duration_ms: None,
            release_date: None,
            isrc: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// ISRCs are stored uppercase so lookups are case-stable.
    pub fn with_isrc(mut self, isrc: impl Into<String>) -> Self {
        self.isrc = Some(isrc.into().to_uppercase());
        self
    }

    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }

    pub fn artist_names(&self) -> Vec<String> {
        self.artists.iter().map(|a| a.name.clone()).collect()
    }
}

impl From<entities::track::Model> for Track {
    fn from(model: entities::track::Model) -> Self {
        Self {
            id: Some(model.id),
            title: model.title,
            artists: model.artists.0.into_iter().map(Artist::new).collect(),
            album: model.album,
            duration_ms: model.duration_ms,
            release_date: model.release_date,
            isrc: model.isrc,
        }
    }
}

/// A single listening event prior to insertion. The `context` bag preserves
/// the original service metadata so unresolved plays stay reconstructible.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPlay {
    pub track_id: Option<i64>,
    pub service: String,
    pub played_at: DateTime<Utc>,
    pub ms_played: Option<i64>,
    pub context: Value,
    pub import_timestamp: DateTime<Utc>,
    pub import_source: String,
    pub import_batch_id: String,
}

impl TrackPlay {
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// Reconstruct a track view from the preserved context metadata.
    pub fn to_track(&self) -> Track {
        let artists = self
            .context_str("artist")
            .map(|a| vec![Artist::new(a)])
            .unwrap_or_default();
        let mut track = Track::new(self.context_str("title").unwrap_or_default(), artists);
        track.id = self.track_id;
        track.album = self.context_str("album").map(str::to_owned);
        track
    }

    /// Count of identifying fields present in the context.
    pub fn metadata_completeness(&self) -> usize {
        ["title", "artist", "album"]
            .iter()
            .filter(|key| self.context_str(key).is_some())
            .count()
    }

    /// Value-based dedup fingerprint: `(service, played_at, ms_played,
    /// track_id)` when resolved, falling back to the preserved
    /// title/artist/album when not. Order-independent by construction.
    pub fn dedup_hash(&self) -> String {
        let identity = match self.track_id {
            Some(id) => format!("track:{id}"),
            None => format!(
                "meta:{}|{}|{}",
                self.context_str("title").unwrap_or_default().to_lowercase(),
                self.context_str("artist").unwrap_or_default().to_lowercase(),
                self.context_str("album").unwrap_or_default().to_lowercase(),
            ),
        };
        let ms = self
            .ms_played
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "-".to_string());
        let input = format!(
            "{}|{}|{}|{}",
            self.service,
            self.played_at.timestamp_millis(),
            ms,
            identity
        );
        let digest = Sha256::digest(input.as_bytes());
        format!("{digest:x}")
    }
}

/// Standardized outcome for every use-case. Components never raise past the
/// use-case boundary; errors land in `errors` with `success = false`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub operation: String,
    pub success: bool,
    pub processed_count: usize,
    pub imported_count: usize,
    pub exported_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<String>,
    pub batch_id: Option<String>,
    pub stats: BTreeMap<String, Value>,
}

impl OperationResult {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            success: true,
            processed_count: 0,
            imported_count: 0,
            exported_count: 0,
            skipped_count: 0,
            errors: Vec::new(),
            batch_id: None,
            stats: BTreeMap::new(),
        }
    }

    pub fn failed(operation: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::new(operation);
        result.success = false;
        result.errors.push(error.into());
        result
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn add_stat(&mut self, key: &str, value: impl Into<Value>) {
        self.stats.insert(key.to_string(), value.into());
    }
}

/// Build the canonical play context bag from original track metadata plus
/// service-specific behavioral flags.
pub fn play_context(
    title: &str,
    artist: &str,
    album: Option<&str>,
    extra: BTreeMap<String, Value>,
) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("title".to_string(), json!(title));
    map.insert("artist".to_string(), json!(artist));
    if let Some(album) = album {
        map.insert("album".to_string(), json!(album));
    }
    for (key, value) in extra {
        map.insert(key, value);
    }
    Value::Object(map)
}
