use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use crate::config::SpotifyConfig;
use crate::error::ConnectorError;
use crate::ports::connector::{
    AsAttributeMap, ConnectorApiPlaylist, ConnectorApiTrack, ConnectorClient,
    ConnectorLikedTrack, ConnectorPlayRecord, ConnectorPlaylistEntry,
};

const DEFAULT_BASE_URL: &str = "https://api.spotify.com/v1";

/// Spotify Web API adapter. Raw payloads are exposed as opaque bags;
/// structured extraction happens downstream.
pub struct SpotifyClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: config.access_token.clone().unwrap_or_default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json(&self, path: &str) -> Result<Value, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, &url));
        }

        response.json().await.map_err(ConnectorError::from)
    }
}

/// Parse one track object from the Spotify API into the decoupled record.
fn parse_track(value: &Value) -> Option<ConnectorApiTrack> {
    let id = value.get("id")?.as_str()?.to_string();
    let title = value.get("name")?.as_str()?.to_string();

    let artists = value
        .get("artists")
        .and_then(Value::as_array)
        .map(|artists| {
            artists
                .iter()
                .filter_map(|artist| artist.get("name").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Some(ConnectorApiTrack {
        id,
        title,
        artists,
        album: value
            .pointer("/album/name")
            .and_then(Value::as_str)
            .map(str::to_owned),
        duration_ms: value.get("duration_ms").and_then(Value::as_i64),
        release_date: value
            .pointer("/album/release_date")
            .and_then(Value::as_str)
            .map(str::to_owned),
        isrc: value
            .pointer("/external_ids/isrc")
            .and_then(Value::as_str)
            .map(str::to_uppercase),
        linked_from_id: value
            .pointer("/linked_from/id")
            .and_then(Value::as_str)
            .map(str::to_owned),
        popularity: value.get("popularity").and_then(Value::as_f64),
        raw: value.clone(),
    })
}

/// Enriched per-user info payload; popularity is the metric Spotify carries.
struct SpotifyTrackInfo {
    attributes: BTreeMap<String, Value>,
}

impl AsAttributeMap for SpotifyTrackInfo {
    fn as_attribute_map(&self) -> BTreeMap<String, Value> {
        self.attributes.clone()
    }
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl ConnectorClient for SpotifyClient {
    fn connector_name(&self) -> &'static str {
        super::CONNECTOR_NAME
    }

    fn supports_isrc_search(&self) -> bool {
        true
    }

    async fn batch_get_tracks(
        &self,
        external_ids: &[String],
    ) -> Result<HashMap<String, ConnectorApiTrack>, ConnectorError> {
        if external_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let payload = self
            .get_json(&format!("/tracks?ids={}", external_ids.join(",")))
            .await?;

        let mut tracks = HashMap::new();
        if let Some(items) = payload.get("tracks").and_then(Value::as_array) {
            for item in items {
                if let Some(track) = parse_track(item) {
                    // Requests by an old id come back keyed by the new id;
                    // index under the requested id so callers can join.
                    let key = track
                        .linked_from_id
                        .clone()
                        .unwrap_or_else(|| track.id.clone());
                    tracks.insert(key, track);
                }
            }
        }

        Ok(tracks)
    }

    async fn search_by_isrc(
        &self,
        isrc: &str,
    ) -> Result<Option<ConnectorApiTrack>, ConnectorError> {
        let payload = self
            .get_json(&format!("/search?q=isrc:{isrc}&type=track&limit=1"))
            .await?;

        Ok(payload
            .pointer("/tracks/items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(parse_track))
    }

    async fn search_track(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<ConnectorApiTrack>, ConnectorError> {
        let query = format!("artist:{artist} track:{title}");
        let encoded: String = url_encode(&query);
        let payload = self
            .get_json(&format!("/search?q={encoded}&type=track&limit=1"))
            .await?;

        Ok(payload
            .pointer("/tracks/items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(parse_track))
    }

    async fn batch_get_track_info(
        &self,
        tracks: &[(i64, String)],
    ) -> Result<HashMap<i64, Box<dyn AsAttributeMap>>, ConnectorError> {
        if tracks.is_empty() {
            return Ok(HashMap::new());
        }

        let external_ids: Vec<String> = tracks.iter().map(|(_, ext)| ext.clone()).collect();
        let by_external = self.batch_get_tracks(&external_ids).await?;

        let mut info: HashMap<i64, Box<dyn AsAttributeMap>> = HashMap::new();
        for (track_id, external_id) in tracks {
            if let Some(track) = by_external.get(external_id) {
                let mut attributes = BTreeMap::new();
                if let Some(popularity) = track.popularity {
                    attributes.insert("popularity".to_string(), Value::from(popularity));
                }
                if let Some(duration) = track.duration_ms {
                    attributes.insert("duration_ms".to_string(), Value::from(duration));
                }
                info.insert(*track_id, Box::new(SpotifyTrackInfo { attributes }) as _);
            }
        }

        Ok(info)
    }

    async fn get_liked_tracks(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<(Vec<ConnectorLikedTrack>, Option<String>), ConnectorError> {
        let offset: usize = cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);

        let payload = self
            .get_json(&format!("/me/tracks?limit={limit}&offset={offset}"))
            .await?;

        let mut liked = Vec::new();
        if let Some(items) = payload.get("items").and_then(Value::as_array) {
            for item in items {
                if let Some(track) = item.get("track").and_then(parse_track_ref) {
                    liked.push(ConnectorLikedTrack {
                        track,
                        liked_at: parse_timestamp(item.get("added_at")),
                    });
                }
            }
        }

        let next_cursor = payload
            .get("next")
            .and_then(Value::as_str)
            .map(|_| (offset + liked.len()).to_string());

        Ok((liked, next_cursor))
    }

    async fn get_recent_plays(
        &self,
        limit: Option<usize>,
        from_time: Option<DateTime<Utc>>,
        _page: Option<u32>,
    ) -> Result<(Vec<ConnectorPlayRecord>, bool), ConnectorError> {
        let mut path = format!("/me/player/recently-played?limit={}", limit.unwrap_or(50));
        if let Some(from_time) = from_time {
            path.push_str(&format!("&after={}", from_time.timestamp_millis()));
        }

        let payload = self.get_json(&path).await?;

        let mut plays = Vec::new();
        if let Some(items) = payload.get("items").and_then(Value::as_array) {
            for item in items {
                let Some(track) = item.get("track").and_then(parse_track_ref) else {
                    continue;
                };
                let Some(played_at) = parse_timestamp(item.get("played_at")) else {
                    continue;
                };
                plays.push(ConnectorPlayRecord {
                    title: track.title.clone(),
                    artist: track.primary_artist().to_string(),
                    album: track.album.clone(),
                    played_at,
                    ms_played: None,
                    track_id: Some(track.id.clone()),
                    raw: item.clone(),
                });
            }
        }

        let has_more = payload.pointer("/cursors/before").is_some();
        Ok((plays, has_more))
    }

    async fn love_track(&self, artist: &str, title: &str) -> Result<bool, ConnectorError> {
        let Some(track) = self.search_track(artist, title).await? else {
            return Ok(false);
        };

        let url = format!("{}/me/tracks?ids={}", self.base_url, track.id);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.access_token)
            .header("Content-Length", 0)
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, &url));
        }
        Ok(true)
    }

    async fn get_playlist(
        &self,
        external_id: &str,
    ) -> Result<ConnectorApiPlaylist, ConnectorError> {
        let payload = self.get_json(&format!("/playlists/{external_id}")).await?;

        let mut entries = Vec::new();
        if let Some(items) = payload.pointer("/tracks/items").and_then(Value::as_array) {
            for (position, item) in items.iter().enumerate() {
                let Some(track_id) = item.pointer("/track/id").and_then(Value::as_str) else {
                    continue;
                };
                entries.push(ConnectorPlaylistEntry {
                    track_id: track_id.to_string(),
                    position: position as i32,
                    added_at: parse_timestamp(item.get("added_at")),
                    added_by: item
                        .pointer("/added_by/id")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                });
            }
        }

        Ok(ConnectorApiPlaylist {
            id: external_id.to_string(),
            name: payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: payload
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned),
            entries,
        })
    }

    async fn create_playlist<'a>(
        &self,
        name: &str,
        track_ids: &[String],
        description: Option<&'a str>,
    ) -> Result<String, ConnectorError> {
        let me = self.get_json("/me").await?;
        let user_id = me
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::Permanent("profile lookup returned no id".into()))?
            .to_string();

        let url = format!("{}/users/{}/playlists", self.base_url, user_id);
        let body = serde_json::json!({
            "name": name,
            "description": description.unwrap_or_default(),
            "public": false,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, &url));
        }
        let payload: Value = response.json().await.map_err(ConnectorError::from)?;
        let playlist_id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::Permanent("playlist create returned no id".into()))?
            .to_string();

        if !track_ids.is_empty() {
            self.update_playlist(&playlist_id, track_ids, true).await?;
        }

        Ok(playlist_id)
    }

    async fn update_playlist(
        &self,
        external_id: &str,
        track_ids: &[String],
        replace: bool,
    ) -> Result<(), ConnectorError> {
        let url = format!("{}/playlists/{}/tracks", self.base_url, external_id);
        let uris: Vec<String> = track_ids
            .iter()
            .map(|id| format!("spotify:track:{id}"))
            .collect();
        let body = serde_json::json!({ "uris": uris });

        let request = if replace {
            self.http.put(&url)
        } else {
            self.http.post(&url)
        };
        let response = request
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, &url));
        }
        Ok(())
    }
}

fn parse_track_ref(value: &Value) -> Option<ConnectorApiTrack> {
    parse_track(value)
}

fn url_encode(input: &str) -> String {
    input
        .bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (byte as char).to_string()
            }
            b' ' => "%20".to_string(),
            other => format!("%{other:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_track_payload() {
        let payload = json!({
            "id": "6LgJvl0Xdtc73RJ1mmpotq",
            "name": "Paranoid Android",
            "duration_ms": 386_000,
            "popularity": 77,
            "artists": [{"name": "Radiohead"}],
            "album": {"name": "OK Computer", "release_date": "1997-05-21"},
            "external_ids": {"isrc": "gbum71505078"},
        });

        let track = parse_track(&payload).unwrap();
        assert_eq!(track.id, "6LgJvl0Xdtc73RJ1mmpotq");
        assert_eq!(track.title, "Paranoid Android");
        assert_eq!(track.artists, vec!["Radiohead"]);
        assert_eq!(track.album.as_deref(), Some("OK Computer"));
        assert_eq!(track.duration_ms, Some(386_000));
        assert_eq!(track.isrc.as_deref(), Some("GBUM71505078"));
        assert_eq!(track.popularity, Some(77.0));
        assert!(track.linked_from_id.is_none());
    }

    #[test]
    fn parses_relinked_track() {
        let payload = json!({
            "id": "new-id",
            "name": "Creep",
            "artists": [{"name": "Radiohead"}],
            "linked_from": {"id": "old-id"},
        });

        let track = parse_track(&payload).unwrap();
        assert_eq!(track.linked_from_id.as_deref(), Some("old-id"));
    }

    #[test]
    fn track_without_id_is_rejected() {
        let payload = json!({"name": "Ghost Track"});
        assert!(parse_track(&payload).is_none());
    }

    #[test]
    fn query_encoding_escapes_reserved_characters() {
        assert_eq!(url_encode("artist:AC/DC"), "artist%3AAC%2FDC");
        assert_eq!(url_encode("a b"), "a%20b");
    }
}
