use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use reqwest::Client;
use serde_json::Value;

use crate::config::LastfmConfig;
use crate::error::ConnectorError;
use crate::ports::connector::{
    AsAttributeMap, ConnectorApiPlaylist, ConnectorApiTrack, ConnectorClient,
    ConnectorLikedTrack, ConnectorPlayRecord,
};

const DEFAULT_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// Last.fm allows roughly 5 requests per second; stay well under it.
static RATE_LIMITER: std::sync::OnceLock<Arc<DirectRateLimiter>> = std::sync::OnceLock::new();

fn get_rate_limiter() -> &'static Arc<DirectRateLimiter> {
    RATE_LIMITER.get_or_init(|| {
        let quota = Quota::per_second(NonZeroU32::new(1).unwrap());
        Arc::new(RateLimiter::direct(quota))
    })
}

/// Last.fm tracks have no single opaque id; the stable identity is the
/// `(artist, title)` pair, encoded as one string.
pub fn external_id(artist: &str, title: &str) -> String {
    format!("{artist}||{title}")
}

fn split_external_id(id: &str) -> Option<(&str, &str)> {
    id.split_once("||")
}

/// Last.fm API adapter. Read calls are plain GETs; write calls are signed
/// with the shared secret per the API's authentication scheme.
pub struct LastfmClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    username: String,
    session_key: Option<String>,
}

impl LastfmClient {
    pub fn new(config: &LastfmConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            api_secret: config.api_secret.clone().unwrap_or_default(),
            username: config.username.clone().unwrap_or_default(),
            session_key: config.session_key.clone(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get(&self, method: &str, params: &[(&str, &str)]) -> Result<Value, ConnectorError> {
        get_rate_limiter().until_ready().await;

        let mut query: Vec<(&str, &str)> = vec![
            ("method", method),
            ("api_key", &self.api_key),
            ("format", "json"),
        ];
        query.extend_from_slice(params);

        let response = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, method));
        }

        let payload: Value = response.json().await.map_err(ConnectorError::from)?;
        if let Some(code) = payload.get("error").and_then(Value::as_i64) {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            // 11 = service offline, 16 = temporarily unavailable, 29 = rate limit.
            return Err(match code {
                11 | 16 => ConnectorError::Transient(format!("{method}: {message}")),
                29 => ConnectorError::RateLimited,
                _ => ConnectorError::Permanent(format!("{method}: {message}")),
            });
        }

        Ok(payload)
    }

    async fn post_signed(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, ConnectorError> {
        let session_key = self.session_key.as_deref().ok_or_else(|| {
            ConnectorError::Permanent("write call requires a Last.fm session key".into())
        })?;

        get_rate_limiter().until_ready().await;

        let mut signed: BTreeMap<String, String> = BTreeMap::new();
        signed.insert("method".to_string(), method.to_string());
        signed.insert("api_key".to_string(), self.api_key.clone());
        signed.insert("sk".to_string(), session_key.to_string());
        for (key, value) in params {
            signed.insert((*key).to_string(), (*value).to_string());
        }
        let signature = api_signature(&signed, &self.api_secret);
        signed.insert("api_sig".to_string(), signature);
        signed.insert("format".to_string(), "json".to_string());

        let response = self
            .http
            .post(&self.base_url)
            .form(&signed)
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, method));
        }

        response.json().await.map_err(ConnectorError::from)
    }
}

/// Sign parameters per the Last.fm scheme: keys sorted, `format` excluded,
/// shared secret appended, MD5 over the whole string.
fn api_signature(params: &BTreeMap<String, String>, secret: &str) -> String {
    let mut input = String::new();
    for (key, value) in params {
        if key == "format" {
            continue;
        }
        input.push_str(key);
        input.push_str(value);
    }
    input.push_str(secret);
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn artist_text(value: &Value) -> Option<String> {
    value
        .get("artist")
        .and_then(|artist| {
            artist
                .get("#text")
                .or_else(|| artist.get("name"))
                .and_then(Value::as_str)
        })
        .map(str::to_owned)
}

/// Parse one entry of `user.getRecentTracks`. Now-playing entries carry no
/// date and are skipped.
fn parse_recent_track(item: &Value) -> Option<ConnectorPlayRecord> {
    let title = item.get("name")?.as_str()?.to_string();
    let artist = artist_text(item)?;
    let uts: i64 = item.pointer("/date/uts")?.as_str()?.parse().ok()?;
    let played_at = Utc.timestamp_opt(uts, 0).single()?;

    Some(ConnectorPlayRecord {
        album: item
            .pointer("/album/#text")
            .and_then(Value::as_str)
            .filter(|album| !album.is_empty())
            .map(str::to_owned),
        track_id: Some(external_id(&artist, &title)),
        title,
        artist,
        played_at,
        ms_played: None,
        raw: item.clone(),
    })
}

fn parse_loved_track(item: &Value) -> Option<ConnectorLikedTrack> {
    let title = item.get("name")?.as_str()?.to_string();
    let artist = artist_text(item)?;
    let liked_at = item
        .pointer("/date/uts")
        .and_then(Value::as_str)
        .and_then(|uts| uts.parse::<i64>().ok())
        .and_then(|uts| Utc.timestamp_opt(uts, 0).single());

    Some(ConnectorLikedTrack {
        track: ConnectorApiTrack {
            id: external_id(&artist, &title),
            title,
            artists: vec![artist],
            raw: item.clone(),
            ..Default::default()
        },
        liked_at,
    })
}

/// `track.getInfo` payload reduced to the attribute bag the metadata
/// manager persists.
struct LastfmTrackInfo {
    attributes: BTreeMap<String, Value>,
}

impl AsAttributeMap for LastfmTrackInfo {
    fn as_attribute_map(&self) -> BTreeMap<String, Value> {
        self.attributes.clone()
    }
}

fn parse_track_info(payload: &Value) -> Option<(ConnectorApiTrack, BTreeMap<String, Value>)> {
    let track = payload.get("track")?;
    let title = track.get("name")?.as_str()?.to_string();
    let artist = track
        .pointer("/artist/name")
        .and_then(Value::as_str)?
        .to_string();

    let mut attributes = BTreeMap::new();
    for key in ["listeners", "playcount", "userplaycount", "userloved"] {
        if let Some(value) = track.get(key) {
            let numeric = value
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| value.as_f64());
            if let Some(numeric) = numeric {
                attributes.insert(key.to_string(), Value::from(numeric));
            }
        }
    }

    let duration_ms = track
        .get("duration")
        .and_then(|d| d.as_str().and_then(|s| s.parse::<i64>().ok()).or(d.as_i64()))
        .filter(|ms| *ms > 0);

    let record = ConnectorApiTrack {
        id: external_id(&artist, &title),
        title,
        artists: vec![artist],
        duration_ms,
        raw: track.clone(),
        ..Default::default()
    };

    Some((record, attributes))
}

#[async_trait]
impl ConnectorClient for LastfmClient {
    fn connector_name(&self) -> &'static str {
        super::CONNECTOR_NAME
    }

    fn supports_isrc_search(&self) -> bool {
        false
    }

    async fn batch_get_tracks(
        &self,
        external_ids: &[String],
    ) -> Result<HashMap<String, ConnectorApiTrack>, ConnectorError> {
        let mut tracks = HashMap::new();
        for id in external_ids {
            let Some((artist, title)) = split_external_id(id) else {
                continue;
            };
            let payload = self
                .get(
                    "track.getInfo",
                    &[
                        ("artist", artist),
                        ("track", title),
                        ("username", &self.username),
                    ],
                )
                .await?;
            if let Some((record, _)) = parse_track_info(&payload) {
                tracks.insert(id.clone(), record);
            }
        }
        Ok(tracks)
    }

    async fn search_by_isrc(
        &self,
        _isrc: &str,
    ) -> Result<Option<ConnectorApiTrack>, ConnectorError> {
        // Last.fm exposes no ISRC lookup.
        Ok(None)
    }

    async fn search_track(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<ConnectorApiTrack>, ConnectorError> {
        let payload = self
            .get(
                "track.getInfo",
                &[
                    ("artist", artist),
                    ("track", title),
                    ("username", &self.username),
                    ("autocorrect", "1"),
                ],
            )
            .await;

        match payload {
            Ok(payload) => Ok(parse_track_info(&payload).map(|(record, _)| record)),
            // "Track not found" is a permanent error from the API but an
            // ordinary miss for the caller.
            Err(ConnectorError::Permanent(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn batch_get_track_info(
        &self,
        tracks: &[(i64, String)],
    ) -> Result<HashMap<i64, Box<dyn AsAttributeMap>>, ConnectorError> {
        let mut info: HashMap<i64, Box<dyn AsAttributeMap>> = HashMap::new();
        for (track_id, external) in tracks {
            let Some((artist, title)) = split_external_id(external) else {
                continue;
            };
            let payload = self
                .get(
                    "track.getInfo",
                    &[
                        ("artist", artist),
                        ("track", title),
                        ("username", &self.username),
                    ],
                )
                .await?;
            if let Some((_, attributes)) = parse_track_info(&payload) {
                info.insert(*track_id, Box::new(LastfmTrackInfo { attributes }) as _);
            }
        }
        Ok(info)
    }

    async fn get_liked_tracks(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<(Vec<ConnectorLikedTrack>, Option<String>), ConnectorError> {
        let page: u32 = cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(1);
        let limit_str = limit.to_string();
        let page_str = page.to_string();

        let payload = self
            .get(
                "user.getLovedTracks",
                &[
                    ("user", &self.username),
                    ("limit", &limit_str),
                    ("page", &page_str),
                ],
            )
            .await?;

        let liked: Vec<ConnectorLikedTrack> = payload
            .pointer("/lovedtracks/track")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_loved_track).collect())
            .unwrap_or_default();

        let total_pages: u32 = payload
            .pointer("/lovedtracks/@attr/totalPages")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        let next_cursor = (page < total_pages).then(|| (page + 1).to_string());

        Ok((liked, next_cursor))
    }

    async fn get_recent_plays(
        &self,
        limit: Option<usize>,
        from_time: Option<DateTime<Utc>>,
        page: Option<u32>,
    ) -> Result<(Vec<ConnectorPlayRecord>, bool), ConnectorError> {
        let limit_str = limit.unwrap_or(50).to_string();
        let page_str = page.unwrap_or(1).to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &self.username),
            ("limit", &limit_str),
            ("page", &page_str),
        ];
        let from_str;
        if let Some(from_time) = from_time {
            from_str = from_time.timestamp().to_string();
            params.push(("from", &from_str));
        }

        let payload = self.get("user.getRecentTracks", &params).await?;

        let plays: Vec<ConnectorPlayRecord> = payload
            .pointer("/recenttracks/track")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_recent_track).collect())
            .unwrap_or_default();

        let current_page: u32 = payload
            .pointer("/recenttracks/@attr/page")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        let total_pages: u32 = payload
            .pointer("/recenttracks/@attr/totalPages")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Ok((plays, current_page < total_pages))
    }

    async fn love_track(&self, artist: &str, title: &str) -> Result<bool, ConnectorError> {
        self.post_signed("track.love", &[("artist", artist), ("track", title)])
            .await?;
        Ok(true)
    }

    async fn get_playlist(
        &self,
        _external_id: &str,
    ) -> Result<ConnectorApiPlaylist, ConnectorError> {
        Err(ConnectorError::Permanent(
            "Last.fm does not expose playlists".into(),
        ))
    }

    async fn create_playlist<'a>(
        &self,
        _name: &str,
        _track_ids: &[String],
        _description: Option<&'a str>,
    ) -> Result<String, ConnectorError> {
        Err(ConnectorError::Permanent(
            "Last.fm does not expose playlists".into(),
        ))
    }

    async fn update_playlist(
        &self,
        _external_id: &str,
        _track_ids: &[String],
        _replace: bool,
    ) -> Result<(), ConnectorError> {
        Err(ConnectorError::Permanent(
            "Last.fm does not expose playlists".into(),
        ))
    }
}
