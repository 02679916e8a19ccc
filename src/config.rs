use std::path::PathBuf;

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use serde::{Deserialize, Serialize};

/// Application configuration: a TOML file with environment-variable
/// overrides for credentials and batch sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.
    database: Option<String>,
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub lastfm: LastfmConfig,
    #[serde(default)]
    pub batch: BatchSizes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastfmConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub username: Option<String>,
    pub session_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSizes {
    pub api_batch_size: usize,
    pub import_batch_size: usize,
    pub match_batch_size: usize,
    pub sync_batch_size: usize,
    pub spotify_api_batch_size: Option<usize>,
    pub lastfm_api_batch_size: Option<usize>,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            api_batch_size: 50,
            import_batch_size: 50,
            match_batch_size: 30,
            sync_batch_size: 20,
            spotify_api_batch_size: None,
            lastfm_api_batch_size: None,
        }
    }
}

impl Config {
    /// Load from the given file (or the default location), then apply
    /// environment overrides.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.clone()),
            None => Self::config_path(),
        };

        let mut config = match config_path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path).wrap_err_with(|| {
                    format!("Failed to read config file: {}", path.display())
                })?;
                toml::from_str(&contents).wrap_err_with(|| {
                    format!("Failed to parse config file: {}", path.display())
                })?
            }
            _ => Config::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|path| path.join(".config/tunelink").join("config.toml"))
    }

    /// Database location, defaulting to the user's data directory.
    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => expand_path(path),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tunelink/library.db"),
        }
    }

    /// Per-service API batch size, falling back to the global default.
    pub fn api_batch_size_for(&self, service: &str) -> usize {
        match service {
            "spotify" => self.batch.spotify_api_batch_size,
            "lastfm" => self.batch.lastfm_api_batch_size,
            _ => None,
        }
        .unwrap_or(self.batch.api_batch_size)
    }

    /// Layer environment variables over the file-based settings. The
    /// lookup is injected so tests can drive it without touching the
    /// process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("TUNELINK_DATABASE") {
            self.database = Some(value);
        }

        if let Some(value) = lookup("SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = Some(value);
        }
        if let Some(value) = lookup("SPOTIFY_CLIENT_SECRET") {
            self.spotify.client_secret = Some(value);
        }
        if let Some(value) = lookup("SPOTIFY_REDIRECT_URI") {
            self.spotify.redirect_uri = Some(value);
        }
        if let Some(value) = lookup("SPOTIFY_ACCESS_TOKEN") {
            self.spotify.access_token = Some(value);
        }

        if let Some(value) = lookup("LASTFM_API_KEY") {
            self.lastfm.api_key = Some(value);
        }
        if let Some(value) = lookup("LASTFM_API_SECRET") {
            self.lastfm.api_secret = Some(value);
        }
        if let Some(value) = lookup("LASTFM_USERNAME") {
            self.lastfm.username = Some(value);
        }
        if let Some(value) = lookup("LASTFM_SESSION_KEY") {
            self.lastfm.session_key = Some(value);
        }

        if let Some(value) = parse_usize(&lookup, "DEFAULT_API_BATCH_SIZE") {
            self.batch.api_batch_size = value;
        }
        if let Some(value) = parse_usize(&lookup, "DEFAULT_IMPORT_BATCH_SIZE") {
            self.batch.import_batch_size = value;
        }
        if let Some(value) = parse_usize(&lookup, "DEFAULT_MATCH_BATCH_SIZE") {
            self.batch.match_batch_size = value;
        }
        if let Some(value) = parse_usize(&lookup, "DEFAULT_SYNC_BATCH_SIZE") {
            self.batch.sync_batch_size = value;
        }
        if let Some(value) = parse_usize(&lookup, "SPOTIFY_API_BATCH_SIZE") {
            self.batch.spotify_api_batch_size = Some(value);
        }
        if let Some(value) = parse_usize(&lookup, "LASTFM_API_BATCH_SIZE") {
            self.batch.lastfm_api_batch_size = Some(value);
        }
    }
}

fn parse_usize(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    lookup(key).and_then(|value| match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value, "ignoring non-numeric override");
            None
        }
    })
}

fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(map: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_match_documented_batch_sizes() {
        let config = Config::default();
        assert_eq!(config.batch.api_batch_size, 50);
        assert_eq!(config.batch.import_batch_size, 50);
        assert_eq!(config.batch.match_batch_size, 30);
        assert_eq!(config.batch.sync_batch_size, 20);
        assert_eq!(config.api_batch_size_for("spotify"), 50);
    }

    #[test]
    fn environment_overrides_take_effect() {
        let mut config = Config::default();
        let mut env = HashMap::new();
        env.insert("SPOTIFY_CLIENT_ID", "abc");
        env.insert("LASTFM_USERNAME", "listener");
        env.insert("DEFAULT_API_BATCH_SIZE", "25");
        env.insert("LASTFM_API_BATCH_SIZE", "10");

        config.apply_overrides(lookup_from(&env));

        assert_eq!(config.spotify.client_id.as_deref(), Some("abc"));
        assert_eq!(config.lastfm.username.as_deref(), Some("listener"));
        assert_eq!(config.batch.api_batch_size, 25);
        assert_eq!(config.api_batch_size_for("lastfm"), 10);
        assert_eq!(config.api_batch_size_for("spotify"), 25);
    }

    #[test]
    fn malformed_numeric_overrides_are_ignored() {
        let mut config = Config::default();
        let mut env = HashMap::new();
        env.insert("DEFAULT_API_BATCH_SIZE", "many");

        config.apply_overrides(lookup_from(&env));
        assert_eq!(config.batch.api_batch_size, 50);
    }
}
