use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::Track;

/// How a track-to-connector mapping was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Isrc,
    Mbid,
    ArtistTitle,
    DirectId,
    RelinkedId,
    ExistingMapping,
    CrossServiceTimeMatch,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Isrc => "isrc",
            MatchMethod::Mbid => "mbid",
            MatchMethod::ArtistTitle => "artist_title",
            MatchMethod::DirectId => "direct_id",
            MatchMethod::RelinkedId => "relinked_id",
            MatchMethod::ExistingMapping => "existing_mapping",
            MatchMethod::CrossServiceTimeMatch => "cross_service_time_match",
        }
    }

    /// Tie-break precedence when a service returns multiple candidates:
    /// ISRC beats MBID beats artist/title.
    pub fn precedence(&self) -> u8 {
        match self {
            MatchMethod::DirectId | MatchMethod::RelinkedId => 0,
            MatchMethod::Isrc => 1,
            MatchMethod::Mbid => 2,
            MatchMethod::ArtistTitle => 3,
            MatchMethod::ExistingMapping => 4,
            MatchMethod::CrossServiceTimeMatch => 5,
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isrc" => Ok(MatchMethod::Isrc),
            "mbid" => Ok(MatchMethod::Mbid),
            "artist_title" => Ok(MatchMethod::ArtistTitle),
            "direct_id" => Ok(MatchMethod::DirectId),
            "relinked_id" => Ok(MatchMethod::RelinkedId),
            "existing_mapping" => Ok(MatchMethod::ExistingMapping),
            "cross_service_time_match" => Ok(MatchMethod::CrossServiceTimeMatch),
            other => Err(format!("unknown match method: {other}")),
        }
    }
}

/// Per-axis breakdown retained alongside a mapping for auditing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceEvidence {
    pub base_score: i32,
    pub title_score: f64,
    pub artist_score: f64,
    pub duration_score: f64,
    pub title_similarity: f64,
    pub artist_similarity: f64,
    pub duration_diff_ms: i64,
    pub final_score: i32,
}

/// The external service's view of a track, reduced to what the confidence
/// scorer needs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceTrackData {
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<i64>,
}

/// One resolved identity: internal track to connector id with confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub track: Track,
    pub connector_id: String,
    pub confidence: i32,
    pub method: MatchMethod,
    pub evidence: Option<ConfidenceEvidence>,
}

pub type MatchResultsById = HashMap<i64, MatchResult>;
