//! Confidence scoring for cross-service track matches.
//!
//! Pure functions: two track descriptions plus the match method in, a score
//! in `[0, 100]` and an evidence record out. The same machinery scores
//! cross-service play duplicates with a time-window penalty.

use crate::domain::{Track, TrackPlay};
use crate::matching::similarity::{token_set_ratio, token_sort_ratio};
use crate::matching::types::{ConfidenceEvidence, MatchMethod, ServiceTrackData};

const BASE_ISRC: i32 = 95;
const BASE_MBID: i32 = 95;
const BASE_ARTIST_TITLE: i32 = 90;

const TITLE_MAX_PENALTY: f64 = 40.0;
const ARTIST_MAX_PENALTY: f64 = 40.0;
const DURATION_MAX_PENALTY: i64 = 60;

const HIGH_SIMILARITY: f64 = 0.9;
const IDENTICAL_SIMILARITY: f64 = 1.0;
const VARIATION_SIMILARITY: f64 = 0.6;

const DURATION_MISSING_PENALTY: f64 = 10.0;
const DURATION_TOLERANCE_MS: i64 = 1000;

const PLAY_TIME_MAX_PENALTY: f64 = 20.0;

/// Title tokens that mark an alternate rendition of the same recording.
const VARIATION_MARKERS: &[&str] = &[
    "live",
    "remix",
    "acoustic",
    "demo",
    "remaster",
    "radio edit",
    "extended",
    "instrumental",
    "album version",
    "single version",
];

/// Title similarity accounting for variations like "Live" or "Remix".
///
/// Identical titles score 1.0. When one title contains the other and the
/// leftover text names a known variation, the pair scores a fixed 0.6 so a
/// live cut never passes for the studio recording. Everything else falls
/// through to a token-set ratio.
pub fn title_similarity(title1: &str, title2: &str) -> f64 {
    let t1 = title1.to_lowercase();
    let t2 = title2.to_lowercase();

    if t1 == t2 {
        return IDENTICAL_SIMILARITY;
    }

    if t1.contains(&t2) || t2.contains(&t1) {
        let (longer, shorter) = if t1.len() >= t2.len() {
            (&t1, &t2)
        } else {
            (&t2, &t1)
        };
        let remaining = longer
            .replace(shorter.as_str(), "")
            .trim_matches(|c: char| "- ()[]".contains(c))
            .trim()
            .to_string();
        if VARIATION_MARKERS
            .iter()
            .any(|marker| remaining.contains(marker))
        {
            return VARIATION_SIMILARITY;
        }
    }

    token_set_ratio(&t1, &t2)
}

fn base_score(method: MatchMethod) -> i32 {
    match method {
        MatchMethod::Isrc => BASE_ISRC,
        MatchMethod::Mbid => BASE_MBID,
        _ => BASE_ARTIST_TITLE,
    }
}

fn title_penalty(similarity: f64) -> f64 {
    if similarity >= HIGH_SIMILARITY {
        0.0
    } else {
        let factor = ((HIGH_SIMILARITY - similarity) / HIGH_SIMILARITY).max(0.0);
        -TITLE_MAX_PENALTY * factor
    }
}

// Quadratic so small artist mismatches are punished disproportionately.
fn artist_penalty(similarity: f64) -> f64 {
    if similarity >= HIGH_SIMILARITY {
        0.0
    } else {
        let factor = ((HIGH_SIMILARITY - similarity) / HIGH_SIMILARITY).max(0.0);
        -ARTIST_MAX_PENALTY * factor * factor
    }
}

/// Score how well a service track matches an internal track.
pub fn calculate_confidence(
    internal: &Track,
    service: &ServiceTrackData,
    method: MatchMethod,
) -> (i32, ConfidenceEvidence) {
    let base = base_score(method);

    let mut title_sim = 0.0;
    let mut title_score = 0.0;
    if !internal.title.is_empty() && !service.title.is_empty() {
        title_sim = title_similarity(&internal.title, &service.title);
        title_score = title_penalty(title_sim);
    }

    let mut artist_sim = 0.0;
    let mut artist_score = 0.0;
    if let Some(internal_artist) = internal.primary_artist()
        && !service.artist.is_empty()
    {
        artist_sim = token_sort_ratio(
            &internal_artist.to_lowercase(),
            &service.artist.to_lowercase(),
        );
        artist_score = artist_penalty(artist_sim);
    }

    let mut duration_diff_ms = 0i64;
    let duration_score = match (internal.duration_ms, service.duration_ms) {
        (Some(a), Some(b)) => {
            duration_diff_ms = (a - b).abs();
            if duration_diff_ms <= DURATION_TOLERANCE_MS {
                0.0
            } else {
                // One point per whole second beyond the tolerance, capped.
                let seconds = (duration_diff_ms - DURATION_TOLERANCE_MS + 999) / 1000;
                -(seconds.min(DURATION_MAX_PENALTY) as f64)
            }
        }
        _ => -DURATION_MISSING_PENALTY,
    };

    let final_score = (base as f64 + title_score + artist_score + duration_score)
        .round()
        .clamp(0.0, 100.0) as i32;

    let evidence = ConfidenceEvidence {
        base_score: base,
        title_score,
        artist_score,
        duration_score,
        title_similarity: title_sim,
        artist_similarity: artist_sim,
        duration_diff_ms,
        final_score,
    };

    (final_score, evidence)
}

/// Confidence that two plays from different services are the same listening
/// event. Outside the time window the answer is a hard 0; inside it, the
/// track axes are scored as usual (no duration axis, since `ms_played` is a
/// behavior not an attribute) and a linear time penalty is subtracted.
/// `duration_diff_ms` on the evidence carries the time delta.
pub fn play_match_confidence(
    play1: &TrackPlay,
    play2: &TrackPlay,
    time_window_seconds: i64,
) -> (i32, ConfidenceEvidence) {
    let time_diff_seconds = (play1.played_at - play2.played_at).num_seconds().abs();
    if time_diff_seconds >= time_window_seconds {
        let evidence = ConfidenceEvidence {
            duration_diff_ms: time_diff_seconds * 1000,
            ..ConfidenceEvidence::default()
        };
        return (0, evidence);
    }

    // Score from the play with the more complete metadata.
    let (internal_play, service_play) =
        if play1.metadata_completeness() >= play2.metadata_completeness() {
            (play1, play2)
        } else {
            (play2, play1)
        };

    let internal = internal_play.to_track();
    let base = base_score(MatchMethod::CrossServiceTimeMatch);

    let mut title_sim = 0.0;
    let mut title_score = 0.0;
    let service_title = service_play.context_str("title").unwrap_or_default();
    if !internal.title.is_empty() && !service_title.is_empty() {
        title_sim = title_similarity(&internal.title, service_title);
        title_score = title_penalty(title_sim);
    }

    let mut artist_sim = 0.0;
    let mut artist_score = 0.0;
    let service_artist = service_play.context_str("artist").unwrap_or_default();
    if let Some(internal_artist) = internal.primary_artist()
        && !service_artist.is_empty()
    {
        artist_sim = token_sort_ratio(
            &internal_artist.to_lowercase(),
            &service_artist.to_lowercase(),
        );
        artist_score = artist_penalty(artist_sim);
    }

    let time_penalty =
        (PLAY_TIME_MAX_PENALTY * time_diff_seconds as f64 / time_window_seconds as f64) as i32;

    let track_score = (base as f64 + title_score + artist_score)
        .round()
        .clamp(0.0, 100.0) as i32;
    let final_score = (track_score - time_penalty).max(0);

    let evidence = ConfidenceEvidence {
        base_score: base,
        title_score,
        artist_score,
        duration_score: -(time_penalty as f64),
        title_similarity: title_sim,
        artist_similarity: artist_sim,
        duration_diff_ms: time_diff_seconds * 1000,
        final_score,
    };

    (final_score, evidence)
}

/// Find plays from other services that may duplicate the target play.
pub fn find_duplicate_plays<'a>(
    target: &TrackPlay,
    candidates: &'a [TrackPlay],
    time_window_seconds: i64,
    min_confidence: i32,
) -> Vec<(&'a TrackPlay, i32, ConfidenceEvidence)> {
    candidates
        .iter()
        // Same-service duplicates are handled by the dedup fingerprint.
        .filter(|candidate| candidate.service != target.service)
        .filter_map(|candidate| {
            let (confidence, evidence) =
                play_match_confidence(target, candidate, time_window_seconds);
            (confidence >= min_confidence).then_some((candidate, confidence, evidence))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Artist, play_context};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn track(title: &str, artist: &str, duration_ms: Option<i64>) -> Track {
        let mut t = Track::new(title, vec![Artist::new(artist)]);
        t.duration_ms = duration_ms;
        t
    }

    fn service(title: &str, artist: &str, duration_ms: Option<i64>) -> ServiceTrackData {
        ServiceTrackData {
            title: title.to_string(),
            artist: artist.to_string(),
            duration_ms,
        }
    }

    #[test]
    fn isrc_match_perfect() {
        let internal =
            track("Paranoid Android", "Radiohead", Some(386_000)).with_isrc("GBUM71505078");
        let external = service("Paranoid Android", "Radiohead", Some(386_000));

        let (score, evidence) = calculate_confidence(&internal, &external, MatchMethod::Isrc);

        assert_eq!(score, 95);
        assert_eq!(evidence.title_similarity, 1.0);
        assert!(evidence.artist_similarity >= 0.95);
        assert_eq!(evidence.duration_diff_ms, 0);
        assert_eq!(evidence.final_score, 95);
    }

    #[test]
    fn live_variation_is_penalized() {
        let internal = track("Creep", "Radiohead", Some(238_000));
        let external = service("Creep - Live", "Radiohead", Some(245_000));

        let (score, evidence) =
            calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);

        assert_eq!(evidence.title_similarity, 0.6);
        assert!((evidence.title_score - (-40.0 * (0.3 / 0.9))).abs() < 1e-9);
        assert_eq!(evidence.duration_diff_ms, 7000);
        assert_eq!(evidence.duration_score, -6.0);
        assert_eq!(evidence.artist_score, 0.0);
        assert_eq!(score, 71);
    }

    #[test]
    fn artist_mismatch_quadratic_penalty() {
        let internal = track("Yesterday", "The Beatles", Some(125_000));
        let external = service("Yesterday", "Frank Sinatra", Some(125_000));

        let (score, evidence) =
            calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);

        assert!(evidence.artist_similarity < 0.5);
        assert!(evidence.artist_score <= -15.0);
        assert_eq!(evidence.title_score, 0.0);
        assert_eq!(evidence.duration_score, 0.0);
        assert!((60..=80).contains(&score));
    }

    #[test]
    fn both_durations_missing_flat_penalty() {
        let internal = track("Song", "Artist", None);
        let external = service("Song", "Artist", None);

        let (score, _) = calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);
        assert_eq!(score, 80);
    }

    #[test]
    fn one_duration_missing_flat_penalty() {
        let internal = track("Song", "Artist", Some(200_000));
        let external = service("Song", "Artist", None);

        let (score, evidence) =
            calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);
        assert_eq!(evidence.duration_score, -10.0);
        assert_eq!(score, 80);
    }

    #[test]
    fn duration_delta_just_past_tolerance() {
        let internal = track("Song", "Artist", Some(200_000));
        let external = service("Song", "Artist", Some(201_001));

        let (score, evidence) =
            calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);
        assert_eq!(evidence.duration_score, -1.0);
        assert_eq!(score, 89);
    }

    #[test]
    fn duration_penalty_is_capped() {
        let internal = track("Song", "Artist", Some(100_000));
        let external = service("Song", "Artist", Some(400_000));

        let (_, evidence) = calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);
        assert_eq!(evidence.duration_score, -60.0);
    }

    #[test]
    fn score_is_clamped_to_bounds() {
        let internal = track("Completely Different Song", "Someone Else", Some(100_000));
        let external = service("Another Tune Entirely", "Nobody Known", Some(400_000));

        let (score, _) = calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);
        assert!((0..=100).contains(&score));
    }

    #[test]
    fn scoring_is_deterministic() {
        let internal = track("Creep", "Radiohead", Some(238_000));
        let external = service("Creep - Live", "Radiohead", Some(245_000));

        let first = calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);
        let second = calculate_confidence(&internal, &external, MatchMethod::ArtistTitle);
        assert_eq!(first, second);
    }

    #[test]
    fn title_similarity_symmetric_for_variations() {
        assert_eq!(title_similarity("Creep", "Creep - Live"), 0.6);
        assert_eq!(title_similarity("Creep - Live", "Creep"), 0.6);
    }

    fn play_at(service: &str, ts: chrono::DateTime<Utc>, ms: Option<i64>) -> TrackPlay {
        TrackPlay {
            track_id: None,
            service: service.to_string(),
            played_at: ts,
            ms_played: ms,
            context: play_context("Bohemian Rhapsody", "Queen", None, BTreeMap::new()),
            import_timestamp: Utc::now(),
            import_source: format!("{service}_test"),
            import_batch_id: "batch".to_string(),
        }
    }

    #[test]
    fn cross_service_play_match_inside_window() {
        let a = play_at(
            "spotify",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            Some(210_000),
        );
        let b = play_at(
            "lastfm",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 2, 0).unwrap(),
            None,
        );

        let (score, evidence) = play_match_confidence(&a, &b, 300);

        assert_eq!(score, 82);
        assert_eq!(evidence.duration_diff_ms, 120_000);
        assert_eq!(evidence.base_score, 90);
    }

    #[test]
    fn cross_service_play_match_outside_window() {
        let a = play_at(
            "spotify",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            None,
        );
        let b = play_at(
            "lastfm",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap(),
            None,
        );

        let (score, _) = play_match_confidence(&a, &b, 300);
        assert_eq!(score, 0);
    }

    #[test]
    fn duplicate_finder_skips_same_service() {
        let a = play_at(
            "spotify",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            None,
        );
        let same_service = play_at(
            "spotify",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap(),
            None,
        );
        let other_service = play_at(
            "lastfm",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap(),
            None,
        );

        let candidates = vec![same_service, other_service];
        let duplicates = find_duplicate_plays(&a, &candidates, 300, 70);

        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].0.service, "lastfm");
    }
}
