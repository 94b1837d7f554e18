//! Yacht race telemetry library: derived metrics over boat position traces,
//! leaderboards, race statistics and a replay clock.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod feed;
pub mod geo;
pub mod leaderboard;
pub mod metrics;
#[cfg(feature = "player")]
pub mod player;
pub mod replay;
pub mod stats;
pub mod store;

pub use feed::{parse_gpx_track, parse_race_directory, parse_race_file};
pub use geo::{distance_m, haversine_distance, DistanceModel};
pub use leaderboard::{
    compute_leaderboard, feed_leaderboard, BoatStatus, Leaderboard, LeaderboardEntry,
    LeaderboardMemo,
};
pub use metrics::{
    compute_boat_metrics, current_sample, metrics_at, rank_by_key, samples_in_window,
    samples_until, speed_series, track_distance_m, BoatMetrics, SpeedSummary,
};
#[cfg(feature = "player")]
pub use player::ReplayPlayer;
pub use replay::{ClockState, ReplayClock, Tick, TimeRange};
pub use stats::{race_stats, race_status, speed_chart, weather_at, RaceStats, RaceStatus, SpeedChart};
pub use store::{DirectorySource, RaceFileSource, RaceSource, RaceStore};

#[derive(Error, Debug)]
pub enum RaceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {context}: {message}")]
    Json { context: String, message: String },
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("race not found: {0}")]
    RaceNotFound(String),
    #[error("no position data")]
    NoData,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Where per-sample speeds come from.
///
/// `Auto` uses reported speeds only when every sample carries one and falls
/// back to position deltas otherwise; the two are never mixed in one series.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    Auto,
    Reported,
    Derived,
}

impl Default for SpeedSource {
    fn default() -> Self {
        SpeedSource::Auto
    }
}

impl std::fmt::Display for SpeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SpeedSource::Auto => "auto",
            SpeedSource::Reported => "reported",
            SpeedSource::Derived => "derived",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsParams {
    pub distance_model: DistanceModel,
    pub speed_source: SpeedSource,
}

impl MetricsParams {
    pub fn params_hash_sha256(&self) -> Result<String, RaceError> {
        let bytes = serde_json::to_vec(self).map_err(|e| RaceError::Json {
            context: "metrics params".to_string(),
            message: e.to_string(),
        })?;
        Ok(sha256_hex(&bytes))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// One timestamped position report for a boat.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub lat: f64,
    pub lon: f64,
    pub timestamp_ms: i64,
    pub speed_kn: Option<f64>,
    pub heading_deg: Option<f64>,
}

impl Sample {
    pub fn new(lat: f64, lon: f64, timestamp_ms: i64) -> Self {
        Self {
            lat,
            lon,
            timestamp_ms,
            speed_kn: None,
            heading_deg: None,
        }
    }

    pub fn with_speed(mut self, speed_kn: f64) -> Self {
        self.speed_kn = Some(speed_kn);
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Reported speed when it is a usable number.
    pub fn usable_speed(&self) -> Option<f64> {
        self.speed_kn.filter(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Boat {
    pub id: String,
    pub name: String,
    pub sail_number: String,
    pub class: String,
    pub color: String,
    pub country: Option<String>,
    pub skipper: Option<String>,
    pub finish_time_ms: Option<i64>,
    pub retired: bool,
    pub samples: Vec<Sample>,
}

impl Boat {
    pub fn new(id: impl Into<String>, name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            class: class.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mark {
    pub id: String,
    pub name: String,
    pub point: GeoPoint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Course {
    pub start: GeoPoint,
    pub marks: Vec<Mark>,
    pub finish: GeoPoint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub timestamp_ms: i64,
    pub wind_speed_kn: f64,
    pub wind_direction_deg: f64,
    pub wave_height_m: Option<f64>,
    pub temperature_c: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub location: Option<GeoPoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverallResult {
    pub boat_id: String,
    pub position: u32,
    pub total_time_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassResult {
    pub boat_id: String,
    pub position: u32,
    pub corrected_time_ms: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RaceResults {
    pub overall: Vec<OverallResult>,
    pub by_class: BTreeMap<String, Vec<ClassResult>>,
}

/// Precomputed leaderboard row supplied by an external tracker feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedStanding {
    pub boat_id: String,
    pub tag: String,
    pub rank: Option<u32>,
    pub elapsed_ms: Option<i64>,
    pub dtf_nm: Option<f64>,
    pub finished: bool,
    pub started: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RaceInfo {
    pub id: String,
    pub name: String,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub location: Option<String>,
    pub year: Option<i32>,
    pub distance_nm: Option<f64>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Race {
    pub id: String,
    pub name: String,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub distance_nm: Option<f64>,
    pub course: Option<Course>,
    pub boats: Vec<Boat>,
    pub weather: Vec<WeatherObservation>,
    pub results: Option<RaceResults>,
    pub standings: Vec<FeedStanding>,
    /// SHA-256 of the bytes the race was loaded from.
    pub fingerprint: String,
}

impl Race {
    pub fn boat(&self, id: &str) -> Option<&Boat> {
        self.boats.iter().find(|b| b.id == id)
    }

    /// Distinct classes in roster order.
    pub fn classes(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for boat in &self.boats {
            if !out.iter().any(|c| c == &boat.class) {
                out.push(boat.class.clone());
            }
        }
        out
    }

    pub fn info(&self) -> RaceInfo {
        RaceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            start_ms: Some(self.start_ms),
            end_ms: self.end_ms,
            location: self.location.clone(),
            year: None,
            distance_nm: self.distance_nm,
            description: self.description.clone(),
        }
    }
}

/// Latest accepted epoch timestamp (9999-12-31T23:59:59.999Z).
pub const MAX_TIMESTAMP_MS: i64 = 253_402_300_799_999;
/// Earliest accepted epoch timestamp (0000-01-01T00:00:00Z).
pub const MIN_TIMESTAMP_MS: i64 = -62_167_219_200_000;

pub fn is_valid_timestamp_ms(t: i64) -> bool {
    (MIN_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(&t)
}

/// Convert epoch seconds to milliseconds; `None` outside the accepted window.
pub fn seconds_to_timestamp_ms(seconds: f64) -> Option<i64> {
    let ms = (seconds * 1000.0).round();
    if !ms.is_finite() || ms < MIN_TIMESTAMP_MS as f64 || ms > MAX_TIMESTAMP_MS as f64 {
        return None;
    }
    Some(ms as i64)
}

/// Parse duration tokens such as `90`, `90s`, `15m`, `1.5h` or `2d` into seconds.
pub fn parse_duration_token(token: &str) -> Option<f64> {
    let trimmed = token.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    let (number, scale) = match trimmed.chars().last() {
        Some('s') => (&trimmed[..trimmed.len() - 1], 1.0),
        Some('m') => (&trimmed[..trimmed.len() - 1], 60.0),
        Some('h') => (&trimmed[..trimmed.len() - 1], 3600.0),
        Some('d') => (&trimmed[..trimmed.len() - 1], 86_400.0),
        _ => (trimmed.as_str(), 1.0),
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value * scale)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_window() {
        assert!(is_valid_timestamp_ms(0));
        assert!(is_valid_timestamp_ms(MAX_TIMESTAMP_MS));
        assert!(!is_valid_timestamp_ms(i64::MAX));
        assert!(!is_valid_timestamp_ms(i64::MIN));
        assert_eq!(seconds_to_timestamp_ms(1_736_928_000.0), Some(1_736_928_000_000));
        assert_eq!(seconds_to_timestamp_ms(1.2345), Some(1_235));
        assert_eq!(seconds_to_timestamp_ms(1e300), None);
        assert_eq!(seconds_to_timestamp_ms(-1e300), None);
        assert_eq!(seconds_to_timestamp_ms(f64::NAN), None);
    }

    #[test]
    fn test_parse_duration_token() {
        assert_eq!(parse_duration_token("90"), Some(90.0));
        assert_eq!(parse_duration_token("15m"), Some(900.0));
        assert_eq!(parse_duration_token("1.5h"), Some(5400.0));
        assert_eq!(parse_duration_token(" 2d "), Some(172_800.0));
        assert_eq!(parse_duration_token("abc"), None);
        assert_eq!(parse_duration_token("-5s"), None);
        assert_eq!(parse_duration_token(""), None);
    }

    #[test]
    fn test_params_hash_changes_with_policy() {
        let base = MetricsParams::default();
        let mut derived = base.clone();
        derived.speed_source = SpeedSource::Derived;
        let a = base.params_hash_sha256().unwrap();
        let b = derived.params_hash_sha256().unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_usable_speed_filters_bad_values() {
        let s = Sample::new(0.0, 0.0, 0);
        assert_eq!(s.usable_speed(), None);
        assert_eq!(s.with_speed(f64::NAN).usable_speed(), None);
        assert_eq!(s.with_speed(-1.0).usable_speed(), None);
        assert_eq!(s.with_speed(7.5).usable_speed(), Some(7.5));
    }

    #[test]
    fn test_classes_in_roster_order() {
        let race = Race {
            boats: vec![
                Boat::new("a", "A", "IRC"),
                Boat::new("b", "B", "ORCi"),
                Boat::new("c", "C", "IRC"),
            ],
            ..Race::default()
        };
        assert_eq!(race.classes(), vec!["IRC".to_string(), "ORCi".to_string()]);
    }
}
