//! Wire formats for race data: a tracker-style race directory, single-file
//! race documents and GPX tracks. Numbers are read leniently; malformed
//! samples are dropped and counted rather than surfaced as NaN.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    is_valid_timestamp_ms, seconds_to_timestamp_ms, sha256_hex, Boat, ClassResult, Course,
    FeedStanding, GeoPoint, Mark, OverallResult, Race, RaceError, RaceInfo, RaceResults, Sample,
    WeatherObservation,
};

pub const RACES_FILE: &str = "races.json";
pub const SETUP_FILE: &str = "RaceSetup.json";
pub const LEADERBOARD_FILE: &str = "leaderboard.json";
pub const POSITIONS_FILE: &str = "AllPositions3.json";

fn number_from_json(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_json))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| match v {
        JsonValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.round() as i64)
        }),
        other => number_from_json(other)
            .filter(|f| f.abs() < i64::MAX as f64)
            .map(|f| f.round() as i64),
    }))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_i64(deserializer)?.filter(|t| is_valid_timestamp_ms(*t)))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        JsonValue::Bool(b) => Some(b),
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }))
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::String(s)) => Some(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8], context: &str) -> Result<T, RaceError> {
    serde_json::from_slice(bytes).map_err(|e| RaceError::Json {
        context: context.to_string(),
        message: e.to_string(),
    })
}

/// Builds a sample from raw feed values; `None` when the position or time is unusable.
fn sanitize_sample(
    lat: Option<f64>,
    lon: Option<f64>,
    timestamp_ms: Option<i64>,
    speed: Option<f64>,
    heading: Option<f64>,
) -> Option<Sample> {
    let lat = lat.filter(|v| (-90.0..=90.0).contains(v))?;
    let lon = lon.filter(|v| (-180.0..=180.0).contains(v))?;
    let timestamp_ms = timestamp_ms.filter(|t| is_valid_timestamp_ms(*t))?;
    Some(Sample {
        lat,
        lon,
        timestamp_ms,
        speed_kn: speed.filter(|v| *v >= 0.0),
        heading_deg: heading,
    })
}

#[derive(Debug, Deserialize)]
struct PointWire {
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, alias = "lng", deserialize_with = "lenient_f64")]
    lon: Option<f64>,
}

impl PointWire {
    fn to_point(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.lat?, self.lon?))
    }
}

#[derive(Debug, Deserialize)]
struct MarkWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, alias = "lng", deserialize_with = "lenient_f64")]
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CourseWire {
    start: Option<PointWire>,
    #[serde(default)]
    marks: Vec<MarkWire>,
    finish: Option<PointWire>,
}

impl CourseWire {
    fn into_course(self) -> Option<Course> {
        let start = self.start.as_ref().and_then(PointWire::to_point)?;
        let finish = self.finish.as_ref().and_then(PointWire::to_point)?;
        let marks = self
            .marks
            .into_iter()
            .filter_map(|m| {
                let point = GeoPoint::new(m.lat?, m.lon?);
                let name = m.name.unwrap_or_else(|| m.id.clone());
                Some(Mark {
                    id: m.id,
                    name,
                    point,
                })
            })
            .collect();
        Some(Course {
            start,
            marks,
            finish,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeatherWire {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    wind_speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    wind_direction: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    wave_height: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pressure: Option<f64>,
    #[serde(default)]
    location: Option<PointWire>,
}

fn convert_weather(wires: Vec<WeatherWire>) -> Vec<WeatherObservation> {
    let mut out: Vec<WeatherObservation> = wires
        .into_iter()
        .filter_map(|w| {
            Some(WeatherObservation {
                timestamp_ms: w.timestamp?,
                wind_speed_kn: w.wind_speed.unwrap_or(0.0),
                wind_direction_deg: w.wind_direction.unwrap_or(0.0),
                wave_height_m: w.wave_height,
                temperature_c: w.temperature,
                pressure_hpa: w.pressure,
                location: w.location.as_ref().and_then(PointWire::to_point),
            })
        })
        .collect();
    out.sort_by_key(|w| w.timestamp_ms);
    out
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RaceInfoWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    start_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    end_time: Option<i64>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    year: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    distance: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

impl From<RaceInfoWire> for RaceInfo {
    fn from(w: RaceInfoWire) -> Self {
        RaceInfo {
            name: w.name.unwrap_or_else(|| w.id.clone()),
            id: w.id,
            start_ms: w.start_time,
            end_ms: w.end_time,
            location: w.location,
            year: w.year.and_then(|y| i32::try_from(y).ok()),
            distance_nm: w.distance,
            description: w.description,
        }
    }
}

/// Parse the `races.json` listing.
pub fn parse_race_list(bytes: &[u8]) -> Result<Vec<RaceInfo>, RaceError> {
    let wires: Vec<RaceInfoWire> = parse_json(bytes, RACES_FILE)?;
    Ok(wires
        .into_iter()
        .filter(|w| !w.id.is_empty())
        .map(RaceInfo::from)
        .collect())
}

#[derive(Debug, Deserialize)]
struct TeamWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "sailNumber", deserialize_with = "lenient_text")]
    sail: Option<String>,
    #[serde(default, rename = "class")]
    class_name: Option<String>,
    #[serde(default, alias = "color")]
    colour: Option<String>,
    #[serde(default, alias = "flag")]
    country: Option<String>,
    #[serde(default)]
    skipper: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetupWire {
    #[serde(default)]
    teams: Vec<TeamWire>,
    #[serde(default)]
    course: Option<CourseWire>,
    #[serde(default)]
    weather: Vec<WeatherWire>,
}

#[derive(Debug, Deserialize)]
struct MomentWire {
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, alias = "lng", deserialize_with = "lenient_f64")]
    lon: Option<f64>,
    /// Epoch seconds.
    #[serde(default, deserialize_with = "lenient_f64")]
    at: Option<f64>,
    #[serde(default, alias = "sog", deserialize_with = "lenient_f64")]
    speed: Option<f64>,
    #[serde(default, alias = "cog", deserialize_with = "lenient_f64")]
    heading: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TrackWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    moments: Vec<MomentWire>,
}

#[derive(Debug, Deserialize)]
struct StandingWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    rank: Option<f64>,
    /// Seconds since start.
    #[serde(default, deserialize_with = "lenient_f64")]
    elapsed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    dtf: Option<f64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    finished: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    started: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TagWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    teams: Vec<StandingWire>,
}

#[derive(Debug, Deserialize)]
struct LeaderboardWire {
    #[serde(default)]
    tags: Vec<TagWire>,
}

fn convert_standings(wire: LeaderboardWire) -> Vec<FeedStanding> {
    let mut out = Vec::new();
    for tag in wire.tags {
        let tag_name = tag.name.unwrap_or_else(|| format!("tag-{}", tag.id));
        for team in tag.teams {
            if team.id.is_empty() {
                continue;
            }
            out.push(FeedStanding {
                boat_id: team.id,
                tag: tag_name.clone(),
                rank: team.rank.filter(|r| *r >= 1.0).map(|r| r.round() as u32),
                elapsed_ms: team.elapsed.and_then(seconds_to_timestamp_ms),
                dtf_nm: team.dtf.filter(|d| *d >= 0.0),
                finished: team.finished.unwrap_or(false),
                started: team.started.unwrap_or(true),
            });
        }
    }
    out
}

/// Raw contents of one race directory.
#[derive(Debug, Clone, Copy)]
pub struct RaceFeedFiles<'a> {
    pub races: &'a [u8],
    pub setup: &'a [u8],
    pub positions: &'a [u8],
    pub leaderboard: Option<&'a [u8]>,
}

impl RaceFeedFiles<'_> {
    fn fingerprint(&self) -> String {
        let mut all = Vec::with_capacity(
            self.races.len()
                + self.setup.len()
                + self.positions.len()
                + self.leaderboard.map_or(0, |l| l.len()),
        );
        all.extend_from_slice(self.races);
        all.extend_from_slice(self.setup);
        all.extend_from_slice(self.positions);
        if let Some(leaderboard) = self.leaderboard {
            all.extend_from_slice(leaderboard);
        }
        sha256_hex(&all)
    }
}

/// Assemble a race from a tracker directory's files.
///
/// Teams missing from the setup but present in the positions still become
/// boats; a malformed leaderboard is logged and ignored.
pub fn parse_race_directory(race_id: &str, files: RaceFeedFiles<'_>) -> Result<Race, RaceError> {
    let info = parse_race_list(files.races)?
        .into_iter()
        .find(|r| r.id == race_id)
        .ok_or_else(|| RaceError::RaceNotFound(race_id.to_string()))?;
    let setup: SetupWire = parse_json(files.setup, SETUP_FILE)?;
    let tracks: Vec<TrackWire> = parse_json(files.positions, POSITIONS_FILE)?;
    let standings = match files.leaderboard {
        Some(bytes) => match parse_json::<LeaderboardWire>(bytes, LEADERBOARD_FILE) {
            Ok(wire) => convert_standings(wire),
            Err(err) => {
                warn!(race = race_id, "ignoring leaderboard: {}", err);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let mut boats: Vec<Boat> = setup
        .teams
        .into_iter()
        .filter(|t| !t.id.is_empty())
        .map(|t| Boat {
            name: t.name.unwrap_or_else(|| format!("Team {}", t.id)),
            sail_number: t.sail.unwrap_or_default(),
            class: t.class_name.unwrap_or_default(),
            color: t.colour.unwrap_or_default(),
            country: t.country,
            skipper: t.skipper,
            id: t.id,
            ..Boat::default()
        })
        .collect();

    let mut dropped = 0usize;
    for track in tracks {
        if track.id.is_empty() {
            dropped += track.moments.len();
            continue;
        }
        let idx = match boats.iter().position(|b| b.id == track.id) {
            Some(idx) => idx,
            None => {
                debug!(race = race_id, team = %track.id, "positions for team missing from setup");
                boats.push(Boat {
                    name: format!("Team {}", track.id),
                    id: track.id.clone(),
                    ..Boat::default()
                });
                boats.len() - 1
            }
        };
        for m in track.moments {
            let ts = m.at.and_then(seconds_to_timestamp_ms);
            match sanitize_sample(m.lat, m.lon, ts, m.speed, m.heading) {
                Some(sample) => boats[idx].samples.push(sample),
                None => dropped += 1,
            }
        }
    }
    finish_boats(&mut boats, race_id, dropped);

    let start_ms = info
        .start_ms
        .or_else(|| earliest_sample(&boats))
        .unwrap_or(0);
    Ok(Race {
        id: info.id,
        name: info.name,
        start_ms,
        end_ms: info.end_ms,
        description: info.description,
        location: info.location,
        distance_nm: info.distance_nm,
        course: setup.course.and_then(CourseWire::into_course),
        boats,
        weather: convert_weather(setup.weather),
        results: None,
        standings,
        fingerprint: files.fingerprint(),
    })
}

fn finish_boats(boats: &mut [Boat], race_id: &str, dropped: usize) {
    for boat in boats.iter_mut() {
        boat.samples.sort_by_key(|s| s.timestamp_ms);
    }
    if dropped > 0 {
        warn!(race = race_id, dropped, "dropped malformed position samples");
    }
    debug!(
        race = race_id,
        boats = boats.len(),
        samples = boats.iter().map(|b| b.samples.len()).sum::<usize>(),
        "race feed ingested"
    );
}

fn earliest_sample(boats: &[Boat]) -> Option<i64> {
    boats
        .iter()
        .filter_map(|b| b.samples.first())
        .map(|s| s.timestamp_ms)
        .min()
}

#[derive(Debug, Deserialize)]
struct PositionWire {
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, alias = "lon", deserialize_with = "lenient_f64")]
    lng: Option<f64>,
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    heading: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoatWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    sail_number: Option<String>,
    #[serde(default, rename = "class")]
    class_name: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    skipper: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    finish_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    retired: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    dnf: Option<bool>,
    #[serde(default)]
    positions: Vec<PositionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverallWire {
    #[serde(default, deserialize_with = "lenient_id")]
    boat_id: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    position: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    total_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassResultWire {
    #[serde(default, deserialize_with = "lenient_id")]
    boat_id: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    position: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    corrected_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsWire {
    #[serde(default)]
    overall: Vec<OverallWire>,
    #[serde(default)]
    by_class: BTreeMap<String, Vec<ClassResultWire>>,
}

impl ResultsWire {
    fn into_results(self) -> RaceResults {
        let position = |p: Option<i64>| p.and_then(|v| u32::try_from(v).ok());
        RaceResults {
            overall: self
                .overall
                .into_iter()
                .filter_map(|r| {
                    Some(OverallResult {
                        position: position(r.position)?,
                        total_time_ms: r.total_time?,
                        boat_id: r.boat_id,
                    })
                })
                .collect(),
            by_class: self
                .by_class
                .into_iter()
                .map(|(class, rows)| {
                    let rows = rows
                        .into_iter()
                        .filter_map(|r| {
                            Some(ClassResult {
                                position: position(r.position)?,
                                corrected_time_ms: r.corrected_time?,
                                boat_id: r.boat_id,
                            })
                        })
                        .collect();
                    (class, rows)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RaceFileWire {
    #[serde(default, deserialize_with = "lenient_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    start_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    end_time: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    distance: Option<f64>,
    #[serde(default)]
    course: Option<CourseWire>,
    #[serde(default)]
    boats: Vec<BoatWire>,
    #[serde(default)]
    weather: Vec<WeatherWire>,
    #[serde(default)]
    results: Option<ResultsWire>,
}

/// Parse a single-document race (boats carry their own positions).
pub fn parse_race_file(bytes: &[u8]) -> Result<Race, RaceError> {
    let wire: RaceFileWire = parse_json(bytes, "race file")?;
    let race_id = if wire.id.is_empty() {
        "race".to_string()
    } else {
        wire.id
    };

    let mut dropped = 0usize;
    let mut boats: Vec<Boat> = Vec::with_capacity(wire.boats.len());
    for b in wire.boats {
        if b.id.is_empty() {
            dropped += b.positions.len();
            continue;
        }
        let mut samples = Vec::with_capacity(b.positions.len());
        for p in b.positions {
            match sanitize_sample(p.lat, p.lng, p.timestamp, p.speed, p.heading) {
                Some(sample) => samples.push(sample),
                None => dropped += 1,
            }
        }
        boats.push(Boat {
            name: b.name.unwrap_or_else(|| b.id.clone()),
            sail_number: b.sail_number.unwrap_or_default(),
            class: b.class_name.unwrap_or_default(),
            color: b.color.unwrap_or_default(),
            country: b.country,
            skipper: b.skipper,
            finish_time_ms: b.finish_time,
            retired: b.retired.unwrap_or(false) || b.dnf.unwrap_or(false),
            id: b.id,
            samples,
        });
    }
    finish_boats(&mut boats, &race_id, dropped);

    let start_ms = wire
        .start_time
        .or_else(|| earliest_sample(&boats))
        .unwrap_or(0);
    Ok(Race {
        name: wire.name.unwrap_or_else(|| race_id.clone()),
        id: race_id,
        start_ms,
        end_ms: wire.end_time,
        description: wire.description,
        location: wire.location,
        distance_nm: wire.distance,
        course: wire.course.and_then(CourseWire::into_course),
        boats,
        weather: convert_weather(wire.weather),
        results: wire.results.map(ResultsWire::into_results),
        standings: Vec::new(),
        fingerprint: sha256_hex(bytes),
    })
}

/// Parse a GPX document into a boat whose samples are its timed track points.
pub fn parse_gpx_track(input: &[u8], boat_id: &str) -> Result<Boat, RaceError> {
    use gpx::read;
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = read(&mut cursor).map_err(|e| RaceError::GpxParse(e.to_string()))?;
    let mut boat = Boat::new(boat_id, boat_id, "");
    let mut untimed = 0usize;

    for track in gpx.tracks {
        if let Some(name) = track.name.as_ref().filter(|n| !n.trim().is_empty()) {
            if boat.name == boat_id {
                boat.name = name.trim().to_string();
            }
        }
        for segment in track.segments {
            for point in segment.points {
                let Some(time) = point.time else {
                    untimed += 1;
                    continue;
                };
                let iso = time
                    .format()
                    .map_err(|e| RaceError::GpxParse(e.to_string()))?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| RaceError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);
                let geo = point.point();
                if let Some(sample) =
                    sanitize_sample(Some(geo.y()), Some(geo.x()), Some(utc.timestamp_millis()), None, None)
                {
                    boat.samples.push(sample);
                }
            }
        }
    }

    if untimed > 0 {
        debug!(boat = boat_id, untimed, "skipped GPX points without timestamps");
    }
    boat.samples.sort_by_key(|s| s.timestamp_ms);
    if boat.samples.is_empty() {
        return Err(RaceError::NoData);
    }
    Ok(boat)
}
