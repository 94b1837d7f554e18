//! Fleet-wide statistics and chart-ready speed series.

use serde::{Deserialize, Serialize};

use crate::metrics::{resolve_speed_source, samples_until, speed_series, SpeedSummary};
use crate::{MetricsParams, Race, Sample, SpeedSource, WeatherObservation};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Upcoming,
    Active,
    Finished,
}

impl RaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaceStatus::Upcoming => "upcoming",
            RaceStatus::Active => "active",
            RaceStatus::Finished => "finished",
        }
    }
}

pub fn race_status(race: &Race, now_ms: i64) -> RaceStatus {
    if now_ms < race.start_ms {
        RaceStatus::Upcoming
    } else if race.end_ms.map_or(false, |end| now_ms >= end) {
        RaceStatus::Finished
    } else {
        RaceStatus::Active
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FastestBoat {
    pub boat_id: String,
    pub name: String,
    pub speed_kn: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RaceStats {
    pub status: RaceStatus,
    pub cursor_ms: i64,
    pub boat_count: usize,
    pub active_boats: usize,
    pub fleet_avg_speed_kn: f64,
    pub fastest: Option<FastestBoat>,
    pub elapsed_ms: i64,
    pub classes: Vec<String>,
}

/// Speed at the last visible sample under the resolved speed source: the
/// reported value (missing counts as zero) or the last derived step.
fn current_speed_kn(visible: &[Sample], params: &MetricsParams) -> f64 {
    let Some(last) = visible.last() else {
        return 0.0;
    };
    match resolve_speed_source(visible, params.speed_source) {
        SpeedSource::Reported => last.usable_speed().unwrap_or(0.0),
        _ => {
            let tail = &visible[visible.len().saturating_sub(2)..];
            speed_series(tail, SpeedSource::Derived, params.distance_model)
                .last()
                .map_or(0.0, |(_, v)| *v)
        }
    }
}

/// Fleet snapshot at `cursor_ms`. Active boats are those with a sample at or
/// before the cursor; speeds follow the same policy as the leaderboard.
pub fn race_stats(race: &Race, cursor_ms: i64, params: &MetricsParams) -> RaceStats {
    let mut active_boats = 0usize;
    let mut speed_total = 0.0;
    let mut fastest: Option<FastestBoat> = None;

    for boat in &race.boats {
        let visible = samples_until(&boat.samples, cursor_ms);
        if visible.is_empty() {
            continue;
        }
        active_boats += 1;
        let speed = current_speed_kn(visible, params);
        speed_total += speed;
        if fastest.as_ref().map_or(true, |f| speed > f.speed_kn) {
            fastest = Some(FastestBoat {
                boat_id: boat.id.clone(),
                name: boat.name.clone(),
                speed_kn: speed,
            });
        }
    }

    let fleet_avg_speed_kn = if active_boats > 0 {
        speed_total / active_boats as f64
    } else {
        0.0
    };

    RaceStats {
        status: race_status(race, cursor_ms),
        cursor_ms,
        boat_count: race.boats.len(),
        active_boats,
        fleet_avg_speed_kn,
        fastest,
        elapsed_ms: cursor_ms.saturating_sub(race.start_ms).max(0),
        classes: race.classes(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoatSpeedColumn {
    pub boat_id: String,
    pub name: String,
    pub color: String,
    pub speed_source: SpeedSource,
    /// Aligned with `SpeedChart::timestamps_ms`.
    pub speeds_kn: Vec<Option<f64>>,
    pub summary: SpeedSummary,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpeedChart {
    pub timestamps_ms: Vec<i64>,
    pub boats: Vec<BoatSpeedColumn>,
}

impl SpeedChart {
    pub fn is_empty(&self) -> bool {
        self.boats.is_empty()
    }
}

/// Speed-over-time table for the selected boats, in roster order.
/// Unknown ids are ignored; an empty selection gives an empty chart.
pub fn speed_chart(race: &Race, selected: &[&str], params: &MetricsParams) -> SpeedChart {
    let boats: Vec<_> = race
        .boats
        .iter()
        .filter(|b| selected.contains(&b.id.as_str()))
        .collect();
    if boats.is_empty() {
        return SpeedChart::default();
    }

    let series: Vec<(SpeedSource, Vec<(i64, f64)>)> = boats
        .iter()
        .map(|b| {
            let source = resolve_speed_source(&b.samples, params.speed_source);
            (source, speed_series(&b.samples, source, params.distance_model))
        })
        .collect();

    let mut timestamps_ms: Vec<i64> = series
        .iter()
        .flat_map(|(_, s)| s.iter().map(|(t, _)| *t))
        .collect();
    timestamps_ms.sort_unstable();
    timestamps_ms.dedup();

    let columns = boats
        .into_iter()
        .zip(series)
        .map(|(boat, (speed_source, points))| {
            let mut speeds_kn = vec![None; timestamps_ms.len()];
            for (t, v) in &points {
                if let Ok(idx) = timestamps_ms.binary_search(t) {
                    speeds_kn[idx] = Some(*v);
                }
            }
            BoatSpeedColumn {
                boat_id: boat.id.clone(),
                name: boat.name.clone(),
                color: boat.color.clone(),
                speed_source,
                speeds_kn,
                summary: SpeedSummary::from_values(points.iter().map(|(_, v)| *v)),
            }
        })
        .collect();

    SpeedChart {
        timestamps_ms,
        boats: columns,
    }
}

/// Latest weather observation at or before the cursor.
pub fn weather_at(race: &Race, cursor_ms: i64) -> Option<&WeatherObservation> {
    race.weather
        .iter()
        .filter(|w| w.timestamp_ms <= cursor_ms)
        .max_by_key(|w| w.timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compute_leaderboard, Boat};

    fn sample(t: i64, speed: Option<f64>) -> Sample {
        let mut s = Sample::new(0.0, t as f64 * 1e-4, t);
        s.speed_kn = speed;
        s
    }

    fn fleet() -> Race {
        let mut a = Boat::new("a", "Alpha", "IRC");
        a.samples = vec![sample(0, Some(6.0)), sample(60_000, Some(9.0))];
        let mut b = Boat::new("b", "Bravo", "ORCi");
        b.samples = vec![sample(30_000, Some(12.0)), sample(90_000, None)];
        let c = Boat::new("c", "Charlie", "IRC");
        Race {
            id: "r".to_string(),
            start_ms: 0,
            end_ms: Some(100_000),
            boats: vec![a, b, c],
            ..Race::default()
        }
    }

    #[test]
    fn test_race_status() {
        let race = fleet();
        assert_eq!(race_status(&race, -1), RaceStatus::Upcoming);
        assert_eq!(race_status(&race, 0), RaceStatus::Active);
        assert_eq!(race_status(&race, 100_000), RaceStatus::Finished);
        let open = Race {
            end_ms: None,
            ..fleet()
        };
        assert_eq!(race_status(&open, i64::MAX), RaceStatus::Active);
    }

    #[test]
    fn test_stats_at_cursor() {
        let race = fleet();
        let params = MetricsParams::default();
        let early = race_stats(&race, 10_000, &params);
        assert_eq!(early.active_boats, 1);
        assert_eq!(early.boat_count, 3);
        assert!((early.fleet_avg_speed_kn - 6.0).abs() < 1e-9);
        assert_eq!(early.fastest.as_ref().unwrap().boat_id, "a");

        let mid = race_stats(&race, 60_000, &params);
        assert_eq!(mid.active_boats, 2);
        assert!((mid.fleet_avg_speed_kn - 10.5).abs() < 1e-9);
        assert_eq!(mid.fastest.as_ref().unwrap().boat_id, "b");
        assert_eq!(mid.elapsed_ms, 60_000);
        assert_eq!(mid.classes, vec!["IRC".to_string(), "ORCi".to_string()]);

        // Forced reported speeds count a missing value as zero.
        let reported = MetricsParams {
            speed_source: SpeedSource::Reported,
            ..MetricsParams::default()
        };
        let late = race_stats(&race, 95_000, &reported);
        assert!((late.fleet_avg_speed_kn - 4.5).abs() < 1e-9);
        assert_eq!(late.fastest.as_ref().unwrap().boat_id, "a");

        // Under Auto, Bravo's missing speed switches it to derived steps.
        let late = race_stats(&race, 95_000, &params);
        let fastest = late.fastest.unwrap();
        assert_eq!(fastest.boat_id, "b");
        assert!(fastest.speed_kn > 9.0);
    }

    #[test]
    fn test_stats_without_active_boats() {
        let race = fleet();
        let stats = race_stats(&race, -10, &MetricsParams::default());
        assert_eq!(stats.active_boats, 0);
        assert_eq!(stats.fleet_avg_speed_kn, 0.0);
        assert!(stats.fastest.is_none());
        assert_eq!(stats.elapsed_ms, 0);
        assert_eq!(stats.status, RaceStatus::Upcoming);
    }

    #[test]
    fn test_fastest_tie_keeps_roster_order() {
        let mut race = fleet();
        race.boats[1].samples = vec![sample(0, Some(6.0))];
        let stats = race_stats(&race, 0, &MetricsParams::default());
        assert_eq!(stats.fastest.unwrap().boat_id, "a");
    }

    #[test]
    fn test_stats_follow_derived_speeds() {
        let mut g = Boat::new("g", "Gpx", "IRC");
        g.samples = vec![Sample::new(0.0, 0.0, 0), Sample::new(0.0, 0.1, 600_000)];
        let race = Race {
            id: "r".to_string(),
            boats: vec![g],
            ..Race::default()
        };
        let params = MetricsParams::default();

        let board = compute_leaderboard(&race, Some(600_000), &params);
        let board_avg = board.entry("g").unwrap().metrics.speed.avg_kn;
        let stats = race_stats(&race, 600_000, &params);
        assert!(board_avg > 30.0);
        assert!((stats.fleet_avg_speed_kn - board_avg).abs() < 1e-9);
        assert!((stats.fastest.unwrap().speed_kn - board_avg).abs() < 1e-9);

        // A single visible sample has no derived step yet.
        let early = race_stats(&race, 1_000, &params);
        assert_eq!(early.active_boats, 1);
        assert_eq!(early.fleet_avg_speed_kn, 0.0);

        let derived = MetricsParams {
            speed_source: SpeedSource::Derived,
            ..MetricsParams::default()
        };
        let forced = race_stats(&race, 600_000, &derived);
        assert!((forced.fleet_avg_speed_kn - board_avg).abs() < 1e-9);
    }

    #[test]
    fn test_speed_chart_alignment() {
        let race = fleet();
        let chart = speed_chart(&race, &["b", "a", "zzz"], &MetricsParams::default());
        assert_eq!(chart.timestamps_ms, vec![0, 60_000, 90_000]);
        assert_eq!(chart.boats.len(), 2);

        let a = &chart.boats[0];
        assert_eq!(a.boat_id, "a");
        assert_eq!(a.speed_source, SpeedSource::Reported);
        assert_eq!(a.speeds_kn, vec![Some(6.0), Some(9.0), None]);
        assert_eq!(a.summary.max_kn, Some(9.0));
        assert_eq!(a.summary.min_kn, Some(6.0));

        // Bravo lacks a reported speed, so its single derived step lands at 90 s.
        let b = &chart.boats[1];
        assert_eq!(b.speed_source, SpeedSource::Derived);
        assert_eq!(b.speeds_kn[0], None);
        assert!(b.speeds_kn[2].unwrap() > 0.0);
    }

    #[test]
    fn test_empty_selection_is_empty_chart() {
        let race = fleet();
        let chart = speed_chart(&race, &[], &MetricsParams::default());
        assert!(chart.is_empty());
        assert!(chart.timestamps_ms.is_empty());
        let idle = speed_chart(&race, &["c"], &MetricsParams::default());
        assert_eq!(idle.boats.len(), 1);
        assert!(idle.timestamps_ms.is_empty());
        assert_eq!(idle.boats[0].summary.max_kn, None);
    }

    #[test]
    fn test_weather_at_cursor() {
        let mut race = fleet();
        let obs = |t: i64, wind: f64| WeatherObservation {
            timestamp_ms: t,
            wind_speed_kn: wind,
            wind_direction_deg: 180.0,
            wave_height_m: None,
            temperature_c: None,
            pressure_hpa: None,
            location: None,
        };
        race.weather = vec![obs(3_600_000, 18.0), obs(0, 12.0)];
        assert!(weather_at(&race, -1).is_none());
        assert_eq!(weather_at(&race, 1_000).unwrap().wind_speed_kn, 12.0);
        assert_eq!(weather_at(&race, 3_600_000).unwrap().wind_speed_kn, 18.0);
    }
}
