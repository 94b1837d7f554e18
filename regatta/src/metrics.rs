//! Position-trace reductions: distance, speed statistics, elapsed time,
//! cursor lookups and ranking.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::geo::{distance_m, meters_to_nm, mps_to_knots, DistanceModel};
use crate::{Boat, MetricsParams, Sample, SpeedSource};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SpeedSummary {
    pub avg_kn: f64,
    /// `None` when the series is empty.
    pub max_kn: Option<f64>,
    pub min_kn: Option<f64>,
}

impl SpeedSummary {
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return Self::default();
        }
        let avg_kn = values.iter().sum::<f64>() / values.len() as f64;
        let max_kn = values.iter().copied().map(OrderedFloat).max().map(|v| v.0);
        let min_kn = values.iter().copied().map(OrderedFloat).min().map(|v| v.0);
        Self {
            avg_kn,
            max_kn,
            min_kn,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoatMetrics {
    pub boat_id: String,
    pub sample_count: usize,
    pub distance_m: f64,
    pub speed: SpeedSummary,
    /// Resolved source of the speed series (never `Auto`).
    pub speed_source: SpeedSource,
    pub elapsed_ms: i64,
    pub current: Option<Sample>,
}

impl BoatMetrics {
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }

    pub fn distance_nm(&self) -> f64 {
        meters_to_nm(self.distance_m)
    }

    pub fn has_position(&self) -> bool {
        self.current.is_some()
    }
}

/// Sum of consecutive-sample distances. Zero for fewer than two samples.
pub fn track_distance_m(samples: &[Sample], model: DistanceModel) -> f64 {
    samples
        .windows(2)
        .map(|w| distance_m(w[0].point(), w[1].point(), model))
        .sum()
}

pub fn resolve_speed_source(samples: &[Sample], requested: SpeedSource) -> SpeedSource {
    match requested {
        SpeedSource::Auto => {
            if !samples.is_empty() && samples.iter().all(|s| s.usable_speed().is_some()) {
                SpeedSource::Reported
            } else {
                SpeedSource::Derived
            }
        }
        other => other,
    }
}

fn step_speed_kn(a: &Sample, b: &Sample, model: DistanceModel) -> f64 {
    let dt_ms = b.timestamp_ms.saturating_sub(a.timestamp_ms);
    if dt_ms <= 0 {
        return 0.0;
    }
    let meters = distance_m(a.point(), b.point(), model);
    let knots = mps_to_knots(meters / (dt_ms as f64 / 1000.0));
    if knots.is_finite() {
        knots
    } else {
        0.0
    }
}

/// Per-sample speed series in knots.
///
/// Derived values are stamped with the later sample of each step, so a
/// derived series has one entry fewer than the trace.
pub fn speed_series(samples: &[Sample], source: SpeedSource, model: DistanceModel) -> Vec<(i64, f64)> {
    match resolve_speed_source(samples, source) {
        SpeedSource::Reported => samples
            .iter()
            .filter_map(|s| s.usable_speed().map(|v| (s.timestamp_ms, v)))
            .collect(),
        _ => samples
            .windows(2)
            .map(|w| (w[1].timestamp_ms, step_speed_kn(&w[0], &w[1], model)))
            .collect(),
    }
}

pub fn compute_boat_metrics(
    boat_id: &str,
    samples: &[Sample],
    race_start_ms: i64,
    params: &MetricsParams,
) -> BoatMetrics {
    let speed_source = resolve_speed_source(samples, params.speed_source);
    let series = speed_series(samples, speed_source, params.distance_model);
    let current = samples.last().copied();
    let elapsed_ms = current
        .map(|s| s.timestamp_ms.saturating_sub(race_start_ms).max(0))
        .unwrap_or(0);
    BoatMetrics {
        boat_id: boat_id.to_string(),
        sample_count: samples.len(),
        distance_m: track_distance_m(samples, params.distance_model),
        speed: SpeedSummary::from_values(series.into_iter().map(|(_, v)| v)),
        speed_source,
        elapsed_ms,
        current,
    }
}

/// Last sample with `timestamp_ms <= cursor`.
pub fn current_sample(samples: &[Sample], cursor: i64) -> Option<&Sample> {
    let idx = samples.partition_point(|s| s.timestamp_ms <= cursor);
    if idx == 0 {
        None
    } else {
        samples.get(idx - 1)
    }
}

pub fn samples_until(samples: &[Sample], cursor: i64) -> &[Sample] {
    let idx = samples.partition_point(|s| s.timestamp_ms <= cursor);
    &samples[..idx]
}

/// Samples with `from <= timestamp_ms <= until`.
pub fn samples_in_window(samples: &[Sample], from: i64, until: i64) -> &[Sample] {
    if from > until {
        return &samples[..0];
    }
    let lo = samples.partition_point(|s| s.timestamp_ms < from);
    let hi = samples.partition_point(|s| s.timestamp_ms <= until);
    &samples[lo..hi.max(lo)]
}

/// Metrics over the part of the trace visible at `cursor` (whole trace for `None`).
pub fn metrics_at(
    boat: &Boat,
    race_start_ms: i64,
    cursor: Option<i64>,
    params: &MetricsParams,
) -> BoatMetrics {
    let visible = match cursor {
        Some(c) => samples_until(&boat.samples, c),
        None => &boat.samples[..],
    };
    compute_boat_metrics(&boat.id, visible, race_start_ms, params)
}

/// 1-based rank per input index by descending key; ties keep input order.
/// Items without a key are left unranked.
pub fn rank_by_key<T, F>(items: &[T], key: F) -> Vec<Option<usize>>
where
    F: Fn(&T) -> Option<f64>,
{
    let mut order: Vec<(usize, f64)> = items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            key(item).map(|k| (idx, if k.is_finite() { k } else { 0.0 }))
        })
        .collect();
    order.sort_by_key(|(_, k)| Reverse(OrderedFloat(*k)));

    let mut ranks = vec![None; items.len()];
    for (pos, (idx, _)) in order.into_iter().enumerate() {
        ranks[idx] = Some(pos + 1);
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0.009 degrees of longitude on the equator is roughly 1 km.
    const DEG_PER_KM: f64 = 1.0 / 111.195;

    fn trace(km_per_step: f64, steps: usize, step_ms: i64) -> Vec<Sample> {
        (0..=steps)
            .map(|i| {
                Sample::new(0.0, i as f64 * km_per_step * DEG_PER_KM, i as i64 * step_ms)
                    .with_speed(6.0 + i as f64)
            })
            .collect()
    }

    #[test]
    fn test_empty_and_single_sample() {
        let params = MetricsParams::default();
        let empty = compute_boat_metrics("c", &[], 0, &params);
        assert_eq!(empty.distance_m, 0.0);
        assert_eq!(empty.speed.avg_kn, 0.0);
        assert_eq!(empty.speed.max_kn, None);
        assert_eq!(empty.speed.min_kn, None);
        assert_eq!(empty.elapsed_ms, 0);
        assert!(!empty.has_position());

        let single = [Sample::new(10.0, 10.0, 5_000)];
        let m = compute_boat_metrics("d", &single, 0, &params);
        assert_eq!(m.distance_m, 0.0);
        assert_eq!(m.speed_source, SpeedSource::Derived);
        assert_eq!(m.speed.avg_kn, 0.0);
        assert_eq!(m.speed.max_kn, None);
        assert_eq!(m.elapsed_ms, 5_000);
        assert!(!m.speed.avg_kn.is_nan());
    }

    #[test]
    fn test_reported_speed_statistics() {
        let samples = trace(5.0, 2, 5_000);
        let m = compute_boat_metrics("a", &samples, 0, &MetricsParams::default());
        assert_eq!(m.speed_source, SpeedSource::Reported);
        assert!((m.speed.avg_kn - 7.0).abs() < 1e-9);
        assert_eq!(m.speed.max_kn, Some(8.0));
        assert_eq!(m.speed.min_kn, Some(6.0));
        assert!((m.distance_km() - 10.0).abs() < 0.01);
        assert_eq!(m.elapsed_ms, 10_000);
    }

    #[test]
    fn test_auto_falls_back_to_derived_when_any_speed_missing() {
        let mut samples = trace(1.852, 2, 3_600_000);
        samples[1].speed_kn = None;
        let m = compute_boat_metrics("a", &samples, 0, &MetricsParams::default());
        assert_eq!(m.speed_source, SpeedSource::Derived);
        // 1 nm per hour on each step.
        assert!((m.speed.avg_kn - 1.0).abs() < 0.01, "{}", m.speed.avg_kn);
        assert!((m.speed.max_kn.unwrap() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_zero_duration_step_yields_zero_speed() {
        let samples = [
            Sample::new(0.0, 0.0, 1_000),
            Sample::new(0.0, 0.01, 1_000),
            Sample::new(0.0, 0.02, 2_000),
        ];
        let series = speed_series(&samples, SpeedSource::Derived, DistanceModel::Haversine);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0], (1_000, 0.0));
        assert!(series[1].1 > 0.0 && series[1].1.is_finite());
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let samples = [
            Sample::new(0.0, 0.0, i64::MIN),
            Sample::new(0.0, 0.01, i64::MAX),
        ];
        let m = compute_boat_metrics("x", &samples, i64::MIN, &MetricsParams::default());
        assert_eq!(m.elapsed_ms, i64::MAX);
        assert!(m.speed.max_kn.unwrap().is_finite());

        let late_start = compute_boat_metrics("x", &samples[..1], i64::MAX, &MetricsParams::default());
        assert_eq!(late_start.elapsed_ms, 0);
    }

    #[test]
    fn test_reported_policy_skips_unusable_values() {
        let samples = [
            Sample::new(0.0, 0.0, 0).with_speed(4.0),
            Sample::new(0.0, 0.0, 1).with_speed(f64::NAN),
            Sample::new(0.0, 0.0, 2).with_speed(8.0),
        ];
        let params = MetricsParams {
            speed_source: SpeedSource::Reported,
            ..MetricsParams::default()
        };
        let m = compute_boat_metrics("a", &samples, 0, &params);
        assert!((m.speed.avg_kn - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_positions_do_not_poison_distance() {
        let samples = [
            Sample::new(0.0, 0.0, 0),
            Sample::new(f64::NAN, 0.01, 1_000),
            Sample::new(0.0, 0.02, 2_000),
        ];
        let d = track_distance_m(&samples, DistanceModel::Haversine);
        assert_eq!(d, 0.0);
        let series = speed_series(&samples, SpeedSource::Derived, DistanceModel::Haversine);
        assert!(series.iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn test_current_sample_at_cursor() {
        let samples = trace(1.0, 3, 10);
        assert!(current_sample(&samples, -1).is_none());
        assert_eq!(current_sample(&samples, 0).unwrap().timestamp_ms, 0);
        assert_eq!(current_sample(&samples, 15).unwrap().timestamp_ms, 10);
        assert_eq!(current_sample(&samples, 1_000).unwrap().timestamp_ms, 30);

        let mut last = i64::MIN;
        for cursor in -5..40 {
            if let Some(s) = current_sample(&samples, cursor) {
                assert!(s.timestamp_ms <= cursor);
                assert!(s.timestamp_ms >= last);
                last = s.timestamp_ms;
            }
        }
    }

    #[test]
    fn test_current_sample_with_duplicate_timestamps() {
        let samples = [
            Sample::new(0.0, 0.0, 0),
            Sample::new(0.0, 0.1, 5),
            Sample::new(0.0, 0.2, 5),
        ];
        let s = current_sample(&samples, 5).unwrap();
        assert_eq!(s.lon, 0.2);
    }

    #[test]
    fn test_window_filters() {
        let samples = trace(1.0, 5, 10);
        assert_eq!(samples_until(&samples, 25).len(), 3);
        assert_eq!(samples_in_window(&samples, 10, 30).len(), 3);
        assert_eq!(samples_in_window(&samples, 11, 19).len(), 0);
        assert_eq!(samples_in_window(&samples, 40, 10).len(), 0);
        assert_eq!(samples_in_window(&samples, -100, 100).len(), 6);
    }

    #[test]
    fn test_metrics_at_cursor_only_sees_past_samples() {
        let mut boat = Boat::new("a", "A", "IRC");
        boat.samples = trace(2.0, 4, 1_000);
        let params = MetricsParams::default();
        let early = metrics_at(&boat, 0, Some(2_500), &params);
        assert_eq!(early.sample_count, 3);
        assert!((early.distance_km() - 4.0).abs() < 0.01);
        assert_eq!(early.current.unwrap().timestamp_ms, 2_000);
        let full = metrics_at(&boat, 0, None, &params);
        assert_eq!(full.sample_count, 5);
        let before = metrics_at(&boat, 0, Some(-1), &params);
        assert!(before.current.is_none());
    }

    #[test]
    fn test_rank_by_distance() {
        let a = trace(5.0, 2, 5);
        let b = trace(4.0, 2, 5);
        let params = MetricsParams::default();
        let metrics = vec![
            compute_boat_metrics("b", &b, 0, &params),
            compute_boat_metrics("a", &a, 0, &params),
            compute_boat_metrics("c", &[], 0, &params),
        ];
        let ranks = rank_by_key(&metrics, |m| m.current.map(|_| m.distance_m));
        assert_eq!(ranks, vec![Some(2), Some(1), None]);
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let keys = [Some(3.0), Some(5.0), Some(3.0), None, Some(3.0), Some(f64::NAN)];
        let ranks = rank_by_key(&keys, |k| *k);
        assert_eq!(
            ranks,
            vec![Some(2), Some(1), Some(3), None, Some(4), Some(5)]
        );
    }
}
