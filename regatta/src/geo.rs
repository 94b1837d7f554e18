use serde::{Deserialize, Serialize};

use crate::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const METERS_PER_NM: f64 = 1852.0;
pub const KNOTS_PER_MPS: f64 = 3600.0 / METERS_PER_NM;
/// Planar scale used by the equirectangular approximation.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DistanceModel {
    Haversine,
    Equirectangular,
}

impl Default for DistanceModel {
    fn default() -> Self {
        DistanceModel::Haversine
    }
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

pub fn equirectangular_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dy = (lat2 - lat1) * METERS_PER_DEGREE;
    let dx = (lon2 - lon1) * METERS_PER_DEGREE * lat2.to_radians().cos();
    (dx * dx + dy * dy).sqrt()
}

/// Distance in metres between two points; `0` when either point is not finite.
pub fn distance_m(a: GeoPoint, b: GeoPoint, model: DistanceModel) -> f64 {
    if !a.is_finite() || !b.is_finite() {
        return 0.0;
    }
    let d = match model {
        DistanceModel::Haversine => haversine_distance(a.lat, a.lon, b.lat, b.lon),
        DistanceModel::Equirectangular => equirectangular_distance(a.lat, a.lon, b.lat, b.lon),
    };
    if d.is_finite() {
        d
    } else {
        0.0
    }
}

pub fn meters_to_nm(meters: f64) -> f64 {
    meters / METERS_PER_NM
}

pub fn mps_to_knots(mps: f64) -> f64 {
    mps * KNOTS_PER_MPS
}
