//! Great-circle distance helpers.

use crate::model::landmark::{Coordinates, Landmark};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometres.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` just past 1 for antipodal points.
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Landmarks within `radius_km` of `center`, in input order.
///
/// A negative or non-finite radius matches nothing.
pub fn filter_by_distance(
    landmarks: &[Landmark],
    center: Coordinates,
    radius_km: f64,
) -> Vec<Landmark> {
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Vec::new();
    }
    landmarks
        .iter()
        .filter(|landmark| {
            distance_km(
                center.latitude(),
                center.longitude(),
                landmark.latitude(),
                landmark.longitude(),
            ) <= radius_km
        })
        .cloned()
        .collect()
}
