//! Great-circle geometry (fallback when the road network is unavailable).
//!
//! Uses haversine distance to estimate travel time. Less accurate than a
//! shortest-path query (ignores streets and one-ways) but always available,
//! so the network provider degrades to it rather than failing a dispatch.

use crate::models::{Coordinate, DEFAULT_AVG_SPEED_KPH};
use crate::traits::{TravelEstimate, TravelTimeProvider};

/// Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters.
pub fn distance_m(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` toward `to`, in degrees clockwise from north.
pub fn bearing_deg(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Travel-time provider estimating from straight-line distance at an assumed
/// average speed. Every estimate it produces is flagged approximate.
#[derive(Debug, Clone)]
pub struct GreatCircleEstimator {
    /// Assumed average driving speed in km/h.
    pub speed_kph: f64,
}

impl Default for GreatCircleEstimator {
    fn default() -> Self {
        Self {
            speed_kph: DEFAULT_AVG_SPEED_KPH,
        }
    }
}

impl GreatCircleEstimator {
    pub fn new(speed_kph: f64) -> Self {
        Self { speed_kph }
    }

    /// Convert a distance in meters to travel minutes at the assumed speed.
    pub fn minutes_for(&self, meters: f64) -> f64 {
        (meters / 1000.0) / self.speed_kph * 60.0
    }
}

impl TravelTimeProvider for GreatCircleEstimator {
    fn travel_time(&self, from: Coordinate, to: Coordinate) -> TravelEstimate {
        let distance = distance_m(from, to);
        TravelEstimate {
            minutes: self.minutes_for(distance),
            distance_m: distance,
            approximate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let p = Coordinate::new(-34.9, -56.16);
        assert!(distance_m(p, p) < 0.001);
    }

    #[test]
    fn known_distance_montevideo_buenos_aires() {
        // Montevideo to Buenos Aires is roughly 205 km.
        let mvd = Coordinate::new(-34.9011, -56.1645);
        let bsas = Coordinate::new(-34.6037, -58.3816);
        let km = distance_m(mvd, bsas) / 1000.0;
        assert!((195.0..215.0).contains(&km), "expected ~205km, got {km}");
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = Coordinate::new(0.0, 0.0);
        assert!((bearing_deg(origin, Coordinate::new(1.0, 0.0)) - 0.0).abs() < 0.5);
        assert!((bearing_deg(origin, Coordinate::new(0.0, 1.0)) - 90.0).abs() < 0.5);
        assert!((bearing_deg(origin, Coordinate::new(-1.0, 0.0)) - 180.0).abs() < 0.5);
        assert!((bearing_deg(origin, Coordinate::new(0.0, -1.0)) - 270.0).abs() < 0.5);
    }

    #[test]
    fn estimate_uses_assumed_speed() {
        // 10 km at 30 km/h is 20 minutes.
        let estimator = GreatCircleEstimator::new(30.0);
        assert!((estimator.minutes_for(10_000.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn estimates_are_flagged_approximate() {
        let estimator = GreatCircleEstimator::default();
        let estimate = estimator.travel_time(
            Coordinate::new(-34.90, -56.16),
            Coordinate::new(-34.87, -56.17),
        );
        assert!(estimate.approximate);
        assert!(estimate.minutes > 0.0);
    }
}
