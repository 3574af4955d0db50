//! Core seams for the dispatch planner.
//!
//! These are intentionally minimal. The routing layer, the fallback
//! estimator, and test fixtures all implement [`TravelTimeProvider`]; every
//! module downstream of the road network consumes travel times only through
//! this trait.

use crate::models::Coordinate;

/// A travel estimate between two coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelEstimate {
    /// Driving time in minutes.
    pub minutes: f64,
    /// Driven distance in meters (great-circle distance for approximate
    /// estimates).
    pub distance_m: f64,
    /// Set when the estimate did not come from a shortest-path query.
    /// Approximate estimates are valid inputs downstream but must not be
    /// cached as ground truth.
    pub approximate: bool,
}

/// Provides travel times over the street network (or an approximation of it).
pub trait TravelTimeProvider {
    fn travel_time(&self, from: Coordinate, to: Coordinate) -> TravelEstimate;

    /// Pairwise travel estimates for a set of points, indexed by input order.
    fn travel_matrix(&self, points: &[Coordinate]) -> Vec<Vec<TravelEstimate>> {
        let zero = TravelEstimate {
            minutes: 0.0,
            distance_m: 0.0,
            approximate: false,
        };
        points
            .iter()
            .map(|&from| {
                points
                    .iter()
                    .map(|&to| {
                        if from == to {
                            zero
                        } else {
                            self.travel_time(from, to)
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

impl<T: TravelTimeProvider + ?Sized> TravelTimeProvider for &T {
    fn travel_time(&self, from: Coordinate, to: Coordinate) -> TravelEstimate {
        (**self).travel_time(from, to)
    }
}
