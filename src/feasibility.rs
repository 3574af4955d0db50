//! Feasibility and interference evaluation.
//!
//! Decides whether inserting a new order into a vehicle's committed work
//! keeps every deadline satisfied, and reports the two route durations the
//! interference score is computed from. The sequencer is the authority on
//! insertion order: the evaluator asks it for the best sequence over
//! `committed ∪ {new}` and for the baseline over the committed orders alone.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DispatchConfig;
use crate::models::{Coordinate, Order, Vehicle};
use crate::sequencer::{sequence_route, SequenceStop, SequencedRoute};
use crate::traits::TravelTimeProvider;

/// Outcome of one feasibility evaluation.
#[derive(Debug, Clone)]
pub struct FeasibilityReport {
    pub feasible: bool,
    /// Total duration of the committed route without the new order.
    pub baseline_duration_min: f64,
    /// Total duration of the best insertion of the new order.
    pub with_new_duration_min: f64,
    /// Earliest stop missing its deadline, when infeasible.
    pub violating_order_id: Option<String>,
    /// The committed route alone already misses a deadline. The new order is
    /// still accepted when the combined route holds; the scorer surfaces a
    /// reasoning note instead of rejecting.
    pub baseline_infeasible: bool,
    /// Best combined sequence, reused by the dispatcher for the final route.
    pub route: SequencedRoute,
}

impl FeasibilityReport {
    /// Route-duration delta caused by the new stop.
    pub fn interference_min(&self) -> f64 {
        self.with_new_duration_min - self.baseline_duration_min
    }
}

/// Evaluate inserting `new_order` (already resolved to `new_location`) into
/// `vehicle`'s committed work at `clock`.
pub fn evaluate<P: TravelTimeProvider>(
    vehicle: &Vehicle,
    new_order: &Order,
    new_location: Coordinate,
    clock: DateTime<Utc>,
    provider: &P,
    config: &DispatchConfig,
    budget: Instant,
) -> FeasibilityReport {
    let committed: Vec<SequenceStop<'_>> = vehicle
        .current_orders
        .iter()
        .filter_map(|order| {
            order.location().map(|location| SequenceStop { order, location })
        })
        .collect();

    let mut combined = committed.clone();
    combined.push(SequenceStop {
        order: new_order,
        location: new_location,
    });

    let with_new = sequence_route(
        vehicle.current_location,
        &combined,
        clock,
        provider,
        config,
        budget,
    );

    // An empty committed set reduces to the single new leg; the baseline is
    // an empty route with zero duration.
    let baseline = sequence_route(
        vehicle.current_location,
        &committed,
        clock,
        provider,
        config,
        budget,
    );

    let feasible = with_new.all_on_time;
    let baseline_infeasible = !committed.is_empty() && !baseline.all_on_time;
    debug!(
        vehicle = %vehicle.vehicle_id,
        order = %new_order.order_id,
        feasible,
        baseline_min = baseline.total_duration_min,
        with_new_min = with_new.total_duration_min,
        "feasibility evaluated"
    );

    FeasibilityReport {
        feasible,
        baseline_duration_min: baseline.total_duration_min,
        with_new_duration_min: with_new.total_duration_min,
        violating_order_id: if feasible {
            None
        } else {
            with_new.first_violation.clone()
        },
        baseline_infeasible,
        route: with_new,
    }
}
