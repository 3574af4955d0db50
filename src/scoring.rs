//! Multi-criterion scoring.
//!
//! Turns each (vehicle, order) pair into one comparable number in [0, 1]
//! plus the reasoning trail behind it. Six weighted sub-scores: distance,
//! capacity, time urgency, route compatibility, driver performance, and
//! interference with committed work. Infeasible candidates short-circuit to
//! a total of 0.0; infeasibility is data here, never an error.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DispatchConfig;
use crate::feasibility::{self, FeasibilityReport};
use crate::haversine;
use crate::models::{AssignmentScore, Coordinate, Order, Vehicle};
use crate::sequencer::SequencedRoute;
use crate::traits::TravelTimeProvider;

/// Shared inputs for one scoring pass.
pub struct ScoreContext<'a, P> {
    pub provider: &'a P,
    pub config: &'a DispatchConfig,
    pub clock: DateTime<Utc>,
    /// Cooperative wall-clock deadline for sequencing work.
    pub budget: Instant,
}

/// A scored candidate plus the sequenced route that backed the evaluation
/// (absent for fast-mode approximations).
pub struct ScoredCandidate {
    pub score: AssignmentScore,
    pub route: Option<SequencedRoute>,
}

/// Full evaluation: feasibility through the sequencer, then all six
/// sub-scores.
pub fn score_candidate<P: TravelTimeProvider>(
    vehicle: &Vehicle,
    order: &Order,
    order_location: Coordinate,
    ctx: &ScoreContext<'_, P>,
) -> ScoredCandidate {
    let report = feasibility::evaluate(
        vehicle,
        order,
        order_location,
        ctx.clock,
        ctx.provider,
        ctx.config,
        ctx.budget,
    );

    let arrival_min =
        arrival_minutes(&report.route, &order.order_id, ctx.clock).unwrap_or(f64::INFINITY);

    if !report.feasible {
        let score = rejected_score(vehicle, order, &report, arrival_min);
        return ScoredCandidate {
            score,
            route: Some(report.route),
        };
    }

    let approach = ctx.provider.travel_time(vehicle.current_location, order_location);
    let distance = distance_score(approach.minutes);
    let capacity = capacity_score(vehicle);
    let slack_min = minutes_between(ctx.clock, order.deadline) - arrival_min;
    let urgency = urgency_score(slack_min, order);
    let compatibility = compatibility_score(vehicle, order_location);
    let performance = vehicle.performance_score.clamp(0.0, 1.0);
    let interference_min = report.interference_min();
    let interference = if vehicle.current_orders.is_empty() {
        // Nothing to disturb: an empty vehicle is the best case by
        // definition, whatever the trip itself costs.
        1.0
    } else {
        interference_score(interference_min)
    };

    let weights = &ctx.config.weights;
    let total = (distance * weights.distance
        + capacity * weights.capacity
        + urgency * weights.urgency
        + compatibility * weights.compatibility
        + performance * weights.performance
        + interference * weights.interference)
        .clamp(0.0, 1.0);

    let mut reasoning = Vec::new();
    if report.baseline_infeasible {
        reasoning.push(
            "existing route already misses a deadline; new stop does not worsen it".to_string(),
        );
    }
    reasoning.push("route feasible: all deadlines hold".to_string());
    reasoning.push(describe_interference(interference, interference_min));
    reasoning.push(describe_distance(approach.distance_m / 1000.0));
    reasoning.push(describe_capacity(vehicle.available_capacity()));
    reasoning.push(describe_slack(slack_min));
    reasoning.push(describe_total(total));

    debug!(
        vehicle = %vehicle.vehicle_id,
        order = %order.order_id,
        total,
        "candidate scored"
    );

    ScoredCandidate {
        score: AssignmentScore {
            vehicle_id: vehicle.vehicle_id.clone(),
            distance_score: distance,
            capacity_score: capacity,
            urgency_score: urgency,
            compatibility_score: compatibility,
            performance_score: performance,
            interference_score: interference,
            total_score: total,
            feasible: true,
            approximate: false,
            estimated_arrival_min: arrival_min,
            interference_min,
            reasoning,
        },
        route: Some(report.route),
    }
}

fn rejected_score(
    vehicle: &Vehicle,
    order: &Order,
    report: &FeasibilityReport,
    arrival_min: f64,
) -> AssignmentScore {
    let reason = match report.violating_order_id.as_deref() {
        Some(id) if id == order.order_id => {
            "rejected: cannot reach the stop by its deadline".to_string()
        }
        Some(id) => format!("rejected: committed order {id} would miss its deadline"),
        None => "rejected: no sequence meets every deadline".to_string(),
    };
    AssignmentScore {
        vehicle_id: vehicle.vehicle_id.clone(),
        distance_score: 0.0,
        capacity_score: 0.0,
        urgency_score: 0.0,
        compatibility_score: 0.0,
        performance_score: 0.0,
        interference_score: 0.0,
        total_score: 0.0,
        feasible: false,
        approximate: false,
        estimated_arrival_min: arrival_min,
        interference_min: report.interference_min(),
        reasoning: vec![reason],
    }
}

// -----------------------------------------------------------------------------
// Sub-scores
// -----------------------------------------------------------------------------

/// `1 / (1 + t/30)` over the current-location → order travel time.
pub fn distance_score(travel_min: f64) -> f64 {
    1.0 / (1.0 + travel_min.max(0.0) / 30.0)
}

/// Free share of the vehicle's slots; 0 when nothing is free.
pub fn capacity_score(vehicle: &Vehicle) -> f64 {
    if vehicle.capacity == 0 {
        return 0.0;
    }
    let available = vehicle.available_capacity();
    if available <= 0 {
        0.0
    } else {
        available as f64 / vehicle.capacity as f64
    }
}

/// Piecewise score over time slack (deadline minus projected arrival), with
/// an additive priority bump, clipped to 1.0.
pub fn urgency_score(slack_min: f64, order: &Order) -> f64 {
    let base = if slack_min >= 60.0 {
        1.0
    } else if slack_min >= 30.0 {
        0.85
    } else if slack_min >= 10.0 {
        0.6
    } else if slack_min >= 0.0 {
        0.3
    } else {
        0.0
    };
    (base + order.priority.urgency_bump()).min(1.0)
}

/// Mean cosine between the bearings toward committed stops and the bearing
/// toward the new stop, rescaled from [-1, 1] to [0, 1]. Neutral 0.5 when
/// the vehicle has no committed stops (or all are co-located with it).
pub fn compatibility_score(vehicle: &Vehicle, order_location: Coordinate) -> f64 {
    const MIN_BEARING_DISTANCE_M: f64 = 1.0;

    let origin = vehicle.current_location;
    if haversine::distance_m(origin, order_location) < MIN_BEARING_DISTANCE_M {
        return 0.5;
    }
    let new_bearing = haversine::bearing_deg(origin, order_location).to_radians();

    let mut sum = 0.0;
    let mut count = 0usize;
    for committed in &vehicle.current_orders {
        let Some(location) = committed.location() else {
            continue;
        };
        if haversine::distance_m(origin, location) < MIN_BEARING_DISTANCE_M {
            continue;
        }
        let bearing = haversine::bearing_deg(origin, location).to_radians();
        sum += (bearing - new_bearing).cos();
        count += 1;
    }
    if count == 0 {
        return 0.5;
    }
    let mean = sum / count as f64;
    (mean + 1.0) / 2.0
}

/// Piecewise map from the route-duration delta to [0, 1].
pub fn interference_score(delta_min: f64) -> f64 {
    if delta_min <= 0.0 {
        1.0
    } else if delta_min <= 30.0 {
        1.0 - delta_min / 60.0
    } else {
        (0.5 - (delta_min - 30.0) / 120.0).max(0.0)
    }
}

// -----------------------------------------------------------------------------
// Fast mode
// -----------------------------------------------------------------------------

/// Cheap pre-ranking score: straight-line distance, free capacity, and
/// driver performance. Only used to choose which candidates get the full
/// evaluation.
pub fn quick_rank(vehicle: &Vehicle, order_location: Coordinate) -> f64 {
    let km = haversine::distance_m(vehicle.current_location, order_location) / 1000.0;
    let distance = 1.0 / (1.0 + (km / 20.0).min(1.0));
    let capacity = capacity_score(vehicle);
    let performance = vehicle.performance_score.clamp(0.0, 1.0);
    distance * 0.4 + capacity * 0.3 + performance * 0.3
}

/// Fast-mode evaluation: no sequencer call. Travel and interference come
/// from straight-line deltas at the fallback speed; the result is labeled
/// approximate and never compared against exact scores.
pub fn approximate_candidate<P: TravelTimeProvider>(
    vehicle: &Vehicle,
    order: &Order,
    order_location: Coordinate,
    ctx: &ScoreContext<'_, P>,
) -> ScoredCandidate {
    let speed = ctx.config.fallback_speed_kph;
    let minutes_for =
        |from: Coordinate, to: Coordinate| haversine::distance_m(from, to) / 1000.0 / speed * 60.0;

    let approach_min = minutes_for(vehicle.current_location, order_location);
    let arrival_min =
        approach_min + ctx.config.service_time_min + order.estimated_duration_min;
    let slack_min = minutes_between(ctx.clock, order.deadline) - arrival_min;

    let distance = distance_score(approach_min);
    let capacity = capacity_score(vehicle);
    let urgency = urgency_score(slack_min, order);
    let compatibility = compatibility_score(vehicle, order_location);
    let performance = vehicle.performance_score.clamp(0.0, 1.0);

    let (interference_min, interference) = if vehicle.current_orders.is_empty() {
        (arrival_min, 1.0)
    } else {
        let delta = euclidean_insertion_delta(vehicle, order, order_location, ctx);
        (delta, interference_score(delta))
    };

    let weights = &ctx.config.weights;
    let total = (distance * weights.distance
        + capacity * weights.capacity
        + urgency * weights.urgency
        + compatibility * weights.compatibility
        + performance * weights.performance
        + interference * weights.interference)
        .clamp(0.0, 1.0);

    ScoredCandidate {
        score: AssignmentScore {
            vehicle_id: vehicle.vehicle_id.clone(),
            distance_score: distance,
            capacity_score: capacity,
            urgency_score: urgency,
            compatibility_score: compatibility,
            performance_score: performance,
            interference_score: interference,
            total_score: total,
            feasible: slack_min >= 0.0,
            approximate: true,
            estimated_arrival_min: arrival_min,
            interference_min,
            reasoning: vec!["approximate evaluation (fast mode)".to_string()],
        },
        route: None,
    }
}

/// Cheapest straight-line insertion of the new stop into the committed
/// sequence, in added minutes (travel delta plus the stop's own handling).
fn euclidean_insertion_delta<P: TravelTimeProvider>(
    vehicle: &Vehicle,
    order: &Order,
    order_location: Coordinate,
    ctx: &ScoreContext<'_, P>,
) -> f64 {
    let speed = ctx.config.fallback_speed_kph;
    let minutes_for =
        |from: Coordinate, to: Coordinate| haversine::distance_m(from, to) / 1000.0 / speed * 60.0;

    let committed: Vec<Coordinate> = vehicle
        .current_orders
        .iter()
        .filter_map(|o| o.location())
        .collect();
    let stop_cost = ctx.config.service_time_min + order.estimated_duration_min;
    if committed.is_empty() {
        return minutes_for(vehicle.current_location, order_location) + stop_cost;
    }

    let mut best_travel_delta = f64::INFINITY;
    let mut prev = vehicle.current_location;
    for &next in &committed {
        let detour =
            minutes_for(prev, order_location) + minutes_for(order_location, next)
                - minutes_for(prev, next);
        best_travel_delta = best_travel_delta.min(detour);
        prev = next;
    }
    // Appending after the last committed stop.
    best_travel_delta = best_travel_delta.min(minutes_for(prev, order_location));

    best_travel_delta + stop_cost
}

// -----------------------------------------------------------------------------
// Reasoning
// -----------------------------------------------------------------------------

fn describe_interference(score: f64, delta_min: f64) -> String {
    if score >= 0.8 {
        format!("low interference: +{delta_min:.1} min")
    } else if score >= 0.6 {
        format!("moderate interference: +{delta_min:.1} min")
    } else {
        format!("high interference: +{delta_min:.1} min")
    }
}

fn describe_distance(km: f64) -> String {
    if km < 5.0 {
        format!("close by: {km:.1} km")
    } else if km < 10.0 {
        format!("moderate distance: {km:.1} km")
    } else {
        format!("far from the stop: {km:.1} km")
    }
}

fn describe_capacity(available: i64) -> String {
    if available > 3 {
        format!("good capacity: {available} slots free")
    } else {
        format!("limited capacity: {available} slots free")
    }
}

fn describe_slack(slack_min: f64) -> String {
    if slack_min >= 0.0 {
        format!("arrives with {slack_min:.0} min to spare")
    } else {
        format!("would arrive {:.0} min late", -slack_min)
    }
}

fn describe_total(total: f64) -> String {
    if total >= 0.8 {
        format!("excellent candidate (score {total:.2})")
    } else if total >= 0.6 {
        format!("good candidate (score {total:.2})")
    } else if total >= 0.4 {
        format!("fair candidate (score {total:.2})")
    } else {
        format!("poor candidate (score {total:.2})")
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

fn arrival_minutes(
    route: &SequencedRoute,
    order_id: &str,
    clock: DateTime<Utc>,
) -> Option<f64> {
    route
        .stops
        .iter()
        .find(|stop| stop.order_id.as_deref() == Some(order_id))
        .map(|stop| minutes_between(clock, stop.eta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, AddressInput, OrderStatus, Priority};
    use crate::traits::TravelEstimate;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;

    struct ManhattanMinutes;

    impl TravelTimeProvider for ManhattanMinutes {
        fn travel_time(&self, from: Coordinate, to: Coordinate) -> TravelEstimate {
            let minutes = (from.lat - to.lat).abs() + (from.lon - to.lon).abs();
            TravelEstimate {
                minutes,
                distance_m: minutes * 500.0,
                approximate: false,
            }
        }
    }

    fn clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap()
    }

    fn order_at(id: &str, location: Coordinate, deadline_min: i64) -> Order {
        Order {
            order_id: id.to_string(),
            delivery: AddressInput::Structured(Address {
                coordinates: Some(location),
                ..Address::default()
            }),
            deadline: clock() + ChronoDuration::minutes(deadline_min),
            priority: Priority::Normal,
            weight_kg: 1.0,
            estimated_duration_min: 0.0,
            created_at: clock(),
            status: OrderStatus::Pending,
        }
    }

    fn vehicle(id: &str, capacity: u32, orders: Vec<Order>) -> Vehicle {
        Vehicle {
            vehicle_id: id.to_string(),
            driver_name: None,
            current_location: Coordinate::new(0.0, 0.0),
            capacity,
            max_weight_kg: 100.0,
            performance_score: 0.8,
            current_orders: orders,
        }
    }

    fn ctx<'a>(config: &'a DispatchConfig) -> ScoreContext<'a, ManhattanMinutes> {
        ScoreContext {
            provider: &ManhattanMinutes,
            config,
            clock: clock(),
            budget: Instant::now() + Duration::from_secs(5),
        }
    }

    const PROVIDER: ManhattanMinutes = ManhattanMinutes;

    fn score_of(vehicle_: &Vehicle, order: &Order, config: &DispatchConfig) -> AssignmentScore {
        let context = ScoreContext {
            provider: &PROVIDER,
            config,
            clock: clock(),
            budget: Instant::now() + Duration::from_secs(5),
        };
        score_candidate(vehicle_, order, order.location().unwrap(), &context).score
    }

    #[test]
    fn total_is_weighted_sum_of_sub_scores() {
        let config = DispatchConfig::default();
        let committed = order_at("c1", Coordinate::new(0.0, 2.0), 600);
        let v = vehicle("MOV-1", 6, vec![committed]);
        let order = order_at("new", Coordinate::new(0.0, 1.0), 90);
        let score = score_of(&v, &order, &config);

        let w = &config.weights;
        let expected = score.distance_score * w.distance
            + score.capacity_score * w.capacity
            + score.urgency_score * w.urgency
            + score.compatibility_score * w.compatibility
            + score.performance_score * w.performance
            + score.interference_score * w.interference;
        assert!((score.total_score - expected).abs() < 1e-9);
    }

    #[test]
    fn scorer_is_idempotent() {
        let config = DispatchConfig::default();
        let v = vehicle("MOV-1", 6, vec![order_at("c1", Coordinate::new(0.0, 2.0), 600)]);
        let order = order_at("new", Coordinate::new(0.0, 1.0), 90);
        assert_eq!(score_of(&v, &order, &config), score_of(&v, &order, &config));
    }

    #[test]
    fn broken_baseline_produces_note_instead_of_rejection() {
        // Same shape as the feasibility edge case: nine committed stops, a
        // spent budget so both routes keep their greedy order, and a new
        // stop whose position repairs the ordering the committed route
        // alone gets wrong. The candidate stays feasible and the score
        // sheet carries the note.
        let config = DispatchConfig::default();
        let mut committed = vec![order_at("tight", Coordinate::new(0.0, -2.5), 25)];
        for i in 0..8 {
            committed.push(order_at(
                &format!("c{i}"),
                Coordinate::new(0.0, (i + 1) as f64),
                200,
            ));
        }
        let v = vehicle("MOV-1", 12, committed);
        let order = order_at("new", Coordinate::new(0.0, -0.9), 200);

        let context = ScoreContext {
            provider: &PROVIDER,
            config: &config,
            clock: clock(),
            budget: Instant::now(), // spent before sequencing starts
        };
        let candidate = score_candidate(&v, &order, order.location().unwrap(), &context);

        assert!(candidate.score.feasible);
        assert!(candidate.score.total_score > 0.0);
        assert_eq!(
            candidate.score.reasoning[0],
            "existing route already misses a deadline; new stop does not worsen it"
        );
    }

    #[test]
    fn infeasible_candidate_scores_zero_with_single_reason() {
        let config = DispatchConfig::default();
        let v = vehicle("MOV-1", 6, vec![]);
        // 40 minutes of travel against a 10-minute deadline.
        let order = order_at("new", Coordinate::new(0.0, 40.0), 10);
        let score = score_of(&v, &order, &config);

        assert!(!score.feasible);
        assert_eq!(score.total_score, 0.0);
        assert_eq!(score.reasoning.len(), 1);
        assert!(score.reasoning[0].starts_with("rejected"));
    }

    #[test]
    fn feasible_candidate_with_capacity_scores_positive() {
        let config = DispatchConfig::default();
        let v = vehicle("MOV-1", 6, vec![]);
        let order = order_at("new", Coordinate::new(0.0, 1.0), 120);
        let score = score_of(&v, &order, &config);
        assert!(score.feasible);
        assert!(score.total_score > 0.0);
    }

    #[test]
    fn empty_vehicle_interference_is_perfect() {
        let config = DispatchConfig::default();
        let v = vehicle("MOV-1", 6, vec![]);
        let order = order_at("new", Coordinate::new(0.0, 3.0), 120);
        let score = score_of(&v, &order, &config);
        assert_eq!(score.interference_score, 1.0);
    }

    #[test]
    fn urgency_tiers_and_priority_bump() {
        let mut order = order_at("o", Coordinate::new(0.0, 1.0), 120);
        assert_eq!(urgency_score(75.0, &order), 1.0);
        assert_eq!(urgency_score(45.0, &order), 0.85);
        assert_eq!(urgency_score(20.0, &order), 0.6);
        assert_eq!(urgency_score(5.0, &order), 0.3);
        assert_eq!(urgency_score(-1.0, &order), 0.0);

        order.priority = Priority::High;
        assert!((urgency_score(45.0, &order) - 0.90).abs() < 1e-9);
        order.priority = Priority::Urgent;
        assert_eq!(urgency_score(75.0, &order), 1.0); // clipped
    }

    #[test]
    fn interference_mapping_matches_piecewise_definition() {
        assert_eq!(interference_score(-5.0), 1.0);
        assert_eq!(interference_score(0.0), 1.0);
        assert!((interference_score(12.0) - 0.8).abs() < 1e-9);
        assert!((interference_score(30.0) - 0.5).abs() < 1e-9);
        assert!((interference_score(60.0) - 0.25).abs() < 1e-9);
        assert_eq!(interference_score(200.0), 0.0);
    }

    #[test]
    fn capacity_score_monotone_in_capacity() {
        let committed = vec![
            order_at("a", Coordinate::new(0.0, 1.0), 600),
            order_at("b", Coordinate::new(0.0, 2.0), 600),
        ];
        let small = vehicle("MOV-1", 4, committed.clone());
        let large = vehicle("MOV-1", 8, committed);
        assert!(capacity_score(&large) > capacity_score(&small));
    }

    #[test]
    fn total_monotone_in_performance() {
        let config = DispatchConfig::default();
        let order = order_at("new", Coordinate::new(0.0, 1.0), 120);
        let mut low = vehicle("MOV-1", 6, vec![]);
        low.performance_score = 0.3;
        let mut high = low.clone();
        high.performance_score = 0.9;
        assert!(
            score_of(&high, &order, &config).total_score
                > score_of(&low, &order, &config).total_score
        );
    }

    #[test]
    fn out_of_range_performance_is_clamped() {
        let config = DispatchConfig::default();
        let order = order_at("new", Coordinate::new(0.0, 1.0), 120);
        let mut starred = vehicle("MOV-1", 6, vec![]);
        starred.performance_score = 4.5; // star-scale input
        let score = score_of(&starred, &order, &config);
        assert_eq!(score.performance_score, 1.0);
    }

    #[test]
    fn compatibility_neutral_without_committed_orders() {
        let v = vehicle("MOV-1", 6, vec![]);
        assert_eq!(compatibility_score(&v, Coordinate::new(0.0, 1.0)), 0.5);
    }

    #[test]
    fn compatibility_rewards_aligned_stops() {
        let east = order_at("east", Coordinate::new(0.0, 2.0), 600);
        let v = vehicle("MOV-1", 6, vec![east]);
        let aligned = compatibility_score(&v, Coordinate::new(0.0, 3.0));
        let opposite = compatibility_score(&v, Coordinate::new(0.0, -3.0));
        assert!(aligned > 0.99);
        assert!(opposite < 0.01);
    }

    #[test]
    fn approximate_candidate_is_labeled() {
        let config = DispatchConfig::default();
        let context = ctx(&config);
        let v = vehicle("MOV-1", 6, vec![order_at("c", Coordinate::new(0.0, 0.02), 600)]);
        let order = order_at("new", Coordinate::new(0.0, 0.01), 600);
        let candidate = approximate_candidate(&v, &order, order.location().unwrap(), &context);
        assert!(candidate.score.approximate);
        assert!(candidate.route.is_none());
        assert!(candidate.score.total_score > 0.0);
    }

    #[test]
    fn distance_score_halves_at_thirty_minutes() {
        assert!((distance_score(30.0) - 0.5).abs() < 1e-9);
        assert_eq!(distance_score(0.0), 1.0);
    }
}
