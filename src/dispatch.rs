//! Single-order dispatch: resolve, filter, score, pick.
//!
//! The dispatcher owns the end-to-end pipeline for one order against one
//! fleet snapshot: address resolution, zone pre-filter, hard capacity and
//! weight filters, candidate scoring (fanned out over a bounded worker
//! pool), and the deterministic final pick. It never mutates vehicle state;
//! committing an assignment is the caller's decision.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::geocode::{AddressResolver, GeocodeError};
use crate::haversine;
use crate::models::{
    AddressInput, AssignmentScore, Coordinate, FailureReason, Order, Route, Vehicle,
};
use crate::scoring::{self, ScoreContext, ScoredCandidate};
use crate::sequencer::{sequence_route, SequenceStop, SequencedRoute};
use crate::traits::TravelTimeProvider;
use crate::zones::ZoneMap;

/// Malformed-input rejection, surfaced before any core work runs.
#[derive(Debug)]
pub enum InputError {
    InvalidCoordinate(String),
    InvalidDeadline { order_id: String },
    NegativeWeight { order_id: String },
    ZeroCapacity { vehicle_id: String },
    NonPositiveWeightLimit { vehicle_id: String },
    MissingCommittedLocation { vehicle_id: String, order_id: String },
    EmptyFleet,
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputError::InvalidCoordinate(what) => write!(f, "invalid coordinate for {what}"),
            InputError::InvalidDeadline { order_id } => {
                write!(f, "order {order_id}: deadline must be after creation")
            }
            InputError::NegativeWeight { order_id } => {
                write!(f, "order {order_id}: weight must be non-negative")
            }
            InputError::ZeroCapacity { vehicle_id } => {
                write!(f, "vehicle {vehicle_id}: capacity must be positive")
            }
            InputError::NonPositiveWeightLimit { vehicle_id } => {
                write!(f, "vehicle {vehicle_id}: max weight must be positive")
            }
            InputError::MissingCommittedLocation {
                vehicle_id,
                order_id,
            } => write!(
                f,
                "vehicle {vehicle_id}: committed order {order_id} has no coordinates"
            ),
            InputError::EmptyFleet => write!(f, "vehicle list is empty"),
        }
    }
}

impl std::error::Error for InputError {}

/// Per-request dispatch knobs. Budget and candidate count fall back to the
/// configured defaults when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    pub fast_mode: bool,
    pub max_candidates: Option<usize>,
    pub time_budget_s: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub order: Order,
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub options: DispatchOptions,
}

impl DispatchRequest {
    pub fn validate(&self) -> Result<(), InputError> {
        validate_order(&self.order)?;
        validate_fleet(&self.vehicles)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub order_id: String,
    pub assigned_vehicle_id: Option<String>,
    /// Winning score sheet, when a vehicle was assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<AssignmentScore>,
    /// The winner's route after insertion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    /// Score sheet for every evaluated candidate, best first.
    pub all_vehicle_scores: Vec<AssignmentScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResequenceRequest {
    pub vehicle: Vehicle,
    /// Overrides the vehicle's current location as the route start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<Coordinate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResequenceResponse {
    pub route: Route,
    pub all_on_time: bool,
}

/// The dispatch orchestrator. Holds capabilities by reference; one instance
/// serves any number of independent requests.
pub struct Dispatcher<'a, P> {
    provider: &'a P,
    config: &'a DispatchConfig,
    zones: &'a ZoneMap,
    resolver: Option<&'a dyn AddressResolver>,
}

impl<'a, P: TravelTimeProvider + Sync> Dispatcher<'a, P> {
    pub fn new(provider: &'a P, config: &'a DispatchConfig, zones: &'a ZoneMap) -> Self {
        Self {
            provider,
            config,
            zones,
            resolver: None,
        }
    }

    /// Attach a geocoding adapter for orders arriving without coordinates.
    pub fn with_resolver(mut self, resolver: &'a dyn AddressResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub(crate) fn config_ref(&self) -> &DispatchConfig {
        self.config
    }

    pub fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse, InputError> {
        self.dispatch_at(request, Utc::now())
    }

    /// Dispatch against an explicit evaluation clock (tests and batch use
    /// this; the clock is "now" for live traffic).
    pub fn dispatch_at(
        &self,
        request: &DispatchRequest,
        clock: DateTime<Utc>,
    ) -> Result<DispatchResponse, InputError> {
        request.validate()?;
        let order_id = request.order.order_id.clone();
        let budget = Instant::now() + self.time_budget(&request.options);

        // 1. Resolve the delivery location.
        let (order, location) = match self.resolve_order(&request.order) {
            Ok(resolved) => resolved,
            Err(e) => {
                info!(order = %order_id, "address resolution failed: {e}");
                return Ok(failure(order_id, FailureReason::UnresolvedAddress, Vec::new()));
            }
        };

        // 2. Zone pre-filter. An order outside the partition disables it.
        let candidates: Vec<&Vehicle> = match self.zones.zone_for(location) {
            Some(zone) => request
                .vehicles
                .iter()
                .filter(|v| self.zones.keeps(v.current_location, zone))
                .collect(),
            None => request.vehicles.iter().collect(),
        };
        debug!(
            order = %order_id,
            candidates = candidates.len(),
            fleet = request.vehicles.len(),
            "zone pre-filter applied"
        );

        // 3. Hard capacity and weight filters.
        let candidates: Vec<&Vehicle> = candidates
            .into_iter()
            .filter(|v| v.available_capacity() >= 1 && v.remaining_weight_kg() >= order.weight_kg)
            .collect();
        if candidates.is_empty() {
            return Ok(failure(order_id, FailureReason::NoCapacity, Vec::new()));
        }

        if Instant::now() >= budget {
            return Ok(failure(
                order_id,
                FailureReason::TimeBudgetExceeded,
                Vec::new(),
            ));
        }

        // 4. Score candidates.
        let ctx = ScoreContext {
            provider: self.provider,
            config: self.config,
            clock,
            budget,
        };
        let (mut evaluated, budget_hit) = if request.options.fast_mode {
            let k = request
                .options
                .max_candidates
                .unwrap_or(self.config.fast_mode_candidates);
            self.fast_evaluate(&candidates, &order, location, &ctx, k)
        } else {
            (parallel_score(&candidates, &order, location, &ctx), false)
        };

        // 5. Deterministic ranking: total descending, vehicle id ascending.
        evaluated.sort_by(|a, b| {
            b.score
                .total_score
                .total_cmp(&a.score.total_score)
                .then_with(|| a.score.vehicle_id.cmp(&b.score.vehicle_id))
        });
        let scores: Vec<AssignmentScore> = evaluated.iter().map(|c| c.score.clone()).collect();

        // 6. Pick the best exact, feasible candidate. Approximate scores
        // never decide the assignment.
        let winner = evaluated
            .iter()
            .find(|c| c.score.feasible && !c.score.approximate);
        let Some(winner) = winner else {
            if budget_hit {
                return Ok(failure(order_id, FailureReason::TimeBudgetExceeded, scores));
            }
            info!(order = %order_id, "no feasible candidate");
            return Ok(failure(order_id, FailureReason::InfeasibleAll, scores));
        };

        // 7. Final route for the winning vehicle.
        let route = winner
            .route
            .as_ref()
            .map(|seq| route_from(&winner.score.vehicle_id, seq));
        info!(
            order = %order_id,
            vehicle = %winner.score.vehicle_id,
            score = winner.score.total_score,
            "order assigned"
        );

        Ok(DispatchResponse {
            order_id,
            assigned_vehicle_id: Some(winner.score.vehicle_id.clone()),
            score: Some(winner.score.clone()),
            route,
            all_vehicle_scores: scores,
            failure_reason: None,
        })
    }

    /// Produce the canonical resolved order plus its delivery coordinates.
    pub fn resolve_order(&self, order: &Order) -> Result<(Order, Coordinate), GeocodeError> {
        if let Some(location) = order.location() {
            return Ok((order.clone(), location));
        }
        let resolver = self.resolver.ok_or(GeocodeError::AddressNotFound)?;
        let address = resolver.resolve(&order.delivery)?;
        let location = address.coordinates.ok_or(GeocodeError::AddressNotFound)?;
        let mut resolved = order.clone();
        resolved.delivery = AddressInput::Structured(address);
        Ok((resolved, location))
    }

    /// Resequence one vehicle's committed stops from a start location.
    pub fn resequence(
        &self,
        request: &ResequenceRequest,
        clock: DateTime<Utc>,
    ) -> Result<ResequenceResponse, InputError> {
        validate_vehicle(&request.vehicle)?;
        let start = request
            .start_location
            .unwrap_or(request.vehicle.current_location);
        let stops: Vec<SequenceStop<'_>> = request
            .vehicle
            .current_orders
            .iter()
            .filter_map(|order| order.location().map(|location| SequenceStop { order, location }))
            .collect();
        let budget = Instant::now() + self.config.sequencer_budget;
        let sequenced = sequence_route(start, &stops, clock, self.provider, self.config, budget);
        let all_on_time = sequenced.all_on_time;
        Ok(ResequenceResponse {
            route: route_from(&request.vehicle.vehicle_id, &sequenced),
            all_on_time,
        })
    }

    fn time_budget(&self, options: &DispatchOptions) -> Duration {
        options
            .time_budget_s
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.config.dispatch_budget)
    }

    /// Fast mode: quick-rank everything, evaluate the top K fully, and keep
    /// escalating (in quick-rank order) while every full evaluation came back
    /// infeasible. The remainder get Euclidean approximations. The returned
    /// flag reports whether the budget cut full evaluations short.
    fn fast_evaluate(
        &self,
        candidates: &[&Vehicle],
        order: &Order,
        location: Coordinate,
        ctx: &ScoreContext<'_, P>,
        k: usize,
    ) -> (Vec<ScoredCandidate>, bool) {
        let k = k.max(1).min(candidates.len());

        let mut ranked: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .map(|(idx, v)| (idx, scoring::quick_rank(v, location)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| candidates[a.0].vehicle_id.cmp(&candidates[b.0].vehicle_id))
        });

        let mut results: Vec<Option<ScoredCandidate>> = Vec::new();
        results.resize_with(candidates.len(), || None);

        let mut evaluated = 0usize;
        let mut any_feasible = false;
        let mut budget_hit = false;
        for &(idx, _) in &ranked {
            if evaluated >= k && any_feasible {
                break;
            }
            if Instant::now() >= ctx.budget {
                budget_hit = true;
                break;
            }
            let candidate = scoring::score_candidate(candidates[idx], order, location, ctx);
            any_feasible |= candidate.score.feasible;
            results[idx] = Some(candidate);
            evaluated += 1;
        }

        for &(idx, _) in &ranked {
            if results[idx].is_none() {
                results[idx] =
                    Some(scoring::approximate_candidate(candidates[idx], order, location, ctx));
            }
        }
        (results.into_iter().flatten().collect(), budget_hit)
    }
}

/// Candidate evaluations are independent; fan them out over a worker pool
/// bounded by available cores. Chunks are contiguous and results are
/// collected in chunk order, so completion timing cannot change the outcome.
fn parallel_score<P: TravelTimeProvider + Sync>(
    candidates: &[&Vehicle],
    order: &Order,
    location: Coordinate,
    ctx: &ScoreContext<'_, P>,
) -> Vec<ScoredCandidate> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(candidates.len());
    if workers <= 1 {
        return candidates
            .iter()
            .map(|v| scoring::score_candidate(v, order, location, ctx))
            .collect();
    }

    let chunk_size = candidates.len().div_ceil(workers);
    std::thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|v| scoring::score_candidate(v, order, location, ctx))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(results) => results,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

fn failure(
    order_id: String,
    reason: FailureReason,
    scores: Vec<AssignmentScore>,
) -> DispatchResponse {
    DispatchResponse {
        order_id,
        assigned_vehicle_id: None,
        score: None,
        route: None,
        all_vehicle_scores: scores,
        failure_reason: Some(reason),
    }
}

fn route_from(vehicle_id: &str, sequenced: &SequencedRoute) -> Route {
    Route {
        vehicle_id: vehicle_id.to_string(),
        stops: sequenced.stops.clone(),
        total_distance_m: sequenced.total_distance_m,
        total_duration_min: sequenced.total_duration_min,
        all_on_time: sequenced.all_on_time,
    }
}

/// Pending orders within straight-line reach of a reference order, nearest
/// first. Callers batching deliveries by neighborhood use this to pull
/// companions for a trip.
pub fn nearby_orders<'o>(
    reference: &Order,
    candidates: &'o [Order],
    max_distance_km: f64,
) -> Vec<&'o Order> {
    let Some(center) = reference.location() else {
        return Vec::new();
    };
    let mut found: Vec<(f64, &Order)> = candidates
        .iter()
        .filter(|o| o.order_id != reference.order_id)
        .filter_map(|o| {
            let location = o.location()?;
            let km = haversine::distance_m(center, location) / 1000.0;
            (km <= max_distance_km).then_some((km, o))
        })
        .collect();
    found.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.order_id.cmp(&b.1.order_id)));
    found.into_iter().map(|(_, o)| o).collect()
}

// -----------------------------------------------------------------------------
// Input validation
// -----------------------------------------------------------------------------

pub(crate) fn validate_order(order: &Order) -> Result<(), InputError> {
    if let Some(location) = order.location() {
        if !location.is_valid() {
            return Err(InputError::InvalidCoordinate(format!(
                "order {}",
                order.order_id
            )));
        }
    }
    if order.deadline <= order.created_at {
        return Err(InputError::InvalidDeadline {
            order_id: order.order_id.clone(),
        });
    }
    if order.weight_kg < 0.0 {
        return Err(InputError::NegativeWeight {
            order_id: order.order_id.clone(),
        });
    }
    Ok(())
}

pub(crate) fn validate_vehicle(vehicle: &Vehicle) -> Result<(), InputError> {
    if !vehicle.current_location.is_valid() {
        return Err(InputError::InvalidCoordinate(format!(
            "vehicle {}",
            vehicle.vehicle_id
        )));
    }
    if vehicle.capacity == 0 {
        return Err(InputError::ZeroCapacity {
            vehicle_id: vehicle.vehicle_id.clone(),
        });
    }
    if vehicle.max_weight_kg <= 0.0 {
        return Err(InputError::NonPositiveWeightLimit {
            vehicle_id: vehicle.vehicle_id.clone(),
        });
    }
    for committed in &vehicle.current_orders {
        match committed.location() {
            None => {
                return Err(InputError::MissingCommittedLocation {
                    vehicle_id: vehicle.vehicle_id.clone(),
                    order_id: committed.order_id.clone(),
                })
            }
            Some(location) if !location.is_valid() => {
                return Err(InputError::InvalidCoordinate(format!(
                    "committed order {}",
                    committed.order_id
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub(crate) fn validate_fleet(vehicles: &[Vehicle]) -> Result<(), InputError> {
    if vehicles.is_empty() {
        return Err(InputError::EmptyFleet);
    }
    for vehicle in vehicles {
        validate_vehicle(vehicle)?;
    }
    Ok(())
}
