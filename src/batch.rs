//! Batch dispatch: many orders against one shared, mutating fleet.
//!
//! The outer loop is sequential: each successful assignment
//! appends the order to the chosen vehicle's committed work, and later
//! orders must see that updated state. Candidate evaluations inside each
//! iteration still fan out. A total wall-clock budget bounds the call: when
//! it runs out, every remaining order is verdicted `time-budget-exceeded`
//! and the assignments already made are preserved.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispatch::{
    validate_fleet, validate_order, DispatchOptions, DispatchRequest, Dispatcher, InputError,
};
use crate::models::{FailureReason, Order, OrderStatus, Vehicle};
use crate::traits::TravelTimeProvider;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Process urgent work first: priority bucket, then earliest deadline.
    pub priority_sort: bool,
    pub fast_mode: bool,
    pub max_candidates: Option<usize>,
    pub time_budget_s: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub orders: Vec<Order>,
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub options: BatchOptions,
}

/// Per-order outcome, reported in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderVerdict {
    pub order_id: String,
    pub assigned_vehicle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub reasoning: Vec<String>,
    pub assignment_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_orders: usize,
    pub assigned: usize,
    pub unassigned: usize,
    pub total_time_ms: f64,
    pub fast_mode_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    /// One verdict per input order, in input order.
    pub verdicts: Vec<OrderVerdict>,
    pub summary: BatchSummary,
    /// The mutated fleet copy after all assignments.
    pub fleet: Vec<Vehicle>,
}

impl<'a, P: TravelTimeProvider + Sync> Dispatcher<'a, P> {
    pub fn dispatch_batch(&self, request: &BatchRequest) -> Result<BatchResponse, InputError> {
        self.dispatch_batch_at(request, Utc::now())
    }

    pub fn dispatch_batch_at(
        &self,
        request: &BatchRequest,
        clock: DateTime<Utc>,
    ) -> Result<BatchResponse, InputError> {
        for order in &request.orders {
            validate_order(order)?;
        }
        validate_fleet(&request.vehicles)?;

        let started = Instant::now();
        let deadline = started + self.batch_budget(&request.options);
        let mut fleet = request.vehicles.clone();
        let mut verdicts: Vec<Option<OrderVerdict>> = Vec::new();
        verdicts.resize_with(request.orders.len(), || None);
        let mut assigned = 0usize;

        info!(
            orders = request.orders.len(),
            vehicles = fleet.len(),
            fast_mode = request.options.fast_mode,
            "batch dispatch started"
        );

        for input_idx in processing_order(&request.orders, request.options.priority_sort) {
            let order = &request.orders[input_idx];
            let order_started = Instant::now();

            if order_started >= deadline {
                verdicts[input_idx] = Some(budget_verdict(order));
                continue;
            }

            let resolved = match self.resolve_order(order) {
                Ok((resolved, _)) => resolved,
                Err(_) => {
                    verdicts[input_idx] = Some(OrderVerdict {
                        order_id: order.order_id.clone(),
                        assigned_vehicle_id: None,
                        score: None,
                        failure_reason: Some(FailureReason::UnresolvedAddress),
                        reasoning: vec!["delivery address could not be resolved".to_string()],
                        assignment_time_ms: ms_since(order_started),
                    });
                    continue;
                }
            };

            let per_order = DispatchRequest {
                order: resolved.clone(),
                vehicles: fleet.clone(),
                options: DispatchOptions {
                    fast_mode: request.options.fast_mode,
                    max_candidates: request.options.max_candidates,
                    time_budget_s: Some(remaining_secs(deadline, self.single_order_cap())),
                },
            };
            let response = self.dispatch_at(&per_order, clock)?;

            let verdict = match response.assigned_vehicle_id {
                Some(vehicle_id) => {
                    commit_assignment(&mut fleet, &vehicle_id, resolved);
                    assigned += 1;
                    OrderVerdict {
                        order_id: order.order_id.clone(),
                        assigned_vehicle_id: Some(vehicle_id),
                        score: response.score.as_ref().map(|s| s.total_score),
                        failure_reason: None,
                        reasoning: response
                            .score
                            .map(|s| s.reasoning)
                            .unwrap_or_default(),
                        assignment_time_ms: ms_since(order_started),
                    }
                }
                None => OrderVerdict {
                    order_id: order.order_id.clone(),
                    assigned_vehicle_id: None,
                    score: None,
                    failure_reason: response.failure_reason,
                    reasoning: top_reasons(&response.all_vehicle_scores),
                    assignment_time_ms: ms_since(order_started),
                },
            };
            verdicts[input_idx] = Some(verdict);
        }

        let verdicts: Vec<OrderVerdict> = verdicts.into_iter().flatten().collect();
        let summary = BatchSummary {
            total_orders: request.orders.len(),
            assigned,
            unassigned: request.orders.len() - assigned,
            total_time_ms: ms_since(started),
            fast_mode_used: request.options.fast_mode,
        };
        info!(
            assigned = summary.assigned,
            unassigned = summary.unassigned,
            total_ms = summary.total_time_ms,
            "batch dispatch finished"
        );

        Ok(BatchResponse {
            verdicts,
            summary,
            fleet,
        })
    }

    fn batch_budget(&self, options: &BatchOptions) -> Duration {
        options
            .time_budget_s
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| self.config_ref().batch_budget)
    }

    fn single_order_cap(&self) -> Duration {
        self.config_ref().dispatch_budget
    }
}

/// Indices into the order list in processing order: input order, or urgency
/// order (priority bucket descending, then earliest deadline) when asked.
fn processing_order(orders: &[Order], priority_sort: bool) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..orders.len()).collect();
    if priority_sort {
        indices.sort_by(|&a, &b| {
            orders[b]
                .priority
                .cmp(&orders[a].priority)
                .then_with(|| orders[a].deadline.cmp(&orders[b].deadline))
                .then_with(|| a.cmp(&b))
        });
    }
    indices
}

fn commit_assignment(fleet: &mut [Vehicle], vehicle_id: &str, mut order: Order) {
    order.status = OrderStatus::Assigned;
    if let Some(vehicle) = fleet.iter_mut().find(|v| v.vehicle_id == vehicle_id) {
        vehicle.current_orders.push(order);
    }
}

fn budget_verdict(order: &Order) -> OrderVerdict {
    OrderVerdict {
        order_id: order.order_id.clone(),
        assigned_vehicle_id: None,
        score: None,
        failure_reason: Some(FailureReason::TimeBudgetExceeded),
        reasoning: vec!["batch time budget exhausted before this order".to_string()],
        assignment_time_ms: 0.0,
    }
}

/// First reasoning line of the top few candidates, for diagnostics.
fn top_reasons(scores: &[crate::models::AssignmentScore]) -> Vec<String> {
    scores
        .iter()
        .take(3)
        .filter_map(|s| {
            s.reasoning
                .first()
                .map(|r| format!("{}: {}", s.vehicle_id, r))
        })
        .collect()
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn remaining_secs(deadline: Instant, cap: Duration) -> f64 {
    deadline
        .saturating_duration_since(Instant::now())
        .min(cap)
        .as_secs_f64()
}
