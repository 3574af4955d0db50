//! Delivery sequencing under deadlines.
//!
//! Given a start location and a set of stops with deadlines, find the
//! delivery order minimizing total duration subject to every deadline
//! holding. Small stop counts are solved exactly by permutation search;
//! larger ones by a deadline-aware nearest-neighbor construction improved
//! with 2-opt and relocate moves, all under a caller-supplied wall-clock
//! budget. When no sequence meets every deadline, the sequence with the
//! fewest violations (ties broken by duration) is returned with
//! `all_on_time = false`.
//!
//! # ETA model
//!
//! ```text
//! eta[i] = eta[i-1] + travel(prev, stop) + service_time + stop.duration
//! ```
//!
//! The start stop's ETA is the evaluation clock; the start contributes
//! travel time to the first delivery only, never service time.

use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::config::DispatchConfig;
use crate::models::{Coordinate, Order, Stop};
use crate::traits::{TravelEstimate, TravelTimeProvider};

/// One stop handed to the sequencer: an order plus its resolved location.
#[derive(Debug, Clone, Copy)]
pub struct SequenceStop<'a> {
    pub order: &'a Order,
    pub location: Coordinate,
}

/// A sequenced route with per-stop ETAs.
#[derive(Debug, Clone)]
pub struct SequencedRoute {
    /// Delivery order, as order ids.
    pub order_ids: Vec<String>,
    /// Start sentinel followed by delivery stops in traversal order.
    pub stops: Vec<Stop>,
    pub total_duration_min: f64,
    pub total_distance_m: f64,
    pub all_on_time: bool,
    pub violations: usize,
    /// Earliest stop (in traversal order) missing its deadline.
    pub first_violation: Option<String>,
}

impl SequencedRoute {
    fn empty(start: Coordinate, clock: DateTime<Utc>) -> Self {
        Self {
            order_ids: Vec::new(),
            stops: vec![start_stop(start, clock)],
            total_duration_min: 0.0,
            total_distance_m: 0.0,
            all_on_time: true,
            violations: 0,
            first_violation: None,
        }
    }
}

/// Sequence `stops` from `start`, honoring `budget` cooperatively: on expiry
/// the best sequence found so far is returned.
pub fn sequence_route<P: TravelTimeProvider>(
    start: Coordinate,
    stops: &[SequenceStop<'_>],
    clock: DateTime<Utc>,
    provider: &P,
    config: &DispatchConfig,
    budget: Instant,
) -> SequencedRoute {
    if stops.is_empty() {
        return SequencedRoute::empty(start, clock);
    }

    let plan = Plan::new(start, stops, clock, provider, config);
    let sequence = if stops.len() <= config.exact_sequence_limit {
        best_permutation(&plan, budget)
    } else {
        let constructed = greedy_construct(&plan);
        improve(&plan, constructed, budget)
    };
    plan.into_route(&sequence)
}

fn start_stop(start: Coordinate, clock: DateTime<Utc>) -> Stop {
    Stop {
        order_id: None,
        location: start,
        eta: clock,
        on_time: true,
        is_start: true,
    }
}

/// Precomputed travel matrix and deadline offsets for one sequencing call.
struct Plan<'a> {
    stops: &'a [SequenceStop<'a>],
    clock: DateTime<Utc>,
    start: Coordinate,
    /// Matrix over [start] + stop locations; index 0 is the start.
    matrix: Vec<Vec<TravelEstimate>>,
    /// Minutes from the clock to each stop's deadline.
    deadline_min: Vec<f64>,
    service_time_min: f64,
}

/// Simulation outcome for one candidate sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Outcome {
    violations: usize,
    duration_min: f64,
    distance_m: f64,
    first_violation: Option<usize>,
}

impl Outcome {
    /// Fewest violations first, then shortest duration.
    fn better_than(&self, other: &Outcome) -> bool {
        self.violations < other.violations
            || (self.violations == other.violations && self.duration_min < other.duration_min)
    }
}

impl<'a> Plan<'a> {
    fn new<P: TravelTimeProvider>(
        start: Coordinate,
        stops: &'a [SequenceStop<'a>],
        clock: DateTime<Utc>,
        provider: &P,
        config: &DispatchConfig,
    ) -> Self {
        let mut points = Vec::with_capacity(stops.len() + 1);
        points.push(start);
        points.extend(stops.iter().map(|s| s.location));
        let matrix = provider.travel_matrix(&points);
        let deadline_min = stops
            .iter()
            .map(|s| minutes_between(clock, s.order.deadline))
            .collect();
        Self {
            stops,
            clock,
            start,
            matrix,
            deadline_min,
            service_time_min: config.service_time_min,
        }
    }

    fn simulate(&self, sequence: &[usize]) -> Outcome {
        let mut elapsed_min = 0.0;
        let mut distance_m = 0.0;
        let mut violations = 0;
        let mut first_violation = None;
        let mut position = 0usize; // matrix index, 0 = start

        for (rank, &stop_idx) in sequence.iter().enumerate() {
            let leg = self.matrix[position][stop_idx + 1];
            elapsed_min += leg.minutes
                + self.service_time_min
                + self.stops[stop_idx].order.estimated_duration_min;
            distance_m += leg.distance_m;
            if elapsed_min > self.deadline_min[stop_idx] {
                violations += 1;
                if first_violation.is_none() {
                    first_violation = Some(rank);
                }
            }
            position = stop_idx + 1;
        }

        Outcome {
            violations,
            duration_min: elapsed_min,
            distance_m,
            first_violation,
        }
    }

    fn into_route(self, sequence: &[usize]) -> SequencedRoute {
        let outcome = self.simulate(sequence);
        let mut stops = Vec::with_capacity(sequence.len() + 1);
        stops.push(start_stop(self.start, self.clock));

        let mut elapsed_min = 0.0;
        let mut position = 0usize;
        for &stop_idx in sequence {
            let item = &self.stops[stop_idx];
            let leg = self.matrix[position][stop_idx + 1];
            elapsed_min +=
                leg.minutes + self.service_time_min + item.order.estimated_duration_min;
            stops.push(Stop {
                order_id: Some(item.order.order_id.clone()),
                location: item.location,
                eta: self.clock + minutes_duration(elapsed_min),
                on_time: elapsed_min <= self.deadline_min[stop_idx],
                is_start: false,
            });
            position = stop_idx + 1;
        }

        SequencedRoute {
            order_ids: sequence
                .iter()
                .map(|&i| self.stops[i].order.order_id.clone())
                .collect(),
            stops,
            total_duration_min: outcome.duration_min,
            total_distance_m: outcome.distance_m,
            all_on_time: outcome.violations == 0,
            violations: outcome.violations,
            first_violation: outcome
                .first_violation
                .map(|rank| self.stops[sequence[rank]].order.order_id.clone()),
        }
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

fn minutes_duration(minutes: f64) -> ChronoDuration {
    ChronoDuration::milliseconds((minutes * 60_000.0).round() as i64)
}

// -----------------------------------------------------------------------------
// Exact search (n <= exact_sequence_limit)
// -----------------------------------------------------------------------------

fn best_permutation(plan: &Plan<'_>, budget: Instant) -> Vec<usize> {
    let n = plan.stops.len();
    let identity: Vec<usize> = (0..n).collect();
    let mut best = identity.clone();
    let mut best_outcome = plan.simulate(&identity);

    let mut current = identity;
    let mut counters = vec![0usize; n];
    let mut i = 1;
    // Heap's algorithm; the identity permutation was already evaluated.
    while i < n {
        if counters[i] < i {
            if i % 2 == 0 {
                current.swap(0, i);
            } else {
                current.swap(counters[i], i);
            }
            let outcome = plan.simulate(&current);
            if outcome.better_than(&best_outcome) {
                best_outcome = outcome;
                best = current.clone();
            }
            counters[i] += 1;
            i = 1;
            if Instant::now() >= budget {
                break;
            }
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
    best
}

// -----------------------------------------------------------------------------
// Heuristic (n > exact_sequence_limit)
// -----------------------------------------------------------------------------

/// Deadline-aware nearest neighbor: take the closest stop that can still be
/// reached on time; when none can, take the one with the earliest deadline.
fn greedy_construct(plan: &Plan<'_>) -> Vec<usize> {
    let n = plan.stops.len();
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut sequence = Vec::with_capacity(n);
    let mut elapsed_min = 0.0;
    let mut position = 0usize;

    while let Some(&first) = remaining.first() {
        let reachable = remaining
            .iter()
            .copied()
            .filter(|&idx| arrival_at(plan, elapsed_min, position, idx) <= plan.deadline_min[idx])
            .min_by(|&a, &b| {
                plan.matrix[position][a + 1]
                    .minutes
                    .total_cmp(&plan.matrix[position][b + 1].minutes)
            });
        let pick = reachable.unwrap_or_else(|| {
            remaining
                .iter()
                .copied()
                .min_by(|&a, &b| plan.deadline_min[a].total_cmp(&plan.deadline_min[b]))
                .unwrap_or(first)
        });

        elapsed_min = arrival_at(plan, elapsed_min, position, pick);
        position = pick + 1;
        remaining.retain(|&idx| idx != pick);
        sequence.push(pick);
    }
    sequence
}

fn arrival_at(plan: &Plan<'_>, elapsed_min: f64, position: usize, stop_idx: usize) -> f64 {
    elapsed_min
        + plan.matrix[position][stop_idx + 1].minutes
        + plan.service_time_min
        + plan.stops[stop_idx].order.estimated_duration_min
}

/// First-improvement 2-opt and relocate passes. A move is accepted only when
/// it strictly improves (violations, duration), so violations never increase
/// and the loop terminates.
fn improve(plan: &Plan<'_>, mut sequence: Vec<usize>, budget: Instant) -> Vec<usize> {
    let mut outcome = plan.simulate(&sequence);
    let n = sequence.len();
    let mut improved = true;

    while improved && Instant::now() < budget {
        improved = false;

        // 2-opt: reverse the segment [i..=j].
        'two_opt: for i in 0..n.saturating_sub(1) {
            for j in i + 1..n {
                sequence[i..=j].reverse();
                let candidate = plan.simulate(&sequence);
                if candidate.better_than(&outcome) {
                    outcome = candidate;
                    improved = true;
                } else {
                    sequence[i..=j].reverse();
                }
                if Instant::now() >= budget {
                    break 'two_opt;
                }
            }
        }

        // Relocate: move one stop to another slot.
        'relocate: for from in 0..n {
            for to in 0..n {
                if from == to {
                    continue;
                }
                let stop = sequence.remove(from);
                sequence.insert(to, stop);
                let candidate = plan.simulate(&sequence);
                if candidate.better_than(&outcome) {
                    outcome = candidate;
                    improved = true;
                } else {
                    let stop = sequence.remove(to);
                    sequence.insert(from, stop);
                }
                if Instant::now() >= budget {
                    break 'relocate;
                }
            }
        }
    }
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, AddressInput, OrderStatus, Priority};
    use chrono::TimeZone;
    use std::time::Duration;

    /// Planar provider: one degree of separation is one minute of driving
    /// (Manhattan metric), which keeps expected ETAs easy to read.
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

    fn order(id: &str, deadline_min: i64) -> Order {
        Order {
            order_id: id.to_string(),
            delivery: AddressInput::Structured(Address::default()),
            deadline: clock() + ChronoDuration::minutes(deadline_min),
            priority: Priority::Normal,
            weight_kg: 1.0,
            estimated_duration_min: 0.0,
            created_at: clock(),
            status: OrderStatus::Pending,
        }
    }

    fn far_budget() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn run(
        start: Coordinate,
        items: &[(Order, Coordinate)],
    ) -> SequencedRoute {
        let stops: Vec<SequenceStop<'_>> = items
            .iter()
            .map(|(order, location)| SequenceStop {
                order,
                location: *location,
            })
            .collect();
        sequence_route(
            start,
            &stops,
            clock(),
            &ManhattanMinutes,
            &DispatchConfig::default(),
            far_budget(),
        )
    }

    #[test]
    fn empty_input_yields_start_only_route() {
        let route = run(Coordinate::new(0.0, 0.0), &[]);
        assert_eq!(route.stops.len(), 1);
        assert!(route.stops[0].is_start);
        assert!(route.all_on_time);
        assert_eq!(route.total_duration_min, 0.0);
    }

    #[test]
    fn exact_picks_shortest_feasible_order() {
        // Stops on a line at 1, 2, 3 degrees: visiting in order is optimal.
        let items = vec![
            (order("b", 600), Coordinate::new(0.0, 2.0)),
            (order("c", 600), Coordinate::new(0.0, 3.0)),
            (order("a", 600), Coordinate::new(0.0, 1.0)),
        ];
        let route = run(Coordinate::new(0.0, 0.0), &items);
        assert_eq!(route.order_ids, vec!["a", "b", "c"]);
        assert!(route.all_on_time);
        // 3 min travel + 3 * 5 min service.
        assert!((route.total_duration_min - 18.0).abs() < 1e-9);
    }

    #[test]
    fn deadline_forces_detour() {
        // "far" is 10 degrees out but has the tight deadline; the cheap
        // nearest-first order would miss it.
        let items = vec![
            (order("near", 600), Coordinate::new(0.0, 1.0)),
            (order("far", 16), Coordinate::new(0.0, 10.0)),
        ];
        let route = run(Coordinate::new(0.0, 0.0), &items);
        assert_eq!(route.order_ids, vec!["far", "near"]);
        assert!(route.all_on_time);
    }

    #[test]
    fn infeasible_set_reports_fewest_violations() {
        // Two stops in opposite directions, both with deadlines only one of
        // them can meet.
        let items = vec![
            (order("east", 8), Coordinate::new(0.0, 2.0)),
            (order("west", 8), Coordinate::new(0.0, -2.0)),
        ];
        let route = run(Coordinate::new(0.0, 0.0), &items);
        assert!(!route.all_on_time);
        assert_eq!(route.violations, 1);
        assert!(route.first_violation.is_some());
    }

    #[test]
    fn output_preserves_stop_multiset() {
        let items: Vec<(Order, Coordinate)> = (0..12)
            .map(|i| {
                (
                    order(&format!("o{i}"), 600),
                    Coordinate::new((i % 4) as f64, (i / 4) as f64),
                )
            })
            .collect();
        let route = run(Coordinate::new(0.0, 0.0), &items);

        let mut expected: Vec<String> = items.iter().map(|(o, _)| o.order_id.clone()).collect();
        let mut actual = route.order_ids.clone();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        assert_eq!(route.stops.len(), items.len() + 1);
    }

    #[test]
    fn etas_are_monotonic_with_service_gap() {
        let items: Vec<(Order, Coordinate)> = (0..10)
            .map(|i| (order(&format!("o{i}"), 600), Coordinate::new(i as f64, 1.0)))
            .collect();
        let route = run(Coordinate::new(0.0, 0.0), &items);
        for pair in route.stops.windows(2) {
            let gap = pair[1].eta - pair[0].eta;
            assert!(
                gap >= ChronoDuration::minutes(5),
                "eta gap below service time: {gap}"
            );
        }
    }

    #[test]
    fn heuristic_matches_exact_on_line_instance() {
        // 9 stops on a line exceeds the exact limit; the heuristic should
        // still find the straight sweep.
        let items: Vec<(Order, Coordinate)> = (0..9)
            .map(|i| {
                (
                    order(&format!("o{i}"), 600),
                    Coordinate::new(0.0, (i + 1) as f64),
                )
            })
            .collect();
        let route = run(Coordinate::new(0.0, 0.0), &items);
        // Straight sweep: 9 min travel + 9 * 5 min service.
        assert!((route.total_duration_min - 54.0).abs() < 1e-9);
        assert!(route.all_on_time);
    }

    #[test]
    fn expired_budget_still_returns_a_complete_sequence() {
        let items: Vec<(Order, Coordinate)> = (0..10)
            .map(|i| (order(&format!("o{i}"), 600), Coordinate::new(i as f64, 2.0)))
            .collect();
        let stops: Vec<SequenceStop<'_>> = items
            .iter()
            .map(|(order, location)| SequenceStop {
                order,
                location: *location,
            })
            .collect();
        let route = sequence_route(
            Coordinate::new(0.0, 0.0),
            &stops,
            clock(),
            &ManhattanMinutes,
            &DispatchConfig::default(),
            Instant::now(), // already expired
        );
        assert_eq!(route.stops.len(), items.len() + 1);
        assert_eq!(route.order_ids.len(), items.len());
    }

    #[test]
    fn per_order_handling_time_extends_eta() {
        let mut slow = order("slow", 600);
        slow.estimated_duration_min = 12.0;
        let items = vec![(slow, Coordinate::new(0.0, 1.0))];
        let route = run(Coordinate::new(0.0, 0.0), &items);
        // 1 min travel + 5 min service + 12 min handling.
        assert!((route.total_duration_min - 18.0).abs() < 1e-9);
    }
}
