//! Test fixtures for dispatch-planner.
//!
//! Builders for orders, vehicles, and fleets with sensible defaults, plus
//! deterministic travel-time providers: a Manhattan metric (1 degree = 1
//! minute) for arithmetic-friendly assertions and a great-circle provider at
//! the crate's fallback speed for realistic coordinates.

#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use dispatch_planner::haversine;
use dispatch_planner::models::{
    Address, AddressInput, Coordinate, Order, OrderStatus, Priority, Vehicle,
};
use dispatch_planner::traits::{TravelEstimate, TravelTimeProvider};
use dispatch_planner::zones::{Zone, ZoneMap};

/// Fixed evaluation clock shared by all scenario tests.
pub fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap()
}

// ============================================================================
// Travel-time providers
// ============================================================================

/// Manhattan metric: one degree of separation is one minute of driving.
pub struct ManhattanMinutes;

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

/// Great-circle minutes at 30 km/h, mirroring the crate's fallback regime.
pub struct PlanarMinutes;

impl TravelTimeProvider for PlanarMinutes {
    fn travel_time(&self, from: Coordinate, to: Coordinate) -> TravelEstimate {
        let distance_m = haversine::distance_m(from, to);
        TravelEstimate {
            minutes: distance_m / 1000.0 / 30.0 * 60.0,
            distance_m,
            approximate: false,
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Builder for test orders with sensible defaults.
pub struct OrderBuilder {
    order: Order,
}

pub fn order(id: &str) -> OrderBuilder {
    OrderBuilder {
        order: Order {
            order_id: id.to_string(),
            delivery: AddressInput::Structured(Address {
                coordinates: Some(Coordinate::new(0.0, 0.0)),
                ..Address::default()
            }),
            deadline: clock() + ChronoDuration::hours(4),
            priority: Priority::Normal,
            weight_kg: 1.0,
            estimated_duration_min: 0.0,
            created_at: clock() - ChronoDuration::minutes(10),
            status: OrderStatus::Pending,
        },
    }
}

impl OrderBuilder {
    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.order.delivery = AddressInput::Structured(Address {
            coordinates: Some(Coordinate::new(lat, lon)),
            ..Address::default()
        });
        self
    }

    pub fn free_text(mut self, text: &str) -> Self {
        self.order.delivery = AddressInput::FreeText(text.to_string());
        self
    }

    pub fn deadline_in(mut self, minutes: i64) -> Self {
        self.order.deadline = clock() + ChronoDuration::minutes(minutes);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.order.priority = priority;
        self
    }

    pub fn weight(mut self, kg: f64) -> Self {
        self.order.weight_kg = kg;
        self
    }

    pub fn handling(mut self, minutes: f64) -> Self {
        self.order.estimated_duration_min = minutes;
        self
    }

    pub fn build(self) -> Order {
        self.order
    }
}

/// Builder for test vehicles with sensible defaults.
pub struct VehicleBuilder {
    vehicle: Vehicle,
}

pub fn vehicle(id: &str) -> VehicleBuilder {
    VehicleBuilder {
        vehicle: Vehicle {
            vehicle_id: id.to_string(),
            driver_name: None,
            current_location: Coordinate::new(0.0, 0.0),
            capacity: 6,
            max_weight_kg: 100.0,
            performance_score: 0.8,
            current_orders: Vec::new(),
        },
    }
}

impl VehicleBuilder {
    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.vehicle.current_location = Coordinate::new(lat, lon);
        self
    }

    pub fn capacity(mut self, capacity: u32) -> Self {
        self.vehicle.capacity = capacity;
        self
    }

    pub fn max_weight(mut self, kg: f64) -> Self {
        self.vehicle.max_weight_kg = kg;
        self
    }

    pub fn performance(mut self, score: f64) -> Self {
        self.vehicle.performance_score = score;
        self
    }

    pub fn committed(mut self, mut order: Order) -> Self {
        order.status = OrderStatus::Assigned;
        self.vehicle.current_orders.push(order);
        self
    }

    pub fn build(self) -> Vehicle {
        self.vehicle
    }
}

// ============================================================================
// Zone maps
// ============================================================================

/// Two-zone map with no adjacency between the zones: CENTRO around the
/// origin, REMOTO a few degrees away. Orders far from both fall outside the
/// partition.
pub fn split_zones() -> ZoneMap {
    let zones = vec![
        Zone {
            name: "CENTRO".to_string(),
            north: 0.5,
            south: -0.5,
            east: 0.5,
            west: -0.5,
        },
        Zone {
            name: "REMOTO".to_string(),
            north: 5.5,
            south: 4.5,
            east: 5.5,
            west: 4.5,
        },
    ];
    ZoneMap::new(zones, HashMap::new())
}

/// A zone map whose partition covers nothing near the test coordinates, so
/// the filter is disabled for every call.
pub fn no_zones() -> ZoneMap {
    ZoneMap::new(Vec::new(), HashMap::new())
}
