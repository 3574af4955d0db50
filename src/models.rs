//! Domain model for the dispatch core.
//!
//! Every type here is constructed per request from JSON, flows through the
//! evaluation pipeline, and is discarded when the response is written. The
//! only mutation the crate ever performs is the batch loop appending an
//! assigned order to a vehicle's `current_orders` in its own fleet copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed per-stop overhead (unloading, signature, verification) in minutes.
pub const SERVICE_TIME_MIN: f64 = 5.0;

/// Radius used when an on-demand graph has to be built around a point.
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 5000.0;

/// Average speed assumed when a shortest-path query fails and travel time
/// falls back to a great-circle estimate.
pub const DEFAULT_AVG_SPEED_KPH: f64 = 30.0;

/// Geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether the coordinate lies in the valid WGS84 range.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Structured street address.
///
/// `number` is kept apart from `street` (the street field carries no trailing
/// numeric), and corner addresses are expressed through `corner_1`/`corner_2`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner_2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinate>,
}

impl Address {
    /// An address is resolvable if it already carries coordinates or enough
    /// text for a geocoder to work with.
    pub fn is_resolvable(&self) -> bool {
        self.coordinates.is_some() || !self.street.trim().is_empty()
    }
}

/// Delivery address as it arrives on the wire: either free text or a
/// structured record. The resolver produces a canonical structured form
/// before any scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressInput {
    Structured(Address),
    FreeText(String),
}

impl AddressInput {
    /// Coordinates, when the input already carries them.
    pub fn coordinates(&self) -> Option<Coordinate> {
        match self {
            AddressInput::Structured(addr) => addr.coordinates,
            AddressInput::FreeText(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[serde(alias = "medium")]
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    /// Additive urgency bump applied on top of the time-slack score.
    pub fn urgency_bump(self) -> f64 {
        match self {
            Priority::Low | Priority::Normal => 0.0,
            Priority::High => 0.05,
            Priority::Urgent => 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Assigned,
    Delivered,
    Failed,
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

/// A delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(alias = "id")]
    pub order_id: String,
    pub delivery: AddressInput,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub weight_kg: f64,
    /// Order-specific handling time at the door, beyond the fixed service time.
    #[serde(default)]
    pub estimated_duration_min: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: OrderStatus,
}

impl Order {
    /// Resolved delivery coordinates, if the address already carries them.
    pub fn location(&self) -> Option<Coordinate> {
        self.delivery.coordinates()
    }
}

fn default_performance() -> f64 {
    0.70
}

/// A fleet vehicle and its committed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(alias = "id")]
    pub vehicle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    pub current_location: Coordinate,
    /// Maximum number of simultaneously committed orders.
    #[serde(alias = "max_capacity")]
    pub capacity: u32,
    pub max_weight_kg: f64,
    /// Historical performance in [0, 1]. Out-of-range inputs are clamped at
    /// scoring time rather than rejected.
    #[serde(default = "default_performance")]
    pub performance_score: f64,
    #[serde(default)]
    pub current_orders: Vec<Order>,
}

impl Vehicle {
    pub fn current_load(&self) -> usize {
        self.current_orders.len()
    }

    pub fn available_capacity(&self) -> i64 {
        self.capacity as i64 - self.current_load() as i64
    }

    pub fn committed_weight_kg(&self) -> f64 {
        self.current_orders.iter().map(|o| o.weight_kg).sum()
    }

    pub fn remaining_weight_kg(&self) -> f64 {
        self.max_weight_kg - self.committed_weight_kg()
    }

    /// Available = at least one free slot and at least one kilogram of
    /// remaining weight budget.
    pub fn is_available(&self) -> bool {
        self.available_capacity() >= 1 && self.remaining_weight_kg() >= 1.0
    }
}

/// Score sheet for one (vehicle, order) pair.
///
/// `total_score` is always recomputed from the sub-scores and weights; it is
/// never treated as authoritative on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentScore {
    pub vehicle_id: String,
    pub distance_score: f64,
    pub capacity_score: f64,
    pub urgency_score: f64,
    pub compatibility_score: f64,
    pub performance_score: f64,
    pub interference_score: f64,
    pub total_score: f64,
    pub feasible: bool,
    /// Set when the score was produced without a full feasibility pass
    /// (fast mode). Approximate scores are never compared against exact ones.
    #[serde(default)]
    pub approximate: bool,
    /// Minutes from the evaluation clock to the new stop's ETA.
    pub estimated_arrival_min: f64,
    /// Route-duration delta caused by inserting the new stop.
    pub interference_min: f64,
    pub reasoning: Vec<String>,
}

/// One visit in a route: the start location or a delivery stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// `None` for the start sentinel.
    pub order_id: Option<String>,
    pub location: Coordinate,
    pub eta: DateTime<Utc>,
    pub on_time: bool,
    pub is_start: bool,
}

/// A sequenced route for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub vehicle_id: String,
    pub stops: Vec<Stop>,
    pub total_distance_m: f64,
    pub total_duration_min: f64,
    pub all_on_time: bool,
}

/// Outcome kind for a failed assignment. Serialized in kebab-case, matching
/// the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    UnresolvedAddress,
    NoCapacity,
    InfeasibleAll,
    TimeBudgetExceeded,
}
