//! dispatch-planner core
//!
//! Online dispatcher for last-mile delivery fleets: pick the vehicle that
//! can absorb a new order without breaking any committed deadline, batch
//! many orders against one fleet, or resequence one vehicle's stops.

pub mod audit;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod feasibility;
pub mod geocode;
pub mod graph;
pub mod haversine;
pub mod models;
pub mod network;
pub mod overpass;
pub mod scoring;
pub mod sequencer;
pub mod traits;
pub mod zones;

pub use batch::{BatchOptions, BatchRequest, BatchResponse};
pub use config::{DispatchConfig, ScoringWeights, SharedConfig};
pub use dispatch::{DispatchOptions, DispatchRequest, DispatchResponse, Dispatcher};
pub use models::{
    AssignmentScore, Coordinate, FailureReason, Order, Priority, Route, Vehicle,
};
pub use traits::{TravelEstimate, TravelTimeProvider};
pub use zones::ZoneMap;
