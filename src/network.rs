//! Road-network provider: preloaded metro graph, on-demand area graphs, and
//! the great-circle fallback.
//!
//! The provider is the crate's only gateway to travel times. It owns one
//! optional preloaded graph spanning the deployment's metro area plus a cache
//! of smaller on-demand graphs keyed by bounding box; concurrent requests for
//! the same area coalesce on a per-box single-flight slot. Graphs are cached;
//! estimates never are.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::graph::{BoundingBox, GraphError, RoadGraph, SpeedProfile};
use crate::haversine::GreatCircleEstimator;
use crate::models::{Coordinate, DEFAULT_AVG_SPEED_KPH, DEFAULT_SEARCH_RADIUS_M};
use crate::overpass::{OverpassClient, OverpassConfig, OverpassError};
use crate::traits::{TravelEstimate, TravelTimeProvider};

#[derive(Debug)]
pub enum NetworkError {
    Overpass(OverpassError),
    Graph(GraphError),
    /// The HTTP client could not be constructed.
    Client(reqwest::Error),
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::Overpass(e) => write!(f, "overpass: {}", e),
            NetworkError::Graph(e) => write!(f, "graph: {}", e),
            NetworkError::Client(e) => write!(f, "http client: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<OverpassError> for NetworkError {
    fn from(e: OverpassError) -> Self {
        NetworkError::Overpass(e)
    }
}

impl From<GraphError> for NetworkError {
    fn from(e: GraphError) -> Self {
        NetworkError::Graph(e)
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub overpass: OverpassConfig,
    pub speeds: SpeedProfile,
    /// Speed for great-circle fallback estimates.
    pub fallback_speed_kph: f64,
    /// Radius for on-demand graphs built around a point.
    pub search_radius_m: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            overpass: OverpassConfig::default(),
            speeds: SpeedProfile::default(),
            fallback_speed_kph: DEFAULT_AVG_SPEED_KPH,
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
        }
    }
}

/// Cache key: bounding box rounded to ~10 m so jittered requests for the
/// same area hit the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GraphKey {
    north: i64,
    south: i64,
    east: i64,
    west: i64,
}

impl GraphKey {
    fn from_bbox(bbox: BoundingBox) -> Self {
        let q = |deg: f64| (deg * 10_000.0).round() as i64;
        Self {
            north: q(bbox.north),
            south: q(bbox.south),
            east: q(bbox.east),
            west: q(bbox.west),
        }
    }
}

type GraphSlot = Arc<Mutex<Option<Arc<RoadGraph>>>>;

pub struct NetworkProvider {
    client: OverpassClient,
    config: NetworkConfig,
    fallback: GreatCircleEstimator,
    preloaded: RwLock<Option<Arc<RoadGraph>>>,
    on_demand: Mutex<HashMap<GraphKey, GraphSlot>>,
}

impl NetworkProvider {
    pub fn new(config: NetworkConfig) -> Result<Self, NetworkError> {
        let client = OverpassClient::new(config.overpass.clone()).map_err(NetworkError::Client)?;
        let fallback = GreatCircleEstimator::new(config.fallback_speed_kph);
        Ok(Self {
            client,
            config,
            fallback,
            preloaded: RwLock::new(None),
            on_demand: Mutex::new(HashMap::new()),
        })
    }

    /// Build and retain the metro-area graph. Idempotent: a second call with
    /// a graph already loaded is a no-op. Failure is non-fatal; the provider
    /// keeps working in on-demand mode.
    pub fn preload(&self, bbox: BoundingBox) -> Result<(), NetworkError> {
        if self.preloaded().is_some() {
            debug!("preload skipped, metro graph already loaded");
            return Ok(());
        }
        info!(
            north = bbox.north,
            south = bbox.south,
            east = bbox.east,
            west = bbox.west,
            "preloading metro graph"
        );
        match self.fetch_graph(bbox) {
            Ok(graph) => {
                info!(nodes = graph.node_count(), "metro graph preloaded");
                *self.preloaded.write().unwrap_or_else(|e| e.into_inner()) = Some(graph);
                Ok(())
            }
            Err(e) => {
                warn!("metro preload failed, degrading to on-demand graphs: {e}");
                Err(e)
            }
        }
    }

    fn preloaded(&self) -> Option<Arc<RoadGraph>> {
        self.preloaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Graph covering an area: the preloaded graph when the center lies
    /// inside its box, else an on-demand graph built (once) for the area.
    pub fn graph_for_area(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Arc<RoadGraph>, NetworkError> {
        if let Some(graph) = self.preloaded() {
            if graph.bbox().contains(center) {
                return Ok(graph);
            }
        }
        let bbox = BoundingBox::around(center, radius_m);
        let key = GraphKey::from_bbox(bbox);

        // Per-box single-flight: take the slot for this key, then fetch while
        // holding only the slot lock so other areas proceed in parallel.
        let slot = {
            let mut cache = self.on_demand.lock().unwrap_or_else(|e| e.into_inner());
            cache.entry(key).or_default().clone()
        };
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(graph) = guard.as_ref() {
            return Ok(graph.clone());
        }
        debug!(lat = center.lat, lon = center.lon, radius_m, "building on-demand graph");
        let graph = self.fetch_graph(bbox)?;
        *guard = Some(graph.clone());
        Ok(graph)
    }

    fn fetch_graph(&self, bbox: BoundingBox) -> Result<Arc<RoadGraph>, NetworkError> {
        let extract = self.client.fetch_drive_network(bbox)?;
        let graph = RoadGraph::from_extract(&extract, bbox, &self.config.speeds)?;
        Ok(Arc::new(graph))
    }

    fn fallback_estimate(&self, from: Coordinate, to: Coordinate) -> TravelEstimate {
        self.fallback.travel_time(from, to)
    }
}

impl TravelTimeProvider for NetworkProvider {
    /// Travel time between two coordinates. Any failure along the way (no
    /// graph, no node, no directed path) degrades to the great-circle
    /// estimate flagged approximate; path-not-found is not an error at this
    /// boundary.
    fn travel_time(&self, from: Coordinate, to: Coordinate) -> TravelEstimate {
        let graph = match self.graph_for_area(from, self.config.search_radius_m) {
            Ok(graph) => graph,
            Err(e) => {
                debug!("no graph available ({e}), using great-circle estimate");
                return self.fallback_estimate(from, to);
            }
        };
        match graph.route_between(from, to) {
            Some(path) => TravelEstimate {
                minutes: path.travel_time_min,
                distance_m: path.distance_m,
                approximate: false,
            },
            None => {
                debug!("no path between endpoints, using great-circle estimate");
                self.fallback_estimate(from, to)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_key_rounds_jittered_boxes_together() {
        // Sub-meter jitter in the request center must hit the same slot.
        let a = BoundingBox::around(Coordinate::new(-34.9000, -56.1600), 5000.0);
        let b = BoundingBox::around(Coordinate::new(-34.900001, -56.160001), 5000.0);
        assert_eq!(GraphKey::from_bbox(a), GraphKey::from_bbox(b));
    }

    #[test]
    fn graph_key_separates_distinct_areas() {
        let a = BoundingBox::around(Coordinate::new(-34.90, -56.16), 5000.0);
        let b = BoundingBox::around(Coordinate::new(-34.70, -56.16), 5000.0);
        assert_ne!(GraphKey::from_bbox(a), GraphKey::from_bbox(b));
    }

    // Network-touching paths (preload, on-demand fetch) are covered by the
    // ignored integration test in tests/network_integration.rs.
}
