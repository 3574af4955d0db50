//! Directed street graph and shortest-path queries.
//!
//! Built from an Overpass extract: one-way tags produce directed edges, edge
//! weights are travel seconds at a realistic speed for the way class, and
//! nearest-node lookup runs on an R-tree over node positions. The graph is
//! read-only after construction and safely shareable across workers.

use std::collections::HashMap;

use rstar::primitives::GeomWithData;
use rstar::RTree;

use crate::haversine;
use crate::models::Coordinate;
use crate::overpass::{OsmWay, OverpassExtract};

/// Geographic bounding box, `(north, south, east, west)` in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: Coordinate) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lon >= self.west
            && point.lon <= self.east
    }

    /// Box spanning `radius_m` in every direction around a center point.
    pub fn around(center: Coordinate, radius_m: f64) -> Self {
        // One degree of latitude is ~111.32 km; longitude shrinks with cos(lat).
        let lat_delta = radius_m / 111_320.0;
        let lon_scale = center.lat.to_radians().cos().max(0.01);
        let lon_delta = radius_m / (111_320.0 * lon_scale);
        Self {
            north: center.lat + lat_delta,
            south: center.lat - lat_delta,
            east: center.lon + lon_delta,
            west: center.lon - lon_delta,
        }
    }
}

/// Realistic urban speeds per OSM highway class, in km/h.
///
/// Values already account for signals, crossings, and stop-and-go traffic;
/// posted maxspeed values are scaled down to the same regime.
#[derive(Debug, Clone)]
pub struct SpeedProfile {
    defaults_kph: HashMap<&'static str, f64>,
    pub fallback_kph: f64,
    /// Extra correction for signal-dense city cores.
    pub urban_factor: f64,
    /// Fraction of a posted maxspeed actually achieved.
    pub maxspeed_factor: f64,
}

impl Default for SpeedProfile {
    fn default() -> Self {
        let defaults_kph = HashMap::from([
            ("motorway", 60.0),
            ("trunk", 45.0),
            ("primary", 35.0),
            ("secondary", 28.0),
            ("tertiary", 25.0),
            ("residential", 22.0),
            ("living_street", 15.0),
            ("service", 15.0),
            ("unclassified", 25.0),
        ]);
        Self {
            defaults_kph,
            fallback_kph: 30.0,
            urban_factor: 0.85,
            maxspeed_factor: 0.75,
        }
    }
}

impl SpeedProfile {
    /// Effective speed for a way, from its maxspeed tag when parseable, else
    /// its highway class.
    pub fn speed_for(&self, tags: &HashMap<String, String>) -> f64 {
        if let Some(max) = tags.get("maxspeed").and_then(|s| parse_maxspeed_kph(s)) {
            return max * self.maxspeed_factor;
        }
        let class = tags
            .get("highway")
            .map(|h| h.trim_end_matches("_link"))
            .unwrap_or("");
        self.defaults_kph
            .get(class)
            .copied()
            .unwrap_or(self.fallback_kph)
    }
}

fn parse_maxspeed_kph(raw: &str) -> Option<f64> {
    // Tags look like "60", "60 km/h", or "35 mph".
    let mut parts = raw.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let kph = match parts.next() {
        Some("mph") => value * 1.609,
        _ => value,
    };
    (kph > 0.0).then_some(kph)
}

#[derive(Debug)]
pub enum GraphError {
    /// The extract had no usable edges after filtering.
    NoEdges,
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::NoEdges => write!(f, "extract produced no routable edges"),
        }
    }
}

impl std::error::Error for GraphError {}

#[derive(Debug, Clone, Copy)]
struct Edge {
    to: usize,
    travel_ms: u64,
    length_m: f64,
}

/// Shortest-path result between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSummary {
    pub travel_time_min: f64,
    pub distance_m: f64,
}

type IndexedNode = GeomWithData<[f64; 2], usize>;

/// Directed, weighted street graph.
pub struct RoadGraph {
    positions: Vec<Coordinate>,
    adjacency: Vec<Vec<Edge>>,
    index: RTree<IndexedNode>,
    bbox: BoundingBox,
}

impl RoadGraph {
    pub fn from_extract(
        extract: &OverpassExtract,
        bbox: BoundingBox,
        speeds: &SpeedProfile,
    ) -> Result<Self, GraphError> {
        let mut osm_to_idx: HashMap<i64, usize> = HashMap::new();
        let mut positions = Vec::new();
        for node in &extract.nodes {
            osm_to_idx.entry(node.id).or_insert_with(|| {
                positions.push(Coordinate::new(node.lat, node.lon));
                positions.len() - 1
            });
        }

        let mut adjacency: Vec<Vec<Edge>> = vec![Vec::new(); positions.len()];
        let mut edge_count = 0usize;
        for way in &extract.ways {
            let speed_kph = speeds.speed_for(&way.tags) * speeds.urban_factor;
            let speed_ms = speed_kph * 1000.0 / 3600.0;
            let direction = way_direction(way);

            for pair in way.nodes.windows(2) {
                let (Some(&a), Some(&b)) = (osm_to_idx.get(&pair[0]), osm_to_idx.get(&pair[1]))
                else {
                    continue;
                };
                let length_m = haversine::distance_m(positions[a], positions[b]);
                let travel_ms = ((length_m / speed_ms) * 1000.0).round() as u64;
                let edge = |to| Edge {
                    to,
                    travel_ms,
                    length_m,
                };
                match direction {
                    WayDirection::Forward => adjacency[a].push(edge(b)),
                    WayDirection::Backward => adjacency[b].push(edge(a)),
                    WayDirection::Both => {
                        adjacency[a].push(edge(b));
                        adjacency[b].push(edge(a));
                    }
                }
                edge_count += 1;
            }
        }
        if edge_count == 0 {
            return Err(GraphError::NoEdges);
        }

        let index = RTree::bulk_load(
            positions
                .iter()
                .enumerate()
                .map(|(idx, p)| IndexedNode::new([p.lon, p.lat], idx))
                .collect(),
        );

        Ok(Self {
            positions,
            adjacency,
            index,
            bbox,
        })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    /// Planar nearest node to a coordinate.
    pub fn nearest_node(&self, point: Coordinate) -> Option<usize> {
        self.index
            .nearest_neighbor(&[point.lon, point.lat])
            .map(|n| n.data)
    }

    pub fn node_location(&self, node: usize) -> Coordinate {
        self.positions[node]
    }

    /// Dijkstra over travel time. Returns `None` when no directed path exists.
    pub fn shortest_path(&self, from: usize, to: usize) -> Option<PathSummary> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        if from == to {
            return Some(PathSummary {
                travel_time_min: 0.0,
                distance_m: 0.0,
            });
        }

        let n = self.positions.len();
        let mut best_ms = vec![u64::MAX; n];
        let mut dist_m = vec![0.0f64; n];
        let mut heap = BinaryHeap::new();
        best_ms[from] = 0;
        heap.push(Reverse((0u64, from)));

        while let Some(Reverse((cost_ms, node))) = heap.pop() {
            if node == to {
                return Some(PathSummary {
                    travel_time_min: cost_ms as f64 / 60_000.0,
                    distance_m: dist_m[node],
                });
            }
            if cost_ms > best_ms[node] {
                continue;
            }
            for edge in &self.adjacency[node] {
                let next_ms = cost_ms + edge.travel_ms;
                if next_ms < best_ms[edge.to] {
                    best_ms[edge.to] = next_ms;
                    dist_m[edge.to] = dist_m[node] + edge.length_m;
                    heap.push(Reverse((next_ms, edge.to)));
                }
            }
        }
        None
    }

    /// Shortest travel time between two coordinates through their nearest
    /// nodes.
    pub fn route_between(&self, from: Coordinate, to: Coordinate) -> Option<PathSummary> {
        let from_node = self.nearest_node(from)?;
        let to_node = self.nearest_node(to)?;
        self.shortest_path(from_node, to_node)
    }
}

enum WayDirection {
    Forward,
    Backward,
    Both,
}

fn way_direction(way: &OsmWay) -> WayDirection {
    match way.tags.get("oneway").map(String::as_str) {
        Some("yes") | Some("true") | Some("1") => WayDirection::Forward,
        Some("-1") | Some("reverse") => WayDirection::Backward,
        Some("no") => WayDirection::Both,
        _ => {
            // Roundabouts are implicitly one-way.
            if way.tags.get("junction").map(String::as_str) == Some("roundabout") {
                WayDirection::Forward
            } else {
                WayDirection::Both
            }
        }
    }
}
