//! Geographic zone pre-filter.
//!
//! The coverage area is partitioned into a handful of named rectangles with
//! an adjacency table; a vehicle in a zone neither equal nor adjacent to the
//! order's zone is dropped before any expensive evaluation. Zone geometry and
//! adjacency are configuration, not code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::Coordinate;

/// A named rectangular zone in WGS84 degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Zone {
    pub fn contains(&self, point: Coordinate) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lon >= self.west
            && point.lon <= self.east
    }
}

/// Zone partition plus adjacency sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMap {
    zones: Vec<Zone>,
    adjacency: HashMap<String, Vec<String>>,
}

impl ZoneMap {
    pub fn new(zones: Vec<Zone>, adjacency: HashMap<String, Vec<String>>) -> Self {
        Self { zones, adjacency }
    }

    /// The Montevideo six-zone partition. Zone order matters: the first
    /// containing rectangle wins, so the more specific CENTRO cell precedes
    /// the larger NORTE band it borders.
    pub fn montevideo() -> Self {
        let zones = vec![
            zone("CENTRO", -34.895, -34.905, -56.17, -56.195),
            zone("SUR_OESTE", -34.905, -34.92, -56.17, -56.22),
            zone("SUR_ESTE", -34.905, -34.92, -56.10, -56.17),
            zone("OESTE", -34.80, -34.905, -56.195, -56.22),
            zone("NORTE", -34.80, -34.905, -56.17, -56.195),
            zone("ESTE", -34.80, -34.905, -56.10, -56.17),
        ];
        // CENTRO connects with every zone; the rest follow the street grid.
        let adjacency = [
            ("CENTRO", vec!["SUR_OESTE", "SUR_ESTE", "NORTE", "OESTE", "ESTE"]),
            ("ESTE", vec!["SUR_ESTE", "CENTRO", "NORTE"]),
            ("OESTE", vec!["SUR_OESTE", "CENTRO", "NORTE"]),
            ("NORTE", vec!["CENTRO", "ESTE", "OESTE"]),
            ("SUR_ESTE", vec!["CENTRO", "ESTE", "SUR_OESTE"]),
            ("SUR_OESTE", vec!["CENTRO", "OESTE", "SUR_ESTE"]),
        ]
        .into_iter()
        .map(|(name, adj)| {
            (
                name.to_string(),
                adj.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();
        Self::new(zones, adjacency)
    }

    /// First zone containing the point, in declaration order.
    pub fn zone_for(&self, point: Coordinate) -> Option<&str> {
        self.zones
            .iter()
            .find(|z| z.contains(point))
            .map(|z| z.name.as_str())
    }

    pub fn adjacent_to(&self, zone: &str) -> &[String] {
        self.adjacency.get(zone).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a vehicle at `vehicle_location` stays in the candidate set for
    /// an order in `order_zone`. Vehicles outside the partition are kept: the
    /// filter only drops vehicles known to be far.
    pub fn keeps(&self, vehicle_location: Coordinate, order_zone: &str) -> bool {
        match self.zone_for(vehicle_location) {
            None => true,
            Some(zone) => {
                zone == order_zone || self.adjacent_to(order_zone).iter().any(|a| a == zone)
            }
        }
    }
}

impl Default for ZoneMap {
    fn default() -> Self {
        Self::montevideo()
    }
}

fn zone(name: &str, north: f64, south: f64, east: f64, west: f64) -> Zone {
    Zone {
        name: name.to_string(),
        north,
        south,
        east,
        west,
    }
}
