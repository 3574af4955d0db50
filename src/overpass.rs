//! Overpass HTTP adapter for street-network extracts.
//!
//! Fetches the drivable ways inside a bounding box and returns a typed
//! extract the graph builder can consume. Network failures here are never
//! fatal for a dispatch: the provider above falls back to great-circle
//! estimates.

use std::collections::HashMap;

use serde::Deserialize;

use crate::graph::BoundingBox;

/// Highway classes included in a drive network, links included.
const DRIVE_HIGHWAY_FILTER: &str = "^(motorway|trunk|primary|secondary|tertiary|unclassified|\
     residential|living_street|service|motorway_link|trunk_link|primary_link|secondary_link|\
     tertiary_link)$";

#[derive(Debug, Clone)]
pub struct OverpassConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            base_url: "https://overpass-api.de/api/interpreter".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Error type for Overpass requests.
#[derive(Debug)]
pub enum OverpassError {
    /// HTTP request failed or returned a non-success status.
    RequestFailed(String),
    /// Failed to parse the response body.
    ParseError(String),
    /// The bounding box contained no drivable ways.
    EmptyExtract,
}

impl std::fmt::Display for OverpassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverpassError::RequestFailed(msg) => write!(f, "Overpass request failed: {}", msg),
            OverpassError::ParseError(msg) => {
                write!(f, "Failed to parse Overpass response: {}", msg)
            }
            OverpassError::EmptyExtract => write!(f, "No drivable ways in bounding box"),
        }
    }
}

impl std::error::Error for OverpassError {}

/// A street intersection or shape point.
#[derive(Debug, Clone, Copy)]
pub struct OsmNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
}

/// A drivable way with its routing-relevant tags.
#[derive(Debug, Clone)]
pub struct OsmWay {
    pub nodes: Vec<i64>,
    pub tags: HashMap<String, String>,
}

/// Everything the graph builder needs from one bounding box.
#[derive(Debug, Clone)]
pub struct OverpassExtract {
    pub nodes: Vec<OsmNode>,
    pub ways: Vec<OsmWay>,
}

#[derive(Debug, Clone)]
pub struct OverpassClient {
    config: OverpassConfig,
    client: reqwest::blocking::Client,
}

impl OverpassClient {
    pub fn new(config: OverpassConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    /// Fetch the drive network inside `bbox`.
    pub fn fetch_drive_network(&self, bbox: BoundingBox) -> Result<OverpassExtract, OverpassError> {
        let query = drive_network_query(bbox);

        let response = self
            .client
            .post(&self.config.base_url)
            .form(&[("data", query.as_str())])
            .send()
            .map_err(|e| OverpassError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OverpassError::RequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: OverpassResponse = response
            .json()
            .map_err(|e| OverpassError::ParseError(e.to_string()))?;

        let extract = extract_from_elements(body.elements);
        if extract.ways.is_empty() {
            return Err(OverpassError::EmptyExtract);
        }
        Ok(extract)
    }
}

/// Overpass QL for the drivable ways in a bbox plus their node geometry.
fn drive_network_query(bbox: BoundingBox) -> String {
    format!(
        "[out:json][timeout:60];\
         way[\"highway\"~\"{filter}\"][\"area\"!~\"yes\"]({s},{w},{n},{e});\
         out body;>;out skel qt;",
        filter = DRIVE_HIGHWAY_FILTER,
        s = bbox.south,
        w = bbox.west,
        n = bbox.north,
        e = bbox.east,
    )
}

fn extract_from_elements(elements: Vec<OverpassElement>) -> OverpassExtract {
    let mut nodes = Vec::new();
    let mut ways = Vec::new();
    for element in elements {
        match element {
            OverpassElement::Node { id, lat, lon } => nodes.push(OsmNode { id, lat, lon }),
            OverpassElement::Way { nodes: refs, tags } => {
                if refs.len() >= 2 {
                    ways.push(OsmWay { nodes: refs, tags });
                }
            }
            OverpassElement::Relation {} => {}
        }
    }
    OverpassExtract { nodes, ways }
}

// -----------------------------------------------------------------------------
// Overpass Response Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OverpassElement {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
    },
    Way {
        #[serde(default)]
        nodes: Vec<i64>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    Relation {},
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 0.6,
        "elements": [
            {"type": "way", "id": 100, "nodes": [1, 2, 3],
             "tags": {"highway": "residential", "name": "Ejido"}},
            {"type": "way", "id": 101, "nodes": [4],
             "tags": {"highway": "service"}},
            {"type": "relation", "id": 7, "members": []},
            {"type": "node", "id": 1, "lat": -34.905, "lon": -56.190},
            {"type": "node", "id": 2, "lat": -34.906, "lon": -56.189},
            {"type": "node", "id": 3, "lat": -34.907, "lon": -56.188}
        ]
    }"#;

    #[test]
    fn parses_nodes_and_ways() {
        let body: OverpassResponse = serde_json::from_str(SAMPLE).unwrap();
        let extract = extract_from_elements(body.elements);
        assert_eq!(extract.nodes.len(), 3);
        // The single-node way is dropped; it cannot form an edge.
        assert_eq!(extract.ways.len(), 1);
        assert_eq!(extract.ways[0].nodes, vec![1, 2, 3]);
        assert_eq!(
            extract.ways[0].tags.get("highway").map(String::as_str),
            Some("residential")
        );
    }

    #[test]
    fn query_places_bbox_in_south_west_north_east_order() {
        let bbox = BoundingBox {
            north: -34.80,
            south: -34.92,
            east: -56.10,
            west: -56.22,
        };
        let query = drive_network_query(bbox);
        assert!(query.contains("(-34.92,-56.22,-34.8,-56.1)"));
        assert!(query.contains("[out:json]"));
    }
}
