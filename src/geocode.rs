//! Geocoding contract and the Nominatim adapter.
//!
//! The core never talks to a geocoding provider directly: it goes through
//! [`GeocoderAdapter`], which owns the shared rate-limit bucket (upstream
//! providers allow one call per second) and the result cache, and produces a
//! canonical structured address before anything is scored.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::haversine;
use crate::models::{Address, AddressInput, Coordinate};

/// Error type for geocoding calls.
#[derive(Debug)]
pub enum GeocodeError {
    /// No provider produced a match for the address.
    AddressNotFound,
    /// HTTP request failed.
    RequestFailed(String),
    /// Failed to parse the provider response.
    ParseError(String),
}

impl std::fmt::Display for GeocodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeError::AddressNotFound => write!(f, "address not found"),
            GeocodeError::RequestFailed(msg) => write!(f, "geocoding request failed: {}", msg),
            GeocodeError::ParseError(msg) => {
                write!(f, "failed to parse geocoding response: {}", msg)
            }
        }
    }
}

impl std::error::Error for GeocodeError {}

/// Forward-geocoding result.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub location: Coordinate,
    /// Normalized display form of the matched address.
    pub normalized: String,
    /// Match confidence in [0, 1].
    pub confidence: f64,
}

/// Address to coordinate and back. Implemented by provider clients and by
/// test doubles.
pub trait Geocoder {
    fn geocode(&self, address: &Address) -> Result<GeocodeResult, GeocodeError>;
    fn reverse(&self, location: Coordinate) -> Result<Address, GeocodeError>;
}

/// What the dispatcher needs from the geocoding side: wire-form address in,
/// canonical structured address (with coordinates) out.
pub trait AddressResolver {
    fn resolve(&self, input: &AddressInput) -> Result<Address, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "dispatch-planner/0.1".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NominatimClient {
    config: NominatimConfig,
    client: reqwest::blocking::Client,
}

impl NominatimClient {
    pub fn new(config: NominatimConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { config, client })
    }
}

impl Geocoder for NominatimClient {
    fn geocode(&self, address: &Address) -> Result<GeocodeResult, GeocodeError> {
        let url = format!("{}/search", self.config.base_url);
        let query = query_for(address);
        debug!(%query, "forward geocoding");

        let response = self
            .client
            .get(&url)
            .query(&[("format", "json"), ("limit", "1"), ("q", query.as_str())])
            .send()
            .map_err(|e| GeocodeError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GeocodeError::RequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let matches: Vec<NominatimPlace> = response
            .json()
            .map_err(|e| GeocodeError::ParseError(e.to_string()))?;
        let place = matches.into_iter().next().ok_or(GeocodeError::AddressNotFound)?;

        let lat: f64 = place
            .lat
            .parse()
            .map_err(|_| GeocodeError::ParseError("bad latitude".to_string()))?;
        let lon: f64 = place
            .lon
            .parse()
            .map_err(|_| GeocodeError::ParseError("bad longitude".to_string()))?;

        Ok(GeocodeResult {
            location: Coordinate::new(lat, lon),
            normalized: place.display_name,
            confidence: place.importance.unwrap_or(0.5).clamp(0.0, 1.0),
        })
    }

    fn reverse(&self, location: Coordinate) -> Result<Address, GeocodeError> {
        let url = format!("{}/reverse", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "json"),
                ("lat", location.lat.to_string().as_str()),
                ("lon", location.lon.to_string().as_str()),
            ])
            .send()
            .map_err(|e| GeocodeError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GeocodeError::RequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: NominatimReverse = response
            .json()
            .map_err(|e| GeocodeError::ParseError(e.to_string()))?;
        let detail = body.address.ok_or(GeocodeError::AddressNotFound)?;

        // Cross streets are filled in by the adapter's proximity probing;
        // Nominatim itself does not report them.
        Ok(Address {
            street: detail.road.unwrap_or_default(),
            number: detail.house_number,
            corner_1: None,
            corner_2: None,
            city: detail
                .city
                .or(detail.town)
                .or(detail.village)
                .unwrap_or_default(),
            state: detail.state,
            country: detail.country.unwrap_or_default(),
            postal_code: detail.postcode,
            coordinates: Some(location),
        })
    }
}

/// Query text for a structured address: house-number form when a number is
/// present, intersection form when only corners are.
fn query_for(address: &Address) -> String {
    let mut parts = Vec::new();
    match (&address.number, &address.corner_1) {
        (Some(number), _) => parts.push(format!("{} {}", address.street, number)),
        (None, Some(corner)) => parts.push(format!("{} & {}", address.street, corner)),
        (None, None) => parts.push(address.street.clone()),
    }
    if !address.city.is_empty() {
        parts.push(address.city.clone());
    }
    if !address.country.is_empty() {
        parts.push(address.country.clone());
    }
    parts.join(", ")
}

// -----------------------------------------------------------------------------
// Nominatim Response Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
    importance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    address: Option<NominatimAddressDetail>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddressDetail {
    road: Option<String>,
    house_number: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    country: Option<String>,
    postcode: Option<String>,
}

// -----------------------------------------------------------------------------
// Rate-limited, caching adapter
// -----------------------------------------------------------------------------

/// Distance of the reverse-geocode probes used for cross-street detection.
const CROSS_STREET_PROBE_M: f64 = 40.0;

/// The narrow adapter the dispatch core calls.
///
/// Serializes upstream calls to one per `min_interval` across all in-flight
/// requests and caches results by normalized query. Cache entries live for
/// the process lifetime; the core is stateless per request, so there is
/// nothing to invalidate. Reverse lookups are enriched with up to two
/// cross-streets found by probing around the point.
pub struct GeocoderAdapter<G> {
    inner: G,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    cache: Mutex<HashMap<String, GeocodeResult>>,
}

impl<G: Geocoder> GeocoderAdapter<G> {
    pub fn new(inner: G) -> Self {
        Self::with_interval(inner, Duration::from_secs(1))
    }

    pub fn with_interval(inner: G, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_call: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a wire-form address into a canonical structured address with
    /// coordinates.
    pub fn resolve(&self, input: &AddressInput) -> Result<Address, GeocodeError> {
        match input {
            AddressInput::Structured(addr) if addr.coordinates.is_some() => Ok(addr.clone()),
            AddressInput::Structured(addr) => {
                let result = self.geocode_cached(addr)?;
                let mut resolved = addr.clone();
                resolved.coordinates = Some(result.location);
                Ok(resolved)
            }
            AddressInput::FreeText(text) => {
                let addr = Address {
                    street: text.clone(),
                    ..Address::default()
                };
                let result = self.geocode_cached(&addr)?;
                Ok(Address {
                    street: result.normalized,
                    coordinates: Some(result.location),
                    ..Address::default()
                })
            }
        }
    }

    pub fn geocode_cached(&self, address: &Address) -> Result<GeocodeResult, GeocodeError> {
        let key = cache_key(address);
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            debug!(%key, "geocode cache hit");
            return Ok(hit.clone());
        }

        self.respect_rate_limit();
        let result = self.inner.geocode(address);
        if let Err(e) = &result {
            warn!(%key, "geocoding failed: {e}");
        }
        let result = result?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, result.clone());
        Ok(result)
    }

    /// Reverse-geocode a coordinate. When the provider reports a street but
    /// no corners, the two nearest distinct cross-streets are filled in from
    /// proximity probes; corners the provider already supplied are kept.
    pub fn reverse(&self, location: Coordinate) -> Result<Address, GeocodeError> {
        self.respect_rate_limit();
        let mut address = self.inner.reverse(location)?;
        if address.street.is_empty()
            || (address.corner_1.is_some() && address.corner_2.is_some())
        {
            return Ok(address);
        }

        let mut corners = self.nearby_cross_streets(location, &address);
        if address.corner_1.is_none() && !corners.is_empty() {
            address.corner_1 = Some(corners.remove(0));
        }
        if address.corner_2.is_none() && !corners.is_empty() {
            address.corner_2 = Some(corners.remove(0));
        }
        Ok(address)
    }

    /// Cross-street candidates near a point, nearest first: reverse-geocode
    /// four probe points a few dozen meters out and keep the distinct road
    /// names that differ from what the address already carries. Best effort;
    /// failed probes are skipped.
    fn nearby_cross_streets(&self, center: Coordinate, address: &Address) -> Vec<String> {
        let lat_step = CROSS_STREET_PROBE_M / 111_320.0;
        let lon_step = lat_step / center.lat.to_radians().cos().abs().max(0.01);
        let offsets = [
            (lat_step, 0.0),
            (-lat_step, 0.0),
            (0.0, lon_step),
            (0.0, -lon_step),
        ];

        let known = |name: &str| {
            name.eq_ignore_ascii_case(&address.street)
                || address
                    .corner_1
                    .as_deref()
                    .is_some_and(|c| name.eq_ignore_ascii_case(c))
                || address
                    .corner_2
                    .as_deref()
                    .is_some_and(|c| name.eq_ignore_ascii_case(c))
        };

        let mut found: Vec<(f64, String)> = Vec::new();
        for (dlat, dlon) in offsets {
            let probe = Coordinate::new(center.lat + dlat, center.lon + dlon);
            self.respect_rate_limit();
            let Ok(neighbor) = self.inner.reverse(probe) else {
                continue;
            };
            let road = neighbor.street;
            if road.is_empty() || known(&road) {
                continue;
            }
            if found.iter().any(|(_, seen)| seen.eq_ignore_ascii_case(&road)) {
                continue;
            }
            let distance = neighbor
                .coordinates
                .map(|c| haversine::distance_m(center, c))
                .unwrap_or(CROSS_STREET_PROBE_M);
            found.push((distance, road));
        }
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        found.into_iter().map(|(_, road)| road).collect()
    }

    /// Sleep long enough that upstream sees at most one call per interval.
    fn respect_rate_limit(&self) {
        let mut last = self.last_call.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl<G: Geocoder> AddressResolver for GeocoderAdapter<G> {
    fn resolve(&self, input: &AddressInput) -> Result<Address, GeocodeError> {
        GeocoderAdapter::resolve(self, input)
    }
}

fn cache_key(address: &Address) -> String {
    query_for(address).to_lowercase()
}
