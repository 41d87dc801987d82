//! Coordinate obfuscation and synthetic proxy metadata.
//!
//! True coordinates are displaced by a random polar offset bounded by the
//! configured obfuscation level before they leave the device. Proxy routing
//! is simulated: requests are wrapped with fabricated headers, and no real
//! network hop ever happens here.
use crate::config::ObfuscationLevel;
use crate::error::Result;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A fixed named proxy region with a representative coordinate (reporting
/// only) and a fake address prefix for synthetic headers.
struct ProxyRegion {
    name: &'static str,
    lat: f64,
    lng: f64,
    ip_prefix: &'static str,
}

const PROXY_REGIONS: [ProxyRegion; 5] = [
    ProxyRegion {
        name: "amsterdam",
        lat: 52.3676,
        lng: 4.9041,
        ip_prefix: "185.107.",
    },
    ProxyRegion {
        name: "zurich",
        lat: 47.3769,
        lng: 8.5417,
        ip_prefix: "91.132.",
    },
    ProxyRegion {
        name: "reykjavik",
        lat: 64.1466,
        lng: -21.9426,
        ip_prefix: "82.221.",
    },
    ProxyRegion {
        name: "singapore",
        lat: 1.3521,
        lng: 103.8198,
        ip_prefix: "139.180.",
    },
    ProxyRegion {
        name: "toronto",
        lat: 43.6532,
        lng: -79.3832,
        ip_prefix: "144.217.",
    },
];

/// A masked coordinate, derived and never persisted.
///
/// Always lies within `level.radius()` of the true coordinate, in
/// coordinate-degree units.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MaskedLocation {
    pub masked_lat: f64,
    pub masked_lng: f64,
    /// Name of the randomly chosen proxy region. Reporting only.
    pub proxy_region: String,
    pub obfuscation_level: ObfuscationLevel,
    pub timestamp: i64,
}

/// An outbound request wrapped with fabricated proxy metadata.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProxiedRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

/// Masks a coordinate by a random polar offset bounded by the level's radius.
///
/// Two calls with identical input produce different outputs with
/// overwhelming probability; the angle and distance come from the OS
/// secure random source.
pub fn mask_location(lat: f64, lng: f64, level: ObfuscationLevel) -> Result<MaskedLocation> {
    let mut rng = OsRng;
    let angle: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    let distance: f64 = rng.gen_range(0.0..=level.radius());

    let region = &PROXY_REGIONS[rng.gen_range(0..PROXY_REGIONS.len())];

    let masked = MaskedLocation {
        masked_lat: lat + distance * angle.cos(),
        masked_lng: lng + distance * angle.sin(),
        proxy_region: region.name.to_string(),
        obfuscation_level: level,
        timestamp: chrono::Utc::now().timestamp_millis(),
    };

    tracing::debug!(
        level = ?level,
        region = region.name,
        "Masked location"
    );

    Ok(masked)
}

/// Wraps a request with synthetic proxy headers.
///
/// Attaches `X-Proxy-Region`, a fabricated `X-Forwarded-For` drawn from the
/// region's fake address prefix, and `X-Real-IP: masked`. No real routing
/// is performed.
///
/// # Arguments
///
/// * `url` - Target URL, carried through unchanged.
/// * `data` - Request body, carried through unchanged.
/// * `region` - Region name to report; a random region when `None` or unknown.
pub fn route_through_proxy(
    url: &str,
    data: serde_json::Value,
    region: Option<&str>,
) -> Result<ProxiedRequest> {
    let mut rng = OsRng;
    let region = region
        .and_then(|name| PROXY_REGIONS.iter().find(|r| r.name == name))
        .unwrap_or(&PROXY_REGIONS[rng.gen_range(0..PROXY_REGIONS.len())]);

    let forwarded_for = format!(
        "{}{}.{}",
        region.ip_prefix,
        rng.gen_range(1..255),
        rng.gen_range(1..255)
    );

    let mut headers = HashMap::new();
    headers.insert("X-Proxy-Region".to_string(), region.name.to_string());
    headers.insert("X-Forwarded-For".to_string(), forwarded_for);
    headers.insert("X-Real-IP".to_string(), "masked".to_string());

    Ok(ProxiedRequest {
        url: url.to_string(),
        headers,
        body: data,
    })
}

/// Representative coordinate of a named region, if known. Reporting only.
pub fn region_coordinates(name: &str) -> Option<(f64, f64)> {
    PROXY_REGIONS
        .iter()
        .find(|r| r.name == name)
        .map(|r| (r.lat, r.lng))
}

/// Great-circle distance between two coordinates in kilometers (haversine).
pub fn calculate_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degree_offset(lat: f64, lng: f64, masked: &MaskedLocation) -> f64 {
        let d_lat = masked.masked_lat - lat;
        let d_lng = masked.masked_lng - lng;
        (d_lat * d_lat + d_lng * d_lng).sqrt()
    }

    #[test]
    fn masked_point_stays_within_radius() {
        let levels = [
            ObfuscationLevel::Low,
            ObfuscationLevel::Medium,
            ObfuscationLevel::High,
            ObfuscationLevel::Maximum,
        ];

        for level in levels {
            for _ in 0..50 {
                let masked = mask_location(40.7128, -74.0060, level).expect("mask");
                let offset = degree_offset(40.7128, -74.0060, &masked);
                // Small epsilon for floating-point round-off at the boundary.
                assert!(
                    offset <= level.radius() + 1e-9,
                    "offset {} exceeds radius {} at {:?}",
                    offset,
                    level.radius(),
                    level
                );
            }
        }
    }

    #[test]
    fn masking_is_nondeterministic() {
        let a = mask_location(51.5074, -0.1278, ObfuscationLevel::Maximum).expect("mask");
        let b = mask_location(51.5074, -0.1278, ObfuscationLevel::Maximum).expect("mask");

        assert!(a.masked_lat != b.masked_lat || a.masked_lng != b.masked_lng);
    }

    #[test]
    fn masked_region_is_one_of_the_fixed_set() {
        let masked = mask_location(0.0, 0.0, ObfuscationLevel::Low).expect("mask");
        assert!(region_coordinates(&masked.proxy_region).is_some());
    }

    #[test]
    fn proxy_wrapping_attaches_synthetic_headers() {
        let body = serde_json::json!({"action": "ping"});
        let request =
            route_through_proxy("https://api.example.com/v1", body.clone(), Some("zurich"))
                .expect("route");

        assert_eq!(request.url, "https://api.example.com/v1");
        assert_eq!(request.body, body);
        assert_eq!(request.headers["X-Proxy-Region"], "zurich");
        assert_eq!(request.headers["X-Real-IP"], "masked");
        assert!(request.headers["X-Forwarded-For"].starts_with("91.132."));
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Paris to London, roughly 343 km.
        let km = calculate_distance(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((km - 343.5).abs() < 5.0, "got {}", km);
    }

    #[test]
    fn haversine_of_identical_points_is_zero() {
        assert_eq!(calculate_distance(10.0, 20.0, 10.0, 20.0), 0.0);
    }
}
