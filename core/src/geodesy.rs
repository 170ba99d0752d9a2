use serde_json::{json, Value};

use crate::error::GeometryError;
use crate::types::{GeoBounds, LatLng};

/// WGS84 equatorial radius, meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Two points closer than this (in degrees, per axis) are the same vertex.
/// Roughly 0.1 mm on the ground; user input and wire round-trips never
/// produce legitimate vertices that close together.
pub const COORD_EPS: f64 = 1e-9;

pub fn points_coincide(a: LatLng, b: LatLng) -> bool {
    (a.lat - b.lat).abs() < COORD_EPS && (a.lng - b.lng).abs() < COORD_EPS
}

/// Normalize a ring to closed form: collapse consecutive duplicate vertices,
/// then append the first point unless the ring already ends on it. Fails with
/// `InsufficientVertices` when fewer than 3 distinct points remain; the
/// caller's input is left untouched.
pub fn close_ring(points: &[LatLng]) -> Result<Vec<LatLng>, GeometryError> {
    let mut cleaned: Vec<LatLng> = Vec::with_capacity(points.len() + 1);
    for &point in points {
        match cleaned.last() {
            Some(&prev) if points_coincide(prev, point) => {}
            _ => cleaned.push(point),
        }
    }

    // An already-closed input carries its first point twice; unfold it so the
    // distinct-vertex count is honest, then re-close below.
    if cleaned.len() >= 2 && points_coincide(cleaned[0], cleaned[cleaned.len() - 1]) {
        cleaned.pop();
    }

    if cleaned.len() < 3 {
        return Err(GeometryError::InsufficientVertices {
            have: cleaned.len(),
        });
    }

    let first = cleaned[0];
    cleaned.push(first);
    Ok(cleaned)
}

/// Unsigned spherical area of a ring in square meters, by the
/// longitude-difference summation over consecutive vertex pairs. Rings with
/// fewer than 3 points have zero area. Works on open and closed rings alike;
/// the closing duplicate contributes nothing.
pub fn ring_area_m2(ring: &[LatLng]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..ring.len() {
        let p1 = ring[i];
        let p2 = ring[(i + 1) % ring.len()];

        let phi1 = p1.lat.to_radians();
        let phi2 = p2.lat.to_radians();
        let d_lambda = (p2.lng - p1.lng).to_radians();

        area += d_lambda * (2.0 + phi1.sin() + phi2.sin());
    }

    (area * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}

/// Human-readable area: m² below one hectare, hectares below one km²,
/// kilometers² above, one decimal each.
pub fn format_area(square_meters: f64) -> String {
    if square_meters < 10_000.0 {
        format!("{:.1} m²", square_meters)
    } else if square_meters < 1_000_000.0 {
        format!("{:.1} ha", square_meters / 10_000.0)
    } else {
        format!("{:.1} km²", square_meters / 1_000_000.0)
    }
}

/// Bounding box of a typed ring.
pub fn bounds_of_ring(ring: &[LatLng]) -> Result<GeoBounds, GeometryError> {
    let mut bounds: Option<GeoBounds> = None;
    for point in ring {
        if !point.lat.is_finite() || !point.lng.is_finite() {
            continue;
        }
        bounds = Some(match bounds {
            None => GeoBounds {
                south: point.lat,
                west: point.lng,
                north: point.lat,
                east: point.lng,
            },
            Some(b) => GeoBounds {
                south: b.south.min(point.lat),
                west: b.west.min(point.lng),
                north: b.north.max(point.lat),
                east: b.east.max(point.lng),
            },
        });
    }
    bounds.ok_or(GeometryError::NoValidCoordinates)
}

/// Bounding box of an untyped geometry value: either a flat ring of
/// `[lat, lng]` pairs or a GeoJSON-style nested ring of `[lng, lat]` pairs.
/// The shape decides the coordinate order; elements that do not parse as a
/// finite pair are skipped.
pub fn bounds_of(geometry: &Value) -> Result<GeoBounds, GeometryError> {
    let elements = geometry.as_array().ok_or(GeometryError::NoValidCoordinates)?;

    // A nested geometry wraps its outer ring in one more array level, and
    // nested coordinates arrive in GeoJSON [lng, lat] order.
    let nested = elements
        .first()
        .and_then(|e| e.as_array())
        .and_then(|pair| pair.first())
        .map(Value::is_array)
        .unwrap_or(false);

    let (ring_elements, lng_first) = if nested {
        let outer = elements
            .first()
            .and_then(|e| e.as_array())
            .ok_or(GeometryError::NoValidCoordinates)?;
        (outer.as_slice(), true)
    } else {
        (elements.as_slice(), false)
    };

    let mut ring = Vec::with_capacity(ring_elements.len());
    for element in ring_elements {
        if let Some((a, b)) = parse_pair(element) {
            let point = if lng_first {
                LatLng::new(b, a)
            } else {
                LatLng::new(a, b)
            };
            ring.push(point);
        }
    }

    bounds_of_ring(&ring)
}

fn parse_pair(element: &Value) -> Option<(f64, f64)> {
    let pair = element.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    let a = pair[0].as_f64()?;
    let b = pair[1].as_f64()?;
    if a.is_finite() && b.is_finite() {
        Some((a, b))
    } else {
        None
    }
}

/// The one place `[lat, lng]` becomes wire order: close the ring and emit a
/// GeoJSON `Polygon` geometry with `[lng, lat]` coordinates.
pub fn closed_geojson_polygon(ring: &[LatLng]) -> Result<Value, GeometryError> {
    let closed = close_ring(ring)?;
    let coordinates: Vec<Value> = closed
        .iter()
        .map(|p| json!([p.lng, p.lat]))
        .collect();
    Ok(json!({
        "type": "Polygon",
        "coordinates": [coordinates],
    }))
}

/// The one place wire order becomes `[lat, lng]`: read a GeoJSON `Polygon`
/// geometry's outer ring. Returns None when the value is not a polygon or
/// carries no ring.
pub fn ring_from_geojson(geometry: &Value) -> Option<Vec<LatLng>> {
    if geometry.get("type").and_then(Value::as_str) != Some("Polygon") {
        return None;
    }
    let outer = geometry
        .get("coordinates")
        .and_then(Value::as_array)?
        .first()
        .and_then(Value::as_array)?;

    let ring: Vec<LatLng> = outer
        .iter()
        .filter_map(|element| {
            let (lng, lat) = parse_pair(element)?;
            Some(LatLng::new(lat, lng))
        })
        .collect();

    if ring.is_empty() {
        None
    } else {
        Some(ring)
    }
}
