use std::f64::consts::PI;

use chrono::{Months, NaiveDate};
use serde::Serialize;

use agromap_core::geodesy;
use agromap_core::{AnalysisType, EngineError, GeoBounds, LatLng, Polygon};

use crate::backend::{ensure_success, network_error, RemoteConfig};

/// Requested raster dimensions stay inside this window: small enough to bound
/// processing cost, large enough to stay legible.
#[derive(Debug, Clone, Copy)]
pub struct OverlayLimits {
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for OverlayLimits {
    fn default() -> Self {
        Self {
            min_dimension: 256,
            max_dimension: 1024,
        }
    }
}

/// How geographic points land on the screen. The pipeline only needs
/// container-pixel positions for the bounding-box corners.
pub trait ViewportProjection {
    fn to_container_point(&self, point: LatLng) -> (f64, f64);
}

/// Spherical-mercator viewport, the projection slippy maps use.
#[derive(Debug, Clone, Copy)]
pub struct MapViewport {
    pub center: LatLng,
    pub zoom: f64,
    pub width_px: u32,
    pub height_px: u32,
}

impl MapViewport {
    fn world_point(&self, point: LatLng) -> (f64, f64) {
        let scale = 256.0 * 2f64.powf(self.zoom);
        let x = (point.lng + 180.0) / 360.0 * scale;
        let siny = point.lat.to_radians().sin().clamp(-0.9999, 0.9999);
        let y = (0.5 - ((1.0 + siny) / (1.0 - siny)).ln() / (4.0 * PI)) * scale;
        (x, y)
    }
}

impl ViewportProjection for MapViewport {
    fn to_container_point(&self, point: LatLng) -> (f64, f64) {
        let (x, y) = self.world_point(point);
        let (cx, cy) = self.world_point(self.center);
        (
            x - cx + f64::from(self.width_px) / 2.0,
            y - cy + f64::from(self.height_px) / 2.0,
        )
    }
}

/// One fully derived request, superseded whenever any input changes.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub geo_json: String,
    pub analysis_type: AnalysisType,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub width: u32,
    pub height: u32,
    pub bounds: GeoBounds,
}

#[derive(Debug, Serialize)]
struct ProcessImageBody<'a> {
    #[serde(rename = "polygonGeoJson")]
    polygon_geo_json: &'a str,
    #[serde(rename = "analysisType")]
    analysis_type: &'static str,
    #[serde(rename = "dateFrom")]
    date_from: String,
    #[serde(rename = "dateTo")]
    date_to: String,
    width: u32,
    height: u32,
}

/// Decoded raster anchored to its bounding box. Dropping it releases the
/// pixel buffer, which is the whole "revoke" story.
pub struct AnalysisOverlay {
    pub image: image::DynamicImage,
    pub bounds: GeoBounds,
}

impl std::fmt::Debug for AnalysisOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisOverlay")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("bounds", &self.bounds)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Empty,
    Requesting,
    Ready,
    Failed,
}

/// Proof of issuance. A response may only be applied with the ticket of the
/// newest issued request; older tickets fall on the floor.
#[derive(Debug, Clone, Copy)]
pub struct RequestTicket {
    seq: u64,
    bounds: GeoBounds,
}

/// HTTP client for the image-processing endpoint.
#[derive(Debug)]
pub struct AnalysisClient {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl AnalysisClient {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Request a rendered raster; the response body is binary image data.
    pub async fn process_image(&self, request: &AnalysisRequest) -> Result<Vec<u8>, EngineError> {
        let body = ProcessImageBody {
            polygon_geo_json: &request.geo_json,
            analysis_type: request.analysis_type.as_tag(),
            date_from: request.date_from.format("%Y-%m-%d").to_string(),
            date_to: request.date_to.format("%Y-%m-%d").to_string(),
            width: request.width,
            height: request.height,
        };
        let url = format!("{}/sentinel/process-image", self.config.base_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(network_error)?;
        Ok(bytes.to_vec())
    }
}

/// Drives one analysis layer: derives the request from the selected polygon,
/// keeps at most one request live, and owns the decoded overlay raster.
#[derive(Debug)]
pub struct AnalysisOverlayPipeline {
    client: AnalysisClient,
    limits: OverlayLimits,
    analysis_type: AnalysisType,
    date_range: Option<(NaiveDate, NaiveDate)>,
    state: OverlayState,
    overlay: Option<AnalysisOverlay>,
    seq: u64,
}

impl AnalysisOverlayPipeline {
    pub fn new(client: AnalysisClient) -> Self {
        Self::with_limits(client, OverlayLimits::default())
    }

    pub fn with_limits(client: AnalysisClient, limits: OverlayLimits) -> Self {
        Self {
            client,
            limits,
            analysis_type: AnalysisType::None,
            date_range: None,
            state: OverlayState::Empty,
            overlay: None,
            seq: 0,
        }
    }

    pub fn analysis_type(&self) -> AnalysisType {
        self.analysis_type
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn overlay(&self) -> Option<&AnalysisOverlay> {
        self.overlay.as_ref()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_range
    }

    /// Any input change invalidates whatever is in flight.
    fn supersede(&mut self) {
        self.seq += 1;
    }

    pub fn set_analysis_type(&mut self, analysis_type: AnalysisType) {
        if self.analysis_type == analysis_type {
            return;
        }
        self.supersede();
        self.analysis_type = analysis_type;
        if analysis_type.is_none() {
            self.overlay = None;
            self.state = OverlayState::Empty;
        }
    }

    /// Layer-button behavior: re-selecting the active layer turns it off,
    /// anything else activates it with a default look-back window of two
    /// months ending today.
    pub fn toggle_layer(&mut self, analysis_type: AnalysisType, today: NaiveDate) {
        if self.analysis_type == analysis_type {
            self.set_analysis_type(AnalysisType::None);
            return;
        }
        self.supersede();
        self.analysis_type = analysis_type;
        let from = today
            .checked_sub_months(Months::new(2))
            .unwrap_or(today);
        self.date_range = Some((from, today));
    }

    pub fn set_date_range(&mut self, from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
        if from > to {
            return Err(EngineError::Validation(
                "analysis date range must run forward".to_string(),
            ));
        }
        self.supersede();
        self.date_range = Some((from, to));
        Ok(())
    }

    fn clamp_dimension(&self, raw: f64) -> u32 {
        let rounded = raw.abs().round() as u32;
        rounded.clamp(self.limits.min_dimension, self.limits.max_dimension)
    }

    /// Derive and register a request from the current inputs. A guard miss
    /// (no polygon, no layer, no date range) clears any displayed overlay and
    /// rejects without touching the active layer choice.
    pub fn prepare(
        &mut self,
        polygon: Option<&Polygon>,
        viewport: &impl ViewportProjection,
    ) -> Result<(RequestTicket, AnalysisRequest), EngineError> {
        let guards = (polygon, self.analysis_type, self.date_range);
        let (polygon, analysis_type, (date_from, date_to)) = match guards {
            (Some(p), t, Some(range)) if !t.is_none() => (p, t, range),
            _ => {
                self.supersede();
                self.overlay = None;
                self.state = OverlayState::Empty;
                return Err(EngineError::Validation(
                    "analysis needs a polygon, a layer and a date range".to_string(),
                ));
            }
        };

        let bounds = match geodesy::bounds_of_ring(&polygon.ring) {
            Ok(bounds) => bounds,
            Err(err) => {
                self.supersede();
                self.overlay = None;
                self.state = OverlayState::Empty;
                return Err(err.into());
            }
        };

        let (sw_x, sw_y) = viewport.to_container_point(bounds.south_west());
        let (ne_x, ne_y) = viewport.to_container_point(bounds.north_east());
        let width = self.clamp_dimension(ne_x - sw_x);
        let height = self.clamp_dimension(ne_y - sw_y);

        let geo_json = geodesy::closed_geojson_polygon(&polygon.ring)?.to_string();

        self.supersede();
        self.state = OverlayState::Requesting;
        tracing::info!(
            analysis = analysis_type.as_tag(),
            width,
            height,
            "analysis request prepared"
        );

        Ok((
            RequestTicket {
                seq: self.seq,
                bounds,
            },
            AnalysisRequest {
                geo_json,
                analysis_type,
                date_from,
                date_to,
                width,
                height,
                bounds,
            },
        ))
    }

    /// Fetch the raster for a prepared request. Does not touch pipeline
    /// state; feed the outcome to `apply`.
    pub async fn fetch(&self, request: &AnalysisRequest) -> Result<Vec<u8>, EngineError> {
        self.client.process_image(request).await
    }

    /// Apply a response under its ticket. Stale tickets are discarded without
    /// any state change (returns Ok(false)). A fresh success decodes and
    /// installs the overlay, releasing the previous one; a fresh failure
    /// clears the display and switches the layer off so the UI never implies
    /// a layer that is not there.
    pub fn apply(
        &mut self,
        ticket: RequestTicket,
        outcome: Result<Vec<u8>, EngineError>,
    ) -> Result<bool, EngineError> {
        if ticket.seq != self.seq {
            tracing::info!("discarding superseded analysis response");
            return Ok(false);
        }

        let failure = match outcome {
            Ok(bytes) => match image::load_from_memory(&bytes) {
                Ok(decoded) => {
                    self.overlay = Some(AnalysisOverlay {
                        image: decoded,
                        bounds: ticket.bounds,
                    });
                    self.state = OverlayState::Ready;
                    return Ok(true);
                }
                Err(err) => {
                    EngineError::BackendRejected(format!("analysis image did not decode: {err}"))
                }
            },
            Err(err) => err,
        };

        tracing::error!(%failure, "analysis request failed");
        self.overlay = None;
        self.state = OverlayState::Failed;
        self.analysis_type = AnalysisType::None;
        Err(failure)
    }

    /// The simple path: prepare, fetch, apply.
    pub async fn refresh(
        &mut self,
        polygon: Option<&Polygon>,
        viewport: &impl ViewportProjection,
    ) -> Result<bool, EngineError> {
        let (ticket, request) = self.prepare(polygon, viewport)?;
        let outcome = self.fetch(&request).await;
        self.apply(ticket, outcome)
    }

    /// Tear the layer down and release the raster.
    pub fn clear(&mut self) {
        self.supersede();
        self.overlay = None;
        self.state = OverlayState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agromap_core::Role;

    /// Plate carrée test viewport: pixels are degrees times a fixed scale.
    struct FixedScaleViewport {
        px_per_degree: f64,
    }

    impl ViewportProjection for FixedScaleViewport {
        fn to_container_point(&self, point: LatLng) -> (f64, f64) {
            (point.lng * self.px_per_degree, -point.lat * self.px_per_degree)
        }
    }

    fn pipeline() -> AnalysisOverlayPipeline {
        let client = AnalysisClient::new(RemoteConfig::new("http://localhost:8080/api", "token"));
        AnalysisOverlayPipeline::new(client)
    }

    fn polygon() -> Polygon {
        Polygon {
            id: "p".to_string(),
            ring: vec![
                LatLng::new(50.0, 30.0),
                LatLng::new(50.0, 30.01),
                LatLng::new(50.01, 30.01),
                LatLng::new(50.0, 30.0),
            ],
            color: "#0000FF".to_string(),
            name: "Field".to_string(),
            crop: None,
            comment: None,
            owner_id: Some(1),
            owner_role: Role::User,
        }
    }

    fn ready_pipeline() -> AnalysisOverlayPipeline {
        let mut p = pipeline();
        p.toggle_layer(
            AnalysisType::Ndvi,
            NaiveDate::from_ymd_opt(2024, 8, 6).unwrap(),
        );
        p
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 128, 0, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_toggle_layer_sets_two_month_default_range() {
        let mut p = pipeline();
        let today = NaiveDate::from_ymd_opt(2024, 8, 6).unwrap();
        p.toggle_layer(AnalysisType::Ndvi, today);
        assert_eq!(p.analysis_type(), AnalysisType::Ndvi);
        assert_eq!(
            p.date_range(),
            Some((NaiveDate::from_ymd_opt(2024, 6, 6).unwrap(), today))
        );

        // Re-selecting the active layer turns it off.
        p.toggle_layer(AnalysisType::Ndvi, today);
        assert_eq!(p.analysis_type(), AnalysisType::None);
    }

    #[test]
    fn test_backward_date_range_is_rejected() {
        let mut p = pipeline();
        let err = p
            .set_date_range(
                NaiveDate::from_ymd_opt(2024, 8, 6).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 6).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_guard_miss_clears_overlay_but_keeps_layer_choice() {
        let mut p = ready_pipeline();
        let viewport = FixedScaleViewport { px_per_degree: 1.0 };

        assert!(p.prepare(None, &viewport).is_err());
        assert!(p.overlay().is_none());
        assert_eq!(p.state(), OverlayState::Empty);
        // A guard miss is not a remote failure; the layer stays selected.
        assert_eq!(p.analysis_type(), AnalysisType::Ndvi);

        let mut no_layer = pipeline();
        assert!(no_layer.prepare(Some(&polygon()), &viewport).is_err());
    }

    #[test]
    fn test_request_dimensions_are_clamped() {
        let polygon = polygon();

        // 0.01 degrees at 1 px/degree rounds to zero: floor kicks in.
        let mut p = ready_pipeline();
        let (_, request) = p
            .prepare(Some(&polygon), &FixedScaleViewport { px_per_degree: 1.0 })
            .unwrap();
        assert_eq!(request.width, 256);
        assert_eq!(request.height, 256);

        // At 50k px/degree the box is 500 px on a side: used as-is.
        let mut p = ready_pipeline();
        let (_, request) = p
            .prepare(
                Some(&polygon),
                &FixedScaleViewport {
                    px_per_degree: 50_000.0,
                },
            )
            .unwrap();
        assert_eq!(request.width, 500);
        assert_eq!(request.height, 500);

        // At 1M px/degree the cap applies.
        let mut p = ready_pipeline();
        let (_, request) = p
            .prepare(
                Some(&polygon),
                &FixedScaleViewport {
                    px_per_degree: 1_000_000.0,
                },
            )
            .unwrap();
        assert_eq!(request.width, 1024);
        assert_eq!(request.height, 1024);
    }

    #[test]
    fn test_request_carries_wire_geometry_and_iso_dates() {
        let mut p = ready_pipeline();
        let (_, request) = p
            .prepare(Some(&polygon()), &FixedScaleViewport { px_per_degree: 1.0 })
            .unwrap();

        let geometry: serde_json::Value = serde_json::from_str(&request.geo_json).unwrap();
        assert_eq!(geometry["type"], "Polygon");
        // Wire order: [lng, lat].
        assert_eq!(
            geometry["coordinates"][0][0],
            serde_json::json!([30.0, 50.0])
        );
        assert_eq!(request.date_from.format("%Y-%m-%d").to_string(), "2024-06-06");
        assert_eq!(request.bounds.north, 50.01);
    }

    #[test]
    fn test_stale_response_is_never_applied() {
        let mut p = ready_pipeline();
        let viewport = FixedScaleViewport { px_per_degree: 1.0 };

        let (old_ticket, _) = p.prepare(Some(&polygon()), &viewport).unwrap();
        // A newer request supersedes the first before its response lands.
        let (fresh_ticket, _) = p.prepare(Some(&polygon()), &viewport).unwrap();

        assert_eq!(p.apply(old_ticket, Ok(png_bytes())).unwrap(), false);
        assert!(p.overlay().is_none());
        assert_eq!(p.state(), OverlayState::Requesting);

        assert_eq!(p.apply(fresh_ticket, Ok(png_bytes())).unwrap(), true);
        assert!(p.overlay().is_some());
        assert_eq!(p.state(), OverlayState::Ready);
    }

    #[test]
    fn test_changing_layer_invalidates_in_flight_request() {
        let mut p = ready_pipeline();
        let viewport = FixedScaleViewport { px_per_degree: 1.0 };
        let (ticket, _) = p.prepare(Some(&polygon()), &viewport).unwrap();

        p.set_analysis_type(AnalysisType::Ndwi);
        assert_eq!(p.apply(ticket, Ok(png_bytes())).unwrap(), false);
        assert!(p.overlay().is_none());
    }

    #[test]
    fn test_remote_failure_resets_layer_to_none() {
        let mut p = ready_pipeline();
        let viewport = FixedScaleViewport { px_per_degree: 1.0 };
        let (ticket, _) = p.prepare(Some(&polygon()), &viewport).unwrap();

        let err = p
            .apply(
                ticket,
                Err(EngineError::BackendRejected("no imagery".to_string())),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::BackendRejected(_)));
        assert_eq!(p.state(), OverlayState::Failed);
        assert_eq!(p.analysis_type(), AnalysisType::None);
        assert!(p.overlay().is_none());
    }

    #[test]
    fn test_undecodable_bytes_count_as_failure() {
        let mut p = ready_pipeline();
        let viewport = FixedScaleViewport { px_per_degree: 1.0 };
        let (ticket, _) = p.prepare(Some(&polygon()), &viewport).unwrap();

        assert!(p.apply(ticket, Ok(b"not an image".to_vec())).is_err());
        assert_eq!(p.analysis_type(), AnalysisType::None);
    }

    #[test]
    fn test_successful_apply_replaces_previous_overlay() {
        let mut p = ready_pipeline();
        let viewport = FixedScaleViewport { px_per_degree: 1.0 };

        let (ticket, _) = p.prepare(Some(&polygon()), &viewport).unwrap();
        p.apply(ticket, Ok(png_bytes())).unwrap();
        let first_bounds = p.overlay().unwrap().bounds;

        let mut moved = polygon();
        for point in &mut moved.ring {
            point.lat += 1.0;
        }
        let (ticket, _) = p.prepare(Some(&moved), &viewport).unwrap();
        p.apply(ticket, Ok(png_bytes())).unwrap();
        let second_bounds = p.overlay().unwrap().bounds;
        assert_ne!(first_bounds.south, second_bounds.south);

        p.clear();
        assert!(p.overlay().is_none());
        assert_eq!(p.state(), OverlayState::Empty);
    }

    #[test]
    fn test_mercator_viewport_centers_and_orients() {
        let viewport = MapViewport {
            center: LatLng::new(50.0, 30.0),
            zoom: 13.0,
            width_px: 1280,
            height_px: 720,
        };

        let (cx, cy) = viewport.to_container_point(viewport.center);
        assert!((cx - 640.0).abs() < 1e-6);
        assert!((cy - 360.0).abs() < 1e-6);

        let (east_x, _) = viewport.to_container_point(LatLng::new(50.0, 30.01));
        assert!(east_x > cx);
        let (_, north_y) = viewport.to_container_point(LatLng::new(50.01, 30.0));
        assert!(north_y < cy);
    }
}
