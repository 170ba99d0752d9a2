use std::collections::HashMap;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use agromap_core::geodesy;
use agromap_core::types::DEFAULT_COLOR;
use agromap_core::{EngineError, Polygon, Role};

use crate::session::SessionContext;

/// Where the remote API lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub bearer_token: String,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
        }
    }
}

pub(crate) fn network_error(err: reqwest::Error) -> EngineError {
    EngineError::Network(err.to_string())
}

/// Prefer the server's own message over the bare status line, the way the
/// response body usually carries a `{"message": ...}` envelope.
pub(crate) fn rejection_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.get("message").and_then(serde_json::Value::as_str) {
            return message.to_string();
        }
    }
    if !body.trim().is_empty() {
        return body.trim().to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

/// Map a response to the error taxonomy: 401/403 is the session-wide logout
/// signal, everything else non-success is a plain rejection.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        tracing::warn!(%status, "authentication rejected");
        return Err(EngineError::Unauthenticated);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = rejection_message(status, &body);
        tracing::error!(%status, message, "backend rejected request");
        return Err(EngineError::BackendRejected(message));
    }
    Ok(response)
}

/// Storage operations every backend variant provides. The store drives these
/// behind its optimistic protocol.
#[allow(async_fn_in_trait)]
pub trait PolygonPersistence {
    async fn list(&mut self, owner: Option<i64>) -> Result<Vec<Polygon>, EngineError>;
    async fn create(
        &mut self,
        draft: &Polygon,
        target_owner: Option<i64>,
    ) -> Result<Polygon, EngineError>;
    async fn update(&mut self, id: &str, polygon: &Polygon) -> Result<Polygon, EngineError>;
    async fn delete(&mut self, id: &str) -> Result<(), EngineError>;
    async fn clear_all(&mut self, owner: Option<i64>) -> Result<(), EngineError>;
}

// ========== REMOTE ==========

/// Request body for create/update. Geometry travels as a JSON-encoded GeoJSON
/// string, closed and in wire coordinate order.
#[derive(Debug, Serialize)]
struct SavePolygonBody<'a> {
    id: &'a str,
    #[serde(rename = "geoJson")]
    geo_json: String,
    name: &'a str,
    crop: Option<&'a str>,
    comment: Option<&'a str>,
    color: &'a str,
}

#[derive(Debug, Deserialize)]
struct RemoteOwner {
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemotePolygonRow {
    id: serde_json::Value,
    #[serde(rename = "geoJson")]
    geo_json: Option<String>,
    name: Option<String>,
    crop: Option<String>,
    comment: Option<String>,
    color: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<i64>,
    user: Option<RemoteOwner>,
}

/// Decode one server row into a polygon. Rows whose geometry does not parse
/// into a valid ring are dropped, the rest of the list still loads.
fn polygon_from_row(row: RemotePolygonRow) -> Option<Polygon> {
    let id = match &row.id {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let geometry: serde_json::Value = serde_json::from_str(row.geo_json.as_deref()?).ok()?;
    let ring = geodesy::ring_from_geojson(&geometry)?;
    let ring = geodesy::close_ring(&ring).ok()?;

    let owner_role = row
        .user
        .and_then(|u| u.role)
        .and_then(|r| match r.as_str() {
            "SUPER_ADMIN" => Some(Role::SuperAdmin),
            "ADMIN" => Some(Role::Admin),
            "DEMO" => Some(Role::Demo),
            "USER" => Some(Role::User),
            _ => None,
        })
        .unwrap_or(Role::User);

    Some(Polygon {
        name: row
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Loaded polygon {id}")),
        id,
        ring,
        color: row.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        crop: row.crop.filter(|c| !c.is_empty()),
        comment: row.comment.filter(|c| !c.is_empty()),
        owner_id: row.user_id,
        owner_role,
    })
}

fn save_body(polygon: &Polygon) -> Result<SavePolygonBody<'_>, EngineError> {
    let geometry = geodesy::closed_geojson_polygon(&polygon.ring)?;
    Ok(SavePolygonBody {
        id: &polygon.id,
        geo_json: geometry.to_string(),
        name: &polygon.name,
        crop: polygon.crop.as_deref(),
        comment: polygon.comment.as_deref(),
        color: &polygon.color,
    })
}

/// REST persistence against the polygon API.
#[derive(Debug)]
pub struct RemoteBackend {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

impl PolygonPersistence for RemoteBackend {
    async fn list(&mut self, owner: Option<i64>) -> Result<Vec<Polygon>, EngineError> {
        let url = match owner {
            Some(id) => self.url(&format!("/polygons/user/{id}")),
            None => self.url("/polygons/user"),
        };
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(network_error)?;
        let response = ensure_success(response).await?;

        let rows: Vec<RemotePolygonRow> = response.json().await.map_err(network_error)?;
        let total = rows.len();
        let polygons: Vec<Polygon> = rows.into_iter().filter_map(polygon_from_row).collect();
        if polygons.len() < total {
            tracing::warn!(
                dropped = total - polygons.len(),
                "skipped rows with invalid geometry"
            );
        }
        Ok(polygons)
    }

    async fn create(
        &mut self,
        draft: &Polygon,
        target_owner: Option<i64>,
    ) -> Result<Polygon, EngineError> {
        let url = match target_owner {
            Some(id) => self.url(&format!("/polygons/create?targetUserId={id}")),
            None => self.url("/polygons/create"),
        };
        let body = save_body(draft)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = ensure_success(response).await?;

        // Adopt the server's row when it returns one; an empty body leaves
        // the draft as-is and the next reload reconciles.
        match response.json::<RemotePolygonRow>().await {
            Ok(row) => Ok(polygon_from_row(row).unwrap_or_else(|| draft.clone())),
            Err(_) => Ok(draft.clone()),
        }
    }

    async fn update(&mut self, id: &str, polygon: &Polygon) -> Result<Polygon, EngineError> {
        let url = self.url(&format!("/polygons/{id}"));
        let body = save_body(polygon)?;
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.config.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = ensure_success(response).await?;

        match response.json::<RemotePolygonRow>().await {
            Ok(row) => Ok(polygon_from_row(row).unwrap_or_else(|| polygon.clone())),
            Err(_) => Ok(polygon.clone()),
        }
    }

    async fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        let url = self.url(&format!("/polygons/delete/{id}"));
        let response = self
            .http
            .delete(url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(network_error)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn clear_all(&mut self, _owner: Option<i64>) -> Result<(), EngineError> {
        let url = self.url("/polygons/clear-all");
        let response = self
            .http
            .delete(url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(network_error)?;
        ensure_success(response).await?;
        Ok(())
    }
}

// ========== LOCAL EPHEMERAL ==========

const DEMO_SNAPSHOT_KEY: &str = "demoPolygons";

/// Session-scoped string storage, the browser-session analogue. Dropped with
/// the session, nothing survives a restart.
#[derive(Debug, Default)]
pub struct SessionStorage {
    entries: HashMap<String, String>,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// Demo-mode persistence: one JSON snapshot in session storage, no network.
/// The only implicit owner is the session itself.
#[derive(Debug, Default)]
pub struct LocalEphemeralBackend {
    storage: SessionStorage,
}

impl LocalEphemeralBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the snapshot, self-healing on corruption by discarding it.
    fn snapshot(&mut self) -> Vec<Polygon> {
        let Some(raw) = self.storage.get(DEMO_SNAPSHOT_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<Polygon>>(raw) {
            Ok(polygons) => polygons,
            Err(err) => {
                tracing::warn!(%err, "discarding corrupt demo snapshot");
                self.storage.remove(DEMO_SNAPSHOT_KEY);
                Vec::new()
            }
        }
    }

    fn persist(&mut self, polygons: &[Polygon]) -> Result<(), EngineError> {
        let raw = serde_json::to_string(polygons)
            .map_err(|e| EngineError::BackendRejected(e.to_string()))?;
        self.storage.set(DEMO_SNAPSHOT_KEY, raw);
        Ok(())
    }
}

impl PolygonPersistence for LocalEphemeralBackend {
    async fn list(&mut self, _owner: Option<i64>) -> Result<Vec<Polygon>, EngineError> {
        let polygons: Vec<Polygon> = self
            .snapshot()
            .into_iter()
            .filter_map(|mut p| {
                p.ring = geodesy::close_ring(&p.ring).ok()?;
                Some(p)
            })
            .collect();
        Ok(polygons)
    }

    async fn create(
        &mut self,
        draft: &Polygon,
        _target_owner: Option<i64>,
    ) -> Result<Polygon, EngineError> {
        let mut polygons = self.snapshot();
        let mut created = draft.clone();
        created.id = Polygon::mint_local_id();
        polygons.push(created.clone());
        self.persist(&polygons)?;
        Ok(created)
    }

    async fn update(&mut self, id: &str, polygon: &Polygon) -> Result<Polygon, EngineError> {
        let mut polygons = self.snapshot();
        let entry = polygons
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| EngineError::BackendRejected(format!("polygon {id} not found")))?;
        *entry = polygon.clone();
        let updated = entry.clone();
        self.persist(&polygons)?;
        Ok(updated)
    }

    async fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        let mut polygons = self.snapshot();
        polygons.retain(|p| p.id != id);
        self.persist(&polygons)
    }

    async fn clear_all(&mut self, _owner: Option<i64>) -> Result<(), EngineError> {
        self.storage.remove(DEMO_SNAPSHOT_KEY);
        Ok(())
    }
}

// ========== SELECTION ==========

/// The backend variant for a session, chosen once from the actor's role and
/// fixed for the session's lifetime.
#[derive(Debug)]
pub enum PersistenceBackend {
    Remote(RemoteBackend),
    Local(LocalEphemeralBackend),
}

impl PersistenceBackend {
    pub fn for_session(session: &SessionContext, config: RemoteConfig) -> Self {
        match session.actor().role {
            Role::Demo => {
                tracing::info!("demo session: local ephemeral persistence");
                PersistenceBackend::Local(LocalEphemeralBackend::new())
            }
            _ => PersistenceBackend::Remote(RemoteBackend::new(config)),
        }
    }
}

impl PolygonPersistence for PersistenceBackend {
    async fn list(&mut self, owner: Option<i64>) -> Result<Vec<Polygon>, EngineError> {
        match self {
            PersistenceBackend::Remote(b) => b.list(owner).await,
            PersistenceBackend::Local(b) => b.list(owner).await,
        }
    }

    async fn create(
        &mut self,
        draft: &Polygon,
        target_owner: Option<i64>,
    ) -> Result<Polygon, EngineError> {
        match self {
            PersistenceBackend::Remote(b) => b.create(draft, target_owner).await,
            PersistenceBackend::Local(b) => b.create(draft, target_owner).await,
        }
    }

    async fn update(&mut self, id: &str, polygon: &Polygon) -> Result<Polygon, EngineError> {
        match self {
            PersistenceBackend::Remote(b) => b.update(id, polygon).await,
            PersistenceBackend::Local(b) => b.update(id, polygon).await,
        }
    }

    async fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        match self {
            PersistenceBackend::Remote(b) => b.delete(id).await,
            PersistenceBackend::Local(b) => b.delete(id).await,
        }
    }

    async fn clear_all(&mut self, owner: Option<i64>) -> Result<(), EngineError> {
        match self {
            PersistenceBackend::Remote(b) => b.clear_all(owner).await,
            PersistenceBackend::Local(b) => b.clear_all(owner).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agromap_core::LatLng;

    fn demo_polygon(name: &str) -> Polygon {
        Polygon {
            id: "draft".to_string(),
            ring: vec![
                LatLng::new(0.0, 0.0),
                LatLng::new(0.0, 1.0),
                LatLng::new(1.0, 1.0),
                LatLng::new(0.0, 0.0),
            ],
            color: "#FF8800".to_string(),
            name: name.to_string(),
            crop: None,
            comment: None,
            owner_id: None,
            owner_role: Role::Demo,
        }
    }

    #[tokio::test]
    async fn test_local_backend_round_trip() {
        let mut backend = LocalEphemeralBackend::new();
        assert!(backend.list(None).await.unwrap().is_empty());

        let created = backend.create(&demo_polygon("A"), None).await.unwrap();
        assert_ne!(created.id, "draft");

        let listed = backend.list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);

        let mut renamed = created.clone();
        renamed.name = "B".to_string();
        backend.update(&created.id, &renamed).await.unwrap();
        assert_eq!(backend.list(None).await.unwrap()[0].name, "B");

        backend.delete(&created.id).await.unwrap();
        assert!(backend.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_backend_mints_unique_ids() {
        let mut backend = LocalEphemeralBackend::new();
        let a = backend.create(&demo_polygon("A"), None).await.unwrap();
        let b = backend.create(&demo_polygon("B"), None).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_local_backend_self_heals_corrupt_snapshot() {
        let mut backend = LocalEphemeralBackend::new();
        backend
            .storage
            .set(DEMO_SNAPSHOT_KEY, "{not valid json".to_string());

        assert!(backend.list(None).await.unwrap().is_empty());
        // The corrupt snapshot is gone; writes work again.
        assert!(backend.storage.get(DEMO_SNAPSHOT_KEY).is_none());
        backend.create(&demo_polygon("A"), None).await.unwrap();
        assert_eq!(backend.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_clear_all_drops_snapshot() {
        let mut backend = LocalEphemeralBackend::new();
        backend.create(&demo_polygon("A"), None).await.unwrap();
        backend.clear_all(None).await.unwrap();
        assert!(backend.storage.get(DEMO_SNAPSHOT_KEY).is_none());
        assert!(backend.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_polygon_is_rejected() {
        let mut backend = LocalEphemeralBackend::new();
        let err = backend
            .update("missing", &demo_polygon("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BackendRejected(_)));
    }

    #[test]
    fn test_backend_selection_by_role() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;

        let config = RemoteConfig::new("http://localhost:8080/api", "token");
        let demo = SessionContext::demo("demo@example.com");
        assert!(matches!(
            PersistenceBackend::for_session(&demo, config.clone()),
            PersistenceBackend::Local(_)
        ));

        let payload = serde_json::json!({"sub": "u@example.com", "id": 7, "roles": ["ROLE_USER"]});
        let token = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(b"{}"),
            URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes()),
        );
        let user = SessionContext::from_token(&token).unwrap();
        assert!(matches!(
            PersistenceBackend::for_session(&user, config),
            PersistenceBackend::Remote(_)
        ));
    }

    #[test]
    fn test_rejection_message_prefers_body_message() {
        assert_eq!(
            rejection_message(
                StatusCode::BAD_REQUEST,
                r#"{"message": "name must not be empty"}"#
            ),
            "name must not be empty"
        );
        assert_eq!(
            rejection_message(StatusCode::BAD_REQUEST, "plain text error"),
            "plain text error"
        );
        assert_eq!(
            rejection_message(StatusCode::BAD_REQUEST, ""),
            "Bad Request"
        );
    }

    #[test]
    fn test_polygon_from_row_parses_wire_geometry() {
        let row: RemotePolygonRow = serde_json::from_value(serde_json::json!({
            "id": 17,
            "geoJson": r#"{"type":"Polygon","coordinates":[[[30.0,50.0],[30.01,50.0],[30.01,50.01],[30.0,50.0]]]}"#,
            "name": "Wheat field",
            "crop": "Cereals,Wheat",
            "comment": null,
            "color": "#AA0000",
            "userId": 7,
            "user": {"role": "USER"},
        }))
        .unwrap();

        let polygon = polygon_from_row(row).unwrap();
        assert_eq!(polygon.id, "17");
        // Wire [lng, lat] pairs land as internal [lat, lng].
        assert_eq!(polygon.ring[0], LatLng::new(50.0, 30.0));
        assert_eq!(polygon.owner_id, Some(7));
        assert_eq!(polygon.owner_role, Role::User);
        assert_eq!(polygon.crop.as_deref(), Some("Cereals,Wheat"));
    }

    #[test]
    fn test_polygon_from_row_drops_invalid_geometry() {
        let no_geometry: RemotePolygonRow =
            serde_json::from_value(serde_json::json!({"id": 1})).unwrap();
        assert!(polygon_from_row(no_geometry).is_none());

        let broken: RemotePolygonRow = serde_json::from_value(serde_json::json!({
            "id": 2,
            "geoJson": "{not json",
        }))
        .unwrap();
        assert!(polygon_from_row(broken).is_none());

        let too_short: RemotePolygonRow = serde_json::from_value(serde_json::json!({
            "id": 3,
            "geoJson": r#"{"type":"Polygon","coordinates":[[[30.0,50.0],[30.01,50.0]]]}"#,
        }))
        .unwrap();
        assert!(polygon_from_row(too_short).is_none());
    }

    #[test]
    fn test_save_body_closes_and_reorders_geometry() {
        let mut polygon = demo_polygon("A");
        polygon.ring.pop(); // leave the ring open
        let body = save_body(&polygon).unwrap();

        let geometry: serde_json::Value = serde_json::from_str(&body.geo_json).unwrap();
        let ring = geometry["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.first(), ring.last());
        // Internal (lat=0.0, lng=1.0) must serialize as [1.0, 0.0].
        assert_eq!(ring[1], serde_json::json!([1.0, 0.0]));
    }
}
