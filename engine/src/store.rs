use agromap_core::geodesy;
use agromap_core::{
    EngineError, LatLng, Polygon, PolygonDraft, PolygonPatch, Role, DEFAULT_COLOR,
};

use crate::authorization::can_mutate;
use crate::backend::{PersistenceBackend, PolygonPersistence, RemoteConfig};
use crate::session::SessionContext;

/// Demo sessions may hold at most this many polygons.
pub const DEMO_POLYGON_LIMIT: usize = 30;

/// The authoritative in-memory polygon collection for the current view, plus
/// the current selection. Every mutation applies optimistically against a
/// pre-mutation snapshot and rolls back when the backend refuses; `&mut self`
/// on every mutating method keeps mutations serialized in program order, so
/// no two optimistic changes are ever in flight together.
#[derive(Debug)]
pub struct PolygonStore<B = PersistenceBackend> {
    session: SessionContext,
    backend: B,
    polygons: Vec<Polygon>,
    selected: Option<String>,
}

/// Pre-mutation state captured before the optimistic apply; restoring it is
/// the whole rollback.
struct Snapshot {
    polygons: Vec<Polygon>,
    selected: Option<String>,
}

impl PolygonStore<PersistenceBackend> {
    /// Store wired to the backend variant the actor's role selects.
    pub fn for_session(session: SessionContext, config: RemoteConfig) -> Self {
        let backend = PersistenceBackend::for_session(&session, config);
        Self::new(session, backend)
    }
}

impl<B: PolygonPersistence> PolygonStore<B> {
    pub fn new(session: SessionContext, backend: B) -> Self {
        Self {
            session,
            backend,
            polygons: Vec::new(),
            selected: None,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn set_impersonation(&mut self, target: Option<agromap_core::Actor>) {
        self.session.set_impersonation(target);
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn get(&self, id: &str) -> Option<&Polygon> {
        self.polygons.iter().find(|p| p.id == id)
    }

    pub fn selected(&self) -> Option<&Polygon> {
        let id = self.selected.as_deref()?;
        self.get(id)
    }

    /// Select a polygon for detail display and analysis. Returns false (and
    /// clears the selection) when the id is unknown.
    pub fn select(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if self.get(id).is_some() => {
                self.selected = Some(id.to_string());
                true
            }
            Some(_) => {
                self.selected = None;
                false
            }
            None => {
                self.selected = None;
                true
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            polygons: self.polygons.clone(),
            selected: self.selected.clone(),
        }
    }

    fn rollback(&mut self, snapshot: Snapshot) {
        self.polygons = snapshot.polygons;
        self.selected = snapshot.selected;
    }

    fn ensure_can_mutate(&self, polygon: &Polygon) -> Result<(), EngineError> {
        if can_mutate(
            self.session.actor(),
            polygon,
            self.session.impersonation(),
        ) {
            Ok(())
        } else {
            Err(EngineError::AuthorizationDenied)
        }
    }

    /// Replace the collection with the backend's current view. Never
    /// optimistic, this is a pure read. When the session actor's id is still
    /// unknown it is backfilled from the first loaded polygon's owner.
    pub async fn reload(&mut self, for_user: Option<i64>) -> Result<usize, EngineError> {
        let polygons = self.backend.list(for_user).await?;
        tracing::info!(count = polygons.len(), "loaded polygons");

        if self.session.actor().id.is_none() {
            if let Some(owner_id) = polygons.iter().find_map(|p| p.owner_id) {
                self.session.backfill_actor_id(owner_id);
            }
        }

        self.polygons = polygons;
        if let Some(id) = self.selected.clone() {
            if self.get(&id).is_none() {
                self.selected = None;
            }
        }
        Ok(self.polygons.len())
    }

    /// Create a polygon from a finished drawing. The entry appears
    /// immediately under a speculative id; the backend's answer swaps in the
    /// assigned id, a refusal removes the entry again.
    pub async fn create(
        &mut self,
        draft: PolygonDraft,
        target_owner: Option<i64>,
    ) -> Result<String, EngineError> {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation(
                "polygon name cannot be empty".to_string(),
            ));
        }
        let ring = geodesy::close_ring(&draft.ring)?;

        let is_demo = self.session.actor().role == Role::Demo;
        if is_demo && self.polygons.len() >= DEMO_POLYGON_LIMIT {
            return Err(EngineError::Validation(format!(
                "demo mode holds at most {DEMO_POLYGON_LIMIT} polygons"
            )));
        }

        let (owner_id, owner_role) = if is_demo {
            (None, Role::Demo)
        } else if let Some(target) = target_owner {
            (Some(target), Role::User)
        } else {
            (self.session.actor().id, self.session.actor().role)
        };

        let speculative = Polygon {
            id: Polygon::mint_local_id(),
            ring,
            color: if draft.color.is_empty() {
                DEFAULT_COLOR.to_string()
            } else {
                draft.color
            },
            name: name.to_string(),
            crop: draft.crop,
            comment: draft.comment,
            owner_id,
            owner_role,
        };
        let speculative_id = speculative.id.clone();

        let snapshot = self.snapshot();
        self.polygons.push(speculative.clone());
        self.selected = Some(speculative_id.clone());

        match self.backend.create(&speculative, target_owner).await {
            Ok(created) => {
                let final_id = created.id.clone();
                if let Some(entry) = self.polygons.iter_mut().find(|p| p.id == speculative_id) {
                    *entry = created;
                }
                if self.selected.as_deref() == Some(speculative_id.as_str()) {
                    self.selected = Some(final_id.clone());
                }
                tracing::info!(id = %final_id, "polygon created");
                Ok(final_id)
            }
            Err(err) => {
                tracing::error!(%err, "create failed, removing speculative polygon");
                self.rollback(snapshot);
                Err(err)
            }
        }
    }

    /// Field-level or full-geometry update under the optimistic protocol.
    pub async fn update(&mut self, id: &str, patch: PolygonPatch) -> Result<(), EngineError> {
        let current = self
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Validation(format!("polygon {id} not found")))?;
        self.ensure_can_mutate(&current)?;

        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(EngineError::Validation(
                    "polygon name cannot be empty".to_string(),
                ));
            }
        }

        let mut patch = patch;
        if let Some(ring) = patch.ring.take() {
            // Geometry failures abort here, before any state change.
            patch.ring = Some(geodesy::close_ring(&ring)?);
        }
        let updated = patch.apply_to(&current);

        let snapshot = self.snapshot();
        if let Some(entry) = self.polygons.iter_mut().find(|p| p.id == id) {
            *entry = updated.clone();
        }

        match self.backend.update(id, &updated).await {
            Ok(confirmed) => {
                if let Some(entry) = self.polygons.iter_mut().find(|p| p.id == id) {
                    *entry = confirmed;
                }
                tracing::info!(id, "polygon updated");
                Ok(())
            }
            Err(err) => {
                tracing::error!(id, %err, "update failed, rolling back");
                self.rollback(snapshot);
                Err(err)
            }
        }
    }

    /// Persist a ring emitted by a finished edit session.
    pub async fn apply_edited_ring(
        &mut self,
        id: &str,
        ring: Vec<LatLng>,
    ) -> Result<(), EngineError> {
        self.update(
            id,
            PolygonPatch {
                ring: Some(ring),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_name(&mut self, id: &str, name: String) -> Result<(), EngineError> {
        self.update(
            id,
            PolygonPatch {
                name: Some(name),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_comment(
        &mut self,
        id: &str,
        comment: Option<String>,
    ) -> Result<(), EngineError> {
        self.update(
            id,
            PolygonPatch {
                comment: Some(comment),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_color(&mut self, id: &str, color: String) -> Result<(), EngineError> {
        self.update(
            id,
            PolygonPatch {
                color: Some(color),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_crop(&mut self, id: &str, crop: Option<String>) -> Result<(), EngineError> {
        self.update(
            id,
            PolygonPatch {
                crop: Some(crop),
                ..Default::default()
            },
        )
        .await
    }

    /// Remove one polygon, optimistically.
    pub async fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        let current = self
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Validation(format!("polygon {id} not found")))?;
        self.ensure_can_mutate(&current)?;

        let snapshot = self.snapshot();
        self.polygons.retain(|p| p.id != id);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }

        match self.backend.delete(id).await {
            Ok(()) => {
                tracing::info!(id, "polygon deleted");
                Ok(())
            }
            Err(err) => {
                tracing::error!(id, %err, "delete failed, restoring polygon");
                self.rollback(snapshot);
                Err(err)
            }
        }
    }

    /// Drop the whole collection, optimistically. A no-op when there is
    /// nothing to clear.
    pub async fn clear_all(&mut self) -> Result<(), EngineError> {
        if self.polygons.is_empty() {
            return Ok(());
        }

        let snapshot = self.snapshot();
        self.polygons.clear();
        self.selected = None;

        match self
            .backend
            .clear_all(self.session.viewed_owner_id())
            .await
        {
            Ok(()) => {
                tracing::info!("all polygons cleared");
                Ok(())
            }
            Err(err) => {
                tracing::error!(%err, "clear-all failed, restoring collection");
                self.rollback(snapshot);
                Err(err)
            }
        }
    }

    /// Reset crop, comment and color across the collection. Local-only: the
    /// caller decides when to sync individual polygons back.
    pub fn reset_all_crops(&mut self) {
        for polygon in &mut self.polygons {
            polygon.crop = None;
            polygon.comment = None;
            polygon.color = DEFAULT_COLOR.to_string();
        }
    }
}
