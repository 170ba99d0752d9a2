use agromap_core::geodesy;
use agromap_core::{EngineError, GeometryError, LatLng, Polygon};

/// Mutable overlay over an existing polygon's ring. Vertex drags mutate the
/// working ring freely, the shape may be transiently degenerate mid-drag;
/// validation happens once at stop-and-save.
#[derive(Debug)]
pub struct EditSession {
    polygon_id: String,
    ring: Vec<LatLng>,
}

impl EditSession {
    /// Load a polygon's closed ring into the overlay. The closing duplicate
    /// is unfolded so vertex indices address each corner exactly once.
    pub fn load(polygon: &Polygon) -> Self {
        let mut ring = polygon.ring.clone();
        if ring.len() >= 2 {
            let first = ring[0];
            let last = ring[ring.len() - 1];
            if geodesy::points_coincide(first, last) {
                ring.pop();
            }
        }
        Self {
            polygon_id: polygon.id.clone(),
            ring,
        }
    }

    pub fn polygon_id(&self) -> &str {
        &self.polygon_id
    }

    pub fn working_ring(&self) -> &[LatLng] {
        &self.ring
    }

    /// Drag a vertex to a new location.
    pub fn move_vertex(&mut self, index: usize, point: LatLng) -> Result<(), EngineError> {
        let vertex = self.ring.get_mut(index).ok_or_else(|| {
            EngineError::Validation(format!("no vertex at index {index}"))
        })?;
        *vertex = point;
        Ok(())
    }

    /// Split an edge by inserting a vertex before `index` (the midpoint-drag
    /// gesture).
    pub fn insert_vertex(&mut self, index: usize, point: LatLng) -> Result<(), EngineError> {
        if index > self.ring.len() {
            return Err(EngineError::Validation(format!(
                "insert index {index} out of range"
            )));
        }
        self.ring.insert(index, point);
        Ok(())
    }

    /// Remove a vertex. Allowed to leave fewer than 3 points; the deficit
    /// only surfaces at stop-and-save.
    pub fn remove_vertex(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.ring.len() {
            return Err(EngineError::Validation(format!(
                "no vertex at index {index}"
            )));
        }
        self.ring.remove(index);
        Ok(())
    }

    /// Replace the whole working ring, e.g. when the map layer reports a
    /// finished drag with a fresh coordinate list.
    pub fn replace_ring(&mut self, ring: Vec<LatLng>) {
        self.ring = ring;
    }

    /// Close the working ring and emit it for persistence. On
    /// `InsufficientVertices` the session stays loaded so the user can fix
    /// the shape.
    pub fn stop_and_save(&self) -> Result<Vec<LatLng>, GeometryError> {
        geodesy::close_ring(&self.ring)
    }
}
