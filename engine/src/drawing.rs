use agromap_core::geodesy;
use agromap_core::{GeometryError, LatLng};

/// What the caller should tell the user after the latest click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingHint {
    /// First vertex placed; keep going.
    FirstPoint,
    /// Two vertices; a polygon needs at least three.
    NeedMorePoints,
    /// Enough vertices; the completion gesture will close the ring.
    ReadyToComplete,
}

/// Accumulates map clicks into a candidate ring. The preview point follows
/// the pointer and is never committed; it only extends the rendered path by
/// one provisional edge.
#[derive(Debug, Default)]
pub struct DrawingSession {
    path: Vec<LatLng>,
    preview: Option<LatLng>,
}

impl DrawingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a clicked vertex; returns the new vertex count so the caller
    /// can drive hint text.
    pub fn add_point(&mut self, point: LatLng) -> usize {
        self.path.push(point);
        self.path.len()
    }

    pub fn point_count(&self) -> usize {
        self.path.len()
    }

    pub fn hint(&self) -> Option<DrawingHint> {
        match self.path.len() {
            0 => None,
            1 => Some(DrawingHint::FirstPoint),
            2 => Some(DrawingHint::NeedMorePoints),
            _ => Some(DrawingHint::ReadyToComplete),
        }
    }

    /// Track the pointer for the provisional edge. Ignored until the first
    /// vertex exists, there is nothing to draw an edge from.
    pub fn set_preview(&mut self, point: LatLng) {
        if !self.path.is_empty() {
            self.preview = Some(point);
        }
    }

    /// Pointer left the map.
    pub fn clear_preview(&mut self) {
        self.preview = None;
    }

    /// Committed vertices plus the preview point, for rendering.
    pub fn display_path(&self) -> Vec<LatLng> {
        let mut path = self.path.clone();
        if let Some(preview) = self.preview {
            path.push(preview);
        }
        path
    }

    /// The completion gesture. With at least 3 committed vertices the ring is
    /// closed and emitted and the session empties; otherwise nothing is
    /// emitted and the accumulated path survives.
    pub fn complete(&mut self) -> Result<Vec<LatLng>, GeometryError> {
        if self.path.len() < 3 {
            return Err(GeometryError::InsufficientVertices {
                have: self.path.len(),
            });
        }
        let ring = geodesy::close_ring(&self.path)?;
        self.path.clear();
        self.preview = None;
        Ok(ring)
    }

    /// Discard the candidate ring without emitting.
    pub fn cancel(&mut self) {
        self.path.clear();
        self.preview = None;
    }
}
