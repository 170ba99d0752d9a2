use agromap_core::{EngineError, LatLng, Polygon};

use crate::drawing::DrawingSession;
use crate::editing::EditSession;

/// The map is in exactly one mode at a time. Session objects live inside the
/// variant and are constructed/destroyed on transition, so a stale session
/// can never outlive its mode.
#[derive(Debug, Default)]
pub enum InteractionMode {
    #[default]
    Idle,
    Drawing(DrawingSession),
    Editing(EditSession),
}

impl InteractionMode {
    pub fn is_idle(&self) -> bool {
        matches!(self, InteractionMode::Idle)
    }
}

/// Owner of the drawing/editing modal state.
#[derive(Debug, Default)]
pub struct MapInteraction {
    mode: InteractionMode,
}

impl MapInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &InteractionMode {
        &self.mode
    }

    /// Begin drawing. Rejected while a drawing session is already active; an
    /// active edit session is implicitly cancelled.
    pub fn start_drawing(&mut self) -> Result<&mut DrawingSession, EngineError> {
        match self.mode {
            InteractionMode::Drawing(_) => return Err(EngineError::SessionAlreadyActive),
            InteractionMode::Editing(_) => {
                tracing::info!("edit session cancelled by drawing start");
            }
            InteractionMode::Idle => {}
        }
        self.mode = InteractionMode::Drawing(DrawingSession::new());
        match &mut self.mode {
            InteractionMode::Drawing(session) => Ok(session),
            _ => unreachable!(),
        }
    }

    /// Begin editing a polygon. Rejected while an edit session is already
    /// active; an active drawing session is implicitly cancelled.
    pub fn start_editing(&mut self, polygon: &Polygon) -> Result<&mut EditSession, EngineError> {
        match self.mode {
            InteractionMode::Editing(_) => return Err(EngineError::SessionAlreadyActive),
            InteractionMode::Drawing(_) => {
                tracing::info!("drawing session cancelled by editing start");
            }
            InteractionMode::Idle => {}
        }
        self.mode = InteractionMode::Editing(EditSession::load(polygon));
        match &mut self.mode {
            InteractionMode::Editing(session) => Ok(session),
            _ => unreachable!(),
        }
    }

    pub fn drawing_mut(&mut self) -> Option<&mut DrawingSession> {
        match &mut self.mode {
            InteractionMode::Drawing(session) => Some(session),
            _ => None,
        }
    }

    pub fn editing_mut(&mut self) -> Option<&mut EditSession> {
        match &mut self.mode {
            InteractionMode::Editing(session) => Some(session),
            _ => None,
        }
    }

    /// Completion gesture while drawing: emit the closed ring and return to
    /// idle. On a geometry failure the session stays active.
    pub fn complete_drawing(&mut self) -> Result<Vec<LatLng>, EngineError> {
        let session = self
            .drawing_mut()
            .ok_or_else(|| EngineError::Validation("no drawing session active".to_string()))?;
        let ring = session.complete()?;
        self.mode = InteractionMode::Idle;
        Ok(ring)
    }

    /// Stop-and-save while editing: emit (polygon id, closed ring) and return
    /// to idle. On a geometry failure the session stays active.
    pub fn stop_and_save_edit(&mut self) -> Result<(String, Vec<LatLng>), EngineError> {
        let session = match &self.mode {
            InteractionMode::Editing(session) => session,
            _ => {
                return Err(EngineError::Validation(
                    "no edit session active".to_string(),
                ))
            }
        };
        let ring = session.stop_and_save()?;
        let id = session.polygon_id().to_string();
        self.mode = InteractionMode::Idle;
        Ok((id, ring))
    }

    /// Abandon whatever is active.
    pub fn cancel(&mut self) {
        self.mode = InteractionMode::Idle;
    }
}
