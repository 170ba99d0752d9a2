use thiserror::Error;

/// Geometry failures from the geodesy kit. These abort the operation before
/// any optimistic state change.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("a polygon needs at least 3 distinct points, got {have}")]
    InsufficientVertices { have: usize },
    #[error("no element of the geometry parses as a finite coordinate pair")]
    NoValidCoordinates,
}

/// The engine-wide failure taxonomy. Every optimistic mutation resolves into
/// either a clean success or a rollback carrying one of these.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any network call; never retried automatically.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Client-side authorization veto; the action is never attempted.
    #[error("this account may not modify the polygon")]
    AuthorizationDenied,

    /// 401/403 from the remote backend. The caller must log the session out.
    #[error("authentication rejected by the server")]
    Unauthenticated,

    /// Non-auth 4xx/5xx; optimistic state is rolled back.
    #[error("server rejected the request: {0}")]
    BackendRejected(String),

    /// Transport-level failure; same rollback behavior as a rejection.
    #[error("network failure: {0}")]
    Network(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// A drawing or editing session of the same kind is already active.
    #[error("a map session is already active; stop it first")]
    SessionAlreadyActive,
}

impl EngineError {
    /// Whether the failure must trigger a session-wide logout.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, EngineError::Unauthenticated)
    }
}
