pub mod analysis;
pub mod authorization;
pub mod backend;
pub mod crops;
pub mod drawing;
pub mod editing;
pub mod interaction;
pub mod session;
pub mod store;

pub use analysis::{
    AnalysisClient, AnalysisOverlay, AnalysisOverlayPipeline, AnalysisRequest, MapViewport,
    OverlayLimits, OverlayState, RequestTicket, ViewportProjection,
};
pub use authorization::can_mutate;
pub use backend::{
    LocalEphemeralBackend, PersistenceBackend, PolygonPersistence, RemoteBackend, RemoteConfig,
    SessionStorage,
};
pub use crops::{CropEntry, CropTaxonomyClient};
pub use drawing::{DrawingHint, DrawingSession};
pub use editing::EditSession;
pub use interaction::{InteractionMode, MapInteraction};
pub use session::SessionContext;
pub use store::{PolygonStore, DEMO_POLYGON_LIMIT};

/// The engine's long-lived parts for one signed-in session: the polygon
/// store on its role-selected backend, the modal drawing/editing owner, the
/// analysis pipeline and the crop-taxonomy client.
pub struct MapEngine {
    pub store: PolygonStore,
    pub interaction: MapInteraction,
    pub analysis: AnalysisOverlayPipeline,
    pub crops: CropTaxonomyClient,
}

impl MapEngine {
    pub fn new(session: SessionContext, config: RemoteConfig) -> Self {
        Self {
            store: PolygonStore::for_session(session, config.clone()),
            interaction: MapInteraction::new(),
            analysis: AnalysisOverlayPipeline::new(AnalysisClient::new(config.clone())),
            crops: CropTaxonomyClient::new(config),
        }
    }
}
