pub mod error;
pub mod geodesy;
pub mod types;

pub use error::{EngineError, GeometryError};
pub use types::{
    Actor, AnalysisType, CropClassification, GeoBounds, LatLng, Polygon, PolygonDraft,
    PolygonPatch, Role, DEFAULT_COLOR,
};
