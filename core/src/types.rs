use serde::{Deserialize, Serialize};

/// Display color assigned when none is chosen.
pub const DEFAULT_COLOR: &str = "#0000FF";

// ========== GEOMETRY ==========

/// A geographic point. `[lat, lng]` is the internal convention everywhere;
/// `[lng, lat]` exists only on the wire (see `geodesy::ring_to_geojson`).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Axis-aligned geographic bounding box.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn south_west(&self) -> LatLng {
        LatLng::new(self.south, self.west)
    }

    pub fn north_east(&self) -> LatLng {
        LatLng::new(self.north, self.east)
    }
}

// ========== ACTOR ==========

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "SUPER_ADMIN")]
    SuperAdmin,
    #[serde(rename = "DEMO")]
    Demo,
}

impl Role {
    /// Map the JWT role claims to a single role. Higher privileges win when a
    /// token carries several claims; anything unrecognized falls back to USER.
    pub fn from_claims<S: AsRef<str>>(claims: &[S]) -> Role {
        let has = |tag: &str| claims.iter().any(|c| c.as_ref() == tag);
        if has("ROLE_SUPER_ADMIN") {
            Role::SuperAdmin
        } else if has("ROLE_ADMIN") {
            Role::Admin
        } else if has("ROLE_DEMO") {
            Role::Demo
        } else {
            Role::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Demo => "DEMO",
        }
    }
}

/// The authenticated principal. `id` is None when the token carries no
/// numeric id claim; the store backfills it from loaded polygons.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Actor {
    pub id: Option<i64>,
    pub role: Role,
    pub email: String,
}

// ========== POLYGON ==========

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Polygon {
    pub id: String,
    /// Closed ring, first point equals last.
    pub ring: Vec<LatLng>,
    pub color: String,
    pub name: String,
    /// Delimited "chapter,crop,variety" classification, empty suffixes omitted.
    pub crop: Option<String>,
    pub comment: Option<String>,
    /// None for demo polygons, which belong to the ephemeral session.
    pub owner_id: Option<i64>,
    pub owner_role: Role,
}

impl Polygon {
    /// Mint a session-local id, used for speculative entries and demo
    /// polygons until (if ever) a server assigns its own.
    pub fn mint_local_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Caller-supplied fields for a polygon that does not exist yet.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PolygonDraft {
    pub ring: Vec<LatLng>,
    pub color: String,
    pub name: String,
    pub crop: Option<String>,
    pub comment: Option<String>,
}

impl PolygonDraft {
    /// Draft carrying the defaulted label for a freshly drawn ring.
    pub fn unnamed(ring: Vec<LatLng>, drawn_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            ring,
            color: DEFAULT_COLOR.to_string(),
            name: format!("New polygon {}", drawn_at.format("%Y-%m-%d %H:%M")),
            crop: None,
            comment: None,
        }
    }
}

/// Field-level update. None leaves the field untouched; geometry replaces the
/// whole ring.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PolygonPatch {
    pub name: Option<String>,
    pub crop: Option<Option<String>>,
    pub comment: Option<Option<String>>,
    pub color: Option<String>,
    pub ring: Option<Vec<LatLng>>,
}

impl PolygonPatch {
    /// Apply onto an existing polygon, returning the patched copy.
    pub fn apply_to(&self, polygon: &Polygon) -> Polygon {
        let mut next = polygon.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(crop) = &self.crop {
            next.crop = crop.clone();
        }
        if let Some(comment) = &self.comment {
            next.comment = comment.clone();
        }
        if let Some(color) = &self.color {
            next.color = color.clone();
        }
        if let Some(ring) = &self.ring {
            next.ring = ring.clone();
        }
        next
    }
}

// ========== CROP CLASSIFICATION ==========

/// Chapter/crop/variety triple behind the delimited `crop` string. An empty
/// level cuts the string off there, so "Cereals,,Durum" can never occur.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CropClassification {
    pub chapter: String,
    pub crop: String,
    pub variety: String,
}

impl CropClassification {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(',');
        Self {
            chapter: parts.next().unwrap_or("").trim().to_string(),
            crop: parts.next().unwrap_or("").trim().to_string(),
            variety: parts.next().unwrap_or("").trim().to_string(),
        }
    }

    /// Join back to the wire form; an empty level drops itself and everything
    /// after it.
    pub fn to_delimited(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for level in [&self.chapter, &self.crop, &self.variety] {
            if level.is_empty() {
                break;
            }
            parts.push(level);
        }
        parts.join(",")
    }

    pub fn is_empty(&self) -> bool {
        self.chapter.is_empty()
    }
}

// ========== ANALYSIS ==========

/// Remote-sensing layer tags understood by the processing endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisType {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "NDVI")]
    Ndvi,
    #[serde(rename = "FALSE_COLOR")]
    FalseColor,
    #[serde(rename = "FALSE_COLOR_URBAN")]
    FalseColorUrban,
    #[serde(rename = "MOISTURE_INDEX")]
    MoistureIndex,
    #[serde(rename = "NDSI")]
    Ndsi,
    #[serde(rename = "NDWI")]
    Ndwi,
    #[serde(rename = "SWIR")]
    Swir,
    #[serde(rename = "SCENE_CLASSIFICATION")]
    SceneClassification,
    #[serde(rename = "HIGHLIGHT_OPTIMIZED_NATURAL_COLOR")]
    HighlightOptimizedNaturalColor,
}

impl AnalysisType {
    pub fn as_tag(&self) -> &'static str {
        match self {
            AnalysisType::None => "none",
            AnalysisType::Ndvi => "NDVI",
            AnalysisType::FalseColor => "FALSE_COLOR",
            AnalysisType::FalseColorUrban => "FALSE_COLOR_URBAN",
            AnalysisType::MoistureIndex => "MOISTURE_INDEX",
            AnalysisType::Ndsi => "NDSI",
            AnalysisType::Ndwi => "NDWI",
            AnalysisType::Swir => "SWIR",
            AnalysisType::SceneClassification => "SCENE_CLASSIFICATION",
            AnalysisType::HighlightOptimizedNaturalColor => {
                "HIGHLIGHT_OPTIMIZED_NATURAL_COLOR"
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AnalysisType::None)
    }
}
