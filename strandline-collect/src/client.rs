//! The query seam between the scheduler and the remote spatial API.
//!
//! Implementations map upstream error conditions into exactly three
//! failure kinds; the retry policy and the scheduler's fallback-split
//! behaviour key off that classification. Queries must be idempotent from
//! the caller's perspective, because the scheduler re-queries overlapping
//! and adjacent boxes freely.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use geo::Coord;
use strandline_core::BoundingBox;

/// OSM tag keys that describe amenities worth surfacing on a record.
const AMENITY_KEYS: [&str; 8] = [
    "shower",
    "toilets",
    "parking",
    "drinking_water",
    "restaurant",
    "cafe",
    "lifeguard",
    "changing_room",
];

/// Classification of a failed leaf query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The remote service did not answer within the query deadline.
    Timeout,
    /// The remote service asked us to slow down.
    RateLimited,
    /// Anything else; never retried.
    Other,
}

impl FailureKind {
    /// Whether the retry policy may attempt this failure again.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// Result of one leaf query attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    /// The query succeeded and returned raw elements.
    Records(Vec<RawElement>),
    /// The query succeeded but matched nothing.
    Empty,
    /// The query failed with the given classification.
    Failure(FailureKind),
}

/// Kind of OpenStreetMap element a raw record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// A point feature.
    Node,
    /// A polyline or area feature.
    Way,
    /// A multi-member feature.
    Relation,
}

impl ElementKind {
    /// Lowercase wire name of the element kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

/// One raw element returned by a leaf query, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    /// Element kind on the remote service.
    pub kind: ElementKind,
    /// Source identifier, unique within `kind`.
    pub id: i64,
    /// Explicit latitude, present on point features.
    pub latitude: Option<f64>,
    /// Explicit longitude, present on point features.
    pub longitude: Option<f64>,
    /// Representative centre, present on area features.
    pub center: Option<(f64, f64)>,
    /// Raw key/value attributes.
    pub tags: HashMap<String, String>,
}

impl RawElement {
    /// Best-effort coordinate: an explicit position wins over the centre.
    /// `None` means the element cannot be placed and must be skipped.
    #[must_use]
    pub fn coordinate(&self) -> Option<Coord<f64>> {
        if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
            return Some(Coord { x: lon, y: lat });
        }
        self.center
            .map(|(lat, lon)| Coord { x: lon, y: lat })
    }

    /// Display name from the source attributes, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags.get("name").map(String::as_str)
    }

    /// Stable document identifier. Node and way numbers live in separate
    /// namespaces upstream, so the kind is part of the key.
    #[must_use]
    pub fn document_id(&self) -> String {
        format!("osm_{}_{}", self.kind.as_str(), self.id)
    }

    /// Country attribute, when the source tagged one.
    #[must_use]
    pub fn country(&self) -> Option<&str> {
        self.tags.get("addr:country").map(String::as_str)
    }

    /// State or region attribute, when the source tagged one.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.tags
            .get("addr:state")
            .or_else(|| self.tags.get("addr:region"))
            .map(String::as_str)
    }

    /// Amenities advertised in the tags, as human-readable labels.
    #[must_use]
    pub fn amenities(&self) -> Vec<String> {
        AMENITY_KEYS
            .iter()
            .filter(|key| {
                self.tags.contains_key(**key)
                    || self.tags.contains_key(&format!("amenity:{key}"))
            })
            .map(|key| {
                key.split('_')
                    .map(capitalise)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    /// Compose a description from the source attributes: an explicit
    /// description tag first, then surface, access and amenity sentences.
    #[must_use]
    pub fn description(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(text) = self.tags.get("description") {
            parts.push(text.clone());
        }
        if let (Some(surface), Some(name)) = (self.tags.get("surface"), self.name()) {
            parts.push(format!("{name} has a {surface} surface."));
        }
        if let Some(access) = self.tags.get("access") {
            parts.push(format!("Access is {access}."));
        }
        let amenities = self.amenities();
        if !amenities.is_empty() {
            parts.push(format!(
                "Available amenities include: {}.",
                amenities.join(", ")
            ));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

fn capitalise(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// One bounded-box query against the remote spatial API.
///
/// Implementations own the wire protocol; the scheduler only sees the
/// three-way outcome classification.
#[async_trait]
pub trait RegionQueryClient: Send + Sync {
    /// Query the remote service for all matching elements in `region`.
    async fn query(&self, region: &BoundingBox) -> CollectionOutcome;
}
