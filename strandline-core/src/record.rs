//! Spatial records and the acceptance rules applied before emission.

use std::collections::HashMap;

use geo::Coord;
use thiserror::Error;

/// A collected point of interest, validated and geohash-tagged.
///
/// The geohash is derived once, when the record is accepted from a leaf
/// query, and never recomputed afterwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialRecord {
    /// Stable document identifier, e.g. `osm_way_4711`.
    pub id: String,
    /// Display name, already past the acceptance rules.
    pub name: String,
    /// Geospatial position (x = longitude, y = latitude).
    pub location: Coord<f64>,
    /// Base-32 spatial index of the location.
    pub geohash: String,
    /// Normalised rating on the 0-5 scale, when a source provides one.
    pub rating: Option<f64>,
    /// Free-text description, generated or source-provided.
    pub description: Option<String>,
    /// Country, when derivable from source attributes.
    pub country: Option<String>,
    /// State or region, when derivable from source attributes.
    pub region: Option<String>,
    /// Nearby amenities, cleaned and deduplicated.
    pub amenities: Vec<String>,
    /// Raw source attributes, kept for downstream enrichment.
    pub tags: HashMap<String, String>,
    /// Label of the originating data source.
    pub source: String,
}

impl SpatialRecord {
    /// Latitude in degrees.
    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.location.y
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.location.x
    }
}

/// Why a raw record was rejected during leaf processing.
///
/// Rejections are per record and counted by the scheduler; they never fail
/// the surrounding leaf query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    /// The source record carried no usable name.
    #[error("record has no name")]
    MissingName,
    /// Names under three characters are codes or abbreviations.
    #[error("name {0:?} is too short")]
    NameTooShort(String),
    /// Purely numeric names are identifiers, not names.
    #[error("name {0:?} is purely numeric")]
    NumericName(String),
    /// Auto-generated placeholder names carry no information.
    #[error("name {0:?} looks auto-generated")]
    PlaceholderName(String),
    /// Latitude outside `[-90, 90]`.
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfBounds(f64),
    /// Longitude outside `[-180, 180]`.
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfBounds(f64),
}

/// Apply the acceptance rules to a candidate record.
///
/// A record needs a plausible name (present, at least three characters,
/// not purely numeric, not a recognisable placeholder) and in-bounds
/// coordinates.
///
/// # Errors
///
/// Returns the first [`RejectionReason`] that applies.
pub fn accept(name: Option<&str>, latitude: f64, longitude: f64) -> Result<(), RejectionReason> {
    let name = name
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .ok_or(RejectionReason::MissingName)?;

    if name.chars().count() < 3 {
        return Err(RejectionReason::NameTooShort(name.to_owned()));
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err(RejectionReason::NumericName(name.to_owned()));
    }
    if is_placeholder(name) {
        return Err(RejectionReason::PlaceholderName(name.to_owned()));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(RejectionReason::LatitudeOutOfBounds(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(RejectionReason::LongitudeOutOfBounds(longitude));
    }
    Ok(())
}

/// Recognise auto-generated names: "unnamed ..." markers and the
/// `<words> <number>` pattern mapping tools emit for anonymous features
/// ("Beach 12").
fn is_placeholder(name: &str) -> bool {
    if name.to_lowercase().starts_with("unnamed") {
        return true;
    }
    let words: Vec<&str> = name.split_whitespace().collect();
    if let Some((last, rest)) = words.split_last() {
        if !rest.is_empty()
            && last.chars().all(|c| c.is_ascii_digit())
            && rest
                .iter()
                .all(|word| word.chars().all(char::is_alphabetic))
        {
            return true;
        }
    }
    false
}
