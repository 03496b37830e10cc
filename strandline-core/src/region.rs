//! Geographic bounding boxes and split geometry.
//!
//! A [`BoundingBox`] is validated on construction and immutable afterwards;
//! subdividing one produces new values. Areas are measured in square
//! degrees, a coarse proxy for geodesic area that is good enough for the
//! empirically tuned split thresholds used by the scheduler.

use geo::{Coord, Rect};
use thiserror::Error;

/// Mean earth radius in kilometres, used for radius-derived boxes and
/// distance checks.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Errors raised when constructing a [`BoundingBox`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundingBoxError {
    /// The southern edge was not strictly below the northern edge.
    #[error("south {south} must be strictly below north {north}")]
    LatitudeOrder {
        /// Southern edge in degrees.
        south: f64,
        /// Northern edge in degrees.
        north: f64,
    },
    /// The western edge was not strictly below the eastern edge. Boxes
    /// wrapping the antimeridian are rejected rather than normalised.
    #[error("west {west} must be strictly below east {east}; antimeridian wrapping is not supported")]
    LongitudeOrder {
        /// Western edge in degrees.
        west: f64,
        /// Eastern edge in degrees.
        east: f64,
    },
    /// A latitude edge fell outside `[-90, 90]`.
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    /// A longitude edge fell outside `[-180, 180]`.
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    /// A radius-derived box needs a positive radius.
    #[error("radius {0} km must be positive and finite")]
    InvalidRadius(f64),
}

/// A named, validated geographic bounding box in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    south: f64,
    north: f64,
    west: f64,
    east: f64,
    name: Option<String>,
}

impl BoundingBox {
    /// Validate and construct a bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`BoundingBoxError`] when edges are out of world bounds,
    /// inverted, or the box would wrap the antimeridian.
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Result<Self, BoundingBoxError> {
        for latitude in [south, north] {
            if !(-90.0..=90.0).contains(&latitude) {
                return Err(BoundingBoxError::LatitudeOutOfRange(latitude));
            }
        }
        for longitude in [west, east] {
            if !(-180.0..=180.0).contains(&longitude) {
                return Err(BoundingBoxError::LongitudeOutOfRange(longitude));
            }
        }
        if south >= north {
            return Err(BoundingBoxError::LatitudeOrder { south, north });
        }
        if west >= east {
            return Err(BoundingBoxError::LongitudeOrder { west, east });
        }
        Ok(Self {
            south,
            north,
            west,
            east,
            name: None,
        })
    }

    /// Derive a bounding box covering a radius around a point.
    ///
    /// Spherical-earth approximation: the latitude span is the angular
    /// radius, the longitude span widens with latitude and degenerates to
    /// the full circle near the poles.
    ///
    /// # Errors
    ///
    /// Returns [`BoundingBoxError`] when the centre is out of world bounds
    /// or the radius is not a positive finite number.
    pub fn around(latitude: f64, longitude: f64, radius_km: f64) -> Result<Self, BoundingBoxError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(BoundingBoxError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(BoundingBoxError::LongitudeOutOfRange(longitude));
        }
        if !(radius_km > 0.0 && radius_km.is_finite()) {
            return Err(BoundingBoxError::InvalidRadius(radius_km));
        }

        let angular_radius = radius_km / EARTH_RADIUS_KM;
        let lat_rad = latitude.to_radians();
        let south = (lat_rad - angular_radius).to_degrees().max(-90.0);
        let north = (lat_rad + angular_radius).to_degrees().min(90.0);

        let sin_ratio = angular_radius.sin() / lat_rad.cos();
        let (west, east) = if !sin_ratio.is_finite() || sin_ratio.abs() >= 1.0 {
            // The circle encloses a pole; cover the full longitude range.
            (-180.0, 180.0)
        } else {
            let delta = sin_ratio.asin().to_degrees();
            ((longitude - delta).max(-180.0), (longitude + delta).min(180.0))
        };

        Self::new(south, north, west, east)
    }

    /// Attach a human-readable name, consuming the box.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Southern edge in degrees.
    #[must_use]
    pub fn south(&self) -> f64 {
        self.south
    }

    /// Northern edge in degrees.
    #[must_use]
    pub fn north(&self) -> f64 {
        self.north
    }

    /// Western edge in degrees.
    #[must_use]
    pub fn west(&self) -> f64 {
        self.west
    }

    /// Eastern edge in degrees.
    #[must_use]
    pub fn east(&self) -> f64 {
        self.east
    }

    /// Optional human-readable name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for logs: the assigned name, or the south-west corner.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("region {},{}", self.south, self.west))
    }

    /// Latitude span in degrees.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Longitude span in degrees.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.height() * self.width()
    }

    /// View as a `geo` rectangle (x = longitude, y = latitude).
    #[must_use]
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }

    /// Whether a coordinate lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.south..=self.north).contains(&latitude)
            && (self.west..=self.east).contains(&longitude)
    }

    /// Partition the box into a `rows` x `cols` grid of equal sub-boxes.
    ///
    /// Sub-boxes are returned in row-major order (south to north, west to
    /// east). Neighbouring sub-boxes share edge values exactly, so the
    /// partition has no gap and no overlap, and child areas sum to the
    /// parent area to floating-point tolerance. Named parents produce
    /// children suffixed with their grid cell.
    #[must_use]
    pub fn split_grid(&self, rows: usize, cols: usize) -> Vec<Self> {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let lat_edges = edges(self.south, self.north, rows);
        let lon_edges = edges(self.west, self.east, cols);

        let mut children = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let name = self
                    .name
                    .as_ref()
                    .map(|parent| format!("{parent} [{row},{col}]"));
                children.push(Self {
                    south: lat_edges[row],
                    north: lat_edges[row + 1],
                    west: lon_edges[col],
                    east: lon_edges[col + 1],
                    name,
                });
            }
        }
        children
    }
}

/// Evenly spaced interval edges from `start` to `end` inclusive.
///
/// Uses the interpolation form that is exact at both endpoints, so the
/// outermost children reproduce the parent edges bit-for-bit.
fn edges(start: f64, end: f64, segments: usize) -> Vec<f64> {
    let denominator = segments as f64;
    (0..=segments)
        .map(|i| {
            let t = i as f64 / denominator;
            start * (1.0 - t) + end * t
        })
        .collect()
}

/// Great-circle distance between two coordinates in kilometres
/// (haversine formula on a spherical earth).
#[must_use]
pub fn distance_km(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let phi_a = lat_a.to_radians();
    let phi_b = lat_b.to_radians();
    let d_phi = (lat_b - lat_a).to_radians();
    let d_lambda = (lon_b - lon_a).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}
