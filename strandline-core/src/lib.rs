//! Core domain types for the Strandline collection engine.
//!
//! These models provide basic validation to keep downstream
//! components honest. Constructors return `Result` to surface
//! invalid input early.
//!
//! Responsibilities:
//! - Bounding boxes, square-degree areas and grid partitioning.
//! - The geohash spatial encoder used to index collected records.
//! - Record acceptance rules and field-level cleaning.
//!
//! Boundaries:
//! - No I/O and no async; everything here is pure and cheap to call.
//! - Remote-service concerns (queries, retries, pacing) live in
//!   `strandline-collect`.

#![forbid(unsafe_code)]

pub mod clean;
pub mod geohash;
pub mod record;
pub mod region;

pub use geohash::{DEFAULT_PRECISION, InvalidCoordinate, encode};
pub use record::{RejectionReason, SpatialRecord, accept};
pub use region::{BoundingBox, BoundingBoxError};
