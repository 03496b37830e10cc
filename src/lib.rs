//! Facade crate for the Strandline collection engine.
//!
//! This crate re-exports the core domain types and exposes the collection
//! machinery behind a feature flag.

#![forbid(unsafe_code)]

pub use strandline_core::{
    BoundingBox, BoundingBoxError, DEFAULT_PRECISION, InvalidCoordinate, RejectionReason,
    SpatialRecord, accept, encode,
};

#[cfg(feature = "collect")]
pub use strandline_collect::{
    CollectionOutcome, FailureKind, MemorySink, OverpassClient, OverpassConfig, RatePacer,
    RecordSink, RegionQueryClient, RegionReport, RegionSplitScheduler, RetryPolicy,
    SchedulerConfig, SinkError, SqliteRecordSink,
};
