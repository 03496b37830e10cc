//! Adaptive collection of spatial records from a tile-bounded query API.
//!
//! Responsibilities:
//! - Define the [`RegionQueryClient`] seam and its Overpass implementation.
//! - Classify remote failures and recover with bounded retries.
//! - Drive the region split scheduler that decides between querying a
//!   bounding box directly and decomposing it into a grid of tiles.
//! - Persist accepted records through the [`RecordSink`] seam.
//!
//! Boundaries:
//! - Pure geometry, encoding and cleaning live in `strandline-core`.
//! - No global state: schedulers are parameterised by their own client,
//!   pacer and configuration handles.

#![forbid(unsafe_code)]

pub mod client;
pub mod overpass;
pub mod pacer;
pub mod retry;
pub mod scheduler;
pub mod sink;

pub use client::{CollectionOutcome, ElementKind, FailureKind, RawElement, RegionQueryClient};
pub use overpass::{ClientBuildError, OverpassClient, OverpassConfig};
pub use pacer::RatePacer;
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use scheduler::{RegionReport, RegionSplitScheduler, SchedulerConfig};
pub use sink::{MemorySink, RecordSink, SinkError, SqliteRecordSink};
