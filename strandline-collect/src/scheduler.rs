//! Adaptive region collection: split large boxes, query small ones.
//!
//! Each bounding box moves through `Evaluate -> {QueryDirect | Split} ->
//! Resolved`. Oversized boxes are partitioned into a near-square grid and
//! the children are walked depth-first in row-major order. Leaf queries
//! run through the retry policy behind the shared pacer; a leaf that
//! resolves empty (or exhausts its retries) while its area is still above
//! the floor is split again, the fallback that recovers coverage after
//! server-side truncation. Every split shrinks the area by at least
//! a factor of two and the floor is a fixed positive constant, so the
//! recursion depth is bounded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use strandline_core::{BoundingBox, SpatialRecord, geohash, record};

use crate::client::{CollectionOutcome, FailureKind, RawElement, RegionQueryClient};
use crate::pacer::RatePacer;
use crate::retry::{RetryDecision, RetryPolicy, RetryState};

/// Tuning knobs for one scheduler instance. All defaults are positive, so
/// the engine is usable unconfigured.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum box area (square degrees) before mandatory subdivision.
    pub max_area_threshold: f64,
    /// Minimum box area below which subdivision is disallowed.
    pub min_area_floor: f64,
    /// Geohash precision applied to accepted records.
    pub geohash_precision: usize,
    /// Retry limits for individual leaf queries.
    pub retry: RetryPolicy,
    /// Pause after each resolved leaf query.
    pub inter_leaf_delay: Duration,
    /// Pause between sibling branches of one split.
    pub inter_branch_delay: Duration,
    /// Source label stamped on emitted records.
    pub source_label: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_area_threshold: 4.0,
            min_area_floor: 0.25,
            geohash_precision: geohash::DEFAULT_PRECISION,
            retry: RetryPolicy::default(),
            inter_leaf_delay: Duration::from_millis(500),
            inter_branch_delay: Duration::from_secs(2),
            source_label: "OpenStreetMap".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Set the split threshold in square degrees.
    #[must_use]
    pub fn with_max_area_threshold(mut self, threshold: f64) -> Self {
        self.max_area_threshold = threshold;
        self
    }

    /// Set the recursion floor in square degrees.
    #[must_use]
    pub fn with_min_area_floor(mut self, floor: f64) -> Self {
        self.min_area_floor = floor;
        self
    }

    /// Set the geohash precision for emitted records.
    #[must_use]
    pub fn with_geohash_precision(mut self, precision: usize) -> Self {
        self.geohash_precision = precision;
        self
    }

    /// Set the pauses applied between leaves and between branches.
    #[must_use]
    pub fn with_delays(mut self, inter_leaf: Duration, inter_branch: Duration) -> Self {
        self.inter_leaf_delay = inter_leaf;
        self.inter_branch_delay = inter_branch;
        self
    }
}

/// Aggregated result of collecting one region.
///
/// A branch that exhausts its recovery options contributes zero records
/// and a counter bump; callers see reduced coverage, never a crash.
#[derive(Debug, Default)]
pub struct RegionReport {
    /// Accepted, geohash-tagged records.
    pub records: Vec<SpatialRecord>,
    /// Leaf queries issued (retries not counted).
    pub leaves_queried: u64,
    /// Split operations performed.
    pub splits: u64,
    /// Raw records dropped for lacking usable coordinates.
    pub records_skipped: u64,
    /// Raw records dropped by the acceptance rules.
    pub records_rejected: u64,
    /// Leaves that resolved as terminal failures.
    pub failed_leaves: u64,
}

impl RegionReport {
    fn absorb(&mut self, child: Self) {
        self.records.extend(child.records);
        self.leaves_queried += child.leaves_queried;
        self.splits += child.splits;
        self.records_skipped += child.records_skipped;
        self.records_rejected += child.records_rejected;
        self.failed_leaves += child.failed_leaves;
    }
}

/// How a single leaf query resolved after retries.
enum LeafOutcome {
    Records(Vec<RawElement>),
    Empty,
    Failed(FailureKind),
    Cancelled,
}

/// Drives adaptive collection over one region at a time.
///
/// Holds no global state: every instance is parameterised by its own
/// client, pacer and configuration, so separate invocations only share
/// what the caller explicitly shares.
pub struct RegionSplitScheduler {
    client: Arc<dyn RegionQueryClient>,
    pacer: Arc<RatePacer>,
    config: SchedulerConfig,
}

impl RegionSplitScheduler {
    /// Create a scheduler from its collaborators.
    #[must_use]
    pub fn new(
        client: Arc<dyn RegionQueryClient>,
        pacer: Arc<RatePacer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            client,
            pacer,
            config,
        }
    }

    /// Collect every acceptable record inside `region`.
    pub async fn collect(&self, region: &BoundingBox) -> RegionReport {
        self.collect_with_cancellation(region, &CancellationToken::new())
            .await
    }

    /// Collect with cooperative cancellation: once `cancel` trips, no new
    /// leaf queries are scheduled, pending waits abort, and no retry is
    /// attempted.
    pub async fn collect_with_cancellation(
        &self,
        region: &BoundingBox,
        cancel: &CancellationToken,
    ) -> RegionReport {
        let report = self.evaluate(region.clone(), cancel.clone()).await;
        log::info!(
            "{}: {} records from {} leaves ({} splits, {} skipped, {} rejected, {} failed leaves)",
            region.display_name(),
            report.records.len(),
            report.leaves_queried,
            report.splits,
            report.records_skipped,
            report.records_rejected,
            report.failed_leaves,
        );
        report
    }

    /// `Evaluate` state: decide between a direct query and a split, then
    /// resolve. Boxed because the split path recurses.
    fn evaluate(
        &self,
        region: BoundingBox,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, RegionReport> {
        Box::pin(async move {
            let mut report = RegionReport::default();
            if cancel.is_cancelled() {
                return report;
            }

            let area = region.area();
            if area > self.config.max_area_threshold && area > self.config.min_area_floor {
                return self.split(&region, area, cancel).await;
            }

            match self.query_leaf(&region, &cancel).await {
                LeafOutcome::Cancelled => return report,
                LeafOutcome::Records(elements) => {
                    report.leaves_queried += 1;
                    self.accept_elements(elements, &mut report);
                    if !self.pause(self.config.inter_leaf_delay, &cancel).await {
                        return report;
                    }
                }
                outcome @ (LeafOutcome::Empty | LeafOutcome::Failed(_)) => {
                    report.leaves_queried += 1;
                    if let LeafOutcome::Failed(kind) = outcome {
                        report.failed_leaves += 1;
                        log::warn!(
                            "{} failed ({kind}) after retries",
                            region.display_name()
                        );
                    }
                    if !self.pause(self.config.inter_leaf_delay, &cancel).await {
                        return report;
                    }
                    // Fallback split: an empty or failed leaf above the
                    // floor is re-entered as if forced into `Split`.
                    if area > self.config.min_area_floor {
                        log::debug!(
                            "{} resolved empty at {area:.3} sq-deg; splitting further",
                            region.display_name()
                        );
                        let child_report = self.split(&region, area, cancel).await;
                        report.absorb(child_report);
                    }
                }
            }
            report
        })
    }

    /// `Split` state: partition into a near-square grid and walk the
    /// children in row-major order, isolating failures per branch.
    async fn split(
        &self,
        region: &BoundingBox,
        area: f64,
        cancel: CancellationToken,
    ) -> RegionReport {
        let (rows, cols) = grid_shape(
            area,
            self.config.max_area_threshold,
            region.height(),
            region.width(),
        );
        log::info!(
            "splitting {} ({area:.2} sq-deg) into a {rows}x{cols} grid",
            region.display_name()
        );

        let mut report = RegionReport::default();
        report.splits = 1;
        let mut first = true;
        for child in region.split_grid(rows, cols) {
            if cancel.is_cancelled() {
                break;
            }
            if !first && !self.pause(self.config.inter_branch_delay, &cancel).await {
                break;
            }
            first = false;
            let child_report = self.evaluate(child, cancel.clone()).await;
            report.absorb(child_report);
        }
        report
    }

    /// `QueryDirect` state: one pacer-gated query per attempt, governed by
    /// the retry policy.
    async fn query_leaf(&self, region: &BoundingBox, cancel: &CancellationToken) -> LeafOutcome {
        let mut state = RetryState::default();
        loop {
            if cancel.is_cancelled() {
                return LeafOutcome::Cancelled;
            }

            let outcome = {
                let _guard = self.pacer.acquire().await;
                self.client.query(region).await
            };
            let attempt = state.begin_attempt();

            let kind = match outcome {
                CollectionOutcome::Records(elements) if elements.is_empty() => {
                    return LeafOutcome::Empty;
                }
                CollectionOutcome::Records(elements) => return LeafOutcome::Records(elements),
                CollectionOutcome::Empty => return LeafOutcome::Empty,
                CollectionOutcome::Failure(kind) => kind,
            };

            match self.config.retry.decide(kind, attempt) {
                RetryDecision::Retry(delay) => {
                    log::debug!(
                        "{} attempt {attempt} failed ({kind}); retrying in {delay:?}",
                        region.display_name()
                    );
                    state.record_wait(delay);
                    if !self.pause(delay, cancel).await {
                        return LeafOutcome::Cancelled;
                    }
                }
                RetryDecision::GiveUp => {
                    log::debug!(
                        "{} giving up after {} attempts ({:?} backoff)",
                        region.display_name(),
                        state.attempts(),
                        state.waited()
                    );
                    return LeafOutcome::Failed(kind);
                }
            }
        }
    }

    /// Validate, geohash-tag and emit the elements of a successful leaf.
    /// Individual bad records are counted and skipped, never escalated.
    fn accept_elements(&self, elements: Vec<RawElement>, report: &mut RegionReport) {
        for element in elements {
            let Some(location) = element.coordinate() else {
                log::debug!("no coordinates for {}", element.document_id());
                report.records_skipped += 1;
                continue;
            };

            if let Err(reason) = record::accept(element.name(), location.y, location.x) {
                log::debug!("rejecting {}: {reason}", element.document_id());
                report.records_rejected += 1;
                continue;
            }

            let geohash = match geohash::encode(location.y, location.x, self.config.geohash_precision)
            {
                Ok(hash) => hash,
                Err(err) => {
                    // Unreachable after acceptance, but a skipped record
                    // beats a crashed branch.
                    log::warn!("geohash failed for {}: {err}", element.document_id());
                    report.records_skipped += 1;
                    continue;
                }
            };

            let id = element.document_id();
            let name = element.name().unwrap_or_default().trim().to_owned();
            let description = element.description();
            let country = element.country().map(str::to_owned);
            let region = element.region().map(str::to_owned);
            let amenities = element.amenities();

            report.records.push(SpatialRecord {
                id,
                name,
                location,
                geohash,
                rating: None,
                description,
                country,
                region,
                amenities,
                tags: element.tags,
                source: self.config.source_label.clone(),
            });
        }
    }

    /// Sleep unless cancelled; `false` means cancellation was observed.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// Grid shape for splitting a box of `area` square degrees: enough tiles
/// to bring every child under the threshold, never fewer than two so a
/// forced split still shrinks the box, squarish when the box is taller
/// than wide and a single row otherwise.
fn grid_shape(area: f64, threshold: f64, height: f64, width: f64) -> (usize, usize) {
    let tiles = (area / threshold.max(f64::MIN_POSITIVE)).ceil().max(2.0);
    let rows = if height > width { tiles.sqrt().ceil() } else { 1.0 };
    let cols = (tiles / rows).ceil();
    (rows.max(1.0) as usize, cols.max(1.0) as usize)
}
